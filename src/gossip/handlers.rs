use super::protocol::*;
use super::service::GossipService;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub async fn handle_view(
    Extension(service): Extension<Arc<GossipService>>,
    Json(request): Json<ViewExchangeRequest>,
) -> (StatusCode, Json<ViewExchangeResponse>) {
    let pre_merge = service.merge_view(&request.view).await;

    (
        StatusCode::OK,
        Json(ViewExchangeResponse {
            view: (*pre_merge).clone(),
        }),
    )
}

pub async fn handle_disseminate(
    Extension(service): Extension<Arc<GossipService>>,
    Json(request): Json<DisseminateRequest>,
) -> StatusCode {
    service.disseminate(&request.message);
    StatusCode::OK
}

pub async fn handle_get_data(
    Extension(service): Extension<Arc<GossipService>>,
) -> (StatusCode, Json<DataResponse>) {
    (
        StatusCode::OK,
        Json(DataResponse {
            entries: service.get_data(),
        }),
    )
}

pub async fn handle_added_to_view(
    Extension(service): Extension<Arc<GossipService>>,
    Json(request): Json<AddedToViewRequest>,
) -> StatusCode {
    match service.peer_added_us(&request.node).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!("added_to_view registration failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Wake-up used during bootstrap; carries nothing.
pub async fn handle_hello() -> StatusCode {
    StatusCode::OK
}
