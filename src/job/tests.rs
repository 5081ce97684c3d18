//! Job Module Tests
//!
//! Covers the worker subprocess contract, the runner's queue and replacement
//! behavior, the leader's round-robin split and count reconciliation, and the
//! service-level admission and recruitment rules. The dispatch plane is
//! driven through a recording transport so no network is involved.

#[cfg(test)]
mod tests {
    use crate::coordination::client::{Coordination, CreateMode, work_election_signal_path};
    use crate::coordination::memory::MemoryCoordination;
    use crate::election::coordinator::ElectionCoordinator;
    use crate::election::work_group::WorkGroupManager;
    use crate::gossip::dedup::BloomSet;
    use crate::gossip::service::GossipService;
    use crate::gossip::types::{Node, NodeId, NodeStatus, StatusCell, View};
    use crate::job::leader::LeaderSession;
    use crate::job::protocol::{DoneRequest, RecruitRequest, ResultRequest, TaskRequest};
    use crate::job::runner::JobRunner;
    use crate::job::service::JobService;
    use crate::job::subprocess::WorkerProcess;
    use crate::job::types::{Job, JobError, JobId, TaskLine};
    use crate::rpc::TaskTransport;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn id(s: &str) -> NodeId {
        NodeId(s.to_string())
    }

    fn cat_job(job_id: &str, input: &str, output: &str) -> Job {
        Job {
            job_id: JobId(job_id.to_string()),
            source: vec!["cat".to_string()],
            input: input.to_string(),
            output: output.to_string(),
        }
    }

    /// Transport double recording every dispatch-plane call.
    #[derive(Default)]
    struct RecordingTransport {
        tasks: Mutex<Vec<(NodeId, TaskRequest)>>,
        results: Mutex<Vec<(NodeId, ResultRequest)>>,
        dones: Mutex<Vec<(NodeId, DoneRequest)>>,
    }

    #[async_trait]
    impl TaskTransport for RecordingTransport {
        async fn send_task(&self, peer: &NodeId, request: &TaskRequest) -> Result<()> {
            self.tasks
                .lock()
                .unwrap()
                .push((peer.clone(), request.clone()));
            Ok(())
        }

        async fn send_result(&self, peer: &NodeId, request: &ResultRequest) -> Result<()> {
            self.results
                .lock()
                .unwrap()
                .push((peer.clone(), request.clone()));
            Ok(())
        }

        async fn send_done(&self, peer: &NodeId, request: &DoneRequest) -> Result<()> {
            self.dones
                .lock()
                .unwrap()
                .push((peer.clone(), request.clone()));
            Ok(())
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_subprocess_answers_line_for_line() {
        let mut process = WorkerProcess::spawn(&["cat".to_string()]).unwrap();

        let reply = process
            .exchange("hello", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply, "hello");

        let reply = process
            .exchange("world", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply, "world");

        process.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_subprocess_reply_timeout_fails_the_exchange() {
        // sleep never reads its stdin, so no reply ever comes.
        let mut process =
            WorkerProcess::spawn(&["sleep".to_string(), "30".to_string()]).unwrap();

        let err = process
            .exchange("line", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not reply"));

        process.kill().await;
    }

    #[tokio::test]
    async fn test_runner_executes_tasks_and_delivers_results() {
        let status = Arc::new(StatusCell::new(NodeStatus::Idle));
        let transport = Arc::new(RecordingTransport::default());
        let (runner, jobs_rx) = JobRunner::new(
            status.clone(),
            transport.clone(),
            8,
            Duration::from_secs(2),
        );
        runner.clone().spawn(jobs_rx);

        let leader = id("leader:1");
        runner.push(cat_job("job-1", "unused", "unused"));

        runner
            .submit_task(
                "job-1",
                TaskLine {
                    seq: 0,
                    line: "alpha".to_string(),
                    leader: leader.clone(),
                },
            )
            .await
            .unwrap();
        runner
            .submit_task(
                "job-1",
                TaskLine {
                    seq: 1,
                    line: "beta".to_string(),
                    leader: leader.clone(),
                },
            )
            .await
            .unwrap();

        wait_until(
            || transport.results.lock().unwrap().len() == 2,
            "both results",
        )
        .await;

        let results = transport.results.lock().unwrap().clone();
        assert_eq!(results[0].0, leader);
        assert_eq!(results[0].1.job_id, "job-1");
        assert_eq!(results[0].1.line, "alpha");
        assert_eq!(results[1].1.line, "beta");

        runner.finish_job("job-1");
        wait_until(|| status.get() == NodeStatus::Idle, "runner back to idle").await;
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn test_runner_rejects_tasks_for_unknown_job() {
        let status = Arc::new(StatusCell::new(NodeStatus::Idle));
        let transport = Arc::new(RecordingTransport::default());
        let (runner, _jobs_rx) =
            JobRunner::new(status, transport, 8, Duration::from_secs(1));

        let err = runner
            .submit_task(
                "nope",
                TaskLine {
                    seq: 0,
                    line: "x".to_string(),
                    leader: id("l:1"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UnknownJob(_)));
    }

    #[tokio::test]
    async fn test_runner_replaces_active_job_cooperatively() {
        let status = Arc::new(StatusCell::new(NodeStatus::Idle));
        let transport = Arc::new(RecordingTransport::default());
        let (runner, jobs_rx) = JobRunner::new(
            status.clone(),
            transport.clone(),
            8,
            Duration::from_secs(2),
        );
        runner.clone().spawn(jobs_rx);

        runner.push(cat_job("job-old", "unused", "unused"));
        wait_until(|| status.get() == NodeStatus::Working, "first job running").await;

        runner.push(cat_job("job-new", "unused", "unused"));
        wait_until(|| !runner.has_job("job-old"), "old job torn down").await;
        assert!(runner.has_job("job-new"));

        runner
            .submit_task(
                "job-new",
                TaskLine {
                    seq: 0,
                    line: "still-works".to_string(),
                    leader: id("l:1"),
                },
            )
            .await
            .unwrap();
        wait_until(
            || !transport.results.lock().unwrap().is_empty(),
            "replacement job answering",
        )
        .await;
        assert_eq!(
            transport.results.lock().unwrap()[0].1.line,
            "still-works"
        );

        runner.finish_job("job-new");
    }

    #[tokio::test]
    async fn test_leader_deals_round_robin_and_reconciles_counts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        std::fs::write(&input, "one\ntwo\nthree\nfour\n").unwrap();

        let workers = vec![id("w1:1"), id("w2:1")];
        let transport = Arc::new(RecordingTransport::default());
        let job = cat_job(
            "job-1",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
        );

        let session = LeaderSession::new(
            job,
            workers.clone(),
            id("w1:1"),
            transport.clone(),
        )
        .unwrap();

        session.dispatch().await.unwrap();

        let tasks = transport.tasks.lock().unwrap().clone();
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].0, workers[0]);
        assert_eq!(tasks[1].0, workers[1]);
        assert_eq!(tasks[2].0, workers[0]);
        assert_eq!(tasks[3].0, workers[1]);
        assert_eq!(session.counters(), (4, 0));

        let mut done = session.done();
        assert!(!*done.borrow());

        for (_, task) in &tasks {
            session
                .on_result(task.seq, &format!("{}!", task.line))
                .await
                .unwrap();
        }

        done.changed().await.unwrap();
        assert!(*done.borrow());
        assert_eq!(session.counters(), (4, 4));

        // Output is collected in arrival order, one line per result.
        let collected = std::fs::read_to_string(&output).unwrap();
        assert_eq!(collected, "one!\ntwo!\nthree!\nfour!\n");

        // Every worker was told the job is over.
        let dones = transport.dones.lock().unwrap();
        assert_eq!(dones.len(), 2);
        assert!(dones.iter().all(|(_, d)| d.job_id == "job-1"));
    }

    #[tokio::test]
    async fn test_leader_with_empty_input_finalizes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.txt");
        let output = dir.path().join("output.txt");
        std::fs::write(&input, "").unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let job = cat_job(
            "job-1",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
        );
        let session =
            LeaderSession::new(job, vec![id("w1:1")], id("w1:1"), transport.clone()).unwrap();

        session.dispatch().await.unwrap();

        assert!(*session.done().borrow());
        assert_eq!(session.counters(), (0, 0));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
        assert_eq!(transport.dones.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leader_counts_redelivered_results_once() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        std::fs::write(&input, "one\ntwo\n").unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let job = cat_job(
            "job-1",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
        );
        let session =
            LeaderSession::new(job, vec![id("w1:1")], id("w1:1"), transport.clone()).unwrap();

        session.dispatch().await.unwrap();

        // A retried delivery hands the first line's result over twice. Only
        // one may count, or the session finalizes with a line still out and
        // the straggler is lost.
        session.on_result(0, "one!").await.unwrap();
        session.on_result(0, "one!").await.unwrap();
        assert!(!*session.done().borrow());
        assert_eq!(session.counters(), (2, 1));

        session.on_result(1, "two!").await.unwrap();
        assert!(*session.done().borrow());
        assert_eq!(session.counters(), (2, 2));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "one!\ntwo!\n");
    }

    #[tokio::test]
    async fn test_runner_executes_redelivered_task_once() {
        let status = Arc::new(StatusCell::new(NodeStatus::Idle));
        let transport = Arc::new(RecordingTransport::default());
        let (runner, jobs_rx) = JobRunner::new(
            status.clone(),
            transport.clone(),
            8,
            Duration::from_secs(2),
        );
        runner.clone().spawn(jobs_rx);

        runner.push(cat_job("job-1", "unused", "unused"));

        let task = TaskLine {
            seq: 0,
            line: "alpha".to_string(),
            leader: id("l:1"),
        };
        runner.submit_task("job-1", task.clone()).await.unwrap();
        runner.submit_task("job-1", task).await.unwrap();

        wait_until(
            || !transport.results.lock().unwrap().is_empty(),
            "first result",
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let results = transport.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.line, "alpha");
    }

    #[tokio::test]
    async fn test_leader_refuses_empty_work_group() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.txt");
        let transport = Arc::new(RecordingTransport::default());
        let job = cat_job("job-1", "whatever", output.to_str().unwrap());

        assert!(LeaderSession::new(job, vec![], id("w1:1"), transport).is_err());
    }

    struct Cluster {
        status: Arc<StatusCell>,
        runner: Arc<JobRunner>,
        election: Arc<ElectionCoordinator>,
        groups: Arc<WorkGroupManager>,
        transport: Arc<RecordingTransport>,
        service: Arc<JobService>,
    }

    /// One node's full job stack over in-process coordination, with a fixed
    /// recruitment draw.
    fn build_node(node: &str, coordination: &Arc<MemoryCoordination>, draw: f64) -> Cluster {
        let node_id = id(node);
        let status = Arc::new(StatusCell::new(NodeStatus::Idle));
        let transport = Arc::new(RecordingTransport::default());
        let session = coordination.session();

        let (runner, jobs_rx) = JobRunner::new(
            status.clone(),
            transport.clone(),
            8,
            Duration::from_secs(2),
        );
        runner.clone().spawn(jobs_rx);

        let election = ElectionCoordinator::new(node_id.clone(), session.clone());
        let groups = WorkGroupManager::new(node_id.clone(), session.clone(), election.clone());

        let local = Node::new("127.0.0.1", 1);
        let (gossip, _actions_rx) = GossipService::new(
            local.clone(),
            status.clone(),
            View::new(local.id()),
            4,
            Box::new(BloomSet::new(1000, 0.01)),
            session.clone(),
        );

        let service = JobService::with_draw(
            status.clone(),
            runner.clone(),
            election.clone(),
            groups.clone(),
            gossip,
            session,
            transport.clone(),
            Box::new(move || draw),
        );

        Cluster {
            status,
            runner,
            election,
            groups,
            transport,
            service,
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_jobs() {
        let coordination = MemoryCoordination::new();
        let node = build_node("a:1", &coordination, 0.0);

        let mut job = cat_job("job-1", "input", "output");
        job.input = String::new();

        let err = node.service.submit(job).await.unwrap_err();
        assert!(matches!(err, JobError::Malformed(_)));
        assert!(!node.runner.is_busy());
    }

    #[tokio::test]
    async fn test_submit_admits_then_rejects_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        std::fs::write(&input, "only-line\n").unwrap();

        let coordination = MemoryCoordination::new();
        let node = build_node("a:1", &coordination, 0.0);

        node.service
            .submit(cat_job(
                "job-1",
                input.to_str().unwrap(),
                output.to_str().unwrap(),
            ))
            .await
            .unwrap();

        assert!(node.runner.has_job("job-1"));
        assert_eq!(node.status.get(), NodeStatus::Recruiting);
        assert_eq!(
            node.groups.current_group().await,
            Some("job-1".to_string())
        );

        let err = node
            .service
            .submit(cat_job("job-2", "other", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Busy));
    }

    #[tokio::test]
    async fn test_sole_submitter_becomes_leader_and_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        std::fs::write(&input, "one\ntwo\n").unwrap();

        let coordination = MemoryCoordination::new();
        let node = build_node("a:1", &coordination, 0.0);

        node.service
            .submit(cat_job(
                "job-1",
                input.to_str().unwrap(),
                output.to_str().unwrap(),
            ))
            .await
            .unwrap();

        wait_until(|| node.election.is_leader(), "election win").await;
        wait_until(
            || node.transport.tasks.lock().unwrap().len() == 2,
            "both lines dispatched",
        )
        .await;

        // Alone in the group, the leader deals every line to itself.
        let tasks = node.transport.tasks.lock().unwrap().clone();
        assert!(tasks.iter().all(|(peer, _)| *peer == id("a:1")));
        assert!(tasks.iter().all(|(_, t)| t.leader == id("a:1")));
    }

    #[tokio::test]
    async fn test_worker_recampaigns_when_leader_signal_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        std::fs::write(&input, "line\n").unwrap();

        let coordination = MemoryCoordination::new();
        let leader_session = coordination.session();

        // A leader elsewhere holds the first ticket and has announced its
        // win on the signal node; both live on its coordination session.
        leader_session
            .create("/work_elections/job-r", "", CreateMode::Persistent)
            .await
            .unwrap();
        leader_session
            .create(
                "/work_elections/job-r/candidate-",
                "z:9",
                CreateMode::EphemeralSequential,
            )
            .await
            .unwrap();
        leader_session
            .create(
                &work_election_signal_path("job-r"),
                "z:9",
                CreateMode::Ephemeral,
            )
            .await
            .unwrap();

        let node = build_node("b:1", &coordination, 1.0);
        let request = RecruitRequest {
            job: cat_job(
                "job-r",
                input.to_str().unwrap(),
                output.to_str().unwrap(),
            ),
            recruiter: id("z:9"),
        };
        assert!(node.service.handle_recruit(&request).await);
        assert!(node.runner.has_job("job-r"));

        // Our campaign resolves as follower and withdraws its ticket.
        let observer = coordination.session();
        for _ in 0..200 {
            let tickets = observer
                .get_children("/work_elections/job-r")
                .await
                .unwrap();
            if tickets.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The leader's session dies; its ticket and signal expire and the
        // surviving worker takes the job's leadership over.
        leader_session.close();

        for _ in 0..800 {
            if node.election.is_leader() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(node.election.is_leader());
        assert_eq!(node.election.leader_of("job-r").await, Some(id("b:1")));
    }

    #[tokio::test]
    async fn test_recruitment_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let output = dir.path().join("output.txt");
        std::fs::write(&input, "line\n").unwrap();

        let coordination = MemoryCoordination::new();

        let request = RecruitRequest {
            job: cat_job(
                "job-r",
                input.to_str().unwrap(),
                output.to_str().unwrap(),
            ),
            recruiter: id("r:1"),
        };

        // Idle node drawing above 0.3 joins.
        let eager = build_node("b:1", &coordination, 0.5);
        assert!(eager.service.handle_recruit(&request).await);
        assert!(eager.runner.has_job("job-r"));
        assert_eq!(
            eager.groups.current_group().await,
            Some("job-r".to_string())
        );

        // A busy node needs more than 0.7; the same 0.5 draw declines.
        let busy = build_node("c:1", &coordination, 0.5);
        busy.status.set(NodeStatus::Working);
        assert!(!busy.service.handle_recruit(&request).await);
        assert!(!busy.runner.has_job("job-r"));

        // A node drawing below 0.3 declines even when idle.
        let timid = build_node("d:1", &coordination, 0.2);
        assert!(!timid.service.handle_recruit(&request).await);
    }

    #[tokio::test]
    async fn test_leaders_always_decline_recruitment() {
        let coordination = MemoryCoordination::new();
        let node = build_node("a:1", &coordination, 1.0);

        let outcome_rx = node.election.start_election("job-led").await.unwrap();
        outcome_rx.await.unwrap();
        assert!(node.election.is_leader());

        let request = RecruitRequest {
            job: cat_job("job-other", "unused", "unused"),
            recruiter: id("r:1"),
        };
        assert!(!node.service.handle_recruit(&request).await);
        assert!(!node.runner.has_job("job-other"));
    }

    #[tokio::test]
    async fn test_done_signal_lets_runner_drain() {
        let coordination = MemoryCoordination::new();
        let node = build_node("a:1", &coordination, 0.0);

        node.runner.push(cat_job("job-1", "unused", "unused"));
        wait_until(|| node.status.get() == NodeStatus::Working, "job running").await;

        node.service.on_done(&DoneRequest {
            job_id: "job-1".to_string(),
        });

        wait_until(|| node.status.get() == NodeStatus::Idle, "drain and stop").await;
        assert!(!node.runner.is_busy());
    }

    #[tokio::test]
    async fn test_results_for_unled_jobs_are_rejected() {
        let coordination = MemoryCoordination::new();
        let node = build_node("a:1", &coordination, 0.0);

        let err = node
            .service
            .on_result(&ResultRequest {
                job_id: "nobody".to_string(),
                seq: 0,
                line: "x".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UnknownJob(_)));
    }
}
