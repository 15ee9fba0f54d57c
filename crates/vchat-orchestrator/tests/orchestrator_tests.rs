//! End-to-end orchestrator tests against shell-script workers.

#![cfg(unix)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vchat_models::{Job, JobId, JobPatch, JobStatus};
use vchat_orchestrator::{JobOrchestrator, MissingOutputPolicy, OrchestratorConfig, OrchestratorError};
use vchat_process::{WorkerCommand, WorkerLauncher};
use vchat_store::{InMemoryJobStore, JobStore, NewJob, StoreResult};

struct Harness {
    dir: TempDir,
    store: Arc<InMemoryJobStore>,
    orchestrator: Arc<JobOrchestrator>,
}

/// Store whose reads stall while `slow` is set.
struct SlowStore {
    inner: Arc<InMemoryJobStore>,
    slow: AtomicBool,
}

impl SlowStore {
    fn new(inner: Arc<InMemoryJobStore>) -> Self {
        Self {
            inner,
            slow: AtomicBool::new(false),
        }
    }

    fn set_slow(&self, slow: bool) {
        self.slow.store(slow, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for SlowStore {
    async fn list(&self) -> StoreResult<Vec<Job>> {
        self.inner.list().await
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.inner.get(id).await
    }

    async fn create(&self, new_job: NewJob) -> StoreResult<Job> {
        self.inner.create(new_job).await
    }

    async fn update(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job> {
        self.inner.update(id, patch).await
    }
}

impl Harness {
    fn new(script: &str) -> Self {
        Self::with_config(script, OrchestratorConfig::default())
    }

    fn with_config(script: &str, config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        Self::build(script, config, store.clone(), store)
    }

    /// `store` is read by the test directly, `orchestrated` is what the
    /// orchestrator talks to.
    fn build(
        script: &str,
        config: OrchestratorConfig,
        store: Arc<InMemoryJobStore>,
        orchestrated: Arc<dyn JobStore>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.sh");
        std::fs::write(&path, script).unwrap();

        let launcher = WorkerLauncher::new(WorkerCommand::new("sh").leading_arg(path.to_string_lossy()));
        let orchestrator = Arc::new(JobOrchestrator::with_launcher(orchestrated, launcher, config));

        Self {
            dir,
            store,
            orchestrator,
        }
    }

    async fn upload(&self, source: &str) -> JobId {
        self.store.create(NewJob::from_source(source)).await.unwrap().id
    }

    async fn job(&self, id: &JobId) -> Job {
        self.store.get(id).await.unwrap().unwrap()
    }

    /// Submit and wait for the run to finish.
    async fn run(&self, id: &JobId, command: &str) -> Job {
        self.orchestrator.submit(id, command).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.orchestrator.wait_for_run(id))
            .await
            .expect("worker run did not finish");
        self.job(id).await
    }

    /// Poll until `check` holds for the job.
    async fn wait_until(&self, id: &JobId, check: impl Fn(&Job) -> bool) -> Job {
        for _ in 0..250 {
            let job = self.job(id).await;
            if check(&job) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached for job {id}");
    }

    /// Path of a file the worker polls for before continuing.
    fn release_file(&self) -> String {
        self.dir.path().join("release").to_string_lossy().into_owned()
    }

    fn release(&self) {
        std::fs::write(self.release_file(), b"go").unwrap();
    }
}

fn wait_for_release(path: &str) -> String {
    format!("while [ ! -f '{path}' ]; do sleep 0.05; done\n")
}

#[tokio::test]
async fn test_successful_run_with_reported_output() {
    let h = Harness::new(
        r#"echo '{"status":"processing","progress":"Transcribing audio..."}'
echo '{"status":"processing","progress":"Removing silent segments..."}'
echo '{"status":"completed","progress":"Processing complete","outputArtifact":"processed_a.mp4"}'
"#,
    );
    let id = h.upload("a.mp4").await;

    let job = h.run(&id, "remove silence").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some("Processing complete"));
    assert_eq!(job.output_artifact.as_deref(), Some("processed_a.mp4"));
    assert_eq!(job.source_artifact, "a.mp4");
    assert!(!h.orchestrator.is_running(&id).await);
}

#[tokio::test]
async fn test_submit_ack_and_intermediate_state() {
    let h = Harness::new("");
    let script = format!(
        "echo '{{\"progress\":\"Waiting\"}}'\n{}echo '{{\"status\":\"completed\"}}'\n",
        wait_for_release(&h.release_file())
    );
    std::fs::write(h.dir.path().join("worker.sh"), script).unwrap();
    let id = h.upload("a.mp4").await;

    let ack = h.orchestrator.submit(&id, "remove silence").await.unwrap();
    assert_eq!(ack.job_id, id);
    assert_eq!(ack.status, JobStatus::Processing);
    assert_eq!(ack.message, "Processing started");
    assert!(h.orchestrator.is_running(&id).await);

    let job = h.wait_until(&id, |j| j.progress.as_deref() == Some("Waiting")).await;
    assert_eq!(job.status, JobStatus::Processing);

    h.release();
    h.orchestrator.wait_for_run(&id).await;
    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some("Waiting"));
}

#[tokio::test]
async fn test_nonzero_exit_without_terminal_update() {
    let h = Harness::new(
        r#"echo '{"status":"processing","progress":"Analyzing..."}'
exit 1
"#,
    );
    let id = h.upload("b.mp4").await;

    let job = h.run(&id, "trim to 60 seconds").await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.progress.as_deref(), Some("Processing failed (exit code 1)"));
    assert!(job.output_artifact.is_none());
}

#[tokio::test]
async fn test_killed_worker_is_error() {
    let h = Harness::new("kill -9 $$\n");
    let id = h.upload("b.mp4").await;

    let job = h.run(&id, "trim").await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.progress.as_deref(), Some("Processing failed (worker terminated)"));
}

#[tokio::test]
async fn test_garbage_lines_are_ignored() {
    let h = Harness::new(
        r#"echo 'Loading model...'
echo '{"status":"completed"'
echo '[1,2,3]'
echo '{"status":"finished","progress":"nope"}'
echo '{"status":"completed","progress":"Done","outputArtifact":"c_out.mp4"}'
"#,
    );
    let id = h.upload("c.mp4").await;

    let job = h.run(&id, "add captions").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some("Done"));
    assert_eq!(job.output_artifact.as_deref(), Some("c_out.mp4"));
}

#[tokio::test]
async fn test_progress_is_last_writer_wins() {
    let h = Harness::new(
        r#"echo '{"progress":"step 1"}'
echo '{"progress":"step 2"}'
echo '{"outputArtifact":"d_out.mp4"}'
echo '{"progress":"step 3"}'
echo '{"status":"completed"}'
"#,
    );
    let id = h.upload("d.mp4").await;

    let job = h.run(&id, "compress").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some("step 3"));
    assert_eq!(job.output_artifact.as_deref(), Some("d_out.mp4"));
}

#[tokio::test]
async fn test_reported_error_wins_over_clean_exit() {
    let h = Harness::new(
        r#"echo '{"status":"error","progress":"Error: unsupported codec"}'
exit 0
"#,
    );
    let id = h.upload("e.mp4").await;

    let job = h.run(&id, "convert").await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.progress.as_deref(), Some("Error: unsupported codec"));
}

#[tokio::test]
async fn test_reported_completion_wins_over_failed_exit() {
    let h = Harness::new(
        r#"echo '{"status":"completed","progress":"Done","outputArtifact":"f_out.mp4"}'
echo '{"status":"error","progress":"late noise"}'
exit 3
"#,
    );
    let id = h.upload("f.mp4").await;

    let job = h.run(&id, "convert").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some("Done"));
    assert_eq!(job.output_artifact.as_deref(), Some("f_out.mp4"));
}

#[tokio::test]
async fn test_clean_exit_without_output_policies() {
    let script = r#"echo '{"progress":"working"}'
exit 0
"#;

    let h = Harness::new(script);
    let id = h.upload("g.mp4").await;
    let job = h.run(&id, "noop").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some("Processing finished"));
    assert!(job.output_artifact.is_none());

    let h = Harness::with_config(
        script,
        OrchestratorConfig::default().with_missing_output(MissingOutputPolicy::Fail),
    );
    let id = h.upload("g.mp4").await;
    let job = h.run(&id, "noop").await;
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.progress.as_deref(), Some("Worker exited without reporting an output"));
}

#[tokio::test]
async fn test_resubmission_clears_previous_output() {
    let h = Harness::new(
        r#"if [ "$3" = "again" ]; then exit 0; fi
echo '{"status":"completed","outputArtifact":"h_out.mp4"}'
"#,
    );
    let id = h.upload("h.mp4").await;

    let first = h.run(&id, "first").await;
    assert_eq!(first.output_artifact.as_deref(), Some("h_out.mp4"));

    let second = h.run(&id, "again").await;
    assert_eq!(second.status, JobStatus::Completed);
    assert!(second.output_artifact.is_none());
    assert_eq!(second.progress.as_deref(), Some("Processing finished"));
}

#[tokio::test]
async fn test_worker_receives_job_arguments() {
    let h = Harness::new(
        r#"echo "{\"status\":\"completed\",\"progress\":\"$3\",\"outputArtifact\":\"$1-$2\"}"
"#,
    );
    let id = h.upload("i.mp4").await;

    let job = h.run(&id, "remove silence").await;

    assert_eq!(job.progress.as_deref(), Some("remove silence"));
    assert_eq!(job.output_artifact, Some(format!("{}-i.mp4", id)));
}

#[tokio::test]
async fn test_busy_job_rejects_second_submit() {
    let h = Harness::new("");
    let script = format!("{}echo '{{\"status\":\"completed\"}}'\n", wait_for_release(&h.release_file()));
    std::fs::write(h.dir.path().join("worker.sh"), script).unwrap();
    let id = h.upload("j.mp4").await;

    let first = h.orchestrator.submit(&id, "first").await.unwrap();
    let before = h.job(&id).await;
    assert_eq!(before.status, JobStatus::Processing);

    let err = h.orchestrator.submit(&id, "second").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::JobBusy(_)));
    assert!(err.is_busy());
    assert_eq!(h.job(&id).await, before);
    assert_eq!(h.orchestrator.active_runs().await, 1);

    h.release();
    h.orchestrator.wait_for_run(&id).await;
    assert_eq!(h.job(&id).await.status, JobStatus::Completed);

    let again = h.orchestrator.submit(&id, "third").await.unwrap();
    assert_ne!(again.run_id, first.run_id);
    h.orchestrator.wait_for_run(&id).await;
}

#[tokio::test]
async fn test_launch_failure_leaves_job_untouched() {
    let store = Arc::new(InMemoryJobStore::new());
    let launcher = WorkerLauncher::new(WorkerCommand::new("/nonexistent/vchat-worker"));
    let orchestrator = JobOrchestrator::with_launcher(store.clone(), launcher, OrchestratorConfig::default());
    let job = store.create(NewJob::from_source("k.mp4")).await.unwrap();

    let err = orchestrator.submit(&job.id, "remove silence").await.unwrap_err();

    assert!(matches!(err, OrchestratorError::LaunchFailure(_)));
    assert_eq!(store.get(&job.id).await.unwrap().unwrap(), job);
    assert!(!orchestrator.is_running(&job.id).await);
}

#[tokio::test]
async fn test_rejected_submissions() {
    let h = Harness::new("exit 0\n");
    let id = h.upload("l.mp4").await;

    let err = tokio_test::assert_err!(h.orchestrator.submit(&JobId::from("missing"), "x").await);
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let err = tokio_test::assert_err!(h.orchestrator.submit(&id, "   ").await);
    assert!(matches!(err, OrchestratorError::InvalidCommand(_)));

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Uploaded);
    assert_eq!(job.progress.as_deref(), Some("Ready to process"));
}

#[tokio::test]
async fn test_run_timeout_kills_worker() {
    let h = Harness::with_config(
        "echo '{\"progress\":\"stuck\"}'\nexec sleep 30\n",
        OrchestratorConfig::default().with_run_timeout(Duration::from_millis(300)),
    );
    let id = h.upload("m.mp4").await;

    let job = h.run(&id, "hang").await;

    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.progress.as_deref(), Some("Processing timed out"));
    assert!(!h.orchestrator.is_running(&id).await);
}

#[tokio::test]
async fn test_abandon_discards_later_output() {
    let h = Harness::new("");
    let script = format!(
        "echo '{{\"progress\":\"Waiting\"}}'\n{}echo '{{\"status\":\"completed\",\"outputArtifact\":\"n_out.mp4\"}}'\n",
        wait_for_release(&h.release_file())
    );
    std::fs::write(h.dir.path().join("worker.sh"), script).unwrap();
    let id = h.upload("n.mp4").await;

    h.orchestrator.submit(&id, "remove silence").await.unwrap();
    h.wait_until(&id, |j| j.progress.as_deref() == Some("Waiting")).await;

    let job = h.orchestrator.abandon(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.progress.as_deref(), Some("Processing abandoned"));
    assert!(!h.orchestrator.is_running(&id).await);

    h.release();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.output_artifact.is_none());
}

#[tokio::test]
async fn test_abandon_racing_resubmit_keeps_new_run() {
    let inner = Arc::new(InMemoryJobStore::new());
    let slow = Arc::new(SlowStore::new(inner.clone()));
    let h = Harness::build(
        "if [ \"$3\" = \"first\" ]; then exec sleep 5; fi\nsleep 0.5\nexit 0\n",
        OrchestratorConfig::default(),
        inner,
        slow.clone(),
    );
    let id = h.upload("p.mp4").await;
    h.orchestrator.submit(&id, "first").await.unwrap();

    // Every read now takes 200ms, so the resubmission lands while the
    // abandon is between removing the old run and writing its verdict.
    slow.set_slow(true);
    let abandon = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let id = id.clone();
        tokio::spawn(async move { orchestrator.abandon(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let resubmitted = h.orchestrator.submit(&id, "second").await;
    let abandoned = abandon.await.unwrap().unwrap();
    slow.set_slow(false);

    assert_eq!(abandoned.status, JobStatus::Error);
    assert_eq!(abandoned.progress.as_deref(), Some("Processing abandoned"));

    let ack = resubmitted.unwrap();
    assert_eq!(ack.status, JobStatus::Processing);
    tokio::time::timeout(Duration::from_secs(10), h.orchestrator.wait_for_run(&id))
        .await
        .expect("second run did not finish");

    let job = h.job(&id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.as_deref(), Some("Processing finished"));
}

#[tokio::test]
async fn test_abandon_without_run() {
    let h = Harness::new("exit 0\n");
    let id = h.upload("o.mp4").await;

    let err = tokio_test::assert_err!(h.orchestrator.abandon(&id).await);
    assert!(matches!(err, OrchestratorError::NotRunning(_)));

    let err = tokio_test::assert_err!(h.orchestrator.abandon(&JobId::from("missing")).await);
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_jobs_stay_isolated() {
    let h = Harness::new(
        r#"echo "{\"progress\":\"working on $1\"}"
sleep 0.1
echo "{\"status\":\"completed\",\"progress\":\"done $1\",\"outputArtifact\":\"$2.out\"}"
"#,
    );

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(h.upload(&format!("clip{i}.mp4")).await);
    }
    for id in &ids {
        h.orchestrator.submit(id, "remove silence").await.unwrap();
    }
    assert!(h.orchestrator.wait_for_idle(Duration::from_secs(10)).await);

    for (i, id) in ids.iter().enumerate() {
        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, Some(format!("done {id}")));
        assert_eq!(job.output_artifact, Some(format!("clip{i}.mp4.out")));
    }
    assert_eq!(h.orchestrator.active_runs().await, 0);
    assert!(h.orchestrator.running_jobs().await.is_empty());
}
