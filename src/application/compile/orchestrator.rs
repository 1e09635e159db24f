use std::{
    mem,
    path::PathBuf,
    sync::{Arc, atomic::AtomicU64},
    time::Instant,
};

use metrics::{counter, histogram};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::domain::DateKey;

use super::{
    artifacts::CurrentArtifacts,
    invoker::DocumentRenderer,
    types::{CompileOutcome, CompileRequest, RequestId},
};

const SUPERSEDED_REASON: &str = "superseded by a newer compile request";
const WORKER_GONE_REASON: &str = "compile worker is no longer running";

struct QueuedCompile {
    request: CompileRequest,
    reply: oneshot::Sender<CompileOutcome>,
}

/// Owns the compile request lifecycle.
///
/// At most one renderer subprocess runs at a time. Requests that arrive
/// while one is running form a pending slot of depth one: a newer request
/// replaces an older queued-but-not-started one, and the replaced request is
/// answered immediately so its caller never hangs. Successful outcomes are
/// published into the current-artifact table before the reply is delivered;
/// failures leave the table untouched.
pub struct CompileOrchestrator {
    queue: mpsc::UnboundedSender<QueuedCompile>,
    artifacts: CurrentArtifacts,
    template_path: PathBuf,
    next_request_id: AtomicU64,
    worker: JoinHandle<()>,
}

impl CompileOrchestrator {
    /// Spawn the orchestrator worker around a renderer capability.
    pub fn start(renderer: Arc<dyn DocumentRenderer>, template_path: PathBuf) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let artifacts = CurrentArtifacts::new();
        let worker = tokio::spawn(worker_loop(receiver, renderer, artifacts.clone()));
        Self {
            queue,
            artifacts,
            template_path,
            next_request_id: AtomicU64::new(1),
            worker,
        }
    }

    /// Submit a compile request and wait for its outcome.
    ///
    /// Every internal fault is normalised into a failure outcome; nothing
    /// escapes the component boundary as a panic.
    pub async fn compile(&self, date_key: DateKey, source_text: String) -> CompileOutcome {
        counter!("quaderno_compile_total").increment(1);
        let request = CompileRequest {
            request_id: RequestId::next(&self.next_request_id),
            date_key,
            source_text,
            template_path: self.template_path.clone(),
        };

        let (reply, outcome) = oneshot::channel();
        if self.queue.send(QueuedCompile { request, reply }).is_err() {
            return CompileOutcome::failure(WORKER_GONE_REASON, None);
        }

        match outcome.await {
            Ok(outcome) => outcome,
            Err(_) => CompileOutcome::failure(WORKER_GONE_REASON, None),
        }
    }

    /// Shared view of the most recently published artifact per date.
    pub fn artifacts(&self) -> CurrentArtifacts {
        self.artifacts.clone()
    }

    pub fn current_artifact(&self, key: &DateKey) -> Option<PathBuf> {
        self.artifacts.get(key)
    }

    /// Stop accepting requests and wait for the worker to drain.
    pub async fn shutdown(self) {
        drop(self.queue);
        let _ = self.worker.await;
    }
}

async fn worker_loop(
    mut queue: mpsc::UnboundedReceiver<QueuedCompile>,
    renderer: Arc<dyn DocumentRenderer>,
    artifacts: CurrentArtifacts,
) {
    while let Some(mut accepted) = queue.recv().await {
        // Anything that queued up behind the previous compile coalesces down
        // to the newest request; the rest are answered as superseded.
        while let Ok(newer) = queue.try_recv() {
            let superseded = mem::replace(&mut accepted, newer);
            counter!("quaderno_compile_superseded_total").increment(1);
            info!(
                target = "application::compile::orchestrator",
                op = "orchestrator::coalesce",
                request_id = %superseded.request.request_id,
                date_key = %superseded.request.date_key,
                "Queued compile request superseded before start"
            );
            let _ = superseded
                .reply
                .send(CompileOutcome::failure(SUPERSEDED_REASON, None));
        }

        let QueuedCompile { request, reply } = accepted;
        let started_at = Instant::now();
        let outcome = renderer.render(&request).await;
        histogram!("quaderno_compile_ms").record(started_at.elapsed().as_millis() as f64);

        match &outcome {
            CompileOutcome::Success { artifact_path, .. } => {
                artifacts.publish(request.date_key.clone(), artifact_path.clone());
                info!(
                    target = "application::compile::orchestrator",
                    op = "orchestrator::compile",
                    result = "success",
                    request_id = %request.request_id,
                    date_key = %request.date_key,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    artifact = %artifact_path.display(),
                    "Compile finished and artifact published"
                );
            }
            CompileOutcome::Failure { reason, .. } => {
                counter!("quaderno_compile_failure_total").increment(1);
                warn!(
                    target = "application::compile::orchestrator",
                    op = "orchestrator::compile",
                    result = "failure",
                    request_id = %request.request_id,
                    date_key = %request.date_key,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    reason = %reason,
                    "Compile failed; previously published artifact left untouched"
                );
            }
        }

        let _ = reply.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use crate::application::compile::artifacts::ArtifactStore;

    /// Renderer double: records the source text of every invocation and
    /// serves canned outcomes, optionally holding each call until released.
    struct ScriptedRenderer {
        outcomes: Mutex<Vec<CompileOutcome>>,
        invoked: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedRenderer {
        fn new(outcomes: Vec<CompileOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                invoked: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn gated(outcomes: Vec<CompileOutcome>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(outcomes)
            }
        }

        fn invocations(&self) -> Vec<String> {
            self.invoked.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl DocumentRenderer for ScriptedRenderer {
        async fn render(&self, request: &CompileRequest) -> CompileOutcome {
            self.invoked
                .lock()
                .expect("lock")
                .push(request.source_text.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.outcomes.lock().expect("lock").remove(0)
        }
    }

    fn artifact_store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path().join("output_files"), "pdf").expect("store")
    }

    fn key(raw: &str) -> DateKey {
        DateKey::parse(raw).expect("key")
    }

    #[tokio::test]
    async fn success_publishes_the_artifact() {
        let dir = TempDir::new().expect("temp dir");
        let store = artifact_store(&dir);
        let artifact = store.artifact_path(&key("2024-01-01"));
        let renderer = Arc::new(ScriptedRenderer::new(vec![CompileOutcome::success(
            artifact.clone(),
            None,
        )]));
        let orchestrator =
            CompileOrchestrator::start(renderer, PathBuf::from("assets/latex_template.tex"));

        let outcome = orchestrator
            .compile(key("2024-01-01"), "\\section{A}".to_string())
            .await;

        assert!(outcome.is_success());
        assert_eq!(
            orchestrator.current_artifact(&key("2024-01-01")),
            Some(artifact)
        );
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn failure_leaves_the_published_artifact_untouched() {
        let dir = TempDir::new().expect("temp dir");
        let store = artifact_store(&dir);
        let artifact = store.artifact_path(&key("2024-01-01"));
        let renderer = Arc::new(ScriptedRenderer::new(vec![
            CompileOutcome::success(artifact.clone(), None),
            CompileOutcome::failure("renderer reported failure", Some("bad input".to_string())),
        ]));
        let orchestrator =
            CompileOrchestrator::start(renderer, PathBuf::from("assets/latex_template.tex"));

        let first = orchestrator
            .compile(key("2024-01-01"), "good".to_string())
            .await;
        let second = orchestrator
            .compile(key("2024-01-01"), "bad".to_string())
            .await;

        assert!(first.is_success());
        assert!(!second.is_success());
        assert_eq!(second.log(), Some("bad input"));
        assert_eq!(
            orchestrator.current_artifact(&key("2024-01-01")),
            Some(artifact)
        );
        orchestrator.shutdown().await;
    }

    fn queued(
        id: u64,
        date: &str,
        source: &str,
    ) -> (QueuedCompile, oneshot::Receiver<CompileOutcome>) {
        let counter = AtomicU64::new(id);
        let (reply, receiver) = oneshot::channel();
        let queued = QueuedCompile {
            request: CompileRequest {
                request_id: RequestId::next(&counter),
                date_key: key(date),
                source_text: source.to_string(),
                template_path: PathBuf::from("assets/latex_template.tex"),
            },
            reply,
        };
        (queued, receiver)
    }

    #[tokio::test]
    async fn queued_requests_coalesce_to_the_newest() {
        let dir = TempDir::new().expect("temp dir");
        let store = artifact_store(&dir);
        let first_artifact = store.artifact_path(&key("2024-01-01"));
        let last_artifact = store.artifact_path(&key("2024-01-03"));
        let gate = Arc::new(Notify::new());
        let renderer = Arc::new(ScriptedRenderer::gated(
            vec![
                CompileOutcome::success(first_artifact, None),
                CompileOutcome::success(last_artifact.clone(), None),
            ],
            gate.clone(),
        ));

        let (queue, receiver) = mpsc::unbounded_channel();
        let artifacts = CurrentArtifacts::new();
        let worker = tokio::spawn(worker_loop(receiver, renderer.clone(), artifacts.clone()));

        let (q1, r1) = queued(1, "2024-01-01", "r1");
        queue.send(q1).expect("send r1");
        // Let r1 reach the renderer before queueing the rest behind it.
        while renderer.invocations().is_empty() {
            tokio::task::yield_now().await;
        }
        let (q2, r2) = queued(2, "2024-01-02", "r2");
        let (q3, r3) = queued(3, "2024-01-03", "r3");
        queue.send(q2).expect("send r2");
        queue.send(q3).expect("send r3");

        gate.notify_one();
        assert!(r1.await.expect("r1 outcome").is_success());

        // r2 was queued but never started: it is answered as superseded the
        // moment the worker picks up again.
        match r2.await.expect("r2 outcome") {
            CompileOutcome::Failure { reason, .. } => assert_eq!(reason, SUPERSEDED_REASON),
            other => panic!("unexpected outcome: {other:?}"),
        }

        gate.notify_one();
        assert!(r3.await.expect("r3 outcome").is_success());

        // Exactly one renderer execution beyond r1, and it is r3's.
        assert_eq!(renderer.invocations(), vec!["r1", "r3"]);
        assert_eq!(artifacts.get(&key("2024-01-03")), Some(last_artifact));
        assert_eq!(artifacts.get(&key("2024-01-02")), None);

        drop(queue);
        let _ = worker.await;
    }
}
