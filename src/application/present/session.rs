use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use async_trait::async_trait;
use lopdf::Document;
use metrics::counter;
use quaderno_api_types::PresentEvent;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use super::paginate::{self, PaginateError};

/// Receives presentation progress. The production sink forwards events to
/// the front end; tests record them.
#[async_trait]
pub trait PageSink: Send + Sync {
    async fn emit(&self, event: PresentEvent);
}

/// Ephemeral state for paginating one artifact.
///
/// The session moves Loading → Paginating → Done, draws pages strictly in
/// ascending order, and checks its cancellation flag before every draw. An
/// artifact that cannot be parsed fails the session without touching the
/// compile outcome that produced it.
pub struct RenderSession {
    session_id: Uuid,
    artifact_path: PathBuf,
    cancelled: Arc<AtomicBool>,
    sink: Arc<dyn PageSink>,
}

impl RenderSession {
    pub fn new(
        artifact_path: PathBuf,
        cancelled: Arc<AtomicBool>,
        sink: Arc<dyn PageSink>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            artifact_path,
            cancelled,
            sink,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub async fn run(self) {
        let started_at = Instant::now();
        // Stale pages from any earlier artifact are dropped before any new
        // status is shown.
        self.sink.emit(PresentEvent::Cleared).await;
        self.sink.emit(PresentEvent::Loading).await;

        let path = self.artifact_path.clone();
        let loaded = tokio::task::spawn_blocking(move || Document::load(path)).await;
        let document = match loaded {
            Ok(Ok(document)) => document,
            Ok(Err(err)) => {
                let error = PaginateError::from(err);
                warn!(
                    target = "application::present",
                    op = "session::run",
                    result = "error",
                    session_id = %self.session_id,
                    error_code = "artifact_parse",
                    artifact = %self.artifact_path.display(),
                    error = %error,
                    "Artifact could not be parsed"
                );
                self.sink
                    .emit(PresentEvent::Failed {
                        message: error.to_string(),
                    })
                    .await;
                return;
            }
            Err(err) => {
                warn!(
                    target = "application::present",
                    op = "session::run",
                    result = "error",
                    session_id = %self.session_id,
                    error_code = "load_task",
                    error = %err,
                    "Artifact load task failed"
                );
                self.sink
                    .emit(PresentEvent::Failed {
                        message: format!("artifact load was interrupted: {err}"),
                    })
                    .await;
                return;
            }
        };

        let pages = paginate::page_order(&document);
        let total_pages = pages.len() as u32;
        let mut pages_drawn = 0u32;

        for (number, page_id) in pages {
            if self.is_cancelled() {
                self.finish_cancelled(started_at, pages_drawn).await;
                return;
            }
            let page = match paginate::page_view(&document, number, page_id) {
                Ok(page) => page,
                Err(err) => {
                    warn!(
                        target = "application::present",
                        op = "session::run",
                        result = "error",
                        session_id = %self.session_id,
                        error_code = "page_decode",
                        page = number,
                        error = %err,
                        "Page could not be decoded"
                    );
                    self.sink
                        .emit(PresentEvent::Failed {
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            };
            self.sink
                .emit(PresentEvent::PageDrawn { page, total_pages })
                .await;
            counter!("quaderno_pages_drawn_total").increment(1);
            pages_drawn += 1;
            // Each page is one unit of work; let other tasks run in between.
            tokio::task::yield_now().await;
        }

        if self.is_cancelled() {
            self.finish_cancelled(started_at, pages_drawn).await;
            return;
        }

        info!(
            target = "application::present",
            op = "session::run",
            result = "success",
            session_id = %self.session_id,
            pages = total_pages,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Artifact fully paginated"
        );
        self.sink
            .emit(PresentEvent::Completed { total_pages })
            .await;
    }

    async fn finish_cancelled(&self, started_at: Instant, pages_drawn: u32) {
        info!(
            target = "application::present",
            op = "session::run",
            result = "cancelled",
            session_id = %self.session_id,
            pages_drawn,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Presentation cancelled by a newer session"
        );
        self.sink.emit(PresentEvent::Cancelled).await;
    }
}

struct ActiveSession {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Hands artifacts to render sessions, one at a time.
#[derive(Default)]
pub struct DocumentPresenter {
    active: Mutex<Option<ActiveSession>>,
}

impl DocumentPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin presenting `artifact_path`.
    ///
    /// Any session already running is cancelled and drained before the new
    /// one draws its first page, so pages from two artifacts never
    /// interleave on the sink.
    pub async fn present(&self, artifact_path: PathBuf, sink: Arc<dyn PageSink>) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancelled.store(true, Ordering::Relaxed);
            if !previous.task.is_finished() {
                counter!("quaderno_presenter_cancelled_total").increment(1);
            }
            let _ = previous.task.await;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let session = RenderSession::new(artifact_path, cancelled.clone(), sink);
        let task = tokio::spawn(session.run());
        *active = Some(ActiveSession { cancelled, task });
    }

    /// Wait for the in-flight session, if any, to reach a terminal state.
    pub async fn finish(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            let _ = previous.task.await;
        }
    }
}
