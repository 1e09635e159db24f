//! Line-delimited JSON dispatcher: the channel the editor front end speaks.
//!
//! Requests arrive one JSON object per line; responses and presentation
//! events leave the same way, serialised through a single writer task.
//! Save and load are answered inline. Compiles are spawned so the read loop
//! keeps accepting input while a renderer subprocess runs; it is the
//! orchestrator behind them that serialises and coalesces the actual work.

use std::sync::Arc;

use async_trait::async_trait;
use quaderno_api_types::{
    ApiRequest, ApiResponse, PresentEvent, PresentNotice, RequestBody, ServerMessage,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
    task::JoinSet,
};
use tracing::{info, warn};

use crate::domain::DateKey;

use super::{
    compile::{CompileOrchestrator, CompileOutcome},
    entries::EntryStore,
    present::{DocumentPresenter, PageSink},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Routes front-end requests to the entry store, the compile orchestrator,
/// and the document presenter.
pub struct Dispatcher {
    entries: Arc<EntryStore>,
    orchestrator: Arc<CompileOrchestrator>,
    presenter: Arc<DocumentPresenter>,
}

/// Forwards presentation progress onto the output stream, tagged with the
/// compile request's correlation id.
struct EventSink {
    id: u64,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

#[async_trait]
impl PageSink for EventSink {
    async fn emit(&self, event: PresentEvent) {
        let _ = self
            .outbound
            .send(ServerMessage::Event(PresentNotice { id: self.id, event }));
    }
}

impl Dispatcher {
    pub fn new(
        entries: Arc<EntryStore>,
        orchestrator: Arc<CompileOrchestrator>,
        presenter: Arc<DocumentPresenter>,
    ) -> Self {
        Self {
            entries,
            orchestrator,
            presenter,
        }
    }

    /// Serve requests until the reader is exhausted, then drain in-flight
    /// work before closing the output stream.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), DispatchError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(writer, receiver));
        let mut compiles = JoinSet::new();

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.dispatch_line(&line, &outbound, &mut compiles).await;
            // Reap compile tasks that have already finished.
            while compiles.try_join_next().is_some() {}
        }

        info!(
            target = "application::dispatch",
            op = "dispatch::run",
            "Input stream closed; draining in-flight work"
        );
        while compiles.join_next().await.is_some() {}
        self.presenter.finish().await;
        drop(outbound);

        match writer_task.await {
            Ok(result) => result.map_err(DispatchError::Io),
            Err(err) => Err(DispatchError::Io(std::io::Error::other(err))),
        }
    }

    async fn dispatch_line(
        &self,
        line: &str,
        outbound: &mpsc::UnboundedSender<ServerMessage>,
        compiles: &mut JoinSet<()>,
    ) {
        let request: ApiRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    target = "application::dispatch",
                    op = "dispatch::parse",
                    result = "error",
                    error = %err,
                    "Malformed request line"
                );
                let _ = outbound.send(ServerMessage::Response(ApiResponse::failure(
                    None,
                    format!("malformed request: {err}"),
                )));
                return;
            }
        };

        match request.body {
            RequestBody::SaveEntry { date, content } => {
                let response = self.handle_save(request.id, &date, &content).await;
                let _ = outbound.send(ServerMessage::Response(response));
            }
            RequestBody::LoadEntry { date } => {
                let response = self.handle_load(request.id, &date).await;
                let _ = outbound.send(ServerMessage::Response(response));
            }
            RequestBody::CompileEntry { date, content } => {
                let key = match DateKey::parse(&date) {
                    Ok(key) => key,
                    Err(err) => {
                        let _ = outbound.send(ServerMessage::Response(ApiResponse::failure(
                            Some(request.id),
                            err.to_string(),
                        )));
                        return;
                    }
                };
                let orchestrator = self.orchestrator.clone();
                let presenter = self.presenter.clone();
                let outbound = outbound.clone();
                let id = request.id;
                compiles.spawn(async move {
                    let outcome = orchestrator.compile(key, content).await;
                    match outcome {
                        CompileOutcome::Success { artifact_path, log } => {
                            let _ = outbound.send(ServerMessage::Response(ApiResponse::compiled(
                                id,
                                artifact_path.display().to_string(),
                                log,
                            )));
                            let sink = Arc::new(EventSink {
                                id,
                                outbound: outbound.clone(),
                            });
                            presenter.present(artifact_path, sink).await;
                        }
                        CompileOutcome::Failure { reason, log } => {
                            let _ = outbound.send(ServerMessage::Response(
                                ApiResponse::failure(Some(id), reason).with_log(log),
                            ));
                        }
                    }
                });
            }
        }
    }

    async fn handle_save(&self, id: u64, date: &str, content: &str) -> ApiResponse {
        let key = match DateKey::parse(date) {
            Ok(key) => key,
            Err(err) => return ApiResponse::failure(Some(id), err.to_string()),
        };
        match self.entries.save(&key, content).await {
            Ok(path) => ApiResponse::saved(id, format!("entry saved to {}", path.display())),
            Err(err) => ApiResponse::failure(Some(id), format!("failed to save entry: {err}")),
        }
    }

    async fn handle_load(&self, id: u64, date: &str) -> ApiResponse {
        let key = match DateKey::parse(date) {
            Ok(key) => key,
            Err(err) => return ApiResponse::failure(Some(id), err.to_string()),
        };
        match self.entries.load(&key).await {
            Ok(entry) => ApiResponse::loaded(id, entry.content, entry.note.map(str::to_string)),
            Err(err) => ApiResponse::failure(Some(id), format!("failed to load entry: {err}")),
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut receiver: mpsc::UnboundedReceiver<ServerMessage>,
) -> Result<(), std::io::Error> {
    while let Some(message) = receiver.recv().await {
        let mut line = serde_json::to_vec(&message).map_err(std::io::Error::other)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}
