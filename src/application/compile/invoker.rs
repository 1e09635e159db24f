use std::{path::PathBuf, process::Stdio, time::Instant};

use async_trait::async_trait;
use quaderno_api_types::RenderRecord;
use tokio::process::Command;
use tracing::{info, warn};

use super::{
    artifacts::{ArtifactPathError, ArtifactStore},
    types::{CompileOutcome, CompileRequest},
};

const NO_STRUCTURED_OUTPUT: &str = "no structured output";
const REPORTED_FAILURE: &str = "renderer reported failure";

/// Capability that turns a compile request into exactly one outcome.
///
/// The production implementation shells out to the external document
/// renderer; tests substitute canned outcomes.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, request: &CompileRequest) -> CompileOutcome;
}

/// Renderer backed by the external compilation tool.
///
/// The tool is invoked with four positional arguments, in this order:
/// source text, date key, template path, output directory. It must emit one
/// JSON record on stdout; its exit status is deliberately not consulted.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    command: PathBuf,
    store: ArtifactStore,
}

impl ProcessRenderer {
    pub fn new(command: PathBuf, store: ArtifactStore) -> Self {
        Self { command, store }
    }

    fn outcome_from_record(&self, request: &CompileRequest, record: RenderRecord) -> CompileOutcome {
        if !record.success {
            let reason = record
                .error
                .filter(|error| !error.trim().is_empty())
                .unwrap_or_else(|| REPORTED_FAILURE.to_string());
            return CompileOutcome::failure(reason, record.log);
        }

        let resolved = if let Some(name) = record.pdf_file_name.as_deref() {
            self.store.resolve_reported_name(name)
        } else if let Some(path) = record.pdf_path.as_deref() {
            self.store.confine_reported_path(path)
        } else {
            Err(ArtifactPathError::MissingPath)
        };

        match resolved {
            Ok(artifact_path) => CompileOutcome::success(artifact_path, record.log),
            Err(err) => {
                warn!(
                    target = "application::compile::invoker",
                    op = "invoker::render",
                    result = "error",
                    request_id = %request.request_id,
                    error_code = "artifact_path",
                    error = %err,
                    "Renderer success record carried an unusable artifact path"
                );
                CompileOutcome::failure(err.to_string(), record.log)
            }
        }
    }
}

#[async_trait]
impl DocumentRenderer for ProcessRenderer {
    async fn render(&self, request: &CompileRequest) -> CompileOutcome {
        let started_at = Instant::now();
        let output = Command::new(&self.command)
            .arg(&request.source_text)
            .arg(request.date_key.as_str())
            .arg(&request.template_path)
            .arg(self.store.output_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    target = "application::compile::invoker",
                    op = "invoker::render",
                    result = "error",
                    request_id = %request.request_id,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn",
                    error = %err,
                    "Failed to spawn document renderer"
                );
                return CompileOutcome::failure(format!("spawn failed: {err}"), None);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(record) = first_record(&stdout) else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "application::compile::invoker",
                op = "invoker::render",
                result = "error",
                request_id = %request.request_id,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error_code = "no_record",
                stderr = %stderr,
                "Renderer exited without a parseable record"
            );
            let log = (!stderr.trim().is_empty()).then_some(stderr);
            return CompileOutcome::failure(NO_STRUCTURED_OUTPUT, log);
        };

        info!(
            target = "application::compile::invoker",
            op = "invoker::render",
            result = if record.success { "success" } else { "failure" },
            request_id = %request.request_id,
            date_key = %request.date_key,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Document renderer finished"
        );

        self.outcome_from_record(request, record)
    }
}

/// The renderer may print diagnostics around its record; the first line that
/// parses as a record is authoritative.
fn first_record(stdout: &str) -> Option<RenderRecord> {
    stdout
        .lines()
        .find_map(|line| serde_json::from_str::<RenderRecord>(line.trim()).ok())
}
