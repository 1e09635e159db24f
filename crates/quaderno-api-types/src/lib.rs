//! Shared wire types for the Quaderno journal back end.
//!
//! The editor front end speaks line-delimited JSON over the back end's
//! stdio: one [`ApiRequest`] per line in, one [`ServerMessage`] per line
//! out. The external renderer's stdout contract ([`RenderRecord`]) lives
//! here too, so every process boundary shares one set of shapes.

use serde::{Deserialize, Serialize};

/// Request envelope sent by the front end.
///
/// `id` is chosen by the caller and echoed on the matching response and on
/// every presentation event the request triggers, so a client can correlate
/// interleaved traffic on the single output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub id: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

/// Operations the front end can invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RequestBody {
    /// Persist an entry for a calendar date, overwriting any prior content.
    SaveEntry { date: String, content: String },
    /// Fetch the stored entry for a calendar date. Missing entries are not
    /// an error; they load as empty content with an informational message.
    LoadEntry { date: String },
    /// Compile an entry and, on success, paginate the produced document.
    CompileEntry { date: String, content: String },
}

/// Flat response record mirroring the loose per-operation shapes: every
/// operation reports `success`, and the optional fields are populated as the
/// operation requires (`content` for loads, `artifactPath`/`log` for
/// compiles, `message` for informational notes).
///
/// `id` is `None` only when the request was too malformed to carry one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub id: Option<u64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl ApiResponse {
    pub fn saved(id: u64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn loaded(id: u64, content: impl Into<String>, message: Option<String>) -> Self {
        Self {
            id: Some(id),
            success: true,
            content: Some(content.into()),
            message,
            ..Self::default()
        }
    }

    pub fn compiled(id: u64, artifact_path: impl Into<String>, log: Option<String>) -> Self {
        Self {
            id: Some(id),
            success: true,
            artifact_path: Some(artifact_path.into()),
            log,
            ..Self::default()
        }
    }

    pub fn failure(id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_log(mut self, log: Option<String>) -> Self {
        self.log = log;
        self
    }
}

/// One message on the back end's output stream: either the response to a
/// request or an unsolicited presentation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerMessage {
    Response(ApiResponse),
    Event(PresentNotice),
}

/// Presentation event correlated back to the compile request that produced
/// the artifact being paginated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentNotice {
    pub id: u64,
    #[serde(flatten)]
    pub event: PresentEvent,
}

/// Incremental progress of one presentation session.
///
/// `cleared` always precedes `loading`: stale pages from an earlier artifact
/// are dropped before any new status is shown. Pages arrive strictly in
/// ascending order, and exactly one terminal event (`completed`,
/// `cancelled`, or `failed`) ends every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PresentEvent {
    Cleared,
    Loading,
    PageDrawn { page: PageView, total_pages: u32 },
    Completed { total_pages: u32 },
    Cancelled,
    Failed { message: String },
}

/// Geometry of one drawn page, in PDF points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    /// 1-indexed page number.
    pub number: u32,
    pub width_pts: f32,
    pub height_pts: f32,
}

/// The record the external renderer emits on stdout.
///
/// Exactly one such JSON object is expected per invocation. `success` is the
/// only authoritative field; the tool's exit status is deliberately not part
/// of the contract. A successful record names its artifact either as a bare
/// `pdfFileName` (resolved against the output directory) or as a full
/// `pdfPath`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRecord {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
