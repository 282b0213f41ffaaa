//! Request flow: parse the caller's graph, stage any upload, prompt the model
//! and decode its reply.

use crate::error::{RelayError, Result};
use crate::graph::{parse_graph_state, GraphState, TaskKind};
use crate::model::{FileRef, GenerativeModel, RetryPolicy};
use crate::prompt::build_prompt;
use crate::reply::parse_reply;
use crate::storage::ScratchStore;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// One relay request, alive only while it is being served.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub kind: TaskKind,
    pub graph: GraphState,
    pub file: Option<FileRef>,
}

/// An uploaded file as received from the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    /// Content type declared by the client, if any
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// The prompt relay
///
/// Holds no per-request state; share it behind an `Arc`.
pub struct GraphRelay {
    model: Arc<dyn GenerativeModel>,
    retry: RetryPolicy,
    scratch: ScratchStore,
}

impl GraphRelay {
    pub fn new(model: Arc<dyn GenerativeModel>, retry: RetryPolicy, scratch: ScratchStore) -> Self {
        Self {
            model,
            retry,
            scratch,
        }
    }

    /// Fold an uploaded PDF or image into the caller's graph.
    ///
    /// The graph is validated before anything touches disk or the network.
    /// The scratch copy of the upload is deleted before this returns.
    pub async fn ingest_file(&self, kind: TaskKind, upload: Upload, graph_json: &str) -> Result<Value> {
        if !kind.takes_file() {
            return Err(RelayError::InvalidInput(format!(
                "task kind '{}' does not take a file",
                kind
            )));
        }

        let request_id = Uuid::new_v4();
        let graph = parse_graph_state(graph_json)?;
        let mime_type = resolve_mime_type(kind, &upload.file_name, upload.content_type.as_deref())?;
        if upload.bytes.is_empty() {
            return Err(RelayError::InvalidInput("uploaded file is empty".to_string()));
        }

        log::info!(
            "[{}] {} ingest: {} ({} bytes, {})",
            request_id,
            kind,
            upload.file_name,
            upload.bytes.len(),
            mime_type
        );

        let scratch = self.scratch.write(&upload.file_name, upload.bytes).await?;

        let model = &self.model;
        let path = scratch.path();
        let display_name = scratch.original_name();
        let mime = mime_type.as_str();
        let file = self
            .retry
            .run("upload_file", move || model.upload_file(path, display_name, mime))
            .await?;

        let result = self
            .relay_prompt(
                request_id,
                PromptRequest {
                    kind,
                    graph,
                    file: Some(file),
                },
            )
            .await;

        drop(scratch);
        result
    }

    /// Ask the model to refine the caller's graph.
    pub async fn update_graph(&self, graph_json: &str) -> Result<Value> {
        let request_id = Uuid::new_v4();
        let graph = parse_graph_state(graph_json)?;

        log::info!(
            "[{}] enhancement request ({} top-level keys)",
            request_id,
            graph.as_map().len()
        );

        self.relay_prompt(
            request_id,
            PromptRequest {
                kind: TaskKind::Enhancement,
                graph,
                file: None,
            },
        )
        .await
    }

    /// Build the prompt, call the model and decode the reply.
    async fn relay_prompt(&self, request_id: Uuid, request: PromptRequest) -> Result<Value> {
        let prompt = build_prompt(request.kind, &request.graph);

        let model = &self.model;
        let prompt_ref = prompt.as_str();
        let file = request.file.as_ref();
        let reply = self
            .retry
            .run("generate", move || model.generate(prompt_ref, file))
            .await?;

        log::debug!("[{}] model reply: {} chars", request_id, reply.len());

        let parsed = parse_reply(&reply)?;
        log::info!("[{}] {} request completed", request_id, request.kind);
        Ok(parsed)
    }
}

/// Pick the MIME type sent to the model for an upload.
///
/// A client-declared type wins when it matches the task (`application/pdf`
/// for PDFs, `image/*` for images); otherwise the file extension decides.
pub fn resolve_mime_type(kind: TaskKind, file_name: &str, declared: Option<&str>) -> Result<String> {
    let declared = declared
        .map(|d| d.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty() && d != "application/octet-stream");

    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match kind {
        TaskKind::Pdf => match declared.as_deref() {
            Some("application/pdf") => Ok("application/pdf".to_string()),
            Some(other) => Err(RelayError::InvalidInput(format!(
                "expected a PDF upload, got content type '{}'",
                other
            ))),
            None if extension == "pdf" => Ok("application/pdf".to_string()),
            None => Err(RelayError::InvalidInput(format!(
                "expected a PDF upload, got '{}'",
                file_name
            ))),
        },
        TaskKind::Image => {
            if let Some(d) = declared {
                if d.starts_with("image/") {
                    return Ok(d);
                }
                return Err(RelayError::InvalidInput(format!(
                    "expected an image upload, got content type '{}'",
                    d
                )));
            }
            image_mime_from_extension(&extension)
                .map(str::to_string)
                .ok_or_else(|| {
                    RelayError::InvalidInput(format!(
                        "expected an image upload, got '{}'",
                        file_name
                    ))
                })
        }
        TaskKind::Enhancement => Err(RelayError::InvalidInput(
            "enhancement requests do not take a file".to_string(),
        )),
    }
}

fn image_mime_from_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}
