//! Generative model collaborator: the trait the relay talks to, the Gemini
//! REST backend, and the timeout/retry policy wrapped around every call.

pub mod gemini;
pub mod retry;

pub use gemini::GeminiClient;
pub use retry::RetryPolicy;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A file registered with the model service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Service-side resource name, e.g. `files/abc123`
    pub name: String,
    /// URI the model uses to reference the file in a prompt
    pub uri: String,
    pub mime_type: String,
}

/// An external generative model that turns a prompt (and optionally a file)
/// into free-form text.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Register a local file with the service so prompts can reference it.
    async fn upload_file(&self, path: &Path, display_name: &str, mime_type: &str)
        -> Result<FileRef>;

    /// Generate a single text reply.
    async fn generate(&self, prompt: &str, file: Option<&FileRef>) -> Result<String>;
}
