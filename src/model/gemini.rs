use super::{FileRef, GenerativeModel};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Request structure for the generateContent endpoint
#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    File { file_data: FileData<'a> },
}

#[derive(Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

/// Response structure from the generateContent endpoint
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Metadata sent when starting a resumable upload
#[derive(Serialize)]
struct UploadStart<'a> {
    file: UploadStartFile<'a>,
}

#[derive(Serialize)]
struct UploadStartFile<'a> {
    display_name: &'a str,
}

/// Response from finalizing an upload
#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Deserialize)]
struct UploadedFile {
    name: String,
    uri: String,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

/// Google Generative Language (Gemini) REST client
///
/// Uploads files through the resumable Files API and generates text with
/// `models/{model}:generateContent`. Timeouts and retries are applied by the
/// caller's [`RetryPolicy`](super::RetryPolicy); the HTTP client only carries a
/// connect timeout.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a new Gemini client
    ///
    /// # Arguments
    ///
    /// * `api_key` - Generative Language API key
    /// * `model` - Model name (e.g., "gemini-1.5-flash")
    /// * `base_url` - API root, normally `https://generativelanguage.googleapis.com`
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn generate_url(&self) -> String {
        // Accept both "gemini-1.5-flash" and "models/gemini-1.5-flash"
        let model = self.model.trim_start_matches("models/");
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }

    /// Turn a non-success response into a model error carrying the status.
    async fn check_status(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        Err(RelayError::model(
            Some(status.as_u16()),
            format!("{} failed with {}: {}", what, status, body),
        ))
    }
}

fn network_error(e: reqwest::Error) -> RelayError {
    RelayError::model(None, format!("Network error: {}", e))
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<FileRef> {
        let bytes = tokio::fs::read(path).await?;

        // Step 1: open a resumable upload session
        let start = self
            .client
            .post(self.upload_url())
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&UploadStart {
                file: UploadStartFile { display_name },
            })
            .send()
            .await
            .map_err(network_error)?;
        let start = Self::check_status(start, "Upload start").await?;

        let session_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RelayError::model(None, "Upload start returned no upload URL"))?;

        // Step 2: send the bytes and finalize
        let response = self
            .client
            .post(&session_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("Content-Length", bytes.len().to_string())
            .body(bytes)
            .send()
            .await
            .map_err(network_error)?;
        let response = Self::check_status(response, "Upload").await?;

        let uploaded: UploadResponse = response.json().await.map_err(|e| {
            RelayError::model(None, format!("Failed to parse upload response: {}", e))
        })?;

        log::info!("Uploaded {} as {}", display_name, uploaded.file.name);

        Ok(FileRef {
            name: uploaded.file.name,
            uri: uploaded.file.uri,
            mime_type: uploaded
                .file
                .mime_type
                .unwrap_or_else(|| mime_type.to_string()),
        })
    }

    async fn generate(&self, prompt: &str, file: Option<&FileRef>) -> Result<String> {
        let mut parts = vec![Part::Text { text: prompt }];
        if let Some(file) = file {
            parts.push(Part::File {
                file_data: FileData {
                    mime_type: &file.mime_type,
                    file_uri: &file.uri,
                },
            });
        }

        let request = GenerateRequest {
            contents: vec![Content { role: "user", parts }],
        };

        let response = self
            .client
            .post(self.generate_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;
        let response = Self::check_status(response, "generateContent").await?;

        let result: GenerateResponse = response.json().await.map_err(|e| {
            RelayError::model(None, format!("Failed to parse response: {}", e))
        })?;

        extract_text(result)
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| RelayError::model(Some(200), "Empty response from model API (no candidates)"))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(RelayError::model(
            Some(200),
            format!(
                "Model returned no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
        ));
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> GeminiClient {
        GeminiClient::new(
            "test-key".to_string(),
            "gemini-1.5-flash".to_string(),
            "https://generativelanguage.googleapis.com/".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(
            client.generate_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert_eq!(
            client.upload_url(),
            "https://generativelanguage.googleapis.com/upload/v1beta/files"
        );
    }

    #[test]
    fn test_model_prefix_accepted() {
        let client = GeminiClient::new(
            "k".to_string(),
            "models/gemini-1.5-pro".to_string(),
            "http://localhost:9999".to_string(),
        )
        .unwrap();
        assert_eq!(
            client.generate_url(),
            "http://localhost:9999/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn test_request_serialization_with_file() {
        let file = FileRef {
            name: "files/abc".to_string(),
            uri: "https://example.test/files/abc".to_string(),
            mime_type: "application/pdf".to_string(),
        };
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: "hello" },
                    Part::File {
                        file_data: FileData {
                            mime_type: &file.mime_type,
                            file_uri: &file.uri,
                        },
                    },
                ],
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "hello"},
                        {"file_data": {"mime_type": "application/pdf", "file_uri": "https://example.test/files/abc"}}
                    ]
                }]
            })
        );
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "```json\n{\"a\":"}, {"text": "1}\n```"}], "role": "model"},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "```json\n{\"a\":1}\n```");
    }

    #[test]
    fn test_extract_text_no_candidates() {
        let response: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(matches!(err, RelayError::Model { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_extract_text_blocked() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_upload_response_parsing() {
        let response: UploadResponse = serde_json::from_value(json!({
            "file": {
                "name": "files/xyz",
                "uri": "https://generativelanguage.googleapis.com/v1beta/files/xyz",
                "mimeType": "image/png",
                "sizeBytes": "123"
            }
        }))
        .unwrap();
        assert_eq!(response.file.name, "files/xyz");
        assert_eq!(response.file.mime_type.as_deref(), Some("image/png"));
    }
}
