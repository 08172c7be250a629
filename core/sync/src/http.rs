//! HTTP transport for the two backend APIs.

use async_trait::async_trait;
use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Body, Client, Response, StatusCode};
use serde_json::Value;
use std::io::ErrorKind;
use tokio_util::io::ReaderStream;
use tracing::debug;

use catchsync_common::{BackendVariant, Error, RecordCode, Result};

use crate::backend::{CatchBackend, MediaPart};
use crate::config::BackendConfig;

/// User agent sent with every request.
const USER_AGENT: &str = concat!("catchsync/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in a `ServerRejected` message.
const MAX_ERROR_BODY: usize = 512;

/// Backend client speaking JSON and multipart over HTTP.
///
/// Metadata and media use separate connection pools: media uploads can be
/// large and slow, and must not hold up small JSON submissions.
pub struct HttpBackend {
    json: Client,
    media: Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Create a new HTTP backend.
    ///
    /// # Errors
    /// - `Config` if the configuration is invalid or a client cannot be built
    pub fn new(config: BackendConfig) -> Result<Self> {
        config.validate()?;

        let json = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        // Redirects are not followed so that any status below 400 counts as accepted.
        let media = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create media client: {}", e)))?;

        Ok(Self {
            json,
            media,
            config,
        })
    }

    /// Resolve `{baseUrl}/{path}` for a variant.
    fn endpoint(&self, variant: BackendVariant, path: &str) -> Result<url::Url> {
        let base = self.config.base_url(variant).trim_end_matches('/');
        let joined = format!("{}/{}", base, path.trim_start_matches('/'));
        url::Url::parse(&joined)
            .map_err(|e| Error::RequestBuild(format!("Invalid endpoint {}: {}", joined, e)))
    }

    /// Static credential header.
    fn api_key_header(&self) -> Result<(HeaderName, HeaderValue)> {
        let name = HeaderName::from_bytes(self.config.api_key_header.as_bytes())
            .map_err(|e| Error::RequestBuild(format!("Invalid API key header name: {}", e)))?;
        let mut value = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| Error::RequestBuild(format!("Invalid API key: {}", e)))?;
        value.set_sensitive(true);
        Ok((name, value))
    }

    async fn media_form(parts: Vec<MediaPart>) -> Result<Form> {
        let mut form = Form::new();
        for part in parts {
            let file = match tokio::fs::File::open(&part.path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(Error::LocalMediaMissing(part.path.display().to_string()));
                }
                Err(e) => {
                    return Err(Error::RequestBuild(format!(
                        "Cannot open {}: {}",
                        part.path.display(),
                        e
                    )))
                }
            };
            let length = file
                .metadata()
                .await
                .map_err(|e| Error::RequestBuild(format!("Cannot stat {}: {}", part.path.display(), e)))?
                .len();

            let body = Body::wrap_stream(ReaderStream::new(file));
            let file_part = Part::stream_with_length(body, length)
                .file_name(part.file_name)
                .mime_str(part.content_type)
                .map_err(|e| Error::RequestBuild(format!("Invalid content type: {}", e)))?;
            form = form.part(part.field.as_str(), file_part);
        }
        Ok(form)
    }
}

#[async_trait]
impl CatchBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit_metadata(&self, variant: BackendVariant, payload: &Value) -> Result<()> {
        let url = self.endpoint(variant, &self.config.metadata_path)?;
        let (key_name, key_value) = self.api_key_header()?;
        debug!("POST {} ({})", url, variant);

        let response = self
            .json
            .post(url)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json")
            .header(key_name, key_value)
            .json(payload)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(rejected(status, response).await)
        }
    }

    async fn upload_media(
        &self,
        variant: BackendVariant,
        code: &RecordCode,
        parts: Vec<MediaPart>,
    ) -> Result<()> {
        let url = self.endpoint(variant, &self.config.media_path)?;
        let (key_name, key_value) = self.api_key_header()?;
        debug!("POST {} ({} parts for {})", url, parts.len(), code);

        let form = Self::media_form(parts).await?;
        let response = self
            .media
            .post(url)
            .header(header::ACCEPT, "application/json")
            .header(key_name, key_value)
            .multipart(form)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.as_u16() < 400 {
            Ok(())
        } else {
            Err(rejected(status, response).await)
        }
    }
}

/// Map a transport failure onto the channel taxonomy.
fn classify_send_error(err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::RequestBuild(err.to_string())
    } else {
        Error::Unreachable(err.to_string())
    }
}

async fn rejected(status: StatusCode, response: Response) -> Error {
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("error status")
            .to_string();
    }
    Error::ServerRejected {
        status: status.as_u16(),
        message,
    }
}
