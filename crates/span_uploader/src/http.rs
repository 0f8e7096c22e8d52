//! HTTP exporter for the trace ingestion backend.
//!
//! Spans go out as one JSON POST per batch, files as one multipart POST each.
//! Every answer is a `{code, msg}` envelope; anything but a 2xx with
//! `code == 0` fails the export. Transport errors and 5xx answers are
//! retried with backoff before the batch is given back to the pipeline.

use crate::backoff::retry;
use crate::config::HttpExporterConfig;
use crate::error::ExportError;
use crate::exporter::Exporter;
use crate::model::{UploadFile, UploadSpan, UploadSpanData};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, warn};

/// Response header carrying the backend's request id.
pub const LOG_ID_HEADER: &str = "x-tt-logid";

/// Bytes of an unparsable response body kept in the error message.
const MAX_ERROR_BODY_BYTES: usize = 512;

#[derive(Debug, Default, Deserialize)]
struct BaseResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

pub struct HttpExporter {
    client: Client,
    config: HttpExporterConfig,
    span_url: String,
    file_url: String,
}

impl HttpExporter {
    pub fn new(config: HttpExporterConfig) -> Result<Self, ExportError> {
        let client = Client::builder()
            .user_agent(concat!("span_uploader/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let span_url = format!("{}{}", config.base_url, config.span_upload_path);
        let file_url = format!("{}{}", config.base_url, config.file_upload_path);
        Ok(Self {
            client,
            config,
            span_url,
            file_url,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), ExportError> {
        let response = request.send().await?;
        let status = response.status();
        let log_id = response
            .headers()
            .get(LOG_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?;

        match serde_json::from_slice::<BaseResponse>(&body) {
            Ok(base) if status.is_success() && base.code == 0 => {
                debug!(%status, log_id = %log_id, "request succeeded");
                Ok(())
            }
            Ok(base) => Err(ExportError::RemoteService {
                http_status: status.as_u16(),
                code: base.code,
                msg: base.msg,
                log_id,
            }),
            Err(_) => {
                let shown = &body[..body.len().min(MAX_ERROR_BODY_BYTES)];
                Err(ExportError::RemoteService {
                    http_status: status.as_u16(),
                    code: -1,
                    msg: format!("unparsable response: {}", String::from_utf8_lossy(shown)),
                    log_id,
                })
            }
        }
    }
}

impl Exporter for HttpExporter {
    async fn export_spans(&self, spans: &[UploadSpan]) -> Result<(), ExportError> {
        if spans.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&UploadSpanData { spans })
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        let result = retry(&self.config.retry, || {
            let request = self
                .authorized(self.client.post(&self.span_url))
                .timeout(self.config.timeout)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            self.execute(request)
        })
        .await;

        if let Err(e) = &result {
            warn!(url = %self.span_url, spans = spans.len(), error = %e, "span export failed");
        }
        result
    }

    async fn export_files(&self, files: &[UploadFile]) -> Result<(), ExportError> {
        for file in files {
            let result = retry(&self.config.retry, || {
                let part = Part::bytes(file.data.clone()).file_name(file.key.clone());
                let form = Form::new()
                    .part("file", part)
                    .text("workspace_id", file.workspace_id.clone());
                let request = self
                    .authorized(self.client.post(&self.file_url))
                    .timeout(self.config.upload_timeout)
                    .multipart(form);
                self.execute(request)
            })
            .await;

            if let Err(e) = result {
                warn!(key = %file.key, bytes = file.data.len(), error = %e, "file upload failed");
                return Err(e);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
