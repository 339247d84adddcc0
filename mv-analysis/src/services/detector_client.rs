//! HTTP client for the external detection service
//!
//! Uploads the media file as multipart and reads the NDJSON answer
//! incrementally. The first line is a header `{"total_units": n | null}`;
//! every further line is one [`RawRecord`].

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::Deserialize;
use std::fmt::Display;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::models::MediaArtifact;
use crate::services::media_analyzer::{AnalyzerError, MediaAnalyzer, RawRecord, RecordStream};

const USER_AGENT: &str = concat!("mv-analysis/", env!("CARGO_PKG_VERSION"));

/// Read size when streaming an upload to the detector
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Longest NDJSON line accepted from the detector
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct StreamHeader {
    #[serde(default)]
    total_units: Option<u64>,
}

/// Detection service reached over HTTP
pub struct HttpMediaAnalyzer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMediaAnalyzer {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AnalyzerError::Unavailable(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self, artifact: &MediaArtifact) -> String {
        format!(
            "{}/analyze/{}",
            self.base_url.trim_end_matches('/'),
            artifact.media_kind
        )
    }
}

#[async_trait]
impl MediaAnalyzer for HttpMediaAnalyzer {
    async fn analyze(&self, artifact: &MediaArtifact) -> Result<RecordStream, AnalyzerError> {
        let url = self.endpoint(artifact);
        let file = tokio::fs::File::open(&artifact.path).await?;
        let length = file.metadata().await?.len();

        let body = Body::wrap_stream(file_chunks(file, UPLOAD_CHUNK_BYTES));
        let part = Part::stream_with_length(body, length).file_name(artifact.filename.clone());
        let form = Form::new().part("file", part);

        info!(url = %url, filename = %artifact.filename, size_bytes = artifact.size_bytes, "Submitting media to detector");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AnalyzerError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Rejected { status, message });
        }

        let mut lines = Box::pin(ndjson_lines(response.bytes_stream(), MAX_LINE_BYTES));

        let header_line = lines
            .next()
            .await
            .ok_or_else(|| AnalyzerError::Protocol("detector returned an empty body".to_string()))??;
        let header: StreamHeader = serde_json::from_str(&header_line)
            .map_err(|e| AnalyzerError::Protocol(format!("bad stream header: {}", e)))?;

        debug!(total_units = ?header.total_units, "Detector stream opened");

        let records = lines
            .map(|line| line.and_then(|l| parse_record(&l)))
            .boxed();

        Ok(RecordStream {
            total_units: header.total_units,
            records,
        })
    }
}

/// Read `file` in chunks of at most `chunk_size` bytes
fn file_chunks(
    mut file: tokio::fs::File,
    chunk_size: usize,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    async_stream::stream! {
        loop {
            let mut chunk = vec![0u8; chunk_size];
            match file.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    chunk.truncate(n);
                    yield Ok(chunk);
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

fn parse_record(line: &str) -> Result<RawRecord, AnalyzerError> {
    serde_json::from_str(line).map_err(|e| AnalyzerError::Protocol(format!("bad record: {}", e)))
}

/// Split a chunked byte stream into non-empty, trimmed text lines
///
/// Only bytes that arrived since the last chunk are scanned for a newline.
/// A line longer than `max_line` bytes ends the stream with a protocol error.
pub fn ndjson_lines<S, B, E>(
    body: S,
    max_line: usize,
) -> impl Stream<Item = Result<String, AnalyzerError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();
        // Bytes of `buffer` already known to hold no newline
        let mut scanned = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AnalyzerError::Unavailable(e.to_string()))?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(offset) = buffer[scanned..].iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=scanned + offset).collect();
                scanned = 0;
                if line.len() > max_line + 1 {
                    Err::<(), _>(line_too_long(max_line))?;
                }
                let text = decode_line(line)?;
                if !text.is_empty() {
                    yield text;
                }
            }
            scanned = buffer.len();

            if buffer.len() > max_line {
                Err::<(), _>(line_too_long(max_line))?;
            }
        }

        let text = decode_line(buffer)?;
        if !text.is_empty() {
            yield text;
        }
    }
}

fn line_too_long(max_line: usize) -> AnalyzerError {
    AnalyzerError::Protocol(format!("detector line exceeds {} bytes", max_line))
}

fn decode_line(line: Vec<u8>) -> Result<String, AnalyzerError> {
    let text = String::from_utf8(line)
        .map_err(|e| AnalyzerError::Protocol(format!("non UTF-8 line: {}", e)))?;
    Ok(text.trim().to_string())
}
