//! Remote Job API
//!
//! Port for the remote media-generation/transcription services: a status
//! stream yielding one JSON event per line, a cancel call, a poll endpoint for
//! polling-style providers, and artifact download.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{AcquireError, AcquireResult};
use crate::media::RemoteJobStatus;

/// Maximum allowed download size (500 MB) to prevent unbounded memory usage.
const MAX_DOWNLOAD_BYTES: usize = 500 * 1024 * 1024;

// =============================================================================
// Wire Events
// =============================================================================

/// One event on the job status stream, one JSON object per line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Progress tick; updates numeric progress and remote status
    ProgressUpdate {
        status: RemoteJobStatus,
        #[serde(default)]
        progress: f32,
        #[serde(default)]
        message: Option<String>,
    },
    /// Terminal event: the job will not progress further
    Final {
        status: RemoteJobStatus,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    /// Server-side stream error; the channel is considered broken
    Error { message: String },
    /// Liveness proof, resets nothing
    Heartbeat,
    /// The server does not know this job id
    NotFound,
}

/// Snapshot returned by the poll endpoint for polling-style providers
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub status: RemoteJobStatus,
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub result_payload: Option<serde_json::Value>,
}

// =============================================================================
// Ports
// =============================================================================

/// One logical status channel for a single job
#[async_trait]
pub trait JobChannel: Send {
    /// Next event, `Ok(None)` on clean end-of-stream
    async fn next_event(&mut self) -> AcquireResult<Option<StreamEvent>>;
}

/// Remote job service seam
#[async_trait]
pub trait RemoteJobApi: Send + Sync {
    /// Opens the status stream for a job id
    async fn open_status_stream(&self, job_id: &str) -> AcquireResult<Box<dyn JobChannel>>;

    /// Requests remote cancellation; true when the remote accepted it
    async fn cancel(&self, job_id: &str) -> AcquireResult<bool>;

    /// Fetches the current job snapshot (polling-style providers)
    async fn fetch_result(&self, job_id: &str) -> AcquireResult<PollSnapshot>;

    /// Downloads a finished artifact
    async fn download(&self, url: &str) -> AcquireResult<Vec<u8>>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

/// HTTP client for the remote job API. Status streams are NDJSON.
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpJobApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJobApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpJobApi {
    /// Creates a client against the base URL
    pub fn new(base_url: impl Into<String>) -> AcquireResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| AcquireError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: None,
        })
    }

    /// Sets the bearer token
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn stream_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}/events", self.base_url, job_id)
    }

    fn poll_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }

    fn cancel_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}/cancel", self.base_url, job_id)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    /// Validate that a download URL is a plain http(s) URL
    fn validate_download_url(url: &str) -> AcquireResult<reqwest::Url> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AcquireError::Internal(format!("Invalid download URL '{}': {}", url, e)))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            scheme => Err(AcquireError::Internal(format!(
                "Unsupported download URL scheme '{}'",
                scheme
            ))),
        }
    }
}

#[async_trait]
impl RemoteJobApi for HttpJobApi {
    async fn open_status_stream(&self, job_id: &str) -> AcquireResult<Box<dyn JobChannel>> {
        let resp = self
            .authed(self.client.get(self.stream_url(job_id)))
            .send()
            .await
            .map_err(|e| AcquireError::Transport(format!("open stream: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            return Err(AcquireError::Transport(format!(
                "stream open rejected ({}): {}",
                status, truncated
            )));
        }

        let stream: ByteStream = Box::pin(
            resp.bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string())),
        );

        Ok(Box::new(NdjsonChannel {
            stream,
            buf: Vec::new(),
            done: false,
        }))
    }

    async fn cancel(&self, job_id: &str) -> AcquireResult<bool> {
        let resp = self
            .authed(self.client.post(self.cancel_url(job_id)))
            .send()
            .await
            .map_err(|e| AcquireError::Transport(format!("cancel: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            return Err(AcquireError::RemoteCancelFailed(format!(
                "{}: {}",
                status, truncated
            )));
        }

        #[derive(Deserialize)]
        struct CancelResponse {
            #[serde(default = "default_true")]
            cancelled: bool,
        }
        fn default_true() -> bool {
            true
        }

        let body = resp.text().await.unwrap_or_default();
        let parsed: CancelResponse =
            serde_json::from_str(&body).unwrap_or(CancelResponse { cancelled: true });
        Ok(parsed.cancelled)
    }

    async fn fetch_result(&self, job_id: &str) -> AcquireResult<PollSnapshot> {
        let resp = self
            .authed(self.client.get(self.poll_url(job_id)))
            .send()
            .await
            .map_err(|e| AcquireError::Transport(format!("poll: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AcquireError::Transport(format!("poll body: {}", e)))?;

        if !status.is_success() {
            let truncated: String = body.chars().take(500).collect();
            return Err(AcquireError::Transport(format!(
                "poll rejected ({}): {}",
                status, truncated
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AcquireError::Transport(format!("poll parse: {}", e)))
    }

    async fn download(&self, url: &str) -> AcquireResult<Vec<u8>> {
        let validated = Self::validate_download_url(url)?;

        let resp = self
            .client
            .get(validated)
            .send()
            .await
            .map_err(|e| AcquireError::Transport(format!("download: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AcquireError::Transport(format!(
                "download rejected ({})",
                status
            )));
        }

        if let Some(len) = resp.content_length() {
            if len as usize > MAX_DOWNLOAD_BYTES {
                return Err(AcquireError::Internal(format!(
                    "artifact too large: {} bytes",
                    len
                )));
            }
        }

        let mut out = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AcquireError::Transport(format!("download chunk: {}", e)))?;
            if out.len() + chunk.len() > MAX_DOWNLOAD_BYTES {
                return Err(AcquireError::Internal("artifact exceeds size cap".into()));
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Line-framed JSON event channel over an HTTP byte stream
struct NdjsonChannel {
    stream: ByteStream,
    buf: Vec<u8>,
    done: bool,
}

impl NdjsonChannel {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    fn parse_line(line: &[u8]) -> Option<StreamEvent> {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return None;
        }
        match serde_json::from_slice::<StreamEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                // Tolerate unknown event shapes rather than dropping the channel.
                tracing::warn!(error = %e, "skipping unparseable stream event line");
                None
            }
        }
    }
}

#[async_trait]
impl JobChannel for NdjsonChannel {
    async fn next_event(&mut self) -> AcquireResult<Option<StreamEvent>> {
        loop {
            while let Some(line) = self.take_line() {
                if let Some(event) = Self::parse_line(&line) {
                    return Ok(Some(event));
                }
            }

            if self.done {
                let rest = std::mem::take(&mut self.buf);
                return Ok(Self::parse_line(&rest));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(AcquireError::Transport(format!("stream read: {}", e))),
                None => self.done = true,
            }
        }
    }
}

// =============================================================================
// Mock API for Testing
// =============================================================================

/// One scripted status-stream connection attempt
#[derive(Clone, Debug)]
pub enum MockConnection {
    /// Connection succeeds and replays these events, then EOF
    Events(Vec<StreamEvent>),
    /// Connection attempt fails at the transport level
    ConnectError(String),
}

/// Scripted remote API: replays connections, poll snapshots, and downloads
/// while logging every call so tests can assert zero-network paths.
#[derive(Debug, Default)]
pub struct MockJobApi {
    connections: Mutex<VecDeque<MockConnection>>,
    cancel_results: Mutex<VecDeque<Result<bool, String>>>,
    polls: Mutex<VecDeque<PollSnapshot>>,
    downloads: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
}

impl MockJobApi {
    /// Creates an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a connection that replays the events then reaches EOF
    pub fn push_connection(&self, events: Vec<StreamEvent>) {
        self.connections
            .lock()
            .unwrap()
            .push_back(MockConnection::Events(events));
    }

    /// Scripts a failed connection attempt
    pub fn push_connect_error(&self, message: impl Into<String>) {
        self.connections
            .lock()
            .unwrap()
            .push_back(MockConnection::ConnectError(message.into()));
    }

    /// Scripts the next remote-cancel outcome
    pub fn push_cancel_result(&self, result: Result<bool, String>) {
        self.cancel_results.lock().unwrap().push_back(result);
    }

    /// Scripts the next poll snapshot
    pub fn push_poll(&self, snapshot: PollSnapshot) {
        self.polls.lock().unwrap().push_back(snapshot);
    }

    /// Registers downloadable bytes for a URL
    pub fn set_download(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.downloads.lock().unwrap().insert(url.into(), bytes);
    }

    /// Every API call made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteJobApi for MockJobApi {
    async fn open_status_stream(&self, job_id: &str) -> AcquireResult<Box<dyn JobChannel>> {
        self.record(format!("stream:{}", job_id));
        match self.connections.lock().unwrap().pop_front() {
            Some(MockConnection::Events(events)) => Ok(Box::new(MockChannel {
                events: events.into(),
            })),
            Some(MockConnection::ConnectError(message)) => Err(AcquireError::Transport(message)),
            None => Err(AcquireError::Transport("no scripted connection".into())),
        }
    }

    async fn cancel(&self, job_id: &str) -> AcquireResult<bool> {
        self.record(format!("cancel:{}", job_id));
        match self.cancel_results.lock().unwrap().pop_front() {
            Some(Ok(accepted)) => Ok(accepted),
            Some(Err(message)) => Err(AcquireError::RemoteCancelFailed(message)),
            None => Err(AcquireError::RemoteCancelFailed(
                "no scripted cancel result".into(),
            )),
        }
    }

    async fn fetch_result(&self, job_id: &str) -> AcquireResult<PollSnapshot> {
        self.record(format!("poll:{}", job_id));
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AcquireError::Transport("no scripted poll snapshot".into()))
    }

    async fn download(&self, url: &str) -> AcquireResult<Vec<u8>> {
        self.record(format!("download:{}", url));
        self.downloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AcquireError::Transport(format!("unknown download url: {}", url)))
    }
}

struct MockChannel {
    events: VecDeque<StreamEvent>,
}

#[async_trait]
impl JobChannel for MockChannel {
    async fn next_event(&mut self) -> AcquireResult<Option<StreamEvent>> {
        Ok(self.events.pop_front())
    }
}
