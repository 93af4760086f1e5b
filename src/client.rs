use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::axis::CellParameters;
use crate::config::SweepConfig;
use crate::error::{Result, XyPlotError};
use crate::messages::{parse_message, PushMessage};
use crate::template::Template;
use crate::types::{ImageRef, JobHandle};

type PushChannel = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// The remote side of a sweep: one job per cell, strictly one at a time.
///
/// [`JobClient`] talks to a real ComfyUI server; tests drive the sweep with
/// scripted backends.
pub trait JobBackend: Send {
    /// Patch `params` into the shared template and queue it.
    fn submit(
        &mut self,
        template: &mut Template,
        params: &CellParameters,
    ) -> impl Future<Output = Result<JobHandle>> + Send;

    /// Wait until the job reports its terminal notification.
    fn await_completion(&mut self, handle: &JobHandle) -> impl Future<Output = Result<()>> + Send;

    /// Download the first image the job produced.
    fn fetch_result(&mut self, handle: &JobHandle) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Async client for running sweep jobs on a ComfyUI server.
///
/// Holds one push channel (`/ws`) for its whole lifetime and reuses it
/// across every job of a sweep. REST calls go through a shared
/// `reqwest::Client`.
///
/// # Example
/// ```no_run
/// use comfyui_xy_plot::JobClient;
///
/// # async fn example() -> comfyui_xy_plot::Result<()> {
/// let mut client = JobClient::new("http://127.0.0.1:8188");
/// client.connect().await?;
/// let samplers = client.samplers().await?;
/// # Ok(())
/// # }
/// ```
pub struct JobClient {
    http: Client,
    endpoint: String,
    client_id: String,
    completion_timeout: Option<Duration>,
    channel: Option<PushChannel>,
}

impl std::fmt::Debug for JobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobClient")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("completion_timeout", &self.completion_timeout)
            .field("connected", &self.channel.is_some())
            .finish()
    }
}

impl JobClient {
    /// Create a client for the given endpoint with a random client ID.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            client_id: uuid::Uuid::new_v4().to_string(),
            completion_timeout: None,
            channel: None,
        }
    }

    /// Create a client from a [`SweepConfig`].
    pub fn from_config(config: &SweepConfig) -> Self {
        let client = Self::new(config.endpoint.clone())
            .with_completion_timeout(config.completion_timeout);
        match &config.client_id {
            Some(id) => client.with_client_id(id.clone()),
            None => client,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, timeouts, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Set the client ID used for push-channel routing and job association.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Bound the wait for each job. `None` waits indefinitely.
    pub fn with_completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the configured client ID.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether the push channel is currently open.
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn ws_url(&self) -> String {
        format!(
            "{}/ws?clientId={}",
            self.endpoint
                .replace("http://", "ws://")
                .replace("https://", "wss://"),
            self.client_id
        )
    }

    // ── Push channel ────────────────────────────────────────────────

    /// Open the push channel. Called once at startup; a later call replaces
    /// a channel that has dropped.
    pub async fn connect(&mut self) -> Result<()> {
        let url = self.ws_url();
        let (channel, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
            XyPlotError::Tracking(format!(
                "Cannot open push channel at {} \u{2014} is ComfyUI running? ({})",
                self.endpoint, e
            ))
        })?;
        tracing::info!(endpoint = %self.endpoint, client_id = %self.client_id, "Push channel connected");
        self.channel = Some(channel);
        Ok(())
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Check whether ComfyUI is reachable via `/system_stats`.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/system_stats", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| XyPlotError::Network {
                context: format!(
                    "Cannot connect to ComfyUI at {} \u{2014} is the service running?",
                    self.endpoint
                ),
                source: e,
            })?;
        Ok(resp.status().is_success())
    }

    // ── Prompt ──────────────────────────────────────────────────────

    /// Queue a workflow for execution. Returns the `prompt_id`.
    pub async fn queue_prompt(&self, workflow: &Value) -> Result<String> {
        let url = format!("{}/prompt", self.endpoint);
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map_err(|e| XyPlotError::Network {
                context: format!(
                    "Cannot connect to ComfyUI at {} \u{2014} is the service running?",
                    self.endpoint
                ),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(XyPlotError::Http {
                status,
                body: body_text,
            });
        }

        let json: Value = resp.json().await.map_err(|e| XyPlotError::Network {
            context: "Failed to parse ComfyUI /prompt response".into(),
            source: e,
        })?;

        parse_prompt_response(&json)
    }

    // ── History ─────────────────────────────────────────────────────

    /// First image recorded in a job's history, if any.
    pub async fn history_image(&self, prompt_id: &str) -> Result<Option<ImageRef>> {
        let url = format!("{}/history/{}", self.endpoint, prompt_id);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| XyPlotError::Network {
                context: "Failed to fetch ComfyUI history".into(),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Err(XyPlotError::Http {
                status: resp.status().as_u16(),
                body: format!("Failed to fetch history for {}", prompt_id),
            });
        }

        let json: Value = resp.json().await.map_err(|e| XyPlotError::Network {
            context: "Failed to parse ComfyUI history response".into(),
            source: e,
        })?;

        Ok(first_image_ref(&json, prompt_id))
    }

    // ── Image download ──────────────────────────────────────────────

    /// Download an output image by its reference. Returns raw bytes.
    pub async fn image(&self, img: &ImageRef) -> Result<Vec<u8>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/view", self.endpoint),
            &[
                ("filename", img.filename.as_str()),
                ("subfolder", img.subfolder.as_str()),
                ("type", img.img_type.as_str()),
            ],
        )
        .map_err(|e| XyPlotError::InvalidResponse(format!("Bad image URL: {}", e)))?;

        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| XyPlotError::Network {
                context: format!("Failed to fetch image {} from ComfyUI", img.filename),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Err(XyPlotError::Http {
                status: resp.status().as_u16(),
                body: format!("Failed to fetch image {}", img.filename),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| XyPlotError::Network {
            context: "Failed to read image bytes".into(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }

    // ── Model discovery ─────────────────────────────────────────────

    /// List the sampler algorithms the server offers.
    pub async fn samplers(&self) -> Result<Vec<String>> {
        self.object_info_list("KSampler", "/KSampler/input/required/sampler_name/0")
            .await
    }

    /// List the noise schedulers the server offers.
    pub async fn schedulers(&self) -> Result<Vec<String>> {
        self.object_info_list("KSampler", "/KSampler/input/required/scheduler/0")
            .await
    }

    async fn object_info_list(&self, node: &str, pointer: &str) -> Result<Vec<String>> {
        let url = format!("{}/object_info/{}", self.endpoint, node);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| XyPlotError::Network {
                context: format!(
                    "Cannot connect to ComfyUI at {} \u{2014} is the service running?",
                    self.endpoint
                ),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Ok(Vec::new());
        }

        let json: Value = resp.json().await.map_err(|e| XyPlotError::Network {
            context: format!("Failed to parse {} object_info", node),
            source: e,
        })?;

        Ok(string_list(&json, pointer))
    }
}

impl JobBackend for JobClient {
    async fn submit(&mut self, template: &mut Template, params: &CellParameters) -> Result<JobHandle> {
        // The channel must be open before queuing or the terminal
        // notification can arrive before anyone is listening.
        if self.channel.is_none() {
            tracing::warn!(endpoint = %self.endpoint, "Push channel not open, reconnecting before submit");
            self.connect().await?;
        }

        template.apply(params)?;
        let prompt_id = self
            .queue_prompt(template.document())
            .await
            .map_err(|e| match e {
                XyPlotError::Submission(_) => e,
                other => XyPlotError::Submission(other.to_string()),
            })?;

        tracing::debug!(prompt_id = %prompt_id, sampler = %params.sampler, scheduler = %params.scheduler, guidance = params.guidance, "Job queued");
        Ok(JobHandle::new(prompt_id))
    }

    async fn await_completion(&mut self, handle: &JobHandle) -> Result<()> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| XyPlotError::Tracking("push channel is not open".into()))?;

        let tracked = track_within(channel, handle.prompt_id(), self.completion_timeout).await?;

        match tracked {
            Tracked::Completed => Ok(()),
            Tracked::Failed(message) => Err(XyPlotError::GenerationFailed(message)),
            Tracked::Closed(reason) => {
                // No resume: this job is lost, the next submit reopens.
                self.channel = None;
                tracing::warn!(prompt_id = %handle, reason = %reason, "Push channel dropped mid-job");
                Err(XyPlotError::Tracking(reason))
            }
        }
    }

    async fn fetch_result(&mut self, handle: &JobHandle) -> Result<Vec<u8>> {
        let image = self
            .history_image(handle.prompt_id())
            .await?
            .ok_or_else(|| XyPlotError::NoResult(handle.to_string()))?;
        self.image(&image).await
    }
}

/// How reading the push channel for one job ended.
#[derive(Debug, PartialEq)]
enum Tracked {
    Completed,
    Failed(String),
    Closed(String),
}

/// Read frames until `prompt_id` completes, fails, or the stream ends.
///
/// Binary frames (live previews), unknown message kinds and messages for
/// other jobs are skipped.
async fn track_job<S>(stream: &mut S, prompt_id: &str) -> Tracked
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return Tracked::Closed("server closed the push channel".into()),
            Ok(_) => continue,
            Err(e) => return Tracked::Closed(format!("push channel error: {}", e)),
        };

        let message = match parse_message(&text) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if message.is_completion_of(prompt_id) {
            return Tracked::Completed;
        }
        match message {
            PushMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
                let message = if data.exception_message.is_empty() {
                    "ComfyUI reported an execution error".to_string()
                } else {
                    data.exception_message
                };
                return Tracked::Failed(message);
            }
            PushMessage::Progress(data)
                if data.prompt_id.as_deref().map_or(true, |id| id == prompt_id) =>
            {
                tracing::trace!(prompt_id, step = data.value, of = data.max, "Sampling progress");
            }
            _ => {}
        }
    }
    Tracked::Closed("push channel ended".into())
}

/// [`track_job`] bounded by an optional time limit. Running out of time is
/// a `Tracking` error.
async fn track_within<S>(stream: &mut S, prompt_id: &str, limit: Option<Duration>) -> Result<Tracked>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, track_job(stream, prompt_id))
            .await
            .map_err(|_| {
                XyPlotError::Tracking(format!(
                    "job {} did not finish within {:?}",
                    prompt_id, limit
                ))
            }),
        None => Ok(track_job(stream, prompt_id).await),
    }
}

fn parse_prompt_response(json: &Value) -> Result<String> {
    if let Some(errors) = json.get("node_errors").and_then(|e| e.as_object()) {
        if !errors.is_empty() {
            return Err(XyPlotError::Submission(format!(
                "Workflow node errors: {}",
                serde_json::to_string(errors).unwrap_or_default()
            )));
        }
    }

    json.get("prompt_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| XyPlotError::InvalidResponse("Response missing prompt_id".into()))
}

/// First image of the first output node that produced any, in document order.
fn first_image_ref(history: &Value, prompt_id: &str) -> Option<ImageRef> {
    let outputs = history.get(prompt_id)?.get("outputs")?.as_object()?;
    outputs.values().find_map(|node_output| {
        let img = node_output.get("images")?.as_array()?.first()?;
        let filename = img.get("filename")?.as_str()?;
        let subfolder = img.get("subfolder").and_then(|s| s.as_str()).unwrap_or("");
        let img_type = img.get("type").and_then(|t| t.as_str()).unwrap_or("output");
        Some(ImageRef {
            filename: filename.to_string(),
            subfolder: subfolder.to_string(),
            img_type: img_type.to_string(),
        })
    })
}

fn string_list(json: &Value, pointer: &str) -> Vec<String> {
    json.pointer(pointer)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn text(s: &str) -> std::result::Result<Message, tungstenite::Error> {
        Ok(Message::Text(s.to_string()))
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize("http://localhost:8188/".into()), "http://localhost:8188");
        assert_eq!(normalize("http://host:8188///".into()), "http://host:8188");
    }

    #[test]
    fn test_client_builder() {
        let client = JobClient::new("http://127.0.0.1:8188/")
            .with_client_id("xy-plot")
            .with_completion_timeout(Some(Duration::from_secs(60)));
        assert_eq!(client.endpoint(), "http://127.0.0.1:8188");
        assert_eq!(client.client_id(), "xy-plot");
        assert!(!client.is_connected());
        assert_eq!(client.ws_url(), "ws://127.0.0.1:8188/ws?clientId=xy-plot");
    }

    #[test]
    fn test_default_client_id_is_uuid() {
        let a = JobClient::new("http://localhost:8188");
        let b = JobClient::new("http://localhost:8188");
        assert!(uuid::Uuid::parse_str(a.client_id()).is_ok());
        assert_ne!(a.client_id(), b.client_id());
    }

    #[test]
    fn test_from_config() {
        let config = SweepConfig::builder()
            .with_endpoint("https://comfy.example.com/")
            .with_client_id("fixed")
            .build();
        let client = JobClient::from_config(&config);
        assert_eq!(client.ws_url(), "wss://comfy.example.com/ws?clientId=fixed");
    }

    #[test]
    fn test_parse_prompt_response() {
        let json = serde_json::json!({"prompt_id": "abc-123-def", "number": 1, "node_errors": {}});
        assert_eq!(parse_prompt_response(&json).unwrap(), "abc-123-def");
    }

    #[test]
    fn test_parse_prompt_response_node_errors() {
        let json = serde_json::json!({
            "prompt_id": "abc",
            "node_errors": {"16": {"errors": [{"message": "Value not in list"}]}}
        });
        match parse_prompt_response(&json) {
            Err(XyPlotError::Submission(msg)) => assert!(msg.contains("Value not in list")),
            other => panic!("Expected Submission, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_prompt_response_missing_id() {
        let json = serde_json::json!({"number": 1});
        assert!(matches!(
            parse_prompt_response(&json),
            Err(XyPlotError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_first_image_ref_follows_document_order() {
        let json: Value = serde_json::from_str(
            r#"{
            "abc123": {
                "status": {"status_str": "success", "completed": true},
                "outputs": {
                    "31": {"text": ["not an image"]},
                    "9": {"images": [
                        {"filename": "ComfyUI_00007_.png", "subfolder": "grids", "type": "output"},
                        {"filename": "ComfyUI_00008_.png", "subfolder": "grids", "type": "output"}
                    ]},
                    "12": {"images": [{"filename": "late.png", "subfolder": "", "type": "temp"}]}
                }
            }
        }"#,
        )
        .unwrap();

        let img = first_image_ref(&json, "abc123").unwrap();
        assert_eq!(img.filename, "ComfyUI_00007_.png");
        assert_eq!(img.subfolder, "grids");
        assert_eq!(img.img_type, "output");
    }

    #[test]
    fn test_first_image_ref_skips_empty_lists() {
        let json = serde_json::json!({
            "abc": {"outputs": {
                "3": {"images": []},
                "4": {"images": [{"filename": "x.png"}]}
            }}
        });
        let img = first_image_ref(&json, "abc").unwrap();
        assert_eq!(img.filename, "x.png");
        assert_eq!(img.subfolder, "");
        assert_eq!(img.img_type, "output");
    }

    #[test]
    fn test_first_image_ref_none() {
        let json = serde_json::json!({"abc": {"outputs": {"3": {"text": ["hi"]}}}});
        assert!(first_image_ref(&json, "abc").is_none());
        assert!(first_image_ref(&json, "missing").is_none());
    }

    #[test]
    fn test_string_list() {
        let json = serde_json::json!({
            "KSampler": {"input": {"required": {
                "sampler_name": [["euler", "dpmpp_2m", "dpmpp_sde"]],
                "scheduler": [["normal", "karras"]]
            }}}
        });
        let samplers = string_list(&json, "/KSampler/input/required/sampler_name/0");
        assert_eq!(samplers, vec!["euler", "dpmpp_2m", "dpmpp_sde"]);
        assert!(string_list(&serde_json::json!({}), "/KSampler/input/required/scheduler/0").is_empty());
    }

    #[tokio::test]
    async fn test_track_job_waits_for_own_completion() {
        let mut frames = stream::iter(vec![
            text(r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":1}}}}"#),
            text(r#"{"type":"executing","data":{"node":null,"prompt_id":"someone-else"}}"#),
            Ok(Message::Binary(vec![0, 1, 2, 3])),
            text(r#"{"type":"executing","data":{"node":"17","prompt_id":"job-1"}}"#),
            text(r#"{"type":"progress","data":{"value":3,"max":20,"prompt_id":"job-1"}}"#),
            text("garbage"),
            text(r#"{"type":"executing","data":{"node":null,"prompt_id":"job-1"}}"#),
            text(r#"{"type":"executing","data":{"node":null,"prompt_id":"job-2"}}"#),
        ]);

        assert_eq!(track_job(&mut frames, "job-1").await, Tracked::Completed);
        // The following frame is still unread for the next job.
        assert_eq!(track_job(&mut frames, "job-2").await, Tracked::Completed);
    }

    #[tokio::test]
    async fn test_track_job_reports_execution_error() {
        let mut frames = stream::iter(vec![
            text(r#"{"type":"execution_error","data":{"prompt_id":"other","exception_message":"x"}}"#),
            text(r#"{"type":"execution_error","data":{"prompt_id":"job-1","node_id":"16","exception_message":"CUDA out of memory"}}"#),
        ]);
        assert_eq!(
            track_job(&mut frames, "job-1").await,
            Tracked::Failed("CUDA out of memory".into())
        );
    }

    #[tokio::test]
    async fn test_track_job_channel_closed() {
        let mut frames = stream::iter(vec![
            text(r#"{"type":"executing","data":{"node":"5","prompt_id":"job-1"}}"#),
            Ok(Message::Close(None)),
        ]);
        assert!(matches!(track_job(&mut frames, "job-1").await, Tracked::Closed(_)));

        let mut empty = stream::iter(Vec::<std::result::Result<Message, tungstenite::Error>>::new());
        assert_eq!(
            track_job(&mut empty, "job-1").await,
            Tracked::Closed("push channel ended".into())
        );
    }

    #[tokio::test]
    async fn test_track_job_transport_error() {
        let mut frames = stream::iter(vec![Err(tungstenite::Error::ConnectionClosed)]);
        match track_job(&mut frames, "job-1").await {
            Tracked::Closed(reason) => assert!(reason.contains("push channel error")),
            other => panic!("Expected Closed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_within_times_out_on_silent_channel() {
        let mut silent = stream::pending::<std::result::Result<Message, tungstenite::Error>>();
        let result = track_within(&mut silent, "job-1", Some(Duration::from_millis(20))).await;
        match result {
            Err(XyPlotError::Tracking(msg)) => assert!(msg.contains("job-1 did not finish")),
            other => panic!("Expected Tracking, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_within_finishes_before_limit() {
        let mut frames = stream::iter(vec![text(
            r#"{"type":"executing","data":{"node":null,"prompt_id":"job-1"}}"#,
        )]);
        let tracked = track_within(&mut frames, "job-1", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(tracked, Tracked::Completed);

        let mut frames = stream::iter(vec![text(
            r#"{"type":"executing","data":{"node":null,"prompt_id":"job-2"}}"#,
        )]);
        let tracked = track_within(&mut frames, "job-2", None).await.unwrap();
        assert_eq!(tracked, Tracked::Completed);
    }

    #[tokio::test]
    async fn test_await_completion_without_channel() {
        let mut client = JobClient::new("http://127.0.0.1:1");
        let result = client.await_completion(&JobHandle::new("job-1")).await;
        assert!(matches!(result, Err(XyPlotError::Tracking(_))));
    }
}
