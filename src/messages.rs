//! ComfyUI push-channel message types.
//!
//! ComfyUI sends JSON text frames shaped `{"type": "<kind>", "data": {...}}`.
//! Only the kinds the sweep reacts to are modeled; anything else fails to
//! parse and is skipped by the reader.

use serde::Deserialize;

/// Push messages relevant to tracking a single job.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushMessage {
    /// A node started executing, or the job finished when `node` is `None`.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step-level progress from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// Execution failed.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: u32,
    pub max: u32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
}

impl PushMessage {
    /// True for the terminal notification of `prompt_id`.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        matches!(
            self,
            PushMessage::Executing(ExecutingData { node: None, prompt_id: Some(id) }) if id == prompt_id
        )
    }
}

/// Parse a push-channel text frame.
///
/// Returns `Err` for malformed JSON and for message kinds not modeled here
/// (`status`, `execution_start`, `executed`, ...).
pub fn parse_message(text: &str) -> Result<PushMessage, serde_json::Error> {
    serde_json::from_str(text)
}
