use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a sweep run.
///
/// Use [`SweepConfig::builder()`] for ergonomic construction, or
/// [`SweepConfig::default()`] for a local ComfyUI with no completion timeout.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// ComfyUI HTTP endpoint, e.g. `http://127.0.0.1:8188`.
    pub endpoint: String,

    /// Client ID for the push channel. `None` = random UUID per client.
    pub client_id: Option<String>,

    /// Directory composed plots are saved to. Created on first save.
    pub output_dir: PathBuf,

    /// Upper bound on waiting for one job. `None` = wait indefinitely.
    pub completion_timeout: Option<Duration>,

    /// Longest edge of the preview thumbnail attached to progress events.
    pub preview_size: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8188".to_string(),
            client_id: None,
            output_dir: PathBuf::from("xy_plot_outputs"),
            completion_timeout: None,
            preview_size: 300,
        }
    }
}

impl SweepConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> SweepConfigBuilder {
        SweepConfigBuilder::default()
    }
}

/// Builder for [`SweepConfig`].
#[derive(Default)]
pub struct SweepConfigBuilder {
    config: SweepConfig,
}

impl SweepConfigBuilder {
    /// Set the ComfyUI endpoint. Trailing slashes are ignored.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Pin the push-channel client ID instead of generating one.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = Some(id.into());
        self
    }

    /// Set the directory composed plots are written to.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Fail a cell if its job does not finish within `timeout`.
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.config.completion_timeout = Some(timeout);
        self
    }

    /// Set the preview thumbnail size for progress events.
    pub fn with_preview_size(mut self, size: u32) -> Self {
        self.config.preview_size = size;
        self
    }

    /// Build the final [`SweepConfig`].
    pub fn build(self) -> SweepConfig {
        self.config
    }
}
