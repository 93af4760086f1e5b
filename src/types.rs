use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::axis::SweepPoint;

/// Reference to an image stored in ComfyUI's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    pub subfolder: String,
    #[serde(rename = "type")]
    pub img_type: String,
}

/// Identifier ComfyUI assigns to a queued job (its `prompt_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self(prompt_id.into())
    }

    pub fn prompt_id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One decoded cell image and the composite label locating it in the grid.
#[derive(Debug, Clone)]
pub struct CellResult {
    pub image: DynamicImage,
    pub label: String,
}

/// Incremental sweep events, delivered in order.
#[derive(Debug, Clone)]
pub enum SweepEvent {
    /// The sweep passed validation and is about to submit `total` cells.
    Started { total: usize },
    /// A cell is about to be submitted.
    CellStarted { point: SweepPoint, label: String },
    /// A cell produced an image. `completed` counts successful cells only.
    Progress {
        completed: usize,
        total: usize,
        label: String,
        preview: DynamicImage,
    },
    /// A cell produced no image; the sweep carries on without it.
    CellFailed {
        point: SweepPoint,
        label: String,
        error: String,
    },
}

impl SweepEvent {
    /// One-line status text for a UI, if the event warrants one.
    pub fn status_message(&self) -> Option<String> {
        match self {
            SweepEvent::Progress {
                completed, total, ..
            } => Some(format!("Generated {}/{} images", completed, total)),
            SweepEvent::CellFailed { label, error, .. } => {
                Some(format!("Skipped {}: {}", label, error))
            }
            SweepEvent::Started { .. } | SweepEvent::CellStarted { .. } => None,
        }
    }
}

/// How a sweep ended, when it did not fail outright.
#[derive(Debug, Clone)]
pub enum SweepOutcome {
    /// Every cell was attempted and at least one produced an image.
    Completed(Vec<CellResult>),
    /// The cancel flag was observed; `partial` holds the cells finished so far.
    Cancelled { partial: Vec<CellResult> },
}

impl SweepOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SweepOutcome::Cancelled { .. })
    }

    /// Results collected before the sweep ended, either way.
    pub fn results(&self) -> &[CellResult] {
        match self {
            SweepOutcome::Completed(results) => results,
            SweepOutcome::Cancelled { partial } => partial,
        }
    }
}
