use image::DynamicImage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::axis::{
    composite_label, resolve_cell_parameters, AxisKind, AxisSpec, AxisValue, BaseParameters,
    SweepPoint,
};
use crate::client::JobBackend;
use crate::config::SweepConfig;
use crate::error::{Result, XyPlotError};
use crate::state::{CancelHandle, SweepState};
use crate::template::Template;
use crate::types::{CellResult, SweepEvent, SweepOutcome};

/// Everything needed to run one sweep: the two axes and the base parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRequest {
    pub x_axis: AxisSpec,
    pub y_axis: AxisSpec,
    pub base: BaseParameters,
}

impl SweepRequest {
    pub fn new(x_axis: AxisSpec, y_axis: AxisSpec, base: BaseParameters) -> Self {
        Self {
            x_axis,
            y_axis,
            base,
        }
    }

    /// Number of cells the sweep will submit.
    pub fn total_cells(&self) -> usize {
        self.x_axis.len() * self.y_axis.len()
    }

    fn binds(&self, kind: AxisKind) -> bool {
        self.x_axis.kind == kind || self.y_axis.kind == kind
    }

    /// Checks run before anything is submitted.
    pub fn validate(&self, template: &Template) -> Result<()> {
        if self.x_axis.is_empty() || self.y_axis.is_empty() {
            return Err(XyPlotError::Validation(
                "Both axes need at least one value".into(),
            ));
        }
        self.base.validate()?;
        if self.binds(AxisKind::GuidanceScale) && !template.supports_guidance() {
            return Err(XyPlotError::Validation(
                "The workflow template has no guidance node to sweep".into(),
            ));
        }
        Ok(())
    }

    /// Base parameters with a negative seed replaced by one random seed,
    /// shared by every cell of the sweep.
    fn resolved_base(&self) -> BaseParameters {
        let mut base = self.base.clone();
        if base.seed < 0 {
            base.seed = rand::rng().random_range(0..i64::MAX);
            tracing::debug!(seed = base.seed, "Resolved random sweep seed");
        }
        base
    }
}

// ── Controller ──

/// Runs a sweep cell by cell against a [`JobBackend`].
///
/// Cells are generated strictly in sequence, x in the outer loop. A failed
/// cell is reported through [`SweepEvent::CellFailed`] and skipped; the
/// cancel flag is checked before every cell and once more after the last.
pub struct SweepController<B: JobBackend> {
    backend: B,
    template: Template,
    state: SweepState,
    preview_size: u32,
}

impl<B: JobBackend> std::fmt::Debug for SweepController<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepController")
            .field("state", &self.state)
            .field("preview_size", &self.preview_size)
            .field("supports_guidance", &self.template.supports_guidance())
            .finish()
    }
}

impl<B: JobBackend> SweepController<B> {
    pub fn new(backend: B, template: Template) -> Self {
        Self {
            backend,
            template,
            state: SweepState::new(),
            preview_size: SweepConfig::default().preview_size,
        }
    }

    /// Take the preview size from `config`.
    pub fn with_config(mut self, config: &SweepConfig) -> Self {
        self.preview_size = config.preview_size;
        self
    }

    /// Share an existing state, e.g. one a UI already holds a clone of.
    pub fn with_state(mut self, state: SweepState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &SweepState {
        &self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.state.cancel_handle()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn into_parts(self) -> (B, Template) {
        (self.backend, self.template)
    }

    /// Run every cell of `request`, reporting events to `on_event`.
    ///
    /// Returns [`SweepOutcome::Cancelled`] with the partial results if the
    /// cancel flag was set, or [`XyPlotError::EmptySweepResult`] if no cell
    /// produced an image.
    pub async fn run<F>(&mut self, request: &SweepRequest, on_event: F) -> Result<SweepOutcome>
    where
        F: FnMut(SweepEvent),
    {
        self.state.reset();
        self.run_cells(request, on_event).await
    }

    /// The sweep loop. Leaves the state as the caller prepared it, so a
    /// cancel issued before the first cell is honored.
    async fn run_cells<F>(&mut self, request: &SweepRequest, mut on_event: F) -> Result<SweepOutcome>
    where
        F: FnMut(SweepEvent),
    {
        request.validate(&self.template)?;

        let base = request.resolved_base();
        let total = request.total_cells();
        let x_values = request.x_axis.values();
        let y_values = request.y_axis.values();

        tracing::info!(
            x_axis = %request.x_axis.kind,
            y_axis = %request.y_axis.kind,
            total,
            seed = base.seed,
            "Starting XY sweep"
        );
        on_event(SweepEvent::Started { total });

        let mut results: Vec<CellResult> = Vec::with_capacity(total);
        for point in SweepPoint::grid(x_values.len(), y_values.len()) {
            if self.state.is_cancelled() {
                tracing::info!(completed = results.len(), total, "Sweep cancelled");
                return Ok(SweepOutcome::Cancelled { partial: results });
            }

            let x_value = &x_values[point.x];
            let y_value = &y_values[point.y];
            let label = composite_label(x_value, y_value);
            on_event(SweepEvent::CellStarted {
                point,
                label: label.clone(),
            });

            match self.run_cell(request, &base, x_value, y_value).await {
                Ok(image) => {
                    let completed = self.state.record_completed();
                    let preview = image.thumbnail(self.preview_size, self.preview_size);
                    tracing::debug!(label = %label, completed, total, "Cell finished");
                    results.push(CellResult {
                        image,
                        label: label.clone(),
                    });
                    on_event(SweepEvent::Progress {
                        completed,
                        total,
                        label,
                        preview,
                    });
                }
                Err(e) => {
                    if e.is_cell_failure() {
                        tracing::warn!(label = %label, error = %e, "Cell failed, skipping");
                    } else {
                        tracing::error!(label = %label, error = %e, "Cell failed, skipping");
                    }
                    on_event(SweepEvent::CellFailed {
                        point,
                        label,
                        error: e.to_string(),
                    });
                }
            }
        }

        // No images outranks a late cancel.
        if results.is_empty() {
            return Err(XyPlotError::EmptySweepResult);
        }
        if self.state.is_cancelled() {
            tracing::info!(completed = results.len(), total, "Sweep cancelled after last cell");
            return Ok(SweepOutcome::Cancelled { partial: results });
        }

        tracing::info!(completed = results.len(), total, "XY sweep finished");
        Ok(SweepOutcome::Completed(results))
    }

    async fn run_cell(
        &mut self,
        request: &SweepRequest,
        base: &BaseParameters,
        x_value: &AxisValue,
        y_value: &AxisValue,
    ) -> Result<DynamicImage> {
        let params = resolve_cell_parameters(
            request.x_axis.kind,
            request.y_axis.kind,
            x_value,
            y_value,
            base,
        )?;
        let handle = self.backend.submit(&mut self.template, &params).await?;
        self.backend.await_completion(&handle).await?;
        let bytes = self.backend.fetch_result(&handle).await?;
        image::load_from_memory(&bytes).map_err(XyPlotError::Decode)
    }
}

impl<B: JobBackend + 'static> SweepController<B> {
    /// Run the sweep on a background tokio task.
    ///
    /// Events arrive on the returned receiver; the join handle yields the
    /// outcome together with the controller so it can be reused. The state
    /// is reset before this returns, so `SweepTask::cancel` works at once.
    pub fn spawn(mut self, request: SweepRequest) -> SweepTask<B> {
        let (tx, events) = mpsc::unbounded_channel();
        self.state.reset();
        let cancel = self.cancel_handle();
        let handle = tokio::spawn(async move {
            let outcome = self
                .run_cells(&request, |event| {
                    // Receiver may have been dropped; the sweep runs on regardless.
                    let _ = tx.send(event);
                })
                .await;
            (self, outcome)
        });
        SweepTask {
            events,
            cancel,
            handle,
        }
    }
}

/// A sweep running on a background task.
pub struct SweepTask<B: JobBackend> {
    pub events: mpsc::UnboundedReceiver<SweepEvent>,
    pub cancel: CancelHandle,
    pub handle: JoinHandle<(SweepController<B>, Result<SweepOutcome>)>,
}
