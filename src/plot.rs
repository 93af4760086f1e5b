use std::path::{Path, PathBuf};

use crate::client::{JobBackend, JobClient};
use crate::compositor::{ComposedPlot, GridCompositor, GridStyle};
use crate::config::SweepConfig;
use crate::error::Result;
use crate::state::CancelHandle;
use crate::sweep::{SweepController, SweepRequest};
use crate::template::Template;
use crate::types::{SweepEvent, SweepOutcome};

/// Result of a full sweep-and-compose run.
#[derive(Debug, Clone)]
pub enum PlotOutcome {
    /// The grid was composed and written to disk.
    Saved(ComposedPlot),
    /// The sweep was cancelled; partial results were discarded.
    Cancelled { completed: usize },
}

impl PlotOutcome {
    pub fn status_message(&self) -> &'static str {
        match self {
            PlotOutcome::Saved(_) => "XY Plot generated successfully and saved to file",
            PlotOutcome::Cancelled { .. } => "Generation cancelled.",
        }
    }
}

/// End-to-end XY plot: sweep every cell, then compose and save the grid.
#[derive(Debug)]
pub struct XyPlot<B: JobBackend> {
    controller: SweepController<B>,
    output_dir: PathBuf,
}

impl XyPlot<JobClient> {
    /// Connect to the server in `config` and wrap `template`.
    ///
    /// The push channel is opened once here and reused by every sweep.
    pub async fn connect(config: &SweepConfig, template: Template) -> Result<Self> {
        let mut client = JobClient::from_config(config);
        client.connect().await?;
        let controller = SweepController::new(client, template).with_config(config);
        Ok(Self::new(controller, &config.output_dir))
    }
}

impl<B: JobBackend> XyPlot<B> {
    pub fn new(controller: SweepController<B>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            controller,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn controller(&self) -> &SweepController<B> {
        &self.controller
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.controller.cancel_handle()
    }

    /// Run the sweep and, unless cancelled, compose and save the plot.
    pub async fn run<F>(
        &mut self,
        request: &SweepRequest,
        style: &GridStyle,
        on_event: F,
    ) -> Result<PlotOutcome>
    where
        F: FnMut(SweepEvent),
    {
        let results = match self.controller.run(request, on_event).await? {
            SweepOutcome::Cancelled { partial } => {
                tracing::info!(discarded = partial.len(), "Sweep cancelled, no plot composed");
                return Ok(PlotOutcome::Cancelled {
                    completed: partial.len(),
                });
            }
            SweepOutcome::Completed(results) => results,
        };

        let compositor = GridCompositor::new(style.clone());
        let plot = compositor.compose_and_save(
            &results,
            request.x_axis.values(),
            request.y_axis.values(),
            request.x_axis.kind.label(),
            request.y_axis.kind.label(),
            &self.output_dir,
        )?;
        Ok(PlotOutcome::Saved(plot))
    }
}
