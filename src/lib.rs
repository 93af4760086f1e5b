//! # comfyui-xy-plot
//!
//! XY parameter sweeps for [ComfyUI](https://github.com/comfyanonymous/ComfyUI):
//! generate one image per combination of two axes (samplers, schedulers or
//! guidance scales) and compose the results into a labeled grid.
//!
//! Jobs run strictly one at a time over a single push channel, failed cells
//! are skipped, and a sweep can be cancelled between cells.
//!
//! ## Quick Start
//!
//! ```no_run
//! use comfyui_xy_plot::{
//!     AxisSpec, GridStyle, PlotOutcome, SweepConfig, SweepRequest, Template,
//!     TemplateBindings, XyPlot,
//! };
//!
//! # async fn example() -> comfyui_xy_plot::Result<()> {
//! let config = SweepConfig::default();
//! let template = Template::load("flux_workflow_api.json", TemplateBindings::flux())?;
//! let base = template.defaults("a lighthouse at dusk").seed(42);
//!
//! let request = SweepRequest::new(
//!     AxisSpec::samplers(["euler", "dpmpp_2m"])?,
//!     AxisSpec::schedulers(["normal", "karras", "beta"])?,
//!     base,
//! );
//!
//! let mut plot = XyPlot::connect(&config, template).await?;
//! let outcome = plot
//!     .run(&request, &GridStyle::default(), |event| {
//!         if let Some(status) = event.status_message() {
//!             println!("{status}");
//!         }
//!     })
//!     .await?;
//!
//! if let PlotOutcome::Saved(saved) = &outcome {
//!     println!("{}", saved.path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod axis;
pub mod client;
pub mod compositor;
pub mod config;
pub mod error;
pub mod font;
pub mod form;
pub mod messages;
pub mod plot;
pub mod state;
pub mod sweep;
pub mod template;
pub mod types;

pub use axis::{
    composite_label, resolve_cell_parameters, values_for, values_for_name, AxisKind, AxisSpec,
    AxisValue, BaseParameters, CellParameters, SweepPoint,
};
pub use client::{JobBackend, JobClient};
pub use compositor::{ComposedPlot, GridCompositor, GridLayout, GridStyle};
pub use config::SweepConfig;
pub use error::{Result, XyPlotError};
pub use font::LabelFont;
pub use form::SweepForm;
pub use plot::{PlotOutcome, XyPlot};
pub use state::{CancelHandle, SweepState};
pub use sweep::{SweepController, SweepRequest, SweepTask};
pub use template::{NodeField, Template, TemplateBindings, Txt2ImgTemplate};
pub use types::{CellResult, ImageRef, JobHandle, SweepEvent, SweepOutcome};
