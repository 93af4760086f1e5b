//! Sweep samplers against schedulers on a running ComfyUI and save the grid.
//!
//! Expects an API-format export of the Flux workflow. Ctrl-C cancels the
//! sweep before the next cell.
//!
//! ```sh
//! RUST_LOG=comfyui_xy_plot=debug cargo run --example xy_plot -- flux_workflow_api.json
//! ```

use comfyui_xy_plot::{
    AxisSpec, GridStyle, PlotOutcome, SweepConfig, SweepEvent, SweepRequest, Template,
    TemplateBindings, XyPlot,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "flux_workflow_api.json".to_string());
    let template = Template::load(&path, TemplateBindings::flux())?;
    let base = template
        .defaults("a lighthouse on a cliff at dusk, oil painting")
        .seed(42);

    let request = SweepRequest::new(
        AxisSpec::samplers(["euler", "dpmpp_2m", "heun"])?,
        AxisSpec::schedulers(["simple", "beta"])?,
        base,
    );

    let config = SweepConfig::builder().with_client_id("xy-plot-demo").build();
    let mut plot = XyPlot::connect(&config, template).await?;

    let cancel = plot.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Cancelling...");
            cancel.cancel();
        }
    });

    let outcome = plot
        .run(&request, &GridStyle::default(), |event| {
            if let SweepEvent::CellStarted { label, .. } = &event {
                println!("Generating {}", label);
            }
            if let Some(status) = event.status_message() {
                println!("  {}", status);
            }
        })
        .await?;

    println!("{}", outcome.status_message());
    if let PlotOutcome::Saved(saved) = outcome {
        println!("Saved to {}", saved.path.display());
    }
    Ok(())
}
