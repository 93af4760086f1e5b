//! Axis binding and per-cell parameter resolution.
//!
//! Each sweep axis is bound to one parameter family ([`AxisKind`]) and an
//! ordered list of candidate values. [`resolve_cell_parameters`] merges the
//! two axis values of a grid cell into the caller's defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, XyPlotError};

/// Sampler algorithms shipped with stock ComfyUI.
pub const KNOWN_SAMPLERS: &[&str] = &[
    "euler",
    "euler_ancestral",
    "heun",
    "dpm_2",
    "dpm_2_ancestral",
    "lms",
    "dpm_fast",
    "dpm_adaptive",
    "dpmpp_2s_ancestral",
    "dpmpp_sde",
    "dpmpp_2m",
    "dpmpp_3m_sde",
    "ddpm",
    "lcm",
    "ddim",
    "uni_pc",
];

/// Noise schedulers shipped with stock ComfyUI.
pub const KNOWN_SCHEDULERS: &[&str] = &[
    "normal",
    "karras",
    "exponential",
    "sgm_uniform",
    "simple",
    "ddim_uniform",
    "beta",
];

/// Parameter family an axis is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisKind {
    Samplers,
    Schedulers,
    GuidanceScale,
}

impl AxisKind {
    pub const ALL: [AxisKind; 3] = [
        AxisKind::Samplers,
        AxisKind::Schedulers,
        AxisKind::GuidanceScale,
    ];

    /// Human-readable family name, used as the axis title on the grid.
    pub fn label(&self) -> &'static str {
        match self {
            AxisKind::Samplers => "Samplers",
            AxisKind::Schedulers => "Schedulers",
            AxisKind::GuidanceScale => "Guidance Scale",
        }
    }

    /// Parse an axis name as sent by a UI ("Samplers", "guidance_scale", ...).
    pub fn parse(name: &str) -> Result<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "samplers" | "sampler" => Ok(AxisKind::Samplers),
            "schedulers" | "scheduler" => Ok(AxisKind::Schedulers),
            "guidancescale" | "guidance" | "cfg" | "cfgscale" => Ok(AxisKind::GuidanceScale),
            _ => Err(XyPlotError::InvalidAxisKind(name.to_string())),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, AxisKind::GuidanceScale)
    }
}

impl FromStr for AxisKind {
    type Err = XyPlotError;

    fn from_str(s: &str) -> Result<Self> {
        AxisKind::parse(s)
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One candidate value on an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValue {
    Text(String),
    Number(f64),
}

impl AxisValue {
    /// Numeric view of the value. Text is parsed after trimming.
    pub fn as_number(&self) -> Result<f64> {
        match self {
            AxisValue::Number(n) => Ok(*n),
            AxisValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                XyPlotError::Validation(format!("'{}' is not a number", s.trim()))
            }),
        }
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Text(s) => f.write_str(s),
            // Whole numbers keep one decimal so 7 reads as "7.0", not "7".
            AxisValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{:.1}", n)
            }
            AxisValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for AxisValue {
    fn from(s: &str) -> Self {
        AxisValue::Text(s.to_string())
    }
}

impl From<String> for AxisValue {
    fn from(s: String) -> Self {
        AxisValue::Text(s)
    }
}

impl From<f64> for AxisValue {
    fn from(n: f64) -> Self {
        AxisValue::Number(n)
    }
}

/// An axis: its parameter family plus the ordered values swept along it.
///
/// Values are normalized on construction (strings trimmed, guidance values
/// parsed as floats) and de-duplicated keeping the first occurrence. The
/// list is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub kind: AxisKind,
    values: Vec<AxisValue>,
}

impl AxisSpec {
    pub fn new<I, V>(kind: AxisKind, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<AxisValue>,
    {
        let mut normalized: Vec<AxisValue> = Vec::new();
        for value in values {
            let value: AxisValue = value.into();
            let value = match (kind.is_numeric(), value) {
                (true, v) => {
                    let n = v.as_number()?;
                    if !n.is_finite() {
                        return Err(XyPlotError::Validation(format!(
                            "Guidance scale must be finite, got {}",
                            n
                        )));
                    }
                    AxisValue::Number(n)
                }
                (false, AxisValue::Text(s)) => {
                    let trimmed = s.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    AxisValue::Text(trimmed.to_string())
                }
                (false, n @ AxisValue::Number(_)) => AxisValue::Text(n.to_string()),
            };
            if normalized.contains(&value) {
                tracing::debug!(axis = %kind, value = %value, "Dropping duplicate axis value");
                continue;
            }
            normalized.push(value);
        }

        if normalized.is_empty() {
            return Err(XyPlotError::Validation(format!(
                "Select at least one value for the {} axis",
                kind.label()
            )));
        }

        Ok(Self {
            kind,
            values: normalized,
        })
    }

    /// Axis over sampler names.
    pub fn samplers<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(AxisKind::Samplers, names.into_iter().map(|s| AxisValue::Text(s.into())))
    }

    /// Axis over scheduler names.
    pub fn schedulers<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(AxisKind::Schedulers, names.into_iter().map(|s| AxisValue::Text(s.into())))
    }

    /// Axis over guidance scales.
    pub fn guidance<I>(scales: I) -> Result<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        Self::new(AxisKind::GuidanceScale, scales)
    }

    pub fn values(&self) -> &[AxisValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Caller-supplied generation parameters for every cell of a sweep.
///
/// Fields bound to an axis are overridden per cell; the rest are used as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseParameters {
    pub prompt: String,
    pub seed: i64,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub sampler: String,
    pub scheduler: String,
    pub guidance: f64,
}

impl BaseParameters {
    /// Defaults match the stock txt2img graph: 512x768, 25 steps,
    /// dpmpp_2m/karras, guidance 7.5, random seed.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            seed: -1,
            width: 512,
            height: 768,
            steps: 25,
            sampler: "dpmpp_2m".to_string(),
            scheduler: "karras".to_string(),
            guidance: 7.5,
        }
    }

    /// Set a specific seed. Use -1 (the default) for one random seed per sweep.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = sampler.into();
        self
    }

    pub fn scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = scheduler.into();
        self
    }

    pub fn guidance(mut self, guidance: f64) -> Self {
        self.guidance = guidance;
        self
    }

    /// Reject parameters that cannot produce a generation.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(XyPlotError::Validation("Prompt must not be empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(XyPlotError::Validation(format!(
                "Image size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.steps == 0 {
            return Err(XyPlotError::Validation("Steps must be at least 1".into()));
        }
        Ok(())
    }
}

/// Fully resolved parameters for one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellParameters {
    pub prompt: String,
    pub seed: i64,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub sampler: String,
    pub scheduler: String,
    pub guidance: f64,
}

impl CellParameters {
    fn from_defaults(defaults: &BaseParameters) -> Self {
        Self {
            prompt: defaults.prompt.clone(),
            seed: defaults.seed,
            width: defaults.width,
            height: defaults.height,
            steps: defaults.steps,
            sampler: defaults.sampler.clone(),
            scheduler: defaults.scheduler.clone(),
            guidance: defaults.guidance,
        }
    }

    /// Overwrite the field selected by `kind` with `value`.
    fn bind(&mut self, kind: AxisKind, value: &AxisValue) -> Result<()> {
        match kind {
            AxisKind::Samplers => self.sampler = value.to_string(),
            AxisKind::Schedulers => self.scheduler = value.to_string(),
            AxisKind::GuidanceScale => self.guidance = value.as_number()?,
        }
        Ok(())
    }
}

/// Ordered value list for `kind`, picked from the per-family lists.
pub fn values_for(
    kind: AxisKind,
    samplers: &[String],
    schedulers: &[String],
    guidance: &[f64],
) -> Vec<AxisValue> {
    match kind {
        AxisKind::Samplers => samplers.iter().cloned().map(AxisValue::Text).collect(),
        AxisKind::Schedulers => schedulers.iter().cloned().map(AxisValue::Text).collect(),
        AxisKind::GuidanceScale => guidance.iter().copied().map(AxisValue::Number).collect(),
    }
}

/// Like [`values_for`], keyed by an untrusted axis name.
pub fn values_for_name(
    name: &str,
    samplers: &[String],
    schedulers: &[String],
    guidance: &[f64],
) -> Result<Vec<AxisValue>> {
    let kind = AxisKind::parse(name)?;
    Ok(values_for(kind, samplers, schedulers, guidance))
}

/// Merge a cell's two axis values into `defaults`.
///
/// The x value is applied first and the y value second, so when both axes
/// are bound to the same family the y value wins.
pub fn resolve_cell_parameters(
    x_kind: AxisKind,
    y_kind: AxisKind,
    x_value: &AxisValue,
    y_value: &AxisValue,
    defaults: &BaseParameters,
) -> Result<CellParameters> {
    let mut params = CellParameters::from_defaults(defaults);
    params.bind(x_kind, x_value)?;
    params.bind(y_kind, y_value)?;
    Ok(params)
}

/// A grid coordinate: index into the x values and the y values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepPoint {
    pub x: usize,
    pub y: usize,
}

impl SweepPoint {
    /// Every point of an `x_len` × `y_len` grid, x in the outer loop.
    pub fn grid(x_len: usize, y_len: usize) -> impl Iterator<Item = SweepPoint> {
        (0..x_len).flat_map(move |x| (0..y_len).map(move |y| SweepPoint { x, y }))
    }
}

/// Join key tying a collected image to its grid position.
pub fn composite_label(x_value: &AxisValue, y_value: &AxisValue) -> String {
    format!("{}-{}", x_value, y_value)
}

/// Composite labels shared by more than one grid point.
///
/// Values containing `-` can make distinct cells render to the same key,
/// in which case the compositor places the first matching image at every
/// colliding position.
pub fn label_collisions(
    x_values: &[AxisValue],
    y_values: &[AxisValue],
) -> Vec<(String, Vec<SweepPoint>)> {
    let mut order: Vec<String> = Vec::new();
    let mut points: HashMap<String, Vec<SweepPoint>> = HashMap::new();
    for point in SweepPoint::grid(x_values.len(), y_values.len()) {
        let label = composite_label(&x_values[point.x], &y_values[point.y]);
        let entry = points.entry(label.clone()).or_default();
        if entry.is_empty() {
            order.push(label);
        }
        entry.push(point);
    }

    order
        .into_iter()
        .filter_map(|label| {
            let pts = points.remove(&label)?;
            (pts.len() > 1).then_some((label, pts))
        })
        .collect()
}

/// Parse a comma-separated list of guidance scales ("1.0, 3.5, 7").
pub fn parse_guidance_list(text: &str) -> Result<Vec<f64>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| {
                    XyPlotError::Validation(format!("Guidance scale '{}' is not a number", s))
                })
        })
        .collect()
}

/// Parse a comma-separated list of sampler or scheduler names.
pub fn parse_name_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> BaseParameters {
        BaseParameters::new("a lighthouse at dusk")
            .seed(42)
            .sampler("euler")
            .scheduler("normal")
            .guidance(3.5)
    }

    #[test]
    fn test_axis_kind_parse_variants() {
        assert_eq!(AxisKind::parse("Samplers").unwrap(), AxisKind::Samplers);
        assert_eq!(AxisKind::parse("scheduler").unwrap(), AxisKind::Schedulers);
        assert_eq!(AxisKind::parse("Guidance Scale").unwrap(), AxisKind::GuidanceScale);
        assert_eq!(AxisKind::parse("guidance_scale").unwrap(), AxisKind::GuidanceScale);
        assert_eq!("cfg".parse::<AxisKind>().unwrap(), AxisKind::GuidanceScale);
    }

    #[test]
    fn test_axis_kind_parse_rejects_unknown() {
        match AxisKind::parse("Checkpoints") {
            Err(XyPlotError::InvalidAxisKind(name)) => assert_eq!(name, "Checkpoints"),
            other => panic!("Expected InvalidAxisKind, got {:?}", other),
        }
        assert!(values_for_name("steps", &[], &[], &[]).is_err());
    }

    #[test]
    fn test_values_for_picks_family() {
        let samplers = vec!["euler".to_string(), "heun".to_string()];
        let schedulers = vec!["karras".to_string()];
        let guidance = vec![1.0, 7.5];

        let v = values_for(AxisKind::Samplers, &samplers, &schedulers, &guidance);
        assert_eq!(v, vec![AxisValue::from("euler"), AxisValue::from("heun")]);

        let v = values_for_name("Guidance Scale", &samplers, &schedulers, &guidance).unwrap();
        assert_eq!(v, vec![AxisValue::Number(1.0), AxisValue::Number(7.5)]);
    }

    #[test]
    fn test_number_display_keeps_decimal() {
        assert_eq!(AxisValue::Number(7.0).to_string(), "7.0");
        assert_eq!(AxisValue::Number(3.5).to_string(), "3.5");
        assert_eq!(AxisValue::Number(10.0).to_string(), "10.0");
        assert_eq!(AxisValue::Number(0.25).to_string(), "0.25");
    }

    #[test]
    fn test_axis_spec_normalizes_and_dedupes() {
        let axis = AxisSpec::samplers(vec![" euler ", "heun", "euler", ""]).unwrap();
        assert_eq!(axis.values(), &[AxisValue::from("euler"), AxisValue::from("heun")]);

        let axis = AxisSpec::new(AxisKind::GuidanceScale, vec![" 7 ", "7.0", "3.5"]).unwrap();
        assert_eq!(axis.values(), &[AxisValue::Number(7.0), AxisValue::Number(3.5)]);
    }

    #[test]
    fn test_axis_spec_rejects_empty() {
        let result = AxisSpec::schedulers(Vec::<String>::new());
        match result {
            Err(XyPlotError::Validation(msg)) => assert!(msg.contains("Schedulers")),
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_axis_spec_rejects_non_numeric_guidance() {
        let result = AxisSpec::new(AxisKind::GuidanceScale, vec!["7.0", "high"]);
        assert!(matches!(result, Err(XyPlotError::Validation(_))));
    }

    #[test]
    fn test_resolve_overrides_bound_fields_only() {
        let params = resolve_cell_parameters(
            AxisKind::Samplers,
            AxisKind::Schedulers,
            &AxisValue::from("dpmpp_2m"),
            &AxisValue::from("karras"),
            &defaults(),
        )
        .unwrap();

        assert_eq!(params.sampler, "dpmpp_2m");
        assert_eq!(params.scheduler, "karras");
        assert_eq!(params.guidance, 3.5);
        assert_eq!(params.seed, 42);
        assert_eq!(params.prompt, "a lighthouse at dusk");
    }

    #[test]
    fn test_same_family_y_value_wins() {
        let params = resolve_cell_parameters(
            AxisKind::Samplers,
            AxisKind::Samplers,
            &AxisValue::from("euler"),
            &AxisValue::from("heun"),
            &defaults(),
        )
        .unwrap();
        assert_eq!(params.sampler, "heun");
        assert_eq!(params.scheduler, "normal");
    }

    #[test]
    fn test_guidance_sweep_differs_only_in_guidance() {
        let scales = parse_guidance_list("1.0, 3.5, 7.0, 10.0").unwrap();
        assert_eq!(scales, vec![1.0, 3.5, 7.0, 10.0]);

        let x = AxisSpec::guidance(scales).unwrap();
        let y = AxisSpec::schedulers(vec!["normal"]).unwrap();
        let base = defaults();

        let cells: Vec<CellParameters> = SweepPoint::grid(x.len(), y.len())
            .map(|p| {
                resolve_cell_parameters(x.kind, y.kind, &x.values()[p.x], &y.values()[p.y], &base)
                    .unwrap()
            })
            .collect();

        assert_eq!(cells.len(), 4);
        let guidance: Vec<f64> = cells.iter().map(|c| c.guidance).collect();
        assert_eq!(guidance, vec![1.0, 3.5, 7.0, 10.0]);
        for cell in &cells {
            let mut normalized = cell.clone();
            normalized.guidance = cells[0].guidance;
            assert_eq!(normalized, cells[0]);
        }
    }

    #[test]
    fn test_parse_guidance_list_rejects_text() {
        match parse_guidance_list("1.0, lots") {
            Err(XyPlotError::Validation(msg)) => assert!(msg.contains("lots")),
            other => panic!("Expected Validation, got {:?}", other),
        }
        assert!(parse_guidance_list("1.0, NaN").is_err());
        assert!(parse_guidance_list(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_name_list() {
        assert_eq!(parse_name_list("euler, heun ,,lms"), vec!["euler", "heun", "lms"]);
    }

    #[test]
    fn test_grid_iterates_x_outer() {
        let points: Vec<(usize, usize)> = SweepPoint::grid(2, 3).map(|p| (p.x, p.y)).collect();
        assert_eq!(points, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
        assert_eq!(SweepPoint::grid(0, 3).count(), 0);
    }

    #[test]
    fn test_composite_label() {
        let label = composite_label(&AxisValue::from("euler"), &AxisValue::Number(7.0));
        assert_eq!(label, "euler-7.0");
    }

    #[test]
    fn test_label_collisions_with_separator_in_values() {
        let x = vec![AxisValue::from("a-b"), AxisValue::from("a")];
        let y = vec![AxisValue::from("c"), AxisValue::from("b-c")];
        let collisions = label_collisions(&x, &y);
        assert_eq!(collisions.len(), 1);
        let (label, points) = &collisions[0];
        assert_eq!(label, "a-b-c");
        assert_eq!(points, &vec![SweepPoint { x: 0, y: 0 }, SweepPoint { x: 1, y: 1 }]);
    }

    #[test]
    fn test_no_collisions_for_stock_names() {
        let x: Vec<AxisValue> = KNOWN_SAMPLERS.iter().map(|s| AxisValue::from(*s)).collect();
        let y: Vec<AxisValue> = KNOWN_SCHEDULERS.iter().map(|s| AxisValue::from(*s)).collect();
        assert!(label_collisions(&x, &y).is_empty());
    }

    #[test]
    fn test_base_parameters_validate() {
        assert!(defaults().validate().is_ok());
        assert!(BaseParameters::new("  ").validate().is_err());
        assert!(defaults().size(0, 512).validate().is_err());
        assert!(defaults().steps(0).validate().is_err());
    }
}
