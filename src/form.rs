use serde::{Deserialize, Serialize};

use crate::axis::{parse_guidance_list, values_for, AxisKind, AxisSpec, BaseParameters};
use crate::error::{Result, XyPlotError};
use crate::sweep::SweepRequest;

const MISSING_FIELDS: &str =
    "Please fill all fields and select at least one value for each axis.";
const NOT_INTEGERS: &str = "Seed, width, height, and steps must be integers.";

/// Raw inputs as a UI collects them, before any parsing.
///
/// Sampler and scheduler selections are lists of names; guidance scales
/// are free text (`"1.0, 3.5, 7"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepForm {
    pub prompt: String,
    pub seed: String,
    pub width: String,
    pub height: String,
    pub steps: String,
    pub x_axis: String,
    pub y_axis: String,
    pub samplers: Vec<String>,
    pub schedulers: Vec<String>,
    pub guidance: String,
}

impl SweepForm {
    /// Validate the form and turn it into a [`SweepRequest`].
    ///
    /// `defaults` supplies the sampler, scheduler and guidance used by
    /// cells whose axes do not bind them.
    pub fn into_request(&self, defaults: &BaseParameters) -> Result<SweepRequest> {
        let required = [
            &self.prompt,
            &self.seed,
            &self.width,
            &self.height,
            &self.steps,
            &self.x_axis,
            &self.y_axis,
        ];
        if required.iter().any(|field| field.trim().is_empty()) {
            return Err(XyPlotError::Validation(MISSING_FIELDS.into()));
        }

        let x_kind = AxisKind::parse(&self.x_axis)?;
        let y_kind = AxisKind::parse(&self.y_axis)?;

        let (seed, width, height, steps) = self.numbers()?;

        let guidance = if x_kind == AxisKind::GuidanceScale || y_kind == AxisKind::GuidanceScale {
            parse_guidance_list(&self.guidance)?
        } else {
            Vec::new()
        };

        let x_axis = self.axis(x_kind, &guidance)?;
        let y_axis = self.axis(y_kind, &guidance)?;

        let base = BaseParameters {
            prompt: self.prompt.trim().to_string(),
            seed,
            width,
            height,
            steps,
            ..defaults.clone()
        };
        Ok(SweepRequest::new(x_axis, y_axis, base))
    }

    fn numbers(&self) -> Result<(i64, u32, u32, u32)> {
        let parsed = (|| {
            Some((
                self.seed.trim().parse::<i64>().ok()?,
                self.width.trim().parse::<u32>().ok()?,
                self.height.trim().parse::<u32>().ok()?,
                self.steps.trim().parse::<u32>().ok()?,
            ))
        })();
        parsed.ok_or_else(|| XyPlotError::Validation(NOT_INTEGERS.into()))
    }

    fn axis(&self, kind: AxisKind, guidance: &[f64]) -> Result<AxisSpec> {
        let values = values_for(kind, &self.samplers, &self.schedulers, guidance);
        // Selections can be all blanks, which normalize away to nothing.
        AxisSpec::new(kind, values)
            .map_err(|_| XyPlotError::Validation(MISSING_FIELDS.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::AxisValue;

    fn form() -> SweepForm {
        SweepForm {
            prompt: "a red fox in snow".into(),
            seed: "1234".into(),
            width: "832".into(),
            height: "1216".into(),
            steps: "20".into(),
            x_axis: "Samplers".into(),
            y_axis: "Schedulers".into(),
            samplers: vec!["euler".into(), "dpmpp_2m".into()],
            schedulers: vec!["normal".into(), "karras".into(), "simple".into()],
            guidance: String::new(),
        }
    }

    #[test]
    fn test_into_request() {
        let defaults = BaseParameters::new("ignored").guidance(3.5);
        let req = form().into_request(&defaults).unwrap();

        assert_eq!(req.x_axis.kind, AxisKind::Samplers);
        assert_eq!(req.x_axis.len(), 2);
        assert_eq!(req.y_axis.kind, AxisKind::Schedulers);
        assert_eq!(req.y_axis.len(), 3);
        assert_eq!(req.base.prompt, "a red fox in snow");
        assert_eq!(req.base.seed, 1234);
        assert_eq!((req.base.width, req.base.height), (832, 1216));
        assert_eq!(req.base.steps, 20);
        assert_eq!(req.base.guidance, 3.5);
    }

    #[test]
    fn test_guidance_axis_parses_text() {
        let mut f = form();
        f.y_axis = "Guidance Scale".into();
        f.guidance = "1.0, 3.5, 7.0, 10.0".into();
        let req = f.into_request(&BaseParameters::new("")).unwrap();
        assert_eq!(
            req.y_axis.values(),
            &[
                AxisValue::Number(1.0),
                AxisValue::Number(3.5),
                AxisValue::Number(7.0),
                AxisValue::Number(10.0),
            ]
        );
    }

    #[test]
    fn test_unused_guidance_text_is_ignored() {
        let mut f = form();
        f.guidance = "not numbers".into();
        assert!(f.into_request(&BaseParameters::new("")).is_ok());
    }

    #[test]
    fn test_missing_field() {
        let mut f = form();
        f.steps = "  ".into();
        match f.into_request(&BaseParameters::new("")) {
            Err(XyPlotError::Validation(msg)) => assert_eq!(msg, MISSING_FIELDS),
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_selection() {
        let mut f = form();
        f.schedulers.clear();
        match f.into_request(&BaseParameters::new("")) {
            Err(XyPlotError::Validation(msg)) => assert_eq!(msg, MISSING_FIELDS),
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_fields() {
        let mut f = form();
        f.width = "832.5".into();
        match f.into_request(&BaseParameters::new("")) {
            Err(XyPlotError::Validation(msg)) => assert_eq!(msg, NOT_INTEGERS),
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_axis() {
        let mut f = form();
        f.x_axis = "Steps".into();
        assert!(matches!(
            f.into_request(&BaseParameters::new("")),
            Err(XyPlotError::InvalidAxisKind(_))
        ));
    }

    #[test]
    fn test_deserialize_partial_form() {
        let f: SweepForm = serde_json::from_str(r#"{"prompt": "cat", "x_axis": "Samplers"}"#).unwrap();
        assert_eq!(f.prompt, "cat");
        assert!(f.samplers.is_empty());
    }
}
