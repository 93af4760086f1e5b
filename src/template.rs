//! Job templates: the ComfyUI API-format workflow patched once per cell.
//!
//! A [`Template`] is an opaque keyed document plus a [`TemplateBindings`]
//! table naming which `(node, input)` pairs receive each cell parameter.
//! Everything else in the document is passed through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::axis::{BaseParameters, CellParameters};
use crate::error::{Result, XyPlotError};

/// One writable input of one node, e.g. node `"17"` input `"steps"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeField {
    pub node: String,
    pub input: String,
}

impl NodeField {
    pub fn new(node: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            input: input.into(),
        }
    }
}

/// Where each cell parameter is written in the template document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateBindings {
    pub prompt: NodeField,
    pub seed: NodeField,
    pub width: NodeField,
    pub height: NodeField,
    pub steps: NodeField,
    pub sampler: NodeField,
    pub scheduler: NodeField,
    /// Optional: templates without a guidance node cannot sweep guidance.
    pub guidance: Option<NodeField>,
}

impl TemplateBindings {
    /// Layout of the reference Flux workflow (custom sampler graph).
    pub fn flux() -> Self {
        Self {
            prompt: NodeField::new("28", "string"),
            seed: NodeField::new("25", "noise_seed"),
            width: NodeField::new("5", "width"),
            height: NodeField::new("5", "height"),
            steps: NodeField::new("17", "steps"),
            sampler: NodeField::new("16", "sampler_name"),
            scheduler: NodeField::new("17", "scheduler"),
            guidance: Some(NodeField::new("26", "guidance")),
        }
    }

    /// Layout of the stock txt2img graph built by [`Txt2ImgTemplate`].
    pub fn ksampler() -> Self {
        Self {
            prompt: NodeField::new("3", "text"),
            seed: NodeField::new("5", "seed"),
            width: NodeField::new("2", "width"),
            height: NodeField::new("2", "height"),
            steps: NodeField::new("5", "steps"),
            sampler: NodeField::new("5", "sampler_name"),
            scheduler: NodeField::new("5", "scheduler"),
            guidance: Some(NodeField::new("5", "cfg")),
        }
    }

    /// Replace the guidance binding (`None` disables guidance patching).
    pub fn with_guidance(mut self, field: Option<NodeField>) -> Self {
        self.guidance = field;
        self
    }

    fn required(&self) -> [(&'static str, &NodeField); 7] {
        [
            ("prompt", &self.prompt),
            ("seed", &self.seed),
            ("width", &self.width),
            ("height", &self.height),
            ("steps", &self.steps),
            ("sampler", &self.sampler),
            ("scheduler", &self.scheduler),
        ]
    }
}

impl Default for TemplateBindings {
    fn default() -> Self {
        Self::flux()
    }
}

/// A reusable workflow document, mutated in place for every submitted cell.
#[derive(Debug, Clone)]
pub struct Template {
    document: Value,
    bindings: TemplateBindings,
}

impl Template {
    /// Wrap an in-memory API-format workflow.
    ///
    /// Fails if the document is not a JSON object or a required bound node
    /// has no `inputs` object.
    pub fn from_value(document: Value, bindings: TemplateBindings) -> Result<Self> {
        if !document.is_object() {
            return Err(XyPlotError::Validation(
                "Workflow template must be a JSON object keyed by node id".into(),
            ));
        }
        let template = Self { document, bindings };
        template.validate()?;
        Ok(template)
    }

    /// Load a workflow exported with ComfyUI's "Save (API Format)".
    pub fn load(path: impl AsRef<Path>, bindings: TemplateBindings) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            XyPlotError::Validation(format!(
                "Cannot read workflow template {}: {}",
                path.display(),
                e
            ))
        })?;
        let document: Value = serde_json::from_str(&text)?;
        Self::from_value(document, bindings)
    }

    /// The current document, including the last applied cell's values.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn bindings(&self) -> &TemplateBindings {
        &self.bindings
    }

    /// Whether guidance values can be written into this template.
    pub fn supports_guidance(&self) -> bool {
        self.bindings
            .guidance
            .as_ref()
            .is_some_and(|field| self.inputs(field).is_some())
    }

    fn validate(&self) -> Result<()> {
        for (name, field) in self.bindings.required() {
            if self.inputs(field).is_none() {
                return Err(XyPlotError::Validation(format!(
                    "Workflow template has no node '{}' with inputs for the {} field",
                    field.node, name
                )));
            }
        }
        Ok(())
    }

    /// Write one cell's parameters into the document.
    ///
    /// Guidance is only written when the template defines the guidance node.
    pub fn apply(&mut self, params: &CellParameters) -> Result<()> {
        let bindings = self.bindings.clone();
        self.set(&bindings.prompt, json!(params.prompt))?;
        self.set(&bindings.seed, json!(params.seed))?;
        self.set(&bindings.width, json!(params.width))?;
        self.set(&bindings.height, json!(params.height))?;
        self.set(&bindings.steps, json!(params.steps))?;
        self.set(&bindings.sampler, json!(params.sampler))?;
        self.set(&bindings.scheduler, json!(params.scheduler))?;
        if let Some(field) = bindings.guidance.as_ref() {
            if self.inputs(field).is_some() {
                self.set(field, json!(params.guidance))?;
            }
        }
        Ok(())
    }

    /// Base parameters seeded from the values already in the document.
    ///
    /// Fields the document does not define keep [`BaseParameters::new`]'s
    /// defaults.
    pub fn defaults(&self, prompt: impl Into<String>) -> BaseParameters {
        let mut base = BaseParameters::new(prompt);
        let b = &self.bindings;
        if let Some(v) = self.read_u32(&b.width) {
            base.width = v;
        }
        if let Some(v) = self.read_u32(&b.height) {
            base.height = v;
        }
        if let Some(v) = self.read_u32(&b.steps) {
            base.steps = v;
        }
        if let Some(v) = self.read_str(&b.sampler) {
            base.sampler = v;
        }
        if let Some(v) = self.read_str(&b.scheduler) {
            base.scheduler = v;
        }
        if let Some(v) = b.guidance.as_ref().and_then(|f| self.read(f)).and_then(Value::as_f64) {
            base.guidance = v;
        }
        base
    }

    fn inputs(&self, field: &NodeField) -> Option<&Map<String, Value>> {
        self.document
            .get(&field.node)
            .and_then(|node| node.get("inputs"))
            .and_then(Value::as_object)
    }

    fn read(&self, field: &NodeField) -> Option<&Value> {
        self.inputs(field).and_then(|inputs| inputs.get(&field.input))
    }

    fn read_u32(&self, field: &NodeField) -> Option<u32> {
        self.read(field)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    fn read_str(&self, field: &NodeField) -> Option<String> {
        self.read(field).and_then(Value::as_str).map(String::from)
    }

    fn set(&mut self, field: &NodeField, value: Value) -> Result<()> {
        let inputs = self
            .document
            .get_mut(&field.node)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                XyPlotError::Validation(format!(
                    "Workflow template has no node '{}' with inputs",
                    field.node
                ))
            })?;
        inputs.insert(field.input.clone(), value);
        Ok(())
    }
}

/// Builder for the stock 7-node txt2img graph: CheckpointLoader → CLIP
/// encoders → KSampler → VAEDecode → SaveImage.
///
/// The sweep overwrites prompt, seed, size, steps, sampler, scheduler and
/// cfg per cell; the builder only fixes the checkpoint, negative prompt
/// and output prefix.
///
/// # Example
/// ```
/// use comfyui_xy_plot::Txt2ImgTemplate;
///
/// let template = Txt2ImgTemplate::new("dreamshaper_8.safetensors")
///     .negative("lowres, blurry")
///     .build();
///
/// assert!(template.supports_guidance());
/// assert_eq!(template.document()["1"]["class_type"], "CheckpointLoaderSimple");
/// ```
#[derive(Debug, Clone)]
pub struct Txt2ImgTemplate {
    pub checkpoint: String,
    pub negative_prompt: String,
    pub batch_size: u32,
    pub filename_prefix: String,
}

impl Txt2ImgTemplate {
    pub fn new(checkpoint: impl Into<String>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            negative_prompt: String::new(),
            batch_size: 1,
            filename_prefix: "xy_plot".to_string(),
        }
    }

    /// Set the negative prompt.
    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    /// Set the batch size. Only the first image of a batch lands in the grid.
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the output filename prefix in ComfyUI.
    pub fn filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    /// Build the workflow with placeholder generation values.
    pub fn build(&self) -> Template {
        let base = BaseParameters::new("");
        let document = json!({
            "1": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": self.checkpoint }
            },
            "2": {
                "class_type": "EmptyLatentImage",
                "inputs": {
                    "width": base.width,
                    "height": base.height,
                    "batch_size": self.batch_size
                }
            },
            "3": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": base.prompt, "clip": ["1", 1] }
            },
            "4": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": self.negative_prompt, "clip": ["1", 1] }
            },
            "5": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 0,
                    "steps": base.steps,
                    "cfg": base.guidance,
                    "sampler_name": base.sampler,
                    "scheduler": base.scheduler,
                    "denoise": 1.0,
                    "model": ["1", 0],
                    "positive": ["3", 0],
                    "negative": ["4", 0],
                    "latent_image": ["2", 0]
                }
            },
            "6": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["5", 0], "vae": ["1", 2] }
            },
            "7": {
                "class_type": "SaveImage",
                "inputs": { "filename_prefix": self.filename_prefix, "images": ["6", 0] }
            }
        });

        Template {
            document,
            bindings: TemplateBindings::ksampler(),
        }
    }
}
