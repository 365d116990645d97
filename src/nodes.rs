//! RAW loader nodes
//!
//! Two nodes expose the RAW pipeline to the graph editor:
//!
//! 1. `Load Raw Image` - essential settings only
//! 2. `Load Raw Image Advanced` - every development parameter
//!
//! Both emit three images: the developed RAW, the embedded full-size
//! preview recovered by LibRaw, and the small EXIF thumbnail pulled out by
//! ExifTool.
//!
//! ## Example
//!
//! ```rust,no_run
//! use raw_nodes::host::InputDirectory;
//! use raw_nodes::nodes::NodeRegistry;
//! use serde_json::json;
//!
//! # fn example() -> raw_nodes::Result<()> {
//! let registry = NodeRegistry::new(InputDirectory::new("/data/input"));
//! let output = registry.execute("Load Raw Image", &json!({"image": "IMG_0001.CR2"}))?;
//! println!("Developed: {:?}", output.image.shape());
//! # Ok(())
//! # }
//! ```

use crate::error::{RawError, Result};
use crate::host::FileResolver;
use crate::libraw::LibRaw;
use crate::options::{
    ColorSpace, DemosaicAlgorithm, FbddNoiseReduction, HighlightMode, OptionTable, Orientation,
};
use crate::raw::{RawBackend, RawDecodeRequest, RawProcessor};
use crate::tensor::{self, ImageTensor};
use crate::thumbnail::{ExifTool, ThumbnailTag};
use crate::validation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const CATEGORY: &str = "image/raw";

/// Node description consumed by the host's registration mechanism
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSchema {
    pub node_id: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl NodeSchema {
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: InputKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

/// Input widget types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputKind {
    /// File picker
    File { options: Vec<String> },
    Combo { options: Vec<String>, default: String },
    Boolean { default: bool },
    Float { default: f64, min: f64, max: f64, step: f64 },
    Int { default: i64, min: i64, max: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl OutputSpec {
    fn image(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "IMAGE".to_string(),
        }
    }
}

fn input(name: &str, kind: InputKind, tooltip: &str) -> InputSpec {
    InputSpec {
        name: name.to_string(),
        kind,
        tooltip: if tooltip.is_empty() { None } else { Some(tooltip.to_string()) },
    }
}

fn combo(options: Vec<&str>, default: &str) -> InputKind {
    InputKind::Combo {
        options: options.into_iter().map(String::from).collect(),
        default: default.to_string(),
    }
}

fn float(default: f64, min: f64, max: f64, step: f64) -> InputKind {
    InputKind::Float { default, min, max, step }
}

/// Images produced by one node execution
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub image: ImageTensor,
    pub preview: ImageTensor,
    pub thumbnail: ImageTensor,
}

/// Everything a node needs from the outside world
pub struct NodeContext<B: RawBackend = LibRaw> {
    pub processor: RawProcessor<B>,
    pub exiftool: ExifTool,
    pub files: Box<dyn FileResolver>,
}

impl<B: RawBackend> NodeContext<B> {
    /// Develop, then attach the ExifTool thumbnail or the black sentinel
    fn load(&self, request: RawDecodeRequest) -> Result<NodeOutput> {
        let start = Instant::now();
        let decoded = self
            .processor
            .decode(&request)
            .map_err(|e| RawError::LoadFailed(e.to_string()))?;

        let thumbnail = self.thumbnail(&request.path);

        info!(
            "Loaded {} in {}ms: image {:?}, preview {:?}, thumbnail {:?}",
            request.path.display(),
            start.elapsed().as_millis(),
            decoded.image.shape(),
            decoded.preview.shape(),
            thumbnail.shape()
        );

        Ok(NodeOutput {
            image: decoded.image,
            preview: decoded.preview,
            thumbnail,
        })
    }

    fn thumbnail(&self, path: &Path) -> ImageTensor {
        if !self.exiftool.available() {
            warn!("exiftool not available, thumbnail output will be empty");
            return tensor::black_pixel();
        }

        self.exiftool
            .extract_image(path, ThumbnailTag::ThumbnailImage)
            .unwrap_or_else(tensor::black_pixel)
    }
}

/// A node the host can register and execute
pub trait RawNode<B: RawBackend> {
    fn node_id(&self) -> &'static str;

    fn schema(&self, files: &[String]) -> NodeSchema;

    fn execute(&self, ctx: &NodeContext<B>, inputs: &Value) -> Result<NodeOutput>;

    /// Content digest of the selected file, used by the host to skip re-execution
    fn fingerprint(&self, ctx: &NodeContext<B>, inputs: &Value) -> Result<String> {
        let image = inputs["image"]
            .as_str()
            .ok_or_else(|| RawError::InvalidInput("Missing image".to_string()))?;
        sha256_file(&ctx.files.resolve(image))
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn parse_inputs<T: for<'de> Deserialize<'de>>(inputs: &Value) -> Result<T> {
    serde_json::from_value(inputs.clone()).map_err(|e| RawError::InvalidInput(e.to_string()))
}

// ============================================================================
// Load Raw Image (Simple)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimpleInputs {
    pub image: String,
    pub output_16bit: bool,
    pub white_balance: String,
    pub highlight_mode: String,
}

impl Default for SimpleInputs {
    fn default() -> Self {
        Self {
            image: String::new(),
            output_16bit: true,
            white_balance: "camera".to_string(),
            highlight_mode: "clip".to_string(),
        }
    }
}

impl SimpleInputs {
    pub fn to_request(&self, files: &dyn FileResolver) -> RawDecodeRequest {
        RawDecodeRequest {
            output_16bit: self.output_16bit,
            white_balance: self.white_balance.clone(),
            highlight_mode: self.highlight_mode.clone(),
            ..RawDecodeRequest::new(files.resolve(&self.image))
        }
    }
}

/// Load a RAW image with essential settings
pub struct LoadRawImage;

impl<B: RawBackend> RawNode<B> for LoadRawImage {
    fn node_id(&self) -> &'static str {
        "Load Raw Image"
    }

    fn schema(&self, files: &[String]) -> NodeSchema {
        NodeSchema {
            node_id: "Load Raw Image".to_string(),
            display_name: "Load RAW Image (Simple)".to_string(),
            category: CATEGORY.to_string(),
            description: "Load a RAW image with essential settings. Outputs the developed image, \
                          full-res preview (from LibRaw), and small thumbnail (via ExifTool)."
                .to_string(),
            inputs: vec![
                input("image", InputKind::File { options: files.to_vec() }, ""),
                input(
                    "output_16bit",
                    InputKind::Boolean { default: true },
                    "Keep the full dynamic range of the RAW file. Disable for 8-bit output.",
                ),
                input(
                    "white_balance",
                    combo(vec!["camera", "auto", "daylight"], "camera"),
                    "Camera: as shot. Auto: computed from the image. Daylight: ~5500K preset.",
                ),
                input(
                    "highlight_mode",
                    combo(HighlightMode::keys(), "clip"),
                    "How to handle blown-out highlights.",
                ),
            ],
            outputs: vec![
                OutputSpec::image("image"),
                OutputSpec::image("preview"),
                OutputSpec::image("thumbnail"),
            ],
        }
    }

    fn execute(&self, ctx: &NodeContext<B>, inputs: &Value) -> Result<NodeOutput> {
        let inputs: SimpleInputs = parse_inputs(inputs)?;
        ctx.load(inputs.to_request(ctx.files.as_ref()))
    }
}

// ============================================================================
// Load Raw Image (Advanced)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvancedInputs {
    pub image: String,
    pub output_16bit: bool,
    pub white_balance: String,
    pub custom_wb_r: f32,
    pub custom_wb_g1: f32,
    pub custom_wb_b: f32,
    pub custom_wb_g2: f32,
    pub highlight_mode: String,
    pub use_auto_bright: bool,
    pub bright_adjustment: f32,
    pub demosaic_algorithm: String,
    pub orientation: String,
    pub ca_red_scale: f32,
    pub ca_blue_scale: f32,
    pub output_colorspace: String,
    pub gamma_power: f32,
    pub gamma_slope: f32,
    pub exp_shift: f32,
    pub exp_preserve_highlights: f32,
    pub noise_thr: f32,
    pub fbdd_noise_reduction: String,
    pub median_filter_passes: u8,
    pub half_size: bool,
}

impl Default for AdvancedInputs {
    fn default() -> Self {
        Self {
            image: String::new(),
            output_16bit: true,
            white_balance: "camera".to_string(),
            custom_wb_r: 1.0,
            custom_wb_g1: 1.0,
            custom_wb_b: 1.0,
            custom_wb_g2: 1.0,
            highlight_mode: "clip".to_string(),
            use_auto_bright: true,
            bright_adjustment: 1.0,
            demosaic_algorithm: "AHD".to_string(),
            orientation: "auto".to_string(),
            ca_red_scale: 1.0,
            ca_blue_scale: 1.0,
            output_colorspace: "sRGB".to_string(),
            gamma_power: 2.222,
            gamma_slope: 4.5,
            exp_shift: 1.0,
            exp_preserve_highlights: 0.0,
            noise_thr: 0.0,
            fbdd_noise_reduction: "off".to_string(),
            median_filter_passes: 0,
            half_size: false,
        }
    }
}

impl AdvancedInputs {
    pub fn to_request(&self, files: &dyn FileResolver) -> RawDecodeRequest {
        RawDecodeRequest {
            path: files.resolve(&self.image),
            output_16bit: self.output_16bit,
            white_balance: self.white_balance.clone(),
            custom_wb: [self.custom_wb_r, self.custom_wb_g1, self.custom_wb_b, self.custom_wb_g2],
            demosaic: self.demosaic_algorithm.clone(),
            orientation: self.orientation.clone(),
            use_auto_bright: self.use_auto_bright,
            bright: self.bright_adjustment,
            highlight_mode: self.highlight_mode.clone(),
            colorspace: self.output_colorspace.clone(),
            gamma: (self.gamma_power, self.gamma_slope),
            exp_shift: self.exp_shift,
            exp_preserve_highlights: self.exp_preserve_highlights,
            chromatic_aberration: (self.ca_red_scale, self.ca_blue_scale),
            noise_thr: if self.noise_thr > 0.0 { Some(self.noise_thr) } else { None },
            fbdd_noise_reduction: self.fbdd_noise_reduction.clone(),
            median_filter_passes: self.median_filter_passes,
            half_size: self.half_size,
        }
    }
}

/// Load a RAW image with control over every development parameter
pub struct LoadRawImageAdvanced;

impl<B: RawBackend> RawNode<B> for LoadRawImageAdvanced {
    fn node_id(&self) -> &'static str {
        "Load Raw Image Advanced"
    }

    fn schema(&self, files: &[String]) -> NodeSchema {
        let wb_multiplier = |channel: &str| {
            format!("{} multiplier (only used when White Balance is 'custom').", channel)
        };

        NodeSchema {
            node_id: "Load Raw Image Advanced".to_string(),
            display_name: "Load RAW Image (Advanced)".to_string(),
            category: CATEGORY.to_string(),
            description: "Load a RAW image with professional control over all development parameters."
                .to_string(),
            inputs: vec![
                // Core
                input(
                    "image",
                    InputKind::File { options: files.to_vec() },
                    "Select a raw file from your input directory (supports subfolders).",
                ),
                input("output_16bit", InputKind::Boolean { default: true }, ""),
                // White balance
                input(
                    "white_balance",
                    combo(vec!["camera", "auto", "daylight", "custom"], "camera"),
                    "Custom uses the manual multipliers below.",
                ),
                input("custom_wb_r", float(1.0, 0.1, 10.0, 0.01), &wb_multiplier("Red")),
                input("custom_wb_g1", float(1.0, 0.1, 10.0, 0.01), &wb_multiplier("Green1")),
                input("custom_wb_b", float(1.0, 0.1, 10.0, 0.01), &wb_multiplier("Blue")),
                input("custom_wb_g2", float(1.0, 0.1, 10.0, 0.01), &wb_multiplier("Green2")),
                // Image characteristics
                input("highlight_mode", combo(HighlightMode::keys(), "clip"), ""),
                input(
                    "use_auto_bright",
                    InputKind::Boolean { default: true },
                    "Automatically stretch exposure to fill the histogram.",
                ),
                input("bright_adjustment", float(1.0, 0.1, 10.0, 0.1), "Brightness multiplier (1.0 = original)."),
                // Optics & demosaicing
                input("demosaic_algorithm", combo(DemosaicAlgorithm::keys(), "AHD"), ""),
                input(
                    "orientation",
                    combo(Orientation::keys(), "auto"),
                    "Auto: use camera metadata. None: raw sensor orientation.",
                ),
                input("ca_red_scale", float(1.0, 0.8, 1.2, 0.001), "Chromatic aberration correction (red scale)."),
                input("ca_blue_scale", float(1.0, 0.8, 1.2, 0.001), "Chromatic aberration correction (blue scale)."),
                // Color science
                input("output_colorspace", combo(ColorSpace::keys(), "sRGB"), ""),
                input("gamma_power", float(2.222, 0.1, 6.0, 0.001), "2.222: standard sRGB. 1.0: linear."),
                input("gamma_slope", float(4.5, 0.0, 20.0, 0.1), "Slope of the linear toe. Standard is 4.5."),
                input("exp_shift", float(1.0, 0.25, 8.0, 0.05), "Exposure push/pull before conversion."),
                input(
                    "exp_preserve_highlights",
                    float(0.0, 0.0, 1.0, 0.05),
                    "How much to protect highlights while shifting exposure.",
                ),
                // Denoising
                input("noise_thr", float(0.0, 0.0, 100.0, 0.1), "Wavelet denoising threshold. 0 = off."),
                input(
                    "fbdd_noise_reduction",
                    combo(FbddNoiseReduction::keys(), "off"),
                    "Impulse noise reduction for dead pixels.",
                ),
                input(
                    "median_filter_passes",
                    InputKind::Int { default: 0, min: 0, max: 10 },
                    "Post-demosaic 3x3 median passes against color moire.",
                ),
                // Performance
                input("half_size", InputKind::Boolean { default: false }, "Develop at half resolution."),
            ],
            outputs: vec![
                OutputSpec::image("image"),
                OutputSpec::image("preview"),
                OutputSpec::image("thumbnail"),
            ],
        }
    }

    fn execute(&self, ctx: &NodeContext<B>, inputs: &Value) -> Result<NodeOutput> {
        let inputs: AdvancedInputs = parse_inputs(inputs)?;
        ctx.load(inputs.to_request(ctx.files.as_ref()))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Dispatches node ids to their implementations
pub struct NodeRegistry<B: RawBackend = LibRaw> {
    ctx: NodeContext<B>,
    nodes: Vec<Box<dyn RawNode<B>>>,
}

impl NodeRegistry<LibRaw> {
    pub fn new(files: impl FileResolver + 'static) -> Self {
        Self::with_context(NodeContext {
            processor: RawProcessor::new(),
            exiftool: ExifTool::from_env(),
            files: Box::new(files),
        })
    }
}

impl<B: RawBackend + 'static> NodeRegistry<B> {
    pub fn with_context(ctx: NodeContext<B>) -> Self {
        Self {
            ctx,
            nodes: vec![Box::new(LoadRawImage), Box::new(LoadRawImageAdvanced)],
        }
    }

    pub fn context(&self) -> &NodeContext<B> {
        &self.ctx
    }

    pub fn node_ids(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.node_id()).collect()
    }

    /// Schemas with the file picker populated from the input directory
    pub fn schemas(&self) -> Vec<NodeSchema> {
        let files = self.ctx.files.list_files();
        self.nodes.iter().map(|n| n.schema(&files)).collect()
    }

    fn node(&self, node_id: &str) -> Result<&dyn RawNode<B>> {
        self.nodes
            .iter()
            .find(|n| n.node_id() == node_id)
            .map(|n| n.as_ref())
            .ok_or_else(|| RawError::UnknownNode(node_id.to_string()))
    }

    pub fn execute(&self, node_id: &str, inputs: &Value) -> Result<NodeOutput> {
        let node = self.node(node_id)?;
        // File options are only listed for the UI, not checked
        validation::validate_inputs(inputs, &node.schema(&[]))?;
        debug!("Executing {} with {}", node_id, inputs);
        node.execute(&self.ctx, inputs)
    }

    pub fn fingerprint(&self, node_id: &str, inputs: &Value) -> Result<String> {
        self.node(node_id)?.fingerprint(&self.ctx, inputs)
    }
}
