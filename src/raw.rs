use crate::error::{RawError, Result};
use crate::libraw::LibRaw;
use crate::options::{
    ColorSpace, DemosaicAlgorithm, FbddNoiseReduction, HighlightMode, OptionTable, Orientation,
    WhiteBalanceMode,
};
use crate::tensor::{self, ImageTensor, PREVIEW_MAX_EDGE};
use image::{Rgb, RgbImage};
use ndarray::{Array3, ArrayD};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration for a single decode, as chosen in the UI
///
/// Enumerated fields hold the option-table keys; they are resolved by
/// [`RawProcessor::resolve`].
#[derive(Debug, Clone)]
pub struct RawDecodeRequest {
    pub path: PathBuf,

    /// 16 bits per sample instead of 8
    pub output_16bit: bool,

    /// "camera", "auto", "daylight" or "custom"
    pub white_balance: String,

    /// [r, g1, b, g2] multipliers, only read when `white_balance` is "custom"
    pub custom_wb: [f32; 4],

    pub demosaic: String,

    /// "auto" keeps the orientation recorded by the camera
    pub orientation: String,

    pub use_auto_bright: bool,
    pub bright: f32,
    pub highlight_mode: String,
    pub colorspace: String,

    /// (power, toe slope), e.g. (2.222, 4.5) for sRGB
    pub gamma: (f32, f32),

    /// Linear exposure shift before conversion (0.25 to 8.0)
    pub exp_shift: f32,

    /// Fraction of highlights protected while shifting exposure (0.0 to 1.0)
    pub exp_preserve_highlights: f32,

    /// (red scale, blue scale)
    pub chromatic_aberration: (f32, f32),

    /// Wavelet denoising threshold; `None` or zero disables denoising
    pub noise_thr: Option<f32>,

    pub fbdd_noise_reduction: String,
    pub median_filter_passes: u8,

    /// Develop at half resolution (2x2 binning)
    pub half_size: bool,
}

impl Default for RawDecodeRequest {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            output_16bit: true,
            white_balance: "camera".to_string(),
            custom_wb: [1.0, 1.0, 1.0, 1.0],
            demosaic: "AHD".to_string(),
            orientation: "auto".to_string(),
            use_auto_bright: true,
            bright: 1.0,
            highlight_mode: "clip".to_string(),
            colorspace: "sRGB".to_string(),
            gamma: (2.222, 4.5),
            exp_shift: 1.0,
            exp_preserve_highlights: 0.0,
            chromatic_aberration: (1.0, 1.0),
            noise_thr: None,
            fbdd_noise_reduction: "off".to_string(),
            median_filter_passes: 0,
            half_size: false,
        }
    }
}

impl RawDecodeRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Library-level arguments for one postprocess call
#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessParams {
    /// 8 or 16
    pub output_bps: u8,
    pub demosaic_algorithm: DemosaicAlgorithm,
    pub half_size: bool,
    /// `None` leaves orientation to the embedded metadata
    pub user_flip: Option<i32>,
    pub output_color: ColorSpace,
    pub use_camera_wb: bool,
    pub use_auto_wb: bool,
    pub user_wb: Option<[f32; 4]>,
    pub no_auto_bright: bool,
    pub bright: f32,
    pub highlight_mode: HighlightMode,
    pub gamma: (f64, f64),
    pub exp_shift: f32,
    pub exp_preserve_highlights: f32,
    pub chromatic_aberration: (f64, f64),
    pub noise_thr: Option<f32>,
    pub fbdd_noise_reduction: FbddNoiseReduction,
    pub median_filter_passes: u8,
}

/// Developed sensor data, `H x W x 3`
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    Eight(Array3<u8>),
    Sixteen(Array3<u16>),
}

impl PixelBuffer {
    pub fn dimensions(&self) -> (usize, usize) {
        let shape = match self {
            PixelBuffer::Eight(a) => a.shape(),
            PixelBuffer::Sixteen(a) => a.shape(),
        };
        (shape[1], shape[0])
    }
}

/// Auxiliary image stored inside the RAW container
#[derive(Debug, Clone)]
pub enum EmbeddedThumb {
    Jpeg(Vec<u8>),
    /// `H x W` or `H x W x C` 8-bit samples
    Bitmap(ArrayD<u8>),
    Unsupported(String),
}

/// Decode library entry point
pub trait RawBackend {
    type Source: RawSource;

    fn open(&self, path: &Path) -> Result<Self::Source>;
}

/// An opened RAW container
pub trait RawSource {
    /// Decode, demosaic and tone-map with the given parameters
    fn postprocess(&mut self, params: &PostprocessParams) -> Result<PixelBuffer>;

    /// Pull the embedded preview out of the container
    fn extract_thumb(&mut self) -> Result<EmbeddedThumb>;
}

/// Primary developed image plus the container's own preview
#[derive(Debug, Clone)]
pub struct DecodedRaw {
    pub image: ImageTensor,
    pub preview: ImageTensor,
}

/// RAW processing adapter
pub struct RawProcessor<B: RawBackend = LibRaw> {
    backend: B,
}

impl RawProcessor<LibRaw> {
    pub fn new() -> Self {
        Self { backend: LibRaw }
    }
}

impl Default for RawProcessor<LibRaw> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RawBackend> RawProcessor<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Map a request onto library arguments
    pub fn resolve(request: &RawDecodeRequest) -> PostprocessParams {
        let mut params = PostprocessParams {
            output_bps: if request.output_16bit { 16 } else { 8 },
            demosaic_algorithm: DemosaicAlgorithm::from_key(&request.demosaic),
            half_size: request.half_size,
            user_flip: Orientation::from_key(&request.orientation).flip(),
            output_color: ColorSpace::from_key(&request.colorspace),
            use_camera_wb: false,
            use_auto_wb: false,
            user_wb: None,
            no_auto_bright: !request.use_auto_bright,
            bright: request.bright,
            highlight_mode: HighlightMode::from_key(&request.highlight_mode),
            gamma: (request.gamma.0 as f64, request.gamma.1 as f64),
            exp_shift: request.exp_shift,
            exp_preserve_highlights: request.exp_preserve_highlights,
            chromatic_aberration: (
                request.chromatic_aberration.0 as f64,
                request.chromatic_aberration.1 as f64,
            ),
            noise_thr: request.noise_thr.filter(|thr| *thr > 0.0),
            fbdd_noise_reduction: FbddNoiseReduction::from_key(&request.fbdd_noise_reduction),
            median_filter_passes: request.median_filter_passes,
        };

        // Exactly one white balance source; daylight leaves LibRaw's default
        match WhiteBalanceMode::from_key(&request.white_balance) {
            WhiteBalanceMode::Camera => params.use_camera_wb = true,
            WhiteBalanceMode::Auto => params.use_auto_wb = true,
            WhiteBalanceMode::Custom => params.user_wb = Some(request.custom_wb),
            WhiteBalanceMode::Daylight => {}
        }

        params
    }

    /// Develop the RAW file and recover its embedded preview.
    ///
    /// Decode failures are fatal; preview failures degrade to a 1x1 black
    /// pixel.
    pub fn decode(&self, request: &RawDecodeRequest) -> Result<DecodedRaw> {
        let params = Self::resolve(request);
        debug!("Resolved postprocess parameters for {}: {:?}", request.path.display(), params);

        let decode_error = |e: RawError| RawError::Decode {
            path: request.path.clone(),
            message: e.to_string(),
        };

        let mut source = self.backend.open(&request.path).map_err(decode_error)?;
        let pixels = source.postprocess(&params).map_err(decode_error)?;
        let thumb = source.extract_thumb();

        let (width, height) = pixels.dimensions();
        debug!("Developed {}x{} at {} bits", width, height, params.output_bps);

        let divisor = if request.output_16bit { 65535.0 } else { 255.0 };
        let image = match &pixels {
            PixelBuffer::Eight(a) => tensor::normalize(a, divisor),
            PixelBuffer::Sixteen(a) => tensor::normalize(a, divisor),
        };

        let preview = match thumb {
            Ok(thumb) => preview_tensor(thumb).unwrap_or_else(|e| {
                warn!("Embedded preview unusable in {}: {}", request.path.display(), e);
                tensor::black_pixel()
            }),
            Err(e) => {
                warn!("No embedded preview in {}: {}", request.path.display(), e);
                tensor::black_pixel()
            }
        };

        Ok(DecodedRaw { image, preview })
    }
}

/// Shape an embedded preview into the tensor convention, capping its long edge
pub fn preview_tensor(thumb: EmbeddedThumb) -> Result<ImageTensor> {
    let rgb = match thumb {
        EmbeddedThumb::Jpeg(bytes) => tensor::decode_jpeg(&bytes)?,
        EmbeddedThumb::Bitmap(data) => bitmap_to_rgb(&data)?,
        EmbeddedThumb::Unsupported(kind) => return Err(RawError::UnsupportedThumbnail(kind)),
    };

    let rgb = tensor::fit_long_edge(rgb, PREVIEW_MAX_EDGE)?;
    Ok(tensor::rgb8_to_tensor(&rgb))
}

/// Single-channel bitmaps are replicated across RGB
fn bitmap_to_rgb(data: &ArrayD<u8>) -> Result<RgbImage> {
    let shape = data.shape();
    let (height, width, channels) = match *shape {
        [h, w] => (h, w, 1),
        [h, w, c] if c == 1 || c == 3 => (h, w, c),
        _ => {
            return Err(RawError::UnsupportedThumbnail(format!(
                "bitmap with shape {:?}",
                shape
            )))
        }
    };

    let sample = |y: usize, x: usize, c: usize| -> u8 {
        if shape.len() == 2 {
            data[[y, x].as_slice()]
        } else {
            data[[y, x, c.min(channels - 1)].as_slice()]
        }
    };

    Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([sample(y, x, 0), sample(y, x, 1), sample(y, x, 2)])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use ndarray::IxDyn;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct FakeBackend {
        pixels: PixelBuffer,
        thumb: Option<EmbeddedThumb>,
        fail_open: bool,
        fail_postprocess: bool,
        calls: Arc<Mutex<Vec<PostprocessParams>>>,
    }

    impl FakeBackend {
        fn new(pixels: PixelBuffer) -> Self {
            Self {
                pixels,
                thumb: None,
                fail_open: false,
                fail_postprocess: false,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn with_thumb(mut self, thumb: EmbeddedThumb) -> Self {
            self.thumb = Some(thumb);
            self
        }

        fn last_params(&self) -> PostprocessParams {
            self.calls.lock().unwrap().last().cloned().expect("postprocess was not called")
        }
    }

    struct FakeSource(FakeBackend);

    impl RawBackend for FakeBackend {
        type Source = FakeSource;

        fn open(&self, _path: &Path) -> Result<FakeSource> {
            if self.fail_open {
                return Err(RawError::Library {
                    code: -2,
                    message: "Unsupported file format or not RAW file".to_string(),
                });
            }
            Ok(FakeSource(self.clone()))
        }
    }

    impl RawSource for FakeSource {
        fn postprocess(&mut self, params: &PostprocessParams) -> Result<PixelBuffer> {
            self.0.calls.lock().unwrap().push(params.clone());
            if self.0.fail_postprocess {
                return Err(RawError::Library {
                    code: -100_009,
                    message: "Cannot allocate memory".to_string(),
                });
            }
            Ok(self.0.pixels.clone())
        }

        fn extract_thumb(&mut self) -> Result<EmbeddedThumb> {
            self.0.thumb.clone().ok_or_else(|| RawError::Library {
                code: -9,
                message: "No thumbnail in file".to_string(),
            })
        }
    }

    fn noise8() -> PixelBuffer {
        PixelBuffer::Eight(Array3::from_shape_fn((100, 100, 3), |(y, x, c)| ((y * 7 + x * 3 + c) % 256) as u8))
    }

    fn decode_with(backend: &FakeBackend, request: RawDecodeRequest) -> DecodedRaw {
        RawProcessor::with_backend(backend.clone()).decode(&request).unwrap()
    }

    fn max(t: &ImageTensor) -> f32 {
        t.fold(f32::MIN, |m, &v| m.max(v))
    }

    fn red_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([255, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_returns_batched_shape() {
        let backend = FakeBackend::new(noise8());
        let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
        assert_eq!(decoded.image.shape(), &[1, 100, 100, 3]);
        assert_eq!(decoded.preview.shape(), &[1, 1, 1, 3]);
    }

    #[test]
    fn test_16bit_normalization() {
        let backend = FakeBackend::new(PixelBuffer::Sixteen(Array3::from_elem((10, 10, 3), 65535)));
        let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
        assert!((max(&decoded.image) - 1.0).abs() <= 0.01);
        assert_eq!(backend.last_params().output_bps, 16);
    }

    #[test]
    fn test_8bit_normalization() {
        let backend = FakeBackend::new(PixelBuffer::Eight(Array3::from_elem((10, 10, 3), 255)));
        let request = RawDecodeRequest {
            output_16bit: false,
            ..RawDecodeRequest::new("test.arw")
        };
        let decoded = decode_with(&backend, request);
        assert!((max(&decoded.image) - 1.0).abs() <= 0.01);
        assert_eq!(backend.last_params().output_bps, 8);
    }

    #[test]
    fn test_custom_white_balance_forwarded() {
        let backend = FakeBackend::new(noise8());
        let request = RawDecodeRequest {
            white_balance: "custom".to_string(),
            custom_wb: [1.5, 1.0, 1.2, 1.0],
            ..RawDecodeRequest::new("test.arw")
        };
        decode_with(&backend, request);
        let params = backend.last_params();
        assert_eq!(params.user_wb, Some([1.5, 1.0, 1.2, 1.0]));
        assert!(!params.use_camera_wb);
        assert!(!params.use_auto_wb);
    }

    #[test]
    fn test_auto_white_balance_excludes_camera() {
        let backend = FakeBackend::new(noise8());
        let request = RawDecodeRequest {
            white_balance: "auto".to_string(),
            ..RawDecodeRequest::new("test.arw")
        };
        decode_with(&backend, request);
        let params = backend.last_params();
        assert!(params.use_auto_wb);
        assert!(!params.use_camera_wb);
        assert_eq!(params.user_wb, None);
    }

    #[test]
    fn test_daylight_and_unknown_forward_nothing() {
        for mode in ["daylight", "tungsten"] {
            let request = RawDecodeRequest {
                white_balance: mode.to_string(),
                custom_wb: [2.0, 1.0, 3.0, 1.0],
                ..RawDecodeRequest::new("test.arw")
            };
            let params = RawProcessor::<FakeBackend>::resolve(&request);
            assert!(!params.use_camera_wb, "{}", mode);
            assert!(!params.use_auto_wb, "{}", mode);
            assert_eq!(params.user_wb, None, "{}", mode);
        }
    }

    #[test]
    fn test_camera_ignores_custom_multipliers() {
        let request = RawDecodeRequest {
            custom_wb: [9.0, 9.0, 9.0, 9.0],
            ..RawDecodeRequest::new("test.arw")
        };
        let params = RawProcessor::<FakeBackend>::resolve(&request);
        assert!(params.use_camera_wb);
        assert_eq!(params.user_wb, None);
    }

    #[test]
    fn test_demosaic_algorithm_resolved() {
        let backend = FakeBackend::new(noise8());
        let request = RawDecodeRequest {
            demosaic: "AMAZE".to_string(),
            ..RawDecodeRequest::new("test.arw")
        };
        decode_with(&backend, request);
        assert_eq!(backend.last_params().demosaic_algorithm, DemosaicAlgorithm::Amaze);
    }

    #[test]
    fn test_unknown_keys_resolve_to_defaults() {
        let request = RawDecodeRequest {
            demosaic: "SUPER".to_string(),
            highlight_mode: "magic".to_string(),
            colorspace: "CMYK".to_string(),
            orientation: "upside".to_string(),
            fbdd_noise_reduction: "extreme".to_string(),
            ..RawDecodeRequest::new("test.arw")
        };
        let params = RawProcessor::<FakeBackend>::resolve(&request);
        assert_eq!(params.demosaic_algorithm, DemosaicAlgorithm::Ahd);
        assert_eq!(params.highlight_mode, HighlightMode::Clip);
        assert_eq!(params.output_color, ColorSpace::SRGB);
        assert_eq!(params.user_flip, None);
        assert_eq!(params.fbdd_noise_reduction, FbddNoiseReduction::Off);
    }

    #[test]
    fn test_exposure_and_optics_forwarded() {
        let backend = FakeBackend::new(noise8());
        let request = RawDecodeRequest {
            exp_shift: 2.0,
            exp_preserve_highlights: 0.5,
            gamma: (1.0, 0.0),
            chromatic_aberration: (1.01, 0.99),
            orientation: "90° CW".to_string(),
            use_auto_bright: false,
            bright: 1.5,
            median_filter_passes: 3,
            half_size: true,
            ..RawDecodeRequest::new("test.arw")
        };
        decode_with(&backend, request);
        let params = backend.last_params();
        assert_eq!(params.exp_shift, 2.0);
        assert_eq!(params.exp_preserve_highlights, 0.5);
        assert_eq!(params.gamma, (1.0, 0.0));
        assert!((params.chromatic_aberration.0 - 1.01).abs() < 1e-6);
        assert!((params.chromatic_aberration.1 - 0.99).abs() < 1e-6);
        assert_eq!(params.user_flip, Some(6));
        assert!(params.no_auto_bright);
        assert_eq!(params.bright, 1.5);
        assert_eq!(params.median_filter_passes, 3);
        assert!(params.half_size);
    }

    #[test]
    fn test_zero_noise_threshold_disables_denoising() {
        let zero = RawDecodeRequest {
            noise_thr: Some(0.0),
            ..RawDecodeRequest::new("test.arw")
        };
        assert_eq!(RawProcessor::<FakeBackend>::resolve(&zero).noise_thr, None);

        let absent = RawDecodeRequest::new("test.arw");
        assert_eq!(RawProcessor::<FakeBackend>::resolve(&absent).noise_thr, None);

        let set = RawDecodeRequest {
            noise_thr: Some(5.0),
            ..RawDecodeRequest::new("test.arw")
        };
        assert_eq!(RawProcessor::<FakeBackend>::resolve(&set).noise_thr, Some(5.0));
    }

    #[test]
    fn test_jpeg_preview() {
        let backend = FakeBackend::new(noise8()).with_thumb(EmbeddedThumb::Jpeg(red_jpeg(50, 50)));
        let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
        assert_eq!(decoded.preview.shape(), &[1, 50, 50, 3]);
        assert!(decoded.preview[[0, 0, 0, 0]] > 0.9);
        assert!(decoded.preview[[0, 0, 0, 1]] < 0.1);
    }

    #[test]
    fn test_bitmap_preview() {
        let bitmap = ArrayD::from_elem(IxDyn(&[20, 20, 3]), 255u8);
        let backend = FakeBackend::new(noise8()).with_thumb(EmbeddedThumb::Bitmap(bitmap));
        let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
        assert_eq!(decoded.preview.shape(), &[1, 20, 20, 3]);
        assert!((max(&decoded.preview) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_grayscale_preview_broadcast() {
        let bitmap = ArrayD::from_shape_fn(IxDyn(&[10, 10]), |idx| (idx[0] * 10 + idx[1]) as u8);
        let backend = FakeBackend::new(noise8()).with_thumb(EmbeddedThumb::Bitmap(bitmap));
        let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
        let preview = &decoded.preview;
        assert_eq!(preview.shape(), &[1, 10, 10, 3]);
        for y in 0..10 {
            for x in 0..10 {
                let r = preview[[0, y, x, 0]];
                assert_eq!(r, preview[[0, y, x, 1]]);
                assert_eq!(r, preview[[0, y, x, 2]]);
                assert!((r - (y * 10 + x) as f32 / 255.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_missing_preview_falls_back_to_black_pixel() {
        let backend = FakeBackend::new(noise8());
        let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
        assert_eq!(decoded.preview.shape(), &[1, 1, 1, 3]);
        assert_eq!(max(&decoded.preview), 0.0);
    }

    #[test]
    fn test_broken_previews_fall_back_to_black_pixel() {
        let broken = [
            EmbeddedThumb::Jpeg(b"\xff\xd8\xff\xe0 truncated".to_vec()),
            EmbeddedThumb::Unsupported("unknown".to_string()),
            EmbeddedThumb::Bitmap(ArrayD::zeros(IxDyn(&[4, 4, 2]))),
            EmbeddedThumb::Bitmap(ArrayD::zeros(IxDyn(&[16]))),
        ];
        for thumb in broken {
            let backend = FakeBackend::new(noise8()).with_thumb(thumb);
            let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
            assert!(tensor::is_sentinel(&decoded.preview));
        }
    }

    #[test]
    fn test_large_preview_is_downscaled() {
        let bitmap = ArrayD::from_elem(IxDyn(&[1536, 2048, 3]), 128u8);
        let backend = FakeBackend::new(noise8()).with_thumb(EmbeddedThumb::Bitmap(bitmap));
        let decoded = decode_with(&backend, RawDecodeRequest::new("test.arw"));
        assert_eq!(decoded.preview.shape(), &[1, 768, 1024, 3]);
    }

    #[test]
    fn test_decode_failure_is_wrapped() {
        let mut backend = FakeBackend::new(noise8());
        backend.fail_open = true;
        let err = RawProcessor::with_backend(backend)
            .decode(&RawDecodeRequest::new("/tmp/corrupt.arw"))
            .unwrap_err();
        match &err {
            RawError::Decode { path, message } => {
                assert_eq!(path, Path::new("/tmp/corrupt.arw"));
                assert!(message.contains("Unsupported file format"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_postprocess_failure_is_wrapped() {
        let mut backend = FakeBackend::new(noise8())
            .with_thumb(EmbeddedThumb::Jpeg(red_jpeg(64, 48)));
        backend.fail_postprocess = true;

        let result = RawProcessor::with_backend(backend.clone())
            .decode(&RawDecodeRequest::new("/tmp/truncated.nef"));

        match result {
            Err(RawError::Decode { path, message }) => {
                assert_eq!(path, Path::new("/tmp/truncated.nef"));
                assert!(message.contains("Cannot allocate memory"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("decode returned a partial result"),
        }
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }
}
