//! LibRaw decode backend via FFI
//!
//! Owns one `libraw_data_t` per opened file. The file is read into memory
//! first and LibRaw decodes from that buffer.

use crate::error::{RawError, Result};
use crate::raw::{EmbeddedThumb, PixelBuffer, PostprocessParams, RawBackend, RawSource};
use ndarray::{Array3, ArrayD, IxDyn};
use rsraw_sys as sys;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use tracing::debug;

// LibRaw_image_formats
const LIBRAW_IMAGE_JPEG: u32 = 1;
const LIBRAW_IMAGE_BITMAP: u32 = 2;

/// LibRaw backend
#[derive(Debug, Clone, Copy, Default)]
pub struct LibRaw;

impl LibRaw {
    /// Version string of the linked library
    pub fn version() -> String {
        unsafe { cstr_lossy(sys::libraw_version()) }
    }
}

impl RawBackend for LibRaw {
    type Source = LibRawSource;

    fn open(&self, path: &Path) -> Result<LibRawSource> {
        let buffer = std::fs::read(path)?;
        debug!("Opening {} ({} bytes) with LibRaw", path.display(), buffer.len());
        LibRawSource::open_buffer(buffer)
    }
}

/// An open LibRaw handle
pub struct LibRawSource {
    data: *mut sys::libraw_data_t,
    // Must outlive `data`: LibRaw reads lazily from it
    buffer: Vec<u8>,
}

impl LibRawSource {
    fn open_buffer(buffer: Vec<u8>) -> Result<Self> {
        let data = unsafe { sys::libraw_init(0) };
        if data.is_null() {
            return Err(RawError::Library {
                code: 0,
                message: "Failed to initialize LibRaw".to_string(),
            });
        }

        // From here on Drop closes the handle
        let source = Self { data, buffer };
        let ret = unsafe {
            sys::libraw_open_buffer(
                source.data,
                source.buffer.as_ptr() as *const _,
                source.buffer.len() as _,
            )
        };
        check(ret)?;

        Ok(source)
    }

    fn apply(&mut self, options: &PostprocessParams) {
        let params = unsafe { &mut (*self.data).params };

        params.output_bps = options.output_bps as i32;
        params.user_qual = options.demosaic_algorithm as i32;
        params.half_size = options.half_size as i32;
        params.user_flip = options.user_flip.unwrap_or(-1);
        params.output_color = options.output_color as i32;

        // White balance
        params.use_camera_wb = options.use_camera_wb as i32;
        params.use_auto_wb = options.use_auto_wb as i32;
        if let Some(mults) = options.user_wb {
            params.user_mul = mults;
        }

        // Brightness
        params.no_auto_bright = options.no_auto_bright as i32;
        params.bright = options.bright;

        params.highlight = options.highlight_mode as i32;

        // Gamma curve, LibRaw stores the reciprocal power
        let (power, slope) = options.gamma;
        if power > 0.0 {
            params.gamm[0] = 1.0 / power;
        }
        params.gamm[1] = slope;

        // Exposure shift
        params.exp_correc = 1;
        params.exp_shift = options.exp_shift;
        params.exp_preser = options.exp_preserve_highlights;

        // Chromatic aberration, stored as reciprocal red/blue scales
        let (red, blue) = options.chromatic_aberration;
        if red > 0.0 {
            params.aber[0] = 1.0 / red;
        }
        if blue > 0.0 {
            params.aber[2] = 1.0 / blue;
        }

        // Noise reduction
        if let Some(threshold) = options.noise_thr {
            params.threshold = threshold;
        }
        params.fbdd_noiserd = options.fbdd_noise_reduction as i32;
        params.med_passes = options.median_filter_passes as i32;
    }
}

impl Drop for LibRawSource {
    fn drop(&mut self) {
        unsafe { sys::libraw_close(self.data) };
    }
}

impl RawSource for LibRawSource {
    fn postprocess(&mut self, params: &PostprocessParams) -> Result<PixelBuffer> {
        self.apply(params);

        check(unsafe { sys::libraw_unpack(self.data) })?;
        check(unsafe { sys::libraw_dcraw_process(self.data) })?;

        let mut errc: c_int = 0;
        let ptr = unsafe { sys::libraw_dcraw_make_mem_image(self.data, &mut errc) };
        let image = MemImage::from_raw(ptr, errc)?;

        let (height, width, colors, bits) = image.layout();
        debug!("LibRaw image: {}x{}, {} colors, {} bits", width, height, colors, bits);
        if colors != 3 {
            return Err(RawError::Library {
                code: 0,
                message: format!("Expected 3 color channels, got {}", colors),
            });
        }

        let shape = (height, width, colors);
        let bytes = image.bytes();
        match bits {
            8 => Array3::from_shape_vec(shape, bytes.to_vec())
                .map(PixelBuffer::Eight)
                .map_err(layout_error),
            16 => {
                let samples = bytes
                    .chunks_exact(2)
                    .map(|b| u16::from_ne_bytes([b[0], b[1]]))
                    .collect();
                Array3::from_shape_vec(shape, samples)
                    .map(PixelBuffer::Sixteen)
                    .map_err(layout_error)
            }
            other => Err(RawError::Library {
                code: 0,
                message: format!("Unsupported output bit depth {}", other),
            }),
        }
    }

    fn extract_thumb(&mut self) -> Result<EmbeddedThumb> {
        check(unsafe { sys::libraw_unpack_thumb(self.data) })?;

        let mut errc: c_int = 0;
        let ptr = unsafe { sys::libraw_dcraw_make_mem_thumb(self.data, &mut errc) };
        let thumb = MemImage::from_raw(ptr, errc)?;

        match thumb.kind() {
            LIBRAW_IMAGE_JPEG => Ok(EmbeddedThumb::Jpeg(thumb.bytes().to_vec())),
            LIBRAW_IMAGE_BITMAP => {
                let (height, width, colors, bits) = thumb.layout();
                if bits != 8 {
                    return Ok(EmbeddedThumb::Unsupported(format!("{}-bit bitmap", bits)));
                }
                let shape = if colors == 1 {
                    vec![height, width]
                } else {
                    vec![height, width, colors]
                };
                ArrayD::from_shape_vec(IxDyn(&shape), thumb.bytes().to_vec())
                    .map(EmbeddedThumb::Bitmap)
                    .map_err(layout_error)
            }
            other => Ok(EmbeddedThumb::Unsupported(format!("image format {}", other))),
        }
    }
}

/// Memory image allocated by LibRaw, freed on drop
struct MemImage(*mut sys::libraw_processed_image_t);

impl MemImage {
    fn from_raw(ptr: *mut sys::libraw_processed_image_t, errc: c_int) -> Result<Self> {
        if ptr.is_null() {
            return Err(library_error(errc));
        }
        Ok(Self(ptr))
    }

    fn kind(&self) -> u32 {
        unsafe { (*self.0).type_ as u32 }
    }

    /// (height, width, colors, bits)
    fn layout(&self) -> (usize, usize, usize, u16) {
        let img = unsafe { &*self.0 };
        (img.height as usize, img.width as usize, img.colors as usize, img.bits)
    }

    fn bytes(&self) -> &[u8] {
        unsafe {
            // `data` is a trailing flexible array of `data_size` bytes
            let data = std::ptr::addr_of!((*self.0).data) as *const u8;
            std::slice::from_raw_parts(data, (*self.0).data_size as usize)
        }
    }
}

impl Drop for MemImage {
    fn drop(&mut self) {
        unsafe { sys::libraw_dcraw_clear_mem(self.0) };
    }
}

fn check(ret: c_int) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(library_error(ret))
    }
}

fn library_error(code: c_int) -> RawError {
    RawError::Library {
        code,
        message: unsafe { cstr_lossy(sys::libraw_strerror(code)) },
    }
}

fn layout_error(e: ndarray::ShapeError) -> RawError {
    RawError::Library {
        code: 0,
        message: format!("Unexpected image buffer layout: {}", e),
    }
}

unsafe fn cstr_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return "unknown error".to_string();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
