//! raw_nodes - RAW camera file loading for node-graph image editors
//!
//! Develops RAW sensor data through LibRaw (linked via FFI) and exposes it
//! as image nodes. Embedded thumbnails are pulled out by shelling out to the
//! system `exiftool` binary.
//!
//! Images travel between nodes as `(1, H, W, 3)` float tensors in `[0, 1]`.

pub mod error;
pub mod host;
pub mod libraw;
pub mod nodes;
pub mod options;
pub mod raw;
pub mod tensor;
pub mod thumbnail;
pub mod validation;

pub use error::{RawError, Result};
pub use host::{FileResolver, InputDirectory};
pub use libraw::LibRaw;
pub use nodes::{NodeOutput, NodeRegistry, NodeSchema};
pub use options::{
    ColorSpace, DemosaicAlgorithm, FbddNoiseReduction, HighlightMode, OptionTable, Orientation,
    WhiteBalanceMode,
};
pub use raw::{DecodedRaw, RawBackend, RawDecodeRequest, RawProcessor, RawSource};
pub use tensor::ImageTensor;
pub use thumbnail::{ExifTool, ThumbnailTag};
