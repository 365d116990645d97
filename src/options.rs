//! Option tables
//!
//! Maps the human-readable choices shown in node dropdowns onto the values
//! LibRaw expects in `libraw_output_params_t`. Lookups never fail: an
//! unrecognised key resolves to the table's default.

/// A static key -> value table with a documented fallback
pub trait OptionTable: Copy + 'static {
    /// Entries in the order they are offered to the user
    const TABLE: &'static [(&'static str, Self)];

    /// Value used when a key is not in the table
    const DEFAULT: Self;

    fn from_key(key: &str) -> Self {
        Self::TABLE
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
            .unwrap_or(Self::DEFAULT)
    }

    fn keys() -> Vec<&'static str> {
        Self::TABLE.iter().map(|(name, _)| *name).collect()
    }

    fn key(self) -> &'static str
    where
        Self: PartialEq,
    {
        Self::TABLE
            .iter()
            .find(|(_, value)| *value == self)
            .map(|(name, _)| *name)
            .unwrap_or("")
    }
}

/// Demosaicing algorithm (`user_qual`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DemosaicAlgorithm {
    Linear = 0,
    /// Variable Number of Gradients
    Vng = 1,
    /// Patterned Pixel Grouping
    Ppg = 2,
    /// Adaptive Homogeneity-Directed
    Ahd = 3,
    Dcb = 4,
    /// Aliasing Minimization and Zipper Elimination
    Amaze = 10,
    Dht = 11,
}

impl OptionTable for DemosaicAlgorithm {
    const TABLE: &'static [(&'static str, Self)] = &[
        ("AHD", Self::Ahd),
        ("VNG", Self::Vng),
        ("PPG", Self::Ppg),
        ("DCB", Self::Dcb),
        ("AMAZE", Self::Amaze),
        ("LINEAR", Self::Linear),
        ("DHT", Self::Dht),
    ];
    const DEFAULT: Self = Self::Ahd;
}

/// Highlight recovery (`highlight`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HighlightMode {
    Clip = 0,
    Ignore = 1,
    Blend = 2,
    /// Rebuild at LibRaw's default level (3 + 2)
    Reconstruct = 5,
}

impl OptionTable for HighlightMode {
    const TABLE: &'static [(&'static str, Self)] = &[
        ("clip", Self::Clip),
        ("ignore", Self::Ignore),
        ("blend", Self::Blend),
        ("reconstruct", Self::Reconstruct),
    ];
    const DEFAULT: Self = Self::Clip;
}

/// Output color space (`output_color`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ColorSpace {
    /// Raw color space
    Raw = 0,
    /// sRGB (D65)
    SRGB = 1,
    /// Adobe RGB (1998) (D65)
    AdobeRGB = 2,
    /// Wide-gamut RGB (D50)
    WideGamutRGB = 3,
    /// Kodak ProPhoto RGB (D50)
    ProPhotoRGB = 4,
    XYZ = 5,
    ACES = 6,
    Rec2020 = 8,
}

impl OptionTable for ColorSpace {
    const TABLE: &'static [(&'static str, Self)] = &[
        ("sRGB", Self::SRGB),
        ("Adobe RGB", Self::AdobeRGB),
        ("ProPhoto", Self::ProPhotoRGB),
        ("Wide Gamut", Self::WideGamutRGB),
        ("XYZ", Self::XYZ),
        ("ACES", Self::ACES),
        ("Rec2020", Self::Rec2020),
        ("raw", Self::Raw),
    ];
    const DEFAULT: Self = Self::SRGB;
}

/// Orientation override (`user_flip`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Use the orientation recorded by the camera
    Auto,
    /// Raw sensor orientation
    Unrotated,
    Rotate180,
    Rotate90Cw,
    Rotate90Ccw,
}

impl Orientation {
    /// LibRaw flip code, `None` leaves the embedded metadata in charge
    pub fn flip(self) -> Option<i32> {
        match self {
            Orientation::Auto => None,
            Orientation::Unrotated => Some(0),
            Orientation::Rotate180 => Some(3),
            Orientation::Rotate90Cw => Some(6),
            Orientation::Rotate90Ccw => Some(5),
        }
    }
}

impl OptionTable for Orientation {
    const TABLE: &'static [(&'static str, Self)] = &[
        ("auto", Self::Auto),
        ("none", Self::Unrotated),
        ("180°", Self::Rotate180),
        ("90° CW", Self::Rotate90Cw),
        ("90° CCW", Self::Rotate90Ccw),
    ];
    const DEFAULT: Self = Self::Auto;
}

/// Fix Bad Data Demosaicing impulse-noise reduction (`fbdd_noiserd`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FbddNoiseReduction {
    Off = 0,
    Light = 1,
    Full = 2,
}

impl OptionTable for FbddNoiseReduction {
    const TABLE: &'static [(&'static str, Self)] = &[
        ("off", Self::Off),
        ("light", Self::Light),
        ("full", Self::Full),
    ];
    const DEFAULT: Self = Self::Off;
}

/// White balance mode
///
/// Unknown keys behave like `Daylight`: nothing is forwarded and LibRaw
/// falls back to its built-in daylight multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhiteBalanceMode {
    /// As shot
    Camera,
    /// Computed from the image data
    Auto,
    Daylight,
    /// Explicit [r, g1, b, g2] multipliers
    Custom,
}

impl OptionTable for WhiteBalanceMode {
    const TABLE: &'static [(&'static str, Self)] = &[
        ("camera", Self::Camera),
        ("auto", Self::Auto),
        ("daylight", Self::Daylight),
        ("custom", Self::Custom),
    ];
    const DEFAULT: Self = Self::Daylight;
}
