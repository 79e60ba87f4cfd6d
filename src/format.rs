use std::fmt;

use num_traits::AsPrimitive;

use crate::error::ConfigError;

/// Environment variable holding a space-separated allow-list for `list-formats`.
pub const FORMATS_ENV: &str = "ALSA_TEST_FORMATS";

pub const DEFAULT_FORMAT: &str = "int16_48000";

/// Wire encoding of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    S8,
    U8,
    S16Le,
    S16Be,
    U16Le,
    U16Be,
    F32Le,
    F32Be,
    F64Le,
    F64Be,
}

impl SampleEncoding {
    /// Encoding of `T` in host byte order.
    pub fn native<T: PcmSample>() -> Self {
        T::ENCODING
    }

    pub fn is_native(self) -> bool {
        match self {
            Self::S8 | Self::U8 => true,
            Self::S16Le | Self::U16Le | Self::F32Le | Self::F64Le => cfg!(target_endian = "little"),
            Self::S16Be | Self::U16Be | Self::F32Be | Self::F64Be => cfg!(target_endian = "big"),
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S8 => "S8",
            Self::U8 => "U8",
            Self::S16Le => "S16_LE",
            Self::S16Be => "S16_BE",
            Self::U16Le => "U16_LE",
            Self::U16Be => "U16_BE",
            Self::F32Le => "FLOAT_LE",
            Self::F32Be => "FLOAT_BE",
            Self::F64Le => "FLOAT64_LE",
            Self::F64Be => "FLOAT64_BE",
        };
        f.write_str(name)
    }
}

const fn by_endian(le: SampleEncoding, be: SampleEncoding) -> SampleEncoding {
    if cfg!(target_endian = "little") {
        le
    } else {
        be
    }
}

/// A sample type the self-test can generate, stream and analyze.
///
/// `MIN`/`MAX` bound the representable domain: the integer limits for
/// integer types and `[-1, 1]` for floating point.
pub trait PcmSample: cpal::SizedSample + Default + Send + Sync + fmt::Debug + 'static {
    const MIN: f64;
    const MAX: f64;
    const ENCODING: SampleEncoding;

    /// Saturating conversion; never wraps.
    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_pcm_sample {
    ($t:ty, $min:expr, $max:expr, $enc:expr) => {
        impl PcmSample for $t {
            const MIN: f64 = $min;
            const MAX: f64 = $max;
            const ENCODING: SampleEncoding = $enc;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value.clamp(<Self as PcmSample>::MIN, <Self as PcmSample>::MAX).as_()
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self.as_()
            }
        }
    };
}

impl_pcm_sample!(i8, i8::MIN as f64, i8::MAX as f64, SampleEncoding::S8);
impl_pcm_sample!(u8, u8::MIN as f64, u8::MAX as f64, SampleEncoding::U8);
impl_pcm_sample!(
    i16,
    i16::MIN as f64,
    i16::MAX as f64,
    by_endian(SampleEncoding::S16Le, SampleEncoding::S16Be)
);
impl_pcm_sample!(
    u16,
    u16::MIN as f64,
    u16::MAX as f64,
    by_endian(SampleEncoding::U16Le, SampleEncoding::U16Be)
);
impl_pcm_sample!(
    f32,
    -1.0,
    1.0,
    by_endian(SampleEncoding::F32Le, SampleEncoding::F32Be)
);
impl_pcm_sample!(
    f64,
    -1.0,
    1.0,
    by_endian(SampleEncoding::F64Le, SampleEncoding::F64Be)
);

/// Storage type selected by a test format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Float,
    Float64,
}

/// A named (encoding, rate) combination selectable with `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestFormat {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: SampleKind,
    pub rate: u32,
}

pub const ALL_FORMATS: &[TestFormat] = &[
    TestFormat {
        name: "float_44100",
        description: "Float32 encoded, 44100Hz sampling",
        kind: SampleKind::Float,
        rate: 44100,
    },
    TestFormat {
        name: "float_48000",
        description: "Float32 encoded, 48000Hz sampling",
        kind: SampleKind::Float,
        rate: 48000,
    },
    TestFormat {
        name: "int16_44100",
        description: "Signed Int16 encoded, 44100Hz sampling",
        kind: SampleKind::Int16,
        rate: 44100,
    },
    TestFormat {
        name: "int16_48000",
        description: "Signed Int16 encoded, 48000Hz sampling",
        kind: SampleKind::Int16,
        rate: 48000,
    },
    TestFormat {
        name: "uint16_44100",
        description: "Unsigned Int16 encoded, 44100Hz sampling",
        kind: SampleKind::Uint16,
        rate: 44100,
    },
    TestFormat {
        name: "uint16_48000",
        description: "Unsigned Int16 encoded, 48000Hz sampling",
        kind: SampleKind::Uint16,
        rate: 48000,
    },
    TestFormat {
        name: "int8_44100",
        description: "Signed Int8 encoded, 44100Hz sampling",
        kind: SampleKind::Int8,
        rate: 44100,
    },
    TestFormat {
        name: "int8_48000",
        description: "Signed Int8 encoded, 48000Hz sampling",
        kind: SampleKind::Int8,
        rate: 48000,
    },
    TestFormat {
        name: "uint8_44100",
        description: "Unsigned Int8 encoded, 44100Hz sampling",
        kind: SampleKind::Uint8,
        rate: 44100,
    },
    TestFormat {
        name: "uint8_48000",
        description: "Unsigned Int8 encoded, 48000Hz sampling",
        kind: SampleKind::Uint8,
        rate: 48000,
    },
    TestFormat {
        name: "float64_44100",
        description: "Float64 encoded, 44100Hz sampling",
        kind: SampleKind::Float64,
        rate: 44100,
    },
    TestFormat {
        name: "float64_48000",
        description: "Float64 encoded, 48000Hz sampling",
        kind: SampleKind::Float64,
        rate: 48000,
    },
];

impl TestFormat {
    pub fn find(name: &str) -> Result<&'static TestFormat, ConfigError> {
        ALL_FORMATS
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ConfigError::UnknownFormat(name.to_string()))
    }
}

/// Formats to print for `list-formats`, in table order.
///
/// With an allow-list only the named formats are returned; unknown names in
/// the list are ignored.
pub fn listed_formats(allow_list: Option<&str>) -> Vec<&'static TestFormat> {
    match allow_list {
        Some(list) => {
            let picked: Vec<&str> = list.split_whitespace().collect();
            ALL_FORMATS
                .iter()
                .filter(|f| picked.contains(&f.name))
                .collect()
        }
        None => ALL_FORMATS.iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_and_unknown() {
        let f = TestFormat::find("uint16_44100").unwrap();
        assert_eq!(f.kind, SampleKind::Uint16);
        assert_eq!(f.rate, 44100);

        assert_eq!(
            TestFormat::find("int24_96000"),
            Err(ConfigError::UnknownFormat("int24_96000".to_string()))
        );
    }

    #[test]
    fn test_default_format_exists() {
        assert!(TestFormat::find(DEFAULT_FORMAT).is_ok());
    }

    #[test]
    fn test_listed_formats_allow_list() {
        let all = listed_formats(None);
        assert_eq!(all.len(), ALL_FORMATS.len());

        let some = listed_formats(Some("int16_48000  bogus float_44100"));
        let names: Vec<_> = some.iter().map(|f| f.name).collect();
        // table order, not allow-list order
        assert_eq!(names, vec!["float_44100", "int16_48000"]);

        assert!(listed_formats(Some("")).is_empty());
    }

    #[test]
    fn test_saturating_conversion() {
        assert_eq!(i16::from_f64(1e9), i16::MAX);
        assert_eq!(i16::from_f64(-1e9), i16::MIN);
        assert_eq!(u8::from_f64(-3.0), 0);
        assert_eq!(f32::from_f64(2.0), 1.0);
        assert_eq!(i8::from_f64(12.7).to_f64(), 12.0);
    }

    #[test]
    fn test_native_encodings() {
        assert!(SampleEncoding::native::<i16>().is_native());
        assert!(SampleEncoding::native::<f64>().is_native());
        assert_eq!(SampleEncoding::native::<u8>(), SampleEncoding::U8);
        if cfg!(target_endian = "little") {
            assert!(!SampleEncoding::S16Be.is_native());
        }
    }
}
