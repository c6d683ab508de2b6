//! Audio encoder seam.
//!
//! The engine never touches codec math. PCM passes straight through; other
//! codecs are provided by an [`EncoderFactory`] registered on the client.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Codec applied to audio before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum EncoderType {
    /// Raw PCM, no encoding.
    #[default]
    None,
    Opus,
    /// Opus frames with the service's length-prefixed framing.
    Opu,
}

impl EncoderType {
    /// Value of the `format` parameter matching this codec.
    pub fn format(&self) -> &'static str {
        match self {
            EncoderType::None => "pcm",
            EncoderType::Opus => "opus",
            EncoderType::Opu => "opu",
        }
    }
}

impl fmt::Display for EncoderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.format())
    }
}

impl FromStr for EncoderType {
    type Err = EncoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcm" | "none" => Ok(EncoderType::None),
            "opus" => Ok(EncoderType::Opus),
            "opu" => Ok(EncoderType::Opu),
            other => Err(EncoderError::Unsupported(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncoderError {
    #[error("invalid frame size: got {got} bytes, expected {expected}")]
    InvalidFrameSize { got: usize, expected: usize },

    #[error("unsupported codec '{0}'")]
    Unsupported(String),

    #[error("encoding failed: {0}")]
    Failed(String),
}

/// Encodes PCM chunks for one request.
pub trait AudioEncoder: Send {
    fn codec(&self) -> EncoderType;

    /// Encode one chunk. Frame-size rules belong to the encoder.
    fn encode(&mut self, pcm: &[u8]) -> Result<Vec<u8>, EncoderError>;
}

/// Builds an encoder for `(codec, sample_rate)`, or `None` if unsupported.
pub type EncoderFactory =
    Arc<dyn Fn(EncoderType, u32) -> Option<Box<dyn AudioEncoder>> + Send + Sync>;

/// Identity encoder used for [`EncoderType::None`].
#[derive(Debug, Default)]
pub struct PcmPassthrough;

impl AudioEncoder for PcmPassthrough {
    fn codec(&self) -> EncoderType {
        EncoderType::None
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Vec<u8>, EncoderError> {
        Ok(pcm.to_vec())
    }
}

/// Resolve an encoder, falling back to PCM passthrough for `None`.
pub fn build_encoder(
    factory: Option<&EncoderFactory>,
    codec: EncoderType,
    sample_rate: u32,
) -> Result<Box<dyn AudioEncoder>, EncoderError> {
    if codec == EncoderType::None {
        return Ok(Box::new(PcmPassthrough));
    }
    factory
        .and_then(|f| f(codec, sample_rate))
        .ok_or_else(|| EncoderError::Unsupported(codec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFrame;

    impl AudioEncoder for FixedFrame {
        fn codec(&self) -> EncoderType {
            EncoderType::Opu
        }

        fn encode(&mut self, pcm: &[u8]) -> Result<Vec<u8>, EncoderError> {
            if pcm.len() != 640 {
                return Err(EncoderError::InvalidFrameSize {
                    got: pcm.len(),
                    expected: 640,
                });
            }
            Ok(pcm[..10].to_vec())
        }
    }

    #[test]
    fn test_passthrough() {
        let mut encoder = build_encoder(None, EncoderType::None, 16000).unwrap();
        assert_eq!(encoder.encode(&[1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_factory_is_unsupported() {
        let err = build_encoder(None, EncoderType::Opus, 16000).err().unwrap();
        assert_eq!(err, EncoderError::Unsupported("opus".into()));
    }

    #[test]
    fn test_factory_encoder_enforces_frames() {
        let factory: EncoderFactory = Arc::new(|codec, _| {
            (codec == EncoderType::Opu).then(|| Box::new(FixedFrame) as Box<dyn AudioEncoder>)
        });
        let mut encoder = build_encoder(Some(&factory), EncoderType::Opu, 16000).unwrap();
        assert_eq!(encoder.encode(&[0u8; 640]).unwrap().len(), 10);
        assert!(matches!(
            encoder.encode(&[0u8; 100]),
            Err(EncoderError::InvalidFrameSize { got: 100, .. })
        ));
    }

    #[test]
    fn test_parse_encoder_type() {
        assert_eq!("OPU".parse::<EncoderType>().unwrap(), EncoderType::Opu);
        assert!("mp3".parse::<EncoderType>().is_err());
    }
}
