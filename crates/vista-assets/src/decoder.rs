//! Format decoder interface and per-format registry.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::descriptor::{AssetDescriptor, SourceFormat};
use crate::model::DecodedModel;

/// Errors a decoder can report.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The source bytes are not a valid file of the expected format.
    #[error("corrupted source: {0}")]
    Corrupted(String),
    /// The file is valid but could not be turned into a renderable model.
    #[error("{0}")]
    Failed(String),
    /// Reading the source failed.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns a source file of one format into a [`DecodedModel`].
///
/// Implementations run on a blocking worker thread and may take as long as
/// they need; the loader bounds how many run at once.
pub trait FormatDecoder: Send + Sync {
    /// The format this decoder handles.
    fn format(&self) -> SourceFormat;

    /// Decode `source` into a renderable model.
    fn decode(
        &self,
        descriptor: &AssetDescriptor,
        source: &mut dyn Read,
    ) -> Result<DecodedModel, DecodeError>;
}

/// Maps each [`SourceFormat`] to the decoder that handles it.
#[derive(Default, Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<SourceFormat, Arc<dyn FormatDecoder>>,
}

impl DecoderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder, replacing any previous one for the same format.
    pub fn register(&mut self, decoder: Arc<dyn FormatDecoder>) {
        let format = decoder.format();
        if self.decoders.insert(format, decoder).is_some() {
            tracing::debug!("Replaced decoder for {format:?}");
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, decoder: Arc<dyn FormatDecoder>) -> Self {
        self.register(decoder);
        self
    }

    /// Decoder for `format`, if one is registered.
    pub fn get(&self, format: SourceFormat) -> Option<Arc<dyn FormatDecoder>> {
        self.decoders.get(&format).cloned()
    }

    /// Whether a decoder is registered for `format`.
    pub fn supports(&self, format: SourceFormat) -> bool {
        self.decoders.contains_key(&format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDecoder(SourceFormat);

    impl FormatDecoder for NullDecoder {
        fn format(&self) -> SourceFormat {
            self.0
        }

        fn decode(
            &self,
            descriptor: &AssetDescriptor,
            source: &mut dyn Read,
        ) -> Result<DecodedModel, DecodeError> {
            let mut bytes = Vec::new();
            source.read_to_end(&mut bytes)?;
            if bytes.is_empty() {
                return Err(DecodeError::Corrupted("empty file".to_string()));
            }
            Ok(DecodedModel::new(descriptor.id, None))
        }
    }

    #[test]
    fn test_registry_lookup_by_format() {
        let registry = DecoderRegistry::new()
            .with(Arc::new(NullDecoder(SourceFormat::Obj)))
            .with(Arc::new(NullDecoder(SourceFormat::Glb)));
        assert!(registry.supports(SourceFormat::Obj));
        assert!(registry.supports(SourceFormat::Glb));
        assert!(!registry.supports(SourceFormat::Usdz));
        assert_eq!(
            registry.get(SourceFormat::Glb).map(|d| d.format()),
            Some(SourceFormat::Glb)
        );
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Corrupted("bad header".to_string());
        assert_eq!(err.to_string(), "corrupted source: bad header");
    }
}
