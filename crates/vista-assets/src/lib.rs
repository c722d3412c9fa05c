//! Asset descriptors, catalog access, and the narrow interfaces to format decoders and storage.

mod catalog;
mod decoder;
mod descriptor;
mod model;
mod storage;

pub use catalog::{AssetCatalog, InMemoryCatalog};
pub use decoder::{DecodeError, DecoderRegistry, FormatDecoder};
pub use descriptor::{AssetDescriptor, AssetId, ComplexityClass, ModelMetadata, SourceFormat};
pub use model::DecodedModel;
pub use storage::{AssetStorage, DirectoryStorage, StorageError};
