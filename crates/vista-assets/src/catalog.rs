//! Read access to the externally owned model catalog.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::{AssetDescriptor, AssetId};

/// Source of [`AssetDescriptor`]s. The catalog owns descriptor lifetime;
/// callers only hold shared references.
pub trait AssetCatalog: Send + Sync {
    /// Look up a descriptor by id. Returns `None` for unknown or deleted ids.
    fn descriptor(&self, id: AssetId) -> Option<Arc<AssetDescriptor>>;
}

/// Thread-safe in-process catalog.
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<AssetId, Arc<AssetDescriptor>>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a descriptor.
    pub fn insert(&self, descriptor: AssetDescriptor) -> Arc<AssetDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.entries
            .write()
            .insert(descriptor.id, Arc::clone(&descriptor));
        descriptor
    }

    /// Remove a descriptor. Owners must also notify the resource manager.
    pub fn remove(&self, id: AssetId) -> Option<Arc<AssetDescriptor>> {
        self.entries.write().remove(&id)
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All ids, sorted.
    pub fn ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<_> = self.entries.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl AssetCatalog for InMemoryCatalog {
    fn descriptor(&self, id: AssetId) -> Option<Arc<AssetDescriptor>> {
        self.entries.read().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ModelMetadata, SourceFormat};

    fn descriptor(id: u64) -> AssetDescriptor {
        AssetDescriptor {
            id: AssetId(id),
            name: format!("model {id}"),
            file_name: format!("model_{id}.obj"),
            format: SourceFormat::Obj,
            byte_size: 2048,
            metadata: ModelMetadata::from_counts(500, 1500),
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(descriptor(1));
        catalog.insert(descriptor(2));
        assert_eq!(catalog.len(), 2);
        let found = catalog.descriptor(AssetId(2)).unwrap();
        assert_eq!(found.file_name, "model_2.obj");
        assert!(catalog.descriptor(AssetId(3)).is_none());
    }

    #[test]
    fn test_remove_makes_descriptor_unreachable() {
        let catalog = InMemoryCatalog::new();
        let held = catalog.insert(descriptor(1));
        catalog.remove(AssetId(1));
        assert!(catalog.descriptor(AssetId(1)).is_none());
        assert!(catalog.is_empty());
        // Outstanding references stay valid.
        assert_eq!(held.id, AssetId(1));
    }
}
