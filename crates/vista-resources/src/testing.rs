//! In-memory catalog, storage and decoder used by the tests.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use vista_assets::{
    AssetDescriptor, AssetId, AssetStorage, DecodeError, DecodedModel, DecoderRegistry,
    FormatDecoder, InMemoryCatalog, ModelMetadata, SourceFormat, StorageError,
};
use vista_lod::{LodPolicy, LodThresholds};

use crate::config::ResourceConfig;
use crate::manager::ModelResourceManager;

/// Files held in memory, keyed by file name.
#[derive(Default)]
pub(crate) struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    last_opened: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub(crate) fn put(&self, file_name: &str, bytes: &[u8]) {
        self.files.lock().insert(file_name.to_string(), bytes.to_vec());
    }

    pub(crate) fn last_opened(&self) -> Option<String> {
        self.last_opened.lock().clone()
    }
}

impl AssetStorage for MemoryStorage {
    fn open(
        &self,
        _descriptor: &AssetDescriptor,
        file_name: &str,
    ) -> Result<Box<dyn Read + Send>, StorageError> {
        let bytes = self
            .files
            .lock()
            .get(file_name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(file_name.to_string()))?;
        *self.last_opened.lock() = Some(file_name.to_string());
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn cache_dir(&self) -> Result<Option<PathBuf>, StorageError> {
        Ok(None)
    }
}

/// Counters and knobs shared by every [`TestDecoder`] of a fixture.
#[derive(Default)]
pub(crate) struct DecoderMonitor {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay_ms: AtomicU64,
    fail_next: AtomicBool,
}

impl DecoderMonitor {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

/// Decoder producing one triangle per source byte triple, with
/// configurable delay and failure.
struct TestDecoder {
    format: SourceFormat,
    monitor: Arc<DecoderMonitor>,
}

impl FormatDecoder for TestDecoder {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn decode(
        &self,
        descriptor: &AssetDescriptor,
        source: &mut dyn Read,
    ) -> Result<DecodedModel, DecodeError> {
        let monitor = &self.monitor;
        monitor.calls.fetch_add(1, Ordering::SeqCst);
        let running = monitor.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        monitor.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = monitor.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let mut bytes = Vec::new();
        let read = source.read_to_end(&mut bytes);
        monitor.in_flight.fetch_sub(1, Ordering::SeqCst);
        read?;

        if monitor.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DecodeError::Corrupted("bad header".into()));
        }
        let mut model = DecodedModel::new(descriptor.id, None);
        model.positions = bytes
            .iter()
            .map(|&b| [f32::from(b), 0.0, 1.0])
            .collect();
        model.indices = (0..model.positions.len() as u32).collect();
        model.material_count = descriptor.metadata.material_count;
        Ok(model)
    }
}

/// A manager wired to in-memory collaborators.
pub(crate) struct Fixture {
    pub(crate) manager: ModelResourceManager,
    pub(crate) catalog: Arc<InMemoryCatalog>,
    pub(crate) storage: Arc<MemoryStorage>,
    pub(crate) decoder: Arc<DecoderMonitor>,
}

impl Fixture {
    pub(crate) fn new(config: ResourceConfig) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let storage = Arc::new(MemoryStorage::default());
        let decoder = Arc::new(DecoderMonitor::default());
        let mut decoders = DecoderRegistry::new();
        for format in [
            SourceFormat::Glb,
            SourceFormat::Gltf,
            SourceFormat::Usdz,
            SourceFormat::Obj,
        ] {
            decoders.register(Arc::new(TestDecoder {
                format,
                monitor: Arc::clone(&decoder),
            }));
        }
        let manager = ModelResourceManager::new(
            config,
            Arc::clone(&catalog) as _,
            Arc::clone(&storage) as _,
            decoders,
        )
        .unwrap();
        Self {
            manager,
            catalog,
            storage,
            decoder,
        }
    }

    /// Register `descriptor` and store its source file.
    pub(crate) fn add(&self, descriptor: AssetDescriptor) {
        self.storage
            .put(&descriptor.file_name, format!("src:{}", descriptor.id).as_bytes());
        self.catalog.insert(descriptor);
    }

    /// Store a file for every generated level of `descriptor`.
    pub(crate) fn add_level_files(&self, descriptor: &AssetDescriptor) {
        let policy = LodPolicy::new(LodThresholds::default());
        for level in policy.levels_for(descriptor).iter().skip(1) {
            self.storage
                .put(&level.file_name, format!("lod{}", level.index).as_bytes());
        }
    }
}

/// A small GLB model that gets no reduced levels.
pub(crate) fn small_asset(id: u64) -> AssetDescriptor {
    AssetDescriptor {
        id: AssetId(id),
        name: format!("Model {id}"),
        file_name: format!("model{id}.glb"),
        format: SourceFormat::Glb,
        byte_size: 64 * 1024,
        metadata: ModelMetadata::from_counts(1_000, 3_000),
    }
}

/// A model large enough to get the full level table.
pub(crate) fn large_asset(id: u64, format: SourceFormat) -> AssetDescriptor {
    AssetDescriptor {
        id: AssetId(id),
        name: format!("Model {id}"),
        file_name: format!("model{id}.{}", format.extension()),
        format,
        byte_size: 8 * 1024 * 1024,
        metadata: ModelMetadata::from_counts(300_000, 900_000),
    }
}
