//! Demo binary that drives the Vista model resource manager against a
//! generated sample library.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p vista-demo` to see the walkthrough in the log.
//! Run with `cargo run -p vista-demo -- --memory-ceiling-mb 64` to tighten the budget.

mod library;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glam::Vec3;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use vista_assets::{AssetCatalog, AssetId, DecoderRegistry, DirectoryStorage, InMemoryCatalog};
use vista_config::{CliArgs, Config, CostKind};
use vista_lod::{LodPolicy, LodThresholds, camera_distance};
use vista_resources::{
    CostModel, LoadingState, ModelResourceManager, ResourceConfig, ResourceError, ResourceEvent,
};

use crate::library::{ObjDecoder, asset_id_for, scan_library, write_sample_library};

/// Translate the persisted settings into manager settings.
fn resource_config(config: &Config) -> ResourceConfig {
    let cost_model = match config.cache.cost {
        CostKind::Flat => CostModel::Flat {
            bytes: config.flat_cost_bytes(),
        },
        CostKind::Measured => CostModel::Measured,
    };
    ResourceConfig {
        memory_ceiling: config.memory_ceiling_bytes(),
        eviction_target_ratio: config.cache.eviction_target_ratio,
        cost_model,
        max_concurrent_loads: config.loader.max_concurrent_loads,
        disk_cache: config.cache.disk_cache,
        disk_cache_dir: config.cache.disk_cache_dir.clone(),
        low_memory_target_ratio: config.cache.low_memory_target_ratio,
        low_memory_repeat_window: Duration::from_millis(config.cache.low_memory_repeat_window_ms),
        event_capacity: config.loader.event_capacity,
        lod: LodThresholds {
            triangle_count: config.lod.triangle_threshold,
            byte_size: config.size_threshold_bytes(),
        },
    }
}

/// Library directory: configured, else the platform data directory.
fn library_dir(config: &Config, config_dir: &Path) -> PathBuf {
    config
        .storage
        .library_dir
        .clone()
        .or_else(|| dirs::data_dir().map(|dir| dir.join("vista").join("library")))
        .unwrap_or_else(|| config_dir.join("library"))
}

fn build_manager(
    config: ResourceConfig,
    catalog: Arc<InMemoryCatalog>,
    storage: &DirectoryStorage,
) -> Result<ModelResourceManager, ResourceError> {
    let decoders = DecoderRegistry::new().with(Arc::new(ObjDecoder));
    ModelResourceManager::new(config, catalog, Arc::new(storage.clone()), decoders)
}

fn describe(state: &LoadingState) -> String {
    match state {
        LoadingState::NotLoaded => "not loaded".to_string(),
        LoadingState::Loading { progress } => format!("loading ({:.0}%)", progress * 100.0),
        LoadingState::Loaded(handle) => format!("loaded as {} ({} bytes)", handle.key, handle.cost),
        LoadingState::Failed(err) => format!("failed: {err}"),
    }
}

fn demonstrate_lod_policy(catalog: &InMemoryCatalog, policy: &LodPolicy) {
    let mut ids = catalog.ids();
    ids.sort();
    for id in ids {
        let Some(descriptor) = catalog.descriptor(id) else {
            continue;
        };
        let levels = policy.effective_levels(&descriptor);
        let valid = LodPolicy::validate(&levels).is_ok();
        info!(
            "LOD policy: {} ({} triangles, {:?}) -> {} levels, valid={valid}",
            descriptor.file_name,
            descriptor.metadata.triangle_count,
            descriptor.metadata.complexity,
            levels.len()
        );
        for level in levels.iter().filter(|l| !l.is_original()) {
            debug!(
                "  level {} {:?}: <= {} m, ~{} triangles, {:?}",
                level.index,
                level.tier,
                level.max_distance,
                level.estimated_triangles,
                level.backing
            );
        }
    }
}

async fn demonstrate_concurrent_loading(manager: &ModelResourceManager, assets: &[AssetId]) {
    // Every asset twice: the second request joins the first decode.
    let loads = assets
        .iter()
        .chain(assets.iter())
        .map(|&asset| {
            let manager = manager.clone();
            tokio::spawn(async move { (asset, manager.load(asset, None).await) })
        })
        .collect::<Vec<_>>();

    for task in loads {
        match task.await {
            Ok((asset, state)) => debug!("Load of {asset}: {}", describe(&state)),
            Err(e) => error!("Load task panicked: {e}"),
        }
    }

    let stats = manager.stats();
    info!(
        "Concurrent loading: {} requests, {} resident, peak {} concurrent decodes (limit {})",
        assets.len() * 2,
        stats.cache.entries,
        stats.peak_loads,
        manager.config().max_concurrent_loads
    );
}

async fn demonstrate_distance_sweep(manager: &ModelResourceManager, asset: AssetId) {
    let model_position = Vec3::new(0.0, 0.0, -1.0);
    for z in [0.0, 2.0, 7.0, 24.0] {
        let camera = Vec3::new(0.0, 0.0, z);
        let distance = camera_distance(model_position, camera);
        match manager.update_distance(asset, distance).await {
            Ok(update) => info!(
                "Distance sweep: {distance:.1} m -> {update:?}, showing level {:?}",
                manager.current_level(asset)
            ),
            Err(e) => warn!("Distance sweep at {distance:.1} m failed: {e}"),
        }
    }
    if let Some(model) = manager.displayed(asset) {
        info!(
            "Distance sweep: displayed model has {} triangles",
            model.triangle_count()
        );
    }
    manager.forget(asset);
}

async fn demonstrate_eviction(
    catalog: Arc<InMemoryCatalog>,
    storage: &DirectoryStorage,
    base: &ResourceConfig,
    assets: &[AssetId],
) {
    // Room for two flat-cost entries; the third load pushes the oldest out.
    let config = ResourceConfig {
        memory_ceiling: 2 * 1024 * 1024,
        eviction_target_ratio: 0.5,
        cost_model: CostModel::Flat {
            bytes: 1024 * 1024,
        },
        ..base.clone()
    };
    let manager = match build_manager(config, catalog, storage) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Eviction demo unavailable: {e}");
            return;
        }
    };

    for &asset in assets {
        manager.load(asset, None).await;
    }
    let stats = manager.stats();
    info!(
        "Eviction: usage {} / {} bytes, {} evictions",
        stats.memory_usage, stats.memory_ceiling, stats.cache.evictions
    );

    if let Some(&first) = assets.first() {
        let state = manager.load(first, None).await;
        info!(
            "Eviction: reloaded {first} ({}), {} disk hits",
            describe(&state),
            manager.stats().cache.disk_hits
        );
    }
    manager.clear();
}

async fn demonstrate_failure_and_retry(manager: &ModelResourceManager, broken: AssetId) {
    let state = manager.load(broken, None).await;
    info!("Failure: broken.obj is {}", describe(&state));

    let again = manager.load(broken, None).await;
    info!("Failure: second load short-circuits as {}", describe(&again));

    match manager.retry(broken, None).await {
        Ok(state) => info!("Failure: retry ended {}", describe(&state)),
        Err(e) => warn!("Failure: retry rejected: {e}"),
    }
    if let Err(e) = manager.retry(asset_id_for("missing.obj"), None).await {
        info!("Failure: retrying an unknown asset is rejected: {e}");
    }
}

async fn demonstrate_cancellation(manager: &ModelResourceManager, asset: AssetId) {
    manager.unload(asset);
    let load = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.load(asset, None).await })
    };
    tokio::task::yield_now().await;

    let cancelled = manager.cancel(asset);
    match load.await {
        Ok(state) => info!(
            "Cancellation: {cancelled} operations cancelled, waiter saw {}, asset is {}",
            describe(&state),
            describe(&manager.state(asset))
        ),
        Err(e) => error!("Cancelled load task panicked: {e}"),
    }
}

fn demonstrate_low_memory(manager: &ModelResourceManager) {
    let before = manager.stats().memory_usage;
    let freed = manager.on_low_memory();
    let repeated = manager.on_low_memory();
    info!(
        "Low memory: {before} bytes resident, first signal freed {freed}, repeat freed {repeated}, {} left",
        manager.stats().memory_usage
    );
}

async fn run(config: Config, config_dir: PathBuf) -> Result<(), ResourceError> {
    let library = library_dir(&config, &config_dir);
    match write_sample_library(&library) {
        Ok(0) => debug!("Using existing library at {}", library.display()),
        Ok(written) => info!("Seeded library with {written} sample models"),
        Err(e) => warn!("Could not write sample library: {e}"),
    }

    let mut roots = vec![library.as_path()];
    roots.extend(config.storage.bundled_dir.as_deref());
    let catalog = Arc::new(scan_library(&roots));

    let mut storage = DirectoryStorage::new(&library);
    if let Some(bundled) = &config.storage.bundled_dir {
        storage = storage.with_bundled(bundled);
    }

    let settings = resource_config(&config);
    let manager = build_manager(settings.clone(), Arc::clone(&catalog), &storage)?;

    let mut events = manager.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ResourceEvent::StateChanged { asset, state }) => {
                    debug!("event: {asset} -> {}", describe(&state));
                }
                Ok(other) => debug!("event: {other:?}"),
                Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let samples: Vec<AssetId> = ["crate.obj", "bench.obj", "statue.obj", "terrain.obj"]
        .into_iter()
        .map(asset_id_for)
        .filter(|id| catalog.descriptor(*id).is_some())
        .collect();

    demonstrate_lod_policy(&catalog, manager.policy());
    demonstrate_concurrent_loading(&manager, &samples).await;
    demonstrate_distance_sweep(&manager, asset_id_for("terrain.obj")).await;
    demonstrate_eviction(Arc::clone(&catalog), &storage, &settings, &samples).await;
    demonstrate_failure_and_retry(&manager, asset_id_for("broken.obj")).await;
    if let Some(&asset) = samples.last() {
        demonstrate_cancellation(&manager, asset).await;
    }
    demonstrate_low_memory(&manager);

    let stats = manager.stats();
    info!(
        "Final stats: {} / {} bytes, {} hits, {} misses, {} disk hits, {} evictions, {} tracked assets",
        stats.memory_usage,
        stats.memory_ceiling,
        stats.cache.hits,
        stats.cache.misses,
        stats.cache.disk_hits,
        stats.cache.evictions,
        stats.tracked_assets
    );
    if config.debug.log_cache_stats {
        info!("{stats:#?}");
    }

    event_log.abort();
    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args
        .config
        .clone()
        .or_else(|| Config::default_dir().ok())
        .unwrap_or_else(|| PathBuf::from(".vista"));

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    vista_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config, config_dir)) {
        error!("Resource manager failed: {e}");
        std::process::exit(1);
    }
}
