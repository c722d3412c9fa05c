//! Distance-driven detail level switching.
//!
//! Each tracked asset remembers the level it is displaying and a pinned copy
//! of that level's model. An update at the same level costs one lock and a
//! comparison. A level change loads the new level through the loader and
//! swaps the displayed copy once it arrives; the old level stays cached.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;
use vista_assets::{AssetId, DecodedModel};
use vista_lod::{DetailLevel, LodSelector};

use crate::error::LoadError;
use crate::events::ResourceEvent;
use crate::loader::ModelLease;
use crate::manager::Shared;

/// Result of a distance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelUpdate {
    /// The displayed level already matches the distance.
    Unchanged(u8),
    /// The displayed level was swapped.
    Switched { from: Option<u8>, to: u8 },
    /// A later update or a `forget` overtook this one while it was loading.
    Superseded,
}

struct ActiveAsset {
    levels: Vec<DetailLevel>,
    current_level: Option<u8>,
    target_distance: f32,
    /// Level an in-flight update is loading.
    requested: Option<u8>,
    displayed: Option<ModelLease>,
}

/// Per-asset selector state, one lock for the whole table.
#[derive(Default)]
pub(crate) struct ProgressiveSelector {
    active: Mutex<HashMap<AssetId, ActiveAsset>>,
}

impl ProgressiveSelector {
    pub(crate) fn current_level(&self, asset: AssetId) -> Option<u8> {
        self.active.lock().get(&asset)?.current_level
    }

    pub(crate) fn target_distance(&self, asset: AssetId) -> Option<f32> {
        self.active.lock().get(&asset).map(|a| a.target_distance)
    }

    /// Copy of the displayed model.
    pub(crate) fn displayed(&self, asset: AssetId) -> Option<DecodedModel> {
        let active = self.active.lock();
        active
            .get(&asset)?
            .displayed
            .as_ref()
            .map(|lease| lease.model().clone())
    }

    /// Drop the state of `asset`, unpinning its displayed level.
    pub(crate) fn forget(&self, asset: AssetId) -> bool {
        let removed = self.active.lock().remove(&asset);
        removed.is_some()
    }

    pub(crate) fn clear(&self) {
        let drained: Vec<_> = self.active.lock().drain().collect();
        drop(drained);
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl Shared {
    /// Pick the level for `distance` and make it the displayed one.
    pub(crate) async fn update_distance(
        self: &Arc<Self>,
        asset: AssetId,
        distance: f32,
    ) -> Result<LevelUpdate, LoadError> {
        let target = {
            let mut active = self.selector.active.lock();
            let entry = match active.entry(asset) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let descriptor = self
                        .catalog
                        .descriptor(asset)
                        .ok_or_else(|| LoadError::FileNotFound(asset.to_string()))?;
                    entry.insert(ActiveAsset {
                        levels: self.policy.effective_levels(&descriptor),
                        current_level: None,
                        target_distance: distance,
                        requested: None,
                        displayed: None,
                    })
                }
            };
            entry.target_distance = distance;
            let target = LodSelector::select_index(&entry.levels, distance) as u8;
            if entry.current_level == Some(target) {
                entry.requested = None;
                return Ok(LevelUpdate::Unchanged(target));
            }
            entry.requested = Some(target);
            target
        };

        let acquired = self.acquire(asset, Some(target)).await;

        let mut active = self.selector.active.lock();
        let Some(entry) = active.get_mut(&asset) else {
            return Ok(LevelUpdate::Superseded);
        };
        if entry.requested != Some(target) {
            return Ok(LevelUpdate::Superseded);
        }
        entry.requested = None;
        let lease = acquired?;

        let from = entry.current_level;
        let previous = entry.displayed.replace(lease);
        entry.current_level = Some(target);
        drop(active);
        drop(previous);

        tracing::debug!(
            "Asset {asset} switched from level {from:?} to {target} at distance {distance:.1}"
        );
        self.events.emit(ResourceEvent::LevelChanged {
            asset,
            from,
            to: target,
        });
        Ok(LevelUpdate::Switched { from, to: target })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::key::CacheKey;
    use crate::testing::{Fixture, large_asset, small_asset};
    use vista_assets::SourceFormat;

    /// Moving the camera out through 1, 3, 8 and 25 units walks the
    /// displayed level through 0, 1, 2 and 4.
    #[tokio::test]
    async fn test_distance_sweep_switches_levels() {
        let fixture = Fixture::new(ResourceConfig::default());
        let descriptor = large_asset(1, SourceFormat::Glb);
        fixture.add_level_files(&descriptor);
        fixture.add(descriptor);
        let manager = &fixture.manager;
        let id = AssetId(1);

        let mut displayed = Vec::new();
        for distance in [1.0, 3.0, 8.0, 25.0] {
            manager.update_distance(id, distance).await.unwrap();
            displayed.push(manager.current_level(id).unwrap());
        }
        assert_eq!(displayed, vec![0, 1, 2, 4]);
        assert_eq!(manager.displayed(id).unwrap().level, Some(4));
        assert_eq!(manager.target_distance(id), Some(25.0));
    }

    #[tokio::test]
    async fn test_same_level_is_unchanged() {
        let fixture = Fixture::new(ResourceConfig::default());
        let descriptor = large_asset(2, SourceFormat::Glb);
        fixture.add_level_files(&descriptor);
        fixture.add(descriptor);
        let manager = &fixture.manager;

        assert_eq!(
            manager.update_distance(AssetId(2), 6.0).await,
            Ok(LevelUpdate::Switched { from: None, to: 2 })
        );
        let calls = fixture.decoder.calls();
        assert_eq!(
            manager.update_distance(AssetId(2), 9.5).await,
            Ok(LevelUpdate::Unchanged(2))
        );
        assert_eq!(fixture.decoder.calls(), calls);
    }

    /// Switching keeps the previous level cached and emits a level change.
    #[tokio::test]
    async fn test_switch_keeps_previous_level_cached() {
        let fixture = Fixture::new(ResourceConfig::default());
        let descriptor = large_asset(3, SourceFormat::Glb);
        fixture.add_level_files(&descriptor);
        fixture.add(descriptor);
        let manager = &fixture.manager;
        let id = AssetId(3);

        manager.update_distance(id, 1.0).await.unwrap();
        let mut events = manager.subscribe();
        manager.update_distance(id, 15.0).await.unwrap();

        assert!(manager.get(CacheKey::original(id)).is_some());
        assert!(manager.get(CacheKey::new(id, Some(3))).is_some());
        let changed: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| matches!(event, ResourceEvent::LevelChanged { .. }))
            .collect();
        assert_eq!(
            changed,
            vec![ResourceEvent::LevelChanged {
                asset: id,
                from: Some(0),
                to: 3
            }]
        );
    }

    /// Estimate-only formats switch levels but keep showing the original.
    #[tokio::test]
    async fn test_estimate_only_levels_show_original() {
        let fixture = Fixture::new(ResourceConfig::default());
        fixture.add(large_asset(4, SourceFormat::Obj));
        let manager = &fixture.manager;
        let id = AssetId(4);

        manager.update_distance(id, 1.0).await.unwrap();
        manager.update_distance(id, 30.0).await.unwrap();
        assert_eq!(manager.current_level(id), Some(4));
        assert_eq!(manager.displayed(id).unwrap().level, None);
        assert_eq!(fixture.decoder.calls(), 1);
    }

    /// A model below the thresholds has only the original level.
    #[tokio::test]
    async fn test_small_model_never_switches() {
        let fixture = Fixture::new(ResourceConfig::default());
        fixture.add(small_asset(5));
        let manager = &fixture.manager;
        manager.update_distance(AssetId(5), 1.0).await.unwrap();
        assert_eq!(
            manager.update_distance(AssetId(5), 500.0).await,
            Ok(LevelUpdate::Unchanged(0))
        );
    }

    /// The displayed level is pinned until the asset is forgotten.
    #[tokio::test]
    async fn test_displayed_level_is_pinned_until_forget() {
        let fixture = Fixture::new(ResourceConfig::default());
        fixture.add(small_asset(6));
        let manager = &fixture.manager;
        let key = CacheKey::original(AssetId(6));

        manager.update_distance(AssetId(6), 1.0).await.unwrap();
        // The second signal in a row clears every unpinned entry.
        manager.on_low_memory();
        manager.on_low_memory();
        assert!(manager.get(key).is_some());

        assert!(manager.forget(AssetId(6)));
        assert_eq!(manager.stats().active_selectors, 0);
        manager.on_low_memory();
        assert!(manager.get(key).is_none());
    }

    #[tokio::test]
    async fn test_unknown_asset_is_rejected() {
        let fixture = Fixture::new(ResourceConfig::default());
        let result = fixture.manager.update_distance(AssetId(99), 1.0).await;
        assert!(matches!(result, Err(LoadError::FileNotFound(_))));
        assert_eq!(fixture.manager.stats().active_selectors, 0);
    }
}
