use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::{SessionError, SessionResult};
use crate::model::{Dataset, DatasetId};
use crate::publish::{StateCell, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WindowPreset {
    pub center: f32,
    pub width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowingState {
    pub center: f32,
    pub width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityBounds {
    pub min: f32,
    pub max: f32,
}

impl IntensityBounds {
    pub fn of(dataset: &Dataset) -> Self {
        let min = dataset.intensity_min;
        let mut max = dataset.intensity_max;
        if !(max > min) {
            warn!(
                "dataset {} has degenerate intensity range [{min}, {max}]",
                dataset.id
            );
            max = min + 1.0;
        }
        Self { min, max }
    }

    pub fn range(&self) -> f32 {
        self.max - self.min
    }

    /// Clamps into `[min, min + range]`.
    pub fn clamp(&self, value: f32) -> f32 {
        value.max(self.min).min(self.min + self.range())
    }

    fn default_state(&self) -> WindowingState {
        WindowingState {
            center: self.clamp(self.min + self.range() / 2.0),
            width: self.clamp(self.range()),
        }
    }

    fn drag_sensitivity(&self) -> f32 {
        (self.range() / 512.0).clamp(0.25, 256.0)
    }
}

#[derive(Debug)]
pub struct WindowingStore {
    presets: BTreeMap<String, WindowPreset>,
    bounds: RwLock<HashMap<DatasetId, IntensityBounds>>,
    states: RwLock<HashMap<DatasetId, Arc<StateCell<WindowingState>>>>,
}

impl Default for WindowingStore {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl WindowingStore {
    pub fn new(presets: BTreeMap<String, WindowPreset>) -> Self {
        Self {
            presets,
            bounds: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, dataset: &Dataset) {
        let mut bounds = self.bounds.write();
        bounds
            .entry(dataset.id.clone())
            .or_insert_with(|| IntensityBounds::of(dataset));
    }

    pub fn is_registered(&self, id: &DatasetId) -> bool {
        self.bounds.read().contains_key(id)
    }

    pub fn forget(&self, id: &DatasetId) {
        self.bounds.write().remove(id);
        self.states.write().remove(id);
    }

    pub fn preset_names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn preset(&self, name: &str) -> Option<WindowPreset> {
        self.presets.get(name).copied()
    }

    pub fn bounds(&self, id: &DatasetId) -> SessionResult<IntensityBounds> {
        self.bounds
            .read()
            .get(id)
            .copied()
            .ok_or_else(|| SessionError::DatasetNotFound(id.clone()))
    }

    pub fn get_state(&self, id: &DatasetId) -> SessionResult<WindowingState> {
        Ok(self.cell(id)?.get())
    }

    pub fn set_center(&self, id: &DatasetId, value: f32) -> SessionResult<WindowingState> {
        self.apply(id, |state, bounds| {
            if !value.is_nan() {
                state.center = bounds.clamp(value);
            }
        })
    }

    pub fn set_width(&self, id: &DatasetId, value: f32) -> SessionResult<WindowingState> {
        self.apply(id, |state, bounds| {
            if !value.is_nan() {
                state.width = bounds.clamp(value);
            }
        })
    }

    /// Sets center and width in a single publication.
    pub fn apply_preset(&self, id: &DatasetId, name: &str) -> SessionResult<WindowingState> {
        let preset = self
            .preset(name)
            .ok_or_else(|| SessionError::UnknownPreset(name.to_string()))?;
        debug!("applying preset {name} to {id}");
        self.apply(id, |state, bounds| {
            state.center = bounds.clamp(preset.center);
            state.width = bounds.clamp(preset.width);
        })
    }

    /// Window-level drag: vertical motion moves the center, horizontal motion
    /// widens or narrows the window.
    pub fn adjust_by_drag(&self, id: &DatasetId, dx: f32, dy: f32) -> SessionResult<WindowingState> {
        self.apply(id, |state, bounds| {
            if dx.is_nan() || dy.is_nan() {
                return;
            }
            let sensitivity = bounds.drag_sensitivity();
            state.center = bounds.clamp(state.center - dy * sensitivity);
            state.width = bounds.clamp(state.width + dx * sensitivity);
        })
    }

    pub fn subscribe(&self, id: &DatasetId) -> SessionResult<Subscription<WindowingState>> {
        Ok(self.cell(id)?.subscribe())
    }

    fn apply(
        &self,
        id: &DatasetId,
        modify: impl FnOnce(&mut WindowingState, &IntensityBounds),
    ) -> SessionResult<WindowingState> {
        let cell = self.cell(id)?;
        let mut result = None;
        cell.update(|state| {
            // Bounds are read under the cell lock; a re-registration may have swapped them.
            let Ok(bounds) = self.bounds(id) else {
                return false;
            };
            let before = *state;
            modify(state, &bounds);
            result = Some(*state);
            *state != before
        });
        Ok(result.unwrap_or_else(|| cell.get()))
    }

    fn cell(&self, id: &DatasetId) -> SessionResult<Arc<StateCell<WindowingState>>> {
        self.bounds(id)?;
        if let Some(cell) = self.states.read().get(id) {
            return Ok(Arc::clone(cell));
        }

        let mut states = self.states.write();
        let bounds = self.bounds(id)?;
        let cell = states
            .entry(id.clone())
            .or_insert_with(|| Arc::new(StateCell::new(bounds.default_state())));
        Ok(Arc::clone(cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Extents;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn dataset(id: &str, min: f32, max: f32) -> Dataset {
        Dataset {
            id: DatasetId::from(id),
            name: id.to_string(),
            extents: Extents::new(8, 8, 8),
            intensity_min: min,
            intensity_max: max,
        }
    }

    fn presets() -> BTreeMap<String, WindowPreset> {
        BTreeMap::from([
            (
                "Brain".to_string(),
                WindowPreset {
                    center: 40.0,
                    width: 80.0,
                },
            ),
            (
                "Bone".to_string(),
                WindowPreset {
                    center: 400.0,
                    width: 1800.0,
                },
            ),
        ])
    }

    #[test]
    fn center_above_max_is_clamped() {
        let store = WindowingStore::default();
        let brain = DatasetId::from("brain1");
        store.register(&dataset("brain1", 0.0, 1000.0));

        let state = store.set_center(&brain, 1500.0).expect("registered");
        assert_eq!(state.center, 1000.0);
        assert_eq!(store.get_state(&brain).expect("registered").center, 1000.0);
    }

    #[test]
    fn setters_round_trip_through_clamp() {
        let store = WindowingStore::default();
        let id = DatasetId::from("ct");
        store.register(&dataset("ct", -1024.0, 3071.0));
        let bounds = store.bounds(&id).expect("registered");

        for value in [-5000.0, -1024.0, 0.0, 40.0, 3071.0, 9000.0] {
            store.set_center(&id, value).expect("registered");
            assert_eq!(store.get_state(&id).expect("registered").center, bounds.clamp(value));
            store.set_width(&id, value).expect("registered");
            assert_eq!(store.get_state(&id).expect("registered").width, bounds.clamp(value));
        }
    }

    #[test]
    fn default_state_is_midpoint_and_full_range() {
        let store = WindowingStore::default();
        let id = DatasetId::from("mr");
        store.register(&dataset("mr", 0.0, 600.0));
        assert_eq!(
            store.get_state(&id),
            Ok(WindowingState {
                center: 300.0,
                width: 600.0
            })
        );
    }

    #[test]
    fn nan_input_is_ignored() {
        let store = WindowingStore::default();
        let id = DatasetId::from("mr");
        store.register(&dataset("mr", 0.0, 600.0));
        let before = store.get_state(&id).expect("registered");
        assert_eq!(store.set_center(&id, f32::NAN), Ok(before));
        assert_eq!(store.set_width(&id, f32::NAN), Ok(before));
        assert_eq!(store.adjust_by_drag(&id, f32::NAN, 1.0), Ok(before));
        assert_eq!(store.adjust_by_drag(&id, 1.0, f32::NAN), Ok(before));
    }

    #[test]
    fn infinite_input_clamps_to_bounds() {
        let store = WindowingStore::default();
        let brain = DatasetId::from("brain1");
        store.register(&dataset("brain1", 0.0, 1000.0));

        assert_eq!(store.set_center(&brain, f32::INFINITY).expect("registered").center, 1000.0);
        assert_eq!(store.set_center(&brain, f32::NEG_INFINITY).expect("registered").center, 0.0);
        assert_eq!(store.set_width(&brain, f32::INFINITY).expect("registered").width, 1000.0);
        assert_eq!(store.set_width(&brain, f32::NEG_INFINITY).expect("registered").width, 0.0);

        let dragged = store
            .adjust_by_drag(&brain, f32::INFINITY, f32::NEG_INFINITY)
            .expect("registered");
        assert_eq!(dragged, WindowingState { center: 1000.0, width: 1000.0 });
    }

    #[test]
    fn unknown_preset_leaves_state_untouched() {
        let store = WindowingStore::new(presets());
        let id = DatasetId::from("ct");
        store.register(&dataset("ct", -1024.0, 3071.0));
        let before = store.get_state(&id).expect("registered");

        assert_eq!(
            store.apply_preset(&id, "Liver"),
            Err(SessionError::UnknownPreset("Liver".to_string()))
        );
        assert_eq!(store.get_state(&id), Ok(before));
        assert_eq!(store.preset_names(), vec!["Bone", "Brain"]);
    }

    #[test]
    fn preset_publishes_once() {
        let store = WindowingStore::new(presets());
        let id = DatasetId::from("ct");
        store.register(&dataset("ct", -1024.0, 3071.0));
        let mut sub = store.subscribe(&id).expect("registered");
        sub.try_next();

        let state = store.apply_preset(&id, "Brain").expect("known preset");
        assert_eq!(state, WindowingState { center: 40.0, width: 80.0 });
        assert_eq!(sub.try_next(), Some(state));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn concurrent_readers_never_see_half_applied_preset() {
        let store = Arc::new(WindowingStore::new(presets()));
        let id = DatasetId::from("ct");
        store.register(&dataset("ct", -1024.0, 3071.0));
        let bounds = store.bounds(&id).expect("registered");
        let initial = store.get_state(&id).expect("registered");
        let allowed = [
            initial,
            WindowingState {
                center: bounds.clamp(40.0),
                width: bounds.clamp(80.0),
            },
            WindowingState {
                center: bounds.clamp(400.0),
                width: bounds.clamp(1800.0),
            },
        ];

        let done = Arc::new(AtomicBool::new(false));
        let readers = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                let id = id.clone();
                thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        let seen = store.get_state(&id).expect("registered");
                        assert!(allowed.contains(&seen), "observed torn state {seen:?}");
                    }
                })
            })
            .collect::<Vec<_>>();

        for round in 0..2000 {
            let name = if round % 2 == 0 { "Brain" } else { "Bone" };
            store.apply_preset(&id, name).expect("known preset");
        }
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().expect("reader thread should not panic");
        }
    }

    #[test]
    fn forget_racing_readers_leaves_no_orphan_state() {
        let store = WindowingStore::default();
        let id = DatasetId::from("ct");

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..2_000 {
                    let _ = store.get_state(&id);
                    let _ = store.set_center(&id, 900.0);
                }
            });
            scope.spawn(|| {
                for round in 0..2_000 {
                    let max = if round % 2 == 0 { 1000.0 } else { 10.0 };
                    store.register(&dataset("ct", 0.0, max));
                    store.forget(&id);
                }
            });
        });

        assert!(!store.is_registered(&id));
        assert!(store.states.read().is_empty());

        store.register(&dataset("ct", 0.0, 10.0));
        assert_eq!(
            store.get_state(&id),
            Ok(WindowingState {
                center: 5.0,
                width: 10.0
            })
        );
    }

    #[test]
    fn drag_moves_center_and_width_together() {
        let store = WindowingStore::default();
        let id = DatasetId::from("ct");
        store.register(&dataset("ct", 0.0, 1024.0));
        let before = store.get_state(&id).expect("registered");

        let after = store.adjust_by_drag(&id, -10.0, 10.0).expect("registered");
        assert_eq!(after.center, before.center - 20.0);
        assert_eq!(after.width, before.width - 20.0);
    }

    #[test]
    fn degenerate_bounds_are_widened() {
        let bounds = IntensityBounds::of(&dataset("flat", 5.0, 5.0));
        assert_eq!(bounds.range(), 1.0);
        assert_eq!(bounds.clamp(100.0), 6.0);
    }
}
