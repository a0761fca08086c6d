use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::{SessionError, SessionResult};
use crate::model::{Dataset, DatasetId, Extents, ViewPlane};
use crate::publish::{StateCell, Subscription};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialSlice {
    #[default]
    Middle,
    First,
}

impl InitialSlice {
    fn index_for(self, slice_count: usize) -> usize {
        match self {
            InitialSlice::Middle => slice_count / 2,
            InitialSlice::First => 0,
        }
    }
}

type IndexKey = (DatasetId, ViewPlane);

#[derive(Debug)]
pub struct NavigationStore {
    initial: InitialSlice,
    bounds: RwLock<HashMap<DatasetId, Extents>>,
    indices: RwLock<HashMap<IndexKey, Arc<StateCell<usize>>>>,
}

impl Default for NavigationStore {
    fn default() -> Self {
        Self::new(InitialSlice::default())
    }
}

impl NavigationStore {
    pub fn new(initial: InitialSlice) -> Self {
        Self {
            initial,
            bounds: RwLock::new(HashMap::new()),
            indices: RwLock::new(HashMap::new()),
        }
    }

    /// Records the slice bounds of a dataset. Bounds are fixed for the
    /// dataset's lifetime, so registering the same id again keeps the first.
    pub fn register(&self, dataset: &Dataset) {
        let mut bounds = self.bounds.write();
        bounds.entry(dataset.id.clone()).or_insert_with(|| {
            debug!("navigation bounds for {}: {:?}", dataset.id, dataset.extents);
            dataset.extents
        });
    }

    pub fn is_registered(&self, id: &DatasetId) -> bool {
        self.bounds.read().contains_key(id)
    }

    pub fn forget(&self, id: &DatasetId) {
        self.bounds.write().remove(id);
        self.indices.write().retain(|(dataset, _), _| dataset != id);
    }

    pub fn max_index(&self, id: &DatasetId, plane: ViewPlane) -> SessionResult<usize> {
        Ok(self.slice_count(id, plane)?.saturating_sub(1))
    }

    pub fn get_index(&self, id: &DatasetId, plane: ViewPlane) -> SessionResult<usize> {
        Ok(self.cell(id, plane)?.get())
    }

    /// Moves to `value`, clamped into the plane's bounds. Returns the index
    /// that is now current.
    pub fn set_index(&self, id: &DatasetId, plane: ViewPlane, value: i64) -> SessionResult<usize> {
        self.apply(id, plane, |_, max| value.clamp(0, max as i64) as usize)
    }

    pub fn increment(&self, id: &DatasetId, plane: ViewPlane, step: usize) -> SessionResult<usize> {
        self.apply(id, plane, |current, max| current.saturating_add(step).min(max))
    }

    pub fn decrement(&self, id: &DatasetId, plane: ViewPlane, step: usize) -> SessionResult<usize> {
        self.apply(id, plane, |current, _| current.saturating_sub(step))
    }

    /// Signed variant of increment/decrement used for scroll deltas.
    pub fn step_by(&self, id: &DatasetId, plane: ViewPlane, delta: i64) -> SessionResult<usize> {
        let step = delta.unsigned_abs() as usize;
        if delta >= 0 {
            self.increment(id, plane, step)
        } else {
            self.decrement(id, plane, step)
        }
    }

    pub fn subscribe(&self, id: &DatasetId, plane: ViewPlane) -> SessionResult<Subscription<usize>> {
        Ok(self.cell(id, plane)?.subscribe())
    }

    fn apply(
        &self,
        id: &DatasetId,
        plane: ViewPlane,
        target: impl FnOnce(usize, usize) -> usize,
    ) -> SessionResult<usize> {
        let cell = self.cell(id, plane)?;
        let mut result = cell.get();
        cell.update(|current| {
            let Ok(max) = self.max_index(id, plane) else {
                return false;
            };
            let next = target(*current, max).min(max);
            result = next;
            if next == *current {
                return false;
            }
            *current = next;
            true
        });
        Ok(result)
    }

    fn slice_count(&self, id: &DatasetId, plane: ViewPlane) -> SessionResult<usize> {
        self.bounds
            .read()
            .get(id)
            .map(|extents| extents.slice_count(plane))
            .ok_or_else(|| SessionError::DatasetNotFound(id.clone()))
    }

    fn cell(&self, id: &DatasetId, plane: ViewPlane) -> SessionResult<Arc<StateCell<usize>>> {
        self.slice_count(id, plane)?;
        let key = (id.clone(), plane);
        if let Some(cell) = self.indices.read().get(&key) {
            return Ok(Arc::clone(cell));
        }

        let mut indices = self.indices.write();
        // `forget` may have run since the first check; never leave an orphan cell.
        let slice_count = self.slice_count(id, plane)?;
        let cell = indices.entry(key).or_insert_with(|| {
            let initial = self
                .initial
                .index_for(slice_count)
                .min(slice_count.saturating_sub(1));
            Arc::new(StateCell::new(initial))
        });
        Ok(Arc::clone(cell))
    }
}

/// Turns raw wheel deltas into whole slice steps.
///
/// Small deltas are ignored, partial steps carry over between events and
/// reversing direction drops the carried residual. A positive wheel delta
/// moves toward lower slice indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollAccumulator {
    residual: f32,
}

impl ScrollAccumulator {
    const DEAD_ZONE: f32 = 0.5;
    const PIXELS_PER_STEP: f32 = 30.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps_for(&mut self, delta: f32) -> i64 {
        if !delta.is_finite() || delta.abs() <= Self::DEAD_ZONE {
            return 0;
        }

        if self.residual != 0.0 && delta.signum() != self.residual.signum() {
            self.residual = 0.0;
        }
        self.residual += delta;

        let raw_steps = (self.residual / Self::PIXELS_PER_STEP).trunc() as i64;
        if raw_steps == 0 {
            return 0;
        }

        self.residual -= raw_steps as f32 * Self::PIXELS_PER_STEP;
        -raw_steps
    }

    pub fn reset(&mut self) {
        self.residual = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(id: &str, x: usize, y: usize, z: usize) -> Dataset {
        Dataset {
            id: DatasetId::from(id),
            name: id.to_string(),
            extents: Extents::new(x, y, z),
            intensity_min: 0.0,
            intensity_max: 1.0,
        }
    }

    #[test]
    fn set_index_clamps_past_the_end() {
        let store = NavigationStore::default();
        let d1 = DatasetId::from("d1");
        store.register(&dataset("d1", 64, 64, 50));

        assert_eq!(store.set_index(&d1, ViewPlane::Axial, 999), Ok(49));
        assert_eq!(store.get_index(&d1, ViewPlane::Axial), Ok(49));
        assert_eq!(store.set_index(&d1, ViewPlane::Axial, -3), Ok(0));
        assert_eq!(store.max_index(&d1, ViewPlane::Axial), Ok(49));
    }

    #[test]
    fn index_is_lazily_initialized_per_plane() {
        let store = NavigationStore::new(InitialSlice::Middle);
        let d1 = DatasetId::from("d1");
        store.register(&dataset("d1", 10, 20, 31));
        assert_eq!(store.get_index(&d1, ViewPlane::Axial), Ok(15));
        assert_eq!(store.get_index(&d1, ViewPlane::Coronal), Ok(10));
        assert_eq!(store.get_index(&d1, ViewPlane::Sagittal), Ok(5));

        let first = NavigationStore::new(InitialSlice::First);
        first.register(&dataset("d1", 10, 20, 31));
        assert_eq!(first.get_index(&d1, ViewPlane::Axial), Ok(0));
    }

    #[test]
    fn increments_stay_within_bounds() {
        let store = NavigationStore::new(InitialSlice::First);
        let d1 = DatasetId::from("d1");
        store.register(&dataset("d1", 3, 3, 5));

        let deltas = [3_i64, 100, -1, i64::MIN, i64::MAX, 2, -7, 4];
        for delta in deltas {
            for plane in ViewPlane::ALL {
                let index = store.step_by(&d1, plane, delta).expect("registered");
                let max = store.max_index(&d1, plane).expect("registered");
                assert!(index <= max, "{plane} index {index} exceeded {max}");
            }
        }
        assert_eq!(store.increment(&d1, ViewPlane::Axial, usize::MAX), Ok(4));
        assert_eq!(store.decrement(&d1, ViewPlane::Axial, 1), Ok(3));
    }

    #[test]
    fn unknown_dataset_is_reported() {
        let store = NavigationStore::default();
        let missing = DatasetId::from("nope");
        assert_eq!(
            store.get_index(&missing, ViewPlane::Axial),
            Err(SessionError::DatasetNotFound(missing.clone()))
        );
    }

    #[test]
    fn forget_drops_bounds_and_indices() {
        let store = NavigationStore::default();
        let d1 = DatasetId::from("d1");
        store.register(&dataset("d1", 4, 4, 4));
        store.set_index(&d1, ViewPlane::Axial, 3).expect("registered");
        let sub = store.subscribe(&d1, ViewPlane::Axial).expect("registered");

        store.forget(&d1);
        assert!(!store.is_registered(&d1));
        assert!(sub.is_closed());

        store.register(&dataset("d1", 4, 4, 4));
        assert_eq!(store.get_index(&d1, ViewPlane::Axial), Ok(2));
    }

    #[test]
    fn forget_racing_readers_leaves_no_orphan_cells() {
        let store = NavigationStore::default();
        let d1 = DatasetId::from("d1");

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..2_000 {
                    let _ = store.get_index(&d1, ViewPlane::Axial);
                    let _ = store.set_index(&d1, ViewPlane::Coronal, 40);
                }
            });
            scope.spawn(|| {
                for round in 0..2_000 {
                    let size = if round % 2 == 0 { 64 } else { 3 };
                    store.register(&dataset("d1", size, size, size));
                    store.forget(&d1);
                }
            });
        });

        assert!(!store.is_registered(&d1));
        assert!(store.indices.read().is_empty());

        store.register(&dataset("d1", 3, 3, 3));
        for plane in ViewPlane::ALL {
            let index = store.get_index(&d1, plane).expect("registered");
            assert!(index <= 2, "{plane} index {index} outlived a larger registration");
        }
    }

    #[test]
    fn subscribers_only_see_real_moves() {
        let store = NavigationStore::new(InitialSlice::First);
        let d1 = DatasetId::from("d1");
        store.register(&dataset("d1", 2, 2, 2));
        let mut sub = store.subscribe(&d1, ViewPlane::Axial).expect("registered");
        assert_eq!(sub.try_next(), Some(0));

        store.decrement(&d1, ViewPlane::Axial, 1).expect("registered");
        assert_eq!(sub.try_next(), None);
        store.increment(&d1, ViewPlane::Axial, 1).expect("registered");
        assert_eq!(sub.try_next(), Some(1));
    }

    #[test]
    fn scroll_accumulator_carries_partial_steps() {
        let mut scroll = ScrollAccumulator::new();
        assert_eq!(scroll.steps_for(0.2), 0);
        assert_eq!(scroll.steps_for(20.0), 0);
        assert_eq!(scroll.steps_for(20.0), -1);
        assert_eq!(scroll.steps_for(-10.0), 0);
        assert_eq!(scroll.steps_for(-25.0), 1);
        assert_eq!(scroll.steps_for(f32::NAN), 0);
    }
}
