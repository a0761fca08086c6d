use std::collections::BTreeSet;

use log::debug;

use crate::model::{DatasetId, ViewPlane, ViewerTool};
use crate::publish::{StateCell, Subscription};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSnapshot {
    pub datasets: BTreeSet<DatasetId>,
    pub planes: BTreeSet<ViewPlane>,
    pub tools: BTreeSet<ViewerTool>,
}

impl SelectionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() || self.planes.is_empty()
    }

    /// Every (dataset, plane) pair that is currently on screen.
    pub fn visible_pairs(&self) -> impl Iterator<Item = (&DatasetId, ViewPlane)> + '_ {
        self.datasets
            .iter()
            .flat_map(move |id| self.planes.iter().map(move |plane| (id, *plane)))
    }
}

#[derive(Debug)]
pub struct SelectionStore {
    state: StateCell<SelectionSnapshot>,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStore {
    pub fn new() -> Self {
        Self {
            state: StateCell::new(SelectionSnapshot::default()),
        }
    }

    pub fn toggle_dataset(&self, id: &DatasetId, is_selected: bool) -> bool {
        let changed = self
            .state
            .update(|snapshot| toggle_member(&mut snapshot.datasets, id, is_selected));
        if changed {
            debug!("dataset {id} selected={is_selected}");
        }
        changed
    }

    pub fn toggle_view(&self, plane: ViewPlane, is_selected: bool) -> bool {
        let changed = self
            .state
            .update(|snapshot| toggle_member(&mut snapshot.planes, &plane, is_selected));
        if changed {
            debug!("plane {plane} selected={is_selected}");
        }
        changed
    }

    pub fn toggle_tool(&self, tool: ViewerTool, is_selected: bool) -> bool {
        self.state
            .update(|snapshot| toggle_member(&mut snapshot.tools, &tool, is_selected))
    }

    pub fn forget_dataset(&self, id: &DatasetId) -> bool {
        self.toggle_dataset(id, false)
    }

    pub fn current(&self) -> SelectionSnapshot {
        self.state.get()
    }

    pub fn is_dataset_selected(&self, id: &DatasetId) -> bool {
        self.state.read(|snapshot| snapshot.datasets.contains(id))
    }

    pub fn subscribe(&self) -> Subscription<SelectionSnapshot> {
        self.state.subscribe()
    }
}

fn toggle_member<T: Ord + Clone>(set: &mut BTreeSet<T>, key: &T, is_selected: bool) -> bool {
    if is_selected {
        set.insert(key.clone())
    } else {
        set.remove(key)
    }
}
