use std::sync::Arc;

use crate::error::{SessionError, SessionResult};
use crate::model::{DatasetId, ViewPlane};
use crate::volume::{SliceData, VolumeRepository};

/// Stateless lookup of slices from the repository.
#[derive(Clone)]
pub struct SliceAccessor {
    repository: Arc<dyn VolumeRepository>,
}

impl SliceAccessor {
    pub fn new(repository: Arc<dyn VolumeRepository>) -> Self {
        Self { repository }
    }

    /// Out-of-range indices are clamped to the last slice of the plane.
    pub fn slice(&self, plane: ViewPlane, id: &DatasetId, index: usize) -> SessionResult<SliceData> {
        let dataset = self
            .repository
            .metadata(id)
            .ok_or_else(|| SessionError::DatasetNotFound(id.clone()))?;
        let index = index.min(dataset.max_index(plane));
        self.repository
            .slice(plane, id, index)
            .ok_or_else(|| SessionError::DatasetNotFound(id.clone()))
    }
}
