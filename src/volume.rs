use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use parking_lot::RwLock;

use crate::model::{Dataset, DatasetId, Extents, Modality, PixelSpacing, ViewPlane};

#[derive(Debug, Clone, PartialEq)]
pub struct SliceData {
    pub width: usize,
    pub height: usize,
    pub pixels: Arc<[f32]>,
    pub spacing: PixelSpacing,
    pub modality: Modality,
}

/// Source of loaded volumes. Implementations own dataset lifetime; callers
/// only hold identifiers.
pub trait VolumeRepository: Send + Sync {
    fn loaded_datasets(&self) -> BTreeSet<DatasetId>;

    fn metadata(&self, id: &DatasetId) -> Option<Dataset>;

    /// `None` when the dataset is unknown or `index` is outside the plane.
    fn slice(&self, plane: ViewPlane, id: &DatasetId, index: usize) -> Option<SliceData>;
}

/// A decoded volume laid out x-fastest, then y, then z.
#[derive(Debug, Clone)]
pub struct Volume {
    dataset: Dataset,
    voxels: Arc<[f32]>,
    voxel_spacing: [f32; 3],
    modality: Modality,
}

impl Volume {
    pub fn new(
        id: impl Into<DatasetId>,
        name: impl Into<String>,
        extents: Extents,
        voxels: Vec<f32>,
        voxel_spacing: [f32; 3],
        modality: Modality,
    ) -> Result<Self> {
        let id = id.into();
        if extents.is_empty() {
            bail!("Volume {id} has an empty extent {extents:?}");
        }
        let expected = extents
            .voxel_count()
            .context("Overflow while calculating voxel count")?;
        if voxels.len() != expected {
            bail!(
                "Voxel count mismatch for {id}: got {}, expected {expected}",
                voxels.len()
            );
        }
        if voxel_spacing.iter().any(|value| !value.is_finite() || *value <= 0.0) {
            bail!("Volume {id} has invalid voxel spacing {voxel_spacing:?}");
        }

        let (intensity_min, intensity_max) =
            min_max(&voxels).context("No finite voxels available")?;
        let intensity_max = if intensity_max > intensity_min {
            intensity_max
        } else {
            intensity_min + 1.0
        };

        Ok(Self {
            dataset: Dataset {
                id,
                name: name.into(),
                extents,
                intensity_min,
                intensity_max,
            },
            voxels: Arc::from(voxels.into_boxed_slice()),
            voxel_spacing,
            modality,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn slice(&self, plane: ViewPlane, index: usize) -> Option<SliceData> {
        let Extents { x: nx, y: ny, z: nz } = self.dataset.extents;
        if index >= self.dataset.extents.slice_count(plane) {
            return None;
        }
        let at = |x: usize, y: usize, z: usize| self.voxels[x + nx * (y + ny * z)];
        let [sx, sy, sz] = self.voxel_spacing;

        let (width, height, pixels, spacing) = match plane {
            ViewPlane::Axial => {
                let mut pixels = Vec::with_capacity(nx * ny);
                for y in 0..ny {
                    for x in 0..nx {
                        pixels.push(at(x, y, index));
                    }
                }
                (nx, ny, pixels, PixelSpacing { row: sy, column: sx })
            }
            ViewPlane::Coronal => {
                let mut pixels = Vec::with_capacity(nx * nz);
                for z in (0..nz).rev() {
                    for x in 0..nx {
                        pixels.push(at(x, index, z));
                    }
                }
                (nx, nz, pixels, PixelSpacing { row: sz, column: sx })
            }
            ViewPlane::Sagittal => {
                let mut pixels = Vec::with_capacity(ny * nz);
                for z in (0..nz).rev() {
                    for y in 0..ny {
                        pixels.push(at(index, y, z));
                    }
                }
                (ny, nz, pixels, PixelSpacing { row: sz, column: sy })
            }
        };

        Some(SliceData {
            width,
            height,
            pixels: Arc::from(pixels.into_boxed_slice()),
            spacing,
            modality: self.modality.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryVolumeRepository {
    volumes: RwLock<HashMap<DatasetId, Arc<Volume>>>,
}

impl MemoryVolumeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, volume: Volume) -> DatasetId {
        let id = volume.dataset.id.clone();
        info!(
            "loaded volume {id} ({}) {:?}",
            volume.dataset.name, volume.dataset.extents
        );
        self.volumes.write().insert(id.clone(), Arc::new(volume));
        id
    }

    pub fn evict(&self, id: &DatasetId) -> bool {
        self.volumes.write().remove(id).is_some()
    }

    fn volume(&self, id: &DatasetId) -> Option<Arc<Volume>> {
        self.volumes.read().get(id).cloned()
    }
}

impl VolumeRepository for MemoryVolumeRepository {
    fn loaded_datasets(&self) -> BTreeSet<DatasetId> {
        self.volumes.read().keys().cloned().collect()
    }

    fn metadata(&self, id: &DatasetId) -> Option<Dataset> {
        self.volume(id).map(|volume| volume.dataset.clone())
    }

    fn slice(&self, plane: ViewPlane, id: &DatasetId, index: usize) -> Option<SliceData> {
        self.volume(id)?.slice(plane, index)
    }
}

fn min_max(values: &[f32]) -> Option<(f32, f32)> {
    values
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .fold(None, |acc, value| match acc {
            None => Some((value, value)),
            Some((min, max)) => Some((min.min(value), max.max(value))),
        })
}
