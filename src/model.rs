use std::fmt;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DatasetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPlane {
    Axial,
    Coronal,
    Sagittal,
}

impl ViewPlane {
    pub const ALL: [ViewPlane; 3] = [ViewPlane::Axial, ViewPlane::Coronal, ViewPlane::Sagittal];

    pub fn display_name(self) -> &'static str {
        match self {
            ViewPlane::Axial => "Axial",
            ViewPlane::Coronal => "Coronal",
            ViewPlane::Sagittal => "Sagittal",
        }
    }
}

impl fmt::Display for ViewPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Voxel counts along the x (left-right), y (anterior-posterior) and
/// z (inferior-superior) axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extents {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Extents {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Number of slices available when stepping through `plane`.
    pub fn slice_count(&self, plane: ViewPlane) -> usize {
        match plane {
            ViewPlane::Axial => self.z,
            ViewPlane::Coronal => self.y,
            ViewPlane::Sagittal => self.x,
        }
    }

    pub fn voxel_count(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub extents: Extents,
    pub intensity_min: f32,
    pub intensity_max: f32,
}

impl Dataset {
    pub fn intensity_range(&self) -> f32 {
        self.intensity_max - self.intensity_min
    }

    pub fn max_index(&self, plane: ViewPlane) -> usize {
        self.extents.slice_count(plane).saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Modality(String);

impl Modality {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-plane physical spacing of a slice, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSpacing {
    pub row: f32,
    pub column: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewerTool {
    Measurement,
    PixelValue,
}

impl ViewerTool {
    pub fn display_name(self) -> &'static str {
        match self {
            ViewerTool::Measurement => "Measure",
            ViewerTool::PixelValue => "Pixel value",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_count_follows_plane_axis() {
        let extents = Extents::new(4, 5, 6);
        assert_eq!(extents.slice_count(ViewPlane::Axial), 6);
        assert_eq!(extents.slice_count(ViewPlane::Coronal), 5);
        assert_eq!(extents.slice_count(ViewPlane::Sagittal), 4);
        assert_eq!(extents.voxel_count(), Some(120));
    }

    #[test]
    fn modality_is_normalized() {
        assert_eq!(Modality::new(" ct ").as_str(), "CT");
    }
}
