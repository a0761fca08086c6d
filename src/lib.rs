//! Session state and job tracking for a multi-plane volume viewer.
//!
//! [`SessionController`] owns the per-session stores (selection, navigation,
//! windowing) and the [`JobRegistry`] of background inference jobs. Every
//! store publishes conflated snapshots through [`Subscription`] so views can
//! re-render from the latest state without ever blocking writers.

pub mod cancellation;
pub mod config;
pub mod controller;
pub mod error;
pub mod inference;
pub mod jobs;
pub mod launch;
pub mod model;
pub mod navigation;
pub mod publish;
pub mod selection;
pub mod slice;
pub mod volume;
pub mod windowing;

pub use cancellation::{CancellationSource, CancellationToken};
pub use config::SessionConfig;
pub use controller::SessionController;
pub use error::{SessionError, SessionResult};
pub use inference::{InferenceEngine, InferenceRequest, SteppedEngine};
pub use jobs::{JobHandle, JobId, JobRegistry, JobState, ProgressSnapshot};
pub use model::{Dataset, DatasetId, Extents, Modality, PixelSpacing, ViewPlane, ViewerTool};
pub use navigation::{InitialSlice, NavigationStore, ScrollAccumulator};
pub use publish::{StateCell, Subscription};
pub use selection::{SelectionSnapshot, SelectionStore};
pub use slice::SliceAccessor;
pub use volume::{MemoryVolumeRepository, SliceData, Volume, VolumeRepository};
pub use windowing::{WindowPreset, WindowingState, WindowingStore};
