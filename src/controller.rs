use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info};
use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::inference::{spawn_job, InferenceEngine, InferenceRequest};
use crate::jobs::{JobId, JobRegistry, ProgressSnapshot};
use crate::model::{Dataset, DatasetId, ViewPlane, ViewerTool};
use crate::navigation::{NavigationStore, ScrollAccumulator};
use crate::publish::Subscription;
use crate::selection::{SelectionSnapshot, SelectionStore};
use crate::slice::SliceAccessor;
use crate::volume::{SliceData, VolumeRepository};
use crate::windowing::{WindowingState, WindowingStore};

pub const LOADING_NOTICE: &str = "Loading images... Please wait";

/// Everything one viewing session needs, wired together.
///
/// All methods take `&self`; the controller can be shared between the
/// interactive thread and job workers behind an `Arc`.
pub struct SessionController {
    config: SessionConfig,
    repository: Arc<dyn VolumeRepository>,
    engine: Arc<dyn InferenceEngine>,
    selection: SelectionStore,
    navigation: NavigationStore,
    windowing: WindowingStore,
    slices: SliceAccessor,
    jobs: JobRegistry,
    scroll: Mutex<ScrollAccumulator>,
    pending_inference: Mutex<Option<InferenceRequest>>,
    next_job: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
    notify_tx: Sender<String>,
    notify_rx: Mutex<Receiver<String>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        repository: Arc<dyn VolumeRepository>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel();
        Self {
            navigation: NavigationStore::new(config.initial_slice),
            windowing: WindowingStore::new(config.presets.clone()),
            slices: SliceAccessor::new(Arc::clone(&repository)),
            selection: SelectionStore::new(),
            jobs: JobRegistry::new(),
            scroll: Mutex::new(ScrollAccumulator::new()),
            pending_inference: Mutex::new(None),
            next_job: AtomicU64::new(1),
            workers: Mutex::new(Vec::new()),
            notify_tx,
            notify_rx: Mutex::new(notify_rx),
            config,
            repository,
            engine,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Called when the viewer becomes visible. Runs a queued inference
    /// request, if any, and shows the configured initial planes.
    pub fn activate(&self) -> SessionResult<bool> {
        let ran = self.run_if_triggered();
        for plane in &self.config.initial_planes {
            self.selection.toggle_view(*plane, true);
        }
        ran
    }

    // Datasets

    pub fn loaded_datasets(&self) -> BTreeSet<DatasetId> {
        self.repository.loaded_datasets()
    }

    pub fn dataset(&self, id: &DatasetId) -> SessionResult<Dataset> {
        self.repository
            .metadata(id)
            .ok_or_else(|| SessionError::DatasetNotFound(id.clone()))
    }

    /// Drops all per-dataset state after the repository unloads `id`.
    pub fn release_dataset(&self, id: &DatasetId) {
        self.selection.forget_dataset(id);
        self.navigation.forget(id);
        self.windowing.forget(id);
        debug!("released session state for {id}");
    }

    fn ensure_registered(&self, id: &DatasetId) -> SessionResult<()> {
        if self.navigation.is_registered(id) && self.windowing.is_registered(id) {
            return Ok(());
        }
        let dataset = self.dataset(id)?;
        self.navigation.register(&dataset);
        self.windowing.register(&dataset);
        Ok(())
    }

    // Selection

    pub fn toggle_dataset(&self, id: &DatasetId, is_selected: bool) -> SessionResult<bool> {
        if is_selected {
            self.ensure_registered(id)?;
        }
        Ok(self.selection.toggle_dataset(id, is_selected))
    }

    pub fn toggle_view(&self, plane: ViewPlane, is_selected: bool) -> bool {
        self.selection.toggle_view(plane, is_selected)
    }

    pub fn toggle_tool(&self, tool: ViewerTool, is_selected: bool) -> bool {
        self.selection.toggle_tool(tool, is_selected)
    }

    pub fn current_selection(&self) -> SelectionSnapshot {
        self.selection.current()
    }

    pub fn subscribe_selection(&self) -> Subscription<SelectionSnapshot> {
        self.selection.subscribe()
    }

    // Navigation

    pub fn slice_index(&self, id: &DatasetId, plane: ViewPlane) -> SessionResult<usize> {
        self.ensure_registered(id)?;
        self.navigation.get_index(id, plane)
    }

    pub fn max_slice_index(&self, id: &DatasetId, plane: ViewPlane) -> SessionResult<usize> {
        self.ensure_registered(id)?;
        self.navigation.max_index(id, plane)
    }

    pub fn set_slice_index(&self, id: &DatasetId, plane: ViewPlane, value: i64) -> SessionResult<usize> {
        self.ensure_registered(id)?;
        self.navigation.set_index(id, plane, value)
    }

    pub fn increment_slice(&self, id: &DatasetId, plane: ViewPlane, step: usize) -> SessionResult<usize> {
        self.ensure_registered(id)?;
        self.navigation.increment(id, plane, step)
    }

    pub fn decrement_slice(&self, id: &DatasetId, plane: ViewPlane, step: usize) -> SessionResult<usize> {
        self.ensure_registered(id)?;
        self.navigation.decrement(id, plane, step)
    }

    pub fn subscribe_slice_index(
        &self,
        id: &DatasetId,
        plane: ViewPlane,
    ) -> SessionResult<Subscription<usize>> {
        self.ensure_registered(id)?;
        self.navigation.subscribe(id, plane)
    }

    /// Moves every visible (dataset, plane) pair by `steps` scroll steps.
    pub fn scroll(&self, steps: i64) {
        if steps == 0 {
            return;
        }
        let delta = steps.saturating_mul(self.config.scroll_step as i64);
        self.for_each_visible(|id, plane| self.navigation.step_by(id, plane, delta));
    }

    /// Feeds a raw wheel delta through the scroll accumulator. Returns the
    /// number of steps applied.
    pub fn scroll_by_wheel(&self, delta: f32) -> i64 {
        if self.selection.current().is_empty() {
            return 0;
        }
        let steps = self.scroll.lock().steps_for(delta);
        self.scroll(steps);
        steps
    }

    /// Sets the same slice index on every visible (dataset, plane) pair.
    pub fn set_scroll_position(&self, index: i64) {
        self.for_each_visible(|id, plane| self.navigation.set_index(id, plane, index));
    }

    pub fn max_selected_indices(&self) -> BTreeMap<(DatasetId, ViewPlane), usize> {
        let selection = self.selection.current();
        selection
            .visible_pairs()
            .filter_map(|(id, plane)| {
                self.max_slice_index(id, plane)
                    .ok()
                    .map(|max| ((id.clone(), plane), max))
            })
            .collect()
    }

    fn for_each_visible(&self, mut apply: impl FnMut(&DatasetId, ViewPlane) -> SessionResult<usize>) {
        let selection = self.selection.current();
        for (id, plane) in selection.visible_pairs() {
            let result = self.ensure_registered(id).and_then(|_| apply(id, plane));
            if let Err(err) = result {
                debug!("skipping {id} {plane}: {err}");
            }
        }
    }

    // Windowing

    pub fn windowing_state(&self, id: &DatasetId) -> SessionResult<WindowingState> {
        self.ensure_registered(id)?;
        self.windowing.get_state(id)
    }

    pub fn set_window_center(&self, id: &DatasetId, value: f32) -> SessionResult<WindowingState> {
        self.ensure_registered(id)?;
        self.windowing.set_center(id, value)
    }

    pub fn set_window_width(&self, id: &DatasetId, value: f32) -> SessionResult<WindowingState> {
        self.ensure_registered(id)?;
        self.windowing.set_width(id, value)
    }

    pub fn apply_preset(&self, id: &DatasetId, name: &str) -> SessionResult<WindowingState> {
        let result = self
            .ensure_registered(id)
            .and_then(|_| self.windowing.apply_preset(id, name));
        self.surface(result)
    }

    pub fn drag_window(&self, id: &DatasetId, dx: f32, dy: f32) -> SessionResult<WindowingState> {
        self.ensure_registered(id)?;
        self.windowing.adjust_by_drag(id, dx, dy)
    }

    pub fn preset_names(&self) -> Vec<&str> {
        self.windowing.preset_names()
    }

    pub fn subscribe_windowing(&self, id: &DatasetId) -> SessionResult<Subscription<WindowingState>> {
        self.ensure_registered(id)?;
        self.windowing.subscribe(id)
    }

    // Slices

    pub fn slice(&self, plane: ViewPlane, id: &DatasetId, index: usize) -> SessionResult<SliceData> {
        self.slices.slice(plane, id, index)
    }

    pub fn slice_at_cursor(&self, plane: ViewPlane, id: &DatasetId) -> SessionResult<SliceData> {
        let index = self.slice_index(id, plane)?;
        self.slices.slice(plane, id, index)
    }

    // Jobs

    /// Submits `request` and starts the engine on a worker thread.
    pub fn run_inference(&self, request: InferenceRequest) -> SessionResult<JobId> {
        let result = self.start_inference(request);
        self.surface(result)
    }

    fn start_inference(&self, mut request: InferenceRequest) -> SessionResult<JobId> {
        if let Some(missing) = request
            .inputs
            .iter()
            .find(|id| self.repository.metadata(id).is_none())
        {
            return Err(SessionError::DatasetNotFound(missing.clone()));
        }

        let job_id = request.job_id.take().unwrap_or_else(|| {
            JobId::new(format!("job-{}", self.next_job.fetch_add(1, Ordering::Relaxed)))
        });
        let total = self.engine.plan(&request);
        let handle = self.jobs.submit(job_id.clone(), total)?;
        request.job_id = Some(job_id.clone());

        info!("running {} on {} input(s) as {job_id}", request.model, request.inputs.len());
        let worker = spawn_job(Arc::clone(&self.engine), request, handle);
        let mut workers = self.workers.lock();
        workers.retain(|worker| !worker.is_finished());
        workers.push(worker);
        Ok(job_id)
    }

    /// Stores a request to be run the next time the viewer is activated.
    pub fn queue_inference(&self, request: InferenceRequest) {
        *self.pending_inference.lock() = Some(request);
    }

    /// Runs the queued request, if any. A request that fails to start stays
    /// queued for the next activation unless a newer one replaced it.
    pub fn run_if_triggered(&self) -> SessionResult<bool> {
        let Some(request) = self.pending_inference.lock().take() else {
            return Ok(false);
        };
        if let Err(err) = self.run_inference(request.clone()) {
            self.pending_inference.lock().get_or_insert(request);
            return Err(err);
        }
        self.notify(LOADING_NOTICE);
        Ok(true)
    }

    pub fn cancel_job(&self, job_id: &JobId) -> SessionResult<bool> {
        let result = self.jobs.cancel(job_id);
        self.surface(result)
    }

    pub fn remove_job(&self, job_id: &JobId) -> SessionResult<ProgressSnapshot> {
        let result = self.jobs.remove(job_id);
        self.surface(result)
    }

    pub fn job_list(&self) -> Vec<ProgressSnapshot> {
        self.jobs.list()
    }

    pub fn subscribe_job(&self, job_id: &JobId) -> Option<Subscription<ProgressSnapshot>> {
        self.jobs.subscribe(job_id)
    }

    pub fn subscribe_jobs(&self) -> Subscription<Vec<JobId>> {
        self.jobs.subscribe_jobs()
    }

    /// Blocks until every worker started so far has returned.
    pub fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                debug!("inference worker exited by panic");
            }
        }
    }

    // Notifications

    /// Fire-and-forget message for the user; not part of session state.
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("notify: {message}");
        let _ = self.notify_tx.send(message);
    }

    pub fn drain_notifications(&self) -> Vec<String> {
        let receiver = self.notify_rx.lock();
        let mut messages = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        messages
    }

    fn surface<T>(&self, result: SessionResult<T>) -> SessionResult<T> {
        if let Err(err) = &result {
            self.notify(err.to_string());
        }
        result
    }
}
