use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use voxview::launch::{parse_launch_request_from_args, parse_volume_spec, JobSpec, VolumeSpec};
use voxview::{
    DatasetId, InferenceEngine, InferenceRequest, JobHandle, JobId, MemoryVolumeRepository,
    SessionConfig, SessionController, SteppedEngine, ViewPlane, Volume, VolumeRepository,
};

const STEP_DELAY: Duration = Duration::from_millis(40);
const POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Runs each launch job with the step count it was given on the command line.
struct LaunchEngine {
    steps: HashMap<String, u32>,
}

impl InferenceEngine for LaunchEngine {
    fn plan(&self, request: &InferenceRequest) -> u32 {
        self.steps.get(&request.model).copied().unwrap_or(1).max(1)
    }

    fn run(&self, request: &InferenceRequest, job: &JobHandle) -> Result<()> {
        SteppedEngine::new(self.plan(request), STEP_DELAY).run(request, job)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut request = parse_launch_request_from_args(&cli_args)
        .map_err(|err| anyhow!("Launch URL/args error: {err}"))?;
    if request.volumes.is_empty() {
        let phantom = parse_volume_spec("phantom:48x48x32:CT").map_err(|err| anyhow!(err))?;
        request.volumes.push(phantom);
    }
    if request.jobs.is_empty() {
        request.jobs.push(JobSpec {
            id: "segmentation".to_string(),
            steps: 8,
        });
    }

    let config = SessionConfig::load_or_default(request.config_path.as_deref())?;
    let repository = Arc::new(MemoryVolumeRepository::new());
    for spec in &request.volumes {
        repository.insert(synthetic_volume(spec)?);
    }

    let engine = LaunchEngine {
        steps: request
            .jobs
            .iter()
            .map(|job| (job.id.clone(), job.steps))
            .collect(),
    };
    let controller = SessionController::new(
        config,
        Arc::clone(&repository) as Arc<dyn VolumeRepository>,
        Arc::new(engine),
    );

    let datasets = repository.loaded_datasets().into_iter().collect::<Vec<_>>();
    let mut jobs = request.jobs.iter();
    if let Some(first) = jobs.next() {
        controller.queue_inference(job_request(first, &datasets));
    }
    controller.activate()?;
    for job in jobs {
        controller.run_inference(job_request(job, &datasets))?;
    }

    for id in &datasets {
        controller.toggle_dataset(id, true)?;
    }
    controller.scroll(3);
    for id in &datasets {
        let windowing = match controller.apply_preset(id, "Brain") {
            Ok(state) => state,
            Err(err) => {
                warn!("{err}");
                controller.windowing_state(id)?
            }
        };
        let index = controller.slice_index(id, ViewPlane::Axial)?;
        let slice = controller.slice_at_cursor(ViewPlane::Axial, id)?;
        info!(
            "{id}: axial slice {index}/{} is {}x{} {} at {:.2}x{:.2} mm, window {:.0}/{:.0}",
            controller.max_slice_index(id, ViewPlane::Axial)?,
            slice.width,
            slice.height,
            slice.modality,
            slice.spacing.column,
            slice.spacing.row,
            windowing.center,
            windowing.width
        );
    }

    watch_jobs(&controller);
    for message in controller.drain_notifications() {
        info!("notice: {message}");
    }
    for job in controller.job_list() {
        controller.remove_job(&job.job_id)?;
    }
    controller.join_workers();
    Ok(())
}

fn job_request(job: &JobSpec, datasets: &[DatasetId]) -> InferenceRequest {
    InferenceRequest::new(job.id.clone(), datasets.to_vec()).with_job_id(job.id.as_str())
}

fn watch_jobs(controller: &SessionController) {
    let mut subscriptions = controller
        .job_list()
        .into_iter()
        .filter_map(|job| {
            controller
                .subscribe_job(&job.job_id)
                .map(|subscription| (job.job_id, subscription))
        })
        .collect::<Vec<(JobId, _)>>();

    while !subscriptions.is_empty() {
        subscriptions.retain_mut(|(job_id, subscription)| {
            let Some(progress) = subscription.try_next() else {
                return !subscription.is_closed();
            };
            info!(
                "[{job_id}] {:>5.1}% {}",
                progress.fraction() * 100.0,
                progress.summary()
            );
            !progress.is_terminal()
        });
        thread::sleep(POLL_INTERVAL);
    }
}

fn synthetic_volume(spec: &VolumeSpec) -> Result<Volume> {
    let extents = spec.extents;
    let count = extents
        .voxel_count()
        .with_context(|| format!("Volume {} is too large", spec.name))?;
    let center = [
        extents.x as f32 / 2.0,
        extents.y as f32 / 2.0,
        extents.z as f32 / 2.0,
    ];
    let radius = center.iter().copied().fold(f32::MAX, f32::min).max(1.0);

    let mut voxels = Vec::with_capacity(count);
    for z in 0..extents.z {
        for y in 0..extents.y {
            for x in 0..extents.x {
                let dx = x as f32 - center[0];
                let dy = y as f32 - center[1];
                let dz = z as f32 - center[2];
                let distance = (dx * dx + dy * dy + dz * dz).sqrt() / radius;
                voxels.push(-1000.0 + 2000.0 * (1.0 - distance).clamp(0.0, 1.0));
            }
        }
    }

    Volume::new(
        spec.name.as_str(),
        spec.name.clone(),
        extents,
        voxels,
        [1.0, 1.0, 2.5],
        spec.modality.clone(),
    )
}
