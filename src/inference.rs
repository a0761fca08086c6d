use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use log::{debug, error};

use crate::jobs::{JobHandle, JobId};
use crate::model::DatasetId;

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    /// Generated by the controller when absent.
    pub job_id: Option<JobId>,
    pub model: String,
    pub inputs: Vec<DatasetId>,
}

impl InferenceRequest {
    pub fn new(model: impl Into<String>, inputs: Vec<DatasetId>) -> Self {
        Self {
            job_id: None,
            model: model.into(),
            inputs,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// A model runner. `run` blocks the calling worker thread; it reports through
/// `job` and should return promptly once `job.is_cancelled()` turns true.
pub trait InferenceEngine: Send + Sync {
    /// Number of progress steps `run` will report for `request`.
    fn plan(&self, request: &InferenceRequest) -> u32;

    fn run(&self, request: &InferenceRequest, job: &JobHandle) -> Result<()>;
}

/// Runs `request` on a worker thread and records the outcome on `job`.
pub fn spawn_job(
    engine: Arc<dyn InferenceEngine>,
    request: InferenceRequest,
    job: JobHandle,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.run(&request, &job)));
        match outcome {
            Ok(Ok(())) => {
                if !job.finish() {
                    debug!("job {} returned after it was already settled", job.job_id());
                }
            }
            Ok(Err(err)) if job.is_cancelled() => {
                debug!("job {} stopped after cancel: {err:#}", job.job_id());
            }
            Ok(Err(err)) => {
                job.fail(format!("{err:#}"));
            }
            Err(_) => {
                error!("inference engine panicked while running job {}", job.job_id());
                job.fail("inference engine panicked");
            }
        }
    })
}

/// Engine that walks through a fixed number of timed steps. Used by the
/// driver binary and tests in place of a real model.
#[derive(Debug, Clone)]
pub struct SteppedEngine {
    pub steps: u32,
    pub step_delay: Duration,
    pub fail_at: Option<u32>,
}

impl SteppedEngine {
    pub fn new(steps: u32, step_delay: Duration) -> Self {
        Self {
            steps,
            step_delay,
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, step: u32) -> Self {
        self.fail_at = Some(step);
        self
    }
}

impl InferenceEngine for SteppedEngine {
    fn plan(&self, _request: &InferenceRequest) -> u32 {
        self.steps.max(1)
    }

    fn run(&self, request: &InferenceRequest, job: &JobHandle) -> Result<()> {
        let total = self.plan(request);
        for step in 0..total {
            if job.token().wait_timeout(self.step_delay) {
                bail!("{} canceled at step {step}", request.model);
            }
            if self.fail_at == Some(step) {
                bail!("{} failed at step {step}", request.model);
            }
            job.report_progress(step, format!("{}: step {step}", request.model));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobRegistry, JobState};

    fn wait_terminal(registry: &JobRegistry, id: &JobId) -> JobState {
        for _ in 0..500 {
            let state = registry.snapshot(id).expect("job exists").state;
            if state.is_terminal() {
                return state;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("job {id} never reached a terminal state");
    }

    #[test]
    fn successful_run_finishes_job() {
        let registry = JobRegistry::new();
        let engine = Arc::new(SteppedEngine::new(3, Duration::from_millis(1)));
        let request = InferenceRequest::new("seg", Vec::new());
        let handle = registry
            .submit("ok", engine.plan(&request))
            .expect("fresh id");

        spawn_job(engine, request, handle)
            .join()
            .expect("worker should not panic");
        let snapshot = registry.snapshot(&JobId::from("ok")).expect("job exists");
        assert_eq!(snapshot.state, JobState::Finished);
        assert_eq!(snapshot.step, 3);
    }

    #[test]
    fn engine_error_marks_job_errored() {
        let registry = JobRegistry::new();
        let engine = Arc::new(SteppedEngine::new(5, Duration::from_millis(1)).failing_at(2));
        let handle = registry.submit("bad", 5).expect("fresh id");

        spawn_job(engine, InferenceRequest::new("seg", Vec::new()), handle)
            .join()
            .expect("worker should not panic");
        let snapshot = registry.snapshot(&JobId::from("bad")).expect("job exists");
        assert!(snapshot.error());
        assert_eq!(snapshot.status, "seg failed at step 2");
    }

    #[test]
    fn cancel_stops_engine_and_stays_canceled() {
        let registry = JobRegistry::new();
        let id = JobId::from("slow");
        let engine = Arc::new(SteppedEngine::new(1000, Duration::from_secs(1)));
        let handle = registry.submit(id.clone(), 1000).expect("fresh id");
        let worker = spawn_job(engine, InferenceRequest::new("seg", Vec::new()), handle);

        assert_eq!(registry.cancel(&id), Ok(true));
        worker.join().expect("worker should not panic");
        assert_eq!(wait_terminal(&registry, &id), JobState::Canceled);
    }

    struct PanickingEngine;

    impl InferenceEngine for PanickingEngine {
        fn plan(&self, _request: &InferenceRequest) -> u32 {
            1
        }

        fn run(&self, _request: &InferenceRequest, _job: &JobHandle) -> Result<()> {
            panic!("model exploded");
        }
    }

    #[test]
    fn panicking_engine_errors_the_job() {
        let registry = JobRegistry::new();
        let handle = registry.submit("panic", 1).expect("fresh id");
        spawn_job(
            Arc::new(PanickingEngine),
            InferenceRequest::new("seg", Vec::new()),
            handle,
        )
        .join()
        .expect("panic is caught inside the worker");
        assert!(registry
            .snapshot(&JobId::from("panic"))
            .expect("job exists")
            .error());
    }
}
