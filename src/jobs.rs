use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::cancellation::{CancellationSource, CancellationToken};
use crate::error::{SessionError, SessionResult};
use crate::publish::{StateCell, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// `Pending -> Running -> {Finished, Errored}` and `Running -> Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    Finished,
    Errored,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Errored | JobState::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub step: u32,
    pub total: u32,
    pub status: String,
    pub state: JobState,
}

impl ProgressSnapshot {
    pub fn error(&self) -> bool {
        self.state == JobState::Errored
    }

    pub fn finished(&self) -> bool {
        self.state == JobState::Finished
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn fraction(&self) -> f32 {
        (self.step as f32 / self.total.max(1) as f32).clamp(0.0, 1.0)
    }

    /// One-line description for a job card.
    pub fn summary(&self) -> String {
        match self.state {
            JobState::Errored => format!("Error in model inference: {}", self.status),
            JobState::Finished => "Finished inference".to_string(),
            JobState::Canceled => "Canceled".to_string(),
            JobState::Pending => "Waiting to start".to_string(),
            JobState::Running if self.total == 1 => self.status.clone(),
            JobState::Running => format!(
                "{:.1}% done ({}/{} steps)",
                self.fraction() * 100.0,
                self.step,
                self.total - 1
            ),
        }
    }
}

#[derive(Debug)]
struct JobEntry {
    seq: u64,
    progress: StateCell<ProgressSnapshot>,
    cancel: CancellationSource,
}

impl JobEntry {
    fn state(&self) -> JobState {
        self.progress.read(|snapshot| snapshot.state)
    }
}

#[derive(Debug, Default)]
struct RegistryShared {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    order: StateCell<Vec<JobId>>,
    next_seq: AtomicU64,
}

/// Live progress of every submitted job. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    shared: Arc<RegistryShared>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job and moves it straight to `Running`.
    ///
    /// An id may be reused once its previous job is terminal; the old entry
    /// and its subscribers are dropped.
    pub fn submit(&self, job_id: impl Into<JobId>, total: u32) -> SessionResult<JobHandle> {
        let job_id = job_id.into();
        let total = total.max(1);
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);

        let entry = Arc::new(JobEntry {
            seq,
            progress: StateCell::new(ProgressSnapshot {
                job_id: job_id.clone(),
                step: 0,
                total,
                status: String::new(),
                state: JobState::Pending,
            }),
            cancel: CancellationSource::new(),
        });

        {
            let mut jobs = self.shared.jobs.write();
            if let Some(existing) = jobs.get(&job_id) {
                let state = existing.state();
                if !state.is_terminal() {
                    return Err(SessionError::DuplicateJob(job_id));
                }
                debug!("replacing {state:?} job {job_id}");
            }

            entry.progress.update(|snapshot| {
                snapshot.state = JobState::Running;
                true
            });
            jobs.insert(job_id.clone(), Arc::clone(&entry));
            self.publish_order(&jobs);
        }

        info!("job {job_id} started ({total} steps)");
        Ok(JobHandle {
            registry: self.clone(),
            job_id,
            seq,
            token: entry.cancel.token(),
        })
    }

    /// Records progress of a running job. Steps never move backwards: a
    /// regression keeps the previous step but still takes the new status.
    pub fn report_progress(&self, job_id: &JobId, step: u32, status: impl Into<String>) -> bool {
        self.progress_for(job_id, None, step, status.into())
    }

    pub fn report_finished(&self, job_id: &JobId) -> bool {
        self.finish_for(job_id, None)
    }

    pub fn report_error(&self, job_id: &JobId, message: impl Into<String>) -> bool {
        self.fail_for(job_id, None, message.into())
    }

    /// Marks a running job canceled and signals its executor. The executor is
    /// expected to notice at its next check point; this call never waits.
    pub fn cancel(&self, job_id: &JobId) -> SessionResult<bool> {
        let entry = self
            .entry(job_id, None)
            .ok_or_else(|| SessionError::JobNotFound(job_id.clone()))?;

        let canceled = entry.progress.update(|snapshot| {
            if snapshot.state != JobState::Running {
                return false;
            }
            snapshot.state = JobState::Canceled;
            true
        });
        if canceled {
            entry.cancel.cancel();
            info!("job {job_id} canceled");
        }
        Ok(canceled)
    }

    /// Dismisses a terminal job, closing its progress stream.
    pub fn remove(&self, job_id: &JobId) -> SessionResult<ProgressSnapshot> {
        let mut jobs = self.shared.jobs.write();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| SessionError::JobNotFound(job_id.clone()))?;
        let snapshot = entry.progress.get();
        if !snapshot.state.is_terminal() {
            return Err(SessionError::JobNotTerminal {
                job_id: job_id.clone(),
                state: snapshot.state,
            });
        }

        jobs.remove(job_id);
        self.publish_order(&jobs);
        debug!("job {job_id} removed");
        Ok(snapshot)
    }

    pub fn subscribe(&self, job_id: &JobId) -> Option<Subscription<ProgressSnapshot>> {
        self.entry(job_id, None)
            .map(|entry| entry.progress.subscribe())
    }

    pub fn snapshot(&self, job_id: &JobId) -> Option<ProgressSnapshot> {
        self.entry(job_id, None).map(|entry| entry.progress.get())
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.shared.jobs.read().contains_key(job_id)
    }

    /// Snapshots of all jobs in submission order.
    pub fn list(&self) -> Vec<ProgressSnapshot> {
        let jobs = self.shared.jobs.read();
        let mut entries = jobs.values().collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| entry.progress.get())
            .collect()
    }

    /// Stream of job ids in submission order; changes whenever a job is
    /// submitted or removed.
    pub fn subscribe_jobs(&self) -> Subscription<Vec<JobId>> {
        self.shared.order.subscribe()
    }

    pub fn running_count(&self) -> usize {
        self.shared
            .jobs
            .read()
            .values()
            .filter(|entry| !entry.state().is_terminal())
            .count()
    }

    fn publish_order(&self, jobs: &HashMap<JobId, Arc<JobEntry>>) {
        let mut ordered = jobs.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|(_, entry)| entry.seq);
        self.shared
            .order
            .set(ordered.into_iter().map(|(id, _)| id.clone()).collect());
    }

    fn entry(&self, job_id: &JobId, seq: Option<u64>) -> Option<Arc<JobEntry>> {
        self.shared
            .jobs
            .read()
            .get(job_id)
            .filter(|entry| seq.map_or(true, |seq| entry.seq == seq))
            .cloned()
    }

    fn progress_for(&self, job_id: &JobId, seq: Option<u64>, step: u32, status: String) -> bool {
        let Some(entry) = self.entry(job_id, seq) else {
            debug!("ignoring progress for unknown job {job_id}");
            return false;
        };

        let mut accepted = false;
        entry.progress.update(|snapshot| {
            if snapshot.state != JobState::Running {
                return false;
            }
            accepted = true;
            let mut step = step.min(snapshot.total);
            if step < snapshot.step {
                warn!(
                    "job {job_id} progress went back from {} to {step}; keeping {}",
                    snapshot.step, snapshot.step
                );
                step = snapshot.step;
            }
            let changed = step != snapshot.step || status != snapshot.status;
            snapshot.step = step;
            snapshot.status = status;
            changed
        });
        if !accepted {
            debug!("ignoring progress for job {job_id}: no longer running");
        }
        accepted
    }

    fn finish_for(&self, job_id: &JobId, seq: Option<u64>) -> bool {
        let Some(entry) = self.entry(job_id, seq) else {
            return false;
        };
        let finished = entry.progress.update(|snapshot| {
            if snapshot.state.is_terminal() {
                return false;
            }
            snapshot.state = JobState::Finished;
            snapshot.step = snapshot.total;
            true
        });
        if finished {
            info!("job {job_id} finished");
        }
        finished
    }

    fn fail_for(&self, job_id: &JobId, seq: Option<u64>, message: String) -> bool {
        let Some(entry) = self.entry(job_id, seq) else {
            return false;
        };
        let failed = entry.progress.update(|snapshot| {
            if snapshot.state.is_terminal() {
                return false;
            }
            snapshot.state = JobState::Errored;
            snapshot.status = message;
            true
        });
        if failed {
            warn!("job {job_id} failed");
        }
        failed
    }
}

/// Producer side of one job, handed to the executing task.
///
/// Reports are bound to the submission that created the handle, so a handle
/// outliving its job never writes into a later job with the same id.
#[derive(Debug, Clone)]
pub struct JobHandle {
    registry: JobRegistry,
    job_id: JobId,
    seq: u64,
    token: CancellationToken,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn report_progress(&self, step: u32, status: impl Into<String>) -> bool {
        self.registry
            .progress_for(&self.job_id, Some(self.seq), step, status.into())
    }

    pub fn finish(&self) -> bool {
        self.registry.finish_for(&self.job_id, Some(self.seq))
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.registry
            .fail_for(&self.job_id, Some(self.seq), message.into())
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        self.registry
            .entry(&self.job_id, Some(self.seq))
            .map(|entry| entry.progress.get())
    }
}
