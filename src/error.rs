use thiserror::Error;

use crate::jobs::{JobId, JobState};
use crate::model::DatasetId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("dataset {0} is not loaded")]
    DatasetNotFound(DatasetId),
    #[error("unknown windowing preset {0:?}")]
    UnknownPreset(String),
    #[error("job {0} is already running")]
    DuplicateJob(JobId),
    #[error("job {job_id} is still {state:?} and cannot be removed")]
    JobNotTerminal { job_id: JobId, state: JobState },
    #[error("job {0} does not exist")]
    JobNotFound(JobId),
}

pub type SessionResult<T> = Result<T, SessionError>;
