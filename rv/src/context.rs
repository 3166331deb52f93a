//! Job step context shared with the launcher

use tracing::debug;

/// Immutable description of the job step being coordinated
///
/// The job id doubles as the magic token every message must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStepContext {
    pub job_id: u32,
    pub step_id: u32,
    /// Ranks of the tasks in launch order
    pub task_ranks: Vec<u32>,
}

impl JobStepContext {
    /// Context for a step with ranks `0..task_count`
    pub fn new(job_id: u32, step_id: u32, task_count: u32) -> Self {
        debug!(job_id, step_id, task_count, "JobStepContext::new: called");
        Self {
            job_id,
            step_id,
            task_ranks: (0..task_count).collect(),
        }
    }

    /// Magic token expected in init and abort messages
    pub fn magic(&self) -> u32 {
        self.job_id
    }

    /// Total task count N
    pub fn task_count(&self) -> usize {
        self.task_ranks.len()
    }
}
