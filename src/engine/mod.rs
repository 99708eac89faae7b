pub mod scheduler;

use std::ops::AddAssign;

use async_trait::async_trait;

use crate::account::Account;
use crate::error::StepError;

pub use scheduler::{Scheduler, SchedulerConfig};

/// One unit of per-account work. The scheduler runs it once per account,
/// holding the account's lock and both admission gates for its duration.
///
/// A step mutates the account in place. Failures go back to the scheduler,
/// which classifies them; a step never decides on its own whether to abort
/// the batch.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, account: &mut Account) -> Result<(), StepError>;
}

/// Counts from one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub scheduled: usize,
    /// Step returned `Ok`.
    pub completed: usize,
    /// Step failed and the classifier absorbed the failure.
    pub absorbed: usize,
    /// Cancelled before the step started.
    pub cancelled: usize,
    /// Cancelled while the step was running.
    pub interrupted: usize,
}

impl RunReport {
    pub fn settled(&self) -> usize {
        self.completed + self.absorbed + self.cancelled + self.interrupted
    }
}

impl AddAssign for RunReport {
    fn add_assign(&mut self, other: Self) {
        self.scheduled += other.scheduled;
        self.completed += other.completed;
        self.absorbed += other.absorbed;
        self.cancelled += other.cancelled;
        self.interrupted += other.interrupted;
    }
}
