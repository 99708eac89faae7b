//! Eligibility filtering ahead of a stage.
//!
//! A [`Pipeline`] is an ordered list of [`Segment`]s. An *ensure* segment
//! runs an enrichment step through the scheduler so that later predicates
//! have the cached info they need; a *filter* segment drops accounts that
//! fail its predicate. Every segment sees exactly what the previous one let
//! through, and an empty set flows on like any other.

mod predicate;

pub use predicate::{Decision, FilterPolicy, Membership, Predicate};

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::account::SharedAccount;
use crate::engine::{Scheduler, Step};
use crate::error::RunError;

/// One pipeline element.
#[derive(Clone)]
pub enum Segment {
    /// Fetch and cache missing info. Must be a no-op for accounts that
    /// already have it.
    Ensure(Arc<dyn Step>),
    Filter(Predicate),
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Ensure(step) => write!(f, "Ensure({})", step.name()),
            Segment::Filter(predicate) => write!(f, "Filter({predicate})"),
        }
    }
}

impl Segment {
    pub async fn apply(
        &self,
        accounts: Vec<SharedAccount>,
        scheduler: &Scheduler,
        policy: &FilterPolicy,
    ) -> Result<Vec<SharedAccount>, RunError> {
        match self {
            Segment::Ensure(step) => {
                scheduler.run(&accounts, step.clone()).await?;
                Ok(accounts)
            }
            Segment::Filter(predicate) => Ok(filter_accounts(accounts, predicate, policy).await),
        }
    }
}

/// Keep the accounts `predicate` accepts (or only warns about).
pub async fn filter_accounts(
    accounts: Vec<SharedAccount>,
    predicate: &Predicate,
    policy: &FilterPolicy,
) -> Vec<SharedAccount> {
    if accounts.is_empty() {
        return accounts;
    }

    let mut survivors = Vec::with_capacity(accounts.len());
    for shared in accounts {
        let decision = {
            let account = shared.lock().await;
            let decision = predicate.evaluate(&account, policy);
            match &decision {
                Decision::Accept => {}
                Decision::Warn(reason) => warn!("{} {reason} (ignored)", *account),
                Decision::Reject(reason) if predicate.is_threshold() => {
                    warn!("{} {reason}", *account)
                }
                Decision::Reject(reason) => debug!("{} filtered out: {reason}", *account),
            }
            decision
        };
        if decision.admits() {
            survivors.push(shared);
        }
    }

    if survivors.is_empty() {
        warn!("({predicate}) no account matches the criteria");
    }
    survivors
}

/// Ordered segments, applied left to right.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    segments: Vec<Segment>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(mut self, step: Arc<dyn Step>) -> Self {
        self.segments.push(Segment::Ensure(step));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.segments.push(Segment::Filter(predicate));
        self
    }

    /// Append all of `other`'s segments after this pipeline's.
    pub fn then(mut self, other: Pipeline) -> Self {
        self.segments.extend(other.segments);
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Survivors of every segment, in input order. Only a fatal error from
    /// an ensure step stops the pipeline early.
    pub async fn apply(
        &self,
        accounts: Vec<SharedAccount>,
        scheduler: &Scheduler,
        policy: &FilterPolicy,
    ) -> Result<Vec<SharedAccount>, RunError> {
        let mut current = accounts;
        for segment in &self.segments {
            current = segment.apply(current, scheduler, policy).await?;
        }
        Ok(current)
    }
}
