//! Runs a [`Step`] across many accounts under two admission gates: one
//! global, one per resource key (proxy). The first fatal verdict cancels
//! everything still pending.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{RunReport, Step};
use crate::account::{Proxy, ResourceKey, SharedAccount};
use crate::classify::{Classifier, Verdict};
use crate::config::Settings;
use crate::error::{ConfigError, RunError, StepError};
use crate::store::AccountStore;

/// Limits the scheduler is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub global_limit: usize,
    pub per_resource_limit: usize,
    /// Resource for accounts without their own proxy. `None` means direct.
    pub default_resource: Option<Proxy>,
}

impl SchedulerConfig {
    pub fn new(global_limit: usize, per_resource_limit: usize) -> Self {
        Self {
            global_limit,
            per_resource_limit,
            default_resource: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            global_limit: settings.max_tasks,
            per_resource_limit: settings.max_tasks_per_proxy,
            default_resource: settings.default_proxy.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.global_limit == 0 {
            return Err(ConfigError::NonPositiveLimit {
                name: "global_limit",
                value: 0,
            });
        }
        if self.per_resource_limit == 0 {
            return Err(ConfigError::NonPositiveLimit {
                name: "per_resource_limit",
                value: 0,
            });
        }
        Ok(())
    }
}

/// How one task ended.
enum TaskOutcome {
    Completed,
    Absorbed,
    Cancelled { started: bool },
    Fatal(StepError),
}

pub struct Scheduler {
    config: SchedulerConfig,
    classifier: Arc<Classifier>,
    store: Arc<dyn AccountStore>,
}

impl Scheduler {
    /// Rejects zero limits up front; a scheduler that exists is runnable.
    pub fn new(config: SchedulerConfig, store: Arc<dyn AccountStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            classifier: Arc::new(Classifier::default()),
            store,
        })
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Run `step` once per account and wait for every task to settle.
    ///
    /// Returns the first fatal error if any task produced one. Absorbed
    /// failures only show up in the report.
    pub async fn run(
        &self,
        accounts: &[SharedAccount],
        step: Arc<dyn Step>,
    ) -> Result<RunReport, RunError> {
        let mut report = RunReport {
            scheduled: accounts.len(),
            ..RunReport::default()
        };
        if accounts.is_empty() {
            return Ok(report);
        }

        // Partition before spawning: a duplicate account's lock may be held
        // by an already running task.
        let mut keys = Vec::with_capacity(accounts.len());
        for account in accounts {
            let account = account.lock().await;
            keys.push(ResourceKey::resolve(
                account.proxy.as_ref(),
                self.config.default_resource.as_ref(),
            ));
        }

        let global = Arc::new(Semaphore::new(self.config.global_limit));
        let mut gates: HashMap<ResourceKey, Arc<Semaphore>> = HashMap::new();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (account, key) in accounts.iter().zip(keys) {
            let gate = gates
                .entry(key)
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_resource_limit)))
                .clone();
            let task = Task {
                account: account.clone(),
                step: step.clone(),
                global: global.clone(),
                gate,
                cancel: cancel.clone(),
                classifier: self.classifier.clone(),
                store: self.store.clone(),
            };
            tasks.spawn(task.drive());
        }

        debug!(
            step = step.name(),
            accounts = accounts.len(),
            resources = gates.len(),
            "scheduled"
        );

        let mut fatal: Option<RunError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Completed) => report.completed += 1,
                Ok(TaskOutcome::Absorbed) => report.absorbed += 1,
                Ok(TaskOutcome::Cancelled { started: false }) => report.cancelled += 1,
                Ok(TaskOutcome::Cancelled { started: true }) => report.interrupted += 1,
                Ok(TaskOutcome::Fatal(e)) => {
                    if fatal.is_none() {
                        error!(step = step.name(), "aborting batch: {e}");
                        fatal = Some(RunError::Fatal(e));
                    } else {
                        debug!(step = step.name(), "further fatal error after abort: {e}");
                    }
                }
                Err(join_error) => {
                    cancel.cancel();
                    if fatal.is_none() {
                        error!(step = step.name(), "task panicked: {join_error}");
                        fatal = Some(RunError::Panicked(join_error.to_string()));
                    }
                }
            }
        }

        info!(
            step = step.name(),
            completed = report.completed,
            absorbed = report.absorbed,
            cancelled = report.cancelled + report.interrupted,
            "finished"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Everything one spawned task owns.
struct Task {
    account: SharedAccount,
    step: Arc<dyn Step>,
    global: Arc<Semaphore>,
    gate: Arc<Semaphore>,
    cancel: CancellationToken,
    classifier: Arc<Classifier>,
    store: Arc<dyn AccountStore>,
}

impl Task {
    async fn drive(self) -> TaskOutcome {
        // Global gate first, then the resource gate. Same order in every task.
        let Some(_global) = self.admit(self.global.clone()).await else {
            return TaskOutcome::Cancelled { started: false };
        };
        let Some(_gate) = self.admit(self.gate.clone()).await else {
            return TaskOutcome::Cancelled { started: false };
        };

        let mut account = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return TaskOutcome::Cancelled { started: false },
            guard = self.account.lock() => guard,
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return TaskOutcome::Cancelled { started: true },
            result = self.step.run(&mut *account) => result,
        };

        let Err(error) = result else {
            return TaskOutcome::Completed;
        };

        match self.classifier.classify(&error) {
            Verdict::StatusUpdate { status, durable } => {
                let changed = account.classify_as(status);
                warn!("{} {error} (status {})", *account, account.status());
                if durable
                    && changed
                    && let Err(e) = self.store.save(&account).await
                {
                    self.cancel.cancel();
                    return TaskOutcome::Fatal(StepError::Internal(
                        e.context(format!("failed to save {}", *account)),
                    ));
                }
                TaskOutcome::Absorbed
            }
            Verdict::TransientWarning => {
                warn!("{} {error}", *account);
                TaskOutcome::Absorbed
            }
            Verdict::Fatal => {
                // Before the permits drop, so no waiter can slip in.
                self.cancel.cancel();
                TaskOutcome::Fatal(error)
            }
        }
    }

    /// Wait for a permit unless the batch is cancelled first.
    async fn admit(&self, gate: Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = gate.acquire_owned() => permit.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteAccountStore;

    fn store() -> Arc<dyn AccountStore> {
        Arc::new(SqliteAccountStore::in_memory().unwrap())
    }

    #[test]
    fn zero_global_limit_is_rejected() {
        let err = Scheduler::new(SchedulerConfig::new(0, 1), store()).err();
        assert_eq!(
            err,
            Some(ConfigError::NonPositiveLimit {
                name: "global_limit",
                value: 0
            })
        );
    }

    #[test]
    fn zero_resource_limit_is_rejected() {
        assert!(Scheduler::new(SchedulerConfig::new(3, 0), store()).is_err());
    }

    #[test]
    fn config_from_settings() {
        let settings = Settings {
            max_tasks: 9,
            max_tasks_per_proxy: 2,
            default_proxy: Some(Proxy::parse("h:1").unwrap()),
            ..Settings::default()
        };
        let config = SchedulerConfig::from_settings(&settings);
        assert_eq!(config.global_limit, 9);
        assert_eq!(config.per_resource_limit, 2);
        assert_eq!(config.default_resource, settings.default_proxy);
    }
}
