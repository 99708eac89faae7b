//! Workflow stages: an eligibility pipeline plus the work to run on the
//! survivors.
//!
//! [`Workflows`] builds every stage from the run settings. The gates below
//! compose the ensure/filter segments each stage needs; a stage is just a
//! gate followed by an action.

mod farm;
mod follow;
mod steps;

pub use farm::{
    AuthStep, CompleteTasksStep, LinkWalletStep, NAME_MARKER, link_message, task_action,
};
pub use follow::FollowStep;
pub use steps::{
    EnsureFarmInfo, EnsureProfile, EnsureSocialStatus, RefreshProfile, STATUS_PROBE_USER_ID,
};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::account::{AccountStatus, FARM_TOKEN, SharedAccount};
use crate::config::Settings;
use crate::engine::{RunReport, Scheduler, Step};
use crate::error::{RunError, StepError};
use crate::pipeline::{FilterPolicy, Pipeline, Predicate};
use crate::remote::Connector;
use crate::store::AccountStore;

/// What every step needs to reach the outside world.
#[derive(Clone)]
pub struct Services {
    pub connector: Arc<dyn Connector>,
    pub store: Arc<dyn AccountStore>,
}

impl Services {
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn AccountStore>) -> Self {
        Self { connector, store }
    }
}

/// Stages selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    CheckStatus,
    Auth,
    LinkWallet,
    CompleteTasks,
    Follow,
    Export,
}

impl StageName {
    pub const ALL: &[StageName] = &[
        StageName::CheckStatus,
        StageName::Auth,
        StageName::LinkWallet,
        StageName::CompleteTasks,
        StageName::Follow,
        StageName::Export,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::CheckStatus => "check-status",
            StageName::Auth => "auth",
            StageName::LinkWallet => "link-wallet",
            StageName::CompleteTasks => "complete-tasks",
            StageName::Follow => "follow",
            StageName::Export => "export",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        StageName::ALL
            .iter()
            .copied()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown stage: {s}"))
    }
}

/// What a stage does with the accounts its pipeline lets through.
pub enum Action {
    /// Run one step per account through the scheduler.
    Each(Arc<dyn Step>),
    /// Get accounts below `min_followers` followed by their peers.
    FollowPeers { min_followers: u64 },
    /// Write `social_token:private_key` lines to a file.
    Export(PathBuf),
}

/// Outcome of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    /// Accounts the pipeline let through.
    pub eligible: usize,
    pub run: RunReport,
}

pub struct Stage {
    name: String,
    pipeline: Pipeline,
    action: Action,
    services: Services,
}

impl Stage {
    pub fn new(name: &str, pipeline: Pipeline, action: Action, services: Services) -> Self {
        Self {
            name: name.to_string(),
            pipeline,
            action,
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Narrow `accounts` with the pipeline, then act on the survivors.
    /// A fatal error from any scheduler run, ensure steps included, ends
    /// the stage.
    pub async fn run(
        &self,
        accounts: Vec<SharedAccount>,
        scheduler: &Scheduler,
        policy: &FilterPolicy,
    ) -> Result<StageReport, RunError> {
        info!(stage = %self.name, accounts = accounts.len(), "stage started");
        let eligible = self.pipeline.apply(accounts, scheduler, policy).await?;

        let run = match &self.action {
            Action::Each(step) => scheduler.run(&eligible, step.clone()).await?,
            Action::FollowPeers { min_followers } => {
                follow::follow_peers(&self.services, &eligible, *min_followers, scheduler).await?
            }
            Action::Export(path) => {
                let written = export(&eligible, path)
                    .await
                    .map_err(|e| RunError::Fatal(StepError::Internal(e)))?;
                RunReport {
                    scheduled: eligible.len(),
                    completed: written,
                    ..RunReport::default()
                }
            }
        };

        info!(
            stage = %self.name,
            eligible = eligible.len(),
            completed = run.completed,
            "stage finished"
        );
        Ok(StageReport {
            stage: self.name.clone(),
            eligible: eligible.len(),
            run,
        })
    }
}

/// Write one `social_token:private_key` line per account. Returns the
/// number of lines written.
pub async fn export(accounts: &[SharedAccount], path: &Path) -> anyhow::Result<usize> {
    let mut lines = Vec::with_capacity(accounts.len());
    for shared in accounts {
        let account = shared.lock().await;
        if let Some(token) = account.social_token() {
            lines.push(format!("{token}:{}", account.wallet.private_key()));
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("{} accounts exported to {}", lines.len(), path.display());
    Ok(lines.len())
}

/// Builds gates and stages from one set of settings.
#[derive(Clone)]
pub struct Workflows {
    settings: Settings,
    services: Services,
}

impl Workflows {
    pub fn new(settings: Settings, services: Services) -> Self {
        Self { settings, services }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Probe unknown accounts, then keep those whose status passes.
    pub fn status_gate(&self, statuses: &[AccountStatus], allow: bool) -> Pipeline {
        let predicate = if allow {
            Predicate::allow(statuses)
        } else {
            Predicate::block(statuses)
        };
        Pipeline::new()
            .ensure(Arc::new(EnsureSocialStatus::new(self.services.clone())))
            .filter(predicate)
    }

    /// `GOOD` accounts with a cached profile that meet the given
    /// thresholds. `None` skips a threshold.
    pub fn profile_gate(&self, min_age_days: Option<i64>, min_followers: Option<u64>) -> Pipeline {
        let mut pipeline = self
            .status_gate(&[AccountStatus::Good], true)
            .ensure(Arc::new(EnsureProfile::new(self.services.clone())));
        if let Some(min) = min_followers {
            pipeline = pipeline.filter(Predicate::MinFollowers(min));
        }
        if let Some(min) = min_age_days {
            pipeline = pipeline.filter(Predicate::MinAge(min));
        }
        pipeline
    }

    pub fn token_gate(&self, key: &str, present: bool) -> Pipeline {
        let predicate = if present {
            Predicate::has_credential(key)
        } else {
            Predicate::lacks_credential(key)
        };
        Pipeline::new().filter(predicate)
    }

    /// Fetch missing farm info, then keep accounts whose linked flag matches.
    pub fn farm_gate(&self, wallet_linked: bool) -> Pipeline {
        Pipeline::new()
            .ensure(Arc::new(EnsureFarmInfo::new(self.services.clone())))
            .filter(Predicate::WalletLinked(wallet_linked))
    }

    pub fn stage(&self, name: StageName, export_path: &Path) -> Stage {
        match name {
            StageName::CheckStatus => self.check_status(),
            StageName::Auth => self.auth(),
            StageName::LinkWallet => self.link_wallet(),
            StageName::CompleteTasks => self.complete_tasks(),
            StageName::Follow => self.follow(),
            StageName::Export => self.export(export_path),
        }
    }

    /// Force a status probe on every account.
    pub fn check_status(&self) -> Stage {
        let step = EnsureSocialStatus::forced(self.services.clone());
        self.build(StageName::CheckStatus, Pipeline::new(), Action::Each(Arc::new(step)))
    }

    /// Accounts without a farm token and with an eligible profile get one.
    pub fn auth(&self) -> Stage {
        let pipeline = self.token_gate(FARM_TOKEN, false).then(self.profile_gate(
            self.settings.min_account_age_days,
            self.settings.min_followers,
        ));
        let step = AuthStep::new(self.services.clone());
        self.build(StageName::Auth, pipeline, Action::Each(Arc::new(step)))
    }

    pub fn link_wallet(&self) -> Stage {
        let pipeline = self
            .token_gate(FARM_TOKEN, true)
            .then(self.farm_gate(false));
        let step = LinkWalletStep::new(self.services.clone());
        self.build(StageName::LinkWallet, pipeline, Action::Each(Arc::new(step)))
    }

    pub fn complete_tasks(&self) -> Stage {
        let pipeline = self
            .token_gate(FARM_TOKEN, true)
            .then(self.farm_gate(true));
        let step = CompleteTasksStep::new(self.services.clone(), self.settings.invite_code.clone());
        self.build(StageName::CompleteTasks, pipeline, Action::Each(Arc::new(step)))
    }

    /// Accounts old enough to take part follow each other up to the
    /// follower minimum.
    pub fn follow(&self) -> Stage {
        let pipeline = self.profile_gate(self.settings.min_account_age_days, None);
        let min_followers = self.settings.min_followers.unwrap_or(0);
        self.build(StageName::Follow, pipeline, Action::FollowPeers { min_followers })
    }

    /// Accounts with a linked wallet, written out for safekeeping.
    pub fn export(&self, path: &Path) -> Stage {
        let pipeline = self
            .token_gate(FARM_TOKEN, true)
            .then(self.farm_gate(true));
        self.build(StageName::Export, pipeline, Action::Export(path.to_path_buf()))
    }

    fn build(&self, name: StageName, pipeline: Pipeline, action: Action) -> Stage {
        Stage::new(name.as_str(), pipeline, action, self.services.clone())
    }
}
