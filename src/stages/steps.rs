//! Per-account steps: the ensure enrichers that feed the eligibility
//! predicates, and the helpers every farm step shares.

use async_trait::async_trait;
use tracing::{debug, info};

use super::Services;
use crate::account::{Account, AccountStatus, FARM_TOKEN, SOCIAL_CSRF};
use crate::engine::Step;
use crate::error::StepError;
use crate::remote::{BindRequest, FarmApi, SocialApi};

/// Account followed by the status probe. Following it succeeds for any
/// account in good standing and fails with a status code otherwise.
pub const STATUS_PROBE_USER_ID: &str = "44196397";

/// Keep the session's latest CSRF token for the next session.
pub(crate) fn remember_csrf(account: &mut Account, social: &dyn SocialApi) {
    if let Some(ct0) = social.csrf_token() {
        account.set_credential(SOCIAL_CSRF, ct0);
    }
}

/// The account's farm token, binding the farm app first if there is none.
pub(crate) async fn farm_token(
    services: &Services,
    account: &mut Account,
) -> Result<String, StepError> {
    if let Some(token) = account.credential(FARM_TOKEN) {
        return Ok(token.to_string());
    }

    let social = services.connector.social(account)?;
    let bound = social.bind_app(&BindRequest::farm()).await;
    remember_csrf(account, social.as_ref());
    let code = bound?;

    let farm = services.connector.farm(account)?;
    let token = farm.exchange_code(&code).await?;
    account.set_credential(FARM_TOKEN, token.clone());
    services.store.save(account).await?;
    info!("{account} farm account authorized");
    Ok(token)
}

/// Re-read farm info and tasks into the account cache.
pub(crate) async fn refresh_farm(
    farm: &dyn FarmApi,
    token: &str,
    account: &mut Account,
) -> Result<(), StepError> {
    let info = farm.info(token).await?;
    let tasks = farm.tasks(token).await?;
    account.farm = Some(info);
    account.tasks = Some(tasks);
    debug!("{account} farm info refreshed");
    Ok(())
}

/// Status probe. Runs only for `UNKNOWN` accounts unless forced.
///
/// A failed probe returns the error untouched; the classifier turns the
/// social codes into the account's terminal status.
pub struct EnsureSocialStatus {
    services: Services,
    force: bool,
}

impl EnsureSocialStatus {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            force: false,
        }
    }

    /// Probe every account, including ones already classified.
    pub fn forced(services: Services) -> Self {
        Self {
            services,
            force: true,
        }
    }
}

#[async_trait]
impl Step for EnsureSocialStatus {
    fn name(&self) -> &str {
        if self.force {
            "check-status"
        } else {
            "ensure-social-status"
        }
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        if !self.force && account.status() != AccountStatus::Unknown {
            return Ok(());
        }

        let social = self.services.connector.social(account)?;
        let probed = social.follow(STATUS_PROBE_USER_ID).await;
        remember_csrf(account, social.as_ref());
        probed?;

        account.confirm_good();
        self.services.store.save(account).await?;
        info!("{account} social status: {}", account.status());
        Ok(())
    }
}

/// Fetch the social profile of `GOOD` accounts that have none cached.
pub struct EnsureProfile {
    services: Services,
}

impl EnsureProfile {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for EnsureProfile {
    fn name(&self) -> &str {
        "ensure-profile"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        if account.profile.is_some() || account.status() != AccountStatus::Good {
            return Ok(());
        }
        fetch_profile(&self.services, account).await
    }
}

/// Re-fetch the social profile unconditionally.
pub struct RefreshProfile {
    services: Services,
}

impl RefreshProfile {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for RefreshProfile {
    fn name(&self) -> &str {
        "refresh-profile"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        fetch_profile(&self.services, account).await?;
        if let Some(followers) = account.followers_count() {
            info!("{account} followers now: {followers}");
        }
        Ok(())
    }
}

async fn fetch_profile(services: &Services, account: &mut Account) -> Result<(), StepError> {
    let social = services.connector.social(account)?;
    let fetched = async {
        let username = social.username().await?;
        social.user_profile(&username).await
    }
    .await;
    remember_csrf(account, social.as_ref());

    account.profile = Some(fetched?);
    services.store.save(account).await?;
    debug!("{account} social profile fetched");
    Ok(())
}

/// Fetch farm info and tasks when either is missing. Authorizes the farm
/// account on demand.
pub struct EnsureFarmInfo {
    services: Services,
}

impl EnsureFarmInfo {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for EnsureFarmInfo {
    fn name(&self) -> &str {
        "ensure-farm-info"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        if account.farm.is_some() && account.tasks.is_some() {
            return Ok(());
        }
        let token = farm_token(&self.services, account).await?;
        let farm = self.services.connector.farm(account)?;
        refresh_farm(farm.as_ref(), &token, account).await?;
        self.services.store.save(account).await?;
        info!("{account} farm info fetched");
        Ok(())
    }
}
