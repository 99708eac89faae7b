//! Mutual following: accounts short of the follower minimum get followed
//! by randomly picked peers from the same batch.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::info;

use super::Services;
use super::steps::{RefreshProfile, remember_csrf};
use crate::account::{Account, SharedAccount};
use crate::engine::{RunReport, Scheduler, Step};
use crate::error::{RunError, StepError};

/// Follow one user from every account the step runs on.
pub struct FollowStep {
    services: Services,
    user_id: String,
    target: String,
}

impl FollowStep {
    pub fn new(services: Services, user_id: &str, target: &str) -> Self {
        Self {
            services,
            user_id: user_id.to_string(),
            target: target.to_string(),
        }
    }
}

#[async_trait]
impl Step for FollowStep {
    fn name(&self) -> &str {
        "follow"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        let social = self.services.connector.social(account)?;
        let followed = social.follow(&self.user_id).await;
        remember_csrf(account, social.as_ref());
        followed?;
        self.services.store.save(account).await?;
        info!("{account} followed {}", self.target);
        Ok(())
    }
}

/// One account that needs followers, and the peers picked to follow it.
struct FollowPlan {
    target: SharedAccount,
    label: String,
    user_id: String,
    followers: Vec<SharedAccount>,
}

/// Pick up to `min_followers - followers` random peers for every account
/// below the minimum. Accounts without a cached profile are skipped.
async fn plan(accounts: &[SharedAccount], min_followers: u64) -> Vec<FollowPlan> {
    let mut plans = Vec::new();
    for (i, shared) in accounts.iter().enumerate() {
        let (label, user_id, missing) = {
            let account = shared.lock().await;
            let Some(profile) = account.profile.as_ref() else {
                continue;
            };
            let missing = min_followers.saturating_sub(profile.followers_count);
            (account.to_string(), profile.id.clone(), missing as usize)
        };
        if missing == 0 {
            continue;
        }

        let mut peers: Vec<SharedAccount> = accounts
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, peer)| peer.clone())
            .collect();
        peers.shuffle(&mut rand::rng());
        peers.truncate(missing);

        plans.push(FollowPlan {
            target: shared.clone(),
            label,
            user_id,
            followers: peers,
        });
    }
    plans
}

/// Run the follow plans one target at a time, then refresh the profiles of
/// every target so the new follower counts are cached.
pub(crate) async fn follow_peers(
    services: &Services,
    accounts: &[SharedAccount],
    min_followers: u64,
    scheduler: &Scheduler,
) -> Result<RunReport, RunError> {
    let plans = plan(accounts, min_followers).await;
    let mut report = RunReport::default();
    let mut targets = Vec::with_capacity(plans.len());

    for plan in plans {
        let step: Arc<dyn Step> = Arc::new(FollowStep::new(
            services.clone(),
            &plan.user_id,
            &plan.label,
        ));
        report += scheduler.run(&plan.followers, step).await?;
        targets.push(plan.target);
    }

    if !targets.is_empty() {
        let refresh: Arc<dyn Step> = Arc::new(RefreshProfile::new(services.clone()));
        scheduler.run(&targets, refresh).await?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{ProfileInfo, Wallet};
    use chrono::Utc;

    fn account(token: &str, followers: Option<u64>) -> SharedAccount {
        let mut account = Account::new(token, Wallet::generate());
        account.profile = followers.map(|n| ProfileInfo {
            id: format!("id-{token}"),
            username: token.to_string(),
            display_name: String::new(),
            created_at: Utc::now(),
            followers_count: n,
        });
        account.shared()
    }

    #[tokio::test]
    async fn plans_cover_only_accounts_below_minimum() {
        let accounts = vec![
            account("a", Some(0)),
            account("b", Some(2)),
            account("c", Some(5)),
            account("d", None),
        ];
        let plans = plan(&accounts, 3).await;

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].user_id, "id-a");
        assert_eq!(plans[0].followers.len(), 3);
        assert_eq!(plans[1].user_id, "id-b");
        assert_eq!(plans[1].followers.len(), 1);
    }

    #[tokio::test]
    async fn an_account_never_follows_itself() {
        let accounts = vec![account("a", Some(0)), account("b", Some(9))];
        let plans = plan(&accounts, 10).await;

        assert_eq!(plans.len(), 2);
        for plan in &plans {
            assert!(plan.followers.iter().all(|f| !Arc::ptr_eq(f, &plan.target)));
            assert_eq!(plan.followers.len(), 1);
        }
    }
}
