//! Steps against the farm service: authorization, wallet linking and task
//! completion.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::Services;
use super::steps::{farm_token, refresh_farm};
use crate::account::{Account, FarmTask};
use crate::engine::Step;
use crate::error::StepError;
use crate::remote::{LinkStatus, LinkWalletRequest};

/// Name marker that unlocks the `twitterName` task.
pub const NAME_MARKER: &str = "❤️ Memecoin";

/// Bind the farm app, store the farm token, cache farm info.
pub struct AuthStep {
    services: Services,
}

impl AuthStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for AuthStep {
    fn name(&self) -> &str {
        "auth"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        let token = farm_token(&self.services, account).await?;
        let farm = self.services.connector.farm(account)?;
        refresh_farm(farm.as_ref(), &token, account).await?;
        self.services.store.save(account).await?;
        info!("{account} authorized");
        Ok(())
    }
}

/// Text the wallet signs when it is linked.
pub fn link_message(wallet_short: &str, username: &str) -> String {
    format!(
        "This wallet will receive $MEME for your harvested MEMEPOINTS. \
         If you referred anyone, make sure this wallet holds the NFT you referred.\
         \n\nWallet: {wallet_short}\nX account: @{username}"
    )
}

/// Sign the link message with the account wallet and submit it.
pub struct LinkWalletStep {
    services: Services,
}

impl LinkWalletStep {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for LinkWalletStep {
    fn name(&self) -> &str {
        "link-wallet"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        let token = farm_token(&self.services, account).await?;
        let username = account
            .farm
            .as_ref()
            .map(|info| info.username.clone())
            .unwrap_or_default();
        let message = link_message(&account.wallet.short_address(), &username);
        let request = LinkWalletRequest {
            address: account.wallet.address().to_string(),
            signature: account.wallet.sign_message(&message),
            message,
        };

        let farm = self.services.connector.farm(account)?;
        match farm.link_wallet(&token, &request).await? {
            LinkStatus::InvalidSignature => {
                warn!("{account} invalid signature");
                return Ok(());
            }
            LinkStatus::Other(status) => {
                warn!("{account} link wallet: {status}");
                return Ok(());
            }
            LinkStatus::AlreadyLinked => warn!("{account} wallet already linked"),
            LinkStatus::Success => info!("{account} wallet linked"),
        }

        // Persist the flag before the refresh so a failed refresh cannot
        // lose it.
        account.mark_wallet_linked();
        self.services.store.save(account).await?;
        refresh_farm(farm.as_ref(), &token, account).await?;
        if account.wallet_is_linked() != Some(true) {
            account.mark_wallet_linked();
        }
        self.services.store.save(account).await?;
        Ok(())
    }
}

/// Farm endpoint and payload that completes `task`, if the task is one
/// this account can do.
pub fn task_action(
    task: &FarmTask,
    invite_code: Option<&str>,
    name: &str,
) -> Option<(String, Option<Value>)> {
    let id = task.id.as_str();
    if task.completed {
        return None;
    }
    if id.starts_with("follow") {
        return Some(("twitter-follow".to_string(), Some(json!({ "followId": id }))));
    }
    match id {
        "goingToBinance" => Some(("daily-task/goingToBinance".to_string(), None)),
        "shareMessage" => Some(("share-message".to_string(), None)),
        "inviteCode" => {
            invite_code.map(|code| ("invite-code".to_string(), Some(json!({ "code": code }))))
        }
        "twitterName" if name.contains(NAME_MARKER) => Some(("twitter-name".to_string(), None)),
        _ => None,
    }
}

/// Run every pending task the account qualifies for, then refresh points.
pub struct CompleteTasksStep {
    services: Services,
    invite_code: Option<String>,
}

impl CompleteTasksStep {
    pub fn new(services: Services, invite_code: Option<String>) -> Self {
        Self {
            services,
            invite_code,
        }
    }
}

#[async_trait]
impl Step for CompleteTasksStep {
    fn name(&self) -> &str {
        "complete-tasks"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        let token = farm_token(&self.services, account).await?;
        let farm = self.services.connector.farm(account)?;

        let name = account
            .farm
            .as_ref()
            .map(|info| format!("{} {}", info.username, info.display_name))
            .unwrap_or_default();
        let pending: Vec<FarmTask> = account
            .tasks
            .as_ref()
            .map(|tasks| tasks.pending().cloned().collect())
            .unwrap_or_default();

        for task in &pending {
            let Some((endpoint, payload)) = task_action(task, self.invite_code.as_deref(), &name)
            else {
                continue;
            };
            let status = farm.perform_task(&token, &endpoint, payload).await?;
            if status == "success" {
                info!("{account} task {} done", task.id);
            } else {
                warn!("{account} task {} failed: {status}", task.id);
            }
        }

        refresh_farm(farm.as_ref(), &token, account).await?;
        self.services.store.save(account).await?;
        if let Some(points) = account.points() {
            info!("{account} points: {points}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> FarmTask {
        FarmTask {
            id: id.to_string(),
            completed: false,
        }
    }

    #[test]
    fn follow_tasks_carry_their_id() {
        let (endpoint, payload) = task_action(&task("followMemeland"), None, "").unwrap();
        assert_eq!(endpoint, "twitter-follow");
        assert_eq!(payload, Some(json!({"followId": "followMemeland"})));
    }

    #[test]
    fn invite_code_needs_configuration() {
        assert!(task_action(&task("inviteCode"), None, "").is_none());
        let (_, payload) = task_action(&task("inviteCode"), Some("NFT1"), "").unwrap();
        assert_eq!(payload, Some(json!({"code": "NFT1"})));
    }

    #[test]
    fn name_task_needs_the_marker() {
        assert!(task_action(&task("twitterName"), None, "alice Alice").is_none());
        assert!(task_action(&task("twitterName"), None, "alice Alice ❤️ Memecoin").is_some());
    }

    #[test]
    fn completed_and_unknown_tasks_are_skipped() {
        let mut done = task("shareMessage");
        done.completed = true;
        assert!(task_action(&done, None, "").is_none());
        assert!(task_action(&task("somethingNew"), None, "").is_none());
        assert_eq!(
            task_action(&task("goingToBinance"), None, "").unwrap().0,
            "daily-task/goingToBinance"
        );
    }

    #[test]
    fn link_message_names_wallet_and_user() {
        let message = link_message("0xabc...1234", "alice");
        assert!(message.ends_with("Wallet: 0xabc...1234\nX account: @alice"));
    }
}
