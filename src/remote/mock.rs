//! Scripted remote services for tests. One shared [`MockWorld`] plays both
//! the social and the farm side; sessions are keyed by the account's social
//! token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{BindRequest, Connector, FarmApi, LinkStatus, LinkWalletRequest, SocialApi};
use crate::account::{Account, FarmInfo, FarmTasks, ProfileInfo};
use crate::error::StepError;

/// A failure the mock replays on every call of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Social { status: u16, codes: Vec<u32> },
    Farm(u16),
    Malformed,
    Transport,
}

impl Failure {
    fn to_error(&self) -> StepError {
        match self {
            Failure::Social { status, codes } => {
                StepError::social(*status, codes.clone(), "scripted failure")
            }
            Failure::Farm(code) => StepError::farm(*code, "scripted failure"),
            Failure::Malformed => StepError::malformed("json", "<html>scripted</html>"),
            Failure::Transport => StepError::Transport("scripted failure".to_string()),
        }
    }
}

/// State behind both mock services.
#[derive(Debug, Default)]
pub struct MockWorld {
    /// Social token → profile. Tokens without one answer with a bare profile.
    pub profiles: HashMap<String, ProfileInfo>,
    pub social_failures: HashMap<String, Failure>,
    pub farm_failures: HashMap<String, Failure>,
    /// Social token → linked wallet address.
    pub linked: HashMap<String, String>,
    pub tasks: HashMap<String, FarmTasks>,
    /// Overrides the link-wallet answer for every account.
    pub link_response: Option<LinkStatus>,
    /// `(follower social token, followed user id)`.
    pub follows: Vec<(String, String)>,
    /// Every call as `"<op> <social token>"`.
    pub calls: Vec<String>,
    /// Applied before every call.
    pub delay: Option<Duration>,
}

/// Hands out mock sessions over one shared [`MockWorld`].
#[derive(Clone, Default)]
pub struct MockConnector {
    world: Arc<Mutex<MockWorld>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the world to script it or inspect it.
    pub fn world(&self) -> MutexGuard<'_, MockWorld> {
        match self.world.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_profile(self, token: &str, profile: ProfileInfo) -> Self {
        self.world().profiles.insert(token.to_string(), profile);
        self
    }

    pub fn with_social_failure(self, token: &str, failure: Failure) -> Self {
        self.world().social_failures.insert(token.to_string(), failure);
        self
    }

    pub fn with_farm_failure(self, token: &str, failure: Failure) -> Self {
        self.world().farm_failures.insert(token.to_string(), failure);
        self
    }

    pub fn with_tasks(self, token: &str, tasks: FarmTasks) -> Self {
        self.world().tasks.insert(token.to_string(), tasks);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.world().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.world().calls.clone()
    }

    /// Calls of one operation, across accounts.
    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{op} ");
        self.world()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }
}

impl Connector for MockConnector {
    fn social(&self, account: &Account) -> Result<Box<dyn SocialApi>, StepError> {
        let token = account
            .social_token()
            .ok_or_else(|| anyhow::anyhow!("{account} has no social token"))?;
        Ok(Box::new(MockSession {
            token: token.to_string(),
            world: self.world.clone(),
        }))
    }

    fn farm(&self, account: &Account) -> Result<Box<dyn FarmApi>, StepError> {
        let token = account
            .social_token()
            .ok_or_else(|| anyhow::anyhow!("{account} has no social token"))?;
        Ok(Box::new(MockSession {
            token: token.to_string(),
            world: self.world.clone(),
        }))
    }
}

/// One account's view of the world, for either service.
struct MockSession {
    token: String,
    world: Arc<Mutex<MockWorld>>,
}

impl MockSession {
    fn world(&self) -> MutexGuard<'_, MockWorld> {
        match self.world.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Log the call, wait the scripted delay, then replay any failure.
    async fn enter(&self, op: &str, social: bool) -> Result<(), StepError> {
        let delay = {
            let mut world = self.world();
            world.calls.push(format!("{op} {}", self.token));
            world.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let world = self.world();
        let failures = if social {
            &world.social_failures
        } else {
            &world.farm_failures
        };
        match failures.get(&self.token) {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn profile(&self) -> ProfileInfo {
        self.world()
            .profiles
            .get(&self.token)
            .cloned()
            .unwrap_or_else(|| ProfileInfo {
                id: format!("id-{}", self.token),
                username: format!("user-{}", self.token),
                display_name: String::new(),
                created_at: chrono::Utc::now(),
                followers_count: 0,
            })
    }

    fn check_farm_token(&self, token: &str) -> Result<(), StepError> {
        if token == farm_token(&self.token) {
            Ok(())
        } else {
            Err(StepError::farm(401, "unauthorized"))
        }
    }
}

/// Bind code the mock issues for a social token.
pub fn bind_code(social_token: &str) -> String {
    format!("code-{social_token}")
}

/// Farm token the mock issues for a social token.
pub fn farm_token(social_token: &str) -> String {
    format!("farm-{}", bind_code(social_token))
}

#[async_trait]
impl SocialApi for MockSession {
    async fn follow(&self, user_id: &str) -> Result<(), StepError> {
        self.enter("follow", true).await?;
        let mut world = self.world();
        world.follows.push((self.token.clone(), user_id.to_string()));
        let followed = world
            .profiles
            .values_mut()
            .find(|p| p.id == user_id);
        if let Some(profile) = followed {
            profile.followers_count += 1;
        }
        Ok(())
    }

    async fn username(&self) -> Result<String, StepError> {
        self.enter("username", true).await?;
        Ok(self.profile().username)
    }

    async fn user_profile(&self, username: &str) -> Result<ProfileInfo, StepError> {
        self.enter("user_profile", true).await?;
        let profile = self.profile();
        if profile.username == username {
            Ok(profile)
        } else {
            Err(StepError::social(404, vec![50], "user not found"))
        }
    }

    async fn bind_app(&self, _request: &BindRequest) -> Result<String, StepError> {
        self.enter("bind_app", true).await?;
        Ok(bind_code(&self.token))
    }

    fn csrf_token(&self) -> Option<String> {
        Some(format!("ct0-{}", self.token))
    }
}

#[async_trait]
impl FarmApi for MockSession {
    async fn exchange_code(&self, code: &str) -> Result<String, StepError> {
        self.enter("exchange_code", false).await?;
        if code != bind_code(&self.token) {
            return Err(StepError::farm(400, "invalid code"));
        }
        Ok(farm_token(&self.token))
    }

    async fn info(&self, token: &str) -> Result<FarmInfo, StepError> {
        self.enter("info", false).await?;
        self.check_farm_token(token)?;
        let profile = self.profile();
        Ok(FarmInfo {
            username: profile.username,
            display_name: profile.display_name,
            wallet: self.world().linked.get(&self.token).cloned(),
        })
    }

    async fn tasks(&self, token: &str) -> Result<FarmTasks, StepError> {
        self.enter("tasks", false).await?;
        self.check_farm_token(token)?;
        Ok(self
            .world()
            .tasks
            .get(&self.token)
            .cloned()
            .unwrap_or_default())
    }

    async fn link_wallet(
        &self,
        token: &str,
        request: &LinkWalletRequest,
    ) -> Result<LinkStatus, StepError> {
        self.enter("link_wallet", false).await?;
        self.check_farm_token(token)?;
        let mut world = self.world();
        if let Some(status) = world.link_response.clone() {
            if status == LinkStatus::AlreadyLinked {
                world.linked.insert(self.token.clone(), request.address.clone());
            }
            return Ok(status);
        }
        if world.linked.contains_key(&self.token) {
            return Ok(LinkStatus::AlreadyLinked);
        }
        world.linked.insert(self.token.clone(), request.address.clone());
        Ok(LinkStatus::Success)
    }

    async fn perform_task(
        &self,
        token: &str,
        endpoint: &str,
        _payload: Option<Value>,
    ) -> Result<String, StepError> {
        self.enter(&format!("task:{endpoint}"), false).await?;
        self.check_farm_token(token)?;
        Ok("success".to_string())
    }
}
