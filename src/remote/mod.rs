//! Clients for the two remote services.
//!
//! Steps only see the [`SocialApi`] / [`FarmApi`] traits and get concrete
//! sessions from a [`Connector`], which decides routing per account.

pub mod farm;
mod http;
pub mod mock;
pub mod social;

use async_trait::async_trait;

use crate::account::{Account, FarmInfo, FarmTasks, ProfileInfo};
use crate::error::StepError;

pub use http::HttpConnector;

/// OAuth parameters for binding the farm app to a social account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub params: Vec<(String, String)>,
}

/// Payload for linking a wallet to the farm account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkWalletRequest {
    pub address: String,
    pub message: String,
    pub signature: String,
}

/// Farm answer to a link-wallet request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Success,
    AlreadyLinked,
    InvalidSignature,
    Other(String),
}

impl LinkStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "success" => LinkStatus::Success,
            "reward_already_claimed" => LinkStatus::AlreadyLinked,
            "invalid_signature" => LinkStatus::InvalidSignature,
            other => LinkStatus::Other(other.to_string()),
        }
    }
}

/// One authenticated social session.
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// Follow a user by id. Doubles as the account status probe.
    async fn follow(&self, user_id: &str) -> Result<(), StepError>;
    async fn username(&self) -> Result<String, StepError>;
    async fn user_profile(&self, username: &str) -> Result<ProfileInfo, StepError>;
    /// Approve an OAuth app and return the bind code from the redirect.
    async fn bind_app(&self, request: &BindRequest) -> Result<String, StepError>;
    /// CSRF token as of the last response, to persist on the account.
    fn csrf_token(&self) -> Option<String>;
}

/// The farm service. Authenticated calls take the farm access token.
#[async_trait]
pub trait FarmApi: Send + Sync {
    async fn exchange_code(&self, bind_code: &str) -> Result<String, StepError>;
    async fn info(&self, token: &str) -> Result<FarmInfo, StepError>;
    async fn tasks(&self, token: &str) -> Result<FarmTasks, StepError>;
    async fn link_wallet(
        &self,
        token: &str,
        request: &LinkWalletRequest,
    ) -> Result<LinkStatus, StepError>;
    /// Trigger a task verification endpoint. Returns the reported status.
    async fn perform_task(
        &self,
        token: &str,
        endpoint: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<String, StepError>;
}

/// Opens sessions for an account, routed through its resource.
pub trait Connector: Send + Sync {
    fn social(&self, account: &Account) -> Result<Box<dyn SocialApi>, StepError>;
    fn farm(&self, account: &Account) -> Result<Box<dyn FarmApi>, StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_status_parsing() {
        assert_eq!(LinkStatus::parse("success"), LinkStatus::Success);
        assert_eq!(
            LinkStatus::parse("reward_already_claimed"),
            LinkStatus::AlreadyLinked
        );
        assert_eq!(
            LinkStatus::parse("invalid_signature"),
            LinkStatus::InvalidSignature
        );
        assert_eq!(
            LinkStatus::parse("pending"),
            LinkStatus::Other("pending".to_string())
        );
    }
}
