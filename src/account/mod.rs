//! Per-account state: identity, routing, credentials, classification
//! status and the info blobs cached from both remote services.

pub mod proxy;
pub mod wallet;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use proxy::{Proxy, ResourceKey};
pub use wallet::Wallet;

/// Credential key of the social auth token. Also the account's identity key.
pub const SOCIAL_TOKEN: &str = "social";
/// Credential key of the social CSRF token, refreshed on every session.
pub const SOCIAL_CSRF: &str = "social_ct0";
/// Credential key of the farm access token, acquired by the auth stage.
pub const FARM_TOKEN: &str = "farm";

/// Social account standing, as observed by the status probe or the
/// error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    #[default]
    Unknown,
    BadToken,
    Banned,
    Locked,
    Good,
}

impl AccountStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AccountStatus::BadToken | AccountStatus::Banned | AccountStatus::Locked
        )
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Unknown => "UNKNOWN",
            AccountStatus::BadToken => "BAD_TOKEN",
            AccountStatus::Banned => "BANNED",
            AccountStatus::Locked => "LOCKED",
            AccountStatus::Good => "GOOD",
        };
        f.write_str(s)
    }
}

/// Cached social profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub followers_count: u64,
}

impl ProfileInfo {
    /// Whole days between `created_at` and `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Cached farm user info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmInfo {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub wallet: Option<String>,
}

impl FarmInfo {
    pub fn wallet_is_linked(&self) -> bool {
        self.wallet.as_deref().is_some_and(|w| !w.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmTask {
    pub id: String,
    pub completed: bool,
}

/// Cached farm tasks and points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FarmTasks {
    pub points: u64,
    #[serde(default)]
    pub tasks: Vec<FarmTask>,
    #[serde(default)]
    pub timely: Vec<FarmTask>,
}

impl FarmTasks {
    pub fn pending(&self) -> impl Iterator<Item = &FarmTask> {
        self.tasks.iter().chain(&self.timely).filter(|t| !t.completed)
    }
}

/// One managed account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Position in the token list of this run. Not persisted.
    #[serde(skip)]
    pub number: Option<usize>,
    pub wallet: Wallet,
    #[serde(default)]
    pub proxy: Option<Proxy>,
    /// Service name → opaque token.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    status: AccountStatus,
    #[serde(default)]
    pub profile: Option<ProfileInfo>,
    #[serde(default)]
    pub farm: Option<FarmInfo>,
    #[serde(default)]
    pub tasks: Option<FarmTasks>,
}

/// Accounts are shared between the pipeline and scheduler tasks.
pub type SharedAccount = Arc<Mutex<Account>>;

impl Account {
    pub fn new(social_token: &str, wallet: Wallet) -> Self {
        let mut credentials = BTreeMap::new();
        credentials.insert(SOCIAL_TOKEN.to_string(), social_token.to_string());
        Self {
            number: None,
            wallet,
            proxy: None,
            credentials,
            status: AccountStatus::Unknown,
            profile: None,
            farm: None,
            tasks: None,
        }
    }

    pub fn shared(self) -> SharedAccount {
        Arc::new(Mutex::new(self))
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    /// Record a classification. Refuses to move back to `UNKNOWN` and
    /// refuses `GOOD`, which only [`Account::confirm_good`] may set.
    /// Returns whether the status changed.
    pub fn classify_as(&mut self, status: AccountStatus) -> bool {
        if matches!(status, AccountStatus::Unknown | AccountStatus::Good) || self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    /// The status probe confirmed good standing. This is the only way out
    /// of a terminal status.
    pub fn confirm_good(&mut self) -> bool {
        let changed = self.status != AccountStatus::Good;
        self.status = AccountStatus::Good;
        changed
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }

    pub fn has_credential(&self, key: &str) -> bool {
        self.credentials.contains_key(key)
    }

    pub fn set_credential(&mut self, key: &str, value: impl Into<String>) {
        self.credentials.insert(key.to_string(), value.into());
    }

    pub fn social_token(&self) -> Option<&str> {
        self.credential(SOCIAL_TOKEN)
    }

    pub fn points(&self) -> Option<u64> {
        self.tasks.as_ref().map(|t| t.points)
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.profile.as_ref().map(|p| p.age_days(now))
    }

    pub fn followers_count(&self) -> Option<u64> {
        self.profile.as_ref().map(|p| p.followers_count)
    }

    /// `None` until farm info has been fetched.
    pub fn wallet_is_linked(&self) -> Option<bool> {
        self.farm.as_ref().map(FarmInfo::wallet_is_linked)
    }

    /// Mark the wallet as linked locally, ahead of the next info refresh.
    pub fn mark_wallet_linked(&mut self) {
        let address = self.wallet.address().to_string();
        match self.farm.as_mut() {
            Some(info) => info.wallet = Some(address),
            None => {
                self.farm = Some(FarmInfo {
                    username: String::new(),
                    display_name: String::new(),
                    wallet: Some(address),
                })
            }
        }
    }

    fn short_token(&self) -> String {
        match self.social_token() {
            Some(t) if t.chars().count() > 8 => {
                let head: String = t.chars().take(4).collect();
                let mut tail: Vec<char> = t.chars().rev().take(4).collect();
                tail.reverse();
                format!("{head}...{}", tail.into_iter().collect::<String>())
            }
            Some(t) => t.to_string(),
            None => "no token".to_string(),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.number {
            write!(f, "[{n:04}] ")?;
        }
        write!(f, "[{}]", self.short_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account() -> Account {
        Account::new("abcdefghijklmnop", Wallet::generate())
    }

    #[test]
    fn new_account_holds_social_token() {
        let acc = account();
        assert_eq!(acc.social_token(), Some("abcdefghijklmnop"));
        assert_eq!(acc.status(), AccountStatus::Unknown);
        assert!(!acc.has_credential(FARM_TOKEN));
    }

    #[test]
    fn display_shortens_token() {
        let mut acc = account();
        acc.number = Some(7);
        assert_eq!(acc.to_string(), "[0007] [abcd...mnop]");
    }

    #[test]
    fn display_shortens_non_ascii_token_by_chars() {
        let acc = Account::new("aключтокенааа", Wallet::generate());
        assert_eq!(acc.to_string(), "[aклю...нааа]");
    }

    #[test]
    fn classification_never_returns_to_unknown() {
        let mut acc = account();
        assert!(acc.classify_as(AccountStatus::Banned));
        assert!(!acc.classify_as(AccountStatus::Unknown));
        assert_eq!(acc.status(), AccountStatus::Banned);
    }

    #[test]
    fn classification_cannot_set_good() {
        let mut acc = account();
        acc.classify_as(AccountStatus::Locked);
        assert!(!acc.classify_as(AccountStatus::Good));
        assert_eq!(acc.status(), AccountStatus::Locked);
    }

    #[test]
    fn probe_can_clear_terminal_status() {
        let mut acc = account();
        acc.classify_as(AccountStatus::Locked);
        assert!(acc.confirm_good());
        assert_eq!(acc.status(), AccountStatus::Good);
        assert!(!acc.confirm_good());
    }

    #[test]
    fn terminal_to_terminal_is_allowed() {
        let mut acc = account();
        acc.classify_as(AccountStatus::Locked);
        assert!(acc.classify_as(AccountStatus::Banned));
        assert!(!acc.classify_as(AccountStatus::Banned));
    }

    #[test]
    fn age_in_days() {
        let now = Utc::now();
        let mut acc = account();
        assert_eq!(acc.age_days(now), None);
        acc.profile = Some(ProfileInfo {
            id: "1".into(),
            username: "u".into(),
            display_name: "U".into(),
            created_at: now - Duration::days(10) - Duration::hours(3),
            followers_count: 2,
        });
        assert_eq!(acc.age_days(now), Some(10));
        assert_eq!(acc.followers_count(), Some(2));
    }

    #[test]
    fn wallet_link_flag() {
        let mut acc = account();
        assert_eq!(acc.wallet_is_linked(), None);
        acc.farm = Some(FarmInfo {
            username: "u".into(),
            display_name: "U".into(),
            wallet: Some(String::new()),
        });
        assert_eq!(acc.wallet_is_linked(), Some(false));
        acc.mark_wallet_linked();
        assert_eq!(acc.wallet_is_linked(), Some(true));
        assert_eq!(acc.farm.unwrap().username, "u");
    }

    #[test]
    fn pending_tasks_cover_both_lists() {
        let tasks = FarmTasks {
            points: 10,
            tasks: vec![
                FarmTask { id: "a".into(), completed: true },
                FarmTask { id: "b".into(), completed: false },
            ],
            timely: vec![FarmTask { id: "c".into(), completed: false }],
        };
        let ids: Vec<_> = tasks.pending().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&AccountStatus::BadToken).unwrap();
        assert_eq!(json, "\"BAD_TOKEN\"");
    }
}
