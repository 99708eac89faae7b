use std::fmt;

use chrono::{DateTime, Utc};

use crate::account::{Account, AccountStatus};

/// Allow-list or block-list semantics for a status predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Allow,
    Block,
}

/// A per-account eligibility test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Status {
        statuses: Vec<AccountStatus>,
        membership: Membership,
    },
    /// Social account at least this many days old.
    MinAge(i64),
    /// Social account with at least this many followers.
    MinFollowers(u64),
    /// Credential `key` present (or absent).
    Credential { key: String, present: bool },
    /// Cached wallet-linked flag equals this value.
    WalletLinked(bool),
}

/// Inputs every predicate evaluation shares.
#[derive(Debug, Clone, Copy)]
pub struct FilterPolicy {
    /// Let accounts below the age/follower thresholds through with a warning.
    pub ignore_warnings: bool,
    pub now: DateTime<Utc>,
}

impl FilterPolicy {
    pub fn new(ignore_warnings: bool) -> Self {
        Self {
            ignore_warnings,
            now: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    /// Below a threshold, let through because warnings are ignored.
    Warn(String),
    Reject(String),
}

impl Decision {
    pub fn admits(&self) -> bool {
        !matches!(self, Decision::Reject(_))
    }
}

impl Predicate {
    pub fn allow(statuses: &[AccountStatus]) -> Self {
        Predicate::Status {
            statuses: statuses.to_vec(),
            membership: Membership::Allow,
        }
    }

    pub fn block(statuses: &[AccountStatus]) -> Self {
        Predicate::Status {
            statuses: statuses.to_vec(),
            membership: Membership::Block,
        }
    }

    pub fn has_credential(key: &str) -> Self {
        Predicate::Credential {
            key: key.to_string(),
            present: true,
        }
    }

    pub fn lacks_credential(key: &str) -> Self {
        Predicate::Credential {
            key: key.to_string(),
            present: false,
        }
    }

    /// Age and follower thresholds. Only these honour `ignore_warnings`.
    pub fn is_threshold(&self) -> bool {
        matches!(self, Predicate::MinAge(_) | Predicate::MinFollowers(_))
    }

    pub fn evaluate(&self, account: &Account, policy: &FilterPolicy) -> Decision {
        let below = |reason: String| {
            if policy.ignore_warnings {
                Decision::Warn(reason)
            } else {
                Decision::Reject(reason)
            }
        };

        match self {
            Predicate::Status {
                statuses,
                membership,
            } => {
                let listed = statuses.contains(&account.status());
                let ok = match membership {
                    Membership::Allow => listed,
                    Membership::Block => !listed,
                };
                if ok {
                    Decision::Accept
                } else {
                    Decision::Reject(format!("status {}", account.status()))
                }
            }
            Predicate::MinAge(min) => match account.age_days(policy.now) {
                None => Decision::Reject("no cached profile info".to_string()),
                Some(age) if age < *min => below(format!("account age: {age} of {min} days")),
                Some(_) => Decision::Accept,
            },
            Predicate::MinFollowers(min) => match account.followers_count() {
                None => Decision::Reject("no cached profile info".to_string()),
                Some(n) if n < *min => below(format!("{n} of {min} followers")),
                Some(_) => Decision::Accept,
            },
            Predicate::Credential { key, present } => {
                if account.has_credential(key) == *present {
                    Decision::Accept
                } else if *present {
                    Decision::Reject(format!("no {key} token"))
                } else {
                    Decision::Reject(format!("already has {key} token"))
                }
            }
            Predicate::WalletLinked(expected) => match account.wallet_is_linked() {
                Some(linked) if linked == *expected => Decision::Accept,
                Some(linked) => Decision::Reject(format!("wallet linked: {linked}")),
                None => Decision::Reject("no cached farm info".to_string()),
            },
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Status {
                statuses,
                membership,
            } => {
                let list: Vec<String> = statuses.iter().map(ToString::to_string).collect();
                let verb = match membership {
                    Membership::Allow => "in",
                    Membership::Block => "not in",
                };
                write!(f, "status {verb} [{}]", list.join(", "))
            }
            Predicate::MinAge(days) => write!(f, "minimum_age={days}"),
            Predicate::MinFollowers(n) => write!(f, "minimum_followers={n}"),
            Predicate::Credential { key, present } => write!(f, "{key} token present={present}"),
            Predicate::WalletLinked(linked) => write!(f, "wallet_is_linked={linked}"),
        }
    }
}
