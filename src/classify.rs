//! Maps step failures to account-status transitions, warnings or
//! batch-wide aborts.
//!
//! Account-scoped authorization failures are recorded on that account and
//! the batch carries on. Capacity failures (rate limiting, a backend that
//! answers with garbage) are fatal: every other task would hit the same
//! wall.

use crate::account::AccountStatus;
use crate::error::StepError;

/// Social API code: invalid or expired auth token.
pub const SOCIAL_BAD_TOKEN: u32 = 32;
/// Social API code: account suspended.
pub const SOCIAL_SUSPENDED: u32 = 64;
/// Social API code: rate limit exceeded.
pub const SOCIAL_RATE_LIMITED: u32 = 88;
/// Social API code: account locked pending verification.
pub const SOCIAL_LOCKED: u32 = 326;

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// The classifier's decision for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Record `status` on the account; persist when `durable`.
    StatusUpdate { status: AccountStatus, durable: bool },
    /// Log and end the task normally.
    TransientWarning,
    /// Cancel the batch and surface the error.
    Fatal,
}

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Social error carrying this API code.
    SocialCode(u32),
    /// Farm error with this application code.
    FarmCode(u16),
    /// Social error with this HTTP status.
    SocialHttp(u16),
    /// Any malformed response.
    Malformed,
    /// Any transport failure.
    Transport,
}

impl Matcher {
    fn matches(&self, error: &StepError) -> bool {
        match (self, error) {
            (Matcher::SocialCode(code), StepError::Social { codes, .. }) => codes.contains(code),
            (Matcher::SocialHttp(s), StepError::Social { status, .. }) => s == status,
            (Matcher::FarmCode(c), StepError::Farm { code, .. }) => c == code,
            (Matcher::Malformed, StepError::Malformed { .. }) => true,
            (Matcher::Transport, StepError::Transport(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub matcher: Matcher,
    pub verdict: Verdict,
}

/// Ordered rule table. First matching rule wins; unmatched remote errors
/// are transient warnings, unmatched internal errors are fatal.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        let status = |status| Verdict::StatusUpdate {
            status,
            durable: true,
        };
        Self {
            rules: vec![
                rule(Matcher::SocialHttp(HTTP_TOO_MANY_REQUESTS), Verdict::Fatal),
                rule(Matcher::SocialCode(SOCIAL_RATE_LIMITED), Verdict::Fatal),
                rule(Matcher::FarmCode(HTTP_TOO_MANY_REQUESTS), Verdict::Fatal),
                rule(Matcher::Malformed, Verdict::Fatal),
                rule(
                    Matcher::SocialCode(SOCIAL_BAD_TOKEN),
                    status(AccountStatus::BadToken),
                ),
                rule(
                    Matcher::SocialCode(SOCIAL_SUSPENDED),
                    status(AccountStatus::Banned),
                ),
                rule(
                    Matcher::SocialCode(SOCIAL_LOCKED),
                    status(AccountStatus::Locked),
                ),
                rule(Matcher::Transport, Verdict::TransientWarning),
            ],
        }
    }
}

fn rule(matcher: Matcher, verdict: Verdict) -> Rule {
    Rule { matcher, verdict }
}

impl Classifier {
    /// A classifier with no rules: only the fallbacks apply.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule. Earlier rules take precedence.
    pub fn with_rule(mut self, matcher: Matcher, verdict: Verdict) -> Self {
        self.rules.push(rule(matcher, verdict));
        self
    }

    /// Insert a rule ahead of every existing one.
    pub fn with_override(mut self, matcher: Matcher, verdict: Verdict) -> Self {
        self.rules.insert(0, rule(matcher, verdict));
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn classify(&self, error: &StepError) -> Verdict {
        if let Some(rule) = self.rules.iter().find(|r| r.matcher.matches(error)) {
            return rule.verdict;
        }
        match error {
            StepError::Internal(_) => Verdict::Fatal,
            _ => Verdict::TransientWarning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn social(codes: &[u32]) -> StepError {
        StepError::social(403, codes.to_vec(), "nope")
    }

    fn durable(status: AccountStatus) -> Verdict {
        Verdict::StatusUpdate {
            status,
            durable: true,
        }
    }

    #[test]
    fn social_codes_map_to_statuses() {
        let c = Classifier::default();
        assert_eq!(c.classify(&social(&[32])), durable(AccountStatus::BadToken));
        assert_eq!(c.classify(&social(&[64])), durable(AccountStatus::Banned));
        assert_eq!(c.classify(&social(&[326])), durable(AccountStatus::Locked));
    }

    #[test]
    fn rate_limits_are_fatal() {
        let c = Classifier::default();
        assert_eq!(c.classify(&StepError::farm(429, "slow down")), Verdict::Fatal);
        assert_eq!(c.classify(&social(&[88])), Verdict::Fatal);
        assert_eq!(
            c.classify(&StepError::social(429, vec![], "")),
            Verdict::Fatal
        );
    }

    #[test]
    fn rate_limit_wins_over_status_codes() {
        let c = Classifier::default();
        assert_eq!(c.classify(&social(&[64, 88])), Verdict::Fatal);
    }

    #[test]
    fn malformed_is_fatal() {
        let c = Classifier::default();
        let err = StepError::malformed("json", "<html>502 Bad Gateway</html>");
        assert_eq!(c.classify(&err), Verdict::Fatal);
    }

    #[test]
    fn other_remote_errors_are_warnings() {
        let c = Classifier::default();
        assert_eq!(
            c.classify(&StepError::farm(409, "already done")),
            Verdict::TransientWarning
        );
        assert_eq!(c.classify(&social(&[139])), Verdict::TransientWarning);
        assert_eq!(
            c.classify(&StepError::Transport("proxy refused".into())),
            Verdict::TransientWarning
        );
    }

    #[test]
    fn internal_errors_are_fatal() {
        let c = Classifier::default();
        let err = StepError::Internal(anyhow::anyhow!("store is gone"));
        assert_eq!(c.classify(&err), Verdict::Fatal);
    }

    #[test]
    fn classification_is_stable() {
        let c = Classifier::default();
        let err = social(&[64]);
        let first = c.classify(&err);
        for _ in 0..10 {
            assert_eq!(c.classify(&err), first);
        }
    }

    #[test]
    fn table_is_extendable() {
        let c = Classifier::default()
            .with_rule(Matcher::FarmCode(401), durable(AccountStatus::BadToken));
        assert_eq!(
            c.classify(&StepError::farm(401, "expired")),
            durable(AccountStatus::BadToken)
        );
    }

    #[test]
    fn overrides_take_precedence() {
        let c = Classifier::default().with_override(Matcher::Malformed, Verdict::TransientWarning);
        assert_eq!(
            c.classify(&StepError::malformed("json", "")),
            Verdict::TransientWarning
        );
    }

    #[test]
    fn empty_table_uses_fallbacks() {
        let c = Classifier::empty();
        assert!(c.rules().is_empty());
        assert_eq!(c.classify(&social(&[64])), Verdict::TransientWarning);
        assert_eq!(
            c.classify(&StepError::Internal(anyhow::anyhow!("x"))),
            Verdict::Fatal
        );
    }
}
