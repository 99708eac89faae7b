use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use flock::account::{Account, AccountStatus, FARM_TOKEN, ProfileInfo, SharedAccount, Wallet};
use flock::engine::{Scheduler, SchedulerConfig, Step};
use flock::error::{RunError, StepError};
use flock::pipeline::{FilterPolicy, Pipeline, Predicate, filter_accounts};
use flock::store::sqlite::SqliteAccountStore;

fn scheduler() -> Scheduler {
    let store = Arc::new(SqliteAccountStore::in_memory().unwrap());
    Scheduler::new(SchedulerConfig::new(4, 4), store).unwrap()
}

fn account(token: &str, age_days: i64, followers: u64) -> SharedAccount {
    let mut account = Account::new(token, Wallet::generate());
    account.confirm_good();
    account.profile = Some(ProfileInfo {
        id: format!("id-{token}"),
        username: token.to_string(),
        display_name: String::new(),
        created_at: Utc::now() - Duration::days(age_days),
        followers_count: followers,
    });
    account.shared()
}

async fn tokens(accounts: &[SharedAccount]) -> Vec<String> {
    let mut out = Vec::new();
    for account in accounts {
        out.push(account.lock().await.social_token().unwrap_or_default().to_string());
    }
    out
}

/// Ensure step that fills in a profile and counts its calls.
struct FillProfile {
    calls: AtomicUsize,
}

#[async_trait]
impl Step for FillProfile {
    fn name(&self) -> &str {
        "fill-profile"
    }

    async fn run(&self, account: &mut Account) -> Result<(), StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if account.profile.is_none() {
            account.profile = Some(ProfileInfo {
                id: "x".into(),
                username: "x".into(),
                display_name: String::new(),
                created_at: Utc::now() - Duration::days(400),
                followers_count: 50,
            });
        }
        Ok(())
    }
}

struct RateLimited;

#[async_trait]
impl Step for RateLimited {
    fn name(&self) -> &str {
        "rate-limited"
    }

    async fn run(&self, _account: &mut Account) -> Result<(), StepError> {
        Err(StepError::social(429, vec![88], "Rate limit exceeded"))
    }
}

#[tokio::test]
async fn young_accounts_pass_only_when_warnings_are_ignored() {
    let mut young = Account::new("young", Wallet::generate());
    young.profile = account("young", 10, 5).lock().await.profile.clone();
    assert_eq!(young.status(), AccountStatus::Unknown);
    let accounts = vec![young.shared(), account("old", 40, 5)];
    let pipeline = Pipeline::new().filter(Predicate::MinAge(30));
    let scheduler = scheduler();

    let strict = pipeline
        .apply(accounts.clone(), &scheduler, &FilterPolicy::new(false))
        .await
        .unwrap();
    assert_eq!(tokens(&strict).await, ["old"]);
    assert_eq!(accounts[0].lock().await.status(), AccountStatus::Unknown);

    let lenient = pipeline
        .apply(accounts, &scheduler, &FilterPolicy::new(true))
        .await
        .unwrap();
    assert_eq!(tokens(&lenient).await, ["young", "old"]);
}

#[tokio::test]
async fn composition_is_associative() {
    let accounts = vec![
        account("a", 100, 10),
        account("b", 5, 10),
        account("c", 100, 1),
        account("d", 100, 10),
    ];
    accounts[3].lock().await.set_credential(FARM_TOKEN, "jwt");

    let a = || Pipeline::new().filter(Predicate::MinAge(30));
    let b = || Pipeline::new().filter(Predicate::MinFollowers(3));
    let c = || Pipeline::new().filter(Predicate::lacks_credential(FARM_TOKEN));
    let policy = FilterPolicy::new(false);
    let scheduler = scheduler();

    let left = a().then(b()).then(c());
    let right = a().then(b().then(c()));
    assert_eq!(left.segments().len(), right.segments().len());

    let left = left.apply(accounts.clone(), &scheduler, &policy).await.unwrap();
    let right = right.apply(accounts, &scheduler, &policy).await.unwrap();
    assert_eq!(tokens(&left).await, ["a"]);
    assert_eq!(tokens(&left).await, tokens(&right).await);
}

#[tokio::test]
async fn filters_preserve_input_order() {
    let accounts: Vec<_> = (0..6).map(|i| account(&format!("t{i}"), 100, i)).collect();
    let survivors = filter_accounts(
        accounts,
        &Predicate::MinFollowers(2),
        &FilterPolicy::new(false),
    )
    .await;
    assert_eq!(tokens(&survivors).await, ["t2", "t3", "t4", "t5"]);
}

#[tokio::test]
async fn ensure_runs_before_the_filter_that_needs_it() {
    let bare = Account::new("bare", Wallet::generate()).shared();
    let step = Arc::new(FillProfile {
        calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new()
        .ensure(step.clone())
        .filter(Predicate::MinFollowers(3));

    let survivors = pipeline
        .apply(vec![bare], &scheduler(), &FilterPolicy::new(false))
        .await
        .unwrap();

    assert_eq!(tokens(&survivors).await, ["bare"]);
    assert_eq!(step.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_set_flows_through_every_segment() {
    let step = Arc::new(FillProfile {
        calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new()
        .filter(Predicate::allow(&[AccountStatus::Banned]))
        .ensure(step.clone())
        .filter(Predicate::MinAge(1));

    let survivors = pipeline
        .apply(vec![account("a", 100, 10)], &scheduler(), &FilterPolicy::new(false))
        .await
        .unwrap();

    assert!(survivors.is_empty());
    assert_eq!(step.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fatal_ensure_stops_the_pipeline() {
    let pipeline = Pipeline::new()
        .ensure(Arc::new(RateLimited))
        .filter(Predicate::MinAge(1));

    let result = pipeline
        .apply(vec![account("a", 100, 10)], &scheduler(), &FilterPolicy::new(false))
        .await;

    assert!(matches!(result, Err(RunError::Fatal(StepError::Social { .. }))));
}

#[tokio::test]
async fn status_block_list() {
    let banned = account("banned", 100, 10);
    banned.lock().await.classify_as(AccountStatus::Banned);
    let accounts = vec![banned, account("good", 100, 10)];

    let survivors = filter_accounts(
        accounts,
        &Predicate::block(&[AccountStatus::Banned, AccountStatus::Locked]),
        &FilterPolicy::new(true),
    )
    .await;
    assert_eq!(tokens(&survivors).await, ["good"]);
}
