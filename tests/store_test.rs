use flock::account::{Account, AccountStatus, FARM_TOKEN, Wallet};
use flock::config::{Config, SettingKey, Settings};
use flock::error::ConfigError;
use flock::store::sqlite::SqliteAccountStore;
use flock::store::{AccountSeed, AccountStore, parse_seeds};

#[tokio::test]
async fn config_and_accounts_share_one_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flock.db");
    let path = path.to_str().unwrap();

    let config = Config::open(path).unwrap();
    config.set("max_tasks", "8").unwrap();
    let store = SqliteAccountStore::open(path).unwrap();
    let mut account = Account::new("tok", Wallet::generate());
    account.set_credential(FARM_TOKEN, "jwt");
    store.save(&account).await.unwrap();
    drop(store);
    drop(config);

    let config = Config::open(path).unwrap();
    assert_eq!(Settings::load(&config).unwrap().max_tasks, 8);
    let store = SqliteAccountStore::open(path).unwrap();
    let loaded = store.load_all(&[AccountSeed::new("tok")]).await.unwrap();
    assert_eq!(loaded[0].credential(FARM_TOKEN), Some("jwt"));
    assert_eq!(loaded[0].wallet, account.wallet);
}

#[tokio::test]
async fn token_file_merges_with_persisted_records() {
    let store = SqliteAccountStore::in_memory().unwrap();
    let mut known = Account::new("known", Wallet::generate());
    known.classify_as(AccountStatus::Banned);
    store.save(&known).await.unwrap();

    let seeds = parse_seeds("fresh\nknown\n", Some("socks5://10.0.0.1:1080\n")).unwrap();
    let accounts = store.load_all(&seeds).await.unwrap();

    assert_eq!(accounts[0].number, Some(0));
    assert_eq!(accounts[0].status(), AccountStatus::Unknown);
    assert_eq!(accounts[0].proxy.as_ref().unwrap().port(), 1080);
    assert_eq!(accounts[1].number, Some(1));
    assert_eq!(accounts[1].status(), AccountStatus::Banned);
    assert_eq!(accounts[1].wallet, known.wallet);
}

#[test]
fn stored_zero_limit_is_rejected_on_load() {
    let config = Config::open(":memory:").unwrap();
    config.set("max_tasks_per_proxy", "0").unwrap();
    let err = Settings::load(&config).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::NonPositiveLimit {
            name: "max_tasks_per_proxy",
            value: 0
        })
    );
}

#[test]
fn every_setting_key_round_trips_its_name() {
    for key in SettingKey::ALL {
        assert_eq!(key.as_str().parse::<SettingKey>().unwrap(), *key);
    }
}
