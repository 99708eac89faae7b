use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use super::{AccountSeed, AccountStore};
use crate::account::{Account, Wallet};

/// SQLite-backed account records, one JSON document per social token.
///
/// Shares a database file with [`Config`](crate::config::Config).
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

impl SqliteAccountStore {
    /// Open or create the accounts table. Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open account database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                social_token TEXT PRIMARY KEY,
                updated_at   TEXT NOT NULL DEFAULT (datetime('now')),
                record       TEXT NOT NULL
            )",
        )
        .context("failed to create accounts table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("account database lock poisoned"))
    }

    /// Fetch one persisted record by social token.
    pub fn get(&self, social_token: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM accounts WHERE social_token = ?1",
                [social_token],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).context("corrupt account record"))
            .transpose()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn load_all(&self, seeds: &[AccountSeed]) -> Result<Vec<Account>> {
        let mut accounts = Vec::with_capacity(seeds.len());
        for (i, seed) in seeds.iter().enumerate() {
            let mut account = match self.get(&seed.social_token)? {
                Some(persisted) => persisted,
                None => Account::new(&seed.social_token, Wallet::generate()),
            };
            account.number = Some(i);
            if seed.proxy.is_some() {
                account.proxy = seed.proxy.clone();
            }
            accounts.push(account);
        }
        Ok(accounts)
    }

    async fn save(&self, account: &Account) -> Result<()> {
        let Some(token) = account.social_token() else {
            bail!("{account} has no social token, refusing to save");
        };
        let json = serde_json::to_string(account)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (social_token, record) VALUES (?1, ?2)
             ON CONFLICT(social_token) DO UPDATE
             SET record = excluded.record, updated_at = datetime('now')",
            [token, &json],
        )?;
        Ok(())
    }
}
