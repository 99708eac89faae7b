pub mod sqlite;

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::account::{Account, Proxy};

/// One input line: a social auth token plus optional routing.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSeed {
    pub social_token: String,
    pub proxy: Option<Proxy>,
}

impl AccountSeed {
    pub fn new(social_token: impl Into<String>) -> Self {
        Self {
            social_token: social_token.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// Where account records live between runs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Build one account per seed, in seed order. Known tokens come back
    /// with their persisted state; unknown tokens get a fresh wallet.
    async fn load_all(&self, seeds: &[AccountSeed]) -> Result<Vec<Account>>;

    /// Upsert keyed by the social token.
    async fn save(&self, account: &Account) -> Result<()>;
}

/// Lines that carry data: trimmed, non-empty, not `#` comments.
fn data_lines(text: &str) -> impl Iterator<Item = &str> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

/// Pair token lines with proxy lines by position. Extra proxies are
/// ignored; accounts past the last proxy get none.
pub fn parse_seeds(tokens: &str, proxies: Option<&str>) -> Result<Vec<AccountSeed>> {
    let proxies = match proxies {
        Some(text) => data_lines(text)
            .enumerate()
            .map(|(i, line)| Proxy::parse(line).with_context(|| format!("proxy line {}", i + 1)))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(data_lines(tokens)
        .enumerate()
        .map(|(i, token)| {
            let seed = AccountSeed::new(token);
            match proxies.get(i) {
                Some(proxy) => seed.with_proxy(proxy.clone()),
                None => seed,
            }
        })
        .collect())
}

/// Read a token file and an optional proxy file.
pub async fn read_seeds(tokens: &Path, proxies: Option<&Path>) -> Result<Vec<AccountSeed>> {
    let token_text = tokio::fs::read_to_string(tokens)
        .await
        .with_context(|| format!("failed to read {}", tokens.display()))?;
    let proxy_text = match proxies {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };
    parse_seeds(&token_text, proxy_text.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_pair_with_proxies_by_line() {
        let seeds = parse_seeds(
            "tok-a\n\n# comment\ntok-b\ntok-c\n",
            Some("http://u:p@10.0.0.1:8080\n10.0.0.2:3128\n"),
        )
        .unwrap();
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[0].social_token, "tok-a");
        assert_eq!(seeds[0].proxy.as_ref().unwrap().host(), "10.0.0.1");
        assert_eq!(seeds[1].proxy.as_ref().unwrap().port(), 3128);
        assert!(seeds[2].proxy.is_none());
    }

    #[test]
    fn byte_order_mark_is_stripped() {
        let seeds =
            parse_seeds("\u{feff}tok-a\ntok-b\n", Some("\u{feff}10.0.0.1:8080\n")).unwrap();
        assert_eq!(seeds[0].social_token, "tok-a");
        assert_eq!(seeds[0].proxy.as_ref().unwrap().host(), "10.0.0.1");
    }

    #[test]
    fn bad_proxy_line_is_reported() {
        let err = parse_seeds("tok", Some("not a proxy")).unwrap_err();
        assert!(err.to_string().contains("proxy line 1"));
    }

    #[test]
    fn no_tokens_no_seeds() {
        assert!(parse_seeds("\n  \n", None).unwrap().is_empty());
    }
}
