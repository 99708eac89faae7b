use std::time::Duration;

use anyhow::Context;
use reqwest::Response;

use super::farm::HttpFarm;
use super::social::HttpSocial;
use super::{Connector, FarmApi, SocialApi};
use crate::account::{Account, Proxy, ResourceKey, SOCIAL_CSRF};
use crate::error::StepError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Builds reqwest clients routed through each account's proxy, falling
/// back to the default proxy, then to a direct connection.
pub struct HttpConnector {
    default_proxy: Option<Proxy>,
}

impl HttpConnector {
    pub fn new(default_proxy: Option<Proxy>) -> Self {
        Self { default_proxy }
    }

    fn client(&self, account: &Account) -> Result<reqwest::Client, StepError> {
        let route = ResourceKey::resolve(account.proxy.as_ref(), self.default_proxy.as_ref());
        // Same account position, same user agent across runs.
        let agent = USER_AGENTS[account.number.unwrap_or(0) % USER_AGENTS.len()];

        let mut builder = reqwest::Client::builder()
            .user_agent(agent)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(proxy) = route.proxy() {
            let proxy = reqwest::Proxy::all(proxy.as_url())
                .with_context(|| format!("invalid proxy {proxy}"))?;
            builder = builder.proxy(proxy);
        }
        Ok(builder.build().context("failed to build http client")?)
    }
}

impl Connector for HttpConnector {
    fn social(&self, account: &Account) -> Result<Box<dyn SocialApi>, StepError> {
        let token = account
            .social_token()
            .ok_or_else(|| anyhow::anyhow!("{account} has no social token"))?;
        Ok(Box::new(HttpSocial::new(
            self.client(account)?,
            token,
            account.credential(SOCIAL_CSRF),
        )))
    }

    fn farm(&self, account: &Account) -> Result<Box<dyn FarmApi>, StepError> {
        Ok(Box::new(HttpFarm::new(self.client(account)?)))
    }
}

/// Anything that failed before a full response body arrived.
pub(crate) fn transport(error: reqwest::Error) -> StepError {
    StepError::Transport(error.to_string())
}

/// Status code and body text, read in one go.
pub(crate) async fn read(response: Response) -> Result<(u16, String), StepError> {
    let status = response.status().as_u16();
    let body = response.text().await.map_err(transport)?;
    Ok((status, body))
}

/// Parse a body that must be JSON. Anything else is a malformed response.
pub(crate) fn parse_json(body: &str) -> Result<serde_json::Value, StepError> {
    serde_json::from_str(body).map_err(|_| StepError::malformed("json", body))
}

/// Decode a JSON value into the expected shape.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    expected: &'static str,
) -> Result<T, StepError> {
    serde_json::from_value(value).map_err(|e| StepError::malformed(expected, &e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_body_is_malformed() {
        let err = parse_json("<html><body>502</body></html>").unwrap_err();
        assert!(matches!(err, StepError::Malformed { expected: "json", .. }));
    }

    #[test]
    fn decode_reports_shape_errors() {
        #[derive(serde::Deserialize, Debug)]
        struct Shape {
            #[allow(dead_code)]
            id: String,
        }
        let err = decode::<Shape>(serde_json::json!({"nope": 1}), "shape").unwrap_err();
        assert!(matches!(err, StepError::Malformed { expected: "shape", .. }));
    }

    #[test]
    fn connector_builds_proxied_sessions() {
        let connector = HttpConnector::new(Some(Proxy::parse("127.0.0.1:9").unwrap()));
        let account = Account::new("token-1234567890", crate::account::Wallet::generate());
        assert!(connector.social(&account).is_ok());
        assert!(connector.farm(&account).is_ok());
    }
}
