use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use serde_json::Value;

use super::http::{decode, parse_json, read, transport};
use super::{BindRequest, SocialApi};
use crate::account::ProfileInfo;
use crate::error::StepError;

const API_URL: &str = "https://twitter.com/i/api";
/// Public bearer token of the web client.
const BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
/// "This request requires a matching csrf cookie and header."
const CSRF_MISMATCH: u32 = 353;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Social API over HTTP, authenticated with the account's auth token
/// cookie and a CSRF token that the server may rotate on any response.
pub struct HttpSocial {
    client: reqwest::Client,
    base: String,
    auth_token: String,
    csrf: Mutex<Option<String>>,
}

impl HttpSocial {
    pub fn new(client: reqwest::Client, auth_token: &str, csrf: Option<&str>) -> Self {
        Self::with_base(client, API_URL, auth_token, csrf)
    }

    pub fn with_base(
        client: reqwest::Client,
        base: &str,
        auth_token: &str,
        csrf: Option<&str>,
    ) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
            csrf: Mutex::new(csrf.map(str::to_string)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let csrf = self.csrf_token().unwrap_or_default();
        let mut cookie = format!("auth_token={}", self.auth_token);
        if !csrf.is_empty() {
            cookie.push_str(&format!("; ct0={csrf}"));
        }
        request
            .bearer_auth(BEARER_TOKEN)
            .header("cookie", cookie)
            .header("x-csrf-token", csrf)
            .header("x-twitter-auth-type", "OAuth2Session")
            .header("x-twitter-active-user", "yes")
    }

    fn remember_csrf(&self, headers: &HeaderMap) {
        if let Some(ct0) = csrf_from_headers(headers)
            && let Ok(mut csrf) = self.csrf.lock()
        {
            *csrf = Some(ct0);
        }
    }

    /// Send with auth headers. A CSRF mismatch is retried once, since the
    /// failed response carries the fresh token.
    async fn send<F>(&self, build: F) -> Result<Value, StepError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut retried = false;
        loop {
            let response = self.authorize(build()).send().await.map_err(transport)?;
            self.remember_csrf(response.headers());
            let (status, body) = read(response).await?;
            match check_response(status, &body) {
                Err(StepError::Social { codes, .. })
                    if !retried && codes.contains(&CSRF_MISMATCH) =>
                {
                    retried = true;
                }
                other => return other,
            }
        }
    }
}

fn csrf_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let pair = cookie.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            (name.trim() == "ct0" && !value.is_empty()).then(|| value.to_string())
        })
}

#[derive(Deserialize)]
struct ApiErrors {
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: u32,
    #[serde(default)]
    message: String,
}

/// Map a social response to its JSON body or a typed error. Error payloads
/// can arrive with any status, including 200.
fn check_response(status: u16, body: &str) -> Result<Value, StepError> {
    let value = match parse_json(body) {
        Ok(value) => value,
        Err(_) if status == HTTP_TOO_MANY_REQUESTS => {
            let snippet = body.chars().take(200).collect::<String>();
            return Err(StepError::social(status, Vec::new(), snippet));
        }
        Err(e) => return Err(e),
    };

    if value.get("errors").is_some()
        && let Ok(parsed) = serde_json::from_value::<ApiErrors>(value.clone())
        && !parsed.errors.is_empty()
    {
        let codes = parsed.errors.iter().map(|e| e.code).collect();
        let message = parsed
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(StepError::social(status, codes, message));
    }

    if !(200..300).contains(&status) {
        return Err(StepError::social(status, Vec::new(), value.to_string()));
    }
    Ok(value)
}

#[derive(Deserialize)]
struct Settings {
    screen_name: String,
}

#[derive(Deserialize)]
struct User {
    id_str: String,
    screen_name: String,
    #[serde(default)]
    name: String,
    created_at: String,
    followers_count: u64,
}

impl TryFrom<User> for ProfileInfo {
    type Error = StepError;

    fn try_from(user: User) -> Result<Self, StepError> {
        let created_at = DateTime::parse_from_str(&user.created_at, CREATED_AT_FORMAT)
            .map_err(|_| StepError::malformed("created_at timestamp", &user.created_at))?
            .with_timezone(&Utc);
        Ok(ProfileInfo {
            id: user.id_str,
            username: user.screen_name,
            display_name: user.name,
            created_at,
            followers_count: user.followers_count,
        })
    }
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    auth_code: String,
}

#[derive(Deserialize)]
struct ApproveResponse {
    redirect_uri: String,
}

#[async_trait]
impl SocialApi for HttpSocial {
    async fn follow(&self, user_id: &str) -> Result<(), StepError> {
        let url = self.url("/1.1/friendships/create.json");
        self.send(|| self.client.post(&url).form(&[("user_id", user_id)]))
            .await?;
        Ok(())
    }

    async fn username(&self) -> Result<String, StepError> {
        let url = self.url("/1.1/account/settings.json");
        let value = self.send(|| self.client.get(&url)).await?;
        let settings: Settings = decode(value, "account settings")?;
        Ok(settings.screen_name)
    }

    async fn user_profile(&self, username: &str) -> Result<ProfileInfo, StepError> {
        let url = self.url("/1.1/users/show.json");
        let value = self
            .send(|| self.client.get(&url).query(&[("screen_name", username)]))
            .await?;
        let user: User = decode(value, "user profile")?;
        user.try_into()
    }

    async fn bind_app(&self, request: &BindRequest) -> Result<String, StepError> {
        let url = self.url("/2/oauth2/authorize");
        let value = self
            .send(|| self.client.get(&url).query(&request.params))
            .await?;
        let authorize: AuthorizeResponse = decode(value, "oauth authorize")?;

        let value = self
            .send(|| {
                self.client.post(&url).form(&[
                    ("approval", "true"),
                    ("code", authorize.auth_code.as_str()),
                ])
            })
            .await?;
        let approve: ApproveResponse = decode(value, "oauth approval")?;
        code_from_redirect(&approve.redirect_uri)
    }

    fn csrf_token(&self) -> Option<String> {
        self.csrf.lock().ok().and_then(|csrf| csrf.clone())
    }
}

fn code_from_redirect(redirect: &str) -> Result<String, StepError> {
    let url = Url::parse(redirect).map_err(|_| StepError::malformed("redirect url", redirect))?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| StepError::malformed("bind code in redirect", redirect))
}
