use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{Value, json};

use super::http::{decode, parse_json, read, transport};
use super::{BindRequest, FarmApi, LinkStatus, LinkWalletRequest};
use crate::account::{FarmInfo, FarmTask, FarmTasks};
use crate::error::StepError;

const API_URL: &str = "https://memefarm-api.memecoin.org";
const ORIGIN: &str = "https://www.memecoin.org";
const REDIRECT_URI: &str = "https://www.memecoin.org/farming";
const CLIENT_ID: &str = "ZXh0SU5iS1pwTE5xclJtaVNNSjk6MTpjaQ";
const SCOPES: &str = "users.read tweet.read offline.access";

const HTTP_CONFLICT: u16 = 409;
const HTTP_TOO_MANY_REQUESTS: u16 = 429;

impl BindRequest {
    /// The OAuth request the farm app issues to the social service.
    pub fn farm() -> Self {
        let params = [
            ("response_type", "code"),
            ("client_id", CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
            ("scope", SCOPES),
            ("state", "state"),
            ("code_challenge", "challenge"),
            ("code_challenge_method", "plain"),
        ];
        Self {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Farm API over HTTP.
pub struct HttpFarm {
    client: reqwest::Client,
    base: String,
}

impl HttpFarm {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, API_URL)
    }

    pub fn with_base(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base))
            .bearer_auth(token)
    }

    fn post(&self, path: &str, token: Option<&str>) -> RequestBuilder {
        let req = self.client.post(format!("{}{path}", self.base));
        match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, StepError> {
        let response = request
            .header("origin", ORIGIN)
            .header("referer", format!("{ORIGIN}/"))
            .send()
            .await
            .map_err(transport)?;
        let (status, body) = read(response).await?;
        check_response(status, &body)
    }
}

/// Map a farm response to its JSON body or a typed error.
fn check_response(status: u16, body: &str) -> Result<Value, StepError> {
    match status {
        HTTP_TOO_MANY_REQUESTS => Err(StepError::farm(HTTP_TOO_MANY_REQUESTS, "rate limited")),
        HTTP_CONFLICT => {
            let value = parse_json(body)?;
            let code = value
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(HTTP_CONFLICT);
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("conflict")
                .to_string();
            Err(StepError::farm(code, message))
        }
        200..=299 => parse_json(body),
        _ => {
            parse_json(body)?;
            Err(StepError::farm(status, body.chars().take(200).collect::<String>()))
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Deserialize)]
struct InfoResponse {
    twitter: InfoTwitter,
    #[serde(default)]
    wallet: Option<String>,
}

#[derive(Deserialize)]
struct InfoTwitter {
    username: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct TasksResponse {
    points: Points,
    #[serde(default)]
    tasks: Vec<FarmTask>,
    #[serde(default)]
    timely: Vec<FarmTask>,
}

#[derive(Deserialize)]
struct Points {
    current: u64,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[async_trait]
impl FarmApi for HttpFarm {
    async fn exchange_code(&self, bind_code: &str) -> Result<String, StepError> {
        let body = json!({ "code": bind_code, "redirectUri": REDIRECT_URI });
        let value = self.send(self.post("/user/twitter-auth", None).json(&body)).await?;
        let token: TokenResponse = decode(value, "access token")?;
        Ok(token.access_token)
    }

    async fn info(&self, token: &str) -> Result<FarmInfo, StepError> {
        let value = self.send(self.get("/user/info", token)).await?;
        let info: InfoResponse = decode(value, "user info")?;
        Ok(FarmInfo {
            username: info.twitter.username,
            display_name: info.twitter.name,
            wallet: info.wallet,
        })
    }

    async fn tasks(&self, token: &str) -> Result<FarmTasks, StepError> {
        let value = self.send(self.get("/user/tasks", token)).await?;
        let tasks: TasksResponse = decode(value, "tasks")?;
        Ok(FarmTasks {
            points: tasks.points.current,
            tasks: tasks.tasks,
            timely: tasks.timely,
        })
    }

    async fn link_wallet(
        &self,
        token: &str,
        request: &LinkWalletRequest,
    ) -> Result<LinkStatus, StepError> {
        let body = json!({
            "address": request.address,
            "delegate": request.address,
            "message": request.message,
            "signature": request.signature,
        });
        let value = self
            .send(self.post("/user/verify/link-wallet", Some(token)).json(&body))
            .await?;
        let status: StatusResponse = decode(value, "link status")?;
        Ok(LinkStatus::parse(&status.status))
    }

    async fn perform_task(
        &self,
        token: &str,
        endpoint: &str,
        payload: Option<Value>,
    ) -> Result<String, StepError> {
        let path = format!("/user/verify/{}", endpoint.trim_start_matches('/'));
        let mut request = self.post(&path, Some(token));
        if let Some(payload) = payload {
            request = request.json(&payload);
        }
        let value = self.send(request).await?;
        let status: StatusResponse = decode(value, "task status")?;
        Ok(status.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, Verdict};

    #[test]
    fn rate_limit_maps_to_429() {
        let err = check_response(429, "").unwrap_err();
        assert!(matches!(err, StepError::Farm { code: 429, .. }));
    }

    #[test]
    fn conflict_body_carries_the_code() {
        let err = check_response(409, r#"{"status": 429, "error": "too fast"}"#).unwrap_err();
        match err {
            StepError::Farm { code, message } => {
                assert_eq!(code, 429);
                assert_eq!(message, "too fast");
            }
            other => panic!("expected Farm, got {other:?}"),
        }
    }

    #[test]
    fn conflict_with_html_is_malformed() {
        let err = check_response(409, "<html>").unwrap_err();
        assert!(matches!(err, StepError::Malformed { .. }));
    }

    #[test]
    fn success_with_html_is_malformed() {
        let err = check_response(200, "<!doctype html>").unwrap_err();
        assert!(matches!(err, StepError::Malformed { .. }));
    }

    #[test]
    fn other_statuses_with_json_are_farm_errors() {
        let err = check_response(500, r#"{"message": "boom"}"#).unwrap_err();
        assert!(matches!(err, StepError::Farm { code: 500, .. }));
    }

    #[test]
    fn bad_gateway_page_aborts_the_batch() {
        let err = check_response(502, "<html><body>502 Bad Gateway</body></html>").unwrap_err();
        assert!(matches!(err, StepError::Malformed { .. }));
        assert_eq!(Classifier::default().classify(&err), Verdict::Fatal);
    }

    #[test]
    fn out_of_range_conflict_status_is_not_truncated() {
        let err = check_response(409, r#"{"status": 65965, "error": "odd"}"#).unwrap_err();
        assert!(matches!(err, StepError::Farm { code: 409, .. }));
        assert_ne!(Classifier::default().classify(&err), Verdict::Fatal);
    }

    #[test]
    fn tasks_payload_decodes() {
        let value = json!({
            "points": {"current": 1500},
            "tasks": [{"id": "followElon", "completed": false}],
            "timely": [{"id": "shareMessage", "completed": true}]
        });
        let tasks: TasksResponse = decode(value, "tasks").unwrap();
        assert_eq!(tasks.points.current, 1500);
        assert_eq!(tasks.tasks[0].id, "followElon");
        assert!(tasks.timely[0].completed);
    }

    #[test]
    fn info_payload_decodes_without_wallet() {
        let value = json!({"twitter": {"username": "alice"}});
        let info: InfoResponse = decode(value, "user info").unwrap();
        assert_eq!(info.twitter.username, "alice");
        assert!(info.wallet.is_none());
    }

    #[test]
    fn bind_request_has_client_id() {
        let request = BindRequest::farm();
        assert!(request
            .params
            .iter()
            .any(|(k, v)| k == "client_id" && v == CLIENT_ID));
    }
}
