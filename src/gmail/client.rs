use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::gmail::{HistoryList, Label, MailApi, Message, Profile, SentMessage};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKEN_SKEW_SECONDS: i64 = 60;
const RESPONSE_BODY_MAX_LEN: usize = 200;

pub struct GmailClient {
    client: Client,
    credentials: GmailCredentials,
    token: Mutex<Option<CachedAccessToken>>,
}

impl GmailClient {
    /// Resolves credentials from the environment and builds the HTTP client.
    /// Missing credentials are the one unrecoverable startup failure.
    pub fn from_env() -> Result<Self> {
        let credentials = GmailCredentials::resolve()?;
        let client = Client::builder()
            .timeout(StdDuration::from_secs(60))
            .connect_timeout(StdDuration::from_secs(10))
            .build()
            .context("build gmail http client")?;

        Ok(Self {
            client,
            credentials,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<CachedAccessToken> {
        let token_url = std::env::var("REPLYBOT_GMAIL_TOKEN_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string());

        let response = self
            .client
            .post(&token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .with_context(|| format!("request gmail oauth token from {token_url}"))?;

        let status = response.status();
        let body = response.text().await.context("read gmail token response")?;
        if !status.is_success() {
            return Err(anyhow!(
                "gmail oauth token request failed: status={} body={}",
                status,
                truncate_response_body(&body)
            ));
        }

        let payload: OAuthTokenResponse =
            serde_json::from_str(&body).context("decode gmail token JSON response")?;
        let expires_at = Utc::now()
            + Duration::seconds((payload.expires_in as i64).saturating_sub(TOKEN_SKEW_SECONDS));

        Ok(CachedAccessToken {
            access_token: payload.access_token,
            expires_at,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .header("accept", "application/json")
            .send()
            .await
            .with_context(|| format!("gmail api request: {url}"))?;

        decode_response(response, url).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, payload: &serde_json::Value) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&token)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("gmail api request: {url}"))?;

        decode_response(response, url).await
    }
}

#[async_trait(?Send)]
impl MailApi for GmailClient {
    async fn get_profile(&self) -> Result<Profile> {
        self.get_json(&format!("{GMAIL_API_BASE}/users/me/profile"))
            .await
    }

    async fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryList> {
        let mut url = format!(
            "{GMAIL_API_BASE}/users/me/history?startHistoryId={start_history_id}&historyTypes=messageAdded"
        );
        if let Some(pt) = page_token {
            url.push_str(&format!("&pageToken={pt}"));
        }
        self.get_json(&url).await
    }

    async fn get_message(&self, message_id: &str) -> Result<Message> {
        // Headers are all the responder ever reads, so metadata format is enough.
        self.get_json(&format!(
            "{GMAIL_API_BASE}/users/me/messages/{message_id}?format=metadata"
        ))
        .await
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        let response: ListLabelsResponse = self
            .get_json(&format!("{GMAIL_API_BASE}/users/me/labels"))
            .await?;
        Ok(response.labels.unwrap_or_default())
    }

    async fn create_label(&self, label: &Label) -> Result<Label> {
        let payload = serde_json::to_value(label).context("serialize label create request")?;
        self.post_json(&format!("{GMAIL_API_BASE}/users/me/labels"), &payload)
            .await
    }

    async fn modify_thread(&self, thread_id: &str, add_label_ids: &[String]) -> Result<()> {
        let payload = json!({ "addLabelIds": add_label_ids });
        let _: serde_json::Value = self
            .post_json(
                &format!("{GMAIL_API_BASE}/users/me/threads/{thread_id}/modify"),
                &payload,
            )
            .await?;
        Ok(())
    }

    async fn send_message(&self, raw: &str, thread_id: &str) -> Result<SentMessage> {
        let payload = json!({ "raw": raw, "threadId": thread_id });
        self.post_json(&format!("{GMAIL_API_BASE}/users/me/messages/send"), &payload)
            .await
    }
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .context("read gmail api response body")?;
    if !status.is_success() {
        return Err(anyhow!(
            "gmail api request failed: status={} body={}",
            status.as_u16(),
            truncate_response_body(&body)
        ));
    }

    serde_json::from_str(&body).with_context(|| format!("decode gmail api response from {url}"))
}

fn truncate_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= RESPONSE_BODY_MAX_LEN {
        trimmed.to_string()
    } else {
        format!(
            "{}…[truncated {} bytes]",
            &trimmed[..RESPONSE_BODY_MAX_LEN],
            trimmed.len()
        )
    }
}

#[derive(Debug, Clone)]
struct GmailCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl GmailCredentials {
    fn resolve() -> Result<Self> {
        Ok(Self {
            client_id: required_env("REPLYBOT_GMAIL_CLIENT_ID")?,
            client_secret: required_env("REPLYBOT_GMAIL_CLIENT_SECRET")?,
            refresh_token: required_env("REPLYBOT_GMAIL_REFRESH_TOKEN")?,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("missing gmail credential: {name} is not set"))
}

#[derive(Debug, Clone, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedAccessToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedAccessToken {
    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ListLabelsResponse {
    labels: Option<Vec<Label>>,
}
