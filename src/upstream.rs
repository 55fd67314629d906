//! HTTP event source for the provider's `/events` API

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    config::{AccountConfig, UpstreamConfig},
    error::FetchError,
    events::{Action, Cursor, Event, EventId, EventSource, MessageChange},
    internal,
};

const CODE_OK: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EventResponse {
    code: u32,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "EventID", default)]
    event_id: Option<String>,
    #[serde(default)]
    refresh: u8,
    #[serde(default)]
    more: u8,
    #[serde(default)]
    messages: Vec<MessageEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageEvent {
    #[serde(rename = "ID")]
    id: String,
    action: u8,
}

impl TryFrom<u8> for Action {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Delete),
            1 => Ok(Self::Create),
            2 => Ok(Self::Update),
            3 => Ok(Self::UpdateFlags),
            other => Err(other),
        }
    }
}

impl TryFrom<EventResponse> for Event {
    type Error = FetchError;

    fn try_from(response: EventResponse) -> Result<Self, Self::Error> {
        if response.code != CODE_OK {
            return Err(FetchError::Api {
                code: response.code,
                message: response.error.unwrap_or_default(),
            });
        }

        let id = response
            .event_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FetchError::Decode("response carries no EventID".to_string()))?;

        let messages = response
            .messages
            .into_iter()
            .filter_map(|message| match Action::try_from(message.action) {
                Ok(action) => Some(MessageChange {
                    id: message.id,
                    action,
                }),
                Err(action) => {
                    internal!("Skipping message {} with unknown action {action}", message.id);
                    None
                }
            })
            .collect();

        Ok(Self {
            id: EventId::new(id),
            refresh: response.refresh,
            more: response.more != 0,
            messages,
        })
    }
}

/// Polls `GET {api_endpoint}/events/{id}` for one account
///
/// An empty cursor asks for `latest`, which answers with the current head of
/// the stream.
#[derive(Debug)]
pub struct HttpEventSource {
    client: reqwest::Client,
    endpoint: String,
    app_version: String,
    username: String,
    uid: String,
    access_token: String,
}

impl HttpEventSource {
    /// # Errors
    ///
    /// If the HTTP client cannot be built
    pub fn new(upstream: &UpstreamConfig, account: &AccountConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: upstream.api_endpoint.trim_end_matches('/').to_string(),
            app_version: upstream.app_version.clone(),
            username: account.username.clone(),
            uid: account.uid.clone(),
            access_token: account.access_token.clone(),
        })
    }

    fn url(&self, cursor: &Cursor) -> String {
        let last = cursor.event_id().map_or("latest", EventId::as_str);
        format!("{}/events/{last}", self.endpoint)
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch_next(&mut self, cursor: &Cursor) -> Result<Event, FetchError> {
        let url = self.url(cursor);
        internal!("Fetching {url} for {}", self.username);

        let response = self
            .client
            .get(&url)
            .header("x-pm-appversion", &self.app_version)
            .header("x-pm-uid", &self.uid)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Errors usually still come with a {Code, Error} body
            return Err(match serde_json::from_str::<EventResponse>(&body) {
                Ok(EventResponse {
                    code,
                    error: Some(message),
                    ..
                }) => FetchError::Api { code, message },
                _ => FetchError::Status { status, body },
            });
        }

        serde_json::from_str::<EventResponse>(&body)
            .map_err(|e| FetchError::Decode(e.to_string()))?
            .try_into()
    }
}
