//! Push notifications to an ntfy style endpoint

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::sync::mpsc;

use crate::{config::PushConfig, error::PushError, events::Event, internal, outgoing};

const BODY: &str = "New message received";

/// Publishes "new message" notifications for the events it is fed
#[derive(Debug)]
pub struct Notifier {
    client: reqwest::Client,
    config: PushConfig,
}

impl Notifier {
    /// # Errors
    ///
    /// If the HTTP client cannot be built
    pub fn new(config: PushConfig) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub fn uri(&self) -> String {
        self.config.uri()
    }

    /// Publish a single notification
    ///
    /// # Errors
    ///
    /// If the stored password is not base64, the request fails, or the
    /// endpoint does not answer with a success status
    pub async fn notify(&self) -> Result<(), PushError> {
        let mut request = self
            .client
            .post(self.config.uri())
            .header("Title", &self.config.title)
            .header("Click", "dismiss")
            .header("Tags", "envelope")
            .body(BODY);

        if let Some((user, password)) = self.config.credentials() {
            let password = STANDARD.decode(password)?;
            request = request.basic_auth(user, Some(String::from_utf8_lossy(&password)));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PushError::Status(status));
        }

        outgoing!(level = INFO, "Push event sent to {}", self.config.uri());

        Ok(())
    }

    /// Notify for every event on `events` that reports a new message
    ///
    /// Runs until the channel closes. Publishing failures are logged and do
    /// not stop the loop.
    pub async fn serve(&self, account: &str, mut events: mpsc::Receiver<Arc<Event>>) {
        internal!("Push subscription for {account} started");

        while let Some(event) = events.recv().await {
            if !event.has_new_messages() {
                internal!("Event {} for {account} has no new messages", event.id);
                continue;
            }

            if let Err(e) = self.notify().await {
                outgoing!(level = ERROR, "Failed to publish to push topic: {e}");
            }
        }

        internal!(level = INFO, "Push subscription for {account} closed");
    }
}
