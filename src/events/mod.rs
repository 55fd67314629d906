//! Event polling and fan-out
//!
//! A [`Receiver`] drives one poll loop per account and fans every event out
//! to the channels subscribed to that account. The [`Manager`] maps account
//! identities to receivers, starting a loop on the first registration and
//! forgetting it once the loop has run out of subscribers.

mod manager;
mod receiver;

use std::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::FetchError;

pub use manager::Manager;
pub use receiver::{Receiver, ReceiverState, SubscriptionId};

/// Key identifying one upstream mail user or session
pub type Account = String;

/// Opaque identifier of an upstream event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Position in the upstream event stream
///
/// An empty cursor asks the upstream for the start of the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor(Option<EventId>);

impl Cursor {
    #[must_use]
    pub const fn start() -> Self {
        Self(None)
    }

    #[must_use]
    pub const fn event_id(&self) -> Option<&EventId> {
        self.0.as_ref()
    }

    #[must_use]
    pub const fn is_start(&self) -> bool {
        self.0.is_none()
    }
}

impl From<EventId> for Cursor {
    fn from(id: EventId) -> Self {
        Self(Some(id))
    }
}

/// What happened to a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Delete,
    Create,
    Update,
    UpdateFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChange {
    pub id: String,
    pub action: Action,
}

/// One change notification from the upstream provider
///
/// The polling core only ever looks at [`Event::id`]; everything else is
/// carried through untouched for subscribers to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub refresh: u8,
    pub more: bool,
    pub messages: Vec<MessageChange>,
}

impl Event {
    /// An event carrying no changes
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: EventId::new(id),
            refresh: 0,
            more: false,
            messages: Vec::new(),
        }
    }

    /// Whether any message was created by this event
    #[must_use]
    pub fn has_new_messages(&self) -> bool {
        self.messages.iter().any(|m| m.action == Action::Create)
    }
}

/// Upstream capability yielding the event following a cursor
///
/// Implementations are owned by exactly one poll loop.
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Fetch the event following `cursor`
    ///
    /// # Errors
    ///
    /// Any failure reaching or understanding the upstream. The poll loop
    /// treats every error as transient.
    async fn fetch_next(&mut self, cursor: &Cursor) -> Result<Event, FetchError>;
}

#[async_trait]
impl EventSource for Box<dyn EventSource> {
    async fn fetch_next(&mut self, cursor: &Cursor) -> Result<Event, FetchError> {
        (**self).fetch_next(cursor).await
    }
}

/// How a delivery round hands an event to each subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Wait for room in every subscriber's channel, in registration order.
    ///
    /// A slow subscriber holds up the whole account, including the next
    /// fetch.
    #[default]
    Blocking,
    /// Skip subscribers whose channel is full for this event.
    DropWhenFull,
}
