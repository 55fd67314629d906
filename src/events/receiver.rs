use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::{Mutex, Notify, mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior},
};

use super::{Account, Cursor, DeliveryMode, Event, EventSource};
use crate::{incoming, internal};

/// Identifies one registration within a [`Receiver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a [`Receiver`]
///
/// `Terminated` is final: a receiver is never revived, the next registration
/// for the account creates a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Active,
    Terminated,
}

#[derive(Debug, Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, mpsc::Sender<Arc<Event>>)>,
    /// Set once the poll loop has seen an empty set; no further subscribers
    /// are accepted after that.
    closed: bool,
}

impl Subscribers {
    fn insert(&mut self, sender: mpsc::Sender<Arc<Event>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, sender));
        id
    }
}

/// Poll loop and subscriber set for a single account
///
/// Every mutation of the subscriber set, and every delivery round, happens
/// under the same lock. A subscriber's channel is only ever closed by
/// dropping its sender after it has been removed under that lock, so a send
/// in progress always completes before the removal takes effect.
#[derive(Debug)]
pub struct Receiver {
    account: Account,
    delivery: DeliveryMode,
    subscribers: Mutex<Subscribers>,
    cursor: parking_lot::Mutex<Cursor>,
    poll: Notify,
    state: watch::Sender<ReceiverState>,
}

impl Receiver {
    pub(crate) fn new(
        account: Account,
        delivery: DeliveryMode,
        sender: mpsc::Sender<Arc<Event>>,
    ) -> (Arc<Self>, SubscriptionId) {
        let mut subscribers = Subscribers::default();
        let id = subscribers.insert(sender);
        let (state, _) = watch::channel(ReceiverState::Active);

        let receiver = Self {
            account,
            delivery,
            subscribers: Mutex::new(subscribers),
            cursor: parking_lot::Mutex::default(),
            poll: Notify::new(),
            state,
        };

        (Arc::new(receiver), id)
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The last event id successfully fetched
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.cursor.lock().clone()
    }

    #[must_use]
    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    /// Resolves once the poll loop has ended and the receiver has been
    /// forgotten by its manager
    pub async fn terminated(&self) {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ReceiverState::Terminated)
            .await;
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.entries.len()
    }

    /// Wake the poll loop without waiting for the next tick
    ///
    /// The periodic schedule is left alone. Requests made while the loop is
    /// fetching or delivering collapse into a single wake-up for the next
    /// wait.
    pub fn poll_now(&self) {
        internal!("Poll requested for {}", self.account);
        self.poll.notify_one();
    }

    /// Add a subscriber, handing the sender back if the loop is shutting down
    pub(crate) async fn subscribe(
        &self,
        sender: mpsc::Sender<Arc<Event>>,
    ) -> Result<SubscriptionId, mpsc::Sender<Arc<Event>>> {
        let mut subscribers = self.subscribers.lock().await;

        if subscribers.closed {
            return Err(sender);
        }

        Ok(subscribers.insert(sender))
    }

    /// Remove a subscriber and close its channel
    pub(crate) async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry, _)| *entry != id);

        let removed = subscribers.entries.len() < before;
        if removed {
            internal!("Subscriber {id} removed from {}", self.account);
        }

        removed
    }

    pub(crate) fn finish(&self) {
        self.state.send_replace(ReceiverState::Terminated);
    }

    /// Poll `source` until a delivery round finds no subscribers
    ///
    /// Fetch errors are logged and retried on the regular schedule, they
    /// never end the loop and never move the cursor.
    pub(crate) async fn run<S: EventSource>(&self, mut source: S, period: Duration) {
        internal!(
            level = INFO,
            "Polling events for {} every {}s",
            self.account,
            period.as_secs_f64()
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cursor = Cursor::start();

        loop {
            let event = match source.fetch_next(&cursor).await {
                Ok(event) => event,
                Err(e) => {
                    internal!(level = WARN, "Cannot receive event for {}: {e}", self.account);
                    self.wait(&mut ticker).await;
                    continue;
                }
            };

            incoming!(level = DEBUG, "Event {} for {}", event.id, self.account);

            cursor = Cursor::from(event.id.clone());
            *self.cursor.lock() = cursor.clone();

            if self.deliver(Arc::new(event)).await == 0 {
                break;
            }

            self.wait(&mut ticker).await;
        }

        internal!(
            level = INFO,
            "No subscribers left for {}, stopping event poll",
            self.account
        );
    }

    /// Hand `event` to every subscriber, returning how many there were when
    /// the round started
    pub(super) async fn deliver(&self, event: Arc<Event>) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let count = subscribers.entries.len();

        if count == 0 {
            subscribers.closed = true;
            return 0;
        }

        let mut gone = Vec::new();
        for (id, sender) in &subscribers.entries {
            let open = match self.delivery {
                DeliveryMode::Blocking => sender.send(Arc::clone(&event)).await.is_ok(),
                DeliveryMode::DropWhenFull => match sender.try_send(Arc::clone(&event)) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        internal!(
                            level = WARN,
                            "Subscriber {id} of {} is full, dropping event {}",
                            self.account,
                            event.id
                        );
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                },
            };

            if !open {
                gone.push(*id);
            }
        }

        if !gone.is_empty() {
            internal!(
                level = DEBUG,
                "Pruning {} closed subscriber(s) of {}",
                gone.len(),
                self.account
            );
            subscribers.entries.retain(|(id, _)| !gone.contains(id));
        }

        count
    }

    async fn wait(&self, ticker: &mut Interval) {
        tokio::select! {
            _ = ticker.tick() => {}
            () = self.poll.notified() => {
                internal!("Polling {} now", self.account);
            }
        }
    }
}
