use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{Account, DeliveryMode, Event, EventSource, Receiver};
use crate::{config::EventsConfig, internal};

#[derive(Debug, Clone, Copy)]
struct Settings {
    poll_interval: Duration,
    delivery: DeliveryMode,
}

/// Registry of the receivers currently polling, one per account
///
/// Cloning is cheap and every clone shares the same registry. The registry
/// lock is never held across an `.await`, nor while a receiver's subscriber
/// lock is held.
#[derive(Debug, Clone)]
pub struct Manager {
    receivers: Arc<Mutex<HashMap<Account, Arc<Receiver>>>>,
    settings: Settings,
}

impl Default for Manager {
    fn default() -> Self {
        Self::with_config(&EventsConfig::default())
    }
}

impl Manager {
    /// A manager using the default poll interval, or `POLL_INTERVAL` when set
    #[must_use]
    pub fn new() -> Self {
        let mut config = EventsConfig::default();
        config.apply_env(|key| std::env::var(key).ok());
        Self::with_config(&config)
    }

    #[must_use]
    pub fn with_config(config: &EventsConfig) -> Self {
        Self {
            receivers: Arc::default(),
            settings: Settings {
                poll_interval: config.poll_interval(),
                delivery: config.delivery,
            },
        }
    }

    /// Override the poll interval of receivers created from now on
    ///
    /// A zero interval is ignored.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            internal!(level = WARN, "Ignoring zero poll interval");
        } else {
            self.settings.poll_interval = interval;
        }
        self
    }

    #[must_use]
    pub const fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.settings.delivery = delivery;
        self
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    /// Subscribe `sender` to the events of `account`
    ///
    /// The first registration for an account starts a poll loop over
    /// `source`; later registrations join that loop and `source` is dropped.
    /// When `cancel` resolves (or its sender is dropped) the subscription is
    /// removed and `sender` is dropped, closing the channel. Without `cancel`
    /// the subscription lasts as long as the consumer keeps its end open.
    pub async fn register<S: EventSource>(
        &self,
        account: impl Into<Account>,
        source: S,
        sender: mpsc::Sender<Arc<Event>>,
        cancel: Option<oneshot::Receiver<()>>,
    ) -> Arc<Receiver> {
        let account = account.into();
        let mut sender = sender;

        let (receiver, id) = loop {
            let existing = {
                let mut receivers = self.receivers.lock();

                if let Some(receiver) = receivers.get(&account) {
                    Arc::clone(receiver)
                } else {
                    let (receiver, id) =
                        Receiver::new(account.clone(), self.settings.delivery, sender);
                    receivers.insert(account.clone(), Arc::clone(&receiver));
                    drop(receivers);

                    self.spawn(Arc::clone(&receiver), source);
                    break (receiver, id);
                }
            };

            match existing.subscribe(sender).await {
                Ok(id) => {
                    internal!("Joined existing receiver for {account}");
                    break (existing, id);
                }
                Err(returned) => {
                    // The loop saw an empty set and is on its way out.
                    self.forget(&account, &existing);
                    sender = returned;
                }
            }
        };

        if let Some(cancel) = cancel {
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel => {
                        receiver.unsubscribe(id).await;
                    }
                    () = receiver.terminated() => {}
                }
            });
        }

        receiver
    }

    fn spawn<S: EventSource>(&self, receiver: Arc<Receiver>, source: S) {
        let manager = self.clone();
        let period = self.settings.poll_interval;

        tokio::spawn(async move {
            receiver.run(source, period).await;
            manager.forget(receiver.account(), &receiver);
            receiver.finish();
        });
    }

    /// Drop the registry entry for `account` if it still points at `receiver`
    fn forget(&self, account: &str, receiver: &Arc<Receiver>) {
        let mut receivers = self.receivers.lock();

        if receivers
            .get(account)
            .is_some_and(|current| Arc::ptr_eq(current, receiver))
        {
            receivers.remove(account);
            internal!("Receiver for {account} removed");
        }
    }

    #[must_use]
    pub fn get(&self, account: &str) -> Option<Arc<Receiver>> {
        self.receivers.lock().get(account).cloned()
    }

    #[must_use]
    pub fn contains(&self, account: &str) -> bool {
        self.receivers.lock().contains_key(account)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.receivers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receivers.lock().is_empty()
    }

    /// Ask the receiver of `account` to poll immediately
    ///
    /// Returns `false` when nothing is polling for that account.
    pub fn poll_now(&self, account: &str) -> bool {
        self.get(account).is_some_and(|receiver| {
            receiver.poll_now();
            true
        })
    }
}
