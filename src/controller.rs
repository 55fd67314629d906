use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    Signal,
    config::Config,
    error::ConfigError,
    events::Manager,
    internal, logging,
    push::Notifier,
    upstream::HttpEventSource,
};

/// The daemon: one push subscription per configured account
#[derive(Debug)]
pub struct Relay {
    config: Config,
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    }

    Ok(())
}

impl Relay {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// If the relay cannot start, see [`Relay::serve`]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        internal!("Relay running");

        let (signals, receiver) = broadcast::channel(16);

        let serve = self.serve(receiver);
        tokio::pin!(serve);

        tokio::select! {
            r = &mut serve => return r,
            r = wait_for_signal() => r?,
        }

        signals.send(Signal::Shutdown)?;

        let ret = tokio::select! {
            r = &mut serve => r,
            _ = tokio::signal::ctrl_c() => {
                internal!(level = WARN, "Forcing shutdown");
                Ok(())
            }
        };

        internal!("Shutting down...");

        ret
    }

    /// Register every account and forward its events to the push endpoint
    /// until `shutdown` fires
    ///
    /// # Errors
    ///
    /// If no account is configured or an HTTP client cannot be built
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        if self.config.accounts.is_empty() {
            return Err(ConfigError::Invalid("no account configured".to_string()).into());
        }

        let manager = Manager::with_config(&self.config.events);
        let notifier = Arc::new(Notifier::new(self.config.push.clone())?);
        internal!(level = INFO, "Push endpoint: {}", notifier.uri());

        let mut cancels = Vec::with_capacity(self.config.accounts.len());
        let mut subscriptions = Vec::with_capacity(self.config.accounts.len());

        let sources = self
            .config
            .accounts
            .iter()
            .map(|account| HttpEventSource::new(&self.config.upstream, account))
            .collect::<Result<Vec<_>, _>>()?;

        for (account, source) in self.config.accounts.iter().zip(sources) {
            let (sender, events) = mpsc::channel(self.config.events.channel_capacity);
            let (cancel, cancelled) = oneshot::channel();

            manager
                .register(account.username.clone(), source, sender, Some(cancelled))
                .await;

            let notifier = Arc::clone(&notifier);
            let username = account.username.clone();
            subscriptions.push(tokio::spawn(async move {
                notifier.serve(&username, events).await;
            }));
            cancels.push(cancel);
        }

        internal!(
            level = INFO,
            "Listening for events for {} account(s)",
            self.config.accounts.len()
        );

        match shutdown.recv().await {
            Ok(sig) => internal!(level = INFO, "Received {sig:?}, closing subscriptions ..."),
            Err(e) => internal!(level = INFO, "Signal channel gone ({e}), closing subscriptions ..."),
        }

        for cancel in cancels {
            let _ = cancel.send(());
        }

        for result in join_all(subscriptions).await {
            if let Err(e) = result {
                internal!(level = ERROR, "Push subscription failed: {e}");
            }
        }

        Ok(())
    }
}
