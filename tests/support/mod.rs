//! Test support utilities
//!
//! - [`scripted`]: an in-process event source replaying a fixed script
//! - [`mock_api`]: an HTTP server standing in for the upstream API and the
//!   push endpoint

pub mod mock_api;
pub mod scripted;

use std::{future::Future, sync::Arc, time::Duration};

use mailpush::events::Event;
use tokio::sync::mpsc;

#[allow(unused_imports)]
pub use mock_api::MockApi;
#[allow(unused_imports)]
pub use scripted::{Script, Step};

/// Receive the next event, failing the test if none arrives in time
#[allow(dead_code)]
pub async fn recv_within(rx: &mut mpsc::Receiver<Arc<Event>>, limit: Duration) -> Arc<Event> {
    tokio::time::timeout(limit, rx.recv())
        .await
        .expect("Timed out waiting for an event")
        .expect("Subscription closed while waiting for an event")
}

/// Poll `condition` until it holds, failing the test after `limit`
#[allow(dead_code)]
pub async fn eventually<F, Fut>(limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(limit, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition not met in time");
}
