//! Online/offline tracking.
//!
//! Connectivity is an injected capability rather than something the engine
//! sniffs from its environment. Hosts flip a [`ConnectivityMonitor`] by hand
//! (from OS callbacks, UI toggles, tests) or let it probe a health endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Network reachability as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn is_online(self) -> bool {
        self == Status::Online
    }
}

/// Source of connectivity status.
pub trait Connectivity: Send + Sync {
    /// Status right now.
    fn current_status(&self) -> Status;

    /// Subscribe to status changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<Status>;

    fn is_online(&self) -> bool {
        self.current_status().is_online()
    }
}

/// Settable connectivity source backed by a watch channel.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<Status>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Status) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn online() -> Self {
        Self::new(Status::Online)
    }

    pub fn offline() -> Self {
        Self::new(Status::Offline)
    }

    /// Record a new status. Subscribers are only woken on an actual change.
    pub fn set_status(&self, status: Status) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!(?status, "Connectivity changed");
        }
    }

    pub fn set_online(&self) {
        self.set_status(Status::Online);
    }

    pub fn set_offline(&self) {
        self.set_status(Status::Offline);
    }

    /// Poll `health_url` every `interval` and follow its reachability.
    ///
    /// Any 2xx answer counts as online; errors and other statuses as offline.
    pub fn spawn_probe(
        self: &std::sync::Arc<Self>,
        health_url: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let monitor = std::sync::Arc::clone(self);
        let url = health_url.into();

        tokio::spawn(async move {
            let client = match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!("Failed to build connectivity probe client: {}", e);
                    return;
                }
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let status = match client.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => Status::Online,
                    Ok(resp) => {
                        tracing::debug!(url = %url, status = %resp.status(), "Health probe failed");
                        Status::Offline
                    }
                    Err(e) => {
                        tracing::debug!(url = %url, "Health probe unreachable: {}", e);
                        Status::Offline
                    }
                };
                monitor.set_status(status);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::online()
    }
}

impl Connectivity for ConnectivityMonitor {
    fn current_status(&self) -> Status {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_current_status() {
        let monitor = ConnectivityMonitor::offline();
        assert_eq!(monitor.current_status(), Status::Offline);
        monitor.set_online();
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let monitor = ConnectivityMonitor::online();
        let mut rx = monitor.subscribe();

        monitor.set_offline();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Status::Offline);
    }

    #[tokio::test]
    async fn repeated_status_does_not_wake() {
        let monitor = ConnectivityMonitor::online();
        let mut rx = monitor.subscribe();

        monitor.set_online();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn dropping_receiver_unsubscribes() {
        let monitor = ConnectivityMonitor::online();
        let rx = monitor.subscribe();
        assert_eq!(monitor.tx.receiver_count(), 1);
        drop(rx);
        assert_eq!(monitor.tx.receiver_count(), 0);
    }
}
