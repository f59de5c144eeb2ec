use std::sync::Arc;

use tokio::sync::watch;

/// Shared online/offline flag fed by the platform's network monitor.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the latest signal. Returns true only on an offline to online transition.
    pub fn set_online(&self, online: bool) -> bool {
        let mut reconnected = false;
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            reconnected = online;
            *current = online;
            true
        });
        if changed {
            tracing::info!(target: "fieldsync::connectivity", online, "connectivity changed");
        }
        reconnected
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
