//! Per-user connection registry.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::envelope::EventEnvelope;

struct Connection {
    connection_id: u64,
    tx: UnboundedSender<String>,
}

/// Returned by `register`; dropping the receiver side is how a client
/// disconnects, and the next send prunes the dead entry.
pub struct ConnectionHandle {
    pub connection_id: u64,
    pub rx: UnboundedReceiver<String>,
}

#[derive(Default)]
pub struct Notifier {
    inner: Mutex<NotifierInner>,
}

#[derive(Default)]
struct NotifierInner {
    connections: HashMap<Uuid, Vec<Connection>>,
    next_connection_id: u64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach one more connection for a user. A user may hold any number of
    /// connections (multiple tabs, devices); every one receives every frame.
    pub fn register(&self, user_id: Uuid) -> ConnectionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("notifier poisoned");
        inner.next_connection_id += 1;
        let connection_id = inner.next_connection_id;
        inner
            .connections
            .entry(user_id)
            .or_default()
            .push(Connection { connection_id, tx });
        debug!(%user_id, connection_id, "notification connection registered");
        ConnectionHandle { connection_id, rx }
    }

    /// Explicit detach (clean websocket close). Lazy prune covers the
    /// unclean cases.
    pub fn unregister(&self, user_id: Uuid, connection_id: u64) {
        let mut inner = self.inner.lock().expect("notifier poisoned");
        if let Some(list) = inner.connections.get_mut(&user_id) {
            list.retain(|c| c.connection_id != connection_id);
            if list.is_empty() {
                inner.connections.remove(&user_id);
            }
        }
    }

    /// Fan one event out to all of a user's live connections. Returns how
    /// many received it; dead connections are pruned as they are found.
    pub fn send_to(&self, user_id: Uuid, event: &EventEnvelope) -> usize {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                // Envelope serialization is infallible in practice; a failure
                // here is a bug worth surfacing, not worth panicking over.
                tracing::error!(error = %err, "unserializable notification dropped");
                return 0;
            }
        };

        let mut inner = self.inner.lock().expect("notifier poisoned");
        let Some(list) = inner.connections.get_mut(&user_id) else {
            return 0;
        };

        let before = list.len();
        list.retain(|c| c.tx.send(frame.clone()).is_ok());
        let delivered = list.len();
        if delivered < before {
            debug!(
                %user_id,
                pruned = before - delivered,
                "pruned dead notification connections"
            );
        }
        if list.is_empty() {
            inner.connections.remove(&user_id);
        }
        trace!(%user_id, delivered, "notification fanned out");
        delivered
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        let inner = self.inner.lock().expect("notifier poisoned");
        inner
            .connections
            .get(&user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgr_ledger::Micros;

    fn balance_frame(account_id: Uuid) -> EventEnvelope {
        EventEnvelope::BalanceUpdated {
            account_id,
            balance: Micros::from_units(10),
            currency: "USD".to_string(),
        }
    }

    #[test]
    fn fans_out_to_every_connection_of_the_user() {
        let notifier = Notifier::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut a = notifier.register(user);
        let mut b = notifier.register(user);
        let mut c = notifier.register(other);

        assert_eq!(notifier.send_to(user, &balance_frame(user)), 2);

        assert!(a.rx.try_recv().is_ok());
        assert!(b.rx.try_recv().is_ok());
        assert!(c.rx.try_recv().is_err());
    }

    #[test]
    fn send_to_user_without_connections_is_a_noop() {
        let notifier = Notifier::new();
        assert_eq!(notifier.send_to(Uuid::new_v4(), &balance_frame(Uuid::nil())), 0);
    }

    #[test]
    fn dead_connections_are_pruned_on_send() {
        let notifier = Notifier::new();
        let user = Uuid::new_v4();
        let dropped = notifier.register(user);
        let mut live = notifier.register(user);
        drop(dropped.rx);

        assert_eq!(notifier.send_to(user, &balance_frame(user)), 1);
        assert_eq!(notifier.connection_count(user), 1);
        assert!(live.rx.try_recv().is_ok());

        drop(live.rx);
        assert_eq!(notifier.send_to(user, &balance_frame(user)), 0);
        assert_eq!(notifier.connection_count(user), 0);
    }

    #[test]
    fn unregister_detaches_cleanly() {
        let notifier = Notifier::new();
        let user = Uuid::new_v4();
        let handle = notifier.register(user);
        notifier.unregister(user, handle.connection_id);
        assert_eq!(notifier.connection_count(user), 0);
    }
}
