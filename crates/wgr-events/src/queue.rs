//! At-least-once in-process event queue.
//!
//! Delivery contract:
//! - `publish` never blocks and never drops.
//! - `claim`/`recv` hand out a [`Delivery`] guard; the payload stays in
//!   flight until the consumer settles it. `ack` finishes it, `nack`
//!   redelivers, and a guard dropped without either (consumer task died
//!   mid-flight) redelivers too — a payload can therefore arrive more than
//!   once, and consumers must be idempotent.
//! - A redelivered payload returns to the *front* of the queue so arrival
//!   order is preserved.
//! - After `max_attempts` failed deliveries the payload is parked instead
//!   of redelivered, so one poison message cannot wedge the stream.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{error, warn};

/// Redeliveries before a payload is parked.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug)]
struct Envelope<T> {
    delivery_id: u64,
    attempts: u32,
    payload: T,
}

struct QueueInner<T> {
    ready: VecDeque<Envelope<T>>,
    in_flight: HashSet<u64>,
    parked: Vec<Envelope<T>>,
    next_id: u64,
}

impl<T> Default for QueueInner<T> {
    fn default() -> Self {
        Self {
            ready: VecDeque::new(),
            in_flight: HashSet::new(),
            parked: Vec::new(),
            next_id: 0,
        }
    }
}

struct Shared<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
    max_attempts: u32,
}

/// One claimed delivery, held until settled. `delivery_id` is unique per
/// publish, stable across redeliveries of the same payload. Dropping the
/// guard without calling [`Delivery::ack`] counts as a nack.
pub struct Delivery<T> {
    shared: Arc<Shared<T>>,
    pub delivery_id: u64,
    /// 1 on first delivery.
    pub attempts: u32,
    payload: Option<T>,
}

impl<T> Delivery<T> {
    pub fn payload(&self) -> &T {
        self.payload
            .as_ref()
            .expect("delivery payload present until settled")
    }

    /// Consumer finished with the payload; it will not be redelivered.
    pub fn ack(mut self) {
        if let Some(_payload) = self.payload.take() {
            let mut inner = self.shared.inner.lock().expect("event queue poisoned");
            inner.in_flight.remove(&self.delivery_id);
        }
    }

    /// Consumer failed; requeue at the front, or park after too many tries.
    pub fn nack(mut self) {
        self.redeliver();
    }

    fn redeliver(&mut self) {
        let Some(payload) = self.payload.take() else {
            return;
        };
        let envelope = Envelope {
            delivery_id: self.delivery_id,
            attempts: self.attempts,
            payload,
        };
        let mut inner = self.shared.inner.lock().expect("event queue poisoned");
        inner.in_flight.remove(&self.delivery_id);
        if envelope.attempts >= self.shared.max_attempts {
            error!(
                delivery_id = self.delivery_id,
                attempts = envelope.attempts,
                "delivery exhausted retries, parking"
            );
            inner.parked.push(envelope);
            return;
        }
        inner.ready.push_front(envelope);
        drop(inner);
        self.shared.notify.notify_one();
    }
}

impl<T> Drop for Delivery<T> {
    fn drop(&mut self) {
        if self.payload.is_some() {
            warn!(
                delivery_id = self.delivery_id,
                attempts = self.attempts,
                "claim dropped without settling, redelivering"
            );
            self.redeliver();
        }
    }
}

pub struct EventQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(QueueInner::default()),
                notify: Notify::new(),
                max_attempts: max_attempts.max(1),
            }),
        }
    }

    pub fn publish(&self, payload: T) {
        {
            let mut inner = self.shared.inner.lock().expect("event queue poisoned");
            inner.next_id += 1;
            let delivery_id = inner.next_id;
            inner.ready.push_back(Envelope {
                delivery_id,
                attempts: 0,
                payload,
            });
        }
        self.shared.notify.notify_one();
    }

    /// Claim the oldest ready payload, if any.
    pub fn claim(&self) -> Option<Delivery<T>> {
        let mut inner = self.shared.inner.lock().expect("event queue poisoned");
        let mut envelope = inner.ready.pop_front()?;
        envelope.attempts += 1;
        inner.in_flight.insert(envelope.delivery_id);
        Some(Delivery {
            shared: Arc::clone(&self.shared),
            delivery_id: envelope.delivery_id,
            attempts: envelope.attempts,
            payload: Some(envelope.payload),
        })
    }

    /// Wait for the next ready payload.
    pub async fn recv(&self) -> Delivery<T> {
        loop {
            // Arm before checking so a publish between the check and the
            // await is not lost.
            let notified = self.shared.notify.notified();
            if let Some(delivery) = self.claim() {
                return delivery;
            }
            notified.await;
        }
    }

    pub fn ready_len(&self) -> usize {
        self.shared
            .inner
            .lock()
            .expect("event queue poisoned")
            .ready
            .len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.shared
            .inner
            .lock()
            .expect("event queue poisoned")
            .in_flight
            .len()
    }

    pub fn parked_len(&self) -> usize {
        self.shared
            .inner
            .lock()
            .expect("event queue poisoned")
            .parked
            .len()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nack_redelivers_in_arrival_order() {
        let queue = EventQueue::new();
        queue.publish("a");
        queue.publish("b");

        let first = queue.claim().unwrap();
        assert_eq!(*first.payload(), "a");
        assert_eq!(first.attempts, 1);
        first.nack();

        // "a" comes back before "b".
        let again = queue.claim().unwrap();
        assert_eq!(*again.payload(), "a");
        assert_eq!(again.attempts, 2);
        again.ack();
        assert_eq!(*queue.claim().unwrap().payload(), "b");
    }

    #[test]
    fn dropped_claim_is_redelivered() {
        let queue = EventQueue::new();
        queue.publish("a");

        // Consumer claims and dies without settling.
        let claim = queue.claim().unwrap();
        assert_eq!(queue.in_flight_len(), 1);
        drop(claim);

        assert_eq!(queue.in_flight_len(), 0);
        let again = queue.claim().unwrap();
        assert_eq!(*again.payload(), "a");
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn poison_payload_is_parked_after_max_attempts() {
        let queue = EventQueue::with_max_attempts(3);
        queue.publish("poison");
        queue.publish("good");

        for _ in 0..3 {
            let d = queue.claim().unwrap();
            assert_eq!(*d.payload(), "poison");
            d.nack();
        }

        // The stream is unwedged; the poison payload sits parked.
        assert_eq!(*queue.claim().unwrap().payload(), "good");
        assert_eq!(queue.parked_len(), 1);
        assert_eq!(queue.ready_len(), 0);
    }

    #[test]
    fn acked_payload_is_gone() {
        let queue = EventQueue::new();
        queue.publish(1u32);
        let d = queue.claim().unwrap();
        d.ack();
        assert!(queue.claim().is_none());
        assert_eq!(queue.in_flight_len(), 0);
    }
}
