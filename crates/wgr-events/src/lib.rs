//! Event ingestion: the in-process at-least-once queue between the
//! transaction processor and the reward engine, plus the consumer task.

pub mod consumer;
pub mod queue;

pub use consumer::spawn_reward_consumer;
pub use queue::{Delivery, EventQueue, DEFAULT_MAX_ATTEMPTS};
