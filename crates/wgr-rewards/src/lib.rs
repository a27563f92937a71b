//! Cashback reward engine: tier tables, GGR-based accrual with window
//! limits, FIFO claims, and timed expiry.
//!
//! Consumes wager events from the ingestion pipeline (at-least-once; the
//! `source_wager_id` uniqueness guard makes accrual idempotent) and exposes
//! the claim/summary operations the user-facing API serves.

pub mod engine;
pub mod store;
pub mod tiers;
pub mod types;
pub mod windows;

pub use engine::{NoopRewardHooks, RewardEngine, RewardError, RewardHooks, RewardPolicy};
pub use store::{ClaimDeduction, RewardStore, RewardStoreError};
pub use tiers::{RewardTier, TierTable, TierTableError};
pub use types::{
    AccrualOutcome, Claim, ClaimStatus, Earning, EarningStatus, RewardSummary, UserRewardState,
};
pub use windows::LimitWindow;
