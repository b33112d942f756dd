//! notirelay-daemon: the stateful half of the relay pipeline.
//! Filters raw events by source eligibility, folds them into the shared
//! thread store, fans snapshots out to observers, and relays one encoded
//! reminder per ingested event to the peripheral channel.

pub mod eligibility;
pub mod engine;
pub mod notifier;
pub mod relay;
pub mod settings;

pub use notirelay_core as core;
