//! autopilot-state — embedded audit store for the automation engines.
//!
//! Backed by [redb](https://docs.rs/redb). The engines own their live
//! state; this store keeps what operators ask about afterwards: every
//! deployment record (rewritten after each stage transition), the last
//! scaling step per service, the history of acted-on scaling decisions,
//! and chaos experiment results.
//!
//! All values are JSON-serialized into `&[u8]` columns. History keys are
//! `{service}:{timestamp_ms:020}` so a prefix scan returns one service's
//! rows in time order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{ScalingEvent, StateStore};
