//! autopilot-autoscale — threshold-driven instance scaling.
//!
//! Reads a metrics snapshot per service, compares CPU and memory against
//! the service's `ScalingPolicy`, and asks the platform for a new
//! instance count.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if cpu >= up or memory >= up, and current < max:
//!     to = min(current + max(ceil(current * 0.5), 1), max)
//!
//! if cpu < down and memory < down, and current > min:
//!     to = max(current - 1, min)
//!
//! if now - last_scale < cooldown:
//!     none
//! ```
//!
//! Scaling state (the cooldown clock) only advances after a successful
//! platform call, so a failed call is retried on the next tick.

pub mod scaler;

pub use scaler::{AutoScaler, AutoscaleError, decide};
