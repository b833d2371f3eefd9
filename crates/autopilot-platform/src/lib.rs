//! autopilot-platform — concrete collaborators for the automation engines.
//!
//! # Components
//!
//! - **`simulated`** — deterministic in-process platform. Scriptable metrics,
//!   endpoint responses, and per-operation failures; records every call.
//!   Backs `--dry-run` and every engine test.
//! - **`command`** — maps each platform/action operation onto an
//!   operator-supplied shell template run with `tokio::process`.
//! - **`probe`** — HTTP/1.1 endpoint probe on hyper.
//! - **`pushed`** — metrics source fed through the operator API.
//! - **`host`** — host disk/memory usage via `sysinfo`.

pub mod command;
pub mod host;
pub mod probe;
pub mod pushed;
pub mod simulated;

pub use command::CommandPlatform;
pub use host::SysinfoHostUsage;
pub use probe::http_probe;
pub use pushed::PushedMetrics;
pub use simulated::SimulatedPlatform;
