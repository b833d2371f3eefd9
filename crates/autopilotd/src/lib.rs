//! autopilotd — assembles the automation engines into one process.
//!
//! The binary in `main.rs` parses the CLI and hands off to the pieces
//! here: choosing collaborators for the configured platform mode, wiring
//! every engine onto a shared state store and event bus, spawning one
//! task per periodic loop, and logging every automation event.

pub mod collaborators;
pub mod daemon;
pub mod event_log;

pub use collaborators::Collaborators;
pub use daemon::Autopilot;
pub use event_log::log_events;
