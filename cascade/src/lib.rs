//! Phased plan execution against an external coding agent.
//!
//! A markdown plan is split into phases of tasks. Each phase is handed to the
//! agent as a command file; the agent reports back by overwriting a shared
//! status record, and the controller cascades through the remaining phases,
//! retrying failures up to a ceiling.
//!
//! - **[`core`]**: Pure logic (extraction, splitting, selection, invariants,
//!   state transition tables). No I/O.
//! - **[`io`]**: Filesystem, process, and git adapters.
//!
//! [`controller`] owns the state machine, [`monitor`] polls the status record,
//! and [`control`] exposes typed operations to the CLI and the HTTP server.

pub mod control;
pub mod controller;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod monitor;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
