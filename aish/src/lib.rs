//! Natural-language shell assistant.
//!
//! A request such as "find the largest log file" is sent to a language model,
//! which answers with a structured command suggestion. The suggestion is run in
//! a shell, its output is streamed to the terminal and recorded in a history
//! log, and the model is asked for the next step until it declares the task
//! finished. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (suggestion decoding, turn decisions,
//!   backend selection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process execution, the history log,
//!   config files, model backends). Isolated behind traits to enable scripted
//!   doubles in tests.
//!
//! [`session`] drives the interaction loop; [`cli`] wires it to the binaries.

pub mod cli;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
