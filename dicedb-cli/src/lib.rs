//! Interactive command line client and micro-benchmark for DiceDB.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for REPL and bench modes.
//! - [`command`] splits an input line into a [`command::Command`].
//! - [`wire`] provides the JSON line protocol plus helpers for async reads
//!   and writes.
//! - [`client`] talks to the server: one request/response connection and,
//!   for watch commands, a second connection that receives pushes.
//! - [`signal`] routes interrupts either to the active watch stream or to
//!   process termination.
//! - [`session`] is the REPL state machine tying the pieces together.
//! - [`render`] turns responses into terminal output.
//! - [`bench`] measures parallel `GET` throughput.
//!
//! Integration tests drive the session and client against an in-process
//! fake server speaking the same protocol.

pub mod bench;
pub mod cli;
pub mod client;
pub mod command;
pub mod render;
pub mod session;
pub mod signal;
pub mod wire;
