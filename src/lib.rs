//! Chimera is a terminal chat client that aggregates responses from
//! multiple LLMs through one conversation.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the aggregation round: the model endpoint client, the
//!   retry policy, the three combination strategies, and the transcript
//!   with its pending-placeholder contract.
//! - [`commands`] parses the strategy prefix off raw chat input.
//! - [`api`] defines the chat-completion payloads exchanged with the
//!   provider.
//! - [`cli`] parses arguments and runs the interactive loop and one-shot
//!   commands.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod logging;
pub mod utils;
