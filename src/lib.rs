//! Block-based living documents for chat: conversations are ordered blocks
//! that users edit as rich documents while model replies stream into them.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(unused_must_use)]
#![deny(nonstandard_style)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_in_result)]
#![deny(clippy::redundant_clone)]
#![deny(overflowing_literals)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

/// Conversation documents: blocks, ordering, Markdown, storage and generation.
pub mod document;
/// Model providers and stream events.
pub mod llm;
/// HTTP server and API routes.
#[allow(clippy::unused_async)]
pub mod server;
/// Entry helpers to start the livedoc server.
pub mod start_livedoc;
