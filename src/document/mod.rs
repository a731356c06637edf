//! Block-based conversation documents.
//!
//! A conversation is an ordered set of independently editable blocks. Users
//! edit blocks as rich documents; model turns stream into placeholder blocks
//! and are materialized as rich documents when they finish.

pub mod access;
pub mod core;
pub mod engine;
pub mod markdown;
pub mod ordering;
pub mod storage;
pub mod tokens;
