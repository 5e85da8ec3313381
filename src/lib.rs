//! # restfill
//!
//! Fills a REST API test script from one captured request/response example:
//! the example is matched to a single operation of the service's interface
//! description, and only that operation's invocation in the draft script has
//! its data literals rewritten.
//!
//! ```text
//! interface text ─▶ interface::load_catalog ─┐
//! example text   ─▶ Example::parse ──────────┼─▶ matcher ─▶ script::patch ─▶ patched text
//! draft script   ─▶ DraftScript::parse ──────┘
//! ```
//!
//! [`pipeline::run`] sequences the steps.

pub mod config;
pub mod error;
pub mod example;
pub mod inference;
pub mod interface;
pub mod matcher;
pub mod pipeline;
pub mod script;

pub use error::{FillError, Result};
