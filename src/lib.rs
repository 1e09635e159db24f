//! Quaderno: headless back end for a dated LaTeX journal.
//!
//! Entries are persisted per calendar date, compiled to PDF by an external
//! renderer under a serialised, coalescing orchestrator, and paginated back
//! to the editor front end over a line-delimited JSON protocol.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
