//! Core library for `ais`: streaming chat with AI services from the terminal.
//!
//! The provider adapters normalize three streaming dialects onto one event
//! contract; the session drives turns over that contract and owns the
//! conversation history.

pub mod classify;
pub mod config;
pub mod history;
pub mod interrupt;
pub mod providers;
pub mod session;
pub mod version_check;
