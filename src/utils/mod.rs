//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - External tool execution with unavailable/failed distinction
//! - `shell` - Shell escaping and quoting
//! - `slugify` - Identifier sanitizing

pub mod command;
pub mod shell;
pub mod slugify;
