//! Ferrous Lua library
//!
//! This file exposes the public API of the scripting engine for use as a
//! library.

pub mod config;
pub mod lua;

// Re-export commonly used types
pub use config::VMConfig;
pub use lua::{LuaError, LuaResult, LuaVM, ScriptCache, Value, Varargs};
