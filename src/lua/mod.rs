//! Lua scripting engine for Ferrous
//!
//! Source text goes through [`lexer`] and [`parser`] into an [`ast`], which
//! [`codegen`] turns into a tree of closures. A compiled [`Chunk`] is
//! immutable and can be shared between threads; each [`LuaVM`] owns its own
//! globals and values and runs chunks on the calling thread.
//!
//! ```no_run
//! use ferrous_lua::lua::LuaVM;
//!
//! let vm = LuaVM::new()?;
//! let result = vm.eval("return 1 + 2")?;
//! assert_eq!(result.first().as_number(), Some(3.0));
//! # Ok::<(), ferrous_lua::lua::LuaError>(())
//! ```

pub mod ast;
pub mod cache;
pub mod codegen;
pub mod coerce;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod lexer;
pub mod metamethod;
pub mod parser;
mod scope;
pub mod stdlib;
pub mod table;
pub mod value;
pub mod varargs;
pub mod vm;

pub use self::cache::ScriptCache;
pub use self::codegen::{compile, Chunk, FunctionProto};
pub use self::error::{
    LuaError, LuaResult, RuntimeError, RuntimeErrorKind, SyntaxError, SyntaxErrorKind, TraceFrame,
};
pub use self::host::{HostObject, HostRef};
pub use self::lexer::SourceSpan;
pub use self::parser::parse;
pub use self::table::{Table, TableRef};
pub use self::value::{LuaString, Value};
pub use self::varargs::Varargs;
pub use self::vm::{ExecutionContext, LibFunction, LuaVM};
