//! Lua VM implementation
//!
//! The VM owns the global environment, the call stack used for error
//! tracebacks, resource limits and the interrupt flag. Compiled chunks are
//! run by walking their closure tree against a [`Frame`] per call.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::VMConfig;
use crate::lua::codegen::{self, Chunk, Flow, FunctionProto, UpvalueDesc};
use crate::lua::coerce;
use crate::lua::dispatch;
use crate::lua::error::{LuaError, LuaResult, RuntimeErrorKind, TraceFrame};
use crate::lua::host::{HostObject, HostRef};
use crate::lua::lexer::SourceSpan;
use crate::lua::stdlib;
use crate::lua::table::TableRef;
use crate::lua::value::{Closure, FunctionRef, LuaFunction, LuaString, NativeFunction, Upvalue, Value};
use crate::lua::varargs::Varargs;

/// Signature of library functions registered in bulk
pub type LibFunction = fn(&mut ExecutionContext<'_>) -> LuaResult<Varargs>;

/// How often (in interrupt checks) the deadline is compared to the clock
const DEADLINE_CHECK_INTERVAL: u32 = 256;

/// A frame slot: a plain value, or a cell shared with closures
enum Slot {
    Value(Value),
    Cell(Upvalue),
}

/// Activation record of one scripted call
pub struct Frame<'a> {
    slots: Vec<Slot>,
    upvalues: &'a [Upvalue],
    varargs: Varargs,
}

impl<'a> Frame<'a> {
    /// Bind arguments to parameter slots; surplus arguments become the
    /// varargs of a variadic function and are dropped otherwise.
    pub(crate) fn new(proto: &FunctionProto, upvalues: &'a [Upvalue], args: Varargs) -> Self {
        let mut args = args.into_vec();
        let varargs = if proto.is_vararg && args.len() > proto.param_count {
            Varargs::from(args.split_off(proto.param_count))
        } else {
            Varargs::empty()
        };

        let size = proto.frame_size.max(proto.param_count);
        let mut slots = Vec::with_capacity(size);
        let mut args = args.into_iter();
        for _ in 0..proto.param_count {
            slots.push(Slot::Value(args.next().unwrap_or(Value::Nil)));
        }
        slots.resize_with(size, || Slot::Value(Value::Nil));

        Frame {
            slots,
            upvalues,
            varargs,
        }
    }

    pub(crate) fn get(&self, slot: usize) -> Value {
        match &self.slots[slot] {
            Slot::Value(value) => value.clone(),
            Slot::Cell(cell) => cell.borrow().clone(),
        }
    }

    /// Assign to an existing binding, writing through a captured cell
    pub(crate) fn set(&mut self, slot: usize, value: Value) {
        match &mut self.slots[slot] {
            Slot::Value(current) => *current = value,
            Slot::Cell(cell) => *cell.borrow_mut() = value,
        }
    }

    /// Start a new binding in `slot`. Closures that captured the previous
    /// binding keep it.
    pub(crate) fn declare(&mut self, slot: usize, value: Value) {
        self.slots[slot] = Slot::Value(value);
    }

    /// Share a slot with a closure, turning it into a cell on first capture
    fn capture(&mut self, slot: usize) -> Upvalue {
        if let Slot::Cell(cell) = &self.slots[slot] {
            return Rc::clone(cell);
        }
        let value = match std::mem::replace(&mut self.slots[slot], Slot::Value(Value::Nil)) {
            Slot::Value(value) => value,
            Slot::Cell(cell) => return cell,
        };
        let cell = Rc::new(RefCell::new(value));
        self.slots[slot] = Slot::Cell(Rc::clone(&cell));
        cell
    }

    pub(crate) fn get_upvalue(&self, index: usize) -> Value {
        self.upvalues[index].borrow().clone()
    }

    pub(crate) fn set_upvalue(&self, index: usize, value: Value) {
        *self.upvalues[index].borrow_mut() = value;
    }

    pub(crate) fn varargs(&self) -> &Varargs {
        &self.varargs
    }

    /// Instantiate a prototype, capturing its upvalues from this frame
    pub(crate) fn make_closure(&mut self, proto: &Arc<FunctionProto>) -> Value {
        let upvalues: Box<[Upvalue]> = proto
            .upvalues
            .iter()
            .map(|desc| match *desc {
                UpvalueDesc::ParentLocal(slot) => self.capture(slot),
                UpvalueDesc::ParentUpvalue(index) => Rc::clone(&self.upvalues[index]),
            })
            .collect();

        Value::Function(Rc::new(LuaFunction::Scripted(Closure {
            proto: Arc::clone(proto),
            upvalues,
        })))
    }
}

/// Arguments and services available to a native function
pub struct ExecutionContext<'a> {
    vm: &'a LuaVM,
    args: Varargs,
    name: &'a str,
}

impl<'a> ExecutionContext<'a> {
    pub fn vm(&self) -> &'a LuaVM {
        self.vm
    }

    /// Registered name of the running function
    pub fn function_name(&self) -> &str {
        self.name
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Argument `index` (0-based); nil when absent
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index)
    }

    pub fn args(&self) -> &Varargs {
        &self.args
    }

    /// Take ownership of all arguments
    pub fn take_args(&mut self) -> Varargs {
        std::mem::take(&mut self.args)
    }

    /// `bad argument #n to 'name' (msg)`
    pub fn bad_argument(&self, index: usize, message: impl std::fmt::Display) -> LuaError {
        LuaError::runtime(
            RuntimeErrorKind::BadArgument,
            format!("bad argument #{} to '{}' ({})", index + 1, self.name, message),
        )
    }

    fn type_error(&self, index: usize, expected: &str) -> LuaError {
        let got = if index < self.args.len() {
            self.args.get(index).type_name()
        } else {
            "no value"
        };
        self.bad_argument(index, format!("{} expected, got {}", expected, got))
    }

    /// Any value, present even if nil
    pub fn check_any(&self, index: usize) -> LuaResult<Value> {
        if index < self.args.len() {
            Ok(self.args.get(index))
        } else {
            Err(self.bad_argument(index, "value expected"))
        }
    }

    pub fn check_number(&self, index: usize) -> LuaResult<f64> {
        coerce::to_number(&self.args.get(index)).ok_or_else(|| self.type_error(index, "number"))
    }

    /// A number truncated toward zero
    pub fn check_integer(&self, index: usize) -> LuaResult<i64> {
        Ok(self.check_number(index)? as i64)
    }

    pub fn check_string(&self, index: usize) -> LuaResult<LuaString> {
        coerce::to_lua_string(&self.args.get(index)).ok_or_else(|| self.type_error(index, "string"))
    }

    pub fn check_table(&self, index: usize) -> LuaResult<TableRef> {
        match self.args.get(index) {
            Value::Table(table) => Ok(table),
            _ => Err(self.type_error(index, "table")),
        }
    }

    pub fn opt_number(&self, index: usize, default: f64) -> LuaResult<f64> {
        if self.args.get(index).is_nil() {
            Ok(default)
        } else {
            self.check_number(index)
        }
    }

    pub fn opt_integer(&self, index: usize, default: i64) -> LuaResult<i64> {
        if self.args.get(index).is_nil() {
            Ok(default)
        } else {
            self.check_integer(index)
        }
    }

    pub fn opt_string(&self, index: usize, default: &str) -> LuaResult<LuaString> {
        if self.args.get(index).is_nil() {
            Ok(LuaString::from(default))
        } else {
            self.check_string(index)
        }
    }
}

/// Pops the call stack when a call returns or unwinds
struct CallGuard<'a> {
    vm: &'a LuaVM,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.vm.call_stack.borrow_mut().pop();
    }
}

/// The Lua virtual machine
pub struct LuaVM {
    /// Global environment
    globals: TableRef,

    /// Type-level metatable shared by all strings
    string_metatable: RefCell<Option<TableRef>>,

    /// Functions currently executing, outermost first
    call_stack: RefCell<Vec<FunctionRef>>,

    config: VMConfig,

    /// Kill flag, settable from any thread
    interrupt: Arc<AtomicBool>,

    deadline: Cell<Option<Instant>>,
    ticks: Cell<u32>,

    /// Where `print` writes
    output: RefCell<Box<dyn Write>>,
}

impl LuaVM {
    /// Create a VM with the default configuration and standard libraries
    pub fn new() -> LuaResult<Self> {
        Self::with_config(VMConfig::default())
    }

    pub fn with_config(config: VMConfig) -> LuaResult<Self> {
        let open_stdlib = config.open_stdlib;
        let vm = LuaVM {
            globals: TableRef::new(),
            string_metatable: RefCell::new(None),
            call_stack: RefCell::new(Vec::new()),
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
            deadline: Cell::new(None),
            ticks: Cell::new(0),
            output: RefCell::new(Box::new(io::stdout())),
        };

        vm.globals.set_str("_G", Value::Table(vm.globals.clone()))?;
        if open_stdlib {
            stdlib::open_libs(&vm)?;
        }
        Ok(vm)
    }

    pub fn config(&self) -> &VMConfig {
        &self.config
    }

    /// Parse and compile a chunk. No VM state is involved, so the result
    /// can be cached and run on any VM.
    pub fn compile(source: &str, chunk_name: &str) -> LuaResult<Arc<Chunk>> {
        codegen::compile(source, chunk_name).map(Arc::new)
    }

    /// Compile a file, using its path as the chunk name
    pub fn load_file(path: impl AsRef<Path>) -> LuaResult<Arc<Chunk>> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| LuaError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::compile(&source, &path.display().to_string())
    }

    /// Run a compiled chunk
    pub fn execute(&self, chunk: &Chunk) -> LuaResult<Varargs> {
        self.execute_with_args(chunk, Varargs::empty())
    }

    /// Run a compiled chunk; `args` become its `...`
    pub fn execute_with_args(&self, chunk: &Chunk, args: Varargs) -> LuaResult<Varargs> {
        let outermost = self.call_stack.borrow().is_empty();
        if outermost {
            self.interrupt.store(false, Ordering::Relaxed);
            self.deadline
                .set(self.config.limits.timeout.map(|timeout| Instant::now() + timeout));
            self.ticks.set(0);
        }

        debug!(chunk = chunk.name(), "executing chunk");
        let main = Value::Function(Rc::new(LuaFunction::Scripted(Closure {
            proto: Arc::clone(chunk.main()),
            upvalues: Box::new([]),
        })));
        let result = self.call(&main, args);

        if outermost {
            self.deadline.set(None);
        }
        match &result {
            Ok(values) => debug!(chunk = chunk.name(), results = values.len(), "chunk finished"),
            Err(LuaError::Runtime(e)) if self.config.debug && outermost => {
                warn!(chunk = chunk.name(), "chunk failed\n{}", e.report())
            }
            Err(e) => debug!(chunk = chunk.name(), error = %e, "chunk failed"),
        }
        result
    }

    /// Compile and run `source` under the configured chunk name
    pub fn eval(&self, source: &str) -> LuaResult<Varargs> {
        let chunk = Self::compile(source, &self.config.chunk_name)?;
        self.execute(&chunk)
    }

    /// Call any value, honouring `__call`
    pub fn call(&self, function: &Value, args: Varargs) -> LuaResult<Varargs> {
        dispatch::call(self, function, args, None)
    }

    /// Call a function value directly
    pub fn call_function(&self, function: &FunctionRef, args: Varargs) -> LuaResult<Varargs> {
        self.check_interrupt()?;
        let _guard = self.enter(function)?;

        match &**function {
            LuaFunction::Scripted(closure) => {
                let mut frame = Frame::new(&closure.proto, &closure.upvalues, args);
                match closure.proto.body.run(&mut frame, self)? {
                    Flow::Return(values) => Ok(values),
                    _ => Ok(Varargs::empty()),
                }
            }
            LuaFunction::Native(native) => {
                let mut ctx = ExecutionContext {
                    vm: self,
                    args,
                    name: &native.name,
                };
                (native.func)(&mut ctx)
            }
        }
    }

    fn enter(&self, function: &FunctionRef) -> LuaResult<CallGuard<'_>> {
        let mut stack = self.call_stack.borrow_mut();
        if stack.len() >= self.config.limits.call_depth_limit {
            warn!(depth = stack.len(), "call depth limit reached");
            return Err(LuaError::runtime(RuntimeErrorKind::StackOverflow, "stack overflow"));
        }
        stack.push(Rc::clone(function));
        Ok(CallGuard { vm: self })
    }

    /// Current call depth
    pub fn call_depth(&self) -> usize {
        self.call_stack.borrow().len()
    }

    /// The call stack, innermost first
    pub fn traceback(&self) -> Vec<TraceFrame> {
        self.call_stack
            .borrow()
            .iter()
            .rev()
            .map(|function| match &**function {
                LuaFunction::Scripted(closure) => TraceFrame::Scripted {
                    name: closure.proto.name.clone(),
                    span: closure.proto.span.clone(),
                },
                LuaFunction::Native(native) => TraceFrame::Native(native.name.clone()),
            })
            .collect()
    }

    /// Attach a position to a runtime error the first time a generated
    /// node sees it
    pub(crate) fn locate(&self, err: LuaError, span: &SourceSpan) -> LuaError {
        match err {
            LuaError::Runtime(mut e) if e.location.is_none() => {
                e.locate(span, self.traceback());
                LuaError::Runtime(e)
            }
            other => other,
        }
    }

    /// Abort if the interrupt flag is set or the deadline has passed.
    /// Called at loop back-edges and calls.
    pub fn check_interrupt(&self) -> LuaResult<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            self.interrupt.store(false, Ordering::Relaxed);
            warn!("execution interrupted");
            return Err(LuaError::runtime(RuntimeErrorKind::Interrupted, "interrupted"));
        }

        if let Some(deadline) = self.deadline.get() {
            let ticks = self.ticks.get().wrapping_add(1);
            self.ticks.set(ticks);
            if ticks % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                self.deadline.set(None);
                warn!(timeout = ?self.config.limits.timeout, "execution timed out");
                return Err(LuaError::runtime(RuntimeErrorKind::Timeout, "execution timed out"));
            }
        }
        Ok(())
    }

    /// Flag that aborts the running script when set, from any thread
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    /// Raw read of a global
    pub fn get_global(&self, name: &str) -> Value {
        self.globals.get_str(name)
    }

    /// Raw write of a global
    pub fn set_global(&self, name: &str, value: impl Into<Value>) -> LuaResult<()> {
        self.globals.set_str(name, value.into())
    }

    pub(crate) fn get_global_key(&self, name: &LuaString) -> LuaResult<Value> {
        let key = Value::String(name.clone());
        let value = self.globals.get(&key);
        if !value.is_nil() || self.globals.metatable().is_none() {
            return Ok(value);
        }
        dispatch::index(self, &Value::Table(self.globals.clone()), &key, None)
    }

    pub(crate) fn set_global_key(&self, name: &LuaString, value: Value) -> LuaResult<()> {
        if self.globals.metatable().is_none() {
            return self.globals.set(Value::String(name.clone()), value);
        }
        dispatch::set_index(self, &Value::Table(self.globals.clone()), Value::String(name.clone()), value, None)
    }

    pub fn create_table(&self) -> TableRef {
        TableRef::new()
    }

    pub fn create_string(&self, s: impl AsRef<[u8]>) -> Value {
        Value::String(LuaString::from(s.as_ref()))
    }

    pub fn create_host_object<T: HostObject>(&self, object: T) -> Value {
        Value::HostObject(HostRef::new(object))
    }

    /// Bind a native function as a global
    pub fn register_function<F>(&self, name: &str, f: F) -> LuaResult<()>
    where
        F: Fn(&mut ExecutionContext<'_>) -> LuaResult<Varargs> + 'static,
    {
        self.globals.set_str(name, Value::native(name, f))
    }

    /// Create a library table holding `functions` and bind it as a global
    pub fn register_library(&self, name: &str, functions: &[(&str, LibFunction)]) -> LuaResult<TableRef> {
        let library = match self.globals.get_str(name) {
            Value::Table(existing) => existing,
            _ => TableRef::new(),
        };
        for (function_name, f) in functions {
            let f = *f;
            let native = Value::Function(Rc::new(LuaFunction::Native(NativeFunction {
                name: function_name.to_string(),
                func: Rc::new(f),
            })));
            library.set_str(function_name, native)?;
        }
        self.globals.set_str(name, Value::Table(library.clone()))?;

        info!(library = name, functions = functions.len(), "registered library");
        Ok(library)
    }

    pub fn string_metatable(&self) -> Option<TableRef> {
        self.string_metatable.borrow().clone()
    }

    pub fn set_string_metatable(&self, metatable: Option<TableRef>) {
        *self.string_metatable.borrow_mut() = metatable;
    }

    /// Redirect `print` output
    pub fn set_output(&self, output: Box<dyn Write>) {
        *self.output.borrow_mut() = output;
    }

    pub(crate) fn write_output(&self, bytes: &[u8]) -> LuaResult<()> {
        let mut output = self.output.borrow_mut();
        output
            .write_all(bytes)
            .and_then(|_| output.flush())
            .map_err(|e| LuaError::Io {
                path: "<output>".to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LuaLimits;
    use std::time::Duration;

    fn bare_vm() -> LuaVM {
        LuaVM::with_config(VMConfig {
            open_stdlib: false,
            ..VMConfig::default()
        })
        .unwrap()
    }

    fn kind(result: LuaResult<Varargs>) -> RuntimeErrorKind {
        result.unwrap_err().runtime_kind().unwrap()
    }

    #[test]
    fn test_eval_returns_values() {
        let vm = bare_vm();
        let values = vm.eval("local a, b = 1, 2 return a + b, a .. b").unwrap();
        assert_eq!(values.get(0), Value::Number(3.0));
        assert_eq!(values.get(1), Value::from("12"));
    }

    #[test]
    fn test_chunk_varargs() {
        let vm = bare_vm();
        let chunk = LuaVM::compile("local a, b = ... return b, a", "args").unwrap();
        let values = vm
            .execute_with_args(&chunk, Varargs::from(vec![Value::from(1), Value::from(2)]))
            .unwrap();
        assert_eq!(values.into_vec(), vec![Value::from(2), Value::from(1)]);
    }

    #[test]
    fn test_globals_round_trip() {
        let vm = bare_vm();
        vm.set_global("x", 41).unwrap();
        vm.eval("y = x + 1").unwrap();
        assert_eq!(vm.get_global("y"), Value::Number(42.0));
        assert!(vm.globals().get_str("_G").as_table().is_some());
    }

    #[test]
    fn test_native_registration() {
        let vm = bare_vm();
        vm.register_function("double", |ctx| {
            let n = ctx.check_number(0)?;
            Ok(Varargs::one(n * 2.0))
        })
        .unwrap();
        let values = vm.eval("return double(21)").unwrap();
        assert_eq!(values.first(), Value::Number(42.0));

        let err = vm.eval("return double({})").unwrap_err();
        assert_eq!(
            err.to_string(),
            "main:1: bad argument #1 to 'double' (number expected, got table)"
        );
    }

    #[test]
    fn test_call_depth_limit() {
        let vm = LuaVM::with_config(VMConfig {
            open_stdlib: false,
            limits: LuaLimits {
                call_depth_limit: 50,
                timeout: None,
            },
            ..VMConfig::default()
        })
        .unwrap();
        let result = vm.eval("local function f(n) return f(n + 1) end return f(1)");
        assert_eq!(kind(result), RuntimeErrorKind::StackOverflow);
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn test_interrupt_flag() {
        let vm = bare_vm();
        vm.register_function("stop", |ctx| {
            ctx.vm().interrupt_handle().store(true, Ordering::Relaxed);
            Ok(Varargs::empty())
        })
        .unwrap();
        let result = vm.eval("stop() while true do end");
        assert_eq!(kind(result), RuntimeErrorKind::Interrupted);

        // The flag is cleared, so the VM stays usable
        assert!(vm.eval("return 1").is_ok());
    }

    #[test]
    fn test_timeout() {
        let vm = LuaVM::with_config(VMConfig {
            open_stdlib: false,
            limits: LuaLimits {
                call_depth_limit: 200,
                timeout: Some(Duration::from_millis(20)),
            },
            ..VMConfig::default()
        })
        .unwrap();
        let result = vm.eval("while true do end");
        assert_eq!(kind(result), RuntimeErrorKind::Timeout);
    }

    #[test]
    fn test_frame_capture_and_fresh_binding() {
        let vm = bare_vm();
        let values = vm
            .eval(
                "local fs = {}
                 for i = 1, 3 do fs[i] = function() return i end end
                 return fs[1](), fs[3]()",
            )
            .unwrap();
        assert_eq!(values.into_vec(), vec![Value::from(1), Value::from(3)]);
    }

    #[test]
    fn test_traceback_without_debug_mode() {
        let vm = LuaVM::with_config(VMConfig {
            open_stdlib: false,
            ..VMConfig::default()
        })
        .unwrap();
        let err = vm.eval("local function inner() return nil + 1 end inner()").unwrap_err();
        match err {
            LuaError::Runtime(e) => {
                assert_eq!(e.traceback.len(), 2);
                assert!(e.report().contains("stack traceback:"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_traceback_in_debug_mode() {
        let vm = LuaVM::with_config(VMConfig {
            open_stdlib: false,
            debug: true,
            ..VMConfig::default()
        })
        .unwrap();
        let err = vm.eval("local function inner() return nil + 1 end inner()").unwrap_err();
        match err {
            LuaError::Runtime(e) => {
                assert!(e.traceback.len() >= 2);
                assert!(e.report().contains("stack traceback:"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
