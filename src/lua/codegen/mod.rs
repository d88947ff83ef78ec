//! Closure-tree code generation
//!
//! The AST is compiled once into a tree of boxed closures. Every node is
//! resolved ahead of time: locals become frame slot indices, captured
//! variables become upvalue indices, and each binary operator owns the
//! [`DispatchSite`](crate::lua::dispatch::DispatchSite) that memoizes its
//! strategy. Executing a chunk is then a walk over that tree with no name
//! lookups and no AST in sight.
//!
//! Compiled code holds only `Send + Sync` data (string constants, numbers,
//! spans and prototypes), so a [`Chunk`] can be cached and shared between
//! threads while each thread runs it against its own
//! [`LuaVM`](crate::lua::vm::LuaVM).

mod expr;

use std::sync::Arc;

use tracing::debug;

use crate::lua::ast::{
    Assignment, Block, Expression, FunctionBody, FunctionDefinition, LocalAssignment, Node,
    ReturnStatement, Statement, Variable,
};
use crate::lua::coerce;
use crate::lua::dispatch;
use crate::lua::error::{LuaError, LuaResult, RuntimeErrorKind, SyntaxError, SyntaxErrorKind};
use crate::lua::lexer::SourceSpan;
use crate::lua::parser::parse;
use crate::lua::scope::{LabelId, Resolved, ScopeStack};
use crate::lua::value::{LuaString, Value};
use crate::lua::varargs::Varargs;
use crate::lua::vm::{Frame, LuaVM};

pub use crate::lua::scope::UpvalueDesc;

/// A compiled expression producing one value
pub(crate) type ExprFn = Box<dyn Fn(&mut Frame<'_>, &LuaVM) -> LuaResult<Value> + Send + Sync>;

/// A compiled expression producing any number of values
pub(crate) type MultiFn = Box<dyn Fn(&mut Frame<'_>, &LuaVM) -> LuaResult<Varargs> + Send + Sync>;

/// A compiled statement
pub(crate) type StmtFn = Box<dyn Fn(&mut Frame<'_>, &LuaVM) -> LuaResult<Flow> + Send + Sync>;

/// How control leaves a statement
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Break,
    Return(Varargs),
    Goto(LabelId),
}

/// A compiled block: its statements plus the labels it can jump to
pub(crate) struct CompiledBlock {
    statements: Vec<StmtFn>,
    targets: Vec<(LabelId, usize)>,
}

impl CompiledBlock {
    fn target(&self, id: LabelId) -> Option<usize> {
        self.targets.iter().find(|(label, _)| *label == id).map(|(_, index)| *index)
    }

    /// Run the statements in order. A goto to one of this block's labels
    /// moves to that statement; any other non-normal flow is handed to
    /// the enclosing construct.
    pub(crate) fn run(&self, frame: &mut Frame<'_>, vm: &LuaVM) -> LuaResult<Flow> {
        let mut pc = 0;
        while pc < self.statements.len() {
            match (self.statements[pc])(frame, vm)? {
                Flow::Normal => pc += 1,
                Flow::Goto(id) => match self.target(id) {
                    Some(index) => {
                        vm.check_interrupt()?;
                        pc = index;
                    }
                    None => return Ok(Flow::Goto(id)),
                },
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }
}

/// An immutable compiled function
pub struct FunctionProto {
    /// Name used in tracebacks, when the definition gives one
    pub name: Option<String>,

    /// Where the function was defined
    pub span: SourceSpan,

    pub param_count: usize,
    pub is_vararg: bool,

    /// Slots needed for parameters and locals
    pub frame_size: usize,

    /// How to fetch each upvalue when a closure is created
    pub upvalues: Vec<UpvalueDesc>,

    pub(crate) body: CompiledBlock,
}

impl std::fmt::Debug for FunctionProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionProto")
            .field("name", &self.name)
            .field("span", &self.span)
            .field("param_count", &self.param_count)
            .field("is_vararg", &self.is_vararg)
            .field("frame_size", &self.frame_size)
            .field("upvalues", &self.upvalues)
            .finish()
    }
}

/// A compiled chunk, ready to run on any VM
#[derive(Debug)]
pub struct Chunk {
    name: Arc<str>,
    main: Arc<FunctionProto>,
    function_count: usize,
}

impl Chunk {
    /// Chunk name used in error positions
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of function prototypes, the main chunk included
    pub fn function_count(&self) -> usize {
        self.function_count
    }

    pub(crate) fn main(&self) -> &Arc<FunctionProto> {
        &self.main
    }
}

/// Parse and compile `source`
pub fn compile(source: &str, chunk_name: &str) -> LuaResult<Chunk> {
    let block = parse(source, chunk_name)?;
    let mut generator = Generator::new();
    let main = generator.main_function(&block, chunk_name)?;

    debug!(
        chunk = chunk_name,
        functions = generator.function_count,
        "compiled chunk"
    );

    Ok(Chunk {
        name: Arc::from(chunk_name),
        main,
        function_count: generator.function_count,
    })
}

/// Assignment destinations, resolved at compile time
enum AssignTarget {
    Local(usize),
    Upvalue(usize),
    Global(LuaString),
    Index {
        table: ExprFn,
        key: ExprFn,
        desc: Option<String>,
    },
}

/// Converts AST into closures
pub(crate) struct Generator {
    scopes: ScopeStack,
    function_count: usize,
}

impl Generator {
    fn new() -> Self {
        Generator {
            scopes: ScopeStack::new(),
            function_count: 0,
        }
    }

    fn main_function(&mut self, block: &Block, chunk_name: &str) -> LuaResult<Arc<FunctionProto>> {
        self.scopes.open_function(true);
        let statements = self.block_body(block)?;
        let layout = self.scopes.close_function()?;
        self.function_count += 1;

        Ok(Arc::new(FunctionProto {
            name: Some("main chunk".to_string()),
            span: SourceSpan::new(Arc::from(chunk_name), 0, 0),
            param_count: 0,
            is_vararg: true,
            frame_size: layout.frame_size,
            upvalues: layout.upvalues,
            body: CompiledBlock {
                statements,
                targets: layout.targets,
            },
        }))
    }

    /// Compile a function literal into a prototype
    pub(crate) fn function(&mut self, body: &FunctionBody, name: Option<String>) -> LuaResult<Arc<FunctionProto>> {
        self.scopes.open_function(body.is_variadic);
        for parameter in &body.parameters {
            self.scopes.declare_local(parameter);
        }
        let statements = self.block_body(&body.body)?;
        let layout = self.scopes.close_function()?;
        self.function_count += 1;

        Ok(Arc::new(FunctionProto {
            name,
            span: body.span.clone(),
            param_count: body.parameters.len(),
            is_vararg: body.is_variadic,
            frame_size: layout.frame_size,
            upvalues: layout.upvalues,
            body: CompiledBlock {
                statements,
                targets: layout.targets,
            },
        }))
    }

    /// Compile a block in its own scope
    fn block(&mut self, block: &Block, is_loop: bool) -> LuaResult<CompiledBlock> {
        self.scopes.open_block(is_loop);
        let statements = self.block_body(block)?;
        let targets = self.scopes.close_block()?;
        Ok(CompiledBlock { statements, targets })
    }

    /// Compile the statements of a block into the current scope
    fn block_body(&mut self, block: &Block) -> LuaResult<Vec<StmtFn>> {
        let mut statements = Vec::with_capacity(block.statements.len() + 1);

        for (i, statement) in block.statements.iter().enumerate() {
            if let Statement::Label(name) = &statement.node {
                let at_block_end = block.ret.is_none()
                    && block.statements[i + 1..]
                        .iter()
                        .all(|s| matches!(s.node, Statement::Label(_)));
                self.scopes
                    .declare_label(name, statements.len(), at_block_end, &statement.span)?;
                continue;
            }
            statements.push(self.statement(statement)?);
        }

        if let Some(ret) = &block.ret {
            statements.push(self.return_statement(ret)?);
        }
        Ok(statements)
    }

    fn statement(&mut self, statement: &Node<Statement>) -> LuaResult<StmtFn> {
        let span = statement.span.clone();
        match &statement.node {
            Statement::LocalAssignment(local) => self.local_assignment(local),
            Statement::Assignment(assignment) => self.assignment(assignment, &span),
            Statement::FunctionCall(call) => {
                let call = self.call(call, &span)?;
                Ok(Box::new(move |frame, vm| {
                    call(frame, vm)?;
                    Ok(Flow::Normal)
                }))
            }
            Statement::FunctionDefinition(definition) => self.function_definition(definition, &span),
            Statement::LocalFunction { name, body } => {
                // Declared first so the body can refer to itself
                let slot = self.scopes.declare_local(name);
                let proto = self.function(body, Some(name.clone()))?;
                Ok(Box::new(move |frame, _| {
                    frame.declare(slot, Value::Nil);
                    let closure = frame.make_closure(&proto);
                    frame.set(slot, closure);
                    Ok(Flow::Normal)
                }))
            }
            Statement::DoBlock(body) => {
                let block = self.block(body, false)?;
                Ok(Box::new(move |frame, vm| block.run(frame, vm)))
            }
            Statement::WhileLoop { condition, body } => {
                let condition = self.expression(condition)?;
                let body = self.block(body, true)?;
                Ok(Box::new(move |frame, vm| {
                    while condition(frame, vm)?.is_truthy() {
                        match body.run(frame, vm)? {
                            Flow::Normal => {}
                            Flow::Break => break,
                            other => return Ok(other),
                        }
                        vm.check_interrupt().map_err(|e| vm.locate(e, &span))?;
                    }
                    Ok(Flow::Normal)
                }))
            }
            Statement::RepeatLoop { body, condition } => {
                // The condition sees the body's locals
                self.scopes.open_block(true);
                let statements = self.block_body(body)?;
                let condition = self.expression(condition)?;
                let targets = self.scopes.close_block()?;
                let body = CompiledBlock { statements, targets };
                Ok(Box::new(move |frame, vm| loop {
                    match body.run(frame, vm)? {
                        Flow::Normal => {}
                        Flow::Break => return Ok(Flow::Normal),
                        other => return Ok(other),
                    }
                    if condition(frame, vm)?.is_truthy() {
                        return Ok(Flow::Normal);
                    }
                    vm.check_interrupt().map_err(|e| vm.locate(e, &span))?;
                }))
            }
            Statement::IfStatement { clauses, else_clause } => {
                let mut compiled = Vec::with_capacity(clauses.len());
                for (condition, body) in clauses {
                    let condition = self.expression(condition)?;
                    compiled.push((condition, self.block(body, false)?));
                }
                let otherwise = match else_clause {
                    Some(body) => Some(self.block(body, false)?),
                    None => None,
                };
                Ok(Box::new(move |frame, vm| {
                    for (condition, body) in &compiled {
                        if condition(frame, vm)?.is_truthy() {
                            return body.run(frame, vm);
                        }
                    }
                    match &otherwise {
                        Some(body) => body.run(frame, vm),
                        None => Ok(Flow::Normal),
                    }
                }))
            }
            Statement::NumericFor {
                variable,
                start,
                limit,
                step,
                body,
            } => self.numeric_for(variable, start, limit, step.as_ref(), body, span),
            Statement::GenericFor {
                variables,
                iterators,
                body,
            } => self.generic_for(variables, iterators, body, span),
            Statement::Break => {
                if !self.scopes.in_loop() {
                    return Err(SyntaxError::new(SyntaxErrorKind::BreakOutsideLoop, &span).into());
                }
                Ok(Box::new(|_, _| Ok(Flow::Break)))
            }
            Statement::Goto(name) => {
                let id = self.scopes.goto(name, &span);
                Ok(Box::new(move |_, _| Ok(Flow::Goto(id))))
            }
            // Labels are bound by block_body
            Statement::Label(_) => Ok(Box::new(|_, _| Ok(Flow::Normal))),
        }
    }

    fn return_statement(&mut self, ret: &Node<ReturnStatement>) -> LuaResult<StmtFn> {
        let values = self.expr_list(&ret.node.expressions)?;
        Ok(Box::new(move |frame, vm| Ok(Flow::Return(values.eval(frame, vm)?))))
    }

    fn local_assignment(&mut self, local: &LocalAssignment) -> LuaResult<StmtFn> {
        // The initializers see the enclosing bindings, not the new ones
        let values = self.expr_list(&local.expressions)?;
        let slots: Vec<usize> = local
            .names
            .iter()
            .map(|name| self.scopes.declare_local(name))
            .collect();

        if slots.len() == 1 {
            let slot = slots[0];
            return Ok(Box::new(move |frame, vm| {
                let value = values.eval_one(frame, vm)?;
                frame.declare(slot, value);
                Ok(Flow::Normal)
            }));
        }

        Ok(Box::new(move |frame, vm| {
            let values = values.eval_exact(slots.len(), frame, vm)?;
            for (slot, value) in slots.iter().zip(values) {
                frame.declare(*slot, value);
            }
            Ok(Flow::Normal)
        }))
    }

    fn assign_target(&mut self, variable: &Node<Variable>) -> LuaResult<AssignTarget> {
        Ok(match &variable.node {
            Variable::Name(name) => self.name_target(name),
            Variable::TableDot { table, key } => {
                let desc = self.describe(table);
                let table = self.expression(table)?;
                let key = LuaString::from(key.as_str());
                AssignTarget::Index {
                    table,
                    key: Box::new(move |_, _| Ok(Value::String(key.clone()))),
                    desc,
                }
            }
            Variable::TableField { table, key } => {
                let desc = self.describe(table);
                let table = self.expression(table)?;
                let key = self.expression(key)?;
                AssignTarget::Index { table, key, desc }
            }
        })
    }

    fn name_target(&mut self, name: &str) -> AssignTarget {
        match self.scopes.resolve(name) {
            Resolved::Local(slot) => AssignTarget::Local(slot),
            Resolved::Upvalue(index) => AssignTarget::Upvalue(index),
            Resolved::Global => AssignTarget::Global(LuaString::from(name)),
        }
    }

    /// Multiple assignment: target prefixes and keys are evaluated first,
    /// then every right-hand value, then the stores run left to right.
    fn assignment(&mut self, assignment: &Assignment, span: &SourceSpan) -> LuaResult<StmtFn> {
        let mut targets = Vec::with_capacity(assignment.variables.len());
        for variable in &assignment.variables {
            targets.push(self.assign_target(variable)?);
        }
        let values = self.expr_list(&assignment.expressions)?;
        let span = span.clone();

        if targets.len() == 1 {
            if let Some(AssignTarget::Local(slot)) = targets.first() {
                let slot = *slot;
                return Ok(Box::new(move |frame, vm| {
                    let value = values.eval_one(frame, vm)?;
                    frame.set(slot, value);
                    Ok(Flow::Normal)
                }));
            }
        }

        Ok(Box::new(move |frame, vm| {
            let mut places = Vec::new();
            for target in &targets {
                if let AssignTarget::Index { table, key, .. } = target {
                    let table = table(frame, vm)?;
                    let key = key(frame, vm)?;
                    places.push((table, key));
                }
            }

            let values = values.eval_exact(targets.len(), frame, vm)?;
            let mut places = places.into_iter();
            for (target, value) in targets.iter().zip(values) {
                store(frame, vm, target, value, &mut places).map_err(|e| vm.locate(e, &span))?;
            }
            Ok(Flow::Normal)
        }))
    }

    fn function_definition(&mut self, definition: &FunctionDefinition, span: &SourceSpan) -> LuaResult<StmtFn> {
        let name = &definition.name;
        let proto = self.function(&definition.body, Some(name.display()))?;
        let span = span.clone();

        let mut path: Vec<&String> = name.fields.iter().chain(name.method.iter()).collect();
        let last = match path.pop() {
            Some(last) => last,
            None => {
                let target = self.name_target(&name.base);
                return Ok(Box::new(move |frame, vm| {
                    let closure = frame.make_closure(&proto);
                    store(frame, vm, &target, closure, &mut std::iter::empty())
                        .map_err(|e| vm.locate(e, &span))?;
                    Ok(Flow::Normal)
                }));
            }
        };

        let mut desc = Some(self.describe_name(&name.base));
        let mut table = self.name_read(&name.base, &span);
        for field in path {
            table = expr::index_constant(table, field, desc.take(), span.clone());
            desc = Some(format!("field '{}'", field));
        }

        let key = LuaString::from(last.as_str());
        Ok(Box::new(move |frame, vm| {
            let target = table(frame, vm)?;
            let closure = frame.make_closure(&proto);
            dispatch::set_index(vm, &target, Value::String(key.clone()), closure, desc.as_deref())
                .map_err(|e| vm.locate(e, &span))?;
            Ok(Flow::Normal)
        }))
    }

    fn numeric_for(
        &mut self,
        variable: &str,
        start: &Node<Expression>,
        limit: &Node<Expression>,
        step: Option<&Node<Expression>>,
        body: &Block,
        span: SourceSpan,
    ) -> LuaResult<StmtFn> {
        let start = self.expression(start)?;
        let limit = self.expression(limit)?;
        let step = match step {
            Some(step) => Some(self.expression(step)?),
            None => None,
        };

        self.scopes.open_block(true);
        let slot = self.scopes.declare_local(variable);
        let statements = self.block_body(body)?;
        let targets = self.scopes.close_block()?;
        let body = CompiledBlock { statements, targets };

        Ok(Box::new(move |frame, vm| {
            let locate = |e: LuaError| vm.locate(e, &span);
            let start = for_number(start(frame, vm)?, "initial").map_err(locate)?;
            let limit = for_number(limit(frame, vm)?, "limit").map_err(locate)?;
            let step = match &step {
                Some(step) => for_number(step(frame, vm)?, "step").map_err(locate)?,
                None => 1.0,
            };
            if step == 0.0 {
                return Err(locate(LuaError::runtime(RuntimeErrorKind::ForLoop, "'for' step is zero")));
            }

            let mut i = start;
            while (step > 0.0 && i <= limit) || (step < 0.0 && i >= limit) {
                // A fresh binding per iteration, so closures keep their own copy
                frame.declare(slot, Value::Number(i));
                match body.run(frame, vm)? {
                    Flow::Normal => {}
                    Flow::Break => break,
                    other => return Ok(other),
                }
                vm.check_interrupt().map_err(locate)?;
                i += step;
            }
            Ok(Flow::Normal)
        }))
    }

    fn generic_for(
        &mut self,
        variables: &[String],
        iterators: &[Node<Expression>],
        body: &Block,
        span: SourceSpan,
    ) -> LuaResult<StmtFn> {
        let iterators = self.expr_list(iterators)?;

        self.scopes.open_block(true);
        let slots: Vec<usize> = variables
            .iter()
            .map(|name| self.scopes.declare_local(name))
            .collect();
        let statements = self.block_body(body)?;
        let targets = self.scopes.close_block()?;
        let body = CompiledBlock { statements, targets };

        Ok(Box::new(move |frame, vm| {
            let mut init = iterators.eval_exact(3, frame, vm)?.into_iter();
            let function = init.next().unwrap_or(Value::Nil);
            let state = init.next().unwrap_or(Value::Nil);
            let mut control = init.next().unwrap_or(Value::Nil);

            loop {
                let args = Varargs::from(vec![state.clone(), control.clone()]);
                let results = dispatch::call(vm, &function, args, None).map_err(|e| vm.locate(e, &span))?;
                let first = results.first();
                if first.is_nil() {
                    break;
                }
                control = first;

                let mut values = results.into_padded(slots.len()).into_iter();
                for slot in &slots {
                    frame.declare(*slot, values.next().unwrap_or(Value::Nil));
                }
                match body.run(frame, vm)? {
                    Flow::Normal => {}
                    Flow::Break => break,
                    other => return Ok(other),
                }
                vm.check_interrupt().map_err(|e| vm.locate(e, &span))?;
            }
            Ok(Flow::Normal)
        }))
    }
}

/// Store into one assignment target. Index targets take their
/// pre-evaluated table and key from `places`.
fn store(
    frame: &mut Frame<'_>,
    vm: &LuaVM,
    target: &AssignTarget,
    value: Value,
    places: &mut impl Iterator<Item = (Value, Value)>,
) -> LuaResult<()> {
    match target {
        AssignTarget::Local(slot) => frame.set(*slot, value),
        AssignTarget::Upvalue(index) => frame.set_upvalue(*index, value),
        AssignTarget::Global(name) => vm.set_global_key(name, value)?,
        AssignTarget::Index { desc, .. } => {
            if let Some((table, key)) = places.next() {
                dispatch::set_index(vm, &table, key, value, desc.as_deref())?;
            }
        }
    }
    Ok(())
}

/// Convert a numeric `for` control value
fn for_number(value: Value, what: &str) -> LuaResult<f64> {
    match coerce::to_number(&value) {
        Some(n) if n.is_nan() => Err(LuaError::runtime(
            RuntimeErrorKind::InvalidNumber,
            format!("'for' {} value is not a number (NaN)", what),
        )),
        Some(n) => Ok(n),
        None => Err(LuaError::runtime(
            RuntimeErrorKind::ForLoop,
            format!("'for' {} value must be a number", what),
        )),
    }
}
