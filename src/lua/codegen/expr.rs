//! Expression compilation

use crate::lua::ast::{
    BinaryOperator, CallArgs, Expression, FunctionBody, FunctionCall, Node, TableConstructor,
    TableField, UnaryOperator, Variable,
};
use crate::lua::dispatch::{self, ArithOp, DispatchSite};
use crate::lua::error::{LuaResult, SyntaxError, SyntaxErrorKind};
use crate::lua::lexer::SourceSpan;
use crate::lua::scope::Resolved;
use crate::lua::table::{Table, TableRef};
use crate::lua::value::{LuaString, Value};
use crate::lua::varargs::Varargs;
use crate::lua::vm::{Frame, LuaVM};

use super::{ExprFn, Generator, MultiFn};

/// A compiled expression list. Only the last expression may expand to
/// several values.
pub(crate) struct ExprList {
    fixed: Vec<ExprFn>,
    tail: Option<MultiFn>,
}

impl ExprList {
    fn single(expr: ExprFn) -> Self {
        ExprList {
            fixed: vec![expr],
            tail: None,
        }
    }

    /// Every value, in order
    pub(crate) fn eval(&self, frame: &mut Frame<'_>, vm: &LuaVM) -> LuaResult<Varargs> {
        let mut values = Vec::with_capacity(self.fixed.len() + 1);
        for expr in &self.fixed {
            values.push(expr(frame, vm)?);
        }
        let mut values = Varargs::from(values);
        if let Some(tail) = &self.tail {
            values.extend(tail(frame, vm)?);
        }
        Ok(values)
    }

    /// Exactly `n` values, padded with nil or truncated
    pub(crate) fn eval_exact(&self, n: usize, frame: &mut Frame<'_>, vm: &LuaVM) -> LuaResult<Vec<Value>> {
        Ok(self.eval(frame, vm)?.into_padded(n))
    }

    /// The first value; every expression still runs
    pub(crate) fn eval_one(&self, frame: &mut Frame<'_>, vm: &LuaVM) -> LuaResult<Value> {
        match (self.fixed.as_slice(), &self.tail) {
            ([only], None) => only(frame, vm),
            ([], None) => Ok(Value::Nil),
            _ => Ok(self.eval(frame, vm)?.into_first()),
        }
    }
}

/// `table.name` with a constant key
pub(super) fn index_constant(table: ExprFn, key: &str, desc: Option<String>, span: SourceSpan) -> ExprFn {
    let key = LuaString::from(key);
    Box::new(move |frame, vm| {
        let target = table(frame, vm)?;
        dispatch::index(vm, &target, &Value::String(key.clone()), desc.as_deref())
            .map_err(|e| vm.locate(e, &span))
    })
}

impl Generator {
    /// Compile an expression truncated to one value
    pub(super) fn expression(&mut self, expr: &Node<Expression>) -> LuaResult<ExprFn> {
        let span = expr.span.clone();
        Ok(match &expr.node {
            Expression::Nil => Box::new(|_, _| Ok(Value::Nil)),
            Expression::Boolean(b) => {
                let b = *b;
                Box::new(move |_, _| Ok(Value::Boolean(b)))
            }
            Expression::Number(n) => {
                let n = *n;
                Box::new(move |_, _| Ok(Value::Number(n)))
            }
            Expression::String(s) => {
                let s = s.clone();
                Box::new(move |_, _| Ok(Value::String(s.clone())))
            }
            Expression::Vararg => {
                self.check_vararg(&span)?;
                Box::new(|frame, _| Ok(frame.varargs().first()))
            }
            Expression::Variable(variable) => self.variable(variable, span)?,
            Expression::FunctionCall(call) => {
                let call = self.call(call, &span)?;
                Box::new(move |frame, vm| Ok(call(frame, vm)?.into_first()))
            }
            Expression::TableConstructor(constructor) => self.table_constructor(constructor, span)?,
            Expression::AnonymousFunction(body) => self.closure(body, None)?,
            Expression::BinaryOp { op, left, right } => self.binary(*op, left, right, span)?,
            Expression::UnaryOp { op, operand } => self.unary(*op, operand, span)?,
            Expression::Paren(inner) => self.expression(inner)?,
        })
    }

    /// Compile an expression keeping every value it produces
    pub(super) fn multi(&mut self, expr: &Node<Expression>) -> LuaResult<MultiFn> {
        match &expr.node {
            Expression::FunctionCall(call) => self.call(call, &expr.span),
            Expression::Vararg => {
                self.check_vararg(&expr.span)?;
                Ok(Box::new(|frame, _| Ok(frame.varargs().clone())))
            }
            _ => {
                let single = self.expression(expr)?;
                Ok(Box::new(move |frame, vm| Ok(Varargs::one(single(frame, vm)?))))
            }
        }
    }

    pub(super) fn expr_list(&mut self, exprs: &[Node<Expression>]) -> LuaResult<ExprList> {
        let mut fixed = Vec::with_capacity(exprs.len());
        let mut tail = None;
        for (i, expr) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && expr.node.is_multi_valued() {
                tail = Some(self.multi(expr)?);
            } else {
                fixed.push(self.expression(expr)?);
            }
        }
        Ok(ExprList { fixed, tail })
    }

    fn check_vararg(&self, span: &SourceSpan) -> LuaResult<()> {
        if self.scopes.is_vararg() {
            Ok(())
        } else {
            Err(SyntaxError::new(SyntaxErrorKind::VarargOutsideVararg, span).into())
        }
    }

    /// How a name shows up in error messages
    pub(super) fn describe_name(&mut self, name: &str) -> String {
        match self.scopes.resolve(name) {
            Resolved::Local(_) => format!("local '{}'", name),
            Resolved::Upvalue(_) => format!("upvalue '{}'", name),
            Resolved::Global => format!("global '{}'", name),
        }
    }

    /// Describe the expression being indexed or called, when it has a name
    pub(super) fn describe(&mut self, expr: &Node<Expression>) -> Option<String> {
        match &expr.node {
            Expression::Variable(Variable::Name(name)) => Some(self.describe_name(name)),
            Expression::Variable(Variable::TableDot { key, .. }) => Some(format!("field '{}'", key)),
            Expression::Variable(Variable::TableField { key, .. }) => match &key.node {
                Expression::String(s) => Some(format!("field '{}'", s)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Read a name, as a local slot, an upvalue or a global
    pub(super) fn name_read(&mut self, name: &str, span: &SourceSpan) -> ExprFn {
        match self.scopes.resolve(name) {
            Resolved::Local(slot) => Box::new(move |frame, _| Ok(frame.get(slot))),
            Resolved::Upvalue(index) => Box::new(move |frame, _| Ok(frame.get_upvalue(index))),
            Resolved::Global => {
                let key = LuaString::from(name);
                let span = span.clone();
                Box::new(move |_, vm| vm.get_global_key(&key).map_err(|e| vm.locate(e, &span)))
            }
        }
    }

    fn variable(&mut self, variable: &Variable, span: SourceSpan) -> LuaResult<ExprFn> {
        Ok(match variable {
            Variable::Name(name) => self.name_read(name, &span),
            Variable::TableDot { table, key } => {
                let desc = self.describe(table);
                let table = self.expression(table)?;
                index_constant(table, key, desc, span)
            }
            Variable::TableField { table, key } => {
                let desc = self.describe(table);
                let table = self.expression(table)?;
                let key = self.expression(key)?;
                Box::new(move |frame, vm| {
                    let target = table(frame, vm)?;
                    let key = key(frame, vm)?;
                    dispatch::index(vm, &target, &key, desc.as_deref()).map_err(|e| vm.locate(e, &span))
                })
            }
        })
    }

    /// Compile a call. The callee is evaluated before the arguments; a
    /// method call evaluates its receiver once and passes it first.
    pub(super) fn call(&mut self, call: &FunctionCall, span: &SourceSpan) -> LuaResult<MultiFn> {
        let span = span.clone();

        let callee_desc = self.describe(&call.function);
        let callee = self.expression(&call.function)?;

        let args = match &call.args {
            CallArgs::List(exprs) => self.expr_list(exprs)?,
            CallArgs::Table(constructor) => ExprList::single(self.table_constructor(constructor, span.clone())?),
            CallArgs::String(s) => {
                let s = s.clone();
                ExprList::single(Box::new(move |_, _| Ok(Value::String(s.clone()))))
            }
        };

        match &call.method_name {
            None => Ok(Box::new(move |frame, vm| {
                let function = callee(frame, vm)?;
                let args = args.eval(frame, vm)?;
                dispatch::call(vm, &function, args, callee_desc.as_deref()).map_err(|e| vm.locate(e, &span))
            })),
            Some(method) => {
                let key = LuaString::from(method.as_str());
                let desc = format!("method '{}'", method);
                Ok(Box::new(move |frame, vm| {
                    let receiver = callee(frame, vm)?;
                    let function = dispatch::index(vm, &receiver, &Value::String(key.clone()), callee_desc.as_deref())
                        .map_err(|e| vm.locate(e, &span))?;
                    let args = args.eval(frame, vm)?.prepend(receiver);
                    dispatch::call(vm, &function, args, Some(&desc)).map_err(|e| vm.locate(e, &span))
                }))
            }
        }
    }

    /// Table constructor. Positional fields count from 1; only a trailing
    /// positional call or `...` expands to all of its values.
    fn table_constructor(&mut self, constructor: &TableConstructor, span: SourceSpan) -> LuaResult<ExprFn> {
        enum FieldFn {
            Positional(ExprFn),
            Named(LuaString, ExprFn),
            Keyed(ExprFn, ExprFn),
        }

        let mut fields = Vec::with_capacity(constructor.fields.len());
        let mut tail = None;
        let mut positional = 0;
        let count = constructor.fields.len();

        for (i, field) in constructor.fields.iter().enumerate() {
            match field {
                TableField::Array(value) if i + 1 == count && value.node.is_multi_valued() => {
                    tail = Some(self.multi(value)?);
                }
                TableField::Array(value) => {
                    positional += 1;
                    fields.push(FieldFn::Positional(self.expression(value)?));
                }
                TableField::Record { key, value } => {
                    fields.push(FieldFn::Named(LuaString::from(key.as_str()), self.expression(value)?));
                }
                TableField::Expression { key, value } => {
                    let key = self.expression(key)?;
                    fields.push(FieldFn::Keyed(key, self.expression(value)?));
                }
            }
        }
        let named = fields.len() - positional;

        Ok(Box::new(move |frame, vm| {
            let table = TableRef::from_table(Table::with_capacity(positional, named));
            let mut index = 1.0;
            for field in &fields {
                let result = match field {
                    FieldFn::Positional(value) => {
                        let value = value(frame, vm)?;
                        let key = Value::Number(index);
                        index += 1.0;
                        table.set(key, value)
                    }
                    FieldFn::Named(key, value) => {
                        let value = value(frame, vm)?;
                        table.set(Value::String(key.clone()), value)
                    }
                    FieldFn::Keyed(key, value) => {
                        let key = key(frame, vm)?;
                        let value = value(frame, vm)?;
                        table.set(key, value)
                    }
                };
                result.map_err(|e| vm.locate(e, &span))?;
            }
            if let Some(tail) = &tail {
                for value in tail(frame, vm)? {
                    table.set(Value::Number(index), value).map_err(|e| vm.locate(e, &span))?;
                    index += 1.0;
                }
            }
            Ok(Value::Table(table))
        }))
    }

    /// A function literal; each evaluation creates a new closure
    pub(super) fn closure(&mut self, body: &FunctionBody, name: Option<String>) -> LuaResult<ExprFn> {
        let proto = self.function(body, name)?;
        Ok(Box::new(move |frame, _| Ok(frame.make_closure(&proto))))
    }

    fn binary(
        &mut self,
        op: BinaryOperator,
        left: &Node<Expression>,
        right: &Node<Expression>,
        span: SourceSpan,
    ) -> LuaResult<ExprFn> {
        let left = self.expression(left)?;
        let right = self.expression(right)?;

        let arith = match op {
            BinaryOperator::Add => Some(ArithOp::Add),
            BinaryOperator::Sub => Some(ArithOp::Sub),
            BinaryOperator::Mul => Some(ArithOp::Mul),
            BinaryOperator::Div => Some(ArithOp::Div),
            BinaryOperator::Mod => Some(ArithOp::Mod),
            BinaryOperator::Pow => Some(ArithOp::Pow),
            _ => None,
        };
        if let Some(arith) = arith {
            let site = DispatchSite::new();
            return Ok(Box::new(move |frame, vm| {
                let a = left(frame, vm)?;
                let b = right(frame, vm)?;
                if let (Value::Number(x), Value::Number(y)) = (&a, &b) {
                    return Ok(Value::Number(arith.apply(*x, *y)));
                }
                dispatch::arith(vm, &site, arith, &a, &b).map_err(|e| vm.locate(e, &span))
            }));
        }

        Ok(match op {
            BinaryOperator::And => Box::new(move |frame, vm| {
                let a = left(frame, vm)?;
                if a.is_falsey() {
                    Ok(a)
                } else {
                    right(frame, vm)
                }
            }),
            BinaryOperator::Or => Box::new(move |frame, vm| {
                let a = left(frame, vm)?;
                if a.is_truthy() {
                    Ok(a)
                } else {
                    right(frame, vm)
                }
            }),
            BinaryOperator::Concat => {
                let site = DispatchSite::new();
                Box::new(move |frame, vm| {
                    let a = left(frame, vm)?;
                    let b = right(frame, vm)?;
                    dispatch::concat(vm, &site, &a, &b).map_err(|e| vm.locate(e, &span))
                })
            }
            BinaryOperator::EQ | BinaryOperator::NE => {
                let negate = op == BinaryOperator::NE;
                Box::new(move |frame, vm| {
                    let a = left(frame, vm)?;
                    let b = right(frame, vm)?;
                    let equal = dispatch::equals(vm, &a, &b).map_err(|e| vm.locate(e, &span))?;
                    Ok(Value::Boolean(equal != negate))
                })
            }
            _ => {
                // `a > b` is `b < a` and `a >= b` is `b <= a`
                let swap = matches!(op, BinaryOperator::GT | BinaryOperator::GE);
                let or_equal = matches!(op, BinaryOperator::LE | BinaryOperator::GE);
                let site = DispatchSite::new();
                Box::new(move |frame, vm| {
                    let a = left(frame, vm)?;
                    let b = right(frame, vm)?;
                    let (a, b) = if swap { (b, a) } else { (a, b) };
                    let result = if or_equal {
                        dispatch::less_equal(vm, &site, &a, &b)
                    } else {
                        dispatch::less_than(vm, &site, &a, &b)
                    };
                    result.map(Value::Boolean).map_err(|e| vm.locate(e, &span))
                })
            }
        })
    }

    fn unary(&mut self, op: UnaryOperator, operand: &Node<Expression>, span: SourceSpan) -> LuaResult<ExprFn> {
        let operand = self.expression(operand)?;
        Ok(match op {
            UnaryOperator::Not => Box::new(move |frame, vm| Ok(Value::Boolean(operand(frame, vm)?.is_falsey()))),
            UnaryOperator::Minus => Box::new(move |frame, vm| {
                let value = operand(frame, vm)?;
                if let Value::Number(n) = value {
                    return Ok(Value::Number(-n));
                }
                dispatch::negate(vm, &value).map_err(|e| vm.locate(e, &span))
            }),
            UnaryOperator::Len => Box::new(move |frame, vm| {
                let value = operand(frame, vm)?;
                dispatch::len(vm, &value).map_err(|e| vm.locate(e, &span))
            }),
        })
    }
}
