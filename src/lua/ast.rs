//! Abstract Syntax Tree (AST) for Lua

use crate::lua::lexer::SourceSpan;
use crate::lua::value::LuaString;

/// A node in the AST with location information
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub node: T,
    pub span: SourceSpan,
}

impl<T> Node<T> {
    pub fn new(node: T, span: SourceSpan) -> Self {
        Node { node, span }
    }
}

/// A block (sequence of statements with optional return)
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Node<Statement>>,
    pub ret: Option<Node<ReturnStatement>>,
}

/// A statement in Lua
#[derive(Debug, Clone)]
pub enum Statement {
    /// Assignment: var1, var2, ... = exp1, exp2, ...
    Assignment(Assignment),

    /// Local assignment: local var1, var2, ... = exp1, exp2, ...
    LocalAssignment(LocalAssignment),

    /// Function call as statement
    FunctionCall(FunctionCall),

    /// Function definition: function name(...) ... end
    FunctionDefinition(FunctionDefinition),

    /// Local function: local function name(...) ... end
    LocalFunction { name: String, body: FunctionBody },

    /// Do block: do ... end
    DoBlock(Block),

    /// While loop: while exp do ... end
    WhileLoop {
        condition: Node<Expression>,
        body: Block,
    },

    /// Repeat loop: repeat ... until exp
    RepeatLoop {
        body: Block,
        condition: Node<Expression>,
    },

    /// If statement: if exp then ... elseif exp then ... else ... end
    IfStatement {
        clauses: Vec<(Node<Expression>, Block)>,
        else_clause: Option<Block>,
    },

    /// For loop (numeric): for var=start,limit,step do ... end
    NumericFor {
        variable: String,
        start: Node<Expression>,
        limit: Node<Expression>,
        step: Option<Node<Expression>>,
        body: Block,
    },

    /// For loop (generic): for var1,var2,... in exp1,exp2,... do ... end
    GenericFor {
        variables: Vec<String>,
        iterators: Vec<Node<Expression>>,
        body: Block,
    },

    /// Break statement
    Break,

    /// goto name
    Goto(String),

    /// ::name::
    Label(String),
}

/// An assignment statement
#[derive(Debug, Clone)]
pub struct Assignment {
    pub variables: Vec<Node<Variable>>,
    pub expressions: Vec<Node<Expression>>,
}

/// A local assignment statement
#[derive(Debug, Clone)]
pub struct LocalAssignment {
    pub names: Vec<String>,
    pub expressions: Vec<Node<Expression>>,
}

/// A return statement
#[derive(Debug, Clone)]
pub struct ReturnStatement {
    pub expressions: Vec<Node<Expression>>,
}

/// A function definition statement
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: FunctionName,
    pub body: FunctionBody,
}

/// `a.b.c:m` in `function a.b.c:m() end`
#[derive(Debug, Clone)]
pub struct FunctionName {
    pub base: String,
    pub fields: Vec<String>,
    pub method: Option<String>,
}

impl FunctionName {
    /// Dotted display name, used for tracebacks
    pub fn display(&self) -> String {
        let mut name = self.base.clone();
        for field in &self.fields {
            name.push('.');
            name.push_str(field);
        }
        if let Some(method) = &self.method {
            name.push(':');
            name.push_str(method);
        }
        name
    }
}

/// Parameters and body of a function literal
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub parameters: Vec<String>,
    pub is_variadic: bool,
    pub body: Block,

    /// Where the `function` keyword appeared
    pub span: SourceSpan,
}

/// An expression in Lua
#[derive(Debug, Clone)]
pub enum Expression {
    /// Nil literal
    Nil,

    /// Boolean literal
    Boolean(bool),

    /// Number literal
    Number(f64),

    /// String literal
    String(LuaString),

    /// Variable reference
    Variable(Variable),

    /// Vararg expression (...)
    Vararg,

    /// Function call
    FunctionCall(FunctionCall),

    /// Table constructor
    TableConstructor(TableConstructor),

    /// Anonymous function
    AnonymousFunction(FunctionBody),

    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<Node<Expression>>,
        right: Box<Node<Expression>>,
    },

    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Node<Expression>>,
    },

    /// Parenthesised expression; truncates multiple values to one
    Paren(Box<Node<Expression>>),
}

impl Expression {
    /// Calls and `...` may produce any number of values
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, Expression::FunctionCall(_) | Expression::Vararg)
    }
}

/// A variable (can be simple, table field, or table index)
#[derive(Debug, Clone)]
pub enum Variable {
    /// Simple variable: foo
    Name(String),

    /// Table field: expr[expr]
    TableField {
        table: Box<Node<Expression>>,
        key: Box<Node<Expression>>,
    },

    /// Table dot access: expr.name
    TableDot {
        table: Box<Node<Expression>>,
        key: String,
    },
}

/// Call argument shapes
#[derive(Debug, Clone)]
pub enum CallArgs {
    /// f(a, b, c)
    List(Vec<Node<Expression>>),

    /// f{...}
    Table(TableConstructor),

    /// f"..."
    String(LuaString),
}

/// A function call
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub function: Box<Node<Expression>>,
    pub method_name: Option<String>,
    pub args: CallArgs,
}

/// A table constructor
#[derive(Debug, Clone)]
pub struct TableConstructor {
    pub fields: Vec<TableField>,
}

/// A field in a table constructor
#[derive(Debug, Clone)]
pub enum TableField {
    /// Array part: expr
    Array(Node<Expression>),

    /// Record part: name = expr
    Record {
        key: String,
        value: Node<Expression>,
    },

    /// General field: [expr] = expr
    Expression {
        key: Node<Expression>,
        value: Node<Expression>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,    // +
    Sub,    // -
    Mul,    // *
    Div,    // /
    Mod,    // %
    Pow,    // ^
    Concat, // ..
    LT,     // <
    LE,     // <=
    GT,     // >
    GE,     // >=
    EQ,     // ==
    NE,     // ~=
    And,    // and
    Or,     // or
}

/// Binding power of unary operators
pub const UNARY_PRIORITY: u8 = 8;

impl BinaryOperator {
    /// (left, right) binding powers for precedence climbing. A right power
    /// lower than the left one makes the operator right-associative.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinaryOperator::Or => (1, 1),
            BinaryOperator::And => (2, 2),
            BinaryOperator::LT
            | BinaryOperator::LE
            | BinaryOperator::GT
            | BinaryOperator::GE
            | BinaryOperator::EQ
            | BinaryOperator::NE => (3, 3),
            BinaryOperator::Concat => (5, 4),
            BinaryOperator::Add | BinaryOperator::Sub => (6, 6),
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => (7, 7),
            BinaryOperator::Pow => (10, 9),
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus, // -
    Not,   // not
    Len,   // #
}
