//! Parser for Lua scripts
//!
//! A recursive descent parser with one token of lookahead that converts
//! tokens into an abstract syntax tree. Binary expressions use precedence
//! climbing over [`BinaryOperator::priority`]. The first error aborts the
//! parse.

use crate::lua::ast::{
    Assignment, Block, BinaryOperator, CallArgs, Expression, FunctionBody, FunctionCall,
    FunctionDefinition, FunctionName, LocalAssignment, Node, ReturnStatement, Statement,
    TableConstructor, TableField, UnaryOperator, Variable, UNARY_PRIORITY,
};
use crate::lua::error::{LuaResult, SyntaxError, SyntaxErrorKind};
use crate::lua::lexer::{Lexer, SourceSpan, Token, TokenType};

/// The Lua parser
pub struct Parser<'a> {
    /// The lexer to get tokens from
    lexer: Lexer<'a>,

    /// Current token
    current: Token,

    /// One extra token, filled on demand
    lookahead: Option<Token>,

    /// Line of the most recently consumed token
    last_line: u32,
}

impl<'a> Parser<'a> {
    /// Create a new parser
    pub fn new(source: &'a str, chunk_name: &str) -> LuaResult<Self> {
        let mut lexer = Lexer::new(source, chunk_name);
        let current = lexer.next_token()?;

        Ok(Parser {
            lexer,
            current,
            lookahead: None,
            last_line: 1,
        })
    }

    /// Parse a whole chunk
    pub fn parse(&mut self) -> LuaResult<Block> {
        let block = self.parse_block()?;
        if !self.check(&TokenType::EOF) {
            return Err(self.expected("<eof>"));
        }
        Ok(block)
    }

    /// Advance to the next token, returning the consumed one
    fn advance(&mut self) -> LuaResult<Token> {
        let next = match self.lookahead.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        let previous = std::mem::replace(&mut self.current, next);
        self.last_line = previous.span.line;
        Ok(previous)
    }

    /// The token after the current one
    fn peek(&mut self) -> LuaResult<&Token> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        match &self.lookahead {
            Some(token) => Ok(token),
            None => Ok(&self.current),
        }
    }

    /// Check if current token is of the given type
    fn check(&self, token_type: &TokenType) -> bool {
        &self.current.token_type == token_type
    }

    /// Consume the current token if it matches
    fn accept(&mut self, token_type: &TokenType) -> LuaResult<bool> {
        if self.check(token_type) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume the current token if it matches the expected type
    fn consume(&mut self, token_type: &TokenType) -> LuaResult<Token> {
        if self.check(token_type) {
            self.advance()
        } else {
            Err(self.expected(token_type.symbol()))
        }
    }

    fn consume_name(&mut self) -> LuaResult<String> {
        if let TokenType::Identifier(name) = &self.current.token_type {
            let name = name.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.expected("<name>"))
        }
    }

    fn error(&self, kind: SyntaxErrorKind) -> crate::lua::error::LuaError {
        SyntaxError::new(kind, &self.current.span).into()
    }

    fn expected(&self, what: &str) -> crate::lua::error::LuaError {
        self.error(SyntaxErrorKind::UnexpectedSymbol {
            expected: what.to_string(),
            found: self.current.describe(),
        })
    }

    fn unexpected(&self) -> crate::lua::error::LuaError {
        self.error(SyntaxErrorKind::UnexpectedSymbol {
            expected: String::new(),
            found: self.current.describe(),
        })
    }

    fn span(&self) -> SourceSpan {
        self.current.span.clone()
    }

    /// Check if the current token indicates end of a block
    fn is_block_end(&self) -> bool {
        matches!(
            self.current.token_type,
            TokenType::End | TokenType::Else | TokenType::Elseif | TokenType::Until | TokenType::EOF
        )
    }

    /// Parse a block (sequence of statements with optional return)
    fn parse_block(&mut self) -> LuaResult<Block> {
        let mut statements = Vec::new();
        let mut ret = None;

        while !self.is_block_end() {
            // Return must be the last statement in a block
            if self.check(&TokenType::Return) {
                ret = Some(self.parse_return_statement()?);
                if !self.is_block_end() {
                    return Err(self.expected("end"));
                }
                break;
            }

            if let Some(statement) = self.parse_statement()? {
                statements.push(statement);
            }
        }

        Ok(Block { statements, ret })
    }

    /// Parse a statement; `None` for an empty statement
    fn parse_statement(&mut self) -> LuaResult<Option<Node<Statement>>> {
        let span = self.span();

        let statement = match self.current.token_type {
            TokenType::Semicolon => {
                self.advance()?;
                return Ok(None);
            }
            TokenType::If => self.parse_if_statement()?,
            TokenType::While => {
                self.advance()?;
                let condition = self.parse_expression()?;
                self.consume(&TokenType::Do)?;
                let body = self.parse_block()?;
                self.consume(&TokenType::End)?;
                Statement::WhileLoop { condition, body }
            }
            TokenType::Do => {
                self.advance()?;
                let body = self.parse_block()?;
                self.consume(&TokenType::End)?;
                Statement::DoBlock(body)
            }
            TokenType::For => self.parse_for_statement()?,
            TokenType::Repeat => {
                self.advance()?;
                let body = self.parse_block()?;
                self.consume(&TokenType::Until)?;
                let condition = self.parse_expression()?;
                Statement::RepeatLoop { body, condition }
            }
            TokenType::Function => self.parse_function_definition()?,
            TokenType::Local => {
                self.advance()?;
                if self.accept(&TokenType::Function)? {
                    let name = self.consume_name()?;
                    let body = self.parse_function_body(span.clone(), false)?;
                    Statement::LocalFunction { name, body }
                } else {
                    self.parse_local_assignment()?
                }
            }
            TokenType::DoubleColon => {
                self.advance()?;
                let name = self.consume_name()?;
                self.consume(&TokenType::DoubleColon)?;
                Statement::Label(name)
            }
            TokenType::Break => {
                self.advance()?;
                Statement::Break
            }
            TokenType::Goto => {
                self.advance()?;
                Statement::Goto(self.consume_name()?)
            }
            _ => self.parse_expression_statement()?,
        };

        Ok(Some(Node::new(statement, span)))
    }

    /// Assignment or call statement
    fn parse_expression_statement(&mut self) -> LuaResult<Statement> {
        let first = self.parse_suffixed_expression()?;

        if self.check(&TokenType::Assign) || self.check(&TokenType::Comma) {
            let mut variables = vec![self.into_variable(first)?];
            while self.accept(&TokenType::Comma)? {
                let target = self.parse_suffixed_expression()?;
                variables.push(self.into_variable(target)?);
            }
            self.consume(&TokenType::Assign)?;
            let expressions = self.parse_expression_list()?;
            return Ok(Statement::Assignment(Assignment { variables, expressions }));
        }

        match first.node {
            Expression::FunctionCall(call) => Ok(Statement::FunctionCall(call)),
            _ => Err(self.expected("=")),
        }
    }

    /// Assignment targets must be variables, never calls or parentheses
    fn into_variable(&self, expr: Node<Expression>) -> LuaResult<Node<Variable>> {
        match expr.node {
            Expression::Variable(variable) => Ok(Node::new(variable, expr.span)),
            _ => Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedSymbol {
                    expected: String::new(),
                    found: self.current.describe(),
                },
                &expr.span,
            )
            .into()),
        }
    }

    fn parse_local_assignment(&mut self) -> LuaResult<Statement> {
        let mut names = vec![self.consume_name()?];
        while self.accept(&TokenType::Comma)? {
            names.push(self.consume_name()?);
        }

        let expressions = if self.accept(&TokenType::Assign)? {
            self.parse_expression_list()?
        } else {
            Vec::new()
        };

        Ok(Statement::LocalAssignment(LocalAssignment { names, expressions }))
    }

    fn parse_function_definition(&mut self) -> LuaResult<Statement> {
        let span = self.consume(&TokenType::Function)?.span;
        let name = self.parse_function_name()?;
        let body = self.parse_function_body(span, name.method.is_some())?;
        Ok(Statement::FunctionDefinition(FunctionDefinition { name, body }))
    }

    /// Parse a function name: Name {'.' Name} [':' Name]
    fn parse_function_name(&mut self) -> LuaResult<FunctionName> {
        let base = self.consume_name()?;
        let mut fields = Vec::new();
        while self.accept(&TokenType::Dot)? {
            fields.push(self.consume_name()?);
        }
        let method = if self.accept(&TokenType::Colon)? {
            Some(self.consume_name()?)
        } else {
            None
        };
        Ok(FunctionName { base, fields, method })
    }

    /// Parse `(params) block end`; methods get an implicit `self`
    fn parse_function_body(&mut self, span: SourceSpan, is_method: bool) -> LuaResult<FunctionBody> {
        self.consume(&TokenType::LeftParen)?;

        let mut parameters = Vec::new();
        if is_method {
            parameters.push("self".to_string());
        }
        let mut is_variadic = false;

        if !self.check(&TokenType::RightParen) {
            loop {
                if self.accept(&TokenType::Vararg)? {
                    is_variadic = true;
                    break;
                }
                parameters.push(self.consume_name()?);
                if !self.accept(&TokenType::Comma)? {
                    break;
                }
            }
        }
        self.consume(&TokenType::RightParen)?;

        let body = self.parse_block()?;
        self.consume(&TokenType::End)?;

        Ok(FunctionBody {
            parameters,
            is_variadic,
            body,
            span,
        })
    }

    fn parse_if_statement(&mut self) -> LuaResult<Statement> {
        self.consume(&TokenType::If)?;
        let mut clauses = Vec::new();

        let condition = self.parse_expression()?;
        self.consume(&TokenType::Then)?;
        clauses.push((condition, self.parse_block()?));

        let mut else_clause = None;
        loop {
            if self.accept(&TokenType::Elseif)? {
                let condition = self.parse_expression()?;
                self.consume(&TokenType::Then)?;
                clauses.push((condition, self.parse_block()?));
            } else if self.accept(&TokenType::Else)? {
                else_clause = Some(self.parse_block()?);
                self.consume(&TokenType::End)?;
                break;
            } else {
                self.consume(&TokenType::End)?;
                break;
            }
        }

        Ok(Statement::IfStatement { clauses, else_clause })
    }

    fn parse_for_statement(&mut self) -> LuaResult<Statement> {
        self.consume(&TokenType::For)?;
        let first = self.consume_name()?;

        if self.accept(&TokenType::Assign)? {
            let start = self.parse_expression()?;
            self.consume(&TokenType::Comma)?;
            let limit = self.parse_expression()?;
            let step = if self.accept(&TokenType::Comma)? {
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.consume(&TokenType::Do)?;
            let body = self.parse_block()?;
            self.consume(&TokenType::End)?;
            return Ok(Statement::NumericFor {
                variable: first,
                start,
                limit,
                step,
                body,
            });
        }

        let mut variables = vec![first];
        while self.accept(&TokenType::Comma)? {
            variables.push(self.consume_name()?);
        }
        if !self.check(&TokenType::In) {
            return Err(self.expected("="));
        }
        self.advance()?;
        let iterators = self.parse_expression_list()?;
        self.consume(&TokenType::Do)?;
        let body = self.parse_block()?;
        self.consume(&TokenType::End)?;

        Ok(Statement::GenericFor {
            variables,
            iterators,
            body,
        })
    }

    fn parse_return_statement(&mut self) -> LuaResult<Node<ReturnStatement>> {
        let span = self.consume(&TokenType::Return)?.span;

        let expressions = if self.is_block_end() || self.check(&TokenType::Semicolon) {
            Vec::new()
        } else {
            self.parse_expression_list()?
        };
        self.accept(&TokenType::Semicolon)?;

        Ok(Node::new(ReturnStatement { expressions }, span))
    }

    fn parse_expression_list(&mut self) -> LuaResult<Vec<Node<Expression>>> {
        let mut expressions = vec![self.parse_expression()?];
        while self.accept(&TokenType::Comma)? {
            expressions.push(self.parse_expression()?);
        }
        Ok(expressions)
    }

    /// Parse an expression
    pub fn parse_expression(&mut self) -> LuaResult<Node<Expression>> {
        self.parse_subexpression(0)
    }

    /// Precedence climbing: parse operators binding tighter than `limit`
    fn parse_subexpression(&mut self, limit: u8) -> LuaResult<Node<Expression>> {
        let mut left = match unary_operator(&self.current.token_type) {
            Some(op) => {
                let span = self.advance()?.span;
                let operand = self.parse_subexpression(UNARY_PRIORITY)?;
                Node::new(
                    Expression::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                )
            }
            None => self.parse_simple_expression()?,
        };

        while let Some(op) = binary_operator(&self.current.token_type) {
            let (left_priority, right_priority) = op.priority();
            if left_priority <= limit {
                break;
            }
            let span = self.advance()?.span;
            let right = self.parse_subexpression(right_priority)?;
            left = Node::new(
                Expression::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    fn parse_simple_expression(&mut self) -> LuaResult<Node<Expression>> {
        let span = self.span();
        let expression = match &self.current.token_type {
            TokenType::Number(n) => Expression::Number(*n),
            TokenType::String(s) => Expression::String(s.clone()),
            TokenType::Nil => Expression::Nil,
            TokenType::True => Expression::Boolean(true),
            TokenType::False => Expression::Boolean(false),
            TokenType::Vararg => Expression::Vararg,
            TokenType::LeftBrace => {
                let table = self.parse_table_constructor()?;
                return Ok(Node::new(Expression::TableConstructor(table), span));
            }
            TokenType::Function => {
                self.advance()?;
                let body = self.parse_function_body(span.clone(), false)?;
                return Ok(Node::new(Expression::AnonymousFunction(body), span));
            }
            _ => return self.parse_suffixed_expression(),
        };
        self.advance()?;
        Ok(Node::new(expression, span))
    }

    /// Name or parenthesised expression
    fn parse_primary_expression(&mut self) -> LuaResult<Node<Expression>> {
        let span = self.span();
        match &self.current.token_type {
            TokenType::Identifier(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(Node::new(Expression::Variable(Variable::Name(name)), span))
            }
            TokenType::LeftParen => {
                self.advance()?;
                let inner = self.parse_expression()?;
                self.consume(&TokenType::RightParen)?;
                Ok(Node::new(Expression::Paren(Box::new(inner)), span))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// primaryexp { '.' Name | '[' exp ']' | ':' Name args | args }
    fn parse_suffixed_expression(&mut self) -> LuaResult<Node<Expression>> {
        let mut expr = self.parse_primary_expression()?;

        loop {
            let span = self.span();
            match &self.current.token_type {
                TokenType::Dot => {
                    self.advance()?;
                    let key = self.consume_name()?;
                    expr = Node::new(
                        Expression::Variable(Variable::TableDot {
                            table: Box::new(expr),
                            key,
                        }),
                        span,
                    );
                }
                TokenType::LeftBracket => {
                    self.advance()?;
                    let key = self.parse_expression()?;
                    self.consume(&TokenType::RightBracket)?;
                    expr = Node::new(
                        Expression::Variable(Variable::TableField {
                            table: Box::new(expr),
                            key: Box::new(key),
                        }),
                        span,
                    );
                }
                TokenType::Colon => {
                    self.advance()?;
                    let method = self.consume_name()?;
                    let args = self.parse_call_args()?;
                    expr = Node::new(
                        Expression::FunctionCall(FunctionCall {
                            function: Box::new(expr),
                            method_name: Some(method),
                            args,
                        }),
                        span,
                    );
                }
                TokenType::LeftParen | TokenType::String(_) | TokenType::LeftBrace => {
                    let args = self.parse_call_args()?;
                    expr = Node::new(
                        Expression::FunctionCall(FunctionCall {
                            function: Box::new(expr),
                            method_name: None,
                            args,
                        }),
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parse call arguments: '(' [explist] ')' | table | string
    fn parse_call_args(&mut self) -> LuaResult<CallArgs> {
        match &self.current.token_type {
            TokenType::String(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(CallArgs::String(s))
            }
            TokenType::LeftBrace => Ok(CallArgs::Table(self.parse_table_constructor()?)),
            TokenType::LeftParen => {
                // `(` on a new line could also start a new statement
                if self.current.span.line != self.last_line {
                    return Err(self.error(SyntaxErrorKind::AmbiguousSyntax));
                }
                self.advance()?;
                let args = if self.check(&TokenType::RightParen) {
                    Vec::new()
                } else {
                    self.parse_expression_list()?
                };
                self.consume(&TokenType::RightParen)?;
                Ok(CallArgs::List(args))
            }
            _ => Err(self.expected("(")),
        }
    }

    /// Parse a table constructor
    fn parse_table_constructor(&mut self) -> LuaResult<TableConstructor> {
        self.consume(&TokenType::LeftBrace)?;
        let mut fields = Vec::new();

        while !self.check(&TokenType::RightBrace) {
            let field = match &self.current.token_type {
                TokenType::LeftBracket => {
                    self.advance()?;
                    let key = self.parse_expression()?;
                    self.consume(&TokenType::RightBracket)?;
                    self.consume(&TokenType::Assign)?;
                    let value = self.parse_expression()?;
                    TableField::Expression { key, value }
                }
                TokenType::Identifier(name) => {
                    let name = name.clone();
                    if self.peek()?.token_type == TokenType::Assign {
                        self.advance()?;
                        self.advance()?;
                        let value = self.parse_expression()?;
                        TableField::Record { key: name, value }
                    } else {
                        TableField::Array(self.parse_expression()?)
                    }
                }
                _ => TableField::Array(self.parse_expression()?),
            };
            fields.push(field);

            if !self.accept(&TokenType::Comma)? && !self.accept(&TokenType::Semicolon)? {
                break;
            }
        }

        self.consume(&TokenType::RightBrace)?;
        Ok(TableConstructor { fields })
    }
}

fn unary_operator(token_type: &TokenType) -> Option<UnaryOperator> {
    match token_type {
        TokenType::Minus => Some(UnaryOperator::Minus),
        TokenType::Not => Some(UnaryOperator::Not),
        TokenType::Length => Some(UnaryOperator::Len),
        _ => None,
    }
}

fn binary_operator(token_type: &TokenType) -> Option<BinaryOperator> {
    match token_type {
        TokenType::Plus => Some(BinaryOperator::Add),
        TokenType::Minus => Some(BinaryOperator::Sub),
        TokenType::Multiply => Some(BinaryOperator::Mul),
        TokenType::Divide => Some(BinaryOperator::Div),
        TokenType::Modulo => Some(BinaryOperator::Mod),
        TokenType::Power => Some(BinaryOperator::Pow),
        TokenType::Concat => Some(BinaryOperator::Concat),
        TokenType::Equal => Some(BinaryOperator::EQ),
        TokenType::NotEqual => Some(BinaryOperator::NE),
        TokenType::Less => Some(BinaryOperator::LT),
        TokenType::LessEqual => Some(BinaryOperator::LE),
        TokenType::Greater => Some(BinaryOperator::GT),
        TokenType::GreaterEqual => Some(BinaryOperator::GE),
        TokenType::And => Some(BinaryOperator::And),
        TokenType::Or => Some(BinaryOperator::Or),
        _ => None,
    }
}

/// Parse `source` into a block
pub fn parse(source: &str, chunk_name: &str) -> LuaResult<Block> {
    Parser::new(source, chunk_name)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::error::LuaError;

    fn parse_ok(source: &str) -> Block {
        match parse(source, "test") {
            Ok(block) => block,
            Err(e) => panic!("parse failed for {:?}: {}", source, e),
        }
    }

    fn parse_err(source: &str) -> SyntaxError {
        match parse(source, "test") {
            Err(LuaError::Syntax(e)) => e,
            other => panic!("expected syntax error for {:?}, got {:?}", source, other.map(|_| ())),
        }
    }

    fn return_expr(source: &str) -> Expression {
        let block = parse_ok(source);
        let ret = block.ret.expect("return statement");
        ret.node.expressions.into_iter().next().expect("expression").node
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 => Add(1, Mul(2, 3))
        match return_expr("return 1 + 2 * 3") {
            Expression::BinaryOp { op: BinaryOperator::Add, right, .. } => {
                assert!(matches!(right.node, Expression::BinaryOp { op: BinaryOperator::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_right_associative_operators() {
        // 2 ^ 3 ^ 2 => Pow(2, Pow(3, 2))
        match return_expr("return 2 ^ 3 ^ 2") {
            Expression::BinaryOp { op: BinaryOperator::Pow, left, right } => {
                assert!(matches!(left.node, Expression::Number(n) if n == 2.0));
                assert!(matches!(right.node, Expression::BinaryOp { op: BinaryOperator::Pow, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }

        match return_expr("return 'a' .. 'b' .. 'c'") {
            Expression::BinaryOp { op: BinaryOperator::Concat, right, .. } => {
                assert!(matches!(right.node, Expression::BinaryOp { op: BinaryOperator::Concat, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unary_binds_looser_than_power() {
        // -2 ^ 2 => Minus(Pow(2, 2))
        match return_expr("return -2 ^ 2") {
            Expression::UnaryOp { op: UnaryOperator::Minus, operand } => {
                assert!(matches!(operand.node, Expression::BinaryOp { op: BinaryOperator::Pow, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_call_argument_shapes() {
        let block = parse_ok("f(1, 2) f{1} f'str' obj:method(3)");
        assert_eq!(block.statements.len(), 4);
        let shapes: Vec<_> = block
            .statements
            .iter()
            .map(|s| match &s.node {
                Statement::FunctionCall(call) => match call.args {
                    CallArgs::List(_) => "list",
                    CallArgs::Table(_) => "table",
                    CallArgs::String(_) => "string",
                },
                _ => "other",
            })
            .collect();
        assert_eq!(shapes, vec!["list", "table", "string", "list"]);

        match &block.statements[3].node {
            Statement::FunctionCall(call) => assert_eq!(call.method_name.as_deref(), Some("method")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_call() {
        let err = parse_err("local a = f\n(g)()");
        assert_eq!(err.kind, SyntaxErrorKind::AmbiguousSyntax);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_assignment_targets() {
        let block = parse_ok("a, b.c, d[1] = 1, 2, 3");
        match &block.statements[0].node {
            Statement::Assignment(a) => {
                assert_eq!(a.variables.len(), 3);
                assert!(matches!(a.variables[1].node, Variable::TableDot { .. }));
                assert!(matches!(a.variables[2].node, Variable::TableField { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_err("f() = 1");
        assert!(matches!(err.kind, SyntaxErrorKind::UnexpectedSymbol { .. }));
        let err = parse_err("(a) = 1");
        assert!(matches!(err.kind, SyntaxErrorKind::UnexpectedSymbol { .. }));
    }

    #[test]
    fn test_method_definition_adds_self() {
        let block = parse_ok("function a.b:m(x) end");
        match &block.statements[0].node {
            Statement::FunctionDefinition(def) => {
                assert_eq!(def.name.display(), "a.b:m");
                assert_eq!(def.body.parameters, vec!["self".to_string(), "x".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_table_constructor_fields() {
        match return_expr("return {1, x = 2, [3] = 4; 5,}") {
            Expression::TableConstructor(t) => {
                assert_eq!(t.fields.len(), 4);
                assert!(matches!(t.fields[0], TableField::Array(_)));
                assert!(matches!(t.fields[1], TableField::Record { .. }));
                assert!(matches!(t.fields[2], TableField::Expression { .. }));
                assert!(matches!(t.fields[3], TableField::Array(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_goto_and_labels() {
        let block = parse_ok("goto done ::done::");
        assert!(matches!(block.statements[0].node, Statement::Goto(ref l) if l == "done"));
        assert!(matches!(block.statements[1].node, Statement::Label(ref l) if l == "done"));
    }

    #[test]
    fn test_return_must_end_block() {
        let err = parse_err("return 1 print(2)");
        assert!(matches!(err.kind, SyntaxErrorKind::UnexpectedSymbol { ref expected, .. } if expected == "end"));
    }

    #[test]
    fn test_missing_end() {
        let err = parse_err("while true do x = 1");
        assert_eq!(
            err.kind,
            SyntaxErrorKind::UnexpectedSymbol {
                expected: "end".to_string(),
                found: "<eof>".to_string(),
            }
        );
    }

    #[test]
    fn test_unexpected_symbol() {
        let err = parse_err("x = = 1");
        assert_eq!(
            err.kind,
            SyntaxErrorKind::UnexpectedSymbol {
                expected: String::new(),
                found: "=".to_string(),
            }
        );
    }

    #[test]
    fn test_paren_marks_truncation() {
        assert!(matches!(return_expr("return (f())"), Expression::Paren(_)));
        assert!(Expression::Vararg.is_multi_valued());
    }

    #[test]
    fn test_numeric_and_generic_for() {
        let block = parse_ok("for i = 1, 10, 2 do end for k, v in pairs(t) do end");
        assert!(matches!(block.statements[0].node, Statement::NumericFor { step: Some(_), .. }));
        match &block.statements[1].node {
            Statement::GenericFor { variables, iterators, .. } => {
                assert_eq!(variables.len(), 2);
                assert_eq!(iterators.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
