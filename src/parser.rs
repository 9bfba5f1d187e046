//! Parser for the binding language, a JavaScript expression subset.
//!
//! Expressions cover literals, identifiers, member access (including `?.`),
//! calls, unary/binary/logical/conditional operators, array and object
//! literals, assignment, and arrow or `function` expressions whose block
//! bodies may use `const`/`let`, `if`/`else`, `return` and `throw`.

use crate::error::ParseError;
use crate::lexer::{Token, TokenKind, tokenize};
use crate::stack::ensure_sufficient_stack;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    This,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
    },
    Function(Arc<FunctionExpr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let { name: String, init: Option<Expr> },
    Return(Option<Expr>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    Throw(Expr),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum FunctionBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, PartialEq)]
pub struct FunctionExpr {
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub is_async: bool,
    pub source: String,
}

/// Parses a complete expression; a trailing `;` is tolerated.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(source)?;
    let expr = parser.parse_expression()?;
    parser.eat_punct(";");
    parser.expect_eof()?;
    Ok(expr)
}

/// Deepest syntactic nesting accepted; chained operators and member
/// accesses count one level each.
pub const MAX_NESTING: usize = 256;

pub struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'s> Parser<'s> {
    pub fn new(source: &'s str) -> Result<Self, ParseError> {
        Ok(Parser {
            source,
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        })
    }

    pub fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    pub fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    pub fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    /// End offset of the most recently consumed token.
    pub fn last_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].end
        }
    }

    pub fn source_slice(&self, start: usize, end: usize) -> &'s str {
        &self.source[start..end]
    }

    pub fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn eat_ident(&mut self, name: &str) -> bool {
        if self.peek().is_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, p: &str) -> Result<Token, ParseError> {
        if self.peek().is_punct(p) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("'{}'", p)))
        }
    }

    pub fn expect_eof(&self) -> Result<(), ParseError> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    pub fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Property key in an object literal: identifier, string or number.
    pub fn expect_property_key(&mut self) -> Result<String, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) | TokenKind::Str(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(crate::value::format_number(n))
            }
            _ => Err(self.unexpected("property name")),
        }
    }

    pub fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Number(n) => crate::value::format_number(*n),
            TokenKind::Str(s) => format!("{:?}", s),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Punct(p) => format!("'{}'", p),
        };
        ParseError::new(format!("expected {}, found {}", expected, found), token.start)
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                format!("expression nested deeper than {} levels", MAX_NESTING),
                self.peek().start,
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = ensure_sufficient_stack(|| self.assignment());
        self.depth -= 1;
        expr
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        if let Some(function) = self.try_parse_arrow()? {
            return Ok(function);
        }

        let target = self.parse_conditional()?;
        let op = if self.peek().is_punct("=") {
            AssignOp::Set
        } else if self.peek().is_punct("+=") {
            AssignOp::Add
        } else if self.peek().is_punct("-=") {
            AssignOp::Sub
        } else {
            return Ok(target);
        };

        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(ParseError::new(
                "invalid assignment target",
                self.peek().start,
            ));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        let mut chained = 0;

        loop {
            let Some((precedence, op)) = binary_operator(self.peek()) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.enter()?;
            chained += 1;
            self.advance();
            let rhs = self.parse_binary(precedence + 1)?;
            lhs = match op {
                Operator::Logical(op) => Expr::Logical {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                Operator::Binary(op) => Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        self.depth -= chained;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = if self.peek().is_punct("!") {
            UnaryOp::Not
        } else if self.peek().is_punct("-") {
            UnaryOp::Neg
        } else if self.peek().is_punct("+") {
            UnaryOp::Plus
        } else if self.peek().is_ident("typeof") {
            UnaryOp::TypeOf
        } else {
            return self.parse_postfix();
        };
        self.advance();
        self.enter()?;
        let operand = ensure_sufficient_stack(|| self.parse_unary())?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        let mut chained = 0;

        loop {
            if [".", "?.", "[", "("].iter().any(|p| self.peek().is_punct(p)) {
                self.enter()?;
                chained += 1;
            }
            if self.eat_punct(".") {
                let property = self.expect_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let index = self.parse_expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.expect_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.eat_punct("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                break;
            }
        }
        self.depth -= chained;
        Ok(expr)
    }

    /// Arguments after an already consumed `(`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        while !self.peek().is_punct(")") {
            args.push(self.parse_expression()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined)
                }
                "this" => {
                    self.advance();
                    Ok(Expr::This)
                }
                "function" => self.parse_function_keyword(token.start, false),
                "async" if self.peek_at(1).is_ident("function") => {
                    self.advance();
                    self.parse_function_keyword(token.start, true)
                }
                _ if is_reserved(&name) => Err(self.unexpected("expression")),
                _ => {
                    self.advance();
                    Ok(Expr::Ident(name))
                }
            },
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.peek().is_punct("]") {
                    items.push(self.parse_expression()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct("{") => self.parse_object_literal(),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        self.expect_punct("{")?;
        let mut entries = Vec::new();
        while !self.peek().is_punct("}") {
            entries.push(self.parse_object_entry()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(entries))
    }

    /// One `key: value`, shorthand `key`, or method `key(args) { … }` entry.
    pub fn parse_object_entry(&mut self) -> Result<(String, Expr), ParseError> {
        let start = self.peek().start;
        let is_async = self.peek().is_ident("async")
            && !self.peek_at(1).is_punct(":")
            && !self.peek_at(1).is_punct("(")
            && !self.peek_at(1).is_punct(",")
            && !self.peek_at(1).is_punct("}");
        if is_async {
            self.advance();
        }

        let key = self.expect_property_key()?;

        if self.peek().is_punct("(") {
            let function = self.parse_function_rest(start, is_async)?;
            return Ok((key, function));
        }
        if is_async {
            return Err(self.unexpected("'('"));
        }
        if self.eat_punct(":") {
            let value = self.parse_expression()?;
            return Ok((key, value));
        }
        Ok((key.clone(), Expr::Ident(key)))
    }

    fn parse_function_keyword(&mut self, start: usize, is_async: bool) -> Result<Expr, ParseError> {
        self.advance(); // `function`
        if matches!(self.peek().kind, TokenKind::Ident(_)) {
            self.advance();
        }
        self.parse_function_rest(start, is_async)
    }

    /// Parameter list and block body; `start` is where the function's source begins.
    fn parse_function_rest(&mut self, start: usize, is_async: bool) -> Result<Expr, ParseError> {
        self.expect_punct("(")?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(self.finish_function(start, params, FunctionBody::Block(body), is_async))
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        while !self.peek().is_punct(")") {
            params.push(self.expect_name()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn try_parse_arrow(&mut self) -> Result<Option<Expr>, ParseError> {
        let start = self.peek().start;
        let mut offset = 0;
        let is_async = self.peek().is_ident("async")
            && (self.peek_at(1).is_punct("(") || matches!(self.peek_at(1).kind, TokenKind::Ident(_)));
        if is_async {
            offset = 1;
        }

        let first = self.peek_at(offset).clone();
        let single_param = matches!(&first.kind, TokenKind::Ident(name) if !is_reserved(name))
            && self.peek_at(offset + 1).is_punct("=>");
        let paren_params = first.is_punct("(") && self.arrow_follows_parens(offset);

        if !single_param && !paren_params {
            return Ok(None);
        }
        if is_async {
            self.advance();
        }

        let params = if single_param {
            vec![self.expect_name()?]
        } else {
            self.expect_punct("(")?;
            self.parse_params()?
        };
        self.expect_punct("=>")?;

        let body = if self.peek().is_punct("{") {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };
        Ok(Some(self.finish_function(start, params, body, is_async)))
    }

    /// Looks past the parenthesised group at `offset` for `=>`.
    fn arrow_follows_parens(&self, offset: usize) -> bool {
        let mut depth = 0usize;
        let mut i = offset;
        loop {
            let token = self.peek_at(i);
            match &token.kind {
                TokenKind::Eof => return false,
                TokenKind::Punct("(") => depth += 1,
                TokenKind::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_at(i + 1).is_punct("=>");
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn finish_function(
        &self,
        start: usize,
        params: Vec<String>,
        body: FunctionBody,
        is_async: bool,
    ) -> Expr {
        Expr::Function(Arc::new(FunctionExpr {
            params,
            body,
            is_async,
            source: self.source[start..self.last_end()].to_string(),
        }))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_punct("{")?;
        let mut statements = Vec::new();
        while !self.peek().is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat_punct(";") {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        self.expect_punct("}")?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        self.enter()?;
        let stmt = ensure_sufficient_stack(|| self.statement());
        self.depth -= 1;
        stmt
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        let stmt = if token.is_ident("const") || token.is_ident("let") || token.is_ident("var") {
            self.advance();
            let name = self.expect_name()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_expression()?)
            } else {
                None
            };
            Stmt::Let { name, init }
        } else if token.is_ident("return") {
            self.advance();
            if self.peek().is_punct(";") || self.peek().is_punct("}") {
                Stmt::Return(None)
            } else {
                Stmt::Return(Some(self.parse_expression()?))
            }
        } else if token.is_ident("if") {
            self.advance();
            self.expect_punct("(")?;
            let test = self.parse_expression()?;
            self.expect_punct(")")?;
            let consequent = Box::new(self.parse_statement()?);
            let alternate = if self.eat_ident("else") {
                Some(Box::new(self.parse_statement()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                test,
                consequent,
                alternate,
            });
        } else if token.is_ident("throw") {
            self.advance();
            Stmt::Throw(self.parse_expression()?)
        } else if token.is_punct("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        } else {
            Stmt::Expr(self.parse_expression()?)
        };
        self.eat_punct(";");
        Ok(stmt)
    }
}

enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_operator(token: &Token) -> Option<(u8, Operator)> {
    let TokenKind::Punct(p) = &token.kind else {
        return None;
    };
    let entry = match *p {
        "??" => (1, Operator::Logical(LogicalOp::Nullish)),
        "||" => (2, Operator::Logical(LogicalOp::Or)),
        "&&" => (3, Operator::Logical(LogicalOp::And)),
        "==" => (4, Operator::Binary(BinaryOp::Eq)),
        "!=" => (4, Operator::Binary(BinaryOp::NotEq)),
        "===" => (4, Operator::Binary(BinaryOp::StrictEq)),
        "!==" => (4, Operator::Binary(BinaryOp::StrictNotEq)),
        "<" => (5, Operator::Binary(BinaryOp::Lt)),
        "<=" => (5, Operator::Binary(BinaryOp::LtEq)),
        ">" => (5, Operator::Binary(BinaryOp::Gt)),
        ">=" => (5, Operator::Binary(BinaryOp::GtEq)),
        "+" => (6, Operator::Binary(BinaryOp::Add)),
        "-" => (6, Operator::Binary(BinaryOp::Sub)),
        "*" => (7, Operator::Binary(BinaryOp::Mul)),
        "/" => (7, Operator::Binary(BinaryOp::Div)),
        "%" => (7, Operator::Binary(BinaryOp::Rem)),
        _ => return None,
    };
    Some(entry)
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "const"
            | "let"
            | "var"
            | "return"
            | "if"
            | "else"
            | "throw"
            | "function"
            | "typeof"
            | "export"
            | "default"
            | "new"
    )
}
