//! Boolean guard expressions over controller inputs.
//!
//! ```text
//! or      := and ( ("||" | "or") and )*
//! and     := compare ( ("&&" | "and") compare )*
//! compare := sum ( ("<" | "<=" | ">" | ">=" | "==" | "!=") sum )?
//! sum     := product ( ("+" | "-") product )*
//! product := unary ( ("*" | "/") unary )*
//! unary   := ("!" | "not" | "-") unary | primary
//! primary := number | "true" | "false" | input-name | "(" or ")"
//! ```
//!
//! An empty expression is always true. An expression that fails to compile
//! is always false.

use kiln_core::{KilnError, Result};

use crate::input::{InputDecl, InputValue, find_input};

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token<'a> {
    Number(f32),
    Ident(&'a str),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Plus,
    Minus,
    Star,
    Slash,
}

fn tokenize(source: &str) -> std::result::Result<Vec<Token<'_>>, String> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();
        let (token, len) = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'(' => (Token::LParen, 1),
            b')' => (Token::RParen, 1),
            b'+' => (Token::Plus, 1),
            b'-' => (Token::Minus, 1),
            b'*' => (Token::Star, 1),
            b'/' => (Token::Slash, 1),
            b'&' if next == Some(b'&') => (Token::And, 2),
            b'|' if next == Some(b'|') => (Token::Or, 2),
            b'<' if next == Some(b'=') => (Token::Le, 2),
            b'<' => (Token::Lt, 1),
            b'>' if next == Some(b'=') => (Token::Ge, 2),
            b'>' => (Token::Gt, 1),
            b'=' if next == Some(b'=') => (Token::Eq, 2),
            b'!' if next == Some(b'=') => (Token::Ne, 2),
            b'!' => (Token::Not, 1),
            b'0'..=b'9' | b'.' => {
                let len = bytes[i..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit() || **b == b'.')
                    .count();
                let text = &source[i..i + len];
                let value = text
                    .parse::<f32>()
                    .map_err(|_| format!("invalid number `{text}`"))?;
                (Token::Number(value), len)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let len = bytes[i..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
                let word = &source[i..i + len];
                let token = match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                };
                (token, len)
            }
            _ => return Err(format!("unexpected character `{}` at {i}", char::from(c))),
        };
        tokens.push(token);
        i += len;
    }
    Ok(tokens)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Value {
    Number(f32),
    Bool(bool),
}

impl Value {
    fn number(self) -> f32 {
        match self {
            Value::Number(v) => v,
            Value::Bool(b) => f32::from(u8::from(b)),
        }
    }

    fn truthy(self) -> bool {
        match self {
            Value::Number(v) => v != 0.0,
            Value::Bool(b) => b,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinaryOp {
    And,
    Or,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Const(Value),
    Input(usize),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, inputs: &[InputValue]) -> Value {
        match self {
            Expr::Const(v) => *v,
            Expr::Input(idx) => match inputs.get(*idx) {
                Some(InputValue::Bool(b)) => Value::Bool(*b),
                Some(v) => Value::Number(v.as_f32()),
                None => Value::Number(0.0),
            },
            Expr::Not(e) => Value::Bool(!e.eval(inputs).truthy()),
            Expr::Neg(e) => Value::Number(-e.eval(inputs).number()),
            Expr::Binary(op, lhs, rhs) => {
                // Short-circuit before evaluating the right-hand side.
                match op {
                    BinaryOp::And => return Value::Bool(lhs.eval(inputs).truthy() && rhs.eval(inputs).truthy()),
                    BinaryOp::Or => return Value::Bool(lhs.eval(inputs).truthy() || rhs.eval(inputs).truthy()),
                    _ => {}
                }
                let a = lhs.eval(inputs);
                let b = rhs.eval(inputs);
                match op {
                    BinaryOp::Lt => Value::Bool(a.number() < b.number()),
                    BinaryOp::Le => Value::Bool(a.number() <= b.number()),
                    BinaryOp::Gt => Value::Bool(a.number() > b.number()),
                    BinaryOp::Ge => Value::Bool(a.number() >= b.number()),
                    BinaryOp::Eq => Value::Bool(a.number() == b.number()),
                    BinaryOp::Ne => Value::Bool(a.number() != b.number()),
                    BinaryOp::Add => Value::Number(a.number() + b.number()),
                    BinaryOp::Sub => Value::Number(a.number() - b.number()),
                    BinaryOp::Mul => Value::Number(a.number() * b.number()),
                    BinaryOp::Div => Value::Number(a.number() / b.number()),
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                }
            }
        }
    }
}

/// Deepest nesting of parentheses and unary operators the parser accepts.
const MAX_NESTING: usize = 64;

struct Parser<'a, 'i> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    depth: usize,
    inputs: &'i [InputDecl],
}

type ParseResult<T> = std::result::Result<T, String>;

impl<'a> Parser<'a, '_> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> ParseResult<Expr>,
        op_of: fn(Token<'_>) -> Option<BinaryOp>,
    ) -> ParseResult<Expr> {
        let mut lhs = next(self)?;
        while let Some(op) = self.peek().and_then(op_of) {
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::and, |t| (t == Token::Or).then_some(BinaryOp::Or))
    }

    fn and(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::compare, |t| (t == Token::And).then_some(BinaryOp::And))
    }

    fn compare(&mut self) -> ParseResult<Expr> {
        let lhs = self.sum()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::product, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn product(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::unary, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            _ => None,
        })
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err("expression nested too deeply".to_owned());
        }
        self.depth += 1;
        let expr = self.unary_inner();
        self.depth -= 1;
        expr
    }

    fn unary_inner(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        match self.advance() {
            Some(Token::Number(v)) => Ok(Expr::Const(Value::Number(v))),
            Some(Token::Ident("true")) => Ok(Expr::Const(Value::Bool(true))),
            Some(Token::Ident("false")) => Ok(Expr::Const(Value::Bool(false))),
            Some(Token::Ident(name)) => find_input(self.inputs, name)
                .map(Expr::Input)
                .ok_or_else(|| format!("unknown input `{name}`")),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected `)`".to_owned()),
                }
            }
            Some(t) => Err(format!("unexpected token {t:?}")),
            None => Err("unexpected end of expression".to_owned()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
enum Compiled {
    #[default]
    Always,
    Expr(Expr),
    Invalid,
}

/// A compiled guard expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Condition {
    compiled: Compiled,
}

impl Condition {
    /// A condition that always holds.
    #[must_use]
    pub fn always() -> Self {
        Self::default()
    }

    pub fn compile(source: &str, inputs: &[InputDecl]) -> Result<Self> {
        let error = |message: String| KilnError::ConditionCompile {
            expression: source.to_owned(),
            message,
        };
        let tokens = tokenize(source).map_err(error)?;
        if tokens.is_empty() {
            return Ok(Self::always());
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            inputs,
        };
        let expr = parser.or().map_err(error)?;
        if let Some(t) = parser.peek() {
            return Err(error(format!("trailing token {t:?}")));
        }
        Ok(Self {
            compiled: Compiled::Expr(expr),
        })
    }

    /// Compiles `source`, logging failures. A failed condition never holds.
    #[must_use]
    pub fn compile_or_log(source: &str, inputs: &[InputDecl]) -> Self {
        Self::compile(source, inputs).unwrap_or_else(|err| {
            log::error!("{err}");
            Self {
                compiled: Compiled::Invalid,
            }
        })
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.compiled != Compiled::Invalid
    }

    #[must_use]
    pub fn eval(&self, inputs: &[InputValue]) -> bool {
        match &self.compiled {
            Compiled::Always => true,
            Compiled::Expr(expr) => expr.eval(inputs).truthy(),
            Compiled::Invalid => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputType;

    fn decls() -> Vec<InputDecl> {
        vec![
            InputDecl::new("speed", InputType::Float),
            InputDecl::new("grounded", InputType::Bool),
            InputDecl::new("weapon", InputType::I32),
        ]
    }

    fn eval(source: &str, values: &[InputValue]) -> bool {
        Condition::compile(source, &decls()).unwrap().eval(values)
    }

    #[test]
    fn empty_is_true() {
        assert!(eval("", &[]));
        assert!(eval("   ", &[]));
    }

    #[test]
    fn comparisons_and_logic() {
        let values = [InputValue::Float(2.5), InputValue::Bool(true), InputValue::I32(3)];
        assert!(eval("speed > 2 && grounded", &values));
        assert!(!eval("speed > 2 && !grounded", &values));
        assert!(eval("speed < 1 or weapon == 3", &values));
        assert!(eval("(speed * 2 - 1) >= 4", &values));
        assert!(eval("not (weapon != 3)", &values));
        assert!(eval("-speed < 0", &values));
    }

    #[test]
    fn precedence_binds_and_tighter_than_or() {
        let values = [InputValue::Float(0.0), InputValue::Bool(false), InputValue::I32(0)];
        assert!(eval("true || false && false", &values));
        assert!(!eval("(true || false) && false", &values));
    }

    #[test]
    fn compile_errors() {
        assert!(Condition::compile("speed >", &decls()).is_err());
        assert!(Condition::compile("missing > 1", &decls()).is_err());
        assert!(Condition::compile("(speed > 1", &decls()).is_err());
        assert!(Condition::compile("speed $ 1", &decls()).is_err());

        let invalid = Condition::compile_or_log("speed >", &decls());
        assert!(!invalid.is_valid());
        assert!(!invalid.eval(&[InputValue::Float(5.0)]));
    }

    #[test]
    fn deep_nesting_is_a_compile_error() {
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(
            Condition::compile(&parens, &decls()),
            Err(KilnError::ConditionCompile { .. })
        ));
        assert!(Condition::compile(&"!".repeat(10_000), &decls()).is_err());
        assert!(!Condition::compile_or_log(&parens, &decls()).is_valid());

        let nested = format!("{}speed > 1{}", "(".repeat(32), ")".repeat(32));
        assert!(eval(&nested, &[InputValue::Float(2.0)]));
    }
}
