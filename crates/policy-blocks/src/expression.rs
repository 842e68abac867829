//! Evaluador de expresiones aritméticas para `customLogicBlock` y
//! `switchBlock`.
//!
//! Contexto restringido: sólo números, variables de una lista blanca
//! (campos numéricos del documento), operadores aritméticos y de
//! comparación, y las funciones `min`, `max`, `abs`, `round`, `floor`,
//! `ceil`. Nada de llamadas arbitrarias ni acceso a IO.
//!
//! Gramática (precedencia creciente):
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := sum (("<" | "<=" | ">" | ">=" | "==" | "!=") sum)?
//! sum     := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := ("-" | "!") unary | primary
//! primary := number | ident | ident "(" args ")" | "(" expr ")"
//! ```
//! Comparaciones y operadores lógicos producen `1.0` / `0.0`.
use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use thiserror::Error;

/// Longitud máxima del fuente.
pub const MAX_EXPRESSION_LEN: usize = 1_024;
/// Máximo de tokens consumidos por el parser.
pub const MAX_TOKENS: usize = 256;
/// Profundidad máxima de anidamiento.
pub const MAX_DEPTH: usize = 32;

const FUNCTIONS: &[&str] = &["min", "max", "abs", "round", "floor", "ceil"];

pub type Variables = BTreeMap<String, f64>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,
    #[error("expression exceeds {0} characters")]
    TooLong(usize),
    #[error("expression is too complex")]
    TooComplex,
    #[error("unexpected '{found}' at position {pos}")]
    Unexpected { found: String, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} argument(s)")]
    Arity { name: String, expected: &'static str },
    #[error("variable '{0}' is not available")]
    UnknownVariable(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

fn truth(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    pub fn eval(&self, vars: &Variables) -> Result<f64, ExprError> {
        let value = self.eval_inner(vars)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExprError::NonFinite)
        }
    }

    fn eval_inner(&self, vars: &Variables) -> Result<f64, ExprError> {
        Ok(match self {
               Expr::Number(n) => *n,
               Expr::Var(name) => *vars.get(name).ok_or_else(|| ExprError::UnknownVariable(name.clone()))?,
               Expr::Neg(e) => -e.eval_inner(vars)?,
               Expr::Not(e) => truth(e.eval_inner(vars)? == 0.0),
               Expr::Binary(op, l, r) => {
                   let a = l.eval_inner(vars)?;
                   // cortocircuito
                   match op {
                       BinaryOp::And if a == 0.0 => return Ok(0.0),
                       BinaryOp::Or if a != 0.0 => return Ok(1.0),
                       _ => {}
                   }
                   let b = r.eval_inner(vars)?;
                   match op {
                       BinaryOp::Add => a + b,
                       BinaryOp::Sub => a - b,
                       BinaryOp::Mul => a * b,
                       BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(ExprError::DivisionByZero),
                       BinaryOp::Div => a / b,
                       BinaryOp::Rem => a % b,
                       BinaryOp::Lt => truth(a < b),
                       BinaryOp::Le => truth(a <= b),
                       BinaryOp::Gt => truth(a > b),
                       BinaryOp::Ge => truth(a >= b),
                       BinaryOp::Eq => truth(a == b),
                       BinaryOp::Ne => truth(a != b),
                       BinaryOp::And | BinaryOp::Or => truth(b != 0.0),
                   }
               }
               Expr::Call(name, args) => {
                   let values = args.iter().map(|a| a.eval_inner(vars)).collect::<Result<Vec<_>, _>>()?;
                   match (name.as_str(), values.as_slice()) {
                       ("abs", [x]) => x.abs(),
                       ("round", [x]) => x.round(),
                       ("floor", [x]) => x.floor(),
                       ("ceil", [x]) => x.ceil(),
                       ("min", [first, rest @ ..]) => rest.iter().fold(*first, |m, v| m.min(*v)),
                       ("max", [first, rest @ ..]) => rest.iter().fold(*first, |m, v| m.max(*v)),
                       _ => return Err(ExprError::UnknownFunction(name.clone())),
                   }
               }
           })
    }

    /// Variables referenciadas, para validar contra la lista blanca.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(name) => {
                out.insert(name.as_str());
            }
            Expr::Neg(e) | Expr::Not(e) => e.collect_vars(out),
            Expr::Binary(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_vars(out)),
        }
    }
}

/// Variables disponibles para un documento: sus campos de primer nivel
/// numéricos o booleanos (`true` = 1).
pub fn variables_from(payload: &Value) -> Variables {
    let Some(obj) = payload.as_object() else { return Variables::new() };
    obj.iter()
       .filter_map(|(k, v)| match v {
           Value::Number(n) => n.as_f64().map(|f| (k.clone(), f)),
           Value::Bool(b) => Some((k.clone(), truth(*b))),
           _ => None,
       })
       .collect()
}

pub fn parse(source: &str) -> Result<Expr, ExprError> {
    if source.len() > MAX_EXPRESSION_LEN {
        return Err(ExprError::TooLong(MAX_EXPRESSION_LEN));
    }
    let mut parser = Parser { input: source.as_bytes(),
                              cursor: 0,
                              tokens: 0,
                              depth: 0 };
    parser.skip_ws();
    if parser.peek().is_none() {
        return Err(ExprError::Empty);
    }
    let expr = parser.parse_or()?;
    parser.skip_ws();
    match parser.peek() {
        None => Ok(expr),
        Some(_) => Err(parser.unexpected()),
    }
}

/// Atajo: parsear y evaluar.
pub fn evaluate(source: &str, vars: &Variables) -> Result<f64, ExprError> {
    parse(source)?.eval(vars)
}

struct Parser<'a> {
    input: &'a [u8],
    cursor: usize,
    tokens: usize,
    depth: usize,
}

impl Parser<'_> {
    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut left = self.parse_and()?;
        while self.eat("||")? {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        self.depth -= 1;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_cmp()?;
        while self.eat("&&")? {
            let right = self.parse_cmp()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_sum()?;
        // los de dos caracteres primero
        const OPS: [(&str, BinaryOp); 6] = [("<=", BinaryOp::Le),
                                             (">=", BinaryOp::Ge),
                                             ("==", BinaryOp::Eq),
                                             ("!=", BinaryOp::Ne),
                                             ("<", BinaryOp::Lt),
                                             (">", BinaryOp::Gt)];
        for (sym, op) in OPS {
            if self.eat(sym)? {
                let right = self.parse_sum()?;
                return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
            }
        }
        Ok(left)
    }

    fn parse_sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat("+")? {
                BinaryOp::Add
            } else if self.eat("-")? {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat("*")? {
                BinaryOp::Mul
            } else if self.eat("/")? {
                BinaryOp::Div
            } else if self.eat("%")? {
                BinaryOp::Rem
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = if self.eat("-")? {
            Expr::Neg(Box::new(self.parse_unary()?))
        } else if self.peek() == Some(b'!') && self.input.get(self.cursor + 1) != Some(&b'=') {
            self.eat("!")?;
            Expr::Not(Box::new(self.parse_unary()?))
        } else {
            self.parse_primary()?
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        self.skip_ws();
        let Some(byte) = self.peek() else { return Err(ExprError::UnexpectedEnd) };
        if byte == b'(' {
            self.eat("(")?;
            let inner = self.parse_or()?;
            self.expect(")")?;
            return Ok(inner);
        }
        if byte.is_ascii_digit() || byte == b'.' {
            return self.parse_number();
        }
        if byte.is_ascii_alphabetic() || byte == b'_' {
            let name = self.parse_ident()?;
            if !self.eat("(")? {
                return Ok(Expr::Var(name));
            }
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(ExprError::UnknownFunction(name));
            }
            let mut args = Vec::new();
            if !self.eat(")")? {
                loop {
                    args.push(self.parse_or()?);
                    if self.eat(")")? {
                        break;
                    }
                    self.expect(",")?;
                }
            }
            let arity_ok = match name.as_str() {
                "min" | "max" => !args.is_empty(),
                _ => args.len() == 1,
            };
            if !arity_ok {
                let expected = if matches!(name.as_str(), "min" | "max") { "at least 1" } else { "exactly 1" };
                return Err(ExprError::Arity { name, expected });
            }
            return Ok(Expr::Call(name, args));
        }
        Err(self.unexpected())
    }

    fn parse_number(&mut self) -> Result<Expr, ExprError> {
        let start = self.cursor;
        while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'.') {
            self.cursor += 1;
        }
        self.count_token()?;
        let text = std::str::from_utf8(&self.input[start..self.cursor]).map_err(|_| self.unexpected())?;
        text.parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| ExprError::Unexpected { found: text.to_string(),
                                                 pos: start })
    }

    fn parse_ident(&mut self) -> Result<String, ExprError> {
        let start = self.cursor;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.cursor += 1;
        }
        self.count_token()?;
        Ok(String::from_utf8_lossy(&self.input[start..self.cursor]).into_owned())
    }

    /// Consume `sym` si es lo siguiente (saltando espacios).
    fn eat(&mut self, sym: &str) -> Result<bool, ExprError> {
        self.skip_ws();
        if self.input[self.cursor..].starts_with(sym.as_bytes()) {
            self.cursor += sym.len();
            self.count_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, sym: &str) -> Result<(), ExprError> {
        if self.eat(sym)? {
            Ok(())
        } else if self.peek().is_none() {
            Err(ExprError::UnexpectedEnd)
        } else {
            Err(self.unexpected())
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooComplex);
        }
        Ok(())
    }

    fn count_token(&mut self) -> Result<(), ExprError> {
        self.tokens += 1;
        if self.tokens > MAX_TOKENS {
            return Err(ExprError::TooComplex);
        }
        Ok(())
    }

    fn unexpected(&self) -> ExprError {
        match self.peek() {
            None => ExprError::UnexpectedEnd,
            Some(b) => ExprError::Unexpected { found: (b as char).to_string(),
                                               pos: self.cursor },
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.cursor += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.cursor).copied()
    }
}
