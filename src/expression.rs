//! Closed expression grammar for user-supplied model laws
//!
//! Textual laws such as `0.8*D**1.08` or `exp(-0.1*(T-273.15))` are parsed
//! into an [`Expr`] tree and evaluated by a small interpreter. Nothing is
//! ever executed beyond this grammar:
//!
//! ```text
//! expr    := sum (('>' | '<' | '>=' | '<=') sum)?
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary (('**' | '^') unary)?
//! primary := number ['j'] | variable | function '(' expr ')' | '(' expr ')'
//! ```
//!
//! Variables are `D` (diameter, mm), `T` (temperature, K) and `F`
//! (frequency, GHz). Evaluation is carried out on complex numbers so that
//! refractive-index laws can be written in the same grammar.

use std::fmt;

use num_complex::Complex64;

use crate::model::ModelInput;
use crate::RadsimError;

/// Model variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Var {
    /// Particle diameter [mm]
    D,
    /// Temperature [K]
    T,
    /// Radar frequency [GHz]
    F,
}

impl Var {
    fn symbol(self) -> &'static str {
        match self {
            Var::D => "D",
            Var::T => "T",
            Var::F => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Cos,
    Sin,
    Tan,
    Exp,
    Log,
    Log10,
    Abs,
    Sqrt,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "cos" => Func::Cos,
            "sin" => Func::Sin,
            "tan" => Func::Tan,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            _ => return None,
        };
        Some(func)
    }

    fn name(self) -> &'static str {
        match self {
            Func::Cos => "cos",
            Func::Sin => "sin",
            Func::Tan => "tan",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Log10 => "log10",
            Func::Abs => "abs",
            Func::Sqrt => "sqrt",
        }
    }

    fn apply(self, z: Complex64) -> Complex64 {
        let real = z.im == 0.0;
        match self {
            Func::Cos if real => Complex64::new(z.re.cos(), 0.0),
            Func::Cos => z.cos(),
            Func::Sin if real => Complex64::new(z.re.sin(), 0.0),
            Func::Sin => z.sin(),
            Func::Tan if real => Complex64::new(z.re.tan(), 0.0),
            Func::Tan => z.tan(),
            Func::Exp if real => Complex64::new(z.re.exp(), 0.0),
            Func::Exp => z.exp(),
            Func::Log if real && z.re > 0.0 => Complex64::new(z.re.ln(), 0.0),
            Func::Log => z.ln(),
            Func::Log10 if real && z.re > 0.0 => Complex64::new(z.re.log10(), 0.0),
            Func::Log10 => z.ln() / std::f64::consts::LN_10,
            Func::Abs => Complex64::new(z.norm(), 0.0),
            Func::Sqrt if real && z.re >= 0.0 => Complex64::new(z.re.sqrt(), 0.0),
            Func::Sqrt => z.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Gt,
    Lt,
    Ge,
    Le,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "**",
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Ge => ">=",
            BinOp::Le => "<=",
        }
    }

    fn apply(self, a: Complex64, b: Complex64) -> Complex64 {
        let flag = |cond: bool| Complex64::new(if cond { 1.0 } else { 0.0 }, 0.0);
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Pow => power(a, b),
            BinOp::Gt => flag(a.re > b.re),
            BinOp::Lt => flag(a.re < b.re),
            BinOp::Ge => flag(a.re >= b.re),
            BinOp::Le => flag(a.re <= b.re),
        }
    }
}

fn power(base: Complex64, exponent: Complex64) -> Complex64 {
    if base.im == 0.0 && exponent.im == 0.0 {
        if base.re >= 0.0 || exponent.re.fract() == 0.0 {
            return Complex64::new(base.re.powf(exponent.re), 0.0);
        }
    }
    if base == Complex64::new(0.0, 0.0) {
        return base;
    }
    base.powc(exponent)
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Complex64),
    Var(Var),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    /// Parse a textual law
    pub fn parse(source: &str) -> Result<Expr, RadsimError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.comparison()?;
        match parser.peek() {
            None => Ok(expr),
            Some((pos, token)) => Err(RadsimError::Expression(format!(
                "unexpected '{token}' at position {pos} in '{source}'"
            ))),
        }
    }

    pub fn eval(&self, input: &ModelInput) -> Complex64 {
        match self {
            Expr::Number(value) => *value,
            Expr::Var(Var::D) => Complex64::new(input.diameter, 0.0),
            Expr::Var(Var::T) => Complex64::new(input.temperature, 0.0),
            Expr::Var(Var::F) => Complex64::new(input.frequency, 0.0),
            Expr::Neg(inner) => -inner.eval(input),
            Expr::Binary(op, lhs, rhs) => op.apply(lhs.eval(input), rhs.eval(input)),
            Expr::Call(func, arg) => func.apply(arg.eval(input)),
        }
    }

    /// Variables referenced anywhere in the tree
    pub fn variables(&self) -> Vec<Var> {
        let mut vars = Vec::new();
        self.collect_vars(&mut vars);
        vars.sort();
        vars.dedup();
        vars
    }

    fn collect_vars(&self, out: &mut Vec<Var>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(var) => out.push(*var),
            Expr::Neg(inner) | Expr::Call(_, inner) => inner.collect_vars(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
        }
    }

    /// Fails unless every referenced variable is in `allowed`
    pub fn check_variables(&self, allowed: &[Var]) -> Result<(), RadsimError> {
        for var in self.variables() {
            if !allowed.contains(&var) {
                let names: Vec<&str> = allowed.iter().map(|v| v.symbol()).collect();
                return Err(RadsimError::Expression(format!(
                    "variable '{}' is not allowed here (expected one of {})",
                    var.symbol(),
                    names.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn fmt_number(value: Complex64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.im == 0.0 {
        write!(f, "{:?}", value.re)
    } else if value.re == 0.0 {
        write!(f, "{:?}j", value.im)
    } else {
        write!(f, "({:?}+{:?}j)", value.re, value.im)
    }
}

/// Canonical rendering: fully parenthesised, numbers in shortest
/// round-trip form. Two sources that differ only in spacing or redundant
/// parentheses render identically.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(value) => fmt_number(*value, f),
            Expr::Var(var) => f.write_str(var.symbol()),
            Expr::Neg(inner) => write!(f, "(-{inner})"),
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Call(func, arg) => write!(f, "{}({arg})", func.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Imaginary(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(v) => write!(f, "{v}"),
            Token::Imaginary(v) => write!(f, "{v}j"),
            Token::Ident(name) => f.write_str(name),
            Token::Op(op) => f.write_str(op),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, RadsimError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value: f64 = text.parse().map_err(|_| {
                RadsimError::Expression(format!("invalid number '{text}' at position {start}"))
            })?;
            if i < chars.len() && (chars[i] == 'j' || chars[i] == 'J') {
                i += 1;
                tokens.push((start, Token::Imaginary(value)));
            } else {
                tokens.push((start, Token::Number(value)));
            }
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let name = text.strip_prefix("np.").unwrap_or(&text).to_string();
            tokens.push((start, Token::Ident(name)));
            continue;
        }

        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let op = match two.as_str() {
            "**" => Some("**"),
            ">=" => Some(">="),
            "<=" => Some("<="),
            _ => None,
        };
        if let Some(op) = op {
            tokens.push((start, Token::Op(op)));
            i += 2;
            continue;
        }

        let token = match c {
            '+' => Token::Op("+"),
            '-' => Token::Op("-"),
            '*' => Token::Op("*"),
            '/' => Token::Op("/"),
            '^' => Token::Op("**"),
            '>' => Token::Op(">"),
            '<' => Token::Op("<"),
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => {
                return Err(RadsimError::Expression(format!(
                    "unexpected character '{other}' at position {start} in '{source}'"
                )))
            }
        };
        tokens.push((start, token));
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(p, t)| (*p, t))
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some((_, Token::Op(op))) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn comparison(&mut self) -> Result<Expr, RadsimError> {
        let lhs = self.sum()?;
        let op = match self.peek_op() {
            Some(">") => BinOp::Gt,
            Some("<") => BinOp::Lt,
            Some(">=") => BinOp::Ge,
            Some("<=") => BinOp::Le,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Expr, RadsimError> {
        let mut lhs = self.product()?;
        loop {
            let op = match self.peek_op() {
                Some("+") => BinOp::Add,
                Some("-") => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Expr, RadsimError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_op() {
                Some("*") => BinOp::Mul,
                Some("/") => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, RadsimError> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, RadsimError> {
        let base = self.primary()?;
        if self.peek_op() == Some("**") {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, RadsimError> {
        let Some((pos, token)) = self.next() else {
            return Err(RadsimError::Expression(
                "unexpected end of expression".to_string(),
            ));
        };

        match token {
            Token::Number(value) => Ok(Expr::Number(Complex64::new(value, 0.0))),
            Token::Imaginary(value) => Ok(Expr::Number(Complex64::new(0.0, value))),
            Token::LParen => {
                let inner = self.comparison()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "D" => Ok(Expr::Var(Var::D)),
                "T" => Ok(Expr::Var(Var::T)),
                "F" => Ok(Expr::Var(Var::F)),
                "pi" => Ok(Expr::Number(Complex64::new(std::f64::consts::PI, 0.0))),
                _ => {
                    let func = Func::from_name(&name).ok_or_else(|| {
                        RadsimError::Expression(format!(
                            "unknown identifier '{name}' at position {pos}"
                        ))
                    })?;
                    match self.next() {
                        Some((_, Token::LParen)) => {}
                        _ => {
                            return Err(RadsimError::Expression(format!(
                                "expected '(' after '{name}' at position {pos}"
                            )))
                        }
                    }
                    let arg = self.comparison()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(func, Box::new(arg)))
                }
            },
            other => Err(RadsimError::Expression(format!(
                "unexpected '{other}' at position {pos}"
            ))),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), RadsimError> {
        match self.next() {
            Some((_, Token::RParen)) => Ok(()),
            Some((pos, token)) => Err(RadsimError::Expression(format!(
                "expected ')' but found '{token}' at position {pos}"
            ))),
            None => Err(RadsimError::Expression("missing ')'".to_string())),
        }
    }
}
