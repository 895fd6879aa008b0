//! Safe arithmetic expression evaluator.
//!
//! Expressions are tokenised and parsed by recursive descent; nothing is ever
//! executed beyond the fixed operator, function and constant tables below.
//!
//! Precedence, lowest first:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '//' | '%') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary ('**' unary)?
//! primary := number | name | name '(' args ')' | '(' expr ')' | '[' args ']'
//! ```
//!
//! Integers stay exact until an operation overflows `i64`, at which point the
//! operation is redone in floating point. `/` always yields a float; `//` and
//! `%` floor towards negative infinity.

use std::f64::consts::{E, PI, TAU};
use std::fmt;

/// Longest expression accepted, in characters.
pub const MAX_EXPRESSION_LEN: usize = 10_000;

/// Deepest nesting of parentheses, brackets, calls and unary signs.
pub const MAX_DEPTH: usize = 256;

/// A value produced by evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Exact integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// List literal, e.g. `[1, 2, 3]`.
    List(Vec<Value>),
}

impl Value {
    fn as_f64(&self) -> Result<f64, String> {
        match self {
            Self::Int(i) => Ok(*i as f64),
            Self::Float(f) => Ok(*f),
            Self::List(_) => Err("expected a number, got a list".to_string()),
        }
    }

    fn as_int(&self, what: &str) -> Result<i64, String> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Ok(*f as i64),
            _ => Err(format!("{what} requires integer arguments")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => f.write_str(&format_general(*x, 10)),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Formats `x` with `precision` significant digits, trimming trailing zeros.
///
/// Uses scientific notation when the exponent is below -4 or at least
/// `precision`, like C's `%g`.
#[must_use]
pub fn format_general(x: f64, precision: usize) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, x);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let mantissa = trim_zeros(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_zeros(&format!("{x:.decimals$}")).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Value),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                is_float |= chars[i] == '.';
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    is_float = true;
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            let value = if is_float {
                Value::Float(text.parse().map_err(|_| format!("Invalid syntax: bad number '{text}'"))?)
            } else {
                match text.parse::<i64>() {
                    Ok(n) => Value::Int(n),
                    Err(_) => Value::Float(
                        text.parse()
                            .map_err(|_| format!("Invalid syntax: bad number '{text}'"))?,
                    ),
                }
            };
            tokens.push(Token::Num(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            _ => return Err(format!("Invalid syntax: unexpected character '{c}'")),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("Invalid syntax: expected '{what}'"))
        }
    }

    fn expr(&mut self) -> Result<Value, String> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, &left, &right)?;
        }
    }

    fn term(&mut self) -> Result<Value, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::DoubleSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, &left, &right)?;
        }
    }

    // Every recursive path passes through here, so the depth bound lives here.
    fn unary(&mut self) -> Result<Value, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Invalid syntax: expression nested too deeply".to_string());
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<Value, String> {
        if self.eat(&Token::Minus) {
            return match self.unary()? {
                Value::Int(i) => Ok(i.checked_neg().map_or(Value::Float(-(i as f64)), Value::Int)),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::List(_) => Err("Operation error: bad operand type for unary -".to_string()),
            };
        }
        if self.eat(&Token::Plus) {
            return match self.unary()? {
                Value::List(_) => Err("Operation error: bad operand type for unary +".to_string()),
                v => Ok(v),
            };
        }
        self.power()
    }

    fn power(&mut self) -> Result<Value, String> {
        let base = self.primary()?;
        if self.eat(&Token::DoubleStar) {
            let exponent = self.unary()?;
            return binary(BinOp::Pow, &base, &exponent);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Value, String> {
        match self.next() {
            Some(Token::Num(v)) => Ok(v),
            Some(Token::LParen) => {
                let v = self.expr()?;
                self.expect(&Token::RParen, ")")?;
                Ok(v)
            }
            Some(Token::LBracket) => Ok(Value::List(self.args(&Token::RBracket, "]")?)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.args(&Token::RParen, ")")?;
                    call(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(other) => Err(format!("Invalid syntax: unexpected token {other:?}")),
            None => Err("Invalid syntax: unexpected end of expression".to_string()),
        }
    }

    fn args(&mut self, close: &Token, what: &str) -> Result<Vec<Value>, String> {
        let mut out = Vec::new();
        if self.eat(close) {
            return Ok(out);
        }
        loop {
            out.push(self.expr()?);
            if self.eat(&Token::Comma) {
                if self.eat(close) {
                    return Ok(out);
                }
                continue;
            }
            self.expect(close, what)?;
            return Ok(out);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, String> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let exact = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => None,
            BinOp::FloorDiv | BinOp::Mod if b == 0 => return Err("Division by zero".to_string()),
            BinOp::FloorDiv => a.checked_div_euclid(b).map(|_| floor_div_int(a, b)),
            BinOp::Mod => a
                .checked_rem(b)
                .map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r }),
            BinOp::Pow if b >= 0 => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
            BinOp::Pow => None,
        };
        if let Some(v) = exact {
            return Ok(Value::Int(v));
        }
    }

    let a = left.as_f64().map_err(|e| format!("Operation error: {e}"))?;
    let b = right.as_f64().map_err(|e| format!("Operation error: {e}"))?;
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err("Division by zero".to_string())
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err("Division by zero".to_string());
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err("Operation error: fractional power of a negative number".to_string());
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(v))
}

fn floor_div_int(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn constant(name: &str) -> Result<Value, String> {
    let v = match name {
        "pi" => PI,
        "e" => E,
        "tau" => TAU,
        "inf" => f64::INFINITY,
        "nan" => f64::NAN,
        _ => return Err(format!("Unknown variable: {name}")),
    };
    Ok(Value::Float(v))
}

/// Flattens `min(1, 2)` and `min([1, 2])` into one argument list.
fn spread(args: &[Value]) -> Vec<Value> {
    match args {
        [Value::List(items)] => items.clone(),
        _ => args.to_vec(),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(format!(
            "Function error: {name}() takes {expected} argument(s) ({} given)",
            args.len()
        ));
    }
    Ok(())
}

fn float_fn(name: &str, args: &[Value], f: impl Fn(f64) -> Option<f64>) -> Result<Value, String> {
    arity(name, args, 1, 1)?;
    let x = args[0].as_f64().map_err(|e| format!("Function error: {e}"))?;
    f(x).map(Value::Float)
        .ok_or_else(|| "Function error: math domain error".to_string())
}

fn to_int_checked(x: f64) -> Result<Value, String> {
    if !x.is_finite() {
        return Err("Function error: cannot convert non-finite float to integer".to_string());
    }
    if x.abs() < 9.2e18 {
        Ok(Value::Int(x as i64))
    } else {
        Ok(Value::Float(x))
    }
}

fn extreme(name: &str, args: &[Value], pick_left: impl Fn(f64, f64) -> bool) -> Result<Value, String> {
    let items = spread(args);
    let mut best: Option<(f64, Value)> = None;
    for item in items {
        let x = item.as_f64().map_err(|e| format!("Function error: {e}"))?;
        let replace = best.as_ref().map_or(true, |(b, _)| pick_left(x, *b));
        if replace {
            best = Some((x, item));
        }
    }
    best.map(|(_, v)| v)
        .ok_or_else(|| format!("Function error: {name}() arg is an empty sequence"))
}

fn call(name: &str, args: &[Value]) -> Result<Value, String> {
    let fe = |e: String| format!("Function error: {e}");
    match name {
        "abs" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(i.checked_abs().map_or(Value::Float((*i as f64).abs()), Value::Int)),
                v => Ok(Value::Float(v.as_f64().map_err(fe)?.abs())),
            }
        }
        "round" => {
            arity(name, args, 1, 2)?;
            let x = args[0].as_f64().map_err(fe)?;
            match args.get(1) {
                None => match &args[0] {
                    Value::Int(i) => Ok(Value::Int(*i)),
                    _ => to_int_checked(x.round_ties_even()),
                },
                Some(digits) => {
                    let digits = digits.as_int("round").map_err(fe)?;
                    let factor = 10f64.powi(i32::try_from(digits).map_err(|e| fe(e.to_string()))?);
                    match &args[0] {
                        Value::Int(i) if digits >= 0 => Ok(Value::Int(*i)),
                        _ => Ok(Value::Float((x * factor).round_ties_even() / factor)),
                    }
                }
            }
        }
        "min" => extreme(name, args, |x, best| x < best),
        "max" => extreme(name, args, |x, best| x > best),
        "sum" => {
            arity(name, args, 1, 1)?;
            let Value::List(items) = &args[0] else {
                return Err("Function error: sum() requires a list".to_string());
            };
            items
                .iter()
                .try_fold(Value::Int(0), |acc, v| binary(BinOp::Add, &acc, v))
        }
        "pow" => {
            arity(name, args, 2, 2)?;
            binary(BinOp::Pow, &args[0], &args[1])
        }
        "sqrt" => float_fn(name, args, |x| (x >= 0.0).then(|| x.sqrt())),
        "sin" => float_fn(name, args, |x| x.is_finite().then(|| x.sin())),
        "cos" => float_fn(name, args, |x| x.is_finite().then(|| x.cos())),
        "tan" => float_fn(name, args, |x| x.is_finite().then(|| x.tan())),
        "asin" => float_fn(name, args, |x| (-1.0..=1.0).contains(&x).then(|| x.asin())),
        "acos" => float_fn(name, args, |x| (-1.0..=1.0).contains(&x).then(|| x.acos())),
        "atan" => float_fn(name, args, |x| Some(x.atan())),
        "atan2" => {
            arity(name, args, 2, 2)?;
            let y = args[0].as_f64().map_err(fe)?;
            let x = args[1].as_f64().map_err(fe)?;
            Ok(Value::Float(y.atan2(x)))
        }
        "log" => {
            arity(name, args, 1, 2)?;
            let x = args[0].as_f64().map_err(fe)?;
            if x <= 0.0 {
                return Err("Function error: math domain error".to_string());
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = base.as_f64().map_err(fe)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err("Function error: math domain error".to_string());
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        "log10" => float_fn(name, args, |x| (x > 0.0).then(|| x.log10())),
        "exp" => float_fn(name, args, |x| Some(x.exp())),
        "ceil" | "floor" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                v => {
                    let x = v.as_f64().map_err(fe)?;
                    to_int_checked(if name == "ceil" { x.ceil() } else { x.floor() })
                }
            }
        }
        "factorial" => {
            arity(name, args, 1, 1)?;
            let n = args[0].as_int("factorial").map_err(fe)?;
            if n < 0 {
                return Err("Function error: factorial() not defined for negative values".to_string());
            }
            (1..=n)
                .try_fold(1i64, i64::checked_mul)
                .map(Value::Int)
                .ok_or_else(|| "Function error: factorial() result too large".to_string())
        }
        "degrees" => float_fn(name, args, |x| Some(x.to_degrees())),
        "radians" => float_fn(name, args, |x| Some(x.to_radians())),
        "gcd" => {
            let mut acc: i64 = 0;
            for v in spread(args) {
                let mut b = v.as_int("gcd").map_err(fe)?.checked_abs().ok_or_else(|| fe("integer overflow".into()))?;
                let mut a = acc;
                while b != 0 {
                    (a, b) = (b, a % b);
                }
                acc = a;
            }
            Ok(Value::Int(acc))
        }
        _ => Err(format!("Unknown or unsafe function: {name}")),
    }
}

/// Evaluates `expression`.
///
/// # Errors
///
/// Returns a human-readable message for syntax errors, unknown names,
/// division by zero and math domain errors.
pub fn evaluate(expression: &str) -> Result<Value, String> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err("Empty expression".to_string());
    }
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(format!("Expression too long (limit {MAX_EXPRESSION_LEN} characters)"));
    }
    let mut parser = Parser {
        tokens: tokenize(expression)?,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("Invalid syntax: unexpected token {extra:?}"));
    }
    Ok(value)
}
