//! Sandboxed parsing and evaluation of user-written equation expressions.
//!
//! User text is parsed into a closed AST whose constructible variants are
//! exactly the permitted expression forms: everything else (assignment,
//! imports, anonymous functions, attribute access, statements) has no
//! production in the grammar and fails with [`ParseError`] before any
//! evaluation happens. Evaluation runs against a fixed namespace of safe
//! math functions, the caller's parameter map, the reserved independent
//! variable(s), and the state vector `y`; nothing else is reachable.

use std::collections::HashMap;

use crate::error::{EvalError, ParseError};
use crate::traits::Scalar;

/// Independent-variable and state identifiers reserved by the engine.
pub const RESERVED_VARIABLES: [&str; 3] = ["x", "n", "y"];

/// The fixed table of callable math functions: name and arity.
const FUNCTIONS: [(&str, usize); 18] = [
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("exp", 1),
    ("log", 1),
    ("log10", 1),
    ("sqrt", 1),
    ("abs", 1),
    ("sinh", 1),
    ("cosh", 1),
    ("tanh", 1),
    ("arcsin", 1),
    ("arccos", 1),
    ("arctan", 1),
    ("floor", 1),
    ("ceil", 1),
    ("sign", 1),
    ("heaviside", 2),
];

const CONSTANTS: [&str; 2] = ["pi", "e"];

/// Returns true if `name` is taken by the sandbox namespace itself:
/// a builtin function, a named constant, or a reserved variable.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_VARIABLES.contains(&name)
        || CONSTANTS.contains(&name)
        || FUNCTIONS.iter().any(|(f, _)| *f == name)
}

/// Replaces `\uXXXX` escape sequences with their literal characters so a
/// parameter named `ω` resolves the same whether it was typed directly or
/// entered as `ω`. Malformed escapes are left untouched and rejected
/// by the tokenizer.
pub fn normalize_escapes(text: &str) -> String {
    let cs: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < cs.len() {
        if cs[i] == '\\' && i + 5 < cs.len() && cs[i + 1] == 'u' {
            let digits: String = cs[i + 2..i + 6].iter().collect();
            if let Ok(code) = u32::from_str_radix(&digits, 16) {
                if let Some(ch) = char::from_u32(code) {
                    out.push(ch);
                    i += 6;
                    continue;
                }
            }
        }
        out.push(cs[i]);
        i += 1;
    }
    out
}

// --- Closed AST ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Expression tree. The variants listed here are the entire language.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Name(String),
    Unary(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call(String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
}

/// Immutable pairing of source text and its validated expression tree.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
}

impl CompiledExpression {
    /// Parses and validates `text`. Fails with [`ParseError`] on syntax
    /// errors and on any construct outside the expression grammar.
    pub fn compile(text: &str) -> Result<Self, ParseError> {
        let source = normalize_escapes(text);
        if source.trim().is_empty() {
            return Err(ParseError::Syntax("expression is empty".into()));
        }
        let tokens = tokenize(&source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let ast = parser.parse_conditional()?;
        if let Some(tok) = parser.peek() {
            return Err(ParseError::Syntax(format!(
                "unexpected trailing input near {}",
                tok.describe()
            )));
        }
        Ok(Self { source, ast })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression to a scalar in the given context.
    pub fn eval<T: Scalar>(&self, ctx: &EvalContext<'_, T>) -> Result<T, EvalError> {
        match eval_node(&self.ast, ctx)? {
            Value::Scalar(v) => Ok(v),
            Value::List(_) => Err(EvalError(
                "expression must evaluate to a scalar, not a list".into(),
            )),
        }
    }

    /// Zero-filled test evaluation run immediately after compiling, so
    /// undefined names, bad arity, and out-of-range subscripts surface
    /// before the expression is handed to a solver loop.
    pub fn probe(
        &self,
        scalar_names: &[&str],
        state_len: Option<usize>,
        params: &HashMap<String, f64>,
    ) -> Result<(), ParseError> {
        let scalars: Vec<(&str, f64)> = scalar_names.iter().map(|n| (*n, 0.0)).collect();
        let zeros = vec![0.0; state_len.unwrap_or(0)];
        let ctx = EvalContext {
            scalars: &scalars,
            state: state_len.map(|_| zeros.as_slice()),
            params,
        };
        self.eval(&ctx)
            .map(|_| ())
            .map_err(|e| ParseError::Evaluation(e.0))
    }
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    KwIf,
    KwElse,
    KwAnd,
    KwOr,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(v) => format!("number {v}"),
            Token::Ident(s) => format!("'{s}'"),
            Token::KwIf => "'if'".into(),
            Token::KwElse => "'else'".into(),
            Token::KwAnd => "'and'".into(),
            Token::KwOr => "'or'".into(),
            other => format!("{other:?}"),
        }
    }
}

/// Keywords that name constructs the sandbox refuses outright. Mapping
/// them explicitly gives the caller a message naming the construct
/// instead of a generic syntax error.
fn disallowed_keyword(word: &str) -> Option<&'static str> {
    match word {
        "lambda" => Some("anonymous function"),
        "import" => Some("import"),
        "not" => Some("operator 'not'"),
        "for" | "while" => Some("loop"),
        "def" => Some("function definition"),
        "class" => Some("class definition"),
        "in" | "is" | "return" | "yield" | "global" | "nonlocal" | "del" | "assert" | "with"
        | "try" | "except" | "raise" | "pass" | "break" | "continue" => Some("statement keyword"),
        _ => None,
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let cs: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < cs.len() {
        let c = cs[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && cs.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < cs.len() && (cs[i].is_ascii_digit() || cs[i] == '.') {
                i += 1;
            }
            if i < cs.len() && (cs[i] == 'e' || cs[i] == 'E') {
                let mut j = i + 1;
                if j < cs.len() && (cs[j] == '+' || cs[j] == '-') {
                    j += 1;
                }
                if j < cs.len() && cs[j].is_ascii_digit() {
                    i = j;
                    while i < cs.len() && cs[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = cs[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ParseError::Syntax(format!("invalid number literal '{text}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < cs.len() && (cs[i].is_alphanumeric() || cs[i] == '_') {
                i += 1;
            }
            let word: String = cs[start..i].iter().collect();
            if let Some(construct) = disallowed_keyword(&word) {
                return Err(ParseError::Disallowed(construct.into()));
            }
            tokens.push(match word.as_str() {
                "if" => Token::KwIf,
                "else" => Token::KwElse,
                "and" => Token::KwAnd,
                "or" => Token::KwOr,
                _ => Token::Ident(word),
            });
        } else {
            let next = cs.get(i + 1).copied();
            let (tok, len) = match (c, next) {
                ('*', Some('*')) => (Token::DoubleStar, 2),
                ('/', Some('/')) => (Token::DoubleSlash, 2),
                ('<', Some('=')) => (Token::Le, 2),
                ('>', Some('=')) => (Token::Ge, 2),
                ('=', Some('=')) => (Token::EqEq, 2),
                ('!', Some('=')) => (Token::Ne, 2),
                ('<', _) => (Token::Lt, 1),
                ('>', _) => (Token::Gt, 1),
                ('+', _) => (Token::Plus, 1),
                ('-', _) => (Token::Minus, 1),
                ('*', _) => (Token::Star, 1),
                ('/', _) => (Token::Slash, 1),
                ('%', _) => (Token::Percent, 1),
                ('^', _) => (Token::DoubleStar, 1),
                ('(', _) => (Token::LParen, 1),
                (')', _) => (Token::RParen, 1),
                ('[', _) => (Token::LBracket, 1),
                (']', _) => (Token::RBracket, 1),
                (',', _) => (Token::Comma, 1),
                ('=', _) => return Err(ParseError::Disallowed("assignment".into())),
                ('.', _) => return Err(ParseError::Disallowed("attribute access".into())),
                ('"', _) | ('\'', _) => {
                    return Err(ParseError::Disallowed("string literal".into()))
                }
                (';', _) => return Err(ParseError::Disallowed("statement".into())),
                ('{', _) => return Err(ParseError::Disallowed("set or dict literal".into())),
                ('&', _) | ('|', _) | ('~', _) => {
                    return Err(ParseError::Disallowed("bitwise operator".into()))
                }
                _ => {
                    return Err(ParseError::Syntax(format!("unexpected character '{c}'")));
                }
            };
            tokens.push(tok);
            i += len;
        }
    }
    Ok(tokens)
}

// --- Parser ---

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token, context: &str) -> Result<(), ParseError> {
        match self.consume() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(ParseError::Syntax(format!(
                "expected {} {context}, found {}",
                want.describe(),
                tok.describe()
            ))),
            None => Err(ParseError::Syntax(format!(
                "expected {} {context}, found end of expression",
                want.describe()
            ))),
        }
    }

    /// Lowest precedence: `body if cond else orelse`.
    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let body = self.parse_or()?;
        if let Some(Token::KwIf) = self.peek() {
            self.consume();
            let cond = self.parse_or()?;
            self.expect(Token::KwElse, "after conditional expression")?;
            let orelse = self.parse_conditional()?;
            return Ok(Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while let Some(Token::KwOr) = self.peek() {
            self.consume();
            let right = self.parse_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_compare()?;
        while let Some(Token::KwAnd) = self.peek() {
            self.consume();
            let right = self.parse_compare()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_arith()?;
        let op = match self.peek() {
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::EqEq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            _ => return Ok(left),
        };
        self.consume();
        let right = self.parse_arith()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary(Box::new(operand)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    /// `**` binds tighter than unary minus on its left and is
    /// right-associative, so `-x**2` is `-(x**2)` and `2**-1` works.
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if let Some(Token::DoubleStar) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while let Some(Token::LBracket) = self.peek() {
            self.consume();
            let index = self.parse_conditional()?;
            self.expect(Token::RBracket, "to close subscript")?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.consume() {
            Some(Token::Number(v)) => Ok(Expr::Num(v)),
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let args = self.parse_sequence(Token::RParen, "to close call")?;
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Name(name))
            }
            Some(Token::LParen) => {
                let first = self.parse_conditional()?;
                if let Some(Token::Comma) = self.peek() {
                    self.consume();
                    let mut items = vec![first];
                    items.extend(self.parse_sequence(Token::RParen, "to close tuple")?);
                    return Ok(Expr::List(items));
                }
                self.expect(Token::RParen, "to close group")?;
                Ok(first)
            }
            Some(Token::LBracket) => {
                let items = self.parse_sequence(Token::RBracket, "to close list")?;
                Ok(Expr::List(items))
            }
            Some(tok) => Err(ParseError::Syntax(format!(
                "unexpected {}",
                tok.describe()
            ))),
            None => Err(ParseError::Syntax("unexpected end of expression".into())),
        }
    }

    /// Comma-separated expressions terminated by `close` (already past the
    /// opening delimiter). Accepts a trailing comma.
    fn parse_sequence(&mut self, close: Token, context: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.peek() == Some(&close) {
            self.consume();
            return Ok(items);
        }
        loop {
            items.push(self.parse_conditional()?);
            match self.consume() {
                Some(Token::Comma) => {
                    if self.peek() == Some(&close) {
                        self.consume();
                        return Ok(items);
                    }
                }
                Some(tok) if tok == close => return Ok(items),
                Some(tok) => {
                    return Err(ParseError::Syntax(format!(
                        "expected ',' or {} {context}, found {}",
                        close.describe(),
                        tok.describe()
                    )))
                }
                None => {
                    return Err(ParseError::Syntax(format!(
                        "expected {} {context}, found end of expression",
                        close.describe()
                    )))
                }
            }
        }
    }
}

// --- Evaluator ---

/// Bindings an expression is evaluated against: the independent
/// variable(s) by name, the optional state vector `y`, and the caller's
/// parameter map. Builtin functions and constants are always present.
pub struct EvalContext<'a, T: Scalar> {
    pub scalars: &'a [(&'a str, T)],
    pub state: Option<&'a [T]>,
    pub params: &'a HashMap<String, f64>,
}

impl<'a, T: Scalar> EvalContext<'a, T> {
    pub fn new(
        scalars: &'a [(&'a str, T)],
        state: Option<&'a [T]>,
        params: &'a HashMap<String, f64>,
    ) -> Self {
        Self {
            scalars,
            state,
            params,
        }
    }
}

enum Value<T> {
    Scalar(T),
    List(Vec<T>),
}

fn truthy<T: Scalar>(v: T) -> bool {
    v != T::zero()
}

fn eval_scalar<T: Scalar>(expr: &Expr, ctx: &EvalContext<'_, T>) -> Result<T, EvalError> {
    match eval_node(expr, ctx)? {
        Value::Scalar(v) => Ok(v),
        Value::List(_) => Err(EvalError("expected a scalar, found a list".into())),
    }
}

fn eval_node<T: Scalar>(expr: &Expr, ctx: &EvalContext<'_, T>) -> Result<Value<T>, EvalError> {
    match expr {
        Expr::Num(v) => Ok(Value::Scalar(T::from_f64(*v).unwrap())),
        Expr::Name(name) => resolve_name(name, ctx).map(Value::Scalar),
        Expr::Unary(operand) => {
            let v = eval_scalar(operand, ctx)?;
            Ok(Value::Scalar(-v))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = eval_scalar(lhs, ctx)?;
            let b = eval_scalar(rhs, ctx)?;
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::FloorDiv => (a / b).floor(),
                BinaryOp::Mod => a - b * (a / b).floor(),
                BinaryOp::Pow => a.powf(b),
            };
            Ok(Value::Scalar(v))
        }
        Expr::Compare(op, lhs, rhs) => {
            let a = eval_scalar(lhs, ctx)?;
            let b = eval_scalar(rhs, ctx)?;
            let holds = match op {
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
                CompareOp::Gt => a > b,
                CompareOp::Ge => a >= b,
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
            };
            Ok(Value::Scalar(if holds { T::one() } else { T::zero() }))
        }
        Expr::Logical(op, lhs, rhs) => {
            let a = eval_scalar(lhs, ctx)?;
            let v = match op {
                LogicalOp::And => {
                    if truthy(a) {
                        eval_scalar(rhs, ctx)?
                    } else {
                        a
                    }
                }
                LogicalOp::Or => {
                    if truthy(a) {
                        a
                    } else {
                        eval_scalar(rhs, ctx)?
                    }
                }
            };
            Ok(Value::Scalar(v))
        }
        Expr::Conditional { cond, then, orelse } => {
            let c = eval_scalar(cond, ctx)?;
            if truthy(c) {
                eval_node(then, ctx)
            } else {
                eval_node(orelse, ctx)
            }
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_scalar(arg, ctx)?);
            }
            apply_builtin(name, &values).map(Value::Scalar)
        }
        Expr::Index(base, index) => {
            let idx = eval_scalar(index, ctx)?;
            // `y` indexes the state vector directly; anything else must
            // evaluate to a list literal.
            if let Expr::Name(name) = base.as_ref() {
                if name == "y" {
                    if let Some(state) = ctx.state {
                        let k = list_index(idx, state.len())?;
                        return Ok(Value::Scalar(state[k]));
                    }
                }
            }
            match eval_node(base, ctx)? {
                Value::List(items) => {
                    let k = list_index(idx, items.len())?;
                    Ok(Value::Scalar(items[k]))
                }
                Value::Scalar(_) => Err(EvalError("value is not subscriptable".into())),
            }
        }
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_scalar(item, ctx)?);
            }
            Ok(Value::List(values))
        }
    }
}

fn resolve_name<T: Scalar>(name: &str, ctx: &EvalContext<'_, T>) -> Result<T, EvalError> {
    if let Some((_, v)) = ctx.scalars.iter().find(|(n, _)| *n == name) {
        return Ok(*v);
    }
    if name == "y" && ctx.state.is_some() {
        return Err(EvalError(
            "the state vector 'y' must be indexed, e.g. y[0]".into(),
        ));
    }
    if let Some(v) = ctx.params.get(name) {
        return Ok(T::from_f64(*v).unwrap());
    }
    match name {
        "pi" => Ok(T::from_f64(std::f64::consts::PI).unwrap()),
        "e" => Ok(T::from_f64(std::f64::consts::E).unwrap()),
        _ => Err(EvalError(format!("name '{name}' is not defined"))),
    }
}

fn list_index<T: Scalar>(idx: T, len: usize) -> Result<usize, EvalError> {
    let raw = idx.to_f64().unwrap_or(f64::NAN);
    if !raw.is_finite() || raw.fract() != 0.0 {
        return Err(EvalError(format!("index {raw} is not an integer")));
    }
    let signed = raw as i64;
    let resolved = if signed < 0 {
        signed + len as i64
    } else {
        signed
    };
    if resolved < 0 || resolved as usize >= len {
        return Err(EvalError(format!(
            "index {signed} out of range for length {len}"
        )));
    }
    Ok(resolved as usize)
}

fn apply_builtin<T: Scalar>(name: &str, args: &[T]) -> Result<T, EvalError> {
    let arity = match FUNCTIONS.iter().find(|(f, _)| *f == name) {
        Some((_, arity)) => *arity,
        None => return Err(EvalError(format!("unknown function '{name}'"))),
    };
    if args.len() != arity {
        return Err(EvalError(format!(
            "{name}() takes {arity} argument(s), got {}",
            args.len()
        )));
    }
    let a = args[0];
    let v = match name {
        "sin" => a.sin(),
        "cos" => a.cos(),
        "tan" => a.tan(),
        "exp" => a.exp(),
        "log" => a.ln(),
        "log10" => a.log10(),
        "sqrt" => a.sqrt(),
        "abs" => a.abs(),
        "sinh" => a.sinh(),
        "cosh" => a.cosh(),
        "tanh" => a.tanh(),
        "arcsin" => a.asin(),
        "arccos" => a.acos(),
        "arctan" => a.atan(),
        "floor" => a.floor(),
        "ceil" => a.ceil(),
        "sign" => {
            if a.is_nan() {
                a
            } else if a > T::zero() {
                T::one()
            } else if a < T::zero() {
                -T::one()
            } else {
                T::zero()
            }
        }
        "heaviside" => {
            let h0 = args[1];
            if a.is_nan() {
                a
            } else if a < T::zero() {
                T::zero()
            } else if a > T::zero() {
                T::one()
            } else {
                h0
            }
        }
        _ => unreachable!("arity table covers every builtin"),
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval_with(
        text: &str,
        x: f64,
        state: &[f64],
        params: &HashMap<String, f64>,
    ) -> Result<f64, EvalError> {
        let expr = CompiledExpression::compile(text).expect("expression should parse");
        let scalars = [("x", x)];
        let ctx = EvalContext::new(&scalars, Some(state), params);
        expr.eval(&ctx)
    }

    fn eval_ok(text: &str, x: f64, state: &[f64]) -> f64 {
        eval_with(text, x, state, &HashMap::new()).expect("evaluation should succeed")
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval_ok("2+3*4", 0.0, &[]), 14.0);
        assert_eq!(eval_ok("(2+3)*4", 0.0, &[]), 20.0);
        assert_eq!(eval_ok("2**3**2", 0.0, &[]), 512.0);
        assert_eq!(eval_ok("-2**2", 0.0, &[]), -4.0);
        assert_eq!(eval_ok("2^3", 0.0, &[]), 8.0);
        assert_eq!(eval_ok("7//2", 0.0, &[]), 3.0);
        assert_eq!(eval_ok("-7%3", 0.0, &[]), 2.0);
    }

    #[test]
    fn state_and_parameters_resolve() {
        let mut params = HashMap::new();
        params.insert("omega".to_string(), 2.0);
        let v = eval_with("-omega**2*y[0]", 0.0, &[1.5, 0.0], &params).unwrap();
        assert_eq!(v, -6.0);
    }

    #[test]
    fn unicode_escapes_normalize_to_literal_names() {
        let mut params = HashMap::new();
        params.insert("ω".to_string(), 3.0);
        let v = eval_with("\\u03c9*y[0]", 0.0, &[2.0], &params).unwrap();
        assert_eq!(v, 6.0);
    }

    #[test]
    fn builtins_and_constants() {
        assert!((eval_ok("sin(pi/2)", 0.0, &[]) - 1.0).abs() < 1e-15);
        assert!((eval_ok("log(e)", 0.0, &[]) - 1.0).abs() < 1e-15);
        assert_eq!(eval_ok("heaviside(-2, 0.5)", 0.0, &[]), 0.0);
        assert_eq!(eval_ok("heaviside(0, 0.5)", 0.0, &[]), 0.5);
        assert_eq!(eval_ok("sign(-3.5)", 0.0, &[]), -1.0);
        assert_eq!(eval_ok("sign(0)", 0.0, &[]), 0.0);
        assert_eq!(eval_ok("floor(2.7)+ceil(2.1)", 0.0, &[]), 5.0);
    }

    #[test]
    fn conditional_comparison_and_logic() {
        assert_eq!(eval_ok("1 if x > 0 else -1", 2.0, &[]), 1.0);
        assert_eq!(eval_ok("1 if x > 0 else -1", -2.0, &[]), -1.0);
        assert_eq!(eval_ok("(x > 1) and (x < 3)", 2.0, &[]), 1.0);
        assert_eq!(eval_ok("x == 2 or x == 5", 5.0, &[]), 1.0);
        // only the taken branch is evaluated
        assert_eq!(eval_ok("0 if x < 0 else y[0]", 1.0, &[7.0]), 7.0);
    }

    #[test]
    fn list_literals_subscript() {
        assert_eq!(eval_ok("[10, 20, 30][1]", 0.0, &[]), 20.0);
        assert_eq!(eval_ok("y[-1]", 0.0, &[1.0, 2.0, 3.0]), 3.0);
        assert_eq!(eval_ok("(4, 5)[0]", 0.0, &[]), 4.0);
    }

    #[test]
    fn disallowed_constructs_are_rejected() {
        for (text, needle) in [
            ("lambda x: x", "anonymous function"),
            ("import os", "import"),
            ("a = 1", "assignment"),
            ("x.real", "attribute access"),
            ("'abc'", "string literal"),
            ("x; x", "statement"),
            ("{1: 2}", "set or dict"),
            ("x & 1", "bitwise"),
            ("not x", "operator 'not'"),
            ("[i for i in x]", "loop"),
        ] {
            match CompiledExpression::compile(text) {
                Err(ParseError::Disallowed(msg)) => {
                    assert!(msg.contains(needle), "{text}: got '{msg}'")
                }
                other => panic!("{text}: expected Disallowed, got {other:?}"),
            }
        }
    }

    #[test]
    fn syntax_errors_are_rejected() {
        for text in ["", "2 +", "sin(", "y[0", "2 3", "(1,", "?"] {
            assert!(
                matches!(CompiledExpression::compile(text), Err(ParseError::Syntax(_))),
                "expected syntax error for '{text}'"
            );
        }
    }

    #[test]
    fn probe_surfaces_evaluation_errors() {
        let params = HashMap::new();
        let expr = CompiledExpression::compile("missing*y[0]").unwrap();
        let err = expr.probe(&["x"], Some(1), &params).unwrap_err();
        assert!(matches!(err, ParseError::Evaluation(_)));

        let expr = CompiledExpression::compile("y[3]").unwrap();
        assert!(expr.probe(&["x"], Some(2), &params).is_err());

        let expr = CompiledExpression::compile("sin(x, 2)").unwrap();
        assert!(expr.probe(&["x"], None, &params).is_err());

        let expr = CompiledExpression::compile("y[1]").unwrap();
        assert!(expr.probe(&["x"], Some(2), &params).is_ok());
    }

    #[test]
    fn scientific_notation_literals() {
        assert_eq!(eval_ok("1e3", 0.0, &[]), 1000.0);
        assert_eq!(eval_ok("2.5e-2", 0.0, &[]), 0.025);
        assert_eq!(eval_ok(".5", 0.0, &[]), 0.5);
        // 'e' alone is the constant, not an exponent marker
        assert!((eval_ok("2*e", 0.0, &[]) - 2.0 * std::f64::consts::E).abs() < 1e-15);
    }
}
