//! Tokenizer, precedence-climbing parser, algebraic simplifier, and
//! three-address-step planner for high-level expressions.
//!
//! Precedence, low to high: `|`  `^`  `&`  `<< >>`  `+ -`  `* /`  unary  atom.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    Xor,
    And,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::And => "&",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }

    fn is_bitwise(self) -> bool {
        matches!(self, BinOp::Or | BinOp::Xor | BinOp::And | BinOp::Shl | BinOp::Shr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Lit(i64),
    Var(String),
    /// `ident[index]`
    Index(String, Box<Expr>),
    /// `*literal_address`
    Deref(u16),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(v) => write!(f, "{v}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Index(name, idx) => write!(f, "{name}[{idx}]"),
            Expr::Deref(addr) => write!(f, "*{addr:#06X}"),
            Expr::Neg(e) => write!(f, "-{e}"),
            Expr::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("invalid numeric literal: {0}")]
    InvalidLiteral(String),
    #[error("division by a variable is not supported")]
    DivisionByVariable,
    #[error("division by zero")]
    DivisionByZero,
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(BinOp),
    Star,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().filter(|c| !c.is_whitespace()).collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '&' => {
                tokens.push(Token::Op(BinOp::And));
                i += 1;
            }
            '^' => {
                tokens.push(Token::Op(BinOp::Xor));
                i += 1;
            }
            '|' => {
                tokens.push(Token::Op(BinOp::Or));
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'<') => {
                tokens.push(Token::Op(BinOp::Shl));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Op(BinOp::Shr));
                i += 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                if c == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
                    i += 2;
                    while i < chars.len() && chars[i].is_ascii_hexdigit() {
                        i += 1;
                    }
                } else if c == '0' && matches!(chars.get(i + 1), Some('b') | Some('B')) {
                    i += 2;
                    while i < chars.len() && matches!(chars[i], '0' | '1') {
                        i += 1;
                    }
                } else {
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(parse_number(&text)?));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => return Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<i64, ExprError> {
    let lower = text.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).map_err(|_| ExprError::InvalidLiteral(text.to_string()))
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).map_err(|_| ExprError::InvalidLiteral(text.to_string()))
    } else {
        lower
            .parse::<i64>()
            .map_err(|_| ExprError::InvalidLiteral(text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Precedence-climbing parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if &t == want => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken(format!("{t:?}"))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_xor()?;
        while matches!(self.peek(), Some(Token::Op(BinOp::Or))) {
            self.next();
            let rhs = self.parse_xor()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Op(BinOp::Xor))) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Xor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_shift()?;
        while matches!(self.peek(), Some(Token::Op(BinOp::And))) {
            self.next();
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_additive()?;
        loop {
            match self.peek() {
                Some(Token::Op(op @ (BinOp::Shl | BinOp::Shr))) => {
                    let op = *op;
                    self.next();
                    let rhs = self.parse_additive()?;
                    lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some(Token::Op(BinOp::Add)) => {
                    self.next();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.next();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Expr::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Op(BinOp::Div)) => {
                    self.next();
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if matches!(self.peek(), Some(Token::Star)) {
            self.next();
            match self.next() {
                Some(Token::Num(v)) => return Ok(Expr::Deref(v as u16)),
                Some(t) => return Err(ExprError::UnexpectedToken(format!("{t:?}"))),
                None => return Err(ExprError::UnexpectedEnd),
            }
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        match self.next().ok_or(ExprError::UnexpectedEnd)? {
            Token::Num(v) => Ok(Expr::Lit(v)),
            Token::Ident(name) => {
                if matches!(self.peek(), Some(Token::LBracket)) {
                    self.next();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    Ok(Expr::Index(name, Box::new(index)))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            t => Err(ExprError::UnexpectedToken(format!("{t:?}"))),
        }
    }
}

pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::UnexpectedToken(format!(
            "{:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Algebraic simplifier: a sum of coefficient*monomial terms, or a symbolic
// bitwise fallback once a non-constant operand reaches a bitwise/shift op.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimplifiedTerm {
    /// Monomial key (sorted variable names joined by `*`, `""` for the
    /// constant term) to coefficient. A `BTreeMap` keeps rendering
    /// deterministic, which compiler determinism (byte-identical output on
    /// repeated compiles) depends on.
    Algebraic(BTreeMap<String, i64>),
    Symbolic(String),
}

impl SimplifiedTerm {
    pub fn constant(v: i64) -> Self {
        let mut map = BTreeMap::new();
        map.insert(String::new(), v);
        SimplifiedTerm::Algebraic(map)
    }

    pub fn variable(name: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert(name.to_string(), 1);
        SimplifiedTerm::Algebraic(map)
    }

    /// `Some(v)` iff this term is a pure compile-time constant, i.e. its
    /// monomial map is empty (value 0) or holds only the constant key `""`.
    /// A lone variable monomial like `{"i": 1}` is NOT a constant.
    pub fn as_constant(&self) -> Option<i64> {
        match self {
            SimplifiedTerm::Algebraic(map) => {
                if map.is_empty() {
                    Some(0)
                } else if map.len() == 1 && map.contains_key("") {
                    Some(map[""])
                } else {
                    None
                }
            }
            SimplifiedTerm::Symbolic(_) => None,
        }
    }

    fn render_text(&self, expr: &Expr) -> String {
        match self {
            SimplifiedTerm::Symbolic(s) => s.clone(),
            SimplifiedTerm::Algebraic(_) => expr.to_string(),
        }
    }

    pub fn canonical_string(&self) -> String {
        match self {
            SimplifiedTerm::Symbolic(s) => s.clone(),
            SimplifiedTerm::Algebraic(map) => render_algebraic(map),
        }
    }
}

fn render_algebraic(map: &BTreeMap<String, i64>) -> String {
    let mut parts: Vec<(String, i64)> = map
        .iter()
        .filter(|(_, c)| **c != 0)
        .map(|(k, c)| (k.clone(), *c))
        .collect();
    if parts.is_empty() {
        return "0".to_string();
    }
    // Render the constant term last for readability.
    parts.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = String::new();
    for (i, (key, coeff)) in parts.iter().enumerate() {
        let sign = if coeff < &0 { "-" } else { "+" };
        let mag = coeff.abs();
        let term = if key.is_empty() {
            mag.to_string()
        } else if mag == 1 {
            key.clone()
        } else {
            format!("{mag}*{key}")
        };
        if i == 0 {
            if coeff < &0 {
                out.push('-');
            }
            out.push_str(&term);
        } else {
            out.push(' ');
            out.push_str(sign);
            out.push(' ');
            out.push_str(&term);
        }
    }
    out
}

fn merge_monomial(a: &str, b: &str) -> String {
    let mut vars: Vec<&str> = a.split('*').filter(|s| !s.is_empty()).collect();
    vars.extend(b.split('*').filter(|s| !s.is_empty()));
    vars.sort_unstable();
    vars.join("*")
}

fn algebraic_add(a: &BTreeMap<String, i64>, b: &BTreeMap<String, i64>, sign: i64) -> BTreeMap<String, i64> {
    let mut out = a.clone();
    for (k, v) in b {
        *out.entry(k.clone()).or_insert(0) += sign * v;
    }
    out.retain(|_, v| *v != 0);
    out
}

fn algebraic_mul(a: &BTreeMap<String, i64>, b: &BTreeMap<String, i64>) -> BTreeMap<String, i64> {
    let mut out: BTreeMap<String, i64> = BTreeMap::new();
    for (k1, c1) in a {
        for (k2, c2) in b {
            let key = merge_monomial(k1, k2);
            *out.entry(key).or_insert(0) += c1 * c2;
        }
    }
    out.retain(|_, v| *v != 0);
    out
}

/// Fold a sub-expression into its simplified term form.
pub fn simplify_term(expr: &Expr) -> Result<SimplifiedTerm, ExprError> {
    match expr {
        Expr::Lit(v) => Ok(SimplifiedTerm::constant(*v)),
        Expr::Var(name) => Ok(SimplifiedTerm::variable(name)),
        Expr::Index(..) | Expr::Deref(_) => Ok(SimplifiedTerm::variable(&expr.to_string())),
        Expr::Neg(inner) => {
            let t = simplify_term(inner)?;
            Ok(match t {
                SimplifiedTerm::Algebraic(map) => {
                    SimplifiedTerm::Algebraic(map.into_iter().map(|(k, v)| (k, -v)).collect())
                }
                SimplifiedTerm::Symbolic(s) => SimplifiedTerm::Symbolic(format!("-({s})")),
            })
        }
        Expr::Binary(op, l, r) => {
            let lt = simplify_term(l)?;
            let rt = simplify_term(r)?;
            combine(*op, lt, rt, l, r)
        }
    }
}

fn combine(
    op: BinOp,
    lt: SimplifiedTerm,
    rt: SimplifiedTerm,
    l_expr: &Expr,
    r_expr: &Expr,
) -> Result<SimplifiedTerm, ExprError> {
    if op.is_bitwise() {
        return match (&lt, &rt) {
            (SimplifiedTerm::Algebraic(lm), SimplifiedTerm::Algebraic(rm)) => {
                match (as_pure_const(lm), as_pure_const(rm)) {
                    (Some(a), Some(b)) => Ok(SimplifiedTerm::constant(fold_bitwise(op, a, b))),
                    _ => Ok(symbolic_binary(op, &lt, &rt, l_expr, r_expr)),
                }
            }
            _ => Ok(symbolic_binary(op, &lt, &rt, l_expr, r_expr)),
        };
    }

    match (lt, rt) {
        (SimplifiedTerm::Symbolic(_), _) | (_, SimplifiedTerm::Symbolic(_)) => {
            let lt2 = simplify_term(l_expr)?;
            let rt2 = simplify_term(r_expr)?;
            Ok(symbolic_binary(op, &lt2, &rt2, l_expr, r_expr))
        }
        (SimplifiedTerm::Algebraic(lm), SimplifiedTerm::Algebraic(rm)) => match op {
            BinOp::Add => Ok(SimplifiedTerm::Algebraic(algebraic_add(&lm, &rm, 1))),
            BinOp::Sub => Ok(SimplifiedTerm::Algebraic(algebraic_add(&lm, &rm, -1))),
            BinOp::Mul => Ok(SimplifiedTerm::Algebraic(algebraic_mul(&lm, &rm))),
            BinOp::Div => {
                let divisor = as_pure_const(&rm).ok_or(ExprError::DivisionByVariable)?;
                if divisor == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                let mut out = lm;
                for v in out.values_mut() {
                    *v /= divisor;
                }
                out.retain(|_, v| *v != 0);
                Ok(SimplifiedTerm::Algebraic(out))
            }
            _ => unreachable!("bitwise ops handled above"),
        },
    }
}

fn as_pure_const(map: &BTreeMap<String, i64>) -> Option<i64> {
    if map.is_empty() {
        Some(0)
    } else if map.len() == 1 && map.contains_key("") {
        Some(map[""])
    } else {
        None
    }
}

fn fold_bitwise(op: BinOp, a: i64, b: i64) -> i64 {
    match op {
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::And => a & b,
        BinOp::Shl => a << b,
        BinOp::Shr => a >> b,
        _ => unreachable!(),
    }
}

fn symbolic_binary(
    op: BinOp,
    lt: &SimplifiedTerm,
    rt: &SimplifiedTerm,
    l_expr: &Expr,
    r_expr: &Expr,
) -> SimplifiedTerm {
    let lhs = lt.render_text(l_expr);
    let rhs = rt.render_text(r_expr);
    SimplifiedTerm::Symbolic(format!("({lhs}) {} ({rhs})", op.symbol()))
}

/// `simplify(expr)`: parse-then-fold to the canonical textual form.
pub fn simplify(src: &str) -> Result<String, ExprError> {
    let expr = parse(src)?;
    let term = simplify_term(&expr)?;
    Ok(term.canonical_string())
}

// ---------------------------------------------------------------------------
// Three-address step planner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOperand {
    Lit(i64),
    Var(String),
    Temp(String),
}

impl fmt::Display for StepOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOperand::Lit(v) => write!(f, "{v}"),
            StepOperand::Var(v) => write!(f, "{v}"),
            StepOperand::Temp(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeAddressStep {
    pub op: BinOp,
    pub left: StepOperand,
    pub right: StepOperand,
    pub result: String,
}

pub struct CompilationPlan {
    pub steps: Vec<ThreeAddressStep>,
    pub result: StepOperand,
}

/// `plan_compilation(expr)`: lower an expression tree into a sequence of
/// three-address steps executed left to right, respecting the precedence
/// already baked into the parse tree.
pub fn plan_compilation(expr: &Expr) -> CompilationPlan {
    let mut steps = Vec::new();
    let mut counter = 0usize;
    let result = lower(expr, &mut steps, &mut counter);
    CompilationPlan { steps, result }
}

fn fresh_temp(counter: &mut usize) -> String {
    let name = format!("_t{counter}");
    *counter += 1;
    name
}

fn lower(expr: &Expr, steps: &mut Vec<ThreeAddressStep>, counter: &mut usize) -> StepOperand {
    match expr {
        Expr::Lit(v) => StepOperand::Lit(*v),
        Expr::Var(name) => StepOperand::Var(name.clone()),
        Expr::Index(..) | Expr::Deref(_) => StepOperand::Var(expr.to_string()),
        Expr::Neg(inner) => {
            let operand = lower(inner, steps, counter);
            let result = fresh_temp(counter);
            steps.push(ThreeAddressStep {
                op: BinOp::Sub,
                left: StepOperand::Lit(0),
                right: operand,
                result: result.clone(),
            });
            StepOperand::Temp(result)
        }
        Expr::Binary(op, l, r) => {
            let left = lower(l, steps, counter);
            let right = lower(r, steps, counter);
            let result = fresh_temp(counter);
            steps.push(ThreeAddressStep {
                op: *op,
                left,
                right,
                result: result.clone(),
            });
            StepOperand::Temp(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_of_two_constants_folds_to_decimal_string() {
        assert_eq!(simplify("0xFF & 0x0F").unwrap(), "15");
    }

    #[test]
    fn pure_arithmetic_constant_folds_fully() {
        // (10 + 20) * 3 + 10 == 100
        assert_eq!(simplify("(10+20)*3 + 10").unwrap(), "100");
    }

    #[test]
    fn addition_merges_like_monomials() {
        // a + a => 2*a
        assert_eq!(simplify("a + a").unwrap(), "2*a");
    }

    #[test]
    fn variable_times_variable_combines_into_monomial() {
        let term = simplify_term(&parse("a*b").unwrap()).unwrap();
        match term {
            SimplifiedTerm::Algebraic(map) => assert_eq!(map.get("a*b"), Some(&1)),
            _ => panic!("expected algebraic term"),
        }
    }

    #[test]
    fn division_by_variable_is_rejected() {
        let expr = parse("a / b").unwrap();
        assert_eq!(
            simplify_term(&expr).unwrap_err(),
            ExprError::DivisionByVariable
        );
    }

    #[test]
    fn bitwise_with_a_variable_operand_degrades_to_symbolic() {
        let term = simplify_term(&parse("a & 0x0F").unwrap()).unwrap();
        assert!(matches!(term, SimplifiedTerm::Symbolic(_)));
    }

    #[test]
    fn plan_compilation_emits_left_to_right_three_address_steps() {
        let expr = parse("a + b * 2").unwrap();
        let plan = plan_compilation(&expr);
        // b*2 is computed first (deeper in the tree), then a+_t0.
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].op, BinOp::Mul);
        assert_eq!(plan.steps[1].op, BinOp::Add);
        assert_eq!(plan.result, StepOperand::Temp(plan.steps[1].result.clone()));
    }

    #[test]
    fn array_index_and_deref_parse_as_atoms() {
        assert_eq!(
            parse("arr[2]").unwrap(),
            Expr::Index("arr".into(), Box::new(Expr::Lit(2)))
        );
        assert_eq!(parse("*0x1000").unwrap(), Expr::Deref(0x1000));
    }
}
