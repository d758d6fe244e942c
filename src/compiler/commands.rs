//! Source-line lexer and command recognizer.
//!
//! Each logical line of the high-level language is classified into exactly
//! one [`Command`] variant. `if`/`elif`/`else`/`endif` and `while`/`endwhile`
//! headers additionally group the lines between themselves and their
//! matching terminator into a nested block, so downstream code generation
//! only ever sees a flat statement list with structured control flow
//! already resolved.

use crate::compiler::variables::VarKind;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "==" => CompareOp::Eq,
            "!=" => CompareOp::Ne,
            ">=" => CompareOp::Ge,
            "<=" => CompareOp::Le,
            ">" => CompareOp::Gt,
            "<" => CompareOp::Lt,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub lhs: String,
    pub op: CompareOp,
    pub rhs: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhileKind {
    Conditional,
    Infinite,
    /// `while false` / a condition the compiler can prove never holds:
    /// parsed as a block but never emitted.
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    VarDef {
        name: String,
        kind: VarKind,
        volatile: bool,
        initial: Option<String>,
    },
    Free(String),
    Assign {
        target: String,
        index: Option<String>,
        expr: String,
    },
    StoreDirect {
        address: String,
        expr: String,
    },
    FreeAssembly(String),
    /// An `if cond … (elif cond …)* (else …)? endif` chain. Each branch is
    /// tried in order; `else_body` runs when every branch's condition is
    /// false (empty when there was no `else`).
    If {
        branches: Vec<(Condition, Vec<Command>)>,
        else_body: Vec<Command>,
    },
    While {
        kind: WhileKind,
        condition: Option<Condition>,
        body: Vec<Command>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {0}: unrecognized command: {1}")]
    Unrecognized(usize, String),
    #[error("line {0}: unterminated block (missing 'endif'/'endwhile')")]
    UnterminatedBlock(usize),
    #[error("line {0}: '{1}' with no open block")]
    DanglingTerminator(usize, String),
    #[error("line {0}: malformed condition: {1}")]
    BadCondition(usize, String),
    #[error("line {0}: malformed variable declaration: {1}")]
    BadVarDef(usize, String),
    #[error("line {0}: malformed #define: {1}")]
    BadMacro(usize, String),
}

/// Strip a trailing `// comment` and surrounding whitespace.
fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => line[..idx].trim(),
        None => line.trim(),
    }
}

/// Strip `#define NAME value` lines out of the source and substitute every
/// whole-identifier occurrence of `NAME` with `value` elsewhere, up to 5
/// nested passes (a macro's value may itself reference an earlier macro).
/// A `#define` line becomes a blank placeholder so line numbers in later
/// error messages still line up with the original source.
fn expand_macros(source: &str) -> Result<Vec<String>, ParseError> {
    let mut macros: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut lines: Vec<String> = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        let line_no = i + 1;
        let stripped = strip_comment(raw);
        if let Some(rest) = stripped.strip_prefix("#define") {
            let rest = rest.trim();
            let (name, value) = rest
                .split_once(char::is_whitespace)
                .map(|(n, v)| (n.trim(), v.trim()))
                .ok_or_else(|| ParseError::BadMacro(line_no, stripped.to_string()))?;
            if !is_ident(name) {
                return Err(ParseError::BadMacro(line_no, stripped.to_string()));
            }
            macros.insert(name.to_string(), value.to_string());
            lines.push(String::new());
        } else {
            lines.push(stripped.to_string());
        }
    }

    if macros.is_empty() {
        return Ok(lines);
    }
    for _ in 0..5 {
        let mut changed = false;
        for line in lines.iter_mut() {
            let expanded = substitute_identifiers(line, &macros);
            if expanded != *line {
                changed = true;
                *line = expanded;
            }
        }
        if !changed {
            break;
        }
    }
    Ok(lines)
}

fn substitute_identifiers(text: &str, macros: &std::collections::HashMap<String, String>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            match macros.get(&word) {
                Some(value) => out.push_str(value),
                None => out.push_str(&word),
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

fn parse_condition(raw: &str, line_no: usize) -> Result<Condition, ParseError> {
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(pos) = raw.find(op) {
            let lhs = raw[..pos].trim().to_string();
            let rhs = raw[pos + op.len()..].trim().to_string();
            if lhs.is_empty() || rhs.is_empty() {
                break;
            }
            return Ok(Condition {
                lhs,
                op: CompareOp::from_symbol(op).unwrap(),
                rhs,
            });
        }
    }
    Err(ParseError::BadCondition(line_no, raw.to_string()))
}

struct LineCursor<'a> {
    lines: &'a [(usize, String)],
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn peek(&self) -> Option<&(usize, String)> {
        self.lines.get(self.pos)
    }

    fn take(&mut self) -> Option<(usize, String)> {
        let item = self.lines.get(self.pos).cloned();
        self.pos += 1;
        item
    }
}

/// Parse an entire source text into a flat, structured statement list.
pub fn parse_program(source: &str) -> Result<Vec<Command>, ParseError> {
    let expanded = expand_macros(source)?;
    let lines: Vec<(usize, String)> = expanded
        .into_iter()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.is_empty())
        .collect();
    let mut cursor = LineCursor { lines: &lines, pos: 0 };
    let body = parse_block(&mut cursor, &[])?;
    if let Some((line_no, text)) = cursor.peek() {
        return Err(ParseError::DanglingTerminator(*line_no, text.clone()));
    }
    Ok(body)
}

fn is_elif_header(lower: &str) -> bool {
    lower.starts_with("elif ") || lower.starts_with("elif(")
}

fn is_block_stopper(lower: &str, stoppers: &[&str]) -> bool {
    stoppers
        .iter()
        .any(|&s| if s == "elif" { is_elif_header(lower) } else { lower == s })
}

/// Parse statements up to (but not including) the first line that matches
/// one of `stoppers`, leaving the cursor positioned on that line. An empty
/// `stoppers` list parses to end of input.
fn parse_block(cursor: &mut LineCursor, stoppers: &[&str]) -> Result<Vec<Command>, ParseError> {
    let mut commands = Vec::new();
    while let Some((line_no, text)) = cursor.peek().cloned() {
        let lower = text.to_ascii_lowercase();
        if is_block_stopper(&lower, stoppers) {
            break;
        }
        if lower == "endif" || lower == "endwhile" || lower == "else" || is_elif_header(&lower) {
            return Err(ParseError::DanglingTerminator(line_no, text));
        }
        cursor.take();
        commands.push(parse_line(line_no, &text, cursor)?);
    }
    Ok(commands)
}

fn expect_terminator(cursor: &mut LineCursor, opener_line: usize, keyword: &str) -> Result<(), ParseError> {
    match cursor.take() {
        Some((_, text)) if text.eq_ignore_ascii_case(keyword) => Ok(()),
        _ => Err(ParseError::UnterminatedBlock(opener_line)),
    }
}

fn parse_line(line_no: usize, text: &str, cursor: &mut LineCursor) -> Result<Command, ParseError> {
    let lower = text.to_ascii_lowercase();

    if lower.starts_with("if ") || lower.starts_with("if(") {
        let mut branches = Vec::new();

        let cond_text = text[2..].trim();
        let cond_text = cond_text.strip_prefix(':').unwrap_or(cond_text).trim();
        let condition = parse_condition(cond_text, line_no)?;
        let body = parse_block(cursor, &["elif", "else", "endif"])?;
        branches.push((condition, body));

        while let Some((elif_line, elif_text)) = cursor.peek().cloned() {
            let elif_lower = elif_text.to_ascii_lowercase();
            if !is_elif_header(&elif_lower) {
                break;
            }
            cursor.take();
            let rest = elif_text[4..].trim();
            let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
            let condition = parse_condition(rest, elif_line)?;
            let body = parse_block(cursor, &["elif", "else", "endif"])?;
            branches.push((condition, body));
        }

        let else_body = match cursor.peek() {
            Some((_, t)) if t.eq_ignore_ascii_case("else") => {
                cursor.take();
                parse_block(cursor, &["endif"])?
            }
            _ => Vec::new(),
        };
        expect_terminator(cursor, line_no, "endif")?;
        return Ok(Command::If { branches, else_body });
    }

    if lower.starts_with("while ") || lower == "while" || lower.starts_with("while(") {
        let rest = text[5..].trim();
        let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
        let (kind, condition) = if rest.is_empty() || rest.eq_ignore_ascii_case("true") {
            (WhileKind::Infinite, None)
        } else if rest.eq_ignore_ascii_case("false") {
            (WhileKind::Bypass, None)
        } else {
            (WhileKind::Conditional, Some(parse_condition(rest, line_no)?))
        };
        let body = parse_block(cursor, &["endwhile"])?;
        expect_terminator(cursor, line_no, "endwhile")?;
        return Ok(Command::While { kind, condition, body });
    }

    if let Some(rest) = strip_keyword(text, "free") {
        return Ok(Command::Free(rest.trim().to_string()));
    }

    if let Some(rest) = strip_keyword(text, "asm") {
        return Ok(Command::FreeAssembly(rest.trim().to_string()));
    }

    if let Some(def) = try_parse_vardef(text, line_no)? {
        return Ok(def);
    }

    if let Some(assign) = try_parse_store_direct(text) {
        return Ok(assign);
    }

    if let Some(assign) = try_parse_assign(text) {
        return Ok(assign);
    }

    Err(ParseError::Unrecognized(line_no, text.to_string()))
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    if text.len() > keyword.len()
        && text[..keyword.len()].eq_ignore_ascii_case(keyword)
        && text.as_bytes()[keyword.len()].is_ascii_whitespace()
    {
        Some(&text[keyword.len()..])
    } else {
        None
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(is_ident_char)
}

/// `[volatile] byte|uint16|byte[N] name [= expr]`
fn try_parse_vardef(text: &str, line_no: usize) -> Result<Option<Command>, ParseError> {
    let mut rest = text;
    let volatile = if let Some(stripped) = strip_keyword(rest, "volatile") {
        rest = stripped.trim();
        true
    } else {
        false
    };

    let (kind_word, after_kind) = match rest.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => return Ok(None),
    };

    let kind = if kind_word.eq_ignore_ascii_case("byte") {
        VarKind::Byte
    } else if kind_word.eq_ignore_ascii_case("uint16") {
        VarKind::Uint16
    } else if let Some(inner) = kind_word
        .strip_prefix("byte[")
        .and_then(|s| s.strip_suffix(']'))
    {
        let len: u16 = inner
            .parse()
            .map_err(|_| ParseError::BadVarDef(line_no, text.to_string()))?;
        VarKind::ByteArray(len)
    } else {
        if volatile {
            return Err(ParseError::BadVarDef(line_no, text.to_string()));
        }
        return Ok(None);
    };

    let (name_part, initial) = match after_kind.split_once('=') {
        Some((n, v)) => (n.trim(), Some(v.trim().to_string())),
        None => (after_kind.trim(), None),
    };
    if !is_ident(name_part) {
        return Err(ParseError::BadVarDef(line_no, text.to_string()));
    }
    Ok(Some(Command::VarDef {
        name: name_part.to_string(),
        kind,
        volatile,
        initial,
    }))
}

/// `*expr = expr` — store to a directly computed address.
fn try_parse_store_direct(text: &str) -> Option<Command> {
    let rest = text.strip_prefix('*')?;
    let (addr, expr) = rest.split_once('=')?;
    Some(Command::StoreDirect {
        address: addr.trim().to_string(),
        expr: expr.trim().to_string(),
    })
}

/// `name = expr` or `name[index] = expr`.
fn try_parse_assign(text: &str) -> Option<Command> {
    let (lhs, expr) = text.split_once('=')?;
    let lhs = lhs.trim();
    let expr = expr.trim();
    if lhs.is_empty() || expr.is_empty() {
        return None;
    }
    if let Some(bracket) = lhs.find('[') {
        let name = &lhs[..bracket];
        let index = lhs[bracket + 1..].strip_suffix(']')?;
        if !is_ident(name) {
            return None;
        }
        return Some(Command::Assign {
            target: name.to_string(),
            index: Some(index.trim().to_string()),
            expr: expr.to_string(),
        });
    }
    if !is_ident(lhs) {
        return None;
    }
    Some(Command::Assign {
        target: lhs.to_string(),
        index: None,
        expr: expr.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalar_vardef_with_initial_value() {
        let cmds = parse_program("byte counter = 0").unwrap();
        assert_eq!(
            cmds,
            vec![Command::VarDef {
                name: "counter".into(),
                kind: VarKind::Byte,
                volatile: false,
                initial: Some("0".into())
            }]
        );
    }

    #[test]
    fn parses_volatile_array_declaration() {
        let cmds = parse_program("volatile byte[4] buf").unwrap();
        assert_eq!(
            cmds,
            vec![Command::VarDef {
                name: "buf".into(),
                kind: VarKind::ByteArray(4),
                volatile: true,
                initial: None
            }]
        );
    }

    #[test]
    fn parses_array_element_assignment() {
        let cmds = parse_program("buf[1] = x + 1").unwrap();
        assert_eq!(
            cmds,
            vec![Command::Assign {
                target: "buf".into(),
                index: Some("1".into()),
                expr: "x + 1".into()
            }]
        );
    }

    #[test]
    fn parses_if_else_block() {
        let src = "if x == 1\n  y = 2\nelse\n  y = 3\nendif";
        let cmds = parse_program(src).unwrap();
        match &cmds[0] {
            Command::If { branches, else_body } => {
                assert_eq!(branches.len(), 1);
                assert_eq!(branches[0].0.op, CompareOp::Eq);
                assert_eq!(branches[0].1.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_elif_chain() {
        let src = "if x == 1\n  y = 1\nelif x == 2\n  y = 2\nelif x == 3\n  y = 3\nelse\n  y = 4\nendif";
        let cmds = parse_program(src).unwrap();
        match &cmds[0] {
            Command::If { branches, else_body } => {
                assert_eq!(branches.len(), 3);
                assert_eq!(branches[1].0.rhs, "2");
                assert_eq!(branches[2].0.rhs, "3");
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_with_no_else() {
        let cmds = parse_program("if x == 1\n  y = 2\nendif").unwrap();
        match &cmds[0] {
            Command::If { branches, else_body } => {
                assert_eq!(branches.len(), 1);
                assert!(else_body.is_empty());
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_infinite_and_conditional_while() {
        let forever = parse_program("while\n  x = x\nendwhile").unwrap();
        assert!(matches!(
            forever[0],
            Command::While { kind: WhileKind::Infinite, .. }
        ));
        let cond = parse_program("while x < 10\n  x = x + 1\nendwhile").unwrap();
        assert!(matches!(
            cond[0],
            Command::While { kind: WhileKind::Conditional, .. }
        ));
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let err = parse_program("if x == 1\n  y = 2").unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedBlock(1)));
    }

    #[test]
    fn dangling_endif_with_no_open_block_is_an_error() {
        let err = parse_program("y = 2\nendif").unwrap_err();
        assert!(matches!(err, ParseError::DanglingTerminator(2, _)));
    }

    #[test]
    fn using_end_instead_of_endif_is_an_error() {
        // "end" is no longer a recognized terminator at all, so it's parsed
        // as an (unrecognized) statement inside the still-open if block
        // rather than closing it.
        let err = parse_program("if x == 1\n  y = 2\nend").unwrap_err();
        assert!(matches!(err, ParseError::Unrecognized(3, _)));
    }

    #[test]
    fn define_substitutes_whole_identifiers_before_classification() {
        let cmds = parse_program("#define WIDTH 4\nbyte[WIDTH] buf").unwrap();
        assert_eq!(
            cmds,
            vec![Command::VarDef {
                name: "buf".into(),
                kind: VarKind::ByteArray(4),
                volatile: false,
                initial: None
            }]
        );
    }

    #[test]
    fn define_expands_through_a_chain_of_other_macros() {
        let cmds = parse_program("#define BASE 2\n#define WIDTH BASE\nbyte x = WIDTH").unwrap();
        assert_eq!(
            cmds,
            vec![Command::VarDef {
                name: "x".into(),
                kind: VarKind::Byte,
                volatile: false,
                initial: Some("2".into())
            }]
        );
    }

    #[test]
    fn define_does_not_touch_substrings_of_longer_identifiers() {
        let cmds = parse_program("#define X 9\nbyte x2 = 1").unwrap();
        assert_eq!(
            cmds,
            vec![Command::VarDef {
                name: "x2".into(),
                kind: VarKind::Byte,
                volatile: false,
                initial: Some("1".into())
            }]
        );
    }

    #[test]
    fn store_to_direct_address_is_distinguished_from_assignment() {
        let cmds = parse_program("*0x1000 = 5").unwrap();
        assert_eq!(
            cmds,
            vec![Command::StoreDirect {
                address: "0x1000".into(),
                expr: "5".into()
            }]
        );
    }
}
