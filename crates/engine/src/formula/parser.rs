// Formula parser - converts formula strings into AST
// Supports: numbers, cell refs (A1, $A$1), function calls (max, min), basic math (+, -, *, /)

use thiserror::Error;

use crate::cell_id::{col_to_letters, CellId};

/// Expression tree produced by the parser.
///
/// Operators are function applications: `A1+1` is `App { func: "+", args: [A1, 1] }`
/// and unary minus is `App { func: "-", args: [x] }`. The evaluator dispatches
/// on name and arity.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Ref(CellRef),
    App { func: String, args: Vec<Expr> },
}

/// Cell reference as written in a formula.
///
/// Coordinates are those of the referenced cell for the base cell the formula
/// was parsed against. `col_abs`/`row_abs` are true for `$`-marked components,
/// which stay fixed when the formula is copied elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub col: usize,
    pub row: usize,
    pub col_abs: bool,
    pub row_abs: bool,
}

impl CellRef {
    /// A fully relative reference to `cell`.
    pub fn relative(cell: CellId) -> Self {
        Self { col: cell.col, row: cell.row, col_abs: false, row_abs: false }
    }

    /// The cell this reference points at.
    pub fn cell_id(&self) -> CellId {
        CellId::new(self.row, self.col)
    }
}

/// A formula that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the formula text.
    pub offset: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self { message: message.into(), offset }
    }
}

/// Parse a formula string into an expression tree.
///
/// A leading `=` is optional. Function names are case-insensitive and are
/// stored lower-cased.
pub fn parse(formula: &str) -> Result<Expr, ParseError> {
    let (input, base) = match formula.find(|c: char| !c.is_whitespace()) {
        Some(start) if formula[start..].starts_with('=') => (&formula[start + 1..], start + 1),
        _ => (formula, 0),
    };

    let tokens = tokenize(input, base)?;
    if tokens.is_empty() {
        return Err(ParseError::new("Empty formula", formula.len()));
    }

    let end = formula.len();
    let (node, pos) = Parser::new(&tokens, end).parse_add_sub(0)?;
    if pos < tokens.len() {
        return Err(ParseError::new("Unexpected token", tokens[pos].offset));
    }
    Ok(node.expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    CellRef(CellRef),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(input: &str, base: usize) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        let offset = base + i;
        let simple = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(Spanned { token, offset });
            chars.next();
            continue;
        }

        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Optional exponent: e5, E-3, e+2
                if let Some(&(_, e)) = chars.peek() {
                    if e == 'e' || e == 'E' {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        let mut exp = String::from("e");
                        if let Some(&(_, sign)) = lookahead.peek() {
                            if sign == '+' || sign == '-' {
                                exp.push(sign);
                                lookahead.next();
                            }
                        }
                        if matches!(lookahead.peek(), Some(&(_, d)) if d.is_ascii_digit()) {
                            while let Some(&(_, d)) = lookahead.peek() {
                                if d.is_ascii_digit() {
                                    exp.push(d);
                                    lookahead.next();
                                } else {
                                    break;
                                }
                            }
                            num_str.push_str(&exp);
                            chars = lookahead;
                        }
                    }
                }
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid number: {}", num_str), offset))?;
                tokens.push(Spanned { token: Token::Number(num), offset });
            }
            c if c.is_ascii_alphabetic() || c == '$' => {
                let mut ident = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                // A name directly followed by '(' is always a function call,
                // even if it looks like a cell reference (e.g. log10).
                let mut lookahead = chars.clone();
                while matches!(lookahead.peek(), Some(&(_, ch)) if ch.is_whitespace()) {
                    lookahead.next();
                }
                let is_call = matches!(lookahead.peek(), Some(&(_, '(')));

                if !is_call {
                    if let Some(cell_ref) = try_parse_cell_ref(&ident) {
                        tokens.push(Spanned { token: Token::CellRef(cell_ref), offset });
                        continue;
                    }
                }
                if ident.contains('$') {
                    return Err(ParseError::new(format!("Invalid cell reference: {}", ident), offset));
                }
                tokens.push(Spanned { token: Token::Ident(ident.to_ascii_lowercase()), offset });
            }
            _ => return Err(ParseError::new(format!("Unexpected character: {}", c), offset)),
        }
    }

    Ok(tokens)
}

fn try_parse_cell_ref(s: &str) -> Option<CellRef> {
    let col_abs = s.starts_with('$');
    let rest = if col_abs { &s[1..] } else { s };

    let letters_end = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
    if letters_end == 0 {
        return None;
    }
    let after_letters = &rest[letters_end..];
    let row_abs = after_letters.starts_with('$');
    let digits = if row_abs { &after_letters[1..] } else { after_letters };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let cell = CellId::parse(&format!("{}{}", &rest[..letters_end], digits)).ok()?;
    Some(CellRef { col: cell.col, row: cell.row, col_abs, row_abs })
}

/// Deepest expression tree a formula may produce. Evaluation, printing and
/// reference walks recurse once per level.
pub const MAX_DEPTH: usize = 1024;

/// Deepest bracket, unary or call nesting the parser will descend into.
pub const MAX_NESTING: usize = 256;

const TOO_DEEP: &str = "Formula nested too deeply";

/// Parsed subtree with its height.
struct Node {
    expr: Expr,
    depth: usize,
}

impl Node {
    fn leaf(expr: Expr) -> Self {
        Self { expr, depth: 1 }
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    /// Offset reported for errors at the end of input.
    end: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], end: usize) -> Self {
        Self { tokens, end, nesting: 0 }
    }

    fn token(&self, pos: usize) -> Option<&'a Token> {
        self.tokens.get(pos).map(|t| &t.token)
    }

    fn offset(&self, pos: usize) -> usize {
        self.tokens.get(pos).map_or(self.end, |t| t.offset)
    }

    fn enter(&mut self, pos: usize) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ParseError::new(TOO_DEEP, self.offset(pos)));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn app(&self, func: &str, args: Vec<Node>, pos: usize) -> Result<Node, ParseError> {
        let depth = args.iter().map(|a| a.depth).max().unwrap_or(0) + 1;
        if depth > MAX_DEPTH {
            return Err(ParseError::new(TOO_DEEP, self.offset(pos)));
        }
        let args = args.into_iter().map(|a| a.expr).collect();
        Ok(Node { expr: Expr::App { func: func.to_string(), args }, depth })
    }

    fn parse_add_sub(&mut self, pos: usize) -> Result<(Node, usize), ParseError> {
        let (mut left, mut pos) = self.parse_mul_div(pos)?;

        loop {
            let func = match self.token(pos) {
                Some(Token::Plus) => "+",
                Some(Token::Minus) => "-",
                _ => break,
            };
            let (right, new_pos) = self.parse_mul_div(pos + 1)?;
            left = self.app(func, vec![left, right], pos)?;
            pos = new_pos;
        }

        Ok((left, pos))
    }

    fn parse_mul_div(&mut self, pos: usize) -> Result<(Node, usize), ParseError> {
        let (mut left, mut pos) = self.parse_unary(pos)?;

        loop {
            let func = match self.token(pos) {
                Some(Token::Star) => "*",
                Some(Token::Slash) => "/",
                _ => break,
            };
            let (right, new_pos) = self.parse_unary(pos + 1)?;
            left = self.app(func, vec![left, right], pos)?;
            pos = new_pos;
        }

        Ok((left, pos))
    }

    fn parse_unary(&mut self, pos: usize) -> Result<(Node, usize), ParseError> {
        match self.token(pos) {
            Some(Token::Minus) => {
                self.enter(pos)?;
                let (operand, next) = self.parse_unary(pos + 1)?;
                self.leave();
                Ok((self.app("-", vec![operand], pos)?, next))
            }
            // Unary plus is a no-op
            Some(Token::Plus) => {
                self.enter(pos)?;
                let parsed = self.parse_unary(pos + 1)?;
                self.leave();
                Ok(parsed)
            }
            _ => self.parse_primary(pos),
        }
    }

    fn parse_primary(&mut self, pos: usize) -> Result<(Node, usize), ParseError> {
        let Some(token) = self.token(pos) else {
            return Err(ParseError::new("Unexpected end of expression", self.end));
        };

        match token {
            Token::Number(n) => Ok((Node::leaf(Expr::Number(*n)), pos + 1)),
            Token::CellRef(cell_ref) => Ok((Node::leaf(Expr::Ref(*cell_ref)), pos + 1)),
            Token::Ident(name) => {
                if !matches!(self.token(pos + 1), Some(Token::LParen)) {
                    return Err(ParseError::new(format!("Unknown identifier: {}", name), self.offset(pos)));
                }
                self.enter(pos)?;
                let (args, new_pos) = self.parse_function_args(pos + 2)?;
                self.leave();
                Ok((self.app(name, args, pos)?, new_pos))
            }
            Token::LParen => {
                self.enter(pos)?;
                let (node, pos) = self.parse_add_sub(pos + 1)?;
                self.leave();
                match self.token(pos) {
                    Some(Token::RParen) => Ok((node, pos + 1)),
                    Some(_) => Err(ParseError::new("Expected closing parenthesis", self.offset(pos))),
                    None => Err(ParseError::new("Missing closing parenthesis", self.end)),
                }
            }
            _ => Err(ParseError::new("Unexpected token", self.offset(pos))),
        }
    }

    fn parse_function_args(&mut self, pos: usize) -> Result<(Vec<Node>, usize), ParseError> {
        let mut args = Vec::new();
        let mut pos = pos;

        // Handle empty call max()
        if let Some(Token::RParen) = self.token(pos) {
            return Ok((args, pos + 1));
        }

        loop {
            let (arg, new_pos) = self.parse_add_sub(pos)?;
            args.push(arg);
            pos = new_pos;

            match self.token(pos) {
                Some(Token::RParen) => return Ok((args, pos + 1)),
                Some(Token::Comma) => pos += 1,
                Some(_) => {
                    return Err(ParseError::new(
                        "Expected comma or closing parenthesis",
                        self.offset(pos),
                    ))
                }
                None => return Err(ParseError::new("Missing closing parenthesis in function call", self.end)),
            }
        }
    }
}

// =============================================================================
// Formula Printing - Convert Expr back to string
// =============================================================================

const PREC_ADD: u8 = 1;
const PREC_MUL: u8 = 2;
const PREC_UNARY: u8 = 3;
const PREC_ATOM: u8 = 4;

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Number(n) if *n < 0.0 => PREC_UNARY,
        Expr::Number(_) | Expr::Ref(_) => PREC_ATOM,
        Expr::App { func, args } => match (func.as_str(), args.len()) {
            ("+" | "-", 2) => PREC_ADD,
            ("*" | "/", 2) => PREC_MUL,
            ("-", 1) => PREC_UNARY,
            _ => PREC_ATOM,
        },
    }
}

/// Format an expression as formula text (without a leading '=').
///
/// Parentheses are emitted only where needed to preserve the tree shape, so
/// `parse(format_expr(e)) == e` for any parsed `e`.
pub fn format_expr(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => format_number(*n),
        Expr::Ref(cell_ref) => format_cell_ref(cell_ref),
        Expr::App { func, args } => {
            let prec = precedence(expr);
            match (func.as_str(), args.as_slice()) {
                ("+" | "-" | "*" | "/", [left, right]) => {
                    let left_str = wrap(left, precedence(left) < prec);
                    // Left-associative: an equal-precedence right operand needs parens
                    let right_str = wrap(right, precedence(right) <= prec);
                    format!("{}{}{}", left_str, func, right_str)
                }
                ("-", [operand]) => format!("-{}", wrap(operand, precedence(operand) < PREC_UNARY)),
                _ => {
                    let args_str: Vec<String> = args.iter().map(format_expr).collect();
                    format!("{}({})", func, args_str.join(","))
                }
            }
        }
    }
}

fn wrap(expr: &Expr, parens: bool) -> String {
    if parens {
        format!("({})", format_expr(expr))
    } else {
        format_expr(expr)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Format a cell reference in A1 notation, keeping `$` markers.
pub fn format_cell_ref(cell_ref: &CellRef) -> String {
    format!(
        "{}{}{}{}",
        if cell_ref.col_abs { "$" } else { "" },
        col_to_letters(cell_ref.col),
        if cell_ref.row_abs { "$" } else { "" },
        cell_ref.row + 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Expr {
        Expr::Number(n)
    }

    fn cref(text: &str) -> Expr {
        Expr::Ref(CellRef::relative(CellId::parse(text).unwrap()))
    }

    fn app(func: &str, args: Vec<Expr>) -> Expr {
        Expr::App { func: func.to_string(), args }
    }

    #[test]
    fn test_parse_number_with_or_without_equals() {
        assert_eq!(parse("5").unwrap(), num(5.0));
        assert_eq!(parse("=5").unwrap(), num(5.0));
        assert_eq!(parse("  = 2.5 ").unwrap(), num(2.5));
        assert_eq!(parse("1e3").unwrap(), num(1000.0));
        assert_eq!(parse("2E-1").unwrap(), num(0.2));
    }

    #[test]
    fn test_parse_precedence() {
        // 1+2*3 => +(1, *(2,3))
        let expr = parse("=1+2*3").unwrap();
        assert_eq!(expr, app("+", vec![num(1.0), app("*", vec![num(2.0), num(3.0)])]));

        // (1+2)*3 => *(+(1,2), 3)
        let expr = parse("=(1+2)*3").unwrap();
        assert_eq!(expr, app("*", vec![app("+", vec![num(1.0), num(2.0)]), num(3.0)]));
    }

    #[test]
    fn test_parse_left_associative() {
        // 8-2-1 => -(-(8,2),1)
        let expr = parse("8-2-1").unwrap();
        assert_eq!(expr, app("-", vec![app("-", vec![num(8.0), num(2.0)]), num(1.0)]));
    }

    #[test]
    fn test_parse_unary_minus_is_arity_one() {
        let expr = parse("=-a1").unwrap();
        assert_eq!(expr, app("-", vec![cref("A1")]));

        let expr = parse("=2*-3").unwrap();
        assert_eq!(expr, app("*", vec![num(2.0), app("-", vec![num(3.0)])]));
    }

    #[test]
    fn test_parse_refs_case_insensitive() {
        assert_eq!(parse("=b2").unwrap(), cref("B2"));
        assert_eq!(parse("=B2").unwrap(), cref("B2"));
    }

    #[test]
    fn test_parse_absolute_refs() {
        let Expr::Ref(r) = parse("=$A$1").unwrap() else { panic!("expected ref") };
        assert!(r.col_abs && r.row_abs);

        let Expr::Ref(r) = parse("=$a1").unwrap() else { panic!("expected ref") };
        assert!(r.col_abs && !r.row_abs);

        let Expr::Ref(r) = parse("=a$1").unwrap() else { panic!("expected ref") };
        assert!(!r.col_abs && r.row_abs);
    }

    #[test]
    fn test_parse_function_calls() {
        let expr = parse("=max(a1, 2, min(b1, 3))").unwrap();
        assert_eq!(
            expr,
            app("max", vec![cref("A1"), num(2.0), app("min", vec![cref("B1"), num(3.0)])])
        );

        // Function names are lower-cased
        assert_eq!(parse("=MAX(1)").unwrap(), app("max", vec![num(1.0)]));
        // Empty argument list
        assert_eq!(parse("=max()").unwrap(), app("max", vec![]));
    }

    #[test]
    fn test_parse_name_before_paren_is_function() {
        assert_eq!(parse("=log10(1)").unwrap(), app("log10", vec![num(1.0)]));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["=(", "=", "", "   ", "=1+", "=(1", "=1 2", "=max(1,", "=foo", "=1 # 2", "=$1", "=a1)"] {
            assert!(parse(bad).is_err(), "{bad:?} should fail to parse");
        }
    }

    #[test]
    fn test_parse_error_offset() {
        let err = parse("=1 # 2").unwrap_err();
        assert_eq!(err.offset, 3);
        assert!(err.message.contains('#'));

        let err = parse("=(").unwrap_err();
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn test_parse_rejects_deep_nesting() {
        let parens = format!("={}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let err = parse(&parens).unwrap_err();
        assert_eq!(err.message, "Formula nested too deeply");

        let negations = format!("={}1", "-".repeat(100_000));
        assert_eq!(parse(&negations).unwrap_err().message, "Formula nested too deeply");

        let calls = format!("={}1{}", "max(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(parse(&calls).unwrap_err().message, "Formula nested too deeply");

        let chain = format!("=1{}", "+1".repeat(100_000));
        assert_eq!(parse(&chain).unwrap_err().message, "Formula nested too deeply");
    }

    #[test]
    fn test_parse_accepts_nesting_within_limits() {
        let depth = MAX_NESTING - 1;
        let parens = format!("={}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(parse(&parens).unwrap(), Expr::Number(1.0));

        let chain = format!("=A1{}", "+A1".repeat(MAX_DEPTH - 2));
        assert!(parse(&chain).is_ok());
    }

    #[test]
    fn test_format_minimal_parens() {
        for (input, expected) in [
            ("=a1+1", "A1+1"),
            ("=(a1+1)*2", "(A1+1)*2"),
            ("=a1+(b1*2)", "A1+B1*2"),
            ("=8-(2-1)", "8-(2-1)"),
            ("=(8-2)-1", "8-2-1"),
            ("=-(a1+1)", "-(A1+1)"),
            ("=--a1", "--A1"),
            ("=max(a1 , 2.5)", "max(A1,2.5)"),
            ("=$a$1/b$2", "$A$1/B$2"),
        ] {
            assert_eq!(format_expr(&parse(input).unwrap()), expected, "formatting {input}");
        }
    }

    #[test]
    fn test_format_reparses_to_same_tree() {
        for input in ["=1+2*3-4/5", "=-(a1-b2)/c3", "=max(1,min(a1,b1)*2)-(3-4)", "=a1/(b1/c1)"] {
            let expr = parse(input).unwrap();
            assert_eq!(parse(&format_expr(&expr)).unwrap(), expr, "round trip for {input}");
        }
    }
}
