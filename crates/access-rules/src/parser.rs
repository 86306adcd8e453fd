//! Lexer and recursive-descent parser for rule conditions.

use regex::Regex;
use serde_json::Value;

use crate::error::ParseError;
use crate::expr::{BinOp, DocPath, Expr, PathPart};

/// Nesting limit for parenthesised / unary expressions.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Slash,
    Dollar,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Eof,
}

fn lex(src: &str) -> Result<Vec<(Tok, usize)>, ParseError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;
        match c {
            c if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            '(' => out.push((Tok::LParen, start)),
            ')' => out.push((Tok::RParen, start)),
            '[' => out.push((Tok::LBracket, start)),
            ']' => out.push((Tok::RBracket, start)),
            ',' => out.push((Tok::Comma, start)),
            '.' => out.push((Tok::Dot, start)),
            '/' => out.push((Tok::Slash, start)),
            '$' => out.push((Tok::Dollar, start)),
            '+' => out.push((Tok::Plus, start)),
            '-' => out.push((Tok::Minus, start)),
            '*' => out.push((Tok::Star, start)),
            '&' | '|' | '=' => {
                if bytes.get(i + 1) != Some(&bytes[i]) {
                    return Err(ParseError::new(format!("expected '{c}{c}'"), start));
                }
                let tok = match c {
                    '&' => Tok::AndAnd,
                    '|' => Tok::OrOr,
                    _ => Tok::EqEq,
                };
                out.push((tok, start));
                i += 1;
            }
            '!' | '<' | '>' => {
                let followed_by_eq = bytes.get(i + 1) == Some(&b'=');
                let tok = match (c, followed_by_eq) {
                    ('!', true) => Tok::NotEq,
                    ('!', false) => Tok::Bang,
                    ('<', true) => Tok::Le,
                    ('<', false) => Tok::Lt,
                    ('>', true) => Tok::Ge,
                    _ => Tok::Gt,
                };
                if followed_by_eq {
                    i += 1;
                }
                out.push((tok, start));
            }
            '\'' | '"' => {
                let quote = bytes[i];
                let mut value = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(ParseError::new("unterminated string", start)),
                        Some(b) if *b == quote => break,
                        Some(b'\\') => {
                            let escaped = src[i + 1..]
                                .chars()
                                .next()
                                .ok_or_else(|| ParseError::new("unterminated string", start))?;
                            value.push(escaped);
                            i += 1 + escaped.len_utf8();
                        }
                        Some(_) => {
                            // Copy one UTF-8 character.
                            let ch = src[i..]
                                .chars()
                                .next()
                                .ok_or_else(|| ParseError::new("invalid utf-8", i))?;
                            value.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                out.push((Tok::Str(value), start));
            }
            c if c.is_ascii_digit() => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let n = src[start..i]
                    .parse::<i64>()
                    .map_err(|_| ParseError::new("integer literal out of range", start))?;
                out.push((Tok::Int(n), start));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                out.push((Tok::Ident(src[start..i].to_string()), start));
                continue;
            }
            other => {
                return Err(ParseError::new(
                    format!("unexpected character '{other}'"),
                    start,
                ))
            }
        }
        i += 1;
    }

    out.push((Tok::Eof, src.len()));
    Ok(out)
}

/// Parse a condition expression.
pub fn parse_condition(src: &str) -> Result<Expr, ParseError> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        Tok::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected trailing token {other:?}"))),
    }
}

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), ParseError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.offset())
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Tok::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while self.eat(&Tok::AndAnd) {
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Tok::Bang) {
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Tok::EqEq => BinOp::Eq,
            Tok::NotEq => BinOp::Ne,
            Tok::Lt => BinOp::Lt,
            Tok::Le => BinOp::Le,
            Tok::Gt => BinOp::Gt,
            Tok::Ge => BinOp::Ge,
            Tok::Ident(kw) if kw == "in" => BinOp::In,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_postfix()?;
        while self.eat(&Tok::Star) {
            let rhs = self.parse_postfix()?;
            lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                let name = match self.advance() {
                    Tok::Ident(name) => name,
                    other => return Err(self.error(format!("expected field name, found {other:?}"))),
                };
                if self.eat(&Tok::LParen) {
                    expr = self.parse_method(expr, &name)?;
                } else {
                    expr = Expr::Field(Box::new(expr), name);
                }
            } else if self.eat(&Tok::LBracket) {
                self.enter()?;
                let index = self.parse_or()?;
                self.depth -= 1;
                self.expect(Tok::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    /// Method call after `target.name(`; consumes through `)`.
    fn parse_method(&mut self, target: Expr, name: &str) -> Result<Expr, ParseError> {
        match name {
            "matches" => {
                let at = self.offset();
                let pattern = match self.advance() {
                    Tok::Str(s) => s,
                    _ => return Err(ParseError::new("matches() takes a string literal", at)),
                };
                self.expect(Tok::RParen)?;
                let regex = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| ParseError::new(format!("invalid regex: {e}"), at))?;
                Ok(Expr::Matches(Box::new(target), regex))
            }
            "size" => {
                self.expect(Tok::RParen)?;
                Ok(Expr::Size(Box::new(target)))
            }
            other => Err(self.error(format!("unknown method '{other}'"))),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let at = self.offset();
        match self.advance() {
            Tok::Int(n) => Ok(Expr::Literal(Value::from(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Minus => match self.advance() {
                Tok::Int(n) => Ok(Expr::Literal(Value::from(-n))),
                _ => Err(ParseError::new("expected integer after '-'", at)),
            },
            Tok::LParen => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        self.enter()?;
                        items.push(self.parse_or()?);
                        self.depth -= 1;
                        if self.eat(&Tok::RBracket) {
                            break;
                        }
                        self.expect(Tok::Comma)?;
                    }
                }
                Ok(Expr::List(items))
            }
            Tok::Ident(name) => match name.as_str() {
                "null" => Ok(Expr::Literal(Value::Null)),
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "in" => Err(ParseError::new("unexpected 'in'", at)),
                "get" | "exists" if self.peek() == &Tok::LParen => {
                    self.advance();
                    let path = self.parse_doc_path()?;
                    self.expect(Tok::RParen)?;
                    Ok(if name == "get" {
                        Expr::Get(path)
                    } else {
                        Expr::Exists(path)
                    })
                }
                "role" if self.peek() == &Tok::LParen => {
                    self.advance();
                    self.enter()?;
                    let uid = self.parse_or()?;
                    self.depth -= 1;
                    self.expect(Tok::RParen)?;
                    Ok(Expr::Role(Box::new(uid)))
                }
                _ if self.peek() == &Tok::LParen => {
                    Err(ParseError::new(format!("unknown function '{name}'"), at))
                }
                _ => Ok(Expr::Var(name)),
            },
            other => Err(ParseError::new(format!("unexpected token {other:?}"), at)),
        }
    }

    fn parse_doc_path(&mut self) -> Result<DocPath, ParseError> {
        let mut parts = Vec::new();
        while self.eat(&Tok::Slash) {
            let at = self.offset();
            let part = match self.advance() {
                Tok::Ident(s) => PathPart::Literal(s),
                Tok::Int(n) => PathPart::Literal(n.to_string()),
                Tok::Dollar => {
                    self.expect(Tok::LParen)?;
                    self.enter()?;
                    let inner = self.parse_or()?;
                    self.depth -= 1;
                    self.expect(Tok::RParen)?;
                    PathPart::Interp(inner)
                }
                other => {
                    return Err(ParseError::new(
                        format!("expected path segment, found {other:?}"),
                        at,
                    ))
                }
            };
            parts.push(part);
        }
        if parts.is_empty() {
            return Err(self.error("document path must start with '/'"));
        }
        Ok(DocPath(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Expr {
        parse_condition(src).unwrap_or_else(|e| panic!("failed to parse {src:?}: {e}"))
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        match parse("a || b && c") {
            Expr::Or(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Var(ref n) if n == "a"));
                assert!(matches!(*rhs, Expr::And(..)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn field_chain_and_comparison() {
        match parse("request.auth.uid == userId") {
            Expr::Binary(BinOp::Eq, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Field(_, ref f) if f == "uid"));
                assert!(matches!(*rhs, Expr::Var(ref n) if n == "userId"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn in_operator_with_list() {
        match parse("role(request.auth.uid) in ['teacher', 'admin']") {
            Expr::Binary(BinOp::In, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Role(_)));
                assert!(matches!(*rhs, Expr::List(ref items) if items.len() == 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn get_with_interpolated_path() {
        let expr = parse("request.auth.uid in get(/studyGroups/$(groupId)).data.members");
        assert_eq!(
            expr.free_vars().into_iter().collect::<Vec<_>>(),
            vec!["groupId".to_string(), "request".to_string()]
        );
        assert_eq!(expr.lookup_sites(), 1);
    }

    #[test]
    fn arithmetic_product() {
        match parse("request.resource.size < 5 * 1024 * 1024") {
            Expr::Binary(BinOp::Lt, _, rhs) => {
                assert!(matches!(*rhs, Expr::Binary(BinOp::Mul, ..)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn matches_compiles_anchored_regex() {
        match parse("request.resource.contentType.matches('image/.*')") {
            Expr::Matches(_, re) => {
                assert!(re.is_match("image/png"));
                assert!(!re.is_match("text/image/png"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negation_and_parentheses() {
        assert!(matches!(parse("!(a == b)"), Expr::Not(_)));
        assert!(matches!(parse("!!a"), Expr::Not(_)));
    }

    #[test]
    fn string_escapes() {
        match parse(r#"name == 'it\'s'"#) {
            Expr::Binary(_, _, rhs) => {
                assert!(matches!(*rhs, Expr::Literal(Value::String(ref s)) if s == "it's"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn escaped_multibyte_character() {
        match parse("name == '\\é' && tag == 'ü'") {
            Expr::And(lhs, _) => match *lhs {
                Expr::Binary(_, _, rhs) => {
                    assert!(matches!(*rhs, Expr::Literal(Value::String(ref s)) if s == "é"));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_condition("name == '\\é").is_err());
        assert!(parse_condition("name == '\\").is_err());
    }

    #[test]
    fn syntax_errors_carry_offsets() {
        let err = parse_condition("a == ").unwrap_err();
        assert!(err.message.contains("unexpected token"), "{err}");
        assert_eq!(err.offset, 5);

        assert!(parse_condition("a & b").is_err());
        assert!(parse_condition("a = b").is_err());
        assert!(parse_condition("'open").is_err());
        assert!(parse_condition("a b").is_err());
        assert!(parse_condition("x.matches(y)").is_err());
        assert!(parse_condition("x.matches('[')").is_err());
        assert!(parse_condition("x.frobnicate()").is_err());
        assert!(parse_condition("eval('x')").is_err());
        assert!(parse_condition("get(users)").is_err());
        assert!(parse_condition("a # b").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}a{}", "(".repeat(100), ")".repeat(100));
        let err = parse_condition(&src).unwrap_err();
        assert!(err.message.contains("too deeply"));
    }
}
