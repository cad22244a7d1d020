//! Router rule parsing.
//!
//! Grammar:
//! ```text
//! expr  := and ( "||" and )*
//! and   := unary ( "&&" unary )*
//! unary := "!" unary | "(" expr ")" | call
//! call  := Name "(" string ( "," string )* ")"
//! ```
//! Strings are quoted with backticks or double quotes. Supported calls:
//! `Host`, `Path`, `PathPrefix`, `Method`, `Headers(name, value)`.

use axum::http::{HeaderName, Method};
use thiserror::Error;

use crate::routing::matcher::{
    AndMatcher, HeaderMatcher, HostMatcher, Matcher, MethodMatcher, NotMatcher, OrMatcher,
    PathMatcher, PathPrefixMatcher,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid rule at offset {offset}: {message}")]
pub struct RuleError {
    pub offset: usize,
    pub message: String,
}

impl RuleError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, RuleError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '!' => Token::Not,
            '&' | '|' => {
                match chars.next() {
                    Some((_, next)) if next == c => {}
                    _ => return Err(RuleError::new(offset, format!("expected `{c}{c}`"))),
                }
                if c == '&' {
                    Token::And
                } else {
                    Token::Or
                }
            }
            '`' | '"' => {
                let mut value = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    value.push(next);
                }
                if !closed {
                    return Err(RuleError::new(offset, "unterminated string"));
                }
                Token::Str(value)
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                Token::Ident(ident)
            }
            other => {
                return Err(RuleError::new(offset, format!("unexpected character `{other}`")))
            }
        };
        tokens.push((offset, token));
    }

    Ok(tokens)
}

/// Deepest `!` / parenthesis nesting accepted in a rule.
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), RuleError> {
        let offset = self.offset();
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(RuleError::new(
                offset,
                format!("expected {:?}, found {:?}", expected, t),
            )),
            None => Err(RuleError::new(offset, format!("expected {:?}", expected))),
        }
    }

    fn expr(&mut self) -> Result<Box<dyn Matcher>, RuleError> {
        let mut terms = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            terms.push(self.and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Box::new(OrMatcher::new(terms))
        })
    }

    fn and(&mut self) -> Result<Box<dyn Matcher>, RuleError> {
        let mut terms = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Box::new(AndMatcher::new(terms))
        })
    }

    fn unary(&mut self) -> Result<Box<dyn Matcher>, RuleError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Not) => {
                self.descend(offset)?;
                let inner = self.unary();
                self.depth -= 1;
                Ok(Box::new(NotMatcher::new(inner?)))
            }
            Some(Token::LParen) => {
                self.descend(offset)?;
                let inner = self.expr();
                self.depth -= 1;
                let inner = inner?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.call(offset, &name),
            Some(t) => Err(RuleError::new(offset, format!("unexpected {:?}", t))),
            None => Err(RuleError::new(offset, "unexpected end of rule")),
        }
    }

    fn descend(&mut self, offset: usize) -> Result<(), RuleError> {
        if self.depth >= MAX_DEPTH {
            return Err(RuleError::new(offset, "rule nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn call(&mut self, offset: usize, name: &str) -> Result<Box<dyn Matcher>, RuleError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        loop {
            let arg_offset = self.offset();
            match self.next() {
                Some(Token::Str(s)) => args.push(s),
                _ => return Err(RuleError::new(arg_offset, "expected a quoted argument")),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(RuleError::new(self.offset(), "expected `,` or `)`")),
            }
        }
        build_matcher(offset, name, args)
    }
}

fn build_matcher(offset: usize, name: &str, args: Vec<String>) -> Result<Box<dyn Matcher>, RuleError> {
    match name {
        "Host" => Ok(Box::new(HostMatcher::new(args))),
        "Path" => Ok(Box::new(PathMatcher::new(args))),
        "PathPrefix" => Ok(Box::new(PathPrefixMatcher::new(args))),
        "Method" => {
            let methods = args
                .iter()
                .map(|m| Method::from_bytes(m.to_uppercase().as_bytes()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RuleError::new(offset, format!("invalid method: {e}")))?;
            Ok(Box::new(MethodMatcher::new(methods)))
        }
        "Headers" => {
            let [header, value]: [String; 2] = args
                .try_into()
                .map_err(|_| RuleError::new(offset, "Headers takes exactly two arguments"))?;
            let header = HeaderName::from_bytes(header.as_bytes())
                .map_err(|e| RuleError::new(offset, format!("invalid header name: {e}")))?;
            Ok(Box::new(HeaderMatcher::new(header, value)))
        }
        other => Err(RuleError::new(offset, format!("unknown matcher `{other}`"))),
    }
}

/// Parse a rule expression into a matcher.
pub fn parse_rule(rule: &str) -> Result<Box<dyn Matcher>, RuleError> {
    let tokens = tokenize(rule)?;
    if tokens.is_empty() {
        return Err(RuleError::new(0, "empty rule"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: rule.len(),
        depth: 0,
    };
    let matcher = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(RuleError::new(parser.offset(), "trailing input"));
    }
    Ok(matcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn req(method: &str, host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn single_call() {
        let m = parse_rule("Path(`/ok`)").unwrap();
        assert!(m.matches(&req("GET", "a", "/ok")));
        assert!(!m.matches(&req("GET", "a", "/ok/more")));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let m = parse_rule("Host(`a.com`) && PathPrefix(`/api`) || Path(`/health`)").unwrap();
        assert!(m.matches(&req("GET", "a.com", "/api/x")));
        assert!(m.matches(&req("GET", "b.com", "/health")));
        assert!(!m.matches(&req("GET", "b.com", "/api/x")));
    }

    #[test]
    fn parentheses_and_negation() {
        let m = parse_rule(r#"Method("get", "HEAD") && !(PathPrefix(`/admin`))"#).unwrap();
        assert!(m.matches(&req("GET", "a", "/")));
        assert!(m.matches(&req("HEAD", "a", "/")));
        assert!(!m.matches(&req("POST", "a", "/")));
        assert!(!m.matches(&req("GET", "a", "/admin/users")));
    }

    #[test]
    fn multiple_hosts() {
        let m = parse_rule("Host(`a.com`, `b.com`)").unwrap();
        assert!(m.matches(&req("GET", "b.com", "/")));
        assert!(!m.matches(&req("GET", "c.com", "/")));
    }

    #[test]
    fn headers_matcher() {
        let m = parse_rule("Headers(`X-Env`, `prod`)").unwrap();
        let r = Request::builder()
            .header("x-env", "prod")
            .body(Body::empty())
            .unwrap();
        assert!(m.matches(&r));
        assert!(parse_rule("Headers(`X-Env`)").is_err());
    }

    #[test]
    fn rejects_malformed_rules() {
        assert!(parse_rule("").is_err());
        assert!(parse_rule("Path(`/a`").is_err());
        assert!(parse_rule("Path(`/a`) &").is_err());
        assert!(parse_rule("Path(/a)").is_err());
        assert!(parse_rule("Nope(`x`)").is_err());
        assert!(parse_rule("Path(`/a`) Path(`/b`)").is_err());
        assert_eq!(parse_rule("Path(`/a").unwrap_err().offset, 5);

        let negations = format!("{}Path(`/`)", "!".repeat(10_000));
        assert_eq!(parse_rule(&negations).unwrap_err().message, "rule nested too deeply");
        let parens = format!("{}Path(`/`){}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(parse_rule(&parens).unwrap_err().message, "rule nested too deeply");
    }

    #[test]
    fn moderate_nesting_is_accepted() {
        let rule = format!("{}Path(`/a`){}", "(".repeat(32), ")".repeat(32));
        assert!(parse_rule(&rule).unwrap().matches(&req("GET", "x", "/a")));
        let rule = format!("{}Path(`/a`)", "!".repeat(64));
        assert!(parse_rule(&rule).unwrap().matches(&req("GET", "x", "/a")));
    }
}
