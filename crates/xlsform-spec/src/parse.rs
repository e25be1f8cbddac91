use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::expr::Expr;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:(?P<ref>\$\{[A-Za-z_][A-Za-z0-9_.\-]*\})|(?P<str>'[^']*'|"[^"]*")|(?P<num>-?[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?)|(?P<op>!=|<=|>=|=|<|>)|(?P<lparen>\()|(?P<rparen>\))|(?P<comma>,)|(?P<word>[A-Za-z_][A-Za-z0-9_\-]*))"#,
    )
    .expect("token pattern is valid")
});

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("reference pattern is valid")
});

/// Failure to read an XLSForm expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expression is empty")]
    Empty,
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedCharacter { offset: usize, found: char },
    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        offset: usize,
        found: String,
        expected: &'static str,
    },
    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("unsupported function '{name}' at offset {offset}")]
    UnsupportedFunction { name: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Reference(String),
    Str(String),
    Num(Value),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Word(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Reference(name) => format!("reference ${{{}}}", name),
            Token::Str(text) => format!("string '{}'", text),
            Token::Num(value) => format!("number {}", value),
            Token::Op(op) => format!("operator '{}'", op),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
            Token::Word(word) => format!("'{}'", word),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    while offset < input.len() {
        let rest = &input[offset..];
        let trimmed = rest.trim_start();
        offset += rest.len() - trimmed.len();
        if trimmed.is_empty() {
            break;
        }
        let captures = TOKEN
            .captures(trimmed)
            .ok_or_else(|| ParseError::UnexpectedCharacter {
                offset,
                found: trimmed.chars().next().unwrap_or(' '),
            })?;
        let whole = captures.get(0).map(|m| m.as_str()).unwrap_or_default();
        let token = if let Some(m) = captures.name("ref") {
            let text = m.as_str();
            Token::Reference(text[2..text.len() - 1].to_string())
        } else if let Some(m) = captures.name("str") {
            let text = m.as_str();
            Token::Str(text[1..text.len() - 1].to_string())
        } else if let Some(m) = captures.name("num") {
            Token::Num(parse_number(m.as_str()))
        } else if let Some(m) = captures.name("op") {
            Token::Op(match m.as_str() {
                "!=" => "!=",
                "<=" => "<=",
                ">=" => ">=",
                "<" => "<",
                ">" => ">",
                _ => "=",
            })
        } else if captures.name("lparen").is_some() {
            Token::LParen
        } else if captures.name("rparen").is_some() {
            Token::RParen
        } else if captures.name("comma").is_some() {
            Token::Comma
        } else {
            Token::Word(whole.to_string())
        };
        tokens.push((offset, token));
        offset += whole.len();
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Value {
    if let Ok(int_val) = text.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn next(&mut self, expected: &'static str) -> Result<(usize, Token), ParseError> {
        let token = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd { expected })?;
        self.cursor += 1;
        Ok(token)
    }

    fn expect(&mut self, wanted: Token, expected: &'static str) -> Result<(), ParseError> {
        let (offset, token) = self.next(expected)?;
        if token == wanted {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                offset,
                found: token.describe(),
                expected,
            })
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word == keyword)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expressions = vec![self.and_expr()?];
        while self.peek_keyword("or") {
            self.cursor += 1;
            expressions.push(self.and_expr()?);
        }
        Ok(if expressions.len() == 1 {
            expressions.remove(0)
        } else {
            Expr::Or { expressions }
        })
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expressions = vec![self.comparison()?];
        while self.peek_keyword("and") {
            self.cursor += 1;
            expressions.push(self.comparison()?);
        }
        Ok(if expressions.len() == 1 {
            expressions.remove(0)
        } else {
            Expr::And { expressions }
        })
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.operand()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Ok(left),
        };
        self.cursor += 1;
        let right = self.operand()?;
        Ok(build_comparison(op, left, right))
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        let (offset, token) = self.next("an operand")?;
        match token {
            Token::Reference(path) => Ok(Expr::Answer { path }),
            Token::Str(text) => Ok(Expr::Literal {
                value: Value::String(text),
            }),
            Token::Num(value) => Ok(Expr::Literal { value }),
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Word(word) => self.function(offset, word),
            other => Err(ParseError::UnexpectedToken {
                offset,
                found: other.describe(),
                expected: "an operand",
            }),
        }
    }

    fn function(&mut self, offset: usize, name: String) -> Result<Expr, ParseError> {
        if !matches!(self.peek(), Some(Token::LParen)) {
            return Err(ParseError::UnexpectedToken {
                offset,
                found: format!("'{}'", name),
                expected: "an operand",
            });
        }
        self.cursor += 1;
        match name.as_str() {
            "true" | "false" => {
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::LiteralBool {
                    value: name == "true",
                })
            }
            "not" => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::Not {
                    expression: Box::new(inner),
                })
            }
            "selected" => {
                let path = match self.next("a question reference")? {
                    (_, Token::Reference(path)) => path,
                    (ref_offset, other) => {
                        return Err(ParseError::UnexpectedToken {
                            offset: ref_offset,
                            found: other.describe(),
                            expected: "a question reference",
                        });
                    }
                };
                self.expect(Token::Comma, "','")?;
                let (value_offset, value) = self.next("a choice name")?;
                let value = match value {
                    Token::Str(text) => text,
                    Token::Num(number) => number.to_string(),
                    other => {
                        return Err(ParseError::UnexpectedToken {
                            offset: value_offset,
                            found: other.describe(),
                            expected: "a choice name",
                        });
                    }
                };
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::Selected { path, value })
            }
            _ => Err(ParseError::UnsupportedFunction { name, offset }),
        }
    }
}

fn build_comparison(op: &str, left: Expr, right: Expr) -> Expr {
    let is_empty_literal =
        |expr: &Expr| matches!(expr, Expr::Literal { value: Value::String(text) } if text.is_empty());
    if op == "!="
        && is_empty_literal(&right)
        && let Expr::Answer { path } = &left
    {
        return Expr::IsSet { path: path.clone() };
    }

    let left = Box::new(left);
    let right = Box::new(right);
    match op {
        "!=" => Expr::Ne { left, right },
        "<" => Expr::Lt { left, right },
        "<=" => Expr::Lte { left, right },
        ">" => Expr::Gt { left, right },
        ">=" => Expr::Gte { left, right },
        _ => Expr::Eq { left, right },
    }
}

/// Parses an XLSForm `relevant`/`calculation` expression.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser { tokens, cursor: 0 };
    let expr = parser.or_expr()?;
    if let Some((offset, token)) = parser.tokens.get(parser.cursor) {
        return Err(ParseError::UnexpectedToken {
            offset: *offset,
            found: token.describe(),
            expected: "end of expression",
        });
    }
    Ok(expr)
}

/// Parses an expression, keeping text the parser does not model as [`Expr::Raw`].
pub fn parse_or_raw(input: &str) -> Expr {
    parse_expression(input).unwrap_or_else(|err| {
        log::debug!("keeping expression verbatim ({}): {}", err, input);
        Expr::Raw {
            xpath: input.trim().to_string(),
        }
    })
}

/// `${name}` references found in arbitrary expression text.
pub fn references_in(text: &str) -> BTreeSet<String> {
    REFERENCE
        .captures_iter(text)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Expression given either as XLSForm text or as an expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ExprSource {
    Xpath(String),
    Tree(Expr),
}

impl ExprSource {
    pub fn resolve(&self) -> Result<Expr, ParseError> {
        match self {
            ExprSource::Xpath(text) => parse_expression(text),
            ExprSource::Tree(expr) => Ok(expr.clone()),
        }
    }
}
