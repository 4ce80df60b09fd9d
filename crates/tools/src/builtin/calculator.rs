//! Arithmetic evaluation.
//!
//! Supports `+ - * / % ^`, the `× ÷ −` glyphs, parentheses and unary signs.
//! `^` is right-associative and binds tighter than unary minus.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ToolError, ToolResult};
use crate::tool::{schema_for, Tool};

const NAME: &str = "calculator";
const MAX_EXPRESSION_LEN: usize = 1024;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorInput {
    /// Arithmetic expression, e.g. "(15 + 27) * 2"
    pub expression: String,
}

pub struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression with + - * / % ^ and parentheses"
    }

    fn input_schema(&self) -> Value {
        schema_for::<CalculatorInput>()
    }

    fn args_from_query(&self, query: &str) -> Option<Value> {
        extract_expression(query).map(|expression| json!({ "expression": expression }))
    }

    async fn invoke(&self, args: Value) -> ToolResult<Value> {
        let input: CalculatorInput =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_input(NAME, e.to_string()))?;
        let value = evaluate(&input.expression).map_err(|e| ToolError::failed(NAME, e))?;
        Ok(json!({
            "expression": input.expression.trim(),
            "result": number_value(value),
        }))
    }
}

/// Integral results are reported as integers.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

static WORD_OPERATORS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bmultiplied\s+by\b", "*"),
        (r"(?i)\bdivided\s+by\b", "/"),
        (r"(?i)\bto\s+the\s+power\s+of\b", "^"),
        (r"(?i)\bplus\b", "+"),
        (r"(?i)\bminus\b", "-"),
        (r"(?i)\btimes\b", "*"),
        (r"(?i)\bover\b", "/"),
        (r"(?i)\bmod(?:ulo)?\b", "%"),
    ]
    .into_iter()
    .filter_map(|(pattern, op)| Regex::new(pattern).ok().map(|re| (re, op)))
    .collect()
});

static EXPRESSION_RUN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[0-9.\s()+\-*/%^×÷−]+").ok());

/// Pull the longest evaluable arithmetic expression out of free text.
pub fn extract_expression(text: &str) -> Option<String> {
    let mut normalized = text.to_string();
    for (re, op) in WORD_OPERATORS.iter() {
        normalized = re.replace_all(&normalized, *op).into_owned();
    }

    let run = EXPRESSION_RUN.as_ref()?;
    run.find_iter(&normalized)
        .map(|m| m.as_str().trim().to_string())
        .filter(|candidate| {
            candidate.chars().any(|c| c.is_ascii_digit())
                && candidate
                    .chars()
                    .skip(1)
                    .any(|c| "+-*/%^×÷−".contains(c))
                && evaluate(candidate).is_ok()
        })
        .max_by_key(|candidate| candidate.len())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Num(n));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '×' => {
                tokens.push(Token::Op('*'));
                i += 1;
            }
            '÷' => {
                tokens.push(Token::Op('/'));
                i += 1;
            }
            '−' => {
                tokens.push(Token::Op('-'));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

const MAX_DEPTH: usize = 64;

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if rhs == 0.0 && op != '*' {
                return Err("division by zero".into());
            }
            value = match op {
                '*' => value * rhs,
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                self.nested(|p| p.unary()).map(|v| -v)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.nested(|p| p.unary())
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.nested(|p| p.unary())?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.nested(|p| p.expr())?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("missing closing parenthesis".into()),
                }
            }
            Some(Token::RParen) => Err("unexpected ')'".into()),
            Some(Token::Op(op)) => Err(format!("unexpected operator '{op}'")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Result<f64, String>) -> Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".into());
        }
        let result = f(self);
        self.depth -= 1;
        result
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(format!("expression longer than {MAX_EXPRESSION_LEN} bytes"));
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err("unexpected trailing input".into());
    }
    if !value.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(value)
}
