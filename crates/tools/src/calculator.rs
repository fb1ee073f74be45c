//! Arithmetic tools: `calculator(expression)` and `add(a, b)`.
//!
//! The calculator uses a small recursive-descent evaluator supporting
//! `+ - * / % ^`, parentheses, unary minus and decimal numbers.

use agentrelay_core::error::ToolError;
use agentrelay_core::tool::{InvocationContext, Tool, ToolArgs, ToolResult};
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, and decimals."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: ToolArgs, _ctx: &InvocationContext) -> Result<ToolResult, ToolError> {
        let expr = match args.require("expression")? {
            Value::String(s) => s.clone(),
            // A bare number is already an expression
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "'expression' must be a string, got {other}"
                )));
            }
        };

        Ok(match evaluate(&expr) {
            Ok(value) => ToolResult::ok(format_number(value)).with_data(json!({ "result": value })),
            Err(e) => ToolResult::failed(format!("cannot evaluate '{expr}': {e}")),
        })
    }
}

/// `add(a, b)`: numeric addition.
pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers and return the sum."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First addend" },
                "b": { "type": "number", "description": "Second addend" }
            },
            "required": ["a", "b"]
        })
    }

    async fn execute(&self, args: ToolArgs, _ctx: &InvocationContext) -> Result<ToolResult, ToolError> {
        let a = number_arg(&args, "a")?;
        let b = number_arg(&args, "b")?;
        Ok(ToolResult::ok(format_number(a + b)))
    }
}

/// A numeric argument; numeric strings are accepted.
fn number_arg(args: &ToolArgs, name: &str) -> Result<f64, ToolError> {
    let value = args.require(name)?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{name}' must be a number, got {value}")))
}

/// Render integral values without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ── Recursive-descent expression evaluator ────────────────────────────────

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let result = parser.parse_expr()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(format!("unexpected {tok:?} at token {}", parser.pos));
    }
    if !result.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = literal
                    .parse()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Number(n));
            }
            c => return Err(format!("unexpected character '{c}'")),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<char> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut left = self.parse_term()?;
        while let Some(op @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let right = self.parse_term()?;
            left = if op == '+' { left + right } else { left - right };
        }
        Ok(left)
    }

    // term = unary (('*' | '/' | '%') unary)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut left = self.parse_unary()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek_op() {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = match op {
                '*' => left * right,
                _ if right == 0.0 => return Err("division by zero".into()),
                '/' => left / right,
                _ => left % right,
            };
        }
        Ok(left)
    }

    // unary = '-' unary | power
    fn parse_unary(&mut self) -> Result<f64, String> {
        if self.peek_op() == Some('-') {
            self.pos += 1;
            return Ok(-self.parse_unary()?);
        }
        self.parse_power()
    }

    // power = primary ('^' unary)?   (right-associative)
    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_primary()?;
        if self.peek_op() == Some('^') {
            self.pos += 1;
            let exp = self.parse_unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    // primary = NUMBER | '(' expr ')'
    fn parse_primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let val = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(val),
                    _ => Err("expected ')'".into()),
                }
            }
            Some(tok) => Err(format!("unexpected {tok:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
