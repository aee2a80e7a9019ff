//! Elementary math: local arithmetic plus LLM-solved word problems.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{Capability, CapabilityResult, Tool, ToolError};
use crate::llm::{ContentPart, LlmClient};
use crate::request::Request;

const WORD_PROBLEM_PROMPT: &str = "Solve this math problem and return ONLY the final numerical answer.
No units, no explanations, just the number.

Problem: ";

/// Recursive-descent evaluator for `+ - * / ^ ( )` over decimal numbers.
struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.peek().copied()
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Option<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.chars.next();
                    value += self.term()?;
                }
                '-' | '−' => {
                    self.chars.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Some(value)
    }

    // term := power (('*' | '/' | 'x' | '×' | '÷') power)*
    fn term(&mut self) -> Option<f64> {
        let mut value = self.power()?;
        while let Some(op) = self.peek() {
            match op {
                '*' | 'x' | 'X' | '×' => {
                    self.chars.next();
                    value *= self.power()?;
                }
                '/' | '÷' => {
                    self.chars.next();
                    let divisor = self.power()?;
                    if divisor == 0.0 {
                        return None;
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Some(value)
    }

    // power := unary ('^' power)?   (right associative)
    fn power(&mut self) -> Option<f64> {
        let base = self.unary()?;
        if self.peek() == Some('^') {
            self.chars.next();
            let exponent = self.power()?;
            return Some(base.powf(exponent));
        }
        Some(base)
    }

    fn unary(&mut self) -> Option<f64> {
        match self.peek()? {
            '-' | '−' => {
                self.chars.next();
                Some(-self.unary()?)
            }
            '+' => {
                self.chars.next();
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Option<f64> {
        if self.peek()? == '(' {
            self.chars.next();
            let value = self.expr()?;
            if self.peek()? != ')' {
                return None;
            }
            self.chars.next();
            return Some(value);
        }

        let mut literal = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                literal.push(c);
                self.chars.next();
            } else if c == ',' {
                // thousands separator
                self.chars.next();
            } else {
                break;
            }
        }
        literal.parse::<f64>().ok()
    }
}

/// Evaluate an arithmetic expression. Returns `None` on syntax errors,
/// trailing input, division by zero or a non-finite result.
pub fn evaluate(expression: &str) -> Option<f64> {
    let mut parser = Parser::new(expression);
    let value = parser.expr()?;
    if parser.peek().is_some() || !value.is_finite() {
        return None;
    }
    Some(value)
}

/// Drop a leading question phrase ("What is", "Calculate:") and trailing
/// punctuation, leaving what should be the bare expression.
fn strip_lead_in(text: &str) -> &str {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:what\s+is|what's|whats|calculate|compute|evaluate|solve)\b\s*:?")
            .expect("valid lead-in regex")
    });
    let rest = match re.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    };
    rest.trim()
        .trim_end_matches(|c: char| matches!(c, '?' | '.' | '=' | '!') || c.is_whitespace())
}

/// Evaluate the text directly when, apart from a lead-in phrase, it is
/// nothing but an arithmetic expression with at least one operator.
///
/// Any other wording ("1/3 of a pie") makes this return `None`, leaving the
/// problem to the model. "x" multiplies only between operands ("3 x 5").
pub fn evaluate_inline(text: &str) -> Option<f64> {
    let expression = strip_lead_in(text);
    let has_operator = expression
        .char_indices()
        .any(|(i, c)| "+*/^×÷−x".contains(c) || (c == '-' && i > 0));
    if !has_operator {
        return None;
    }
    evaluate(expression)
}

/// Render a number the way a person would write the answer.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let rounded = format!("{:.10}", value);
        rounded
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// Clean an LLM reply down to a single number.
fn normalize_answer(reply: &str) -> Option<String> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number regex"));

    let answer = reply.trim().replace(',', "");
    let answer = match answer.rsplit_once('=') {
        Some((_, rhs)) => rhs.trim().to_string(),
        None => answer,
    };
    let answer = answer.trim_matches(|c: char| c == '*' || c == '`' || c.is_whitespace());

    if let Ok(value) = answer.parse::<f64>() {
        return Some(format_number(value));
    }
    number
        .find(answer)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(format_number)
}

/// Solves arithmetic and elementary word problems.
pub struct MathSolver {
    llm: Arc<dyn LlmClient>,
}

impl MathSolver {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for MathSolver {
    fn capability(&self) -> Capability {
        Capability::Math
    }

    fn description(&self) -> &str {
        "Solve elementary math: arithmetic expressions, calculations and basic word problems (default for calculations)"
    }

    async fn execute(&self, request: &Request) -> Result<CapabilityResult, ToolError> {
        let text = request.text_content();
        if !text.chars().any(|c| c.is_ascii_digit()) {
            return Err(ToolError::MathParse(text));
        }

        if let Some(value) = evaluate_inline(&text) {
            tracing::debug!(value, "Evaluated expression locally");
            return Ok(CapabilityResult::text(format_number(value))
                .with_metadata(json!({"method": "local"})));
        }

        let prompt = format!("{}{}", WORD_PROBLEM_PROMPT, text);
        let reply = self.llm.generate(&[ContentPart::text(prompt)]).await?;
        let answer = normalize_answer(&reply).ok_or_else(|| ToolError::MathParse(reply.clone()))?;

        Ok(CapabilityResult::text(answer).with_metadata(json!({"method": "llm"})))
    }
}
