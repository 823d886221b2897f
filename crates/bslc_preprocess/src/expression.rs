//! Integer constant-expression evaluation for `#if` conditions.
//!
//! A Pratt parser over the expression token stream. As this runs on
//! preprocessor directives, unknown identifiers evaluate to 0 rather than
//! erroring. `&&` and `||` do not short-circuit so evaluation stays
//! deterministic under repeated macro substitution.

use std::fmt;

use bslc_base::Reporter;
use bslc_lex::TokenType;
use bslc_parser::{IntermediateForm, ParseMode, Token};

/// Binding power of unary operators; must outrank everything binary.
const UNARY_BINDING_POWER: i32 = 1000;
/// Parentheses evaluate everything until the matching closer.
const PARENTHESIS_BINDING_POWER: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    DivisionByZero,
    ModuloByZero,
    ExpectedClosingParenthesis,
    ExpectedColon,
    InvalidExpression(String),
    InvalidOperator(String),
    TrailingInput,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::DivisionByZero => write!(f, "Division by zero"),
            EvalError::ModuloByZero => write!(f, "Modulo by zero"),
            EvalError::ExpectedClosingParenthesis => write!(f, "Expected ')'"),
            EvalError::ExpectedColon => write!(f, "Expected ':'"),
            EvalError::InvalidExpression(tok) => write!(f, "Invalid expression near '{tok}'"),
            EvalError::InvalidOperator(tok) => write!(f, "Invalid operator '{tok}'"),
            EvalError::TrailingInput => write!(f, "Trailing input"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Evaluates an integer constant expression.
pub fn evaluate(expression: &str) -> Result<i64, EvalError> {
    let reporter = Reporter::sink();
    let form = IntermediateForm::new(expression, ParseMode::Expression, &reporter);
    let mut parser = Pratt {
        tok: form.data().token(0),
    };
    let value = parser.expr(0)?;
    if parser.peek().token_type() != TokenType::INVALID {
        return Err(EvalError::TrailingInput);
    }
    Ok(value)
}

struct Pratt<'a> {
    tok: Token<'a>,
}

impl<'a> Pratt<'a> {
    fn peek(&self) -> Token<'a> {
        self.tok
    }

    fn consume(&mut self) -> Token<'a> {
        let tok = self.tok;
        self.tok = self.tok.next();
        tok
    }

    fn expr(&mut self, right_binding_power: i32) -> Result<i64, EvalError> {
        // Parse unary operators, parentheses and constants.
        let consumed = self.consume();
        let mut left = self.nud(consumed)?;
        // While the left binding power is greater than the right, continue
        // consuming binary operations.
        while left_binding_power(self.peek())? > right_binding_power {
            let op = self.consume();
            left = self.led(left, op)?;
        }
        Ok(left)
    }

    /// How a token evaluates without left context (Null-Denotation).
    fn nud(&mut self, t: Token<'a>) -> Result<i64, EvalError> {
        match t.token_type() {
            TokenType::WORD => {
                // Undefined identifier (not macro substituted).
                Ok(0)
            }
            TokenType::NUMBER => Ok(parse_number(t.str_view())),
            TokenType(b'+') => self.expr(UNARY_BINDING_POWER),
            TokenType(b'-') => Ok(self.expr(UNARY_BINDING_POWER)?.wrapping_neg()),
            TokenType(b'!') => {
                let value = self.expr(UNARY_BINDING_POWER)? != 0;
                // A '!' token can be a run of many unary '!'; parity of its
                // length decides the result.
                let odd = t.str_view().len() & 1 == 1;
                Ok(i64::from(if odd { !value } else { value }))
            }
            TokenType(b'~') => Ok(!self.expr(UNARY_BINDING_POWER)?),
            TokenType(b'(') => {
                let value = self.expr(PARENTHESIS_BINDING_POWER)?;
                if self.consume() != b')' {
                    return Err(EvalError::ExpectedClosingParenthesis);
                }
                Ok(value)
            }
            _ => Err(EvalError::InvalidExpression(t.str_view().to_string())),
        }
    }

    /// How a token evaluates on two operands (Left-Denotation).
    fn led(&mut self, left: i64, t: Token<'a>) -> Result<i64, EvalError> {
        let ty = t.token_type();
        let bp = left_binding_power(t)?;
        match ty {
            TokenType(b'*') => Ok(left.wrapping_mul(self.expr(bp)?)),
            TokenType(b'/') => {
                let right = self.expr(bp)?;
                if right == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(left.checked_div(right).unwrap_or(0))
            }
            TokenType(b'%') => {
                let right = self.expr(bp)?;
                if right == 0 {
                    return Err(EvalError::ModuloByZero);
                }
                Ok(left.checked_rem(right).unwrap_or(0))
            }
            TokenType(b'+') => Ok(left.wrapping_add(self.expr(bp)?)),
            TokenType(b'-') => Ok(left.wrapping_sub(self.expr(bp)?)),
            TokenType(b'<') => Ok(i64::from(left < self.expr(bp)?)),
            TokenType::LEQUAL => Ok(i64::from(left <= self.expr(bp)?)),
            TokenType(b'>') => Ok(i64::from(left > self.expr(bp)?)),
            TokenType::GEQUAL => Ok(i64::from(left >= self.expr(bp)?)),
            TokenType::EQUAL => Ok(i64::from(left == self.expr(bp)?)),
            TokenType::NOT_EQUAL => Ok(i64::from(left != self.expr(bp)?)),
            TokenType(b'&') => Ok(left & self.expr(bp)?),
            TokenType(b'^') => Ok(left ^ self.expr(bp)?),
            TokenType(b'|') => Ok(left | self.expr(bp)?),
            TokenType::LOGICAL_AND => {
                // No short-circuit: both sides always evaluate.
                let right = self.expr(bp)?;
                Ok(i64::from(left != 0 && right != 0))
            }
            TokenType::LOGICAL_OR => {
                let right = self.expr(bp)?;
                Ok(i64::from(left != 0 || right != 0))
            }
            TokenType(b'?') => {
                // The middle expression only stops at ':' (precedence 0).
                let true_value = self.expr(0)?;
                if self.consume() != b':' {
                    return Err(EvalError::ExpectedColon);
                }
                // Precedence - 1 for right-associativity.
                let false_value = self.expr(bp - 1)?;
                Ok(if left != 0 { true_value } else { false_value })
            }
            _ => Err(EvalError::InvalidOperator(t.str_view().to_string())),
        }
    }
}

fn left_binding_power(t: Token<'_>) -> Result<i32, EvalError> {
    let power = match t.token_type() {
        TokenType(b'*') | TokenType(b'/') | TokenType(b'%') => 110,
        TokenType(b'+') | TokenType(b'-') => 100,
        TokenType(b'<') | TokenType::LEQUAL | TokenType(b'>') | TokenType::GEQUAL => 80,
        TokenType::EQUAL | TokenType::NOT_EQUAL => 70,
        TokenType(b'&') => 60,
        TokenType(b'^') => 50,
        TokenType(b'|') => 40,
        TokenType::LOGICAL_AND => 30,
        TokenType::LOGICAL_OR => 20,
        TokenType(b'?') => 10,
        TokenType(b':') | TokenType(b'(') | TokenType(b')') => 0,
        // Prefix operators don't bind to the left.
        TokenType(b'!') | TokenType(b'~') => 0,
        TokenType::WORD | TokenType::NUMBER => 0,
        TokenType::INVALID => -1, /* End of input. */
        _ => return Err(EvalError::InvalidOperator(t.str_view().to_string())),
    };
    Ok(power)
}

/// Parses an integer literal, tolerating `u`/`l` suffixes and hex.
fn parse_number(spelling: &str) -> i64 {
    let trimmed = spelling.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).unwrap_or(0);
    }
    trimmed.parse::<i64>().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(evaluate("1 + 2 * 3"), Ok(7));
        assert_eq!(evaluate("(1 + 2) * 3"), Ok(9));
        assert_eq!(evaluate("10 - 4 - 3"), Ok(3));
        assert_eq!(evaluate("7 / 2"), Ok(3));
        assert_eq!(evaluate("7 % 2"), Ok(1));
    }

    #[test]
    fn comparisons_and_equality() {
        assert_eq!(evaluate("1 < 2"), Ok(1));
        assert_eq!(evaluate("2 <= 2"), Ok(1));
        assert_eq!(evaluate("3 > 4"), Ok(0));
        assert_eq!(evaluate("4 >= 5"), Ok(0));
        assert_eq!(evaluate("1 == 1"), Ok(1));
        assert_eq!(evaluate("1 != 1"), Ok(0));
    }

    #[test]
    fn bitwise_and_logical() {
        assert_eq!(evaluate("6 & 3"), Ok(2));
        assert_eq!(evaluate("6 | 3"), Ok(7));
        assert_eq!(evaluate("6 ^ 3"), Ok(5));
        assert_eq!(evaluate("1 && 0"), Ok(0));
        assert_eq!(evaluate("1 || 0"), Ok(1));
        assert_eq!(evaluate("0 && 1 || 1"), Ok(1));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(evaluate("-3 + 5"), Ok(2));
        assert_eq!(evaluate("+4"), Ok(4));
        assert_eq!(evaluate("!0"), Ok(1));
        assert_eq!(evaluate("!5"), Ok(0));
        assert_eq!(evaluate("~0"), Ok(-1));
    }

    #[test]
    fn bang_runs_use_parity() {
        assert_eq!(evaluate("!!5"), Ok(1));
        assert_eq!(evaluate("!!!5"), Ok(0));
        assert_eq!(evaluate("!!0"), Ok(0));
        assert_eq!(evaluate("!!!0"), Ok(1));
    }

    #[test]
    fn ternary_is_right_associative() {
        assert_eq!(evaluate("1 ? 2 : 3"), Ok(2));
        assert_eq!(evaluate("0 ? 2 : 3"), Ok(3));
        assert_eq!(evaluate("1 ? 2 : 0 ? 3 : 4"), Ok(2));
        assert_eq!(evaluate("0 ? 2 : 0 ? 3 : 4"), Ok(4));
    }

    #[test]
    fn undefined_identifiers_evaluate_to_zero() {
        assert_eq!(evaluate("FOO"), Ok(0));
        assert_eq!(evaluate("FOO + 2"), Ok(2));
        // An unexpanded function-like call is not a constant expression.
        assert_eq!(evaluate("FOO(1)"), Err(EvalError::TrailingInput));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(evaluate("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(evaluate("1 % 0"), Err(EvalError::ModuloByZero));
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 +").is_err());
        assert!(evaluate("1 ? 2").is_err());
    }

    #[test]
    fn number_suffixes_and_hex() {
        assert_eq!(evaluate("1u + 1"), Ok(2));
        assert_eq!(evaluate("0x10"), Ok(16));
        assert_eq!(evaluate("0xFFu"), Ok(255));
    }

    #[test]
    fn result_is_false_iff_zero() {
        assert_eq!(evaluate("2 && 3"), Ok(1));
        assert_eq!(evaluate("2 - 2 || 0"), Ok(0));
    }
}
