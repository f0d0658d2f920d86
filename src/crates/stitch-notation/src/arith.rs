//! Integer arithmetic for index expressions
//!
//! Grammar:
//!
//! ```text
//! expr   = term (("+" | "-") term)*
//! term   = unary (("*" | "/") unary)*
//! unary  = ("+" | "-") unary | atom
//! atom   = number | "(" expr ")"
//! ```

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArithError {
    #[error("unexpected '{0}' in expression")]
    Unexpected(char),
    #[error("expression ends early")]
    UnexpectedEnd,
    #[error("division by zero")]
    DivisionByZero,
    #[error("bad number '{0}'")]
    BadNumber(String),
}

/// Evaluate `input`, returning `Ok(None)` when the value is not a whole number
pub fn eval_integer(input: &str) -> Result<Option<i64>, ArithError> {
    let value = eval(input)?;
    if value.is_finite() && value.fract() == 0.0 {
        Ok(Some(value as i64))
    } else {
        Ok(None)
    }
}

pub fn eval(input: &str) -> Result<f64, ArithError> {
    let mut parser = Arith {
        chars: input.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    let value = parser.expr()?;
    match parser.peek() {
        Some(c) => Err(ArithError::Unexpected(c)),
        None => Ok(value),
    }
}

/// True if `input` looks like something worth evaluating
pub fn has_operator(input: &str) -> bool {
    let body = input.trim_start_matches(['+', '-']);
    body.contains(['+', '-', '*', '/', '('])
}

struct Arith {
    chars: Vec<char>,
    pos: usize,
}

impl Arith {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn expr(&mut self) -> Result<f64, ArithError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ArithError> {
        let mut value = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == '*' {
                value *= rhs;
            } else if rhs == 0.0 {
                return Err(ArithError::DivisionByZero);
            } else {
                value /= rhs;
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, ArithError> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<f64, ArithError> {
        match self.bump() {
            Some('(') => {
                let value = self.expr()?;
                match self.bump() {
                    Some(')') => Ok(value),
                    Some(c) => Err(ArithError::Unexpected(c)),
                    None => Err(ArithError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos - 1;
                while matches!(self.peek(), Some(d) if d.is_ascii_digit() || d == '.') {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal.parse::<f64>().map_err(|_| ArithError::BadNumber(literal))
            }
            Some(c) => Err(ArithError::Unexpected(c)),
            None => Err(ArithError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        assert_eq!(eval_integer("2+3*4"), Ok(Some(14)));
        assert_eq!(eval_integer("(2+3)*4"), Ok(Some(20)));
        assert_eq!(eval_integer("-3+1"), Ok(Some(-2)));
        assert_eq!(eval_integer("10/4*2"), Ok(Some(5)));
    }

    #[test]
    fn test_fractions_are_not_integers() {
        assert_eq!(eval_integer("5/2"), Ok(None));
        assert_eq!(eval_integer("1.5*2"), Ok(Some(3)));
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval("1/0"), Err(ArithError::DivisionByZero));
        assert_eq!(eval("2+"), Err(ArithError::UnexpectedEnd));
        assert_eq!(eval("2+x"), Err(ArithError::Unexpected('x')));
        assert_eq!(eval("(2"), Err(ArithError::UnexpectedEnd));
    }

    #[test]
    fn test_has_operator() {
        assert!(has_operator("i+1"));
        assert!(has_operator("2*3"));
        assert!(!has_operator("-4"));
        assert!(!has_operator("12"));
    }
}
