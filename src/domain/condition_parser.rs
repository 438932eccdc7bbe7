//! Condition DSL parser.
//!
//! Recursive descent parser for rule conditions. Converts text to AST with
//! error messages carrying character offset and expected/found tokens.

use crate::domain::condition::{Condition, Operand};
use crate::domain::error::ParseError;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(ParseError {
                message: format!("expected '{}', found '{}'", expected, ch),
                position: self.pos,
            }),
            None => Err(ParseError {
                message: format!("expected '{}', found end of input", expected),
                position: self.pos,
            }),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && (remaining.len() == keyword.len()
                || !remaining[keyword.len()..]
                    .chars()
                    .next()
                    .map(|c| c.is_alphanumeric() || c == '_')
                    .unwrap_or(false))
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            let found = self.peek_word();
            Err(ParseError {
                message: format!("expected '{}', found '{}'", keyword, found),
                position: self.pos,
            })
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    /// Metric names are lowercase identifiers: `[a-z][a-z0-9_]*`.
    fn parse_metric(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        match self.peek() {
            Some(ch) if ch.is_ascii_lowercase() => {}
            _ => {
                return Err(ParseError {
                    message: format!("expected metric name, found '{}'", self.peek_word()),
                    position: start,
                });
            }
        }
        while let Some(ch) = self.peek() {
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        if self
            .peek()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
        {
            return Err(ParseError {
                message: format!(
                    "metric names must be lowercase, found '{}'",
                    &self.input[start..self.pos + self.peek_word().len()]
                ),
                position: start,
            });
        }
        Ok(Operand::Metric(self.input[start..self.pos].to_string()))
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            let num = self.parse_number()?;
            return Ok(Operand::Constant(num));
        }

        self.parse_metric()
    }

    fn parse_comparison(&mut self, keyword: &str) -> Result<Condition, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;

        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;

        match keyword {
            "ABOVE" => Ok(Condition::Above { left, right }),
            "BELOW" => Ok(Condition::Below { left, right }),
            "EQUALS" => Ok(Condition::Equals { left, right }),
            _ => unreachable!(),
        }
    }

    fn parse_between(&mut self) -> Result<Condition, ParseError> {
        self.expect_keyword("BETWEEN")?;
        self.expect_char('(')?;

        let operand = self.parse_operand()?;
        self.expect_char(',')?;
        let lower_pos = self.pos;
        let lower = self.parse_number()?;
        self.expect_char(',')?;
        let upper = self.parse_number()?;
        self.expect_char(')')?;

        if lower > upper {
            return Err(ParseError {
                message: format!("BETWEEN bounds out of order: {} > {}", lower, upper),
                position: lower_pos,
            });
        }

        Ok(Condition::Between {
            operand,
            lower,
            upper,
        })
    }

    fn parse_list(&mut self, keyword: &str) -> Result<Vec<Condition>, ParseError> {
        self.expect_keyword(keyword)?;
        self.expect_char('(')?;

        let mut children = vec![self.parse_condition()?];

        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
            children.push(self.parse_condition()?);
        }

        if children.len() < 2 {
            return Err(ParseError {
                message: format!("{} requires at least 2 conditions", keyword),
                position: self.pos,
            });
        }

        Ok(children)
    }

    fn parse_not(&mut self) -> Result<Condition, ParseError> {
        self.expect_keyword("NOT")?;
        self.expect_char('(')?;
        let inner = self.parse_condition()?;
        self.expect_char(')')?;
        Ok(Condition::Not(Box::new(inner)))
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        self.skip_whitespace();

        for keyword in ["ABOVE", "BELOW", "EQUALS"] {
            if self.peek_keyword(keyword) {
                return self.parse_comparison(keyword);
            }
        }
        if self.peek_keyword("BETWEEN") {
            return self.parse_between();
        }
        if self.peek_keyword("AND") {
            return self.parse_list("AND").map(Condition::And);
        }
        if self.peek_keyword("OR") {
            return self.parse_list("OR").map(Condition::Or);
        }
        if self.peek_keyword("NOT") {
            return self.parse_not();
        }

        let word = self.peek_word();
        Err(ParseError {
            message: format!("expected condition, found '{}'", word),
            position: self.pos,
        })
    }

    fn parse(&mut self) -> Result<Condition, ParseError> {
        let condition = self.parse_condition()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(ParseError {
                message: format!("unexpected input after condition: '{}'", self.remaining()),
                position: self.pos,
            });
        }
        Ok(condition)
    }
}

pub fn parse(input: &str) -> Result<Condition, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str) -> Operand {
        Operand::Metric(name.to_string())
    }

    #[test]
    fn parse_above() {
        let cond = parse("ABOVE(rsi_14, 70)").unwrap();
        assert_eq!(
            cond,
            Condition::Above {
                left: metric("rsi_14"),
                right: Operand::Constant(70.0)
            }
        );
    }

    #[test]
    fn parse_below_two_metrics() {
        let cond = parse("BELOW(cash_ratio, target_cash_ratio)").unwrap();
        assert_eq!(
            cond,
            Condition::Below {
                left: metric("cash_ratio"),
                right: metric("target_cash_ratio")
            }
        );
    }

    #[test]
    fn parse_between() {
        let cond = parse("BETWEEN(position_pct, 0.1, 0.25)").unwrap();
        assert_eq!(
            cond,
            Condition::Between {
                operand: metric("position_pct"),
                lower: 0.1,
                upper: 0.25
            }
        );
    }

    #[test]
    fn parse_variadic_and() {
        let cond =
            parse("AND(ABOVE(volume_ratio, 2), BELOW(change_pct, -3), EQUALS(held, 1))").unwrap();
        match cond {
            Condition::And(children) => assert_eq!(children.len(), 3),
            _ => panic!("expected And condition"),
        }
    }

    #[test]
    fn parse_deeply_nested() {
        let cond = parse("NOT(AND(OR(ABOVE(a, 1), BELOW(a, -1)), EQUALS(b, 0)))").unwrap();
        assert!(matches!(cond, Condition::Not(_)));
    }

    #[test]
    fn parse_negative_and_float_numbers() {
        let cond = parse("ABOVE(change_pct, -2.5)").unwrap();
        assert_eq!(
            cond,
            Condition::Above {
                left: metric("change_pct"),
                right: Operand::Constant(-2.5)
            }
        );
    }

    #[test]
    fn parse_whitespace_handling() {
        assert!(parse("  ABOVE ( rsi_14 ,  70 )  ").is_ok());
    }

    #[test]
    fn error_unexpected_token() {
        let err = parse("ABOVE(rsi_14, )").unwrap_err();
        assert!(err.message.contains("expected"));
        assert_eq!(err.position, 14);
    }

    #[test]
    fn error_missing_paren() {
        let err = parse("ABOVE(rsi_14, 70").unwrap_err();
        assert!(err.message.contains("expected ')'"));
    }

    #[test]
    fn error_unknown_keyword() {
        let err = parse("CROSS(rsi_14, 70)").unwrap_err();
        assert!(err.message.contains("expected condition"));
    }

    #[test]
    fn error_trailing_input() {
        let err = parse("ABOVE(a, 1) garbage").unwrap_err();
        assert!(err.message.contains("unexpected input"));
    }

    #[test]
    fn error_single_child_and() {
        let err = parse("AND(ABOVE(a, 1))").unwrap_err();
        assert!(err.message.contains("AND requires at least 2 conditions"));
    }

    #[test]
    fn error_uppercase_metric() {
        let err = parse("ABOVE(Rsi, 70)").unwrap_err();
        assert!(err.message.contains("expected metric name"));
        let err = parse("ABOVE(rsI, 70)").unwrap_err();
        assert!(err.message.contains("lowercase"));
    }

    #[test]
    fn error_between_bounds_reversed() {
        let err = parse("BETWEEN(a, 5, 1)").unwrap_err();
        assert!(err.message.contains("out of order"));
    }

    #[test]
    fn case_sensitive_keywords() {
        let err = parse("above(a, 1)").unwrap_err();
        assert!(err.message.contains("expected condition"));
    }

    #[test]
    fn error_empty_input() {
        let err = parse("").unwrap_err();
        assert!(err.message.contains("expected condition"));
        assert_eq!(err.position, 0);
    }
}
