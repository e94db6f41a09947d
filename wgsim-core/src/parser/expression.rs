use super::types::is_builtin_type_name;
use super::Parser;
use crate::ast::*;
use crate::bail_parse_at;
use crate::error::Result;
use crate::lexer::{is_template_name, TokenKind};
use log::trace;

type Level = fn(&mut Parser) -> Result<Expression>;

impl Parser {
    pub(crate) fn parse_expression(&mut self) -> Result<Expression> {
        trace!("parse_expression: next token = {:?}", self.peek());
        self.parse_logical_or()
    }

    /// Left-associative chain of `next` joined by any of `ops`.
    fn parse_binary_level(&mut self, ops: &[(TokenKind, BinaryOp)], next: Level) -> Result<Expression> {
        let mut left = next(self)?;
        while let Some(&(_, op)) = ops.iter().find(|(kind, _)| self.check(*kind)) {
            self.advance();
            let right = next(self)?;
            let line = left.line;
            left = self
                .node_counter
                .mk_expr(line, ExprKind::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_logical_or(&mut self) -> Result<Expression> {
        self.parse_binary_level(&[(TokenKind::OrOr, BinaryOp::LogicalOr)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> Result<Expression> {
        self.parse_binary_level(&[(TokenKind::AndAnd, BinaryOp::LogicalAnd)], Self::parse_bitwise_or)
    }

    fn parse_bitwise_or(&mut self) -> Result<Expression> {
        self.parse_binary_level(&[(TokenKind::Or, BinaryOp::BitOr)], Self::parse_bitwise_xor)
    }

    fn parse_bitwise_xor(&mut self) -> Result<Expression> {
        self.parse_binary_level(&[(TokenKind::Xor, BinaryOp::BitXor)], Self::parse_bitwise_and)
    }

    fn parse_bitwise_and(&mut self) -> Result<Expression> {
        self.parse_binary_level(&[(TokenKind::And, BinaryOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::EqualEqual, BinaryOp::Equal),
                (TokenKind::NotEqual, BinaryOp::NotEqual),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::LessThan, BinaryOp::Less),
                (TokenKind::LessThanEqual, BinaryOp::LessEqual),
                (TokenKind::GreaterThan, BinaryOp::Greater),
                (TokenKind::GreaterThanEqual, BinaryOp::GreaterEqual),
            ],
            Self::parse_shift_expression,
        )
    }

    pub(crate) fn parse_shift_expression(&mut self) -> Result<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::ShiftLeft, BinaryOp::ShiftLeft),
                (TokenKind::ShiftRight, BinaryOp::ShiftRight),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Subtract),
            ],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        self.parse_binary_level(
            &[
                (TokenKind::Star, BinaryOp::Multiply),
                (TokenKind::Slash, BinaryOp::Divide),
                (TokenKind::Percent, BinaryOp::Modulo),
            ],
            Self::parse_unary_expression,
        )
    }

    pub(crate) fn parse_unary_expression(&mut self) -> Result<Expression> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::Complement,
            TokenKind::Star => UnaryOp::Deref,
            TokenKind::And => UnaryOp::AddressOf,
            _ => return self.parse_postfix_expression(),
        };
        let line = self.advance().line;
        let operand = self.parse_unary_expression()?;
        Ok(self.node_counter.mk_expr(line, ExprKind::Unary(op, Box::new(operand))))
    }

    fn parse_postfix_expression(&mut self) -> Result<Expression> {
        let mut expr = self.parse_primary_expression()?;

        loop {
            if self.match_token(TokenKind::BracketLeft) {
                let index = self.parse_expression()?;
                self.expect(TokenKind::BracketRight, "to close index")?;
                let line = expr.line;
                expr = self
                    .node_counter
                    .mk_expr(line, ExprKind::Index(Box::new(expr), Box::new(index)));
            } else if self.match_token(TokenKind::Period) {
                let member = self.expect_identifier()?;
                let line = expr.line;
                expr = self.node_counter.mk_expr(line, ExprKind::Member(Box::new(expr), member));
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary_expression(&mut self) -> Result<Expression> {
        trace!("parse_primary_expression: next token = {:?}", self.peek());
        let token = self.peek().clone();

        let kind = match token.kind {
            TokenKind::IntLiteral => {
                self.advance();
                let Some((value, suffix)) = parse_int_lexeme(&token.lexeme) else {
                    bail_parse_at!(token, "Invalid integer literal");
                };
                ExprKind::Literal(Literal::Int { value, suffix })
            }
            TokenKind::FloatLiteral => {
                self.advance();
                let Some((value, suffix)) = parse_float_lexeme(&token.lexeme) else {
                    bail_parse_at!(token, "Invalid float literal");
                };
                ExprKind::Literal(Literal::Float { value, suffix })
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                ExprKind::Literal(Literal::Bool(token.kind == TokenKind::True))
            }
            TokenKind::ParenLeft => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::ParenRight, "to close parenthesized expression")?;
                ExprKind::Group(Box::new(inner))
            }
            TokenKind::Identifier => return self.parse_identifier_expression(),
            _ => bail_parse_at!(token, "Expected expression"),
        };

        Ok(self.node_counter.mk_expr(token.line, kind))
    }

    fn parse_identifier_expression(&mut self) -> Result<Expression> {
        let line = self.peek().line;
        let name = self.peek().lexeme.clone();
        let next = self.peek_next().kind;

        if name == "bitcast" {
            self.advance();
            self.expect(TokenKind::LessThan, "after bitcast")?;
            let ty = self.parse_type()?;
            self.expect(TokenKind::GreaterThan, "to close bitcast type")?;
            self.expect(TokenKind::ParenLeft, "to open bitcast argument")?;
            let value = self.parse_expression()?;
            self.match_token(TokenKind::Comma);
            self.expect(TokenKind::ParenRight, "to close bitcast argument")?;
            return Ok(self.node_counter.mk_expr(
                line,
                ExprKind::Bitcast {
                    ty,
                    value: Box::new(value),
                },
            ));
        }

        let is_type = is_builtin_type_name(&name) || self.context.is_type_name(&name);
        let opens_template = next == TokenKind::LessThan && is_template_name(&name);
        if is_type && (next == TokenKind::ParenLeft || opens_template) {
            let ty = self.parse_type()?;
            let args = self.parse_argument_list()?;
            return Ok(self.node_counter.mk_expr(line, ExprKind::Construct { ty, args }));
        }

        self.advance();
        let kind = if next == TokenKind::ParenLeft {
            let args = self.parse_argument_list()?;
            ExprKind::Call { name, args }
        } else {
            ExprKind::Variable(name)
        };
        Ok(self.node_counter.mk_expr(line, kind))
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Expression>> {
        self.expect(TokenKind::ParenLeft, "to open argument list")?;
        let mut args = Vec::new();
        while !self.check(TokenKind::ParenRight) {
            args.push(self.parse_expression()?);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::ParenRight, "to close argument list")?;
        Ok(args)
    }
}

fn split_sign(text: &str) -> (bool, &str) {
    match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    }
}

fn strip_hex_prefix(text: &str) -> Option<&str> {
    text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
}

/// Value and type suffix of an integer lexeme such as `42`, `-7i` or `0xFFu`.
pub(crate) fn parse_int_lexeme(text: &str) -> Option<(i64, Option<char>)> {
    let (negative, body) = split_sign(text);
    let (digits, suffix) = match body.chars().last() {
        Some(c @ ('i' | 'u')) => (&body[..body.len() - 1], Some(c)),
        _ => (body, None),
    };
    let magnitude = match strip_hex_prefix(digits) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some((if negative { -magnitude } else { magnitude }, suffix))
}

/// Value and type suffix of a decimal or hexadecimal float lexeme.
pub(crate) fn parse_float_lexeme(text: &str) -> Option<(f64, Option<char>)> {
    let (negative, body) = split_sign(text);

    let (value, suffix) = match strip_hex_prefix(body) {
        Some(hex) => parse_hex_float(hex)?,
        None => {
            let (digits, suffix) = match body.chars().last() {
                Some(c @ ('f' | 'h')) => (&body[..body.len() - 1], Some(c)),
                _ => (body, None),
            };
            (digits.parse::<f64>().ok()?, suffix)
        }
    };

    Some((if negative { -value } else { value }, suffix))
}

fn parse_hex_float(hex: &str) -> Option<(f64, Option<char>)> {
    let (mantissa, exponent, suffix) = match hex.find(|c| c == 'p' || c == 'P') {
        Some(pos) => {
            let exp_text = &hex[pos + 1..];
            let (exp_digits, suffix) = match exp_text.chars().last() {
                Some(c @ ('f' | 'h')) => (&exp_text[..exp_text.len() - 1], Some(c)),
                _ => (exp_text, None),
            };
            (&hex[..pos], exp_digits.parse::<i32>().ok()?, suffix)
        }
        None => (hex, 0, None),
    };

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut value = 0.0f64;
    for c in whole.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in fraction.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }

    Some((value * 2f64.powi(exponent), suffix))
}
