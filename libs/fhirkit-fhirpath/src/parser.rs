//! Recursive descent parser following FHIRPath grammar precedence
//! (lowest to highest): implies, or/xor, and, membership, equality,
//! inequality, union, additive, multiplicative, polarity, type, indexer,
//! invocation, term.

use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use fhirkit_values::{DateTimeValue, DateValue, TimeValue};

const MAX_DEPTH: usize = 200;

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

pub fn parse(input: &str) -> Result<Ast> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens, position: 0, depth: 0 };
    let ast = parser.parse_implies()?;
    parser.expect(TokenKind::Eof)?;
    Ok(ast)
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.position]
    }

    fn is(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.position].clone();
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.is(kind) {
            Ok(self.advance())
        } else {
            Err(Error::Parse {
                message: format!("expected {kind:?}, found {:?} ('{}')", self.current().kind, self.current().text),
                position: self.current().position,
            })
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::Parse { message: "expression nested too deeply".into(), position: self.current().position });
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }

    fn parse_implies(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_or()?;
        while self.is(TokenKind::Implies) {
            self.advance();
            let right = self.parse_or()?;
            left = Ast::Implies { left: Box::new(left), right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_and()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Or => OrOp::Or,
                TokenKind::Xor => OrOp::Xor,
                _ => break,
            };
            self.advance();
            let right = self.parse_and()?;
            left = Ast::Or { left: Box::new(left), op, right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_membership()?;
        while self.is(TokenKind::And) {
            self.advance();
            let right = self.parse_membership()?;
            left = Ast::And { left: Box::new(left), right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_membership(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_equality()?;
        loop {
            let op = match self.current().kind {
                TokenKind::In => MembershipOp::In,
                TokenKind::Contains => MembershipOp::Contains,
                _ => break,
            };
            self.advance();
            let right = self.parse_equality()?;
            left = Ast::Membership { left: Box::new(left), op, right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_inequality()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Eq => EqualityOp::Eq,
                TokenKind::Equivalent => EqualityOp::Equivalent,
                TokenKind::Ne => EqualityOp::Ne,
                TokenKind::NotEquivalent => EqualityOp::NotEquivalent,
                _ => break,
            };
            self.advance();
            let right = self.parse_inequality()?;
            left = Ast::Equality { left: Box::new(left), op, right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_inequality(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_union()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Le => InequalityOp::Le,
                TokenKind::Lt => InequalityOp::Lt,
                TokenKind::Gt => InequalityOp::Gt,
                TokenKind::Ge => InequalityOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_union()?;
            left = Ast::Inequality { left: Box::new(left), op, right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_additive()?;
        while self.is(TokenKind::Pipe) {
            self.advance();
            let right = self.parse_additive()?;
            left = Ast::Union { left: Box::new(left), right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => AdditiveOp::Plus,
                TokenKind::Minus => AdditiveOp::Minus,
                TokenKind::Ampersand => AdditiveOp::Concat,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Ast::Additive { left: Box::new(left), op, right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_polarity()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => MultiplicativeOp::Multiply,
                TokenKind::Slash => MultiplicativeOp::Divide,
                TokenKind::Div => MultiplicativeOp::Div,
                TokenKind::Mod => MultiplicativeOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_polarity()?;
            left = Ast::Multiplicative { left: Box::new(left), op, right: Box::new(right) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_polarity(&mut self) -> Result<Ast> {
        self.enter()?;
        let result = match self.current().kind {
            TokenKind::Plus => {
                self.advance();
                Ast::Polarity { op: PolarityOp::Plus, expr: Box::new(self.parse_polarity()?) }
            }
            TokenKind::Minus => {
                self.advance();
                Ast::Polarity { op: PolarityOp::Minus, expr: Box::new(self.parse_polarity()?) }
            }
            _ => self.parse_type()?,
        };
        self.exit();
        Ok(result)
    }

    fn parse_type(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_indexer()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Is => TypeOp::Is,
                TokenKind::As => TypeOp::As,
                _ => break,
            };
            self.advance();
            let type_name = self.parse_qualified_identifier()?;
            left = Ast::Type { expr: Box::new(left), op, type_name };
        }
        self.exit();
        Ok(left)
    }

    fn parse_indexer(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_invocation()?;
        while self.is(TokenKind::OpenBracket) {
            self.advance();
            let index = self.parse_implies()?;
            self.expect(TokenKind::CloseBracket)?;
            left = Ast::Indexer { target: Box::new(left), index: Box::new(index) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_invocation(&mut self) -> Result<Ast> {
        self.enter()?;
        let mut left = self.parse_term()?;
        while self.is(TokenKind::Dot) {
            self.advance();
            let invocation = self.parse_invocation_term()?;
            left = Ast::Invocation { target: Box::new(left), invocation: Box::new(invocation) };
        }
        self.exit();
        Ok(left)
    }

    fn parse_invocation_term(&mut self) -> Result<Ast> {
        match self.current().kind {
            TokenKind::This => {
                self.advance();
                Ok(Ast::This)
            }
            TokenKind::Index => {
                self.advance();
                Ok(Ast::Index)
            }
            TokenKind::Total => {
                self.advance();
                Ok(Ast::Total)
            }
            _ => self.parse_member_or_function(),
        }
    }

    fn parse_member_or_function(&mut self) -> Result<Ast> {
        let name = self.parse_identifier_name()?;
        if self.is(TokenKind::OpenParen) {
            self.advance();
            let mut args = Vec::new();
            if !self.is(TokenKind::CloseParen) {
                args.push(self.parse_implies()?);
                while self.is(TokenKind::Comma) {
                    self.advance();
                    args.push(self.parse_implies()?);
                }
            }
            self.expect(TokenKind::CloseParen)?;
            Ok(Ast::FunctionInvocation { name, args })
        } else {
            Ok(Ast::MemberInvocation(name))
        }
    }

    /// A bare identifier, or one of the keyword tokens reused as a plain
    /// name in member-invocation position (`value.as(...)` parses `as` as
    /// the type operator, but `Patient.contains` must still work).
    fn parse_identifier_name(&mut self) -> Result<String> {
        let token = self.current().clone();
        let name = match token.kind {
            TokenKind::Identifier | TokenKind::DelimitedIdentifier => token.text.clone(),
            TokenKind::As
            | TokenKind::Is
            | TokenKind::Div
            | TokenKind::Mod
            | TokenKind::In
            | TokenKind::Contains
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Xor
            | TokenKind::Implies
            | TokenKind::True
            | TokenKind::False => token.text.clone(),
            _ => {
                return Err(Error::Parse {
                    message: format!("expected identifier, found {:?}", token.kind),
                    position: token.position,
                })
            }
        };
        self.advance();
        Ok(name)
    }

    fn parse_qualified_identifier(&mut self) -> Result<String> {
        let mut parts = vec![self.parse_identifier_name()?];
        while self.is(TokenKind::Dot) {
            self.advance();
            parts.push(self.parse_identifier_name()?);
        }
        Ok(parts.join("."))
    }

    fn parse_term(&mut self) -> Result<Ast> {
        self.enter()?;
        let result = match self.current().kind {
            TokenKind::OpenParen => {
                self.advance();
                let expr = self.parse_implies()?;
                self.expect(TokenKind::CloseParen)?;
                Ast::Parenthesized(Box::new(expr))
            }
            TokenKind::OpenBrace => {
                self.advance();
                self.expect(TokenKind::CloseBrace)?;
                Ast::Null
            }
            TokenKind::True => {
                self.advance();
                Ast::Boolean(true)
            }
            TokenKind::False => {
                self.advance();
                Ast::Boolean(false)
            }
            TokenKind::StringLiteral => {
                let token = self.advance();
                Ast::String(token.text)
            }
            TokenKind::NumberLiteral => {
                let token = self.advance();
                self.parse_number_or_quantity(token.text)?
            }
            TokenKind::DateLiteral => {
                let token = self.advance();
                let date = DateValue::parse(&token.text)
                    .ok_or_else(|| Error::Parse { message: format!("invalid date literal '{}'", token.text), position: token.position })?;
                Ast::Date(date)
            }
            TokenKind::DateTimeLiteral => {
                let token = self.advance();
                let dt = DateTimeValue::parse(&token.text)
                    .ok_or_else(|| Error::Parse { message: format!("invalid datetime literal '{}'", token.text), position: token.position })?;
                Ast::DateTime(dt)
            }
            TokenKind::TimeLiteral => {
                let token = self.advance();
                let time = TimeValue::parse(&token.text)
                    .ok_or_else(|| Error::Parse { message: format!("invalid time literal '{}'", token.text), position: token.position })?;
                Ast::Time(time)
            }
            TokenKind::ExternalConstant => {
                let token = self.advance();
                Ast::ExternalConstant(token.text)
            }
            _ => self.parse_invocation_term()?,
        };
        self.exit();
        Ok(result)
    }

    /// A number literal optionally followed by a UCUM/calendar unit,
    /// which makes it a quantity literal (`4 'mg'`, `1 year`).
    fn parse_number_or_quantity(&mut self, text: String) -> Result<Ast> {
        let value = if text.contains('.') {
            fhirkit_values::decimal::parse(&text)
        } else {
            text.parse::<i64>().ok().map(fhirkit_values::decimal::from_i64)
        };
        let Some(value) = value else {
            return Err(Error::Parse { message: format!("invalid numeric literal '{text}'"), position: self.current().position });
        };

        let unit = match self.current().kind {
            TokenKind::StringLiteral => Some(self.advance().text),
            TokenKind::Identifier => {
                let calendar_units = ["year", "years", "month", "months", "week", "weeks", "day", "days", "hour", "hours", "minute", "minutes", "second", "seconds", "millisecond", "milliseconds"];
                if calendar_units.contains(&self.current().text.as_str()) {
                    Some(self.advance().text)
                } else {
                    None
                }
            }
            _ => None,
        };

        if unit.is_some() {
            return Ok(Ast::Quantity { value, unit });
        }
        if !text.contains('.') {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Ast::Integer(i));
            }
        }
        Ok(Ast::Number(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_path() {
        let ast = parse("Patient.name.given").unwrap();
        assert!(matches!(ast, Ast::Invocation { .. }));
    }

    #[test]
    fn parses_function_call_with_args() {
        let ast = parse("name.where(use = 'official')").unwrap();
        let Ast::Invocation { invocation, .. } = ast else { panic!("expected invocation") };
        let Ast::FunctionInvocation { name, args } = *invocation else { panic!("expected function") };
        assert_eq!(name, "where");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let ast = parse("true or false and true").unwrap();
        assert!(matches!(ast, Ast::Or { .. }));
    }

    #[test]
    fn parses_quantity_literal() {
        let ast = parse("5 'mg'").unwrap();
        assert!(matches!(ast, Ast::Quantity { unit: Some(_), .. }));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("true false").is_err());
    }
}
