//! Recursive-descent parser for every expression context.
//!
//! One `ExpressionParser` is created per request and parses all of the
//! request's expressions, so placeholder usage is tracked across them:
//! every `#name`/`:name` used must be defined, and every defined one must be
//! used by at least one expression (checked by [`ExpressionParser::finish`]).

use std::collections::{HashMap, HashSet};

use crate::error::{PdbError, Result};
use crate::expression::ast::{
    CompareOp, Condition, DocumentPath, Operand, PathSegment, UpdateAction, UpdateExpression,
};
use crate::expression::lexer::{tokenize, Token};
use crate::expression::reserved::is_reserved;
use crate::types::AttributeValue;

/// Parser holding the request's placeholder environment.
pub struct ExpressionParser<'a> {
    names: Option<&'a HashMap<String, String>>,
    values: Option<&'a HashMap<String, AttributeValue>>,
    used_names: HashSet<String>,
    used_values: HashSet<String>,
}

impl<'a> ExpressionParser<'a> {
    pub fn new(
        names: Option<&'a HashMap<String, String>>,
        values: Option<&'a HashMap<String, AttributeValue>>,
    ) -> Self {
        Self {
            names,
            values,
            used_names: HashSet::new(),
            used_values: HashSet::new(),
        }
    }

    /// Parse a condition, filter, or key-condition expression.
    pub fn parse_condition(&mut self, text: &str) -> Result<Condition> {
        let tokens = tokenize(text)?;
        let mut cursor = Cursor::new(tokens, self);
        let condition = cursor.or_expr()?;
        cursor.expect_end()?;
        Ok(condition)
    }

    /// Parse an update expression.
    pub fn parse_update(&mut self, text: &str) -> Result<UpdateExpression> {
        let tokens = tokenize(text)?;
        let mut cursor = Cursor::new(tokens, self);
        let update = cursor.update_expr()?;
        cursor.expect_end()?;
        if update.actions.is_empty() {
            return Err(PdbError::validation("update expression is empty"));
        }
        check_duplicate_paths(&update)?;
        Ok(update)
    }

    /// Parse a projection expression: comma-separated paths.
    pub fn parse_projection(&mut self, text: &str) -> Result<Vec<DocumentPath>> {
        let tokens = tokenize(text)?;
        let mut cursor = Cursor::new(tokens, self);
        let mut paths = vec![cursor.path()?];
        while cursor.eat(&Token::Comma) {
            paths.push(cursor.path()?);
        }
        cursor.expect_end()?;
        Ok(paths)
    }

    /// Verify every supplied placeholder was used by some expression.
    ///
    /// Map keys may carry their wire sigil (`#name` / `:name`) or not;
    /// both spellings are accepted.
    pub fn finish(self) -> Result<()> {
        if let Some(names) = self.names {
            for name in names.keys() {
                if !self.used_names.contains(name.trim_start_matches('#')) {
                    return Err(PdbError::validation(format!(
                        "unused expression attribute name {name}"
                    )));
                }
            }
        }
        if let Some(values) = self.values {
            for name in values.keys() {
                if !self.used_values.contains(name.trim_start_matches(':')) {
                    return Err(PdbError::validation(format!(
                        "unused expression attribute value {name}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_name(&mut self, placeholder: &str) -> Result<String> {
        let resolved = self
            .names
            .and_then(|names| {
                names
                    .get(&format!("#{placeholder}"))
                    .or_else(|| names.get(placeholder))
            })
            .ok_or_else(|| {
                PdbError::validation(format!(
                    "expression attribute name #{placeholder} is not defined"
                ))
            })?;
        self.used_names.insert(placeholder.to_string());
        Ok(resolved.clone())
    }

    fn resolve_value(&mut self, placeholder: &str) -> Result<AttributeValue> {
        let resolved = self
            .values
            .and_then(|values| {
                values
                    .get(&format!(":{placeholder}"))
                    .or_else(|| values.get(placeholder))
            })
            .ok_or_else(|| {
                PdbError::validation(format!(
                    "expression attribute value :{placeholder} is not defined"
                ))
            })?;
        self.used_values.insert(placeholder.to_string());
        Ok(resolved.clone())
    }
}

fn check_duplicate_paths(update: &UpdateExpression) -> Result<()> {
    let mut seen = HashSet::new();
    for action in &update.actions {
        let rendered = action.path().to_string();
        if !seen.insert(rendered.clone()) {
            return Err(PdbError::validation(format!(
                "update expression references path {rendered} more than once"
            )));
        }
    }
    Ok(())
}

/// Condition function names, matched case-sensitively like DynamoDB does.
const CONDITION_FUNCTIONS: &[&str] = &[
    "attribute_exists",
    "attribute_not_exists",
    "attribute_type",
    "begins_with",
    "contains",
];

struct Cursor<'a, 'p> {
    tokens: Vec<Token>,
    pos: usize,
    parser: &'a mut ExpressionParser<'p>,
}

impl<'a, 'p> Cursor<'a, 'p> {
    fn new(tokens: Vec<Token>, parser: &'a mut ExpressionParser<'p>) -> Self {
        Self {
            tokens,
            pos: 0,
            parser,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| PdbError::validation("unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        let found = self.next()?;
        if found != token {
            return Err(PdbError::validation(format!(
                "expected {} but found {}",
                token.describe(),
                found.describe()
            )));
        }
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        let found = self.next()?;
        if !found.is_keyword(keyword) {
            return Err(PdbError::validation(format!(
                "expected {keyword} but found {}",
                found.describe()
            )));
        }
        Ok(())
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(PdbError::validation(format!(
                "unexpected trailing {}",
                token.describe()
            ))),
        }
    }

    // ---- conditions ----

    fn or_expr(&mut self) -> Result<Condition> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Condition> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Condition> {
        if self.eat_keyword("NOT") {
            let inner = self.not_expr()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.primary_condition()
    }

    fn primary_condition(&mut self) -> Result<Condition> {
        // Parenthesized sub-expression. A '(' can only start a group here;
        // operand parentheses do not occur in this grammar.
        if self.eat(&Token::LParen) {
            let inner = self.or_expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        if let Some(Token::Ident(name)) = self.peek() {
            if CONDITION_FUNCTIONS.contains(&name.as_str())
                && self.peek_ahead(1) == Some(&Token::LParen)
            {
                return self.condition_function();
            }
        }

        let left = self.operand()?;
        self.relation(left)
    }

    fn condition_function(&mut self) -> Result<Condition> {
        let name = match self.next()? {
            Token::Ident(name) => name,
            other => {
                return Err(PdbError::validation(format!(
                    "expected function name, found {}",
                    other.describe()
                )))
            }
        };
        self.expect(Token::LParen)?;
        let condition = match name.as_str() {
            "attribute_exists" => Condition::AttributeExists(self.path()?),
            "attribute_not_exists" => Condition::AttributeNotExists(self.path()?),
            "attribute_type" => {
                let path = self.path()?;
                self.expect(Token::Comma)?;
                let type_operand = self.operand()?;
                Condition::AttributeType(path, type_operand)
            }
            "begins_with" => {
                let target = self.operand()?;
                self.expect(Token::Comma)?;
                let prefix = self.operand()?;
                Condition::BeginsWith(target, prefix)
            }
            "contains" => {
                let haystack = self.operand()?;
                self.expect(Token::Comma)?;
                let needle = self.operand()?;
                Condition::Contains(haystack, needle)
            }
            other => {
                return Err(PdbError::validation(format!(
                    "unknown condition function {other}"
                )))
            }
        };
        self.expect(Token::RParen)?;
        Ok(condition)
    }

    fn relation(&mut self, left: Operand) -> Result<Condition> {
        if self.eat_keyword("BETWEEN") {
            let low = self.operand()?;
            self.expect_keyword("AND")?;
            let high = self.operand()?;
            return Ok(Condition::Between(left, low, high));
        }
        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut members = vec![self.operand()?];
            while self.eat(&Token::Comma) {
                members.push(self.operand()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Condition::In(left, members));
        }
        let op = match self.next()? {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            other => {
                return Err(PdbError::validation(format!(
                    "expected comparator, found {}",
                    other.describe()
                )))
            }
        };
        let right = self.operand()?;
        Ok(Condition::Compare(op, left, right))
    }

    /// Operand in a condition: path, value placeholder, or `size(path)`.
    fn operand(&mut self) -> Result<Operand> {
        match self.peek() {
            Some(Token::ValuePlaceholder(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(Operand::Value(self.parser.resolve_value(&name)?))
            }
            Some(Token::Ident(name))
                if name == "size" && self.peek_ahead(1) == Some(&Token::LParen) =>
            {
                self.pos += 1;
                self.expect(Token::LParen)?;
                let path = self.path()?;
                self.expect(Token::RParen)?;
                Ok(Operand::Size(path))
            }
            _ => Ok(Operand::Path(self.path()?)),
        }
    }

    // ---- update expressions ----

    fn update_expr(&mut self) -> Result<UpdateExpression> {
        let mut actions = Vec::new();
        let mut seen_clauses: HashSet<String> = HashSet::new();
        while let Some(token) = self.peek() {
            let clause = match token {
                Token::Ident(word) => word.to_ascii_uppercase(),
                other => {
                    return Err(PdbError::validation(format!(
                        "expected update clause, found {}",
                        other.describe()
                    )))
                }
            };
            if !matches!(clause.as_str(), "SET" | "REMOVE" | "ADD" | "DELETE") {
                return Err(PdbError::validation(format!(
                    "unknown update clause {clause}"
                )));
            }
            if !seen_clauses.insert(clause.clone()) {
                return Err(PdbError::validation(format!(
                    "update clause {clause} appears more than once"
                )));
            }
            self.pos += 1;
            loop {
                match clause.as_str() {
                    "SET" => {
                        let path = self.path()?;
                        self.expect(Token::Eq)?;
                        let value = self.set_operand()?;
                        actions.push(UpdateAction::Set { path, value });
                    }
                    "REMOVE" => {
                        let path = self.path()?;
                        actions.push(UpdateAction::Remove { path });
                    }
                    "ADD" => {
                        let path = self.path()?;
                        let value = self.literal_value()?;
                        actions.push(UpdateAction::Add { path, value });
                    }
                    "DELETE" => {
                        let path = self.path()?;
                        let value = self.literal_value()?;
                        actions.push(UpdateAction::Delete { path, value });
                    }
                    _ => unreachable!(),
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        Ok(UpdateExpression { actions })
    }

    /// `SET` operand: term, optionally `term + term` or `term - term`.
    fn set_operand(&mut self) -> Result<Operand> {
        let left = self.set_term()?;
        if self.eat(&Token::Plus) {
            let right = self.set_term()?;
            return Ok(Operand::Plus(Box::new(left), Box::new(right)));
        }
        if self.eat(&Token::Minus) {
            let right = self.set_term()?;
            return Ok(Operand::Minus(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn set_term(&mut self) -> Result<Operand> {
        match self.peek() {
            Some(Token::ValuePlaceholder(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(Operand::Value(self.parser.resolve_value(&name)?))
            }
            Some(Token::Ident(name))
                if name == "if_not_exists" && self.peek_ahead(1) == Some(&Token::LParen) =>
            {
                self.pos += 1;
                self.expect(Token::LParen)?;
                let path = self.path()?;
                self.expect(Token::Comma)?;
                let fallback = self.set_operand()?;
                self.expect(Token::RParen)?;
                Ok(Operand::IfNotExists(path, Box::new(fallback)))
            }
            Some(Token::Ident(name))
                if name == "list_append" && self.peek_ahead(1) == Some(&Token::LParen) =>
            {
                self.pos += 1;
                self.expect(Token::LParen)?;
                let first = self.set_operand()?;
                self.expect(Token::Comma)?;
                let second = self.set_operand()?;
                self.expect(Token::RParen)?;
                Ok(Operand::ListAppend(Box::new(first), Box::new(second)))
            }
            _ => Ok(Operand::Path(self.path()?)),
        }
    }

    /// `ADD`/`DELETE` operand: a value placeholder only.
    fn literal_value(&mut self) -> Result<AttributeValue> {
        match self.next()? {
            Token::ValuePlaceholder(name) => self.parser.resolve_value(&name),
            other => Err(PdbError::validation(format!(
                "expected :value placeholder, found {}",
                other.describe()
            ))),
        }
    }

    // ---- paths ----

    fn path(&mut self) -> Result<DocumentPath> {
        let mut segments = vec![PathSegment::Field(self.field_name()?)];
        loop {
            if self.eat(&Token::Dot) {
                segments.push(PathSegment::Field(self.field_name()?));
            } else if self.eat(&Token::LBracket) {
                let index = match self.next()? {
                    Token::Number(n) => n,
                    other => {
                        return Err(PdbError::validation(format!(
                            "expected list index, found {}",
                            other.describe()
                        )))
                    }
                };
                self.expect(Token::RBracket)?;
                segments.push(PathSegment::Index(index));
            } else {
                break;
            }
        }
        Ok(DocumentPath { segments })
    }

    fn field_name(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(name) => {
                if is_reserved(&name) {
                    return Err(PdbError::validation(format!(
                        "attribute name {name} is a reserved word; use an expression attribute name"
                    )));
                }
                Ok(name)
            }
            Token::NamePlaceholder(placeholder) => self.parser.resolve_name(&placeholder),
            other => Err(PdbError::validation(format!(
                "expected attribute name, found {}",
                other.describe()
            ))),
        }
    }
}
