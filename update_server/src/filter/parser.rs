//! Recursive-descent parser for the filter grammar.

use crate::error::CoreError;

use super::{CmpOp, Comparison, Field, FilterNode, Literal};

pub fn parse(expression: &str) -> Result<FilterNode, CoreError> {
    let mut p = Parser::new(expression);
    p.skip_ws();
    if p.at_end() {
        return Err(err("empty filter expression"));
    }
    let node = p.or_expr()?;
    p.skip_ws();
    if !p.at_end() {
        return Err(err(format!(
            "unexpected trailing input at offset {}",
            p.pos
        )));
    }
    Ok(node)
}

fn err(msg: impl Into<String>) -> CoreError {
    CoreError::InvalidFilterQuery(msg.into())
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consume a word connector (`and` / `or`) if it stands alone.
    fn eat_keyword(&mut self, word: &str) -> bool {
        let start = self.pos;
        for expected in word.chars() {
            match self.peek() {
                Some(c) if c.eq_ignore_ascii_case(&expected) => {
                    self.pos += 1;
                }
                _ => {
                    self.pos = start;
                    return false;
                }
            }
        }
        // Must be followed by whitespace, a group, or end of input.
        match self.peek() {
            None | Some('(') => true,
            Some(c) if c.is_whitespace() => true,
            _ => {
                self.pos = start;
                false
            }
        }
    }

    fn or_expr(&mut self) -> Result<FilterNode, CoreError> {
        let mut operands = vec![self.and_expr()?];
        loop {
            self.skip_ws();
            if self.peek() == Some(',') {
                self.pos += 1;
            } else if !self.eat_keyword("or") {
                break;
            }
            self.skip_ws();
            operands.push(self.and_expr()?);
        }
        Ok(if operands.len() == 1 {
            operands.pop().unwrap()
        } else {
            FilterNode::Or(operands)
        })
    }

    fn and_expr(&mut self) -> Result<FilterNode, CoreError> {
        let mut operands = vec![self.primary()?];
        loop {
            self.skip_ws();
            if self.peek() == Some(';') {
                self.pos += 1;
            } else if !self.eat_keyword("and") {
                break;
            }
            self.skip_ws();
            operands.push(self.primary()?);
        }
        Ok(if operands.len() == 1 {
            operands.pop().unwrap()
        } else {
            FilterNode::And(operands)
        })
    }

    fn primary(&mut self) -> Result<FilterNode, CoreError> {
        self.skip_ws();
        if self.peek() == Some('(') {
            self.pos += 1;
            let node = self.or_expr()?;
            self.skip_ws();
            if self.bump() != Some(')') {
                return Err(err("unbalanced parentheses"));
            }
            return Ok(node);
        }
        self.comparison().map(FilterNode::Cmp)
    }

    fn comparison(&mut self) -> Result<Comparison, CoreError> {
        let selector = self.selector()?;
        let field = parse_field(&selector)?;
        let op = self.operator()?;
        let values = self.arguments()?;
        if values.is_empty() {
            return Err(err(format!("missing value for selector '{selector}'")));
        }
        if !matches!(op, CmpOp::In | CmpOp::Out) && values.len() > 1 {
            return Err(err(format!(
                "operator for selector '{selector}' takes a single value"
            )));
        }
        Ok(Comparison { field, op, values })
    }

    fn selector(&mut self) -> Result<String, CoreError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(err(format!("expected selector at offset {}", self.pos)));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn operator(&mut self) -> Result<CmpOp, CoreError> {
        match self.peek() {
            Some('=') => {
                self.pos += 1;
                match self.peek() {
                    Some('=') => {
                        self.pos += 1;
                        Ok(CmpOp::Eq)
                    }
                    _ => {
                        let word = self.selector()?;
                        if self.bump() != Some('=') {
                            return Err(err(format!("malformed operator '={word}'")));
                        }
                        match word.to_ascii_lowercase().as_str() {
                            "ge" => Ok(CmpOp::Ge),
                            "le" => Ok(CmpOp::Le),
                            "gt" => Ok(CmpOp::Gt),
                            "lt" => Ok(CmpOp::Lt),
                            "in" => Ok(CmpOp::In),
                            "out" => Ok(CmpOp::Out),
                            other => Err(err(format!("unknown operator '={other}='"))),
                        }
                    }
                }
            }
            Some('!') => {
                self.pos += 1;
                if self.bump() != Some('=') {
                    return Err(err("malformed operator '!'"));
                }
                Ok(CmpOp::Ne)
            }
            _ => Err(err(format!("expected operator at offset {}", self.pos))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Literal>, CoreError> {
        self.skip_ws();
        if self.peek() == Some('(') {
            self.pos += 1;
            let mut values = Vec::new();
            loop {
                self.skip_ws();
                values.push(self.value()?);
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some(')') => break,
                    _ => return Err(err("unterminated value list")),
                }
            }
            Ok(values)
        } else {
            Ok(vec![self.value()?])
        }
    }

    fn value(&mut self) -> Result<Literal, CoreError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let mut out = String::new();
                loop {
                    match self.bump() {
                        Some('\\') => match self.bump() {
                            Some(c) => out.push(c),
                            None => return Err(err("unterminated escape in quoted value")),
                        },
                        Some(c) if c == quote => break,
                        Some(c) => out.push(c),
                        None => return Err(err("unterminated quoted value")),
                    }
                }
                Ok(Literal::Value(out))
            }
            _ => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| !c.is_whitespace() && !matches!(c, ',' | ';' | '(' | ')'))
                {
                    self.pos += 1;
                }
                if self.pos == start {
                    return Err(err(format!("expected value at offset {}", self.pos)));
                }
                let raw: String = self.chars[start..self.pos].iter().collect();
                if raw.eq_ignore_ascii_case("null") {
                    Ok(Literal::Null)
                } else {
                    Ok(Literal::Value(raw))
                }
            }
        }
    }
}

fn parse_field(selector: &str) -> Result<Field, CoreError> {
    let lower = selector.to_ascii_lowercase();
    if let Some(key) = lower.strip_prefix("attribute.") {
        if key.is_empty() {
            return Err(err("empty attribute key"));
        }
        return Ok(Field::Attribute(key.to_string()));
    }
    match lower.as_str() {
        "controllerid" => Ok(Field::ControllerId),
        "name" => Ok(Field::Name),
        "updatestatus" => Ok(Field::UpdateStatus),
        "lastcontrollerrequestat" => Ok(Field::LastContact),
        "assignedds" => Ok(Field::AssignedDs),
        "installedds" => Ok(Field::InstalledDs),
        "tag" => Ok(Field::Tag),
        other => Err(err(format!("unknown selector '{other}'"))),
    }
}
