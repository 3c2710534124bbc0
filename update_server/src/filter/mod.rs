//! Target filter queries — RSQL-like grammar, parsed and evaluated in-core.
//!
//! `==`, `!=`, `=ge=`, `=le=`, `=gt=`, `=lt=`, `=in=`, `=out=`; `;`/`and`
//! binds tighter than `,`/`or`; parentheses group. The `null` literal
//! expresses null checks. Virtual properties (`${now_ts}`, `${overdue_ts}`)
//! are resolved textually before parsing.

mod eval;
mod parser;
pub mod virtual_props;

use crate::error::CoreError;

/// Comparison operators of the filter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    In,
    Out,
}

/// Target fields addressable by a filter selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    ControllerId,
    Name,
    UpdateStatus,
    LastContact,
    AssignedDs,
    InstalledDs,
    Tag,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Value(String),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub field: Field,
    pub op: CmpOp,
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Cmp(Comparison),
}

/// A parsed filter query, ready for repeated evaluation against targets.
#[derive(Debug, Clone)]
pub struct FilterQuery {
    pub expression: String,
    root: FilterNode,
}

impl FilterQuery {
    pub fn parse(expression: &str) -> Result<Self, CoreError> {
        let root = parser::parse(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            root,
        })
    }

    pub fn matches(&self, target: &crate::models::Target) -> bool {
        eval::matches(&self.root, target)
    }
}
