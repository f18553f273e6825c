//! Expression AST shared by every expression context.

use std::fmt;

use crate::types::AttributeValue;

/// One step of a document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Map field access. The first segment is always a field.
    Field(String),
    /// List index access.
    Index(u32),
}

/// A navigation path into an item: `a.b[2].c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    pub segments: Vec<PathSegment>,
}

impl DocumentPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Field(name.into())],
        }
    }

    /// Top-level attribute this path starts at.
    pub fn root_name(&self) -> &str {
        match &self.segments[0] {
            PathSegment::Field(name) => name,
            PathSegment::Index(_) => unreachable!("paths always start at a field"),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Field(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// A value-producing operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(DocumentPath),
    /// Literal resolved from a `:placeholder` at parse time.
    Value(AttributeValue),
    Size(DocumentPath),
    IfNotExists(DocumentPath, Box<Operand>),
    ListAppend(Box<Operand>, Box<Operand>),
    /// `a + b`, update `SET` only.
    Plus(Box<Operand>, Box<Operand>),
    /// `a - b`, update `SET` only.
    Minus(Box<Operand>, Box<Operand>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Boolean predicate over an item.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare(CompareOp, Operand, Operand),
    Between(Operand, Operand, Operand),
    In(Operand, Vec<Operand>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    AttributeExists(DocumentPath),
    AttributeNotExists(DocumentPath),
    AttributeType(DocumentPath, Operand),
    BeginsWith(Operand, Operand),
    Contains(Operand, Operand),
}

/// One clause action of an update expression.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Set {
        path: DocumentPath,
        value: Operand,
    },
    Remove {
        path: DocumentPath,
    },
    Add {
        path: DocumentPath,
        value: AttributeValue,
    },
    Delete {
        path: DocumentPath,
        value: AttributeValue,
    },
}

impl UpdateAction {
    pub fn path(&self) -> &DocumentPath {
        match self {
            UpdateAction::Set { path, .. }
            | UpdateAction::Remove { path }
            | UpdateAction::Add { path, .. }
            | UpdateAction::Delete { path, .. } => path,
        }
    }
}

/// A parsed `UpdateExpression`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    pub actions: Vec<UpdateAction>,
}
