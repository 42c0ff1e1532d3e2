use crate::errors::DbError;
use bson::{Document, doc};
use std::fmt;
use std::str::FromStr;

/// The closed vocabulary of symbolic comparison tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Not,
}

impl ConditionOp {
    pub const ALL: [Self; 7] = [Self::Eq, Self::Ne, Self::Gt, Self::Gte, Self::Lt, Self::Lte, Self::Not];

    /// Looks up a symbolic token (`==`, `!=`, `>`, `>=`, `<`, `<=`, `!`).
    ///
    /// # Errors
    /// Returns `DbError::UnsupportedOperator` for anything outside the vocabulary.
    pub fn from_token(token: &str) -> Result<Self, DbError> {
        Ok(match token {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            "!" => Self::Not,
            other => return Err(DbError::UnsupportedOperator(other.to_string())),
        })
    }

    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Not => "!",
        }
    }

    /// Native operator key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Not => "$not",
        }
    }
}

impl FromStr for ConditionOp {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s)
    }
}

impl fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Rewrites `{ "<token>": value, .. }` into `{ "$op": value, .. }`.
///
/// Entry order and operands are kept as given. One unknown token fails the whole condition.
///
/// # Errors
/// Returns `DbError::UnsupportedOperator` naming the first unknown token.
pub fn translate(condition: &Document) -> Result<Document, DbError> {
    let mut out = Document::new();
    for (token, value) in condition {
        let op = ConditionOp::from_token(token)?;
        out.insert(op.key(), value.clone());
    }
    Ok(out)
}

/// Case-insensitive regular expression condition.
#[must_use]
pub fn match_regex(pattern: &str) -> Document {
    doc! { "$regex": pattern, "$options": "i" }
}
