//! Filter expression AST for search and count (§4.2, §6): `{eq?, ne?,
//! any_of?, none_of?, gt?, lt?, gte?, lte?, between?}`. Only the operators
//! meaningful for a field's type are accepted; everything else rejects at
//! parse time with `InputInvalid`, never at query time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemoryCoreError, Result};

/// A filter expression tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FilterExpr {
    And {
        #[serde(rename = "and")]
        conditions: Vec<FilterExpr>,
    },
    Or {
        #[serde(rename = "or")]
        conditions: Vec<FilterExpr>,
    },
    Condition(FieldCondition),
}

/// One field bound to one operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub op: FilterOp,
}

/// The operator set named in §6, each carrying its operand(s).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    AnyOf(Vec<Value>),
    NoneOf(Vec<Value>),
    Gt(Value),
    Lt(Value),
    Gte(Value),
    Lte(Value),
    Between(Value, Value),
}

/// Query-able fields named in §4.6: `namespace, user_id, session_id, topics,
/// entities, memory_type, created_at, last_accessed_at, event_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPath {
    Namespace,
    UserId,
    SessionId,
    Topics,
    Entities,
    MemoryType,
    CreatedAt,
    LastAccessedAt,
    EventDate,
}

/// Scalar vs. set vs. range field shape; determines which operators a field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldShape {
    /// A single string/enum value: `eq`, `ne`, `any_of`, `none_of`.
    Scalar,
    /// A set field (topics/entities): `any_of`, `none_of` only, matched via containment.
    SetMembership,
    /// A timestamp: `gt`, `lt`, `gte`, `lte`, `between`, plus `eq`/`ne`.
    Range,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self> {
        match path {
            "namespace" => Ok(FieldPath::Namespace),
            "user_id" => Ok(FieldPath::UserId),
            "session_id" => Ok(FieldPath::SessionId),
            "topics" => Ok(FieldPath::Topics),
            "entities" => Ok(FieldPath::Entities),
            "memory_type" => Ok(FieldPath::MemoryType),
            "created_at" => Ok(FieldPath::CreatedAt),
            "last_accessed_at" => Ok(FieldPath::LastAccessedAt),
            "event_date" => Ok(FieldPath::EventDate),
            other => Err(MemoryCoreError::InputInvalid(format!(
                "unknown filter field: {other}. valid fields: namespace, user_id, session_id, \
                 topics, entities, memory_type, created_at, last_accessed_at, event_date"
            ))),
        }
    }

    fn shape(self) -> FieldShape {
        match self {
            FieldPath::Namespace
            | FieldPath::UserId
            | FieldPath::SessionId
            | FieldPath::MemoryType => FieldShape::Scalar,
            FieldPath::Topics | FieldPath::Entities => FieldShape::SetMembership,
            FieldPath::CreatedAt | FieldPath::LastAccessedAt | FieldPath::EventDate => {
                FieldShape::Range
            }
        }
    }

    fn sql_column(self) -> &'static str {
        match self {
            FieldPath::Namespace => "namespace",
            FieldPath::UserId => "user_id",
            FieldPath::SessionId => "session_id",
            FieldPath::MemoryType => "memory_type",
            FieldPath::CreatedAt => "created_at",
            FieldPath::LastAccessedAt => "last_accessed_at",
            FieldPath::EventDate => "event_date",
            // Topics/entities are set fields handled via EXISTS subqueries.
            FieldPath::Topics | FieldPath::Entities => "",
        }
    }

    fn set_table(self) -> &'static str {
        match self {
            FieldPath::Topics => "record_topics",
            FieldPath::Entities => "record_entities",
            _ => unreachable!(),
        }
    }
}

fn op_name(op: &FilterOp) -> &'static str {
    match op {
        FilterOp::Eq(_) => "eq",
        FilterOp::Ne(_) => "ne",
        FilterOp::AnyOf(_) => "any_of",
        FilterOp::NoneOf(_) => "none_of",
        FilterOp::Gt(_) => "gt",
        FilterOp::Lt(_) => "lt",
        FilterOp::Gte(_) => "gte",
        FilterOp::Lte(_) => "lte",
        FilterOp::Between(_, _) => "between",
    }
}

fn check_allowed(field: FieldPath, op: &FilterOp) -> Result<()> {
    let allowed = match field.shape() {
        FieldShape::Scalar => matches!(op, FilterOp::Eq(_) | FilterOp::Ne(_) | FilterOp::AnyOf(_) | FilterOp::NoneOf(_)),
        FieldShape::SetMembership => matches!(op, FilterOp::AnyOf(_) | FilterOp::NoneOf(_)),
        FieldShape::Range => matches!(
            op,
            FilterOp::Eq(_)
                | FilterOp::Ne(_)
                | FilterOp::Gt(_)
                | FilterOp::Lt(_)
                | FilterOp::Gte(_)
                | FilterOp::Lte(_)
                | FilterOp::Between(_, _)
        ),
    };
    if allowed {
        Ok(())
    } else {
        Err(MemoryCoreError::InputInvalid(format!(
            "operator '{}' is not valid for field '{:?}'",
            op_name(op),
            field
        )))
    }
}

/// Renders a [`FilterExpr`] to parameterized SQL against the `records` table
/// (aliased `r`), accumulating bound parameters in declaration order.
#[derive(Default)]
pub struct SqlBuilder {
    params: Vec<Box<dyn rusqlite::ToSql>>,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_filter(&mut self, expr: &FilterExpr) -> Result<String> {
        match expr {
            FilterExpr::And { conditions } => {
                if conditions.is_empty() {
                    return Ok("1=1".to_string());
                }
                let parts: Result<Vec<String>> =
                    conditions.iter().map(|c| self.build_filter(c)).collect();
                Ok(format!("({})", parts?.join(" AND ")))
            }
            FilterExpr::Or { conditions } => {
                if conditions.is_empty() {
                    return Ok("1=0".to_string());
                }
                let parts: Result<Vec<String>> =
                    conditions.iter().map(|c| self.build_filter(c)).collect();
                Ok(format!("({})", parts?.join(" OR ")))
            }
            FilterExpr::Condition(cond) => self.build_condition(cond),
        }
    }

    fn build_condition(&mut self, cond: &FieldCondition) -> Result<String> {
        let field = FieldPath::parse(&cond.field)?;
        check_allowed(field, &cond.op)?;

        if matches!(field, FieldPath::Topics | FieldPath::Entities) {
            return self.build_set_condition(field, &cond.op);
        }

        let column = format!("r.{}", field.sql_column());
        match &cond.op {
            FilterOp::Eq(v) => {
                self.push(v)?;
                Ok(format!("{column} = ?"))
            }
            FilterOp::Ne(v) => {
                self.push(v)?;
                Ok(format!("{column} != ?"))
            }
            FilterOp::Gt(v) => {
                self.push(v)?;
                Ok(format!("{column} > ?"))
            }
            FilterOp::Lt(v) => {
                self.push(v)?;
                Ok(format!("{column} < ?"))
            }
            FilterOp::Gte(v) => {
                self.push(v)?;
                Ok(format!("{column} >= ?"))
            }
            FilterOp::Lte(v) => {
                self.push(v)?;
                Ok(format!("{column} <= ?"))
            }
            FilterOp::Between(lo, hi) => {
                self.push(lo)?;
                self.push(hi)?;
                Ok(format!("{column} BETWEEN ? AND ?"))
            }
            FilterOp::AnyOf(values) => {
                let placeholders = self.push_many(values)?;
                Ok(format!("{column} IN ({placeholders})"))
            }
            FilterOp::NoneOf(values) => {
                let placeholders = self.push_many(values)?;
                Ok(format!("{column} NOT IN ({placeholders})"))
            }
        }
    }

    fn build_set_condition(&mut self, field: FieldPath, op: &FilterOp) -> Result<String> {
        let table = field.set_table();
        match op {
            FilterOp::AnyOf(values) => {
                let placeholders = self.push_many(values)?;
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {table} st WHERE st.record_id = r.id AND st.value IN ({placeholders}))"
                ))
            }
            FilterOp::NoneOf(values) => {
                let placeholders = self.push_many(values)?;
                Ok(format!(
                    "NOT EXISTS (SELECT 1 FROM {table} st WHERE st.record_id = r.id AND st.value IN ({placeholders}))"
                ))
            }
            _ => unreachable!("checked by check_allowed"),
        }
    }

    fn push(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::String(s) => self.params.push(Box::new(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    self.params.push(Box::new(i));
                } else if let Some(f) = n.as_f64() {
                    self.params.push(Box::new(f));
                } else {
                    return Err(MemoryCoreError::InputInvalid("invalid number".into()));
                }
            }
            Value::Bool(b) => self.params.push(Box::new(*b)),
            other => {
                return Err(MemoryCoreError::InputInvalid(format!(
                    "unsupported filter value: {other}"
                )))
            }
        }
        Ok(())
    }

    fn push_many(&mut self, values: &[Value]) -> Result<String> {
        if values.is_empty() {
            return Err(MemoryCoreError::InputInvalid(
                "any_of/none_of requires at least one value".into(),
            ));
        }
        for v in values {
            self.push(v)?;
        }
        Ok(values.iter().map(|_| "?").collect::<Vec<_>>().join(", "))
    }

    pub fn take_params(&mut self) -> Vec<Box<dyn rusqlite::ToSql>> {
        std::mem::take(&mut self.params)
    }
}

pub fn parse_filter(json: &Value) -> Result<FilterExpr> {
    serde_json::from_value(json.clone())
        .map_err(|e| MemoryCoreError::InputInvalid(format!("invalid filter syntax: {e}")))
}
