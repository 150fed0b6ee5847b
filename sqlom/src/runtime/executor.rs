//! The relational collaborator boundary: structured statements handed to an
//! opaque executor, which returns raw rows or affected-row counts.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Number, Value};

use crate::errors::OrmError;

/// Scalar value at the storage boundary. Rows never carry nested
/// structures; arrays and objects are encoded to text before reaching this
/// type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl SqlValue {
    /// Converts a storage scalar into its JSON representation for the
    /// decode pipeline.
    pub fn into_json(self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Int(value) => Value::Number(value.into()),
            SqlValue::Float(value) => Number::from_f64(value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Bool(value) => Value::Bool(value),
            SqlValue::Text(value) => Value::String(value),
        }
    }

    /// Lossy conversion from a JSON scalar. Non-scalar input is serialized
    /// to text, matching the "no nested structures at the boundary" rule.
    pub fn from_json(value: Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(flag) => SqlValue::Bool(flag),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    SqlValue::Int(int)
                } else {
                    SqlValue::Float(number.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(text) => SqlValue::Text(text),
            other => SqlValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(value) => Some(*value as f64),
            SqlValue::Float(value) => Some(*value),
            SqlValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            SqlValue::Text(text) => text.parse().ok(),
            SqlValue::Null => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Int(value) => write!(f, "{value}"),
            SqlValue::Float(value) => write!(f, "{value}"),
            SqlValue::Bool(value) => write!(f, "{}", if *value { 1 } else { 0 }),
            SqlValue::Text(value) => write!(f, "'{value}'"),
        }
    }
}

/// One raw storage row: a flat column-keyed scalar map.
pub type Row = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl CmpOp {
    pub fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Like => "LIKE",
            CmpOp::NotLike => "NOT LIKE",
            CmpOp::In => "IN",
            CmpOp::NotIn => "NOT IN",
            CmpOp::IsNull => "IS NULL",
            CmpOp::IsNotNull => "IS NOT NULL",
        }
    }
}

/// Right-hand side of a condition. `Literal` values are bound by the
/// executor; `Raw` passes through unquoted (the escape hatch); `Column`
/// compares against another column reference.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Literal(SqlValue),
    List(Vec<SqlValue>),
    Column(String),
    Raw(String),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub target: String,
    pub op: CmpOp,
    pub value: BindValue,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            BindValue::None => write!(f, "{} {}", self.target, self.op.sql()),
            BindValue::Literal(value) => write!(f, "{} {} {}", self.target, self.op.sql(), value),
            BindValue::List(values) => {
                let rendered: Vec<String> = values.iter().map(|value| value.to_string()).collect();
                write!(f, "{} {} ({})", self.target, self.op.sql(), rendered.join(", "))
            }
            BindValue::Column(column) => write!(f, "{} {} {}", self.target, self.op.sql(), column),
            BindValue::Raw(sql) => write!(f, "{} {} {}", self.target, self.op.sql(), sql),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Max,
    Min,
    Avg,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub func: AggregateFn,
    pub target: String,
}

#[derive(Debug, Clone, Default)]
pub struct SelectStatement {
    pub table: String,
    /// Rendered column references; empty means "all columns".
    pub columns: Vec<String>,
    pub joins: Vec<Join>,
    pub wheres: Vec<Condition>,
    pub orders: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub aggregate: Option<Aggregate>,
}

/// A column value headed for storage: either a bindable scalar or a raw SQL
/// expression (`["exp", ...]` escape hatch).
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Value(SqlValue),
    Expr(String),
}

#[derive(Debug, Clone, Default)]
pub struct InsertStatement {
    pub table: String,
    pub values: Vec<(String, WriteValue)>,
    /// Primary-key column, when known; lets executors report generated ids.
    pub primary: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateStatement {
    pub table: String,
    pub values: Vec<(String, WriteValue)>,
    pub wheres: Vec<Condition>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteStatement {
    pub table: String,
    pub wheres: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOutcome {
    pub affected: u64,
    pub last_insert_id: Option<i64>,
}

/// The relational query executor. sqlom feeds it structured statements and
/// expects raw rows back; everything behind this trait is an external
/// collaborator.
pub trait SqlExecutor {
    fn select(&mut self, stmt: &SelectStatement) -> Result<Vec<Row>, OrmError>;
    fn scalar(&mut self, stmt: &SelectStatement) -> Result<Option<SqlValue>, OrmError>;
    fn insert(&mut self, stmt: &InsertStatement) -> Result<WriteOutcome, OrmError>;
    fn update(&mut self, stmt: &UpdateStatement) -> Result<u64, OrmError>;
    fn delete(&mut self, stmt: &DeleteStatement) -> Result<u64, OrmError>;

    fn begin(&mut self) -> Result<(), OrmError>;
    fn commit(&mut self) -> Result<(), OrmError>;
    fn rollback(&mut self) -> Result<(), OrmError>;
}
