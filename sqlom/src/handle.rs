//! Symbolic field handles: transient, per-clause values standing in for
//! "this entity's member X" so call sites never hard-code column strings.

use serde_json::Value;

use crate::runtime::{BindValue, CmpOp, Condition, SqlValue};

/// Value attached to a handle's pending comparison.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HandleValue {
    #[default]
    None,
    Literal(Value),
    List(Vec<Value>),
    /// Column-to-column comparison against another handle.
    Field(Box<FieldHandle>),
}

/// An immutable fluent builder for one query clause. Every method consumes
/// the handle and returns a new value, so state can never leak between
/// unrelated clauses; [`FieldHandle::reset`] reconstructs the bare default.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldHandle {
    entity: &'static str,
    name: &'static str,
    column: String,
    table: Option<String>,
    expr: Option<String>,
    out_alias: Option<String>,
    op: Option<CmpOp>,
    value: HandleValue,
    raw: bool,
}

impl FieldHandle {
    pub fn bound(entity: &'static str, name: &'static str, column: impl Into<String>) -> Self {
        Self {
            entity,
            name,
            column: column.into(),
            table: None,
            expr: None,
            out_alias: None,
            op: None,
            value: HandleValue::None,
            raw: false,
        }
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn op(&self) -> Option<CmpOp> {
        self.op
    }

    pub fn value(&self) -> &HandleValue {
        &self.value
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Binds the rendered column to a table alias (`alias.column`).
    pub fn table(mut self, alias: impl Into<String>) -> Self {
        self.table = Some(alias.into());
        self
    }

    /// Wraps the column in a SQL expression template; `{}` marks the spot
    /// the column reference lands in, e.g. `wrap("SUM({})")`.
    pub fn wrap(mut self, template: impl Into<String>) -> Self {
        self.expr = Some(template.into());
        self
    }

    /// Appends an output alias (`... AS alias`) to the rendered reference.
    pub fn as_alias(mut self, alias: impl Into<String>) -> Self {
        self.out_alias = Some(alias.into());
        self
    }

    /// Marks the pending value as a raw SQL fragment instead of a bindable
    /// literal.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn cmp(mut self, op: CmpOp, value: impl Into<Value>) -> Self {
        self.op = Some(op);
        self.value = HandleValue::Literal(value.into());
        self
    }

    pub fn eq(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::Ne, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::Ge, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::Le, value)
    }

    pub fn like(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::Like, value)
    }

    pub fn not_like(self, value: impl Into<Value>) -> Self {
        self.cmp(CmpOp::NotLike, value)
    }

    pub fn is_in<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.op = Some(CmpOp::In);
        self.value = HandleValue::List(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn not_in<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.op = Some(CmpOp::NotIn);
        self.value = HandleValue::List(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_null(mut self) -> Self {
        self.op = Some(CmpOp::IsNull);
        self.value = HandleValue::None;
        self
    }

    pub fn is_not_null(mut self) -> Self {
        self.op = Some(CmpOp::IsNotNull);
        self.value = HandleValue::None;
        self
    }

    /// Compares this member's column against another handle's column.
    pub fn eq_field(mut self, other: FieldHandle) -> Self {
        self.op = Some(CmpOp::Eq);
        self.value = HandleValue::Field(Box::new(other));
        self
    }

    /// Clears expression, table alias, operator, raw flag, and value back
    /// to defaults, keeping only the member binding.
    pub fn reset(self) -> Self {
        Self::bound(self.entity, self.name, self.column)
    }

    /// Renders the column reference without the output alias, for use as a
    /// condition target or order key.
    pub fn render_target(&self) -> String {
        let mut rendered = match &self.table {
            Some(alias) => format!("{alias}.{}", self.column),
            None => self.column.clone(),
        };
        if let Some(template) = &self.expr {
            rendered = template.replace("{}", &rendered);
        }
        rendered
    }

    /// Renders the final column reference: raw column, then table-alias
    /// prefix, then expression wrap, then output alias, in that fixed
    /// order. Never mutates the handle.
    pub fn build(&self) -> String {
        let mut rendered = self.render_target();
        if let Some(alias) = &self.out_alias {
            rendered = format!("{rendered} AS {alias}");
        }
        rendered
    }

    /// Converts the pending comparison into an executor condition with the
    /// naive literal conversion. The query layer applies metadata-aware
    /// encoding instead; this form serves direct executor use.
    pub fn condition(&self) -> Option<Condition> {
        let op = self.op?;
        let value = match &self.value {
            HandleValue::None => BindValue::None,
            HandleValue::Literal(value) => {
                if self.raw {
                    match value {
                        Value::String(sql) => BindValue::Raw(sql.clone()),
                        other => BindValue::Raw(other.to_string()),
                    }
                } else {
                    BindValue::Literal(SqlValue::from_json(value.clone()))
                }
            }
            HandleValue::List(values) => BindValue::List(
                values
                    .iter()
                    .map(|value| SqlValue::from_json(value.clone()))
                    .collect(),
            ),
            HandleValue::Field(other) => BindValue::Column(other.render_target()),
        };
        Some(Condition {
            target: self.render_target(),
            op,
            value,
        })
    }
}
