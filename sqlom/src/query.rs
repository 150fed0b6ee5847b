//! The active query layer: builds structured statements against one
//! entity's metadata, hands them to the executor, and hydrates the rows
//! that come back.

use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::coerce;
use crate::errors::OrmError;
use crate::handle::{FieldHandle, HandleValue};
use crate::record::Record;
use crate::registry;
use crate::runtime::{
    Aggregate, AggregateFn, BindValue, CmpOp, Condition, DeleteStatement, InsertStatement, Join,
    JoinKind, SelectStatement, SortOrder, SqlExecutor, SqlValue, UpdateStatement, WriteOutcome,
    WriteValue,
};
use crate::types::{AutoRole, Entity, EntityDescriptor};

/// What a post-write notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Payload handed to post-write hooks after the executor confirms a write.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity: &'static str,
    pub table: String,
    /// Primary-key value, when resolvable from the written data or the
    /// query's equality conditions.
    pub primary: Option<SqlValue>,
    /// The member-keyed data that went into the write. Empty for deletes.
    pub data: Map<String, Value>,
}

/// Which writes a registered hook observes. `Write` covers inserts and
/// updates but not deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookScope {
    Any,
    Write,
    Insert,
    Update,
    Delete,
}

type Hook = Box<dyn FnMut(&ChangeEvent) -> Result<(), OrmError>>;

/// A fluent query bound to one entity's metadata and one executor.
///
/// Builder calls shape the pending statement; terminal calls execute it.
/// Write terminals reset the builder state afterwards, so a query value can
/// issue several independent statements; registered hooks survive the reset.
pub struct Query<'x, E: Entity> {
    executor: &'x mut dyn SqlExecutor,
    meta: Arc<EntityDescriptor>,
    table_suffix: Option<String>,
    handles: Vec<FieldHandle>,
    conditions: Vec<Condition>,
    joins: Vec<Join>,
    columns: Vec<String>,
    orders: Vec<(String, SortOrder)>,
    limit: Option<u64>,
    offset: Option<u64>,
    pending: Map<String, Value>,
    not_found: Option<String>,
    with_deleted: bool,
    transactions_disabled: bool,
    hooks: Vec<(HookScope, Hook)>,
    _marker: PhantomData<E>,
}

impl<'x, E: Entity> Query<'x, E> {
    pub fn new(executor: &'x mut dyn SqlExecutor) -> Self {
        Self {
            executor,
            meta: registry::metadata_for::<E>(),
            table_suffix: None,
            handles: Vec::new(),
            conditions: Vec::new(),
            joins: Vec::new(),
            columns: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            pending: Map::new(),
            not_found: None,
            with_deleted: false,
            transactions_disabled: false,
            hooks: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// The storage table this query targets: the entity's declared table
    /// plus an optional runtime suffix (sharded or per-tenant tables).
    pub fn table(&self) -> String {
        match &self.table_suffix {
            Some(suffix) => format!("{}{suffix}", self.meta.table),
            None => self.meta.table.clone(),
        }
    }

    pub fn suffix(&mut self, suffix: impl Into<String>) -> &mut Self {
        self.table_suffix = Some(suffix.into());
        self
    }

    /// Adds a condition from a field handle carrying a pending comparison.
    /// Literals are encoded through the member's metadata at execution time.
    pub fn where_field(&mut self, handle: FieldHandle) -> &mut Self {
        self.handles.push(handle);
        self
    }

    /// Adds a prebuilt executor condition, bypassing metadata encoding.
    pub fn where_condition(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    /// Joins another table; `on` should carry a column-to-column comparison
    /// built with [`FieldHandle::eq_field`].
    pub fn join(&mut self, kind: JoinKind, table: impl Into<String>, on: FieldHandle) -> &mut Self {
        if let Some(condition) = on.condition() {
            self.joins.push(Join {
                kind,
                table: table.into(),
                on: condition,
            });
        }
        self
    }

    /// Restricts the projection to the given handles (rendered with their
    /// wraps and output aliases). Empty projection means all columns.
    pub fn fields(&mut self, handles: impl IntoIterator<Item = FieldHandle>) -> &mut Self {
        self.columns
            .extend(handles.into_iter().map(|handle| handle.build()));
        self
    }

    pub fn order_by(&mut self, handle: FieldHandle, order: SortOrder) -> &mut Self {
        self.orders.push((handle.render_target(), order));
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Stages member-keyed write data. Staged entries win over same-named
    /// keys in the map later passed to [`Query::insert`]/[`Query::update`].
    pub fn data(&mut self, data: Map<String, Value>) -> &mut Self {
        for (key, value) in data {
            self.pending.insert(key, value);
        }
        self
    }

    /// Overrides the message carried by demanded-lookup failures.
    pub fn not_found_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.not_found = Some(message.into());
        self
    }

    /// Includes soft-deleted rows in subsequent reads.
    pub fn with_deleted(&mut self) -> &mut Self {
        self.with_deleted = true;
        self
    }

    /// Disables the implicit transaction around each write terminal.
    pub fn disable_transactions(&mut self) -> &mut Self {
        self.transactions_disabled = true;
        self
    }

    /// Registers a hook observing every write kind.
    pub fn on_change(&mut self, hook: impl FnMut(&ChangeEvent) -> Result<(), OrmError> + 'static) -> &mut Self {
        self.hooks.push((HookScope::Any, Box::new(hook)));
        self
    }

    /// Registers a hook observing inserts and updates, but not deletes.
    pub fn on_write(&mut self, hook: impl FnMut(&ChangeEvent) -> Result<(), OrmError> + 'static) -> &mut Self {
        self.hooks.push((HookScope::Write, Box::new(hook)));
        self
    }

    pub fn on_insert(&mut self, hook: impl FnMut(&ChangeEvent) -> Result<(), OrmError> + 'static) -> &mut Self {
        self.hooks.push((HookScope::Insert, Box::new(hook)));
        self
    }

    pub fn on_update(&mut self, hook: impl FnMut(&ChangeEvent) -> Result<(), OrmError> + 'static) -> &mut Self {
        self.hooks.push((HookScope::Update, Box::new(hook)));
        self
    }

    pub fn on_delete(&mut self, hook: impl FnMut(&ChangeEvent) -> Result<(), OrmError> + 'static) -> &mut Self {
        self.hooks.push((HookScope::Delete, Box::new(hook)));
        self
    }

    /// Clears all builder state except registered hooks.
    pub fn fresh(&mut self) -> &mut Self {
        self.table_suffix = None;
        self.handles.clear();
        self.conditions.clear();
        self.joins.clear();
        self.columns.clear();
        self.orders.clear();
        self.limit = None;
        self.offset = None;
        self.pending = Map::new();
        self.not_found = None;
        self.with_deleted = false;
        self
    }

    // ---- reads -----------------------------------------------------------

    pub fn select(&mut self) -> Result<Vec<Record<E>>, OrmError> {
        let stmt = self.select_stmt()?;
        let rows = self.executor.select(&stmt)?;
        rows.iter().map(Record::parse).collect()
    }

    /// Like [`Query::select`], but an empty result is an error.
    pub fn select_or_fail(&mut self) -> Result<Vec<Record<E>>, OrmError> {
        let records = self.select()?;
        if records.is_empty() {
            return Err(self.not_found_error(format!("no {} records found", E::ENTITY)));
        }
        Ok(records)
    }

    /// Looks one row up by primary key. The key runs through the primary
    /// member's hydration filters first, so e.g. a trimmed key matches.
    pub fn find(&mut self, key: impl Into<Value>) -> Result<Option<Record<E>>, OrmError> {
        let stmt = self.find_stmt(key.into())?;
        let rows = self.executor.select(&stmt)?;
        rows.first().map(Record::parse).transpose()
    }

    pub fn find_or_fail(&mut self, key: impl Into<Value>) -> Result<Record<E>, OrmError> {
        self.find(key)?
            .ok_or_else(|| self.not_found_error(format!("{} not found", E::ENTITY)))
    }

    /// Selects and hydrates each row twice: once through this entity and
    /// once through `X`, so joined projections come back typed on both
    /// sides. Columns unknown to either entity stay in its extras.
    pub fn select_extend<X: Entity>(&mut self) -> Result<Vec<(Record<E>, Record<X>)>, OrmError> {
        let stmt = self.select_stmt()?;
        let rows = self.executor.select(&stmt)?;
        rows.iter()
            .map(|row| Ok((Record::parse(row)?, Record::<X>::parse(row)?)))
            .collect()
    }

    pub fn find_extend<X: Entity>(&mut self, key: impl Into<Value>) -> Result<Option<(Record<E>, Record<X>)>, OrmError> {
        let stmt = self.find_stmt(key.into())?;
        let rows = self.executor.select(&stmt)?;
        rows.first()
            .map(|row| Ok((Record::parse(row)?, Record::<X>::parse(row)?)))
            .transpose()
    }

    // ---- aggregates ------------------------------------------------------

    pub fn count(&mut self) -> Result<u64, OrmError> {
        let value = self.aggregate(AggregateFn::Count, None)?;
        Ok(value.and_then(|scalar| scalar.as_f64()).unwrap_or(0.0) as u64)
    }

    pub fn sum(&mut self, handle: FieldHandle) -> Result<f64, OrmError> {
        let value = self.aggregate(AggregateFn::Sum, Some(handle))?;
        Ok(value.and_then(|scalar| scalar.as_f64()).unwrap_or(0.0))
    }

    pub fn avg(&mut self, handle: FieldHandle) -> Result<Option<f64>, OrmError> {
        let value = self.aggregate(AggregateFn::Avg, Some(handle))?;
        Ok(value.and_then(|scalar| scalar.as_f64()))
    }

    pub fn max(&mut self, handle: FieldHandle) -> Result<Option<SqlValue>, OrmError> {
        self.aggregate(AggregateFn::Max, Some(handle))
    }

    pub fn min(&mut self, handle: FieldHandle) -> Result<Option<SqlValue>, OrmError> {
        self.aggregate(AggregateFn::Min, Some(handle))
    }

    fn aggregate(&mut self, func: AggregateFn, handle: Option<FieldHandle>) -> Result<Option<SqlValue>, OrmError> {
        let mut stmt = self.select_stmt()?;
        stmt.aggregate = Some(Aggregate {
            func,
            target: handle
                .map(|handle| handle.render_target())
                .unwrap_or_else(|| "*".to_string()),
        });
        let value = self.executor.scalar(&stmt)?;
        Ok(value.filter(|scalar| !scalar.is_null()))
    }

    // ---- writes ----------------------------------------------------------

    /// Inserts one row. Staged [`Query::data`] entries override same-named
    /// keys in `data`; unknown and role-managed-but-present keys follow the
    /// write policy described on [`Query::prepare_payload`].
    pub fn insert(&mut self, data: Map<String, Value>) -> Result<WriteOutcome, OrmError> {
        let merged = self.merge_pending(data);
        let values = self.prepare_payload(&merged, ChangeKind::Insert)?;
        let stmt = InsertStatement {
            table: self.table(),
            values,
            primary: self.meta.primary().map(|field| field.column.clone()),
        };

        self.begin()?;
        let outcome = match self.executor.insert(&stmt) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.rollback_after(err.to_string());
                return Err(err);
            }
        };
        self.commit()?;

        let primary = outcome
            .last_insert_id
            .map(SqlValue::Int)
            .or_else(|| self.primary_from_data(&merged));
        self.notify(ChangeKind::Insert, primary, merged);
        self.fresh();
        Ok(outcome)
    }

    /// Updates matching rows; returns the affected-row count. Readonly
    /// members are stripped from the payload.
    pub fn update(&mut self, data: Map<String, Value>) -> Result<u64, OrmError> {
        let merged = self.merge_pending(data);
        let values = self.prepare_payload(&merged, ChangeKind::Update)?;
        let stmt = UpdateStatement {
            table: self.table(),
            values,
            wheres: self.build_wheres(false)?,
        };

        self.begin()?;
        let affected = match self.executor.update(&stmt) {
            Ok(affected) => affected,
            Err(err) => {
                self.rollback_after(err.to_string());
                return Err(err);
            }
        };
        self.commit()?;

        let primary = self.primary_from_data(&merged).or_else(|| self.primary_from_wheres());
        self.notify(ChangeKind::Update, primary, merged);
        self.fresh();
        Ok(affected)
    }

    /// Deletes matching rows. Entities with a soft-delete member get the
    /// deletion timestamp written instead of a physical delete; use
    /// [`Query::force_delete`] to bypass that.
    pub fn delete(&mut self) -> Result<u64, OrmError> {
        let Some(soft) = self.meta.role_field(AutoRole::SoftDelete).cloned() else {
            return self.force_delete();
        };

        let stmt = UpdateStatement {
            table: self.table(),
            values: vec![(soft.column, WriteValue::Value(SqlValue::Int(now())))],
            wheres: self.build_wheres(false)?,
        };

        self.begin()?;
        let affected = match self.executor.update(&stmt) {
            Ok(affected) => affected,
            Err(err) => {
                self.rollback_after(err.to_string());
                return Err(err);
            }
        };
        self.commit()?;

        let primary = self.primary_from_wheres();
        self.notify(ChangeKind::Delete, primary, Map::new());
        self.fresh();
        Ok(affected)
    }

    /// Physically deletes matching rows regardless of soft-delete metadata.
    pub fn force_delete(&mut self) -> Result<u64, OrmError> {
        let stmt = DeleteStatement {
            table: self.table(),
            wheres: self.build_wheres(true)?,
        };

        self.begin()?;
        let affected = match self.executor.delete(&stmt) {
            Ok(affected) => affected,
            Err(err) => {
                self.rollback_after(err.to_string());
                return Err(err);
            }
        };
        self.commit()?;

        let primary = self.primary_from_wheres();
        self.notify(ChangeKind::Delete, primary, Map::new());
        self.fresh();
        Ok(affected)
    }

    // ---- transactions ----------------------------------------------------

    fn begin(&mut self) -> Result<(), OrmError> {
        if self.transactions_disabled {
            return Ok(());
        }
        debug!("begin transaction on {}", self.table());
        self.executor.begin()
    }

    fn commit(&mut self) -> Result<(), OrmError> {
        if self.transactions_disabled {
            return Ok(());
        }
        debug!("commit transaction on {}", self.table());
        self.executor.commit()
    }

    fn rollback_after(&mut self, cause: String) {
        if self.transactions_disabled {
            return;
        }
        debug!("rollback transaction on {} after: {cause}", self.table());
        if let Err(err) = self.executor.rollback() {
            warn!("rollback on {} failed: {err}", self.table());
        }
    }

    // ---- statement assembly ----------------------------------------------

    fn select_stmt(&self) -> Result<SelectStatement, OrmError> {
        Ok(SelectStatement {
            table: self.table(),
            columns: self.columns.clone(),
            joins: self.joins.clone(),
            wheres: self.build_wheres(false)?,
            orders: self.orders.clone(),
            limit: self.limit,
            offset: self.offset,
            aggregate: None,
        })
    }

    fn find_stmt(&self, key: Value) -> Result<SelectStatement, OrmError> {
        let primary = self.meta.primary().ok_or_else(|| OrmError::config(format!(
            "entity `{}` has no primary-key member",
            E::ENTITY
        )))?;

        // The key gets the same filter treatment a hydrated value would, so
        // e.g. a trim filter makes "  5 " match the stored key.
        let mut key = key;
        for filter in &primary.filters {
            key = filter(key);
        }
        let encoded = match coerce::encode(primary, &key)? {
            WriteValue::Value(scalar) => scalar,
            WriteValue::Expr(_) => {
                return Err(OrmError::InvalidRequest {
                    message: "primary-key lookup cannot use a raw expression".to_string(),
                });
            }
        };

        let mut stmt = self.select_stmt()?;
        stmt.wheres.push(Condition {
            target: primary.column.clone(),
            op: CmpOp::Eq,
            value: BindValue::Literal(encoded),
        });
        stmt.limit = Some(1);
        Ok(stmt)
    }

    /// Renders staged conditions: handle comparisons get metadata-aware
    /// literal encoding when the handle belongs to this entity; the
    /// soft-delete guard is appended unless deleted rows were requested.
    fn build_wheres(&self, include_deleted: bool) -> Result<Vec<Condition>, OrmError> {
        let mut wheres = Vec::with_capacity(self.handles.len() + self.conditions.len() + 1);
        for handle in &self.handles {
            wheres.push(self.encode_handle(handle)?);
        }
        wheres.extend(self.conditions.iter().cloned());

        if !include_deleted
            && !self.with_deleted
            && let Some(soft) = self.meta.role_field(AutoRole::SoftDelete)
        {
            wheres.push(Condition {
                target: soft.column.clone(),
                op: CmpOp::Eq,
                value: BindValue::Literal(SqlValue::Int(0)),
            });
        }
        Ok(wheres)
    }

    fn encode_handle(&self, handle: &FieldHandle) -> Result<Condition, OrmError> {
        let mut condition = handle.condition().ok_or_else(|| OrmError::InvalidRequest {
            message: format!("handle for `{}` carries no comparison", handle.name()),
        })?;

        if handle.is_raw() || handle.entity() != E::ENTITY {
            return Ok(condition);
        }
        let Some(field) = self.meta.field(handle.name()) else {
            return Ok(condition);
        };

        match handle.value() {
            HandleValue::Literal(value) => {
                if let WriteValue::Value(scalar) = coerce::encode(field, value)? {
                    condition.value = BindValue::Literal(scalar);
                }
            }
            HandleValue::List(values) => {
                let mut encoded = Vec::with_capacity(values.len());
                for value in values {
                    match coerce::encode(field, value)? {
                        WriteValue::Value(scalar) => encoded.push(scalar),
                        WriteValue::Expr(_) => {
                            return Err(OrmError::InvalidRequest {
                                message: format!(
                                    "list comparison on `{}` cannot carry raw expressions",
                                    handle.name()
                                ),
                            });
                        }
                    }
                }
                condition.value = BindValue::List(encoded);
            }
            _ => {}
        }
        Ok(condition)
    }

    fn merge_pending(&mut self, data: Map<String, Value>) -> Map<String, Value> {
        let mut merged = data;
        for (key, value) in std::mem::take(&mut self.pending) {
            merged.insert(key, value);
        }
        merged
    }

    /// Turns member-keyed write data into column-keyed storage values:
    /// unknown keys and ignored members are dropped, readonly members are
    /// dropped on update, each value runs through the write-side encode
    /// policy and the entity's per-member hook, and absent timestamp and
    /// soft-delete role members are auto-populated.
    fn prepare_payload(&self, data: &Map<String, Value>, kind: ChangeKind) -> Result<Vec<(String, WriteValue)>, OrmError> {
        let mut values = Vec::new();
        for field in self.meta.storage_members() {
            let Some(value) = data.get(&field.name) else {
                continue;
            };
            if kind == ChangeKind::Update && field.readonly {
                continue;
            }
            let encoded = match coerce::encode(field, value)? {
                WriteValue::Value(scalar) => WriteValue::Value(E::prepare_write(&field.name, scalar)),
                expr => expr,
            };
            values.push((field.column.clone(), encoded));
        }
        if values.is_empty() {
            return Err(OrmError::InvalidRequest {
                message: format!("write to `{}` carries no storable members", self.table()),
            });
        }

        let stamp = now();
        if kind == ChangeKind::Insert {
            if let Some(created) = self.meta.role_field(AutoRole::CreatedAt)
                && absent(&values, &created.column)
            {
                values.push((created.column.clone(), WriteValue::Value(SqlValue::Int(stamp))));
            }
            if let Some(soft) = self.meta.role_field(AutoRole::SoftDelete)
                && absent(&values, &soft.column)
            {
                values.push((soft.column.clone(), WriteValue::Value(SqlValue::Int(0))));
            }
        }
        if let Some(updated) = self.meta.role_field(AutoRole::UpdatedAt)
            && absent(&values, &updated.column)
        {
            values.push((updated.column.clone(), WriteValue::Value(SqlValue::Int(stamp))));
        }

        Ok(values)
    }

    fn not_found_error(&self, default: String) -> OrmError {
        OrmError::NotFound {
            entity: E::ENTITY,
            message: self.not_found.clone().unwrap_or(default),
        }
    }

    fn primary_from_data(&self, data: &Map<String, Value>) -> Option<SqlValue> {
        let primary = self.meta.primary()?;
        let value = data.get(&primary.name)?;
        match coerce::encode(primary, value).ok()? {
            WriteValue::Value(scalar) if !scalar.is_null() => Some(scalar),
            _ => None,
        }
    }

    /// Falls back to an equality condition on the primary column, the common
    /// shape of targeted updates and deletes.
    fn primary_from_wheres(&self) -> Option<SqlValue> {
        let primary = self.meta.primary()?;
        for handle in &self.handles {
            if handle.name() == primary.name
                && handle.op() == Some(CmpOp::Eq)
                && let HandleValue::Literal(value) = handle.value()
            {
                return Some(SqlValue::from_json(value.clone()));
            }
        }
        for condition in &self.conditions {
            if condition.target == primary.column
                && condition.op == CmpOp::Eq
                && let BindValue::Literal(scalar) = &condition.value
            {
                return Some(scalar.clone());
            }
        }
        None
    }

    /// Runs registered hooks for a confirmed write, one tier at a time:
    /// generic hooks first, write-kind hooks next (inserts and updates
    /// only), the operation-specific tier last. Hook failures never poison
    /// the write result; they are logged and swallowed.
    fn notify(&mut self, kind: ChangeKind, primary: Option<SqlValue>, data: Map<String, Value>) {
        if self.hooks.is_empty() {
            return;
        }
        let event = ChangeEvent {
            kind,
            entity: E::ENTITY,
            table: self.table(),
            primary,
            data,
        };
        let tiers: &[HookScope] = match kind {
            ChangeKind::Insert => &[HookScope::Any, HookScope::Write, HookScope::Insert],
            ChangeKind::Update => &[HookScope::Any, HookScope::Write, HookScope::Update],
            ChangeKind::Delete => &[HookScope::Any, HookScope::Delete],
        };
        for tier in tiers {
            for (registered, hook) in &mut self.hooks {
                if registered == tier
                    && let Err(err) = hook(&event)
                {
                    warn!("post-write hook on {} failed: {err}", event.table);
                }
            }
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn absent(values: &[(String, WriteValue)], column: &str) -> bool {
    values.iter().all(|(written, _)| written != column)
}
