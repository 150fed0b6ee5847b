//! In-memory record objects hydrated from raw storage rows.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::coerce;
use crate::errors::{OrmError, ValidationError, ValidationIssue};
use crate::registry;
use crate::runtime::{Row, WriteValue};
use crate::types::{Entity, EntityDescriptor, EntityField};
use crate::validation::validate_value;

/// Output selection scoped to one record. Exclude and retain are mutually
/// exclusive; setting one clears the other.
#[derive(Debug, Clone, Default, PartialEq)]
enum Selection {
    #[default]
    All,
    Exclude(BTreeSet<String>),
    Retain(BTreeSet<String>),
}

impl Selection {
    fn keeps(&self, member: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Exclude(members) => !members.contains(member),
            Selection::Retain(members) => members.contains(member),
        }
    }
}

/// A typed member bag bound to an entity's metadata table.
///
/// Hydrate with [`Record::parse`] (trusted storage rows) or
/// [`Record::init`] (user data, validated); mutate through [`Record::set`],
/// which re-runs the coercion and validation pipeline; serialize for
/// display with [`Record::to_map`]/[`Record::to_json`] or for storage with
/// [`Record::storage_map`].
#[derive(Debug, Clone)]
pub struct Record<E: Entity> {
    meta: Arc<EntityDescriptor>,
    values: Map<String, Value>,
    /// Keys with no resolvable member land here untracked, never erroring.
    extras: Map<String, Value>,
    selection: Selection,
    scene: Option<String>,
    _marker: PhantomData<E>,
}

impl<E: Entity> Record<E> {
    pub fn new() -> Self {
        Self {
            meta: registry::metadata_for::<E>(),
            values: Map::new(),
            extras: Map::new(),
            selection: Selection::All,
            scene: None,
            _marker: PhantomData,
        }
    }

    /// Hydrates from a raw storage row: each column resolves through the
    /// metadata table and decodes; unknown columns become untracked
    /// extras. Storage data is trusted, so validation rules do not run.
    pub fn parse(row: &Row) -> Result<Self, OrmError> {
        let mut record = Self::new();
        for (column, raw) in row {
            let meta = Arc::clone(&record.meta);
            match meta.field_by_column(column) {
                Some(field) => {
                    let decoded = coerce::decode_sql(field, raw.clone())?;
                    record.values.insert(field.name.clone(), decoded);
                }
                None => {
                    record.extras.insert(column.clone(), raw.clone().into_json());
                }
            }
        }
        Ok(record)
    }

    /// Hydrates from user-supplied member-keyed data, running the full
    /// coercion and validation pipeline per member.
    pub fn init(data: Map<String, Value>) -> Result<Self, OrmError> {
        let mut record = Self::new();
        let mut issues: Vec<ValidationIssue> = Vec::new();
        for (name, value) in data {
            let meta = Arc::clone(&record.meta);
            match meta.field(&name) {
                Some(field) => {
                    let decoded = coerce::decode(field, value)?;
                    issues.extend(validate_value(field, &decoded));
                    record.values.insert(name, decoded);
                }
                None => {
                    record.extras.insert(name, value);
                }
            }
        }
        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }
        Ok(record)
    }

    /// Builds a record from a typed entity value via serde.
    pub fn from_entity(entity: &E) -> Result<Self, OrmError>
    where
        E: Serialize,
    {
        let value = serde_json::to_value(entity).map_err(|err| OrmError::InvalidRequest {
            message: format!("entity does not serialize to a map: {err}"),
        })?;
        match value {
            Value::Object(map) => Self::init(map),
            other => Err(OrmError::InvalidRequest {
                message: format!("entity serialized to {other}, expected an object"),
            }),
        }
    }

    /// Converts the record back into a typed entity value via serde.
    pub fn to_entity(&self) -> Result<E, OrmError>
    where
        E: DeserializeOwned,
    {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|err| {
            OrmError::InvalidRequest {
                message: format!("record does not fit entity `{}`: {err}", E::ENTITY),
            }
        })
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.meta
    }

    pub fn get(&self, field: E::Field) -> Option<&Value> {
        self.values.get(field.name())
    }

    /// Looks a value up by member name, falling back to untracked extras.
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| self.extras.get(name))
    }

    /// Sets one member, re-running the coercion and validation pipeline.
    pub fn set(&mut self, field: E::Field, value: impl Into<Value>) -> Result<&mut Self, OrmError> {
        let meta = Arc::clone(&self.meta);
        let field_meta = meta.field(field.name()).ok_or_else(|| OrmError::config(format!(
            "member `{}` not declared on entity `{}`",
            field.name(),
            E::ENTITY
        )))?;
        let decoded = coerce::decode(field_meta, value.into())?;
        let issues = validate_value(field_meta, &decoded);
        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }
        self.values.insert(field.name().to_string(), decoded);
        Ok(self)
    }

    /// Sets an untracked dynamic attribute (or an existing member by name,
    /// bypassing nothing: members still go through the pipeline).
    pub fn set_named(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self, OrmError> {
        let name = name.into();
        let value = value.into();
        let meta = Arc::clone(&self.meta);
        match meta.field(&name) {
            Some(field_meta) => {
                let decoded = coerce::decode(field_meta, value)?;
                let issues = validate_value(field_meta, &decoded);
                if !issues.is_empty() {
                    return Err(ValidationError::new(issues).into());
                }
                self.values.insert(name, decoded);
            }
            None => {
                self.extras.insert(name, value);
            }
        }
        Ok(self)
    }

    /// Drops the listed members from subsequent serializations. Clears any
    /// prior `retain` selection.
    pub fn exclude<S: Into<String>>(&mut self, members: impl IntoIterator<Item = S>) -> &mut Self {
        self.selection = Selection::Exclude(members.into_iter().map(Into::into).collect());
        self
    }

    /// Keeps only the listed members in subsequent serializations. Clears
    /// any prior `exclude` selection.
    pub fn retain<S: Into<String>>(&mut self, members: impl IntoIterator<Item = S>) -> &mut Self {
        self.selection = Selection::Retain(members.into_iter().map(Into::into).collect());
        self
    }

    /// Selects the named output scene for display serialization.
    pub fn scene(&mut self, name: impl Into<String>) -> &mut Self {
        self.scene = Some(name.into());
        self
    }

    /// Display serialization: member order follows the metadata table,
    /// extras trail behind; the active scene hides and renames members and
    /// the exclude/retain selection filters the result.
    pub fn to_map(&self) -> Map<String, Value> {
        let scene = self.scene.as_deref().and_then(|name| self.meta.scene(name));
        let mut output = Map::new();
        for field in &self.meta.fields {
            let Some(value) = self.values.get(&field.name) else {
                continue;
            };
            if !self.selection.keeps(&field.name) {
                continue;
            }
            if let Some(scene) = scene {
                if scene.hides(&field.name) {
                    continue;
                }
                let key = scene.rename_of(&field.name).unwrap_or(&field.name);
                output.insert(key.to_string(), value.clone());
            } else {
                output.insert(field.name.clone(), value.clone());
            }
        }
        for (name, value) in &self.extras {
            if self.selection.keeps(name) {
                output.insert(name.clone(), value.clone());
            }
        }
        output
    }

    pub fn to_json(&self) -> Result<String, OrmError> {
        serde_json::to_string(&self.to_map()).map_err(|err| OrmError::InvalidRequest {
            message: format!("record does not serialize: {err}"),
        })
    }

    /// Storage serialization: column-keyed, null members dropped, ignored
    /// members skipped, values run through the write-side encode policy and
    /// the entity's per-member post-processing hook. Extras never reach
    /// storage. Used only to produce write payloads, never for display.
    pub fn storage_map(&self) -> Result<Vec<(String, WriteValue)>, OrmError> {
        let mut output = Vec::new();
        for field in self.meta.storage_members() {
            let Some(value) = self.values.get(&field.name) else {
                continue;
            };
            if value.is_null() || !self.selection.keeps(&field.name) {
                continue;
            }
            let encoded = match coerce::encode(field, value)? {
                WriteValue::Value(scalar) => WriteValue::Value(E::prepare_write(&field.name, scalar)),
                expr => expr,
            };
            output.push((field.column.clone(), encoded));
        }
        Ok(output)
    }
}

impl<E: Entity> Default for Record<E> {
    fn default() -> Self {
        Self::new()
    }
}
