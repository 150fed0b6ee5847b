use serde_json::Value;

use crate::errors::OrmError;
use crate::handle::FieldHandle;
use crate::runtime::SqlValue;

/// Scalar classification of the storage column backing a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnType {
    #[default]
    Text,
    Int,
    Float,
    Bool,
}

/// Declared in-memory kind of a member, resolved at derive time.
///
/// Resolution priority: an explicit `#[sqlom(kind = "...")]` tag wins over
/// the Rust field type; members that resolve to neither are `Mixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    Array,
    Object,
    #[default]
    Mixed,
}

/// How an array-kinded member is encoded at the storage boundary.
///
/// Declared per member rather than sniffed from the stored string, so a
/// value that merely starts with `[` or `a:` can never be misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayEncoding {
    #[default]
    Json,
    Legacy,
    Custom,
}

/// Special write-side roles a member may hold. At most one member per
/// entity may claim each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRole {
    CreatedAt,
    UpdatedAt,
    SoftDelete,
}

/// Hydration filter applied to a raw value before static coercion.
pub type FilterFn = fn(Value) -> Value;

/// Custom encode/decode pair for a member, referenced from
/// `#[sqlom(format = path::To::Codec)]`.
pub trait FieldFormat {
    fn decode(raw: Value) -> Result<Value, OrmError>;
    fn encode(value: &Value) -> Result<SqlValue, OrmError>;
}

/// Monomorphized codec entry stored in the metadata table.
#[derive(Debug, Clone, Copy)]
pub struct FieldCodec {
    pub decode: fn(Value) -> Result<Value, OrmError>,
    pub encode: fn(&Value) -> Result<SqlValue, OrmError>,
}

impl FieldCodec {
    pub fn of<F: FieldFormat>() -> Self {
        Self {
            decode: F::decode,
            encode: F::encode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationDescriptor {
    pub rule: ValidationRule,
    /// Overrides the rule's built-in message when present.
    pub message: Option<String>,
}

impl ValidationDescriptor {
    pub fn new(rule: ValidationRule) -> Self {
        Self { rule, message: None }
    }

    pub fn with_message(rule: ValidationRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ValidationRule {
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<f64>, max: Option<f64> },
    Regex { pattern: String },
    Email,
    Url,
    Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationKind {
    #[default]
    HasMany,
    ManyToMany,
    BelongsTo,
}

/// Describes a relation declared on a member. Carried in metadata for
/// introspection and extended hydration; the engine does not traverse it.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub alias: String,
    pub target: String,
    pub kind: RelationKind,
    pub foreign_key: Option<String>,
}

/// Export/import directive for tabular I/O consumers.
#[derive(Debug, Clone, Default)]
pub struct ExportDescriptor {
    pub title: Option<String>,
    pub skip: bool,
}

/// A named output-shaping mode: members to hide and members to rename
/// when serializing a record for display.
#[derive(Debug, Clone)]
pub struct SceneDescriptor {
    pub name: String,
    pub hidden: Vec<String>,
    pub renames: Vec<(String, String)>,
}

impl SceneDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hidden: Vec::new(),
            renames: Vec::new(),
        }
    }

    pub fn rename_of(&self, member: &str) -> Option<&str> {
        self.renames
            .iter()
            .find(|(from, _)| from == member)
            .map(|(_, to)| to.as_str())
    }

    pub fn hides(&self, member: &str) -> bool {
        self.hidden.iter().any(|hidden| hidden == member)
    }
}

/// The resolved, cached description of one entity member.
#[derive(Debug, Clone)]
pub struct PropertyMetadata {
    pub name: String,
    pub column: String,
    pub title: Option<String>,
    pub kind: FieldKind,
    pub column_type: ColumnType,
    pub optional: bool,
    pub primary: bool,
    pub readonly: bool,
    pub auto_role: Option<AutoRole>,
    /// Excluded from the storage-column set but still a declared member.
    pub ignored: bool,
    pub array_encoding: ArrayEncoding,
    pub filters: Vec<FilterFn>,
    pub codec: Option<FieldCodec>,
    pub validations: Vec<ValidationDescriptor>,
    pub relation: Option<RelationDescriptor>,
    pub export: Option<ExportDescriptor>,
}

impl PropertyMetadata {
    pub fn new(name: impl Into<String>, column: impl Into<String>, kind: FieldKind) -> Self {
        let column_type = match kind {
            FieldKind::Int => ColumnType::Int,
            FieldKind::Float => ColumnType::Float,
            FieldKind::Bool => ColumnType::Bool,
            _ => ColumnType::Text,
        };
        Self {
            name: name.into(),
            column: column.into(),
            title: None,
            kind,
            column_type,
            optional: false,
            primary: false,
            readonly: false,
            auto_role: None,
            ignored: false,
            array_encoding: ArrayEncoding::default(),
            filters: Vec::new(),
            codec: None,
            validations: Vec::new(),
            relation: None,
            export: None,
        }
    }
}

/// Immutable metadata table for one entity: ordered member descriptions plus
/// container-level declarations. Computed once per entity and cached by the
/// registry for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct EntityDescriptor {
    pub entity: String,
    pub table: String,
    pub fields: Vec<PropertyMetadata>,
    pub scenes: Vec<SceneDescriptor>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&PropertyMetadata> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_by_column(&self, column: &str) -> Option<&PropertyMetadata> {
        self.fields
            .iter()
            .find(|field| !field.ignored && field.column == column)
    }

    pub fn primary(&self) -> Option<&PropertyMetadata> {
        self.fields.iter().find(|field| field.primary)
    }

    pub fn role_field(&self, role: AutoRole) -> Option<&PropertyMetadata> {
        self.fields.iter().find(|field| field.auto_role == Some(role))
    }

    pub fn scene(&self, name: &str) -> Option<&SceneDescriptor> {
        self.scenes.iter().find(|scene| scene.name == name)
    }

    /// Member names that map to storage columns (ignored members excluded).
    pub fn storage_members(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.fields.iter().filter(|field| !field.ignored)
    }

    /// Checks the structural invariants the derive macro also enforces:
    /// unique storage columns, at most one member per role, at most one
    /// primary key. Misdeclarations are configuration errors.
    pub fn validate(&self) -> Result<(), OrmError> {
        let mut seen_columns: Vec<&str> = Vec::new();
        for field in self.storage_members() {
            if seen_columns.contains(&field.column.as_str()) {
                return Err(OrmError::config(format!(
                    "entity `{}` maps two members to storage column `{}`",
                    self.entity, field.column
                )));
            }
            seen_columns.push(&field.column);
        }

        if self.fields.iter().filter(|field| field.primary).count() > 1 {
            return Err(OrmError::config(format!(
                "entity `{}` declares more than one primary-key member",
                self.entity
            )));
        }

        for role in [AutoRole::CreatedAt, AutoRole::UpdatedAt, AutoRole::SoftDelete] {
            let claimed = self
                .fields
                .iter()
                .filter(|field| field.auto_role == Some(role))
                .count();
            if claimed > 1 {
                return Err(OrmError::config(format!(
                    "entity `{}` declares {:?} on more than one member",
                    self.entity, role
                )));
            }
        }

        Ok(())
    }
}

/// Trait implemented by `#[derive(SqlomEntity)]`. Binds a data class to its
/// generated metadata table and field enum.
pub trait Entity: Sized {
    const ENTITY: &'static str;
    const TABLE: &'static str;

    type Field: EntityField;

    /// Builds the metadata table. Call sites should prefer
    /// [`crate::registry::metadata_for`], which caches the result.
    fn descriptor() -> EntityDescriptor;

    fn ensure_registered();

    /// Write-side post-processing applied per member just before the
    /// storage map is assembled.
    fn prepare_write(_member: &str, value: SqlValue) -> SqlValue {
        value
    }
}

/// One variant per declared member; the static factory behind symbolic
/// field handles.
pub trait EntityField: Copy + 'static {
    fn name(self) -> &'static str;
    fn column(self) -> &'static str;
    fn entity(self) -> &'static str;

    fn handle(self) -> FieldHandle {
        FieldHandle::bound(self.entity(), self.name(), self.column())
    }
}
