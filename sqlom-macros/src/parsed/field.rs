//! Per-field parsing: `#[sqlom(...)]` attributes plus kind classification
//! from the Rust field type.

use proc_macro2::Span;
use syn::spanned::Spanned;
use syn::{Attribute, Field, Lit, LitStr, Path, Type};

/// Mirrors the runtime `FieldKind`, resolved at derive time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Int,
    Float,
    Bool,
    Array,
    Object,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    CreatedAt,
    UpdatedAt,
    SoftDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayEnc {
    Json,
    Legacy,
    Custom,
}

/// Mirrors the runtime `ColumnType` for the explicit storage override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    Text,
    Int,
    Float,
    Bool,
}

#[derive(Debug, Clone)]
pub enum Rule {
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<f64>, max: Option<f64> },
    Regex(String),
    Email,
    Url,
    Uuid,
}

#[derive(Debug, Clone)]
pub struct ParsedValidation {
    pub rule: Rule,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedRelation {
    pub alias: Option<String>,
    pub target: String,
    pub kind: Option<String>,
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedExport {
    pub title: Option<String>,
    pub skip: bool,
}

pub struct ParsedField {
    pub name: String,
    pub column: String,
    pub title: Option<String>,
    pub kind: Kind,
    pub column_type: Option<CType>,
    pub optional: bool,
    pub primary: bool,
    pub readonly: bool,
    pub role: Option<Role>,
    pub ignore: bool,
    pub array: ArrayEnc,
    pub filters: Vec<Path>,
    pub format: Option<Path>,
    pub validations: Vec<ParsedValidation>,
    pub relation: Option<ParsedRelation>,
    pub export: Option<ParsedExport>,
    pub span: Span,
}

impl ParsedField {
    /// Parses one struct field. Fields whose name starts with `_` are not
    /// entity members and come back as `None`.
    pub fn from_field(field: &Field) -> syn::Result<Option<Self>> {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new(field.span(), "expected a named field"))?;
        let name = ident.to_string();
        if name.starts_with('_') {
            return Ok(None);
        }

        let (kind, optional) = classify(&field.ty);
        let mut parsed = Self {
            column: name.clone(),
            name,
            title: None,
            kind,
            column_type: None,
            optional,
            primary: false,
            readonly: false,
            role: None,
            ignore: false,
            array: ArrayEnc::Json,
            filters: Vec::new(),
            format: None,
            validations: Vec::new(),
            relation: None,
            export: None,
            span: field.span(),
        };

        for attr in &field.attrs {
            if attr.path().is_ident("sqlom") {
                parsed.parse_attr(attr)?;
            }
        }
        Ok(Some(parsed))
    }

    fn parse_attr(&mut self, attr: &Attribute) -> syn::Result<()> {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("column") {
                self.column = meta.value()?.parse::<LitStr>()?.value();
            } else if meta.path.is_ident("title") {
                self.title = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("kind") {
                let tag: LitStr = meta.value()?.parse()?;
                self.kind = parse_kind(&tag)?;
            } else if meta.path.is_ident("column_type") {
                let tag: LitStr = meta.value()?.parse()?;
                self.column_type = Some(match tag.value().as_str() {
                    "text" => CType::Text,
                    "int" => CType::Int,
                    "float" => CType::Float,
                    "bool" => CType::Bool,
                    other => {
                        return Err(syn::Error::new(
                            tag.span(),
                            format!("unknown column type `{other}`; expected text, int, float, or bool"),
                        ));
                    }
                });
            } else if meta.path.is_ident("primary") {
                self.primary = true;
            } else if meta.path.is_ident("readonly") {
                self.readonly = true;
            } else if meta.path.is_ident("ignore") {
                self.ignore = true;
            } else if meta.path.is_ident("created_at") {
                self.role = Some(Role::CreatedAt);
            } else if meta.path.is_ident("updated_at") {
                self.role = Some(Role::UpdatedAt);
            } else if meta.path.is_ident("soft_delete") {
                self.role = Some(Role::SoftDelete);
            } else if meta.path.is_ident("array") {
                let tag: LitStr = meta.value()?.parse()?;
                self.array = match tag.value().as_str() {
                    "json" => ArrayEnc::Json,
                    "legacy" => ArrayEnc::Legacy,
                    "custom" => ArrayEnc::Custom,
                    other => {
                        return Err(syn::Error::new(
                            tag.span(),
                            format!("unknown array encoding `{other}`; expected json, legacy, or custom"),
                        ));
                    }
                };
            } else if meta.path.is_ident("filter") {
                meta.parse_nested_meta(|inner| {
                    self.filters.push(inner.path.clone());
                    Ok(())
                })?;
            } else if meta.path.is_ident("format") {
                self.format = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("validate") {
                self.parse_validate(&meta)?;
            } else if meta.path.is_ident("relation") {
                self.parse_relation(&meta)?;
            } else if meta.path.is_ident("export") {
                self.parse_export(&meta)?;
            } else {
                return Err(meta.error("unknown sqlom field attribute"));
            }
            Ok(())
        })
    }

    /// One `validate(...)` group: rules plus an optional `message` override
    /// applied to every rule in the group.
    fn parse_validate(&mut self, meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
        let mut rules: Vec<Rule> = Vec::new();
        let mut message: Option<String> = None;
        meta.parse_nested_meta(|inner| {
            if inner.path.is_ident("length") {
                let mut min = None;
                let mut max = None;
                inner.parse_nested_meta(|bound| {
                    if bound.path.is_ident("min") {
                        min = Some(bound.value()?.parse::<syn::LitInt>()?.base10_parse()?);
                    } else if bound.path.is_ident("max") {
                        max = Some(bound.value()?.parse::<syn::LitInt>()?.base10_parse()?);
                    } else {
                        return Err(bound.error("expected min or max"));
                    }
                    Ok(())
                })?;
                rules.push(Rule::Length { min, max });
            } else if inner.path.is_ident("range") {
                let mut min = None;
                let mut max = None;
                inner.parse_nested_meta(|bound| {
                    let value = bound.value()?.parse::<Lit>()?;
                    let number = numeric_lit(&value)?;
                    if bound.path.is_ident("min") {
                        min = Some(number);
                    } else if bound.path.is_ident("max") {
                        max = Some(number);
                    } else {
                        return Err(bound.error("expected min or max"));
                    }
                    Ok(())
                })?;
                rules.push(Rule::Range { min, max });
            } else if inner.path.is_ident("regex") {
                rules.push(Rule::Regex(inner.value()?.parse::<LitStr>()?.value()));
            } else if inner.path.is_ident("email") {
                rules.push(Rule::Email);
            } else if inner.path.is_ident("url") {
                rules.push(Rule::Url);
            } else if inner.path.is_ident("uuid") {
                rules.push(Rule::Uuid);
            } else if inner.path.is_ident("message") {
                message = Some(inner.value()?.parse::<LitStr>()?.value());
            } else {
                return Err(inner.error("unknown validation rule"));
            }
            Ok(())
        })?;

        for rule in rules {
            self.validations.push(ParsedValidation {
                rule,
                message: message.clone(),
            });
        }
        Ok(())
    }

    fn parse_relation(&mut self, meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
        let mut alias = None;
        let mut target = None;
        let mut kind = None;
        let mut foreign_key = None;
        meta.parse_nested_meta(|inner| {
            if inner.path.is_ident("alias") {
                alias = Some(inner.value()?.parse::<LitStr>()?.value());
            } else if inner.path.is_ident("target") {
                target = Some(inner.value()?.parse::<LitStr>()?.value());
            } else if inner.path.is_ident("kind") {
                let tag: LitStr = inner.value()?.parse()?;
                match tag.value().as_str() {
                    "has_many" | "many_to_many" | "belongs_to" => kind = Some(tag.value()),
                    other => {
                        return Err(syn::Error::new(
                            tag.span(),
                            format!("unknown relation kind `{other}`"),
                        ));
                    }
                }
            } else if inner.path.is_ident("foreign_key") {
                foreign_key = Some(inner.value()?.parse::<LitStr>()?.value());
            } else {
                return Err(inner.error("expected alias, target, kind, or foreign_key"));
            }
            Ok(())
        })?;

        let target = target.ok_or_else(|| meta.error("relation requires target = \"...\""))?;
        self.relation = Some(ParsedRelation {
            alias,
            target,
            kind,
            foreign_key,
        });
        Ok(())
    }

    fn parse_export(&mut self, meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
        let mut export = ParsedExport::default();
        meta.parse_nested_meta(|inner| {
            if inner.path.is_ident("title") {
                export.title = Some(inner.value()?.parse::<LitStr>()?.value());
            } else if inner.path.is_ident("skip") {
                export.skip = true;
            } else {
                return Err(inner.error("expected title or skip"));
            }
            Ok(())
        })?;
        self.export = Some(export);
        Ok(())
    }
}

fn parse_kind(tag: &LitStr) -> syn::Result<Kind> {
    Ok(match tag.value().as_str() {
        "string" => Kind::String,
        "int" => Kind::Int,
        "float" => Kind::Float,
        "bool" => Kind::Bool,
        "array" => Kind::Array,
        "object" => Kind::Object,
        "mixed" => Kind::Mixed,
        other => {
            return Err(syn::Error::new(
                tag.span(),
                format!("unknown kind `{other}`"),
            ));
        }
    })
}

fn numeric_lit(lit: &Lit) -> syn::Result<f64> {
    match lit {
        Lit::Int(int) => int.base10_parse(),
        Lit::Float(float) => float.base10_parse(),
        other => Err(syn::Error::new(other.span(), "expected a numeric bound")),
    }
}

/// Resolves the declared kind from the Rust field type. An explicit
/// `kind = "..."` tag parsed later overrides this. `Option<T>` marks the
/// member optional and classifies the inner type.
fn classify(ty: &Type) -> (Kind, bool) {
    if let Some(inner) = generic_inner(ty, "Option") {
        let (kind, _) = classify(inner);
        return (kind, true);
    }
    if generic_inner(ty, "Vec").is_some() {
        return (Kind::Array, false);
    }

    let kind = match last_segment(ty).as_deref() {
        Some("String") | Some("str") => Kind::String,
        Some("i8") | Some("i16") | Some("i32") | Some("i64") | Some("isize") | Some("u8")
        | Some("u16") | Some("u32") | Some("u64") | Some("usize") => Kind::Int,
        Some("f32") | Some("f64") => Kind::Float,
        Some("bool") => Kind::Bool,
        Some("Value") => Kind::Mixed,
        Some("Map") | Some("HashMap") | Some("BTreeMap") => Kind::Object,
        _ => Kind::Object,
    };
    (kind, false)
}

fn last_segment(ty: &Type) -> Option<String> {
    if let Type::Path(path) = ty {
        path.path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
    } else {
        None
    }
}

fn generic_inner<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(path) = ty else { return None };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}
