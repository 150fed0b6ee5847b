//! Emission: turns a parsed entity into the field enum, `EntityField`
//! impl, and `Entity` impl with the metadata-table constructor.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::parsed::{ArrayEnc, CType, Kind, ParsedEntity, ParsedField, Role, Rule};

pub fn expand(entity: &ParsedEntity) -> TokenStream {
    let ident = &entity.ident;
    let vis = &entity.vis;
    let entity_name = ident.to_string();
    let table = &entity.table;
    let field_enum = format_ident!("{ident}Field");

    let variants: Vec<_> = entity
        .fields
        .iter()
        .map(|field| format_ident!("{}", to_camel(&field.name)))
        .collect();
    let names: Vec<_> = entity.fields.iter().map(|field| &field.name).collect();
    let columns: Vec<_> = entity.fields.iter().map(|field| &field.column).collect();

    let field_inits = entity.fields.iter().map(field_init);
    let scene_inits = entity.scenes.iter().map(|scene| {
        let name = &scene.name;
        let hidden = &scene.hidden;
        let from: Vec<_> = scene.renames.iter().map(|(from, _)| from).collect();
        let to: Vec<_> = scene.renames.iter().map(|(_, to)| to).collect();
        quote! {{
            let mut scene = sqlom::SceneDescriptor::new(#name);
            #( scene.hidden.push(#hidden.to_string()); )*
            #( scene.renames.push((#from.to_string(), #to.to_string())); )*
            scenes.push(scene);
        }}
    });

    quote! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #vis enum #field_enum {
            #( #variants, )*
        }

        impl sqlom::EntityField for #field_enum {
            fn name(self) -> &'static str {
                match self {
                    #( Self::#variants => #names, )*
                }
            }

            fn column(self) -> &'static str {
                match self {
                    #( Self::#variants => #columns, )*
                }
            }

            fn entity(self) -> &'static str {
                #entity_name
            }
        }

        impl sqlom::Entity for #ident {
            const ENTITY: &'static str = #entity_name;
            const TABLE: &'static str = #table;

            type Field = #field_enum;

            fn descriptor() -> sqlom::EntityDescriptor {
                let mut fields = Vec::new();
                #( #field_inits )*
                let mut scenes = Vec::new();
                #( #scene_inits )*
                sqlom::EntityDescriptor {
                    entity: #entity_name.to_string(),
                    table: #table.to_string(),
                    fields,
                    scenes,
                }
            }

            fn ensure_registered() {
                let _ = sqlom::registry::metadata_for::<Self>();
            }
        }
    }
}

fn field_init(field: &ParsedField) -> TokenStream {
    let name = &field.name;
    let column = &field.column;
    let kind = kind_tokens(field.kind);

    let mut setters = Vec::new();
    if let Some(title) = &field.title {
        setters.push(quote! { field.title = Some(#title.to_string()); });
    }
    if let Some(column_type) = field.column_type {
        let column_type = match column_type {
            CType::Text => quote! { sqlom::ColumnType::Text },
            CType::Int => quote! { sqlom::ColumnType::Int },
            CType::Float => quote! { sqlom::ColumnType::Float },
            CType::Bool => quote! { sqlom::ColumnType::Bool },
        };
        setters.push(quote! { field.column_type = #column_type; });
    }
    if field.optional {
        setters.push(quote! { field.optional = true; });
    }
    if field.primary {
        setters.push(quote! { field.primary = true; });
    }
    if field.readonly {
        setters.push(quote! { field.readonly = true; });
    }
    if field.ignore {
        setters.push(quote! { field.ignored = true; });
    }
    if let Some(role) = field.role {
        let role = match role {
            Role::CreatedAt => quote! { sqlom::AutoRole::CreatedAt },
            Role::UpdatedAt => quote! { sqlom::AutoRole::UpdatedAt },
            Role::SoftDelete => quote! { sqlom::AutoRole::SoftDelete },
        };
        setters.push(quote! { field.auto_role = Some(#role); });
    }
    match field.array {
        ArrayEnc::Json => {}
        ArrayEnc::Legacy => {
            setters.push(quote! { field.array_encoding = sqlom::ArrayEncoding::Legacy; });
        }
        ArrayEnc::Custom => {
            setters.push(quote! { field.array_encoding = sqlom::ArrayEncoding::Custom; });
        }
    }
    for filter in &field.filters {
        let path = builtin_filter(filter);
        setters.push(quote! { field.filters.push(#path); });
    }
    if let Some(codec) = &field.format {
        setters.push(quote! { field.codec = Some(sqlom::FieldCodec::of::<#codec>()); });
    }
    for validation in &field.validations {
        let rule = rule_tokens(&validation.rule);
        let descriptor = match &validation.message {
            Some(message) => quote! {
                sqlom::ValidationDescriptor::with_message(#rule, #message)
            },
            None => quote! { sqlom::ValidationDescriptor::new(#rule) },
        };
        setters.push(quote! { field.validations.push(#descriptor); });
    }
    if let Some(relation) = &field.relation {
        let alias = relation.alias.as_deref().unwrap_or(name);
        let target = &relation.target;
        let kind = match relation.kind.as_deref() {
            Some("many_to_many") => quote! { sqlom::RelationKind::ManyToMany },
            Some("belongs_to") => quote! { sqlom::RelationKind::BelongsTo },
            _ => quote! { sqlom::RelationKind::HasMany },
        };
        let foreign_key = option_str(relation.foreign_key.as_deref());
        setters.push(quote! {
            field.relation = Some(sqlom::RelationDescriptor {
                alias: #alias.to_string(),
                target: #target.to_string(),
                kind: #kind,
                foreign_key: #foreign_key,
            });
        });
    }
    if let Some(export) = &field.export {
        let title = option_str(export.title.as_deref());
        let skip = export.skip;
        setters.push(quote! {
            field.export = Some(sqlom::ExportDescriptor {
                title: #title,
                skip: #skip,
            });
        });
    }

    quote! {{
        let mut field = sqlom::PropertyMetadata::new(#name, #column, #kind);
        #( #setters )*
        fields.push(field);
    }}
}

fn kind_tokens(kind: Kind) -> TokenStream {
    match kind {
        Kind::String => quote! { sqlom::FieldKind::String },
        Kind::Int => quote! { sqlom::FieldKind::Int },
        Kind::Float => quote! { sqlom::FieldKind::Float },
        Kind::Bool => quote! { sqlom::FieldKind::Bool },
        Kind::Array => quote! { sqlom::FieldKind::Array },
        Kind::Object => quote! { sqlom::FieldKind::Object },
        Kind::Mixed => quote! { sqlom::FieldKind::Mixed },
    }
}

fn rule_tokens(rule: &Rule) -> TokenStream {
    match rule {
        Rule::Length { min, max } => {
            let min = option_usize(*min);
            let max = option_usize(*max);
            quote! { sqlom::ValidationRule::Length { min: #min, max: #max } }
        }
        Rule::Range { min, max } => {
            let min = option_f64(*min);
            let max = option_f64(*max);
            quote! { sqlom::ValidationRule::Range { min: #min, max: #max } }
        }
        Rule::Regex(pattern) => quote! {
            sqlom::ValidationRule::Regex { pattern: #pattern.to_string() }
        },
        Rule::Email => quote! { sqlom::ValidationRule::Email },
        Rule::Url => quote! { sqlom::ValidationRule::Url },
        Rule::Uuid => quote! { sqlom::ValidationRule::Uuid },
    }
}

/// Bare `trim`/`lower`/`upper` resolve to the built-in filters; any other
/// path is taken verbatim.
fn builtin_filter(path: &syn::Path) -> TokenStream {
    if let Some(ident) = path.get_ident() {
        let name = ident.to_string();
        if matches!(name.as_str(), "trim" | "lower" | "upper") {
            let ident = format_ident!("{name}");
            return quote! { sqlom::filters::#ident };
        }
    }
    quote! { #path }
}

/// `created_at` -> `CreatedAt`; the enum variant for a member name.
fn to_camel(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut upper_next = true;
    for ch in input.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            output.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            output.push(ch);
        }
    }
    output
}

fn option_str(value: Option<&str>) -> TokenStream {
    match value {
        Some(text) => quote! { Some(#text.to_string()) },
        None => quote! { None },
    }
}

fn option_usize(value: Option<usize>) -> TokenStream {
    match value {
        Some(number) => quote! { Some(#number) },
        None => quote! { None },
    }
}

fn option_f64(value: Option<f64>) -> TokenStream {
    match value {
        Some(number) => quote! { Some(#number) },
        None => quote! { None },
    }
}
