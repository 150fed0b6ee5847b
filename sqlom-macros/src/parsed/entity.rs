//! Container-level parsing: the struct shape, `#[sqlom(...)]` container
//! attributes, scenes, and the structural invariants the metadata table
//! must hold.

use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields, LitStr, Visibility};

use super::field::{ParsedField, Role};

pub struct ParsedScene {
    pub name: String,
    pub hidden: Vec<String>,
    pub renames: Vec<(String, String)>,
}

pub struct ParsedEntity {
    pub ident: syn::Ident,
    pub vis: Visibility,
    pub table: String,
    pub scenes: Vec<ParsedScene>,
    pub fields: Vec<ParsedField>,
}

impl ParsedEntity {
    pub fn from_derive(input: &DeriveInput) -> syn::Result<Self> {
        let Data::Struct(data) = &input.data else {
            return Err(syn::Error::new(
                input.span(),
                "SqlomEntity derives only on structs",
            ));
        };
        let Fields::Named(named) = &data.fields else {
            return Err(syn::Error::new(
                input.span(),
                "SqlomEntity requires named fields",
            ));
        };

        let mut entity = Self {
            ident: input.ident.clone(),
            vis: input.vis.clone(),
            table: to_snake(&input.ident.to_string()),
            scenes: Vec::new(),
            fields: Vec::new(),
        };

        for attr in &input.attrs {
            if attr.path().is_ident("sqlom") {
                entity.parse_attr(attr)?;
            }
        }

        for field in &named.named {
            if let Some(parsed) = ParsedField::from_field(field)? {
                entity.fields.push(parsed);
            }
        }

        entity.check_invariants()?;
        Ok(entity)
    }

    fn parse_attr(&mut self, attr: &syn::Attribute) -> syn::Result<()> {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                self.table = meta.value()?.parse::<LitStr>()?.value();
            } else if meta.path.is_ident("scene") {
                let mut name = None;
                let mut hidden = Vec::new();
                let mut renames = Vec::new();
                meta.parse_nested_meta(|inner| {
                    if inner.path.is_ident("name") {
                        name = Some(inner.value()?.parse::<LitStr>()?.value());
                    } else if inner.path.is_ident("hide") {
                        inner.parse_nested_meta(|member| {
                            hidden.push(path_name(&member.path)?);
                            Ok(())
                        })?;
                    } else if inner.path.is_ident("rename") {
                        inner.parse_nested_meta(|member| {
                            let from = path_name(&member.path)?;
                            let to = member.value()?.parse::<LitStr>()?.value();
                            renames.push((from, to));
                            Ok(())
                        })?;
                    } else {
                        return Err(inner.error("expected name, hide, or rename"));
                    }
                    Ok(())
                })?;
                let name = name.ok_or_else(|| meta.error("scene requires name = \"...\""))?;
                self.scenes.push(ParsedScene {
                    name,
                    hidden,
                    renames,
                });
            } else {
                return Err(meta.error("unknown sqlom container attribute"));
            }
            Ok(())
        })
    }

    /// The same invariants `EntityDescriptor::validate` checks at runtime,
    /// enforced here so misdeclarations fail the build instead.
    fn check_invariants(&self) -> syn::Result<()> {
        let mut columns: Vec<&str> = Vec::new();
        for field in self.fields.iter().filter(|field| !field.ignore) {
            if columns.contains(&field.column.as_str()) {
                return Err(syn::Error::new(
                    field.span,
                    format!("storage column `{}` is claimed twice", field.column),
                ));
            }
            columns.push(&field.column);
        }

        if self.fields.iter().filter(|field| field.primary).count() > 1 {
            return Err(syn::Error::new(
                self.ident.span(),
                "more than one member declares primary",
            ));
        }

        for role in [Role::CreatedAt, Role::UpdatedAt, Role::SoftDelete] {
            let mut claimed = self.fields.iter().filter(|field| field.role == Some(role));
            if claimed.next().is_some()
                && let Some(second) = claimed.next()
            {
                return Err(syn::Error::new(
                    second.span,
                    format!("{role:?} is declared on more than one member"),
                ));
            }
        }

        for scene in &self.scenes {
            for member in scene
                .hidden
                .iter()
                .chain(scene.renames.iter().map(|(from, _)| from))
            {
                if !self.fields.iter().any(|field| &field.name == member) {
                    return Err(syn::Error::new(
                        self.ident.span(),
                        format!("scene `{}` references unknown member `{member}`", scene.name),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn path_name(path: &syn::Path) -> syn::Result<String> {
    path.get_ident()
        .map(|ident| ident.to_string())
        .ok_or_else(|| syn::Error::new(path.span(), "expected a member name"))
}

/// `UserAccount` -> `user_account`; the default table name.
pub fn to_snake(input: &str) -> String {
    let mut output = String::with_capacity(input.len() + 4);
    for (index, ch) in input.chars().enumerate() {
        if ch.is_uppercase() {
            if index > 0 {
                output.push('_');
            }
            output.extend(ch.to_lowercase());
        } else {
            output.push(ch);
        }
    }
    output
}
