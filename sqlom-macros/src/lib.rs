//! Derive macro backing `#[derive(SqlomEntity)]`.
//!
//! Parsing lives in `parsed`, code emission in `expand`. The derive turns a
//! plain struct plus `#[sqlom(...)]` attributes into an `Entity`
//! implementation carrying the full metadata table and a field enum for
//! symbolic column references.

mod expand;
mod parsed;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

#[proc_macro_derive(SqlomEntity, attributes(sqlom))]
pub fn derive_sqlom_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match parsed::ParsedEntity::from_derive(&input) {
        Ok(entity) => expand::expand(&entity).into(),
        Err(err) => err.to_compile_error().into(),
    }
}
