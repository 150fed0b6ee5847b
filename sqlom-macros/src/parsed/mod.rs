mod entity;
mod field;

pub use entity::{ParsedEntity, ParsedScene};
pub use field::{
    ArrayEnc, CType, Kind, ParsedExport, ParsedField, ParsedRelation, ParsedValidation, Role, Rule,
};
