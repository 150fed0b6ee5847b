use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::errors::OrmError;
use crate::types::{Entity, EntityDescriptor};

static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<EntityDescriptor>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, Arc<EntityDescriptor>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the cached metadata table for `E`, building and validating it on
/// first use. Repeat calls are lock-read cache hits returning the same
/// `Arc` (the table is computed once and never refreshed for the life of
/// the process).
///
/// # Panics
///
/// Panics if the descriptor violates a structural invariant (duplicate
/// storage column, duplicate role). These are configuration errors meant to
/// surface during development, not to be handled at runtime.
pub fn metadata_for<E: Entity>() -> Arc<EntityDescriptor> {
    if let Some(found) = registry().read().unwrap().get(E::ENTITY) {
        return Arc::clone(found);
    }

    let descriptor = E::descriptor();
    if let Err(err) = descriptor.validate() {
        panic!("invalid metadata for entity `{}`: {err}", E::ENTITY);
    }

    let mut guard = registry().write().unwrap();
    // Another thread may have raced us here; keep the first insert so
    // callers always observe a single table per entity.
    Arc::clone(
        guard
            .entry(E::ENTITY.to_string())
            .or_insert_with(|| Arc::new(descriptor)),
    )
}

/// Registers a hand-built descriptor, validating it eagerly. The derive
/// macro goes through [`metadata_for`] instead; this entry point exists for
/// descriptors assembled outside the derive.
pub fn register_descriptor(descriptor: EntityDescriptor) -> Result<(), OrmError> {
    descriptor.validate()?;
    registry()
        .write()
        .unwrap()
        .insert(descriptor.entity.clone(), Arc::new(descriptor));
    Ok(())
}

/// Looks up a registered descriptor by entity name.
pub fn descriptor_named(entity: &str) -> Option<Arc<EntityDescriptor>> {
    registry().read().unwrap().get(entity).cloned()
}

/// Resolves the metadata table behind a member's declared relation. The
/// target entity must already be in the registry; calling
/// [`Entity::ensure_registered`] on it beforehand guarantees that.
pub fn relation_target(meta: &EntityDescriptor, member: &str) -> Result<Arc<EntityDescriptor>, OrmError> {
    let field = meta.field(member).ok_or_else(|| {
        OrmError::config(format!("entity `{}` has no member `{member}`", meta.entity))
    })?;
    let relation = field.relation.as_ref().ok_or_else(|| {
        OrmError::config(format!(
            "member `{member}` of `{}` declares no relation",
            meta.entity
        ))
    })?;
    descriptor_named(&relation.target).ok_or_else(|| {
        OrmError::config(format!(
            "relation target `{}` is not registered",
            relation.target
        ))
    })
}
