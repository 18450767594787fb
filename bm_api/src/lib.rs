pub mod error;
pub mod model;

/// Identifier for a host or cluster. Needs to be unique within its entity table.
pub type EntityId = uuid::Uuid;

/// Returns true if the given value is equal to its default value.
/// Useful for #[serde(skip_serializing_if = "default")]
fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    *t == Default::default()
}
