//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** — a tax
/// selection of `("Standard", 2100)` is the same selection wherever it
/// appears. To "modify" one, build a new one.
///
/// Contrast with [`crate::Entity`]: an entity with the same id stays the same
/// entity across attribute changes; a value object *is* its attributes.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
