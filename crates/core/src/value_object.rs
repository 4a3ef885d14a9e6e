//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are never modified after construction:
/// to "change" one, build a new value. Two values with the same attributes
/// are equal.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct ShelfMark(String);
///
/// impl ValueObject for ShelfMark {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
