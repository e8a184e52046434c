//! Value objects: compared by their attributes, never by identity.

/// Marker for immutable values such as quantities and pack sizes.
///
/// Two values with equal attributes are interchangeable. To "change" one,
/// build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
