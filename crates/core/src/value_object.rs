//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; two
/// instances with the same values are the same value. An attribute signature
/// is the canonical example here: `{Color=Red, Size=S}` IS the variant's
/// identity-defining value, regardless of which struct instance carries it.
///
/// Requirements: `Clone` (values are cheap to copy around), `PartialEq`
/// (value comparison), `Debug` (logging/tests).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
