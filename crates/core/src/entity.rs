//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Archive entities (studies, series, instances, pending transactions) are addressed by
/// identifier rather than by live references, so the identifier is all callers need to
/// find them again in their owning store.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
