/// Identifier of the entity (node or relationship) an index entry points at.
pub type EntityId = i64;

/// Marker placing a key relative to real keys holding the same value.
///
/// Real keys are always `Neutral`. Range boundaries use `Low` or `High` so a
/// seek key sorts strictly before or after every stored key with equal value.
/// The declaration order is the comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Inclusion {
    Low,
    #[default]
    Neutral,
    High,
}
