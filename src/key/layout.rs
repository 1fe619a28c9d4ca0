use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::cursor::PageCursor;
use crate::curve::{GeometryRangePredicate, SpaceFillingCurveSettings};
use crate::error::{Error, Result};
use crate::key::state::KeyState;
use crate::key::value::Value;
use crate::key::{ENTITY_ID_SIZE, KeyType};
use crate::types::{EntityId, Inclusion};

/// How keys and values of one index are created, sized, encoded and ordered.
///
/// Block storage is generic over this trait. Fixed-size layouts store
/// entries back to back; the others get a key/value size prefix per entry.
pub trait Layout: Clone + Send + Sync + 'static {
    type Key: Send;
    type Value: Send;

    fn new_key(&self) -> Self::Key;
    fn new_value(&self) -> Self::Value;
    fn copy_key(&self, from: &Self::Key, into: &mut Self::Key);

    fn key_size(&self, key: &Self::Key) -> usize;
    fn value_size(&self, value: &Self::Value) -> usize;

    fn write_key(&self, cursor: &mut PageCursor, key: &Self::Key);
    fn write_value(&self, cursor: &mut PageCursor, value: &Self::Value);

    /// Decode a key of `key_size` bytes. Returns false, with a cursor
    /// exception recorded, when the bytes are not a valid key.
    fn read_key(&self, cursor: &mut PageCursor, into: &mut Self::Key, key_size: usize) -> bool;
    fn read_value(&self, cursor: &mut PageCursor, into: &mut Self::Value, value_size: usize)
    -> bool;

    fn compare(&self, left: &Self::Key, right: &Self::Key) -> Ordering;

    /// Order by indexed values only, ignoring entity ids. Used to count
    /// distinct values and to detect uniqueness conflicts.
    fn compare_value(&self, left: &Self::Key, right: &Self::Key) -> Ordering {
        self.compare(left, right)
    }

    /// Whether every key and every value has the same encoded size.
    fn fixed_size(&self) -> bool;

    /// Shortest key that sorts after `left` and not after `right`.
    fn minimal_splitter(&self, _left: &Self::Key, right: &Self::Key, into: &mut Self::Key) {
        self.copy_key(right, into);
    }
}

/// Value of an index entry that carries nothing but its key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullValue;

/// A tree key: the entity id followed by one slot per indexed property.
#[derive(Debug, Clone)]
pub struct IndexKey {
    entity_id: EntityId,
    /// When false, keys equal in all slots compare equal regardless of entity.
    compare_id: bool,
    slots: Vec<KeyState>,
}

impl IndexKey {
    pub fn new(arity: usize, curves: Arc<SpaceFillingCurveSettings>) -> Self {
        IndexKey {
            entity_id: 0,
            compare_id: true,
            slots: (0..arity).map(|_| KeyState::new(curves.clone())).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn set_entity_id(&mut self, entity_id: EntityId) {
        self.entity_id = entity_id;
    }

    pub fn compare_id(&self) -> bool {
        self.compare_id
    }

    pub fn set_compare_id(&mut self, compare_id: bool) {
        self.compare_id = compare_id;
    }

    /// Reset for a new entity: id set, id comparison on, all slots empty.
    pub fn initialize(&mut self, entity_id: EntityId) {
        self.entity_id = entity_id;
        self.compare_id = true;
        for slot in &mut self.slots {
            slot.clear();
        }
    }

    pub fn slot(&self, index: usize) -> Option<&KeyState> {
        self.slots.get(index)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut KeyState> {
        let arity = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| {
            Error::IllegalState(format!("slot {index} out of range for a key of arity {arity}"))
        })
    }

    /// Initialize for `entity_id` holding one value per slot.
    pub fn init_from_values(&mut self, entity_id: EntityId, values: &[Value]) -> Result<()> {
        if values.len() != self.slots.len() {
            return Err(Error::IllegalState(format!(
                "{} values for a key of arity {}",
                values.len(),
                self.slots.len()
            )));
        }
        self.initialize(entity_id);
        for (slot, value) in self.slots.iter_mut().zip(values) {
            slot.write_value(value, Inclusion::Neutral)?;
        }
        Ok(())
    }

    pub fn write_value(&mut self, slot: usize, value: &Value, inclusion: Inclusion) -> Result<()> {
        self.slot_mut(slot)?.write_value(value, inclusion)
    }

    pub fn init_value_as_lowest(&mut self, slot: usize, key_type: Option<KeyType>) -> Result<()> {
        self.slot_mut(slot)?.init_value_as_lowest(key_type);
        Ok(())
    }

    pub fn init_value_as_highest(&mut self, slot: usize, key_type: Option<KeyType>) -> Result<()> {
        self.slot_mut(slot)?.init_value_as_highest(key_type);
        Ok(())
    }

    /// Lowest possible key: every slot lowest and the smallest entity id.
    pub fn init_values_as_lowest(&mut self) {
        self.initialize(EntityId::MIN);
        for slot in &mut self.slots {
            slot.init_value_as_lowest(None);
        }
    }

    /// Highest possible key: every slot highest and the largest entity id.
    pub fn init_values_as_highest(&mut self) {
        self.initialize(EntityId::MAX);
        for slot in &mut self.slots {
            slot.init_value_as_highest(None);
        }
    }

    /// Lower seek bound of a range on `slot`. Without a value the bound is
    /// the lowest key of `key_type`. Other slots are left untouched.
    pub fn init_range_from(
        &mut self,
        slot: usize,
        from: Option<&Value>,
        inclusive: bool,
        key_type: Option<KeyType>,
    ) -> Result<()> {
        self.entity_id = EntityId::MIN;
        self.compare_id = true;
        let state = self.slot_mut(slot)?;
        match from {
            None => {
                state.init_value_as_lowest(key_type);
                Ok(())
            }
            Some(value) if inclusive => state.write_value(value, Inclusion::Neutral),
            Some(value) => state.write_value(value, Inclusion::High),
        }
    }

    /// Upper seek bound of a range on `slot`, see [`IndexKey::init_range_from`].
    pub fn init_range_to(
        &mut self,
        slot: usize,
        to: Option<&Value>,
        inclusive: bool,
        key_type: Option<KeyType>,
    ) -> Result<()> {
        self.entity_id = EntityId::MAX;
        self.compare_id = true;
        let state = self.slot_mut(slot)?;
        match to {
            None => {
                state.init_value_as_highest(key_type);
                Ok(())
            }
            Some(value) if inclusive => state.write_value(value, Inclusion::Neutral),
            Some(value) => state.write_value(value, Inclusion::Low),
        }
    }

    pub fn init_as_prefix_low(&mut self, slot: usize, prefix: &str) -> Result<()> {
        self.slot_mut(slot)?.init_as_prefix_low(prefix)
    }

    pub fn init_as_prefix_high(&mut self, slot: usize, prefix: &str) -> Result<()> {
        self.slot_mut(slot)?.init_as_prefix_high(prefix)
    }

    /// One value per slot, `None` if any slot holds a sentinel.
    pub fn values(&self) -> Option<Vec<Value>> {
        self.slots.iter().map(KeyState::as_value).collect()
    }

    /// Slot by slot, ignoring the entity id.
    pub fn compare_values_to(&self, other: &IndexKey) -> Ordering {
        self.slots
            .iter()
            .zip(&other.slots)
            .map(|(left, right)| left.compare_value_to(right))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    pub fn copy_from(&mut self, other: &IndexKey) {
        self.entity_id = other.entity_id;
        self.compare_id = other.compare_id;
        if self.slots.len() != other.slots.len() {
            self.slots.resize_with(other.slots.len(), KeyState::default);
        }
        for (slot, from) in self.slots.iter_mut().zip(&other.slots) {
            slot.copy_from(from);
        }
    }

    /// Encoded size: entity id plus every slot.
    pub fn size(&self) -> usize {
        ENTITY_ID_SIZE + self.slots.iter().map(KeyState::size).sum::<usize>()
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{slot}")?;
        }
        write!(f, "]")
    }
}

/// Layout of composite keys with a fixed number of polymorphic slots.
#[derive(Debug, Clone)]
pub struct GenericLayout {
    arity: usize,
    curves: Arc<SpaceFillingCurveSettings>,
}

impl GenericLayout {
    pub fn new(arity: usize) -> Self {
        GenericLayout::with_curves(arity, Arc::new(SpaceFillingCurveSettings::default()))
    }

    pub fn with_curves(arity: usize, curves: Arc<SpaceFillingCurveSettings>) -> Self {
        GenericLayout { arity, curves }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn curves(&self) -> &Arc<SpaceFillingCurveSettings> {
        &self.curves
    }

    /// Key for `entity_id` holding `values`, one per slot.
    pub fn key_of(&self, entity_id: EntityId, values: &[Value]) -> Result<IndexKey> {
        let mut key = self.new_key();
        key.init_from_values(entity_id, values)?;
        Ok(key)
    }

    /// `(from, to)` seek keys, one pair per curve range of the search box.
    /// The geometry goes into slot 0, remaining slots span everything.
    pub fn geometry_seek_keys(
        &self,
        predicate: &GeometryRangePredicate,
    ) -> Result<Vec<(IndexKey, IndexKey)>> {
        if self.arity == 0 {
            return Err(Error::IllegalState("layout has no slots".into()));
        }
        predicate
            .ranges(&self.curves)
            .into_iter()
            .map(|range| {
                let mut from = self.new_key();
                from.init_values_as_lowest();
                from.slot_mut(0)?
                    .init_geometry_boundary(predicate.crs, range.min, Inclusion::Low)?;
                let mut to = self.new_key();
                to.init_values_as_highest();
                to.slot_mut(0)?
                    .init_geometry_boundary(predicate.crs, range.max, Inclusion::High)?;
                Ok((from, to))
            })
            .collect()
    }
}

impl Layout for GenericLayout {
    type Key = IndexKey;
    type Value = NullValue;

    fn new_key(&self) -> IndexKey {
        IndexKey::new(self.arity, self.curves.clone())
    }

    fn new_value(&self) -> NullValue {
        NullValue
    }

    fn copy_key(&self, from: &IndexKey, into: &mut IndexKey) {
        into.copy_from(from);
    }

    fn key_size(&self, key: &IndexKey) -> usize {
        key.size()
    }

    fn value_size(&self, _value: &NullValue) -> usize {
        0
    }

    fn write_key(&self, cursor: &mut PageCursor, key: &IndexKey) {
        cursor.put_i64(key.entity_id);
        for slot in &key.slots {
            slot.put(cursor);
        }
    }

    fn write_value(&self, _cursor: &mut PageCursor, _value: &NullValue) {}

    fn read_key(&self, cursor: &mut PageCursor, into: &mut IndexKey, key_size: usize) -> bool {
        if key_size < ENTITY_ID_SIZE {
            cursor.set_cursor_exception(format!("key of {key_size} bytes has no entity id"));
            return false;
        }
        into.initialize(cursor.get_i64());
        let mut remaining = key_size - ENTITY_ID_SIZE;
        for slot in &mut into.slots {
            if !slot.read(cursor, remaining) {
                return false;
            }
            match remaining.checked_sub(slot.size()) {
                Some(left) => remaining = left,
                None => {
                    cursor.set_cursor_exception(format!(
                        "slot of {} bytes overruns key of {key_size} bytes",
                        slot.size()
                    ));
                    return false;
                }
            }
        }
        if remaining != 0 {
            cursor.set_cursor_exception(format!("{remaining} trailing bytes after key slots"));
            return false;
        }
        true
    }

    fn read_value(&self, _cursor: &mut PageCursor, _into: &mut NullValue, _value_size: usize) -> bool {
        true
    }

    fn compare(&self, left: &IndexKey, right: &IndexKey) -> Ordering {
        let values = left.compare_values_to(right);
        if values == Ordering::Equal && left.compare_id && right.compare_id {
            return left.entity_id.cmp(&right.entity_id);
        }
        values
    }

    fn compare_value(&self, left: &IndexKey, right: &IndexKey) -> Ordering {
        left.compare_values_to(right)
    }

    fn fixed_size(&self) -> bool {
        false
    }

    fn minimal_splitter(&self, left: &IndexKey, right: &IndexKey, into: &mut IndexKey) {
        into.copy_from(right);
        let first_to_differ = left
            .slots
            .iter()
            .zip(&right.slots)
            .position(|(l, r)| l.compare_value_to(r) != Ordering::Equal);
        let Some(first_to_differ) = first_to_differ else {
            return;
        };
        for i in first_to_differ..self.arity.min(left.slots.len()) {
            KeyState::minimal_splitter(&left.slots[i], &right.slots[i], &mut into.slots[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_breaks_ties_only_when_enabled() {
        let layout = GenericLayout::new(1);
        let mut a = layout.key_of(1, &[Value::Int64(5)]).unwrap();
        let b = layout.key_of(2, &[Value::Int64(5)]).unwrap();
        assert_eq!(layout.compare(&a, &b), Ordering::Less);
        a.set_compare_id(false);
        assert_eq!(layout.compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn arity_is_enforced() {
        let layout = GenericLayout::new(2);
        let err = layout.key_of(1, &[Value::Int64(5)]).unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
        let mut key = layout.new_key();
        assert!(key.write_value(2, &Value::Bool(true), Inclusion::Neutral).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let layout = GenericLayout::new(1);
        let key = layout.key_of(9, &[Value::Bool(true)]).unwrap();
        let mut cursor = PageCursor::with_capacity(32);
        layout.write_key(&mut cursor, &key);
        cursor.put_u8(0);
        let size = cursor.limit();
        let mut cursor = PageCursor::from_bytes(cursor.written().to_vec());
        let mut into = layout.new_key();
        assert!(!layout.read_key(&mut cursor, &mut into, size));
        assert!(cursor.has_cursor_exception());
    }
}
