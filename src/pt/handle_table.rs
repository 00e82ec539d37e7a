//! Fixed-capacity table mapping small integer descriptors to OS handles.
//!
//! Platforms whose handles are not small integers (Windows `HANDLE`s) hand
//! out descriptors from here instead. Descriptors start at
//! [`DESCRIPTOR_OFFSET`] so they are never mistaken for a Unix file
//! descriptor.

use crate::error::PtError;

pub const DEFAULT_CAPACITY: usize = 8;
pub const DESCRIPTOR_OFFSET: i64 = 32768;

#[derive(Debug)]
pub struct HandleTable<T> {
    capacity: usize,
    /// `None` until the first insert, and again after the last removal.
    slots: Option<Vec<Option<T>>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<T> HandleTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            slots: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots
            .as_ref()
            .map_or(0, |slots| slots.iter().filter(|s| s.is_some()).count())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the backing storage is currently allocated.
    pub fn is_allocated(&self) -> bool {
        self.slots.is_some()
    }

    /// Stores `value` in the first free slot and returns its descriptor.
    pub fn insert(&mut self, value: T) -> Result<i64, PtError> {
        let capacity = self.capacity;
        let slots = self
            .slots
            .get_or_insert_with(|| (0..capacity).map(|_| None).collect());
        let index = slots
            .iter()
            .position(Option::is_none)
            .ok_or(PtError::TooManyOpenHandles { capacity })?;
        slots[index] = Some(value);
        Ok(DESCRIPTOR_OFFSET + index as i64)
    }

    fn index(&self, descriptor: i64) -> Option<usize> {
        let index = usize::try_from(descriptor.checked_sub(DESCRIPTOR_OFFSET)?).ok()?;
        (index < self.capacity).then_some(index)
    }

    pub fn get(&self, descriptor: i64) -> Result<&T, PtError> {
        let index = self.index(descriptor).ok_or(PtError::NotOpen)?;
        self.slots
            .as_ref()
            .and_then(|slots| slots[index].as_ref())
            .ok_or(PtError::NotOpen)
    }

    /// Takes the value out of its slot. Releases the storage when the table
    /// becomes empty.
    pub fn remove(&mut self, descriptor: i64) -> Result<T, PtError> {
        let index = self.index(descriptor).ok_or(PtError::NotOpen)?;
        let slots = self.slots.as_mut().ok_or(PtError::NotOpen)?;
        let value = slots[index].take().ok_or(PtError::NotOpen)?;
        if slots.iter().all(Option::is_none) {
            self.slots = None;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_offset_and_reused() {
        let mut table = HandleTable::default();
        assert!(!table.is_allocated());
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        assert_eq!(a, 32768);
        assert_eq!(b, 32769);
        assert!(table.is_allocated());

        assert_eq!(table.remove(a).unwrap(), "a");
        assert_eq!(table.insert("c").unwrap(), 32768);
        assert_eq!(*table.get(b).unwrap(), "b");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn full_table() {
        let mut table = HandleTable::default();
        for i in 0..DEFAULT_CAPACITY {
            table.insert(i).unwrap();
        }
        assert!(matches!(
            table.insert(99),
            Err(PtError::TooManyOpenHandles { capacity: 8 })
        ));
    }

    #[test]
    fn storage_released_after_last_close() {
        let mut table = HandleTable::with_capacity(2);
        let d = table.insert(()).unwrap();
        table.remove(d).unwrap();
        assert!(!table.is_allocated());
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_descriptors() {
        let mut table: HandleTable<u8> = HandleTable::default();
        assert!(matches!(table.get(32768), Err(PtError::NotOpen)));
        let d = table.insert(1).unwrap();
        assert!(matches!(table.get(3), Err(PtError::NotOpen)));
        assert!(matches!(table.get(32768 + 8), Err(PtError::NotOpen)));
        table.remove(d).unwrap();
        assert!(matches!(table.remove(d), Err(PtError::NotOpen)));
    }
}
