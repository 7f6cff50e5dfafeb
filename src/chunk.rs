//! Batches of records exchanged between the engine and pluggable stages.

use std::fmt;

/// An ordered, finite batch of records.
///
/// An empty chunk from a reader means "nothing more this poll" and the reader
/// stage treats it as source exhaustion.
#[derive(Clone, PartialEq, Eq)]
pub struct DataChunk<T> {
    records: Vec<T>,
}

impl<T> DataChunk<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self { records }
    }

    pub fn of(records: impl IntoIterator<Item = T>) -> Self {
        records.into_iter().collect()
    }

    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    pub fn into_vec(self) -> Vec<T> {
        self.records
    }

    /// Split into consecutive sub-batches of at most `size` records.
    ///
    /// A `size` of zero is treated as one. The last partition may be shorter.
    pub fn partition(self, size: usize) -> Vec<DataChunk<T>> {
        let size = size.max(1);
        let mut partitions = Vec::with_capacity(self.records.len().div_ceil(size));
        let mut records = self.records.into_iter().peekable();
        while records.peek().is_some() {
            partitions.push(records.by_ref().take(size).collect());
        }
        partitions
    }
}

impl<T> Default for DataChunk<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: fmt::Debug> fmt::Debug for DataChunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.records.iter()).finish()
    }
}

impl<T> From<Vec<T>> for DataChunk<T> {
    fn from(records: Vec<T>) -> Self {
        Self::new(records)
    }
}

impl<T> FromIterator<T> for DataChunk<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for DataChunk<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a DataChunk<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
