/// Ordered, bounded batch of records read for one commit
///
/// Items keep their read order; the pipeline relies on it to apply skip
/// decisions and checkpoint updates in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Chunk<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        debug_assert!(!self.is_full(), "chunk overfilled");
        self.items.push(item);
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> IntoIterator for Chunk<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_fills_to_capacity() {
        let mut chunk = Chunk::with_capacity(2);
        chunk.push(1);
        assert!(!chunk.is_full());
        chunk.push(2);
        assert!(chunk.is_full());
        assert_eq!(chunk.into_items(), vec![1, 2]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let chunk: Chunk<u8> = Chunk::with_capacity(0);
        assert_eq!(chunk.capacity(), 1);
    }
}
