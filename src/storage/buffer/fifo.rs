use super::replacer::Replacer;
use crate::storage::page::PageKey;
use std::collections::VecDeque;

/// Evicts pages in the order they entered the cache; accesses are ignored.
#[derive(Debug, Default)]
pub struct FifoReplacer {
    queue: VecDeque<PageKey>,
}

impl FifoReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for FifoReplacer {
    fn record_insert(&mut self, key: &PageKey) {
        if !self.queue.contains(key) {
            self.queue.push_back(key.clone());
        }
    }

    fn record_access(&mut self, _key: &PageKey) {}

    fn remove(&mut self, key: &PageKey) {
        self.queue.retain(|k| k != key);
    }

    fn candidates(&self) -> Vec<PageKey> {
        self.queue.iter().cloned().collect()
    }

    fn size(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_ignores_access() {
        let mut replacer = FifoReplacer::new();
        for page_no in 1..=3 {
            replacer.record_insert(&PageKey::new("t.tbl", page_no));
        }
        replacer.record_access(&PageKey::new("t.tbl", 1));
        replacer.remove(&PageKey::new("t.tbl", 2));

        assert_eq!(
            replacer.candidates(),
            vec![PageKey::new("t.tbl", 1), PageKey::new("t.tbl", 3)]
        );
        assert_eq!(replacer.size(), 2);
    }
}
