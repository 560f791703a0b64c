use super::replacer::Replacer;
use crate::storage::page::PageKey;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Least recently used at front
    lru_list: VecDeque<PageKey>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &PageKey) -> Option<usize> {
        self.lru_list.iter().position(|k| k == key)
    }
}

impl Replacer for LruReplacer {
    fn record_insert(&mut self, key: &PageKey) {
        if self.position(key).is_none() {
            self.lru_list.push_back(key.clone());
        }
    }

    fn record_access(&mut self, key: &PageKey) {
        if let Some(idx) = self.position(key) {
            if let Some(k) = self.lru_list.remove(idx) {
                self.lru_list.push_back(k);
            }
        }
    }

    fn remove(&mut self, key: &PageKey) {
        if let Some(idx) = self.position(key) {
            self.lru_list.remove(idx);
        }
    }

    fn candidates(&self) -> Vec<PageKey> {
        self.lru_list.iter().cloned().collect()
    }

    fn size(&self) -> usize {
        self.lru_list.len()
    }
}
