//! Ordered scans over a B+-tree index.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::access::btree::BTreeIndex;
use crate::access::btree::key::BTreeKey;
use crate::access::value::Value;
use crate::session::SessionId;
use crate::storage::error::{StorageError, StorageResult};

/// Iterator over the entries whose leading values equal a prefix, following
/// the leaf chain. An empty prefix visits every entry.
pub struct IndexScanner<'a> {
    index: &'a BTreeIndex,
    session: SessionId,
    prefix: Vec<Value>,
    /// Entries of the current leaf not yet returned.
    pending: VecDeque<BTreeKey>,
    next_leaf: u16,
    started: bool,
    done: bool,
}

impl<'a> IndexScanner<'a> {
    pub(crate) fn new(index: &'a BTreeIndex, session: SessionId, prefix: Vec<Value>) -> Self {
        Self {
            index,
            session,
            prefix,
            pending: VecDeque::new(),
            next_leaf: 0,
            started: false,
            done: false,
        }
    }

    fn position(&mut self) -> StorageResult<()> {
        let header = self.index.read_header(self.session)?;
        if header.root == 0 {
            self.done = true;
            return Ok(());
        }
        let path = self.index.navigate_to_leaf(self.session, header.root, &self.prefix)?;
        let leaf_no = *path
            .last()
            .ok_or_else(|| StorageError::invariant("empty path to leaf"))?;
        let leaf = self.index.load_leaf(self.session, leaf_no)?;
        let start = leaf.lower_bound(&self.prefix);
        self.pending.extend(leaf.entries()[start..].iter().cloned());
        self.next_leaf = leaf.next_leaf();
        Ok(())
    }

    fn try_next(&mut self) -> StorageResult<Option<BTreeKey>> {
        if !self.started {
            self.started = true;
            self.position()?;
        }
        while !self.done {
            if let Some(key) = self.pending.pop_front() {
                if key.compare_to(&self.prefix) == Ordering::Less {
                    continue;
                }
                if key.matches_prefix(&self.prefix) {
                    return Ok(Some(key));
                }
                self.done = true;
                break;
            }
            if self.next_leaf == 0 {
                self.done = true;
                break;
            }
            let leaf = self.index.load_leaf(self.session, self.next_leaf)?;
            self.pending.extend(leaf.entries().iter().cloned());
            self.next_leaf = leaf.next_leaf();
        }
        Ok(None)
    }
}

impl Iterator for IndexScanner<'_> {
    type Item = StorageResult<BTreeKey>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.try_next() {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::context::AccessContext;
    use crate::access::tuple::FilePointer;
    use crate::access::value::ColumnType;
    use crate::config::StorageConfig;
    use crate::session::Session;
    use crate::storage::manager::StorageManager;
    use anyhow::Result;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_prefix_scan_across_leaves() -> Result<()> {
        let dir = tempdir()?;
        let storage = StorageManager::new(StorageConfig::new(dir.path()).with_page_size(512))?;
        let ctx = Arc::new(AccessContext::new(Arc::new(storage), None));
        let index = BTreeIndex::create(
            ctx,
            "composite.idx",
            vec![ColumnType::Varchar(16), ColumnType::Integer],
        )?;
        let mut session = Session::new(SessionId(1));

        let mut n = 0;
        for category in ["apple", "banana", "cherry"] {
            for id in 0..40 {
                n += 1;
                index.add_entry(
                    &mut session,
                    &[Value::String(category.to_string()), Value::Integer(id)],
                    FilePointer::new(1 + n / 50, 2 * (n % 50) + 2),
                )?;
            }
        }
        assert!(index.height(&session)? > 1);

        let bananas: Vec<BTreeKey> = index
            .scan(&session, &[Value::String("banana".into())])
            .collect::<StorageResult<_>>()?;
        assert_eq!(bananas.len(), 40);
        for (i, key) in bananas.iter().enumerate() {
            assert_eq!(key.values()[0], Value::String("banana".into()));
            assert_eq!(key.values()[1], Value::Integer(i as i32));
        }

        let exact = index.lookup(
            &session,
            &[Value::String("cherry".into()), Value::Integer(39)],
        )?;
        assert_eq!(exact.len(), 1);
        assert!(index.lookup(&session, &[Value::String("blueberry".into())])?.is_empty());
        assert_eq!(index.scan(&session, &[]).count(), 120);
        Ok(())
    }
}
