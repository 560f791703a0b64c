//! Structural checks for B+-tree indexes.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::access::btree::key::BTreeKey;
use crate::access::btree::{BTreeIndex, Node};
use crate::session::{Session, SessionId};
use crate::storage::error::{StorageError, StorageResult};

struct VerifyState {
    problems: Vec<String>,
    leaves: Vec<u16>,
    leaf_depth: Option<usize>,
    visited: HashSet<u16>,
}

impl BTreeIndex {
    /// Check key order, separator bounds, leaf depth and the leaf chain.
    /// Returns one message per problem; an empty list means the tree is sound.
    pub fn verify(&self, session: &Session) -> StorageResult<Vec<String>> {
        let header = self.read_header(session.id())?;
        let mut state = VerifyState {
            problems: Vec::new(),
            leaves: Vec::new(),
            leaf_depth: None,
            visited: HashSet::new(),
        };
        if header.root == 0 {
            if header.first_leaf != 0 {
                state
                    .problems
                    .push(format!("empty index has first leaf {}", header.first_leaf));
            }
            return Ok(state.problems);
        }

        self.verify_node(session.id(), header.root, None, None, 1, &mut state)?;

        let mut chain = Vec::new();
        let mut page_no = header.first_leaf;
        while page_no != 0 && chain.len() <= state.leaves.len() {
            chain.push(page_no);
            page_no = match self.load_leaf(session.id(), page_no) {
                Ok(leaf) => leaf.next_leaf(),
                Err(StorageError::InvariantViolation(msg)) => {
                    state.problems.push(msg);
                    break;
                }
                Err(e) => return Err(e),
            };
        }
        if chain != state.leaves {
            state.problems.push(format!(
                "leaf chain {:?} does not match tree order {:?}",
                chain, state.leaves
            ));
        }
        Ok(state.problems)
    }

    fn verify_node(
        &self,
        session: SessionId,
        page_no: u16,
        lower: Option<&BTreeKey>,
        upper: Option<&BTreeKey>,
        depth: usize,
        state: &mut VerifyState,
    ) -> StorageResult<()> {
        if !state.visited.insert(page_no) {
            state.problems.push(format!("page {} is reachable twice", page_no));
            return Ok(());
        }
        let node = match self.load_node(session, page_no) {
            Ok(node) => node,
            Err(StorageError::InvariantViolation(msg)) => {
                state.problems.push(msg);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match node {
            Node::Leaf(leaf) => {
                match state.leaf_depth {
                    None => state.leaf_depth = Some(depth),
                    Some(d) if d != depth => state.problems.push(format!(
                        "leaf {} at depth {}, expected {}",
                        page_no, depth, d
                    )),
                    Some(_) => {}
                }
                if leaf.is_empty() {
                    state.problems.push(format!("leaf {} is empty", page_no));
                }
                check_keys(page_no, leaf.entries(), lower, upper, &mut state.problems);
                state.leaves.push(page_no);
            }
            Node::Inner(inner) => {
                let keys = inner.keys();
                check_keys(page_no, keys, lower, upper, &mut state.problems);
                for (i, child) in inner.pointers().iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { keys.get(i - 1) };
                    let child_upper = keys.get(i).or(upper);
                    self.verify_node(session, *child, child_lower, child_upper, depth + 1, state)?;
                }
            }
        }
        Ok(())
    }
}

/// Keys must increase strictly and lie within `[lower, upper)`.
fn check_keys(
    page_no: u16,
    keys: &[BTreeKey],
    lower: Option<&BTreeKey>,
    upper: Option<&BTreeKey>,
    problems: &mut Vec<String>,
) {
    for pair in keys.windows(2) {
        if pair[0].compare(&pair[1]) != Ordering::Less {
            problems.push(format!(
                "page {}: key {:?} is not below {:?}",
                page_no,
                pair[0].values(),
                pair[1].values()
            ));
        }
    }
    for key in keys {
        if let Some(lower) = lower {
            if key.compare(lower) == Ordering::Less {
                problems.push(format!(
                    "page {}: key {:?} below separator {:?}",
                    page_no,
                    key.values(),
                    lower.values()
                ));
            }
        }
        if let Some(upper) = upper {
            if key.compare(upper) != Ordering::Less {
                problems.push(format!(
                    "page {}: key {:?} not below separator {:?}",
                    page_no,
                    key.values(),
                    upper.values()
                ));
            }
        }
    }
}
