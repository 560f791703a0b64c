//! Byte-level page diffs for update records.

/// Runs of identical bytes at most this long are absorbed into the
/// surrounding changed segment instead of splitting it.
pub const MAX_SAME_RUN: usize = 4;

/// A changed range of a page: `offset` plus the bytes before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSegment {
    pub offset: u16,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

/// A changed range carrying only the new bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoSegment {
    pub offset: u16,
    pub after: Vec<u8>,
}

/// Find the ranges where `old` and `new` differ. Both slices must have the
/// same length, which must fit page offsets in a u16.
pub fn diff_pages(old: &[u8], new: &[u8]) -> Vec<UpdateSegment> {
    debug_assert_eq!(old.len(), new.len());
    let len = old.len().min(new.len());
    let mut segments = Vec::new();
    let mut i = 0;

    while i < len {
        if old[i] == new[i] {
            i += 1;
            continue;
        }

        let start = i;
        let mut end = i + 1;
        loop {
            // Look past a short run of equal bytes for another difference.
            let mut j = end;
            while j < len && old[j] == new[j] && j - end <= MAX_SAME_RUN {
                j += 1;
            }
            if j < len && old[j] != new[j] && j - end <= MAX_SAME_RUN {
                end = j + 1;
            } else {
                break;
            }
        }

        segments.push(UpdateSegment {
            offset: start as u16,
            before: old[start..end].to_vec(),
            after: new[start..end].to_vec(),
        });
        i = end;
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_pages() {
        let page = vec![3u8; 64];
        assert!(diff_pages(&page, &page).is_empty());
    }

    #[test]
    fn test_short_same_run_absorbed() {
        let old = vec![0u8; 64];
        let mut new = old.clone();
        new[10] = 1;
        new[15] = 1; // 4 equal bytes in between

        let segments = diff_pages(&old, &new);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].offset, 10);
        assert_eq!(segments[0].after, vec![1, 0, 0, 0, 0, 1]);
        assert_eq!(segments[0].before, vec![0; 6]);
    }

    #[test]
    fn test_long_same_run_splits() {
        let old = vec![0u8; 64];
        let mut new = old.clone();
        new[10] = 1;
        new[16] = 2; // 5 equal bytes in between

        let segments = diff_pages(&old, &new);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].offset, 10);
        assert_eq!(segments[0].after, vec![1]);
        assert_eq!(segments[1].offset, 16);
        assert_eq!(segments[1].after, vec![2]);
    }

    #[test]
    fn test_change_at_page_edges() {
        let old = vec![0u8; 32];
        let mut new = old.clone();
        new[0] = 9;
        new[31] = 9;

        let segments = diff_pages(&old, &new);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].offset, 31);
        assert_eq!(segments[1].before, vec![0]);
    }
}
