//! Log sequence numbers.

use std::fmt;

/// Offset of the first record in every WAL file, just past the file header.
pub const FIRST_RECORD_OFFSET: u32 = 6;

/// Log Sequence Number: the WAL file number plus the byte offset of a
/// record within that file. LSNs order records across files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LSN {
    pub file_no: u16,
    pub offset: u32,
}

impl LSN {
    pub const fn new(file_no: u16, offset: u32) -> Self {
        LSN { file_no, offset }
    }

    /// LSN of the first record in the given file.
    pub const fn first_in_file(file_no: u16) -> Self {
        LSN::new(file_no, FIRST_RECORD_OFFSET)
    }
}

impl Default for LSN {
    fn default() -> Self {
        LSN::first_in_file(0)
    }
}

impl fmt::Display for LSN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({}:{})", self.file_no, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_ordering() {
        assert!(LSN::new(0, 500) < LSN::new(1, 6));
        assert!(LSN::new(1, 6) < LSN::new(1, 7));
        assert_eq!(LSN::default(), LSN::new(0, 6));
        assert_eq!(LSN::new(2, 40).to_string(), "LSN(2:40)");
    }
}
