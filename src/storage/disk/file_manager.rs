use crate::storage::error::{StorageError, StorageResult};
use crate::storage::file::{
    DbFile, FileKind, FILE_KIND_OFFSET, PAGE_SIZE_OFFSET, decode_page_size, encode_page_size,
};
use log::{debug, trace};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Outcome of reading a page that may lie past the end of its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRead {
    Found,
    Missing,
}

/// Outcome of loading a page, possibly extending the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoad {
    Loaded,
    Created,
}

/// Creates, opens and deletes files under a base directory and moves whole
/// pages between those files and memory.
#[derive(Debug)]
pub struct FileManager {
    base_dir: PathBuf,
}

impl FileManager {
    pub fn new(base_dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.base_dir.join(name).is_file()
    }

    /// Create a new file whose page 0 carries the kind tag and page size.
    pub fn create_file(&self, name: &str, kind: FileKind, page_size: usize) -> StorageResult<DbFile> {
        let encoded = encode_page_size(page_size)?;
        let path = self.base_dir.join(name);
        let mut handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::FileExists(name.to_string()),
                _ => StorageError::Io(e),
            })?;

        let mut header = vec![0u8; page_size];
        header[FILE_KIND_OFFSET] = kind as u8;
        header[PAGE_SIZE_OFFSET] = encoded;
        handle.write_all(&header)?;
        handle.sync_all()?;

        debug!("Created {} file {} with page size {}", kind, name, page_size);
        Ok(DbFile::new(name, path, kind, page_size, handle))
    }

    /// Open an existing file, reading its kind and page size from the header.
    pub fn open_file(&self, name: &str) -> StorageResult<DbFile> {
        let path = self.base_dir.join(name);
        let mut handle = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::FileNotFound(name.to_string()),
                _ => StorageError::Io(e),
            })?;

        let mut header = [0u8; 2];
        handle.read_exact(&mut header)?;
        let kind = FileKind::from_u8(header[FILE_KIND_OFFSET])?;
        let page_size = decode_page_size(header[PAGE_SIZE_OFFSET])?;

        debug!("Opened {} file {} with page size {}", kind, name, page_size);
        Ok(DbFile::new(name, path, kind, page_size, handle))
    }

    pub fn delete_file(&self, name: &str) -> StorageResult<()> {
        fs::remove_file(self.base_dir.join(name)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::FileNotFound(name.to_string()),
            _ => StorageError::Io(e),
        })?;
        debug!("Deleted file {}", name);
        Ok(())
    }

    /// Read a page into `buf`. Pages wholly or partly past the end of the
    /// file are reported as missing and leave `buf` untouched.
    pub fn read_page(&self, file: &DbFile, page_no: u32, buf: &mut [u8]) -> StorageResult<PageRead> {
        Self::check_buffer(file, buf.len())?;

        let offset = Self::page_offset(file, page_no);
        let mut handle = file.handle();
        let file_size = handle.metadata()?.len();
        if offset + file.page_size() as u64 > file_size {
            return Ok(PageRead::Missing);
        }

        handle.seek(SeekFrom::Start(offset))?;
        handle.read_exact(buf)?;
        trace!("Read page {} of {}", page_no, file.name());
        Ok(PageRead::Found)
    }

    /// Read a page, or when `create` is set, zero `buf` and extend the file
    /// so the page exists.
    pub fn load_page(
        &self,
        file: &DbFile,
        page_no: u32,
        buf: &mut [u8],
        create: bool,
    ) -> StorageResult<PageLoad> {
        match self.read_page(file, page_no, buf)? {
            PageRead::Found => Ok(PageLoad::Loaded),
            PageRead::Missing if create => {
                buf.fill(0);
                let new_size = Self::page_offset(file, page_no + 1);
                let handle = file.handle();
                if handle.metadata()?.len() < new_size {
                    handle.set_len(new_size)?;
                }
                debug!("Extended {} to page {}", file.name(), page_no);
                Ok(PageLoad::Created)
            }
            PageRead::Missing => Err(StorageError::PageNotFound {
                file: file.name().to_string(),
                page_no,
            }),
        }
    }

    pub fn save_page(&self, file: &DbFile, page_no: u32, data: &[u8]) -> StorageResult<()> {
        Self::check_buffer(file, data.len())?;

        let mut handle = file.handle();
        handle.seek(SeekFrom::Start(Self::page_offset(file, page_no)))?;
        handle.write_all(data)?;
        trace!("Wrote page {} of {}", page_no, file.name());
        Ok(())
    }

    pub fn sync_file(&self, file: &DbFile) -> StorageResult<()> {
        file.handle().sync_all()?;
        Ok(())
    }

    /// Number of whole pages in the file, header page included.
    pub fn num_pages(&self, file: &DbFile) -> StorageResult<u32> {
        let file_size = file.handle().metadata()?.len();
        Ok((file_size / file.page_size() as u64) as u32)
    }

    fn check_buffer(file: &DbFile, len: usize) -> StorageResult<()> {
        if len != file.page_size() {
            return Err(StorageError::invariant(format!(
                "buffer of {} bytes used for a page of {} bytes in {}",
                len,
                file.page_size(),
                file.name()
            )));
        }
        Ok(())
    }

    fn page_offset(file: &DbFile, page_no: u32) -> u64 {
        page_no as u64 * file.page_size() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;

        {
            let file = fm.create_file("test.tbl", FileKind::HeapData, 1024)?;
            assert_eq!(file.kind(), FileKind::HeapData);
            assert_eq!(fm.num_pages(&file)?, 1);
        }

        let file = fm.open_file("test.tbl")?;
        assert_eq!(file.kind(), FileKind::HeapData);
        assert_eq!(file.page_size(), 1024);
        Ok(())
    }

    #[test]
    fn test_create_existing_file() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;
        fm.create_file("dup.tbl", FileKind::HeapData, 512)?;

        let result = fm.create_file("dup.tbl", FileKind::HeapData, 512);
        assert!(matches!(result, Err(StorageError::FileExists(_))));
        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;

        let result = fm.open_file("missing.tbl");
        assert!(matches!(result, Err(StorageError::FileNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_open_unrecognized_kind() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;
        fs::write(dir.path().join("junk.bin"), [0xEEu8, 9, 0, 0])?;

        let result = fm.open_file("junk.bin");
        assert!(matches!(result, Err(StorageError::UnrecognizedFileKind(0xEE))));
        Ok(())
    }

    #[test]
    fn test_save_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;
        let file = fm.create_file("rw.tbl", FileKind::HeapData, 512)?;

        let mut buf = vec![0u8; 512];
        assert_eq!(fm.load_page(&file, 1, &mut buf, true)?, PageLoad::Created);

        let data: Vec<u8> = (0..512).map(|i| (i % 251) as u8).collect();
        fm.save_page(&file, 1, &data)?;

        let mut read_buf = vec![0u8; 512];
        assert_eq!(fm.read_page(&file, 1, &mut read_buf)?, PageRead::Found);
        assert_eq!(read_buf, data);
        Ok(())
    }

    #[test]
    fn test_read_missing_page() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;
        let file = fm.create_file("short.tbl", FileKind::HeapData, 512)?;

        let mut buf = vec![7u8; 512];
        assert_eq!(fm.read_page(&file, 3, &mut buf)?, PageRead::Missing);
        assert!(buf.iter().all(|&b| b == 7));

        let result = fm.load_page(&file, 3, &mut buf, false);
        assert!(matches!(
            result,
            Err(StorageError::PageNotFound { page_no: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_page_extends_file() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;
        let file = fm.create_file("grow.tbl", FileKind::BTreeIndex, 512)?;

        let mut buf = vec![9u8; 512];
        assert_eq!(fm.load_page(&file, 4, &mut buf, true)?, PageLoad::Created);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(fm.num_pages(&file)?, 5);

        assert_eq!(fm.load_page(&file, 2, &mut buf, false)?, PageLoad::Loaded);
        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;
        let file = fm.create_file("bad.tbl", FileKind::HeapData, 512)?;

        let mut small = vec![0u8; 100];
        assert!(fm.read_page(&file, 0, &mut small).is_err());
        assert!(fm.save_page(&file, 0, &small).is_err());
        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        let data = vec![0x5Au8; 1024];

        {
            let fm = FileManager::new(dir.path())?;
            let file = fm.create_file("p.idx", FileKind::BTreeIndex, 1024)?;
            let mut buf = vec![0u8; 1024];
            fm.load_page(&file, 1, &mut buf, true)?;
            fm.save_page(&file, 1, &data)?;
            fm.sync_file(&file)?;
        }

        let fm = FileManager::new(dir.path())?;
        let file = fm.open_file("p.idx")?;
        assert_eq!(file.kind(), FileKind::BTreeIndex);
        let mut buf = vec![0u8; 1024];
        fm.read_page(&file, 1, &mut buf)?;
        assert_eq!(buf, data);
        Ok(())
    }

    #[test]
    fn test_delete_file() -> Result<()> {
        let dir = tempdir()?;
        let fm = FileManager::new(dir.path())?;
        drop(fm.create_file("gone.tbl", FileKind::HeapData, 512)?);
        assert!(fm.file_exists("gone.tbl"));

        fm.delete_file("gone.tbl")?;
        assert!(!fm.file_exists("gone.tbl"));
        assert!(matches!(
            fm.delete_file("gone.tbl"),
            Err(StorageError::FileNotFound(_))
        ));
        Ok(())
    }
}
