//! WAL manager implementation.
//!
//! The WAL manager appends records to a sequence of numbered log files,
//! forces them to disk on request and reads them back for rollback and
//! recovery. Log files are written directly, never through the buffer pool.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;

use super::lsn::{FIRST_RECORD_OFFSET, LSN};
use super::record::{FOOTER_SIZE, WalRecord};
use crate::config::{DEFAULT_PAGE_SIZE, DEFAULT_WAL_FILE_SIZE_LIMIT, StorageConfig};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::file::{FileKind, MAX_PAGE_SIZE, encode_page_size};

/// WAL file prefix.
const WAL_FILE_PREFIX: &str = "wal-";

/// WAL file extension.
const WAL_FILE_EXTENSION: &str = ".log";

/// Offset of the previous file's end offset in a WAL file header.
const PREV_FILE_END_OFFSET: u64 = 2;

/// Upper bound on one encoded record: before and after images of a whole
/// page plus segment headers, file name and fixed fields.
const MAX_RECORD_SIZE: usize = 3 * MAX_PAGE_SIZE + 512;

/// Name of the WAL file with the given number.
pub fn wal_file_name(file_no: u16) -> String {
    format!("{}{:05}{}", WAL_FILE_PREFIX, file_no, WAL_FILE_EXTENSION)
}

fn parse_wal_file_name(name: &str) -> Option<u16> {
    name.strip_prefix(WAL_FILE_PREFIX)?
        .strip_suffix(WAL_FILE_EXTENSION)?
        .parse()
        .ok()
}

/// WAL manager configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory where WAL files are stored.
    pub wal_dir: PathBuf,
    /// A file is rotated once it reaches this many bytes.
    pub max_file_size: u64,
    /// Page size recorded in each WAL file header.
    pub page_size: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            wal_dir: PathBuf::from("."),
            max_file_size: DEFAULT_WAL_FILE_SIZE_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl From<&StorageConfig> for WalConfig {
    fn from(config: &StorageConfig) -> Self {
        WalConfig {
            wal_dir: config.base_dir.clone(),
            max_file_size: config.wal_file_size_limit,
            page_size: config.page_size,
        }
    }
}

/// The WAL file currently being appended to.
struct WalFile {
    file_no: u16,
    file: File,
    /// Current file size.
    size: u64,
}

impl WalFile {
    /// Create a new WAL file whose header points back at the end of the
    /// previous file.
    fn create(config: &WalConfig, file_no: u16, prev_file_end: u32) -> StorageResult<Self> {
        let path = config.wal_dir.join(wal_file_name(file_no));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_u8(FileKind::WriteAheadLog as u8)?;
        file.write_u8(encode_page_size(config.page_size)?)?;
        file.write_u32::<LittleEndian>(prev_file_end)?;
        file.sync_all()?;

        debug!("Created WAL file {}", path.display());
        Ok(WalFile {
            file_no,
            file,
            size: FIRST_RECORD_OFFSET as u64,
        })
    }

    fn open(config: &WalConfig, file_no: u16) -> StorageResult<Self> {
        let path = config.wal_dir.join(wal_file_name(file_no));
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let kind = file.read_u8()?;
        if kind != FileKind::WriteAheadLog as u8 {
            return Err(StorageError::Recovery(format!(
                "{} is not a WAL file (kind tag {})",
                path.display(),
                kind
            )));
        }
        let size = file.metadata()?.len();
        Ok(WalFile { file_no, file, size })
    }
}

/// Mutable state of the writer.
struct WalState {
    current: WalFile,
    /// Where the next record will be written.
    next_lsn: LSN,
    /// Every record before this LSN has been synced.
    durable_lsn: LSN,
}

/// Write-ahead log writer and reader.
pub struct WalManager {
    config: WalConfig,
    state: Mutex<WalState>,
    /// Read handles by file number.
    readers: Mutex<HashMap<u16, File>>,
}

impl WalManager {
    /// Open the log so the next record lands at `next_lsn`. Bytes past that
    /// point, including any later WAL files, were never forced and are
    /// discarded.
    pub fn open(config: WalConfig, next_lsn: LSN) -> StorageResult<Self> {
        fs::create_dir_all(&config.wal_dir)?;

        for file_no in list_wal_files(&config)? {
            if file_no > next_lsn.file_no {
                warn!("Removing unforced WAL file {}", wal_file_name(file_no));
                fs::remove_file(config.wal_dir.join(wal_file_name(file_no)))?;
            }
        }

        let path = config.wal_dir.join(wal_file_name(next_lsn.file_no));
        let current = if path.exists() {
            let mut current = WalFile::open(&config, next_lsn.file_no)?;
            let end = next_lsn.offset as u64;
            if current.size < end {
                return Err(StorageError::Recovery(format!(
                    "{} ends at {} before the next LSN {}",
                    path.display(),
                    current.size,
                    next_lsn
                )));
            }
            if current.size > end {
                warn!(
                    "Truncating {} unforced bytes from {}",
                    current.size - end,
                    path.display()
                );
                current.file.set_len(end)?;
                current.file.sync_all()?;
                current.size = end;
            }
            current
        } else {
            if next_lsn.offset != FIRST_RECORD_OFFSET {
                return Err(StorageError::Recovery(format!(
                    "WAL file {} is missing",
                    path.display()
                )));
            }
            let prev_end = match next_lsn.file_no.checked_sub(1) {
                Some(prev) => {
                    let prev_path = config.wal_dir.join(wal_file_name(prev));
                    match fs::metadata(&prev_path) {
                        Ok(meta) => meta.len() as u32,
                        Err(_) => 0,
                    }
                }
                None => 0,
            };
            WalFile::create(&config, next_lsn.file_no, prev_end)?
        };

        info!("Opened WAL at {}", next_lsn);
        Ok(WalManager {
            config,
            state: Mutex::new(WalState {
                current,
                next_lsn,
                durable_lsn: next_lsn,
            }),
            readers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn next_lsn(&self) -> LSN {
        self.state.lock().next_lsn
    }

    pub fn durable_lsn(&self) -> LSN {
        self.state.lock().durable_lsn
    }

    /// Append a record, rotating to a new file first if the current one is
    /// full. Returns the record's LSN.
    pub fn write_record(&self, record: &WalRecord) -> StorageResult<LSN> {
        let mut state = self.state.lock();
        if state.current.size >= self.config.max_file_size {
            self.rotate(&mut state)?;
        }

        let lsn = state.next_lsn;
        let bytes = record.encode(lsn.offset)?;
        let end = lsn.offset as u64 + bytes.len() as u64;
        if end > u32::MAX as u64 {
            return Err(StorageError::CapacityExceeded {
                required: end as usize,
                available: u32::MAX as usize,
            });
        }

        state.current.file.seek(SeekFrom::Start(lsn.offset as u64))?;
        state.current.file.write_all(&bytes)?;
        state.current.size = end;
        state.next_lsn = LSN::new(lsn.file_no, end as u32);

        trace!("Wrote WAL record {} at {}", record, lsn);
        Ok(lsn)
    }

    fn rotate(&self, state: &mut WalState) -> StorageResult<()> {
        let file_no = state.current.file_no.checked_add(1).ok_or_else(|| {
            StorageError::CapacityExceeded {
                required: u16::MAX as usize + 1,
                available: u16::MAX as usize,
            }
        })?;
        state.current.file.sync_all()?;
        let prev_end = state.current.size as u32;
        state.current = WalFile::create(&self.config, file_no, prev_end)?;
        state.next_lsn = LSN::first_in_file(file_no);
        info!("Rotated WAL to {}", wal_file_name(file_no));
        Ok(())
    }

    /// Make every record up to and including `up_to` durable. Returns the
    /// new durable LSN when a sync happened, `None` if nothing was needed.
    pub fn force(&self, up_to: LSN) -> StorageResult<Option<LSN>> {
        let mut state = self.state.lock();
        if up_to < state.durable_lsn {
            return Ok(None);
        }
        state.current.file.sync_all()?;
        state.durable_lsn = state.next_lsn;
        debug!("Forced WAL to {}", state.durable_lsn);
        Ok(Some(state.durable_lsn))
    }

    /// Sync everything written so far and return the durable LSN.
    pub fn force_all(&self) -> StorageResult<LSN> {
        let mut state = self.state.lock();
        state.current.file.sync_all()?;
        state.durable_lsn = state.next_lsn;
        Ok(state.durable_lsn)
    }

    fn with_reader<T>(&self, file_no: u16, f: impl FnOnce(&mut File) -> StorageResult<T>) -> StorageResult<T> {
        let mut readers = self.readers.lock();
        if !readers.contains_key(&file_no) {
            let path = self.config.wal_dir.join(wal_file_name(file_no));
            let file = File::open(&path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    StorageError::Recovery(format!("WAL file {} is missing", path.display()))
                }
                _ => StorageError::Io(e),
            })?;
            readers.insert(file_no, file);
        }
        match readers.get_mut(&file_no) {
            Some(file) => f(file),
            None => Err(StorageError::invariant("WAL reader vanished")),
        }
    }

    fn wal_file_exists(&self, file_no: u16) -> bool {
        self.config.wal_dir.join(wal_file_name(file_no)).is_file()
    }

    /// Read the record at `lsn`; also returns the LSN just past it.
    pub fn read_record(&self, lsn: LSN) -> StorageResult<(WalRecord, LSN)> {
        self.with_reader(lsn.file_no, |file| {
            let len = file.metadata()?.len();
            if lsn.offset < FIRST_RECORD_OFFSET || lsn.offset as u64 >= len {
                return Err(StorageError::Recovery(format!("no WAL record at {}", lsn)));
            }
            let to_read = (len - lsn.offset as u64).min(MAX_RECORD_SIZE as u64) as usize;
            let mut buf = vec![0u8; to_read];
            file.seek(SeekFrom::Start(lsn.offset as u64))?;
            file.read_exact(&mut buf)?;
            let (record, size) = WalRecord::decode(&buf, lsn.offset)?;
            Ok((record, LSN::new(lsn.file_no, lsn.offset + size as u32)))
        })
    }

    /// Read the record that ends right before `lsn`, crossing into the
    /// previous file when `lsn` is the first position of its file.
    pub fn read_record_before(&self, lsn: LSN) -> StorageResult<(LSN, WalRecord)> {
        let mut end = lsn;
        if end.offset <= FIRST_RECORD_OFFSET {
            let prev_file = end.file_no.checked_sub(1).ok_or_else(|| {
                StorageError::Recovery(format!("no WAL record before {}", lsn))
            })?;
            let prev_end = self.with_reader(end.file_no, |file| {
                file.seek(SeekFrom::Start(PREV_FILE_END_OFFSET))?;
                Ok(file.read_u32::<LittleEndian>()?)
            })?;
            end = LSN::new(prev_file, prev_end);
            if end.offset <= FIRST_RECORD_OFFSET {
                return Err(StorageError::Recovery(format!(
                    "WAL file {} is empty",
                    wal_file_name(prev_file)
                )));
            }
        }

        let start = self.with_reader(end.file_no, |file| {
            file.seek(SeekFrom::Start(end.offset as u64 - FOOTER_SIZE as u64))?;
            Ok(file.read_u32::<LittleEndian>()?)
        })?;
        let start_lsn = LSN::new(end.file_no, start);
        let (record, next) = self.read_record(start_lsn)?;
        if next != end {
            return Err(StorageError::Recovery(format!(
                "WAL record at {} ends at {}, expected {}",
                start_lsn, next, end
            )));
        }
        Ok((start_lsn, record))
    }

    /// Move an LSN sitting at the end of a finished file to the start of
    /// the next file.
    pub fn normalize(&self, lsn: LSN) -> StorageResult<LSN> {
        let len = self.with_reader(lsn.file_no, |file| Ok(file.metadata()?.len()))?;
        if lsn.offset as u64 >= len && self.wal_file_exists(lsn.file_no.wrapping_add(1)) {
            return Ok(LSN::first_in_file(lsn.file_no + 1));
        }
        Ok(lsn)
    }

    /// All records in `[from, to)`.
    pub fn scan(&self, from: LSN, to: LSN) -> StorageResult<Vec<(LSN, WalRecord)>> {
        let mut records = Vec::new();
        let mut lsn = from;
        loop {
            lsn = self.normalize(lsn)?;
            if lsn >= to {
                break;
            }
            let (record, next) = self.read_record(lsn)?;
            records.push((lsn, record));
            lsn = next;
        }
        Ok(records)
    }

    /// Number of the oldest WAL file still on disk.
    pub fn first_file_no(&self) -> StorageResult<Option<u16>> {
        Ok(list_wal_files(&self.config)?.into_iter().min())
    }
}

fn list_wal_files(config: &WalConfig) -> StorageResult<Vec<u16>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(&config.wal_dir)? {
        let entry = entry?;
        if let Some(file_no) = entry.file_name().to_str().and_then(parse_wal_file_name) {
            files.push(file_no);
        }
    }
    files.sort_unstable();
    Ok(files)
}
