pub mod access;
pub mod config;
pub mod database;
pub mod recovery;
pub mod session;
pub mod storage;
pub mod transaction;

pub use config::{EvictionPolicy, StorageConfig};
pub use database::{Database, FileStats};
pub use session::{Session, SessionId};
pub use storage::error::{StorageError, StorageResult};
