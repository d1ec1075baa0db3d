//! How a database file is opened.

use crate::ffi;
use std::ffi::c_int;
use std::time::Duration;

/// `sqlite3_open_v2` flags.
///
/// Start from an access mode and add options:
///
/// ```
/// use relational_sqlite::OpenFlags;
///
/// let flags = OpenFlags::read_only().uri();
/// assert!(flags.is_read_only());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(c_int);

impl OpenFlags {
    pub fn read_only() -> Self {
        Self(ffi::SQLITE_OPEN_READONLY)
    }

    /// Existing databases only.
    pub fn read_write() -> Self {
        Self(ffi::SQLITE_OPEN_READWRITE)
    }

    pub fn create_read_write() -> Self {
        Self(ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE)
    }

    /// Interpret the path as a `file:` URI.
    pub fn uri(self) -> Self {
        Self(self.0 | ffi::SQLITE_OPEN_URI)
    }

    /// Serialized threading mode for this handle.
    pub fn full_mutex(self) -> Self {
        Self((self.0 & !ffi::SQLITE_OPEN_NOMUTEX) | ffi::SQLITE_OPEN_FULLMUTEX)
    }

    pub fn no_mutex(self) -> Self {
        Self((self.0 & !ffi::SQLITE_OPEN_FULLMUTEX) | ffi::SQLITE_OPEN_NOMUTEX)
    }

    pub fn shared_cache(self, shared: bool) -> Self {
        let cleared = self.0 & !(ffi::SQLITE_OPEN_SHAREDCACHE | ffi::SQLITE_OPEN_PRIVATECACHE);
        let cache = if shared {
            ffi::SQLITE_OPEN_SHAREDCACHE
        } else {
            ffi::SQLITE_OPEN_PRIVATECACHE
        };
        Self(cleared | cache)
    }

    pub fn is_read_only(self) -> bool {
        self.0 & ffi::SQLITE_OPEN_READONLY != 0
    }

    pub(crate) fn bits(self) -> c_int {
        self.0
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::create_read_write()
    }
}

/// Where and how to open a database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// File path, or `:memory:`
    pub path: String,
    pub flags: OpenFlags,
    /// How long a statement waits on a locked database; zero disables waiting
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::file(":memory:")
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::default(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub(crate) fn busy_timeout_ms(&self) -> c_int {
        c_int::try_from(self.busy_timeout.as_millis()).unwrap_or(c_int::MAX)
    }
}
