//! Error types for Relational operations.

use std::fmt;

/// The primary error type for all Relational operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, close)
    Connection(ConnectionError),
    /// Statement preparation or execution errors reported by the driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Malformed collection tree (invalid name, invalid condition shape)
    Collection(CollectionError),
    /// Internal compiler invariant violations
    Compile(CompileError),
    /// Result rows that do not match the compiled projection
    Hydration(HydrationError),
    /// Entity bookkeeping errors (unknown table, missing identifier)
    Tracking(TrackingError),
    /// Configuration errors
    Config(ConfigError),
    /// The driver does not support the requested operation
    Unsupported(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection closed or unusable
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// Driver-specific result code, if any
    pub code: Option<i32>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Parameter count or binding mismatch
    Binding,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// BEGIN while a transaction is already open
    AlreadyActive,
    /// COMMIT or ROLLBACK without an open transaction
    NotActive,
}

#[derive(Debug, Clone)]
pub struct CollectionError {
    pub kind: CollectionErrorKind,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionErrorKind {
    /// Collection name is empty or not a plain identifier
    InvalidName,
    /// Condition is neither a scalar nor a flat mapping
    InvalidCondition,
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub alias: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct HydrationError {
    pub kind: HydrationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationErrorKind {
    /// Number of identifier boundaries differs from the number of aliases
    ColumnMismatch,
    /// Driver metadata reports a column from an unexpected table
    SourceTableMismatch,
}

#[derive(Debug, Clone)]
pub struct TrackingError {
    pub kind: TrackingErrorKind,
    pub table: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingErrorKind {
    /// Entity is untracked and no table name was supplied
    UnknownTable,
    /// Entity has no identifier value where one is required
    MissingIdentifier,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Get the SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Errors that callers may treat as "not available" rather than fatal.
    pub fn is_soft(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    /// Shorthand for a collection construction error.
    pub fn invalid_condition(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Collection(CollectionError {
            kind: CollectionErrorKind::InvalidCondition,
            name: name.into(),
            message: message.into(),
        })
    }

    /// Shorthand for an entity bookkeeping error.
    pub fn tracking(
        kind: TrackingErrorKind,
        table: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Tracking(TrackingError {
            kind,
            table: table.map(str::to_string),
            message: message.into(),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sql) = &e.sql {
                    write!(f, "Query error: {} (while running `{}`)", e.message, sql)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Collection(e) => write!(f, "Collection error: {}", e),
            Error::Compile(e) => write!(f, "Compile error: {}", e),
            Error::Hydration(e) => write!(f, "Hydration error: {}", e.message),
            Error::Tracking(e) => write!(f, "Tracking error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = match self {
            Error::Connection(e) => e.source.as_deref(),
            Error::Query(e) => e.source.as_deref(),
            Error::Config(e) => e.source.as_deref(),
            _ => None,
        };
        source.map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collection '{}': {}", self.name, self.message)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} (alias '{}')", self.message, alias),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{} (table '{}')", self.message, table),
            None => write!(f, "{}", self.message),
        }
    }
}

macro_rules! message_display {
    ($($payload:ident),* $(,)?) => {
        $(
            impl fmt::Display for $payload {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.message)
                }
            }
        )*
    };
}

message_display!(ConnectionError, TransactionError, HydrationError, ConfigError);

macro_rules! error_from {
    ($($payload:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$payload> for Error {
                fn from(err: $payload) -> Self {
                    Error::$variant(err)
                }
            }
        )*
    };
}

error_from! {
    ConnectionError => Connection,
    QueryError => Query,
    TypeError => Type,
    TransactionError => Transaction,
    CollectionError => Collection,
    CompileError => Compile,
    HydrationError => Hydration,
    TrackingError => Tracking,
    ConfigError => Config,
}

/// Result type alias for Relational operations.
pub type Result<T> = std::result::Result<T, Error>;
