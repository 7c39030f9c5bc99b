use thiserror::Error;

use crate::construct::Uid;

#[derive(Error, Debug)]
pub enum CudsError {
    #[error("Unknown class: {0}")]
    UnknownClass(String),
    #[error("Unknown predicate: {0}")]
    UnknownPredicate(String),
    #[error("Type mismatch for {predicate}: expected {expected}, found {found}")]
    TypeMismatch { predicate: String, expected: String, found: String },
    #[error("Individual not found: {0}")]
    NotFound(Uid),
    #[error("No store found at {0}")]
    StoreNotFound(String),
    #[error("Corrupt store at {location}: {message}")]
    CorruptStore { location: String, message: String },
    #[error("Backend busy: {0} is already open")]
    BackendBusy(String),
    #[error("Commit failed: {source}")]
    CommitFailed {
        #[source]
        source: Box<CudsError>,
    },
    #[error("Ontology error: {0}")]
    Ontology(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Session is closed")]
    SessionClosed,
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, CudsError>;

impl CudsError {
    pub fn corrupt(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptStore { location: location.into(), message: message.into() }
    }
}

// Helper conversions
impl From<rusqlite::Error> for CudsError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<std::io::Error> for CudsError {
    fn from(e: std::io::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<serde_json::Error> for CudsError {
    fn from(e: serde_json::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<config::ConfigError> for CudsError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
