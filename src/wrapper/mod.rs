//! Wrappers translate the graph of a session to and from a backend.
//!
//! A wrapper is a flat set of capabilities, implemented once per backend:
//! * [`sqlite::SqliteWrapper`] – a relational database file (SQLite).
//! * [`json::JsonWrapper`] – a single JSON document with a checksum.
//!
//! Every wrapper holds a [`LocationLock`] for as long as it is open, so that
//! two wrappers in the same process never write to the same location.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use serde::Deserialize;
use tracing::debug;

use crate::commit::Delta;
use crate::construct::{Individual, Object, SequencedTriple, Triple, Uid, UidHasher};
use crate::datatype::{Datatype, Literal};
use crate::error::{CudsError, Result};
use crate::ontology::{Ontology, OntologyClass, Predicate};

pub mod json;
pub mod sqlite;

pub use json::JsonWrapper;
pub use sqlite::SqliteWrapper;

/// Everything a wrapper restores into a session.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub individuals: Vec<Individual>,
    pub triples: Vec<SequencedTriple>,
    pub high_water_mark: u64,
}

pub trait Wrapper: Send {
    /// Opens the store at `location`. Without `create` a missing store is an
    /// error and nothing is written; with it an existing store is reused.
    fn open(location: impl AsRef<Path>, create: bool) -> Result<Self>
    where
        Self: Sized;
    fn kind(&self) -> &'static str;
    fn location(&self) -> &str;
    /// Reconstructs the persisted graph.
    fn load(&mut self, ontology: &Ontology) -> Result<Snapshot>;
    /// Applies the delta completely or not at all.
    fn persist(&mut self, delta: &Delta) -> Result<()>;
    /// Removes all individuals and triples from the backend.
    fn clear(&mut self) -> Result<()>;
    /// Releases the backend. Closing twice is harmless.
    fn close(&mut self) -> Result<()>;
}

// ------------- Location locks -------------
lazy_static! {
    static ref OPEN_LOCATIONS: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
}

#[derive(Debug)]
pub struct LocationLock {
    path: PathBuf,
}
impl LocationLock {
    pub fn acquire(location: &Path) -> Result<Self> {
        let path = std::path::absolute(location)?;
        let mut open = OPEN_LOCATIONS
            .lock()
            .map_err(|e| CudsError::Lock(e.to_string()))?;
        if !open.insert(path.clone()) {
            return Err(CudsError::BackendBusy(path.display().to_string()));
        }
        debug!(location = %path.display(), "location locked");
        Ok(Self { path })
    }
}
impl Drop for LocationLock {
    fn drop(&mut self) {
        if let Ok(mut open) = OPEN_LOCATIONS.lock() {
            open.remove(&self.path);
        }
    }
}

// ------------- Restoring -------------
/// Resolves stored names against the ontology. Anything the ontology does not
/// know, or that fails to parse, means the store does not fit and is corrupt.
pub(crate) struct Restorer<'o> {
    ontology: &'o Ontology,
    location: String,
}
impl<'o> Restorer<'o> {
    pub fn new(ontology: &'o Ontology, location: &str) -> Self {
        Self { ontology, location: location.to_string() }
    }
    pub fn corrupt(&self, message: impl Into<String>) -> CudsError {
        CudsError::corrupt(self.location.clone(), message)
    }
    pub fn class(&self, name: &str) -> Result<Arc<OntologyClass>> {
        self.ontology
            .class(name)
            .ok_or_else(|| self.corrupt(format!("unknown class '{}'", name)))
    }
    pub fn predicate(&self, name: &str) -> Result<Predicate> {
        self.ontology
            .predicate(name)
            .ok_or_else(|| self.corrupt(format!("unknown predicate '{}'", name)))
    }
    pub fn datatype(&self, name: &str) -> Result<Datatype> {
        Datatype::from_name(name).ok_or_else(|| self.corrupt(format!("unknown datatype '{}'", name)))
    }
    pub fn literal(&self, datatype: Datatype, text: &str) -> Result<Literal> {
        Literal::decode(datatype, text)
            .ok_or_else(|| self.corrupt(format!("'{}' is not a valid {}", text, datatype)))
    }
    /// Builds a triple and checks that its object fits the predicate.
    pub fn triple(&self, subject: Uid, predicate: &str, object: Object) -> Result<Triple> {
        let predicate = self.predicate(predicate)?;
        let fits = match (&predicate, &object) {
            (Predicate::Relation(_), Object::Individual(_)) => true,
            (Predicate::Attribute(a), Object::Literal(l)) => a.datatype().accepts(l),
            _ => false,
        };
        if !fits {
            return Err(self.corrupt(format!("object {} does not fit {}", object, predicate)));
        }
        Ok(Triple::new(subject, predicate, object))
    }
    /// Every triple must refer to restored individuals only.
    pub fn check(&self, snapshot: &Snapshot) -> Result<()> {
        let known: HashMap<Uid, (), UidHasher> =
            snapshot.individuals.iter().map(|i| (i.uid(), ())).collect();
        for sequenced in &snapshot.triples {
            let triple = &sequenced.triple;
            let dangling = !known.contains_key(&triple.subject())
                || triple.object().individual().is_some_and(|o| !known.contains_key(&o));
            if dangling {
                return Err(self.corrupt(format!("{} refers to a missing individual", triple)));
            }
        }
        Ok(())
    }
}

// ------------- Factory -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Json,
}

/// Opens a wrapper of the given kind.
pub fn open_store(backend: Backend, location: impl AsRef<Path>, create: bool) -> Result<Box<dyn Wrapper>> {
    Ok(match backend {
        Backend::Sqlite => Box::new(SqliteWrapper::open(location, create)?),
        Backend::Json => Box::new(JsonWrapper::open(location, create)?),
    })
}
