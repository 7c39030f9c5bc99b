use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commit::Delta;
use crate::construct::{Individual, Object, SequencedTriple, Uid};
use crate::error::{CudsError, Result};
use crate::ontology::Ontology;
use crate::wrapper::{LocationLock, Restorer, Snapshot, Wrapper};

pub const FORMAT: &str = "cuds-json/1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredTriple {
    subject: u64,
    predicate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Payload {
    high_water_mark: u64,
    // identity to class names, primary class first
    individuals: BTreeMap<u64, Vec<String>>,
    // keyed by the content hash of the triple
    triples: BTreeMap<String, StoredTriple>,
}

impl Payload {
    fn apply(&mut self, delta: &Delta) {
        for removed in &delta.removed_triples {
            self.triples.remove(&removed.triple.key());
        }
        for removed in &delta.removed_individuals {
            self.individuals.remove(&removed.value());
        }
        for added in &delta.added_individuals {
            self.individuals.insert(
                added.uid().value(),
                added.class_names().into_iter().map(String::from).collect(),
            );
        }
        for added in &delta.added_triples {
            let triple = &added.triple;
            let mut stored = StoredTriple {
                subject: triple.subject().value(),
                predicate: triple.predicate().name().to_string(),
                sequence: added.sequence,
                ..Default::default()
            };
            match triple.object() {
                Object::Individual(uid) => stored.object = Some(uid.value()),
                Object::Literal(literal) => {
                    stored.datatype = Some(literal.datatype().name().to_string());
                    stored.value = Some(literal.encode());
                }
            }
            self.triples.insert(triple.key(), stored);
        }
        self.high_water_mark = self.high_water_mark.max(delta.high_water_mark);
    }
    fn checksum(&self) -> Result<String> {
        Ok(blake3::hash(&serde_json::to_vec(self)?).to_hex().to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    format: String,
    checksum: String,
    payload: Payload,
}

/// Keeps the whole graph in one JSON document. Every commit rewrites the
/// document through a temporary file that replaces the old one, so a reader
/// sees either the previous or the new state.
pub struct JsonWrapper {
    path: PathBuf,
    location: String,
    payload: Payload,
    lock: Option<LocationLock>,
}

impl JsonWrapper {
    fn read(path: &Path, location: &str) -> Result<Payload> {
        let text = fs::read_to_string(path)?;
        let document: Document = serde_json::from_str(&text)
            .map_err(|e| CudsError::corrupt(location, e.to_string()))?;
        if document.format != FORMAT {
            return Err(CudsError::corrupt(
                location,
                format!("format {} where {} was expected", document.format, FORMAT),
            ));
        }
        if document.payload.checksum()? != document.checksum {
            return Err(CudsError::corrupt(location, "checksum mismatch"));
        }
        Ok(document.payload)
    }

    fn write(&self, payload: &Payload) -> Result<()> {
        let document = Document {
            format: FORMAT.to_string(),
            checksum: payload.checksum()?,
            payload: payload.clone(),
        };
        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);
        let bytes = serde_json::to_vec_pretty(&document)?;
        let written = Self::replace(&temporary, &self.path, &bytes);
        if written.is_err() {
            let _ = fs::remove_file(&temporary);
        }
        written
    }

    fn replace(temporary: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = File::create(temporary)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(temporary, path)?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lock.is_none() {
            return Err(CudsError::Persistence(format!("{} is closed", self.location)));
        }
        Ok(())
    }
}

impl Wrapper for JsonWrapper {
    fn open(location: impl AsRef<Path>, create: bool) -> Result<Self> {
        let path = location.as_ref().to_path_buf();
        let shown = path.display().to_string();
        if !path.exists() && !create {
            return Err(CudsError::StoreNotFound(shown));
        }
        let lock = LocationLock::acquire(&path)?;
        let mut wrapper = JsonWrapper {
            path,
            location: shown,
            payload: Payload::default(),
            lock: Some(lock),
        };
        if wrapper.path.exists() {
            wrapper.payload = Self::read(&wrapper.path, &wrapper.location)?;
            debug!(location = %wrapper.location, "opening json store");
        } else {
            wrapper.write(&Payload::default())?;
            info!(location = %wrapper.location, "created store");
        }
        Ok(wrapper)
    }

    fn kind(&self) -> &'static str {
        "json"
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn load(&mut self, ontology: &Ontology) -> Result<Snapshot> {
        self.ensure_open()?;
        let restorer = Restorer::new(ontology, &self.location);
        let mut snapshot = Snapshot {
            high_water_mark: self.payload.high_water_mark,
            ..Default::default()
        };
        for (uid, names) in &self.payload.individuals {
            if names.is_empty() {
                return Err(restorer.corrupt(format!("individual {} has no class", uid)));
            }
            let classes = names
                .iter()
                .map(|name| restorer.class(name))
                .collect::<Result<Vec<_>>>()?;
            snapshot.individuals.push(Individual::new(Uid::new(*uid), classes));
        }
        for (key, stored) in &self.payload.triples {
            let object = match (stored.object, &stored.datatype, &stored.value) {
                (Some(uid), None, None) => Object::Individual(Uid::new(uid)),
                (None, Some(datatype), Some(value)) => {
                    Object::Literal(restorer.literal(restorer.datatype(datatype)?, value)?)
                }
                _ => return Err(restorer.corrupt(format!("triple {} has no single object", key))),
            };
            let triple = restorer.triple(Uid::new(stored.subject), &stored.predicate, object)?;
            snapshot.triples.push(SequencedTriple { triple, sequence: stored.sequence });
        }
        restorer.check(&snapshot)?;
        debug!(
            location = %self.location,
            individuals = snapshot.individuals.len(),
            triples = snapshot.triples.len(),
            "loaded json store"
        );
        Ok(snapshot)
    }

    fn persist(&mut self, delta: &Delta) -> Result<()> {
        self.ensure_open()?;
        let mut next = self.payload.clone();
        next.apply(delta);
        self.write(&next)?;
        self.payload = next;
        debug!(location = %self.location, "persisted delta");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        let next = Payload {
            high_water_mark: self.payload.high_water_mark,
            ..Default::default()
        };
        self.write(&next)?;
        self.payload = next;
        info!(location = %self.location, "cleared store");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.lock.take().is_some() {
            debug!(location = %self.location, "closed json store");
        }
        Ok(())
    }
}
