// used for persistence
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction};
use bimap::BiMap;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::commit::Delta;
use crate::construct::{Individual, Object, SequencedTriple, Uid, UidHasher};
use crate::datatype::{Datatype, Literal};
use crate::error::{CudsError, Result};
use crate::ontology::Ontology;
use crate::wrapper::{LocationLock, Restorer, Snapshot, Wrapper};

pub const SCHEMA_VERSION: &str = "cuds-sqlite/1";
const IN_MEMORY: &str = ":memory:";

// ------------- Persistence -------------
pub struct SqliteWrapper {
    connection: Option<Connection>,
    location: String,
    // class and predicate names with their identities in the Entity table
    vocabulary: BiMap<String, i64>,
    _lock: Option<LocationLock>,
}

impl SqliteWrapper {
    /// A store that lives and dies with the wrapper, handy for tests.
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Self::with_connection(connection, IN_MEMORY.to_string(), None, true)
    }

    fn with_connection(
        connection: Connection,
        location: String,
        lock: Option<LocationLock>,
        create: bool,
    ) -> Result<Self> {
        let mut wrapper = SqliteWrapper {
            connection: Some(connection),
            location,
            vocabulary: BiMap::new(),
            _lock: lock,
        };
        wrapper.initialize(create)?;
        Ok(wrapper)
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        let location = self.location.clone();
        self.connection
            .as_mut()
            .ok_or_else(|| CudsError::Persistence(format!("{} is closed", location)))
    }

    fn initialize(&mut self, create: bool) -> Result<()> {
        let location = self.location.clone();
        let connection = self.connection()?;
        connection
            .execute_batch("pragma foreign_keys = on;")
            .map_err(|e| classify(&location, e))?;
        let tables: i64 = connection
            .query_row("select count(*) from sqlite_master where type = 'table'", [], |r| r.get(0))
            .map_err(|e| classify(&location, e))?;
        let has_store: i64 = connection
            .query_row(
                "select count(*) from sqlite_master where type = 'table' and name = 'Store'",
                [],
                |r| r.get(0),
            )
            .map_err(|e| classify(&location, e))?;
        if has_store == 0 {
            if tables > 0 && !create {
                return Err(CudsError::corrupt(location, "not a session store"));
            }
            // The "STRICT" keyword is left out so that external tools can still
            // be used to inspect the file
            connection.execute_batch(
                "
            create table if not exists Store (
                Property text not null,
                Value text not null,
                constraint referenceable_Property primary key (
                    Property
                )
            );
            create table if not exists Entity (
                Entity_Identity integer not null,
                Entity text not null,
                constraint referenceable_Entity_Identity primary key (
                    Entity_Identity
                ),
                constraint unique_Entity unique (
                    Entity
                )
            );
            create table if not exists DataType (
                DataType_Identity integer not null,
                DataType text not null,
                constraint referenceable_DataType_Identity primary key (
                    DataType_Identity
                ),
                constraint unique_DataType unique (
                    DataType
                )
            );
            create table if not exists Individual (
                Individual_Identity integer not null,
                constraint referenceable_Individual_Identity primary key (
                    Individual_Identity
                )
            );
            create table if not exists Classification (
                Individual_Identity integer not null,
                Class_Identity integer not null,
                Position integer not null,
                constraint Classification_of_Individual foreign key (
                    Individual_Identity
                ) references Individual(Individual_Identity),
                constraint Class_is_Entity foreign key (
                    Class_Identity
                ) references Entity(Entity_Identity),
                constraint unique_Classification primary key (
                    Individual_Identity,
                    Class_Identity
                )
            );
            create table if not exists Triple (
                Triple_Key text not null,
                Subject_Identity integer not null,
                Predicate_Identity integer not null,
                Object_Identity integer null,
                Value blob null,
                ValueType_Identity integer null,
                Sequence integer null,
                constraint Subject_is_Individual foreign key (
                    Subject_Identity
                ) references Individual(Individual_Identity),
                constraint Object_is_Individual foreign key (
                    Object_Identity
                ) references Individual(Individual_Identity),
                constraint Predicate_is_Entity foreign key (
                    Predicate_Identity
                ) references Entity(Entity_Identity),
                constraint ValueType_is_DataType foreign key (
                    ValueType_Identity
                ) references DataType(DataType_Identity),
                constraint referenceable_Triple_Key primary key (
                    Triple_Key
                )
            );
            ",
            )?;
            let tx = connection.transaction()?;
            tx.execute(
                "insert into Store (Property, Value) values ('Schema', ?)",
                params![SCHEMA_VERSION],
            )?;
            tx.execute(
                "insert into Store (Property, Value) values ('HighWaterMark', '0')",
                [],
            )?;
            for datatype in Datatype::ALL {
                tx.execute(
                    "insert or ignore into DataType (DataType_Identity, DataType) values (?, ?)",
                    params![datatype.uid(), datatype.name()],
                )?;
            }
            tx.commit()?;
            info!(location = %location, "created store");
        } else {
            let version: Option<String> = connection
                .query_row("select Value from Store where Property = 'Schema'", [], |r| r.get(0))
                .optional()?;
            if version.as_deref() != Some(SCHEMA_VERSION) {
                return Err(CudsError::corrupt(
                    location,
                    format!("schema {:?} where {} was expected", version, SCHEMA_VERSION),
                ));
            }
        }
        Ok(())
    }

    fn restore_vocabulary(&mut self) -> Result<()> {
        let connection = self.connection()?;
        let mut vocabulary = BiMap::new();
        let mut statement = connection.prepare("select Entity_Identity, Entity from Entity")?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let identity: i64 = row.get(0)?;
            let entity: String = row.get(1)?;
            vocabulary.insert(entity, identity);
        }
        drop(rows);
        drop(statement);
        self.vocabulary = vocabulary;
        Ok(())
    }
}

fn classify(location: &str, e: rusqlite::Error) -> CudsError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &e {
        match failure.code {
            ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt => {
                return CudsError::corrupt(location, e.to_string());
            }
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return CudsError::BackendBusy(location.to_string());
            }
            _ => (),
        }
    }
    CudsError::from(e)
}

fn identity(uid: Uid) -> Result<i64> {
    i64::try_from(uid.value()).map_err(|e| CudsError::Persistence(e.to_string()))
}

fn uid(location: &str, identity: i64) -> Result<Uid> {
    u64::try_from(identity)
        .map(Uid::new)
        .map_err(|_| CudsError::corrupt(location, format!("negative identity {}", identity)))
}

// Looks up an entity, adding it to the Entity table when it has not been seen.
// New entries are collected in `fresh` and only cached once the transaction commits.
fn entity(
    tx: &Transaction,
    vocabulary: &BiMap<String, i64>,
    fresh: &mut Vec<(String, i64)>,
    name: &str,
) -> Result<i64> {
    if let Some(identity) = vocabulary.get_by_left(name) {
        return Ok(*identity);
    }
    if let Some((_, identity)) = fresh.iter().find(|(n, _)| n == name) {
        return Ok(*identity);
    }
    let existing: Option<i64> = tx
        .query_row("select Entity_Identity from Entity where Entity = ?", params![name], |r| r.get(0))
        .optional()?;
    let identity = match existing {
        Some(identity) => identity,
        None => {
            tx.execute("insert into Entity (Entity) values (?)", params![name])?;
            tx.last_insert_rowid()
        }
    };
    fresh.push((name.to_string(), identity));
    Ok(identity)
}

impl Wrapper for SqliteWrapper {
    fn open(location: impl AsRef<Path>, create: bool) -> Result<Self> {
        let path = location.as_ref();
        let shown = path.display().to_string();
        if !path.exists() && !create {
            return Err(CudsError::StoreNotFound(shown));
        }
        let lock = LocationLock::acquire(path)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let connection = Connection::open_with_flags(path, flags).map_err(|e| classify(&shown, e))?;
        debug!(location = %shown, create, "opening sqlite store");
        Self::with_connection(connection, shown, Some(lock), create)
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn load(&mut self, ontology: &Ontology) -> Result<Snapshot> {
        self.restore_vocabulary().map_err(|e| match e {
            CudsError::Persistence(message) => CudsError::corrupt(self.location.clone(), message),
            other => other,
        })?;
        let location = self.location.clone();
        let restorer = Restorer::new(ontology, &location);
        let vocabulary = self.vocabulary.clone();
        let name_of = |identity: i64| -> Result<&str> {
            vocabulary
                .get_by_right(&identity)
                .map(String::as_str)
                .ok_or_else(|| restorer.corrupt(format!("unknown entity {}", identity)))
        };
        let connection = self.connection()?;
        let mut snapshot = Snapshot::default();

        let high_water_mark: Option<String> = connection
            .query_row("select Value from Store where Property = 'HighWaterMark'", [], |r| r.get(0))
            .optional()
            .map_err(|e| classify(&location, e))?;
        snapshot.high_water_mark = high_water_mark
            .as_deref()
            .unwrap_or("0")
            .parse()
            .map_err(|_| restorer.corrupt("unreadable high-water mark"))?;

        let mut classes: HashMap<i64, Vec<i64>, UidHasher> = HashMap::default();
        {
            let mut statement = connection
                .prepare("select Individual_Identity from Individual")
                .map_err(|e| classify(&location, e))?;
            let mut rows = statement.query([])?;
            while let Some(row) = rows.next()? {
                classes.insert(row.get(0)?, Vec::new());
            }
        }
        {
            let mut statement = connection
                .prepare(
                    "
                select Individual_Identity, Class_Identity
                    from Classification
                    order by Individual_Identity, Position
            ",
                )
                .map_err(|e| classify(&location, e))?;
            let mut rows = statement.query([])?;
            while let Some(row) = rows.next()? {
                let individual: i64 = row.get(0)?;
                let class: i64 = row.get(1)?;
                classes
                    .get_mut(&individual)
                    .ok_or_else(|| restorer.corrupt(format!("classification of missing individual {}", individual)))?
                    .push(class);
            }
        }
        for (individual, class_identities) in classes {
            if class_identities.is_empty() {
                return Err(restorer.corrupt(format!("individual {} has no class", individual)));
            }
            let mut resolved = Vec::new();
            for class in class_identities {
                resolved.push(restorer.class(name_of(class)?)?);
            }
            snapshot
                .individuals
                .push(Individual::new(uid(&location, individual)?, resolved));
        }

        let mut statement = connection
            .prepare(
                "
            select t.Subject_Identity,
                    t.Predicate_Identity,
                    t.Object_Identity,
                    t.Value,
                    v.DataType as ValueType,
                    t.Sequence
                from Triple t
                left join DataType v
                on v.DataType_Identity = t.ValueType_Identity
        ",
            )
            .map_err(|e| classify(&location, e))?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let subject = uid(&location, row.get(0)?)?;
            let predicate = name_of(row.get(1)?)?;
            let object_identity: Option<i64> = row.get(2)?;
            let value_type: Option<String> = row.get(4)?;
            let object = match (object_identity, value_type) {
                (Some(object), None) => Object::Individual(uid(&location, object)?),
                (None, Some(value_type)) => {
                    let datatype = restorer.datatype(&value_type)?;
                    let value = row.get_ref(3)?;
                    let literal = Literal::convert(datatype, &value).ok_or_else(|| {
                        restorer.corrupt(format!("unreadable {} value of {}", datatype, predicate))
                    })?;
                    Object::Literal(literal)
                }
                _ => return Err(restorer.corrupt(format!("triple of {} has no single object", subject))),
            };
            let sequence: Option<i64> = row.get(5)?;
            let sequence = sequence
                .map(u64::try_from)
                .transpose()
                .map_err(|_| restorer.corrupt("negative sequence"))?;
            snapshot.triples.push(SequencedTriple {
                triple: restorer.triple(subject, predicate, object)?,
                sequence,
            });
        }
        restorer.check(&snapshot)?;
        debug!(
            location = %location,
            individuals = snapshot.individuals.len(),
            triples = snapshot.triples.len(),
            "loaded sqlite store"
        );
        Ok(snapshot)
    }

    fn persist(&mut self, delta: &Delta) -> Result<()> {
        let location = self.location.clone();
        let SqliteWrapper { connection, vocabulary, .. } = self;
        let connection = connection
            .as_mut()
            .ok_or_else(|| CudsError::Persistence(format!("{} is closed", location)))?;
        let mut fresh = Vec::new();
        let tx = connection.transaction().map_err(|e| classify(&location, e))?;
        for removed in &delta.removed_triples {
            tx.execute(
                "delete from Triple where Triple_Key = ?",
                params![removed.triple.key()],
            )?;
        }
        for removed in &delta.removed_individuals {
            tx.execute(
                "delete from Classification where Individual_Identity = ?",
                params![identity(*removed)?],
            )?;
            tx.execute(
                "delete from Individual where Individual_Identity = ?",
                params![identity(*removed)?],
            )?;
        }
        for added in &delta.added_individuals {
            let individual = identity(added.uid())?;
            tx.execute(
                "insert into Individual (Individual_Identity) values (?)",
                params![individual],
            )?;
            for (position, class) in added.classes().iter().enumerate() {
                let class = entity(&tx, vocabulary, &mut fresh, class.name())?;
                tx.execute(
                    "
                insert into Classification (
                    Individual_Identity,
                    Class_Identity,
                    Position
                ) values (?, ?, ?)
            ",
                    params![individual, class, position as i64],
                )?;
            }
        }
        for added in &delta.added_triples {
            let triple = &added.triple;
            let predicate = entity(&tx, vocabulary, &mut fresh, triple.predicate().name())?;
            let sequence = added.sequence.map(|s| s as i64);
            match triple.object() {
                Object::Individual(object) => tx.execute(
                    "
                insert into Triple (
                    Triple_Key,
                    Subject_Identity,
                    Predicate_Identity,
                    Object_Identity,
                    Value,
                    ValueType_Identity,
                    Sequence
                ) values (?, ?, ?, ?, null, null, ?)
            ",
                    params![triple.key(), identity(triple.subject())?, predicate, identity(*object)?, sequence],
                )?,
                Object::Literal(literal) => tx.execute(
                    "
                insert into Triple (
                    Triple_Key,
                    Subject_Identity,
                    Predicate_Identity,
                    Object_Identity,
                    Value,
                    ValueType_Identity,
                    Sequence
                ) values (?, ?, ?, null, ?, ?, ?)
            ",
                    params![
                        triple.key(),
                        identity(triple.subject())?,
                        predicate,
                        literal,
                        literal.datatype().uid(),
                        sequence
                    ],
                )?,
            };
        }
        tx.execute(
            "update Store set Value = ? where Property = 'HighWaterMark'",
            params![delta.high_water_mark.to_string()],
        )?;
        tx.commit().map_err(|e| classify(&location, e))?;
        for (name, identity) in fresh {
            vocabulary.insert(name, identity);
        }
        debug!(
            location = %location,
            removed = delta.removed_triples.len() + delta.removed_individuals.len(),
            added = delta.added_triples.len() + delta.added_individuals.len(),
            "persisted delta"
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let location = self.location.clone();
        let connection = self.connection()?;
        let tx = connection.transaction().map_err(|e| classify(&location, e))?;
        tx.execute("delete from Triple", [])?;
        tx.execute("delete from Classification", [])?;
        tx.execute("delete from Individual", [])?;
        tx.commit()?;
        info!(location = %location, "cleared store");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection
                .close()
                .map_err(|(_, e)| CudsError::from(e))?;
            debug!(location = %self.location, "closed sqlite store");
        }
        self._lock = None;
        Ok(())
    }
}

impl Drop for SqliteWrapper {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
