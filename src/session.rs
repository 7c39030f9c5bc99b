//! The session: the mutable working context of live individuals and triples.
//!
//! A session owns an [`IndividualRegistry`], a [`TripleStore`] and a
//! [`CommitEngine`], and is optionally bound to one [`Wrapper`] for its whole
//! lifetime. Every mutation goes through the session so that the change log
//! stays the exact difference to what the wrapper last persisted.
//!
//! Queries follow the open-world assumption: asking for something that is not
//! there yields nothing rather than an error. Creation and assertion, on the
//! other hand, are checked against the ontology right away.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::commit::{CommitEngine, CommitReport, CommitState, Delta};
use crate::construct::{Individual, Object, Triple, Uid};
use crate::datatype::Literal;
use crate::error::{CudsError, Result};
use crate::ontology::{Ontology, Predicate};
use crate::registry::IndividualRegistry;
use crate::triples::TripleStore;
use crate::wrapper::{open_store, Backend, SqliteWrapper, Wrapper};

pub struct Session {
    ontology: Arc<Ontology>,
    registry: IndividualRegistry,
    triples: TripleStore,
    engine: CommitEngine,
    wrapper: Option<Box<dyn Wrapper>>,
    closed: bool,
}

impl Session {
    /// An in-memory session, not bound to any backend.
    pub fn new(ontology: Arc<Ontology>) -> Self {
        Self {
            registry: IndividualRegistry::new(Arc::clone(&ontology)),
            ontology,
            triples: TripleStore::new(),
            engine: CommitEngine::new(),
            wrapper: None,
            closed: false,
        }
    }

    /// Binds the session to the wrapper and restores what it has persisted.
    pub fn with_wrapper(ontology: Arc<Ontology>, mut wrapper: Box<dyn Wrapper>) -> Result<Self> {
        let snapshot = wrapper.load(&ontology)?;
        let mut session = Self::new(ontology);
        session.registry.retain_high_water_mark(snapshot.high_water_mark);
        for individual in snapshot.individuals {
            session.registry.restore(individual);
        }
        for sequenced in snapshot.triples {
            session.triples.restore(sequenced);
        }
        debug!(
            backend = wrapper.kind(),
            location = wrapper.location(),
            individuals = session.registry.len(),
            triples = session.triples.len(),
            "session opened"
        );
        session.wrapper = Some(wrapper);
        Ok(session)
    }

    /// Opens a session on the store of the given kind at `location`.
    pub fn open(
        ontology: Arc<Ontology>,
        backend: Backend,
        location: impl AsRef<Path>,
        create: bool,
    ) -> Result<Self> {
        Self::with_wrapper(ontology, open_store(backend, location, create)?)
    }

    /// Shorthand for a session on a SQLite store.
    pub fn sqlite(ontology: Arc<Ontology>, location: impl AsRef<Path>, create: bool) -> Result<Self> {
        Self::with_wrapper(ontology, Box::new(SqliteWrapper::open(location, create)?))
    }

    pub fn ontology(&self) -> &Arc<Ontology> {
        &self.ontology
    }
    /// Location of the bound store, if any.
    pub fn location(&self) -> Option<&str> {
        self.wrapper.as_ref().map(|w| w.location())
    }

    // ------------- Individuals -------------
    pub fn create(&mut self, class: &str, attributes: &[(&str, Literal)]) -> Result<Uid> {
        self.create_with_classes(&[class], attributes)
    }

    /// Creates an individual of several classes, the first being the primary
    /// one. Declared defaults are asserted for attributes not given here.
    pub fn create_with_classes(&mut self, classes: &[&str], attributes: &[(&str, Literal)]) -> Result<Uid> {
        self.ensure_open()?;
        let (individual, triples) = self.registry.create(classes, attributes)?;
        let uid = individual.uid();
        let mut added = Vec::new();
        for triple in triples {
            added.extend(self.triples.add(triple));
        }
        self.engine.record(|log| {
            log.individual_added(individual);
            for sequenced in added {
                log.triple_added(sequenced);
            }
        });
        Ok(uid)
    }

    /// Deletes the individual together with every triple it takes part in,
    /// as subject or as object. Returns whether the individual existed.
    pub fn remove_individual(&mut self, uid: Uid) -> bool {
        if self.closed {
            return false;
        }
        let Some(individual) = self.registry.delete(uid) else {
            return false;
        };
        let removed = self.triples.remove_involving(uid);
        debug!(individual = %individual, triples = removed.len(), "removed individual");
        self.engine.record(|log| {
            for sequenced in removed {
                log.triple_removed(sequenced);
            }
            log.individual_removed(individual);
        });
        true
    }

    pub fn get(&self, uid: Uid) -> Result<&Individual> {
        self.registry.get(uid)
    }
    pub fn contains(&self, uid: Uid) -> bool {
        self.registry.contains(uid)
    }
    /// Individuals of the class and its subclasses.
    pub fn query<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a Individual> + use<'a> {
        self.registry.query(class)
    }
    pub fn individuals(&self) -> impl Iterator<Item = &Individual> {
        self.registry.individuals()
    }

    // ------------- Triples -------------
    fn assertion(&self, subject: Uid, predicate: &str, object: &Object) -> Result<Predicate> {
        self.ensure_open()?;
        self.registry.get(subject)?;
        if let Some(uid) = object.individual() {
            self.registry.get(uid)?;
        }
        self.registry.check_assertion(predicate, object)
    }

    /// Asserts a triple. Returns whether it was new.
    pub fn add_triple(&mut self, subject: Uid, predicate: &str, object: impl Into<Object>) -> Result<bool> {
        let object = object.into();
        let predicate = self.assertion(subject, predicate, &object)?;
        match self.triples.add(Triple::new(subject, predicate, object)) {
            Some(sequenced) => {
                self.engine.record(|log| log.triple_added(sequenced));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Retracts a triple. Returns whether it was there.
    pub fn remove_triple(&mut self, subject: Uid, predicate: &str, object: impl Into<Object>) -> bool {
        if self.closed {
            return false;
        }
        let Some(predicate) = self.ontology.predicate(predicate) else {
            return false;
        };
        match self.triples.remove(&Triple::new(subject, predicate, object.into())) {
            Some(sequenced) => {
                self.engine.record(|log| log.triple_removed(sequenced));
                true
            }
            None => false,
        }
    }

    /// Appends the objects to the relation of the subject, in the given order.
    /// Objects already related are left where they are.
    pub fn extend(&mut self, subject: Uid, relation: &str, objects: &[Uid]) -> Result<()> {
        for object in objects {
            self.assertion(subject, relation, &Object::Individual(*object))?;
        }
        for object in objects {
            self.add_triple(subject, relation, *object)?;
        }
        Ok(())
    }

    /// Replaces whatever values the attribute has with a single one.
    pub fn set_attribute(&mut self, subject: Uid, attribute: &str, value: impl Into<Literal>) -> Result<()> {
        let object = Object::Literal(value.into());
        self.assertion(subject, attribute, &object)?;
        let previous: Vec<Object> = self
            .triples
            .query(Some(subject), Some(attribute), None)
            .map(|t| t.object().clone())
            .filter(|o| *o != object)
            .collect();
        for stale in previous {
            self.remove_triple(subject, attribute, stale);
        }
        self.add_triple(subject, attribute, object)?;
        Ok(())
    }

    /// A value of the attribute, if the subject has one.
    pub fn attribute(&self, subject: Uid, attribute: &str) -> Option<&Literal> {
        self.triples
            .query(Some(subject), Some(attribute), None)
            .find_map(|t| t.object().literal())
    }

    /// All attribute values of the subject, sorted by attribute name.
    pub fn attributes(&self, subject: Uid) -> Vec<(&str, &Literal)> {
        let mut attributes: Vec<(&str, &Literal)> = self
            .triples
            .query(Some(subject), None, None)
            .filter_map(|t| t.object().literal().map(|l| (t.predicate().name(), l)))
            .collect();
        attributes.sort_by(|a, b| a.0.cmp(b.0));
        attributes
    }

    /// The individuals the subject is related to, in order for ordered relations.
    pub fn objects(&self, subject: Uid, relation: &str) -> Vec<Uid> {
        let mut objects: Vec<Uid> = self
            .triples
            .sequence(subject, relation)
            .into_iter()
            .filter_map(|t| t.object().individual())
            .collect();
        if !self.ontology.relation(relation).is_some_and(|r| r.ordered()) {
            objects.sort();
        }
        objects
    }

    /// Triples matching the pattern, where `None` matches anything.
    pub fn triples<'s, 'p>(
        &'s self,
        subject: Option<Uid>,
        predicate: Option<&'p str>,
        object: Option<&'p Object>,
    ) -> impl Iterator<Item = &'s Triple> + 'p
    where
        's: 'p,
    {
        self.triples.query(subject, predicate, object)
    }
    pub fn triple_count(&self) -> usize {
        self.triples.len()
    }

    // ------------- Lifecycle -------------
    pub fn state(&self) -> CommitState {
        self.engine.state()
    }
    pub fn is_dirty(&self) -> bool {
        !self.engine.log().is_empty()
    }
    /// What the next commit would write.
    pub fn pending(&self) -> Delta {
        self.engine.log().delta(self.registry.high_water_mark())
    }
    /// Number of successful commits in this session.
    pub fn commits(&self) -> u64 {
        self.engine.commits()
    }

    pub fn commit(&mut self) -> Result<CommitReport> {
        self.ensure_open()?;
        self.engine
            .commit(self.wrapper.as_deref_mut(), self.registry.high_water_mark())
    }

    /// Empties the session and the bound store. Identities keep counting up.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(wrapper) = self.wrapper.as_mut() {
            wrapper.clear()?;
        }
        self.registry.clear();
        self.triples.clear();
        self.engine.reset();
        debug!("session cleared");
        Ok(())
    }

    /// Releases the wrapper. Uncommitted changes are discarded with a warning.
    /// A closed session can still be read but refuses changes: fallible
    /// mutations fail with `SessionClosed`, removals report `false`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.is_dirty() {
            let delta = self.pending();
            warn!(
                individuals_added = delta.added_individuals.len(),
                individuals_removed = delta.removed_individuals.len(),
                triples_added = delta.added_triples.len(),
                triples_removed = delta.removed_triples.len(),
                "closing session with uncommitted changes"
            );
        }
        if let Some(wrapper) = self.wrapper.as_mut() {
            wrapper.close()?;
        }
        Ok(())
    }
    pub fn is_closed(&self) -> bool {
        self.closed
    }
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CudsError::SessionClosed);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;

    fn chemistry() -> Arc<Ontology> {
        Arc::new(
            Ontology::builder()
                .class("boe.Atom", &[])
                .class("boe.Molecule", &[])
                .attribute("boe.name", Datatype::String)
                .attribute("boe.charge", Datatype::Integer)
                .relation("boe.Has")
                .ordered_relation("boe.hasMonomer")
                .build()
                .expect("ontology"),
        )
    }

    #[test]
    fn assertions_need_known_individuals() {
        let mut session = Session::new(chemistry());
        let atom = session.create("boe.Atom", &[]).unwrap();
        let stranger = Uid::new(99);
        assert!(matches!(
            session.add_triple(atom, "boe.Has", stranger),
            Err(CudsError::NotFound(_))
        ));
        assert!(matches!(
            session.add_triple(stranger, "boe.Has", atom),
            Err(CudsError::NotFound(_))
        ));
        assert!(matches!(
            session.add_triple(atom, "boe.charge", "negative"),
            Err(CudsError::TypeMismatch { .. })
        ));
        assert!(!session.remove_triple(atom, "boe.unknown", stranger));
    }

    #[test]
    fn set_attribute_replaces() {
        let mut session = Session::new(chemistry());
        let atom = session
            .create("boe.Atom", &[("boe.name", Literal::from("O"))])
            .unwrap();
        session.add_triple(atom, "boe.name", "Oxygen").unwrap();
        session.set_attribute(atom, "boe.name", "H").unwrap();
        assert_eq!(session.attributes(atom), vec![("boe.name", &Literal::from("H"))]);
        assert_eq!(session.attribute(atom, "boe.charge"), None);
    }

    #[test]
    fn extend_keeps_the_order() {
        let mut session = Session::new(chemistry());
        let polymer = session.create("boe.Molecule", &[]).unwrap();
        let monomers: Vec<Uid> = (0..4)
            .map(|_| session.create("boe.Molecule", &[]).unwrap())
            .rev()
            .collect();
        session.extend(polymer, "boe.hasMonomer", &monomers).unwrap();
        assert_eq!(session.objects(polymer, "boe.hasMonomer"), monomers);
    }

    #[test]
    fn extend_checks_before_adding() {
        let mut session = Session::new(chemistry());
        let polymer = session.create("boe.Molecule", &[]).unwrap();
        let monomer = session.create("boe.Molecule", &[]).unwrap();
        assert!(session
            .extend(polymer, "boe.hasMonomer", &[monomer, Uid::new(42)])
            .is_err());
        assert!(session.objects(polymer, "boe.hasMonomer").is_empty());
    }

    #[test]
    fn create_then_remove_leaves_nothing_to_commit() {
        let mut session = Session::new(chemistry());
        let atom = session
            .create("boe.Atom", &[("boe.name", Literal::from("O"))])
            .unwrap();
        assert!(session.is_dirty());
        assert!(session.remove_individual(atom));
        assert!(!session.remove_individual(atom));
        assert!(!session.is_dirty());
        assert_eq!(session.state(), CommitState::Clean);
    }
}
