//! The in-memory triple store.
//!
//! Triples are kept once, in a map from triple to its sequence index, and
//! shared through `Arc` with lookups by subject, by individual object and by
//! predicate name. Adding a triple twice is a no-op, as is removing a triple
//! that was never added: absence of a triple is information, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::construct::{Lookup, Object, OtherHasher, SequencedTriple, Triple, Uid, UidHasher};

#[derive(Debug, Default)]
pub struct TripleStore {
    kept: HashMap<Arc<Triple>, Option<u64>, OtherHasher>,
    subject_lookup: Lookup<Uid, Arc<Triple>, UidHasher>,
    object_lookup: Lookup<Uid, Arc<Triple>, UidHasher>,
    predicate_lookup: Lookup<String, Arc<Triple>, OtherHasher>,
    // next free position per (subject, ordered predicate), never rewound
    next_sequence: HashMap<(Uid, String), u64, OtherHasher>,
}

impl TripleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the triple unless it is already kept. Triples with an ordered
    /// predicate are appended after the current last one for the same subject.
    /// Returns what was added, or `None` if nothing changed.
    pub fn add(&mut self, triple: Triple) -> Option<SequencedTriple> {
        if self.kept.contains_key(&triple) {
            return None;
        }
        let sequence = if triple.predicate().ordered() {
            let next = self
                .next_sequence
                .entry((triple.subject(), triple.predicate().name().to_string()))
                .or_insert(0);
            let sequence = *next;
            *next += 1;
            Some(sequence)
        } else {
            None
        };
        self.keep(Arc::new(triple.clone()), sequence);
        Some(SequencedTriple { triple, sequence })
    }

    /// Adds a triple at a known position, as when restoring from a backend.
    pub fn restore(&mut self, sequenced: SequencedTriple) -> bool {
        let SequencedTriple { triple, sequence } = sequenced;
        if self.kept.contains_key(&triple) {
            return false;
        }
        if let Some(sequence) = sequence {
            let next = self
                .next_sequence
                .entry((triple.subject(), triple.predicate().name().to_string()))
                .or_insert(0);
            if sequence >= *next {
                *next = sequence + 1;
            }
        }
        self.keep(Arc::new(triple), sequence);
        true
    }

    fn keep(&mut self, triple: Arc<Triple>, sequence: Option<u64>) {
        self.subject_lookup.insert(triple.subject(), Arc::clone(&triple));
        if let Some(object) = triple.object().individual() {
            self.object_lookup.insert(object, Arc::clone(&triple));
        }
        self.predicate_lookup
            .insert(triple.predicate().name().to_string(), Arc::clone(&triple));
        self.kept.insert(triple, sequence);
    }

    /// Removes the triple if it is kept. Returns what was removed.
    pub fn remove(&mut self, triple: &Triple) -> Option<SequencedTriple> {
        let (kept, sequence) = self.kept.remove_entry(triple)?;
        self.subject_lookup.remove(&kept.subject(), &kept);
        if let Some(object) = kept.object().individual() {
            self.object_lookup.remove(&object, &kept);
        }
        self.predicate_lookup
            .remove(&kept.predicate().name().to_string(), &kept);
        Some(SequencedTriple { triple: Triple::clone(&kept), sequence })
    }

    /// Removes every triple in which the individual is subject or object.
    pub fn remove_involving(&mut self, uid: Uid) -> Vec<SequencedTriple> {
        let involved: Vec<Triple> = self
            .subject_lookup
            .lookup(&uid)
            .chain(self.object_lookup.lookup(&uid))
            .map(|t| Triple::clone(t))
            .collect();
        let mut removed = Vec::new();
        for triple in involved {
            // self-referencing triples show up in both lookups
            if let Some(sequenced) = self.remove(&triple) {
                removed.push(sequenced);
            }
        }
        self.next_sequence.retain(|(subject, _), _| *subject != uid);
        removed
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.kept.contains_key(triple)
    }

    pub fn sequence_of(&self, triple: &Triple) -> Option<u64> {
        self.kept.get(triple).copied().flatten()
    }

    /// All triples matching the pattern, where `None` is a wildcard.
    pub fn query<'s, 'p>(
        &'s self,
        subject: Option<Uid>,
        predicate: Option<&'p str>,
        object: Option<&'p Object>,
    ) -> Box<dyn Iterator<Item = &'s Triple> + 'p>
    where
        's: 'p,
    {
        let candidates: Box<dyn Iterator<Item = &'s Arc<Triple>> + 'p> =
            match (subject, object.and_then(|o| o.individual()), predicate) {
                (Some(subject), _, _) => Box::new(self.subject_lookup.lookup(&subject)),
                (None, Some(object), _) => Box::new(self.object_lookup.lookup(&object)),
                (None, None, Some(predicate)) => {
                    Box::new(self.predicate_lookup.lookup(&predicate.to_string()))
                }
                (None, None, None) => Box::new(self.kept.keys()),
            };
        Box::new(
            candidates
                .filter(move |t| subject.is_none_or(|s| t.subject() == s))
                .filter(move |t| predicate.is_none_or(|p| t.predicate().name() == p))
                .filter(move |t| object.is_none_or(|o| t.object() == o))
                .map(|t| &**t),
        )
    }

    /// The triples sharing subject and predicate, in sequence order when the
    /// predicate is ordered and in no particular order otherwise.
    pub fn sequence(&self, subject: Uid, predicate: &str) -> Vec<&Triple> {
        let mut triples: Vec<(&Triple, Option<u64>)> = self
            .query(Some(subject), Some(predicate), None)
            .map(|t| (t, self.sequence_of(t)))
            .collect();
        triples.sort_by_key(|(_, sequence)| *sequence);
        triples.into_iter().map(|(t, _)| t).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = SequencedTriple> + '_ {
        self.kept.iter().map(|(triple, sequence)| SequencedTriple {
            triple: Triple::clone(triple),
            sequence: *sequence,
        })
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn clear(&mut self) {
        self.kept.clear();
        self.subject_lookup.clear();
        self.object_lookup.clear();
        self.predicate_lookup.clear();
        self.next_sequence.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use crate::ontology::Ontology;

    fn ontology() -> Ontology {
        Ontology::builder()
            .relation("boe.Has")
            .ordered_relation("boe.hasMonomer")
            .attribute("boe.name", Datatype::String)
            .build()
            .expect("ontology")
    }

    fn has(ontology: &Ontology, s: u64, o: u64) -> Triple {
        Triple::new(
            Uid::new(s),
            ontology.predicate("boe.Has").unwrap(),
            Object::Individual(Uid::new(o)),
        )
    }

    #[test]
    fn adding_twice_keeps_one() {
        let ontology = ontology();
        let mut store = TripleStore::new();
        assert!(store.add(has(&ontology, 1, 2)).is_some());
        assert!(store.add(has(&ontology, 1, 2)).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn removing_a_stranger_changes_nothing() {
        let ontology = ontology();
        let mut store = TripleStore::new();
        store.add(has(&ontology, 1, 2));
        assert!(store.remove(&has(&ontology, 2, 1)).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn wildcards_match_everything() {
        let ontology = ontology();
        let mut store = TripleStore::new();
        store.add(has(&ontology, 1, 2));
        store.add(has(&ontology, 1, 3));
        store.add(has(&ontology, 4, 3));
        let name = Triple::new(
            Uid::new(1),
            ontology.predicate("boe.name").unwrap(),
            Object::from("water"),
        );
        store.add(name);
        assert_eq!(store.query(None, None, None).count(), 4);
        assert_eq!(store.query(Some(Uid::new(1)), None, None).count(), 3);
        assert_eq!(store.query(Some(Uid::new(1)), Some("boe.Has"), None).count(), 2);
        let three = Object::Individual(Uid::new(3));
        assert_eq!(store.query(None, None, Some(&three)).count(), 2);
        assert_eq!(store.query(None, Some("boe.name"), None).count(), 1);
        assert_eq!(store.query(Some(Uid::new(9)), None, None).count(), 0);
        assert_eq!(store.query(None, Some("boe.unknown"), None).count(), 0);
    }

    #[test]
    fn cascade_removes_both_directions() {
        let ontology = ontology();
        let mut store = TripleStore::new();
        store.add(has(&ontology, 1, 2));
        store.add(has(&ontology, 2, 3));
        store.add(has(&ontology, 2, 2));
        store.add(has(&ontology, 4, 5));
        assert_eq!(store.remove_involving(Uid::new(2)).len(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ordered_predicates_append() {
        let ontology = ontology();
        let mut store = TripleStore::new();
        let monomer = |o: u64| {
            Triple::new(
                Uid::new(1),
                ontology.predicate("boe.hasMonomer").unwrap(),
                Object::Individual(Uid::new(o)),
            )
        };
        for o in [30, 10, 20] {
            store.add(monomer(o));
        }
        store.remove(&monomer(10));
        store.add(monomer(10));
        let order: Vec<Uid> = store
            .sequence(Uid::new(1), "boe.hasMonomer")
            .iter()
            .filter_map(|t| t.object().individual())
            .collect();
        assert_eq!(order, vec![Uid::new(30), Uid::new(20), Uid::new(10)]);
        assert_eq!(store.sequence_of(&monomer(10)), Some(3));
    }
}
