//! Keeps the individuals of a session and their classes.
//!
//! Class membership is indexed by a bitmap per class, so that asking for all
//! individuals of a class (including those of its subclasses) is a union of
//! bitmaps followed by lookups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use roaring::RoaringTreemap;

use crate::construct::{IdentityGenerator, Individual, Object, OtherHasher, Triple, Uid, UidHasher};
use crate::datatype::Literal;
use crate::error::{CudsError, Result};
use crate::ontology::{Ontology, OntologyClass, Predicate};

#[derive(Debug)]
pub struct IndividualRegistry {
    ontology: Arc<Ontology>,
    generator: IdentityGenerator,
    kept: HashMap<Uid, Individual, UidHasher>,
    class_lookup: HashMap<String, RoaringTreemap, OtherHasher>,
}

impl IndividualRegistry {
    pub fn new(ontology: Arc<Ontology>) -> Self {
        Self {
            ontology,
            generator: IdentityGenerator::new(),
            kept: HashMap::default(),
            class_lookup: HashMap::default(),
        }
    }
    pub fn ontology(&self) -> &Arc<Ontology> {
        &self.ontology
    }

    /// Resolves class names, rejecting unknown ones. Duplicates are dropped
    /// and the first class remains the primary one.
    pub fn resolve_classes(&self, classes: &[&str]) -> Result<Vec<Arc<OntologyClass>>> {
        if classes.is_empty() {
            return Err(CudsError::UnknownClass(String::from("<none>")));
        }
        let mut resolved: Vec<Arc<OntologyClass>> = Vec::new();
        for name in classes {
            let class = self
                .ontology
                .class(name)
                .ok_or_else(|| CudsError::UnknownClass(name.to_string()))?;
            if !resolved.contains(&class) {
                resolved.push(class);
            }
        }
        Ok(resolved)
    }

    /// Checks that a predicate exists and that the object fits it: relations
    /// point at individuals and attributes carry a literal of their range.
    /// Domain and range classes of relations are deliberately not checked.
    pub fn check_assertion(&self, predicate: &str, object: &Object) -> Result<Predicate> {
        let resolved = self
            .ontology
            .predicate(predicate)
            .ok_or_else(|| CudsError::UnknownPredicate(predicate.to_string()))?;
        match (&resolved, object) {
            (Predicate::Relation(_), Object::Individual(_)) => Ok(resolved),
            (Predicate::Relation(_), Object::Literal(literal)) => Err(CudsError::TypeMismatch {
                predicate: predicate.to_string(),
                expected: String::from("individual"),
                found: literal.datatype().to_string(),
            }),
            (Predicate::Attribute(attribute), Object::Literal(literal)) => {
                if attribute.datatype().accepts(literal) {
                    Ok(resolved)
                } else {
                    Err(CudsError::TypeMismatch {
                        predicate: predicate.to_string(),
                        expected: attribute.datatype().to_string(),
                        found: literal.datatype().to_string(),
                    })
                }
            }
            (Predicate::Attribute(attribute), Object::Individual(_)) => {
                Err(CudsError::TypeMismatch {
                    predicate: predicate.to_string(),
                    expected: attribute.datatype().to_string(),
                    found: String::from("individual"),
                })
            }
        }
    }

    /// Creates an individual of the given classes. Everything is validated
    /// before an identity is allocated. The returned triples are the initial
    /// attributes followed by the defaults declared for the classes.
    pub fn create(
        &mut self,
        classes: &[&str],
        attributes: &[(&str, Literal)],
    ) -> Result<(Individual, Vec<Triple>)> {
        let classes = self.resolve_classes(classes)?;
        let mut assigned = Vec::new();
        for (name, literal) in attributes {
            let object = Object::Literal(literal.clone());
            let predicate = self.check_assertion(name, &object)?;
            assigned.push((predicate, object));
        }

        let uid = self.generator.generate();
        let mut triples: Vec<Triple> = assigned
            .into_iter()
            .map(|(predicate, object)| Triple::new(uid, predicate, object))
            .collect();
        let mut supplied: HashSet<String> = triples
            .iter()
            .map(|t| t.predicate().name().to_string())
            .collect();
        for class in &classes {
            for declared in self.ontology.declared_attributes(class.name()) {
                if let Some(default) = declared.default {
                    if supplied.insert(declared.attribute.name().to_string()) {
                        triples.push(Triple::new(
                            uid,
                            Predicate::Attribute(declared.attribute),
                            Object::Literal(default),
                        ));
                    }
                }
            }
        }
        let individual = Individual::new(uid, classes);
        self.keep(individual.clone());
        Ok((individual, triples))
    }

    /// Keeps an individual with an already assigned identity.
    pub fn restore(&mut self, individual: Individual) {
        self.generator.retain(individual.uid());
        self.keep(individual);
    }

    fn keep(&mut self, individual: Individual) {
        for class in individual.classes() {
            self.class_lookup
                .entry(class.name().to_string())
                .or_default()
                .insert(individual.uid().value());
        }
        self.kept.insert(individual.uid(), individual);
    }

    pub fn get(&self, uid: Uid) -> Result<&Individual> {
        self.kept.get(&uid).ok_or(CudsError::NotFound(uid))
    }
    pub fn contains(&self, uid: Uid) -> bool {
        self.kept.contains_key(&uid)
    }

    /// Forgets the individual. Deleting an unknown identity returns `None`.
    pub fn delete(&mut self, uid: Uid) -> Option<Individual> {
        let individual = self.kept.remove(&uid)?;
        for class in individual.classes() {
            if let Some(bitmap) = self.class_lookup.get_mut(class.name()) {
                bitmap.remove(uid.value());
                if bitmap.is_empty() {
                    self.class_lookup.remove(class.name());
                }
            }
        }
        Some(individual)
    }

    /// Individuals of the class or any of its subclasses, in identity order.
    /// An unknown class simply has no individuals.
    pub fn query<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a Individual> + use<'a> {
        let mut matching = RoaringTreemap::new();
        for subclass in self.ontology.subclasses(class) {
            if let Some(bitmap) = self.class_lookup.get(subclass.name()) {
                matching |= bitmap;
            }
        }
        matching
            .into_iter()
            .filter_map(move |uid| self.kept.get(&Uid::new(uid)))
    }

    pub fn individuals(&self) -> impl Iterator<Item = &Individual> {
        self.kept.values()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    /// Forgets all individuals but keeps counting identities upwards.
    pub fn clear(&mut self) {
        self.kept.clear();
        self.class_lookup.clear();
    }
    pub fn high_water_mark(&self) -> u64 {
        self.generator.high_water_mark()
    }
    pub fn retain_high_water_mark(&mut self, mark: u64) {
        self.generator.retain(Uid::new(mark));
    }
}
