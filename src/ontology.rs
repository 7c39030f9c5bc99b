//! The ontology model consumed by sessions.
//!
//! Parsing ontology sources is someone else's job; this module only holds
//! what the storage core needs to know about classes and properties:
//! * [`OntologyClass`] – a named class with its direct superclasses and the
//!   attributes it declares (optionally with a default value).
//! * [`Attribute`] – a data property with a [`Datatype`] range.
//! * [`Relation`] – an object property, optionally declared `ordered`.
//!
//! An [`Ontology`] is built with an [`OntologyBuilder`] or deserialized from
//! an [`OntologyDefinition`] (JSON), and is immutable afterwards. Classes and
//! properties are kept once and shared through `Arc`, so comparing two
//! handles is cheap.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::construct::OtherHasher;
use crate::datatype::{Datatype, Literal};
use crate::error::{CudsError, Result};

lazy_static! {
    // entity names are either plain or prefixed by a namespace, as in boe.Molecule
    static ref ENTITY_NAME: Regex =
        Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_\-]*\.)?[A-Za-z_][A-Za-z0-9_\-]*$").unwrap();
}

// ------------- Attribute -------------
#[derive(Debug, Eq)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
}
impl Attribute {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }
}
impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

// ------------- Relation -------------
#[derive(Debug, Eq)]
pub struct Relation {
    name: String,
    ordered: bool,
}
impl Relation {
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Ordered relations keep a sequence index per (subject, relation).
    pub fn ordered(&self) -> bool {
        self.ordered
    }
}
impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Hash for Relation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

// ------------- Class -------------
#[derive(Debug, Clone)]
pub struct ClassAttribute {
    pub attribute: Arc<Attribute>,
    pub default: Option<Literal>,
}

#[derive(Debug)]
pub struct OntologyClass {
    name: String,
    superclasses: Vec<String>,
    attributes: Vec<ClassAttribute>,
}
impl OntologyClass {
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Direct superclasses only, see [`Ontology::ancestors`] for the full chain.
    pub fn superclasses(&self) -> &[String] {
        &self.superclasses
    }
    /// Attributes declared directly on this class.
    pub fn attributes(&self) -> &[ClassAttribute] {
        &self.attributes
    }
}
impl PartialEq for OntologyClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for OntologyClass {}
impl Hash for OntologyClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
impl fmt::Display for OntologyClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Either kind of property, as found in the predicate position of a triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    Relation(Arc<Relation>),
    Attribute(Arc<Attribute>),
}
impl Predicate {
    pub fn name(&self) -> &str {
        match self {
            Predicate::Relation(r) => r.name(),
            Predicate::Attribute(a) => a.name(),
        }
    }
    pub fn ordered(&self) -> bool {
        matches!(self, Predicate::Relation(r) if r.ordered())
    }
}
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ------------- Definition -------------
/// Serializable form of an ontology, as produced by external tooling.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OntologyDefinition {
    #[serde(default)]
    pub classes: Vec<ClassDefinition>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    #[serde(default)]
    pub superclasses: Vec<String>,
    /// Attribute name to default value (as canonical text), `None` for no default.
    #[serde(default)]
    pub attributes: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    #[serde(default)]
    pub ordered: bool,
}

// ------------- Builder -------------
#[derive(Debug, Default)]
pub struct OntologyBuilder {
    classes: Vec<(String, Vec<String>)>,
    attributes: Vec<(String, Datatype)>,
    relations: Vec<(String, bool)>,
    class_attributes: Vec<(String, String, Option<Literal>)>,
}

impl OntologyBuilder {
    pub fn class(mut self, name: &str, superclasses: &[&str]) -> Self {
        self.classes.push((
            name.to_string(),
            superclasses.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }
    pub fn attribute(mut self, name: &str, datatype: Datatype) -> Self {
        self.attributes.push((name.to_string(), datatype));
        self
    }
    pub fn relation(mut self, name: &str) -> Self {
        self.relations.push((name.to_string(), false));
        self
    }
    pub fn ordered_relation(mut self, name: &str) -> Self {
        self.relations.push((name.to_string(), true));
        self
    }
    pub fn class_attribute(mut self, class: &str, attribute: &str, default: Option<Literal>) -> Self {
        self.class_attributes
            .push((class.to_string(), attribute.to_string(), default));
        self
    }

    pub fn build(self) -> Result<Ontology> {
        let mut attributes = HashMap::<String, Arc<Attribute>, OtherHasher>::default();
        let mut relations = HashMap::<String, Arc<Relation>, OtherHasher>::default();
        let mut names = HashSet::<String>::new();
        let mut reserve = |name: &str| -> Result<()> {
            if !ENTITY_NAME.is_match(name) {
                return Err(CudsError::Ontology(format!("Malformed entity name '{}'", name)));
            }
            if !names.insert(name.to_string()) {
                return Err(CudsError::Ontology(format!("Entity '{}' is declared twice", name)));
            }
            Ok(())
        };
        for (name, datatype) in self.attributes {
            reserve(&name)?;
            attributes.insert(name.clone(), Arc::new(Attribute { name, datatype }));
        }
        for (name, ordered) in self.relations {
            reserve(&name)?;
            relations.insert(name.clone(), Arc::new(Relation { name, ordered }));
        }
        for (name, _) in &self.classes {
            reserve(name)?;
        }

        let mut declared = HashMap::<String, Vec<ClassAttribute>, OtherHasher>::default();
        for (class, attribute, default) in self.class_attributes {
            if !self.classes.iter().any(|(name, _)| *name == class) {
                return Err(CudsError::UnknownClass(class));
            }
            let attribute = attributes
                .get(&attribute)
                .cloned()
                .ok_or(CudsError::UnknownPredicate(attribute))?;
            if let Some(literal) = &default {
                if !attribute.datatype().accepts(literal) {
                    return Err(CudsError::TypeMismatch {
                        predicate: attribute.name().to_string(),
                        expected: attribute.datatype().to_string(),
                        found: literal.datatype().to_string(),
                    });
                }
            }
            declared
                .entry(class)
                .or_default()
                .push(ClassAttribute { attribute, default });
        }

        let mut classes = HashMap::<String, Arc<OntologyClass>, OtherHasher>::default();
        for (name, superclasses) in self.classes {
            for superclass in &superclasses {
                if !names.contains(superclass) || attributes.contains_key(superclass) || relations.contains_key(superclass) {
                    return Err(CudsError::UnknownClass(superclass.clone()));
                }
            }
            let attributes = declared.remove(&name).unwrap_or_default();
            classes.insert(
                name.clone(),
                Arc::new(OntologyClass { name, superclasses, attributes }),
            );
        }

        let mut ancestors = HashMap::<String, Vec<Arc<OntologyClass>>, OtherHasher>::default();
        for name in classes.keys() {
            ancestors.insert(name.clone(), Ontology::chain(&classes, name)?);
        }
        Ok(Ontology { classes, attributes, relations, ancestors })
    }
}

// ------------- Ontology -------------
#[derive(Debug)]
pub struct Ontology {
    classes: HashMap<String, Arc<OntologyClass>, OtherHasher>,
    attributes: HashMap<String, Arc<Attribute>, OtherHasher>,
    relations: HashMap<String, Arc<Relation>, OtherHasher>,
    // supertype chains (including the class itself), nearest first
    ancestors: HashMap<String, Vec<Arc<OntologyClass>>, OtherHasher>,
}

impl Ontology {
    pub fn builder() -> OntologyBuilder {
        OntologyBuilder::default()
    }
    pub fn from_definition(definition: OntologyDefinition) -> Result<Self> {
        let mut builder = Ontology::builder();
        for attribute in &definition.attributes {
            builder = builder.attribute(&attribute.name, attribute.datatype);
        }
        for relation in &definition.relations {
            builder = if relation.ordered {
                builder.ordered_relation(&relation.name)
            } else {
                builder.relation(&relation.name)
            };
        }
        for class in &definition.classes {
            let superclasses: Vec<&str> = class.superclasses.iter().map(String::as_str).collect();
            builder = builder.class(&class.name, &superclasses);
            for (attribute, default) in &class.attributes {
                let default = match default {
                    Some(text) => {
                        let datatype = definition
                            .attributes
                            .iter()
                            .find(|a| a.name == *attribute)
                            .map(|a| a.datatype)
                            .ok_or_else(|| CudsError::UnknownPredicate(attribute.clone()))?;
                        Some(Literal::decode(datatype, text).ok_or_else(|| {
                            CudsError::Ontology(format!(
                                "Default '{}' of {} is not a valid {}",
                                text, attribute, datatype
                            ))
                        })?)
                    }
                    None => None,
                };
                builder = builder.class_attribute(&class.name, attribute, default);
            }
        }
        builder.build()
    }
    pub fn from_json(text: &str) -> Result<Self> {
        let definition: OntologyDefinition = serde_json::from_str(text)
            .map_err(|e| CudsError::Ontology(e.to_string()))?;
        Self::from_definition(definition)
    }
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    fn chain(
        classes: &HashMap<String, Arc<OntologyClass>, OtherHasher>,
        name: &str,
    ) -> Result<Vec<Arc<OntologyClass>>> {
        // breadth first, so nearer ancestors come before farther ones
        let mut chain: Vec<Arc<OntologyClass>> = Vec::new();
        let mut frontier = vec![name.to_string()];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for current in frontier {
                let class = classes
                    .get(&current)
                    .ok_or_else(|| CudsError::UnknownClass(current.clone()))?;
                if chain.iter().any(|c| c.name == current) {
                    continue;
                }
                chain.push(Arc::clone(class));
                for superclass in &class.superclasses {
                    if superclass == name {
                        return Err(CudsError::Ontology(format!("Class {} is its own superclass", name)));
                    }
                    next.push(superclass.clone());
                }
            }
            frontier = next;
        }
        Ok(chain)
    }

    pub fn class(&self, name: &str) -> Option<Arc<OntologyClass>> {
        self.classes.get(name).cloned()
    }
    pub fn attribute(&self, name: &str) -> Option<Arc<Attribute>> {
        self.attributes.get(name).cloned()
    }
    pub fn relation(&self, name: &str) -> Option<Arc<Relation>> {
        self.relations.get(name).cloned()
    }
    pub fn predicate(&self, name: &str) -> Option<Predicate> {
        self.relation(name)
            .map(Predicate::Relation)
            .or_else(|| self.attribute(name).map(Predicate::Attribute))
    }
    /// The class followed by all of its superclasses, nearest first.
    /// Unknown classes have no ancestors.
    pub fn ancestors(&self, class: &str) -> &[Arc<OntologyClass>] {
        self.ancestors.get(class).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn is_subclass_of(&self, class: &str, superclass: &str) -> bool {
        self.ancestors(class).iter().any(|c| c.name == superclass)
    }
    /// All classes that are (reflexively) subclasses of the given one.
    pub fn subclasses(&self, superclass: &str) -> Vec<Arc<OntologyClass>> {
        self.classes
            .values()
            .filter(|c| self.is_subclass_of(&c.name, superclass))
            .cloned()
            .collect()
    }
    /// Attributes declared on the class or inherited; the nearest declaration wins.
    pub fn declared_attributes(&self, class: &str) -> Vec<ClassAttribute> {
        let mut seen = HashSet::new();
        let mut declared = Vec::new();
        for ancestor in self.ancestors(class) {
            for class_attribute in &ancestor.attributes {
                if seen.insert(class_attribute.attribute.name().to_string()) {
                    declared.push(class_attribute.clone());
                }
            }
        }
        declared
    }
    pub fn classes(&self) -> impl Iterator<Item = &Arc<OntologyClass>> {
        self.classes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chemistry() -> Ontology {
        Ontology::builder()
            .class("boe.Matter", &[])
            .class("boe.Atom", &["boe.Matter"])
            .class("boe.HydrogenAtom", &["boe.Atom"])
            .class("boe.Molecule", &["boe.Matter"])
            .class("boe.WaterMolecule", &["boe.Molecule"])
            .attribute("boe.name", Datatype::String)
            .attribute("boe.charge", Datatype::Integer)
            .relation("boe.Has")
            .ordered_relation("boe.hasMonomer")
            .class_attribute("boe.Matter", "boe.name", Some(Literal::from("unnamed")))
            .class_attribute("boe.Atom", "boe.charge", Some(Literal::from(0)))
            .class_attribute("boe.HydrogenAtom", "boe.name", Some(Literal::from("H")))
            .build()
            .expect("ontology")
    }

    #[test]
    fn supertype_chain_is_nearest_first() {
        let ontology = chemistry();
        let chain: Vec<&str> = ontology
            .ancestors("boe.HydrogenAtom")
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(chain, vec!["boe.HydrogenAtom", "boe.Atom", "boe.Matter"]);
        assert!(ontology.is_subclass_of("boe.WaterMolecule", "boe.Matter"));
        assert!(!ontology.is_subclass_of("boe.Matter", "boe.Molecule"));
        assert!(ontology.ancestors("boe.Unicorn").is_empty());
        assert_eq!(ontology.subclasses("boe.Molecule").len(), 2);
    }

    #[test]
    fn nearest_default_wins() {
        let ontology = chemistry();
        let declared = ontology.declared_attributes("boe.HydrogenAtom");
        assert_eq!(declared.len(), 2);
        let name = declared
            .iter()
            .find(|a| a.attribute.name() == "boe.name")
            .unwrap();
        assert_eq!(name.default, Some(Literal::from("H")));
    }

    #[test]
    fn unknown_superclass_is_rejected() {
        let err = Ontology::builder()
            .class("boe.Atom", &["boe.Particle"])
            .build()
            .unwrap_err();
        assert!(matches!(err, CudsError::UnknownClass(name) if name == "boe.Particle"));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = Ontology::builder()
            .class("a.A", &["a.B"])
            .class("a.B", &["a.A"])
            .build()
            .unwrap_err();
        assert!(matches!(err, CudsError::Ontology(_)));
    }

    #[test]
    fn default_must_match_range() {
        let err = Ontology::builder()
            .class("boe.Atom", &[])
            .attribute("boe.charge", Datatype::Integer)
            .class_attribute("boe.Atom", "boe.charge", Some(Literal::from("neutral")))
            .build()
            .unwrap_err();
        assert!(matches!(err, CudsError::TypeMismatch { .. }));
    }

    #[test]
    fn definitions_deserialize_from_json() {
        let ontology = Ontology::from_json(
            r#"{
                "classes": [
                    {"name": "city.City", "attributes": [["city.name", "Freiburg"]]},
                    {"name": "city.Street"}
                ],
                "attributes": [
                    {"name": "city.name", "datatype": "String"},
                    {"name": "city.coordinates", "datatype": {"Vector": {"dimension": 2}}}
                ],
                "relations": [{"name": "city.hasPart", "ordered": true}]
            }"#,
        )
        .expect("ontology");
        assert!(ontology.class("city.Street").is_some());
        assert!(ontology.predicate("city.hasPart").unwrap().ordered());
        assert_eq!(
            ontology.attribute("city.coordinates").unwrap().datatype(),
            Datatype::Vector { dimension: Some(2) }
        );
        assert_eq!(
            ontology.declared_attributes("city.City")[0].default,
            Some(Literal::from("Freiburg"))
        );
    }
}
