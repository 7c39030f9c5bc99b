use std::sync::Arc;

// other keepers use HashSet or HashMap
use core::hash::{BuildHasher, BuildHasherDefault};
use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use seahash::SeaHasher;

// used to print out readable forms of a construct
use std::fmt;

// our own stuff that we need
use crate::datatype::Literal;
use crate::ontology::{OntologyClass, Predicate};

// ------------- Uid -------------
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Uid(u64);

impl Uid {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
    pub fn value(&self) -> u64 {
        self.0
    }
}
impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type UidHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: u64 = 0;

/// Hands out identities for individuals.
///
/// Unlike a free list, released identities are never handed out again. The
/// high-water mark is what a wrapper persists, so that a reopened store keeps
/// counting from where it left off even when the last individuals were deleted.
#[derive(Debug)]
pub struct IdentityGenerator {
    lower_bound: u64,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self { lower_bound: GENESIS }
    }
    // The retain function is necessary when restoring an existing
    // persisted store, since identities found there must not be generated.
    pub fn retain(&mut self, uid: Uid) {
        if uid.0 > self.lower_bound {
            self.lower_bound = uid.0;
        }
    }
    pub fn generate(&mut self) -> Uid {
        self.lower_bound += 1;
        Uid(self.lower_bound)
    }
    pub fn high_water_mark(&self) -> u64 {
        self.lower_bound
    }
}
impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Individual -------------
#[derive(Debug, Clone)]
pub struct Individual {
    uid: Uid,
    classes: Vec<Arc<OntologyClass>>, // the first one is the primary class
}
impl Individual {
    pub fn new(uid: Uid, classes: Vec<Arc<OntologyClass>>) -> Self {
        Self { uid, classes }
    }
    pub fn uid(&self) -> Uid {
        self.uid
    }
    pub fn class(&self) -> &Arc<OntologyClass> {
        &self.classes[0]
    }
    pub fn classes(&self) -> &[Arc<OntologyClass>] {
        &self.classes
    }
    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name()).collect()
    }
}
impl PartialEq for Individual {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid && self.classes == other.classes
    }
}
impl Eq for Individual {}
impl Hash for Individual {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
        self.classes.hash(state);
    }
}
impl fmt::Display for Individual {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <{}>", self.uid, self.class_names().join(", "))
    }
}

// ------------- Object -------------
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum Object {
    Individual(Uid),
    Literal(Literal),
}
impl Object {
    pub fn individual(&self) -> Option<Uid> {
        match self {
            Object::Individual(uid) => Some(*uid),
            Object::Literal(_) => None,
        }
    }
    pub fn literal(&self) -> Option<&Literal> {
        match self {
            Object::Literal(literal) => Some(literal),
            Object::Individual(_) => None,
        }
    }
}
impl From<Uid> for Object {
    fn from(uid: Uid) -> Self {
        Object::Individual(uid)
    }
}
macro_rules! object_from_literal {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Object {
                fn from(value: $ty) -> Self {
                    Object::Literal(Literal::from(value))
                }
            }
        )+
    };
}
object_from_literal!(Literal, &str, String, i64, i32, f64, bool, Vec<f64>);
impl<const N: usize> From<[f64; N]> for Object {
    fn from(value: [f64; N]) -> Self {
        Object::Literal(Literal::from(value))
    }
}
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Object::Individual(uid) => write!(f, "{}", uid),
            Object::Literal(literal) => write!(f, "{}", literal),
        }
    }
}

// ------------- Triple -------------
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct Triple {
    subject: Uid,
    predicate: Predicate,
    object: Object,
}
impl Triple {
    pub fn new(subject: Uid, predicate: Predicate, object: Object) -> Self {
        Self { subject, predicate, object }
    }
    pub fn subject(&self) -> Uid {
        self.subject
    }
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
    pub fn object(&self) -> &Object {
        &self.object
    }
    /// Whether the individual appears as subject or object.
    pub fn involves(&self, uid: Uid) -> bool {
        self.subject == uid || self.object.individual() == Some(uid)
    }
    /// A stable text form, used to derive storage keys.
    pub fn canonical(&self) -> String {
        match &self.object {
            Object::Individual(uid) => {
                format!("{}|{}|i|{}", self.subject.0, self.predicate.name(), uid.0)
            }
            Object::Literal(literal) => format!(
                "{}|{}|l|{}|{}",
                self.subject.0,
                self.predicate.name(),
                literal.datatype().name(),
                literal.encode()
            ),
        }
    }
    /// Content hash of the canonical form.
    pub fn key(&self) -> String {
        blake3::hash(self.canonical().as_bytes()).to_hex().to_string()
    }
}
impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// A triple together with its position when the predicate is ordered.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct SequencedTriple {
    pub triple: Triple,
    pub sequence: Option<u64>,
}

// ------------- Lookups -------------
#[derive(Debug)]
pub struct Lookup<K, V, H = RandomState> {
    index: HashMap<K, HashSet<V, H>, H>,
}
impl<K: Eq + Hash, V: Eq + Hash, H: BuildHasher + Default> Lookup<K, V, H> {
    pub fn new() -> Self {
        Self {
            index: HashMap::<K, HashSet<V, H>, H>::default(),
        }
    }
    pub fn insert(&mut self, key: K, value: V) {
        self.index.entry(key).or_default().insert(value);
    }
    pub fn remove(&mut self, key: &K, value: &V) {
        if let Some(set) = self.index.get_mut(key) {
            set.remove(value);
            if set.is_empty() {
                self.index.remove(key);
            }
        }
    }
    /// Absent keys have no values, which is not an error.
    pub fn lookup<'a>(&'a self, key: &K) -> impl Iterator<Item = &'a V> + use<'a, K, V, H> {
        self.index.get(key).into_iter().flat_map(|set| set.iter())
    }
    pub fn count(&self, key: &K) -> usize {
        self.index.get(key).map_or(0, |set| set.len())
    }
    pub fn clear(&mut self) {
        self.index.clear();
    }
}
impl<K: Eq + Hash, V: Eq + Hash, H: BuildHasher + Default> Default for Lookup<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}
