// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

// used for timestamps in the database
use chrono::{DateTime, Utc};
// used for decimal numbers
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

// used when parsing a stored text back into a literal
use std::str::FromStr;
// used to print out readable forms of a data type
use std::fmt;
// literals need to be hashable since triples live in sets
use std::hash::{Hash, Hasher};

/// The range of a data property (attribute) as declared by the ontology.
///
/// Every datatype has a stable `uid` and `name`, which is what the backends
/// store next to a value so that it can be converted back on restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    String,
    Integer,
    Float,
    Boolean,
    Decimal,
    DateTime,
    /// A vector of floats, optionally of a fixed dimension.
    Vector { dimension: Option<usize> },
}

impl Datatype {
    pub const ALL: [Datatype; 7] = [
        Datatype::String,
        Datatype::Integer,
        Datatype::Float,
        Datatype::Boolean,
        Datatype::Decimal,
        Datatype::DateTime,
        Datatype::Vector { dimension: None },
    ];
    pub fn uid(&self) -> u8 {
        match self {
            Datatype::String => 1,
            Datatype::Integer => 2,
            Datatype::Float => 3,
            Datatype::Boolean => 4,
            Datatype::Decimal => 5,
            Datatype::DateTime => 6,
            Datatype::Vector { .. } => 7,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            Datatype::String => "String",
            Datatype::Integer => "Integer",
            Datatype::Float => "Float",
            Datatype::Boolean => "Boolean",
            Datatype::Decimal => "Decimal",
            Datatype::DateTime => "DateTime",
            Datatype::Vector { .. } => "Vector",
        }
    }
    pub fn from_name(name: &str) -> Option<Datatype> {
        Self::ALL.iter().find(|d| d.name() == name).copied()
    }
    /// Whether a literal may be asserted for a property with this range.
    pub fn accepts(&self, literal: &Literal) -> bool {
        match (self, literal) {
            (Datatype::Vector { dimension: Some(n) }, Literal::Vector(v)) => v.len() == *n,
            (Datatype::Vector { dimension: None }, Literal::Vector(_)) => true,
            (expected, literal) => *expected == literal.datatype(),
        }
    }
}
impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Datatype::Vector { dimension: Some(n) } => write!(f, "Vector[{}]", n),
            other => write!(f, "{}", other.name()),
        }
    }
}

// ------------- Literal --------------
#[derive(Clone, Debug)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Decimal(BigDecimal),
    DateTime(DateTime<Utc>),
    Vector(Vec<f64>),
}

impl Literal {
    /// The datatype of this literal. Vectors report their actual dimension.
    pub fn datatype(&self) -> Datatype {
        match self {
            Literal::String(_) => Datatype::String,
            Literal::Integer(_) => Datatype::Integer,
            Literal::Float(_) => Datatype::Float,
            Literal::Boolean(_) => Datatype::Boolean,
            Literal::Decimal(_) => Datatype::Decimal,
            Literal::DateTime(_) => Datatype::DateTime,
            Literal::Vector(v) => Datatype::Vector { dimension: Some(v.len()) },
        }
    }
    /// Canonical text form, the inverse of [`Literal::decode`].
    pub fn encode(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Integer(i) => i.to_string(),
            Literal::Float(x) => x.to_string(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Decimal(d) => d.to_string(),
            Literal::DateTime(t) => t.to_rfc3339(),
            Literal::Vector(v) => {
                let components: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                format!("[{}]", components.join(","))
            }
        }
    }
    pub fn decode(datatype: Datatype, text: &str) -> Option<Literal> {
        match datatype {
            Datatype::String => Some(Literal::String(text.to_string())),
            Datatype::Integer => text.parse().ok().map(Literal::Integer),
            Datatype::Float => text.parse().ok().map(Literal::Float),
            Datatype::Boolean => text.parse().ok().map(Literal::Boolean),
            Datatype::Decimal => BigDecimal::from_str(text).ok().map(Literal::Decimal),
            Datatype::DateTime => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| Literal::DateTime(t.with_timezone(&Utc))),
            Datatype::Vector { .. } => {
                let inner = text.strip_prefix('[')?.strip_suffix(']')?.trim();
                if inner.is_empty() {
                    return Some(Literal::Vector(Vec::new()));
                }
                inner
                    .split(',')
                    .map(|x| x.trim().parse::<f64>().ok())
                    .collect::<Option<Vec<f64>>>()
                    .map(Literal::Vector)
            }
        }
    }
    /// Converts a value read from SQLite, given the stored datatype.
    pub fn convert(datatype: Datatype, value: &ValueRef) -> Option<Literal> {
        match (datatype, value) {
            (Datatype::Integer, ValueRef::Integer(i)) => Some(Literal::Integer(*i)),
            (Datatype::Float, ValueRef::Real(x)) => Some(Literal::Float(*x)),
            // SQLite may hand back integral reals as integers
            (Datatype::Float, ValueRef::Integer(i)) => Some(Literal::Float(*i as f64)),
            (Datatype::Boolean, ValueRef::Integer(i)) => Some(Literal::Boolean(*i != 0)),
            (datatype, ValueRef::Text(bytes)) => {
                Literal::decode(datatype, std::str::from_utf8(bytes).ok()?)
            }
            _ => None,
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::Integer(a), Literal::Integer(b)) => a == b,
            (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
            (Literal::Boolean(a), Literal::Boolean(b)) => a == b,
            (Literal::Decimal(a), Literal::Decimal(b)) => a == b,
            (Literal::DateTime(a), Literal::DateTime(b)) => a == b,
            (Literal::Vector(a), Literal::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            _ => false,
        }
    }
}
impl Eq for Literal {}
impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.datatype().uid().hash(state);
        match self {
            Literal::String(s) => s.hash(state),
            Literal::Integer(i) => i.hash(state),
            Literal::Float(x) => x.to_bits().hash(state),
            Literal::Boolean(b) => b.hash(state),
            Literal::Decimal(d) => d.hash(state),
            Literal::DateTime(t) => t.hash(state),
            Literal::Vector(v) => {
                for x in v {
                    x.to_bits().hash(state);
                }
            }
        }
    }
}
impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other.encode()),
        }
    }
}
impl ToSql for Literal {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Literal::String(s) => ToSqlOutput::from(s.as_str()),
            Literal::Integer(i) => ToSqlOutput::from(*i),
            // SQLite turns a bound NaN into null
            Literal::Float(x) if x.is_finite() => ToSqlOutput::from(*x),
            Literal::Boolean(b) => ToSqlOutput::from(*b),
            other => ToSqlOutput::from(other.encode()),
        })
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self { Literal::String(s.to_string()) }
}
impl From<String> for Literal {
    fn from(s: String) -> Self { Literal::String(s) }
}
impl From<i64> for Literal {
    fn from(i: i64) -> Self { Literal::Integer(i) }
}
impl From<i32> for Literal {
    fn from(i: i32) -> Self { Literal::Integer(i as i64) }
}
impl From<f64> for Literal {
    fn from(x: f64) -> Self { Literal::Float(x) }
}
impl From<bool> for Literal {
    fn from(b: bool) -> Self { Literal::Boolean(b) }
}
impl From<BigDecimal> for Literal {
    fn from(d: BigDecimal) -> Self { Literal::Decimal(d) }
}
impl From<DateTime<Utc>> for Literal {
    fn from(t: DateTime<Utc>) -> Self { Literal::DateTime(t) }
}
impl From<Vec<f64>> for Literal {
    fn from(v: Vec<f64>) -> Self { Literal::Vector(v) }
}
impl<const N: usize> From<[f64; N]> for Literal {
    fn from(v: [f64; N]) -> Self { Literal::Vector(v.to_vec()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_dimension_is_checked() {
        let range = Datatype::Vector { dimension: Some(3) };
        assert!(range.accepts(&Literal::from([0.96, 0.0, 0.0])));
        assert!(!range.accepts(&Literal::from([0.96, 0.0])));
        assert!(Datatype::Vector { dimension: None }.accepts(&Literal::from([1.0])));
        assert!(!Datatype::Float.accepts(&Literal::from(1)));
    }

    #[test]
    fn encoded_text_restores_the_same_literal() {
        let literals = [
            Literal::from(-0.96),
            Literal::from([0.1, -0.96, 1e-9]),
            Literal::from(BigDecimal::from_str("3.14159265358979323846").unwrap()),
            Literal::from(Utc::now()),
        ];
        for literal in literals {
            let text = literal.encode();
            assert_eq!(Literal::decode(literal.datatype(), &text), Some(literal));
        }
    }

    #[test]
    fn floats_compare_bitwise() {
        assert_eq!(Literal::from(0.5), Literal::from(0.5));
        assert_ne!(Literal::from(0.0), Literal::from(-0.0));
        assert_ne!(Literal::from(1.0), Literal::from(1));
    }

    #[test]
    fn names_resolve_back_to_datatypes() {
        for datatype in Datatype::ALL {
            assert_eq!(Datatype::from_name(datatype.name()), Some(datatype));
        }
        assert_eq!(Datatype::from_name("Quaternion"), None);
    }
}
