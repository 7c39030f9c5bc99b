//! cuds – ontology-typed individuals kept in sessions and persisted through wrappers.
//!
//! The storage core centers on *individuals* (CUDS objects): typed nodes whose
//! assertions are triples `(subject, predicate, object)` checked against an
//! ontology, where:
//! * An [`construct::Uid`] is a stable identity (a simple `u64`, never reused).
//! * An [`construct::Individual`] carries one or more [`ontology::OntologyClass`]es.
//! * A [`ontology::Predicate`] is either a relation (between individuals,
//!   optionally ordered) or an attribute (with a typed [`datatype::Literal`]).
//!
//! ## Modules
//! * [`ontology`] – Classes, attributes and relations, built in code or read from JSON.
//! * [`datatype`] – Attribute ranges and literal values.
//! * [`construct`] – Identities, individuals, triples and lookups.
//! * [`triples`] / [`registry`] – The in-memory graph and its individuals.
//! * [`session`] – The mutation and query surface, optionally bound to a wrapper.
//! * [`commit`] – The change log and the commit state machine.
//! * [`wrapper`] – Backends: SQLite and a checksummed JSON document.
//! * [`context`] – Scoped activation of sessions and the default session.
//! * [`interface`] – Blocking session work moved off an async runtime.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use cuds::{datatype::Datatype, ontology::Ontology, session::Session};
//! let ontology = Arc::new(
//!     Ontology::builder()
//!         .class("boe.Atom", &[])
//!         .class("boe.Molecule", &[])
//!         .relation("boe.Has")
//!         .attribute("boe.name", Datatype::String)
//!         .build()
//!         .unwrap(),
//! );
//! let mut session = Session::new(ontology);
//! let water = session.create("boe.Molecule", &[("boe.name", "water".into())]).unwrap();
//! let oxygen = session.create("boe.Atom", &[]).unwrap();
//! session.add_triple(water, "boe.Has", oxygen).unwrap();
//! assert_eq!(session.objects(water, "boe.Has"), vec![oxygen]);
//! ```

pub mod commit;
pub mod config;
pub mod construct;
pub mod context;
pub mod datatype;
pub mod error;
pub mod interface;
pub mod ontology;
pub mod registry;
pub mod session;
pub mod triples;
pub mod wrapper;

pub use context::{SessionGuard, SessionHandle};
pub use error::{CudsError, Result};
pub use session::Session;
