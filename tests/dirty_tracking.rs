use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use cuds::commit::{CommitState, Delta};
use cuds::datatype::{Datatype, Literal};
use cuds::error::Result;
use cuds::ontology::Ontology;
use cuds::wrapper::{Snapshot, Wrapper};
use cuds::{CudsError, Session};
use tracing_subscriber::fmt::MakeWriter;

// Records every delta it is asked to persist.
struct CountingWrapper {
    persisted: Arc<Mutex<Vec<Delta>>>,
    fail_next: bool,
}

impl Wrapper for CountingWrapper {
    fn open(_location: impl AsRef<Path>, _create: bool) -> Result<Self> {
        Ok(Self { persisted: Arc::default(), fail_next: false })
    }
    fn kind(&self) -> &'static str {
        "counting"
    }
    fn location(&self) -> &str {
        "memory"
    }
    fn load(&mut self, _ontology: &Ontology) -> Result<Snapshot> {
        Ok(Snapshot::default())
    }
    fn persist(&mut self, delta: &Delta) -> Result<()> {
        if self.fail_next {
            self.fail_next = false;
            return Err(CudsError::Persistence(String::from("disk full")));
        }
        self.persisted.lock().unwrap().push(delta.clone());
        Ok(())
    }
    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn ontology() -> Arc<Ontology> {
    Arc::new(
        Ontology::builder()
            .class("city.City", &[])
            .class("city.Citizen", &[])
            .attribute("city.name", Datatype::String)
            .relation("city.hasInhabitant")
            .build()
            .expect("ontology"),
    )
}

fn session(fail_first: bool) -> (Session, Arc<Mutex<Vec<Delta>>>) {
    let mut wrapper = CountingWrapper::open("memory", true).unwrap();
    wrapper.fail_next = fail_first;
    let persisted = Arc::clone(&wrapper.persisted);
    let session = Session::with_wrapper(ontology(), Box::new(wrapper)).expect("session");
    (session, persisted)
}

#[test]
fn second_commit_performs_no_write() {
    let (mut session, persisted) = session(false);
    let city = session
        .create("city.City", &[("city.name", Literal::from("Freiburg"))])
        .unwrap();
    let citizen = session.create("city.Citizen", &[]).unwrap();
    session.add_triple(city, "city.hasInhabitant", citizen).unwrap();
    assert_eq!(session.state(), CommitState::Dirty);

    let report = session.commit().unwrap();
    assert!(report.written);
    assert!(!session.is_dirty());
    assert_eq!(session.state(), CommitState::Clean);

    let report = session.commit().unwrap();
    assert!(!report.written);
    assert_eq!(persisted.lock().unwrap().len(), 1);
    assert_eq!(session.commits(), 1);
}

#[test]
fn delta_is_minimal() {
    let (mut session, persisted) = session(false);
    let city = session.create("city.City", &[]).unwrap();
    session.commit().unwrap();

    session.add_triple(city, "city.name", "Freiburg").unwrap();
    session.remove_triple(city, "city.name", "Freiburg");
    let ghost = session.create("city.Citizen", &[]).unwrap();
    session.remove_individual(ghost);
    assert!(!session.is_dirty());
    session.commit().unwrap();

    session.add_triple(city, "city.name", "Freiburg").unwrap();
    // idempotent assertion
    assert!(!session.add_triple(city, "city.name", "Freiburg").unwrap());
    session.commit().unwrap();

    let persisted = persisted.lock().unwrap();
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[1].added_triples.len(), 1);
    assert!(persisted[1].added_individuals.is_empty());
    assert!(persisted[1].removed_triples.is_empty());
    assert_eq!(persisted[1].high_water_mark, ghost.value());
}

#[test]
fn failed_commit_can_be_retried() {
    let (mut session, persisted) = session(true);
    session.create("city.City", &[]).unwrap();
    assert!(matches!(session.commit(), Err(CudsError::CommitFailed { .. })));
    assert_eq!(session.state(), CommitState::Failed);
    assert!(session.is_dirty());
    assert!(persisted.lock().unwrap().is_empty());

    let report = session.commit().expect("retry");
    assert_eq!(report.individuals_added, 1);
    assert_eq!(persisted.lock().unwrap().len(), 1);
    assert_eq!(session.state(), CommitState::Clean);
}

#[test]
fn closing_discards_pending_changes() {
    let (mut session, persisted) = session(false);
    session.create("city.City", &[]).unwrap();
    session.close().unwrap();
    session.close().unwrap();
    assert!(session.is_closed());
    assert!(matches!(session.commit(), Err(CudsError::SessionClosed)));
    assert!(persisted.lock().unwrap().is_empty());
}

#[test]
fn closed_session_refuses_changes() {
    let (mut session, _) = session(false);
    let city = session.create("city.City", &[]).unwrap();
    let citizen = session.create("city.Citizen", &[]).unwrap();
    session.commit().unwrap();
    session.close().unwrap();

    assert!(matches!(session.create("city.City", &[]), Err(CudsError::SessionClosed)));
    assert!(matches!(
        session.add_triple(city, "city.hasInhabitant", citizen),
        Err(CudsError::SessionClosed)
    ));
    assert!(matches!(
        session.set_attribute(city, "city.name", "Freiburg"),
        Err(CudsError::SessionClosed)
    ));
    assert!(!session.remove_individual(citizen));
    assert!(matches!(session.clear(), Err(CudsError::SessionClosed)));
    // still readable
    assert!(session.contains(citizen));
    assert!(!session.is_dirty());
}

// Collects formatted log output.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn logged(f: impl FnOnce()) -> String {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    captured.text()
}

#[test]
fn closing_a_dirty_session_warns() {
    let output = logged(|| {
        let (mut session, _) = session(false);
        session.create("city.City", &[]).unwrap();
        session.close().unwrap();
    });
    assert!(output.contains("closing session with uncommitted changes"), "{}", output);
    assert!(output.contains("individuals_added=1"), "{}", output);
    assert!(output.contains("triples_added=0"), "{}", output);
}

#[test]
fn dropping_a_dirty_session_warns() {
    let output = logged(|| {
        let (mut session, _) = session(false);
        session
            .create("city.City", &[("city.name", Literal::from("Freiburg"))])
            .unwrap();
        drop(session);
    });
    assert!(output.contains("closing session with uncommitted changes"), "{}", output);
    assert!(output.contains("individuals_added=1"), "{}", output);
    assert!(output.contains("triples_added=1"), "{}", output);
}

#[test]
fn closing_a_clean_session_is_quiet() {
    let output = logged(|| {
        let (mut session, _) = session(false);
        session.create("city.City", &[]).unwrap();
        session.commit().unwrap();
        session.close().unwrap();
    });
    assert!(!output.contains("uncommitted"), "{}", output);
}
