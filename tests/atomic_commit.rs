use std::path::Path;
use std::sync::Arc;

use cuds::commit::CommitState;
use cuds::datatype::{Datatype, Literal};
use cuds::ontology::Ontology;
use cuds::{CudsError, Session};
use rusqlite::Connection;

fn ontology() -> Arc<Ontology> {
    Arc::new(
        Ontology::builder()
            .class("boe.Atom", &[])
            .class("boe.Molecule", &[])
            .attribute("boe.name", Datatype::String)
            .relation("boe.Has")
            .build()
            .expect("ontology"),
    )
}

// makes every insert of the value 'poison' fail halfway through a commit
fn install_poison_trigger(path: &Path) {
    let connection = Connection::open(path).expect("connection");
    connection
        .execute_batch(
            "
        create trigger poison before insert on Triple
        when NEW.Value = 'poison'
        begin
            select raise(abort, 'simulated failure');
        end;
        ",
        )
        .expect("trigger");
}

#[test]
fn failed_commit_leaves_store_and_log_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("atomic.db");
    let ontology = ontology();
    let water = {
        let mut session = Session::sqlite(Arc::clone(&ontology), &path, true).expect("open");
        let water = session
            .create("boe.Molecule", &[("boe.name", Literal::from("water"))])
            .unwrap();
        session.commit().expect("commit");
        water
    };
    install_poison_trigger(&path);

    {
        let mut session = Session::sqlite(Arc::clone(&ontology), &path, false).expect("reopen");
        let oxygen = session.create("boe.Atom", &[]).unwrap();
        session.add_triple(water, "boe.Has", oxygen).unwrap();
        let poisoned = session
            .create("boe.Atom", &[("boe.name", Literal::from("poison"))])
            .unwrap();
        let pending = session.pending();

        let err = session.commit().unwrap_err();
        assert!(matches!(err, CudsError::CommitFailed { .. }));
        assert_eq!(session.state(), CommitState::Failed);
        assert!(session.is_dirty());
        assert_eq!(session.pending().added_triples.len(), pending.added_triples.len());
        assert_eq!(session.pending().added_individuals, pending.added_individuals);

        // nothing of the delta reached the store
        let check = Connection::open(&path).expect("connection");
        let individuals: i64 = check
            .query_row("select count(*) from Individual", [], |r| r.get(0))
            .unwrap();
        assert_eq!(individuals, 1);

        // the commit can be retried once the offending triple is gone
        assert!(session.remove_triple(poisoned, "boe.name", "poison"));
        let report = session.commit().expect("retry");
        assert_eq!(report.individuals_added, 2);
        assert_eq!(report.triples_added, 1);
        assert_eq!(session.state(), CommitState::Clean);
    }

    let session = Session::sqlite(ontology, &path, false).expect("reopen");
    assert_eq!(session.individuals().count(), 3);
    assert_eq!(session.objects(water, "boe.Has").len(), 1);
    assert_eq!(session.attribute(water, "boe.name"), Some(&Literal::from("water")));
}

#[test]
fn failed_commit_on_reopen_shows_previous_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("previous.db");
    let ontology = ontology();
    {
        let mut session = Session::sqlite(Arc::clone(&ontology), &path, true).expect("open");
        session.create("boe.Molecule", &[]).unwrap();
        session.commit().expect("commit");
    }
    install_poison_trigger(&path);
    {
        let mut session = Session::sqlite(Arc::clone(&ontology), &path, false).expect("reopen");
        session.create("boe.Atom", &[]).unwrap();
        session
            .create("boe.Atom", &[("boe.name", Literal::from("poison"))])
            .unwrap();
        assert!(session.commit().is_err());
        // dropped with the changes still pending
    }
    let session = Session::sqlite(ontology, &path, false).expect("reopen");
    assert_eq!(session.individuals().count(), 1);
    assert_eq!(session.query("boe.Atom").count(), 0);
    assert_eq!(session.triples(None, None, None).count(), 0);
}
