use std::sync::Arc;

use cuds::construct::Object;
use cuds::datatype::{Datatype, Literal};
use cuds::ontology::Ontology;
use cuds::{CudsError, Session};

fn ontology() -> Arc<Ontology> {
    Arc::new(
        Ontology::builder()
            .class("boe.Atom", &[])
            .class("boe.Molecule", &[])
            .attribute("boe.element", Datatype::String)
            .relation("boe.Has")
            .relation("boe.isBondedTo")
            .build()
            .expect("ontology"),
    )
}

#[test]
fn deleting_an_individual_removes_its_triples() {
    let mut session = Session::new(ontology());
    let molecule = session.create("boe.Molecule", &[]).unwrap();
    let oxygen = session
        .create("boe.Atom", &[("boe.element", Literal::from("O"))])
        .unwrap();
    let hydrogen = session
        .create("boe.Atom", &[("boe.element", Literal::from("H"))])
        .unwrap();
    session.add_triple(molecule, "boe.Has", oxygen).unwrap();
    session.add_triple(molecule, "boe.Has", hydrogen).unwrap();
    session.add_triple(hydrogen, "boe.isBondedTo", oxygen).unwrap();
    session.add_triple(oxygen, "boe.isBondedTo", oxygen).unwrap();

    assert!(session.remove_individual(oxygen));

    let gone = Object::Individual(oxygen);
    assert_eq!(session.triples(Some(oxygen), None, None).count(), 0);
    assert_eq!(session.triples(None, None, Some(&gone)).count(), 0);
    assert_eq!(session.objects(molecule, "boe.Has"), vec![hydrogen]);
    assert_eq!(session.triple_count(), 2);
    assert!(!session.contains(oxygen));
    assert!(matches!(session.get(oxygen), Err(CudsError::NotFound(_))));
}

#[test]
fn cascade_is_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cascade.db");
    let ontology = ontology();
    let (molecule, oxygen) = {
        let mut session = Session::sqlite(Arc::clone(&ontology), &path, true).expect("open");
        let molecule = session.create("boe.Molecule", &[]).unwrap();
        let oxygen = session.create("boe.Atom", &[]).unwrap();
        session.add_triple(molecule, "boe.Has", oxygen).unwrap();
        session.commit().expect("commit");
        session.remove_individual(oxygen);
        let report = session.commit().expect("commit");
        assert_eq!(report.individuals_removed, 1);
        assert_eq!(report.triples_removed, 1);
        (molecule, oxygen)
    };
    let session = Session::sqlite(ontology, &path, false).expect("reopen");
    assert!(!session.contains(oxygen));
    assert!(session.objects(molecule, "boe.Has").is_empty());
}

#[test]
fn removals_of_absent_things_are_no_ops() {
    let mut session = Session::new(ontology());
    let atom = session.create("boe.Atom", &[]).unwrap();
    session.commit().unwrap();
    assert!(!session.remove_triple(atom, "boe.Has", atom));
    assert!(!session.remove_triple(atom, "boe.unknown", "x"));
    assert!(!session.remove_individual(cuds::construct::Uid::new(1000)));
    assert!(!session.is_dirty());
}
