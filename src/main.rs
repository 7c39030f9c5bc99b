use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use cuds::config::Settings;
use cuds::datatype::{Datatype, Literal};
use cuds::ontology::Ontology;
use cuds::{Result, Session};

// the ontology used when none is configured, enough for the water example
fn water_ontology() -> Result<Ontology> {
    Ontology::builder()
        .class("boe.Thing", &[])
        .class("boe.Atom", &["boe.Thing"])
        .class("boe.Molecule", &["boe.Thing"])
        .attribute("boe.name", Datatype::String)
        .attribute("boe.element", Datatype::String)
        .attribute("boe.position", Datatype::Vector { dimension: Some(3) })
        .relation("boe.Has")
        .relation("boe.isBondedTo")
        .class_attribute("boe.Thing", "boe.name", None)
        .class_attribute("boe.Atom", "boe.position", Some(Literal::from([0.0, 0.0, 0.0])))
        .build()
}

fn seed_water(session: &mut Session) -> Result<()> {
    let molecule = session.create("boe.Molecule", &[("boe.name", "water".into())])?;
    let oxygen = session.create("boe.Atom", &[("boe.element", "O".into())])?;
    for position in [[0.96, 0.0, 0.0], [-0.24, 0.93, 0.0]] {
        let hydrogen = session.create(
            "boe.Atom",
            &[("boe.element", "H".into()), ("boe.position", position.into())],
        )?;
        session.add_triple(molecule, "boe.Has", hydrogen)?;
        session.add_triple(hydrogen, "boe.isBondedTo", oxygen)?;
    }
    session.add_triple(molecule, "boe.Has", oxygen)?;
    let report = session.commit()?;
    info!(individuals = report.individuals_added, triples = report.triples_added, "seeded water molecule");
    Ok(())
}

fn main() -> Result<()> {
    let settings = Settings::load()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log));
    fmt().with_env_filter(filter).init();

    let ontology = Arc::new(match &settings.ontology {
        Some(path) => Ontology::from_path(path)?,
        None => water_ontology()?,
    });
    let mut session = Session::open(
        Arc::clone(&ontology),
        settings.store.backend,
        &settings.store.location,
        settings.store.create,
    )?;
    info!(location = session.location(), "store opened");

    if settings.seed_demo && session.individuals().next().is_none() {
        seed_water(&mut session)?;
    }

    let mut classes: Vec<_> = ontology.classes().collect();
    classes.sort_by(|a, b| a.name().cmp(b.name()));
    for class in classes {
        let individuals: Vec<_> = session
            .query(class.name())
            .filter(|i| i.class() == class)
            .collect();
        if individuals.is_empty() {
            continue;
        }
        println!("{} ({})", class.name(), individuals.len());
        for individual in individuals {
            let attributes: Vec<String> = session
                .attributes(individual.uid())
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            println!("  {} {}", individual.uid(), attributes.join(" "));
            for triple in session.triples(Some(individual.uid()), None, None) {
                if let Some(object) = triple.object().individual() {
                    println!("    {} {}", triple.predicate(), object);
                }
            }
        }
    }
    session.close()
}
