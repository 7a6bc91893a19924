//! This crate applies OpenStreetMap change files (osmChange XML)
//! incrementally to an RDF triple store holding an osm2rdf-materialised
//! snapshot of the planet.
//!
//! For each change file the engine deletes the triples of modified and
//! removed elements, inserts triples for created and modified elements, and
//! recomputes the geometry triples of every surviving way and relation
//! whose geometry transitively depends on something that changed.
//!
//! # Modules
//!
//! * `engine` - The linear pipeline driving one change application run.
//! * `readers` - Streaming osmChange classification.
//! * `resolver` - Dependency closure over node→way→relation references.
//! * `fetcher` - Rebuilds stand-in objects from the triple store.
//! * `convert` - osm2rdf invocation and Turtle output filtering.
//! * `update` - Batched DELETE/INSERT dispatch.
//! * `sparql` - Query builders and the endpoint client.
//! * `replication` - OSM replication server access.
//!
//! # Example
//!
//! ```no_run
//! use osm_delta::config::Config;
//! use osm_delta::engine::ChangeEngine;
//!
//! let config = Config {
//!     sparql_endpoint_uri: "http://localhost:7001".to_string(),
//!     ..Default::default()
//! };
//! let engine = ChangeEngine::new(config).unwrap();
//! let report = engine.apply_change_file("diffs/6247531.osc.gz".as_ref()).unwrap();
//! println!("inserted {} triples", report.inserted_triples);
//! ```

pub mod config;
pub mod convert;
pub mod engine;
pub mod errors;
pub mod fetcher;
pub mod models;
pub mod readers;
pub mod replication;
pub mod resolver;
pub mod sets;
pub mod sparql;
pub mod update;
pub mod vocab;
pub mod writers;
