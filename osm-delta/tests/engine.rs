//! End-to-end pipeline tests with a scripted SPARQL client and a stand-in
//! converter binary.

use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use osm_delta::config::Config;
use osm_delta::engine::ChangeEngine;
use osm_delta::errors::Result as EngineResult;
use osm_delta::sparql::{Row, SparqlClient};

struct ScriptedClient {
    responses: VecDeque<Vec<Row>>,
    selects: Vec<String>,
    updates: Vec<String>,
    cache_clears: usize,
}

impl ScriptedClient {
    fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            selects: Vec::new(),
            updates: Vec::new(),
            cache_clears: 0,
        }
    }

    fn queue(&mut self, rows: Vec<Row>) {
        self.responses.push_back(rows);
    }
}

impl SparqlClient for ScriptedClient {
    fn select(&mut self, _prefixes: &str, query: &str) -> EngineResult<Vec<Row>> {
        self.selects.push(query.to_string());
        Ok(self.responses.pop_front().unwrap_or_default())
    }

    fn update(&mut self, _prefixes: &str, query: &str) -> EngineResult<()> {
        self.updates.push(query.to_string());
        Ok(())
    }

    fn clear_cache(&mut self) -> EngineResult<()> {
        self.cache_clears += 1;
        Ok(())
    }
}

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Writes a converter stand-in that copies a fixed Turtle fixture to the
/// requested output path.
fn fake_converter(dir: &Path, turtle: &str) -> PathBuf {
    let fixture = dir.join("fixture.ttl");
    std::fs::write(&fixture, turtle).unwrap();
    let script = dir.join("osm2rdf");
    std::fs::write(
        &script,
        format!("#!/bin/sh\ncp \"{}\" \"$3\"\n", fixture.display()),
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();
    script
}

fn engine_with(dir: &Path, turtle: &str) -> ChangeEngine {
    let config = Config {
        sparql_endpoint_uri: "http://localhost:7001".to_string(),
        scratch_dir: dir.to_path_buf(),
        osm2rdf_binary: fake_converter(dir, turtle),
        osm2rdf_output: dir.join("out.ttl"),
        ..Default::default()
    };
    ChangeEngine::new(config).unwrap()
}

const NODE_MODIFY_CHANGE: &str = r#"<osmChange version="0.6">
<modify><node id="42" lat="1.0" lon="2.0"/></modify>
</osmChange>"#;

const NODE_MODIFY_TURTLE: &str = "\
@prefix osmnode: <https://www.openstreetmap.org/node/> .
osmnode:42 rdf:type osm:node .
osmnode:42 geo:hasGeometry osm2rdfgeom:osm_node_42 .
osm2rdfgeom:osm_node_42 geo:asWKT \"POINT(2.0 1.0)\"^^geo:wktLiteral .
";

#[test]
fn node_only_modify_issues_one_delete_and_one_insert() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), NODE_MODIFY_TURTLE);

    let change = dir.path().join("change.osc");
    std::fs::write(&change, NODE_MODIFY_CHANGE).unwrap();

    let mut client = ScriptedClient::new();
    client.queue(vec![]); // pass A: no ways reference node 42
    client.queue(vec![]); // pass B.1: no relations either

    let report = engine.apply_with_client(&change, &mut client).unwrap();

    // no way or relation I/O beyond the two resolver probes
    assert_eq!(client.selects.len(), 2);
    assert_eq!(client.updates.len(), 2);
    assert!(client.updates[0].starts_with("DELETE"));
    assert!(client.updates[0].contains("osmnode:42"));
    assert!(client.updates[1].starts_with("INSERT DATA"));
    assert!(client.updates[1].contains("\"POINT(2.0 1.0)\"^^geo:wktLiteral"));
    assert_eq!(client.cache_clears, 1);
    assert_eq!(report.inserted_triples, 3);
    assert_eq!(report.ways_refreshed, 0);

    // scratch documents are gone after a clean run
    assert!(!dir.path().join("nodes.osm").exists());
    assert!(!dir.path().join("input.osm").exists());
    // the filtered-triples buffer documents what went in
    let buffer = std::fs::read_to_string(dir.path().join("filtered.ttl")).unwrap();
    assert_eq!(buffer.lines().count(), 3);
}

#[test]
fn gzip_change_file_behaves_identically() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), NODE_MODIFY_TURTLE);

    let change = dir.path().join("change.osc.gz");
    let file = std::fs::File::create(&change).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(NODE_MODIFY_CHANGE.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let mut client = ScriptedClient::new();
    client.queue(vec![]);
    client.queue(vec![]);

    let report = engine.apply_with_client(&change, &mut client).unwrap();
    assert_eq!(report.inserted_triples, 3);
    assert!(client.updates[1].contains("\"POINT(2.0 1.0)\"^^geo:wktLiteral"));
}

#[test]
fn node_modify_refreshes_referencing_way() {
    let dir = tempfile::tempdir().unwrap();
    let turtle = "\
osmnode:42 rdf:type osm:node .
osm2rdfgeom:osm_node_42 geo:asWKT \"POINT(2.0 1.0)\"^^geo:wktLiteral .
osmnode:43 rdf:type osm:node .
osmway:7 rdf:type osm:way .
osmway:7 osmway:node _:0 .
_:0 osmway:node osmnode:42 .
_:0 osm2rdfmember:pos \"0\"^^xsd:integer .
osm2rdfgeom:osm_wayarea_7 geo:asWKT \"LINESTRING(2.0 1.0,0.5 0.5)\" .
";
    let engine = engine_with(dir.path(), turtle);

    let change = dir.path().join("change.osc");
    std::fs::write(&change, NODE_MODIFY_CHANGE).unwrap();

    let mut client = ScriptedClient::new();
    // pass A: way 7 references node 42
    client.queue(vec![row(&[("way", "https://www.openstreetmap.org/way/7")])]);
    // pass B.1 and B.2: no relations involved
    client.queue(vec![]);
    client.queue(vec![]);
    // pass D: way 7's members are nodes 42 and 43
    client.queue(vec![
        row(&[("node", "https://www.openstreetmap.org/node/42")]),
        row(&[("node", "https://www.openstreetmap.org/node/43")]),
    ]);
    // builder: location of dummy node 43
    client.queue(vec![row(&[
        (
            "nodeGeo",
            "https://osm2rdf.cs.uni-freiburg.de/rdf/geom#osm_node_43",
        ),
        ("location", "POINT(0.5 0.5)"),
    ])]);
    // builder: member list of refresh way 7
    client.queue(vec![row(&[
        ("way", "https://www.openstreetmap.org/way/7"),
        (
            "nodeUris",
            "https://www.openstreetmap.org/node/42;https://www.openstreetmap.org/node/43",
        ),
        ("nodePositions", "0;1"),
    ])]);
    // builder: tags and timestamp of way 7
    client.queue(vec![row(&[
        ("key", "https://www.openstreetmap.org/wiki/Key:highway"),
        ("value", "path"),
    ])]);

    let report = engine.apply_with_client(&change, &mut client).unwrap();

    assert_eq!(report.ways_refreshed, 1);
    // nodes delete batch and ways delete batch, then one insert
    assert_eq!(client.updates.len(), 3);
    assert!(client.updates[0].contains("osmnode:42"));
    assert!(client.updates[1].contains("osmway:7"));
    let insert = &client.updates[2];
    assert!(insert.starts_with("INSERT DATA"));
    // way 7's triples survive the filter, with the member group collapsed
    assert!(insert.contains("osmway:7 rdf:type osm:way ."));
    assert!(insert.contains("osmway:7 osmway:node [ osmway:node osmnode:42"));
    assert!(insert.contains("osm2rdfgeom:osm_wayarea_7"));
    // the dummy node 43 exists only to feed the converter
    assert!(!insert.contains("osmnode:43"));
}

#[test]
fn created_relation_referencing_relation_fetches_dummy_only() {
    let dir = tempfile::tempdir().unwrap();
    let turtle = "\
osmrel:9 rdf:type osm:relation .
osmrel:9 osmrel:member _:0 .
_:0 osm2rdfmember:id osmrel:3 .
_:0 osm2rdfmember:role \"\" .
";
    let engine = engine_with(dir.path(), turtle);

    let change = dir.path().join("change.osc");
    std::fs::write(
        &change,
        r#"<osmChange version="0.6">
<create><relation id="9">
<member type="relation" ref="3" role=""/>
<tag k="type" v="route"/>
</relation></create>
</osmChange>"#,
    )
    .unwrap();

    let mut client = ScriptedClient::new();
    // pass C: members of referenced relation 3
    client.queue(vec![row(&[("p", "https://www.openstreetmap.org/way/2")])]);
    // pass D: nodes of referenced way 2
    client.queue(vec![row(&[("node", "https://www.openstreetmap.org/node/1")])]);
    // builder: location of node 1
    client.queue(vec![row(&[
        (
            "nodeGeo",
            "https://osm2rdf.cs.uni-freiburg.de/rdf/geom#osm_node_1",
        ),
        ("location", "POINT(0 0)"),
    ])]);
    // builder: members of referenced way 2
    client.queue(vec![row(&[
        ("way", "https://www.openstreetmap.org/way/2"),
        ("nodeUris", "https://www.openstreetmap.org/node/1"),
        ("nodePositions", "0"),
    ])]);
    // builder: body of referenced relation 3
    client.queue(vec![row(&[
        ("rel", "https://www.openstreetmap.org/relation/3"),
        ("type", "multipolygon"),
        ("memberUris", "https://www.openstreetmap.org/way/2"),
        ("memberRoles", "outer"),
        ("memberPositions", "0"),
    ])]);

    let report = engine.apply_with_client(&change, &mut client).unwrap();

    // the existing relation is not scheduled for refresh, its body is only
    // fetched as a stand-in
    assert_eq!(report.relations_refreshed, 0);
    assert!(client
        .selects
        .iter()
        .any(|q| q.contains("VALUES ?rel { osmrel:3 }")));
    // nothing was modified or deleted, so the only update is the insert
    assert_eq!(client.updates.len(), 1);
    assert!(client.updates[0].starts_with("INSERT DATA"));
    assert!(client.updates[0].contains("osmrel:9 rdf:type osm:relation ."));
}

#[test]
fn endpoint_error_aborts_the_run() {
    struct FailingClient;
    impl SparqlClient for FailingClient {
        fn select(&mut self, _prefixes: &str, _query: &str) -> EngineResult<Vec<Row>> {
            Err(osm_delta::errors::Error::UpstreamUnavailable(
                "connection refused".to_string(),
            ))
        }
        fn update(&mut self, _prefixes: &str, _query: &str) -> EngineResult<()> {
            unreachable!("no update may be issued after a failed select")
        }
        fn clear_cache(&mut self) -> EngineResult<()> {
            unreachable!()
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(dir.path(), "");
    let change = dir.path().join("change.osc");
    std::fs::write(&change, NODE_MODIFY_CHANGE).unwrap();

    let err = engine
        .apply_with_client(&change, &mut FailingClient)
        .unwrap_err();
    assert!(matches!(
        err,
        osm_delta::errors::Error::UpstreamUnavailable(_)
    ));
}
