//! Builders for every SELECT and UPDATE the engine issues.
//!
//! All id-driven queries take one pre-chunked batch of ids; the caller is
//! responsible for respecting the VALUES cap.

use std::fmt::Write;

use crate::models::OsmId;

/// Prefixes prepended to every query sent to the endpoint.
pub const DEFAULT_PREFIXES: &str = "\
PREFIX osmnode: <https://www.openstreetmap.org/node/> \
PREFIX osmway: <https://www.openstreetmap.org/way/> \
PREFIX osmrel: <https://www.openstreetmap.org/relation/> \
PREFIX osmkey: <https://www.openstreetmap.org/wiki/Key:> \
PREFIX osmmeta: <https://www.openstreetmap.org/meta/> \
PREFIX osm: <https://www.openstreetmap.org/> \
PREFIX osm2rdfgeom: <https://osm2rdf.cs.uni-freiburg.de/rdf/geom#> \
PREFIX osm2rdfmember: <https://osm2rdf.cs.uni-freiburg.de/rdf/member#> \
PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> \
PREFIX geo: <http://www.opengis.net/ont/geosparql#> ";

fn values(tag: &str, ids: &[OsmId]) -> String {
    let mut out = String::new();
    for id in ids {
        write!(out, "{}:{} ", tag, id).unwrap();
    }
    out
}

/// An `INSERT DATA` update from an already-rendered Turtle block.
pub fn insert_data(triples: &str, graph: Option<&str>) -> String {
    match graph {
        Some(graph) => format!("INSERT DATA {{ GRAPH <{}> {{ {} }} }}", graph, triples),
        None => format!("INSERT DATA {{ {} }}", triples),
    }
}

/// A DELETE for all triples whose subject is one of `tag:id`, plus one level
/// of linked blank nodes.
pub fn delete_ids(tag: &str, ids: &[OsmId], graph: Option<&str>) -> String {
    let body = "?s ?p1 ?o1 . OPTIONAL { ?o1 ?p2 ?o2 . }";
    match graph {
        Some(graph) => format!(
            "DELETE {{ GRAPH <{0}> {{ ?s ?p1 ?o1 . ?o1 ?p2 ?o2 . }} }} \
             WHERE {{ GRAPH <{0}> {{ VALUES ?s {{ {1}}} {2} }} }}",
            graph,
            values(tag, ids),
            body
        ),
        None => format!(
            "DELETE {{ ?s ?p1 ?o1 . ?o1 ?p2 ?o2 . }} \
             WHERE {{ VALUES ?s {{ {}}} {} }}",
            values(tag, ids),
            body
        ),
    }
}

/// Locations of the given nodes as WKT literals, keyed by geometry subject.
pub fn node_locations(node_ids: &[OsmId]) -> String {
    let mut out = String::from("SELECT ?nodeGeo ?location WHERE { VALUES ?nodeGeo { ");
    for id in node_ids {
        write!(out, "osm2rdfgeom:osm_node_{} ", id).unwrap();
    }
    out.push_str("} ?nodeGeo geo:asWKT ?location . }");
    out
}

/// The latest `osmmeta:timestamp` of any node in the store.
pub fn latest_node_timestamp() -> String {
    "SELECT ?p WHERE { ?s rdf:type osm:node . ?s osmmeta:timestamp ?p . } \
     ORDER BY DESC(?p) LIMIT 1"
        .to_string()
}

/// Type and position-annotated member lists of the given relations.
pub fn relation_members(relation_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?rel ?type \
         (GROUP_CONCAT(?memberUri;separator=\";\") AS ?memberUris) \
         (GROUP_CONCAT(?memberRole;separator=\";\") AS ?memberRoles) \
         (GROUP_CONCAT(?memberPos;separator=\";\") AS ?memberPositions) \
         WHERE {{ VALUES ?rel {{ {}}} \
         ?rel osmkey:type ?type . \
         ?rel osmrel:member ?o . \
         ?o osm2rdfmember:id ?memberUri . \
         ?o osm2rdfmember:role ?memberRole . \
         ?o osm2rdfmember:pos ?memberPos . \
         }} GROUP BY ?rel ?type",
        values("osmrel", relation_ids)
    )
}

/// Position-annotated node member lists of the given ways.
pub fn way_members(way_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?way \
         (GROUP_CONCAT(?nodeUri;separator=\";\") AS ?nodeUris) \
         (GROUP_CONCAT(?nodePos;separator=\";\") AS ?nodePositions) \
         WHERE {{ VALUES ?way {{ {}}} \
         ?way osmway:node ?member . \
         ?member osmway:node ?nodeUri . \
         ?member osm2rdfmember:pos ?nodePos \
         }} GROUP BY ?way",
        values("osmway", way_ids)
    )
}

/// Distinct nodes referenced by the given ways.
pub fn nodes_referenced_by_ways(way_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?node WHERE {{ VALUES ?way {{ {}}} \
         ?way osmway:node ?member . ?member osmway:node ?node . }} GROUP BY ?node",
        values("osmway", way_ids)
    )
}

/// Distinct member subjects referenced by the given relations.
pub fn members_referenced_by_relations(relation_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?p WHERE {{ VALUES ?rel {{ {}}} \
         ?rel osmrel:member ?o . ?o osm2rdfmember:id ?p . }} GROUP BY ?p",
        values("osmrel", relation_ids)
    )
}

/// Ways whose node-member list contains one of the given nodes.
pub fn ways_referencing_nodes(node_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?way WHERE {{ VALUES ?node {{ {}}} \
         ?identifier osmway:node ?node . ?way osmway:node ?identifier . }} GROUP BY ?way",
        values("osmnode", node_ids)
    )
}

/// Relations referencing one of the given nodes as member.
pub fn relations_referencing_nodes(node_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?s WHERE {{ VALUES ?node {{ {}}} \
         ?s osmrel:member ?o . ?o osm2rdfmember:id ?node . }} GROUP BY ?s",
        values("osmnode", node_ids)
    )
}

/// Relations referencing one of the given ways as member.
pub fn relations_referencing_ways(way_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?s WHERE {{ VALUES ?way {{ {}}} \
         ?s osmrel:member ?o . ?o osm2rdfmember:id ?way . }} GROUP BY ?s",
        values("osmway", way_ids)
    )
}

/// Relations referencing one of the given relations as member.
pub fn relations_referencing_relations(relation_ids: &[OsmId]) -> String {
    format!(
        "SELECT ?s WHERE {{ VALUES ?rel {{ {}}} \
         ?s osmrel:member ?o . ?o osm2rdfmember:id ?rel . }} GROUP BY ?s",
        values("osmrel", relation_ids)
    )
}

/// Tags and timestamp of a single subject such as `osmway:7`.
pub fn tags_and_timestamp(subject: &str) -> String {
    format!(
        "SELECT ?key ?value ?time WHERE {{ \
         {{ {0} ?key ?value . \
         FILTER regex(str(?key), \"https://www.openstreetmap.org/wiki/Key:\") }} \
         UNION {{ {0} osmmeta:timestamp ?time }} }}",
        subject
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_ids() {
        let query = delete_ids("osmnode", &[1, 2], None);
        assert_eq!(
            query,
            "DELETE { ?s ?p1 ?o1 . ?o1 ?p2 ?o2 . } \
             WHERE { VALUES ?s { osmnode:1 osmnode:2 } \
             ?s ?p1 ?o1 . OPTIONAL { ?o1 ?p2 ?o2 . } }"
        );
    }

    #[test]
    fn test_delete_ids_with_graph() {
        let query = delete_ids("osmway", &[7], Some("https://example.org/osm"));
        assert!(query.starts_with("DELETE { GRAPH <https://example.org/osm> {"));
        assert!(query.contains("VALUES ?s { osmway:7 }"));
    }

    #[test]
    fn test_insert_data() {
        assert_eq!(
            insert_data("osmnode:1 osmkey:name \"x\" .", None),
            "INSERT DATA { osmnode:1 osmkey:name \"x\" . }"
        );
        assert_eq!(
            insert_data("osmnode:1 osmkey:name \"x\" .", Some("urn:g")),
            "INSERT DATA { GRAPH <urn:g> { osmnode:1 osmkey:name \"x\" . } }"
        );
    }

    #[test]
    fn test_node_locations() {
        let query = node_locations(&[42]);
        assert_eq!(
            query,
            "SELECT ?nodeGeo ?location WHERE { VALUES ?nodeGeo { \
             osm2rdfgeom:osm_node_42 } ?nodeGeo geo:asWKT ?location . }"
        );
    }

    #[test]
    fn test_ways_referencing_nodes() {
        let query = ways_referencing_nodes(&[42]);
        assert_eq!(
            query,
            "SELECT ?way WHERE { VALUES ?node { osmnode:42 } \
             ?identifier osmway:node ?node . ?way osmway:node ?identifier . } GROUP BY ?way"
        );
    }

    #[test]
    fn test_way_members_orders_by_position_binding() {
        let query = way_members(&[7, 9]);
        assert!(query.contains("VALUES ?way { osmway:7 osmway:9 }"));
        assert!(query.contains("osm2rdfmember:pos"));
    }

    #[test]
    fn test_tags_and_timestamp() {
        let query = tags_and_timestamp("osmway:7");
        assert!(query.contains("osmway:7 ?key ?value"));
        assert!(query.contains("osmway:7 osmmeta:timestamp ?time"));
    }
}
