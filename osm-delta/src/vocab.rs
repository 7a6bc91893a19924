//! IRIs and prefixed-name namespaces of the osm2rdf vocabulary.

use crate::errors::{Error, Result};
use crate::models::{parse_id, ElementType, OsmId};

pub const OSM_NODE_URI: &str = "https://www.openstreetmap.org/node/";
pub const OSM_WAY_URI: &str = "https://www.openstreetmap.org/way/";
pub const OSM_REL_URI: &str = "https://www.openstreetmap.org/relation/";

/// Geometry subject prefix for node geometries, full-IRI form.
pub const OSM2RDF_GEOM_NODE_URI: &str =
    "https://osm2rdf.cs.uni-freiburg.de/rdf/geom#osm_node_";

/// Prefix of tag-key predicates, full-IRI form.
pub const OSM_WIKI_KEY_URI: &str = "https://www.openstreetmap.org/wiki/Key:";

/// Prefixed-name namespaces a Turtle subject of each kind can start with.
pub const NODE_NAMESPACES: [&str; 2] = ["osmnode:", "osm2rdfgeom:osm_node_"];
pub const WAY_NAMESPACES: [&str; 2] = ["osmway:", "osm2rdfgeom:osm_wayarea_"];
pub const RELATION_NAMESPACES: [&str; 2] = ["osmrel:", "osm2rdfgeom:osm_relarea_"];

/// Predicates whose object opens a blank-node link group in osm2rdf output.
pub const WAY_LINK_PREDICATES: [&str; 1] = ["osmway:node"];
pub const RELATION_LINK_PREDICATES: [&str; 1] = ["osmrel:member"];

/// SPARQL delete tags per kind.
pub fn delete_tag(element_type: ElementType) -> &'static str {
    match element_type {
        ElementType::Node => "osmnode",
        ElementType::Way => "osmway",
        ElementType::Relation => "osmrel",
    }
}

/// Resolves a full OSM element IRI into its kind and id.
///
/// An IRI outside the three OSM namespaces is a hard error; the store is
/// not supposed to hand back anything else as a member or subject.
pub fn element_from_uri(uri: &str) -> Result<(ElementType, OsmId)> {
    if let Some(suffix) = uri.strip_prefix(OSM_NODE_URI) {
        return Ok((ElementType::Node, parse_id(suffix)?));
    }
    if let Some(suffix) = uri.strip_prefix(OSM_WAY_URI) {
        return Ok((ElementType::Way, parse_id(suffix)?));
    }
    if let Some(suffix) = uri.strip_prefix(OSM_REL_URI) {
        return Ok((ElementType::Relation, parse_id(suffix)?));
    }
    Err(Error::MalformedUpstreamData(format!(
        "URI is not an OSM element: {}",
        uri
    )))
}

/// Resolves a full node-geometry IRI (`…geom#osm_node_<id>`) into the node id.
pub fn node_id_from_geometry_uri(uri: &str) -> Result<OsmId> {
    match uri.strip_prefix(OSM2RDF_GEOM_NODE_URI) {
        Some(suffix) => parse_id(suffix),
        None => Err(Error::MalformedUpstreamData(format!(
            "URI is not a node geometry: {}",
            uri
        ))),
    }
}
