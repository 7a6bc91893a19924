//! Rebuilds stand-in OSM objects from the triple store.
//!
//! For every referenced or refresh-scheduled object that is not part of the
//! change file itself, the fetcher pulls the current members, location, tags
//! and timestamp out of the store and materialises a minimal OSM-XML element
//! into the scratch documents, just enough for osm2rdf to regenerate the
//! dependent geometries.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use regex::Regex;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::models::{ElementType, Node, OsmId, Relation, RelationMember, Way};
use crate::sets::ChangeSets;
use crate::sparql::{binding, queries, Row, SparqlClient};
use crate::vocab::{element_from_uri, node_id_from_geometry_uri, OSM_WIKI_KEY_URI};
use crate::writers::ScratchFiles;

fn wkt_point() -> &'static Regex {
    static WKT_POINT: OnceLock<Regex> = OnceLock::new();
    WKT_POINT.get_or_init(|| {
        Regex::new(r"POINT\(([-+]?[0-9]*\.?[0-9]+)\s+([-+]?[0-9]*\.?[0-9]+)\)")
            .expect("hard-coded regex")
    })
}

pub struct StoreFetcher<'a> {
    client: &'a mut dyn SparqlClient,
    batch_size: usize,
}

impl<'a> StoreFetcher<'a> {
    pub fn new(client: &'a mut dyn SparqlClient, config: &Config) -> Self {
        Self {
            client,
            batch_size: config.max_values_per_query,
        }
    }

    /// Fetches every needed stand-in object and appends it to the scratch
    /// documents, which are closed afterwards.
    pub fn materialise_dummies(
        &mut self,
        sets: &ChangeSets,
        scratch: &mut ScratchFiles,
    ) -> Result<()> {
        debug!(
            "building dummies for {} nodes, {}+{} ways, {}+{} relations",
            sets.referenced_nodes.len(),
            sets.referenced_ways.len(),
            sets.ways_to_refresh_geo.len(),
            sets.referenced_relations.len(),
            sets.relations_to_refresh_geo.len()
        );

        for node in self.fetch_node_locations(&sets.referenced_nodes)? {
            scratch.append(ElementType::Node, &node.xml())?;
        }

        for mut way in self.fetch_way_bodies(&sets.referenced_ways, false)? {
            way.add_tag("type", "tmp");
            scratch.append(ElementType::Way, &way.xml())?;
        }
        for way in self.fetch_way_bodies(&sets.ways_to_refresh_geo, true)? {
            scratch.append(ElementType::Way, &way.xml())?;
        }

        for relation in self.fetch_relation_bodies(&sets.referenced_relations, false)? {
            scratch.append(ElementType::Relation, &relation.xml())?;
        }
        for relation in self.fetch_relation_bodies(&sets.relations_to_refresh_geo, true)? {
            scratch.append(ElementType::Relation, &relation.xml())?;
        }

        scratch.close()
    }

    /// Locations of the given nodes, decoded from their WKT point literals.
    ///
    /// Nodes missing from the store are silently absent from the result;
    /// the store may legitimately lag behind the change stream. A response
    /// with more rows than requested ids is a hard error.
    pub fn fetch_node_locations(&mut self, ids: &BTreeSet<OsmId>) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for chunk in chunks(ids, self.batch_size) {
            let rows = self
                .client
                .select(queries::DEFAULT_PREFIXES, &queries::node_locations(&chunk))?;
            if rows.len() > chunk.len() {
                return Err(Error::MalformedUpstreamData(format!(
                    "requested {} node locations, endpoint returned {}",
                    chunk.len(),
                    rows.len()
                )));
            }
            for row in rows {
                let id = node_id_from_geometry_uri(binding(&row, "nodeGeo")?)?;
                let (lon, lat) = parse_wkt_point(binding(&row, "location")?)?;
                nodes.push(Node::new(id, lon, lat));
            }
        }
        Ok(nodes)
    }

    /// Member lists of the given ways, ordered by the store's position
    /// predicate. With `with_details` the ways additionally carry their tags
    /// and timestamp so osm2rdf recomputes the full geometry triples.
    pub fn fetch_way_bodies(
        &mut self,
        ids: &BTreeSet<OsmId>,
        with_details: bool,
    ) -> Result<Vec<Way>> {
        let mut ways = Vec::new();
        for chunk in chunks(ids, self.batch_size) {
            let rows = self
                .client
                .select(queries::DEFAULT_PREFIXES, &queries::way_members(&chunk))?;
            for row in rows {
                let (element_type, id) = element_from_uri(binding(&row, "way")?)?;
                if element_type != ElementType::Way {
                    return Err(Error::MalformedUpstreamData(format!(
                        "expected a way URI, got {}",
                        binding(&row, "way")?
                    )));
                }
                let mut way = Way::new(id);
                for uri in ordered_concat(&row, "nodeUris", "nodePositions")? {
                    let (member_type, node_id) = element_from_uri(&uri)?;
                    if member_type != ElementType::Node {
                        return Err(Error::MalformedUpstreamData(format!(
                            "way {} has a non-node member: {}",
                            id, uri
                        )));
                    }
                    way.add_member(node_id);
                }
                ways.push(way);
            }
        }
        if with_details {
            for way in &mut ways {
                let subject = format!("osmway:{}", way.id);
                let (tags, timestamp) = self.fetch_tags_and_timestamp(&subject)?;
                way.tags = tags;
                way.timestamp = timestamp;
            }
        }
        Ok(ways)
    }

    /// Typed, ordered member lists of the given relations.
    pub fn fetch_relation_bodies(
        &mut self,
        ids: &BTreeSet<OsmId>,
        with_details: bool,
    ) -> Result<Vec<Relation>> {
        let mut relations = Vec::new();
        for chunk in chunks(ids, self.batch_size) {
            let rows = self
                .client
                .select(queries::DEFAULT_PREFIXES, &queries::relation_members(&chunk))?;
            for row in rows {
                let (element_type, id) = element_from_uri(binding(&row, "rel")?)?;
                if element_type != ElementType::Relation {
                    return Err(Error::MalformedUpstreamData(format!(
                        "expected a relation URI, got {}",
                        binding(&row, "rel")?
                    )));
                }
                let mut relation = Relation::new(id);
                relation.set_type(binding(&row, "type")?);

                let uris = ordered_concat(&row, "memberUris", "memberPositions")?;
                let roles = ordered_concat(&row, "memberRoles", "memberPositions")?;
                for (uri, role) in uris.into_iter().zip(roles) {
                    let (member_type, member_id) = element_from_uri(&uri)?;
                    relation.add_member(RelationMember {
                        member_id,
                        member_type,
                        role,
                    });
                }
                relations.push(relation);
            }
        }
        if with_details {
            for relation in &mut relations {
                let subject = format!("osmrel:{}", relation.id);
                let (tags, timestamp) = self.fetch_tags_and_timestamp(&subject)?;
                // the type tag is rendered from the relation type already
                relation.tags = tags.into_iter().filter(|t| t.key != "type").collect();
                relation.timestamp = timestamp;
            }
        }
        Ok(relations)
    }

    /// The latest `osmmeta:timestamp` of any node in the store, used to
    /// decide which replication sequence to resume from.
    pub fn fetch_latest_node_timestamp(&mut self) -> Result<DateTime<Utc>> {
        let rows = self.client.select(
            queries::DEFAULT_PREFIXES,
            &queries::latest_node_timestamp(),
        )?;
        let row = rows.first().ok_or_else(|| {
            Error::MalformedUpstreamData("store has no node timestamps".to_string())
        })?;
        parse_timestamp(binding(row, "p")?)
    }

    fn fetch_tags_and_timestamp(
        &mut self,
        subject: &str,
    ) -> Result<(Vec<crate::models::Tag>, Option<DateTime<Utc>>)> {
        let rows = self.client.select(
            queries::DEFAULT_PREFIXES,
            &queries::tags_and_timestamp(subject),
        )?;
        let mut tags = Vec::new();
        let mut timestamp = None;
        for row in rows {
            if let Some(time) = row.get("time") {
                timestamp = Some(parse_timestamp(time)?);
                continue;
            }
            if let (Some(key), Some(value)) = (row.get("key"), row.get("value")) {
                let key = key.strip_prefix(OSM_WIKI_KEY_URI).ok_or_else(|| {
                    Error::MalformedUpstreamData(format!("not a tag-key predicate: {}", key))
                })?;
                tags.push(crate::models::Tag::new(key, value.clone()));
            }
        }
        Ok((tags, timestamp))
    }
}

fn chunks(ids: &BTreeSet<OsmId>, size: usize) -> Vec<Vec<OsmId>> {
    let ids: Vec<OsmId> = ids.iter().copied().collect();
    ids.chunks(size).map(|c| c.to_vec()).collect()
}

/// Splits a pair of GROUP_CONCAT bindings and restores member order from
/// the position binding.
fn ordered_concat(row: &Row, values_name: &str, positions_name: &str) -> Result<Vec<String>> {
    let values: Vec<&str> = binding(row, values_name)?.split(';').collect();
    let positions: Vec<&str> = binding(row, positions_name)?.split(';').collect();
    if values.len() != positions.len() {
        return Err(Error::MalformedUpstreamData(format!(
            "mismatched GROUP_CONCAT lengths for ?{} / ?{}",
            values_name, positions_name
        )));
    }
    let mut parsed: Vec<(i64, &str)> = Vec::with_capacity(values.len());
    for (value, position) in values.into_iter().zip(positions) {
        let position: i64 = position.parse().map_err(|_| {
            Error::MalformedUpstreamData(format!("invalid member position: {:?}", position))
        })?;
        parsed.push((position, value));
    }
    parsed.sort_by_key(|(position, _)| *position);
    Ok(parsed.into_iter().map(|(_, value)| value.to_string()).collect())
}

/// Extracts `(lon, lat)` from a WKT point literal, keeping the lexical form.
fn parse_wkt_point(literal: &str) -> Result<(String, String)> {
    match wkt_point().captures(literal) {
        Some(captures) => Ok((captures[1].to_string(), captures[2].to_string())),
        None => Err(Error::MalformedUpstreamData(format!(
            "no WKT point found in {:?}",
            literal
        ))),
    }
}

fn parse_timestamp(literal: &str) -> Result<DateTime<Utc>> {
    let trimmed = literal.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::MalformedUpstreamData(format!("invalid timestamp: {:?}", literal)))
}
