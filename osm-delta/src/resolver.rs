//! Dependency closure over node→way→relation references.
//!
//! The dependency DAG in OSM has depth three, so the closure is computed in
//! four fixed passes instead of an open-ended fix point: ways whose geometry
//! depends on a modified node (A), relations whose geometry depends on a
//! modified node or on a dirty way (B), then the members needed to rebuild
//! relation geometries (C) and way geometries (D).

use std::collections::BTreeSet;

use log::info;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::models::{ElementType, OsmId};
use crate::sets::ChangeSets;
use crate::sparql::{binding, queries, SparqlClient};
use crate::vocab::element_from_uri;

pub struct DependencyResolver<'a> {
    client: &'a mut dyn SparqlClient,
    batch_size: usize,
    follow_relation_relations: bool,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(client: &'a mut dyn SparqlClient, config: &Config) -> Self {
        Self {
            client,
            batch_size: config.max_values_per_query,
            follow_relation_relations: config.fetch_relations_referencing_relations,
        }
    }

    /// Runs all four passes. Afterwards every object whose geometry might
    /// have been invalidated is in the change set or a refresh set, and
    /// every member needed to rebuild a dirty geometry is classified as
    /// referenced.
    pub fn resolve(&mut self, sets: &mut ChangeSets) -> Result<()> {
        self.collect_ways_to_refresh(sets)?;
        self.collect_relations_to_refresh(sets)?;
        self.collect_relation_member_references(sets)?;
        self.collect_way_member_references(sets)?;
        info!("dependency closure complete: {}", sets.summary());
        Ok(())
    }

    /// Pass A: ways whose node-member list contains a modified node.
    fn collect_ways_to_refresh(&mut self, sets: &mut ChangeSets) -> Result<()> {
        let modified_nodes = sets.modified_nodes.clone();
        self.for_each_chunk(&modified_nodes, |client, chunk| {
            let rows = client.select(
                queries::DEFAULT_PREFIXES,
                &queries::ways_referencing_nodes(chunk),
            )?;
            for row in rows {
                let id = expect_kind(binding(&row, "way")?, ElementType::Way)?;
                sets.add_way_to_refresh(id);
            }
            Ok(())
        })
    }

    /// Pass B: relations referencing a modified node, a dirty way, or
    /// (behind the configuration flag) a modified area relation.
    fn collect_relations_to_refresh(&mut self, sets: &mut ChangeSets) -> Result<()> {
        let modified_nodes = sets.modified_nodes.clone();
        self.for_each_chunk(&modified_nodes, |client, chunk| {
            let rows = client.select(
                queries::DEFAULT_PREFIXES,
                &queries::relations_referencing_nodes(chunk),
            )?;
            for row in rows {
                let id = expect_kind(binding(&row, "s")?, ElementType::Relation)?;
                sets.add_relation_to_refresh(id);
            }
            Ok(())
        })?;

        let dirty_ways: BTreeSet<OsmId> = sets
            .modified_ways
            .union(&sets.ways_to_refresh_geo)
            .copied()
            .collect();
        self.for_each_chunk(&dirty_ways, |client, chunk| {
            let rows = client.select(
                queries::DEFAULT_PREFIXES,
                &queries::relations_referencing_ways(chunk),
            )?;
            for row in rows {
                let id = expect_kind(binding(&row, "s")?, ElementType::Relation)?;
                sets.add_relation_to_refresh(id);
            }
            Ok(())
        })?;

        if self.follow_relation_relations {
            let modified_areas = sets.modified_areas.clone();
            self.for_each_chunk(&modified_areas, |client, chunk| {
                let rows = client.select(
                    queries::DEFAULT_PREFIXES,
                    &queries::relations_referencing_relations(chunk),
                )?;
                for row in rows {
                    let id = expect_kind(binding(&row, "s")?, ElementType::Relation)?;
                    sets.add_relation_to_refresh(id);
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Pass C: node and way members of every relation whose body will be
    /// rebuilt.
    fn collect_relation_member_references(&mut self, sets: &mut ChangeSets) -> Result<()> {
        let relations: BTreeSet<OsmId> = sets
            .referenced_relations
            .union(&sets.relations_to_refresh_geo)
            .copied()
            .collect();
        self.for_each_chunk(&relations, |client, chunk| {
            let rows = client.select(
                queries::DEFAULT_PREFIXES,
                &queries::members_referenced_by_relations(chunk),
            )?;
            for row in rows {
                let (element_type, id) = element_from_uri(binding(&row, "p")?)?;
                match element_type {
                    ElementType::Node => {
                        sets.add_referenced_node(id);
                    }
                    ElementType::Way => {
                        sets.add_referenced_way(id);
                    }
                    // osm2rdf does not calculate geometries for relations
                    // that reference other relations; their bodies are not
                    // needed to rebuild the parent.
                    ElementType::Relation => {}
                }
            }
            Ok(())
        })
    }

    /// Pass D: node members of every way whose body will be rebuilt.
    fn collect_way_member_references(&mut self, sets: &mut ChangeSets) -> Result<()> {
        let ways: BTreeSet<OsmId> = sets
            .referenced_ways
            .union(&sets.ways_to_refresh_geo)
            .copied()
            .collect();
        self.for_each_chunk(&ways, |client, chunk| {
            let rows = client.select(
                queries::DEFAULT_PREFIXES,
                &queries::nodes_referenced_by_ways(chunk),
            )?;
            for row in rows {
                let id = expect_kind(binding(&row, "node")?, ElementType::Node)?;
                sets.add_referenced_node(id);
            }
            Ok(())
        })
    }

    fn for_each_chunk<F>(&mut self, ids: &BTreeSet<OsmId>, mut f: F) -> Result<()>
    where
        F: FnMut(&mut dyn SparqlClient, &[OsmId]) -> Result<()>,
    {
        let ids: Vec<OsmId> = ids.iter().copied().collect();
        for chunk in ids.chunks(self.batch_size) {
            f(&mut *self.client, chunk)?;
        }
        Ok(())
    }
}

fn expect_kind(uri: &str, expected: ElementType) -> Result<OsmId> {
    let (element_type, id) = element_from_uri(uri)?;
    if element_type != expected {
        return Err(Error::MalformedUpstreamData(format!(
            "expected a {} URI, got {}",
            expected, uri
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeAction;
    use crate::test_util::{row, FakeSparqlClient};

    fn config() -> Config {
        Config {
            sparql_endpoint_uri: "http://localhost:7001".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_modified_node_pulls_way_and_relation() {
        let mut sets = ChangeSets::new();
        sets.classify(ElementType::Node, ChangeAction::Modify, 42).unwrap();

        let mut client = FakeSparqlClient::new();
        // pass A: way 7 references node 42
        client.queue_select(vec![row(&[("way", "https://www.openstreetmap.org/way/7")])]);
        // pass B.1: no relation references node 42
        client.queue_select(vec![]);
        // pass B.2: relation 5 references way 7
        client.queue_select(vec![row(&[("s", "https://www.openstreetmap.org/relation/5")])]);
        // pass C: relation 5 members
        client.queue_select(vec![
            row(&[("p", "https://www.openstreetmap.org/way/7")]),
            row(&[("p", "https://www.openstreetmap.org/node/100")]),
        ]);
        // pass D: members of way 7
        client.queue_select(vec![
            row(&[("node", "https://www.openstreetmap.org/node/42")]),
            row(&[("node", "https://www.openstreetmap.org/node/43")]),
        ]);

        let mut resolver = DependencyResolver::new(&mut client, &config());
        resolver.resolve(&mut sets).unwrap();

        assert!(sets.ways_to_refresh_geo.contains(&7));
        assert!(sets.relations_to_refresh_geo.contains(&5));
        assert!(sets.referenced_nodes.contains(&100));
        // way 7 is being refreshed, so it is not also "referenced"
        assert!(!sets.referenced_ways.contains(&7));
        // node 42 is in the change file
        assert!(!sets.referenced_nodes.contains(&42));
        assert!(sets.referenced_nodes.contains(&43));
    }

    #[test]
    fn test_way_in_change_file_is_not_refreshed() {
        let mut sets = ChangeSets::new();
        sets.classify(ElementType::Node, ChangeAction::Modify, 42).unwrap();
        sets.classify(ElementType::Way, ChangeAction::Modify, 7).unwrap();

        let mut client = FakeSparqlClient::new();
        // pass A returns the way that is itself part of the change file
        client.queue_select(vec![row(&[("way", "https://www.openstreetmap.org/way/7")])]);
        client.queue_select(vec![]); // B.1
        client.queue_select(vec![]); // B.2 (modified way 7 is queried)

        let mut resolver = DependencyResolver::new(&mut client, &config());
        resolver.resolve(&mut sets).unwrap();

        assert!(sets.ways_to_refresh_geo.is_empty());
    }

    #[test]
    fn test_relation_relation_pass_is_off_by_default() {
        let mut sets = ChangeSets::new();
        sets.classify(ElementType::Relation, ChangeAction::Modify, 8).unwrap();
        sets.mark_modified_area(8);

        let mut client = FakeSparqlClient::new();
        let mut resolver = DependencyResolver::new(&mut client, &config());
        resolver.resolve(&mut sets).unwrap();
        // no query was issued at all: no modified nodes/ways and the
        // relation-relation pass is disabled
        assert!(client.selects.is_empty());
    }

    #[test]
    fn test_relation_relation_pass_follows_flag() {
        let mut sets = ChangeSets::new();
        sets.classify(ElementType::Relation, ChangeAction::Modify, 8).unwrap();
        sets.mark_modified_area(8);

        let mut client = FakeSparqlClient::new();
        // B.3: relation 9 references area relation 8
        client.queue_select(vec![row(&[("s", "https://www.openstreetmap.org/relation/9")])]);
        // pass C for relation 9
        client.queue_select(vec![]);

        let config = Config {
            fetch_relations_referencing_relations: true,
            ..config()
        };
        let mut resolver = DependencyResolver::new(&mut client, &config);
        resolver.resolve(&mut sets).unwrap();
        assert!(sets.relations_to_refresh_geo.contains(&9));
    }

    #[test]
    fn test_batching_respects_cap() {
        let mut sets = ChangeSets::new();
        for id in 1..=2500 {
            sets.classify(ElementType::Node, ChangeAction::Modify, id).unwrap();
        }
        let mut client = FakeSparqlClient::new();
        for _ in 0..6 {
            client.queue_select(vec![]);
        }
        let mut resolver = DependencyResolver::new(&mut client, &config());
        resolver.resolve(&mut sets).unwrap();
        // pass A: ceil(2500/1024) = 3 queries, pass B.1: 3 more
        assert_eq!(client.selects.len(), 6);
        for query in &client.selects {
            assert!(query.matches("osmnode:").count() <= 1024);
        }
    }

    #[test]
    fn test_unexpected_uri_kind_is_rejected() {
        let mut sets = ChangeSets::new();
        sets.classify(ElementType::Node, ChangeAction::Modify, 42).unwrap();
        let mut client = FakeSparqlClient::new();
        client.queue_select(vec![row(&[("way", "https://www.openstreetmap.org/node/1")])]);
        let mut resolver = DependencyResolver::new(&mut client, &config());
        let err = resolver.resolve(&mut sets).unwrap_err();
        assert!(matches!(err, Error::MalformedUpstreamData(_)));
    }
}
