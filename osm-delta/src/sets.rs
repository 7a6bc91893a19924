use std::collections::BTreeSet;

use crate::errors::{Error, Result};
use crate::models::{ChangeAction, ElementType, OsmId};

/// Categorised identifier sets for one change application run.
///
/// The three "referenced" sets never overlap the six change sets nor the two
/// refresh sets, and the refresh sets never overlap the change sets of the
/// same kind. All mutation goes through the `classify`/`add_*` methods, which
/// maintain those invariants.
#[derive(Debug, Default)]
pub struct ChangeSets {
    pub created_nodes: BTreeSet<OsmId>,
    pub modified_nodes: BTreeSet<OsmId>,
    pub deleted_nodes: BTreeSet<OsmId>,

    pub created_ways: BTreeSet<OsmId>,
    pub modified_ways: BTreeSet<OsmId>,
    pub deleted_ways: BTreeSet<OsmId>,

    pub created_relations: BTreeSet<OsmId>,
    pub modified_relations: BTreeSet<OsmId>,
    pub deleted_relations: BTreeSet<OsmId>,

    /// Modified relations whose `type` tag declares an area
    /// (`multipolygon` or `boundary`).
    pub modified_areas: BTreeSet<OsmId>,

    pub ways_to_refresh_geo: BTreeSet<OsmId>,
    pub relations_to_refresh_geo: BTreeSet<OsmId>,

    pub referenced_nodes: BTreeSet<OsmId>,
    pub referenced_ways: BTreeSet<OsmId>,
    pub referenced_relations: BTreeSet<OsmId>,
}

impl ChangeSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an element from the change file under its kind and operation.
    ///
    /// The same id appearing twice for one kind within a single change file
    /// is a hard error.
    pub fn classify(&mut self, element_type: ElementType, action: ChangeAction, id: OsmId) -> Result<()> {
        if self.in_change_file(element_type, id) {
            return Err(Error::MalformedInput(format!(
                "duplicate {} id {} in change file",
                element_type, id
            )));
        }
        let set = match (element_type, action) {
            (ElementType::Node, ChangeAction::Create) => &mut self.created_nodes,
            (ElementType::Node, ChangeAction::Modify) => &mut self.modified_nodes,
            (ElementType::Node, ChangeAction::Delete) => &mut self.deleted_nodes,
            (ElementType::Way, ChangeAction::Create) => &mut self.created_ways,
            (ElementType::Way, ChangeAction::Modify) => &mut self.modified_ways,
            (ElementType::Way, ChangeAction::Delete) => &mut self.deleted_ways,
            (ElementType::Relation, ChangeAction::Create) => &mut self.created_relations,
            (ElementType::Relation, ChangeAction::Modify) => &mut self.modified_relations,
            (ElementType::Relation, ChangeAction::Delete) => &mut self.deleted_relations,
        };
        set.insert(id);
        Ok(())
    }

    /// Whether the id occurs in the change file for the given kind,
    /// i.e. in created, modified or deleted.
    pub fn in_change_file(&self, element_type: ElementType, id: OsmId) -> bool {
        match element_type {
            ElementType::Node => {
                self.created_nodes.contains(&id)
                    || self.modified_nodes.contains(&id)
                    || self.deleted_nodes.contains(&id)
            }
            ElementType::Way => {
                self.created_ways.contains(&id)
                    || self.modified_ways.contains(&id)
                    || self.deleted_ways.contains(&id)
            }
            ElementType::Relation => {
                self.created_relations.contains(&id)
                    || self.modified_relations.contains(&id)
                    || self.deleted_relations.contains(&id)
            }
        }
    }

    pub fn mark_modified_area(&mut self, id: OsmId) {
        self.modified_areas.insert(id);
    }

    /// Schedules a way for geometry refresh. A way already in the change
    /// file is skipped; a way previously collected as referenced is
    /// promoted, keeping the referenced set disjoint from the refresh set.
    pub fn add_way_to_refresh(&mut self, id: OsmId) -> bool {
        if self.in_change_file(ElementType::Way, id) {
            return false;
        }
        self.referenced_ways.remove(&id);
        self.ways_to_refresh_geo.insert(id)
    }

    /// Schedules a relation for geometry refresh, with the same promotion
    /// rule as `add_way_to_refresh`.
    pub fn add_relation_to_refresh(&mut self, id: OsmId) -> bool {
        if self.in_change_file(ElementType::Relation, id) {
            return false;
        }
        self.referenced_relations.remove(&id);
        self.relations_to_refresh_geo.insert(id)
    }

    pub fn add_referenced_node(&mut self, id: OsmId) -> bool {
        if self.in_change_file(ElementType::Node, id) {
            return false;
        }
        self.referenced_nodes.insert(id)
    }

    pub fn add_referenced_way(&mut self, id: OsmId) -> bool {
        if self.in_change_file(ElementType::Way, id) || self.ways_to_refresh_geo.contains(&id) {
            return false;
        }
        self.referenced_ways.insert(id)
    }

    pub fn add_referenced_relation(&mut self, id: OsmId) -> bool {
        if self.in_change_file(ElementType::Relation, id)
            || self.relations_to_refresh_geo.contains(&id)
        {
            return false;
        }
        self.referenced_relations.insert(id)
    }

    /// Drops referenced ids that turned out to be part of the change file.
    ///
    /// During streaming classification a member reference can be collected
    /// before its target element is read from the same change file.
    pub fn reconcile_referenced(&mut self) {
        let stale: Vec<OsmId> = self
            .referenced_nodes
            .iter()
            .copied()
            .filter(|id| self.in_change_file(ElementType::Node, *id))
            .collect();
        for id in stale {
            self.referenced_nodes.remove(&id);
        }
        let stale: Vec<OsmId> = self
            .referenced_ways
            .iter()
            .copied()
            .filter(|id| self.in_change_file(ElementType::Way, *id))
            .collect();
        for id in stale {
            self.referenced_ways.remove(&id);
        }
        let stale: Vec<OsmId> = self
            .referenced_relations
            .iter()
            .copied()
            .filter(|id| self.in_change_file(ElementType::Relation, *id))
            .collect();
        for id in stale {
            self.referenced_relations.remove(&id);
        }
    }

    /// Membership in the insert set used by the triple filter: created and
    /// modified elements of the kind, plus geometry-refresh ways/relations.
    pub fn in_insert_set(&self, element_type: ElementType, id: OsmId) -> bool {
        match element_type {
            ElementType::Node => {
                self.created_nodes.contains(&id) || self.modified_nodes.contains(&id)
            }
            ElementType::Way => {
                self.created_ways.contains(&id)
                    || self.modified_ways.contains(&id)
                    || self.ways_to_refresh_geo.contains(&id)
            }
            ElementType::Relation => {
                self.created_relations.contains(&id)
                    || self.modified_relations.contains(&id)
                    || self.relations_to_refresh_geo.contains(&id)
            }
        }
    }

    /// Ids whose triples must be deleted for the given kind: modified and
    /// deleted elements, plus the kind's geometry-refresh set.
    pub fn delete_set(&self, element_type: ElementType) -> BTreeSet<OsmId> {
        let mut ids = BTreeSet::new();
        match element_type {
            ElementType::Node => {
                ids.extend(&self.modified_nodes);
                ids.extend(&self.deleted_nodes);
            }
            ElementType::Way => {
                ids.extend(&self.modified_ways);
                ids.extend(&self.deleted_ways);
                ids.extend(&self.ways_to_refresh_geo);
            }
            ElementType::Relation => {
                ids.extend(&self.modified_relations);
                ids.extend(&self.deleted_relations);
                ids.extend(&self.relations_to_refresh_geo);
            }
        }
        ids
    }

    pub fn summary(&self) -> String {
        format!(
            "nodes {}/{}/{}, ways {}/{}/{}, relations {}/{}/{}, \
             refresh ways {}, refresh relations {}, referenced {}/{}/{}",
            self.created_nodes.len(),
            self.modified_nodes.len(),
            self.deleted_nodes.len(),
            self.created_ways.len(),
            self.modified_ways.len(),
            self.deleted_ways.len(),
            self.created_relations.len(),
            self.modified_relations.len(),
            self.deleted_relations.len(),
            self.ways_to_refresh_geo.len(),
            self.relations_to_refresh_geo.len(),
            self.referenced_nodes.len(),
            self.referenced_ways.len(),
            self.referenced_relations.len(),
        )
    }
}
