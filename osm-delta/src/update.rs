//! Batched DELETE/INSERT protocol against the SPARQL endpoint.
//!
//! All deletes complete before the first insert. Within a phase the batch
//! order carries no meaning; every batch respects the endpoint's per-query
//! VALUES cap.

use log::info;

use crate::config::Config;
use crate::convert::Triple;
use crate::errors::Result;
use crate::models::ElementType;
use crate::sets::ChangeSets;
use crate::sparql::{queries, SparqlClient};
use crate::vocab::delete_tag;

// Each node yields about two subjects in the store (the element and its
// geometry), ways three, relations two; the delete budget divides the
// VALUES cap accordingly.
const NODE_DELETE_DIVISOR: usize = 2;
const WAY_DELETE_DIVISOR: usize = 3;
const RELATION_DELETE_DIVISOR: usize = 2;

pub struct UpdateDispatcher<'a> {
    client: &'a mut dyn SparqlClient,
    graph_uri: Option<String>,
    batch_size: usize,
}

impl<'a> UpdateDispatcher<'a> {
    pub fn new(client: &'a mut dyn SparqlClient, config: &Config) -> Self {
        Self {
            client,
            graph_uri: config.graph_uri.clone(),
            batch_size: config.max_values_per_query,
        }
    }

    /// Runs the delete phase, then the insert phase, then clears the
    /// endpoint's cache.
    pub fn run(&mut self, sets: &ChangeSets, triples: &[Triple]) -> Result<()> {
        self.delete_phase(sets)?;
        self.insert_phase(triples)?;
        self.client.clear_cache()
    }

    fn delete_phase(&mut self, sets: &ChangeSets) -> Result<()> {
        for (element_type, divisor) in [
            (ElementType::Node, NODE_DELETE_DIVISOR),
            (ElementType::Way, WAY_DELETE_DIVISOR),
            (ElementType::Relation, RELATION_DELETE_DIVISOR),
        ] {
            let ids: Vec<_> = sets.delete_set(element_type).into_iter().collect();
            if ids.is_empty() {
                continue;
            }
            let batch_size = (self.batch_size / divisor).max(1);
            info!(
                "deleting triples of {} {}s in batches of {}",
                ids.len(),
                element_type,
                batch_size
            );
            for chunk in ids.chunks(batch_size) {
                let query =
                    queries::delete_ids(delete_tag(element_type), chunk, self.graph_uri.as_deref());
                self.client.update(queries::DEFAULT_PREFIXES, &query)?;
            }
        }
        Ok(())
    }

    fn insert_phase(&mut self, triples: &[Triple]) -> Result<()> {
        if triples.is_empty() {
            return Ok(());
        }
        let groups = group_triples(triples);
        info!(
            "inserting {} triples in {} link groups",
            triples.len(),
            groups.len()
        );

        let mut batch: Vec<&[Triple]> = Vec::new();
        let mut batch_len = 0usize;
        for group in &groups {
            if batch_len + group.len() > self.batch_size && !batch.is_empty() {
                self.send_insert(&batch)?;
                batch.clear();
                batch_len = 0;
            }
            batch.push(group);
            batch_len += group.len();
        }
        if !batch.is_empty() {
            self.send_insert(&batch)?;
        }
        Ok(())
    }

    fn send_insert(&mut self, groups: &[&[Triple]]) -> Result<()> {
        let turtle = groups
            .iter()
            .map(|group| render_group(group))
            .collect::<Vec<_>>()
            .join(" ");
        let query = queries::insert_data(&turtle, self.graph_uri.as_deref());
        self.client.update(queries::DEFAULT_PREFIXES, &query)
    }
}

/// Splits the filtered triples into blank-node link groups. Each group is a
/// lead triple plus the contiguous blank-subject triples attached to it;
/// groups are atomic units for batching.
fn group_triples(triples: &[Triple]) -> Vec<&[Triple]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, triple) in triples.iter().enumerate() {
        if i > start && !triple.subject.starts_with('_') {
            groups.push(&triples[start..i]);
            start = i;
        }
    }
    if start < triples.len() {
        groups.push(&triples[start..]);
    }
    groups
}

/// Renders one group as Turtle, collapsing blank-node continuations into
/// bracketed `[ p1 o1 ; p2 o2 ]` syntax attached to the lead triple. Blank
/// labels must not cross INSERT queries, the bracket form keeps the link
/// local to its batch.
fn render_group(group: &[Triple]) -> String {
    let lead = &group[0];
    if group.len() == 1 {
        if lead.object.starts_with("_:") {
            // a link triple without continuations; an explicit blank label
            // must not leak into the query text
            return format!("{} {} [] .", lead.subject, lead.predicate);
        }
        return lead.line();
    }
    let nested = group[1..]
        .iter()
        .map(|t| format!("{} {}", t.predicate, t.object))
        .collect::<Vec<_>>()
        .join(" ; ");
    format!("{} {} [ {} ] .", lead.subject, lead.predicate, nested)
}
