//! Filters the converter's Turtle output down to the relevant triples.
//!
//! osm2rdf emits triples grouped by subject, with blank-node link lines
//! immediately following the triple that introduced them. The filter keeps
//! a triple when its subject belongs to the insert set of its kind, and
//! keeps blank-node continuations of kept triples. Everything else (other
//! subjects, prefix directives) is dropped.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Error, Result};
use crate::models::{parse_id, ElementType, OsmId};
use crate::sets::ChangeSets;
use crate::vocab::{
    NODE_NAMESPACES, RELATION_LINK_PREDICATES, RELATION_NAMESPACES, WAY_LINK_PREDICATES,
    WAY_NAMESPACES,
};

/// Predicate linking a subject to its geometry object; continuations of a
/// kept subject through it are kept as well.
const GEOMETRY_LINK_PREDICATE: &str = "geo:hasGeometry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    pub fn line(&self) -> String {
        format!("{} {} {} .", self.subject, self.predicate, self.object)
    }
}

fn triple_pattern() -> &'static Regex {
    static TRIPLE: OnceLock<Regex> = OnceLock::new();
    TRIPLE.get_or_init(|| {
        Regex::new(r"^(\S+)\s+(\S+)\s+(.+?)\s*\.\s*$").expect("hard-coded regex")
    })
}

pub struct TripleFilter<'a> {
    sets: &'a ChangeSets,
}

impl<'a> TripleFilter<'a> {
    pub fn new(sets: &'a ChangeSets) -> Self {
        Self { sets }
    }

    /// Streams Turtle lines and returns the kept triples in input order.
    pub fn filter_lines<I>(&self, lines: I) -> Result<Vec<Triple>>
    where
        I: IntoIterator<Item = std::io::Result<String>>,
    {
        let mut kept = Vec::new();
        // the blank-node label continuing the most recently *kept* triple
        let mut current_link: Option<String> = None;
        // the label introduced by the most recent link triple, kept or not;
        // dropped subjects drag their blank-node groups along
        let mut last_link: Option<String> = None;

        for line in lines {
            let line = line?;
            let trimmed = line.trim();
            // prefix directives are re-supplied by the update dispatcher
            if trimmed.is_empty() || trimmed.starts_with('@') {
                continue;
            }
            let triple = tokenize(trimmed)?;

            if triple.subject.starts_with('_') {
                if current_link.as_deref() == Some(triple.subject.as_str()) {
                    kept.push(triple);
                    continue;
                }
                if last_link.as_deref() == Some(triple.subject.as_str()) {
                    // continuation of a dropped group
                    continue;
                }
                // blank-node link lines immediately follow the triple that
                // introduced them; anything else means the converter's
                // output ordering assumption broke
                return Err(Error::MalformedUpstreamData(format!(
                    "blank node {} does not continue the preceding link group",
                    triple.subject
                )));
            }

            match self.relevant_element(&triple.subject)? {
                Some(element_type) => {
                    current_link = link_object(element_type, &triple);
                    last_link = current_link.clone();
                    kept.push(triple);
                }
                None => {
                    current_link = None;
                    last_link = if is_link_predicate(&triple.predicate) {
                        Some(triple.object.clone())
                    } else {
                        None
                    };
                }
            }
        }
        Ok(kept)
    }

    /// Resolves the subject's kind and checks insert-set membership.
    /// Returns `None` for subjects outside all relevant namespaces or with
    /// ids that are not being inserted.
    fn relevant_element(&self, subject: &str) -> Result<Option<ElementType>> {
        for (element_type, namespaces) in [
            (ElementType::Node, &NODE_NAMESPACES),
            (ElementType::Way, &WAY_NAMESPACES),
            (ElementType::Relation, &RELATION_NAMESPACES),
        ] {
            for namespace in namespaces {
                if let Some(suffix) = subject.strip_prefix(*namespace) {
                    let id: OsmId = parse_id(suffix)?;
                    if self.sets.in_insert_set(element_type, id) {
                        return Ok(Some(element_type));
                    }
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

/// The object to expect follow-up lines for, if the predicate is
/// link-bearing for the subject's kind.
fn link_object(element_type: ElementType, triple: &Triple) -> Option<String> {
    let predicates: &[&str] = match element_type {
        ElementType::Node => &[],
        ElementType::Way => &WAY_LINK_PREDICATES,
        ElementType::Relation => &RELATION_LINK_PREDICATES,
    };
    if predicates.contains(&triple.predicate.as_str())
        || triple.predicate == GEOMETRY_LINK_PREDICATE
    {
        Some(triple.object.clone())
    } else {
        None
    }
}

fn is_link_predicate(predicate: &str) -> bool {
    WAY_LINK_PREDICATES.contains(&predicate)
        || RELATION_LINK_PREDICATES.contains(&predicate)
        || predicate == GEOMETRY_LINK_PREDICATE
}

fn tokenize(line: &str) -> Result<Triple> {
    let captures = triple_pattern().captures(line).ok_or_else(|| {
        Error::MalformedUpstreamData(format!("not a Turtle triple: {:?}", line))
    })?;
    Ok(Triple::new(&captures[1], &captures[2], &captures[3]))
}
