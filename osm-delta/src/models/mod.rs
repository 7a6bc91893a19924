use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// OSM identifier. Strictly positive; the element kind is always carried
/// alongside it and never embedded in the value.
pub type OsmId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Node => "node",
            ElementType::Way => "way",
            ElementType::Relation => "relation",
        }
    }
}

impl FromStr for ElementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(ElementType::Node),
            "way" => Ok(ElementType::Way),
            "relation" => Ok(ElementType::Relation),
            _ => Err(Error::MalformedInput(format!("illegal element type: {}", s))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three operations an osmChange block can apply to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Create,
    Modify,
    Delete,
}

impl FromStr for ChangeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "modify" => Ok(ChangeAction::Modify),
            "delete" => Ok(ChangeAction::Delete),
            _ => Err(Error::MalformedInput(format!("unknown change tag: <{}>", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMember {
    pub member_id: OsmId,
    pub member_type: ElementType,
    pub role: String,
}

/// A stand-in node rebuilt from the triple store.
///
/// The coordinates keep the lexical form extracted from the store's WKT
/// literal so that feeding the node back through osm2rdf reproduces the
/// stored geometry digit for digit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: OsmId,
    pub lat: String,
    pub lon: String,
}

impl Node {
    pub fn new(id: OsmId, lon: impl Into<String>, lat: impl Into<String>) -> Self {
        Self {
            id,
            lat: lat.into(),
            lon: lon.into(),
        }
    }

    /// Renders the node as a self-closing OSM XML element,
    /// e.g. `<node id="1" lat="48.1" lon="7.8"/>`.
    pub fn xml(&self) -> String {
        format!(
            "<node id=\"{}\" lat=\"{}\" lon=\"{}\"/>",
            self.id,
            escape(&self.lat),
            escape(&self.lon)
        )
    }
}

/// A way rebuilt from the triple store. Referenced ways carry members only;
/// ways whose geometry is being refreshed additionally carry their tags and
/// timestamp so that osm2rdf recomputes the full geometry triples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Way {
    pub id: OsmId,
    pub timestamp: Option<DateTime<Utc>>,
    pub members: Vec<OsmId>,
    pub tags: Vec<Tag>,
}

impl Way {
    pub fn new(id: OsmId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn add_member(&mut self, node_id: OsmId) {
        self.members.push(node_id);
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.push(Tag::new(key, value));
    }

    /// Renders the way as an OSM XML element.
    ///
    /// For id `1` and members `{1, 2, 3}` this yields
    /// `<way id="1"><nd ref="1"/><nd ref="2"/><nd ref="3"/></way>`.
    pub fn xml(&self) -> String {
        let timestamp = match &self.timestamp {
            Some(ts) => format!(" timestamp=\"{}\"", ts.format("%Y-%m-%dT%H:%M:%SZ")),
            None => String::new(),
        };
        let mut xml = format!("<way id=\"{}\"{}>", self.id, timestamp);
        for node_id in &self.members {
            xml.push_str(&format!("<nd ref=\"{}\"/>", node_id));
        }
        for tag in &self.tags {
            xml.push_str(&format!(
                "<tag k=\"{}\" v=\"{}\"/>",
                escape(&tag.key),
                escape(&tag.value)
            ));
        }
        xml.push_str("</way>");
        xml
    }
}

/// A relation rebuilt from the triple store. The member order is the order
/// established by the store's position predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: OsmId,
    pub rel_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub members: Vec<RelationMember>,
    pub tags: Vec<Tag>,
}

impl Relation {
    pub fn new(id: OsmId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn set_type(&mut self, rel_type: impl Into<String>) {
        self.rel_type = rel_type.into();
    }

    pub fn add_member(&mut self, member: RelationMember) {
        self.members.push(member);
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.push(Tag::new(key, value));
    }

    /// Renders the relation as an OSM XML element with its members in
    /// stored order and a `type` tag carrying the relation type.
    pub fn xml(&self) -> String {
        let timestamp = match &self.timestamp {
            Some(ts) => format!(" timestamp=\"{}\"", ts.format("%Y-%m-%dT%H:%M:%SZ")),
            None => String::new(),
        };
        let mut xml = format!("<relation id=\"{}\"{}>", self.id, timestamp);
        for member in &self.members {
            xml.push_str(&format!(
                "<member type=\"{}\" ref=\"{}\" role=\"{}\"/>",
                member.member_type,
                member.member_id,
                escape(&member.role)
            ));
        }
        for tag in &self.tags {
            xml.push_str(&format!(
                "<tag k=\"{}\" v=\"{}\"/>",
                escape(&tag.key),
                escape(&tag.value)
            ));
        }
        if !self.rel_type.is_empty() {
            xml.push_str(&format!("<tag k=\"type\" v=\"{}\"/>", escape(&self.rel_type)));
        }
        xml.push_str("</relation>");
        xml
    }
}

/// Parses the numeric suffix of an OSM URI into an identifier.
///
/// Zero is rejected on purpose: it guards against stripped or empty URI
/// suffixes coming back from the store.
pub fn parse_id(suffix: &str) -> Result<OsmId, Error> {
    match suffix.parse::<OsmId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Error::MalformedUpstreamData(format!(
            "invalid OSM identifier: {:?}",
            suffix
        ))),
    }
}
