use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;
use std::str::FromStr;

use flate2::read::GzDecoder;
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::errors::{Error, Result};
use crate::models::{ChangeAction, ElementType, OsmId};
use crate::sets::ChangeSets;
use crate::writers::ScratchFiles;

const GZIP_SUFFIX: &str = ".gz";

/// Streaming reader for osmChange documents.
///
/// Change elements are classified into the id-set store in a single pass;
/// created and modified elements are re-serialised verbatim into the
/// per-kind scratch documents as they are encountered, so the change file
/// is never held in memory as a whole.
pub struct ChangeReader;

struct ParsedElement {
    element_type: ElementType,
    id: OsmId,
    xml: String,
    // node ids referenced via <nd ref="..."/>
    way_refs: Vec<OsmId>,
    // (kind, id) pairs referenced via <member .../>
    relation_members: Vec<(ElementType, OsmId)>,
    type_tag: Option<String>,
}

impl ChangeReader {
    /// Reads one change file, decompressing by `.gz` suffix, and populates
    /// the id-set store and the scratch documents.
    pub fn read(path: &Path, sets: &mut ChangeSets, scratch: &mut ScratchFiles) -> Result<()> {
        let file = File::open(path)?;
        let input: Box<dyn BufRead> = if path
            .to_string_lossy()
            .ends_with(GZIP_SUFFIX)
        {
            Box::new(BufReader::new(GzDecoder::new(BufReader::new(file))))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);

        let mut action: Option<ChangeAction> = None;
        let mut saw_root = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.name().as_ref() {
                    b"osmChange" => {
                        if saw_root {
                            return Err(Error::MalformedInput(
                                "nested <osmChange> element".to_string(),
                            ));
                        }
                        saw_root = true;
                    }
                    tag @ (b"create" | b"modify" | b"delete") => {
                        if !saw_root {
                            return Err(Error::MalformedInput(
                                "change block outside <osmChange>".to_string(),
                            ));
                        }
                        if action.is_some() {
                            return Err(Error::MalformedInput(
                                "nested change blocks".to_string(),
                            ));
                        }
                        action = Some(ChangeAction::from_str(&String::from_utf8_lossy(tag))?);
                    }
                    b"node" | b"way" | b"relation" => {
                        let Some(current_action) = action else {
                            return Err(Error::MalformedInput(
                                "OSM element outside a change block".to_string(),
                            ));
                        };
                        let start = e.to_owned();
                        let element = consume_element(&mut reader, start, false)?;
                        Self::record(element, current_action, sets, scratch)?;
                    }
                    other => {
                        return Err(Error::MalformedInput(format!(
                            "unexpected element <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"osmChange" => {
                        if saw_root {
                            return Err(Error::MalformedInput(
                                "nested <osmChange> element".to_string(),
                            ));
                        }
                        saw_root = true;
                    }
                    // an empty change block carries no elements
                    b"create" | b"modify" | b"delete" => {}
                    b"node" | b"way" | b"relation" => {
                        let Some(current_action) = action else {
                            return Err(Error::MalformedInput(
                                "OSM element outside a change block".to_string(),
                            ));
                        };
                        let start = e.to_owned();
                        let element = consume_element(&mut reader, start, true)?;
                        Self::record(element, current_action, sets, scratch)?;
                    }
                    other => {
                        return Err(Error::MalformedInput(format!(
                            "unexpected element <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                },
                Event::End(e) => match e.name().as_ref() {
                    b"create" | b"modify" | b"delete" => action = None,
                    b"osmChange" => {}
                    _ => {}
                },
                Event::Decl(_) | Event::Comment(_) | Event::Text(_) => {}
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !saw_root {
            return Err(Error::MalformedInput(
                "change file has no <osmChange> element".to_string(),
            ));
        }

        // A member reference may have been collected before its target
        // element appeared in the change file; drop those again.
        sets.reconcile_referenced();
        debug!("classified change file: {}", sets.summary());
        Ok(())
    }

    fn record(
        element: ParsedElement,
        action: ChangeAction,
        sets: &mut ChangeSets,
        scratch: &mut ScratchFiles,
    ) -> Result<()> {
        sets.classify(element.element_type, action, element.id)?;

        if action == ChangeAction::Delete {
            return Ok(());
        }

        scratch.append(element.element_type, &element.xml)?;

        for node_id in element.way_refs {
            sets.add_referenced_node(node_id);
        }
        for (member_type, member_id) in element.relation_members {
            match member_type {
                ElementType::Node => sets.add_referenced_node(member_id),
                ElementType::Way => sets.add_referenced_way(member_id),
                ElementType::Relation => sets.add_referenced_relation(member_id),
            };
        }

        if element.element_type == ElementType::Relation && action == ChangeAction::Modify {
            if let Some(rel_type) = &element.type_tag {
                if rel_type == "multipolygon" || rel_type == "boundary" {
                    sets.mark_modified_area(element.id);
                }
            }
        }
        Ok(())
    }
}

/// Reads one OSM element subtree, re-serialising it verbatim while
/// collecting its id, member references and `type` tag.
fn consume_element<R: BufRead>(
    reader: &mut Reader<R>,
    start: BytesStart<'static>,
    is_empty: bool,
) -> Result<ParsedElement> {
    let element_type = ElementType::from_str(&String::from_utf8_lossy(start.name().as_ref()))?;
    let id = parse_change_id(&required_attr(&start, b"id")?)?;

    let mut writer = Writer::new(Cursor::new(Vec::<u8>::new()));
    let mut way_refs = Vec::new();
    let mut relation_members = Vec::new();
    let mut type_tag = None;

    if is_empty {
        writer.write_event(Event::Empty(start))?;
    } else {
        writer.write_event(Event::Start(start))?;
        let mut depth = 1usize;
        let mut buf = Vec::new();
        while depth > 0 {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    depth += 1;
                    inspect_child(&e, element_type, &mut way_refs, &mut relation_members, &mut type_tag)?;
                    writer.write_event(Event::Start(e.to_owned()))?;
                }
                Event::Empty(e) => {
                    inspect_child(&e, element_type, &mut way_refs, &mut relation_members, &mut type_tag)?;
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
                Event::End(e) => {
                    depth -= 1;
                    writer.write_event(Event::End(e.to_owned()))?;
                }
                Event::Text(e) => writer.write_event(Event::Text(e.to_owned()))?,
                Event::Eof => {
                    return Err(Error::MalformedInput(format!(
                        "unexpected end of file inside <{}>",
                        element_type
                    )));
                }
                _ => {}
            }
            buf.clear();
        }
    }

    let xml = String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| Error::MalformedInput(e.to_string()))?;

    Ok(ParsedElement {
        element_type,
        id,
        xml,
        way_refs,
        relation_members,
        type_tag,
    })
}

fn inspect_child(
    e: &BytesStart,
    parent: ElementType,
    way_refs: &mut Vec<OsmId>,
    relation_members: &mut Vec<(ElementType, OsmId)>,
    type_tag: &mut Option<String>,
) -> Result<()> {
    match e.name().as_ref() {
        b"nd" if parent == ElementType::Way => {
            way_refs.push(parse_change_id(&required_attr(e, b"ref")?)?);
        }
        b"member" if parent == ElementType::Relation => {
            let member_type = ElementType::from_str(&required_attr(e, b"type")?)?;
            let member_id = parse_change_id(&required_attr(e, b"ref")?)?;
            relation_members.push((member_type, member_id));
        }
        b"tag" => {
            if required_attr(e, b"k")? == "type" {
                *type_tag = Some(required_attr(e, b"v")?);
            }
        }
        _ => {}
    }
    Ok(())
}

fn required_attr(e: &BytesStart, name: &[u8]) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::InvalidAttr)?;
        if attr.key.as_ref() == name {
            return Ok(attr.unescape_value()?.into_owned());
        }
    }
    Err(Error::MalformedInput(format!(
        "<{}> lacks attribute {:?}",
        String::from_utf8_lossy(e.name().as_ref()),
        String::from_utf8_lossy(name)
    )))
}

fn parse_change_id(value: &str) -> Result<OsmId> {
    match value.parse::<OsmId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Error::MalformedInput(format!(
            "invalid OSM identifier: {:?}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write as IoWrite;

    fn setup(dir: &std::path::Path) -> (Config, ChangeSets) {
        let config = Config {
            sparql_endpoint_uri: "http://localhost:7001".to_string(),
            scratch_dir: dir.to_path_buf(),
            ..Default::default()
        };
        (config, ChangeSets::new())
    }

    fn read_change(dir: &std::path::Path, content: &str) -> (ChangeSets, Config) {
        let (config, mut sets) = setup(dir);
        let path = dir.join("change.osc");
        std::fs::write(&path, content).unwrap();
        let mut scratch = ScratchFiles::open(&config).unwrap();
        ChangeReader::read(&path, &mut sets, &mut scratch).unwrap();
        scratch.close().unwrap();
        (sets, config)
    }

    #[test]
    fn test_classifies_and_materialises() {
        let dir = tempfile::tempdir().unwrap();
        let (sets, config) = read_change(
            dir.path(),
            r#"<osmChange version="0.6">
<modify><node id="42" lat="1.0" lon="2.0"/></modify>
<create><way id="7"><nd ref="42"/><nd ref="43"/><tag k="highway" v="path"/></way></create>
<delete><relation id="5"/></delete>
</osmChange>"#,
        );

        assert!(sets.modified_nodes.contains(&42));
        assert!(sets.created_ways.contains(&7));
        assert!(sets.deleted_relations.contains(&5));
        // node 42 is in the change file, only 43 becomes a reference
        assert!(!sets.referenced_nodes.contains(&42));
        assert!(sets.referenced_nodes.contains(&43));

        let nodes = std::fs::read_to_string(config.node_scratch_path()).unwrap();
        assert!(nodes.contains(r#"<node id="42" lat="1.0" lon="2.0"/>"#));
        let ways = std::fs::read_to_string(config.way_scratch_path()).unwrap();
        assert!(ways.contains(r#"<nd ref="42"/>"#));
        assert!(ways.contains(r#"<tag k="highway" v="path"/>"#));
        // deleted elements are not materialised
        let relations = std::fs::read_to_string(config.relation_scratch_path()).unwrap();
        assert!(!relations.contains("relation id=\"5\""));
    }

    #[test]
    fn test_relation_members_are_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let (sets, _) = read_change(
            dir.path(),
            r#"<osmChange version="0.6">
<create><relation id="9">
<member type="node" ref="1" role="admin_centre"/>
<member type="way" ref="2" role="outer"/>
<member type="relation" ref="3" role=""/>
<tag k="type" v="boundary"/>
</relation></create>
</osmChange>"#,
        );
        assert!(sets.referenced_nodes.contains(&1));
        assert!(sets.referenced_ways.contains(&2));
        assert!(sets.referenced_relations.contains(&3));
        // created, not modified: no area marking
        assert!(sets.modified_areas.is_empty());
    }

    #[test]
    fn test_modified_area_detection() {
        let dir = tempfile::tempdir().unwrap();
        let (sets, _) = read_change(
            dir.path(),
            r#"<osmChange version="0.6">
<modify><relation id="8"><member type="way" ref="2" role="outer"/><tag k="type" v="multipolygon"/></relation></modify>
<modify><relation id="9"><member type="way" ref="3" role="outer"/><tag k="type" v="route"/></relation></modify>
</osmChange>"#,
        );
        assert!(sets.modified_areas.contains(&8));
        assert!(!sets.modified_areas.contains(&9));
    }

    #[test]
    fn test_reference_seen_before_change_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (sets, _) = read_change(
            dir.path(),
            r#"<osmChange version="0.6">
<modify><way id="7"><nd ref="42"/></way></modify>
<modify><node id="42" lat="1.0" lon="2.0"/></modify>
</osmChange>"#,
        );
        // the way was read first, but node 42 is in the change file
        assert!(!sets.referenced_nodes.contains(&42));
        assert!(sets.modified_nodes.contains(&42));
    }

    #[test]
    fn test_gzip_input() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut sets) = setup(dir.path());
        let path = dir.path().join("change.osc.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder
            .write_all(
                br#"<osmChange version="0.6"><modify><node id="42" lat="1.0" lon="2.0"/></modify></osmChange>"#,
            )
            .unwrap();
        encoder.finish().unwrap();

        let mut scratch = ScratchFiles::open(&config).unwrap();
        ChangeReader::read(&path, &mut sets, &mut scratch).unwrap();
        assert!(sets.modified_nodes.contains(&42));
    }

    #[test]
    fn test_duplicate_id_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut sets) = setup(dir.path());
        let path = dir.path().join("change.osc");
        std::fs::write(
            &path,
            r#"<osmChange version="0.6">
<modify><node id="42" lat="1.0" lon="2.0"/></modify>
<delete><node id="42"/></delete>
</osmChange>"#,
        )
        .unwrap();
        let mut scratch = ScratchFiles::open(&config).unwrap();
        let err = ChangeReader::read(&path, &mut sets, &mut scratch).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut sets) = setup(dir.path());
        let path = dir.path().join("change.osc");
        std::fs::write(&path, r#"<osm version="0.6"><node id="1"/></osm>"#).unwrap();
        let mut scratch = ScratchFiles::open(&config).unwrap();
        let err = ChangeReader::read(&path, &mut sets, &mut scratch).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_unknown_change_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut sets) = setup(dir.path());
        let path = dir.path().join("change.osc");
        std::fs::write(
            &path,
            r#"<osmChange version="0.6"><upsert><node id="1" lat="0.5" lon="0.5"/></upsert></osmChange>"#,
        )
        .unwrap();
        let mut scratch = ScratchFiles::open(&config).unwrap();
        let err = ChangeReader::read(&path, &mut sets, &mut scratch).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_zero_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut sets) = setup(dir.path());
        let path = dir.path().join("change.osc");
        std::fs::write(
            &path,
            r#"<osmChange version="0.6"><modify><node id="0" lat="1.0" lon="2.0"/></modify></osmChange>"#,
        )
        .unwrap();
        let mut scratch = ScratchFiles::open(&config).unwrap();
        let err = ChangeReader::read(&path, &mut sets, &mut scratch).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }
}
