//! Parser for SPARQL XML result documents (`application/sparql-results+xml`).

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::errors::{Error, Result};

/// One result row: binding name to lexical value. URIs, literals and blank
/// node labels are all carried as their plain text.
pub type Row = HashMap<String, String>;

/// Looks up a binding that the issued query guarantees to be present.
pub fn binding<'r>(row: &'r Row, name: &str) -> Result<&'r str> {
    row.get(name).map(String::as_str).ok_or_else(|| {
        Error::MalformedUpstreamData(format!("result row lacks binding ?{}", name))
    })
}

/// Parses a SPARQL XML result document into rows of bindings.
pub fn parse_select_response(xml: &str) -> Result<Vec<Row>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut rows: Vec<Row> = Vec::new();
    let mut current_row: Option<Row> = None;
    let mut binding_name: Option<String> = None;
    let mut capturing = false;
    let mut saw_sparql = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"sparql" => saw_sparql = true,
                b"result" => current_row = Some(Row::new()),
                b"binding" => {
                    let mut name = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(quick_xml::Error::InvalidAttr)?;
                        if attr.key.as_ref() == b"name" {
                            name = Some(attr.unescape_value()?.into_owned());
                        }
                    }
                    binding_name = Some(name.ok_or_else(|| {
                        Error::MalformedUpstreamData(
                            "binding without name attribute".to_string(),
                        )
                    })?);
                }
                b"uri" | b"literal" | b"bnode" => {
                    capturing = true;
                    if let (Some(row), Some(name)) = (current_row.as_mut(), binding_name.as_ref()) {
                        row.entry(name.clone()).or_default();
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if let b"uri" | b"literal" | b"bnode" = e.local_name().as_ref() {
                    if let (Some(row), Some(name)) = (current_row.as_mut(), binding_name.as_ref()) {
                        row.entry(name.clone()).or_default();
                    }
                }
            }
            Event::Text(e) if capturing => {
                if let (Some(row), Some(name)) = (current_row.as_mut(), binding_name.as_ref()) {
                    let text = e.unescape()?;
                    row.entry(name.clone()).or_default().push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"result" => {
                    if let Some(row) = current_row.take() {
                        rows.push(row);
                    }
                }
                b"binding" => binding_name = None,
                b"uri" | b"literal" | b"bnode" => capturing = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_sparql {
        return Err(Error::MalformedUpstreamData(
            "response is not a SPARQL XML result document".to_string(),
        ));
    }
    Ok(rows)
}
