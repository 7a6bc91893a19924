use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::errors::Result;
use crate::models::ElementType;

const OSM_XML_HEADER: &str = "<osm version=\"0.6\">";
const OSM_XML_FOOTER: &str = "</osm>";

/// The three per-kind OSM-XML scratch documents fed to the converter.
///
/// Each document is truncated on open, written append-only (one element per
/// line) and closed with `</osm>` before the converter runs. The files only
/// live for one engine run.
pub struct ScratchFiles {
    nodes: BufWriter<File>,
    ways: BufWriter<File>,
    relations: BufWriter<File>,
    node_path: PathBuf,
    way_path: PathBuf,
    relation_path: PathBuf,
    closed: bool,
}

impl ScratchFiles {
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.scratch_dir)?;
        let node_path = config.node_scratch_path();
        let way_path = config.way_scratch_path();
        let relation_path = config.relation_scratch_path();

        let mut nodes = BufWriter::new(File::create(&node_path)?);
        let mut ways = BufWriter::new(File::create(&way_path)?);
        let mut relations = BufWriter::new(File::create(&relation_path)?);
        writeln!(nodes, "{}", OSM_XML_HEADER)?;
        writeln!(ways, "{}", OSM_XML_HEADER)?;
        writeln!(relations, "{}", OSM_XML_HEADER)?;

        Ok(Self {
            nodes,
            ways,
            relations,
            node_path,
            way_path,
            relation_path,
            closed: false,
        })
    }

    /// Appends one serialised OSM element to the document of its kind.
    pub fn append(&mut self, element_type: ElementType, xml: &str) -> Result<()> {
        let writer = match element_type {
            ElementType::Node => &mut self.nodes,
            ElementType::Way => &mut self.ways,
            ElementType::Relation => &mut self.relations,
        };
        writeln!(writer, "{}", xml)?;
        Ok(())
    }

    /// Writes the closing `</osm>` to all three documents and flushes them.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for writer in [&mut self.nodes, &mut self.ways, &mut self.relations] {
            writeln!(writer, "{}", OSM_XML_FOOTER)?;
            writer.flush()?;
        }
        self.closed = true;
        Ok(())
    }

    /// Paths in converter input order: nodes, ways, relations.
    pub fn paths(&self) -> [&PathBuf; 3] {
        [&self.node_path, &self.way_path, &self.relation_path]
    }

    /// Removes the scratch documents from disk.
    pub fn remove(self) -> Result<()> {
        for path in [&self.node_path, &self.way_path, &self.relation_path] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
