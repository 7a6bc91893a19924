use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use bzip2::read::MultiBzDecoder;
use log::{debug, info};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::writers::ScratchFiles;

const OSM_XML_HEADER: &str = "<osm version=\"0.6\">";
const OSM_XML_FOOTER: &str = "</osm>";

/// Invokes the external osm2rdf converter over the scratch documents and
/// exposes its Turtle output as a line stream.
pub struct ConverterBridge<'a> {
    config: &'a Config,
}

pub struct TurtleStream {
    reader: Box<dyn BufRead>,
}

impl std::fmt::Debug for TurtleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurtleStream").finish_non_exhaustive()
    }
}

impl TurtleStream {
    pub fn lines(self) -> impl Iterator<Item = std::io::Result<String>> {
        self.reader.lines()
    }
}

impl<'a> ConverterBridge<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Concatenates the scratch documents (nodes, ways, relations) into one
    /// OSM document, runs the converter over it, and opens the resulting
    /// Turtle file.
    pub fn run(&self, scratch: &ScratchFiles) -> Result<TurtleStream> {
        let input_path = self.config.converter_input_path();
        let element_count = merge_osm_documents(&scratch.paths(), &input_path)?;
        info!("running osm2rdf over {} scratch elements", element_count);

        let output = Command::new(&self.config.osm2rdf_binary)
            .arg(&input_path)
            .arg("-o")
            .arg(&self.config.osm2rdf_output)
            .output()
            .map_err(|e| {
                Error::ConverterFailed(format!(
                    "could not launch {}: {}",
                    self.config.osm2rdf_binary.display(),
                    e
                ))
            })?;
        if !output.status.success() {
            return Err(Error::ConverterFailed(format!(
                "exit status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let turtle_path = &self.config.osm2rdf_output;
        let empty_output =
            !turtle_path.exists() || File::open(turtle_path)?.metadata()?.len() == 0;
        if element_count > 0 && empty_output {
            return Err(Error::ConverterFailed(format!(
                "converter produced no output for {} elements",
                element_count
            )));
        }

        debug!("opening converter output {}", turtle_path.display());
        open_turtle(turtle_path)
    }
}

/// Concatenates well-formed `<osm>` documents into one, returning the number
/// of element lines copied.
fn merge_osm_documents(sources: &[&PathBuf], dest: &Path) -> Result<usize> {
    let mut writer = BufWriter::new(File::create(dest)?);
    writeln!(writer, "{}", OSM_XML_HEADER)?;
    let mut element_count = 0usize;
    for source in sources {
        let reader = BufReader::new(File::open(source)?);
        for line in reader.lines() {
            let line = line?;
            if line == OSM_XML_HEADER || line == OSM_XML_FOOTER {
                continue;
            }
            writeln!(writer, "{}", line)?;
            element_count += 1;
        }
    }
    writeln!(writer, "{}", OSM_XML_FOOTER)?;
    writer.flush()?;
    Ok(element_count)
}

fn open_turtle(path: &Path) -> Result<TurtleStream> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "bz2") {
        Box::new(BufReader::new(MultiBzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(TurtleStream { reader })
}
