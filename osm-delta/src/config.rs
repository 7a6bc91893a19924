use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};

/// Default cap for the number of VALUES entries per SPARQL query.
pub const MAX_VALUES_PER_QUERY: usize = 1024;

const NODE_SCRATCH_FILE: &str = "nodes.osm";
const WAY_SCRATCH_FILE: &str = "ways.osm";
const RELATION_SCRATCH_FILE: &str = "relations.osm";
const CONVERTER_INPUT_FILE: &str = "input.osm";
const TRIPLE_BUFFER_FILE: &str = "filtered.ttl";

/// Runtime configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target SPARQL endpoint.
    pub sparql_endpoint_uri: String,
    /// Named graph for DELETE/INSERT; default graph when absent.
    pub graph_uri: Option<String>,
    /// Base URL of the replication source serving state and change files.
    pub osm_change_file_directory_uri: String,
    /// Directory downloaded change files are cached in.
    pub change_file_dir: PathBuf,
    /// Directory holding the scratch OSM-XML documents and the filtered
    /// triples buffer.
    pub scratch_dir: PathBuf,
    /// Path to the external osm2rdf binary.
    pub osm2rdf_binary: PathBuf,
    /// Turtle file the converter writes; a `.bz2` suffix is honoured.
    pub osm2rdf_output: PathBuf,
    /// When set, every query sent to the endpoint is appended to
    /// `path_to_sparql_query_output`.
    pub write_sparql_queries_to_file: bool,
    pub path_to_sparql_query_output: PathBuf,
    /// Cap for VALUES entries per query. Deletes divide this per kind.
    pub max_values_per_query: usize,
    /// Whether pass B of the resolver also follows relations referencing
    /// relations. Off by default: osm2rdf does not calculate geometries for
    /// relations that reference other relations.
    pub fetch_relations_referencing_relations: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sparql_endpoint_uri: String::new(),
            graph_uri: None,
            osm_change_file_directory_uri: String::new(),
            change_file_dir: PathBuf::from("."),
            scratch_dir: PathBuf::from("."),
            osm2rdf_binary: PathBuf::from("osm2rdf"),
            osm2rdf_output: PathBuf::from("osm2rdf-output.ttl"),
            write_sparql_queries_to_file: false,
            path_to_sparql_query_output: PathBuf::from("sparql-queries.txt"),
            max_values_per_query: MAX_VALUES_PER_QUERY,
            fetch_relations_referencing_relations: false,
        }
    }
}

impl Config {
    /// Checks that every option the engine itself needs is present.
    pub fn validate(&self) -> Result<()> {
        if self.sparql_endpoint_uri.is_empty() {
            return Err(Error::Config("sparqlEndpointUri is required".to_string()));
        }
        if self.max_values_per_query == 0 {
            return Err(Error::Config("maxValuesPerQuery must be positive".to_string()));
        }
        Ok(())
    }

    /// Additionally required when following a replication server.
    pub fn validate_for_replication(&self) -> Result<()> {
        self.validate()?;
        if self.osm_change_file_directory_uri.is_empty() {
            return Err(Error::Config(
                "osmChangeFileDirectoryUri is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn node_scratch_path(&self) -> PathBuf {
        self.scratch_dir.join(NODE_SCRATCH_FILE)
    }

    pub fn way_scratch_path(&self) -> PathBuf {
        self.scratch_dir.join(WAY_SCRATCH_FILE)
    }

    pub fn relation_scratch_path(&self) -> PathBuf {
        self.scratch_dir.join(RELATION_SCRATCH_FILE)
    }

    pub fn converter_input_path(&self) -> PathBuf {
        self.scratch_dir.join(CONVERTER_INPUT_FILE)
    }

    pub fn triple_buffer_path(&self) -> PathBuf {
        self.scratch_dir.join(TRIPLE_BUFFER_FILE)
    }

    pub fn change_file_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.change_file_dir).join(file_name)
    }
}
