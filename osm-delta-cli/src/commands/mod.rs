mod apply;
mod sync;

use clap::{Args, Subcommand};

use osm_delta::config::Config;

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a local osmChange file to the SPARQL endpoint
    Apply(apply::ApplyCommand),
    /// Catch the SPARQL endpoint up with an OSM replication server
    Sync(sync::SyncCommand),
}

impl Commands {
    pub fn run(self) -> anyhow::Result<()> {
        match self {
            Commands::Apply(command) => command.run(),
            Commands::Sync(command) => command.run(),
        }
    }
}

/// Options shared by every command that talks to the endpoint.
#[derive(Args, Debug)]
pub struct EndpointArgs {
    /// SPARQL endpoint URI
    #[clap(short, long, value_parser)]
    endpoint: String,

    /// named graph receiving the updates; default graph when omitted
    #[clap(long, value_parser)]
    graph: Option<String>,

    /// directory for the scratch OSM documents
    #[clap(long, value_parser, default_value = "./scratch")]
    scratch_dir: String,

    /// path to the osm2rdf binary
    #[clap(long, value_parser, default_value = "osm2rdf")]
    osm2rdf: String,

    /// Turtle file the converter writes
    #[clap(long, value_parser, default_value = "./scratch/osm2rdf-output.ttl")]
    osm2rdf_output: String,

    /// append every issued SPARQL query to the audit file
    #[clap(long)]
    write_queries: bool,

    /// audit file for --write-queries
    #[clap(long, value_parser, default_value = "./sparql-queries.txt")]
    query_output: String,

    /// VALUES entries per SPARQL query
    #[clap(long, value_parser, default_value_t = 1024)]
    max_values_per_query: usize,

    /// also refresh relations that reference modified area relations
    #[clap(long)]
    follow_relation_relations: bool,
}

impl EndpointArgs {
    pub fn to_config(&self) -> Config {
        Config {
            sparql_endpoint_uri: self.endpoint.clone(),
            graph_uri: self.graph.clone(),
            scratch_dir: self.scratch_dir.clone().into(),
            osm2rdf_binary: self.osm2rdf.clone().into(),
            osm2rdf_output: self.osm2rdf_output.clone().into(),
            write_sparql_queries_to_file: self.write_queries,
            path_to_sparql_query_output: self.query_output.clone().into(),
            max_values_per_query: self.max_values_per_query,
            fetch_relations_referencing_relations: self.follow_relation_relations,
            ..Default::default()
        }
    }
}
