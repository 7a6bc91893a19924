use std::path::Path;

use clap::Args;

use osm_delta::engine::ChangeEngine;

use super::EndpointArgs;

#[derive(Args, Debug)]
pub struct ApplyCommand {
    /// path to the osmChange file (.osc or .osc.gz)
    #[clap(short, long, value_parser)]
    file: String,

    #[clap(flatten)]
    endpoint: EndpointArgs,
}

impl ApplyCommand {
    pub fn run(self) -> anyhow::Result<()> {
        blue!("Applying ");
        dark_yellow!("{} ", &self.file);
        blue!("to ");
        dark_yellow!("{}", &self.endpoint.to_config().sparql_endpoint_uri);
        println!("...");

        let engine = ChangeEngine::new(self.endpoint.to_config())?;
        let report = engine.apply_change_file(Path::new(&self.file))?;

        println!(
            "{} triples inserted, {} ways and {} relations refreshed",
            report.inserted_triples, report.ways_refreshed, report.relations_refreshed
        );
        Ok(())
    }
}
