use clap::Args;
use log::info;

use osm_delta::engine::ChangeEngine;
use osm_delta::fetcher::StoreFetcher;
use osm_delta::replication::ReplicationClient;
use osm_delta::sparql::HttpClient;

use super::EndpointArgs;

#[derive(Args, Debug)]
pub struct SyncCommand {
    /// base URL of the replication directory, e.g.
    /// https://planet.openstreetmap.org/replication/minute
    #[clap(short, long, value_parser)]
    replication_uri: String,

    /// directory downloaded change files are cached in
    #[clap(short, long, value_parser, default_value = "./diffs")]
    change_file_dir: String,

    /// apply at most this many sequences
    #[clap(long, value_parser)]
    limit: Option<u32>,

    #[clap(flatten)]
    endpoint: EndpointArgs,
}

impl SyncCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let mut config = self.endpoint.to_config();
        config.osm_change_file_directory_uri = self.replication_uri.clone();
        config.change_file_dir = self.change_file_dir.clone().into();
        config.validate_for_replication()?;

        let engine = ChangeEngine::new(config.clone())?;
        let mut client = HttpClient::new(&config)?;
        let replication = ReplicationClient::new(&config);

        let store_timestamp =
            StoreFetcher::new(&mut client, &config).fetch_latest_node_timestamp()?;
        info!("latest node timestamp in the store: {}", store_timestamp);

        let start = replication.state_for_timestamp(store_timestamp)?;
        let latest = replication.latest_state()?;
        blue!("Syncing sequences ");
        dark_yellow!("{}..{} ", start.sequence_number, latest.sequence_number);
        blue!("from ");
        dark_yellow!("{}", &self.replication_uri);
        println!();

        let mut applied = 0u32;
        for sequence_number in start.sequence_number..=latest.sequence_number {
            if let Some(limit) = self.limit {
                if applied >= limit {
                    break;
                }
            }
            let change_file = replication.fetch_change_file(sequence_number)?;
            let report = engine.apply_with_client(&change_file, &mut client)?;
            println!(
                "sequence {}: {} triples inserted, {} ways and {} relations refreshed",
                sequence_number,
                report.inserted_triples,
                report.ways_refreshed,
                report.relations_refreshed
            );
            applied += 1;
        }

        green!("Synced ");
        println!("{} sequences", applied);
        Ok(())
    }
}
