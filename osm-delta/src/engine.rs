//! The change application pipeline.
//!
//! One run is strictly linear: classify the change file, widen the refresh
//! and reference sets against the store, materialise stand-in objects, run
//! the converter, filter its output, then issue deletes and inserts. All
//! state is owned by the engine; nothing is shared across threads.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::config::Config;
use crate::convert::{ConverterBridge, TripleFilter};
use crate::errors::Result;
use crate::fetcher::StoreFetcher;
use crate::readers::ChangeReader;
use crate::resolver::DependencyResolver;
use crate::sets::ChangeSets;
use crate::sparql::{HttpClient, SparqlClient};
use crate::update::UpdateDispatcher;
use crate::writers::ScratchFiles;

/// Outcome of one applied change file.
#[derive(Debug)]
pub struct EngineReport {
    pub inserted_triples: usize,
    pub ways_refreshed: usize,
    pub relations_refreshed: usize,
}

pub struct ChangeEngine {
    config: Config,
}

impl ChangeEngine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Applies one osmChange file against the configured endpoint.
    pub fn apply_change_file(&self, path: &Path) -> Result<EngineReport> {
        let mut client = HttpClient::new(&self.config)?;
        self.apply_with_client(path, &mut client)
    }

    /// Same as [`apply_change_file`](Self::apply_change_file), with the
    /// SPARQL client supplied by the caller.
    pub fn apply_with_client(
        &self,
        path: &Path,
        client: &mut dyn SparqlClient,
    ) -> Result<EngineReport> {
        info!("applying change file {}", path.display());

        let mut sets = ChangeSets::new();
        let mut scratch = ScratchFiles::open(&self.config)?;
        ChangeReader::read(path, &mut sets, &mut scratch)?;
        info!("change file classified: {}", sets.summary());

        DependencyResolver::new(client, &self.config).resolve(&mut sets)?;
        StoreFetcher::new(client, &self.config).materialise_dummies(&sets, &mut scratch)?;

        let stream = ConverterBridge::new(&self.config).run(&scratch)?;
        let triples = TripleFilter::new(&sets).filter_lines(stream.lines())?;
        self.write_triple_buffer(&triples)?;
        info!("filter kept {} triples for insertion", triples.len());

        UpdateDispatcher::new(client, &self.config).run(&sets, &triples)?;

        let report = EngineReport {
            inserted_triples: triples.len(),
            ways_refreshed: sets.ways_to_refresh_geo.len(),
            relations_refreshed: sets.relations_to_refresh_geo.len(),
        };

        scratch.remove()?;
        let converter_input = self.config.converter_input_path();
        if converter_input.exists() {
            std::fs::remove_file(converter_input)?;
        }

        Ok(report)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn write_triple_buffer(&self, triples: &[crate::convert::Triple]) -> Result<()> {
        let mut buffer = BufWriter::new(File::create(self.config.triple_buffer_path())?);
        for triple in triples {
            writeln!(buffer, "{}", triple.line())?;
        }
        buffer.flush()?;
        Ok(())
    }
}
