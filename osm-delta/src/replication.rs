//! Follows an OSM replication server: state files, sequence numbers and
//! change file downloads.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info};
use regex::Regex;

use crate::config::Config;
use crate::errors::{Error, Result};

const STATE_FILE: &str = "state.txt";
const STATE_EXTENSION: &str = ".state.txt";
const CHANGE_FILE_EXTENSION: &str = ".osc.gz";

/// One row of the replication server's state ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationState {
    pub sequence_number: u32,
    pub timestamp: DateTime<Utc>,
}

fn sequence_pattern() -> &'static Regex {
    static SEQUENCE: OnceLock<Regex> = OnceLock::new();
    SEQUENCE.get_or_init(|| Regex::new(r"sequenceNumber=(\d+)").expect("hard-coded regex"))
}

fn timestamp_pattern() -> &'static Regex {
    static TIMESTAMP: OnceLock<Regex> = OnceLock::new();
    // state files escape the colons: 2024-08-28T09\:00\:00Z
    TIMESTAMP.get_or_init(|| {
        Regex::new(r"timestamp=(\d{4}-\d{2}-\d{2}T\d{2}\\?:\d{2}\\?:\d{2}Z)")
            .expect("hard-coded regex")
    })
}

/// Parses a replication `state.txt` document.
pub fn parse_state_file(content: &str) -> Result<ReplicationState> {
    let sequence_number = sequence_pattern()
        .captures(content)
        .and_then(|c| c[1].parse::<u32>().ok())
        .ok_or_else(|| {
            Error::MalformedUpstreamData("state file lacks a sequence number".to_string())
        })?;

    let raw_timestamp = timestamp_pattern()
        .captures(content)
        .map(|c| c[1].replace('\\', ""))
        .ok_or_else(|| {
            Error::MalformedUpstreamData("state file lacks a timestamp".to_string())
        })?;
    let timestamp = NaiveDateTime::parse_from_str(&raw_timestamp, "%Y-%m-%dT%H:%M:%SZ")
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            Error::MalformedUpstreamData(format!("invalid state timestamp: {}", raw_timestamp))
        })?;

    Ok(ReplicationState {
        sequence_number,
        timestamp,
    })
}

/// Formats a sequence number as the three-segment replication path,
/// e.g. `123456` becomes `000/123/456`.
pub fn format_sequence_for_url(sequence_number: u32) -> String {
    let padded = format!("{:09}", sequence_number);
    format!("{}/{}/{}", &padded[0..3], &padded[3..6], &padded[6..9])
}

/// Downloads state files and change files from the replication server.
pub struct ReplicationClient<'a> {
    http: reqwest::blocking::Client,
    config: &'a Config,
}

impl<'a> ReplicationClient<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            config,
        }
    }

    /// The newest state the server knows about.
    pub fn latest_state(&self) -> Result<ReplicationState> {
        let url = format!("{}/{}", self.base_url(), STATE_FILE);
        parse_state_file(&self.get(&url)?)
    }

    /// The state of one specific sequence number.
    pub fn state(&self, sequence_number: u32) -> Result<ReplicationState> {
        let url = format!(
            "{}/{}{}",
            self.base_url(),
            format_sequence_for_url(sequence_number),
            STATE_EXTENSION
        );
        parse_state_file(&self.get(&url)?)
    }

    /// Walks the sequence numbers backwards until the state's timestamp is
    /// not after the given one. Used to find where to resume after the
    /// store's own latest element timestamp.
    pub fn state_for_timestamp(&self, timestamp: DateTime<Utc>) -> Result<ReplicationState> {
        let mut state = self.latest_state()?;
        while state.timestamp > timestamp {
            if state.sequence_number == 0 {
                break;
            }
            state = self.state(state.sequence_number - 1)?;
        }
        Ok(state)
    }

    /// Downloads the gzip-compressed change file of a sequence number into
    /// the change file directory and returns its path.
    pub fn fetch_change_file(&self, sequence_number: u32) -> Result<PathBuf> {
        let url = format!(
            "{}/{}{}",
            self.base_url(),
            format_sequence_for_url(sequence_number),
            CHANGE_FILE_EXTENSION
        );
        info!("fetching change file {}", url);
        let body = self.get_bytes(&url)?;

        fs::create_dir_all(&self.config.change_file_dir)?;
        let path = self
            .config
            .change_file_path(&format!("{}{}", sequence_number, CHANGE_FILE_EXTENSION));
        fs::write(&path, body)?;
        debug!("cached change file at {}", path.display());
        Ok(path)
    }

    fn base_url(&self) -> &str {
        self.config
            .osm_change_file_directory_uri
            .trim_end_matches('/')
    }

    fn get(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "GET {} returned HTTP {}",
                url,
                response.status()
            )));
        }
        response
            .text()
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "GET {} returned HTTP {}",
                url,
                response.status()
            )));
        }
        Ok(response
            .bytes()
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?
            .to_vec())
    }
}
