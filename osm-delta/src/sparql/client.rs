use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use super::results::{parse_select_response, Row};
use crate::config::Config;
use crate::errors::{Error, Result};

const MAX_ATTEMPTS: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const ACCEPT_SPARQL_RESULT_XML: &str = "application/sparql-results+xml";
const ACCEPT_QLEVER_JSON: &str = "application/qlever-results+json";

/// Access to a SPARQL endpoint.
///
/// The engine only ever needs these three operations; everything else
/// (transport, retries, auditing) is the implementation's business.
pub trait SparqlClient {
    fn select(&mut self, prefixes: &str, query: &str) -> Result<Vec<Row>>;
    fn update(&mut self, prefixes: &str, query: &str) -> Result<()>;
    fn clear_cache(&mut self) -> Result<()>;
}

/// HTTP implementation targeting a QLever endpoint.
///
/// Queries go out as `POST` form bodies (`query=<url-encoded text>`).
/// Transient transport errors are retried a bounded number of times; the
/// endpoint's structured ERROR response is surfaced as [`Error::Endpoint`].
pub struct HttpClient {
    http: reqwest::blocking::Client,
    endpoint_uri: String,
    audit_path: Option<PathBuf>,
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self> {
        let audit_path = if config.write_sparql_queries_to_file {
            // Truncate the audit file so it holds exactly this run's queries.
            File::create(&config.path_to_sparql_query_output)?;
            Some(config.path_to_sparql_query_output.clone())
        } else {
            None
        };
        Ok(Self {
            http: reqwest::blocking::Client::new(),
            endpoint_uri: config.sparql_endpoint_uri.clone(),
            audit_path,
        })
    }

    fn audit(&self, query: &str) -> Result<()> {
        if let Some(path) = &self.audit_path {
            let mut file = OpenOptions::new().append(true).open(path)?;
            writeln!(file, "{}", query)?;
        }
        Ok(())
    }

    fn post(&self, form: &[(&str, &str)], accept: &str) -> Result<String> {
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .http
                .post(self.endpoint_uri.as_str())
                .header(reqwest::header::ACCEPT, accept)
                .form(form)
                .send();
            match response {
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
                    if status.is_success() {
                        return Ok(body);
                    }
                    // A structured ERROR from the endpoint is not transient.
                    if let Some(message) = qlever_error(&body) {
                        return Err(Error::Endpoint(message));
                    }
                    last_error = format!("HTTP {}: {}", status, body);
                }
                Err(e) => last_error = e.to_string(),
            }
            if attempt < MAX_ATTEMPTS {
                warn!(
                    "request to {} failed (attempt {}/{}): {}",
                    self.endpoint_uri, attempt, MAX_ATTEMPTS, last_error
                );
                thread::sleep(RETRY_BACKOFF * attempt as u32);
            }
        }
        Err(Error::UpstreamUnavailable(last_error))
    }
}

/// Extracts the exception message from a QLever JSON ERROR envelope.
fn qlever_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    if value.get("status")?.as_str()? == "ERROR" {
        let exception = value
            .get("exception")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        Some(exception.to_string())
    } else {
        None
    }
}

impl SparqlClient for HttpClient {
    fn select(&mut self, prefixes: &str, query: &str) -> Result<Vec<Row>> {
        let full_query = format!("{}{}", prefixes, query);
        self.audit(&full_query)?;
        debug!("SELECT against {}: {}", self.endpoint_uri, query);
        let body = self.post(&[("query", full_query.as_str())], ACCEPT_SPARQL_RESULT_XML)?;
        parse_select_response(&body)
    }

    fn update(&mut self, prefixes: &str, query: &str) -> Result<()> {
        let full_query = format!("{}{}", prefixes, query);
        self.audit(&full_query)?;
        debug!("UPDATE against {}: {}", self.endpoint_uri, query);
        let body = self.post(&[("query", full_query.as_str())], ACCEPT_QLEVER_JSON)?;
        if let Some(message) = qlever_error(&body) {
            return Err(Error::Endpoint(message));
        }
        Ok(())
    }

    fn clear_cache(&mut self) -> Result<()> {
        debug!("clearing cache of {}", self.endpoint_uri);
        self.post(&[("cmd", "clear-cache")], ACCEPT_QLEVER_JSON)?;
        Ok(())
    }
}
