use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for a change application run.
///
/// Any of these is fatal to the whole run; there is no partial-commit
/// recovery. Deletes are idempotent and inserts are idempotent once the
/// delete phase completed, so the caller retries by re-running the same
/// change file.
#[derive(Debug, Error)]
pub enum Error {
    /// The change file is not parseable or violates the OSM schema.
    #[error("malformed change file: {0}")]
    MalformedInput(String),

    /// A SPARQL result lacks expected bindings or contains unparseable URIs.
    #[error("malformed data from SPARQL endpoint: {0}")]
    MalformedUpstreamData(String),

    /// The SPARQL endpoint stayed unreachable after retries.
    #[error("SPARQL endpoint unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The endpoint answered with its structured ERROR response.
    #[error("SPARQL endpoint returned ERROR: {0}")]
    Endpoint(String),

    /// osm2rdf exited non-zero or emitted nothing for a non-empty input.
    #[error("osm2rdf converter failed: {0}")]
    ConverterFailed(String),

    /// A required configuration option is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}
