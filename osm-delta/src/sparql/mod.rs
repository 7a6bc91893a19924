mod client;
pub mod queries;
mod results;

pub use client::{HttpClient, SparqlClient};
pub use results::{binding, Row};
