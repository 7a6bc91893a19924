mod bridge;
mod filter;

pub use bridge::{ConverterBridge, TurtleStream};
pub use filter::{Triple, TripleFilter};
