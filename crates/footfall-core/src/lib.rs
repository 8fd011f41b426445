pub mod analyzer;
pub mod config;
pub mod error;
pub mod filter;
pub mod geo;
pub mod hit;
pub mod memory;
pub mod processor;
pub mod referrer;
pub mod screen;
pub mod stats;
pub mod store;
pub mod visitor;

pub use analyzer::Analyzer;
pub use config::{Config, TrackerConfig};
pub use error::{ConfigError, StoreError};
pub use filter::{Filter, Platform, Predicates};
pub use geo::GeoDb;
pub use hit::{Hit, HitOptions};
pub use processor::Processor;
pub use store::{DayRange, QueryParams, Store};
