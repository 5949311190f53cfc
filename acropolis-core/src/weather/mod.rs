// Weather data access: EDR client and CoverageJSON decoding

pub mod client;
pub mod coverage;

pub use client::{EdrWeatherClient, GeoPoint, QueryType, SeriesRequest, SeriesSource};
pub use coverage::{parse_timestamp, Coverage};
