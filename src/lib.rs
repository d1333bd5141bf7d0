pub mod config;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod harvest;
pub mod normalize;
pub mod report;

pub use config::{load_config, presets, Config, Endpoint, EndpointSpec};
pub use export::{write_result_set, OutputFormat, OutputTarget};
pub use extract::{ExtractError, MissingFieldPolicy, Record, ResultSet, Value};
pub use fetch::{HttpFetcher, PageFetcher};
pub use harvest::{Harvest, Harvester};
pub use report::RunReport;
