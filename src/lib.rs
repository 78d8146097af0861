pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod schema;
pub mod storage;
pub mod types;

// Spreadsheet tabs in, typed records through the layers
pub mod domain;
pub mod pipeline;
pub mod source;

pub mod observability;
