use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Spreadsheet source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("Schema mismatch in {table}: missing required column(s) {missing:?}")]
    SchemaMismatch { table: String, missing: Vec<String> },

    #[error("{table} not built; run {stage} first")]
    NotBuilt { table: String, stage: &'static str },

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics export failed: {0}")]
    Metrics(String),
}

impl EtlError {
    pub fn schema_mismatch(table: &str, missing: Vec<String>) -> Self {
        EtlError::SchemaMismatch {
            table: table.to_string(),
            missing,
        }
    }

    /// Short machine-readable kind, used in the run ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::SourceUnreachable(_) | EtlError::Http(_) => "source_unreachable",
            EtlError::SchemaMismatch { .. } => "schema_mismatch",
            EtlError::NotBuilt { .. } => "not_built",
            EtlError::Database(_) | EtlError::Sqlite(_) => "database",
            #[cfg(feature = "postgres")]
            EtlError::Postgres(_) => "database",
            EtlError::Config(_) | EtlError::Toml(_) => "config",
            EtlError::Metrics(_) => "metrics",
            EtlError::Csv(_) | EtlError::Json(_) | EtlError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
