use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetmapError {
    #[error("source {name} has no scrape address configured")]
    SourceUnconfigured { name: &'static str },

    #[error("scrape transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metric family {family} missing from scrape response")]
    MissingMetricFamily { family: String },

    #[error("collect cancelled for source {name}")]
    Cancelled { name: &'static str },

    #[error("failed to resolve local outbound address: {0}")]
    LocalAddr(String),

    #[error("failed to read socket tables: {0}")]
    SocketTable(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("metrics error: {0}")]
    MetricsError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FleetmapError>;
