use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// Every fallible operation in the crate returns this error type. Transport
/// failures are passed through untouched, the only failure the crate
/// recovers from on its own is a file that is not rendered yet.
#[derive(Error, Debug)]
pub enum Error {
    /// The camera address given on the command line could not be turned
    /// into a usable base url.
    #[error("invalid camera url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    /// Connection refused, dns failure, client timeout etc.
    #[error("http error for url: {url}")]
    Http {
        source: reqwest::Error,
        url: String,
    },
    /// Local file system failure while writing images or csv files.
    #[error("IO error")]
    Io(#[from] std::io::Error),
    /// The camera never made the committed file available for download.
    #[error("camera did not render {file} within {waited:?}")]
    RenderTimeout { file: String, waited: Duration },
    /// A resource reply that the caller needed to interpret was not in
    /// the expected shape.
    #[error("unexpected reply {response:?} for resource {resource}")]
    UnexpectedResponse { resource: String, response: String },
    /// Failed to read or deserialise a configuration file.
    #[error("config error")]
    Config(#[from] config::ConfigError),
    /// Failed to serialise a configuration file.
    #[error("yaml error")]
    Yaml(#[from] serde_yaml::Error),
    /// Config file path does not point at a file.
    #[error("could not locate the config file {0:?}")]
    MissingConfig(PathBuf),
    #[error("image error")]
    Image(#[from] image::ImageError),
    #[error("csv error")]
    Csv(#[from] csv::Error),
    /// The radiometric payload of a snapshot is missing or malformed.
    #[error("thermal data error: {0}")]
    ThermalData(String),
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
