//! The error type for the dlrover master control plane
use std::fmt;

/// An error from the dlrover master
#[derive(Debug)]
pub enum Error {
    /// A generic error with a message
    Generic(String),
    /// An error loading our config file
    Config(config::ConfigError),
    /// An error serializing/deserializing yaml
    SerdeYaml(serde_yaml::Error),
    /// An error parsing an integer out of a resource request string
    ParseInt(std::num::ParseIntError),
    /// An error parsing a float out of a resource request string
    ParseFloat(std::num::ParseFloatError),
    /// An error joining a spawned background task
    JoinError(tokio::task::JoinError),
    /// An error parsing a service address
    AddrParse(std::net::AddrParseError),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Get the error message for this error
    pub fn msg(&self) -> String {
        match self {
            Error::Generic(msg) => msg.clone(),
            Error::Config(err) => err.to_string(),
            Error::SerdeYaml(err) => err.to_string(),
            Error::ParseInt(err) => err.to_string(),
            Error::ParseFloat(err) => err.to_string(),
            Error::JoinError(err) => err.to_string(),
            Error::AddrParse(err) => err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.msg())
    }
}

impl std::error::Error for Error {}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::SerdeYaml(error)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(error: std::num::ParseIntError) -> Self {
        Error::ParseInt(error)
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(error: std::num::ParseFloatError) -> Self {
        Error::ParseFloat(error)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::JoinError(error)
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(error: std::net::AddrParseError) -> Self {
        Error::AddrParse(error)
    }
}
