pub mod geoip;
pub mod reachability;
pub mod sites;
pub mod system;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("protocol failure: {0}")]
    Protocol(String),
    #[error("local sampling failure: {0}")]
    LocalSampling(String),
}

impl ProbeError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Transport(_) => "transport",
            ProbeError::Protocol(_) => "protocol",
            ProbeError::LocalSampling(_) => "local_sampling",
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Transport(err.to_string())
        } else if err.is_decode() || err.is_body() {
            ProbeError::Protocol(err.to_string())
        } else {
            ProbeError::Transport(err.to_string())
        }
    }
}
