use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("nimber database {path:?}: {source}")]
    DbIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid position {0:?}")]
    InvalidPosition(String),
    #[error("invalid couple {0:?}")]
    InvalidCouple(String),
    #[error("invalid nimber {0:?}")]
    InvalidNimber(String),
}
