use std::path::PathBuf;

use dotenvy::dotenv;
use tracing::{debug, warn};

/// What [`load_dotenvy_vars_if_present`] found.
#[derive(Debug)]
pub enum DotenvOutcome {
    /// Variables were loaded from this file.
    Loaded(PathBuf),
    /// There is no readable `.env` file. The `WITNESS_*` variables are only
    /// read from the real environment.
    Absent,
    /// A `.env` file exists but could not be parsed.
    Invalid(dotenvy::Error),
}

impl DotenvOutcome {
    fn from_result(res: Result<PathBuf, dotenvy::Error>) -> Self {
        match res {
            Ok(path) => Self::Loaded(path),
            Err(dotenvy::Error::Io(_)) => Self::Absent,
            Err(e) => Self::Invalid(e),
        }
    }

    /// Reports the outcome. Call it once logging is set up.
    pub fn log(&self) {
        match self {
            Self::Loaded(path) => debug!("Loaded environment from {}", path.display()),
            Self::Absent => debug!("No local `.env` file"),
            Self::Invalid(e) => {
                warn!("Found local `.env` file but was unable to parse it! (err: {e})")
            }
        }
    }
}

/// Loads a local `.env` file into the process environment, if there is one.
///
/// Nothing is logged here, so that the file can be read before the subscriber
/// is installed and a `RUST_LOG` it sets still takes effect.
pub fn load_dotenvy_vars_if_present() -> DotenvOutcome {
    DotenvOutcome::from_result(dotenv())
}
