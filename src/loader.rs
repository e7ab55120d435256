//! Case-file discovery and parsing.
//!
//! Each `*.yml` file in the cases directory holds a YAML array of cases.
//! Discovery is non-recursive and alphabetical so runs are deterministic.

use std::path::Path;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::model::TestCase;

/// Load every case from `*.yml` files in `dir`, in file-name order.
pub fn load_cases(dir: &Path) -> EngineResult<Vec<TestCase>> {
    const OP: &str = "load_cases";

    if !dir.is_dir() {
        return Err(
            EngineError::new(ErrorKind::NotFound, OP, "cases directory does not exist")
                .with("directory", dir.display().to_string()),
        );
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|err| {
            EngineError::new(ErrorKind::Internal, OP, "failed to read cases directory")
                .with("directory", dir.display().to_string())
                .with("error", err.to_string())
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "yml"))
        .collect();
    files.sort();

    let mut all = Vec::new();
    for file in files {
        debug!(file = %file.display(), "loading case file");
        let data = std::fs::read_to_string(&file).map_err(|err| {
            EngineError::new(ErrorKind::NotFound, OP, "failed to read case file")
                .with("file", file.display().to_string())
                .with("error", err.to_string())
        })?;

        let cases: Vec<TestCase> = serde_yaml::from_str(&data).map_err(|err| {
            EngineError::new(ErrorKind::InvalidInput, OP, "failed to parse case file")
                .with("file", file.display().to_string())
                .with("error", err.to_string())
        })?;
        all.extend(cases);
    }

    info!(count = all.len(), dir = %dir.display(), "loaded test cases");
    Ok(all)
}
