use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BagError {
    #[error("bag not found: {0}")]
    NotFound(PathBuf),

    #[error("no .mcap files in bag directory {0}")]
    NoMcapFiles(PathBuf),

    #[error("io ({path}): {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("mcap ({path}): {source}")]
    Mcap {
        path: PathBuf,
        source: mcap::McapError,
    },
}
