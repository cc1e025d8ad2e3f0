//! Simulation configuration errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("catalog must contain at least one file")]
    EmptyCatalog,
    #[error("catalog of {catalog_size} files cannot be indexed by 16-bit advertisements")]
    CatalogTooLarge { catalog_size: u32 },
    #[error("file size of {file_size_kb} KB cannot be carried by 16-bit advertisements")]
    FileSizeTooLarge { file_size_kb: u32 },
    #[error("file id {file_id} cannot be carried by 16-bit advertisements")]
    FileIdTooLarge { file_id: u32 },
    #[error("max files per node must be in 1..={catalog_size}, got {max_files_per_node}")]
    InvalidFilesPerNode {
        max_files_per_node: usize,
        catalog_size: u32,
    },
    #[error("zipf exponent must be finite and non-negative, got {0}")]
    InvalidZipfExponent(f64),
    #[error("loss rate must be in [0, 1], got {0}")]
    InvalidLossRate(f64),
    #[error("scenario needs at least one node")]
    NoNodes,
}
