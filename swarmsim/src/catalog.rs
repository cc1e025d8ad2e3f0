//! Initial file assignment.
//!
//! Each node starts with between one and `max_files_per_node` distinct
//! files, drawn from a Zipf distribution over the catalog so that low ids
//! are common and high ids rare.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use swarmcast::FileId;

use crate::error::SimError;

/// Shape of the shared file catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    /// Files in the catalog; ids run from 1 to this value.
    pub catalog_size: u32,
    pub max_files_per_node: usize,
    pub zipf_exponent: f64,
    pub file_size_kb: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_size: 100,
            max_files_per_node: 10,
            zipf_exponent: 1.1,
            file_size_kb: 1000,
        }
    }
}

impl CatalogConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.catalog_size == 0 {
            return Err(SimError::EmptyCatalog);
        }
        if self.catalog_size > u32::from(u16::MAX) {
            return Err(SimError::CatalogTooLarge {
                catalog_size: self.catalog_size,
            });
        }
        if self.file_size_kb > u32::from(u16::MAX) {
            return Err(SimError::FileSizeTooLarge {
                file_size_kb: self.file_size_kb,
            });
        }
        if self.max_files_per_node == 0 || self.max_files_per_node > self.catalog_size as usize {
            return Err(SimError::InvalidFilesPerNode {
                max_files_per_node: self.max_files_per_node,
                catalog_size: self.catalog_size,
            });
        }
        if !self.zipf_exponent.is_finite() || self.zipf_exponent < 0.0 {
            return Err(SimError::InvalidZipfExponent(self.zipf_exponent));
        }
        Ok(())
    }
}

/// Check explicit `(file_id, size_kb)` lists against the 16-bit
/// Advertisement fields.
pub fn validate_initial_files(files: &[Vec<(FileId, u32)>]) -> Result<(), SimError> {
    for &(file_id, file_size_kb) in files.iter().flatten() {
        if file_id > u32::from(u16::MAX) {
            return Err(SimError::FileIdTooLarge { file_id });
        }
        if file_size_kb > u32::from(u16::MAX) {
            return Err(SimError::FileSizeTooLarge { file_size_kb });
        }
    }
    Ok(())
}

/// Zipf distribution over ranks `1..=n`: P(k) proportional to `k^-s`.
#[derive(Debug, Clone)]
pub struct Zipf {
    index: WeightedIndex<f64>,
}

impl Zipf {
    pub fn new(n: u32, exponent: f64) -> Result<Self, SimError> {
        if !exponent.is_finite() || exponent < 0.0 {
            return Err(SimError::InvalidZipfExponent(exponent));
        }
        let weights = (1..=n).map(|k| f64::from(k).powf(-exponent));
        let index = WeightedIndex::new(weights).map_err(|_| SimError::EmptyCatalog)?;
        Ok(Self { index })
    }
}

impl Distribution<u32> for Zipf {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        self.index.sample(rng) as u32 + 1
    }
}

/// Draw every node's initial files.
///
/// Returns one `(file_id, size_kb)` list per node, ids sorted.
pub fn assign_initial_files<R: Rng>(
    config: &CatalogConfig,
    nodes: usize,
    rng: &mut R,
) -> Result<Vec<Vec<(FileId, u32)>>, SimError> {
    config.validate()?;
    let zipf = Zipf::new(config.catalog_size, config.zipf_exponent)?;

    let assignments = (0..nodes)
        .map(|_| {
            let count = rng.gen_range(1..=config.max_files_per_node);
            let mut ids: Vec<FileId> = Vec::with_capacity(count);
            while ids.len() < count {
                let id = zipf.sample(rng);
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            ids.sort_unstable();
            ids.into_iter().map(|id| (id, config.file_size_kb)).collect()
        })
        .collect();
    Ok(assignments)
}
