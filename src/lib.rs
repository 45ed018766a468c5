//! # pedcnv - pedigree-aware copy-number caller
//!
//! Calls discrete copy-number and allele-genotype states for genomic segments
//! across a pedigree. Per-sample read-coverage and allele-count evidence are
//! combined with Mendelian inheritance constraints, and every call carries a
//! quality score (QS) and, for de novo offspring events, a de novo quality
//! score (DQ).

pub mod caller;
pub mod coverage;
pub mod distribution;
pub mod genotype;
pub mod io;
pub mod joint;
pub mod likelihood;
pub mod metrics;
pub mod model;
pub mod pedigree;
pub mod pipeline;
pub mod ploidy;
pub mod segment;
pub mod utils;
pub mod vcf;

#[cfg(test)]
pub(crate) mod test_utils;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque sample identifier as it appears in the input files
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a sample within the pedigree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kinship {
    Parent,
    Offspring,
    /// Unrelated or unplaced sample, called on its own
    Other,
}

/// Segment calling engine, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CallerKind {
    /// Total copy number search; allele evidence only refines the major chromosome count
    CopyNumber,
    /// Phased haplotype search whenever allele evidence is informative
    Haplotype,
}

/// Parameters of the pedigree caller
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Number of copy-number states, calls range over 0..maximum_copy_number
    pub maximum_copy_number: usize,
    pub de_novo_rate: f64,
    pub max_qscore: f64,
    pub quality_filter_threshold: f64,
    pub de_novo_quality_filter_threshold: f64,
    /// Minimum number of allele sites every sample needs before allele evidence is used
    pub min_allele_sites: usize,
    /// Maximum segment bases per allele site before allele evidence is ignored
    pub max_bases_per_allele_site: f64,
    pub max_num_offspring_genotypes: usize,
    pub number_of_trimmed_bins: usize,
    /// Segment sets shorter than this are absorbed into a neighbour after calling
    pub minimum_call_size: u32,
    /// Largest gap bridged when merging neighbouring segment sets
    pub maximum_merge_span: u32,
    /// Seed for the bounded offspring-genotype subsampling
    pub seed: u64,
    pub caller: CallerKind,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            maximum_copy_number: 5,
            de_novo_rate: 1e-5,
            max_qscore: 100.0,
            quality_filter_threshold: 10.0,
            de_novo_quality_filter_threshold: 20.0,
            min_allele_sites: 10,
            max_bases_per_allele_site: 10_000.0,
            max_num_offspring_genotypes: 500,
            number_of_trimmed_bins: 2,
            minimum_call_size: 0,
            maximum_merge_span: 10_000,
            seed: 0,
            caller: CallerKind::Haplotype,
        }
    }
}

/// Error types for the pedcnv library
#[derive(Debug, thiserror::Error)]
pub enum PedcnvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid segment data: {0}")]
    InvalidSegment(String),

    #[error("Invalid pedigree: {0}")]
    InvalidPedigree(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Numeric error: {0}")]
    Numeric(String),

    #[error("Maximal likelihood not found for segment {0}")]
    MaximalLikelihoodNotFound(String),
}

pub type PedcnvResult<T> = Result<T, PedcnvError>;

/// Validate caller configuration parameters
pub fn validate_caller_config(config: &CallerConfig) -> PedcnvResult<()> {
    if config.maximum_copy_number < 3 {
        return Err(PedcnvError::InvalidConfig(
            "maximum_copy_number must be at least 3".to_string(),
        ));
    }

    if !(config.de_novo_rate > 0.0 && config.de_novo_rate < 1.0) {
        return Err(PedcnvError::InvalidConfig(
            "de_novo_rate must be between 0 and 1".to_string(),
        ));
    }

    if !(config.max_qscore > 0.0) || !config.max_qscore.is_finite() {
        return Err(PedcnvError::InvalidConfig(
            "max_qscore must be a positive number".to_string(),
        ));
    }

    if config.quality_filter_threshold < 0.0 || config.quality_filter_threshold > config.max_qscore
    {
        return Err(PedcnvError::InvalidConfig(
            "quality_filter_threshold must be between 0 and max_qscore".to_string(),
        ));
    }

    if config.de_novo_quality_filter_threshold < 0.0
        || config.de_novo_quality_filter_threshold > config.max_qscore
    {
        return Err(PedcnvError::InvalidConfig(
            "de_novo_quality_filter_threshold must be between 0 and max_qscore".to_string(),
        ));
    }

    if !(config.max_bases_per_allele_site > 0.0) {
        return Err(PedcnvError::InvalidConfig(
            "max_bases_per_allele_site must be positive".to_string(),
        ));
    }

    if config.max_num_offspring_genotypes == 0 {
        return Err(PedcnvError::InvalidConfig(
            "max_num_offspring_genotypes must be at least 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_caller_config(&CallerConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let config = CallerConfig {
            de_novo_rate: 0.0,
            ..CallerConfig::default()
        };
        assert!(validate_caller_config(&config).is_err());

        let config = CallerConfig {
            maximum_copy_number: 2,
            ..CallerConfig::default()
        };
        assert!(validate_caller_config(&config).is_err());

        let config = CallerConfig {
            quality_filter_threshold: 150.0,
            ..CallerConfig::default()
        };
        assert!(validate_caller_config(&config).is_err());

        let config = CallerConfig {
            max_num_offspring_genotypes: 0,
            ..CallerConfig::default()
        };
        assert!(validate_caller_config(&config).is_err());
    }

    #[test]
    fn test_sample_id_display() {
        let id = SampleId::new("NA12878");
        assert_eq!(id.to_string(), "NA12878");
        assert_eq!(id.as_str(), "NA12878");
    }
}
