//! Per-sample genotype likelihood tables

use crate::distribution::{finite_or_zero, log_density, sanitize_log_likelihood};
use crate::genotype::{phased_splits, Genotype, PhasedGenotype};
use crate::metrics::SampleMetrics;
use crate::model::CopyNumberModel;
use crate::segment::{Balleles, Segment};

const MAX_COVERAGE_MULTIPLIER: f64 = 3.0;

/// Log-likelihood of each candidate genotype for one sample over one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLikelihoods {
    genotypes: Vec<Genotype>,
    log_likelihoods: Vec<f64>,
}

impl SampleLikelihoods {
    pub fn new(genotypes: Vec<Genotype>, log_likelihoods: Vec<f64>) -> Self {
        debug_assert_eq!(genotypes.len(), log_likelihoods.len());
        let log_likelihoods = log_likelihoods.into_iter().map(sanitize_log_likelihood).collect();
        Self {
            genotypes,
            log_likelihoods,
        }
    }

    pub fn len(&self) -> usize {
        self.genotypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genotypes.is_empty()
    }

    pub fn genotypes(&self) -> &[Genotype] {
        &self.genotypes
    }

    pub fn genotype(&self, index: usize) -> Genotype {
        self.genotypes[index]
    }

    pub fn log_likelihood(&self, index: usize) -> f64 {
        self.log_likelihoods[index]
    }

    pub fn index_of(&self, genotype: &Genotype) -> Option<usize> {
        self.genotypes.iter().position(|g| g == genotype)
    }

    pub fn get(&self, genotype: &Genotype) -> Option<f64> {
        self.index_of(genotype).map(|i| self.log_likelihoods[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Genotype, f64)> {
        self.genotypes.iter().zip(self.log_likelihoods.iter().copied())
    }

    pub fn max_log_likelihood(&self) -> f64 {
        self.log_likelihoods.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Index of the most likely genotype, earliest on ties
    pub fn best_index(&self) -> Option<usize> {
        self.top_k(1).first().copied()
    }

    /// Indices of the k most likely genotypes, best first
    pub fn top_k(&self, k: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.log_likelihoods[b].total_cmp(&self.log_likelihoods[a]));
        order.truncate(k);
        order
    }
}

/// Turns segment observations into per-genotype log-likelihoods
#[derive(Debug, Clone, Copy)]
pub struct CopyNumberLikelihoodCalculator {
    maximum_copy_number: usize,
}

impl CopyNumberLikelihoodCalculator {
    pub fn new(maximum_copy_number: usize) -> Self {
        Self { maximum_copy_number }
    }

    /// Segment median coverage, capped at three times the sample mean
    pub fn clamped_coverage(segment: &Segment, metrics: &SampleMetrics) -> f64 {
        segment
            .median_count()
            .min(metrics.mean_coverage * MAX_COVERAGE_MULTIPLIER)
    }

    /// Coverage density per total copy number 0..maximum_copy_number
    pub fn coverage_likelihoods(
        &self,
        segment: &Segment,
        metrics: &SampleMetrics,
        model: &CopyNumberModel,
    ) -> Vec<f64> {
        let coverage = Self::clamped_coverage(segment, metrics);
        (0..self.maximum_copy_number)
            .map(|cn| finite_or_zero(model.total_copy_number_likelihood(coverage, &Genotype::create(cn))))
            .collect()
    }

    /// Log-likelihood table over `genotypes`.
    ///
    /// With `use_alleles`, the coverage term is weighted by the number of allele
    /// sites and the allele term added. Unphased genotypes take the allele term
    /// of their best haplotype split.
    pub fn sample_likelihoods(
        &self,
        segment: &Segment,
        metrics: &SampleMetrics,
        model: &CopyNumberModel,
        genotypes: &[Genotype],
        use_alleles: bool,
    ) -> SampleLikelihoods {
        let coverage = self.coverage_likelihoods(segment, metrics, model);
        let num_sites = segment.balleles.len();
        let use_alleles = use_alleles && num_sites > 0;

        let log_likelihoods = genotypes
            .iter()
            .map(|genotype| {
                let coverage_ll = coverage
                    .get(genotype.total_copy_number())
                    .map(|&density| log_density(density))
                    .unwrap_or(f64::MIN);
                if !use_alleles {
                    return coverage_ll;
                }
                let allele_ll = match genotype.phased_genotype() {
                    Some(phased) => model.genotype_log_likelihood(&segment.balleles, phased),
                    None => best_split(model, &segment.balleles, genotype.total_copy_number()).1,
                };
                coverage_ll * num_sites as f64 + allele_ll
            })
            .collect();

        SampleLikelihoods::new(genotypes.to_vec(), log_likelihoods)
    }
}

/// Most likely haplotype split of a total copy number and its allele log-likelihood
pub fn best_split(model: &CopyNumberModel, balleles: &Balleles, copy_number: usize) -> (PhasedGenotype, f64) {
    phased_splits(copy_number)
        .into_iter()
        .map(|split| (split, sanitize_log_likelihood(model.genotype_log_likelihood(balleles, split))))
        .fold((PhasedGenotype::new(copy_number, 0), f64::NEG_INFINITY), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        })
}
