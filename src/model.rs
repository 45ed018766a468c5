//! Coverage and allele-count density models per sample

use crate::distribution::{finite_or_zero, log_density, negative_binomial_density};
use crate::genotype::{Genotype, PhasedGenotype};
use crate::segment::Balleles;

const VARIANCE_INFLATION: f64 = 2.5;
const ALLELE_STATE_ZERO_CORRECTOR: f64 = 0.1;
const LOH_REF_MODEL_PENALTY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Allele tables use the raw haplotype copy numbers
    TotalCopyNumber,
    /// Zero-corrected allele means, LOH-aware (1,1) scoring and a read-depth table
    Haplotype,
}

#[derive(Debug, Clone)]
struct AlleleDensity {
    a: Vec<f64>,
    b: Vec<f64>,
}

/// Precomputed densities of one sample. Immutable once built and shared
/// across worker threads.
#[derive(Debug, Clone)]
pub struct CopyNumberModel {
    kind: ModelKind,
    max_coverage: usize,
    cn_distribution: Vec<Vec<f64>>,
    allele_distribution: Vec<Vec<AlleleDensity>>,
    allele_coverage_ceiling: usize,
    read_depth_distribution: Vec<Vec<f64>>,
    max_total_coverage: usize,
}

impl CopyNumberModel {
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn num_cn_states(&self) -> usize {
        self.cn_distribution.len()
    }

    pub fn max_coverage(&self) -> usize {
        self.max_coverage
    }

    pub fn allele_coverage_ceiling(&self) -> usize {
        self.allele_coverage_ceiling
    }

    /// Coverage density row of one copy-number state
    pub fn coverage_density(&self, copy_number: usize) -> Option<&[f64]> {
        self.cn_distribution.get(copy_number).map(|row| row.as_slice())
    }

    /// Density of the observed (median) coverage under the genotype's total copy number
    pub fn total_copy_number_likelihood(&self, coverage: f64, genotype: &Genotype) -> f64 {
        let Some(row) = self.cn_distribution.get(genotype.total_copy_number()) else {
            return 0.0;
        };
        let coverage = if coverage.is_finite() { coverage.max(0.0) } else { 0.0 };
        let index = (coverage.round() as usize).min(self.max_coverage - 1);
        finite_or_zero(row[index])
    }

    /// Natural-log likelihood of the allele counts of every site under a phased genotype
    pub fn genotype_log_likelihood(&self, balleles: &Balleles, genotype: PhasedGenotype) -> f64 {
        balleles
            .allele_counts()
            .map(|(counts_a, counts_b)| log_density(self.site_density(genotype, counts_a, counts_b)))
            .sum()
    }

    fn site_density(&self, genotype: PhasedGenotype, counts_a: usize, counts_b: usize) -> f64 {
        match self.kind {
            ModelKind::TotalCopyNumber => {
                let row = counts_a.min(self.max_coverage - 1);
                let col = counts_b.min(self.max_coverage - 1);
                self.allele_pair_density(genotype, row, col)
            }
            ModelKind::Haplotype => {
                let ceiling = self.allele_coverage_ceiling.min(self.max_coverage - 1);
                let row = counts_a.min(ceiling);
                let col = counts_b.min(ceiling);
                if genotype == PhasedGenotype::new(1, 1) {
                    [
                        self.haplotype_site_density(genotype, row, col),
                        self.haplotype_site_density(PhasedGenotype::new(2, 0), row, col),
                        self.haplotype_site_density(PhasedGenotype::new(0, 2), row, col),
                    ]
                    .into_iter()
                    .fold(0.0, f64::max)
                        * LOH_REF_MODEL_PENALTY
                } else {
                    self.haplotype_site_density(genotype, row, col)
                }
            }
        }
    }

    fn allele_pair_density(&self, genotype: PhasedGenotype, row: usize, col: usize) -> f64 {
        self.allele_distribution
            .get(genotype.copy_number_a)
            .and_then(|densities| densities.get(genotype.copy_number_b))
            .map(|density| finite_or_zero(density.a[row] * density.b[col]))
            .unwrap_or(0.0)
    }

    /// With one haplotype absent, the present one is scored on the total read depth
    fn haplotype_site_density(&self, genotype: PhasedGenotype, row: usize, col: usize) -> f64 {
        let total = genotype.total_copy_number();
        let hemizygous = total > 0 && (genotype.copy_number_a == 0 || genotype.copy_number_b == 0);
        if !hemizygous {
            return self.allele_pair_density(genotype, row, col);
        }

        let Some(depth_row) = self.read_depth_distribution.get(total) else {
            return self.allele_pair_density(genotype, row, col);
        };
        let depth = (row + col).min(self.max_total_coverage - 1);
        let Some(zero_slot) = self.allele_distribution.first().and_then(|d| d.first()) else {
            return 0.0;
        };
        let absent_count = if genotype.copy_number_a == 0 { row } else { col };
        finite_or_zero(depth_row[depth] * zero_slot.a[absent_count])
    }
}

/// Builds sample models of a fixed kind
#[derive(Debug, Clone, Copy)]
pub struct CopyNumberModelFactory {
    kind: ModelKind,
}

impl CopyNumberModelFactory {
    pub fn new(kind: ModelKind) -> Self {
        Self { kind }
    }

    pub fn create_model(
        &self,
        num_cn_states: usize,
        max_coverage: usize,
        mean_coverage: f64,
        diploid_allele_mean_counts: f64,
    ) -> CopyNumberModel {
        let max_coverage = max_coverage.max(1);
        let haploid_mean = mean_coverage / 2.0;
        let haploid_allele_mean = diploid_allele_mean_counts / 2.0;
        let variance = mean_coverage * VARIANCE_INFLATION;
        let allele_variance = diploid_allele_mean_counts * VARIANCE_INFLATION;

        let cn_distribution = (0..num_cn_states)
            .map(|copy_number| {
                negative_binomial_density(
                    haploid_mean * coverage_multiplier(copy_number),
                    variance,
                    max_coverage,
                    true,
                )
            })
            .collect();

        let allele_mean = |gt: usize| match self.kind {
            ModelKind::TotalCopyNumber => haploid_allele_mean * gt as f64,
            ModelKind::Haplotype => haploid_allele_mean * (gt as f64).max(ALLELE_STATE_ZERO_CORRECTOR),
        };
        // One density per haplotype copy number, paired up below
        let haplotype_densities: Vec<Vec<f64>> = (0..num_cn_states)
            .map(|gt| negative_binomial_density(allele_mean(gt), allele_variance, max_coverage, false))
            .collect();
        let allele_distribution = (0..num_cn_states)
            .map(|gt1| {
                (0..num_cn_states)
                    .map(|gt2| AlleleDensity {
                        a: haplotype_densities[gt1].clone(),
                        b: haplotype_densities[gt2].clone(),
                    })
                    .collect()
            })
            .collect();

        let (allele_coverage_ceiling, read_depth_distribution, max_total_coverage) = match self.kind {
            ModelKind::TotalCopyNumber => (max_coverage - 1, Vec::new(), 2 * max_coverage),
            ModelKind::Haplotype => {
                let max_total_coverage = 2 * max_coverage;
                let read_depth = (0..2 * num_cn_states)
                    .map(|total| {
                        negative_binomial_density(
                            haploid_allele_mean * total as f64,
                            allele_variance,
                            max_total_coverage,
                            false,
                        )
                    })
                    .collect();
                (
                    (diploid_allele_mean_counts * 3.0).round().max(0.0) as usize,
                    read_depth,
                    max_total_coverage,
                )
            }
        };

        log::debug!(
            "Created {:?} model: {} states, max coverage {}, mean coverage {:.2}, allele mean {:.2}",
            self.kind,
            num_cn_states,
            max_coverage,
            mean_coverage,
            diploid_allele_mean_counts
        );

        CopyNumberModel {
            kind: self.kind,
            max_coverage,
            cn_distribution,
            allele_distribution,
            allele_coverage_ceiling,
            read_depth_distribution,
            max_total_coverage,
        }
    }
}

/// Shift of the haploid mean per state, offsetting false CN1/CN3 calls and
/// tolerating low bins at CN0
fn coverage_multiplier(copy_number: usize) -> f64 {
    match copy_number {
        0 => 0.1,
        1 => 0.9,
        3 => 3.0 * 1.1,
        cn => cn as f64,
    }
}
