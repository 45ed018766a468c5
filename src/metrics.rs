//! Per-sample summary statistics used to parameterise the models

use crate::ploidy::{ReferencePloidy, DEFAULT_PLOIDY};
use crate::segment::{median, Segment};
use crate::{PedcnvError, PedcnvResult};

/// Headroom added to the largest segment coverage when sizing the coverage tables
const MAX_COVERAGE_PADDING: usize = 10;

#[derive(Debug, Clone)]
pub struct SampleMetrics {
    pub mean_coverage: f64,
    pub mean_allele_coverage: f64,
    pub variance: f64,
    pub allele_variance: f64,
    pub max_coverage: usize,
    pub ploidy: Option<ReferencePloidy>,
}

impl SampleMetrics {
    pub fn from_segments(
        segments: &[Segment],
        number_of_trimmed_bins: usize,
        ploidy: Option<ReferencePloidy>,
    ) -> PedcnvResult<Self> {
        if segments.is_empty() {
            return Err(PedcnvError::InvalidSegment(
                "cannot derive sample metrics without segments".to_string(),
            ));
        }

        let allele_coverage: Vec<f64> = segments
            .iter()
            .flat_map(|s| s.balleles.total_coverage())
            .collect();
        let mean_allele_coverage = median(&allele_coverage).unwrap_or(0.0);

        let truncated_medians: Vec<f64> = segments
            .iter()
            .map(|s| s.truncated_median_count(number_of_trimmed_bins))
            .collect();
        let variance = sample_variance(&truncated_medians);

        let segment_allele_means: Vec<f64> = segments
            .iter()
            .filter_map(|s| s.balleles.mean_coverage())
            .collect();
        let allele_variance = sample_variance(&segment_allele_means);

        let bin_counts: Vec<f64> = segments.iter().flat_map(|s| s.counts.iter().copied()).collect();
        let mean_coverage = median(&bin_counts).ok_or_else(|| {
            PedcnvError::InvalidSegment("segments carry no coverage bins".to_string())
        })?;

        let max_truncated_median = truncated_medians.iter().copied().fold(0.0, f64::max);
        let max_coverage = max_truncated_median.round() as usize + MAX_COVERAGE_PADDING;

        Ok(Self {
            mean_coverage,
            mean_allele_coverage,
            variance,
            allele_variance,
            max_coverage,
            ploidy,
        })
    }

    /// Reference copy number of the sample over a segment
    pub fn get_ploidy(&self, segment: &Segment) -> usize {
        self.ploidy
            .as_ref()
            .map(|p| p.get_ploidy(segment))
            .unwrap_or(DEFAULT_PLOIDY)
    }
}

/// Unbiased sample variance, 0 for fewer than two values
fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ploidy::PloidyInterval;
    use crate::segment::{Ballele, Balleles};

    fn segment(begin: u32, counts: Vec<f64>, sites: Vec<(u32, u32)>) -> Segment {
        let balleles = Balleles::new(
            sites
                .into_iter()
                .enumerate()
                .map(|(i, (a, b))| Ballele::new(begin + i as u32, a, b))
                .collect(),
        );
        Segment::new("chr1".to_string(), begin, begin + 1000, counts, balleles)
    }

    #[test]
    fn test_from_segments() {
        let segments = vec![
            segment(0, vec![100.0, 102.0, 98.0], vec![(25, 25), (20, 30)]),
            segment(1000, vec![50.0, 52.0, 48.0], vec![(0, 30)]),
            segment(2000, vec![100.0, 101.0, 99.0], vec![]),
        ];
        let metrics = SampleMetrics::from_segments(&segments, 2, None).unwrap();

        assert_eq!(metrics.mean_coverage, 99.0);
        assert_eq!(metrics.mean_allele_coverage, 50.0);
        assert_eq!(metrics.max_coverage, 110);
        // truncated medians 100, 50, 100
        assert!((metrics.variance - 833.333_333).abs() < 1e-3);
        // per-segment allele means 50 and 30
        assert!((metrics.allele_variance - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert!(SampleMetrics::from_segments(&[], 2, None).is_err());
    }

    #[test]
    fn test_get_ploidy_defaults_to_diploid() {
        let segments = vec![segment(0, vec![100.0], vec![])];
        let metrics = SampleMetrics::from_segments(&segments, 2, None).unwrap();
        assert_eq!(metrics.get_ploidy(&segments[0]), 2);

        let ploidy = ReferencePloidy::new(vec![PloidyInterval {
            chrom: "chr1".to_string(),
            start: 0,
            end: 10_000,
            ploidy: 3,
        }]);
        let metrics = SampleMetrics::from_segments(&segments, 2, Some(ploidy)).unwrap();
        assert_eq!(metrics.get_ploidy(&segments[0]), 3);
    }
}
