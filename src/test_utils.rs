//! Synthetic samples for caller and pipeline tests

use crate::caller::SampleContext;
use crate::metrics::SampleMetrics;
use crate::model::{CopyNumberModelFactory, ModelKind};
use crate::segment::{Ballele, Balleles, Segment};
use crate::SampleId;

const BACKGROUND_SEGMENTS: u32 = 10;
const SEGMENT_LENGTH: u32 = 100_000;
const BINS_PER_SEGMENT: usize = 20;

/// Target segment description: (bin coverage, allele sites, (counts_a, counts_b))
pub(crate) type Target = (f64, usize, (u32, u32));

#[derive(Debug, Clone)]
pub(crate) struct SyntheticSample {
    coverage: f64,
    allele_counts: (u32, u32),
}

impl SyntheticSample {
    pub(crate) fn diploid(coverage: f64) -> Self {
        let haploid = (coverage / 4.0).round() as u32;
        Self {
            coverage,
            allele_counts: (haploid, haploid),
        }
    }

    /// Segment with small deterministic jitter around the given coverage and allele counts
    pub(crate) fn segment(&self, chrom: &str, begin: u32, coverage: f64, sites: usize, counts: (u32, u32)) -> Segment {
        let bins = (0..BINS_PER_SEGMENT)
            .map(|i| coverage + ((i * 7) % 11) as f64 - 5.0)
            .map(|c| c.max(0.0))
            .collect();
        let spacing = SEGMENT_LENGTH / (sites as u32 + 1);
        let balleles = Balleles::new(
            (0..sites)
                .map(|i| {
                    Ballele::new(
                        begin + spacing * (i as u32 + 1),
                        counts.0 + (i % 3) as u32,
                        counts.1 + ((i + 1) % 3) as u32,
                    )
                })
                .collect(),
        );
        Segment::new(chrom.to_string(), begin, begin + SEGMENT_LENGTH, bins, balleles)
    }

    pub(crate) fn segment_with_sites(&self, sites: usize, counts: (u32, u32)) -> Segment {
        self.segment("chr2", 0, self.coverage, sites, counts)
    }

    /// Diploid segments on chr1 that anchor the sample metrics
    pub(crate) fn background(&self) -> Vec<Segment> {
        (0..BACKGROUND_SEGMENTS)
            .map(|i| self.segment("chr1", i * SEGMENT_LENGTH, self.coverage, 30, self.allele_counts))
            .collect()
    }

    /// Background followed by the target segments on chr2
    pub(crate) fn segments(&self, targets: &[Target]) -> Vec<Segment> {
        let mut segments = self.background();
        segments.extend(
            targets
                .iter()
                .enumerate()
                .map(|(i, &(coverage, sites, counts))| {
                    self.segment("chr2", i as u32 * SEGMENT_LENGTH, coverage, sites, counts)
                }),
        );
        segments
    }
}

pub(crate) fn sample_context(id: &str, segments: &[Segment], kind: ModelKind) -> SampleContext {
    let metrics = SampleMetrics::from_segments(segments, 2, None).unwrap();
    let model = CopyNumberModelFactory::new(kind).create_model(
        5,
        metrics.max_coverage,
        metrics.mean_coverage,
        metrics.mean_allele_coverage,
    );
    SampleContext {
        id: SampleId::new(id),
        metrics,
        model,
    }
}

/// Contexts per sample plus the target segment sets, indexed [target][sample]
pub(crate) fn family_contexts(
    samples: &[SyntheticSample],
    targets: &[Vec<Target>],
    kind: ModelKind,
) -> (Vec<SampleContext>, Vec<Vec<Segment>>) {
    let num_targets = targets.first().map(|t| t.len()).unwrap_or(0);
    let mut contexts = Vec::new();
    let mut sets = vec![Vec::new(); num_targets];
    for (i, (sample, sample_targets)) in samples.iter().zip(targets).enumerate() {
        let segments = sample.segments(sample_targets);
        contexts.push(sample_context(&format!("sample{}", i), &segments, kind));
        for (t, segment) in segments[BACKGROUND_SEGMENTS as usize..].iter().enumerate() {
            sets[t].push(segment.clone());
        }
    }
    (contexts, sets)
}
