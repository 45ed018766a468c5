//! Per-run orchestration: model construction and parallel segment calling

use crate::caller::{SampleContext, VariantCaller};
use crate::metrics::SampleMetrics;
use crate::model::{CopyNumberModelFactory, ModelKind};
use crate::pedigree::PedigreeInfo;
use crate::ploidy::ReferencePloidy;
use crate::segment::Segment;
use crate::utils::{log_progress, Timer};
use crate::{validate_caller_config, CallerConfig, CallerKind, PedcnvError, PedcnvResult, SampleId};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Input of one sample: its segments and optional reference ploidy
#[derive(Debug, Clone)]
pub struct SampleInput {
    pub id: SampleId,
    pub segments: Vec<Segment>,
    pub ploidy: Option<ReferencePloidy>,
}

pub fn model_kind(caller: CallerKind) -> ModelKind {
    match caller {
        CallerKind::CopyNumber => ModelKind::TotalCopyNumber,
        CallerKind::Haplotype => ModelKind::Haplotype,
    }
}

/// Contiguous index ranges of at most ceil(n / num_chunks) items that cover
/// 0..n exactly once
pub fn segment_index_ranges(n: usize, num_chunks: usize) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let num_chunks = num_chunks.clamp(1, n);
    let chunk_size = n.div_ceil(num_chunks);
    (0..n)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(n))
        .collect()
}

/// Split owned items into contiguous chunks following `segment_index_ranges`
pub fn chunkify<T>(items: Vec<T>, num_chunks: usize) -> Vec<Vec<T>> {
    let ranges = segment_index_ranges(items.len(), num_chunks);
    let mut items = items.into_iter();
    ranges
        .into_iter()
        .map(|range| items.by_ref().take(range.len()).collect())
        .collect()
}

/// Metrics and density model of every sample
pub fn build_sample_contexts(samples: &[SampleInput], config: &CallerConfig) -> PedcnvResult<Vec<SampleContext>> {
    let _timer = Timer::new("Building sample models");
    let factory = CopyNumberModelFactory::new(model_kind(config.caller));
    samples
        .par_iter()
        .map(|sample| {
            let metrics =
                SampleMetrics::from_segments(&sample.segments, config.number_of_trimmed_bins, sample.ploidy.clone())?;
            log::info!(
                "{}: mean coverage {:.2}, variance {:.2}, mean allele coverage {:.2}, allele variance {:.2}, max coverage {}",
                sample.id,
                metrics.mean_coverage,
                metrics.variance,
                metrics.mean_allele_coverage,
                metrics.allele_variance,
                metrics.max_coverage
            );
            let model = factory.create_model(
                config.maximum_copy_number,
                metrics.max_coverage,
                metrics.mean_coverage,
                metrics.mean_allele_coverage,
            );
            Ok(SampleContext {
                id: sample.id.clone(),
                metrics,
                model,
            })
        })
        .collect()
}

/// Regroup per-sample segment lists into per-interval segment sets
fn transpose_segments(sample_segments: Vec<Vec<Segment>>) -> PedcnvResult<Vec<Vec<Segment>>> {
    let num_segments = sample_segments.first().map(|s| s.len()).unwrap_or(0);
    if sample_segments.iter().any(|s| s.len() != num_segments) {
        return Err(PedcnvError::InvalidSegment(
            "all samples must have the same number of segments".to_string(),
        ));
    }

    let mut sets: Vec<Vec<Segment>> = (0..num_segments)
        .map(|_| Vec::with_capacity(sample_segments.len()))
        .collect();
    for segments in sample_segments {
        for (set, segment) in sets.iter_mut().zip(segments) {
            set.push(segment);
        }
    }

    for set in &sets {
        let first = &set[0];
        if set
            .iter()
            .any(|s| s.chrom != first.chrom || s.begin != first.begin || s.end != first.end)
        {
            return Err(PedcnvError::InvalidSegment(format!(
                "segment boundaries differ between samples at {}",
                first.region()
            )));
        }
    }
    Ok(sets)
}

fn untranspose_segments(sets: Vec<Vec<Segment>>, num_samples: usize) -> Vec<Vec<Segment>> {
    let mut sample_segments: Vec<Vec<Segment>> = (0..num_samples)
        .map(|_| Vec::with_capacity(sets.len()))
        .collect();
    for set in sets {
        for (segments, segment) in sample_segments.iter_mut().zip(set) {
            segments.push(segment);
        }
    }
    sample_segments
}

/// Call every segment of every sample, samples in pedigree order.
///
/// Segment sets are split into contiguous owned chunks, one rayon task per
/// chunk; each worker writes only into the segments it owns.
pub fn call_segments(
    samples: &[SampleContext],
    sample_segments: Vec<Vec<Segment>>,
    pedigree: Option<&PedigreeInfo>,
    config: &CallerConfig,
    num_processes: usize,
) -> PedcnvResult<Vec<Vec<Segment>>> {
    validate_caller_config(config)?;
    if sample_segments.len() != samples.len() {
        return Err(PedcnvError::InvalidSegment(format!(
            "segments supplied for {} samples, expected {}",
            sample_segments.len(),
            samples.len()
        )));
    }
    if let Some(pedigree) = pedigree {
        let pedigree_order = pedigree.sample_ids();
        if pedigree_order.len() != samples.len()
            || pedigree_order.iter().zip(samples).any(|(id, sample)| *id != sample.id)
        {
            return Err(PedcnvError::InvalidPedigree(
                "samples must be supplied in pedigree order".to_string(),
            ));
        }
    }

    let _timer = Timer::new("Calling segments");
    let sets = transpose_segments(sample_segments)?;
    let num_sets = sets.len();
    if num_sets == 0 {
        return Ok(vec![Vec::new(); samples.len()]);
    }

    let caller = VariantCaller::new(config);
    let chunks = chunkify(sets, num_processes);
    log::info!(
        "Calling {} segment sets in {} chunks with the {:?} caller",
        num_sets,
        chunks.len(),
        config.caller
    );

    let completed = AtomicUsize::new(0);
    let called: Result<Vec<Vec<Vec<Segment>>>, PedcnvError> = chunks
        .into_par_iter()
        .map(|mut chunk| {
            for set in chunk.iter_mut() {
                caller.call_variant(set, samples, pedigree)?;
            }
            let done = completed.fetch_add(chunk.len(), Ordering::Relaxed) + chunk.len();
            log_progress(done, num_sets, "Called segment sets");
            Ok(chunk)
        })
        .collect();

    let sets: Vec<Vec<Segment>> = called?.into_iter().flatten().collect();
    Ok(untranspose_segments(sets, samples.len()))
}

/// Merge called segment sets into the intervals that are reported.
///
/// Sets shorter than `minimum_call_size` are absorbed into the nearest long
/// set on either side of the same chromosome, whichever has the higher mean
/// QS (the previous one on ties). Adjacent sets whose copy numbers agree in
/// every sample are then joined. Neither step bridges a gap wider than
/// `maximum_merge_span`. Merged segments keep the call fields of the set that
/// absorbed them.
pub fn merge_segments(sample_segments: Vec<Vec<Segment>>, config: &CallerConfig) -> PedcnvResult<Vec<Vec<Segment>>> {
    let num_samples = sample_segments.len();
    let mut sets = transpose_segments(sample_segments)?;
    let num_sets = sets.len();
    if num_sets == 0 {
        return Ok(vec![Vec::new(); num_samples]);
    }
    let span = config.maximum_merge_span;
    let long: Vec<bool> = sets
        .iter()
        .map(|set| set[0].length() >= config.minimum_call_size)
        .collect();
    let qscores: Vec<f64> = sets
        .iter()
        .map(|set| set.iter().map(|s| s.qscore).sum::<f64>() / set.len() as f64)
        .collect();

    let mut kept = vec![false; num_sets];
    let mut i = 0;
    while i < num_sets {
        if long[i] {
            kept[i] = true;
            i += 1;
            continue;
        }
        let previous = {
            let current = &sets[i][0];
            (0..i)
                .rev()
                .take_while(|&j| sets[j][0].chrom == current.chrom)
                .find(|&j| long[j])
                .filter(|&j| current.begin.saturating_sub(sets[j][0].end) <= span)
        };
        let next = {
            let current = &sets[i][0];
            (i + 1..num_sets)
                .take_while(|&j| sets[j][0].chrom == current.chrom)
                .find(|&j| long[j])
                .filter(|&j| sets[j][0].begin.saturating_sub(current.end) <= span)
        };
        match (previous, next) {
            (Some(p), next) if next.map_or(true, |n| qscores[p] >= qscores[n]) => {
                absorb(&mut sets, p, i);
                i += 1;
            }
            (_, Some(n)) => {
                for short in (i..n).rev() {
                    absorb(&mut sets, n, short);
                }
                i = n;
            }
            _ => {
                kept[i] = true;
                i += 1;
            }
        }
    }

    let mut merged: Vec<Vec<Segment>> = Vec::with_capacity(num_sets);
    let mut last_calls: Vec<usize> = Vec::new();
    for (set, keep) in sets.into_iter().zip(kept) {
        if !keep {
            continue;
        }
        let calls: Vec<usize> = set.iter().map(|s| s.copy_number).collect();
        if let Some(last) = merged.last_mut() {
            if calls == last_calls
                && last[0].chrom == set[0].chrom
                && set[0].begin.saturating_sub(last[0].end) < span
            {
                for (target, source) in last.iter_mut().zip(&set) {
                    target.merge_in(source);
                }
                continue;
            }
        }
        last_calls = calls;
        merged.push(set);
    }

    log::info!("Merged {} segment sets into {}", num_sets, merged.len());
    Ok(untranspose_segments(merged, num_samples))
}

/// Merge each sample's segment of set `from` into its segment of set `into`
fn absorb(sets: &mut [Vec<Segment>], into: usize, from: usize) {
    let (target, source) = if into < from {
        let (head, tail) = sets.split_at_mut(from);
        (&mut head[into], &tail[0])
    } else {
        let (head, tail) = sets.split_at_mut(into);
        (&mut tail[0], &head[from])
    };
    for (target, source) in target.iter_mut().zip(source.iter()) {
        target.merge_in(source);
    }
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSummary {
    pub segments: usize,
    pub non_reference: usize,
    pub filtered: usize,
    pub de_novo: usize,
}

pub fn summarize_calls(samples: &[SampleContext], sample_segments: &[Vec<Segment>]) -> CallSummary {
    let mut summary = CallSummary::default();
    for (sample, segments) in samples.iter().zip(sample_segments) {
        for segment in segments {
            summary.segments += 1;
            if segment.copy_number != sample.metrics.get_ploidy(segment) {
                summary.non_reference += 1;
            }
            if segment.filter.is_some() {
                summary.filtered += 1;
            }
            if segment.dq_score.is_some() {
                summary.de_novo += 1;
            }
        }
    }
    summary
}
