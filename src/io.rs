//! Readers for segment, allele, pedigree and ploidy files and the call table writer

use crate::ploidy::{PloidyInterval, ReferencePloidy};
use crate::segment::{Ballele, Balleles, Segment};
use crate::utils::{create_writer, open_reader};
use crate::{Kinship, PedcnvError, PedcnvResult, SampleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SegmentRecord {
    chrom: String,
    start: u32,
    end: u32,
    bin_counts: String,
}

#[derive(Debug, Deserialize)]
struct AlleleRecord {
    chrom: String,
    position: u32,
    counts_a: u32,
    counts_b: u32,
}

fn tsv_reader<P: AsRef<Path>>(path: P, has_headers: bool) -> PedcnvResult<csv::Reader<Box<dyn BufRead + Send>>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .comment(Some(b'#'))
        .from_reader(open_reader(path)?))
}

fn parse_bin_counts(field: &str, region: &str) -> PedcnvResult<Vec<f64>> {
    field
        .split(',')
        .filter(|c| !c.trim().is_empty())
        .map(|c| {
            c.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| PedcnvError::InvalidSegment(format!("invalid bin count '{}' at {}", c, region)))
        })
        .collect()
}

/// Segments of one sample, header `chrom start end bin_counts` with
/// comma-separated bin counts; 0-based half-open coordinates
pub fn read_segments<P: AsRef<Path>>(path: P) -> PedcnvResult<Vec<Segment>> {
    let mut reader = tsv_reader(&path, true)?;
    let mut segments = Vec::new();
    for result in reader.deserialize() {
        let record: SegmentRecord = result?;
        if record.end <= record.start {
            return Err(PedcnvError::InvalidSegment(format!(
                "{}:{}-{} has no length",
                record.chrom, record.start, record.end
            )));
        }
        let region = format!("{}:{}-{}", record.chrom, record.start, record.end);
        let counts = parse_bin_counts(&record.bin_counts, &region)?;
        if counts.is_empty() {
            return Err(PedcnvError::InvalidSegment(format!("{} has no bin counts", region)));
        }
        segments.push(Segment::new(record.chrom, record.start, record.end, counts, Balleles::default()));
    }
    log::info!("Read {} segments from {}", segments.len(), path.as_ref().display());
    Ok(segments)
}

/// Attach allele sites (header `chrom position counts_a counts_b`, 0-based
/// positions) to the segments containing them. Returns the number of sites
/// that fell inside a segment.
pub fn attach_alleles<P: AsRef<Path>>(segments: &mut [Segment], path: P) -> PedcnvResult<usize> {
    let mut by_chrom: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, segment) in segments.iter().enumerate() {
        by_chrom.entry(segment.chrom.clone()).or_default().push(i);
    }
    for indices in by_chrom.values_mut() {
        indices.sort_by_key(|&i| segments[i].begin);
    }

    let mut reader = tsv_reader(&path, true)?;
    let mut attached = 0;
    let mut skipped = 0;
    for result in reader.deserialize() {
        let record: AlleleRecord = result?;
        let target = by_chrom.get(&record.chrom).and_then(|indices| {
            let after = indices.partition_point(|&i| segments[i].begin <= record.position);
            after
                .checked_sub(1)
                .map(|k| indices[k])
                .filter(|&i| record.position < segments[i].end)
        });
        match target {
            Some(i) => {
                segments[i]
                    .balleles
                    .push(Ballele::new(record.position, record.counts_a, record.counts_b));
                attached += 1;
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::debug!("{} allele sites outside any segment in {}", skipped, path.as_ref().display());
    }
    log::info!("Attached {} allele sites from {}", attached, path.as_ref().display());
    Ok(attached)
}

/// One line of a PED file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PedRecord {
    pub family: String,
    pub individual: SampleId,
    pub paternal: String,
    pub maternal: String,
}

impl PedRecord {
    pub fn is_founder(&self) -> bool {
        self.paternal == "0" && self.maternal == "0"
    }
}

/// Tab-separated PED file; only the first four columns are used
pub fn read_pedigree<P: AsRef<Path>>(path: P) -> PedcnvResult<Vec<PedRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(open_reader(&path)?);
    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.len() < 4 {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(PedcnvError::InvalidPedigree(format!(
                "line {} of {} has {} columns, expected at least 4",
                line,
                path.as_ref().display(),
                record.len()
            )));
        }
        records.push(PedRecord {
            family: record[0].to_string(),
            individual: SampleId::new(&record[1]),
            paternal: record[2].to_string(),
            maternal: record[3].to_string(),
        });
    }
    Ok(records)
}

/// Pedigree order of the given samples: parents, then offspring, then every
/// sample the PED file does not place, each group in input order
pub fn pedigree_members(samples: &[SampleId], records: &[PedRecord]) -> Vec<(SampleId, Kinship)> {
    let kinship_of = |sample: &SampleId| {
        match records.iter().find(|r| r.individual == *sample) {
            Some(record) if record.is_founder() => Kinship::Parent,
            Some(record) => {
                let known = |parent: &str| samples.iter().any(|s| s.as_str() == parent);
                if !known(&record.paternal) || !known(&record.maternal) {
                    log::warn!("Parents of {} are not among the called samples", sample);
                }
                Kinship::Offspring
            }
            None => Kinship::Other,
        }
    };
    let kinships: Vec<Kinship> = samples.iter().map(kinship_of).collect();

    [Kinship::Parent, Kinship::Offspring, Kinship::Other]
        .into_iter()
        .flat_map(|group| {
            samples
                .iter()
                .zip(&kinships)
                .filter(move |(_, k)| **k == group)
                .map(|(s, &k)| (s.clone(), k))
        })
        .collect()
}

/// Reference ploidy BED with columns `chrom start end sample ploidy`
pub fn read_ploidy_bed<P: AsRef<Path>>(path: P) -> PedcnvResult<HashMap<SampleId, ReferencePloidy>> {
    let mut reader = tsv_reader(&path, false)?;
    let mut intervals: HashMap<SampleId, Vec<PloidyInterval>> = HashMap::new();
    for result in reader.deserialize() {
        let (chrom, start, end, sample, ploidy): (String, u32, u32, String, usize) = result?;
        intervals
            .entry(SampleId::new(sample))
            .or_default()
            .push(PloidyInterval {
                chrom,
                start,
                end,
                ploidy,
            });
    }
    Ok(intervals
        .into_iter()
        .map(|(sample, intervals)| (sample, ReferencePloidy::new(intervals)))
        .collect())
}

#[derive(Debug, Serialize)]
struct CallRecord<'a> {
    sample: &'a str,
    chrom: &'a str,
    start: u32,
    end: u32,
    copy_number: usize,
    major_chromosome_count: Option<usize>,
    major_chromosome_count_score: Option<f64>,
    qscore: f64,
    dq_score: Option<f64>,
    filter: &'a str,
}

/// Per-sample call table, one row per sample and segment
pub fn write_calls<P: AsRef<Path>>(path: P, samples: &[SampleId], segments: &[Vec<Segment>]) -> PedcnvResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(create_writer(&path)?);
    for (sample, sample_segments) in samples.iter().zip(segments) {
        for segment in sample_segments {
            writer.serialize(CallRecord {
                sample: sample.as_str(),
                chrom: &segment.chrom,
                start: segment.begin,
                end: segment.end,
                copy_number: segment.copy_number,
                major_chromosome_count: segment.major_chromosome_count,
                major_chromosome_count_score: segment.major_chromosome_count_score,
                qscore: segment.qscore,
                dq_score: segment.dq_score,
                filter: segment.filter.as_deref().unwrap_or("PASS"),
            })?;
        }
    }
    writer.into_inner().map_err(|e| e.into_error())?.finish()?;
    log::info!("Wrote calls to {}", path.as_ref().display());
    Ok(())
}
