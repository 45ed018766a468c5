//! Per-sample bedGraph tracks: normalized bin coverage and called copy number

use crate::segment::{median, Segment};
use crate::utils::create_writer;
use crate::PedcnvResult;
use std::io::Write;
use std::path::Path;

/// One bedGraph line, 0-based half-open
#[derive(Debug, Clone, PartialEq)]
pub struct BedGraphEntry {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub value: f64,
}

impl BedGraphEntry {
    pub fn to_line(&self) -> String {
        format!("{}\t{}\t{}\t{}", self.chrom, self.start, self.end, self.value)
    }
}

/// Lower weighted median of `(value, weight)` pairs
pub fn weighted_median(values: &[(f64, f64)]) -> Option<f64> {
    let mut sorted: Vec<(f64, f64)> = values
        .iter()
        .copied()
        .filter(|(v, w)| v.is_finite() && *w > 0.0)
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    let mut cumulative = 0.0;
    for (value, weight) in sorted {
        cumulative += weight;
        if cumulative >= total / 2.0 {
            return Some(value);
        }
    }
    None
}

/// Factor turning raw bin counts into copy-number units: the bin-weighted
/// median of CN over median count across the called segments. Only passing
/// segments are used when there are any; CN0 segments never are. Returns 0
/// when nothing is left to estimate from.
pub fn normalization_factor(segments: &[Segment]) -> f64 {
    let any_pass = segments.iter().any(|s| s.filter.is_none());
    let factors: Vec<(f64, f64)> = segments
        .iter()
        .filter(|s| !any_pass || s.filter.is_none())
        .filter(|s| s.copy_number != 0)
        .filter_map(|s| {
            let median_count = median(&s.counts)?;
            (median_count > 0.0).then(|| (s.copy_number as f64 / median_count, s.counts.len() as f64))
        })
        .collect();
    weighted_median(&factors).unwrap_or(0.0)
}

/// Normalized coverage of every bin. Bins tile their segment evenly since
/// the segment files carry counts without bin coordinates.
pub fn normalized_coverage(segments: &[Segment]) -> Vec<BedGraphEntry> {
    let factor = normalization_factor(segments);
    log::debug!("Coverage normalization factor {:.6}", factor);
    segments
        .iter()
        .flat_map(|segment| {
            let num_bins = segment.counts.len() as u64;
            let length = segment.length() as u64;
            segment.counts.iter().enumerate().map(move |(i, count)| {
                let bin_start = |i: u64| segment.begin + (i * length / num_bins) as u32;
                BedGraphEntry {
                    chrom: segment.chrom.clone(),
                    start: bin_start(i as u64),
                    end: bin_start(i as u64 + 1),
                    value: count * factor,
                }
            })
        })
        .filter(|entry| entry.end > entry.start)
        .collect()
}

/// Called copy number of passing segments that differ from the reference
/// ploidy or are copy-neutral LOH
pub fn copy_number_track<F>(segments: &[Segment], ploidy: F) -> Vec<BedGraphEntry>
where
    F: Fn(&Segment) -> usize,
{
    segments
        .iter()
        .filter(|s| s.filter.is_none())
        .filter(|s| s.copy_number != ploidy(s) || s.major_chromosome_count == Some(s.copy_number))
        .map(|s| BedGraphEntry {
            chrom: s.chrom.clone(),
            start: s.begin,
            end: s.end,
            value: s.copy_number as f64,
        })
        .collect()
}

/// Write a bedGraph track, gzip-compressed when the path ends in .gz
pub fn write_bedgraph<P: AsRef<Path>>(path: P, entries: &[BedGraphEntry]) -> PedcnvResult<()> {
    let mut writer = create_writer(&path)?;
    for entry in entries {
        writeln!(writer, "{}", entry.to_line())?;
    }
    writer.finish()?;
    log::info!("Wrote {} bedGraph entries to {}", entries.len(), path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Balleles;
    use tempfile::tempdir;

    fn called(chrom: &str, begin: u32, end: u32, counts: Vec<f64>, copy_number: usize) -> Segment {
        let mut segment = Segment::new(chrom.to_string(), begin, end, counts, Balleles::default());
        segment.copy_number = copy_number;
        segment
    }

    #[test]
    fn test_weighted_median() {
        assert_eq!(weighted_median(&[]), None);
        assert_eq!(weighted_median(&[(3.0, 1.0), (1.0, 1.0), (2.0, 1.0)]), Some(2.0));
        assert_eq!(weighted_median(&[(1.0, 1.0), (5.0, 10.0)]), Some(5.0));
        assert_eq!(weighted_median(&[(1.0, 0.0), (f64::NAN, 4.0)]), None);
    }

    #[test]
    fn test_normalization_factor() {
        // diploid at 100 per bin, so one copy is 50 reads
        let mut segments = vec![
            called("chr1", 0, 1000, vec![100.0; 10], 2),
            called("chr1", 1000, 2000, vec![0.0; 10], 0),
            called("chr2", 0, 500, vec![150.0; 2], 2),
        ];
        assert!((normalization_factor(&segments) - 0.02).abs() < 1e-12);

        // filtered segments only count when nothing passes
        segments[0].filter = Some("q10".to_string());
        assert!((normalization_factor(&segments) - 2.0 / 150.0).abs() < 1e-12);
        segments[2].filter = Some("q10".to_string());
        assert_eq!(normalization_factor(&segments), 0.0);
        segments[1].filter = Some("q10".to_string());
        assert!((normalization_factor(&segments) - 0.02).abs() < 1e-12);

        assert_eq!(normalization_factor(&[called("chr1", 0, 1000, vec![10.0], 0)]), 0.0);
    }

    #[test]
    fn test_normalized_coverage_tiles_segments() {
        let segments = vec![
            called("chr1", 0, 1000, vec![100.0, 100.0, 50.0], 2),
            called("chr1", 1000, 1001, vec![100.0, 100.0], 2),
        ];
        let entries = normalized_coverage(&segments);
        let bounds: Vec<(u32, u32)> = entries.iter().map(|e| (e.start, e.end)).collect();
        assert_eq!(bounds, vec![(0, 333), (333, 666), (666, 1000), (1000, 1001)]);
        assert!((entries[0].value - 2.0).abs() < 1e-12);
        assert!((entries[2].value - 1.0).abs() < 1e-12);
        let entry = BedGraphEntry {
            chrom: "chr1".to_string(),
            start: 0,
            end: 333,
            value: 2.5,
        };
        assert_eq!(entry.to_line(), "chr1\t0\t333\t2.5");
    }

    #[test]
    fn test_copy_number_track() {
        let mut loss = called("chr1", 0, 1000, vec![50.0], 1);
        loss.major_chromosome_count = Some(1);
        let mut reference = called("chr1", 1000, 2000, vec![100.0], 2);
        reference.major_chromosome_count = Some(1);
        let mut loh = called("chr1", 2000, 3000, vec![100.0], 2);
        loh.major_chromosome_count = Some(2);
        let mut filtered = called("chr1", 3000, 4000, vec![150.0], 3);
        filtered.filter = Some("q10".to_string());
        let male_x = called("chrX", 0, 1000, vec![50.0], 1);

        let segments = vec![loss, reference, loh, filtered, male_x];
        let track = copy_number_track(&segments, |s| if s.chrom == "chrX" { 1 } else { 2 });
        let starts: Vec<(&str, u32, f64)> = track.iter().map(|e| (e.chrom.as_str(), e.start, e.value)).collect();
        assert_eq!(starts, vec![("chr1", 0, 1.0), ("chr1", 2000, 2.0)]);
    }

    #[test]
    fn test_write_bedgraph() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("child.coverage.bedgraph.gz");
        let entries = normalized_coverage(&[called("chr1", 0, 100, vec![100.0, 50.0], 2)]);
        write_bedgraph(&path, &entries).unwrap();

        let mut content = String::new();
        std::io::Read::read_to_string(&mut crate::utils::open_reader(&path).unwrap(), &mut content).unwrap();
        let lines: Vec<Vec<&str>> = content.lines().map(|l| l.split('\t').collect()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1][..3], ["chr1", "50", "100"]);
        let value: f64 = lines[0][3].parse().unwrap();
        assert!((value - 8.0 / 3.0).abs() < 1e-9);
    }
}
