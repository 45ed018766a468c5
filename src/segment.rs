//! Genomic segments with their coverage and allele observations

use serde::{Deserialize, Serialize};

/// Read counts supporting the two alleles of a heterozygous site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballele {
    pub position: u32,
    pub counts_a: u32,
    pub counts_b: u32,
}

impl Ballele {
    pub fn new(position: u32, counts_a: u32, counts_b: u32) -> Self {
        Self {
            position,
            counts_a,
            counts_b,
        }
    }

    pub fn total_coverage(&self) -> u32 {
        self.counts_a + self.counts_b
    }
}

/// Allele sites falling inside a segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Balleles {
    sites: Vec<Ballele>,
}

impl Balleles {
    pub fn new(sites: Vec<Ballele>) -> Self {
        Self { sites }
    }

    pub fn push(&mut self, site: Ballele) {
        self.sites.push(site);
    }

    /// Append the sites of a neighbouring segment, keeping position order
    pub fn extend(&mut self, other: &Balleles) {
        self.sites.extend_from_slice(&other.sites);
        self.sites.sort_by_key(|s| s.position);
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ballele> {
        self.sites.iter()
    }

    /// (counts_a, counts_b) per site
    pub fn allele_counts(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sites
            .iter()
            .map(|s| (s.counts_a as usize, s.counts_b as usize))
    }

    pub fn total_coverage(&self) -> Vec<f64> {
        self.sites.iter().map(|s| s.total_coverage() as f64).collect()
    }

    pub fn mean_coverage(&self) -> Option<f64> {
        if self.sites.is_empty() {
            return None;
        }
        let total: f64 = self.sites.iter().map(|s| s.total_coverage() as f64).sum();
        Some(total / self.sites.len() as f64)
    }
}

/// A contiguous interval with aggregated observations and the call fields
/// written back by the caller
#[derive(Debug, Clone)]
pub struct Segment {
    pub chrom: String,
    /// 0-based start
    pub begin: u32,
    /// exclusive end
    pub end: u32,
    pub counts: Vec<f64>,
    pub balleles: Balleles,

    pub copy_number: usize,
    pub major_chromosome_count: Option<usize>,
    /// Phred confidence of the MCC against the other splits of the call
    pub major_chromosome_count_score: Option<f64>,
    pub qscore: f64,
    pub dq_score: Option<f64>,
    pub filter: Option<String>,
}

impl Segment {
    pub fn new(chrom: String, begin: u32, end: u32, counts: Vec<f64>, balleles: Balleles) -> Self {
        Self {
            chrom,
            begin,
            end,
            counts,
            balleles,
            copy_number: 2,
            major_chromosome_count: None,
            major_chromosome_count_score: None,
            qscore: 0.0,
            dq_score: None,
            filter: None,
        }
    }

    pub fn length(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }

    /// Midpoint, used for reference ploidy lookups
    pub fn midpoint(&self) -> u32 {
        self.begin + self.length() / 2
    }

    pub fn region(&self) -> String {
        format!("{}:{}-{}", self.chrom, self.begin + 1, self.end)
    }

    pub fn median_count(&self) -> f64 {
        median(&self.counts).unwrap_or(0.0)
    }

    /// Median of the bin counts after dropping `trimmed_bins` bins from each end.
    /// Trimming only applies when more than five bins would remain.
    pub fn truncated_median_count(&self, trimmed_bins: usize) -> f64 {
        let remaining = self.counts.len().saturating_sub(2 * trimmed_bins);
        if remaining > 5 {
            median(&self.counts[trimmed_bins..self.counts.len() - trimmed_bins]).unwrap_or(0.0)
        } else {
            self.median_count()
        }
    }

    pub fn reset_calls(&mut self) {
        self.copy_number = 2;
        self.major_chromosome_count = None;
        self.major_chromosome_count_score = None;
        self.qscore = 0.0;
        self.dq_score = None;
        self.filter = None;
    }

    /// Absorb a neighbouring segment on the same chromosome. Bins and allele
    /// sites are pooled; the call fields of `self` are kept.
    pub fn merge_in(&mut self, other: &Segment) {
        if other.begin < self.begin {
            let mut counts = other.counts.clone();
            counts.extend_from_slice(&self.counts);
            self.counts = counts;
            self.begin = other.begin;
        } else {
            self.counts.extend_from_slice(&other.counts);
        }
        self.end = self.end.max(other.end);
        self.balleles.extend(&other.balleles);
    }
}

/// Median of a slice, averaging the two middle values for even lengths
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
