//! Reference ploidy intervals per sample

use crate::segment::Segment;

pub const DEFAULT_PLOIDY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PloidyInterval {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub ploidy: usize,
}

/// Expected copy number of a sample's genome where it differs from diploid
/// (sex chromosomes, known aneuploidies)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencePloidy {
    intervals: Vec<PloidyInterval>,
}

impl ReferencePloidy {
    pub fn new(mut intervals: Vec<PloidyInterval>) -> Self {
        intervals.sort_by(|a, b| a.chrom.cmp(&b.chrom).then(a.start.cmp(&b.start)));
        Self { intervals }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Ploidy of the interval holding the segment midpoint, diploid elsewhere
    pub fn get_ploidy(&self, segment: &Segment) -> usize {
        let midpoint = segment.midpoint();
        self.intervals
            .iter()
            .find(|interval| {
                interval.chrom == segment.chrom && interval.start <= midpoint && midpoint < interval.end
            })
            .map(|interval| interval.ploidy)
            .unwrap_or(DEFAULT_PLOIDY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Balleles;

    #[test]
    fn test_get_ploidy() {
        let ploidy = ReferencePloidy::new(vec![PloidyInterval {
            chrom: "chrX".to_string(),
            start: 2_700_000,
            end: 154_900_000,
            ploidy: 1,
        }]);

        let x_segment = Segment::new("chrX".to_string(), 5_000_000, 6_000_000, vec![], Balleles::default());
        let par_segment = Segment::new("chrX".to_string(), 10_000, 20_000, vec![], Balleles::default());
        let autosome = Segment::new("chr1".to_string(), 5_000_000, 6_000_000, vec![], Balleles::default());

        assert_eq!(ploidy.get_ploidy(&x_segment), 1);
        assert_eq!(ploidy.get_ploidy(&par_segment), 2);
        assert_eq!(ploidy.get_ploidy(&autosome), 2);
        assert_eq!(ReferencePloidy::default().get_ploidy(&x_segment), DEFAULT_PLOIDY);
    }
}
