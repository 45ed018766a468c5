//! Copy-number genotypes, phased and unphased

use std::fmt;
use std::hash::{Hash, Hasher};

/// Copy numbers carried on each of the two parental haplotypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhasedGenotype {
    pub copy_number_a: usize,
    pub copy_number_b: usize,
}

impl PhasedGenotype {
    pub fn new(copy_number_a: usize, copy_number_b: usize) -> Self {
        Self {
            copy_number_a,
            copy_number_b,
        }
    }

    pub fn total_copy_number(&self) -> usize {
        self.copy_number_a + self.copy_number_b
    }

    pub fn major_chromosome_count(&self) -> usize {
        self.copy_number_a.max(self.copy_number_b)
    }

    /// True if either haplotype carries `copy_number` copies
    pub fn contains_allele(&self, copy_number: usize) -> bool {
        self.copy_number_a == copy_number || self.copy_number_b == copy_number
    }
}

impl fmt::Display for PhasedGenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.copy_number_a, self.copy_number_b)
    }
}

/// A copy-number genotype, optionally resolved into haplotypes.
///
/// Two phased genotypes compare by their ordered haplotype pair. Any comparison
/// involving an unphased genotype falls back to the total copy number, so
/// `Genotype::create(3) == Genotype::phased(2, 1)`. Hashing only looks at the
/// total copy number, which keeps it consistent with this equality.
#[derive(Debug, Clone, Copy)]
pub struct Genotype {
    total_copy_number: usize,
    phased: Option<PhasedGenotype>,
}

impl Genotype {
    pub fn create(total_copy_number: usize) -> Self {
        Self {
            total_copy_number,
            phased: None,
        }
    }

    pub fn phased(copy_number_a: usize, copy_number_b: usize) -> Self {
        Self::from_phased(PhasedGenotype::new(copy_number_a, copy_number_b))
    }

    pub fn from_phased(phased: PhasedGenotype) -> Self {
        Self {
            total_copy_number: phased.total_copy_number(),
            phased: Some(phased),
        }
    }

    pub fn total_copy_number(&self) -> usize {
        self.total_copy_number
    }

    pub fn phased_genotype(&self) -> Option<PhasedGenotype> {
        self.phased
    }

    pub fn has_alleles(&self) -> bool {
        self.phased.is_some()
    }

    /// Drop the haplotype resolution and keep the total copy number
    pub fn unphased(&self) -> Self {
        Self::create(self.total_copy_number)
    }
}

impl PartialEq for Genotype {
    fn eq(&self, other: &Self) -> bool {
        match (self.phased, other.phased) {
            (Some(a), Some(b)) => a == b,
            _ => self.total_copy_number == other.total_copy_number,
        }
    }
}

impl Eq for Genotype {}

impl Hash for Genotype {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.total_copy_number.hash(state);
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phased {
            Some(phased) => write!(f, "{}", phased),
            None => write!(f, "{}", self.total_copy_number),
        }
    }
}

/// Total copy-number genotypes 0..maximum_copy_number
pub fn total_genotypes(maximum_copy_number: usize) -> Vec<Genotype> {
    (0..maximum_copy_number).map(Genotype::create).collect()
}

/// Every ordered haplotype split (gt, cn - gt) for cn in 0..maximum_copy_number
pub fn phased_genotypes(maximum_copy_number: usize) -> Vec<Genotype> {
    let mut genotypes = Vec::with_capacity(maximum_copy_number * (maximum_copy_number + 1) / 2);
    for copy_number in 0..maximum_copy_number {
        for gt in 0..=copy_number {
            genotypes.push(Genotype::phased(gt, copy_number - gt));
        }
    }
    genotypes
}

/// Haplotype splits of a single total copy number
pub fn phased_splits(copy_number: usize) -> Vec<PhasedGenotype> {
    (0..=copy_number)
        .map(|a| PhasedGenotype::new(a, copy_number - a))
        .collect()
}

/// Per-haplotype copy numbers an unphased total copy number can contribute
pub fn copy_number_alleles(copy_number: usize) -> Vec<usize> {
    match copy_number {
        0 => vec![0],
        1 => vec![0, 1],
        n => (1..=n).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_phased_total_copy_number() {
        for a in 0..5 {
            for b in 0..5 {
                assert_eq!(Genotype::phased(a, b).total_copy_number(), a + b);
            }
        }
    }

    #[test]
    fn test_genotype_equality() {
        assert_eq!(Genotype::create(3), Genotype::phased(2, 1));
        assert_eq!(Genotype::phased(2, 1), Genotype::create(3));
        assert_ne!(Genotype::phased(2, 1), Genotype::phased(1, 2));
        assert_eq!(Genotype::phased(1, 2), Genotype::phased(1, 2));
        assert_ne!(Genotype::create(2), Genotype::create(3));
        assert_eq!(Genotype::phased(2, 1).unphased(), Genotype::phased(1, 2).unphased());
    }

    #[test]
    fn test_genotype_hash_consistent_with_eq() {
        let mut set = HashSet::new();
        set.insert(Genotype::phased(2, 1));
        set.insert(Genotype::phased(1, 2));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Genotype::phased(1, 2)));

        let mut unphased = HashSet::new();
        unphased.insert(Genotype::create(3));
        assert!(unphased.contains(&Genotype::phased(0, 3)));
    }

    #[test]
    fn test_phased_genotype_universe() {
        let genotypes = phased_genotypes(5);
        assert_eq!(genotypes.len(), 15);
        assert!(genotypes.iter().all(|g| g.total_copy_number() < 5));
        assert!(genotypes.contains(&Genotype::phased(0, 4)));
        assert!(genotypes.contains(&Genotype::phased(4, 0)));
        assert_eq!(total_genotypes(5).len(), 5);
    }

    #[test]
    fn test_copy_number_alleles() {
        assert_eq!(copy_number_alleles(0), vec![0]);
        assert_eq!(copy_number_alleles(1), vec![0, 1]);
        assert_eq!(copy_number_alleles(2), vec![1, 2]);
        assert_eq!(copy_number_alleles(4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_major_chromosome_count() {
        assert_eq!(PhasedGenotype::new(0, 3).major_chromosome_count(), 3);
        assert_eq!(PhasedGenotype::new(2, 1).major_chromosome_count(), 2);
        assert_eq!(phased_splits(2).len(), 3);
    }
}
