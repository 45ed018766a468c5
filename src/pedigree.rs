//! Pedigree layout, genotype universes and inheritance probabilities

use crate::distribution::{log_density, poisson_pmf};
use crate::genotype::{phased_genotypes, total_genotypes, Genotype};
use crate::{CallerConfig, Kinship, PedcnvError, PedcnvResult, SampleId};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashSet;

const MIN_TRANSMISSION_MEAN: f64 = 0.1;

/// Immutable description of a pedigree, shared by every worker
#[derive(Debug, Clone)]
pub struct PedigreeInfo {
    sample_ids: Vec<SampleId>,
    kinships: Vec<Kinship>,
    parent_indices: Vec<usize>,
    offspring_indices: Vec<usize>,
    phased_universe: Vec<Genotype>,
    total_universe: Vec<Genotype>,
    offspring_phased_genotypes: Vec<Vec<Genotype>>,
    offspring_total_genotypes: Vec<Vec<Genotype>>,
    transition_matrix: Vec<Vec<f64>>,
    de_novo_rate: f64,
    max_num_offspring_genotypes: usize,
    seed: u64,
}

impl PedigreeInfo {
    /// Build from samples in pedigree order
    pub fn new(members: &[(SampleId, Kinship)], config: &CallerConfig) -> PedcnvResult<Self> {
        let parent_indices: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, (_, kinship))| *kinship == Kinship::Parent)
            .map(|(i, _)| i)
            .collect();
        let offspring_indices: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, (_, kinship))| *kinship == Kinship::Offspring)
            .map(|(i, _)| i)
            .collect();

        if !offspring_indices.is_empty() && parent_indices.len() != 2 {
            return Err(PedcnvError::InvalidPedigree(format!(
                "{} offspring require exactly two parents, found {}",
                offspring_indices.len(),
                parent_indices.len()
            )));
        }

        let phased_universe = phased_genotypes(config.maximum_copy_number);
        let total_universe = total_genotypes(config.maximum_copy_number);
        let num_offspring = offspring_indices.len();
        let offspring_phased_genotypes = bounded_combinations(
            &vec![phased_universe.clone(); num_offspring],
            config.max_num_offspring_genotypes,
            config.seed,
        );
        let offspring_total_genotypes = bounded_combinations(
            &vec![total_universe.clone(); num_offspring],
            config.max_num_offspring_genotypes,
            config.seed,
        );

        log::debug!(
            "Pedigree with {} parents and {} offspring, {} phased offspring combinations",
            parent_indices.len(),
            num_offspring,
            offspring_phased_genotypes.len()
        );

        Ok(Self {
            sample_ids: members.iter().map(|(id, _)| id.clone()).collect(),
            kinships: members.iter().map(|(_, kinship)| *kinship).collect(),
            parent_indices,
            offspring_indices,
            phased_universe,
            total_universe,
            offspring_phased_genotypes,
            offspring_total_genotypes,
            transition_matrix: transition_matrix(config.maximum_copy_number)?,
            de_novo_rate: config.de_novo_rate,
            max_num_offspring_genotypes: config.max_num_offspring_genotypes,
            seed: config.seed,
        })
    }

    pub fn sample_ids(&self) -> &[SampleId] {
        &self.sample_ids
    }

    pub fn kinship(&self, index: usize) -> Option<Kinship> {
        self.kinships.get(index).copied()
    }

    pub fn parent_indices(&self) -> &[usize] {
        &self.parent_indices
    }

    pub fn offspring_indices(&self) -> &[usize] {
        &self.offspring_indices
    }

    /// Two parents and at least one offspring
    pub fn is_full_pedigree(&self) -> bool {
        self.parent_indices.len() == 2 && !self.offspring_indices.is_empty()
    }

    /// Parents followed by offspring, the order joint assignments are stored in
    pub fn family_indices(&self) -> Vec<usize> {
        self.parent_indices
            .iter()
            .chain(self.offspring_indices.iter())
            .copied()
            .collect()
    }

    pub fn parental_genotypes(&self, phased: bool) -> &[Genotype] {
        if phased {
            &self.phased_universe
        } else {
            &self.total_universe
        }
    }

    /// Bounded combinations of the full genotype universe across all offspring
    pub fn offspring_genotypes(&self, phased: bool) -> &[Vec<Genotype>] {
        if phased {
            &self.offspring_phased_genotypes
        } else {
            &self.offspring_total_genotypes
        }
    }

    pub fn transition_matrix(&self) -> &[Vec<f64>] {
        &self.transition_matrix
    }

    /// Combinations of the precomputed offspring list whose every genotype is
    /// among that offspring's candidates. When the list holds none of them the
    /// candidate sets are combined directly under the same budget.
    pub fn offspring_combinations(&self, candidates: &[Vec<Genotype>], phased: bool) -> Vec<Vec<Genotype>> {
        if candidates.len() == self.offspring_indices.len() {
            let retained: Vec<Vec<Genotype>> = self
                .offspring_genotypes(phased)
                .iter()
                .filter(|combination| {
                    combination
                        .iter()
                        .zip(candidates)
                        .all(|(genotype, set)| set.contains(genotype))
                })
                .cloned()
                .collect();
            if !retained.is_empty() {
                return retained;
            }
        }
        log::trace!("No precomputed offspring combination fits the candidates, combining them directly");
        bounded_combinations(candidates, self.max_num_offspring_genotypes, self.seed)
    }

    /// Probability of a child's total copy number given both parents' totals:
    /// each parent transmits a Poisson number of copies
    pub fn total_copy_number_transmission(&self, parent1: usize, parent2: usize, child: usize) -> f64 {
        let (Some(row1), Some(row2)) = (self.transition_matrix.get(parent1), self.transition_matrix.get(parent2))
        else {
            return 0.0;
        };
        (0..=child)
            .filter_map(|a| Some(row1.get(a)? * row2.get(child - a)?))
            .sum()
    }

    /// 1 when each child haplotype is found in the corresponding parent, the
    /// de novo rate otherwise
    pub fn phased_transmission(&self, parent1: &Genotype, parent2: &Genotype, child: &Genotype) -> f64 {
        match (parent1.phased_genotype(), parent2.phased_genotype(), child.phased_genotype()) {
            (Some(p1), Some(p2), Some(c)) => {
                if p1.contains_allele(c.copy_number_a) && p2.contains_allele(c.copy_number_b) {
                    1.0
                } else {
                    self.de_novo_rate
                }
            }
            _ => self.total_copy_number_transmission(
                parent1.total_copy_number(),
                parent2.total_copy_number(),
                child.total_copy_number(),
            ),
        }
    }

    /// Log transmission probability, phased rule when all three genotypes are phased
    pub fn transmission_log_likelihood(&self, parent1: &Genotype, parent2: &Genotype, child: &Genotype) -> f64 {
        log_density(self.phased_transmission(parent1, parent2, child))
    }
}

/// T[cn][k]: probability that a parent with `cn` copies transmits `k` copies
pub fn transition_matrix(num_cn_states: usize) -> PedcnvResult<Vec<Vec<f64>>> {
    let mut matrix = vec![vec![0.0; num_cn_states]; num_cn_states];
    if num_cn_states == 0 {
        return Ok(matrix);
    }
    matrix[0][0] = 1.0;
    for (copy_number, row) in matrix.iter_mut().enumerate().skip(1) {
        let lambda = (copy_number as f64 / 2.0).max(MIN_TRANSMISSION_MEAN);
        for (transmitted, value) in row.iter_mut().enumerate() {
            *value = poisson_pmf(lambda, transmitted)?;
        }
    }
    Ok(matrix)
}

/// Lazy Cartesian product over a list of sets, last set varying fastest
pub struct CartesianProduct<'a, T> {
    sets: &'a [Vec<T>],
    indices: Vec<usize>,
    done: bool,
}

impl<'a, T: Clone> CartesianProduct<'a, T> {
    pub fn new(sets: &'a [Vec<T>]) -> Self {
        Self {
            sets,
            indices: vec![0; sets.len()],
            done: sets.iter().any(|set| set.is_empty()),
        }
    }

    /// Number of tuples, None on overflow
    pub fn count_combinations(sets: &[Vec<T>]) -> Option<usize> {
        sets.iter().try_fold(1usize, |acc, set| acc.checked_mul(set.len()))
    }
}

impl<T: Clone> Iterator for CartesianProduct<'_, T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self
            .indices
            .iter()
            .zip(self.sets)
            .map(|(&i, set)| set[i].clone())
            .collect();

        for position in (0..self.sets.len()).rev() {
            self.indices[position] += 1;
            if self.indices[position] < self.sets[position].len() {
                return Some(item);
            }
            self.indices[position] = 0;
        }
        self.done = true;
        Some(item)
    }
}

/// All combinations when they fit in `cap`, otherwise `cap` distinct ones
/// drawn uniformly with a seeded generator. The product is never walked when
/// sampling: flat indices are drawn and decoded, or whole tuples are drawn when
/// the product does not fit in `usize`.
pub fn bounded_combinations<T: Clone>(sets: &[Vec<T>], cap: usize, seed: u64) -> Vec<Vec<T>> {
    if sets.iter().any(|set| set.is_empty()) {
        return Vec::new();
    }
    let count = CartesianProduct::count_combinations(sets);
    if let Some(count) = count {
        if count <= cap {
            return CartesianProduct::new(sets).collect();
        }
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    match count {
        Some(count) => rand::seq::index::sample(&mut rng, count, cap)
            .into_iter()
            .map(|flat| decode_combination(sets, flat))
            .collect(),
        None => {
            let mut seen: HashSet<Vec<usize>> = HashSet::with_capacity(cap);
            let mut combinations = Vec::with_capacity(cap);
            while combinations.len() < cap {
                let indices: Vec<usize> = sets.iter().map(|set| rng.gen_range(0..set.len())).collect();
                if seen.insert(indices.clone()) {
                    combinations.push(indices.iter().zip(sets).map(|(&i, set)| set[i].clone()).collect());
                }
            }
            combinations
        }
    }
}

/// Mixed-radix decoding of a flat product index, last set varying fastest
fn decode_combination<T: Clone>(sets: &[Vec<T>], mut flat: usize) -> Vec<T> {
    let mut combination = Vec::with_capacity(sets.len());
    for set in sets.iter().rev() {
        combination.push(set[flat % set.len()].clone());
        flat /= set.len();
    }
    combination.reverse();
    combination
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trio(num_offspring: usize) -> Vec<(SampleId, Kinship)> {
        let mut members = vec![
            (SampleId::new("mother"), Kinship::Parent),
            (SampleId::new("father"), Kinship::Parent),
        ];
        for i in 0..num_offspring {
            members.push((SampleId::new(format!("child{}", i)), Kinship::Offspring));
        }
        members
    }

    #[test]
    fn test_transition_matrix() {
        let matrix = transition_matrix(5).unwrap();
        assert_eq!(matrix[0][0], 1.0);
        assert!(matrix[0][1..].iter().all(|&p| p == 0.0));
        for row in &matrix {
            let total: f64 = row.iter().sum();
            assert!(total <= 1.0 + 1e-12);
            assert!(total > 0.0);
        }
        // diploid parent transmits a single copy with Poisson(1) probability
        assert!((matrix[2][1] - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_cartesian_product() {
        let sets = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        let tuples: Vec<Vec<i32>> = CartesianProduct::new(&sets).collect();
        assert_eq!(tuples.len(), 6);
        assert_eq!(tuples[0], vec![1, 3, 4]);
        assert_eq!(tuples[5], vec![2, 3, 6]);

        let empty: Vec<Vec<i32>> = vec![];
        assert_eq!(CartesianProduct::new(&empty).collect::<Vec<_>>(), vec![Vec::<i32>::new()]);

        let with_empty_set = vec![vec![1], vec![]];
        assert_eq!(CartesianProduct::new(&with_empty_set).count(), 0);
    }

    #[test]
    fn test_bounded_combinations_deterministic() {
        let sets = vec![(0..15).collect::<Vec<usize>>(); 3];
        let first = bounded_combinations(&sets, 500, 7);
        let second = bounded_combinations(&sets, 500, 7);
        assert_eq!(first.len(), 500);
        assert_eq!(first, second);

        let mut distinct = first.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 500);

        let small = bounded_combinations(&sets[..2], 500, 7);
        assert_eq!(small.len(), 225);
    }

    #[test]
    fn test_decode_combination_matches_product_order() {
        let sets = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        let tuples: Vec<Vec<i32>> = CartesianProduct::new(&sets).collect();
        for (flat, tuple) in tuples.iter().enumerate() {
            assert_eq!(&decode_combination(&sets, flat), tuple);
        }
    }

    #[test]
    fn test_bounded_combinations_large_products() {
        // 15^8 fits in usize, 15^20 does not
        for num_sets in [8, 20] {
            let sets = vec![(0..15).collect::<Vec<usize>>(); num_sets];
            let sample = bounded_combinations(&sets, 500, 3);
            assert_eq!(sample.len(), 500);
            assert!(sample.iter().all(|c| c.len() == num_sets && c.iter().all(|&g| g < 15)));
            let mut distinct = sample.clone();
            distinct.sort();
            distinct.dedup();
            assert_eq!(distinct.len(), 500);
            assert_eq!(sample, bounded_combinations(&sets, 500, 3));
        }
        assert!(bounded_combinations(&[vec![1], Vec::<i32>::new()], 5, 0).is_empty());
    }

    #[test]
    fn test_pedigree_info_layout() {
        let pedigree = PedigreeInfo::new(&trio(1), &CallerConfig::default()).unwrap();
        assert!(pedigree.is_full_pedigree());
        assert_eq!(pedigree.parent_indices(), &[0, 1]);
        assert_eq!(pedigree.offspring_indices(), &[2]);
        assert_eq!(pedigree.parental_genotypes(true).len(), 15);
        assert_eq!(pedigree.offspring_genotypes(true).len(), 15);
        assert_eq!(pedigree.offspring_genotypes(false).len(), 5);
    }

    #[test]
    fn test_offspring_genotypes_bounded() {
        let pedigree = PedigreeInfo::new(&trio(3), &CallerConfig::default()).unwrap();
        assert_eq!(pedigree.offspring_genotypes(true).len(), 500);
        assert_eq!(pedigree.offspring_genotypes(false).len(), 125);
    }

    #[test]
    fn test_offspring_combinations_come_from_bounded_list() {
        let pedigree = PedigreeInfo::new(&trio(3), &CallerConfig::default()).unwrap();
        let precomputed = pedigree.offspring_genotypes(true);
        let universe = pedigree.parental_genotypes(true);

        // candidates built around one precomputed combination so the filter keeps it
        let anchor = precomputed[0].clone();
        let candidates: Vec<Vec<Genotype>> = anchor
            .iter()
            .map(|genotype| {
                let mut set = vec![*genotype];
                set.extend(universe.iter().filter(|g| *g != genotype).take(2).copied());
                set
            })
            .collect();
        let combinations = pedigree.offspring_combinations(&candidates, true);
        assert!(!combinations.is_empty());
        assert!(combinations.len() <= 27);
        assert!(combinations.contains(&anchor));
        for combination in &combinations {
            assert!(precomputed.contains(combination));
            assert!(combination.iter().zip(&candidates).all(|(g, set)| set.contains(g)));
        }

        // nothing in the list uses an out-of-universe genotype
        let outside = vec![vec![Genotype::phased(7, 0)], vec![Genotype::phased(1, 1)], vec![Genotype::phased(0, 1)]];
        let fallback = pedigree.offspring_combinations(&outside, true);
        assert_eq!(
            fallback,
            vec![vec![Genotype::phased(7, 0), Genotype::phased(1, 1), Genotype::phased(0, 1)]]
        );
    }

    #[test]
    fn test_offspring_without_two_parents_rejected() {
        let members = vec![
            (SampleId::new("mother"), Kinship::Parent),
            (SampleId::new("child"), Kinship::Offspring),
        ];
        assert!(matches!(
            PedigreeInfo::new(&members, &CallerConfig::default()),
            Err(PedcnvError::InvalidPedigree(_))
        ));
    }

    #[test]
    fn test_phased_transmission() {
        let pedigree = PedigreeInfo::new(&trio(1), &CallerConfig::default()).unwrap();
        let het = Genotype::phased(1, 1);
        assert_eq!(pedigree.phased_transmission(&het, &het, &het), 1.0);
        assert_eq!(pedigree.phased_transmission(&het, &het, &Genotype::phased(0, 1)), 1e-5);
        assert_eq!(
            pedigree.phased_transmission(&Genotype::phased(0, 1), &het, &Genotype::phased(0, 1)),
            1.0
        );
    }

    #[test]
    fn test_total_copy_number_transmission() {
        let pedigree = PedigreeInfo::new(&trio(1), &CallerConfig::default()).unwrap();
        let from_nullizygous = pedigree.total_copy_number_transmission(0, 0, 0);
        assert_eq!(from_nullizygous, 1.0);
        assert_eq!(pedigree.total_copy_number_transmission(0, 0, 2), 0.0);

        let diploid: Vec<f64> = (0..5)
            .map(|cn| pedigree.total_copy_number_transmission(2, 2, cn))
            .collect();
        // sum of two Poisson(1) draws is Poisson(2): modes at 1 and 2
        assert!((diploid[1] - diploid[2]).abs() < 1e-12);
        assert!(diploid[2] > diploid[0]);
        assert!(diploid[2] > diploid[3]);
        assert!(diploid.iter().sum::<f64>() <= 1.0);
    }
}
