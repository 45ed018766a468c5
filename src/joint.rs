//! Accumulator of joint pedigree assignments explored by the search

use crate::distribution::sanitize_log_likelihood;
use crate::genotype::Genotype;
use crate::SampleId;
use std::collections::HashMap;

/// Joint log-likelihoods keyed by the genotype assignment of the family.
///
/// Assignments are stored in a fixed sample order, so two assignments of the
/// same (sample, genotype) pairs compare equal regardless of how they were
/// listed. Likelihood sums are reported relative to the maximal joint
/// log-likelihood, i.e. multiplied by exp(-max), so they never underflow.
#[derive(Debug, Clone)]
pub struct JointLikelihoods {
    sample_ids: Vec<SampleId>,
    log_likelihoods: HashMap<Vec<Genotype>, f64>,
    maximal_log_likelihood: f64,
    maximal_assignment: Option<Vec<Genotype>>,
}

impl JointLikelihoods {
    pub fn new(sample_ids: Vec<SampleId>) -> Self {
        Self {
            sample_ids,
            log_likelihoods: HashMap::new(),
            maximal_log_likelihood: f64::NEG_INFINITY,
            maximal_assignment: None,
        }
    }

    pub fn sample_ids(&self) -> &[SampleId] {
        &self.sample_ids
    }

    pub fn len(&self) -> usize {
        self.log_likelihoods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_likelihoods.is_empty()
    }

    fn sample_index(&self, sample_id: &SampleId) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Put a (sample, genotype) list into storage order
    pub fn canonical_assignment(&self, assignment: &[(SampleId, Genotype)]) -> Option<Vec<Genotype>> {
        if assignment.len() != self.sample_ids.len() {
            return None;
        }
        self.sample_ids
            .iter()
            .map(|id| assignment.iter().find(|(sample, _)| sample == id).map(|(_, g)| *g))
            .collect()
    }

    /// Keep the larger log-likelihood for an assignment given in storage order
    pub fn add_joint_likelihood(&mut self, assignment: Vec<Genotype>, log_likelihood: f64) {
        debug_assert_eq!(assignment.len(), self.sample_ids.len());
        let log_likelihood = sanitize_log_likelihood(log_likelihood);
        if log_likelihood > self.maximal_log_likelihood {
            self.maximal_log_likelihood = log_likelihood;
            self.maximal_assignment = Some(assignment.clone());
        }
        self.log_likelihoods
            .entry(assignment)
            .and_modify(|ll| *ll = ll.max(log_likelihood))
            .or_insert(log_likelihood);
    }

    pub fn joint_log_likelihood(&self, assignment: &[Genotype]) -> Option<f64> {
        self.log_likelihoods.get(assignment).copied()
    }

    /// Exact lookup, relative to the maximal assignment
    pub fn joint_likelihood(&self, assignment: &[Genotype]) -> Option<f64> {
        self.joint_log_likelihood(assignment)
            .map(|ll| self.relative(ll))
    }

    pub fn maximal_log_likelihood(&self) -> f64 {
        self.maximal_log_likelihood
    }

    /// Absolute maximal likelihood, may underflow to 0
    pub fn maximal_likelihood(&self) -> f64 {
        self.maximal_log_likelihood.exp()
    }

    pub fn maximal_assignment(&self) -> Option<&[Genotype]> {
        self.maximal_assignment.as_deref()
    }

    /// Sum over every recorded assignment
    pub fn total_marginal_likelihood(&self) -> f64 {
        self.sum_where(|_| true)
    }

    /// Sum over assignments where the sample holds `genotype`
    pub fn marginal_likelihood(&self, sample_id: &SampleId, genotype: &Genotype) -> f64 {
        match self.sample_index(sample_id) {
            Some(index) => self.sum_where(|assignment| assignment[index] == *genotype),
            None => 0.0,
        }
    }

    /// Sum over assignments where the sample does not hold `genotype`
    pub fn marginal_non_alt_likelihood(&self, sample_id: &SampleId, genotype: &Genotype) -> f64 {
        match self.sample_index(sample_id) {
            Some(index) => self.sum_where(|assignment| assignment[index] != *genotype),
            None => 0.0,
        }
    }

    /// Probability that the sample's genotype satisfies `predicate`, among the
    /// recorded assignments where every other sample matches `background`
    pub fn conditional_probability<F>(&self, sample_id: &SampleId, background: &[Genotype], predicate: F) -> Option<f64>
    where
        F: Fn(&Genotype) -> bool,
    {
        let index = self.sample_index(sample_id)?;
        let matches_background = |assignment: &[Genotype]| {
            assignment
                .iter()
                .zip(background)
                .enumerate()
                .all(|(i, (g, b))| i == index || g == b)
        };
        let total = self.sum_where(|assignment| matches_background(assignment));
        if total <= 0.0 {
            return None;
        }
        let selected = self.sum_where(|assignment| matches_background(assignment) && predicate(&assignment[index]));
        Some(selected / total)
    }

    fn relative(&self, log_likelihood: f64) -> f64 {
        if self.maximal_log_likelihood.is_finite() {
            (log_likelihood - self.maximal_log_likelihood).exp()
        } else {
            0.0
        }
    }

    fn sum_where<F: Fn(&[Genotype]) -> bool>(&self, keep: F) -> f64 {
        self.log_likelihoods
            .iter()
            .filter(|(assignment, _)| keep(assignment))
            .map(|(_, &ll)| self.relative(ll))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> JointLikelihoods {
        JointLikelihoods::new(vec![
            SampleId::new("mother"),
            SampleId::new("father"),
            SampleId::new("child"),
        ])
    }

    fn cn(values: [usize; 3]) -> Vec<Genotype> {
        values.iter().map(|&c| Genotype::create(c)).collect()
    }

    #[test]
    fn test_upsert_keeps_maximum() {
        let mut joint = family();
        joint.add_joint_likelihood(cn([2, 2, 2]), -10.0);
        joint.add_joint_likelihood(cn([2, 2, 2]), -12.0);
        joint.add_joint_likelihood(cn([2, 2, 1]), -11.0);
        assert_eq!(joint.len(), 2);
        assert_eq!(joint.joint_log_likelihood(&cn([2, 2, 2])), Some(-10.0));
        assert_eq!(joint.maximal_log_likelihood(), -10.0);
        assert_eq!(joint.maximal_assignment(), Some(cn([2, 2, 2]).as_slice()));
        assert_eq!(joint.joint_likelihood(&cn([2, 2, 2])), Some(1.0));
        assert!(joint.joint_likelihood(&cn([1, 1, 1])).is_none());
    }

    #[test]
    fn test_marginals() {
        let mut joint = family();
        joint.add_joint_likelihood(cn([2, 2, 2]), 0.0);
        joint.add_joint_likelihood(cn([2, 2, 1]), 0.5f64.ln());
        joint.add_joint_likelihood(cn([2, 1, 1]), 0.25f64.ln());

        let child = SampleId::new("child");
        let total = joint.total_marginal_likelihood();
        assert!((total - 1.75).abs() < 1e-12);
        assert!((joint.marginal_likelihood(&child, &Genotype::create(1)) - 0.75).abs() < 1e-12);
        assert!((joint.marginal_non_alt_likelihood(&child, &Genotype::create(1)) - 1.0).abs() < 1e-12);
        assert_eq!(joint.marginal_likelihood(&SampleId::new("nobody"), &Genotype::create(1)), 0.0);
    }

    #[test]
    fn test_conditional_probability() {
        let mut joint = family();
        joint.add_joint_likelihood(cn([2, 2, 1]), 0.0);
        joint.add_joint_likelihood(cn([2, 2, 2]), 0.01f64.ln());
        joint.add_joint_likelihood(cn([2, 1, 2]), 0.0);

        let child = SampleId::new("child");
        let p = joint
            .conditional_probability(&child, &cn([2, 2, 1]), |g| g.total_copy_number() != 1)
            .unwrap();
        assert!((p - 0.01 / 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_canonical_assignment_is_order_independent() {
        let joint = family();
        let listed = vec![
            (SampleId::new("child"), Genotype::create(1)),
            (SampleId::new("mother"), Genotype::create(2)),
            (SampleId::new("father"), Genotype::create(3)),
        ];
        assert_eq!(joint.canonical_assignment(&listed), Some(cn([2, 3, 1])));
        assert!(joint.canonical_assignment(&listed[..2]).is_none());
    }

    #[test]
    fn test_non_finite_likelihoods_sanitized() {
        let mut joint = family();
        joint.add_joint_likelihood(cn([0, 0, 0]), f64::NAN);
        assert_eq!(joint.maximal_log_likelihood(), f64::MIN);
        joint.add_joint_likelihood(cn([2, 2, 2]), -5.0);
        assert_eq!(joint.maximal_assignment(), Some(cn([2, 2, 2]).as_slice()));
    }
}
