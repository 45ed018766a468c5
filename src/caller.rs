//! Joint genotype search over a pedigree and call scoring

use crate::distribution::sanitize_log_likelihood;
use crate::genotype::{copy_number_alleles, phased_genotypes, phased_splits, total_genotypes, Genotype, PhasedGenotype};
use crate::joint::JointLikelihoods;
use crate::likelihood::{CopyNumberLikelihoodCalculator, SampleLikelihoods};
use crate::metrics::SampleMetrics;
use crate::model::CopyNumberModel;
use crate::pedigree::PedigreeInfo;
use crate::segment::Segment;
use crate::vcf::quality_filter_tag;
use crate::{CallerConfig, CallerKind, PedcnvError, PedcnvResult, SampleId};

/// Lowest de novo probability reported, Q60
const Q60_FLOOR: f64 = 1e-6;
/// Candidate genotypes kept per sample once two or more offspring are searched
const MULTI_OFFSPRING_TOP_K: usize = 3;

/// Everything the caller needs to know about one sample
#[derive(Debug, Clone)]
pub struct SampleContext {
    pub id: SampleId,
    pub metrics: SampleMetrics,
    pub model: CopyNumberModel,
}

/// Result of the pedigree search: family-order genotype indices plus every
/// assignment that was scored
struct SearchOutcome {
    assignment: Vec<usize>,
    joint: JointLikelihoods,
}

/// Calls one segment set at a time. Holds no per-segment state, so a single
/// instance is shared by every worker.
#[derive(Debug, Clone)]
pub struct VariantCaller {
    config: CallerConfig,
    calculator: CopyNumberLikelihoodCalculator,
    phased_genotypes: Vec<Genotype>,
    total_genotypes: Vec<Genotype>,
}

impl VariantCaller {
    pub fn new(config: &CallerConfig) -> Self {
        Self {
            config: config.clone(),
            calculator: CopyNumberLikelihoodCalculator::new(config.maximum_copy_number),
            phased_genotypes: phased_genotypes(config.maximum_copy_number),
            total_genotypes: total_genotypes(config.maximum_copy_number),
        }
    }

    pub fn kind(&self) -> CallerKind {
        self.config.caller
    }

    /// Allele evidence is used only when every sample has enough sites and the
    /// sites are dense enough over the segment
    pub fn use_allele_information(&self, segments: &[Segment]) -> bool {
        if segments.is_empty() {
            return false;
        }
        if segments
            .iter()
            .any(|s| s.balleles.len() < self.config.min_allele_sites.max(1))
        {
            return false;
        }
        let mean_sites =
            segments.iter().map(|s| s.balleles.len()).sum::<usize>() as f64 / segments.len() as f64;
        let bases_per_site = segments[0].length() as f64 / mean_sites;
        bases_per_site <= self.config.max_bases_per_allele_site
    }

    /// Call a set of segments covering the same interval, one per sample in
    /// pedigree order, writing the results into the segments
    pub fn call_variant(
        &self,
        segments: &mut [Segment],
        samples: &[SampleContext],
        pedigree: Option<&PedigreeInfo>,
    ) -> PedcnvResult<()> {
        if segments.len() != samples.len() {
            return Err(PedcnvError::InvalidSegment(format!(
                "{} segments for {} samples",
                segments.len(),
                samples.len()
            )));
        }
        if segments.is_empty() {
            return Ok(());
        }
        for segment in segments.iter_mut() {
            segment.reset_calls();
        }

        let region = segments[0].region();
        let use_alleles = self.use_allele_information(segments);
        let phased = self.kind() == CallerKind::Haplotype && use_alleles;
        let genotypes = if phased {
            &self.phased_genotypes
        } else {
            &self.total_genotypes
        };

        let likelihoods: Vec<SampleLikelihoods> = segments
            .iter()
            .zip(samples)
            .map(|(segment, sample)| {
                self.calculator
                    .sample_likelihoods(segment, &sample.metrics, &sample.model, genotypes, use_alleles)
            })
            .collect();

        let family = pedigree.filter(|p| p.is_full_pedigree());
        let mut called: Vec<Option<usize>> = vec![None; segments.len()];
        let joint = match family {
            Some(pedigree) => {
                let outcome = self.search(pedigree, &likelihoods, phased, &region)?;
                for (&sample, &genotype) in pedigree.family_indices().iter().zip(&outcome.assignment) {
                    called[sample] = Some(genotype);
                }
                Some(outcome.joint)
            }
            None => None,
        };

        let mut calls = Vec::with_capacity(segments.len());
        for (sample, call) in called.into_iter().enumerate() {
            let index = match call {
                Some(index) => index,
                None => likelihoods[sample]
                    .best_index()
                    .ok_or_else(|| PedcnvError::MaximalLikelihoodNotFound(region.clone()))?,
            };
            calls.push(likelihoods[sample].genotype(index));
        }

        for (sample, call) in calls.iter().enumerate() {
            let ploidy = samples[sample].metrics.get_ploidy(&segments[sample]);
            let qscore = self.quality_score(&likelihoods[sample], call, ploidy);
            let mcc_score = call.phased_genotype().and_then(|chosen| {
                let splits: Vec<(PhasedGenotype, f64)> = likelihoods[sample]
                    .iter()
                    .filter_map(|(genotype, ll)| genotype.phased_genotype().map(|split| (split, ll)))
                    .filter(|(split, _)| split.total_copy_number() == chosen.total_copy_number())
                    .collect();
                major_chromosome_count_score(&splits, chosen, self.config.max_qscore)
            });
            let segment = &mut segments[sample];
            segment.copy_number = call.total_copy_number();
            segment.major_chromosome_count = call.phased_genotype().map(|p| p.major_chromosome_count());
            segment.major_chromosome_count_score = mcc_score;
            segment.qscore = qscore;
            if qscore < self.config.quality_filter_threshold {
                segment.filter = Some(quality_filter_tag(self.config.quality_filter_threshold));
            }
        }

        if let (Some(pedigree), Some(joint)) = (family, joint.as_ref()) {
            self.set_de_novo_scores(segments, samples, pedigree, joint, &calls);
        }

        if use_alleles && !phased {
            self.assign_major_chromosome_counts(segments, samples, family);
        }

        log::trace!(
            "{}: called {:?}",
            region,
            segments.iter().map(|s| s.copy_number).collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Branch-and-bound search over parent1 x parent2 x offspring combinations
    fn search(
        &self,
        pedigree: &PedigreeInfo,
        likelihoods: &[SampleLikelihoods],
        phased: bool,
        region: &str,
    ) -> PedcnvResult<SearchOutcome> {
        let family = pedigree.family_indices();
        let offspring = pedigree.offspring_indices();
        let (parent1, parent2) = match pedigree.parent_indices() {
            [p1, p2] => (*p1, *p2),
            _ => return Err(PedcnvError::InvalidPedigree("expected two parents".to_string())),
        };
        let top_k = if offspring.len() >= 2 {
            MULTI_OFFSPRING_TOP_K
        } else {
            self.config.maximum_copy_number
        };

        let parent1_candidates = likelihoods[parent1].top_k(top_k);
        let parent2_candidates = likelihoods[parent2].top_k(top_k);
        let offspring_candidates: Vec<Vec<usize>> =
            offspring.iter().map(|&o| likelihoods[o].top_k(top_k)).collect();

        let candidate_genotypes: Vec<Vec<Genotype>> = offspring
            .iter()
            .zip(&offspring_candidates)
            .map(|(&o, indices)| indices.iter().map(|&i| likelihoods[o].genotype(i)).collect())
            .collect();
        let combinations: Vec<Vec<usize>> = pedigree
            .offspring_combinations(&candidate_genotypes, phased)
            .into_iter()
            .filter_map(|combination| {
                combination
                    .iter()
                    .zip(offspring)
                    .map(|(genotype, &o)| likelihoods[o].index_of(genotype))
                    .collect::<Option<Vec<usize>>>()
            })
            .collect();

        // remaining[i]: best achievable sum over offspring i.. ignoring transmission
        let mut remaining = vec![0.0; offspring.len() + 1];
        for i in (0..offspring.len()).rev() {
            let best = offspring_candidates[i]
                .iter()
                .map(|&g| likelihoods[offspring[i]].log_likelihood(g))
                .fold(f64::NEG_INFINITY, f64::max);
            remaining[i] = remaining[i + 1] + best;
        }

        let evaluator = JointEvaluator {
            pedigree,
            likelihoods,
            parent1,
            parent2,
            offspring,
        };
        let mut joint = JointLikelihoods::new(family.iter().map(|&s| pedigree.sample_ids()[s].clone()).collect());
        let mut best_log_likelihood = f64::NEG_INFINITY;
        let mut best: Option<Vec<usize>> = None;

        for &g1 in &parent1_candidates {
            let genotype1 = likelihoods[parent1].genotype(g1);
            for &g2 in &parent2_candidates {
                let genotype2 = likelihoods[parent2].genotype(g2);
                let base = likelihoods[parent1].log_likelihood(g1) + likelihoods[parent2].log_likelihood(g2);
                if base + remaining[0] < best_log_likelihood {
                    continue;
                }

                'combination: for combination in &combinations {
                    let mut total = base;
                    for (i, &g) in combination.iter().enumerate() {
                        let child = offspring[i];
                        total += likelihoods[child].log_likelihood(g)
                            + pedigree.transmission_log_likelihood(
                                &genotype1,
                                &genotype2,
                                &likelihoods[child].genotype(g),
                            );
                        if total + remaining[i + 1] < best_log_likelihood {
                            continue 'combination;
                        }
                    }
                    let total = sanitize_log_likelihood(total);
                    let mut assignment = Vec::with_capacity(family.len());
                    assignment.push(g1);
                    assignment.push(g2);
                    assignment.extend_from_slice(combination);
                    joint.add_joint_likelihood(evaluator.genotypes(&assignment), total);
                    if total > best_log_likelihood {
                        best_log_likelihood = total;
                        best = Some(assignment);
                    }
                }
            }
        }

        let best = best.ok_or_else(|| PedcnvError::MaximalLikelihoodNotFound(region.to_string()))?;

        // Score every single-offspring deviation from the winner so the
        // conditional de novo query sees each offspring's alternatives
        for position in 2..best.len() {
            let child = offspring[position - 2];
            for g in 0..likelihoods[child].len() {
                let mut neighbour = best.clone();
                neighbour[position] = g;
                joint.add_joint_likelihood(evaluator.genotypes(&neighbour), evaluator.log_likelihood(&neighbour));
            }
        }

        Ok(SearchOutcome {
            assignment: best,
            joint,
        })
    }

    /// Phred-scaled confidence of the called copy-number class. Variant calls
    /// are weighed against the reference class only, reference calls against
    /// the mass of every class.
    pub fn quality_score(&self, likelihoods: &SampleLikelihoods, call: &Genotype, ploidy: usize) -> f64 {
        let max = likelihoods.max_log_likelihood();
        let mut classes = vec![0.0; self.config.maximum_copy_number];
        for (genotype, log_likelihood) in likelihoods.iter() {
            if let Some(class) = classes.get_mut(genotype.total_copy_number()) {
                *class += (log_likelihood - max).exp();
            }
        }

        let call_class = call.total_copy_number();
        let call_likelihood = classes.get(call_class).copied().unwrap_or(0.0);
        let normalization = if call_class != ploidy {
            call_likelihood + classes.get(ploidy).copied().unwrap_or(0.0)
        } else {
            classes.iter().sum()
        };
        qscore_from_share(call_likelihood, normalization, self.config.max_qscore)
    }

    fn set_de_novo_scores(
        &self,
        segments: &mut [Segment],
        samples: &[SampleContext],
        pedigree: &PedigreeInfo,
        joint: &JointLikelihoods,
        calls: &[Genotype],
    ) {
        let [parent1, parent2] = match pedigree.parent_indices() {
            [p1, p2] => [*p1, *p2],
            _ => return,
        };
        let offspring = pedigree.offspring_indices();
        let ploidy = |s: usize| samples[s].metrics.get_ploidy(&segments[s]);
        let is_reference = |s: usize| {
            calls[s].total_copy_number().min(self.config.maximum_copy_number - 1) == ploidy(s)
        };
        let passes = |s: usize| segments[s].qscore > self.config.quality_filter_threshold;
        let background: Vec<Genotype> = pedigree.family_indices().iter().map(|&s| calls[s]).collect();

        let mut scores = Vec::new();
        for &proband in offspring {
            if is_reference(proband) {
                continue;
            }
            if is_common_cnv(
                &calls[parent1],
                &calls[parent2],
                &calls[proband],
                [ploidy(parent1), ploidy(parent2), ploidy(proband)],
            ) {
                continue;
            }
            if !offspring.iter().filter(|&&o| o != proband).all(|&o| is_reference(o)) {
                continue;
            }
            if ![parent1, parent2, proband].into_iter().all(|s| passes(s)) {
                continue;
            }

            let call_class = calls[proband].total_copy_number();
            let Some(probability) = joint.conditional_probability(&samples[proband].id, &background, |g| {
                g.total_copy_number() != call_class
            }) else {
                continue;
            };
            let dq = -10.0 * probability.max(Q60_FLOOR).log10();
            scores.push((proband, clamp_qscore(dq, self.config.max_qscore)));
        }

        for (proband, dq) in scores {
            log::debug!("{}: de novo call in {} with DQ {:.1}", segments[proband].region(), samples[proband].id, dq);
            segments[proband].dq_score = Some(dq);
        }
    }

    /// Most likely haplotype split of each called total copy number. Inherited
    /// offspring calls are restricted to splits consistent with the parents.
    fn assign_major_chromosome_counts(
        &self,
        segments: &mut [Segment],
        samples: &[SampleContext],
        family: Option<&PedigreeInfo>,
    ) {
        let split_likelihoods: Vec<Vec<(PhasedGenotype, f64)>> = segments
            .iter()
            .zip(samples)
            .map(|(segment, sample)| {
                phased_splits(segment.copy_number)
                    .into_iter()
                    .filter(|split| split.copy_number_a.max(split.copy_number_b) < sample.model.num_cn_states())
                    .map(|split| {
                        let ll = sample.model.genotype_log_likelihood(&segment.balleles, split);
                        (split, sanitize_log_likelihood(ll))
                    })
                    .collect()
            })
            .collect();

        let mut chosen: Vec<Option<PhasedGenotype>> = split_likelihoods.iter().map(|splits| best_of(splits.iter())).collect();

        if let Some(pedigree) = family {
            if let [parent1, parent2] = *pedigree.parent_indices() {
                let mut best_total = f64::NEG_INFINITY;
                let mut best_family: Option<Vec<(usize, PhasedGenotype)>> = None;
                for &(split1, ll1) in &split_likelihoods[parent1] {
                    for &(split2, ll2) in &split_likelihoods[parent2] {
                        let mut total = ll1 + ll2;
                        let mut family_splits = vec![(parent1, split1), (parent2, split2)];
                        for &child in pedigree.offspring_indices() {
                            let inherited = segments[child].dq_score.is_none();
                            let consistent = split_likelihoods[child].iter().filter(|(split, _)| {
                                split1.contains_allele(split.copy_number_a) && split2.contains_allele(split.copy_number_b)
                            });
                            let choice = if inherited {
                                best_of_with_ll(consistent).or_else(|| best_of_with_ll(split_likelihoods[child].iter()))
                            } else {
                                best_of_with_ll(split_likelihoods[child].iter())
                            };
                            if let Some((split, ll)) = choice {
                                total += ll;
                                family_splits.push((child, split));
                            }
                        }
                        if total > best_total {
                            best_total = total;
                            best_family = Some(family_splits);
                        }
                    }
                }
                for (sample, split) in best_family.into_iter().flatten() {
                    chosen[sample] = Some(split);
                }
            }
        }

        for ((segment, split), splits) in segments.iter_mut().zip(chosen).zip(&split_likelihoods) {
            segment.major_chromosome_count = split.map(|s| s.major_chromosome_count());
            segment.major_chromosome_count_score =
                split.and_then(|s| major_chromosome_count_score(splits, s, self.config.max_qscore));
        }
    }
}

/// Scores a family assignment given as genotype indices in family order
struct JointEvaluator<'a> {
    pedigree: &'a PedigreeInfo,
    likelihoods: &'a [SampleLikelihoods],
    parent1: usize,
    parent2: usize,
    offspring: &'a [usize],
}

impl JointEvaluator<'_> {
    fn family_sample(&self, position: usize) -> usize {
        match position {
            0 => self.parent1,
            1 => self.parent2,
            p => self.offspring[p - 2],
        }
    }

    fn genotypes(&self, assignment: &[usize]) -> Vec<Genotype> {
        assignment
            .iter()
            .enumerate()
            .map(|(position, &g)| self.likelihoods[self.family_sample(position)].genotype(g))
            .collect()
    }

    fn log_likelihood(&self, assignment: &[usize]) -> f64 {
        let genotype1 = self.likelihoods[self.parent1].genotype(assignment[0]);
        let genotype2 = self.likelihoods[self.parent2].genotype(assignment[1]);
        let mut total = self.likelihoods[self.parent1].log_likelihood(assignment[0])
            + self.likelihoods[self.parent2].log_likelihood(assignment[1]);
        for (i, &g) in assignment[2..].iter().enumerate() {
            let child = &self.likelihoods[self.offspring[i]];
            total += child.log_likelihood(g)
                + self
                    .pedigree
                    .transmission_log_likelihood(&genotype1, &genotype2, &child.genotype(g));
        }
        sanitize_log_likelihood(total)
    }
}

fn best_of<'a, I: Iterator<Item = &'a (PhasedGenotype, f64)>>(splits: I) -> Option<PhasedGenotype> {
    best_of_with_ll(splits).map(|(split, _)| split)
}

fn best_of_with_ll<'a, I: Iterator<Item = &'a (PhasedGenotype, f64)>>(splits: I) -> Option<(PhasedGenotype, f64)> {
    splits.fold(None, |best: Option<(PhasedGenotype, f64)>, &(split, ll)| match best {
        Some((_, best_ll)) if best_ll >= ll => best,
        _ => Some((split, ll)),
    })
}

/// A proband call is common when it could have been inherited: phased
/// genotypes must carry the same pair of haplotypes as a parent in either
/// orientation, total copy numbers must share a haplotype copy number with a
/// parent of the same reference ploidy
pub fn is_common_cnv(parent1: &Genotype, parent2: &Genotype, proband: &Genotype, ploidies: [usize; 3]) -> bool {
    if let (Some(p1), Some(p2), Some(child)) = (
        parent1.phased_genotype(),
        parent2.phased_genotype(),
        proband.phased_genotype(),
    ) {
        return same_haplotypes(child, p1) || same_haplotypes(child, p2);
    }

    let proband_alleles = copy_number_alleles(proband.total_copy_number());
    let shares = |parent: &Genotype| {
        copy_number_alleles(parent.total_copy_number())
            .iter()
            .any(|allele| proband_alleles.contains(allele))
    };
    let [parent1_ploidy, parent2_ploidy, proband_ploidy] = ploidies;
    (shares(parent1) && parent1_ploidy == proband_ploidy) || (shares(parent2) && parent2_ploidy == proband_ploidy)
}

fn same_haplotypes(a: PhasedGenotype, b: PhasedGenotype) -> bool {
    a == b || (a.copy_number_a == b.copy_number_b && a.copy_number_b == b.copy_number_a)
}

/// Phred confidence in the major chromosome count of `chosen`, pooling the
/// splits that share it. None when every split has the same MCC.
pub fn major_chromosome_count_score(
    splits: &[(PhasedGenotype, f64)],
    chosen: PhasedGenotype,
    max_qscore: f64,
) -> Option<f64> {
    let mcc = chosen.major_chromosome_count();
    if splits.iter().all(|(split, _)| split.major_chromosome_count() == mcc) {
        return None;
    }
    let max = splits.iter().map(|&(_, ll)| ll).fold(f64::NEG_INFINITY, f64::max);
    let mut call_likelihood = 0.0;
    let mut normalization = 0.0;
    for &(split, ll) in splits {
        let likelihood = (ll - max).exp();
        normalization += likelihood;
        if split.major_chromosome_count() == mcc {
            call_likelihood += likelihood;
        }
    }
    Some(qscore_from_share(call_likelihood, normalization, max_qscore))
}

/// -10 log10(1 - share), clamped into [0, max_qscore]
pub fn qscore_from_share(call_likelihood: f64, normalization: f64, max_qscore: f64) -> f64 {
    let qscore = -10.0 * ((normalization - call_likelihood) / normalization).log10();
    clamp_qscore(qscore, max_qscore)
}

pub fn clamp_qscore(qscore: f64, max_qscore: f64) -> f64 {
    if qscore.is_nan() {
        0.0
    } else if qscore.is_infinite() || qscore > max_qscore {
        max_qscore
    } else {
        qscore.max(0.0)
    }
}
