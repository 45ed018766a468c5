//! Pedigree copy-number caller: reads per-sample segments and allele counts,
//! calls every segment jointly across the family and writes a multi-sample VCF

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use pedcnv_rs::{
    coverage::{copy_number_track, normalized_coverage, write_bedgraph},
    io::{attach_alleles, pedigree_members, read_pedigree, read_ploidy_bed, read_segments, write_calls},
    pedigree::PedigreeInfo,
    pipeline::{build_sample_contexts, call_segments, merge_segments, summarize_calls, SampleInput},
    ploidy::ReferencePloidy,
    utils::{get_num_cpus, validate_file_readable, Timer},
    validate_caller_config,
    vcf::{sample_output_path, sample_vcf_path, write_sample_vcfs, write_vcf},
    CallerConfig, CallerKind, Kinship, PedcnvError, SampleId,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

const COVERAGE_SUFFIX: &str = "coverage.bedgraph.gz";
const COPY_NUMBER_SUFFIX: &str = "copynumber.bedgraph";

#[derive(Parser, Debug)]
#[command(name = "pedcnv")]
#[command(about = "pedcnv - joint copy-number and genotype calling across a pedigree")]
#[command(long_about = "
pedcnv calls discrete copy-number states for pre-segmented genomic intervals in
every sample of a family. Coverage and allele-count evidence of each sample are
combined with Mendelian inheritance between two parents and their offspring.

Every sample is given as a --sample/--segments pair (plus --alleles when allele
counts are available), repeated once per sample in the same order. All samples
must share the same segment boundaries.

Without --pedigree, or for samples the PED file does not place, each sample is
called on its own.

After calling, segments shorter than --minimum-call-size are absorbed into a
neighbour and adjacent segments with identical calls in every sample are merged.

The output VCF carries per-sample CN, MCC (major chromosome count), MCCQ (MCC
quality), QS (call quality), DQ (de novo quality) and FT (sample filter) fields.
With --sample-vcfs, one single-sample VCF per sample is written next to it;
--bedgraphs adds normalized coverage and copy-number bedGraph tracks per sample.
")]
struct Args {
    /// Sample name, repeated once per sample
    #[arg(long = "sample", value_name = "NAME", required = true)]
    samples: Vec<String>,

    /// Segment TSV of each sample, in --sample order
    #[arg(long = "segments", value_name = "FILE", required = true)]
    segments: Vec<PathBuf>,

    /// Allele count TSV of each sample, in --sample order
    #[arg(long = "alleles", value_name = "FILE")]
    alleles: Vec<PathBuf>,

    /// PED file describing the family
    #[arg(long, value_name = "FILE")]
    pedigree: Option<PathBuf>,

    /// Reference ploidy BED (chrom, start, end, sample, ploidy)
    #[arg(long, value_name = "FILE")]
    ploidy_bed: Option<PathBuf>,

    /// Output VCF, gzip-compressed when ending in .gz
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Also write calls.<sample>.vcf(.gz) next to --output for every sample
    #[arg(long)]
    sample_vcfs: bool,

    /// Also write calls.<sample>.coverage.bedgraph.gz and
    /// calls.<sample>.copynumber.bedgraph next to --output for every sample
    #[arg(long)]
    bedgraphs: bool,

    /// Optional per-sample call table
    #[arg(long, value_name = "FILE")]
    calls: Option<PathBuf>,

    /// Calling engine
    #[arg(long, value_enum, default_value_t = CallerKind::Haplotype)]
    caller: CallerKind,

    /// Number of copy-number states
    #[arg(long, default_value_t = 5)]
    maximum_copy_number: usize,

    /// Probability of a non-Mendelian transmission
    #[arg(long, default_value_t = 1e-5)]
    de_novo_rate: f64,

    #[arg(long, default_value_t = 100.0)]
    max_qscore: f64,

    /// Sample calls with a lower QS are filtered
    #[arg(long, default_value_t = 10.0)]
    quality_filter_threshold: f64,

    /// De novo calls with a lower DQ are tagged
    #[arg(long, default_value_t = 20.0)]
    de_novo_quality_filter_threshold: f64,

    /// Allele sites every sample needs before allele evidence is used
    #[arg(long, default_value_t = 10)]
    min_allele_sites: usize,

    /// Segment bases per allele site above which allele evidence is ignored
    #[arg(long, default_value_t = 10_000.0)]
    max_bases_per_allele_site: f64,

    /// Cap on offspring genotype combinations searched per segment
    #[arg(long, default_value_t = 500)]
    max_num_offspring_genotypes: usize,

    /// Bins trimmed from each segment end for the coverage statistics
    #[arg(long, default_value_t = 2)]
    number_of_trimmed_bins: usize,

    /// Segments shorter than this are absorbed into their best neighbour
    #[arg(long, default_value_t = 0)]
    minimum_call_size: u32,

    /// Largest gap bridged when merging neighbouring segments
    #[arg(long, default_value_t = 10_000)]
    maximum_merge_span: u32,

    /// Seed of the offspring combination subsampling
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of processes to use for parallel processing
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output files if they exist
    #[arg(short, long)]
    force: bool,
}

impl Args {
    fn caller_config(&self) -> CallerConfig {
        CallerConfig {
            maximum_copy_number: self.maximum_copy_number,
            de_novo_rate: self.de_novo_rate,
            max_qscore: self.max_qscore,
            quality_filter_threshold: self.quality_filter_threshold,
            de_novo_quality_filter_threshold: self.de_novo_quality_filter_threshold,
            min_allele_sites: self.min_allele_sites,
            max_bases_per_allele_site: self.max_bases_per_allele_site,
            max_num_offspring_genotypes: self.max_num_offspring_genotypes,
            number_of_trimmed_bins: self.number_of_trimmed_bins,
            minimum_call_size: self.minimum_call_size,
            maximum_merge_span: self.maximum_merge_span,
            seed: self.seed,
            caller: self.caller,
        }
    }
}

fn load_sample(
    id: &SampleId,
    segments_path: &Path,
    alleles_path: Option<&Path>,
    ploidy: Option<ReferencePloidy>,
) -> anyhow::Result<SampleInput> {
    let mut segments =
        read_segments(segments_path).with_context(|| format!("reading segments of {}", id))?;
    if let Some(path) = alleles_path {
        attach_alleles(&mut segments, path).with_context(|| format!("reading allele counts of {}", id))?;
    }
    Ok(SampleInput {
        id: id.clone(),
        segments,
        ploidy,
    })
}

/// Position of a pedigree member among the --sample arguments
fn sample_index(sample_ids: &[SampleId], id: &SampleId) -> Result<usize, PedcnvError> {
    sample_ids
        .iter()
        .position(|s| s == id)
        .ok_or_else(|| PedcnvError::InvalidPedigree(format!("{} is not among the called samples", id)))
}

fn run(args: Args) -> anyhow::Result<()> {
    log::info!("Starting pedcnv");
    log::info!("Samples: {:?}", args.samples);
    log::info!("Output VCF: {:?}", args.output);
    log::info!("Number of processes: {}", args.num_processes);

    if args.segments.len() != args.samples.len() {
        bail!(
            "{} --segments files given for {} samples",
            args.segments.len(),
            args.samples.len()
        );
    }
    if !args.alleles.is_empty() && args.alleles.len() != args.samples.len() {
        bail!(
            "{} --alleles files given for {} samples",
            args.alleles.len(),
            args.samples.len()
        );
    }

    for path in args.segments.iter().chain(&args.alleles) {
        validate_file_readable(path)?;
    }
    for path in [&args.pedigree, &args.ploidy_bed].into_iter().flatten() {
        validate_file_readable(path)?;
    }
    let sample_ids: Vec<SampleId> = args.samples.iter().map(SampleId::new).collect();
    let mut sample_outputs: Vec<PathBuf> = Vec::new();
    for id in &sample_ids {
        if args.sample_vcfs {
            sample_outputs.push(sample_vcf_path(&args.output, id));
        }
        if args.bedgraphs {
            sample_outputs.push(sample_output_path(&args.output, id, COVERAGE_SUFFIX));
            sample_outputs.push(sample_output_path(&args.output, id, COPY_NUMBER_SUFFIX));
        }
    }
    for path in std::iter::once(&args.output).chain(&args.calls).chain(&sample_outputs) {
        if path.exists() && !args.force {
            return Err(PedcnvError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("Output file {:?} already exists. Use --force to overwrite.", path),
            ))
            .into());
        }
    }

    let config = args.caller_config();
    validate_caller_config(&config)?;
    log::info!("Configuration: {:?}", config);

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_processes)
        .build_global()
    {
        log::warn!("Could not configure the thread pool: {}", e);
    }

    let members: Vec<(SampleId, Kinship)> = match &args.pedigree {
        Some(path) => {
            let records = read_pedigree(path).with_context(|| format!("reading pedigree {:?}", path))?;
            pedigree_members(&sample_ids, &records)
        }
        None => sample_ids.iter().map(|id| (id.clone(), Kinship::Other)).collect(),
    };
    let pedigree = PedigreeInfo::new(&members, &config)?;
    log::info!(
        "Pedigree: {} parents, {} offspring, {} other samples",
        pedigree.parent_indices().len(),
        pedigree.offspring_indices().len(),
        members.len() - pedigree.parent_indices().len() - pedigree.offspring_indices().len()
    );

    let mut ploidies = match &args.ploidy_bed {
        Some(path) => read_ploidy_bed(path).with_context(|| format!("reading ploidy BED {:?}", path))?,
        None => Default::default(),
    };

    let inputs = {
        let _timer = Timer::new("Reading sample inputs");
        let ordered = members
            .iter()
            .map(|(id, _)| -> Result<_, PedcnvError> { Ok((sample_index(&sample_ids, id)?, ploidies.remove(id))) })
            .collect::<Result<Vec<(usize, Option<ReferencePloidy>)>, _>>()?;
        ordered
            .into_par_iter()
            .map(|(index, ploidy)| {
                load_sample(
                    &sample_ids[index],
                    &args.segments[index],
                    args.alleles.get(index).map(PathBuf::as_path),
                    ploidy,
                )
            })
            .collect::<anyhow::Result<Vec<SampleInput>>>()?
    };
    for id in ploidies.keys() {
        log::warn!("Ploidy BED sample {} is not among the called samples", id);
    }

    let contexts = build_sample_contexts(&inputs, &config)?;
    let segments: Vec<Vec<_>> = inputs.into_iter().map(|s| s.segments).collect();
    let called = call_segments(&contexts, segments, Some(&pedigree), &config, args.num_processes)?;
    let called = merge_segments(called, &config)?;

    let summary = summarize_calls(&contexts, &called);
    log::info!("Call summary:");
    log::info!("  Segments: {}", summary.segments);
    log::info!("  Non-reference: {}", summary.non_reference);
    log::info!("  Filtered: {}", summary.filtered);
    log::info!("  De novo: {}", summary.de_novo);

    {
        let _timer = Timer::new("Writing output");
        write_vcf(&args.output, &contexts, &called, &config)?;
        if args.sample_vcfs {
            write_sample_vcfs(&args.output, &contexts, &called, &config)?;
        }
        if args.bedgraphs {
            for (context, segments) in contexts.iter().zip(&called) {
                write_bedgraph(
                    sample_output_path(&args.output, &context.id, COVERAGE_SUFFIX),
                    &normalized_coverage(segments),
                )?;
                write_bedgraph(
                    sample_output_path(&args.output, &context.id, COPY_NUMBER_SUFFIX),
                    &copy_number_track(segments, |s| context.metrics.get_ploidy(s)),
                )?;
            }
        }
        if let Some(path) = &args.calls {
            let ids: Vec<SampleId> = contexts.iter().map(|c| c.id.clone()).collect();
            write_calls(path, &ids, &called)?;
        }
    }

    log::info!("Calls written to: {:?}", args.output);
    Ok(())
}

/// Print the error chain with a hint for the root cause
fn handle_error(error: anyhow::Error) -> ! {
    eprintln!("Error: {:#}", error);
    match error.downcast_ref::<PedcnvError>() {
        Some(PedcnvError::FileNotFound(_)) => {
            eprintln!("Please check that the file exists and is readable.");
        }
        Some(PedcnvError::InvalidSegment(_)) => {
            eprintln!("Please check that every sample shares the same segment boundaries");
            eprintln!("and that segment files carry chrom, start, end and bin_counts columns.");
        }
        Some(PedcnvError::InvalidPedigree(_)) => {
            eprintln!("Please check the PED file: offspring need exactly two parents among the samples.");
        }
        Some(PedcnvError::InvalidConfig(_)) => {
            eprintln!("Please check the calling parameters.");
        }
        Some(PedcnvError::Csv(_)) => {
            eprintln!("Please check that the input tables are tab-separated with a header line.");
        }
        Some(PedcnvError::Io(_)) => {
            eprintln!("Please check file permissions and disk space.");
        }
        Some(PedcnvError::Numeric(_)) | Some(PedcnvError::MaximalLikelihoodNotFound(_)) => {
            eprintln!("This is unexpected. Please report this issue with the failing segment.");
        }
        None => {}
    }
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(args) {
        handle_error(e);
    }
}
