//! Multi-sample VCF output of the segment calls

use crate::caller::SampleContext;
use crate::segment::Segment;
use crate::utils::create_writer;
use crate::{CallerConfig, PedcnvError, PedcnvResult, SampleId};
use std::io::Write;
use std::path::{Path, PathBuf};

const FORMAT: &str = "CN:MCC:MCCQ:QS:DQ:FT";
const MISSING: &str = ".";

/// Filter tag of a sample call below the quality threshold
pub fn quality_filter_tag(threshold: f64) -> String {
    format!("q{}", threshold)
}

/// Filter tag of a de novo call below the de novo quality threshold
pub fn de_novo_filter_tag(threshold: f64) -> String {
    format!("dq{}", threshold)
}

/// One VCF line covering a segment across all samples
#[derive(Debug, Clone, PartialEq)]
pub struct VcfRecord {
    pub chrom: String,
    /// 1-based
    pub pos: u32,
    pub end: u32,
    pub alt: String,
    pub filter: String,
    pub samples: Vec<String>,
}

impl VcfRecord {
    /// Build the record of one segment set, samples in output order
    pub fn from_segments(segments: &[&Segment], ploidies: &[usize], de_novo_threshold: f64) -> PedcnvResult<Self> {
        let first = segments
            .first()
            .ok_or_else(|| PedcnvError::InvalidSegment("no segments to write".to_string()))?;
        if segments.len() != ploidies.len() {
            return Err(PedcnvError::InvalidSegment(format!(
                "{} segments with {} ploidies",
                segments.len(),
                ploidies.len()
            )));
        }

        let has_loss = segments.iter().zip(ploidies).any(|(s, &p)| s.copy_number < p);
        let has_gain = segments.iter().zip(ploidies).any(|(s, &p)| s.copy_number > p);
        let alt = match (has_loss, has_gain) {
            (true, true) => "<DEL>,<DUP>",
            (true, false) => "<DEL>",
            (false, true) => "<DUP>",
            (false, false) => MISSING,
        };

        let sample_filters: Vec<String> = segments
            .iter()
            .map(|s| sample_filter(s, de_novo_threshold))
            .collect();
        let mut site_filters: Vec<&str> = sample_filters
            .iter()
            .flat_map(|f| f.split(';'))
            .filter(|f| *f != "PASS")
            .collect();
        site_filters.sort_unstable();
        site_filters.dedup();
        let filter = if site_filters.is_empty() {
            "PASS".to_string()
        } else {
            site_filters.join(";")
        };

        let samples = segments
            .iter()
            .zip(sample_filters)
            .map(|(s, ft)| {
                format!(
                    "{}:{}:{}:{}:{}:{}",
                    s.copy_number,
                    s.major_chromosome_count
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| MISSING.to_string()),
                    s.major_chromosome_count_score
                        .map(format_score)
                        .unwrap_or_else(|| MISSING.to_string()),
                    format_score(s.qscore),
                    s.dq_score
                        .map(format_score)
                        .unwrap_or_else(|| MISSING.to_string()),
                    ft
                )
            })
            .collect();

        Ok(Self {
            chrom: first.chrom.clone(),
            pos: first.begin + 1,
            end: first.end,
            alt: alt.to_string(),
            filter,
            samples,
        })
    }

    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{}\t{}\t.\tN\t{}\t.\t{}\tSVTYPE=CNV;END={}\t{}",
            self.chrom, self.pos, self.alt, self.filter, self.end, FORMAT
        );
        for sample in &self.samples {
            line.push('\t');
            line.push_str(sample);
        }
        line
    }
}

fn format_score(score: f64) -> String {
    format!("{:.2}", score)
}

fn sample_filter(segment: &Segment, de_novo_threshold: f64) -> String {
    let mut tags: Vec<String> = segment.filter.iter().cloned().collect();
    if segment.dq_score.is_some_and(|dq| dq < de_novo_threshold) {
        tags.push(de_novo_filter_tag(de_novo_threshold));
    }
    if tags.is_empty() {
        "PASS".to_string()
    } else {
        tags.join(";")
    }
}

pub fn header_lines(samples: &[SampleId], config: &CallerConfig) -> Vec<String> {
    let mut lines = vec![
        "##fileformat=VCFv4.2".to_string(),
        format!("##source=pedcnv {}", env!("CARGO_PKG_VERSION")),
        "##ALT=<ID=DEL,Description=\"Copy number below the reference ploidy\">".to_string(),
        "##ALT=<ID=DUP,Description=\"Copy number above the reference ploidy\">".to_string(),
        "##INFO=<ID=SVTYPE,Number=1,Type=String,Description=\"Type of structural variant\">".to_string(),
        "##INFO=<ID=END,Number=1,Type=Integer,Description=\"End position of the segment\">".to_string(),
        format!(
            "##FILTER=<ID={},Description=\"Sample quality score below {}\">",
            quality_filter_tag(config.quality_filter_threshold),
            config.quality_filter_threshold
        ),
        format!(
            "##FILTER=<ID={},Description=\"De novo quality score below {}\">",
            de_novo_filter_tag(config.de_novo_quality_filter_threshold),
            config.de_novo_quality_filter_threshold
        ),
        "##FORMAT=<ID=CN,Number=1,Type=Integer,Description=\"Total copy number\">".to_string(),
        "##FORMAT=<ID=MCC,Number=1,Type=Integer,Description=\"Major chromosome count\">".to_string(),
        "##FORMAT=<ID=MCCQ,Number=1,Type=Float,Description=\"Phred-scaled quality of the major chromosome count\">"
            .to_string(),
        "##FORMAT=<ID=QS,Number=1,Type=Float,Description=\"Phred-scaled quality of the copy number call\">"
            .to_string(),
        "##FORMAT=<ID=DQ,Number=1,Type=Float,Description=\"Phred-scaled de novo quality\">".to_string(),
        "##FORMAT=<ID=FT,Number=1,Type=String,Description=\"Sample filter, PASS when all filters pass\">"
            .to_string(),
    ];
    let mut columns = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT".to_string();
    for sample in samples {
        columns.push('\t');
        columns.push_str(sample.as_str());
    }
    lines.push(columns);
    lines
}

/// Write every segment of every sample, one record per segment set.
/// The output is gzip-compressed when the path ends in .gz.
pub fn write_vcf<P: AsRef<Path>>(
    path: P,
    samples: &[SampleContext],
    segments: &[Vec<Segment>],
    config: &CallerConfig,
) -> PedcnvResult<usize> {
    if segments.len() != samples.len() {
        return Err(PedcnvError::InvalidSegment(format!(
            "segments for {} samples, expected {}",
            segments.len(),
            samples.len()
        )));
    }
    let num_records = segments.first().map(|s| s.len()).unwrap_or(0);
    if segments.iter().any(|s| s.len() != num_records) {
        return Err(PedcnvError::InvalidSegment(
            "all samples must have the same number of segments".to_string(),
        ));
    }

    let ids: Vec<SampleId> = samples.iter().map(|s| s.id.clone()).collect();
    let mut writer = create_writer(&path)?;
    for line in header_lines(&ids, config) {
        writeln!(writer, "{}", line)?;
    }

    for index in 0..num_records {
        let set: Vec<&Segment> = segments.iter().map(|s| &s[index]).collect();
        let ploidies: Vec<usize> = samples
            .iter()
            .zip(&set)
            .map(|(sample, segment)| sample.metrics.get_ploidy(segment))
            .collect();
        let record = VcfRecord::from_segments(&set, &ploidies, config.de_novo_quality_filter_threshold)?;
        writeln!(writer, "{}", record.to_line())?;
    }
    writer.finish()?;
    log::info!("Wrote {} records to {}", num_records, path.as_ref().display());
    Ok(num_records)
}

/// Multi-sample VCF name without its `.vcf` or `.vcf.gz` extension
fn output_stem(output: &Path) -> (String, &'static str) {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    [".vcf.gz", ".vcf"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext).map(|stem| (stem.to_string(), *ext)))
        .unwrap_or((name, ".vcf"))
}

/// Per-sample file next to the multi-sample `output`:
/// `calls.vcf.gz` with suffix `coverage.bedgraph` becomes `calls.<sample>.coverage.bedgraph`
pub fn sample_output_path(output: &Path, sample: &SampleId, suffix: &str) -> PathBuf {
    let (stem, _) = output_stem(output);
    output.with_file_name(format!("{}.{}.{}", stem, sample, suffix))
}

/// Path of a sample's own VCF, compressed like `output`
pub fn sample_vcf_path(output: &Path, sample: &SampleId) -> PathBuf {
    let (_, extension) = output_stem(output);
    sample_output_path(output, sample, extension.trim_start_matches('.'))
}

/// One single-sample VCF per sample, next to the multi-sample `output`
pub fn write_sample_vcfs(
    output: &Path,
    samples: &[SampleContext],
    segments: &[Vec<Segment>],
    config: &CallerConfig,
) -> PedcnvResult<Vec<PathBuf>> {
    if segments.len() != samples.len() {
        return Err(PedcnvError::InvalidSegment(format!(
            "segments for {} samples, expected {}",
            segments.len(),
            samples.len()
        )));
    }
    samples
        .iter()
        .zip(segments)
        .map(|(sample, sample_segments)| {
            let path = sample_vcf_path(output, &sample.id);
            write_vcf(
                &path,
                std::slice::from_ref(sample),
                std::slice::from_ref(sample_segments),
                config,
            )?;
            Ok(path)
        })
        .collect()
}
