//! File handling, progress logging and timing helpers

use crate::{PedcnvError, PedcnvResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Check for the gzip magic bytes
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> PedcnvResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(PedcnvError::Io(e)),
    }
}

pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

pub fn validate_file_exists<P: AsRef<Path>>(path: P) -> PedcnvResult<()> {
    if !path.as_ref().exists() {
        return Err(PedcnvError::FileNotFound(
            path.as_ref().to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> PedcnvResult<()> {
    validate_file_exists(&path)?;

    File::open(&path)
        .map_err(|_| PedcnvError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    Ok(())
}

/// Case-insensitive extension check
pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

pub fn ensure_parent_dirs<P: AsRef<Path>>(path: P) -> PedcnvResult<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Buffered reader over a plain or gzip-compressed file
pub fn open_reader<P: AsRef<Path>>(path: P) -> PedcnvResult<Box<dyn BufRead + Send>> {
    validate_file_readable(&path)?;
    let file = File::open(&path)?;
    if is_gzipped(&path)? {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Buffered output file, gzip-compressed when the path ends in .gz
pub enum OutputWriter {
    Plain(BufWriter<File>),
    Gzip(BufWriter<GzEncoder<File>>),
}

impl OutputWriter {
    /// Flush the buffer and, for gzip output, write the trailer. Dropping the
    /// writer instead would swallow any error from either step.
    pub fn finish(self) -> PedcnvResult<()> {
        match self {
            OutputWriter::Plain(mut writer) => writer.flush()?,
            OutputWriter::Gzip(writer) => {
                let encoder = writer.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()?;
            }
        }
        Ok(())
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            OutputWriter::Plain(writer) => writer.write(buf),
            OutputWriter::Gzip(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputWriter::Plain(writer) => writer.flush(),
            OutputWriter::Gzip(writer) => writer.flush(),
        }
    }
}

pub fn create_writer<P: AsRef<Path>>(path: P) -> PedcnvResult<OutputWriter> {
    ensure_parent_dirs(&path)?;
    let file = File::create(&path)?;
    if has_extension(&path, "gz") {
        Ok(OutputWriter::Gzip(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        ))))
    } else {
        Ok(OutputWriter::Plain(BufWriter::new(file)))
    }
}

pub fn log_progress(current: usize, total: usize, message: &str) {
    if total > 0 {
        let percentage = (current as f64 / total as f64) * 100.0;
        log::info!("{}: {} / {} ({:.1}%)", message, current, total, percentage);
    }
}

/// Logs the elapsed time of a stage when dropped
pub struct Timer {
    start: std::time::Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::info!("Starting: {}", name);
        Timer {
            start: std::time::Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn log_elapsed(&self) {
        log::info!("{} finished in {:.2?}", self.name, self.elapsed());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.log_elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_is_gzipped() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "chr1\t0\t100\t5,5").unwrap();
        assert!(!is_gzipped(temp_file.path()).unwrap());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0x1f, 0x8b]).unwrap();
        assert!(is_gzipped(temp_file.path()).unwrap());
    }

    #[test]
    fn test_validate_file_exists() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(validate_file_exists(temp_file.path()).is_ok());
        assert!(matches!(
            validate_file_exists("/nonexistent/segments.tsv"),
            Err(PedcnvError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("calls.vcf.gz", "gz"));
        assert!(has_extension("calls.VCF", "vcf"));
        assert!(!has_extension("calls.vcf", "gz"));
        assert!(!has_extension("calls", "vcf"));
    }

    #[test]
    fn test_writer_reader_gzip_roundtrip() {
        let dir = tempdir().unwrap();
        for name in ["nested/out.tsv", "nested/out.tsv.gz"] {
            let path = dir.path().join(name);
            {
                let mut writer = create_writer(&path).unwrap();
                writeln!(writer, "chr1\t10\t20").unwrap();
                writer.finish().unwrap();
            }
            assert_eq!(is_gzipped(&path).unwrap(), name.ends_with(".gz"));

            let mut line = String::new();
            open_reader(&path).unwrap().read_line(&mut line).unwrap();
            assert_eq!(line, "chr1\t10\t20\n");
        }
    }

    #[test]
    fn test_finished_gzip_output_is_complete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calls.tsv.gz");
        let mut writer = create_writer(&path).unwrap();
        for i in 0..10_000 {
            writeln!(writer, "chr1\t{}\t{}", i * 100, i * 100 + 100).unwrap();
        }
        writer.finish().unwrap();

        // a truncated stream would end early or fail to decode
        let mut content = String::new();
        MultiGzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content.lines().count(), 10_000);
        assert_eq!(content.lines().last(), Some("chr1\t999900\t1000000"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("test");
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(timer.elapsed().as_millis() >= 1);
    }
}
