//! One corruption job: load a file, run the dispatcher, save the result.
//!
//! ```no_run
//! use vinecorrupt::job::CorruptionJob;
//! use vinecorrupt::mutation::{MutationConfig, Operation};
//!
//! let config = MutationConfig::new(Operation::Add, 1).with_step(0x40)?;
//! let report = CorruptionJob::new("stage.arc", config)
//!     .output("stage.corrupt.arc")
//!     .run()?;
//! println!("{} bytes changed", report.mutations);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The output is written to a sibling temp file and renamed over the
//! destination, so a failed job never leaves a partial file behind.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::codec::CodecId;
use crate::dispatch::{ContainerKind, DispatchError, DispatchOptions, Dispatcher};
use crate::mutation::{ByteGuard, MutationConfig, Unguarded};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{}: {source}", path.display())]
    Dispatch { path: PathBuf, #[source] source: DispatchError },
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, #[source] source: io::Error },
}

// ── JobReport ────────────────────────────────────────────────────────────────

/// Outcome of one job, printed by the CLI and serialisable as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub input:             PathBuf,
    pub output:            PathBuf,
    pub codec:             CodecId,
    pub container:         ContainerKind,
    pub mutations:         u64,
    pub entries_processed: usize,
    pub entries_skipped:   usize,
    pub recompressed:      bool,
    /// CRC-32 of the bytes read, hex.
    pub input_crc32:       String,
    /// CRC-32 of the bytes written, hex.
    pub output_crc32:      String,
    pub config:            MutationConfig,
}

impl JobReport {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "{} -> {} [{}{}] {} byte(s) changed, {} entr(ies) processed, {} skipped, crc {} -> {}",
            self.input.display(),
            self.output.display(),
            self.container.name(),
            match self.codec {
                CodecId::None => String::new(),
                c             => format!(", {}", c.name()),
            },
            self.mutations,
            self.entries_processed,
            self.entries_skipped,
            self.input_crc32,
            self.output_crc32,
        )
    }
}

// ── CorruptionJob ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorruptionJob {
    input:   PathBuf,
    output:  Option<PathBuf>,
    config:  MutationConfig,
    options: DispatchOptions,
}

impl CorruptionJob {
    pub fn new<P: AsRef<Path>>(input: P, config: MutationConfig) -> Self {
        Self {
            input:   input.as_ref().to_owned(),
            output:  None,
            config,
            options: DispatchOptions::default(),
        }
    }

    /// Save path override; defaults to overwriting the input.
    pub fn output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output = Some(path.as_ref().to_owned());
        self
    }

    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.input)
    }

    pub fn run(&self) -> Result<JobReport, JobError> {
        self.run_guarded(&Unguarded)
    }

    pub fn run_guarded<G: ByteGuard + ?Sized>(&self, guard: &G) -> Result<JobReport, JobError> {
        let data = fs::read(&self.input).map_err(|source| JobError::Io {
            path: self.input.clone(),
            source,
        })?;
        debug!(path = %self.input.display(), size = data.len(), "loaded");

        let (out, report) = Dispatcher::new(&self.config, guard)
            .with_options(self.options)
            .run(&data)
            .map_err(|source| JobError::Dispatch { path: self.input.clone(), source })?;

        let dest = self.output_path();
        save_atomic(dest, &out).map_err(|source| JobError::Io { path: dest.to_owned(), source })?;

        Ok(JobReport {
            input:             self.input.clone(),
            output:            dest.to_owned(),
            codec:             report.codec,
            container:         report.container,
            mutations:         report.mutations,
            entries_processed: report.entries_processed,
            entries_skipped:   report.entries_skipped,
            recompressed:      report.recompressed,
            input_crc32:       format!("{:08x}", crc32fast::hash(&data)),
            output_crc32:      format!("{:08x}", crc32fast::hash(&out)),
            config:            self.config.clone(),
        })
    }
}

/// Write `data` to a uniquely named sibling of `dest`, then rename it over
/// `dest`.
pub fn save_atomic(dest: &Path, data: &[u8]) -> io::Result<()> {
    let name = dest
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "output path has no file name"))?;
    let tmp = dest.with_file_name(format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));

    let result = File::create(&tmp)
        .and_then(|mut f| {
            f.write_all(data)?;
            f.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, dest));

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Operation;

    #[test]
    fn defaults_to_overwriting_input() {
        let job = CorruptionJob::new("a.bin", MutationConfig::default());
        assert_eq!(job.output_path(), Path::new("a.bin"));
        let job = job.output("b.bin");
        assert_eq!(job.output_path(), Path::new("b.bin"));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        save_atomic(&dest, b"payload").unwrap();
        save_atomic(&dest, b"second").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"second");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_input_names_the_path() {
        let job = CorruptionJob::new("/definitely/not/here.bin", MutationConfig::new(Operation::Set, 0));
        let err = job.run().unwrap_err();
        assert!(matches!(err, JobError::Io { .. }));
        assert!(err.to_string().contains("here.bin"));
    }

    #[test]
    fn summary_mentions_container_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        fs::write(&input, [0u8; 8]).unwrap();
        let report = CorruptionJob::new(&input, MutationConfig::new(Operation::Set, 0xFF))
            .run()
            .unwrap();
        assert_eq!(fs::read(&input).unwrap(), [0xFF; 8]);
        let line = report.summary();
        assert!(line.contains("[raw]"), "{line}");
        assert!(line.contains("8 byte(s) changed"), "{line}");
    }
}
