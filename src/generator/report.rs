//! Parsing log
//!
//! A small CRLF text file holding the decode counters of a run, followed later
//! by the number of nodes that survived deduplication. Writes are best effort.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::crlf::CrlfWriter;
use crate::proxy::ProxyStats;

/// Line closing the counter block
pub const PARSING_RESULTS_MARKER: &str = "--- Parsing Results ---";

#[derive(Debug, Clone)]
pub struct ParsingLog {
    path: PathBuf,
}

impl ParsingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Truncates the log and writes the decode counters
    pub fn write_stats(&self, stats: &ProxyStats) -> bool {
        let result = File::create(&self.path)
            .with_context(|| format!("Failed to create parsing log {:?}", self.path))
            .and_then(|file| {
                let mut writer = CrlfWriter::new(BufWriter::new(file));
                for line in stats.summary_lines() {
                    writeln!(writer, "{}", line)?;
                }
                writeln!(writer, "{}", PARSING_RESULTS_MARKER)?;
                writer.flush()?;
                Ok(())
            });
        self.report(result)
    }

    /// Appends the number of nodes left after deduplication
    pub fn append_remaining(&self, count: usize) -> bool {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open parsing log {:?} for appending", self.path))
            .and_then(|file| {
                let mut writer = CrlfWriter::new(file);
                writeln!(
                    writer,
                    "Number of remaining nodes after removing duplicates: {}",
                    count
                )?;
                writer.flush()?;
                Ok(())
            });
        self.report(result)
    }

    fn report(&self, result: Result<()>) -> bool {
        match result {
            Ok(()) => {
                debug!("Updated parsing log {:?}", self.path);
                true
            }
            Err(e) => {
                warn!("{:#}", e);
                false
            }
        }
    }
}
