//! Append-only writer for the textual hit-log format (spec §6).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use romesim_core::Hit;

use crate::Result;

/// Writer for the accepted/lost hit-log text format.
///
/// Both logs share the same on-disk shape: per hit, a `# Event <e>` / `# Time
/// <t>` header pair (and an optional `# Trigger <s> - <e>` line), followed
/// by the two-space-indented verbose hit line. Every write is followed by a
/// flush, matching the "every opened output file has a matching
/// flush-then-close" scoping rule (spec §5).
pub struct HitLogWriter {
    writer: BufWriter<File>,
}

impl HitLogWriter {
    /// Truncates (or creates) the file at `path` for a fresh run.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }

    /// Opens the file at `path` for appending, preserving any existing
    /// content — used when a detector's output spans multiple flushes
    /// within one run.
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }

    /// Writes one hit's event/time headers followed by its indented
    /// verbose line.
    pub fn write_hit(&mut self, hit: &Hit) -> Result<()> {
        writeln!(self.writer, "# Event {}", hit.event_index)?;
        writeln!(self.writer, "# Time {}", hit.timestamp)?;
        writeln!(self.writer, "  {}", hit.format_verbose())?;
        Ok(())
    }

    /// Same as [`Self::write_hit`], additionally emitting a `# Trigger
    /// <start> - <end>` line ahead of the hit — used for the one hit
    /// nominally associated with the window's opening tick.
    pub fn write_hit_with_trigger_window(&mut self, hit: &Hit, start: i64, end: i64) -> Result<()> {
        writeln!(self.writer, "# Event {}", hit.event_index)?;
        writeln!(self.writer, "# Time {}", hit.timestamp)?;
        writeln!(self.writer, "# Trigger {start} - {end}")?;
        writeln!(self.writer, "  {}", hit.format_verbose())?;
        Ok(())
    }

    /// Writes every hit in `hits` in order, then flushes.
    pub fn write_hits(&mut self, hits: &[Hit]) -> Result<()> {
        for hit in hits {
            self.write_hit(hit)?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
