//! Reader for the textual hit-log format (spec §6).

use std::path::Path;

use romesim_core::Hit;

use crate::Result;

/// Everything recovered from one hit-log file: the parsed hits plus the
/// trigger/event bookkeeping carried in its `#` header lines.
#[derive(Debug, Clone, Default)]
pub struct LoadedHitLog {
    pub hits: Vec<Hit>,
    /// Trigger-on ticks enqueued by `# Trigger <s> - <e>` lines.
    pub trigger_on_ticks: Vec<i64>,
    /// `e - s` from the last `# Trigger <s> - <e>` line seen, if any.
    pub trigger_length: Option<i64>,
    /// Event indices flagged triggered by a bare `# Trigger` line following
    /// their `# Event <n>` header.
    pub triggered_event_indices: Vec<i64>,
}

/// Reads and parses the hit-log file at `path`.
pub fn load_hit_log<P: AsRef<Path>>(path: P) -> Result<LoadedHitLog> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_hit_log(&content))
}

/// Parses hit-log text per spec §6's loading rules: `#` lines are scanned
/// for `Event`/`Trigger` tokens; every other non-blank line is parsed as a
/// hit, with invalid lines silently skipped.
pub fn parse_hit_log(content: &str) -> LoadedHitLog {
    let mut log = LoadedHitLog::default();
    let mut current_event_index: Option<i64> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('#') {
            let rest = rest.trim();
            if let Some(value) = rest.strip_prefix("Event ") {
                current_event_index = value.trim().parse().ok();
            } else if let Some(value) = rest.strip_prefix("Trigger") {
                let value = value.trim();
                if value.is_empty() {
                    if let Some(idx) = current_event_index {
                        log.triggered_event_indices.push(idx);
                    }
                } else if let Some((start, end)) = value.split_once('-') {
                    if let (Ok(start), Ok(end)) = (start.trim().parse::<i64>(), end.trim().parse::<i64>()) {
                        log.trigger_length = Some(end - start);
                        log.trigger_on_ticks.push(start);
                    }
                }
            }
            continue;
        }

        let hit = Hit::parse(line);
        if hit.is_valid() {
            log.hits.push(hit);
        }
    }

    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::HitLogWriter;
    use romesim_core::Hit;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_a_written_hit() {
        let file = NamedTempFile::new().unwrap();
        let mut h = Hit::new(1, 5, 15, 3.0);
        h.address.push("col", 0);
        HitLogWriter::create(file.path()).unwrap().write_hit(&h).unwrap();

        let loaded = load_hit_log(file.path()).unwrap();
        assert_eq!(loaded.hits.len(), 1);
        assert_eq!(loaded.hits[0].event_index, 1);
        assert_eq!(loaded.hits[0].timestamp, 5);
    }

    #[test]
    fn trigger_window_sets_length_and_enqueues_start() {
        let log = parse_hit_log("# Trigger 10 - 25\n");
        assert_eq!(log.trigger_length, Some(15));
        assert_eq!(log.trigger_on_ticks, vec![10]);
    }

    #[test]
    fn bare_trigger_after_event_flags_that_event() {
        let log = parse_hit_log("# Event 7\n# Trigger\n");
        assert_eq!(log.triggered_event_indices, vec![7]);
    }

    #[test]
    fn malformed_hit_lines_are_silently_skipped() {
        let log = parse_hit_log("  this is not a hit line\n  Event notanumber Timestamp 1 DeadTimeEnd 2 Charge 3 ; ;\n");
        assert!(log.hits.is_empty());
    }
}
