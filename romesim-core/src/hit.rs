use std::fmt;

/// Small insertion-ordered sequence of `(name, value)` pairs.
///
/// Address and readout-timestamp fields on a [`Hit`] are semantically
/// ordered: the construction order is the textual order, and lookups are by
/// name. Cell depth is small (typically ≤ 8) so a plain vector with linear
/// lookup is the right tool — a `HashMap`/`BTreeMap` would lose the
/// insertion order the text form depends on.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldMap(Vec<(String, i64)>);

impl FieldMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: i64) {
        self.0.push((name.into(), value));
    }

    /// Inserts, or overwrites in place if `name` is already present.
    pub fn set(&mut self, name: &str, value: i64) {
        if let Some(entry) = self.0.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.push(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Finds the value of the first entry whose name *contains* `part` as a
    /// substring. Used to locate a field like `"col_Trigger"` when the
    /// caller only knows the `"_Trigger"` suffix.
    pub fn find_containing(&self, part: &str) -> Option<i64> {
        self.0.iter().find(|(n, _)| n.contains(part)).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, i64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Tags applied to a hit's readout map to record why and where it left the
/// accepted path. [`LostKind::is_loss`] distinguishes the kinds counted by
/// the hit-conservation invariant from purely informational annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LostKind {
    NotRead,
    NoSpace,
    Overwritten,
    BufferFull,
    NoTrigger,
    SampleDelayLoss,
    SimulationEnd,
    GroupDead,
    GroupDeadShort,
    PixelFull,
    PixelNotFound,
    EmptyRoc,
    LogicReject,
    Merged,
    Remerged,
    RocMerge,
    ReferencePixelHitDetected,
    TriggerTableMerged,
    TriggerTableAdded,
    TriggerTableFull,
}

impl LostKind {
    /// Whether this tag counts toward the conservation invariant
    /// (`|placed| = |accepted| + |lost of counted kinds|`).
    pub fn is_loss(self) -> bool {
        !matches!(
            self,
            LostKind::Merged
                | LostKind::Remerged
                | LostKind::RocMerge
                | LostKind::ReferencePixelHitDetected
                | LostKind::TriggerTableMerged
                | LostKind::TriggerTableAdded
                | LostKind::TriggerTableFull
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LostKind::NotRead => "NotRead",
            LostKind::NoSpace => "noSpace",
            LostKind::Overwritten => "overwritten",
            LostKind::BufferFull => "BufferFull",
            LostKind::NoTrigger => "noTrigger",
            LostKind::SampleDelayLoss => "SampleDelayLoss",
            LostKind::SimulationEnd => "SimulationEnd",
            LostKind::GroupDead => "GroupDead",
            LostKind::GroupDeadShort => "GroupDeadShort",
            LostKind::PixelFull => "PixelFull",
            LostKind::PixelNotFound => "PixelNotFound",
            LostKind::EmptyRoc => "EmptyROC",
            LostKind::LogicReject => "LogicReject",
            LostKind::Merged => "merged",
            LostKind::Remerged => "remerged",
            LostKind::RocMerge => "ROCMerge",
            LostKind::ReferencePixelHitDetected => "ReferencePixelHitDetected",
            LostKind::TriggerTableMerged => "TriggerTable signals merged",
            LostKind::TriggerTableAdded => "TriggerTable entry added",
            LostKind::TriggerTableFull => "TriggerTable full",
        }
    }
}

impl fmt::Display for LostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A digitized detector hit as it moves up through the readout tree.
///
/// `event_index = -1` is the invalid sentinel produced by a failed parse or
/// by default construction; [`Hit::is_valid`] is the authoritative check.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hit {
    pub event_index: i64,
    pub timestamp: i64,
    pub dead_time_end: i64,
    pub charge: f64,
    pub available_from: i64,
    pub address: FieldMap,
    pub readout: FieldMap,
}

impl Hit {
    pub fn new(event_index: i64, timestamp: i64, dead_time_end: i64, charge: f64) -> Self {
        Self {
            event_index,
            timestamp,
            dead_time_end,
            charge,
            available_from: -1,
            address: FieldMap::new(),
            readout: FieldMap::new(),
        }
    }

    /// The invalid sentinel hit: an empty pixel/buffer slot.
    pub fn invalid() -> Self {
        let mut h = Self::new(-1, 0, i64::MIN, 0.0);
        h.available_from = i64::MIN;
        h
    }

    pub fn is_valid(&self) -> bool {
        self.timestamp >= 0
            && self.event_index >= 0
            && self.charge >= 0.0
            && !self.address.is_empty()
    }

    pub fn is_available(&self, t: i64) -> bool {
        t > self.available_from
    }

    pub fn find_readout_time(&self, namepart: &str) -> Option<i64> {
        self.readout.find_containing(namepart)
    }

    /// Appends a `(name, timestamp)` pair to the readout map, used both for
    /// stage timestamps (`"<addr>"`) and loss annotations (`"NotRead"`, ...).
    pub fn annotate(&mut self, name: impl Into<String>, t: i64) {
        self.readout.push(name, t);
    }

    pub fn annotate_loss(&mut self, kind: LostKind, t: i64) {
        self.readout.push(kind.as_str(), t);
    }

    /// `Event <e> Timestamp <t> DeadTimeEnd <d> Charge <c> ; Address: (name) v … ; Readout: (name) v …`
    pub fn format_verbose(&self) -> String {
        let mut s = format!(
            "Event {} Timestamp {} DeadTimeEnd {} Charge {} ; Address:",
            self.event_index, self.timestamp, self.dead_time_end, self.charge
        );
        for (name, value) in self.address.iter() {
            s.push_str(&format!(" ({name}) {value}"));
        }
        s.push_str(" ; Readout:");
        for (name, value) in self.readout.iter() {
            s.push_str(&format!(" ({name}) {value}"));
        }
        s
    }

    /// Same payload and field order as [`Hit::format_verbose`], without the
    /// `Event`/`Timestamp`/... keywords and without parenthesising address
    /// and readout names.
    pub fn format_compact(&self) -> String {
        let mut s = format!(
            "{} {} {} {} ;",
            self.event_index, self.timestamp, self.dead_time_end, self.charge
        );
        for (name, value) in self.address.iter() {
            s.push_str(&format!(" {name} {value}"));
        }
        s.push_str(" ;");
        for (name, value) in self.readout.iter() {
            s.push_str(&format!(" {name} {value}"));
        }
        s
    }

    /// A header line naming the address/readout fields currently present,
    /// for use above a run of compact-form lines that share the same shape.
    pub fn generate_title_string(&self) -> String {
        let addr_names: Vec<&str> = self.address.iter().map(|(n, _)| n.as_str()).collect();
        let readout_names: Vec<&str> = self.readout.iter().map(|(n, _)| n.as_str()).collect();
        format!(
            "# Fields: Address({}) Readout({})",
            addr_names.join(","),
            readout_names.join(",")
        )
    }

    /// Parses either the verbose or the compact textual form. Returns
    /// [`Hit::invalid`] on any malformed line, per the "local: yield invalid
    /// sentinel, skip" error-handling policy.
    pub fn parse(line: &str) -> Hit {
        let line = line.trim();
        if line.starts_with("Event ") {
            Self::parse_verbose(line).unwrap_or_else(Hit::invalid)
        } else {
            Self::parse_compact(line).unwrap_or_else(Hit::invalid)
        }
    }

    fn parse_verbose(line: &str) -> Option<Hit> {
        let (scalars, rest) = line.split_once(';')?;
        let mut tok = scalars.split_whitespace();
        expect_token(&mut tok, "Event")?;
        let event_index = tok.next()?.parse().ok()?;
        expect_token(&mut tok, "Timestamp")?;
        let timestamp = tok.next()?.parse().ok()?;
        expect_token(&mut tok, "DeadTimeEnd")?;
        let dead_time_end = tok.next()?.parse().ok()?;
        expect_token(&mut tok, "Charge")?;
        let charge = tok.next()?.parse().ok()?;

        let mut hit = Hit::new(event_index, timestamp, dead_time_end, charge);
        let rest = rest.trim_start();
        let rest = rest.strip_prefix("Address:")?;
        let (address_part, readout_part) = rest.split_once(';')?;
        let readout_part = readout_part.trim_start();
        let readout_part = readout_part.strip_prefix("Readout:").unwrap_or(readout_part);

        parse_parenthesised_pairs(address_part, &mut hit.address)?;
        parse_parenthesised_pairs(readout_part, &mut hit.readout)?;
        Some(hit)
    }

    fn parse_compact(line: &str) -> Option<Hit> {
        let mut sections = line.splitn(3, ';');
        let scalars = sections.next()?;
        let address_part = sections.next()?;
        let readout_part = sections.next().unwrap_or("");

        let mut tok = scalars.split_whitespace();
        let event_index = tok.next()?.parse().ok()?;
        let timestamp = tok.next()?.parse().ok()?;
        let dead_time_end = tok.next()?.parse().ok()?;
        let charge = tok.next()?.parse().ok()?;

        let mut hit = Hit::new(event_index, timestamp, dead_time_end, charge);
        parse_bare_pairs(address_part, &mut hit.address)?;
        parse_bare_pairs(readout_part, &mut hit.readout)?;
        Some(hit)
    }
}

fn expect_token<'a>(tok: &mut impl Iterator<Item = &'a str>, expected: &str) -> Option<()> {
    (tok.next()? == expected).then_some(())
}

fn parse_parenthesised_pairs(text: &str, into: &mut FieldMap) -> Option<()> {
    let mut tok = text.split_whitespace().peekable();
    while let Some(name_tok) = tok.next() {
        let name = name_tok.strip_prefix('(')?.strip_suffix(')')?;
        let value: i64 = tok.next()?.parse().ok()?;
        into.push(name, value);
    }
    Some(())
}

fn parse_bare_pairs(text: &str, into: &mut FieldMap) -> Option<()> {
    let mut tok = text.split_whitespace();
    while let Some(name) = tok.next() {
        let value: i64 = tok.next()?.parse().ok()?;
        into.push(name, value);
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hit() -> Hit {
        let mut h = Hit::new(1, 3, 7, 5.0);
        h.address.push("det", 0);
        h.address.push("col", 1);
        h.readout.push("det", 3);
        h.readout.push("col", 4);
        h
    }

    #[test]
    fn verbose_round_trip() {
        let h = sample_hit();
        let formatted = h.format_verbose();
        let parsed = Hit::parse(&formatted);
        assert_eq!(parsed, h);
    }

    #[test]
    fn compact_round_trip() {
        let h = sample_hit();
        let formatted = h.format_compact();
        let parsed = Hit::parse(&formatted);
        assert_eq!(parsed, h);
    }

    #[test]
    fn malformed_line_is_invalid_sentinel() {
        let parsed = Hit::parse("not a hit line at all");
        assert!(!parsed.is_valid());
        assert_eq!(parsed.event_index, -1);
    }

    #[test]
    fn validity_requires_at_least_one_address() {
        let h = Hit::new(0, 0, 0, 0.0);
        assert!(!h.is_valid());
    }

    #[test]
    fn is_available_is_strict() {
        let mut h = sample_hit();
        h.available_from = 10;
        assert!(!h.is_available(10));
        assert!(h.is_available(11));
    }

    #[test]
    fn find_readout_time_by_suffix() {
        let mut h = sample_hit();
        h.readout.push("col_Trigger", 99);
        assert_eq!(h.find_readout_time("_Trigger"), Some(99));
    }
}
