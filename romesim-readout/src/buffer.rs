use romesim_core::{Hit, LostKind};

/// How a [`crate::cell::ReadoutCell`] stores the hits it currently holds.
///
/// `Fifo` is an ordered, capacity-bounded list: the oldest available hit is
/// always read first. `Priority` is a fixed-size slot array: a hit keeps the
/// slot it was inserted into until read, which is what lets
/// [`crate::child_read::ChildReadPolicy::OneByOne`] mirror a child's slots
/// one-for-one.
#[derive(Debug, Clone)]
pub enum BufferPolicy {
    Fifo { capacity: usize, hits: Vec<Hit> },
    Priority { slots: Vec<Option<Hit>> },
}

impl BufferPolicy {
    pub fn fifo(capacity: usize) -> Self {
        BufferPolicy::Fifo { capacity, hits: Vec::new() }
    }

    pub fn priority(capacity: usize) -> Self {
        BufferPolicy::Priority { slots: vec![None; capacity] }
    }

    pub fn capacity(&self) -> usize {
        match self {
            BufferPolicy::Fifo { capacity, .. } => *capacity,
            BufferPolicy::Priority { slots } => slots.len(),
        }
    }

    pub fn occupied_count(&self) -> usize {
        match self {
            BufferPolicy::Fifo { hits, .. } => hits.len(),
            BufferPolicy::Priority { slots } => slots.iter().filter(|s| s.is_some()).count(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupied_count() >= self.capacity()
    }

    /// Inserts `h`. A priority buffer stamps the hit with its slot index
    /// under `"<address_name>_bufferNumber"` before storing it. On failure
    /// (buffer full) `h` is handed back so the caller can log or evict.
    pub fn insert(&mut self, address_name: &str, mut h: Hit) -> Result<(), Hit> {
        match self {
            BufferPolicy::Fifo { capacity, hits } => {
                if hits.len() >= *capacity {
                    return Err(h);
                }
                hits.push(h);
                Ok(())
            }
            BufferPolicy::Priority { slots } => {
                let Some(index) = slots.iter().position(Option::is_none) else {
                    return Err(h);
                };
                h.annotate(format!("{address_name}_bufferNumber"), index as i64);
                slots[index] = Some(h);
                Ok(())
            }
        }
    }

    /// The oldest (FIFO) or lowest-index (priority) hit whose
    /// `available_from < t`. Removes it from the buffer iff `remove`.
    pub fn get(&mut self, t: i64, remove: bool) -> Hit {
        match self {
            BufferPolicy::Fifo { hits, .. } => match hits.iter().position(|h| h.is_available(t)) {
                Some(pos) if remove => hits.remove(pos),
                Some(pos) => hits[pos].clone(),
                None => Hit::invalid(),
            },
            BufferPolicy::Priority { slots } => {
                match slots.iter().position(|s| matches!(s, Some(h) if h.is_available(t))) {
                    Some(pos) if remove => slots[pos].take().unwrap_or_else(Hit::invalid),
                    Some(pos) => slots[pos].clone().unwrap_or_else(Hit::invalid),
                    None => Hit::invalid(),
                }
            }
        }
    }

    /// Evicts and logs as `noTrigger` every hit whose `available_from == t`
    /// — used when the owning detector's gate is low at the matching tick.
    pub fn no_trigger_remove(&mut self, t: i64, lost_sink: &mut Vec<Hit>) {
        match self {
            BufferPolicy::Fifo { hits, .. } => {
                hits.retain_mut(|h| {
                    if h.available_from == t {
                        let mut lost = h.clone();
                        lost.annotate_loss(LostKind::NoTrigger, t);
                        lost_sink.push(lost);
                        false
                    } else {
                        true
                    }
                });
            }
            BufferPolicy::Priority { slots } => {
                for slot in slots.iter_mut() {
                    let expire = matches!(slot, Some(h) if h.available_from == t);
                    if expire {
                        if let Some(mut h) = slot.take() {
                            h.annotate_loss(LostKind::NoTrigger, t);
                            lost_sink.push(h);
                        }
                    }
                }
            }
        }
    }

    /// Evicts the lowest-index occupied entry unconditionally, used by
    /// `OverwriteReadout` to make room. For a FIFO buffer this is the
    /// oldest hit; a priority buffer has no intrinsic age beyond slot
    /// index, which is used as the tie-break.
    pub fn evict_oldest(&mut self) -> Option<Hit> {
        match self {
            BufferPolicy::Fifo { hits, .. } => {
                if hits.is_empty() {
                    None
                } else {
                    Some(hits.remove(0))
                }
            }
            BufferPolicy::Priority { slots } => {
                slots.iter().position(Option::is_some).and_then(|pos| slots[pos].take())
            }
        }
    }

    pub fn drain_all(&mut self, mut f: impl FnMut(Hit)) {
        match self {
            BufferPolicy::Fifo { hits, .. } => {
                for h in hits.drain(..) {
                    f(h);
                }
            }
            BufferPolicy::Priority { slots } => {
                for slot in slots.iter_mut() {
                    if let Some(h) = slot.take() {
                        f(h);
                    }
                }
            }
        }
    }

    /// Slot-indexed peek, meaningful only for a priority buffer (used by
    /// `OneByOneReadout` to mirror a child's slots).
    pub fn peek_slot(&self, index: usize) -> Option<&Hit> {
        match self {
            BufferPolicy::Priority { slots } => slots.get(index).and_then(Option::as_ref),
            BufferPolicy::Fifo { .. } => None,
        }
    }

    pub fn slot_occupied(&self, index: usize) -> bool {
        self.peek_slot(index).is_some()
    }

    pub fn set_slot(&mut self, index: usize, h: Hit) {
        if let BufferPolicy::Priority { slots } = self {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(h);
            }
        }
    }

    pub fn clear_slot(&mut self, index: usize) {
        if let BufferPolicy::Priority { slots } = self {
            if let Some(slot) = slots.get_mut(index) {
                *slot = None;
            }
        }
    }

    /// The slot/position index of the first hit available at `t`, without
    /// removing it. Used to find which child slot a mirrored `OneByOne`
    /// read must also clear.
    pub fn index_of_available(&self, t: i64) -> Option<usize> {
        match self {
            BufferPolicy::Fifo { hits, .. } => hits.iter().position(|h| h.is_available(t)),
            BufferPolicy::Priority { slots } => {
                slots.iter().position(|s| matches!(s, Some(h) if h.is_available(t)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(event: i64, available_from: i64) -> Hit {
        let mut h = Hit::new(event, 0, 100, 1.0);
        h.address.push("a", 1);
        h.available_from = available_from;
        h
    }

    #[test]
    fn fifo_respects_capacity() {
        let mut buf = BufferPolicy::fifo(1);
        assert!(buf.insert("a", hit(0, -1)).is_ok());
        assert!(buf.insert("a", hit(1, -1)).is_err());
    }

    #[test]
    fn priority_stamps_slot_number() {
        let mut buf = BufferPolicy::priority(3);
        buf.insert("a", hit(0, -1)).unwrap();
        let got = buf.get(0, true);
        assert_eq!(got.find_readout_time("a_bufferNumber"), Some(0));
    }

    #[test]
    fn priority_reuses_freed_slot() {
        let mut buf = BufferPolicy::priority(3);
        buf.insert("a", hit(0, -1)).unwrap();
        buf.insert("a", hit(1, -1)).unwrap();
        buf.get(0, true); // frees slot 0
        buf.insert("a", hit(2, -1)).unwrap();
        let h2 = buf.get(0, true);
        assert_eq!(h2.event_index, 1);
        let h3 = buf.get(0, true);
        assert_eq!(h3.find_readout_time("a_bufferNumber"), Some(0));
    }

    #[test]
    fn no_trigger_remove_evicts_matching_available_from() {
        let mut buf = BufferPolicy::fifo(4);
        buf.insert("a", hit(0, 5)).unwrap();
        let mut lost = Vec::new();
        buf.no_trigger_remove(5, &mut lost);
        assert_eq!(lost.len(), 1);
        assert_eq!(buf.occupied_count(), 0);
    }
}
