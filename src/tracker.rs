//! Request/response correlation.
//!
//! Sequence numbers are six bits wide, so pending requests live in a fixed
//! ring of 64 slots indexed by `rq_seq`. A slot is reused only once the
//! sequence space wraps, and the ring is cleared after every exchange so a
//! late answer cannot be attributed to a newer request with the same
//! `(rq_seq, cmd)` pair.

const SLOTS: usize = 64;

/// A request waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingRequest {
    pub rq_seq: u8,
    /// Command as sent on the wire (0x34 when bridged).
    pub cmd: u8,
    /// Original command when wrapped for bridging.
    pub target_cmd: u8,
    pub bridging_level: u8,
    /// Last encoded datagram for this request.
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct RequestTracker {
    slots: [Option<PendingRequest>; SLOTS],
    next_seq: u8,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            next_seq: 0,
        }
    }

    /// Allocate the sequence number for a fresh (non-retry) request.
    pub(crate) fn next_seq(&mut self) -> u8 {
        let current = self.next_seq;
        self.next_seq = (self.next_seq + 1) & 0x3F;
        current
    }

    /// Insert a pending request; a retry of the same `(rq_seq, cmd)` updates
    /// the slot in place.
    pub(crate) fn add(&mut self, request: PendingRequest) {
        let slot = &mut self.slots[slot_index(request.rq_seq)];
        match slot {
            Some(existing) if existing.cmd == request.cmd => {
                existing.bytes = request.bytes;
                existing.bridging_level = request.bridging_level;
                existing.target_cmd = request.target_cmd;
            }
            _ => *slot = Some(request),
        }
    }

    pub(crate) fn lookup(&self, rq_seq: u8, cmd: u8) -> Option<&PendingRequest> {
        self.slots[slot_index(rq_seq)]
            .as_ref()
            .filter(|p| p.rq_seq == rq_seq && p.cmd == cmd)
    }

    pub(crate) fn lookup_mut(&mut self, rq_seq: u8) -> Option<&mut PendingRequest> {
        self.slots[slot_index(rq_seq)].as_mut()
    }

    pub(crate) fn remove(&mut self, rq_seq: u8, cmd: u8) -> Option<PendingRequest> {
        let slot = &mut self.slots[slot_index(rq_seq)];
        if slot.as_ref().is_some_and(|p| p.cmd == cmd) {
            slot.take()
        } else {
            None
        }
    }

    pub(crate) fn clear_all(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

fn slot_index(rq_seq: u8) -> usize {
    usize::from(rq_seq) % SLOTS
}
