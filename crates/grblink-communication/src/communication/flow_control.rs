//! Character-counted flow control for the Grbl streaming protocol
//!
//! Grbl accepts a continuous stream of line-terminated commands but its
//! serial receive buffer is small and fixed; overrunning it silently drops
//! data. [`FlowControlQueue`] guarantees a queued command is only written
//! when the bytes already in flight leave room for it, and otherwise parks
//! it in a FIFO backlog until acknowledgements release headroom.
//!
//! The [`PendingLedger`] doubles as the response correlator: Grbl answers
//! queued commands strictly in submission order, so popping the ledger head
//! on `ok`/`error:<n>` yields the sequence number the acknowledgement
//! belongs to.
//!
//! Real-time control bytes never pass through here; Grbl reserves buffer
//! space for them and they are written immediately by the worker.

use std::collections::VecDeque;

/// An outbound command line subject to flow control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Monotonic sequence number assigned at submission
    pub seq: u64,
    /// Command text without the line terminator
    pub text: String,
}

impl QueuedCommand {
    /// Create a command; surrounding whitespace is stripped so the wire
    /// length matches what the firmware will actually buffer
    pub fn new(seq: u64, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into().trim().to_string(),
        }
    }

    /// Bytes this command occupies in the firmware buffer, terminator
    /// included
    pub fn wire_len(&self) -> usize {
        self.text.len() + 1
    }

    /// The exact bytes written to the transport
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = self.text.clone().into_bytes();
        bytes.push(b'\n');
        bytes
    }
}

/// Ordered record of commands written but not yet acknowledged
#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: VecDeque<(u64, usize)>,
}

impl PendingLedger {
    /// Record a command that was just written
    pub fn record(&mut self, seq: u64, wire_len: usize) {
        self.entries.push_back((seq, wire_len));
    }

    /// Pop the oldest entry; returns its sequence number and byte length.
    /// `None` means the firmware acknowledged something we never sent.
    pub fn acknowledge(&mut self) -> Option<(u64, usize)> {
        self.entries.pop_front()
    }

    /// Total bytes currently occupying the firmware buffer
    pub fn pending_bytes(&self) -> usize {
        self.entries.iter().map(|(_, len)| len).sum()
    }

    /// Number of commands awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    /// Forget everything; used after a soft reset empties the firmware
    /// buffer
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Backlog plus ledger: the admission gate for queued commands
#[derive(Debug)]
pub struct FlowControlQueue {
    capacity: usize,
    ledger: PendingLedger,
    backlog: VecDeque<QueuedCommand>,
}

impl FlowControlQueue {
    /// Create a queue gated on `capacity` usable firmware buffer bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ledger: PendingLedger::default(),
            backlog: VecDeque::new(),
        }
    }

    /// Accept a command into the backlog; it is written later, oldest
    /// first, as headroom allows.
    ///
    /// Callers must not submit commands longer than the capacity; such a
    /// command could never be admitted and would block the backlog behind
    /// it. The engine rejects them at submission.
    pub fn submit(&mut self, command: QueuedCommand) {
        debug_assert!(command.wire_len() <= self.capacity);
        self.backlog.push_back(command);
    }

    /// Take the next command the firmware buffer can absorb, recording it
    /// in the ledger. `None` when the backlog is empty or the oldest
    /// command does not fit yet.
    pub fn pop_writable(&mut self) -> Option<QueuedCommand> {
        let command = self.backlog.pop_front()?;

        if self.ledger.pending_bytes() + command.wire_len() > self.capacity {
            // No headroom; put it back and wait for an acknowledgement.
            self.backlog.push_front(command);
            return None;
        }

        self.ledger.record(command.seq, command.wire_len());
        debug_assert!(self.ledger.pending_bytes() <= self.capacity);
        Some(command)
    }

    /// Release the budget of the oldest in-flight command. Both `ok` and
    /// `error:<n>` acknowledge a command; the caller decides which event
    /// to emit for the returned sequence number.
    pub fn acknowledge(&mut self) -> Option<(u64, usize)> {
        self.ledger.acknowledge()
    }

    /// Bytes currently in flight
    pub fn pending_bytes(&self) -> usize {
        self.ledger.pending_bytes()
    }

    /// Commands written and awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.ledger.in_flight()
    }

    /// Commands waiting for headroom
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Configured firmware buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop backlog and ledger; used after a soft reset
    pub fn clear(&mut self) {
        self.backlog.clear();
        self.ledger.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(seq: u64, text: &str) -> QueuedCommand {
        QueuedCommand::new(seq, text)
    }

    #[test]
    fn wire_len_counts_the_terminator() {
        assert_eq!(cmd(0, "G0 X0").wire_len(), 6);
        assert_eq!(cmd(0, "  G0 X0  ").wire_len(), 6);
        assert_eq!(cmd(0, "G0 X0").wire_bytes(), b"G0 X0\n");
    }

    #[test]
    fn admits_until_capacity_then_blocks() {
        let mut queue = FlowControlQueue::new(16);
        queue.submit(cmd(0, "G1 X10")); // 7 bytes
        queue.submit(cmd(1, "G1 X20")); // 7 bytes
        queue.submit(cmd(2, "G1 X30")); // would make 21

        assert_eq!(queue.pop_writable(), Some(cmd(0, "G1 X10")));
        assert_eq!(queue.pop_writable(), Some(cmd(1, "G1 X20")));
        assert_eq!(queue.pop_writable(), None);
        assert_eq!(queue.pending_bytes(), 14);
        assert_eq!(queue.backlog_len(), 1);
    }

    #[test]
    fn acknowledgement_releases_headroom_in_fifo_order() {
        let mut queue = FlowControlQueue::new(16);
        queue.submit(cmd(0, "G1 X10"));
        queue.submit(cmd(1, "G1 X20"));
        queue.submit(cmd(2, "G1 X30"));
        queue.pop_writable();
        queue.pop_writable();
        assert_eq!(queue.pop_writable(), None);

        assert_eq!(queue.acknowledge(), Some((0, 7)));
        assert_eq!(queue.pop_writable(), Some(cmd(2, "G1 X30")));
        assert_eq!(queue.acknowledge(), Some((1, 7)));
        assert_eq!(queue.acknowledge(), Some((2, 7)));
        assert_eq!(queue.acknowledge(), None);
    }

    #[test]
    fn command_filling_the_buffer_exactly_is_admitted() {
        let mut queue = FlowControlQueue::new(6);
        queue.submit(cmd(0, "G0 X0"));
        assert_eq!(queue.pop_writable(), Some(cmd(0, "G0 X0")));
        assert_eq!(queue.pending_bytes(), 6);
    }

    #[test]
    fn clear_empties_ledger_and_backlog() {
        let mut queue = FlowControlQueue::new(32);
        queue.submit(cmd(0, "G1 X10"));
        queue.submit(cmd(1, "G1 X20"));
        queue.pop_writable();
        queue.clear();
        assert_eq!(queue.pending_bytes(), 0);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.backlog_len(), 0);
    }
}
