//! Flow-control queue behavior under realistic streaming patterns.

use grblink_communication::{FlowControlQueue, QueuedCommand};
use proptest::prelude::*;

fn drain_writable(queue: &mut FlowControlQueue) -> Vec<u64> {
    let mut written = Vec::new();
    while let Some(command) = queue.pop_writable() {
        written.push(command.seq);
    }
    written
}

#[test]
fn streams_a_program_without_exceeding_capacity() {
    // Typical short program against the stock 127-byte buffer.
    let lines = [
        "G21", "G90", "G0 X0 Y0", "G1 Z-1 F100", "G1 X50 Y0 F800", "G1 X50 Y50", "G1 X0 Y50",
        "G1 X0 Y0", "G0 Z5", "M5", "M2",
    ];
    let mut queue = FlowControlQueue::new(127);
    for (seq, line) in lines.iter().enumerate() {
        queue.submit(QueuedCommand::new(seq as u64, *line));
    }

    let mut written = drain_writable(&mut queue);
    assert!(queue.pending_bytes() <= 127);

    // Acknowledge everything in order; each release may admit more.
    let mut acked = Vec::new();
    while let Some((seq, _)) = queue.acknowledge() {
        acked.push(seq);
        written.extend(drain_writable(&mut queue));
    }

    assert_eq!(written, (0..lines.len() as u64).collect::<Vec<_>>());
    assert_eq!(acked, written);
    assert_eq!(queue.in_flight(), 0);
    assert_eq!(queue.backlog_len(), 0);
}

#[test]
fn write_order_matches_submission_order_across_stalls() {
    let mut queue = FlowControlQueue::new(20);
    for seq in 0..5u64 {
        // 10 wire bytes each; two at a time fit.
        queue.submit(QueuedCommand::new(seq, "G1 X100.0"));
    }

    let mut written = Vec::new();
    loop {
        written.extend(drain_writable(&mut queue));
        if queue.acknowledge().is_none() {
            break;
        }
    }
    assert_eq!(written, vec![0, 1, 2, 3, 4]);
}

proptest! {
    /// Pending bytes never exceed capacity, whatever the interleaving of
    /// submissions and acknowledgements.
    #[test]
    fn pending_bytes_never_exceed_capacity(
        capacity in 10usize..200,
        ops in prop::collection::vec(
            prop_oneof![
                // submit a command; lengths stay below the smallest
                // capacity, matching the engine's admission check
                (1usize..9).prop_map(|len| Some(len)),
                // acknowledge the oldest in-flight command
                Just(None),
            ],
            1..100,
        ),
    ) {
        let mut queue = FlowControlQueue::new(capacity);
        let mut seq = 0u64;

        for op in ops {
            match op {
                Some(len) => {
                    queue.submit(QueuedCommand::new(seq, "X".repeat(len)));
                    seq += 1;
                }
                None => {
                    queue.acknowledge();
                }
            }
            while queue.pop_writable().is_some() {}
            prop_assert!(queue.pending_bytes() <= capacity);
        }
    }

    /// Acknowledgements come back in exactly the order commands were
    /// written.
    #[test]
    fn acknowledgement_order_is_fifo(
        lengths in prop::collection::vec(1usize..20, 1..30),
    ) {
        let mut queue = FlowControlQueue::new(127);
        for (seq, len) in lengths.iter().enumerate() {
            queue.submit(QueuedCommand::new(seq as u64, "X".repeat(*len)));
        }

        // Every command fits the buffer on its own, so one acknowledgement
        // per iteration always makes progress.
        for expected in 0..lengths.len() as u64 {
            while queue.pop_writable().is_some() {}
            let (seq, _) = queue.acknowledge().unwrap();
            prop_assert_eq!(seq, expected);
        }
        prop_assert_eq!(queue.in_flight(), 0);
        prop_assert_eq!(queue.backlog_len(), 0);
    }
}
