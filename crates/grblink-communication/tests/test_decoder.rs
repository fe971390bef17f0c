//! Decoder behavior over a realistic session transcript.

use grblink_communication::{GrblDecoder, GrblResponse};
use grblink_core::machine::{MachineState, RunState};

/// Lines as a real controller produces them across a short job: banner,
/// settings dump, status polls, a parser-state query, acks, and an alarm.
const SESSION: &[&str] = &[
    "Grbl 1.1h ['$' for help]",
    "$0=10",
    "$110=8000.000",
    "ok",
    "<Idle|MPos:0.000,0.000,0.000|FS:0,0|WCO:0.000,0.000,0.000>",
    "[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]",
    "ok",
    "<Run|MPos:12.500,0.000,-1.000|FS:800,0|Ln:4>",
    "ok",
    "<Hold:0|MPos:20.000,0.000,-1.000|Pn:P>",
    "error:9",
    "ALARM:2",
    "[MSG:Reset to continue]",
];

#[test]
fn session_transcript_classifies_every_line() {
    let decoder = GrblDecoder::new(3);
    let decoded: Vec<GrblResponse> = SESSION.iter().map(|line| decoder.decode(line)).collect();

    assert!(matches!(&decoded[0], GrblResponse::Startup { version } if version == "1.1h"));
    assert!(matches!(decoded[1], GrblResponse::Setting { number: 0, .. }));
    assert!(matches!(decoded[2], GrblResponse::Setting { number: 110, .. }));
    assert_eq!(decoded[3], GrblResponse::Ok);
    assert!(matches!(decoded[4], GrblResponse::Status(_)));
    assert!(matches!(decoded[5], GrblResponse::ParserState(_)));
    assert!(matches!(decoded[7], GrblResponse::Status(_)));
    assert!(matches!(decoded[9], GrblResponse::Status(_)));
    assert_eq!(decoded[10], GrblResponse::Error(9));
    assert_eq!(decoded[11], GrblResponse::Alarm(2));
    assert!(matches!(&decoded[12], GrblResponse::Feedback(text) if text.starts_with("MSG:")));
}

#[test]
fn session_transcript_folds_into_a_consistent_snapshot() {
    let decoder = GrblDecoder::new(3);
    let mut state = MachineState::default();

    for line in SESSION {
        if let GrblResponse::Status(report) = decoder.decode(line) {
            state = report.apply(&state);
        }
    }

    // Last report wins for the state word and position, earlier values
    // stick where the later reports omitted them.
    assert_eq!(state.run_state, RunState::Hold);
    assert_eq!(state.substate, Some(0));
    assert_eq!(state.machine_position.axes, vec![20.0, 0.0, -1.0]);
    assert_eq!(state.feed_rate, 800.0);
    assert_eq!(state.line_number, Some(4));
    assert_eq!(state.pins, "P");
    // WCO was zero so work coordinates track machine coordinates.
    assert_eq!(state.work_position.axes, vec![20.0, 0.0, -1.0]);
}

#[test]
fn crlf_and_whitespace_do_not_change_classification() {
    let decoder = GrblDecoder::new(3);
    assert_eq!(decoder.decode("ok\r"), GrblResponse::Ok);
    assert_eq!(decoder.decode("  ok  "), GrblResponse::Ok);
    assert_eq!(decoder.decode("error:20\r"), GrblResponse::Error(20));
}
