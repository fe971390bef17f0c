//! Grbl line decoder
//!
//! Classifies every line read from the transport into a [`GrblResponse`]
//! and parses `<...>` status reports into a [`StatusReport`], which merges
//! into the previous [`MachineState`] snapshot via [`StatusReport::apply`].
//!
//! Parsing is deliberately liberal: text formats vary slightly across
//! firmware versions, so a line that cannot be classified is preserved
//! verbatim as `Unrecognized` instead of raising an error, and a field
//! group that fails to parse is skipped with the previous value retained.

use grblink_core::machine::{
    Accessories, BufferFill, GcodeParserState, MachineState, Overrides, Position, RunState,
};
use serde::{Deserialize, Serialize};

use super::modal;

/// One classified line from the firmware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// `ok` acknowledgement for the oldest in-flight command
    Ok,
    /// `error:<n>` rejection of the oldest in-flight command
    Error(u8),
    /// `ALARM:<n>`; asynchronous, not correlated to any command
    Alarm(u8),
    /// `<...>` real-time status report
    Status(StatusReport),
    /// `[GC:...]` parser-state report
    ParserState(GcodeParserState),
    /// `Grbl <version> [...]` startup banner
    Startup {
        /// Version token from the banner, e.g. `1.1h`.
        version: String,
    },
    /// `$<n>=<value>` settings line
    Setting {
        /// Setting number.
        number: u16,
        /// Raw value text.
        value: String,
    },
    /// Other `[...]` feedback line, e.g. `[MSG:...]`
    Feedback(String),
    /// Anything else, preserved verbatim
    Unrecognized(String),
}

/// Parsed fields of one status report.
///
/// Every group is optional because Grbl only includes a group when it
/// changed or was requested; absent groups leave the previous snapshot
/// value in place on merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusReport {
    /// Run state from the first field
    pub run_state: RunState,
    /// Numeric substate for Hold/Door
    pub substate: Option<u8>,
    /// `MPos:` machine position
    pub mpos: Option<Vec<f64>>,
    /// `WPos:` work position
    pub wpos: Option<Vec<f64>>,
    /// `WCO:` work coordinate offset
    pub wco: Option<Vec<f64>>,
    /// `Bf:` free planner blocks and rx bytes
    pub buffer: Option<BufferFill>,
    /// `Ln:` executing line number
    pub line_number: Option<u32>,
    /// `F:` or first half of `FS:`
    pub feed_rate: Option<f64>,
    /// `S:` or second half of `FS:`
    pub spindle_speed: Option<f64>,
    /// `Pn:` triggered input pins
    pub pins: Option<String>,
    /// `Ov:` override percentages
    pub overrides: Option<Overrides>,
    /// `A:` accessory states
    pub accessories: Option<Accessories>,
}

impl StatusReport {
    /// Merge this report into the previous snapshot, producing the next.
    ///
    /// Never mutates in place. When only one of MPos/WPos was reported,
    /// the other is derived through the work coordinate offset
    /// (`WPos = MPos - WCO`). Pin states clear when `Pn:` is absent; all
    /// other groups are sticky.
    pub fn apply(&self, prev: &MachineState) -> MachineState {
        let mut next = prev.clone();

        next.run_state = self.run_state;
        next.substate = self.substate;

        if let Some(wco) = &self.wco {
            next.work_offset = Position::new(wco.clone());
        }
        if let Some(mpos) = &self.mpos {
            next.machine_position = Position::new(mpos.clone());
        }
        if let Some(wpos) = &self.wpos {
            next.work_position = Position::new(wpos.clone());
        }
        if self.mpos.is_some() && self.wpos.is_none() {
            next.work_position = next.machine_position.minus(&next.work_offset);
        } else if self.wpos.is_some() && self.mpos.is_none() {
            next.machine_position = next.work_position.plus(&next.work_offset);
        }

        if let Some(feed) = self.feed_rate {
            next.feed_rate = feed;
        }
        if let Some(speed) = self.spindle_speed {
            next.spindle_speed = speed;
        }
        if let Some(overrides) = self.overrides {
            next.overrides = overrides;
        }
        if let Some(buffer) = self.buffer {
            next.buffer = Some(buffer);
        }
        if let Some(line) = self.line_number {
            next.line_number = Some(line);
        }
        if let Some(accessories) = self.accessories {
            next.accessories = accessories;
        }

        // Grbl omits Pn: entirely when no pin is triggered.
        next.pins = self.pins.clone().unwrap_or_default();

        next
    }
}

/// Stateless line classifier, configured with the expected axis count
#[derive(Debug, Clone)]
pub struct GrblDecoder {
    axis_count: u8,
}

impl GrblDecoder {
    /// Create a decoder expecting `axis_count` axes (3 to 6)
    pub fn new(axis_count: u8) -> Self {
        Self {
            axis_count: axis_count.clamp(3, 6),
        }
    }

    /// Classify one line
    pub fn decode(&self, line: &str) -> GrblResponse {
        let line = line.trim();

        if line == "ok" {
            return GrblResponse::Ok;
        }

        if let Some(rest) = line.strip_prefix("error:") {
            if let Ok(code) = rest.trim().parse::<u8>() {
                return GrblResponse::Error(code);
            }
            return GrblResponse::Unrecognized(line.to_string());
        }

        if let Some(rest) = line.strip_prefix("ALARM:") {
            if let Ok(code) = rest.trim().parse::<u8>() {
                return GrblResponse::Alarm(code);
            }
            return GrblResponse::Unrecognized(line.to_string());
        }

        if line.starts_with('<') && line.ends_with('>') {
            return match self.parse_status(&line[1..line.len() - 1]) {
                Some(report) => GrblResponse::Status(report),
                None => GrblResponse::Unrecognized(line.to_string()),
            };
        }

        if let Some(body) = line
            .strip_prefix("[GC:")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return GrblResponse::ParserState(modal::parse_parser_state(body));
        }

        if let Some(rest) = line.strip_prefix("Grbl ") {
            let version = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            return GrblResponse::Startup { version };
        }

        if line.starts_with('$') && line.contains('=') {
            if let Some(response) = parse_setting(line) {
                return response;
            }
        }

        if let Some(body) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            return GrblResponse::Feedback(body.to_string());
        }

        GrblResponse::Unrecognized(line.to_string())
    }

    /// Parse the body of a `<...>` status line. `None` when even the state
    /// word is unusable, in which case the whole line is surfaced verbatim.
    fn parse_status(&self, body: &str) -> Option<StatusReport> {
        let mut fields = body.split('|');

        let (run_state, substate) = RunState::parse(fields.next()?.trim())?;
        let mut report = StatusReport {
            run_state,
            substate,
            ..Default::default()
        };

        for field in fields {
            let field = field.trim();
            if let Some(value) = field.strip_prefix("MPos:") {
                report.mpos = self.parse_axes(value);
            } else if let Some(value) = field.strip_prefix("WPos:") {
                report.wpos = self.parse_axes(value);
            } else if let Some(value) = field.strip_prefix("WCO:") {
                report.wco = self.parse_axes(value);
            } else if let Some(value) = field.strip_prefix("Bf:") {
                report.buffer = parse_buffer(value);
            } else if let Some(value) = field.strip_prefix("Ln:") {
                report.line_number = value.trim().parse::<u32>().ok();
            } else if let Some(value) = field.strip_prefix("FS:") {
                let mut parts = value.split(',');
                report.feed_rate = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
                report.spindle_speed = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
            } else if let Some(value) = field.strip_prefix("F:") {
                report.feed_rate = value.trim().parse::<f64>().ok();
            } else if let Some(value) = field.strip_prefix("Pn:") {
                report.pins = Some(value.trim().to_string());
            } else if let Some(value) = field.strip_prefix("Ov:") {
                report.overrides = parse_overrides(value);
            } else if let Some(value) = field.strip_prefix("A:") {
                report.accessories = Some(parse_accessories(value));
            } else {
                tracing::debug!("ignoring unknown status field '{}'", field);
            }
        }

        Some(report)
    }

    /// Parse a comma-separated coordinate group. All-or-nothing: one bad
    /// value discards the group so a stale-but-consistent position is kept
    /// over a corrupted one.
    fn parse_axes(&self, value: &str) -> Option<Vec<f64>> {
        let coords: Option<Vec<f64>> = value
            .split(',')
            .map(|v| v.trim().parse::<f64>().ok())
            .collect();

        let coords = match coords {
            Some(coords) if (3..=6).contains(&coords.len()) => coords,
            _ => {
                tracing::warn!("unparseable coordinate group '{}'", value);
                return None;
            }
        };

        if coords.len() != self.axis_count as usize {
            tracing::warn!(
                "report carries {} axes, {} configured",
                coords.len(),
                self.axis_count
            );
        }

        Some(coords)
    }
}

fn parse_buffer(value: &str) -> Option<BufferFill> {
    let mut parts = value.split(',');
    let planner_blocks = parts.next()?.trim().parse::<u16>().ok()?;
    let rx_bytes = parts.next()?.trim().parse::<u16>().ok()?;
    Some(BufferFill {
        planner_blocks,
        rx_bytes,
    })
}

fn parse_overrides(value: &str) -> Option<Overrides> {
    let mut parts = value.split(',');
    let feed = parts.next()?.trim().parse::<u16>().ok()?;
    let rapid = parts.next()?.trim().parse::<u16>().ok()?;
    let spindle = parts.next()?.trim().parse::<u16>().ok()?;
    Some(Overrides {
        feed,
        rapid,
        spindle,
    })
}

fn parse_accessories(value: &str) -> Accessories {
    Accessories {
        spindle_cw: value.contains('S'),
        spindle_ccw: value.contains('C'),
        flood: value.contains('F'),
        mist: value.contains('M'),
    }
}

fn parse_setting(line: &str) -> Option<GrblResponse> {
    let (number, value) = line[1..].split_once('=')?;
    let number = number.trim().parse::<u16>().ok()?;
    Some(GrblResponse::Setting {
        number,
        value: value.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> GrblDecoder {
        GrblDecoder::new(3)
    }

    #[test]
    fn acknowledgement_and_codes_classify() {
        assert_eq!(decoder().decode("ok"), GrblResponse::Ok);
        assert_eq!(decoder().decode("error:9"), GrblResponse::Error(9));
        assert_eq!(decoder().decode("ALARM:2"), GrblResponse::Alarm(2));
        assert_eq!(
            decoder().decode("error:banana"),
            GrblResponse::Unrecognized("error:banana".to_string())
        );
    }

    #[test]
    fn startup_banner_yields_version() {
        assert_eq!(
            decoder().decode("Grbl 1.1h ['$' for help]"),
            GrblResponse::Startup {
                version: "1.1h".to_string()
            }
        );
    }

    #[test]
    fn setting_and_feedback_lines_classify() {
        assert_eq!(
            decoder().decode("$110=8000.000"),
            GrblResponse::Setting {
                number: 110,
                value: "8000.000".to_string()
            }
        );
        assert_eq!(
            decoder().decode("[MSG:Caution: Unlocked]"),
            GrblResponse::Feedback("MSG:Caution: Unlocked".to_string())
        );
    }

    #[test]
    fn status_line_parses_state_and_positions() {
        let response = decoder().decode("<Idle|MPos:0.000,0.000,0.000|FS:0,0>");
        let report = match response {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        assert_eq!(report.run_state, RunState::Idle);
        assert_eq!(report.mpos, Some(vec![0.0, 0.0, 0.0]));
        assert_eq!(report.feed_rate, Some(0.0));
        assert_eq!(report.spindle_speed, Some(0.0));
    }

    #[test]
    fn status_with_substate_and_extras() {
        let response = decoder()
            .decode("<Hold:1|MPos:1.000,2.000,3.000|Bf:15,128|Ln:42|Pn:XYZ|Ov:90,100,110>");
        let report = match response {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        assert_eq!(report.run_state, RunState::Hold);
        assert_eq!(report.substate, Some(1));
        assert_eq!(
            report.buffer,
            Some(BufferFill {
                planner_blocks: 15,
                rx_bytes: 128
            })
        );
        assert_eq!(report.line_number, Some(42));
        assert_eq!(report.pins.as_deref(), Some("XYZ"));
        assert_eq!(
            report.overrides,
            Some(Overrides {
                feed: 90,
                rapid: 100,
                spindle: 110
            })
        );
    }

    #[test]
    fn corrupt_coordinate_group_is_skipped_not_fatal() {
        let response = decoder().decode("<Idle|MPos:0.000,oops,0.000|FS:0,0>");
        let report = match response {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        assert_eq!(report.mpos, None);
        assert_eq!(report.feed_rate, Some(0.0));
    }

    #[test]
    fn six_axis_positions_parse() {
        let decoder = GrblDecoder::new(6);
        let response = decoder.decode("<Idle|MPos:1.0,2.0,3.0,4.0,5.0,6.0>");
        let report = match response {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        assert_eq!(report.mpos, Some(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    }

    #[test]
    fn unknown_run_state_surfaces_whole_line() {
        assert_eq!(
            decoder().decode("<Warble|MPos:0,0,0>"),
            GrblResponse::Unrecognized("<Warble|MPos:0,0,0>".to_string())
        );
    }

    #[test]
    fn merge_is_sticky_for_absent_groups() {
        let decoder = decoder();
        let first = match decoder.decode("<Idle|MPos:1.000,2.000,3.000|FS:100,500>") {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let state1 = first.apply(&MachineState::default());
        assert_eq!(state1.machine_position.axes, vec![1.0, 2.0, 3.0]);
        assert_eq!(state1.feed_rate, 100.0);

        // Next report omits position and feed; both stick.
        let second = match decoder.decode("<Run>") {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let state2 = second.apply(&state1);
        assert_eq!(state2.run_state, RunState::Run);
        assert_eq!(state2.machine_position.axes, vec![1.0, 2.0, 3.0]);
        assert_eq!(state2.feed_rate, 100.0);
    }

    #[test]
    fn merge_is_idempotent() {
        let decoder = decoder();
        let report = match decoder.decode("<Run|MPos:5.000,0.000,-1.000|WCO:1.000,0.000,0.000>") {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let once = report.apply(&MachineState::default());
        let twice = report.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn work_position_derives_from_mpos_and_wco() {
        let decoder = decoder();
        let report = match decoder.decode("<Idle|MPos:10.000,20.000,5.000|WCO:10.000,10.000,0.000>")
        {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let state = report.apply(&MachineState::default());
        assert_eq!(state.work_position.axes, vec![0.0, 10.0, 5.0]);

        // And the other way around, with the sticky offset.
        let report = match decoder.decode("<Idle|WPos:0.000,0.000,0.000>") {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let state = report.apply(&state);
        assert_eq!(state.machine_position.axes, vec![10.0, 10.0, 0.0]);
    }

    #[test]
    fn pins_clear_when_absent() {
        let decoder = decoder();
        let triggered = match decoder.decode("<Hold:0|Pn:X>") {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let state = triggered.apply(&MachineState::default());
        assert_eq!(state.pins, "X");

        let released = match decoder.decode("<Idle>") {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let state = released.apply(&state);
        assert_eq!(state.pins, "");
    }

    #[test]
    fn accessories_decode_from_flags() {
        let decoder = decoder();
        let report = match decoder.decode("<Run|A:SF>") {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {:?}", other),
        };
        let accessories = report.accessories.expect("accessories");
        assert!(accessories.spindle_cw);
        assert!(accessories.flood);
        assert!(!accessories.mist);
    }

    #[test]
    fn anything_else_is_preserved_verbatim() {
        assert_eq!(
            decoder().decode("  mystery text  "),
            GrblResponse::Unrecognized("mystery text".to_string())
        );
    }
}
