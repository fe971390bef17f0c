//! G-code parser-state decoding
//!
//! Grbl answers `$G` with a `[GC:...]` line listing its active modal groups,
//! e.g. `[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]`. Each modal word maps
//! through a fixed table to a human-readable description; value words
//! (T/F/S) are parsed out separately.

use grblink_core::machine::{GcodeModal, GcodeParserState};

/// Description for a modal word, `None` for words outside the fixed table
pub fn modal_description(word: &str) -> Option<&'static str> {
    let text = match word {
        // Motion mode
        "G0" | "G00" => "rapid positioning",
        "G1" | "G01" => "linear interpolation",
        "G2" | "G02" => "clockwise circular interpolation",
        "G3" | "G03" => "counter-clockwise circular interpolation",
        "G38.2" => "probe toward workpiece, signal error on failure",
        "G38.3" => "probe toward workpiece",
        "G38.4" => "probe away from workpiece, signal error on failure",
        "G38.5" => "probe away from workpiece",
        "G80" => "motion mode cancelled",
        // Plane selection
        "G17" => "working plane XY",
        "G18" => "working plane ZX",
        "G19" => "working plane YZ",
        // Units
        "G20" => "units in inches",
        "G21" => "units in millimeters",
        // Distance mode
        "G90" => "absolute coordinates",
        "G91" => "relative coordinates",
        // Feed rate mode
        "G93" => "inverse time feed rate",
        "G94" => "units per minute feed rate",
        // Work coordinate systems
        "G54" => "work coordinate system 1",
        "G55" => "work coordinate system 2",
        "G56" => "work coordinate system 3",
        "G57" => "work coordinate system 4",
        "G58" => "work coordinate system 5",
        "G59" => "work coordinate system 6",
        // Program flow
        "M0" => "program pause",
        "M1" => "optional program pause",
        "M2" => "program end",
        "M30" => "program end and rewind",
        // Spindle
        "M3" => "spindle on, clockwise",
        "M4" => "spindle on, counter-clockwise",
        "M5" => "spindle stopped",
        // Coolant
        "M7" => "mist coolant on",
        "M8" => "flood coolant on",
        "M9" => "coolant off",
        _ => return None,
    };
    Some(text)
}

/// Decode the body of a `[GC:...]` line (the part between `GC:` and `]`).
///
/// Unknown modal words are kept with a generic description; value words
/// that fail to parse are kept as modals too. Liberal by design: parser
/// state layouts drift slightly across firmware versions.
pub fn parse_parser_state(body: &str) -> GcodeParserState {
    let mut state = GcodeParserState::default();

    for word in body.split_whitespace() {
        if let Some(value) = word.strip_prefix('T') {
            if let Ok(tool) = value.parse::<u32>() {
                state.tool = Some(tool);
                continue;
            }
        }
        if let Some(value) = word.strip_prefix('F') {
            if let Ok(feed) = value.parse::<f64>() {
                state.feed_rate = Some(feed);
                continue;
            }
        }
        if let Some(value) = word.strip_prefix('S') {
            if let Ok(speed) = value.parse::<f64>() {
                state.spindle_speed = Some(speed);
                continue;
            }
        }

        if matches!(word, "G54" | "G55" | "G56" | "G57" | "G58" | "G59") {
            state.active_wcs = Some(word.to_string());
        }

        let description = match modal_description(word) {
            Some(text) => text.to_string(),
            None => {
                tracing::debug!("unknown modal word '{}'", word);
                "unrecognized modal word".to_string()
            }
        };
        state.modals.push(GcodeModal {
            word: word.to_string(),
            description,
        });
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_covers_common_modal_words() {
        assert_eq!(modal_description("G17"), Some("working plane XY"));
        assert_eq!(modal_description("G91"), Some("relative coordinates"));
        assert_eq!(modal_description("G7"), None);
    }

    #[test]
    fn full_parser_state_line_decodes() {
        let state = parse_parser_state("G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0");
        assert_eq!(state.tool, Some(0));
        assert_eq!(state.feed_rate, Some(0.0));
        assert_eq!(state.spindle_speed, Some(0.0));
        assert_eq!(state.active_wcs.as_deref(), Some("G54"));
        assert_eq!(state.modals.len(), 8);
        assert_eq!(state.modals[0].word, "G0");
        assert_eq!(state.modals[0].description, "rapid positioning");
    }

    #[test]
    fn unknown_words_are_kept_not_dropped() {
        let state = parse_parser_state("G0 G99");
        assert_eq!(state.modals.len(), 2);
        assert_eq!(state.modals[1].description, "unrecognized modal word");
    }

    #[test]
    fn value_words_parse_decimals() {
        let state = parse_parser_state("G1 F500.0 S12000.5");
        assert_eq!(state.feed_rate, Some(500.0));
        assert_eq!(state.spindle_speed, Some(12000.5));
    }
}
