//! Machine-state data model
//!
//! [`MachineState`] is the immutable snapshot the engine republishes on every
//! decoded status report. Grbl reports are partial: most field groups appear
//! only when changed or requested, so a snapshot is always produced by
//! merging a parsed report into the previous snapshot, never by replacing it
//! wholesale. The merge itself lives with the decoder in
//! `grblink-communication`; this module only defines the value types.

use serde::{Deserialize, Serialize};

/// Grbl run state, the first field of every status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RunState {
    /// No status report received yet
    #[default]
    Unknown,
    /// Idle, ready for commands
    Idle,
    /// Executing a motion or spindle command
    Run,
    /// Feed hold in progress or complete
    Hold,
    /// Executing a jog motion
    Jog,
    /// Alarm latched; motion commands are locked out until `$X`
    Alarm,
    /// Safety door state
    Door,
    /// G-code check mode (parse without motion)
    Check,
    /// Homing cycle in progress
    Home,
    /// Sleep mode
    Sleep,
}

impl RunState {
    /// Parse a status-report state word such as `Idle`, `Hold:1` or `Door:2`.
    ///
    /// Returns the base state and the optional numeric substate. `None` for
    /// state words outside the fixed Grbl set.
    pub fn parse(word: &str) -> Option<(Self, Option<u8>)> {
        let (base, substate) = match word.split_once(':') {
            Some((base, sub)) => (base, sub.trim().parse::<u8>().ok()),
            None => (word, None),
        };

        let state = match base.trim() {
            "Idle" => Self::Idle,
            "Run" => Self::Run,
            "Hold" => Self::Hold,
            "Jog" => Self::Jog,
            "Alarm" => Self::Alarm,
            "Door" => Self::Door,
            "Check" => Self::Check,
            "Home" => Self::Home,
            "Sleep" => Self::Sleep,
            _ => return None,
        };

        Some((state, substate))
    }

    /// True while the firmware is executing motion
    pub fn is_moving(self) -> bool {
        matches!(self, Self::Run | Self::Jog | Self::Home)
    }

    /// True when the firmware refuses motion commands until unlocked
    pub fn is_locked_out(self) -> bool {
        matches!(self, Self::Alarm | Self::Door)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Home => "Home",
            Self::Sleep => "Sleep",
        };
        write!(f, "{}", name)
    }
}

/// A machine or work coordinate tuple
///
/// Grbl builds report 3 to 6 axes depending on firmware configuration, so
/// positions are variable-length rather than a fixed XYZ triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    /// Axis values in report order (X, Y, Z, then A/B/C when present)
    pub axes: Vec<f64>,
}

impl Position {
    /// Create a position from raw axis values
    pub fn new(axes: Vec<f64>) -> Self {
        Self { axes }
    }

    /// Number of axes carried by this position
    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    /// X axis value, 0.0 when absent
    pub fn x(&self) -> f64 {
        self.axes.first().copied().unwrap_or(0.0)
    }

    /// Y axis value, 0.0 when absent
    pub fn y(&self) -> f64 {
        self.axes.get(1).copied().unwrap_or(0.0)
    }

    /// Z axis value, 0.0 when absent
    pub fn z(&self) -> f64 {
        self.axes.get(2).copied().unwrap_or(0.0)
    }

    /// Pairwise difference, used to derive WPos = MPos - WCO.
    /// Missing axes on either side are treated as zero.
    pub fn minus(&self, other: &Position) -> Position {
        let len = self.axes.len().max(other.axes.len());
        let axes = (0..len)
            .map(|i| {
                self.axes.get(i).copied().unwrap_or(0.0)
                    - other.axes.get(i).copied().unwrap_or(0.0)
            })
            .collect();
        Position { axes }
    }

    /// Pairwise sum, used to derive MPos = WPos + WCO
    pub fn plus(&self, other: &Position) -> Position {
        let len = self.axes.len().max(other.axes.len());
        let axes = (0..len)
            .map(|i| {
                self.axes.get(i).copied().unwrap_or(0.0)
                    + other.axes.get(i).copied().unwrap_or(0.0)
            })
            .collect();
        Position { axes }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.axes.iter().map(|v| format!("{:.3}", v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Override percentages from the `Ov:` status group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
        }
    }
}

/// Planner/serial buffer occupancy from the `Bf:` status group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferFill {
    /// Free planner blocks
    pub planner_blocks: u16,
    /// Free serial rx buffer bytes
    pub rx_bytes: u16,
}

/// Accessory states from the `A:` status group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Accessories {
    /// Spindle running clockwise (`S`)
    pub spindle_cw: bool,
    /// Spindle running counter-clockwise (`C`)
    pub spindle_ccw: bool,
    /// Flood coolant on (`F`)
    pub flood: bool,
    /// Mist coolant on (`M`)
    pub mist: bool,
}

/// Snapshot of everything the engine knows about the machine
///
/// Produced only by merging a decoded status or parser-state report into the
/// previous snapshot. Position, offset, feed/speed, override, buffer and
/// line-number fields are sticky: they keep their last value when a report
/// omits them. Pin states are the exception; Grbl omits `Pn:` entirely when
/// no input pin is triggered, so absence clears them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MachineState {
    /// Current run state
    pub run_state: RunState,
    /// Numeric substate for Hold/Door states
    pub substate: Option<u8>,
    /// Position in machine coordinates
    pub machine_position: Position,
    /// Position in work coordinates
    pub work_position: Position,
    /// Active work coordinate offset (WCO)
    pub work_offset: Position,
    /// Current feed rate, units/min
    pub feed_rate: f64,
    /// Current spindle speed, RPM
    pub spindle_speed: f64,
    /// Override percentages
    pub overrides: Overrides,
    /// Buffer occupancy, when the firmware reports it
    pub buffer: Option<BufferFill>,
    /// Line number of the block being executed
    pub line_number: Option<u32>,
    /// Triggered input pins, e.g. `XYZ` or `P`; empty when none
    pub pins: String,
    /// Accessory states
    pub accessories: Accessories,
    /// Active work coordinate system (G54..G59), from parser state
    pub active_wcs: Option<String>,
}

/// One modal word from a `[GC:...]` parser-state report, with its
/// human-readable description from the fixed lookup table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcodeModal {
    /// The modal word as reported, e.g. `G17` or `M5`
    pub word: String,
    /// Description, e.g. "working plane XY"
    pub description: String,
}

/// Decoded `[GC:...]` parser-state report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GcodeParserState {
    /// Modal words with descriptions, in report order
    pub modals: Vec<GcodeModal>,
    /// Active tool number (`T` word)
    pub tool: Option<u32>,
    /// Programmed feed rate (`F` word)
    pub feed_rate: Option<f64>,
    /// Programmed spindle speed (`S` word)
    pub spindle_speed: Option<f64>,
    /// Active work coordinate system (G54..G59)
    pub active_wcs: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_parses_plain_words() {
        assert_eq!(RunState::parse("Idle"), Some((RunState::Idle, None)));
        assert_eq!(RunState::parse("Run"), Some((RunState::Run, None)));
        assert_eq!(RunState::parse("Sleep"), Some((RunState::Sleep, None)));
        assert_eq!(RunState::parse("Bogus"), None);
    }

    #[test]
    fn run_state_parses_substates() {
        assert_eq!(RunState::parse("Hold:0"), Some((RunState::Hold, Some(0))));
        assert_eq!(RunState::parse("Door:3"), Some((RunState::Door, Some(3))));
    }

    #[test]
    fn position_difference_derives_work_coordinates() {
        let mpos = Position::new(vec![10.0, 20.0, -5.0]);
        let wco = Position::new(vec![10.0, 10.0, 0.0]);
        let wpos = mpos.minus(&wco);
        assert_eq!(wpos.axes, vec![0.0, 10.0, -5.0]);
        assert_eq!(wpos.plus(&wco), mpos);
    }

    #[test]
    fn position_difference_tolerates_axis_count_mismatch() {
        let mpos = Position::new(vec![1.0, 2.0, 3.0, 4.0]);
        let wco = Position::new(vec![1.0, 1.0, 1.0]);
        assert_eq!(mpos.minus(&wco).axes, vec![0.0, 1.0, 2.0, 4.0]);
    }

    #[test]
    fn default_overrides_are_all_100_percent() {
        let ov = Overrides::default();
        assert_eq!((ov.feed, ov.rapid, ov.spindle), (100, 100, 100));
    }
}
