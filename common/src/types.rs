use serde::Serialize;

/// Wire value marking a numeric field as not applicable to the current state.
pub const NOT_APPLICABLE: i16 = -1;

/// Converts an optional field to its wire form, `None` becoming [`NOT_APPLICABLE`].
pub fn to_wire(value: Option<i16>) -> i16 {
    value.unwrap_or(NOT_APPLICABLE)
}

/// Inverse of [`to_wire`]: the sentinel becomes `None`, everything else is kept.
pub fn from_wire(value: i16) -> Option<i16> {
    (value != NOT_APPLICABLE).then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OvenState {
    Idle,
    Preheating,
    Baking,
    CoolingDown,
}

impl OvenState {
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Preheating => 1,
            Self::Baking => 2,
            Self::CoolingDown => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Preheating),
            2 => Some(Self::Baking),
            3 => Some(Self::CoolingDown),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preheating => "preheating",
            Self::Baking => "baking",
            Self::CoolingDown => "cooling down",
        }
    }

    /// Upper-case label used by the platform's JSON views.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Preheating => "PREHEATING",
            Self::Baking => "BAKING",
            Self::CoolingDown => "COOLING_DOWN",
        }
    }
}

/// Requested action carried by a command frame.
///
/// Unknown action bytes survive decoding as [`Action::Unrecognized`] so the
/// command can still be logged; the oven ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Unrecognized(u8),
}

impl Action {
    pub fn code(self) -> u8 {
        match self {
            Self::Start => 1,
            Self::Stop => 2,
            Self::Unrecognized(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Start,
            2 => Self::Stop,
            other => Self::Unrecognized(other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Unrecognized(_) => "unknown",
        }
    }
}

/// A remote request. Temperature (degrees) and duration (seconds) only
/// matter for [`Action::Start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub action: Action,
    pub temperature: i16,
    pub duration: i16,
}

impl Command {
    pub fn start(temperature: i16, duration: i16) -> Self {
        Self {
            action: Action::Start,
            temperature,
            duration,
        }
    }

    pub fn stop() -> Self {
        Self {
            action: Action::Stop,
            temperature: 0,
            duration: 0,
        }
    }
}

/// Snapshot of the oven taken after a tick or command.
///
/// Field order matches the event payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub state: OvenState,
    pub current_temperature: i16,
    pub remaining_time: Option<i16>,
    pub programmed_duration: Option<i16>,
    pub programmed_temperature: Option<i16>,
}

impl Event {
    pub fn message(&self) -> EventMessage {
        EventMessage {
            kind: "event",
            state: self.state.label(),
            current_temperature: format_reading(self.current_temperature, "°C", "--"),
            remaining_time: format_reading(to_wire(self.remaining_time), "s", "--"),
            programmed_duration: format_reading(to_wire(self.programmed_duration), "s", "Not set"),
            programmed_temperature: format_reading(
                to_wire(self.programmed_temperature),
                "°C",
                "Not set",
            ),
        }
    }
}

/// Display form of an [`Event`] pushed to dashboard clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub state: &'static str,
    pub current_temperature: String,
    pub remaining_time: String,
    pub programmed_duration: String,
    pub programmed_temperature: String,
}

fn format_reading(value: i16, unit: &str, placeholder: &str) -> String {
    if value < 0 {
        placeholder.to_string()
    } else {
        format!("{value}{unit}")
    }
}
