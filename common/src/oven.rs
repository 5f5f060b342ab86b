use crate::types::{from_wire, Action, Command, Event, OvenState};

/// Ambient temperature the oven starts at and cools back down to.
pub const ROOM_TEMPERATURE: i16 = 25;

/// Target values set by a start command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Program {
    pub temperature: Option<i16>,
    pub duration: Option<i16>,
}

/// Where the oven is in its bake cycle, with the data only that phase carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preheating { program: Program },
    Baking { program: Program, remaining: Option<i16> },
    CoolingDown { remaining: Option<i16> },
}

impl Phase {
    pub fn state(&self) -> OvenState {
        match self {
            Self::Idle => OvenState::Idle,
            Self::Preheating { .. } => OvenState::Preheating,
            Self::Baking { .. } => OvenState::Baking,
            Self::CoolingDown { .. } => OvenState::CoolingDown,
        }
    }

    fn program(&self) -> Option<Program> {
        match *self {
            Self::Preheating { program } | Self::Baking { program, .. } => Some(program),
            Self::Idle | Self::CoolingDown { .. } => None,
        }
    }

    fn remaining(&self) -> Option<i16> {
        match *self {
            Self::Baking { remaining, .. } | Self::CoolingDown { remaining } => remaining,
            Self::Idle | Self::Preheating { .. } => None,
        }
    }
}

/// Advances one time unit. Rules are evaluated against the phase before the tick.
pub fn advance(phase: Phase, current_temperature: i16) -> (Phase, i16) {
    match phase {
        Phase::Idle => (Phase::Idle, current_temperature),
        Phase::Preheating { program } => match program.temperature {
            Some(target) if current_temperature < target => (phase, current_temperature + 1),
            // Reaching the target costs one tick with no temperature change.
            _ => (
                Phase::Baking {
                    program,
                    remaining: program.duration,
                },
                current_temperature,
            ),
        },
        Phase::Baking { program, remaining } => match remaining {
            Some(left) if left > 0 => (
                Phase::Baking {
                    program,
                    remaining: Some(left - 1),
                },
                current_temperature,
            ),
            // remaining_time is carried into cooling down as-is, not cleared.
            _ if current_temperature > ROOM_TEMPERATURE => {
                (Phase::CoolingDown { remaining }, current_temperature)
            }
            _ => (Phase::Idle, ROOM_TEMPERATURE),
        },
        Phase::CoolingDown { .. } if current_temperature > ROOM_TEMPERATURE => {
            (phase, current_temperature - 1)
        }
        Phase::CoolingDown { .. } => (Phase::Idle, ROOM_TEMPERATURE),
    }
}

/// The simulated appliance. Created once and owned by the driving loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oven {
    phase: Phase,
    current_temperature: i16,
}

impl Default for Oven {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            current_temperature: ROOM_TEMPERATURE,
        }
    }
}

impl Oven {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts the oven back to idle at room temperature, whatever it was doing.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> OvenState {
        self.phase.state()
    }

    pub fn current_temperature(&self) -> i16 {
        self.current_temperature
    }

    /// Applies a command. Requests that make no sense in the current state
    /// are absorbed without error.
    pub fn execute(&mut self, command: &Command) {
        match command.action {
            Action::Start => {
                if self.phase == Phase::Idle {
                    self.phase = Phase::Preheating {
                        program: Program {
                            temperature: from_wire(command.temperature),
                            duration: from_wire(command.duration),
                        },
                    };
                }
            }
            // Temperature is left where it is and idle never cools it down.
            Action::Stop => self.phase = Phase::Idle,
            Action::Unrecognized(_) => {}
        }
    }

    pub fn tick(&mut self) -> Event {
        let (phase, current_temperature) = advance(self.phase, self.current_temperature);
        self.phase = phase;
        self.current_temperature = current_temperature;
        self.snapshot()
    }

    pub fn snapshot(&self) -> Event {
        let program = self.phase.program();
        Event {
            state: self.phase.state(),
            current_temperature: self.current_temperature,
            remaining_time: self.phase.remaining(),
            programmed_duration: program.and_then(|p| p.duration),
            programmed_temperature: program.and_then(|p| p.temperature),
        }
    }
}
