pub mod config;
pub mod crc;
pub mod oven;
pub mod protocol;
pub mod topics;
pub mod types;

pub use config::{ConfigError, EmulatorConfig, MqttConfig, PlatformConfig};
pub use crc::crc16_usb;
pub use oven::{Oven, Phase, Program, ROOM_TEMPERATURE};
pub use protocol::{
    decode_command, decode_event, encode_command, encode_command_frame, encode_event,
    encode_event_frame, frame_hex, FrameError, COMMAND_FRAME_LEN, EVENT_FRAME_LEN,
    MSG_TYPE_COMMAND, MSG_TYPE_EVENT,
};
pub use topics::*;
pub use types::{Action, Command, Event, EventMessage, OvenState, NOT_APPLICABLE};
