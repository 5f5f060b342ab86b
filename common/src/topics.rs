pub const TOPIC_COMMANDS: &str = "cmds/koven";
pub const TOPIC_EVENTS: &str = "events/koven";
