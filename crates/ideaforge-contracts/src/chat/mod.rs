mod command_registry;
mod intent_parser;

pub use command_registry::chat_help_lines;
pub use intent_parser::{parse_command, ChatCommand};
