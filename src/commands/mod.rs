mod config_cmd;
mod interaction;
mod respondent;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use interaction::{InteractionCommand, InteractionSubcommand};
pub use respondent::{RespondentCommand, RespondentSubcommand};
pub use sync_cmd::SyncCommand;
