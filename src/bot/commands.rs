//! Bot commands

use teloxide::utils::command::BotCommands;

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Greet the user
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage
    #[command(description = "Show help.")]
    Help,
    /// Abort the current flow and any in-flight request
    #[command(description = "Cancel the current action.")]
    Cancel,
    /// Start a checkout
    #[command(description = "Place an order.")]
    Checkout,
    /// Open the language wizard
    #[command(description = "Change language.")]
    Settings,
    /// Start admin login
    #[command(description = "Admin login.")]
    Admin,
    /// Leave admin mode
    #[command(description = "Leave admin mode.")]
    Logout,
    /// Adjust stock (admin)
    #[command(description = "Adjust stock (admin).")]
    Stock,
    /// Set up a reminder
    #[command(description = "Set a reminder.")]
    Remind,
    /// Approve a pending order (admin)
    #[command(description = "Approve an order (admin).")]
    Approve(String),
    /// Show engine statistics (admin)
    #[command(description = "Show statistics (admin).")]
    Stats,
}

impl Command {
    /// Parse a message text; `None` if it is not a known command
    #[must_use]
    pub fn from_text(text: &str, bot_name: &str) -> Option<Self> {
        Self::parse(text, bot_name).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(Command::from_text("/start", ""), Some(Command::Start));
        assert_eq!(
            Command::from_text("/approve ab12cd34", ""),
            Some(Command::Approve("ab12cd34".to_string()))
        );
        assert_eq!(Command::from_text("/logout", ""), Some(Command::Logout));
        assert_eq!(Command::from_text("hello", ""), None);
        assert_eq!(Command::from_text("/unknown", ""), None);
    }
}
