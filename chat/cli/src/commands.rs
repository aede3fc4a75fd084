//! Slash commands typed at the prompt

/// A parsed input line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    /// Plain text to send to the model
    Send(String),
    /// `/models`
    Models,
    /// `/model <name>`
    Model(String),
    /// `/refresh`
    Refresh,
    /// `/regen`
    Regenerate,
    /// `/clear`
    Clear,
    /// `/status`
    Status,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// A slash command that needs an argument it did not get
    MissingArgument(&'static str),
    /// Any other slash command
    Unknown(String),
}

impl Command {
    /// Parse one line of user input
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        match name {
            "models" => Self::Models,
            "model" if arg.is_empty() => Self::MissingArgument("model"),
            "model" => Self::Model(arg.to_string()),
            "refresh" => Self::Refresh,
            "regen" | "regenerate" => Self::Regenerate,
            "clear" => Self::Clear,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Help text for the prompt
pub const HELP: &str = "\
Commands:
  /models          List available models
  /model <name>    Switch to another model
  /refresh         Re-query the server for models
  /regen           Regenerate the last answer
  /clear           Start a new conversation
  /status          Show connection and model status
  /help            Show this help
  /quit            Exit

Anything else is sent to the model. Press Ctrl-C while an answer is
streaming to stop it.";

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_text_is_sent_trimmed() {
        assert_eq!(
            Command::parse("  why is the sky blue?  \n"),
            Command::Send("why is the sky blue?".to_string())
        );
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn test_commands() {
        assert_eq!(Command::parse("/models"), Command::Models);
        assert_eq!(Command::parse("/refresh"), Command::Refresh);
        assert_eq!(Command::parse("/regen"), Command::Regenerate);
        assert_eq!(Command::parse("/clear"), Command::Clear);
        assert_eq!(Command::parse("/status"), Command::Status);
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("/exit"), Command::Quit);
    }

    #[test]
    fn test_model_argument() {
        assert_eq!(
            Command::parse("/model   qwen2.5:7b "),
            Command::Model("qwen2.5:7b".to_string())
        );
        assert_eq!(Command::parse("/model"), Command::MissingArgument("model"));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            Command::parse("/frobnicate now"),
            Command::Unknown("frobnicate".to_string())
        );
    }
}
