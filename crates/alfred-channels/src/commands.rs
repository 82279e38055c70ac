//! Bot command interception.
//!
//! Runs before mention-gating and handler dispatch on every channel: when
//! the message is a known command the channel answers it itself and the
//! pipeline never sees it.

use alfred_core::config::TextsConfig;

/// Which canned text a command resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    Help,
    Privacy,
}

/// Check whether `content` is a bot command.
///
/// `/help` and `/start` answer with the help text, `/privacy` with the
/// privacy text. IRC additionally accepts `!help` and `!privacy`. A
/// trailing `@botname` suffix (Telegram group syntax) is ignored.
pub fn intercept(content: &str, irc_aliases: bool) -> Option<CommandReply> {
    let first = content.split_whitespace().next()?;
    let command = first.split('@').next().unwrap_or(first);

    match command {
        "/help" | "/start" => Some(CommandReply::Help),
        "/privacy" => Some(CommandReply::Privacy),
        "!help" if irc_aliases => Some(CommandReply::Help),
        "!privacy" if irc_aliases => Some(CommandReply::Privacy),
        _ => None,
    }
}

/// Resolve a command to its reply text for the given channel.
///
/// Help text is looked up per channel (with the configured fallback);
/// privacy text is shared.
pub fn reply_text(reply: CommandReply, channel: &str, texts: &TextsConfig) -> String {
    match reply {
        CommandReply::Help => texts.help_for(channel).to_string(),
        CommandReply::Privacy => texts.privacy.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_and_start_resolve_to_help() {
        assert_eq!(intercept("/help", false), Some(CommandReply::Help));
        assert_eq!(intercept("/start", false), Some(CommandReply::Help));
        assert_eq!(intercept("/privacy please", false), Some(CommandReply::Privacy));
    }

    #[test]
    fn telegram_group_suffix_is_stripped() {
        assert_eq!(intercept("/help@alfred_bot", false), Some(CommandReply::Help));
    }

    #[test]
    fn irc_aliases_only_when_enabled() {
        assert_eq!(intercept("!help", true), Some(CommandReply::Help));
        assert_eq!(intercept("!privacy", true), Some(CommandReply::Privacy));
        assert_eq!(intercept("!help", false), None);
    }

    #[test]
    fn ordinary_text_passes_through() {
        assert_eq!(intercept("hello /help", false), None);
        assert_eq!(intercept("/reset", false), None);
        assert_eq!(intercept("", false), None);
    }

    #[test]
    fn help_reply_honours_channel_override() {
        let mut texts = TextsConfig::default();
        texts.help.insert("irc".into(), "irc help".into());

        assert_eq!(reply_text(CommandReply::Help, "irc", &texts), "irc help");
        assert_eq!(
            reply_text(CommandReply::Help, "slack", &texts),
            texts.help_default
        );
        // Privacy is the same on every channel.
        assert_eq!(
            reply_text(CommandReply::Privacy, "irc", &texts),
            texts.privacy
        );
    }
}
