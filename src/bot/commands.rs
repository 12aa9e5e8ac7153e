use thiserror::Error;

/// Comandos de texto del bot, ya separados de su prefijo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Play(String),
    Skip,
    Queue { page: usize },
    Pause,
    Resume,
    Stop,
    /// Posición desde 1, tal como la escribe el usuario
    Remove(usize),
    Clear,
    Shuffle,
    NowPlaying,
    Join,
    Leave,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("❌ Comando no reconocido: `{0}`. Usa `{1}help`")]
    Unknown(String, String),

    #[error("❌ Uso: `{0}`")]
    Usage(String),
}

/// Interpreta un mensaje. `None` si no va dirigido al bot.
pub fn parse(content: &str, prefix: &str) -> Option<Result<BotCommand, CommandError>> {
    let body = content.trim().strip_prefix(prefix)?;
    let body = body.trim_start();
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    if name.is_empty() {
        return None;
    }

    let usage = |text: &str| -> Result<BotCommand, CommandError> {
        Err(CommandError::Usage(format!("{}{}", prefix, text)))
    };

    let command = match name.to_lowercase().as_str() {
        "play" | "p" => {
            if rest.is_empty() {
                return Some(usage("play <búsqueda o enlace>"));
            }
            BotCommand::Play(rest.to_string())
        }
        "skip" | "s" => BotCommand::Skip,
        "queue" | "q" => {
            if rest.is_empty() {
                BotCommand::Queue { page: 1 }
            } else {
                match rest.parse::<usize>() {
                    Ok(page) if page >= 1 => BotCommand::Queue { page },
                    _ => return Some(usage("queue [página]")),
                }
            }
        }
        "pause" => BotCommand::Pause,
        "resume" => BotCommand::Resume,
        "stop" => BotCommand::Stop,
        "remove" => match rest.parse::<usize>() {
            Ok(position) => BotCommand::Remove(position),
            Err(_) => return Some(usage("remove <posición>")),
        },
        "clear" => BotCommand::Clear,
        "shuffle" => BotCommand::Shuffle,
        "nowplaying" | "np" => BotCommand::NowPlaying,
        "join" => BotCommand::Join,
        "leave" => BotCommand::Leave,
        "help" => BotCommand::Help,
        other => {
            return Some(Err(CommandError::Unknown(
                other.to_string(),
                prefix.to_string(),
            )))
        }
    };

    Some(Ok(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn aliases_map_to_same_command() {
        assert_eq!(parse("!s", "!"), Some(Ok(BotCommand::Skip)));
        assert_eq!(parse("!skip", "!"), Some(Ok(BotCommand::Skip)));
        assert_eq!(parse("!np", "!"), Some(Ok(BotCommand::NowPlaying)));
        assert_eq!(parse("!Q", "!"), Some(Ok(BotCommand::Queue { page: 1 })));
    }

    #[test]
    fn play_keeps_the_whole_query() {
        assert_eq!(
            parse("!p  never gonna give you up ", "!"),
            Some(Ok(BotCommand::Play("never gonna give you up".to_string())))
        );
        assert_eq!(
            parse("!play https://www.youtube.com/watch?v=abc", "!"),
            Some(Ok(BotCommand::Play(
                "https://www.youtube.com/watch?v=abc".to_string()
            )))
        );
    }

    #[test]
    fn missing_or_bad_arguments_give_usage() {
        assert_eq!(
            parse("!play", "!"),
            Some(Err(CommandError::Usage(
                "!play <búsqueda o enlace>".to_string()
            )))
        );
        assert_eq!(
            parse("!remove dos", "!"),
            Some(Err(CommandError::Usage("!remove <posición>".to_string())))
        );
        assert_eq!(
            parse("!queue 0", "!"),
            Some(Err(CommandError::Usage("!queue [página]".to_string())))
        );
    }

    #[test]
    fn remove_zero_is_left_to_the_queue() {
        assert_eq!(parse("!remove 0", "!"), Some(Ok(BotCommand::Remove(0))));
    }

    #[test]
    fn other_messages_are_ignored() {
        assert_eq!(parse("hola", "!"), None);
        assert_eq!(parse("!", "!"), None);
        assert_eq!(parse("?play x", "!"), None);
    }

    #[test]
    fn multi_char_prefix_and_unknown_command() {
        assert_eq!(parse("jb!pause", "jb!"), Some(Ok(BotCommand::Pause)));
        let err = parse("!dance", "!").unwrap().unwrap_err();
        assert_eq!(err.to_string(), "❌ Comando no reconocido: `dance`. Usa `!help`");
    }
}
