use crate::status::EffectKind;

/// What a raw input line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open an external web search. Never enters chat history.
    Search(String),
    /// Clear the displayed chat history.
    Clear,
    /// `sys.color` / `sys.glitch`, forwarded to the effects engine.
    Effect { kind: EffectKind, value: String },
    /// Anything else: a normal chat turn.
    Chat(String),
}

impl Command {
    pub fn is_chat(&self) -> bool {
        matches!(self, Self::Chat(_))
    }
}

/// Classify one input line. `None` for blank input.
///
/// Verbs are case-insensitive. A verb that needs an argument but has none
/// falls through to chat.
pub fn interpret(line: &str) -> Option<Command> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }

    let (verb, rest) = match text.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (text, ""),
    };
    let first_arg = rest.split_whitespace().next();

    let cmd = match verb.to_lowercase().as_str() {
        "search" if !rest.is_empty() => Command::Search(rest.to_owned()),
        "cls" | "clear" => Command::Clear,
        "sys.color" => match first_arg {
            Some(v) => Command::Effect { kind: EffectKind::Color, value: v.to_owned() },
            None => Command::Chat(text.to_owned()),
        },
        "sys.glitch" => match first_arg {
            Some(v) => Command::Effect { kind: EffectKind::Glitch, value: v.to_owned() },
            None => Command::Chat(text.to_owned()),
        },
        _ => Command::Chat(text.to_owned()),
    };
    Some(cmd)
}

/// Fill `{query}` in a search template with the percent-encoded query.
pub fn search_url(template: &str, query: &str) -> String {
    template.replace("{query}", &urlencoding::encode(query))
}
