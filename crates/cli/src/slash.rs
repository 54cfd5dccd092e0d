//! Slash-commands: the console actions that are not chat input.

use oxidiana_core::image::AspectRatio;
use oxidiana_core::status::EffectKind;
use oxidiana_core::types::{FontPreference, Theme};

#[derive(Debug, Clone, PartialEq)]
pub enum Slash {
    Focus(String),
    Gestalt(String),
    /// Path to a JSON file with one persona or an array.
    Inject(String),
    Kill(String),
    Protocol(String),
    Effect { kind: EffectKind, value: String },
    Theme(Theme),
    Font(FontPreference),
    GlitchTiming(f32),
    /// 1-based chat index; `None` = newest model turn.
    Speak(Option<usize>),
    Reason(String),
    Image { prompt: String, ratio: AspectRatio },
    Remember(String),
    Forget(String),
    ClearLogs,
    Reboot,
    Wipe,
    Quit,
}

pub const HELP: &str = "/focus <id>  /gestalt <id>  /inject <file>  /kill <id>  /protocol <token>  \
/effect <kind> <value>  /theme <name>  /font mono|tech  /timing <0-1>  /speak [n]  /reason <text>  \
/image [ratio] <prompt>  /remember <text>  /forget <id>  /clearlogs  /reboot  /wipe  /quit";

/// Parse a line starting with `/`. `Ok(None)` means the line is not a
/// slash-command and belongs to the chat box.
pub fn parse(line: &str) -> Result<Option<Slash>, String> {
    let Some(body) = line.trim().strip_prefix('/') else {
        return Ok(None);
    };
    let (verb, rest) = match body.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (body, ""),
    };

    let need = |what: &str| -> Result<String, String> {
        if rest.is_empty() { Err(format!("/{verb} needs {what}")) } else { Ok(rest.to_owned()) }
    };

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "focus" => Slash::Focus(need("a persona id")?),
        "gestalt" => Slash::Gestalt(need("a persona id")?),
        "inject" => Slash::Inject(need("a file path")?),
        "kill" => Slash::Kill(need("a persona id")?),
        "protocol" => Slash::Protocol(need("a token")?),
        "effect" => {
            let (kind, value) = rest
                .split_once(char::is_whitespace)
                .map(|(k, v)| (k, v.trim()))
                .unwrap_or((rest, ""));
            let kind = EffectKind::parse(kind).map_err(|e| e.to_string())?;
            Slash::Effect { kind, value: value.to_owned() }
        }
        "theme" => {
            let name = need("a theme name")?;
            Slash::Theme(Theme::from_name(&name).ok_or_else(|| {
                let known: Vec<&str> = Theme::ALL.iter().map(Theme::storage_name).collect();
                format!("unknown theme {name} (one of {})", known.join(", ").to_ascii_lowercase())
            })?)
        }
        "font" => match rest.to_ascii_lowercase().as_str() {
            "mono" => Slash::Font(FontPreference::Mono),
            "tech" => Slash::Font(FontPreference::Tech),
            other => return Err(format!("unknown font {other:?}")),
        },
        "timing" => {
            let t = rest.parse::<f32>().map_err(|_| format!("not a number: {rest:?}"))?;
            Slash::GlitchTiming(t)
        }
        "speak" => {
            if rest.is_empty() {
                Slash::Speak(None)
            } else {
                let n = rest.parse::<usize>().ok().filter(|n| *n > 0);
                Slash::Speak(Some(n.ok_or_else(|| format!("bad message number {rest:?}"))?))
            }
        }
        "reason" => Slash::Reason(need("a prompt")?),
        "image" => {
            let prompt = need("a prompt")?;
            match prompt.split_once(char::is_whitespace) {
                Some((head, tail)) if AspectRatio::parse(head).is_some() => Slash::Image {
                    prompt: tail.trim().to_owned(),
                    ratio: AspectRatio::parse(head).unwrap_or_default(),
                },
                _ => Slash::Image { prompt, ratio: AspectRatio::default() },
            }
        }
        "remember" => Slash::Remember(need("some text")?),
        "forget" => Slash::Forget(need("a memory id")?),
        "clearlogs" => Slash::ClearLogs,
        "reboot" => Slash::Reboot,
        "wipe" => Slash::Wipe,
        "quit" | "exit" => Slash::Quit,
        other => return Err(format!("unknown command /{other}")),
    };
    Ok(Some(cmd))
}
