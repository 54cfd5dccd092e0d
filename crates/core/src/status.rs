//! System status effects: the `execute(kind, value)` dispatch plus the
//! purge lock and the post-purge reboot.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::EffectError;
use crate::ledger::Ledger;
use crate::types::{FontPreference, LogKind, SystemStatus, Theme};

pub const NOMINAL_ACCENT: &str = "#ff003c";
pub const ALERT_ACCENT: &str = "#ff0000";
pub const STABLE_ACCENT: &str = "#00ff00";

/// Effect kinds accepted by [`Effects::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Color,
    Glitch,
    Integrity,
    Wipe,
    Protocol,
    StatusCheck,
    Purge,
}

impl EffectKind {
    pub const ALL: [EffectKind; 7] = [
        Self::Color,
        Self::Glitch,
        Self::Integrity,
        Self::Wipe,
        Self::Protocol,
        Self::StatusCheck,
        Self::Purge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Glitch => "glitch",
            Self::Integrity => "integrity",
            Self::Wipe => "wipe",
            Self::Protocol => "protocol",
            Self::StatusCheck => "status_check",
            Self::Purge => "purge",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EffectError> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EffectError::UnknownKind(s.to_owned()))
    }
}

/// Narrative protocol tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolToken {
    /// Degraded state.
    SonrisaDepredadora,
    /// Terminal state; locks the surface.
    TerminateAll,
    /// Back to nominal.
    EstabilizarN,
    Unrecognized(String),
}

impl ProtocolToken {
    pub const KNOWN: [&'static str; 3] = ["SONRISA_DEPREDEDORA", "TERMINATE_ALL", "ESTABILIZAR_N"];

    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "SONRISA_DEPREDEDORA" => Self::SonrisaDepredadora,
            "TERMINATE_ALL" => Self::TerminateAll,
            "ESTABILIZAR_N" => Self::EstabilizarN,
            other => Self::Unrecognized(other.to_owned()),
        }
    }
}

/// A typed effect, parsed from its kind and raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Color(String),
    Glitch(f32),
    Integrity(f32),
    Wipe,
    Protocol(ProtocolToken),
    StatusCheck(String),
    Purge(String),
}

impl Effect {
    pub fn parse(kind: EffectKind, value: &str) -> Result<Self, EffectError> {
        let value = value.trim();
        Ok(match kind {
            EffectKind::Color => Self::Color(parse_hex_color(value).ok_or_else(|| invalid(kind, value))?),
            EffectKind::Glitch => Self::Glitch(parse_number(value).ok_or_else(|| invalid(kind, value))?),
            EffectKind::Integrity => Self::Integrity(parse_number(value).ok_or_else(|| invalid(kind, value))?),
            EffectKind::Wipe => Self::Wipe,
            EffectKind::Protocol => Self::Protocol(ProtocolToken::parse(value)),
            EffectKind::StatusCheck => Self::StatusCheck(value.to_owned()),
            EffectKind::Purge => Self::Purge(value.to_owned()),
        })
    }
}

fn invalid(kind: EffectKind, value: &str) -> EffectError {
    EffectError::InvalidValue { kind: kind.as_str(), value: value.to_owned() }
}

fn parse_number(s: &str) -> Option<f32> {
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Accepts `#rgb`, `#rrggbb` or `#rrggbbaa`, with or without the `#`.
/// Returns the lowercase `#`-prefixed form.
pub fn parse_hex_color(s: &str) -> Option<String> {
    let digits = s.strip_prefix('#').unwrap_or(s);
    let ok = matches!(digits.len(), 3 | 6 | 8) && digits.chars().all(|c| c.is_ascii_hexdigit());
    ok.then(|| format!("#{}", digits.to_ascii_lowercase()))
}

/// What the caller must do after an effect ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectOutcome {
    Applied,
    /// Invalid value: logged, status untouched.
    Rejected,
    /// The caller owns the store and must wipe and reload.
    WipeRequested,
}

/// Process-local effect state that is never persisted: the purge lock and
/// the temporary input block.
#[derive(Debug, Clone)]
pub struct Effects {
    locked: bool,
    blocked_until: Option<Instant>,
    block_for: Duration,
}

impl Effects {
    pub fn new(block_for: Duration) -> Self {
        Self { locked: false, blocked_until: None, block_for }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_until.is_some_and(|t| Instant::now() < t)
    }

    /// Run one effect. Always ends with a `kind|value` audit entry.
    pub fn execute(
        &mut self,
        status: &mut SystemStatus,
        ledger: &mut Ledger,
        kind: EffectKind,
        value: &str,
    ) -> EffectOutcome {
        let outcome = match Effect::parse(kind, value) {
            Ok(effect) => self.apply(status, ledger, effect),
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), value, error = %e, "effect rejected");
                ledger.push(LogKind::Ejecucion, format!("ERROR: {e}"));
                EffectOutcome::Rejected
            }
        };
        ledger.push(LogKind::Sistemico, format!("{}|{}", kind.as_str(), value));
        outcome
    }

    fn apply(&mut self, status: &mut SystemStatus, ledger: &mut Ledger, effect: Effect) -> EffectOutcome {
        match effect {
            Effect::Color(hex) => status.accent_color = hex,
            Effect::Glitch(v) => status.glitch_intensity = v.clamp(0.0, 1.0),
            Effect::Integrity(v) => status.integrity = v.clamp(0.0, 100.0),
            Effect::Wipe => return EffectOutcome::WipeRequested,
            Effect::Protocol(token) => self.protocol(status, ledger, token),
            Effect::StatusCheck(v) => {
                if v == "SONRISA_DEPREDEDORA" {
                    ledger.push(LogKind::Ejecucion, "Data procesada con estado KAFE: Error Detectado...");
                    ledger.push(LogKind::Sistemico, "Estado KAFE: Data sospechosa");
                }
            }
            Effect::Purge(v) => {
                if v == "TERMINATE_ALL" {
                    ledger.push(
                        LogKind::Ejecucion,
                        "Ejecutando terminación de todos los procesos... Sistema bloqueado temporalmente.",
                    );
                    ledger.push(LogKind::Sistemico, "Purgado - Estado KAFE");
                    self.blocked_until = Some(Instant::now() + self.block_for);
                }
            }
        }
        EffectOutcome::Applied
    }

    fn protocol(&mut self, status: &mut SystemStatus, ledger: &mut Ledger, token: ProtocolToken) {
        match token {
            ProtocolToken::SonrisaDepredadora => {
                set_vitals(status, 15.0, 0.8, ALERT_ACCENT);
                ledger.push(LogKind::Ejecucion, "ERROR: Data corrupta (KAFE) - Fase de validación en curso...");
                ledger.push(LogKind::Sistemico, "DATA_EN_REVISION: KAFE");
            }
            ProtocolToken::TerminateAll => {
                self.locked = true;
                set_vitals(status, 0.0, 1.0, ALERT_ACCENT);
                ledger.push(
                    LogKind::Ejecucion,
                    "Ejecutando terminación de todos los procesos... Sistema bloqueado temporalmente.",
                );
                ledger.push(LogKind::Sistemico, "PURGADO - ESTADO KAFE");
                tracing::warn!("system locked by protocol");
            }
            ProtocolToken::EstabilizarN => {
                set_vitals(status, 100.0, 0.0, STABLE_ACCENT);
                ledger.push(LogKind::Ejecucion, "Protocolo de estabilización completado. Sistemas nominales.");
                ledger.push(LogKind::Sistemico, "SISTEMA_ESTABILIZADO");
            }
            ProtocolToken::Unrecognized(raw) => {
                ledger.push(LogKind::Ejecucion, format!("ERROR: Protocolo no reconocido [{raw}]."));
                ledger.push(
                    LogKind::Sistemico,
                    format!("Formatos sugeridos: {}", ProtocolToken::KNOWN.join(", ")),
                );
            }
        }
    }

    /// Leave the purge screen and return to nominal vitals.
    pub fn reboot(&mut self, status: &mut SystemStatus, ledger: &mut Ledger) {
        self.locked = false;
        set_vitals(status, 100.0, 0.0, NOMINAL_ACCENT);
        ledger.push(LogKind::Sistemico, "REINICIO_FORZADO_POST_PURGA");
        tracing::info!("system rebooted after purge");
    }
}

fn set_vitals(status: &mut SystemStatus, integrity: f32, glitch: f32, accent: &str) {
    status.integrity = integrity;
    status.glitch_intensity = glitch;
    status.accent_color = accent.to_owned();
}

pub fn set_theme(status: &mut SystemStatus, theme: Theme) {
    status.theme = theme;
}

pub fn set_font(status: &mut SystemStatus, font: FontPreference) {
    status.preferred_font = font;
}

pub fn set_glitch_timing(status: &mut SystemStatus, timing: f32) {
    if timing.is_finite() {
        status.glitch_timing = timing.clamp(0.0, 1.0);
    }
}

/// Accent to render: the status accent wins over the theme's when set.
pub fn effective_accent(status: &SystemStatus) -> &str {
    if status.accent_color.is_empty() {
        status.theme.palette().accent
    } else {
        &status.accent_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Effects, SystemStatus, Ledger) {
        (Effects::new(Duration::from_secs(5)), SystemStatus::default(), Ledger::new(30))
    }

    fn contents(ledger: &Ledger) -> Vec<String> {
        ledger.entries().iter().map(|e| e.content.clone()).collect()
    }

    #[test]
    fn stabilize_resets_vitals_and_logs_three() {
        let (mut fx, mut status, mut ledger) = setup();
        status.integrity = 12.0;
        status.glitch_intensity = 0.9;
        let out = fx.execute(&mut status, &mut ledger, EffectKind::Protocol, "ESTABILIZAR_N");
        assert_eq!(out, EffectOutcome::Applied);
        assert_eq!(status.integrity, 100.0);
        assert_eq!(status.glitch_intensity, 0.0);
        assert_eq!(status.accent_color, STABLE_ACCENT);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.entries()[0].content, "protocol|ESTABILIZAR_N");
        assert_eq!(ledger.entries()[1].content, "SISTEMA_ESTABILIZADO");
    }

    #[test]
    fn terminate_locks_and_reboot_unlocks() {
        let (mut fx, mut status, mut ledger) = setup();
        fx.execute(&mut status, &mut ledger, EffectKind::Protocol, "TERMINATE_ALL");
        assert!(fx.is_locked());
        assert_eq!(status.integrity, 0.0);
        assert_eq!(status.glitch_intensity, 1.0);
        fx.reboot(&mut status, &mut ledger);
        assert!(!fx.is_locked());
        assert_eq!(status.accent_color, NOMINAL_ACCENT);
        assert_eq!(ledger.latest().map(|e| e.content.as_str()), Some("REINICIO_FORZADO_POST_PURGA"));
    }

    #[test]
    fn degraded_protocol() {
        let (mut fx, mut status, mut ledger) = setup();
        fx.execute(&mut status, &mut ledger, EffectKind::Protocol, "SONRISA_DEPREDEDORA");
        assert_eq!(status.integrity, 15.0);
        assert_eq!(status.glitch_intensity, 0.8);
        assert_eq!(status.accent_color, ALERT_ACCENT);
        assert!(!fx.is_locked());
    }

    #[test]
    fn unknown_protocol_lists_known_tokens() {
        let (mut fx, mut status, mut ledger) = setup();
        fx.execute(&mut status, &mut ledger, EffectKind::Protocol, "BAILAR");
        assert_eq!(status, SystemStatus::default());
        assert_eq!(
            contents(&ledger),
            vec![
                "protocol|BAILAR".to_string(),
                "Formatos sugeridos: SONRISA_DEPREDEDORA, TERMINATE_ALL, ESTABILIZAR_N".to_string(),
                "ERROR: Protocolo no reconocido [BAILAR].".to_string(),
            ]
        );
    }

    #[test]
    fn invalid_values_are_rejected_but_audited() {
        let (mut fx, mut status, mut ledger) = setup();
        assert_eq!(fx.execute(&mut status, &mut ledger, EffectKind::Glitch, "mucho"), EffectOutcome::Rejected);
        assert_eq!(fx.execute(&mut status, &mut ledger, EffectKind::Color, "#zzzzzz"), EffectOutcome::Rejected);
        assert_eq!(status, SystemStatus::default());
        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger.entries()[0].content, "color|#zzzzzz");
        assert_eq!(ledger.entries()[1].kind, LogKind::Ejecucion);
    }

    #[test]
    fn numeric_effects_clamp() {
        let (mut fx, mut status, mut ledger) = setup();
        fx.execute(&mut status, &mut ledger, EffectKind::Glitch, "3");
        fx.execute(&mut status, &mut ledger, EffectKind::Integrity, "-20");
        fx.execute(&mut status, &mut ledger, EffectKind::Color, "00FF00");
        assert_eq!(status.glitch_intensity, 1.0);
        assert_eq!(status.integrity, 0.0);
        assert_eq!(status.accent_color, "#00ff00");
    }

    #[test]
    fn status_check_only_reacts_to_known_token() {
        let (mut fx, mut status, mut ledger) = setup();
        fx.execute(&mut status, &mut ledger, EffectKind::StatusCheck, "OTRO");
        assert_eq!(ledger.len(), 1);
        fx.execute(&mut status, &mut ledger, EffectKind::StatusCheck, "SONRISA_DEPREDEDORA");
        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger.entries()[1].content, "Estado KAFE: Data sospechosa");
    }

    #[tokio::test(start_paused = true)]
    async fn purge_blocks_for_configured_time() {
        let (mut fx, mut status, mut ledger) = setup();
        fx.execute(&mut status, &mut ledger, EffectKind::Purge, "TERMINATE_ALL");
        assert!(fx.is_blocked());
        assert_eq!(ledger.entries()[1].content, "Purgado - Estado KAFE");
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!fx.is_blocked());
    }

    #[test]
    fn wipe_is_delegated() {
        let (mut fx, mut status, mut ledger) = setup();
        assert_eq!(fx.execute(&mut status, &mut ledger, EffectKind::Wipe, ""), EffectOutcome::WipeRequested);
        assert_eq!(ledger.latest().map(|e| e.content.as_str()), Some("wipe|"));
    }

    #[test]
    fn kind_parsing() {
        assert_eq!(EffectKind::parse("STATUS_CHECK"), Ok(EffectKind::StatusCheck));
        assert!(EffectKind::parse("explode").is_err());
    }

    #[test]
    fn setters_clamp_and_accent_fallback() {
        let mut status = SystemStatus::default();
        set_glitch_timing(&mut status, 4.0);
        set_theme(&mut status, Theme::CyberCyan);
        set_font(&mut status, FontPreference::Tech);
        assert_eq!(status.glitch_timing, 1.0);
        assert_eq!(effective_accent(&status), NOMINAL_ACCENT);
        status.accent_color.clear();
        assert_eq!(effective_accent(&status), "#00f2ff");
    }
}
