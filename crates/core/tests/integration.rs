//! End-to-end tests for the input pipeline:
//! raw line → interpreter → (effects | conversation) → registry → store → ledger.
//!
//! Everything runs against in-memory storage and mock providers.

use std::sync::Arc;

use oxidiana_core::config::OxCfg;
use oxidiana_core::conversation::ExchangeState;
use oxidiana_core::error::SchemaError;
use oxidiana_core::session::{InputOutcome, Providers, Session};
use oxidiana_core::status::{EffectKind, EffectOutcome, STABLE_ACCENT};
use oxidiana_core::store::{MemoryBackend, RecordKind, Store};
use oxidiana_core::types::{LogKind, MessageRole, SystemStatus};
use oxidiana_llm::provider::{FailingProvider, MockProvider};

fn open(backend: &MemoryBackend, mock: &Arc<MockProvider>) -> Session {
    Session::open(
        OxCfg::default(),
        Store::new(backend.clone(), "v4.7_tactical"),
        Providers::shared(mock.clone()),
    )
}

/// Recognized verbs never reach the conversation engine.
#[tokio::test]
async fn commands_short_circuit() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new("nunca"));
    let mut s = open(&backend, &mock);

    for line in ["cls", "CLEAR", "sys.color #00ff00", "sys.glitch 0.4", "search oxidiana"] {
        let out = s.handle_input(line).await;
        assert!(!matches!(out, InputOutcome::Chat(_)), "{line} reached chat");
    }

    assert_eq!(mock.calls(), 0);
    assert!(s.messages().is_empty());
    assert_eq!(s.status().accent_color, "#00ff00");
    assert_eq!(s.status().glitch_intensity, 0.4);
}

/// Anything else is exactly one user turn and one submission.
#[tokio::test]
async fn unrecognized_input_falls_back_to_chat() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new("recibido"));
    let mut s = open(&backend, &mock);

    for (i, line) in ["hola", "sys.integrity 5", "search", "clearing the air"].iter().enumerate() {
        assert_eq!(s.handle_input(line).await, InputOutcome::Chat(ExchangeState::Completed));
        assert_eq!(mock.calls(), i + 1);
        let users = s.messages().iter().filter(|m| m.role == MessageRole::User).count();
        assert_eq!(users, i + 1);
    }
    assert_eq!(s.handle_input("   ").await, InputOutcome::Ignored);
    assert_eq!(mock.calls(), 4);
}

#[tokio::test]
async fn failed_turn_is_a_system_message() {
    let backend = MemoryBackend::new();
    let mut s = Session::open(
        OxCfg::default(),
        Store::new(backend, "v4.7_tactical"),
        Providers::shared(Arc::new(FailingProvider::transient())),
    );
    assert_eq!(s.handle_input("hola").await, InputOutcome::Chat(ExchangeState::Failed));
    let last = s.messages().last().unwrap();
    assert_eq!(last.role, MessageRole::System);
    assert_eq!(last.text, "ERR_UPLINK");
}

#[tokio::test]
async fn minimal_import_is_backfilled() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new(""));
    let mut s = open(&backend, &mock);

    assert_eq!(s.inject_json(r#"{"nombre_clave":"X"}"#), Ok(1));
    let p = s.registry().list().last().unwrap();
    assert_eq!(p.name, "X");
    assert_eq!(p.role, "OPERATIVO");
    assert_eq!(p.cognitive.syntropy, 0.5);
    assert_eq!(p.cognitive.entropy, 0.5);
    assert!(s.registry().list().iter().filter(|q| q.id == p.id).count() == 1);
    assert_eq!(
        s.ledger().latest().map(|e| (e.kind, e.content.as_str())),
        Some((LogKind::Inyeccion, "1 agent(s) injected via JSON."))
    );
}

#[tokio::test]
async fn malformed_import_changes_nothing() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new(""));
    let mut s = open(&backend, &mock);
    s.inject_json(r#"{"id":"seed"}"#).unwrap();
    let stored_before = serde_json::to_string(s.registry().list()).unwrap();
    let logs_before = s.ledger().len();

    assert!(matches!(s.inject_json("esto no es json"), Err(SchemaError::Parse(_))));

    assert_eq!(serde_json::to_string(s.registry().list()).unwrap(), stored_before);
    assert_eq!(s.ledger().len(), logs_before);
    let reopened = open(&backend, &mock);
    assert_eq!(serde_json::to_string(reopened.registry().list()).unwrap(), stored_before);
}

#[tokio::test]
async fn ledger_keeps_thirty_newest() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new(""));
    let mut s = open(&backend, &mock);
    for i in 0..40 {
        s.add_memory(&format!("nota {i}"));
    }
    assert_eq!(s.ledger().len(), 30);
    assert!(s.ledger().entries()[0].content.starts_with("New memory added: \"nota 39"));
    assert!(s.ledger().entries()[29].content.starts_with("New memory added: \"nota 10"));

    let reopened = open(&backend, &mock);
    assert_eq!(reopened.ledger().entries(), s.ledger().entries());
}

#[tokio::test]
async fn status_survives_reopen() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new(""));
    let mut s = open(&backend, &mock);
    s.execute_effect(EffectKind::Integrity, "63.5");
    s.execute_effect(EffectKind::Glitch, "0.25");
    s.toggle_member("estefania_sim").unwrap();
    s.set_glitch_timing(0.9);
    let expected: SystemStatus = s.status().clone();

    let reopened = open(&backend, &mock);
    assert_eq!(reopened.status(), &expected);
    let raw = Store::new(backend.clone(), "v4.7_tactical").load(RecordKind::Status, SystemStatus::default());
    assert_eq!(raw, expected);
}

#[tokio::test]
async fn gestalt_turn_uses_composite_instruction() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new("juntos"));
    let mut s = open(&backend, &mock);
    let mut luna = s.registry().get("genesis_luna").cloned().unwrap();
    luna.cognitive.entropy = 0.2;
    s.update_persona(luna).unwrap();
    s.toggle_member("estefania_sim").unwrap();

    s.handle_input("reporte").await;

    let req = mock.last_request().unwrap();
    assert!((req.temperature.unwrap() - 1.3).abs() < 1e-6);
    assert!(req.system_instruction.contains("GENESIS"));
    assert!(req.system_instruction.contains("ESTEFANIA"));
    assert_eq!(s.messages().last().and_then(|m| m.agent_id.as_deref()), Some("GESTALT"));
}

#[tokio::test]
async fn stabilize_protocol_sets_nominal_vitals() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new(""));
    let mut s = open(&backend, &mock);
    s.execute_effect(EffectKind::Protocol, "SONRISA_DEPREDEDORA");
    let before = s.ledger().len();

    assert_eq!(s.execute_effect(EffectKind::Protocol, "ESTABILIZAR_N"), EffectOutcome::Applied);

    assert_eq!(s.status().integrity, 100.0);
    assert_eq!(s.status().glitch_intensity, 0.0);
    assert_eq!(s.status().accent_color, STABLE_ACCENT);
    assert_eq!(s.ledger().len(), before + 3);
    assert_eq!(s.ledger().entries()[0].content, "protocol|ESTABILIZAR_N");
}

#[tokio::test]
async fn removed_persona_resolves_to_placeholder() {
    let backend = MemoryBackend::new();
    let mock = Arc::new(MockProvider::new("soy luna"));
    let mut s = open(&backend, &mock);
    s.handle_input("hola").await;
    s.remove_persona("genesis_luna").unwrap();

    let msg = s.messages().last().cloned().unwrap();
    assert_eq!(msg.agent_id.as_deref(), Some("genesis_luna"));
    assert_eq!(s.speaker_of(&msg).name(), "DESCONOCIDO");
    assert!(s.status().active_agent_ids.is_empty());

    // nobody active: built-in identity and neutral temperature
    s.handle_input("¿sigues ahí?").await;
    let req = mock.last_request().unwrap();
    assert!(req.system_instruction.starts_with("Eres BIOMA OXIDIANA"));
    assert_eq!(req.temperature, Some(1.0));
}
