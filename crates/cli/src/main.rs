mod audio;
mod event;
mod slash;
mod tui;
mod widgets;

use std::sync::Arc;

use oxidiana_core::config::OxCfg;
use oxidiana_core::session::{Providers, Session};
use oxidiana_core::store::{FileBackend, Store};
use oxidiana_llm::provider::GenerationProvider;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Panic hook: restore terminal even on panic in raw mode
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = crossterm::terminal::disable_raw_mode();
        let _ = crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen);
        default_hook(info);
    }));

    let cfg = OxCfg::from_env();
    std::fs::create_dir_all(&cfg.data_dir)?;

    // Tracing: write to file when RUST_LOG is set (raw mode breaks stderr)
    if std::env::var("RUST_LOG").is_ok() {
        let file = std::fs::File::create(cfg.data_dir.join("oxidiana.log"))?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    let mut startup_notice: Option<String> = None;
    let providers = match oxidiana_llm::http::from_env() {
        Some(p) => {
            tracing::info!(name = GenerationProvider::name(&p), "remote provider initialized");
            Providers::shared(Arc::new(p))
        }
        None => {
            tracing::warn!("OXIDIANA_API_KEY / GEMINI_API_KEY not set, running offline");
            startup_notice = Some("Sin clave de API: el enlace neural está desconectado.".to_string());
            Providers::none()
        }
    };

    let store = Store::new(FileBackend::new(&cfg.data_dir), cfg.storage_version.clone());
    let data_dir = cfg.data_dir.clone();
    let session = Session::open(cfg, store, providers);

    let (mut runtime, request_tx, output_rx, snapshot_rx) = oxidiana_core::runtime::Runtime::new(session);
    let token = runtime.token();

    // Both futures share this task. Whichever finishes first cancels the other
    // and the loop waits for both to wind down.
    let tui_token = token.clone();
    let runtime_fut = runtime.run();
    let tui_fut = tui::run_app(request_tx, output_rx, snapshot_rx, tui_token, data_dir, startup_notice);
    tokio::pin!(runtime_fut);
    tokio::pin!(tui_fut);

    let mut runtime_done = false;
    let mut tui_result: Option<anyhow::Result<()>> = None;

    loop {
        tokio::select! {
            _ = &mut runtime_fut, if !runtime_done => {
                runtime_done = true;
                token.cancel();
                if tui_result.is_none() {
                    tui_result = Some((&mut tui_fut).await);
                }
            }
            result = &mut tui_fut, if tui_result.is_none() => {
                tui_result = Some(result);
                token.cancel();
            }
        }

        if runtime_done && tui_result.is_some() {
            break;
        }
    }

    tui_result.unwrap_or(Ok(()))
}
