//! Process entry point: flag handling, settings/credentials loading, and
//! wiring every component together behind the Connection Supervisor.

use clap::Parser;
use rewind_agent::cli::{exit_code, Cli};
use rewind_agent::config::{build_configuration, RawSettings};
use rewind_agent::dispatcher::HttpCommandDispatcher;
use rewind_agent::listener::HttpEventListener;
use rewind_agent::manager::MonitorManager;
use rewind_agent::poller::HttpTimelinePoller;
use rewind_agent::registry::{HttpSessionSource, SessionRegistry};
use rewind_agent::settings::{
    load_credentials, load_settings, parse_settings, SETTINGS_TEMPLATE, TOKEN_TEMPLATE,
};
use rewind_agent::supervisor::{self, ConnectionSupervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn default_settings_path() -> PathBuf {
    PathBuf::from("rewind-agent-settings.ini")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("rewind-agent-credentials.ini")
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if cli.settings_template {
        print!("{SETTINGS_TEMPLATE}");
        return std::process::ExitCode::from(exit_code::CLEAN_SHUTDOWN as u8);
    }
    if cli.token_template {
        print!("{TOKEN_TEMPLATE}");
        return std::process::ExitCode::from(exit_code::CLEAN_SHUTDOWN as u8);
    }
    if cli.stop {
        // Single-instance tracking is out of scope for this core; there is
        // no running-instance handle to signal here.
        eprintln!("no running instance registry is tracked by this build; nothing to stop");
        return std::process::ExitCode::from(exit_code::CLEAN_SHUTDOWN as u8);
    }

    let settings_path = cli.settings_path.clone().unwrap_or_else(default_settings_path);
    let token_path = cli.token_path.clone().unwrap_or_else(default_token_path);

    if cli.update_settings_file {
        if let Err(e) = update_settings_file(&settings_path) {
            eprintln!("failed to update settings file: {e:#}");
            return std::process::ExitCode::from(exit_code::FATAL_INIT_FAILURE as u8);
        }
        return std::process::ExitCode::from(exit_code::CLEAN_SHUTDOWN as u8);
    }

    let raw = match load_settings(&settings_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to load settings: {e:#}");
            return std::process::ExitCode::from(exit_code::FATAL_INIT_FAILURE as u8);
        }
    };
    let creds = match load_credentials(&token_path) {
        Ok(creds) => creds,
        Err(e) => {
            eprintln!("failed to load credentials: {e:#}");
            return std::process::ExitCode::from(exit_code::FATAL_INIT_FAILURE as u8);
        }
    };

    let config = match build_configuration(raw, creds, cli.background, cli.debug, cli.verbose) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e:#}");
            return std::process::ExitCode::from(exit_code::FATAL_INIT_FAILURE as u8);
        }
    };

    if cli.test_settings {
        println!("settings ok: server_url={}", config.server_url);
        return std::process::ExitCode::from(exit_code::CLEAN_SHUTDOWN as u8);
    }

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &config.log_level);
    }
    telemetry::init_with_service("rewind-agent");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e:#}");
            return std::process::ExitCode::from(exit_code::FATAL_INIT_FAILURE as u8);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(RunExit::CleanShutdown) => std::process::ExitCode::from(exit_code::CLEAN_SHUTDOWN as u8),
        Ok(RunExit::AuthFailed) => {
            eprintln!("authentication failed; re-run the token acquisition flow");
            std::process::ExitCode::from(exit_code::AUTH_FAILURE as u8)
        }
        Err(e) => {
            eprintln!("fatal error: {e:#}");
            std::process::ExitCode::from(exit_code::FATAL_INIT_FAILURE as u8)
        }
    }
}

/// How `run` ended, for `main` to map to the process exit code.
enum RunExit {
    CleanShutdown,
    AuthFailed,
}

/// Rewrites the settings file with any defaults missing from it, preserving
/// whatever the operator already set (`-update-settings-file`).
fn update_settings_file(path: &std::path::Path) -> anyhow::Result<()> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let raw = parse_settings(&existing);
    std::fs::write(path, render_settings(&raw))?;
    Ok(())
}

fn render_settings(raw: &RawSettings) -> String {
    let mut out = String::from("# Subtitle rewind agent settings\n");
    out += &format!("ServerUrl={}\n", raw.server_url.as_deref().unwrap_or_default());
    out += &format!("ActiveTickSeconds={}\n", raw.active_tick_secs.unwrap_or(1));
    out += &format!("IdleTickSeconds={}\n", raw.idle_tick_secs.unwrap_or(5));
    out += &format!("MaxRewindSeconds={}\n", raw.max_rewind_secs.unwrap_or(60));
    out += &format!("GracePeriodSeconds={}\n", raw.grace_period_secs.unwrap_or(30));
    out += &format!(
        "PreferExternalSubtitles={}\n",
        raw.prefer_external_subtitles.unwrap_or(false)
    );
    out += &format!(
        "SendDirectToDevice={}\n",
        raw.send_direct_to_device.unwrap_or(true)
    );
    out += &format!("PollTimeoutMs={}\n", raw.poll_timeout_ms.unwrap_or(1_000));
    out += &format!(
        "LogLevel={}\n",
        raw.log_level.as_deref().unwrap_or("info")
    );
    for pattern in &raw.subtitle_preference_patterns {
        out += &format!("SubtitlePreferencePattern={pattern}\n");
    }
    out
}

async fn run(config: rewind_agent::config::Configuration) -> anyhow::Result<RunExit> {
    info!(server_url = %config.server_url, "starting subtitle rewind agent");

    let dispatcher = Arc::new(HttpCommandDispatcher::new(
        config.server_url.clone(),
        config.auth_token.clone(),
        config.client_identifier.clone(),
        config.send_direct_to_device,
        config.command_timeout,
    )?);
    let poller = Arc::new(HttpTimelinePoller::new(config.poll_timeout)?);
    let source = Arc::new(HttpSessionSource::new(
        config.server_url.clone(),
        config.auth_token.clone(),
        config.client_identifier.clone(),
        config.poll_timeout,
    )?);
    let registry = Arc::new(SessionRegistry::new(
        source,
        poller,
        config.preference_patterns(),
        config.prefer_external_subtitles,
        config.grace_period.as_millis() as i64,
    ));
    let manager = Arc::new(Mutex::new(MonitorManager::new(
        registry,
        dispatcher,
        config.active_tick,
        config.max_rewind,
    )));
    let listener = Arc::new(HttpEventListener::new(
        config.server_url.clone(),
        config.auth_token.clone(),
        config.client_identifier.clone(),
    )?);
    let connection_supervisor = ConnectionSupervisor::new(config.server_url.clone(), config.poll_timeout)?;

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    let shutdown = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    let exit = supervisor::run(
        connection_supervisor,
        listener,
        manager,
        config.active_tick,
        config.idle_tick,
        cancel,
    )
    .await;

    shutdown.abort();

    match exit {
        supervisor::SupervisorExit::Cancelled => {
            info!("subtitle rewind agent shut down cleanly");
            Ok(RunExit::CleanShutdown)
        }
        supervisor::SupervisorExit::AuthFailed => Ok(RunExit::AuthFailed),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
