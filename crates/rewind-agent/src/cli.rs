//! Flags recognized by the agent's process entry point.
//!
//! Single-instance enforcement and platform-specific background-process
//! handling remain out of scope, but the flags that steer them are parsed
//! here and threaded into `Configuration`.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "rewind-agent", about = "Subtitle-on-rewind side-car agent", long_about = None)]
pub struct Cli {
    /// Run detached from the controlling terminal.
    #[arg(long = "background", visible_alias = "/background")]
    pub background: bool,

    /// Signal a running instance to shut down and exit.
    #[arg(long = "stop", visible_alias = "/stop")]
    pub stop: bool,

    /// Enable debug-level logging.
    #[arg(long = "debug", visible_alias = "/debug")]
    pub debug: bool,

    /// Enable trace-level logging.
    #[arg(long = "verbose", visible_alias = "/verbose")]
    pub verbose: bool,

    /// Write a commented settings-file template and exit.
    #[arg(long = "settings-template", visible_alias = "/settings-template")]
    pub settings_template: bool,

    /// Write a credentials-file template and exit.
    #[arg(long = "token-template", visible_alias = "/token-template")]
    pub token_template: bool,

    /// Skip the single-instance check (out-of-core; accepted for
    /// compatibility with the host process's flag surface).
    #[arg(
        long = "allow-duplicate-instance",
        visible_alias = "/allow-duplicate-instance"
    )]
    pub allow_duplicate_instance: bool,

    /// Rewrite the settings file with any defaults missing from it, then exit.
    #[arg(long = "update-settings-file", visible_alias = "/update-settings-file")]
    pub update_settings_file: bool,

    /// Load settings and credentials, report whether they are valid, and exit.
    #[arg(long = "test-settings", visible_alias = "/test-settings")]
    pub test_settings: bool,

    /// Path to the settings file.
    #[arg(long, env = "REWIND_AGENT_SETTINGS_PATH")]
    pub settings_path: Option<std::path::PathBuf>,

    /// Path to the credentials file.
    #[arg(long, env = "REWIND_AGENT_TOKEN_PATH")]
    pub token_path: Option<std::path::PathBuf>,
}

/// Process exit codes.
pub mod exit_code {
    pub const CLEAN_SHUTDOWN: i32 = 0;
    pub const FATAL_INIT_FAILURE: i32 = 1;
    /// A 401 was observed and the Connection Supervisor gave up reconnecting
    /// rather than retry forever;
    /// distinct from `FATAL_INIT_FAILURE` so the host can tell "bad token at
    /// startup" apart from "token expired/was revoked mid-run" and decide
    /// whether to re-run the token acquisition flow.
    pub const AUTH_FAILURE: i32 = 2;
}
