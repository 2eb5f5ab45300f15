//! `gitlab-helper`: set a directive in, or apply a template to,
//! `/etc/gitlab/gitlab.rb` on a remote GitLab host.
//!
//! ```sh
//! gitlab-helper set-config --host gitlab.example.com --key-file ~/.ssh/id_ed25519 \
//!     --setting external_url --value "'https://gitlab.example.com'" --reconfigure
//! gitlab-helper apply-template --template gitlab.rb.j2 --vars prod.yml --render-only
//! gitlab-helper settings gen -o ~/.gitlab-helper/gitlab-helper.toml
//! ```
//!
//! Logging goes to stderr; `GITLAB_HELPER_LOG` takes a tracing filter
//! (default `info`, `debug` with `-v`). Exit status is 1 on any failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use gitlab_upgrade_helper::cli::{Cli, Command, RemoteArgs};
use gitlab_upgrade_helper::{
    Action, Helper, HelperError, Outcome, RemoteTarget, RunError, Settings, SshConnector, Stage,
    TracingReporter,
};

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var("GITLAB_HELPER_LOG")
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_settings(remote: &RemoteArgs, key_file: Option<&PathBuf>) -> Result<Settings, RunError> {
    remote
        .apply(key_file, Settings::loader())
        .load()
        .map_err(|e| RunError::new(Stage::Setup, e))
}

/// `None` when no host was given; a host without any key file is an error.
fn target(host: Option<String>, settings: &Settings) -> Result<Option<RemoteTarget>, RunError> {
    let Some(host) = host else {
        return Ok(None);
    };
    let key_file = settings
        .ssh
        .key_file
        .clone()
        .ok_or_else(|| RunError::new(Stage::Setup, HelperError::MissingTarget))?;
    RemoteTarget::new(host, settings.ssh.user.clone(), settings.ssh.port, key_file)
        .map(Some)
        .map_err(|e| RunError::new(Stage::Setup, e))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn run_remote(host: Option<String>, settings: &Settings, action: Action) -> Result<(), RunError> {
    let connector = SshConnector::new()
        .connect_timeout(Duration::from_secs(settings.ssh.connect_timeout_secs));
    let reporter = TracingReporter;

    let mut builder = Helper::builder(connector).reporter(&reporter);
    if let Some(target) = target(host, settings)? {
        builder = builder.target(target);
    }

    match builder.build().handle(&action)? {
        Outcome::Rendered(text) => print!("{text}"),
        outcome => tracing::info!("{outcome}"),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), RunError> {
    match cli.command {
        Command::SetConfig(args) => {
            let settings = load_settings(&args.remote, args.key_file.as_ref())?;
            let host = Some(args.host.clone());
            run_remote(host, &settings, args.into_action(settings.run_options()))
        }
        Command::ApplyTemplate(args) => {
            let settings = load_settings(&args.remote, args.key_file.as_ref())?;
            let host = args.host.clone().filter(|_| !args.render_only);
            run_remote(host, &settings, args.into_action(settings.run_options()))
        }
        Command::Settings(args) => {
            let outcome = Settings::loader()
                .handle(&args.into_action())
                .map_err(|e| RunError::new(Stage::Setup, e))?;
            println!("{outcome}");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let settings_only = matches!(cli.command, Command::Settings(_));

    match run(cli) {
        Ok(()) if settings_only => ExitCode::SUCCESS,
        Ok(()) => {
            eprintln!("{}", "Operation completed successfully.".green());
            ExitCode::SUCCESS
        }
        Err(err) if err.is_critical() => {
            eprintln!("{}", format!("!!! {err} !!!").red().bold());
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{}", format!("Operation failed: {err}").red());
            ExitCode::FAILURE
        }
    }
}
