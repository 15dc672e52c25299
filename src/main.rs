mod cli;
mod config;
mod dispatch;
mod paths;
mod providers;
mod runner;
mod ui;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::HostConfig;
use lcm_engine::{Lcm, LogSink, SnapshotStore};
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config = HostConfig::load()?;
    init_logging(&cli, &config)?;

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "lcm", &mut io::stdout());
        return Ok(0);
    }

    let state_dir = config.state_dir(cli.state_dir.as_deref())?;
    let store = SnapshotStore::open(&state_dir).with_context(|| {
        format!("Failed to open snapshot store: {}", state_dir.display())
    })?;

    let lcm = Lcm::builder()
        .registry(providers::builtin_registry())
        .store(store)
        .events(Arc::new(LogSink))
        .build();
    log::debug!("Providers: {}", lcm.registry().type_names().join(", "));

    let Some(request) = cli.command.into_request() else {
        return Ok(0);
    };

    let response = dispatch::dispatch(&lcm, &request);
    if !cli.quiet || !response.is_ok() || cli.json {
        dispatch::print_response(&response, cli.json);
    }
    Ok(response.exit_code())
}

/// Level priority: `-v`/`-q`, then `RUST_LOG`, then `log_level` in lcm.toml, then warn
fn init_logging(cli: &Cli, config: &HostConfig) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.log_level()?.unwrap_or(log::LevelFilter::Warn));
    builder.parse_default_env();

    if cli.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if cli.verbose > 0 {
        builder.filter_level(match cli.verbose {
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        });
    }

    // 2026/01/31 14:05:09: INFO: orchestrator.rs(212): ApplyConfiguration finished
    builder.format(|buf, record| {
        let file = record
            .file()
            .and_then(|f| f.rsplit(['/', '\\']).next())
            .unwrap_or("unknown");
        writeln!(
            buf,
            "{}: {}: {}({}): {}",
            chrono::Local::now().format("%Y/%m/%d %H:%M:%S"),
            record.level(),
            file,
            record.line().unwrap_or(0),
            record.args()
        )
    });

    builder.init();
    Ok(())
}
