use std::sync::Arc;

use anyhow::Context;
use canon::cli::{Cli, Command};
use canon::commands::{self, CommandContext};
use canon::{stdout_lines, Config, ContainerEngine, DockerEngine, HostContext};
use clap::Parser;

const EXIT_CODE_ON_ERROR: i32 = 1;

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_CODE_ON_ERROR
        }
    };

    // a blocking stdin read may still be pending; do not wait for it
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let host = HostContext::current()?;
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;

    let config = Config::load(&cwd, &host.home, cli.config.as_deref())?;
    let profile = config.resolve(&cwd, cli.profile.as_deref(), &cli.overrides())?;
    log::debug!("Active profile {}", profile.key());

    let command = cli.command();
    if command == Command::Config {
        print!("{}", commands::handle_config(&profile)?);
        return Ok(0);
    }

    let engine: Arc<dyn ContainerEngine> = Arc::new(
        DockerEngine::connect_with_fallback(&host.home).context("Failed to connect to Docker")?,
    );
    let ctx = CommandContext::new(engine, host, cwd, stdout_lines());

    if let Some(argv) = command.session_argv() {
        let code = commands::handle_session(
            &ctx,
            &profile,
            argv,
            commands::ssh_socket(),
            commands::termination_signal(),
        )
        .await?;
        return Ok(code);
    }

    match command {
        Command::Update { all } => commands::handle_update(&ctx, &config, &profile, all).await?,
        Command::List => commands::handle_list(&ctx).await?,
        Command::Stop { all } => commands::handle_stop(&ctx, &profile, all, false).await?,
        Command::Terminate { all } => commands::handle_stop(&ctx, &profile, all, true).await?,
        Command::Shell | Command::Run { .. } | Command::External(_) | Command::Config => {}
    }
    Ok(0)
}
