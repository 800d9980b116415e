use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use tracing::{info, warn};

use desktop_agent::config::AppConfig;
use desktop_agent::desktop::platform_controller;
use desktop_agent::http::JsonHttp;
use desktop_agent::planner::OpenAiPlanner;
use desktop_agent::vision::ReplicateVision;
use desktop_agent::{logging, EngineState, ExecutionReport, Orchestrator};

/// Turn a natural-language command into desktop actions and run them.
#[derive(Parser, Debug)]
#[command(name = "desktop-agent", version, about)]
struct Cli {
    /// Run a single command and exit instead of starting the prompt.
    #[arg(short, long)]
    command: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.log).context("Failed to initialise logging")?;
    if let Some(path) = &config.env_file {
        info!("Loaded environment from {}", path.display());
    }
    info!("Starting with {:?}", config);

    let orchestrator = Arc::new(build_orchestrator(&config).context("Failed to start the agent")?);

    if let Some(command) = cli.command {
        let report = orchestrator.run(&command).await;
        print_report(&report);
        return Ok(if report.outcome.is_completed() { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    spawn_interrupt_listener(orchestrator.clone());
    interactive(&orchestrator).await?;
    Ok(ExitCode::SUCCESS)
}

fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let http = JsonHttp::new(config.http.timeout, config.http.max_retries).context("Failed to build HTTP client")?;
    let planner = OpenAiPlanner::new(http.clone(), config.planner.clone())?;
    let vision = ReplicateVision::new(http, config.vision.clone());
    let desktop = platform_controller()?;
    Ok(Orchestrator::new(Arc::new(planner), Arc::new(vision), desktop))
}

/// Ctrl-C stops the running command after its current step; at the prompt it
/// exits.
fn spawn_interrupt_listener(orchestrator: Arc<Orchestrator>) {
    let handle = orchestrator.interrupt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if matches!(orchestrator.state(), EngineState::Running { .. }) {
                warn!("Interrupt received; stopping after the current step");
                handle.interrupt();
            } else {
                println!();
                std::process::exit(130);
            }
        }
    });
}

async fn interactive(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    println!("Desktop agent ready. Type a command, or 'quit' to exit.");

    let mut reader = io::BufReader::new(io::stdin());
    let mut buffer = String::new();

    loop {
        print!("> ");
        let _ = io::stdout().flush().await;

        buffer.clear();
        if reader.read_line(&mut buffer).await? == 0 {
            break;
        }

        let input = buffer.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            break;
        }

        let report = orchestrator.run(input).await;
        print_report(&report);
    }

    info!("Goodbye");
    Ok(())
}

fn print_report(report: &ExecutionReport) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} ({} step(s), {:.1}s)",
        report.outcome,
        report.steps_executed,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    if let Some(analysis) = &report.last_analysis {
        if let Some(text) = analysis.get("text").or_else(|| analysis.get("main_text_content")).and_then(|v| v.as_str()) {
            println!("Screen text: {}", text);
        }
    }
}
