//! modforge command-line entry point.

use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use regex::Regex;
use tracing::debug;

use modforge::agent::Agent;
use modforge::config::ModelConfig;
use modforge::error::{ForgeError, Result};
use modforge::layout::{self, PROMPT_FILE, TEST_SPEC_FILE};
use modforge::llm::{ChatModel, OpenAiCompatClient};
use modforge::oracle::PytestOracle;
use modforge::prompts::AgentMode;
use modforge::supervisor::{BuildConfig, BuildOutcome, BuildReport, BuildSupervisor};
use modforge::tools::{StdinApproval, ToolSet};

#[derive(Parser)]
#[command(name = "modforge", version, about = "Sandboxed tool-calling agent with a supervised module build loop", long_about = None)]
struct Cli {
    /// Workspace directory the agent is confined to
    #[arg(short, long, global = true, default_value = "./workspace")]
    dir: PathBuf,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session with the agent
    Chat {
        /// Agent personality and sandbox posture
        #[arg(short, long, value_enum, default_value_t = AgentMode::Coder)]
        mode: AgentMode,

        /// Build attempt budget when builder mode supervises a module
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
    },

    /// Build one module directory until its tests pass
    Build {
        /// Module directory containing test_spec.py
        module: PathBuf,

        /// Override the build instruction (default: the module's PROMPT.md)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Build attempt budget
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "modforge=debug,info"
    } else {
        "modforge=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Chat { mode, max_attempts } => chat(&cli.dir, mode, max_attempts).await,
        Commands::Build {
            module,
            prompt,
            max_attempts,
        } => build(&cli.dir, &module, prompt.as_deref(), max_attempts).await,
    }
}

fn connect(workspace: &Path) -> Result<Arc<dyn ChatModel>> {
    let config = ModelConfig::load(workspace)?;
    let client = OpenAiCompatClient::from_config(&config)?;
    debug!(model = client.model_name(), "model client ready");
    Ok(Arc::new(client))
}

/// Pull a module directory out of free-form chat input: any path-looking
/// token that names a directory with a test oracle in it.
fn extract_module_path(input: &str, workspace: &Path) -> Option<PathBuf> {
    let token = Regex::new(r"[\w\-\./\\]+").expect("valid path token pattern");
    for m in token.find_iter(input) {
        let raw = Path::new(m.as_str());
        let candidate = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            workspace.join(raw)
        };
        if layout::is_module_dir(&candidate) {
            return Some(candidate);
        }
    }
    None
}

async fn chat(workspace: &Path, mode: AgentMode, max_attempts: u32) -> Result<()> {
    let model = connect(workspace)?;
    let approval = Arc::new(StdinApproval);
    let tools = ToolSet::new(workspace, approval.clone())?;
    let mut agent = Agent::new(Arc::clone(&model), tools, mode.system_prompt());

    println!(
        "{} workspace: {}  (exit/quit to leave)",
        "modforge".cyan().bold(),
        workspace.display()
    );

    let stdin = std::io::stdin();
    loop {
        print!("{} ", ">".green().bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        // Builder mode hands module requests to the supervisor; input that
        // names no module directory falls through to a plain turn.
        if mode == AgentMode::Builder {
            if let Some(module) = extract_module_path(input, workspace) {
                let supervisor = BuildSupervisor::new(
                    Arc::clone(&model),
                    Arc::new(PytestOracle::new()),
                    approval.clone(),
                    workspace,
                    BuildConfig { max_attempts },
                );
                let report = supervisor.run(&module, &base_prompt(&module, None)).await?;
                print_report(&module, &report);
                continue;
            }
        }

        let answer = agent.run(input).await?;
        println!("{answer}");
    }
    Ok(())
}

async fn build(
    workspace: &Path,
    module: &Path,
    prompt: Option<&str>,
    max_attempts: u32,
) -> Result<()> {
    // Validate the target before touching configuration so the failure
    // names the real problem.
    if !layout::is_module_dir(module) {
        return Err(ForgeError::not_found(format!(
            "{} (not a module directory: no {TEST_SPEC_FILE})",
            module.display()
        )));
    }

    let model = connect(workspace)?;
    let supervisor = BuildSupervisor::new(
        model,
        Arc::new(PytestOracle::new()),
        Arc::new(StdinApproval),
        workspace,
        BuildConfig { max_attempts },
    );

    let report = supervisor.run(module, &base_prompt(module, prompt)).await?;
    print_report(module, &report);
    report.into_result()
}

/// First-attempt instruction: the explicit prompt, else the module's
/// PROMPT.md, else a generic directive.
fn base_prompt(module: &Path, explicit: Option<&str>) -> String {
    if let Some(prompt) = explicit {
        return prompt.to_string();
    }
    if let Ok(brief) = std::fs::read_to_string(module.join(PROMPT_FILE)) {
        return format!(
            "Build the module in `{}` according to these instructions:\n\n{brief}",
            module.display()
        );
    }
    format!(
        "Build the module in `{}`: read its {PROMPT_FILE} and interface.py, then write \
implementation.py until test_spec.py passes.",
        module.display()
    )
}

fn print_report(module: &Path, report: &BuildReport) {
    let name = layout::module_name(module);
    for attempt in &report.attempts {
        let status = if attempt.success {
            "pass".green()
        } else {
            "fail".red()
        };
        println!("  attempt {}: {status}", attempt.index);
    }
    match &report.outcome {
        BuildOutcome::Success { attempts } => {
            println!(
                "{} module '{name}' built in {attempts} attempt(s)",
                "ok:".green().bold()
            );
        }
        BuildOutcome::Failed {
            attempts,
            last_output,
        } => {
            println!(
                "{} module '{name}' still failing after {attempts} attempt(s)",
                "failed:".red().bold()
            );
            println!("{last_output}");
        }
        BuildOutcome::Fatal { sentinel, reason } => {
            println!(
                "{} builder escalated with {} {reason}",
                "fatal:".red().bold(),
                sentinel.yellow()
            );
        }
    }
}
