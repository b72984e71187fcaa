use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use ui_pilot::automation::ProcessBackend;
use ui_pilot::config;
use ui_pilot::llm::{ChatCompletionsBackend, LlmConfig, SemanticBackend, check_health};
use ui_pilot::plan::{extract_expected_results, preview};
use ui_pilot::resolver::{GroundingResolver, ResolverConfig};
use ui_pilot::runner::{ExecutionRun, RunEngine, RunStatus, StepStatus};
use ui_pilot::session::SessionManager;
use ui_pilot::snapshot::parse_snapshot;
use ui_pilot::testcase::load_case;
use ui_pilot::verify::OutcomeVerifier;

/// UI Pilot - run natural-language UI test plans against a live browser
#[derive(Parser, Debug)]
#[command(
    name = "ui-pilot",
    about = "Grounded execution of natural-language UI test plans",
    after_help = "ENVIRONMENT VARIABLES:\n\
        UI_PILOT_LLM_ENDPOINT      Chat-completions endpoint URL\n\
        UI_PILOT_LLM_MODEL         Model name\n\
        UI_PILOT_LLM_API_KEY       Bearer token for the endpoint\n\
        UI_PILOT_DRIVER            Automation driver command line\n\
        UI_PILOT_MAX_STEPS         Step budget per run\n\
        RUST_LOG                   Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a test case against the automation driver
    Run {
        /// Test case file (.json, .md or .txt)
        #[arg(short, long)]
        case: PathBuf,

        /// Driver command line (program and arguments)
        #[arg(long, env = "UI_PILOT_DRIVER")]
        driver: Option<String>,

        /// Resolve with rules only, never calling the semantic backend
        #[arg(long)]
        no_llm: bool,

        /// Semantic backend endpoint URL
        #[arg(long, env = "UI_PILOT_LLM_ENDPOINT")]
        llm_endpoint: Option<String>,

        /// Semantic backend model name
        #[arg(long, env = "UI_PILOT_LLM_MODEL")]
        llm_model: Option<String>,

        /// Step budget for this run
        #[arg(long)]
        max_steps: Option<usize>,

        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,

        /// Write the run report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the instructions a test case yields without executing anything
    Steps {
        #[arg(short, long)]
        case: PathBuf,
    },

    /// Resolve one instruction and print the command as JSON
    Resolve {
        #[arg(short, long)]
        instruction: String,

        /// Snapshot file (aria text or JSON) to ground against
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        #[arg(long)]
        no_llm: bool,

        #[arg(long, env = "UI_PILOT_LLM_ENDPOINT")]
        llm_endpoint: Option<String>,

        #[arg(long, env = "UI_PILOT_LLM_MODEL")]
        llm_model: Option<String>,
    },

    /// Re-score expected results against a saved run report
    Verify {
        /// Expected results; defaults to those stored in the report
        #[arg(short, long)]
        expected: Vec<String>,

        /// Run report written by `run --output`
        #[arg(short, long)]
        run: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            case,
            driver,
            no_llm,
            llm_endpoint,
            llm_model,
            max_steps,
            json,
            output,
        }) => {
            let case = load_case(&case)?;
            let mut request = case.clone().into_request();
            request.max_steps = max_steps;

            let command_line = driver.unwrap_or_else(config::driver_command);
            let backend = ProcessBackend::from_command_line(&command_line)
                .ok_or_else(|| format!("Invalid driver command '{}'", command_line))?;
            let sessions = SessionManager::new(Arc::new(backend));
            let resolver = build_resolver(no_llm, llm_endpoint, llm_model, json).await?;

            let engine = RunEngine::new(sessions, resolver);
            let run = engine.run(request).await?;

            if let Some(path) = &output {
                std::fs::write(path, serde_json::to_string_pretty(&run)?)?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_run(&case.name, &run);
                if let Some(path) = &output {
                    println!("\nReport: {}", path.display());
                }
            }
            if run.status != RunStatus::Completed {
                std::process::exit(1);
            }
        }

        Some(Commands::Steps { case }) => {
            let case = load_case(&case)?;
            let plan = case.plan();
            let (steps, skipped) = preview(&plan, config::get().engine.max_steps)?;

            println!("{}: {} steps", case.name, steps.len());
            for (i, step) in steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
            if !skipped.is_empty() {
                println!("Skipped:");
                for line in &skipped {
                    let tag = if line.assertion { "verification" } else { "other" };
                    println!("  [{}] {}", tag, line.text);
                }
            }
            let mut expected = case.expected();
            if expected.is_empty() {
                expected = extract_expected_results(&plan);
            }
            if !expected.is_empty() {
                println!("Expected results:");
                for item in &expected {
                    println!("  - {}", item);
                }
            }
        }

        Some(Commands::Resolve {
            instruction,
            snapshot,
            no_llm,
            llm_endpoint,
            llm_model,
        }) => {
            let snapshot = match snapshot {
                Some(path) => Some(parse_snapshot(&std::fs::read_to_string(&path)?)?),
                None => None,
            };
            let resolver = build_resolver(no_llm, llm_endpoint, llm_model, true).await?;
            let resolution = resolver.resolve(&instruction, snapshot.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }

        Some(Commands::Verify { expected, run }) => {
            let report: ExecutionRun = serde_json::from_str(&std::fs::read_to_string(&run)?)?;
            let expected = if expected.is_empty() { report.expected_results.clone() } else { expected };
            let checks = OutcomeVerifier::default().verify(&expected, &report.trace);
            println!("{}", serde_json::to_string_pretty(&checks)?);
        }

        None => {
            println!("UI Pilot - grounded execution of natural-language UI test plans");
            println!();
            println!("Usage: ui-pilot <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run      Execute a test case against the automation driver");
            println!("  steps    List the instructions a test case yields");
            println!("  resolve  Resolve one instruction to a command");
            println!("  verify   Re-score expected results against a saved run");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

/// Resolver with a semantic backend when one is requested and responding
async fn build_resolver(
    no_llm: bool,
    endpoint: Option<String>,
    model: Option<String>,
    quiet: bool,
) -> Result<GroundingResolver, Box<dyn Error>> {
    if no_llm {
        return Ok(GroundingResolver::heuristic_only());
    }
    let endpoint = endpoint.unwrap_or_else(config::llm_endpoint);
    match check_health(&endpoint, Duration::from_secs(5)).await {
        Ok(true) => {
            if !quiet {
                eprintln!("Semantic backend responding at {}", endpoint);
            }
        }
        Ok(false) | Err(_) => {
            eprintln!("Warning: semantic backend not responding at {}", endpoint);
            eprintln!("Resolving with rules only.");
            return Ok(GroundingResolver::heuristic_only());
        }
    }

    let mut llm = LlmConfig::new(&endpoint);
    if let Some(model) = model {
        llm = llm.model(model);
    }
    let backend: Arc<dyn SemanticBackend> = Arc::new(ChatCompletionsBackend::new(llm)?);
    Ok(GroundingResolver::new(Some(backend), ResolverConfig::default()))
}

fn print_run(name: &str, run: &ExecutionRun) {
    let summary = run.summary();
    println!("{} [{:?}]: {}/{} steps succeeded", name, summary.status, summary.succeeded, summary.total_steps);
    for step in &run.steps {
        let mark = match step.status {
            StepStatus::Success => "ok",
            StepStatus::Failed => "FAILED",
            _ => "..",
        };
        let retries = if step.retry_count > 0 {
            format!(" (retries: {})", step.retry_count)
        } else {
            String::new()
        };
        println!("  {}. [{}] {}{}", step.order, mark, step.raw_text, retries);
        if let Some(error) = &step.error {
            println!("       {}", error);
        }
    }
    if !run.checks.is_empty() {
        println!("Expected results:");
        for check in &run.checks {
            let mark = if check.matched { "ok" } else { "MISSING" };
            println!("  [{}] {} ({:?})", mark, check.expected, check.match_type);
        }
    }
    if let Some(error) = &run.error {
        println!("Run error: {}", error);
    }
}
