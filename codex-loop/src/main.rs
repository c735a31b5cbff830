//! `codex-loop`: run the `codex` agent in unattended rounds over a plan file.
//!
//! Configuration lives in `.codex-loop/config.toml`; the plan, run log and
//! response artifacts live in the workspace itself.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use codex_loop::exit_codes;
use codex_loop::io::config::{DEFAULT_CONFIG_PATH, LoopConfig, load_config};
use codex_loop::io::executor::{AgentSettings, CodexExecutor, resolve_program};
use codex_loop::io::init::{InitOptions, init_workspace};
use codex_loop::io::paths::{LoopPaths, resolve_in};
use codex_loop::io::plan::{PlanFile, ensure_plan_file};
use codex_loop::io::ports::SystemPortInspector;
use codex_loop::io::run_log::RunLog;
use codex_loop::iteration::RunState;
use codex_loop::logging;
use codex_loop::looping::{LoopStop, run_loop};

#[derive(Parser)]
#[command(
    name = "codex-loop",
    version,
    about = "Run the codex agent in unattended rounds over a plan file"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the plan template, a default config and the memory directory.
    Init {
        /// Workspace root (defaults to the current directory).
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run iterations against the workspace plan.
    Run(RunArgs),
}

#[derive(Debug, Default, clap::Args)]
struct RunArgs {
    /// Workspace root (defaults to the current directory).
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// Config file, relative to the workspace.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    iterations: Option<u32>,
    /// Keep iterating until an iteration fails.
    #[arg(long)]
    forever: bool,
    /// Echo the agent's output to the console.
    #[arg(long)]
    show_output: bool,
    /// Consume the agent's JSON event stream.
    #[arg(long)]
    json: bool,
    #[arg(long)]
    continue_on_error: bool,
    /// Terminate allow-listed processes holding reserved ports.
    #[arg(long)]
    kill_on_port_conflict: bool,
    #[arg(long)]
    no_auto_decide: bool,
    #[arg(long)]
    no_auto_repair: bool,
}

impl RunArgs {
    /// Flags win over the config file; absent flags leave it untouched.
    fn apply(&self, cfg: &mut LoopConfig) {
        if let Some(iterations) = self.iterations {
            cfg.iterations = iterations;
        }
        cfg.forever |= self.forever;
        cfg.agent.show_output |= self.show_output;
        cfg.agent.json_events |= self.json;
        cfg.continue_on_error |= self.continue_on_error;
        cfg.ports.kill_on_conflict |= self.kill_on_port_conflict;
        if self.no_auto_decide {
            cfg.auto_decide = false;
        }
        if self.no_auto_repair {
            cfg.auto_repair = false;
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { workspace, force } => cmd_init(workspace, force),
        Command::Run(args) => cmd_run(&args),
    }
}

fn workspace_root(workspace: Option<PathBuf>) -> Result<PathBuf> {
    let root = match workspace {
        Some(path) => path,
        None => env::current_dir().context("resolve current directory")?,
    };
    if !root.is_dir() {
        return Err(anyhow!("workspace {} is not a directory", root.display()));
    }
    root.canonicalize()
        .with_context(|| format!("resolve workspace {}", root.display()))
}

fn cmd_init(workspace: Option<PathBuf>, force: bool) -> Result<i32> {
    let root = workspace_root(workspace)?;
    let report = init_workspace(&root, &InitOptions { force })?;
    println!("Wrote {}", report.config_path.display());
    println!("Wrote {}", report.plan_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let root = workspace_root(args.workspace.clone())?;
    let config_path = match &args.config {
        Some(path) => resolve_in(&root, &path.to_string_lossy()),
        None => root.join(DEFAULT_CONFIG_PATH),
    };
    let mut cfg = load_config(&config_path)?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let paths = LoopPaths::new(&root, &cfg);
    if ensure_plan_file(&paths.plan)? == PlanFile::Created {
        println!(
            "Created plan template at {}. Edit it, then run again.",
            paths.plan.display()
        );
        return Ok(exit_codes::INVALID);
    }

    let program = resolve_program(&cfg.agent.program)?;
    if cfg.agent.resume_last && cfg.json_enabled() {
        println!("NOTE: resume mode does not support JSON events; using plain output.");
    }

    let log = RunLog::open(&paths.log)?.with_console(true);
    let settings = AgentSettings::from_config(&cfg, &paths, program);
    let executor = CodexExecutor::new(settings);
    let mut state = RunState::load(cfg, paths, &log);

    let outcome = run_loop(&mut state, &executor, &SystemPortInspector, &log, |it| {
        println!(
            "Iteration {} finished (exit {}): {}",
            it.index, it.exit_code, it.summary
        );
    })?;

    Ok(match outcome.stop {
        LoopStop::Completed => exit_codes::OK,
        LoopStop::Failed { index, exit_code } => {
            eprintln!("Iteration {index} failed with exit code {exit_code}; stopping.");
            exit_codes::STOPPED
        }
    })
}
