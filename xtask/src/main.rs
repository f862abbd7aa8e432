use std::fs;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the route sync workspace",
    long_about = "A unified CLI for CI checks, module declaration validation,\n\
                  and running route syncs against the shared API."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests, declaration validation)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Validate every modules/<name>/config.json without calling AWS
    ValidateModules {
        #[arg(long, default_value = "modules")]
        modules_dir: PathBuf,
    },
    /// Reconcile one module's routes into the shared API
    Sync {
        /// Module to reconcile
        module: String,
        #[arg(long, env = "STAGE", default_value = "prod")]
        stage: String,
        /// Print the plan without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Deploy the stage even when nothing changed
        #[arg(long)]
        force_deploy: bool,
        /// Build profile used for the route_sync binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Debug)]
        profile: BuildProfile,
    },
    /// Build the route_sync binary for CI runners
    Build {
        /// Compilation target triple
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Validate module declarations
    Modules,
    /// Run check + modules
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn route_sync_args<'a>(profile: BuildProfile, args: &[&'a str]) -> Vec<&'a str> {
    let mut cargo_args = vec!["run", "-p", "route_sync_aws", "--bin", "route_sync"];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    cargo_args.push("--");
    cargo_args.extend_from_slice(args);
    cargo_args
}

/// Module names with a declaration file, sorted.
fn declared_modules(modules_dir: &Path) -> Vec<String> {
    let entries = fs::read_dir(modules_dir).unwrap_or_else(|error| {
        panic!(
            "failed to read modules directory '{}': {error}",
            modules_dir.display()
        )
    });
    let mut modules: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().join("config.json").is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    modules.sort();
    modules
}

fn validate_modules(modules_dir: &Path) {
    let modules = declared_modules(modules_dir);
    if modules.is_empty() {
        eprintln!("warning: no module declarations under '{}'", modules_dir.display());
        return;
    }

    let dir = modules_dir.to_string_lossy().into_owned();
    let mut failed = Vec::new();
    for module in &modules {
        step(&format!("Validate {module}"));
        let status = cargo(&route_sync_args(
            BuildProfile::Debug,
            &["--module", module.as_str(), "--modules-dir", dir.as_str(), "--validate-only"],
        ));
        if !status.success() {
            failed.push(module.clone());
        }
    }

    if !failed.is_empty() {
        eprintln!("\ninvalid declarations: {}", failed.join(", "));
        exit(1);
    }
    eprintln!("\nvalidated {} module declarations", modules.len());
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test route_sync_core");
    run_cargo(&["test", "-p", "route_sync_core"]);

    step("Test route_sync_aws");
    run_cargo(&["test", "-p", "route_sync_aws"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => match job {
            CiJob::Check => ci_check(),
            CiJob::Modules => validate_modules(Path::new("modules")),
            CiJob::All => {
                ci_check();
                validate_modules(Path::new("modules"));
            }
        },
        Commands::ValidateModules { modules_dir } => validate_modules(&modules_dir),
        Commands::Sync {
            module,
            stage,
            dry_run,
            force_deploy,
            profile,
        } => {
            let mut args = vec!["--module", module.as_str(), "--stage", stage.as_str()];
            if dry_run {
                args.push("--dry-run");
            }
            if force_deploy {
                args.push("--force-deploy");
            }
            let status = cargo(&route_sync_args(profile, &args));
            exit(status.code().unwrap_or(1));
        }
        Commands::Build { target, profile } => {
            step("Build route_sync");
            let mut cargo_args = vec![
                "build",
                "-p",
                "route_sync_aws",
                "--bin",
                "route_sync",
                "--target",
                target.as_str(),
            ];
            if let Some(flag) = profile.as_cargo_flag() {
                cargo_args.push(flag);
            }
            run_cargo(&cargo_args);
        }
    }
}
