//! ST-017: CLI subcommands — init, validate, synth, diff, verify, list, schema.

use crate::core::env::Environment;
use crate::core::{parser, planner, state, synth, types};
use crate::tripwire::drift;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stratus project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stratus.yaml (no account/region needed)
    Validate {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,
    },

    /// Synthesize templates and the assembly manifest
    Synth {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "stratus.out")]
        output: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show what would change relative to the last synthesized manifest
    Diff {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,

        /// Output directory holding the previous manifest
        #[arg(short, long, default_value = "stratus.out")]
        output: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Detect templates modified or removed since synthesis
    Verify {
        /// Output directory
        #[arg(short, long, default_value = "stratus.out")]
        output: PathBuf,
    },

    /// List stacks in deployment order
    List {
        /// Path to stratus.yaml
        #[arg(short, long, default_value = "stratus.yaml")]
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the JSON Schema of stratus.yaml
    Schema,
}

/// Deployment target overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Target account (default: $CDK_DEFAULT_ACCOUNT)
    #[arg(long)]
    pub account: Option<String>,

    /// Target region (default: $CDK_DEFAULT_REGION)
    #[arg(long)]
    pub region: Option<String>,
}

impl TargetArgs {
    fn resolve(&self) -> Result<Environment, String> {
        Environment::resolve(self.account.as_deref(), self.region.as_deref())
            .map_err(|e| e.to_string())
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth {
            file,
            output,
            target,
        } => cmd_synth(&file, &output, &target),
        Commands::Diff {
            file,
            output,
            target,
        } => cmd_diff(&file, &output, &target),
        Commands::Verify { output } => cmd_verify(&output),
        Commands::List { file, target } => cmd_list(&file, &target),
        Commands::Schema => cmd_schema(),
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: my-app
description: "Managed by stratus"

params: {}

network:
  cidr: 10.0.0.0/16
  max_azs: 2
  subnets:
    - { name: public, kind: public, cidr_mask: 24 }
    - { name: isolated, kind: isolated, cidr_mask: 24 }
  endpoints: [s3, ecr, ecr_docker, secrets_manager, cloudwatch_logs]

database:
  name: app_db
  engine: aurora_mysql
  min_capacity: 1
  max_capacity: 2
  auto_pause_minutes: 60
  backup_retention_days: 1

secrets:
  app_key: SECRET_KEY
  external: {}

service:
  cpu: 256
  memory_mib: 512
  desired_count: 2
  min_capacity: 1
  max_capacity: 2
  container_port: 8000
  health_check: { path: /health_check/, healthy_threshold: 3, unhealthy_threshold: 2 }
  cpu_target_percent: 75
  image: { asset: { directory: app/, dockerfile: Dockerfile } }
"#;

const INIT_DOCKERFILE: &str = "FROM public.ecr.aws/docker/library/python:3.12-slim\n\
WORKDIR /app\n\
COPY . .\n\
EXPOSE 8000\n\
CMD [\"python\", \"-m\", \"http.server\", \"8000\"]\n";

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("stratus.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let app_dir = path.join("app");
    std::fs::create_dir_all(&app_dir).map_err(|e| format!("cannot create app dir: {}", e))?;
    let dockerfile = app_dir.join("Dockerfile");
    if !dockerfile.exists() {
        std::fs::write(&dockerfile, INIT_DOCKERFILE)
            .map_err(|e| format!("cannot write {}: {}", dockerfile.display(), e))?;
    }

    std::fs::write(&config_path, INIT_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stratus project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", app_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} ({} subnet groups x {} AZs, {} mapped secrets)",
            config.name,
            config.network.subnets.len(),
            config.network.max_azs,
            parser::REQUIRED_DB_SECRET_KEYS.len() + 1 + config.secrets.external.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse the config and synthesize it for the resolved target.
fn synthesize_file(file: &Path, target: &TargetArgs) -> Result<types::CloudAssembly, String> {
    let config = parser::parse_config_file(file)?;
    let env = target.resolve()?;
    let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
    synth::synthesize(&config, &env, base_dir)
}

fn cmd_synth(file: &Path, output: &Path, target: &TargetArgs) -> Result<(), String> {
    let assembly = synthesize_file(file, target)?;
    let manifest = state::write_assembly(output, &assembly)?;

    println!(
        "Synthesized {} for {}/{}",
        manifest.name, manifest.account, manifest.region
    );
    for name in &manifest.order {
        let entry = &manifest.stacks[name];
        println!(
            "  {} ({} resources)",
            output.join(&entry.template).display(),
            entry.resources.len()
        );
    }
    for asset in &manifest.assets {
        println!("  asset {} → {}", asset.directory, asset.image_uri);
    }
    println!("Fingerprint: {}", manifest.fingerprint);
    Ok(())
}

fn cmd_diff(file: &Path, output: &Path, target: &TargetArgs) -> Result<(), String> {
    let assembly = synthesize_file(file, target)?;
    let previous = state::load_manifest(output)?;
    let plan = planner::plan(&assembly, previous.as_ref())?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ChangePlan) {
    println!("Diff: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    let mut current_stack = String::new();
    for change in &plan.changes {
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            println!("{}:", current_stack);
        }
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Diff: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_verify(output: &Path) -> Result<(), String> {
    let manifest = state::load_manifest(output)?.ok_or_else(|| {
        format!(
            "no manifest in {}. Run `stratus synth` first.",
            output.display()
        )
    })?;

    println!(
        "Checking {} ({} templates)...",
        manifest.name,
        manifest.stacks.len()
    );
    let findings = drift::detect_drift(output, &manifest);
    if findings.is_empty() {
        println!("No drift detected.");
        return Ok(());
    }

    for f in &findings {
        println!("  DRIFTED: {} ({})", f.stack, f.detail);
        println!("    Expected: {}", f.expected_hash);
        println!("    Actual:   {}", f.actual_hash);
    }
    println!();
    println!("Drift detected: {} template(s)", findings.len());
    Err(format!("{} drift finding(s)", findings.len()))
}

fn cmd_list(file: &Path, target: &TargetArgs) -> Result<(), String> {
    let assembly = synthesize_file(file, target)?;
    println!(
        "{} ({}/{})",
        assembly.name, assembly.environment.account, assembly.environment.region
    );
    for (i, name) in assembly.order.iter().enumerate() {
        let Some(stack) = assembly.stacks.get(name) else {
            continue;
        };
        let deps = if stack.dependencies.is_empty() {
            String::new()
        } else {
            format!(" (after {})", stack.dependencies.join(", "))
        };
        println!(
            "  {}. {}-{}: {} resources, {} outputs{}",
            i + 1,
            assembly.name,
            name,
            stack.resources.len(),
            stack.outputs.len(),
            deps
        );
    }
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    println!("{}", schema_json()?);
    Ok(())
}

/// JSON Schema of the config file.
pub fn schema_json() -> Result<String, String> {
    let schema = schemars::schema_for!(types::StratusConfig);
    serde_json::to_string_pretty(&schema).map_err(|e| format!("cannot render schema: {}", e))
}
