// ABOUTME: Entry point for the slipway CLI application.
// ABOUTME: Wires collaborators, dispatches commands, maps outcomes to exit codes.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use slipway::attempt::DeploymentAttempt;
use slipway::backends::{
    AwsCli, Backends, DockerCli, HyperApiProbe, ShellRestore, TerraformCli, UnconfiguredApiProbe,
};
use slipway::config::{Config, Environment};
use slipway::deploy::{AbortFlag, DeployController, DeployError};
use slipway::error::Error;
use slipway::types::VersionTag;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    match cli.command {
        Commands::Deploy {
            environment,
            version,
        } => deploy(&environment, &version).await,
        Commands::Rollback { environment } => rollback(&environment).await,
        Commands::Validate { environment } => validate(&environment).await,
    }
}

async fn deploy(environment: &str, version: &str) -> i32 {
    let environment = match environment.parse::<Environment>() {
        Ok(environment) => environment,
        Err(e) => return fail_early(&e.to_string()),
    };

    let version = match VersionTag::parse(version) {
        Ok(version) => version,
        Err(e) => return fail_early(&format!("invalid version tag: {e}")),
    };

    let (controller, abort) = match build_controller(environment) {
        Ok(built) => built,
        Err(e) => return fail_early(&e.to_string()),
    };

    watch_for_abort(abort);

    println!("Deploying {environment} at {version}...");
    let (attempt, result) = controller.deploy(version).await;

    match result {
        Ok(()) => {
            println!(
                "Deployment succeeded: {} {} (correlation {})",
                attempt.environment, attempt.version, attempt.correlation_id
            );
            0
        }
        Err(error) => {
            print_failure(&error, &attempt);
            error.exit_code()
        }
    }
}

async fn rollback(environment: &str) -> i32 {
    let environment = match environment.parse::<Environment>() {
        Ok(environment) => environment,
        Err(e) => return fail_early(&e.to_string()),
    };

    let (controller, _abort) = match build_controller(environment) {
        Ok(built) => built,
        Err(e) => return fail_early(&e.to_string()),
    };

    println!("Rolling back {environment}...");
    let (attempt, result) = controller.rollback().await;

    match result {
        Ok(()) => {
            if let Some(attempt) = attempt {
                println!(
                    "Rollback succeeded for {} (correlation {})",
                    attempt.environment, attempt.correlation_id
                );
            }
            0
        }
        Err(error) => {
            match attempt {
                Some(attempt) => print_failure(&error, &attempt),
                None => eprintln!(
                    "Error: rollback failed ({} in {} phase): {error}",
                    error.kind(),
                    error.phase()
                ),
            }
            error.exit_code()
        }
    }
}

async fn validate(environment: &str) -> i32 {
    let environment = match environment.parse::<Environment>() {
        Ok(environment) => environment,
        Err(e) => return fail_early(&e.to_string()),
    };

    let (controller, _abort) = match build_controller(environment) {
        Ok(built) => built,
        Err(e) => return fail_early(&e.to_string()),
    };

    match controller.validate_only().await {
        Ok(()) => {
            println!("Pre-flight validation passed for {environment}");
            0
        }
        Err(error) => {
            eprintln!("Error: {error}");
            error.exit_code()
        }
    }
}

/// Discover config and wire the production collaborators.
fn build_controller(environment: Environment) -> Result<(DeployController, AbortFlag), Error> {
    let cwd = env::current_dir()?;
    let base_config = Config::discover(&cwd)?;
    let config = base_config.for_environment(environment);

    let region = config.region.resolve()?;
    let registry_host = config.registry.resolve()?;

    let docker = Arc::new(DockerCli::new());
    let aws = Arc::new(AwsCli::new(region, config.project.clone()));
    let terraform = Arc::new(TerraformCli::new(config.infra_dir.clone()));

    let api: Arc<dyn slipway::backends::ApiProbe> = match config.api_check.clone() {
        Some(api_check) => Arc::new(HyperApiProbe::new(api_check)),
        None => Arc::new(UnconfiguredApiProbe),
    };

    let backends = Backends {
        builder: docker.clone(),
        registry: docker,
        provisioner: terraform,
        orchestrator: aws.clone(),
        stores: aws.clone(),
        metrics: aws,
        api,
        restore: Arc::new(ShellRestore::new(config.restore_command.clone())),
    };

    let abort = AbortFlag::new();
    let controller = DeployController::new(
        base_config,
        environment,
        registry_host,
        backends,
        abort.clone(),
    )?;

    Ok((controller, abort))
}

/// Honor ctrl-c as an abort request. The controller only consults the flag
/// at phase boundaries before rollout; later signals are ignored.
fn watch_for_abort(abort: AbortFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Abort requested; stopping at the next phase boundary (pre-rollout only)");
            abort.trigger();
        }
    });
}

/// The single human-readable terminal summary: phase, bucket, correlation
/// id. Verbose detail lives in the audit log.
fn print_failure(error: &DeployError, attempt: &DeploymentAttempt) {
    eprintln!(
        "Error: deployment of {} {} failed in {} phase ({}): {error} [correlation {}]",
        attempt.environment,
        attempt.version,
        error.phase(),
        error.kind(),
        attempt.correlation_id
    );
}

fn fail_early(message: &str) -> i32 {
    eprintln!("Error: {message}");
    1
}
