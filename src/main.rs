use std::process::ExitCode;

use clap::Parser;

use holland_converge_lib::cli::{Action, Cli};
use holland_converge_lib::engine::{self, ConvergenceEngine, FailurePolicy};
use holland_converge_lib::holland::{self, HollandConfig};
use holland_converge_lib::host::LocalHost;
use holland_converge_lib::lock::RunLock;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let config = match HollandConfig::load_or_init(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!(target: "holland", "{e}");
            return ExitCode::FAILURE;
        }
    };

    let catalog = match holland::catalog(&config) {
        Ok(catalog) => catalog,
        Err(e) => {
            log::error!(target: "holland", "Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.action.unwrap_or_default() == Action::Plan {
        let plan = match engine::plan(&catalog.model, &catalog.graph) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!(target: "engine", "{e}");
                return ExitCode::FAILURE;
            }
        };
        for handle in plan.order {
            let resource = catalog.model.attributes_of(handle);
            if resource.refreshonly {
                println!("{} (refreshonly)", resource.id());
            } else {
                println!("{}", resource.id());
            }
        }
        return ExitCode::SUCCESS;
    }

    let dry_run = cli.dry_run;
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let _lock = match RunLock::acquire(&cli.lock_file) {
        Ok(lock) => lock,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let package_manager = cli.package_manager.unwrap_or(config.package_manager);
    let policy = if cli.keep_going {
        FailurePolicy::ContinueOnError
    } else {
        FailurePolicy::FailFast
    };
    let mut engine = ConvergenceEngine::new(LocalHost::new(cli.root, package_manager))
        .with_policy(policy)
        .with_dry_run(dry_run);

    let report = match engine.run(&catalog.model, &catalog.graph) {
        Ok(report) => report,
        Err(e) => {
            log::error!(target: "engine", "{e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("Serializing the report failed: {e}"),
        }
    } else {
        println!("{report}");
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
