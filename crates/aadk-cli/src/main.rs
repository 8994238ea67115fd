use std::{path::PathBuf, process::ExitCode, sync::Arc};

use aadk_deploy::{
    AdbClient, AvdEmulator, BuildType, DeployConfig, EmulatorManager, PackageType, RunCoordinator,
    RunOptions, SystemAdb, TargetCatalog,
};
use clap::{Args, Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "aadk-deploy", version, about = "Deploy Android builds to devices and emulators")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Install and launch the project's app on a device or emulator
    Run(RunArgs),
    /// List reachable targets
    Targets,
    /// List emulator images
    Images,
}

#[derive(Args)]
struct RunArgs {
    /// Gradle project directory
    #[arg(long, default_value = ".")]
    project: PathBuf,
    /// Device serial, emulator id or emulator image name
    #[arg(long, conflicts_with_all = ["device", "emulator"])]
    target: Option<String>,
    /// Only deploy to a physical device
    #[arg(long, conflicts_with = "emulator")]
    device: bool,
    /// Only deploy to an emulator, starting one when none is running
    #[arg(long)]
    emulator: bool,
    /// Deploy the debug variant (default)
    #[arg(long, conflicts_with = "release")]
    debug: bool,
    #[arg(long)]
    release: bool,
    /// apk or bundle
    #[arg(long, default_value = "apk")]
    package_type: PackageType,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            target: self.target.clone(),
            device: self.device,
            emulator: self.emulator,
            build_type: if self.release && !self.debug {
                BuildType::Release
            } else {
                BuildType::Debug
            },
            package_type: self.package_type,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = aadk_util::init_tracing() {
        eprintln!("failed to initialise logging: {err}");
    }

    match dispatch(cli.cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cmd: Cmd) -> aadk_deploy::Result<()> {
    let config = DeployConfig::load()?;
    match cmd {
        Cmd::Run(args) => {
            let coordinator = RunCoordinator::for_project(&args.project, &config)?;
            let resolved = coordinator.run(&args.options()).await?;
            info!("deployed {} to {}", args.project.display(), resolved.id());
        }
        Cmd::Targets => {
            let catalog = TargetCatalog::new(Arc::new(SystemAdb::from_env()));
            for target in catalog.list().await? {
                println!("{}\t{}", target.id, target.kind);
            }
        }
        Cmd::Images => {
            let adb: Arc<dyn AdbClient> = Arc::new(SystemAdb::from_env());
            let emulators = AvdEmulator::from_env(adb, config.emulator_timeouts());
            for image in emulators.list_images().await? {
                let api = image
                    .api_level
                    .map(|level| level.to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{}\t{}", image.name, api);
            }
        }
    }
    Ok(())
}
