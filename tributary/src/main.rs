use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::{
    dev::DevArgs,
    error::{CliError, Result},
    generate::GenerateArgs,
    inspect::InspectArgs,
};

mod dev;
mod error;
mod generate;
mod inspect;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(about = "Tributary CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the generator and the pipeline until interrupted
    Dev {
        #[clap(flatten)]
        inner: DevArgs,
    },
    /// Print generated records as JSON lines
    Generate {
        #[clap(flatten)]
        inner: GenerateArgs,
    },
    /// Print the rows of a committed block as JSON lines
    Inspect {
        #[clap(flatten)]
        inner: InspectArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match run(cli.command, ct).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit_with(err),
    }
}

async fn run(command: Commands, ct: CancellationToken) -> Result<()> {
    match command {
        Commands::Dev { inner } => inner.run(ct).await,
        Commands::Generate { inner } => inner.run(),
        Commands::Inspect { inner } => inner.run(),
    }
}

fn exit_with(err: CliError) -> ExitCode {
    let code = err.kind().exit_code();
    eprintln!("{}", snafu::Report::from_error(err));
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
