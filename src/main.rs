use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use dummy_participant::{
    datatypes::ParticipantIdentity, participant::DummyParticipant,
    precice_session::PreciceSession,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Dummy coupling participant answering Force with Stress",
    long_about = None
)]
struct Cli {
    #[arg(long, default_value = "dummy", help = "Participant name in the coupling configuration")]
    participant: String,

    #[arg(
        long,
        value_name = "FILE",
        default_value = "cavity/precice-config.xml",
        help = "Path to the preCICE configuration"
    )]
    config: PathBuf,

    #[arg(long, default_value = "Cavity-Mesh", help = "Coupling mesh to exchange data on")]
    mesh: String,

    #[arg(long, default_value_t = 0, help = "Process index of this participant")]
    rank: usize,

    #[arg(long, default_value_t = 1, help = "Process group size of this participant")]
    size: usize,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .context("failed to install the log subscriber")
}

fn run(cli: Cli) -> Result<()> {
    let identity = ParticipantIdentity {
        name: cli.participant.clone(),
        rank: cli.rank,
        size: cli.size,
    };

    let mut session = PreciceSession::create(&identity, &cli.config).with_context(|| {
        format!(
            "failed to join coupling as {} using {}",
            cli.participant,
            cli.config.display()
        )
    })?;

    let participant = DummyParticipant::new(&cli.mesh);
    let summary = participant
        .run(&mut session)
        .with_context(|| format!("participant {} aborted", cli.participant))?;

    info!(
        mesh = participant.mesh_name(),
        advances = summary.advances,
        exchanges = summary.exchanges,
        empty_steps = summary.empty_steps,
        checkpoint_reads = summary.checkpoint_reads,
        checkpoint_writes = summary.checkpoint_writes,
        "dummy solver completed"
    );

    Ok(())
}

fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
