//! Ringmesh - multi-ring routing simulation
//!
//! Runs pre-built scenarios against the real routing engine over simulated
//! UDP, HTTP and WWW transports.

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ringmesh_simulation::{ChaosConfig, ScenarioReport, scenarios};

#[derive(Parser)]
#[command(
    name = "ringmesh-sim",
    about = "Multi-ring overlay routing simulation",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver to a peer on the same ring
    SameRing,

    /// Deliver into a foreign ring through an HTTP-reachable relay
    RingRelay,

    /// Flood to a destination the sender does not know
    Flood,

    /// Broadcast to the whole cloud across several rings
    CloudBroadcast {
        /// Number of rings
        #[arg(short, long, default_value = "3")]
        rings: u8,

        /// Agents per ring
        #[arg(short, long, default_value = "3")]
        per_ring: usize,
    },

    /// Random traffic with packet loss
    Chaos {
        /// Number of agents
        #[arg(short, long, default_value = "12")]
        nodes: usize,

        /// Number of rings
        #[arg(short, long, default_value = "3")]
        rings: u8,

        /// Messages to send
        #[arg(short, long, default_value = "40")]
        messages: usize,

        /// Probability that a single delivery is lost
        #[arg(short, long, default_value = "0.1")]
        loss: f64,

        /// Also relay through the WWW gateway
        #[arg(short, long)]
        www: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let report: ScenarioReport = match cli.command {
        Commands::SameRing => scenarios::run_same_ring().await?,
        Commands::RingRelay => scenarios::run_ring_relay().await?,
        Commands::Flood => scenarios::run_flood().await?,
        Commands::CloudBroadcast { rings, per_ring } => {
            scenarios::run_cloud_broadcast(rings, per_ring).await?
        }
        Commands::Chaos {
            nodes,
            rings,
            messages,
            loss,
            www,
        } => {
            scenarios::run_chaos(ChaosConfig {
                nodes,
                rings,
                messages,
                loss_rate: loss,
                www,
                ..Default::default()
            })
            .await?
        }
    };

    println!("{report}");
    Ok(())
}
