// Copyright (c) 2024 Botho Foundation

//! CLI tool for inspecting the entity graph of a simulated fleet.
//!
//! The tool starts a number of participants on an in-process membership bus,
//! gives each a small workload of nodes, publishers, subscriptions and
//! services, waits for the graph to converge and prints what an observer
//! participant has learned.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use rgraph_common::{EntityId, GID_STORAGE_SIZE};
use rgraph_discovery::{
    DiscoveryConfig, DiscoveryContext, EndpointInfo, LoopbackBus, NamesAndTypes, NodeName,
};
use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rgraph-discover")]
#[command(about = "Inspect the entity graph of a simulated fleet")]
#[command(version)]
struct Cli {
    /// Number of simulated participants, besides the observer
    #[arg(short, long, default_value = "3", env = "RGRAPH_PARTICIPANTS")]
    participants: usize,

    /// Discovery config file (TOML)
    #[arg(short, long, env = "RGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Output format: table or json
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Seconds to wait for the graph to converge
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    /// Seed for participant ids, for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List topics and their types
    Topics {
        /// Show raw middleware names instead of demangled ones
        #[arg(long)]
        no_demangle: bool,
    },

    /// List services and their types
    Services,

    /// List nodes
    Nodes,

    /// Dump the observer's whole graph cache
    Graph,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_ref())?;
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let fleet = SimulatedFleet::start(&config, cli.participants, &mut rng)?;
    if !fleet.wait_converged(Duration::from_secs(cli.timeout)) {
        warn!(
            timeout_secs = cli.timeout,
            "Graph did not converge, output may be incomplete"
        );
    }

    let result = match cli.command {
        Commands::Topics { no_demangle } => run_topics_command(&fleet, !no_demangle, &cli.format),
        Commands::Services => run_services_command(&fleet, &cli.format),
        Commands::Nodes => run_nodes_command(&fleet, &cli.format),
        Commands::Graph => {
            println!("{}", fleet.observer().cache());
            Ok(())
        }
    };

    fleet.shutdown()?;
    result
}

fn load_config(path: Option<&PathBuf>) -> Result<DiscoveryConfig> {
    let Some(path) = path else {
        return Ok(DiscoveryConfig::default());
    };
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = DiscoveryConfig::from_toml_str(&src)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    info!(path = %path.display(), "Loaded discovery config");
    Ok(config)
}

fn random_entity_id(rng: &mut impl RngCore) -> EntityId {
    let mut bytes = [0u8; GID_STORAGE_SIZE];
    rng.fill_bytes(&mut bytes);
    EntityId::from_bytes(bytes)
}

/// Participants sharing one bus. The last one is the observer and owns no
/// nodes, so everything it lists was learned through discovery.
struct SimulatedFleet {
    contexts: Vec<DiscoveryContext>,
}

impl SimulatedFleet {
    fn start(config: &DiscoveryConfig, participants: usize, rng: &mut impl RngCore) -> Result<Self> {
        let bus = LoopbackBus::new(config);
        let mut contexts = Vec::with_capacity(participants + 1);
        for _ in 0..=participants {
            let context = DiscoveryContext::init(
                config.clone(),
                random_entity_id(rng),
                Arc::new(bus.endpoint()),
            )
            .context("Failed to start participant")?;
            contexts.push(context);
        }

        let fleet = Self { contexts };
        let mut endpoints = Vec::new();
        for (index, context) in fleet.contexts[..participants].iter().enumerate() {
            endpoints.extend(add_workload(context, index)?);
        }
        for info in &endpoints {
            fleet.announce_endpoint(info);
        }

        info!(
            topic = bus.topic(),
            participants,
            endpoints = endpoints.len(),
            "Simulated fleet started"
        );
        Ok(fleet)
    }

    fn observer(&self) -> &DiscoveryContext {
        // `start` always creates the observer
        &self.contexts[self.contexts.len() - 1]
    }

    // Stands in for endpoint discovery.
    fn announce_endpoint(&self, info: &EndpointInfo) {
        for context in &self.contexts {
            if context.local_id() != info.participant {
                context.cache().add_endpoint(info.clone());
            }
        }
    }

    fn wait_converged(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let nodes = self.observer().query().list_nodes();
            let converged = self.contexts.iter().all(|context| {
                context.cache().participant_count() == self.contexts.len()
                    && context.query().list_nodes() == nodes
            });
            if converged {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn shutdown(self) -> Result<()> {
        for context in self.contexts {
            context.shutdown().context("Failed to stop participant")?;
        }
        Ok(())
    }
}

/// Give participant `index` one of three roles and return the endpoints it
/// created.
fn add_workload(context: &DiscoveryContext, index: usize) -> Result<Vec<EndpointInfo>> {
    let endpoints = match index % 3 {
        0 => {
            let node = format!("talker_{index}");
            context.create_node(&node, "/")?;
            vec![context.add_publisher(&node, "/", "/chatter", "std_msgs/msg/String")?]
        }
        1 => {
            let node = format!("listener_{index}");
            context.create_node(&node, "/demo")?;
            vec![context.add_subscription(&node, "/demo", "/chatter", "std_msgs/msg/String")?]
        }
        _ => {
            let node = format!("adder_{index}");
            context.create_node(&node, "/")?;
            let mut endpoints = context
                .add_service_server(&node, "/", "/add_two_ints", "example_interfaces/srv/AddTwoInts")?
                .to_vec();
            endpoints.push(context.add_publisher(
                &node,
                "/",
                "/rosout",
                "rcl_interfaces/msg/Log",
            )?);
            endpoints
        }
    };
    Ok(endpoints)
}

fn print_names_and_types(title: &str, listing: &NamesAndTypes, format: &str) -> Result<()> {
    match format.to_lowercase().as_str() {
        "table" => {
            println!("\n{title} ({}):\n", listing.len());
            for (name, types) in listing.iter() {
                let types: Vec<&str> = types.iter().map(String::as_str).collect();
                println!("  {name} [{}]", types.join(", "));
            }
        }
        "json" => println!("{}", serde_json::to_string_pretty(listing)?),
        _ => anyhow::bail!("Unknown format: {}", format),
    }
    Ok(())
}

fn run_topics_command(fleet: &SimulatedFleet, demangle: bool, format: &str) -> Result<()> {
    let query = fleet.observer().query();
    let mut topics = query.names_and_types();
    query
        .list_topics(demangle, &mut topics)
        .context("Failed to list topics")?;
    print_names_and_types("Topics", &topics, format)
}

fn run_services_command(fleet: &SimulatedFleet, format: &str) -> Result<()> {
    let query = fleet.observer().query();
    let mut services = query.names_and_types();
    query
        .list_services(&mut services)
        .context("Failed to list services")?;
    print_names_and_types("Services", &services, format)
}

#[derive(serde::Serialize)]
struct NodeOutput {
    name: String,
    namespace: String,
    fully_qualified: String,
}

fn run_nodes_command(fleet: &SimulatedFleet, format: &str) -> Result<()> {
    let nodes: Vec<NodeName> = fleet.observer().query().list_nodes();

    match format.to_lowercase().as_str() {
        "table" => {
            println!("\nNodes ({}):\n", nodes.len());
            for node in &nodes {
                println!("  {node}");
            }
        }
        "json" => {
            let output: Vec<NodeOutput> = nodes
                .into_iter()
                .map(|node| NodeOutput {
                    fully_qualified: node.fully_qualified(),
                    name: node.name,
                    namespace: node.namespace,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => anyhow::bail!("Unknown format: {}", format),
    }
    Ok(())
}
