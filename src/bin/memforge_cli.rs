use anyhow::Context;
use clap::{Parser, Subcommand};
use memforge::memory::{find_pool, MemoryKind, PoolStats};
use memforge::registry::{AllocatorStrategy, ResourceRegistry};
use memforge::PolicyFlags;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "memforge-cli", version)]
#[command(about = "Inspect and exercise the default memory resources", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the runtime, policy flags and the strategy chosen for each kind
    Info {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Reserve memory in the default allocator of one kind
    Preallocate {
        /// host, pinned, device or managed
        #[arg(long)]
        kind: MemoryKind,
        /// Number of bytes to reserve
        #[arg(long)]
        bytes: usize,
        /// Device index (device memory only; defaults to the current device)
        #[arg(long)]
        device: Option<usize>,
    },
    /// Return cached memory of every pooled allocator
    Trim,
}

#[derive(Debug, Serialize)]
struct KindInfo {
    kind: MemoryKind,
    strategy: AllocatorStrategy,
}

#[derive(Debug, Serialize)]
struct Info {
    runtime: String,
    device_count: usize,
    policy: PolicyFlags,
    kinds: Vec<KindInfo>,
}

fn main() -> anyhow::Result<()> {
    memforge::logging::init_logging_default();
    let cli = Cli::parse();
    let registry = ResourceRegistry::global();

    match cli.command {
        Commands::Info { json } => {
            let info = collect_info(registry)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("runtime:      {}", info.runtime);
                println!("devices:      {}", info.device_count);
                println!(
                    "policy:       device_pool={} pinned_pool={} vmm={}",
                    info.policy.device_pool, info.policy.pinned_pool, info.policy.vmm
                );
                for k in &info.kinds {
                    println!("{:<13} {}", format!("{}:", k.kind), k.strategy);
                }
            }
        }
        Commands::Preallocate {
            kind,
            bytes,
            device,
        } => {
            registry
                .preallocate(kind, bytes, device)
                .with_context(|| format!("preallocating {} bytes of {} memory", bytes, kind))?;
            let handle = registry.get_or_create(kind, device)?;
            match find_pool(&*handle).map(|p| p.stats()) {
                Some(stats) => print_stats(kind, &stats),
                None => println!("{}: plain allocator, nothing is cached", kind),
            }
        }
        Commands::Trim => {
            let released = registry.release_unused();
            println!("released {} bytes", released);
        }
    }

    memforge::shutdown().context("releasing default resources")?;
    Ok(())
}

fn collect_info(registry: &ResourceRegistry) -> anyhow::Result<Info> {
    let runtime = registry.runtime();
    let device_count = runtime
        .device_count()
        .context("querying the device count")?;
    let factory = registry.factory();
    Ok(Info {
        runtime: runtime.name().to_string(),
        device_count,
        policy: factory.flags(),
        kinds: MemoryKind::ALL
            .iter()
            .map(|&kind| KindInfo {
                kind,
                strategy: factory.strategy_for(kind),
            })
            .collect(),
    })
}

fn print_stats(kind: MemoryKind, stats: &PoolStats) {
    println!(
        "{}: reserved={} free={} live_blocks={} upstream_allocations={}",
        kind, stats.reserved_bytes, stats.free_bytes, stats.live_blocks, stats.upstream_allocations
    );
}
