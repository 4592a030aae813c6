//! Command-line driver that exercises store views and degree counting on a
//! synthetic in-memory graph.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sombra_storeview::primitives::concurrency::{LockService, ReentrantLockService};
use sombra_storeview::storage::index::{IndexPopulationJob, IndexRegistry, PopulationOutcome};
use sombra_storeview::storage::scan::{
    DynamicIndexStoreView, NoExternalUpdates, ScanRequest, StoreScan, TokenScanConsumer,
};
use sombra_storeview::storage::{
    Direction, EagerDegrees, EdgeSpec, EntityType, NodeSpec, RelationshipSelection,
    StorageReader, StoreBuilder, StoreViewOptions,
};
use sombra_storeview::types::{LabelId, NodeId, Result as StoreResult, TypeId};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "storeview",
    version,
    about = "Run store scans and degree counts against a synthetic graph",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "TOML file with store view options")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the scan batch size")]
    batch_size: Option<usize>,

    #[arg(long, global = true, default_value_t = 7, help = "Seed for the synthetic graph")]
    seed: u64,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ScanCmd {
    #[arg(long, default_value_t = 100_000, help = "Nodes in the synthetic store")]
    nodes: u64,

    #[arg(long, default_value_t = 4, help = "Distinct labels assigned at random")]
    labels: u32,

    #[arg(long, value_name = "LABEL", help = "Only visit nodes carrying this label id")]
    label: Option<u32>,

    #[arg(long, help = "Populate a label index first so the scan can use it")]
    use_index: bool,

    #[arg(
        long,
        value_name = "MS",
        help = "Drop the label index this many milliseconds after the scan starts"
    )]
    drop_after_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct DegreesCmd {
    #[arg(long, default_value_t = 500, help = "Relationships attached to the hub node")]
    fan_out: usize,

    #[arg(long, default_value_t = 3, help = "Distinct relationship types")]
    types: u32,

    #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
    direction: DirectionArg,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Scan nodes, optionally through a label index")]
    Scan(ScanCmd),
    #[command(about = "Count per-type degrees of a dense hub node")]
    Degrees(DegreesCmd),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum DirectionArg {
    Outgoing,
    Incoming,
    Both,
}

impl From<DirectionArg> for Direction {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Outgoing => Direction::Outgoing,
            DirectionArg::Incoming => Direction::Incoming,
            DirectionArg::Both => Direction::Both,
        }
    }
}

#[derive(Serialize)]
struct ScanReport {
    nodes: u64,
    matched: u64,
    index_assisted: bool,
    population: Option<&'static str>,
    outcome: String,
    progress: f32,
    elapsed_ms: u64,
}

#[derive(Serialize)]
struct TypeDegree {
    ty: u32,
    outgoing: u32,
    incoming: u32,
    total: u32,
}

#[derive(Serialize)]
struct DegreeReport {
    node: u64,
    dense: bool,
    total: u64,
    per_type: Vec<TypeDegree>,
}

struct CountingConsumer(Arc<AtomicU64>);

impl TokenScanConsumer for CountingConsumer {
    fn add_record(&mut self, _entity: u64, _tokens: &[u32]) -> StoreResult<()> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut options = match &cli.config {
        Some(path) => StoreViewOptions::load(path)?,
        None => StoreViewOptions::default(),
    };
    if let Some(batch_size) = cli.batch_size {
        options = options.batch_size(batch_size);
    }
    options.validate()?;

    match &cli.command {
        Command::Scan(cmd) => {
            let report = run_scan(cmd, &options, cli.seed)?;
            emit(cli.format, &report, || {
                println!(
                    "scan: {} matched of {} nodes ({}), outcome={} progress={:.3} in {} ms",
                    report.matched,
                    report.nodes,
                    if report.index_assisted {
                        "index"
                    } else {
                        "store"
                    },
                    report.outcome,
                    report.progress,
                    report.elapsed_ms
                );
                if let Some(population) = report.population {
                    println!("label index population: {population}");
                }
            })?;
        }
        Command::Degrees(cmd) => {
            let report = run_degrees(cmd, &options, cli.seed)?;
            emit(cli.format, &report, || {
                println!(
                    "node {} ({}): total degree {}",
                    report.node,
                    if report.dense { "dense" } else { "sparse" },
                    report.total
                );
                for row in &report.per_type {
                    println!(
                        "  type {:>3}: out={} in={} total={}",
                        row.ty, row.outgoing, row.incoming, row.total
                    );
                }
            })?;
        }
    }
    Ok(())
}

fn run_scan(
    cmd: &ScanCmd,
    options: &StoreViewOptions,
    seed: u64,
) -> Result<ScanReport, Box<dyn Error>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut builder = StoreBuilder::new(options.clone());
    let labels = cmd.labels.max(1);
    for _ in 0..cmd.nodes {
        let label = LabelId(rng.gen_range(0..labels));
        builder.add_node(NodeSpec::with_labels(&[label]));
    }
    let storage = Arc::new(builder.build()?);
    let locks: Arc<dyn LockService> = Arc::new(ReentrantLockService::new());
    let registry = Arc::new(IndexRegistry::new());
    let view = DynamicIndexStoreView::new(storage, locks, options, Arc::clone(&registry));

    let mut population = None;
    let mut index = None;
    if cmd.use_index {
        let proxy = registry.create_token_index(EntityType::Node, "node_labels")?;
        let outcome = IndexPopulationJob::new(&view, Arc::clone(&proxy))?.run()?;
        population = Some(match outcome {
            PopulationOutcome::Online => "online",
            PopulationOutcome::Stopped => "stopped",
            PopulationOutcome::Dropped => "dropped",
        });
        index = Some(proxy.id());
    }

    let matched = Arc::new(AtomicU64::new(0));
    let mut request = ScanRequest::nodes().token_consumer(CountingConsumer(Arc::clone(&matched)));
    if let Some(label) = cmd.label {
        request = request.tokens(&[label]);
    }
    let scan = view.scan(request)?;

    let bar = ProgressBar::new(1_000);
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {percent:>3}% {msg}",
    )?);
    let started = Instant::now();
    let outcome = thread::scope(|scope| {
        let worker = scope.spawn(|| scan.run(&mut NoExternalUpdates));
        let dropper = match (cmd.drop_after_ms, index) {
            (Some(delay), Some(id)) => {
                let registry = Arc::clone(&registry);
                Some(scope.spawn(move || {
                    thread::sleep(Duration::from_millis(delay));
                    registry.drop_index(id)
                }))
            }
            _ => None,
        };
        while !worker.is_finished() {
            bar.set_position((scan.progress().fraction() * 1_000.0) as u64);
            bar.set_message(format!("{} matched", matched.load(Ordering::Relaxed)));
            thread::sleep(Duration::from_millis(50));
        }
        let result = worker
            .join()
            .map_err(|_| Box::<dyn Error>::from("scan thread panicked"))?;
        if let Some(dropper) = dropper {
            dropper
                .join()
                .map_err(|_| Box::<dyn Error>::from("drop thread panicked"))??;
        }
        Ok::<_, Box<dyn Error>>(result)
    })?;
    bar.set_position((scan.progress().fraction() * 1_000.0) as u64);
    bar.finish_and_clear();

    let outcome = match outcome {
        Ok(()) if scan.progress().is_complete() => "complete".to_owned(),
        Ok(()) => "stopped".to_owned(),
        Err(err) if err.is_concurrent_drop() => format!("aborted: {err}"),
        Err(err) => return Err(err.into()),
    };
    Ok(ScanReport {
        nodes: cmd.nodes,
        matched: matched.load(Ordering::Relaxed),
        index_assisted: scan.is_index_assisted(),
        population,
        outcome,
        progress: scan.progress().fraction(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn run_degrees(
    cmd: &DegreesCmd,
    options: &StoreViewOptions,
    seed: u64,
) -> Result<DegreeReport, Box<dyn Error>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut builder = StoreBuilder::new(options.clone());
    let hub = builder.add_node(NodeSpec::with_labels(&[LabelId(0)]));
    let others: Vec<NodeId> = (0..cmd.fan_out.max(1))
        .map(|_| builder.add_node(NodeSpec::with_labels(&[LabelId(1)])))
        .collect();
    let types = cmd.types.max(1);
    for _ in 0..cmd.fan_out {
        let ty = TypeId(rng.gen_range(0..types));
        let other = others[rng.gen_range(0..others.len())];
        let spec = match rng.gen_range(0..10) {
            0 => EdgeSpec::new(hub, ty, hub),
            1..=4 => EdgeSpec::new(other, ty, hub),
            _ => EdgeSpec::new(hub, ty, other),
        };
        builder.add_relationship(spec);
    }
    let storage = builder.build()?;

    let mut reader = StorageReader::from_options(&storage, options);
    let dense = reader.node(hub)?.dense;
    let mut degrees = EagerDegrees::new();
    reader.degrees(
        hub,
        &RelationshipSelection::all(cmd.direction.into()),
        &mut degrees,
    )?;
    reader.close();

    let per_type = degrees
        .types()
        .map(|ty| TypeDegree {
            ty: ty.0,
            outgoing: degrees.outgoing(ty),
            incoming: degrees.incoming(ty),
            total: degrees.total(ty),
        })
        .collect();
    Ok(DegreeReport {
        node: hub.0,
        dense,
        total: degrees.total_all(),
        per_type,
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}
