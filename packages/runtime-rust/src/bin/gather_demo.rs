//! Runs a threshold aggregation and a fork-join fan-out over simulated
//! routes, then prints the resulting messages as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gather_core::{GroupId, Message};
use gather_runtime::correlation::{
    CollectionPolicy, Correlator, CorrelatorConfig, ExpiryAction, ExpiryOutcome, SweepTask,
    ThresholdPolicy,
};
use gather_runtime::routing::{
    route_fn, ForkJoinConfig, ForkJoinStrategy, Route, RouteError, RoutingPair,
};
use gather_runtime::storage::{EncodedGroupStore, GroupStore, InMemoryGroupStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gather-demo", about = "Correlation aggregation and fork-join routing demo")]
struct Cli {
    /// Members per correlation group.
    #[arg(long, env = "GATHER_THRESHOLD", default_value_t = 3)]
    threshold: usize,

    /// Number of simulated routes in the fan-out.
    #[arg(long, env = "GATHER_ROUTES", default_value_t = 4)]
    routes: usize,

    /// Maximum routes in flight at once.
    #[arg(long, env = "GATHER_MAX_CONCURRENCY", default_value_t = 2)]
    max_concurrency: usize,

    /// Fan-out deadline in milliseconds (0 disables it).
    #[arg(long, env = "GATHER_TIMEOUT_MS", default_value_t = 0)]
    timeout_ms: u64,

    /// Sequence of a route that always fails.
    #[arg(long, env = "GATHER_FAIL_ROUTE")]
    fail_route: Option<usize>,

    /// Keep group members MsgPack-encoded instead of in memory.
    #[arg(long, env = "GATHER_ENCODED_STORE")]
    encoded_store: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "GATHER_JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn simulated_route(sequence: usize, fail: bool) -> Arc<dyn Route> {
    let step = u64::try_from(sequence).unwrap_or(u64::MAX).saturating_add(1);
    let delay = Duration::from_millis(step.saturating_mul(20));
    route_fn(
        format!("route-{sequence}"),
        move |msg: Message, cancel: CancellationToken| async move {
            tokio::select! {
                () = cancel.cancelled() => return Err(RouteError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            if fail {
                return Err(RouteError::failed("simulated outage"));
            }
            let text = msg.payload_text().unwrap_or_default();
            Ok(msg
                .derive(format!("{text} via route-{sequence}"))
                .with_variable("handled_by", format!("route-{sequence}")))
        },
    )
}

fn print_json(label: &str, message: &Message) -> Result<()> {
    println!("{label}: {}", serde_json::to_string_pretty(message)?);
    Ok(())
}

async fn run_aggregation(cli: &Cli) -> Result<()> {
    let store: Arc<dyn GroupStore> = if cli.encoded_store {
        Arc::new(EncodedGroupStore::new("demo"))
    } else {
        Arc::new(InMemoryGroupStore::new())
    };
    let correlator = Arc::new(Correlator::new(
        Arc::new(ThresholdPolicy::new(cli.threshold)),
        store,
        CorrelatorConfig {
            group_timeout: Some(Duration::from_secs(30)),
            expiry_action: ExpiryAction::Aggregate,
            ..CorrelatorConfig::default()
        },
    ));

    for i in 0..cli.threshold {
        let event = Message::new(format!("event-{i}")).with_correlation_id("batch-1");
        if let Some(aggregated) = correlator.process(event).await? {
            print_json("aggregated", &aggregated)?;
        }
    }

    // One straggler is left in a partial group and flushed by a forced expiry.
    correlator
        .process(Message::new("straggler").with_correlation_id("batch-2"))
        .await?;
    let (tx, mut rx) = mpsc::channel(8);
    let mut sweeper = correlator.start_sweeper(tx);
    sweeper
        .submit(SweepTask::Expire {
            group_id: GroupId::from("batch-2"),
        })
        .await?;
    if let Some(outcome) = rx.recv().await {
        match outcome {
            ExpiryOutcome::Aggregated { message, .. } => print_json("expired", &message)?,
            other => tracing::warn!(?other, "unexpected expiry outcome"),
        }
    }
    sweeper.stop().await;
    Ok(())
}

async fn run_fork_join(cli: &Cli) -> Result<()> {
    let routes: Vec<Arc<dyn Route>> = (0..cli.routes)
        .map(|seq| simulated_route(seq, cli.fail_route == Some(seq)))
        .collect();
    let config = ForkJoinConfig {
        max_concurrency: cli.max_concurrency,
        timeout: (cli.timeout_ms > 0).then(|| Duration::from_millis(cli.timeout_ms)),
        ..ForkJoinConfig::default()
    };
    let inbound = Message::new("order-42").with_correlation_id("req-42");

    let strategy = ForkJoinStrategy::collect_map(config.clone())?;
    match strategy.execute(&inbound, &routes).await {
        Ok(merged) => print_json("fork-join", &merged)?,
        Err(err) => tracing::error!(error = %err, "fork-join failed"),
    }

    // Scatter-gather: the routed copies carry their fan-out size, so a
    // collection correlator can reassemble them in arrival order.
    let gather = Correlator::new(
        Arc::new(CollectionPolicy),
        Arc::new(InMemoryGroupStore::new()),
        CorrelatorConfig::default(),
    );
    let outcomes = ForkJoinStrategy::collect_list(config)?
        .dispatch(RoutingPair::for_routes(&inbound, &routes))
        .await?;
    for outcome in outcomes.into_values() {
        match outcome.result {
            Ok(message) => {
                if let Some(collected) = gather.process(message).await? {
                    print_json("gathered", &collected)?;
                }
            }
            Err(failure) => tracing::warn!(error = %failure, "scatter route failed"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    tracing::info!(?cli, "starting gather demo");

    run_aggregation(&cli).await?;
    run_fork_join(&cli).await?;
    Ok(())
}
