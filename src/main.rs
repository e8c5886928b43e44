use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payment_coordinator::domain::attempt::AttemptSnapshot;
use payment_coordinator::domain::events::TransitionEvent;
use payment_coordinator::infrastructure::clock::ManualClock;
use payment_coordinator::infrastructure::simulated::SimulatedGateway;
use payment_coordinator::interfaces::csv::event_writer::{EventRecord, EventWriter, OutputFormat};
use payment_coordinator::interfaces::csv::scenario_reader::{Action, ScenarioReader, ScenarioStep};
use payment_coordinator::{CoordinatorConfig, PaymentCoordinator};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway-http")]
use payment_coordinator::infrastructure::{
    clock::{SystemClock, TokioTimer},
    http::HttpGateway,
};

// Yields granted to spawned operations before the next step runs.
const SETTLE_ROUNDS: usize = 64;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario CSV file
    scenario: PathBuf,

    /// Base URL of a live payment gateway. Requires the 'gateway-http' feature;
    /// without it the simulated gateway is used.
    #[arg(long)]
    gateway_url: Option<String>,

    /// Bearer token for the live gateway.
    #[arg(long, env = "PAYMENT_GATEWAY_TOKEN", hide_env_values = true)]
    gateway_token: Option<String>,

    /// Waiting-window timeout in milliseconds (overrides PAYMENT_TIMEOUT_MS).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Output format for the transition log
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
}

/// Where time comes from during a run.
enum Timeline {
    /// Virtual time against the simulated gateway; runs are instant and
    /// deterministic.
    Virtual {
        clock: ManualClock,
        gateway: SimulatedGateway,
    },
    /// Wall-clock time against a live gateway.
    #[cfg(feature = "gateway-http")]
    Live { started: tokio::time::Instant },
}

impl Timeline {
    fn now(&self) -> Duration {
        match self {
            Timeline::Virtual { clock, .. } => clock.elapsed(),
            #[cfg(feature = "gateway-http")]
            Timeline::Live { started } => started.elapsed(),
        }
    }

    /// The next timer deadline that falls before `at`, if time is virtual.
    fn deadline_before(&self, at: Duration) -> Option<Duration> {
        match self {
            Timeline::Virtual { clock, .. } => clock.next_deadline().filter(|d| *d <= at),
            #[cfg(feature = "gateway-http")]
            Timeline::Live { .. } => None,
        }
    }

    async fn advance_to(&self, at: Duration) {
        match self {
            Timeline::Virtual { clock, .. } => {
                clock.advance_to(at);
            }
            #[cfg(feature = "gateway-http")]
            Timeline::Live { started } => tokio::time::sleep_until(*started + at).await,
        }
    }

    /// Drops outcomes the step's call did not consume, e.g. because the
    /// coordinator rejected or ignored it.
    fn discard_script(&self, step: &ScenarioStep) {
        match self {
            Timeline::Virtual { gateway, .. } => {
                let dropped = gateway.clear_script();
                if dropped > 0 {
                    tracing::debug!(at_ms = step.at_ms, dropped, "Discarding unused scripted outcome");
                }
            }
            #[cfg(feature = "gateway-http")]
            Timeline::Live { .. } => {}
        }
    }

    fn script(&self, step: &ScenarioStep) -> payment_coordinator::Result<()> {
        let Some(outcome) = step.outcome else {
            return Ok(());
        };
        match self {
            Timeline::Virtual { gateway, .. } => match step.action {
                Action::Initialize => gateway.script_initialize(outcome),
                Action::Verify => gateway.script_verify(outcome),
                Action::Reset | Action::Advance => Ok(()),
            },
            #[cfg(feature = "gateway-http")]
            Timeline::Live { .. } => {
                tracing::warn!(?outcome, "Scripted outcomes are ignored against a live gateway");
                Ok(())
            }
        }
    }
}

fn build(cli: &Cli, config: &CoordinatorConfig) -> Result<(PaymentCoordinator, Timeline)> {
    if let Some(url) = &cli.gateway_url {
        #[cfg(feature = "gateway-http")]
        {
            let gateway = HttpGateway::new(url.clone(), cli.gateway_token.clone()).into_diagnostic()?;
            let timer = TokioTimer::new().into_diagnostic()?;
            let coordinator = PaymentCoordinator::new(
                config,
                Arc::new(gateway),
                Arc::new(SystemClock),
                Arc::new(timer),
            );
            let started = tokio::time::Instant::now();
            return Ok((coordinator, Timeline::Live { started }));
        }

        #[cfg(not(feature = "gateway-http"))]
        {
            let _ = (url, &cli.gateway_token);
            eprintln!(
                "WARNING: Live gateway requested via --gateway-url, but 'gateway-http' feature is not enabled. Falling back to the simulated gateway."
            );
        }
    }

    let clock = ManualClock::new();
    let gateway = SimulatedGateway::default();
    let coordinator = PaymentCoordinator::new(
        config,
        Arc::new(gateway.clone()),
        Arc::new(clock.clone()),
        Arc::new(clock.clone()),
    );
    Ok((coordinator, Timeline::Virtual { clock, gateway }))
}

fn dispatch(
    coordinator: &PaymentCoordinator,
    timeline: &Timeline,
    step: &ScenarioStep,
) -> payment_coordinator::Result<Option<JoinHandle<AttemptSnapshot>>> {
    let task = match step.action {
        Action::Initialize => {
            let order = step.order()?;
            timeline.script(step)?;
            let coordinator = coordinator.clone();
            Some(tokio::spawn(async move { coordinator.initialize(order).await }))
        }
        Action::Verify => {
            let reference = step.reference()?.to_string();
            timeline.script(step)?;
            let coordinator = coordinator.clone();
            Some(tokio::spawn(async move { coordinator.verify(&reference).await }))
        }
        Action::Reset => {
            coordinator.reset();
            None
        }
        Action::Advance => None,
    };
    Ok(task)
}

/// Lets spawned operations run until they finish or park on the gateway.
async fn settle(in_flight: &mut Vec<JoinHandle<AttemptSnapshot>>) {
    for _ in 0..SETTLE_ROUNDS {
        if in_flight.iter().all(|task| task.is_finished()) {
            break;
        }
        tokio::task::yield_now().await;
    }
    in_flight.retain(|task| !task.is_finished());
}

fn drain<W: Write>(
    events: &mut broadcast::Receiver<TransitionEvent>,
    at: Duration,
    writer: &mut EventWriter<W>,
) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => writer
                .write_record(&EventRecord::new(at, &event))
                .into_diagnostic()?,
            Err(TryRecvError::Lagged(missed)) => {
                eprintln!("WARNING: {} transitions were dropped from the log", missed);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(()),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = CoordinatorConfig::from_env().into_diagnostic()?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config = config.with_redirect_timeout(Duration::from_millis(timeout_ms));
    }
    config.validate().into_diagnostic()?;

    let (coordinator, timeline) = build(&cli, &config)?;
    let mut events = coordinator.subscribe();

    let stdout = io::stdout();
    let mut writer = EventWriter::new(stdout.lock(), cli.format);

    // Replay the scenario
    let file = File::open(&cli.scenario).into_diagnostic()?;
    let reader = ScenarioReader::new(file);
    let mut in_flight = Vec::new();
    for step_result in reader.steps() {
        let step = match step_result {
            Ok(step) => step,
            Err(e) => {
                eprintln!("Error reading step: {}", e);
                continue;
            }
        };

        // Fire timeouts that fall due before this step, each at its own time.
        while let Some(deadline) = timeline.deadline_before(step.at()) {
            timeline.advance_to(deadline).await;
            drain(&mut events, timeline.now(), &mut writer)?;
        }
        timeline.advance_to(step.at()).await;
        drain(&mut events, timeline.now(), &mut writer)?;

        match dispatch(&coordinator, &timeline, &step) {
            Ok(Some(task)) => in_flight.push(task),
            Ok(None) => {}
            Err(e) => eprintln!("Error processing step at {}ms: {}", step.at_ms, e),
        }
        settle(&mut in_flight).await;
        timeline.discard_script(&step);
        drain(&mut events, timeline.now(), &mut writer)?;
    }

    // Calls still parked on the simulated gateway never settle.
    for task in in_flight {
        match &timeline {
            Timeline::Virtual { .. } => task.abort(),
            #[cfg(feature = "gateway-http")]
            Timeline::Live { .. } => {
                task.await.into_diagnostic()?;
            }
        }
    }
    drain(&mut events, timeline.now(), &mut writer)?;
    writer.flush().into_diagnostic()?;

    Ok(())
}
