use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ao_engine::{
    AnalyticEvaluator, CycleRequest, DesignCycle, Materials, ParameterEngine, ProposalOptions,
    CONDUCTORS, SUBSTRATES,
};
use ao_types::{EngineConfig, Family, Performance};

const FREQ_RANGE_GHZ: (f64, f64) = (1.0, 10.0);
const BW_RANGE_MHZ: (f64, f64) = (50.0, 800.0);
const DEFAULT_DELAY_SECS: u64 = 3;

fn env_parse<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        Err(_) => Ok(None),
    }
}

fn random_request(rng: &mut ChaCha8Rng, families: &[Family]) -> CycleRequest {
    let family = families.choose(rng).copied().unwrap_or(Family::PatchRect);
    let fr = rng.random_range(FREQ_RANGE_GHZ.0..FREQ_RANGE_GHZ.1);
    let bw = rng.random_range(BW_RANGE_MHZ.0..BW_RANGE_MHZ.1);
    let substrate = SUBSTRATES.choose(rng).copied().unwrap_or(SUBSTRATES[0]);
    let conductor = CONDUCTORS.choose(rng).copied().unwrap_or(CONDUCTORS[0]);

    CycleRequest::new(
        family,
        Performance::new((fr * 1e4).round() / 1e4, (bw * 1e3).round() / 1e3),
    )
    .with_materials(Materials::new(substrate, conductor))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::load()?;
    let runs: Option<usize> = env_parse("AO_RUNS")?;
    let delay = Duration::from_secs(env_parse("AO_DELAY_SECS")?.unwrap_or(DEFAULT_DELAY_SECS));

    info!(
        models_dir = %config.paths.models_dir.display(),
        feedback = %config.paths.feedback_csv.display(),
        runs = ?runs,
        delay_secs = delay.as_secs(),
        "Starting autorun against the analytic evaluator"
    );

    let engine = ParameterEngine::from_config(&config)?;
    let cycle = DesignCycle::from_config(&config, engine, AnalyticEvaluator::new())
        .with_options(ProposalOptions::default().with_optimizer(true));
    let cycle = Arc::new(Mutex::new(cycle));
    let families = config.families.clone();

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for Ctrl-C");
                // keep the sender alive so the loop is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    let mut rng = ChaCha8Rng::from_rng(&mut rand::rng());
    let mut completed = 0usize;
    let mut failed = 0usize;

    loop {
        if *stop_rx.borrow() {
            info!("Stop requested");
            break;
        }

        let request = random_request(&mut rng, &families);
        let runner = Arc::clone(&cycle);
        let outcome = tokio::task::spawn_blocking(move || runner.lock().run_cycle(&request)).await?;

        match outcome {
            Ok(report) => {
                completed += 1;
                info!(
                    cycle_id = %report.id,
                    error_fr_ghz = report.error.fr_ghz,
                    error_bw_mhz = report.error.bw_mhz,
                    retrained = report.retrained,
                    "Cycle {} finished",
                    completed + failed
                );
                if let Ok(json) = serde_json::to_string(&report) {
                    debug!(report = %json, "Cycle report");
                }
            }
            Err(e) => {
                failed += 1;
                warn!(error = %e, "Cycle {} failed", completed + failed);
            }
        }

        if runs.is_some_and(|limit| completed + failed >= limit) {
            break;
        }

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!("Stop requested");
                    break;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(completed, failed, "Autorun finished");
    Ok(())
}
