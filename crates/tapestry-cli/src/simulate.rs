//! simulate サブコマンド
//!
//! 1 ラウンド = 全 Composition を 1 回ずつ reconcile し、その後で
//! controller の外側にいるコンポーネントを模擬する:
//! - worker: 見えてから `synthesis_rounds` ラウンド後に結果を書く（stall した worker は書かない）
//! - 下流の reconciler: synthesized な record を次のラウンドで reconciled にする
//! - ストア: terminating な worker を `reap_every` ラウンドごとに消す

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Args;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use tapestry_core::app::{Action, ControllerBuilder, ControllerConfig};
use tapestry_core::domain::{Composition, ObjectKey, SynthesisRecord, Synthesizer, Worker};
use tapestry_core::impls::{InMemoryStore, RecordingReporter, ReporterSnapshot};
use tapestry_core::ports::{Clock, FixedClock, SystemClock};

const NAMESPACE: &str = "default";
const SYNTHESIZER: &str = "helm";

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Worker creations per second, shared by all compositions.
    #[arg(long, env = "TAPESTRY_CREATION_QPS", default_value_t = 5.0)]
    pub creation_qps: f64,

    #[arg(long, default_value_t = 3)]
    pub compositions: usize,

    #[arg(long, default_value_t = 40)]
    pub rounds: u32,

    /// Simulated seconds per round.
    #[arg(long, default_value_t = 15)]
    pub round_secs: u64,

    /// Real time slept between rounds. The creation limiter runs on real time.
    #[arg(long, default_value_t = 50)]
    pub tick_ms: u64,

    #[arg(long, default_value_t = 120)]
    pub pod_timeout_secs: u64,

    /// Rounds a worker runs before it reports its synthesis.
    #[arg(long, default_value_t = 2)]
    pub synthesis_rounds: u32,

    /// Probability that a worker hangs forever.
    #[arg(long, default_value_t = 0.0)]
    pub stall_rate: f64,

    /// Terminating workers disappear every this many rounds.
    #[arg(long, default_value_t = 2)]
    pub reap_every: u32,

    /// Bump every composition's generation at this round.
    #[arg(long)]
    pub bump_at: Option<u32>,

    /// Request deletion of every composition at this round.
    #[arg(long)]
    pub delete_at: Option<u32>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub rounds: u32,
    pub actions: BTreeMap<String, u64>,
    /// Passes that wrote to the store.
    pub writes: u64,
    pub errors: u64,
    pub reporter: ReporterSnapshot,
    pub compositions: Vec<CompositionSummary>,
    /// Compositions whose finalizer was released and that are gone.
    pub released: Vec<String>,
    pub remaining_workers: usize,
}

#[derive(Debug, Serialize)]
pub struct CompositionSummary {
    pub key: String,
    pub generation: u64,
    pub deleting: bool,
    pub current_state: Option<SynthesisRecord>,
    pub previous_state: Option<SynthesisRecord>,
}

impl From<Composition> for CompositionSummary {
    fn from(composition: Composition) -> Self {
        Self {
            key: composition.key().to_string(),
            generation: composition.generation(),
            deleting: composition.is_deleting(),
            current_state: composition.status.current_state,
            previous_state: composition.status.previous_state,
        }
    }
}

struct WorkerProgress {
    first_seen: u32,
    stalled: bool,
}

/// Everything outside the controller: workers, downstream reconciler, store GC.
struct Environment {
    store: Arc<InMemoryStore>,
    rng: StdRng,
    progress: HashMap<ObjectKey, WorkerProgress>,
    synthesis_rounds: u32,
    stall_rate: f64,
}

impl Environment {
    async fn reconcile_downstream(&self) -> Result<()> {
        for composition in self.store.compositions().await {
            let mut status = composition.status.clone();
            let Some(current) = status.current_state.as_mut() else {
                continue;
            };
            if !current.synthesized || current.reconciled {
                continue;
            }
            current.reconciled = true;
            current.ready = true;
            self.store
                .set_composition_status(&composition.key(), status)
                .await
                .context("marking composition reconciled")?;
        }
        Ok(())
    }

    async fn run_workers(&mut self, round: u32) -> Result<()> {
        let workers = self.store.workers().await;
        self.progress
            .retain(|key, _| workers.iter().any(|w| w.key() == *key));

        for worker in workers.iter().filter(|w| !w.is_terminating()) {
            let progress = self
                .progress
                .entry(worker.key())
                .or_insert_with(|| WorkerProgress {
                    first_seen: round,
                    stalled: self.rng.gen_bool(self.stall_rate),
                });
            if progress.stalled || round - progress.first_seen < self.synthesis_rounds {
                continue;
            }
            self.finish(worker).await?;
        }
        Ok(())
    }

    /// The worker writes its result into the record it was started for.
    async fn finish(&self, worker: &Worker) -> Result<()> {
        let Some(composition) = self.store.composition(&worker.owner_key()).await else {
            return Ok(());
        };
        let mut status = composition.status;
        let Some(current) = status.current_state.as_mut() else {
            return Ok(());
        };
        if current.synthesized
            || current.observed_composition_generation != worker.origin.composition_generation
        {
            return Ok(());
        }

        current.synthesized = true;
        current.pod_creation = worker.metadata.creation_timestamp;
        self.store
            .set_composition_status(&worker.owner_key(), status)
            .await
            .context("writing synthesis result")?;
        debug!(worker_name = %worker.metadata.name, "worker finished synthesis");
        Ok(())
    }
}

fn action_name(action: &Action) -> Result<String> {
    let value = serde_json::to_value(action)?;
    value
        .get("action")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .context("action serialized without a tag")
}

pub async fn run(args: SimulateArgs) -> Result<Summary> {
    ensure!(
        (0.0..=1.0).contains(&args.stall_rate),
        "--stall-rate must be within [0, 1]"
    );
    ensure!(args.reap_every > 0, "--reap-every must be positive");

    let clock = FixedClock::new(SystemClock.now());
    let store = Arc::new(
        InMemoryStore::new(Arc::new(clock.clone())).with_graceful_worker_deletion(),
    );
    let reporter = Arc::new(RecordingReporter::new());
    let controller = ControllerBuilder::new(store.clone())
        .config(ControllerConfig {
            creation_qps: args.creation_qps,
        })
        .clock(Arc::new(clock.clone()))
        .reporter(reporter.clone())
        .build()
        .context("building controller")?;

    store
        .insert_synthesizer(
            Synthesizer::new(SYNTHESIZER, "tapestry/helm:latest")
                .with_pod_timeout(Duration::from_secs(args.pod_timeout_secs)),
        )
        .await;
    let mut keys = Vec::with_capacity(args.compositions);
    for i in 0..args.compositions {
        let composition = Composition::new(NAMESPACE, format!("app-{i}"), SYNTHESIZER);
        keys.push(store.insert_composition(composition).await.key());
    }
    info!(compositions = keys.len(), rounds = args.rounds, "starting simulation");

    let mut env = Environment {
        store: Arc::clone(&store),
        rng: StdRng::seed_from_u64(args.seed),
        progress: HashMap::new(),
        synthesis_rounds: args.synthesis_rounds,
        stall_rate: args.stall_rate,
    };
    let mut actions: BTreeMap<String, u64> = BTreeMap::new();
    let mut errors = 0;
    let mut writes = 0;

    for round in 0..args.rounds {
        if args.bump_at == Some(round) {
            for key in &keys {
                if let Err(err) = store.bump_composition_generation(key).await {
                    warn!(composition = %key, error = %err, "could not bump generation");
                }
            }
            info!(round, "bumped composition generations");
        }
        if args.delete_at == Some(round) {
            for key in &keys {
                if let Err(err) = store.request_composition_deletion(key).await {
                    warn!(composition = %key, error = %err, "could not delete composition");
                }
            }
            info!(round, "requested composition deletion");
        }

        for key in &keys {
            match controller.reconcile(key).await {
                Ok(result) => {
                    if result.action.is_mutation() {
                        writes += 1;
                    }
                    *actions.entry(action_name(&result.action)?).or_default() += 1;
                }
                Err(err) => {
                    errors += 1;
                    // Failed passes are simply run again next round.
                    ensure!(err.is_retryable(), "reconcile failed for good: {err}");
                    warn!(composition = %key, error = %err, kind = ?err.kind(), "reconcile failed");
                }
            }
        }

        env.reconcile_downstream().await?;
        env.run_workers(round).await?;
        if (round + 1) % args.reap_every == 0 {
            let reaped = store.reap_terminating().await;
            if reaped > 0 {
                debug!(round, reaped, "reaped terminating workers");
            }
        }

        clock.advance(Duration::from_secs(args.round_secs));
        if args.tick_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.tick_ms)).await;
        }
    }

    let compositions = store.compositions().await;
    let released = keys
        .iter()
        .filter(|key| compositions.iter().all(|c| c.key() != **key))
        .map(ToString::to_string)
        .collect();

    Ok(Summary {
        rounds: args.rounds,
        actions,
        writes,
        errors,
        reporter: reporter.snapshot(),
        compositions: compositions.into_iter().map(CompositionSummary::from).collect(),
        released,
        remaining_workers: store.workers().await.len(),
    })
}
