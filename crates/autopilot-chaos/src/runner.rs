//! ChaosRunner — steady-state check, fault injection, impact sampling.
//!
//! An attempted injection is always reverted: inline once the phases end,
//! or from a spawned task if the run is dropped before it gets there.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use autopilot_core::*;
use autopilot_state::{StateError, StateStore};

#[derive(Debug, Error)]
pub enum ChaosError {
    #[error("unknown chaos experiment: {0}")]
    UnknownExperiment(String),

    #[error("chaos experiment {name} is already running as {run_id}")]
    AlreadyRunning { name: String, run_id: String },

    #[error("chaos experiment {0} is not running")]
    NotRunning(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Bound check of the impact window against the hypothesis.
pub fn evaluate_hypothesis(hypothesis: &Hypothesis, impact: &ImpactSummary) -> Conclusion {
    let verified = impact.avg_error_rate < hypothesis.max_avg_error_rate
        && impact.max_response_time_ms < hypothesis.max_response_time_ms;

    let detail = format!(
        "avg error rate {:.2}% (limit {}%), max response time {:.0}ms (limit {}ms) over {} samples",
        impact.avg_error_rate,
        hypothesis.max_avg_error_rate,
        impact.max_response_time_ms,
        hypothesis.max_response_time_ms,
        impact.samples.len()
    );

    if verified {
        Conclusion {
            hypothesis_verified: true,
            findings: vec![
                "system remained stable under chaos conditions".to_string(),
                detail,
            ],
            recommendations: Vec::new(),
        }
    } else {
        Conclusion {
            hypothesis_verified: false,
            findings: vec!["system degraded under chaos conditions".to_string(), detail],
            recommendations: vec!["improve resilience to handle similar failures".to_string()],
        }
    }
}

struct ActiveRun {
    run_id: String,
    stop_tx: watch::Sender<bool>,
}

type ActiveRuns = Arc<Mutex<HashMap<String, ActiveRun>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// An experiment's claim on its name; released on drop.
struct ActiveSlot {
    active: ActiveRuns,
    name: String,
    run_id: String,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if active.get(&self.name).is_some_and(|r| r.run_id == self.run_id) {
            active.remove(&self.name);
        }
    }
}

struct Registration {
    experiment: ChaosExperiment,
    slot: ActiveSlot,
    stop: watch::Receiver<bool>,
}

/// Owns the revert of an attempted injection until `run` takes it back.
struct FaultGuard {
    platform: Arc<dyn PlatformController>,
    experiment: String,
    service: String,
    fault: FaultSpec,
    armed: bool,
}

impl FaultGuard {
    fn new(platform: Arc<dyn PlatformController>, experiment: &ChaosExperiment) -> Self {
        Self {
            platform,
            experiment: experiment.name.clone(),
            service: experiment.service.clone(),
            fault: experiment.fault.clone(),
            armed: false,
        }
    }

    fn arm(&mut self) {
        self.armed = true;
    }

    /// Whether injection was attempted; the caller now owns the revert.
    fn disarm(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(experiment = %self.experiment, service = %self.service, "run dropped outside a runtime; fault left injected");
            return;
        };
        warn!(experiment = %self.experiment, service = %self.service, "run dropped mid-flight; reverting fault");
        let platform = self.platform.clone();
        let experiment = std::mem::take(&mut self.experiment);
        let service = std::mem::take(&mut self.service);
        let fault = self.fault.clone();
        handle.spawn(async move {
            match platform.revert_fault(&service, &fault).await {
                Ok(()) => info!(%experiment, %service, "fault reverted after dropped run"),
                Err(e) => {
                    error!(%experiment, %service, error = %e, "fault revert failed; manual intervention required")
                }
            }
        });
    }
}

pub struct ChaosRunner {
    platform: Arc<dyn PlatformController>,
    metrics: Arc<dyn MetricsSource>,
    store: StateStore,
    events: EventBus,
    experiments: BTreeMap<String, ChaosExperiment>,
    active: ActiveRuns,
    /// Runs started in the background.
    tasks: Mutex<JoinSet<()>>,
}

impl ChaosRunner {
    pub fn new(
        platform: Arc<dyn PlatformController>,
        metrics: Arc<dyn MetricsSource>,
        store: StateStore,
        events: EventBus,
        experiments: Vec<ChaosExperiment>,
    ) -> Self {
        Self {
            platform,
            metrics,
            store,
            events,
            experiments: experiments
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
            active: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn experiments(&self) -> impl Iterator<Item = &ChaosExperiment> {
        self.experiments.values()
    }

    pub fn experiment(&self, name: &str) -> Option<&ChaosExperiment> {
        self.experiments.get(name)
    }

    /// `(experiment, run id)` for every run in flight.
    pub async fn running(&self) -> Vec<(String, String)> {
        let mut runs: Vec<_> = lock(&self.active)
            .iter()
            .map(|(name, run)| (name.clone(), run.run_id.clone()))
            .collect();
        runs.sort();
        runs
    }

    pub fn results(&self) -> Result<Vec<ChaosResult>, ChaosError> {
        Ok(self.store.list_chaos_results()?)
    }

    pub fn result(&self, run_id: &str) -> Result<Option<ChaosResult>, ChaosError> {
        Ok(self.store.get_chaos_result(run_id)?)
    }

    /// Run a configured experiment to completion.
    pub async fn run_named(&self, name: &str) -> Result<ChaosResult, ChaosError> {
        let registration = self.register(name)?;
        Ok(self.finish_registered(registration).await)
    }

    /// Start a configured experiment in the background; returns the run id.
    pub async fn start(self: &Arc<Self>, name: &str) -> Result<String, ChaosError> {
        let registration = self.register(name)?;
        let run_id = registration.slot.run_id.clone();
        let runner = self.clone();
        let mut tasks = lock(&self.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            runner.finish_registered(registration).await;
        });
        Ok(run_id)
    }

    /// Ask a running experiment to end at its next sample boundary.
    pub async fn stop(&self, name: &str) -> Result<(), ChaosError> {
        let active = lock(&self.active);
        let run = active
            .get(name)
            .ok_or_else(|| ChaosError::NotRunning(name.to_string()))?;
        info!(experiment = %name, run = %run.run_id, "stop requested");
        let _ = run.stop_tx.send(true);
        Ok(())
    }

    /// Stop every background run and wait for each to revert and persist.
    pub async fn shutdown(&self) {
        let runs = {
            let active = lock(&self.active);
            for run in active.values() {
                let _ = run.stop_tx.send(true);
            }
            active.len()
        };
        if runs > 0 {
            info!(runs, "stopping chaos runs");
        }
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "chaos run task did not finish cleanly");
            }
        }
    }

    fn register(&self, name: &str) -> Result<Registration, ChaosError> {
        let experiment = self
            .experiments
            .get(name)
            .cloned()
            .ok_or_else(|| ChaosError::UnknownExperiment(name.to_string()))?;
        let mut active = lock(&self.active);
        if let Some(run) = active.get(name) {
            return Err(ChaosError::AlreadyRunning {
                name: name.to_string(),
                run_id: run.run_id.clone(),
            });
        }
        let run_id = format!("chaos-{name}-{}", uuid::Uuid::new_v4().simple());
        let (stop_tx, stop) = watch::channel(false);
        active.insert(
            name.to_string(),
            ActiveRun {
                run_id: run_id.clone(),
                stop_tx,
            },
        );
        Ok(Registration {
            experiment,
            slot: ActiveSlot {
                active: self.active.clone(),
                name: name.to_string(),
                run_id,
            },
            stop,
        })
    }

    async fn finish_registered(&self, registration: Registration) -> ChaosResult {
        let Registration {
            experiment,
            slot,
            mut stop,
        } = registration;
        let result = self.run(&experiment, slot.run_id.clone(), &mut stop).await;
        drop(slot);
        result
    }

    /// Execute one experiment run, persist it, and publish the result.
    pub async fn run(
        &self,
        experiment: &ChaosExperiment,
        run_id: String,
        stop: &mut watch::Receiver<bool>,
    ) -> ChaosResult {
        let started_at_ms = epoch_millis();
        info!(experiment = %experiment.name, service = %experiment.service, run = %run_id, "chaos experiment starting");

        let mut observations = Vec::new();
        let mut fault = FaultGuard::new(self.platform.clone(), experiment);
        let outcome = self
            .phases(experiment, stop, &mut observations, &mut fault)
            .await;

        let (mut conclusion, mut failure) = match outcome {
            Ok(conclusion) => (conclusion, None),
            Err(reason) => (
                Conclusion {
                    hypothesis_verified: false,
                    findings: vec![format!("experiment failed: {reason}")],
                    recommendations: Vec::new(),
                },
                Some(reason),
            ),
        };

        if fault.disarm() {
            let reverted = self
                .platform
                .revert_fault(&experiment.service, &experiment.fault)
                .await;
            let error = reverted.err().map(|e| e.to_string());
            match &error {
                None => debug!(experiment = %experiment.name, "fault reverted"),
                Some(e) => {
                    error!(experiment = %experiment.name, error = %e, "fault revert failed; manual intervention required");
                    conclusion.findings.push(format!("fault revert failed: {e}"));
                    conclusion
                        .recommendations
                        .push(format!("manually revert the {:?} fault on {}", experiment.fault.kind, experiment.service));
                    if failure.is_none() {
                        failure = Some(format!("fault revert failed: {e}"));
                    }
                }
            }
            observations.push(Observation::FaultReverted {
                at_ms: epoch_millis(),
                success: error.is_none(),
                error,
            });
        }

        let result = ChaosResult {
            run_id,
            experiment: experiment.name.clone(),
            service: experiment.service.clone(),
            hypothesis: experiment.hypothesis.clone(),
            started_at_ms,
            ended_at_ms: epoch_millis(),
            observations,
            conclusion,
            error: failure,
        };

        if let Err(e) = self.store.put_chaos_result(&result) {
            warn!(run = %result.run_id, error = %e, "failed to persist chaos result");
        }
        info!(
            experiment = %result.experiment,
            run = %result.run_id,
            verified = result.conclusion.hypothesis_verified,
            error = ?result.error,
            "chaos experiment completed"
        );
        self.events.emit(AutomationEvent::ChaosCompleted {
            result: result.clone(),
        });
        result
    }

    /// Steady state, inject, monitor, conclude. `fault` is armed as soon
    /// as injection is attempted.
    async fn phases(
        &self,
        experiment: &ChaosExperiment,
        stop: &mut watch::Receiver<bool>,
        observations: &mut Vec<Observation>,
        fault: &mut FaultGuard,
    ) -> Result<Conclusion, String> {
        let service = &experiment.service;

        let baseline = self
            .metrics
            .get_metrics(service)
            .await
            .map_err(|e| format!("steady state unverifiable: {e}"))?;
        let verified = experiment.steady_state.is_met(&baseline);
        observations.push(Observation::SteadyState {
            verified,
            metrics: baseline,
        });
        if !verified {
            warn!(experiment = %experiment.name, %service, "system not in steady state; skipping injection");
            return Err(format!(
                "system not in steady state: error rate {:.2}%, response time {:.0}ms",
                baseline.error_rate, baseline.response_time_ms
            ));
        }

        if *stop.borrow() {
            return Err("cancelled".to_string());
        }

        fault.arm();
        self.platform
            .inject_fault(service, &experiment.fault)
            .await
            .map_err(|e| format!("fault injection failed: {e}"))?;
        info!(experiment = %experiment.name, %service, fault = ?experiment.fault.kind, "fault injected");
        observations.push(Observation::ChaosInjected {
            at_ms: epoch_millis(),
            fault: experiment.fault.clone(),
        });

        let samples = self.sample_impact(experiment, stop).await?;
        let impact = ImpactSummary::from_samples(samples);
        let conclusion = evaluate_hypothesis(&experiment.hypothesis, &impact);
        observations.push(Observation::ImpactMonitoring { impact });
        Ok(conclusion)
    }

    async fn sample_impact(
        &self,
        experiment: &ChaosExperiment,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Vec<ServiceMetrics>, String> {
        let started = tokio::time::Instant::now();
        let mut samples = Vec::new();

        while started.elapsed() < experiment.duration {
            if *stop.borrow() {
                return Err("cancelled".to_string());
            }
            let m = self
                .metrics
                .get_metrics(&experiment.service)
                .await
                .map_err(|e| format!("impact monitoring failed: {e}"))?;
            samples.push(m);

            tokio::select! {
                _ = tokio::time::sleep(experiment.sample_interval) => {}
                Ok(()) = stop.changed() => {}
            }
        }
        Ok(samples)
    }
}
