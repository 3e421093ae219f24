use super::actions;
use super::locks::LockManager;
use super::{
    ProvisioningPlan, ProvisioningStep, Severity, SkipReason, StepAction, StepResult, StepStatus,
};
use crate::error::ProvisionError;
use crate::host::Host;
use crate::progress::{ProgressEvent, ProgressHandler};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_SECS: u64 = 2;
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Bounded retry with exponential backoff and a per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub step_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt: 2s, 4s, 8s, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << exp)
    }
}

pub struct StepRunner {
    host: Arc<dyn Host>,
    locks: Arc<LockManager>,
    policy: RetryPolicy,
    max_parallel: usize,
    firewall_active: bool,
    progress: Option<Arc<dyn ProgressHandler>>,
}

impl StepRunner {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            locks: Arc::new(LockManager::new()),
            policy: RetryPolicy::default(),
            max_parallel: 1,
            firewall_active: true,
            progress: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_locks(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Firewall steps are skipped as capability-absent when this is false
    pub fn with_firewall(mut self, active: bool) -> Self {
        self.firewall_active = active;
        self
    }

    pub fn with_progress(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(handler);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(handler) = &self.progress {
            handler.on_progress(&event);
        }
    }

    /// Execute the plan and return one result per step in topological order.
    ///
    /// Ready steps run in waves of at most `max_parallel`. A Halt failure
    /// stops scheduling; everything not yet started is then skipped.
    pub async fn run(&self, plan: &ProvisioningPlan) -> Vec<StepResult> {
        let steps = plan.steps();
        let total = steps.len();
        let id_index: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut results: HashMap<usize, StepResult> = HashMap::new();
        let mut pending: Vec<usize> = plan.order().to_vec();
        let mut halted = false;
        let mut started = 0usize;

        info!("Running {} step(s)", total);

        while !pending.is_empty() {
            let mut ready = Vec::new();
            let mut waiting = Vec::new();

            for idx in pending {
                let step = &steps[idx];
                let dep_results: Vec<Option<&StepResult>> = step
                    .depends_on
                    .iter()
                    .map(|dep| results.get(&id_index[dep.as_str()]))
                    .collect();

                if dep_results.iter().flatten().any(|r| !r.status.is_satisfied()) {
                    debug!("Skipping {}: dependency did not succeed", step.id);
                    let result = skipped(step, SkipReason::DependencyFailed);
                    self.emit_finished(&result, Duration::ZERO);
                    results.insert(idx, result);
                } else if dep_results.iter().any(Option::is_none) {
                    waiting.push(idx);
                } else if halted {
                    let result = skipped(step, SkipReason::RunHalted);
                    self.emit_finished(&result, Duration::ZERO);
                    results.insert(idx, result);
                } else {
                    ready.push(idx);
                }
            }

            if ready.is_empty() {
                if waiting.is_empty() {
                    break;
                }
                pending = waiting;
                continue;
            }

            let take = ready.len().min(self.max_parallel);
            let batch: Vec<usize> = ready.drain(..take).collect();

            let futures = batch.iter().map(|&idx| {
                started += 1;
                self.emit(ProgressEvent::StepStarted {
                    step_id: steps[idx].id.clone(),
                    index: started,
                    total,
                });
                self.execute_step(&steps[idx])
            });
            let outcomes = join_all(futures).await;

            for (idx, result) in batch.into_iter().zip(outcomes) {
                if let StepStatus::Failed {
                    severity: Severity::Halt,
                    ..
                } = result.status
                {
                    warn!("Step {} failed with halt severity, stopping the run", result.step_id);
                    halted = true;
                }
                results.insert(idx, result);
            }

            // Keep the remaining steps in topological order
            let position: HashMap<usize, usize> = plan
                .order()
                .iter()
                .enumerate()
                .map(|(pos, &idx)| (idx, pos))
                .collect();
            pending = ready.into_iter().chain(waiting).collect();
            pending.sort_by_key(|idx| position[idx]);
        }

        plan.order()
            .iter()
            .filter_map(|idx| results.remove(idx))
            .collect()
    }

    async fn execute_step(&self, step: &ProvisioningStep) -> StepResult {
        let start = Instant::now();

        if matches!(step.action, StepAction::OpenFirewallPort { .. }) && !self.firewall_active {
            info!("No active firewall, skipping {}", step.id);
            let result = skipped(step, SkipReason::CapabilityAbsent);
            self.emit_finished(&result, start.elapsed());
            return result;
        }

        let severity = step.action.severity();
        let mut attempt = 0u32;
        let status = loop {
            attempt += 1;
            let message = match self.attempt(step).await {
                Ok(true) => break StepStatus::Success,
                Ok(false) => break StepStatus::skipped(SkipReason::AlreadySatisfied),
                Err(message) => message,
            };

            let transient = ProvisionError::TransientActionFailure {
                step: step.id.clone(),
                attempt,
                message: message.clone(),
            };
            warn!("{}", transient);

            if attempt >= self.policy.max_attempts {
                let fatal = ProvisionError::FatalActionFailure {
                    step: step.id.clone(),
                    attempts: attempt,
                    last_error: message,
                };
                break StepStatus::Failed {
                    reason: fatal.to_string(),
                    severity,
                };
            }

            let backoff = self.policy.backoff(attempt);
            self.emit(ProgressEvent::StepRetrying {
                step_id: step.id.clone(),
                attempt,
                error: message,
                backoff,
            });
            tokio::time::sleep(backoff).await;
        };

        let duration = start.elapsed();
        let result = StepResult {
            step_id: step.id.clone(),
            action: step.action.kind().to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
            attempts: attempt,
        };
        self.emit_finished(&result, duration);
        result
    }

    /// One attempt under the step's lock and timeout
    async fn attempt(&self, step: &ProvisioningStep) -> Result<bool, String> {
        let _guard = self
            .locks
            .acquire(step.action.lock_name())
            .await
            .map_err(|e| format!("{:#}", e))?;

        match tokio::time::timeout(
            self.policy.step_timeout,
            actions::apply(self.host.as_ref(), &step.action),
        )
        .await
        {
            Ok(Ok(changed)) => Ok(changed),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!(
                "timed out after {}s",
                self.policy.step_timeout.as_secs_f64()
            )),
        }
    }

    fn emit_finished(&self, result: &StepResult, duration: Duration) {
        self.emit(ProgressEvent::StepFinished {
            step_id: result.step_id.clone(),
            status: result.status.to_string(),
            attempts: result.attempts,
            duration,
        });
    }
}

fn skipped(step: &ProvisioningStep, reason: SkipReason) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        action: step.action.kind().to_string(),
        status: StepStatus::skipped(reason),
        duration_ms: 0,
        attempts: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MockHost, MockOperation, ServiceRef};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            step_timeout: Duration::from_secs(5),
        }
    }

    fn firewall(id: &str, port: u16, deps: &[&str]) -> ProvisioningStep {
        ProvisioningStep::new(id, StepAction::OpenFirewallPort { port }).after(deps)
    }

    fn enable(id: &str, unit: &str, deps: &[&str]) -> ProvisioningStep {
        ProvisioningStep::new(
            id,
            StepAction::EnableService {
                service: ServiceRef::unit(unit),
            },
        )
        .after(deps)
    }

    fn install(id: &str, deps: &[&str]) -> ProvisioningStep {
        ProvisioningStep::new(
            id,
            StepAction::InstallPackages {
                packages: vec!["nginx".to_string()],
            },
        )
        .after(deps)
    }

    fn status_of<'a>(results: &'a [StepResult], id: &str) -> &'a StepStatus {
        &results.iter().find(|r| r.step_id == id).unwrap().status
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_results_in_topological_order() {
        let host = Arc::new(MockHost::native_ready());
        let plan = ProvisioningPlan::new(vec![
            enable("b", "b", &["a"]),
            enable("a", "a", &[]),
            firewall("c", 80, &[]),
        ])
        .unwrap();

        let results = StepRunner::new(host).with_policy(fast_policy()).run(&plan).await;
        let ids: Vec<_> = results.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results.iter().all(|r| r.status == StepStatus::Success));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let host = Arc::new(MockHost::native_ready());
        host.fail_next(MockOperation::EnableService, 2, "unit busy");
        let plan = ProvisioningPlan::new(vec![enable("a", "a", &[])]).unwrap();

        let results = StepRunner::new(host).with_policy(fast_policy()).run(&plan).await;
        assert_eq!(results[0].status, StepStatus::Success);
        assert_eq!(results[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_dependents_only() {
        let host = Arc::new(MockHost::native_ready());
        host.fail_always(MockOperation::EnableService, "no such unit");
        let plan = ProvisioningPlan::new(vec![
            enable("a", "a", &[]),
            firewall("b", 80, &["a"]),
            firewall("c", 443, &[]),
        ])
        .unwrap();

        let results = StepRunner::new(host.clone())
            .with_policy(fast_policy())
            .run(&plan)
            .await;

        match status_of(&results, "a") {
            StepStatus::Failed { reason, severity } => {
                assert_eq!(*severity, Severity::Fatal);
                assert!(reason.contains("no such unit"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(results[0].attempts, 3);
        assert_eq!(
            status_of(&results, "b"),
            &StepStatus::skipped(SkipReason::DependencyFailed)
        );
        assert_eq!(status_of(&results, "c"), &StepStatus::Success);
        assert!(host.allows(443));
        assert!(!host.allows(80));
    }

    #[tokio::test]
    async fn test_halt_failure_stops_the_run() {
        let host = Arc::new(MockHost::native_ready());
        host.fail_always(MockOperation::InstallPackages, "dpkg was interrupted");
        let plan = ProvisioningPlan::new(vec![
            install("install", &[]),
            enable("enable", "nginx", &["install"]),
            firewall("open", 80, &[]),
        ])
        .unwrap();

        let results = StepRunner::new(host.clone())
            .with_policy(fast_policy())
            .run(&plan)
            .await;

        assert!(status_of(&results, "install").is_blocking_failure());
        assert_eq!(
            status_of(&results, "enable"),
            &StepStatus::skipped(SkipReason::DependencyFailed)
        );
        assert_eq!(
            status_of(&results, "open"),
            &StepStatus::skipped(SkipReason::RunHalted)
        );
        assert!(host.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_firewall_absent_is_capability_skip() {
        let host = Arc::new(MockHost::native_ready());
        let plan = ProvisioningPlan::new(vec![
            firewall("open", 80, &[]),
            enable("after", "x", &["open"]),
        ])
        .unwrap();

        let results = StepRunner::new(host)
            .with_policy(fast_policy())
            .with_firewall(false)
            .run(&plan)
            .await;

        assert_eq!(
            results[0].status,
            StepStatus::skipped(SkipReason::CapabilityAbsent)
        );
        assert_eq!(results[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_nonfatal_failure_keeps_run_going() {
        let host = Arc::new(MockHost::native_ready());
        host.fail_always(MockOperation::AllowFirewallPort, "ufw not responding");
        let plan = ProvisioningPlan::new(vec![firewall("open", 80, &[]), enable("e", "x", &[])])
            .unwrap();

        let results = StepRunner::new(host)
            .with_policy(fast_policy())
            .run(&plan)
            .await;

        assert!(matches!(
            results[0].status,
            StepStatus::Failed {
                severity: Severity::NonFatal,
                ..
            }
        ));
        assert_eq!(results[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_step_timeout_counts_as_failed_attempt() {
        let host = Arc::new(MockHost::native_ready());
        host.delay(MockOperation::EnableService, Duration::from_secs(5));
        let plan = ProvisioningPlan::new(vec![enable("slow", "x", &[])]).unwrap();

        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            step_timeout: Duration::from_millis(20),
        };
        let results = StepRunner::new(host).with_policy(policy).run(&plan).await;

        match &results[0].status {
            StepStatus::Failed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("Expected timeout failure, got {:?}", other),
        }
        assert_eq!(results[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_parallel_waves_respect_bound() {
        let host = Arc::new(MockHost::native_ready());
        host.delay(MockOperation::EnableService, Duration::from_millis(100));
        let plan = ProvisioningPlan::new(vec![
            enable("a", "a", &[]),
            enable("b", "b", &[]),
            firewall("c", 80, &["a", "b"]),
        ])
        .unwrap();

        let start = std::time::Instant::now();
        let results = StepRunner::new(host)
            .with_policy(fast_policy())
            .with_max_parallel(2)
            .run(&plan)
            .await;

        // Enable steps share the supervisor lock, so they still serialize
        assert!(start.elapsed() >= Duration::from_millis(200));
        let ids: Vec<_> = results.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results.iter().all(|r| r.status == StepStatus::Success));
    }
}
