//! Runtime glue (§4.17/S): wires the scanner, the Verifier Lane, the
//! replay store/backfill path, and the policy+audit before/after hooks
//! into one long-running agent process.
//!
//! Grounded on the teacher's top-level `AgentRuntime` in `lib.rs`: a struct
//! of `Arc<dyn Trait>` collaborators built by `new()`, a `shutdown()` that
//! tears components down explicitly, and config held for later reads. The
//! chain-client retry/backoff loop is new — §6 pins down its exact shape
//! (base 1s, factor 2, cap 30s, 3 attempts) where the teacher leaves retry
//! to its communication bus internals.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock as SyncRwLock;
use serde_json::json;
use tokio::sync::Notify;

use crate::audit::{AuditTrail, Role};
use crate::canonical::sha256_hex;
use crate::error::{ChainClientError, RuntimeError, VerifierLaneError};
use crate::metrics::Metrics;
use crate::policy::PolicyCheckContext;
use crate::policy::{Operation, PolicyEngine};
use crate::replay::store::ReplayStore;
use crate::types::{AuditEntry, Task, U256};
use crate::verifier_lane::{VerifierExecutionResult, VerifierLane};

/// External collaborator that claims and completes tasks on the
/// coordination substrate (§6's "Chain client").
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn subscribe_tasks(&self) -> Result<Vec<Task>, ChainClientError>;
    async fn claim_task(&self, task: &Task) -> Result<String, ChainClientError>;
    async fn complete_task(&self, task: &Task, output: &[U256]) -> Result<String, ChainClientError>;
    async fn get_slot(&self) -> Result<u64, ChainClientError>;
}

/// Exponential backoff for chain-client calls. Defaults match §6: base 1s,
/// factor 2, cap 30s, 3 attempts.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    pub base_ms: u64,
    pub factor: u32,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 30_000,
            max_attempts: 3,
        }
    }
}

async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ChainClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainClientError>>,
{
    let mut delay = config.base_ms;
    let mut last_error = String::new();

    for attempt in 1..=config.max_attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_error = err.to_string();
                if attempt == config.max_attempts.max(1) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = delay.saturating_mul(config.factor as u64).min(config.cap_ms);
            }
        }
    }

    Err(ChainClientError::RetriesExhausted {
        attempts: config.max_attempts.max(1),
        last_error,
    })
}

/// Cooperative shutdown signal threaded through every public entry point
/// (§5 "Cancellation"). Triggering it aborts the next suspension point a
/// running invocation hits.
#[derive(Clone)]
pub struct ShutdownSignal {
    notify: Arc<Notify>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal {
            notify: Arc::new(Notify::new()),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// One cycle's worth of claim/verify/complete outcomes, for callers that
/// want a summary rather than threading through every audit entry.
#[derive(Debug, Clone, Default)]
pub struct RuntimeCycleReport {
    pub scanned: usize,
    pub completed: usize,
    pub escalated: usize,
    pub claim_failures: usize,
}

/// Wires modules A-R into one process (§4.17/S).
pub struct RuntimeGlue {
    chain_client: Arc<dyn ChainClient>,
    verifier_lane: Arc<VerifierLane>,
    store: Arc<dyn ReplayStore>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditTrail>,
    metrics: Arc<dyn Metrics>,
    retry: RetryConfig,
    shutdown: ShutdownSignal,
    actor: SyncRwLock<String>,
}

impl RuntimeGlue {
    pub fn new(
        chain_client: Arc<dyn ChainClient>,
        verifier_lane: Arc<VerifierLane>,
        store: Arc<dyn ReplayStore>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditTrail>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        RuntimeGlue {
            chain_client,
            verifier_lane,
            store,
            policy,
            audit,
            metrics,
            retry: RetryConfig::default(),
            shutdown: ShutdownSignal::new(),
            actor: SyncRwLock::new("agenc-runtime".to_string()),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn set_actor(&self, actor: impl Into<String>) {
        *self.actor.write() = actor.into();
    }

    /// Scans for new tasks and drives each through claim -> verify ->
    /// complete/escalate, recording an audit entry at every
    /// externally-observable step.
    pub async fn run_cycle(&self, now_secs: u64, now_ms: u64) -> Result<RuntimeCycleReport, RuntimeError> {
        let tasks = retry_with_backoff(&self.retry, || self.chain_client.subscribe_tasks()).await?;
        let mut report = RuntimeCycleReport {
            scanned: tasks.len(),
            ..Default::default()
        };

        for task in &tasks {
            if self.shutdown.is_triggered() {
                break;
            }
            match self.execute_task(task, now_secs, now_ms).await {
                Ok(result) if result.passed => report.completed += 1,
                Ok(_) => report.escalated += 1,
                Err(RuntimeError::Policy(_)) => report.claim_failures += 1,
                Err(_) => report.escalated += 1,
            }
        }

        self.metrics.counter("agenc.runtime.cycle_scanned", tasks.len() as f64, &[]);
        Ok(report)
    }

    /// Claims one task, runs it through the Verifier Lane under cooperative
    /// cancellation, and completes or escalates it, auditing each step.
    pub async fn execute_task(&self, task: &Task, now_secs: u64, now_ms: u64) -> Result<VerifierExecutionResult, RuntimeError> {
        let actor = self.actor.read().clone();

        let claim_key = format!("task.claim:{}", task.task_id);
        if let Err(err) = self.policy.check(
            &PolicyCheckContext {
                actor: &actor,
                action_key: &claim_key,
                spend_lamports: Some(0),
                risk_score: Some(0.0),
                operation: Operation::Write,
            },
            now_ms,
        ) {
            self.append_audit(&actor, "task.claim", false, task, None, now_ms);
            return Err(RuntimeError::Policy(err));
        }

        let claim_tx = retry_with_backoff(&self.retry, || self.chain_client.claim_task(task)).await?;
        self.append_audit(&actor, "task.claim", true, task, Some(&json!({"tx": claim_tx})), now_ms);

        let execution = self.run_verifier_lane(task, now_secs).await;

        match execution {
            Ok(result) if result.passed => {
                let complete_tx = retry_with_backoff(&self.retry, || self.chain_client.complete_task(task, &result.output)).await?;
                self.append_audit(
                    &actor,
                    "task.complete",
                    true,
                    task,
                    Some(&json!({"tx": complete_tx, "output_len": result.output.len()})),
                    now_ms,
                );
                Ok(result)
            }
            Ok(result) => {
                self.append_audit(&actor, "task.verify", true, task, Some(&json!({"passed": false})), now_ms);
                Ok(result)
            }
            Err(err) => {
                self.append_audit(&actor, "task.verify", false, task, Some(&json!({"error": err.to_string()})), now_ms);
                Err(RuntimeError::VerifierLane(err))
            }
        }
    }

    /// Drives the Verifier Lane, racing it against the shutdown signal.
    /// A shutdown mid-flight unwinds to a `timeout` escalation rather than
    /// leaving the invocation half-finished (§4.17, §5 "Cancellation").
    async fn run_verifier_lane(&self, task: &Task, now_secs: u64) -> Result<VerifierExecutionResult, VerifierLaneError> {
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                Err(VerifierLaneError::escalation("timeout", 0, 0).with_details("cancelled by runtime shutdown"))
            }
            result = self.verifier_lane.execute(task, now_secs) => result,
        }
    }

    fn append_audit(&self, actor: &str, action: &str, allowed: bool, task: &Task, output: Option<&serde_json::Value>, now_ms: u64) {
        let input_hash = sha256_hex(&json!({"taskId": task.task_id.to_string(), "action": action}));
        let output_hash = output.map(sha256_hex).unwrap_or_default();
        let role = if allowed { Role::Execute } else { Role::Read };
        self.audit.append(AuditEntry {
            seq: 0,
            actor: actor.to_string(),
            role: format!("{:?}", role).to_lowercase(),
            action: action.to_string(),
            permission: if allowed { "allow".to_string() } else { "deny".to_string() },
            timestamp_ms: now_ms,
            input_hash,
            output_hash,
            prev_hash: String::new(),
            entry_hash: String::new(),
            metadata: output.cloned(),
        });
    }

    /// Drains in-flight work and flushes durable state (§4.17 shutdown).
    /// Triggers the shutdown signal first so any racing `execute_task`
    /// unwinds before the store is flushed.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.shutdown.trigger();
        self.store.flush().await.map_err(RuntimeError::Store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::audit::AuditTrail;
    use crate::candidates::{Executor, ExecutionResult};
    use crate::metrics::NoopMetrics;
    use crate::policy::PolicyConfig;
    use crate::replay::store::memory::InMemoryReplayStore;
    use crate::types::{TaskId, TaskStatus, TaskType, VerifierOutcome, Verdict};
    use crate::verifier_lane::{Verifier, VerifierLaneConfig};

    fn task() -> Task {
        Task {
            task_id: TaskId([7u8; 32]),
            creator: "alice".to_string(),
            required_capabilities: 0,
            reward_lamports: 10,
            deadline_secs: 0,
            max_workers: 1,
            current_claims: 0,
            task_type: TaskType::Exclusive,
            status: TaskStatus::Open,
            constraint_hash: None,
        }
    }

    struct FlakyChainClient {
        claim_failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl ChainClient for FlakyChainClient {
        async fn subscribe_tasks(&self) -> Result<Vec<Task>, ChainClientError> {
            Ok(vec![task()])
        }
        async fn claim_task(&self, _task: &Task) -> Result<String, ChainClientError> {
            let remaining = self.claim_failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.claim_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(ChainClientError::CallFailed("flaky".to_string()));
            }
            Ok("claim-tx".to_string())
        }
        async fn complete_task(&self, _task: &Task, _output: &[U256]) -> Result<String, ChainClientError> {
            Ok("complete-tx".to_string())
        }
        async fn get_slot(&self) -> Result<u64, ChainClientError> {
            Ok(1)
        }
    }

    struct AlwaysFailChainClient;

    #[async_trait]
    impl ChainClient for AlwaysFailChainClient {
        async fn subscribe_tasks(&self) -> Result<Vec<Task>, ChainClientError> {
            Ok(vec![])
        }
        async fn claim_task(&self, _task: &Task) -> Result<String, ChainClientError> {
            Err(ChainClientError::CallFailed("down".to_string()))
        }
        async fn complete_task(&self, _task: &Task, _output: &[U256]) -> Result<String, ChainClientError> {
            Err(ChainClientError::CallFailed("down".to_string()))
        }
        async fn get_slot(&self) -> Result<u64, ChainClientError> {
            Err(ChainClientError::CallFailed("down".to_string()))
        }
    }

    struct FixedExecutor;

    #[async_trait]
    impl Executor for FixedExecutor {
        async fn execute(&self, _task: &Task, _seed: u64, _attempt: u32) -> ExecutionResult {
            ExecutionResult {
                output: vec![U256::from_u64(42)],
                token_estimate: 1,
                cost_lamports: 1,
            }
        }
        async fn revise(&self, _task: &Task, previous_output: &[U256], _reasons: &[String]) -> ExecutionResult {
            ExecutionResult {
                output: previous_output.to_vec(),
                token_estimate: 1,
                cost_lamports: 1,
            }
        }
    }

    struct PassVerifier;

    #[async_trait]
    impl Verifier for PassVerifier {
        async fn verify(
            &self,
            _task: &Task,
            _output: &[U256],
            _attempt: u32,
            _candidates: Option<&[crate::types::Candidate]>,
        ) -> Result<VerifierOutcome, String> {
            Ok(VerifierOutcome::clamped(Verdict::Pass, 0.9, vec![]))
        }
    }

    fn test_lane() -> Arc<VerifierLane> {
        Arc::new(VerifierLane::new(
            VerifierLaneConfig::default(),
            Arc::new(FixedExecutor),
            Arc::new(PassVerifier),
            Arc::new(NoopMetrics),
        ))
    }

    fn test_glue(chain_client: Arc<dyn ChainClient>) -> RuntimeGlue {
        RuntimeGlue::new(
            chain_client,
            test_lane(),
            Arc::new(InMemoryReplayStore::default()),
            Arc::new(PolicyEngine::new(PolicyConfig::default())),
            Arc::new(AuditTrail::new()),
            Arc::new(NoopMetrics),
        )
        .with_retry_config(RetryConfig {
            base_ms: 1,
            factor: 2,
            cap_ms: 4,
            max_attempts: 3,
        })
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let client = FlakyChainClient {
            claim_failures_remaining: AtomicU32::new(2),
        };
        let glue = test_glue(Arc::new(client));
        let result = glue.execute_task(&task(), 0, 0).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn retry_exhausts_and_surfaces_retries_exhausted() {
        let glue = test_glue(Arc::new(AlwaysFailChainClient));
        let err = glue.execute_task(&task(), 0, 0).await.unwrap_err();
        match err {
            RuntimeError::ChainClient(ChainClientError::RetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, 3);
            }
            other => panic!("expected retries-exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_run_appends_claim_and_complete_audit_entries() {
        let client = FlakyChainClient {
            claim_failures_remaining: AtomicU32::new(0),
        };
        let glue = test_glue(Arc::new(client));
        glue.execute_task(&task(), 0, 0).await.unwrap();

        let entries = glue.audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "task.claim");
        assert_eq!(entries[1].action, "task.complete");
        assert_eq!(entries[1].permission, "allow");
    }

    #[tokio::test]
    async fn shutdown_triggered_before_verify_escalates_as_timeout() {
        let client = FlakyChainClient {
            claim_failures_remaining: AtomicU32::new(0),
        };
        let glue = test_glue(Arc::new(client));
        glue.shutdown_signal().trigger();

        let err = glue.execute_task(&task(), 0, 0).await.unwrap_err();
        match err {
            RuntimeError::VerifierLane(VerifierLaneError::Escalation { reason, .. }) => {
                assert_eq!(reason, "timeout");
            }
            other => panic!("expected timeout escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn policy_violation_blocks_claim_before_chain_client_is_called() {
        let client = AlwaysFailChainClient;
        let glue = RuntimeGlue::new(
            Arc::new(client),
            test_lane(),
            Arc::new(InMemoryReplayStore::default()),
            Arc::new(PolicyEngine::new(PolicyConfig {
                enabled: true,
                max_risk_score: Some(-1.0),
                ..PolicyConfig::default()
            })),
            Arc::new(AuditTrail::new()),
            Arc::new(NoopMetrics),
        );

        let err = glue.execute_task(&task(), 0, 0).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Policy(_)));
        assert_eq!(glue.audit.len(), 1);
        assert_eq!(glue.audit.entries()[0].permission, "deny");
    }
}
