use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::executor::{self, Executor};
use crate::kernel::error::Error;

// Records which steps ran and in what order
struct ExecutionTracker {
    executed_steps: Mutex<Vec<String>>,
    execution_count: AtomicU32,
}

impl ExecutionTracker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            executed_steps: Mutex::new(Vec::new()),
            execution_count: AtomicU32::new(0),
        })
    }

    async fn record_execution(&self, step: &str) {
        self.executed_steps.lock().await.push(step.to_string());
        self.execution_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn get_execution_order(&self) -> Vec<String> {
        self.executed_steps.lock().await.clone()
    }

    fn get_execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::SeqCst)
    }
}

struct MockStep {
    id: String,
    tracker: Arc<ExecutionTracker>,
    error_message: Option<String>,
    delay: Duration,
}

impl MockStep {
    fn new(id: &str, tracker: &Arc<ExecutionTracker>) -> Self {
        Self {
            id: id.to_string(),
            tracker: tracker.clone(),
            error_message: None,
            delay: Duration::ZERO,
        }
    }

    fn with_error(mut self, error_message: &str) -> Self {
        self.error_message = Some(error_message.to_string());
        self
    }

    fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    fn build(self) -> Executor {
        Executor::new(move || async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.tracker.record_execution(&self.id).await;
            match self.error_message {
                Some(message) => Err(Error::Other(message)),
                None => Ok(()),
            }
        })
    }
}

#[tokio::test]
async fn test_sequence_runs_in_order() {
    let tracker = ExecutionTracker::new();
    let workflow = executor::sequence(vec![
        MockStep::new("one", &tracker).build(),
        MockStep::new("two", &tracker).build(),
        MockStep::new("three", &tracker).build(),
    ]);

    workflow.execute().await.expect("sequence should succeed");
    assert_eq!(tracker.get_execution_order().await, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_sequence_stops_at_first_failure() {
    let tracker = ExecutionTracker::new();
    let workflow = executor::sequence(vec![
        MockStep::new("one", &tracker).build(),
        MockStep::new("two", &tracker).with_error("boom").build(),
        MockStep::new("three", &tracker).build(),
    ]);

    let err = workflow.execute().await.unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert_eq!(tracker.get_execution_order().await, vec!["one", "two"]);
}

#[tokio::test]
async fn test_parallel_runs_all_children_and_returns_first_failure_in_child_order() {
    let tracker = ExecutionTracker::new();
    let workflow = executor::parallel(vec![
        MockStep::new("slow-failure", &tracker).with_delay(30).with_error("first").build(),
        MockStep::new("fast-failure", &tracker).with_error("second").build(),
        MockStep::new("ok", &tracker).build(),
    ]);

    let err = workflow.execute().await.unwrap_err();
    assert_eq!(err.to_string(), "first");
    assert_eq!(tracker.get_execution_count(), 3);
}

#[tokio::test]
async fn test_parallel_children_overlap() {
    let tracker = ExecutionTracker::new();
    let workflow = executor::parallel(vec![
        MockStep::new("a", &tracker).with_delay(40).build(),
        MockStep::new("b", &tracker).build(),
    ]);

    workflow.execute().await.expect("parallel should succeed");
    // the undelayed child finishes first when both are in flight together
    assert_eq!(tracker.get_execution_order().await, vec!["b", "a"]);
}

#[tokio::test]
async fn test_conditional_picks_branch_at_run_time() {
    let tracker = ExecutionTracker::new();
    let flag = Arc::new(Mutex::new(false));

    let flag_setter = flag.clone();
    let predicate_flag = flag.clone();
    let workflow = executor::sequence(vec![
        Executor::new(move || async move {
            *flag_setter.lock().await = true;
            Ok(())
        }),
        executor::conditional(
            move || async move { *predicate_flag.lock().await },
            MockStep::new("then", &tracker).build(),
            Some(MockStep::new("otherwise", &tracker).build()),
        ),
    ]);

    workflow.execute().await.expect("conditional should succeed");
    assert_eq!(tracker.get_execution_order().await, vec!["then"]);
}

#[tokio::test]
async fn test_conditional_without_else_is_noop() {
    let tracker = ExecutionTracker::new();
    let workflow = executor::conditional(|| async { false }, MockStep::new("then", &tracker).build(), None);

    workflow.execute().await.expect("conditional should succeed");
    assert_eq!(tracker.get_execution_count(), 0);
}

#[tokio::test]
async fn test_errored_defers_failure_until_run() {
    let workflow = executor::errored(Error::Other("bad input".into()));
    let err = workflow.execute().await.unwrap_err();
    assert_eq!(err.to_string(), "bad input");
}

#[tokio::test]
async fn test_warn_on_fail_swallows_matching_errors_only() {
    let tracker = ExecutionTracker::new();

    let swallowed = executor::warn_on_fail(
        |err| err.to_string().contains("in use"),
        MockStep::new("vpc", &tracker).with_error("vpc is in use").build(),
    );
    swallowed.execute().await.expect("matching failure should be swallowed");

    let surfaced = executor::warn_on_fail(
        |err| err.to_string().contains("in use"),
        MockStep::new("vpc", &tracker).with_error("access denied").build(),
    );
    let err = surfaced.execute().await.unwrap_err();
    assert_eq!(err.to_string(), "access denied");
}
