//! Dispatcher behaviour: due-task execution, daily ceilings, events,
//! heartbeat prompt override, and the single-flight tick lock.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use tether_core::{
    BudgetLimits, Event, EventBus, Role, RunStatus, ScheduleKind, TaskSpec, Tool, ToolHandler,
};
use tether_engine::{DailyLimits, Dispatcher, TaskRunner, ToolRegistry};
use tether_llm::MockProvider;
use tether_store::TaskStore;

struct SlowTool {
    delay: StdDuration,
}

#[async_trait]
impl ToolHandler for SlowTool {
    fn descriptor(&self) -> Tool {
        Tool {
            name: "slow".into(),
            description: "sleeps".into(),
            parameters: json!({"type": "object"}),
            is_mutating: false,
        }
    }

    async fn execute(&self, _args: &Value) -> tether_core::Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok("woke up".to_string())
    }
}

fn due_spec(name: &str) -> TaskSpec {
    TaskSpec::new(name, "check things", ScheduleKind::Interval, "4h")
}

fn build(
    store: Arc<TaskStore>,
    provider: MockProvider,
    registry: ToolRegistry,
    limits: DailyLimits,
    heartbeat_file: Option<std::path::PathBuf>,
) -> Dispatcher {
    let runner = TaskRunner::new(Arc::new(provider), "test-model", None, 1024, 0.7);
    Dispatcher::new(
        store,
        runner,
        Arc::new(registry),
        EventBus::default(),
        limits,
        heartbeat_file,
    )
}

/// Drain every buffered event from the receiver.
fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

#[tokio::test]
async fn test_tick_runs_due_task_to_completion() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let task = store
        .create_task(&due_spec("reminders"), Utc::now() - Duration::minutes(1))
        .unwrap();

    let provider = MockProvider::new("mock").with_response("All clear.");
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits::default(),
        None,
    );
    let mut rx = dispatcher.events().subscribe();

    assert_eq!(dispatcher.tick().await.unwrap(), 1);

    let runs = store.recent_runs(10, Some(task.id)).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].summary, "All clear.");
    assert_eq!(runs[0].turns_used, 1);
    assert_eq!(runs[0].input_tokens, 100);
    assert!(runs[0].completed_at.is_some());
    assert!(runs[0].error.is_none());

    // Rescheduled into the future, last_run_at stamped.
    let task = store.get_task(task.id).unwrap().unwrap();
    assert!(task.last_run_at.is_some());
    assert!(task.next_run_at.unwrap() > Utc::now());

    // Daily usage counted.
    let usage = store.daily_usage_today().unwrap();
    assert_eq!(usage.input_tokens, 100);
    assert_eq!(usage.output_tokens, 50);
    assert_eq!(usage.task_runs, 1);

    let events = drain(&mut rx);
    assert!(matches!(events[0], Event::TaskStarted { .. }));
    assert!(matches!(events[1], Event::TaskCompleted { .. }));
}

#[tokio::test]
async fn test_tick_ignores_tasks_not_yet_due() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    store
        .create_task(&due_spec("later"), Utc::now() + Duration::hours(1))
        .unwrap();

    let dispatcher = build(
        store.clone(),
        MockProvider::new("mock"),
        ToolRegistry::new(),
        DailyLimits::default(),
        None,
    );
    assert_eq!(dispatcher.tick().await.unwrap(), 0);
    assert!(store.recent_runs(10, None).unwrap().is_empty());
}

#[tokio::test]
async fn test_provider_failure_records_failed_run_and_reschedules() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let task = store
        .create_task(&due_spec("flaky"), Utc::now() - Duration::minutes(1))
        .unwrap();

    let provider = MockProvider::new("mock").with_error("HTTP 500: upstream exploded");
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits::default(),
        None,
    );
    let mut rx = dispatcher.events().subscribe();

    assert_eq!(dispatcher.tick().await.unwrap(), 1);

    let runs = store.recent_runs(10, Some(task.id)).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap().contains("HTTP 500"));

    // A failing task is rescheduled, not retried immediately.
    let task = store.get_task(task.id).unwrap().unwrap();
    assert!(task.next_run_at.unwrap() > Utc::now());

    let events = drain(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::TaskFailed { error, .. } if error.contains("HTTP 500")))
    );
}

#[tokio::test]
async fn test_budget_exhaustion_is_its_own_status() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let mut spec = due_spec("hungry");
    spec.limits = BudgetLimits {
        max_turns: 1,
        ..Default::default()
    };
    let task = store
        .create_task(&spec, Utc::now() - Duration::minutes(1))
        .unwrap();

    // The model wants another turn; the ledger says no.
    let provider = MockProvider::new("mock").with_tool_call("search", json!({}));
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits::default(),
        None,
    );

    dispatcher.tick().await.unwrap();

    let runs = store.recent_runs(10, Some(task.id)).unwrap();
    assert_eq!(runs[0].status, RunStatus::BudgetExceeded);
    assert_eq!(
        runs[0].error.as_deref(),
        Some("budget exceeded: max turns (1)")
    );
}

#[tokio::test]
async fn test_daily_ceiling_defers_whole_tick() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    store
        .create_task(&due_spec("blocked"), Utc::now() - Duration::minutes(1))
        .unwrap();
    store.record_daily_usage(2_000_000, 0).unwrap();

    let dispatcher = build(
        store.clone(),
        MockProvider::new("mock").with_response("should never run"),
        ToolRegistry::new(),
        DailyLimits::default(),
        None,
    );

    assert_eq!(dispatcher.tick().await.unwrap(), 0);
    assert!(store.recent_runs(10, None).unwrap().is_empty());
}

#[tokio::test]
async fn test_ceiling_rechecked_between_tasks_in_one_tick() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    store
        .create_task(&due_spec("first"), Utc::now() - Duration::hours(2))
        .unwrap();
    store
        .create_task(&due_spec("second"), Utc::now() - Duration::hours(1))
        .unwrap();

    // Each mock run costs 100 input tokens; the ceiling admits only one.
    let provider = MockProvider::new("mock")
        .with_response("one")
        .with_response("two");
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits {
            input_tokens: 100,
            output_tokens: 100_000,
        },
        None,
    );

    assert_eq!(dispatcher.tick().await.unwrap(), 1);
    assert_eq!(store.recent_runs(10, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_persistence_failure_aborts_tick_and_leaves_tasks_due() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    // Inserted behind the admin layer's back: the expression can't be
    // evaluated, so rescheduling after the run fails.
    let broken = TaskSpec::new("broken", "p", ScheduleKind::Interval, "soonish");
    store
        .create_task(&broken, Utc::now() - Duration::hours(2))
        .unwrap();
    let healthy = store
        .create_task(&due_spec("healthy"), Utc::now() - Duration::hours(1))
        .unwrap();

    let provider = MockProvider::new("mock")
        .with_response("one")
        .with_response("two");
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits::default(),
        None,
    );

    // The failure propagates instead of being swallowed.
    assert!(dispatcher.tick().await.is_err());

    // At-least-once: the run itself was already recorded and finalized.
    let runs = store.recent_runs(10, None).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);

    // The later task never ran and is still due for the next tick.
    assert!(store.recent_runs(10, Some(healthy.id)).unwrap().is_empty());
    let due: Vec<_> = store
        .due_tasks(Utc::now())
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(due.contains(&"healthy".to_string()));
}

#[tokio::test]
async fn test_budget_warning_escalates_once_per_level() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let task = store
        .create_task(&due_spec("warm"), Utc::now() - Duration::minutes(1))
        .unwrap();

    // One run costs 100 of 120 input tokens: 83% → warning.
    let provider = MockProvider::new("mock")
        .with_response("one")
        .with_response("two")
        .with_response("three");
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits {
            input_tokens: 120,
            output_tokens: 1_000_000,
        },
        None,
    );
    let mut rx = dispatcher.events().subscribe();

    dispatcher.tick().await.unwrap();
    let warnings: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, Event::DailyBudgetWarning { .. }))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        warnings[0],
        Event::DailyBudgetWarning {
            level: tether_core::BudgetWarningLevel::Warning,
            ..
        }
    ));

    // A second run crosses 95%: exactly one escalation to critical,
    // and no repeat of the earlier warning.
    dispatcher.run_task_now(task.id).await.unwrap();
    dispatcher.run_task_now(task.id).await.unwrap();
    let warnings: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, Event::DailyBudgetWarning { .. }))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        warnings[0],
        Event::DailyBudgetWarning {
            level: tether_core::BudgetWarningLevel::Critical,
            ..
        }
    ));
}

#[tokio::test]
async fn test_heartbeat_prompt_read_from_file_each_run() {
    let dir = tempfile::tempdir().unwrap();
    let hb_path = dir.path().join("heartbeat.md");
    std::fs::write(&hb_path, "review the inbox and nothing else").unwrap();

    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let mut spec = due_spec("heartbeat");
    spec.is_heartbeat = true;
    spec.prompt = "stored fallback prompt".into();
    store
        .create_task(&spec, Utc::now() - Duration::minutes(1))
        .unwrap();

    let provider = MockProvider::new("mock").with_response("ok");
    let requests = provider.recorded_requests();
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits::default(),
        Some(hb_path),
    );

    dispatcher.tick().await.unwrap();

    let requests = requests.lock();
    let first = &requests[0].messages[0];
    assert_eq!(first.role, Role::User);
    assert_eq!(first.text_content(), "review the inbox and nothing else");
}

#[tokio::test]
async fn test_heartbeat_falls_back_to_stored_prompt() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let mut spec = due_spec("heartbeat");
    spec.is_heartbeat = true;
    spec.prompt = "stored fallback prompt".into();
    store
        .create_task(&spec, Utc::now() - Duration::minutes(1))
        .unwrap();

    let provider = MockProvider::new("mock").with_response("ok");
    let requests = provider.recorded_requests();
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits::default(),
        Some(std::path::PathBuf::from("/nonexistent/heartbeat.md")),
    );

    dispatcher.tick().await.unwrap();

    let requests = requests.lock();
    assert_eq!(
        requests[0].messages[0].text_content(),
        "stored fallback prompt"
    );
}

#[tokio::test]
async fn test_concurrent_tick_is_skipped_not_queued() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    store
        .create_task(&due_spec("slow"), Utc::now() - Duration::minutes(1))
        .unwrap();

    let provider = MockProvider::new("mock")
        .with_tool_call("slow", json!({}))
        .with_response("finally");
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SlowTool {
        delay: StdDuration::from_millis(300),
    }));

    let dispatcher = Arc::new(build(
        store.clone(),
        provider,
        registry,
        DailyLimits::default(),
        None,
    ));

    let first = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.tick().await })
    };
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    // The long run holds the tick lock; this tick must bail out fast.
    let started = std::time::Instant::now();
    assert_eq!(dispatcher.tick().await.unwrap(), 0);
    assert!(started.elapsed() < StdDuration::from_millis(100));

    assert_eq!(first.await.unwrap().unwrap(), 1);
    assert_eq!(store.recent_runs(10, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_task_now_ignores_schedule() {
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let task = store
        .create_task(&due_spec("manual"), Utc::now() + Duration::hours(3))
        .unwrap();

    let provider = MockProvider::new("mock").with_response("ran on demand");
    let dispatcher = build(
        store.clone(),
        provider,
        ToolRegistry::new(),
        DailyLimits::default(),
        None,
    );

    let outcome = dispatcher.run_task_now(task.id).await.unwrap();
    assert_eq!(outcome.summary, "ran on demand");

    let runs = store.recent_runs(10, Some(task.id)).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
}
