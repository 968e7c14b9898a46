mod common;

use common::*;
use iceprod_scheduler::config::QueueAdmissionConfig;
use iceprod_scheduler::constants::TaskStatus;
use iceprod_scheduler::datastore::InMemoryDatastore;
use iceprod_scheduler::orchestration::QueueAdmission;
use std::sync::Arc;
use std::time::Duration;

fn admission(store: &Arc<InMemoryDatastore>) -> QueueAdmission {
    QueueAdmission::new(store.clone(), QueueAdmissionConfig::default())
}

fn insert_idle(store: &InMemoryDatastore, count: usize) {
    for i in 0..count {
        store.insert_task(
            TaskBuilder::new(&format!("t{i:03}"))
                .priority(i as f64 / count as f64)
                .build(),
        );
    }
}

fn statuses(store: &InMemoryDatastore, status: TaskStatus) -> Vec<String> {
    store
        .tasks_for_dataset("d1")
        .into_iter()
        .filter(|t| t.status == status)
        .map(|t| t.task_id)
        .collect()
}

#[tokio::test]
async fn test_admits_up_to_max_total_ready_by_priority() {
    let store = Arc::new(InMemoryDatastore::new());
    insert_idle(&store, 100);

    let report = admission(&store).run(50, 1000).await.unwrap();
    assert_eq!(report.to_admit, 50);
    assert_eq!(report.admitted, 50);

    let mut waiting = statuses(&store, TaskStatus::Waiting);
    waiting.sort();
    let expected: Vec<String> = (50..100).map(|i| format!("t{i:03}")).collect();
    assert_eq!(waiting, expected);
}

#[tokio::test]
async fn test_waiting_tasks_reduce_room() {
    let store = Arc::new(InMemoryDatastore::new());
    insert_idle(&store, 100);
    for i in 0..30 {
        store.insert_task(
            TaskBuilder::new(&format!("w{i:03}"))
                .status(TaskStatus::Waiting)
                .build(),
        );
    }

    let report = admission(&store).run(50, 1000).await.unwrap();
    assert_eq!(report.admitted, 20);
    assert_eq!(statuses(&store, TaskStatus::Waiting).len(), 50);

    // Full: nothing more to do
    let report = admission(&store).run(50, 1000).await.unwrap();
    assert_eq!(report.to_admit, 0);
    assert_eq!(report.admitted, 0);
}

#[tokio::test]
async fn test_max_per_cycle_caps_admission() {
    let store = Arc::new(InMemoryDatastore::new());
    insert_idle(&store, 40);

    let report = admission(&store).run(10_000, 15).await.unwrap();
    assert_eq!(report.admitted, 15);
}

#[tokio::test]
async fn test_unmet_dependencies_block_and_zero_priority() {
    let store = Arc::new(InMemoryDatastore::new());
    store.insert_task(
        TaskBuilder::new("done")
            .status(TaskStatus::Complete)
            .build(),
    );
    store.insert_task(
        TaskBuilder::new("running")
            .status(TaskStatus::Processing)
            .build(),
    );
    store.insert_task(
        TaskBuilder::new("ready")
            .priority(0.9)
            .depends_on(&["done"])
            .build(),
    );
    store.insert_task(
        TaskBuilder::new("blocked")
            .priority(0.8)
            .depends_on(&["done", "running"])
            .build(),
    );
    store.insert_task(
        TaskBuilder::new("orphan")
            .priority(0.7)
            .depends_on(&["deleted-task"])
            .build(),
    );

    let report = admission(&store).run(100, 100).await.unwrap();
    assert_eq!(report.candidates, 3);
    assert_eq!(report.admitted, 1);
    assert_eq!(report.dependency_blocked, 2);
    assert_eq!(report.check_errors, 0);

    assert_eq!(store.task("ready").unwrap().status, TaskStatus::Waiting);
    let blocked = store.task("blocked").unwrap();
    assert_eq!(blocked.status, TaskStatus::Idle);
    assert_eq!(blocked.priority, 0.0);
    assert_eq!(store.task("orphan").unwrap().priority, 0.0);
}

#[tokio::test]
async fn test_extra_successful_checks_are_trimmed_in_priority_order() {
    let store = Arc::new(InMemoryDatastore::new());
    store.insert_task(
        TaskBuilder::new("done")
            .status(TaskStatus::Complete)
            .build(),
    );
    for i in 0..10 {
        store.insert_task(
            TaskBuilder::new(&format!("dep{i}"))
                .priority(f64::from(i) / 10.0)
                .depends_on(&["done"])
                .build(),
        );
    }

    let report = admission(&store).run(100, 3).await.unwrap();
    assert_eq!(report.admitted, 3);

    let mut waiting = statuses(&store, TaskStatus::Waiting);
    waiting.sort();
    assert_eq!(waiting, vec!["dep7", "dep8", "dep9"]);
}

#[tokio::test]
async fn test_admission_is_batched() {
    let store = Arc::new(InMemoryDatastore::new());
    insert_idle(&store, 250);

    let report = admission(&store).run(1000, 1000).await.unwrap();
    assert_eq!(report.admitted, 250);
    // One bulk status call per 100 ids
    assert_eq!(store.write_count(), 3);
}

#[tokio::test]
async fn test_low_concurrency_limit_still_checks_every_candidate() {
    let store = Arc::new(InMemoryDatastore::new());
    store.insert_task(
        TaskBuilder::new("done")
            .status(TaskStatus::Complete)
            .build(),
    );
    for i in 0..6 {
        store.insert_task(
            TaskBuilder::new(&format!("dep{i}"))
                .priority(0.5)
                .depends_on(&["done"])
                .build(),
        );
    }

    let admission = QueueAdmission::new(
        store.clone(),
        QueueAdmissionConfig {
            max_concurrent_dependency_checks: 2,
            ..QueueAdmissionConfig::default()
        },
    );
    let report = admission.run(100, 100).await.unwrap();
    assert_eq!(report.admitted, 6);
}

#[tokio::test]
async fn test_dependency_checks_never_exceed_concurrency_limit() {
    let store = Arc::new(InMemoryDatastore::new());
    store.insert_task(
        TaskBuilder::new("upstream")
            .status(TaskStatus::Processing)
            .build(),
    );
    for i in 0..30 {
        store.insert_task(
            TaskBuilder::new(&format!("blocked{i:02}"))
                .priority(0.5)
                .depends_on(&["upstream"])
                .build(),
        );
    }
    store.delay_task_reads(Duration::from_millis(5));

    let limit = 4;
    let admission = QueueAdmission::new(
        store.clone(),
        QueueAdmissionConfig {
            max_concurrent_dependency_checks: limit,
            ..QueueAdmissionConfig::default()
        },
    );
    let report = admission.run(100, 100).await.unwrap();

    assert_eq!(report.dependency_blocked, 30);
    assert_eq!(report.admitted, 0);
    let peak = store.peak_concurrent_task_reads();
    assert!(peak <= limit as u64, "peak {peak} exceeded limit {limit}");
    assert!(peak > 1, "checks never overlapped");
}
