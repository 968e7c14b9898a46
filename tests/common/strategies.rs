use iceprod_scheduler::priority::DatasetSummary;
use proptest::prelude::*;

/// Configured priorities for datasets, users and groups
pub fn priority_strategy() -> impl Strategy<Value = f64> {
    0.0f64..=1.0
}

pub fn username_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("alice"), Just("bob"), Just("carol")].prop_map(|s| s.to_string())
}

pub fn group_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("simulation"), Just("analysis")].prop_map(|s| s.to_string())
}

pub fn dataset_summary_strategy(dataset_id: String) -> impl Strategy<Value = DatasetSummary> {
    (
        username_strategy(),
        group_strategy(),
        priority_strategy(),
        1u32..10,
        0u64..5000,
        0u64..10_000,
    )
        .prop_map(
            move |(username, group, priority, tasks_per_job, jobs_submitted, active_tasks)| {
                DatasetSummary {
                    dataset_id: dataset_id.clone(),
                    username,
                    group,
                    priority,
                    tasks_per_job,
                    jobs_submitted,
                    tasks_submitted: jobs_submitted * u64::from(tasks_per_job),
                    active_tasks,
                }
            },
        )
}

/// Between one and eight datasets named `d0`, `d1`, ...
pub fn dataset_summaries_strategy() -> impl Strategy<Value = Vec<DatasetSummary>> {
    (1usize..8).prop_flat_map(|count| {
        (0..count)
            .map(|i| dataset_summary_strategy(format!("d{i}")))
            .collect::<Vec<_>>()
    })
}
