mod common;

use common::strategies::*;
use iceprod_scheduler::config::PriorityConfig;
use iceprod_scheduler::models::RawDependency;
use iceprod_scheduler::orchestration::DependencyToken;
use iceprod_scheduler::priority::{DatasetSummary, PriorityCache, PriorityEngine};
use proptest::prelude::*;

fn cache_of(summaries: &[DatasetSummary], user_priority: f64, group_priority: f64) -> PriorityCache {
    let mut cache = PriorityCache::new();
    for summary in summaries {
        cache.insert_user(summary.username.clone(), user_priority);
        cache.insert_group(summary.group.clone(), group_priority);
        cache.insert_dataset(summary.clone());
    }
    cache
}

fn summary(id: &str, user: &str, priority: f64) -> DatasetSummary {
    DatasetSummary {
        dataset_id: id.to_string(),
        username: user.to_string(),
        group: "simulation".to_string(),
        priority,
        tasks_per_job: 2,
        jobs_submitted: 100,
        tasks_submitted: 200,
        active_tasks: 50,
    }
}

proptest! {
    /// Property: dataset priority always lands in [0, 1]
    #[test]
    fn dataset_priority_is_bounded(
        summaries in dataset_summaries_strategy(),
        user_priority in priority_strategy(),
        group_priority in priority_strategy(),
    ) {
        let engine = PriorityEngine::new(PriorityConfig::default());
        let cache = cache_of(&summaries, user_priority, group_priority);
        for summary in &summaries {
            let priority = engine.compute_dataset_priority(&cache, &summary.dataset_id);
            prop_assert!((0.0..=1.0).contains(&priority), "{} out of range", priority);
        }
    }

    /// Property: task priority always lands in [0, 1]
    #[test]
    fn task_priority_is_bounded(
        summaries in dataset_summaries_strategy(),
        job_index in 0u64..10_000,
        task_index in 0u32..10,
    ) {
        let engine = PriorityEngine::new(PriorityConfig::default());
        let cache = cache_of(&summaries, 0.5, 0.5);
        for summary in &summaries {
            let priority = engine.compute_task_priority(&cache, &summary.dataset_id, job_index, task_index);
            prop_assert!((0.0..=1.0).contains(&priority), "{} out of range", priority);
        }
    }

    /// Property: lower dataset and user priority never outranks higher, all else equal
    #[test]
    fn priority_is_monotonic_in_dataset_and_user_weight(
        high_dataset in 0.01f64..=1.0,
        dataset_ratio in 0.0f64..=1.0,
        high_user in 0.01f64..=1.0,
        user_ratio in 0.0f64..=1.0,
    ) {
        let mut cache = PriorityCache::new();
        cache.insert_dataset(summary("high", "alice", high_dataset));
        cache.insert_dataset(summary("low", "bob", high_dataset * dataset_ratio));
        cache.insert_user("alice", high_user);
        cache.insert_user("bob", high_user * user_ratio);
        cache.insert_group("simulation", 1.0);

        let engine = PriorityEngine::new(PriorityConfig::default());
        let high = engine.compute_dataset_priority(&cache, "high");
        let low = engine.compute_dataset_priority(&cache, "low");
        prop_assert!(low <= high + 1e-12, "low {} > high {}", low, high);
    }

    /// Property: a local dependency parses only when it names an existing template slot
    #[test]
    fn local_index_dependencies_parse_within_template(
        template_len in 1usize..10,
        index in -5i64..15,
    ) {
        let names: Vec<String> = (0..template_len).map(|i| format!("task{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let parsed = DependencyToken::parse(&RawDependency::Index(index), &names);
        if index >= 0 && (index as usize) < template_len {
            prop_assert_eq!(parsed, Ok(DependencyToken::Local(index as usize)));
        } else {
            prop_assert!(parsed.is_err());
        }
    }
}
