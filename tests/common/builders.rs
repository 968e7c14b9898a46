use iceprod_scheduler::config::{MaterializationConfig, PriorityConfig};
use iceprod_scheduler::constants::{DatasetStatus, JobStatus, TaskStatus};
use iceprod_scheduler::datastore::InMemoryDatastore;
use iceprod_scheduler::models::{Dataset, DatasetConfig, Job, RawDependency, Task, TaskTemplate};
use iceprod_scheduler::orchestration::Materializer;
use iceprod_scheduler::priority::PriorityEngine;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Builder for datasets with sensible defaults
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    dataset: Dataset,
}

impl DatasetBuilder {
    pub fn new(dataset_id: &str) -> Self {
        Self {
            dataset: Dataset {
                dataset_id: dataset_id.to_string(),
                dataset: 20000,
                username: "alice".to_string(),
                group: "simulation".to_string(),
                status: DatasetStatus::Processing,
                tasks_per_job: 3,
                jobs_submitted: 2,
                tasks_submitted: 6,
                priority: 0.5,
                debug: false,
            },
        }
    }

    pub fn tasks_per_job(mut self, tasks_per_job: u32) -> Self {
        self.dataset.tasks_per_job = tasks_per_job;
        self
    }

    pub fn jobs_submitted(mut self, jobs_submitted: u64) -> Self {
        self.dataset.jobs_submitted = jobs_submitted;
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.dataset.priority = priority;
        self
    }

    pub fn user(mut self, username: &str) -> Self {
        self.dataset.username = username.to_string();
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.dataset.group = group.to_string();
        self
    }

    pub fn status(mut self, status: DatasetStatus) -> Self {
        self.dataset.status = status;
        self
    }

    pub fn build(mut self) -> Dataset {
        self.dataset.tasks_submitted =
            self.dataset.jobs_submitted * u64::from(self.dataset.tasks_per_job);
        self.dataset
    }
}

pub fn name_dep(name: &str) -> RawDependency {
    RawDependency::Name(name.to_string())
}

pub fn index_dep(index: i64) -> RawDependency {
    RawDependency::Index(index)
}

pub fn template(name: &str, depends: Vec<RawDependency>) -> TaskTemplate {
    TaskTemplate {
        name: name.to_string(),
        depends,
        requirements: Map::new(),
    }
}

pub fn config_of(tasks: Vec<TaskTemplate>) -> DatasetConfig {
    DatasetConfig {
        tasks,
        parameters: Map::new(),
    }
}

/// `[A, B(depends=A), C(depends=1)]`
pub fn abc_config() -> DatasetConfig {
    config_of(vec![
        template("A", vec![]),
        template("B", vec![name_dep("A")]),
        template("C", vec![index_dep(1)]),
    ])
}

pub fn parameters(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn job(job_id: &str, dataset_id: &str, job_index: u64) -> Job {
    Job {
        job_id: job_id.to_string(),
        dataset_id: dataset_id.to_string(),
        job_index,
        status: JobStatus::Processing,
    }
}

/// Builder for tasks inserted directly into the in-memory store
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(task_id: &str) -> Self {
        Self {
            task: Task {
                task_id: task_id.to_string(),
                dataset_id: "d1".to_string(),
                job_id: format!("job-of-{task_id}"),
                job_index: 0,
                task_index: 0,
                name: "main".to_string(),
                depends: vec![],
                requirements: Default::default(),
                status: TaskStatus::Idle,
                priority: 0.0,
            },
        }
    }

    pub fn dataset(mut self, dataset_id: &str) -> Self {
        self.task.dataset_id = dataset_id.to_string();
        self
    }

    pub fn job(mut self, job_id: &str, job_index: u64) -> Self {
        self.task.job_id = job_id.to_string();
        self.task.job_index = job_index;
        self
    }

    pub fn index(mut self, task_index: u32, name: &str) -> Self {
        self.task.task_index = task_index;
        self.task.name = name.to_string();
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn depends_on(mut self, task_ids: &[&str]) -> Self {
        self.task.depends = task_ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

pub fn materializer_with(
    store: &Arc<InMemoryDatastore>,
    config: MaterializationConfig,
) -> Materializer {
    Materializer::new(
        store.clone(),
        PriorityEngine::new(PriorityConfig::default()),
        config,
    )
}

pub fn materializer(store: &Arc<InMemoryDatastore>) -> Materializer {
    materializer_with(store, MaterializationConfig::default())
}

/// Materialization settings whose cycle budget is already spent
pub fn exhausted_budget() -> MaterializationConfig {
    MaterializationConfig {
        cycle_timeout_seconds: 0,
        ..MaterializationConfig::default()
    }
}
