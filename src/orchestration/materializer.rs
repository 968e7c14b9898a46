//! # Materializer
//!
//! Expands datasets into job and task rows a bounded number of jobs at a time.
//!
//! Each pass over a dataset runs two phases:
//!
//! 1. **Repair**: if the dataset's task count is not a multiple of
//!    `tasks_per_job`, walk jobs backwards from the newest and fill in any job
//!    holding fewer than `tasks_per_job` tasks. This recovers from a crash
//!    between creating a job and creating all of its tasks.
//! 2. **Growth**: buffer up to `num_jobs` new jobs until `jobs_submitted` is
//!    reached, checking the cycle budget between whole jobs.
//!
//! Every run builds a fresh [`RunContext`] holding the priority cache and the
//! task-template cache, so nothing loaded in one run is visible to the next.

use super::dependency_resolution::{
    finish_dependencies, prepare_dependencies, DependencyContext, DependencyToken,
    PendingDependency,
};
use super::requirements::{parse_requirements, RequirementContext};
use crate::config::MaterializationConfig;
use crate::constants::{DatasetStatus, JobStatus, TaskStatus};
use crate::datastore::{Datastore, TaskFilter};
use crate::error::{Result, SchedulerError};
use crate::logging::{log_dataset_operation, log_error};
use crate::models::{
    Dataset, DatasetConfig, NewJob, NewTask, Requirements, Task, TaskOptions, TaskTemplate,
};
use crate::priority::{PriorityCache, PriorityEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Parameters for one materialization pass
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Materialize only this dataset, propagating its errors
    pub only_dataset: Option<String>,
    /// Initial status for created tasks, overriding the configured default
    pub set_status: Option<TaskStatus>,
    /// Maximum new jobs per dataset
    pub num_jobs: u64,
    /// Resolve and evaluate everything but write nothing
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new(num_jobs: u64) -> Self {
        Self {
            only_dataset: None,
            set_status: None,
            num_jobs,
            dry_run: false,
        }
    }

    pub fn for_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.only_dataset = Some(dataset_id.into());
        self
    }

    pub fn with_status(mut self, status: Option<TaskStatus>) -> Self {
        self.set_status = status;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// State scoped to a single run
#[derive(Debug)]
pub struct RunContext {
    pub priority_cache: PriorityCache,
    configs: HashMap<String, Arc<DatasetConfig>>,
    started: Instant,
    budget: Duration,
}

impl RunContext {
    pub fn new(budget: Duration) -> Self {
        Self {
            priority_cache: PriorityCache::new(),
            configs: HashMap::new(),
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget_exceeded(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    async fn dataset_config(
        &mut self,
        datastore: &dyn Datastore,
        dataset_id: &str,
    ) -> Result<Arc<DatasetConfig>> {
        if let Some(config) = self.configs.get(dataset_id) {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(datastore.get_dataset_config(dataset_id).await?);
        self.configs.insert(dataset_id.to_string(), Arc::clone(&config));
        Ok(config)
    }
}

/// One call to [`Materializer::buffer_job`]
#[derive(Debug, Clone)]
pub struct BufferJob<'a> {
    pub dataset: &'a Dataset,
    pub job_index: u64,
    /// Existing job to complete; a new job is created when absent
    pub job_id: Option<String>,
    /// Tasks of `job_id` that already exist
    pub existing_tasks: Vec<Task>,
    pub set_status: Option<TaskStatus>,
    pub dry_run: bool,
}

/// What one dataset pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetOutcome {
    pub repaired_jobs: u64,
    pub jobs_buffered: u64,
    pub tasks_created: u64,
    /// False when the cycle budget ran out before every requested job was buffered
    pub finished: bool,
}

pub struct Materializer {
    datastore: Arc<dyn Datastore>,
    priority: PriorityEngine,
    config: MaterializationConfig,
}

impl Materializer {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        priority: PriorityEngine,
        config: MaterializationConfig,
    ) -> Self {
        Self {
            datastore,
            priority,
            config,
        }
    }

    pub fn config(&self) -> &MaterializationConfig {
        &self.config
    }

    /// Fresh per-run state with this materializer's cycle budget
    pub fn new_run_context(&self) -> RunContext {
        RunContext::new(self.config.cycle_timeout())
    }

    /// Materialize the target dataset, or every `processing` dataset.
    ///
    /// Returns `false` when the cycle budget ran out and the caller should
    /// reschedule. In multi-dataset mode a failing dataset is logged and
    /// skipped; in single-dataset mode its error is returned.
    #[instrument(skip(self, options), fields(only_dataset = ?options.only_dataset, dry_run = options.dry_run))]
    pub async fn run_once(&self, options: &RunOptions) -> Result<bool> {
        let mut ctx = self.new_run_context();
        let single = options.only_dataset.is_some();

        let dataset_ids = match &options.only_dataset {
            Some(dataset_id) => vec![dataset_id.clone()],
            None => self
                .datastore
                .dataset_ids_by_status()
                .await?
                .remove(&DatasetStatus::Processing)
                .unwrap_or_default(),
        };

        info!(
            datasets = dataset_ids.len(),
            num_jobs = options.num_jobs,
            "🚀 Starting materialization run"
        );

        let mut finished = true;
        for (position, dataset_id) in dataset_ids.iter().enumerate() {
            if !single && ctx.budget_exceeded() {
                warn!(
                    skipped = dataset_ids.len() - position,
                    "⏱️ Cycle budget exhausted, deferring remaining datasets"
                );
                finished = false;
                break;
            }

            match self
                .materialize_dataset(&mut ctx, dataset_id, options, single)
                .await
            {
                Ok(outcome) => {
                    log_dataset_operation(
                        "materialize",
                        dataset_id,
                        if outcome.finished { "complete" } else { "incomplete" },
                        outcome.jobs_buffered,
                        outcome.tasks_created,
                        Some(format!("repaired_jobs={}", outcome.repaired_jobs).as_str()),
                    );
                    finished &= outcome.finished;
                }
                Err(e) if single => return Err(e),
                Err(e) => log_error(
                    "materializer",
                    "materialize_dataset",
                    &e.to_string(),
                    Some(format!("dataset_id={dataset_id}, continuing with other datasets").as_str()),
                ),
            }
        }

        info!(finished = finished, "✅ Materialization run finished");
        Ok(finished)
    }

    async fn materialize_dataset(
        &self,
        ctx: &mut RunContext,
        dataset_id: &str,
        options: &RunOptions,
        single: bool,
    ) -> Result<DatasetOutcome> {
        let datastore = self.datastore.as_ref();
        let dataset = datastore.get_dataset(dataset_id).await?;
        if dataset.tasks_per_job == 0 {
            return Err(SchedulerError::Configuration(format!(
                "dataset {dataset_id} has tasks_per_job = 0"
            )));
        }

        let jobs = datastore.list_jobs(dataset_id).await?;
        let job_counts = datastore.job_counts_by_status(dataset_id).await?;
        let task_counts = datastore.task_counts_by_status(dataset_id).await?;

        debug!(
            dataset_id = %dataset_id,
            jobs = jobs.len(),
            job_counts = ?job_counts,
            task_counts = ?task_counts,
            "Loaded dataset state"
        );

        let mut outcome = DatasetOutcome {
            finished: true,
            ..DatasetOutcome::default()
        };
        let tasks_per_job = u64::from(dataset.tasks_per_job);
        let next_job_index = jobs.iter().map(|j| j.job_index + 1).max().unwrap_or(0);

        // Repair
        let mut total_tasks: u64 = task_counts.values().sum();
        let mut cursor = next_job_index;
        while total_tasks % tasks_per_job != 0 && cursor > 0 {
            cursor -= 1;
            let Some(job) = jobs.iter().find(|j| j.job_index == cursor) else {
                continue;
            };
            let existing = datastore
                .list_tasks(dataset_id, &TaskFilter::for_job_id(&job.job_id))
                .await?;
            if (existing.len() as u64) < tasks_per_job {
                info!(
                    dataset_id = %dataset_id,
                    job_index = job.job_index,
                    existing = existing.len(),
                    "🔧 Repairing partially buffered job"
                );
                let created = self
                    .buffer_job(
                        ctx,
                        BufferJob {
                            dataset: &dataset,
                            job_index: job.job_index,
                            job_id: Some(job.job_id.clone()),
                            existing_tasks: existing,
                            set_status: options.set_status,
                            dry_run: options.dry_run,
                        },
                    )
                    .await?;
                total_tasks += created as u64;
                outcome.tasks_created += created as u64;
                outcome.repaired_jobs += 1;
            }
        }

        // Growth
        let jobs_to_buffer = options
            .num_jobs
            .min(dataset.jobs_submitted.saturating_sub(jobs.len() as u64));
        for offset in 0..jobs_to_buffer {
            if !single && ctx.budget_exceeded() {
                outcome.finished = false;
                break;
            }
            let created = self
                .buffer_job(
                    ctx,
                    BufferJob {
                        dataset: &dataset,
                        job_index: next_job_index + offset,
                        job_id: None,
                        existing_tasks: Vec::new(),
                        set_status: options.set_status,
                        dry_run: options.dry_run,
                    },
                )
                .await?;
            outcome.jobs_buffered += 1;
            outcome.tasks_created += created as u64;
        }

        if single && ctx.budget_exceeded() {
            warn!(
                dataset_id = %dataset_id,
                jobs_buffered = outcome.jobs_buffered,
                "⏱️ Single-dataset materialization exceeded the cycle budget"
            );
            outcome.finished = false;
        }

        Ok(outcome)
    }

    /// Create the missing tasks of one job (and the job itself when no id is
    /// given), in template order. Returns the number of tasks created.
    #[instrument(skip(self, ctx, request), fields(dataset_id = %request.dataset.dataset_id, job_index = request.job_index))]
    pub async fn buffer_job(&self, ctx: &mut RunContext, request: BufferJob<'_>) -> Result<usize> {
        let datastore = self.datastore.as_ref();
        let dataset = request.dataset;
        let dataset_id = dataset.dataset_id.as_str();

        let config = ctx.dataset_config(datastore, dataset_id).await?;
        if config.tasks.len() != dataset.tasks_per_job as usize {
            return Err(SchedulerError::Configuration(format!(
                "dataset {dataset_id} defines {} task templates but tasks_per_job is {}",
                config.tasks.len(),
                dataset.tasks_per_job
            )));
        }
        let names = config.task_names();
        check_local_dependencies(&config, &names)?;

        let mut local_task_ids: Vec<Option<String>> = vec![None; config.tasks.len()];
        for task in &request.existing_tasks {
            if let Some(slot) = local_task_ids.get_mut(task.task_index as usize) {
                *slot = Some(task.task_id.clone());
            }
        }

        // Everything that can fail runs before the job row exists
        let mut prepared = Vec::new();
        for (task_index, template) in config.tasks.iter().enumerate() {
            if local_task_ids[task_index].is_some() {
                continue;
            }

            let dependencies = prepare_dependencies(
                datastore,
                &template.depends,
                &names,
                DependencyContext {
                    task_name: &template.name,
                    task_index,
                    job_index: request.job_index,
                    local_task_ids: &local_task_ids,
                },
            )
            .await?;

            let requirements = parse_requirements(
                &template.requirements,
                &RequirementContext {
                    parameters: &config.parameters,
                    job_index: request.job_index,
                    dataset: dataset.dataset,
                    task_name: &template.name,
                    jobs_submitted: dataset.jobs_submitted,
                },
            )?;

            let priority = self
                .priority
                .task_priority_at(
                    datastore,
                    &mut ctx.priority_cache,
                    dataset_id,
                    request.job_index,
                    task_index as u32,
                )
                .await?;

            prepared.push(PreparedTask {
                task_index,
                template,
                dependencies,
                requirements,
                priority,
            });
        }

        let job_id = match request.job_id {
            Some(job_id) => job_id,
            None if request.dry_run => format!("dryrun-{dataset_id}-{}", request.job_index),
            None => {
                datastore
                    .create_job(&NewJob {
                        dataset_id: dataset_id.to_string(),
                        job_index: request.job_index,
                        status: JobStatus::Processing,
                    })
                    .await?
            }
        };

        let status = request.set_status.unwrap_or(self.config.default_task_status);
        let mut created = 0;

        for task in prepared {
            let PreparedTask {
                task_index,
                template,
                dependencies,
                requirements,
                priority,
            } = task;

            let depends = finish_dependencies(
                &dependencies,
                &template.depends,
                DependencyContext {
                    task_name: &template.name,
                    task_index,
                    job_index: request.job_index,
                    local_task_ids: &local_task_ids,
                },
            )?;

            let options = TaskOptions {
                job: request.job_index,
                task: task_index as u32,
                dataset: dataset.dataset,
                jobs_submitted: dataset.jobs_submitted,
                tasks_submitted: dataset.tasks_submitted,
                debug: dataset.debug,
            };

            let new_task = NewTask {
                dataset_id: dataset_id.to_string(),
                job_id: job_id.clone(),
                job_index: request.job_index,
                task_index: task_index as u32,
                name: template.name.clone(),
                depends,
                requirements,
                status,
                options,
            };

            let task_id = if request.dry_run {
                let task_id = format!("dryrun-{dataset_id}-{}-{task_index}", request.job_index);
                debug!(
                    task_id = %task_id,
                    name = %new_task.name,
                    depends = ?new_task.depends,
                    priority = priority,
                    "Dry run: would create task"
                );
                task_id
            } else {
                let task_id = datastore.create_task(&new_task).await?;
                datastore.update_task_priority(&task_id, priority).await?;
                task_id
            };

            local_task_ids[task_index] = Some(task_id);
            created += 1;
        }

        debug!(
            dataset_id = %dataset_id,
            job_id = %job_id,
            created = created,
            "Buffered job"
        );
        Ok(created)
    }
}

/// One missing task of a job, validated but not yet written
struct PreparedTask<'t> {
    task_index: usize,
    template: &'t TaskTemplate,
    dependencies: Vec<PendingDependency>,
    requirements: Requirements,
    priority: f64,
}

/// Reject self and forward references before anything is written, so a
/// template mistake cannot leave an empty job behind
fn check_local_dependencies(config: &DatasetConfig, names: &[&str]) -> Result<()> {
    for (task_index, template) in config.tasks.iter().enumerate() {
        for raw in &template.depends {
            let token = DependencyToken::parse(raw, names).map_err(|reason| {
                SchedulerError::dependency_resolution(&template.name, raw.to_string(), reason)
            })?;
            if let DependencyToken::Local(index) = token {
                if index >= task_index {
                    return Err(SchedulerError::dependency_resolution(
                        &template.name,
                        raw.to_string(),
                        format!("task index {index} is not earlier than {task_index}"),
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorityConfig;
    use crate::datastore::InMemoryDatastore;
    use crate::models::{RawDependency, TaskTemplate};

    fn dataset(tasks_per_job: u32, jobs_submitted: u64) -> Dataset {
        Dataset {
            dataset_id: "d1".into(),
            dataset: 20001,
            username: "alice".into(),
            group: "sim".into(),
            status: DatasetStatus::Processing,
            tasks_per_job,
            jobs_submitted,
            tasks_submitted: jobs_submitted * u64::from(tasks_per_job),
            priority: 0.5,
            debug: false,
        }
    }

    fn template(name: &str, depends: Vec<RawDependency>) -> TaskTemplate {
        TaskTemplate {
            name: name.into(),
            depends,
            requirements: Default::default(),
        }
    }

    fn materializer(store: Arc<InMemoryDatastore>) -> Materializer {
        Materializer::new(
            store,
            PriorityEngine::new(PriorityConfig::default()),
            MaterializationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_template_count_mismatch_is_configuration_error() {
        let store = Arc::new(InMemoryDatastore::new());
        let ds = dataset(3, 1);
        store.insert_dataset(
            ds.clone(),
            DatasetConfig {
                tasks: vec![template("A", vec![])],
                parameters: Default::default(),
            },
        );

        let materializer = materializer(Arc::clone(&store));
        let mut ctx = materializer.new_run_context();
        let result = materializer
            .buffer_job(
                &mut ctx,
                BufferJob {
                    dataset: &ds,
                    job_index: 0,
                    job_id: None,
                    existing_tasks: vec![],
                    set_status: None,
                    dry_run: false,
                },
            )
            .await;
        assert!(matches!(result, Err(SchedulerError::Configuration(_))));
        assert!(store.jobs_for_dataset("d1").is_empty());
    }

    #[tokio::test]
    async fn test_forward_reference_rejected_before_job_creation() {
        let store = Arc::new(InMemoryDatastore::new());
        let ds = dataset(2, 1);
        store.insert_dataset(
            ds.clone(),
            DatasetConfig {
                tasks: vec![
                    template("A", vec![RawDependency::Name("B".into())]),
                    template("B", vec![]),
                ],
                parameters: Default::default(),
            },
        );

        let materializer = materializer(Arc::clone(&store));
        let ok = materializer
            .run_once(&RunOptions::new(10).for_dataset("d1"))
            .await;
        assert!(matches!(
            ok,
            Err(SchedulerError::DependencyResolution { .. })
        ));
        assert!(store.jobs_for_dataset("d1").is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_set_status_overrides_default() {
        let store = Arc::new(InMemoryDatastore::new());
        store.insert_dataset(
            dataset(1, 2),
            DatasetConfig {
                tasks: vec![template("A", vec![])],
                parameters: Default::default(),
            },
        );

        let materializer = materializer(Arc::clone(&store));
        let finished = materializer
            .run_once(
                &RunOptions::new(10)
                    .for_dataset("d1")
                    .with_status(Some(TaskStatus::Waiting)),
            )
            .await
            .unwrap();
        assert!(finished);

        let tasks = store.tasks_for_dataset("d1");
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Waiting));
    }
}
