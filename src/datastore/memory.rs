//! # In-Memory Datastore
//!
//! A process-local [`Datastore`] used by tests and offline dry runs. It enforces
//! the same uniqueness rules as the real store: one job per `(dataset, job_index)`
//! and one task per `(job, task_index)`.

use super::{Datastore, DatastoreError, DatastoreResult, TaskFilter};
use crate::constants::{DatasetStatus, JobStatus, TaskStatus};
use crate::models::{Dataset, DatasetConfig, Group, Job, NewJob, NewTask, Task, User};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct InMemoryDatastore {
    datasets: RwLock<HashMap<String, Dataset>>,
    configs: RwLock<HashMap<String, DatasetConfig>>,
    users: RwLock<Vec<User>>,
    groups: RwLock<Vec<Group>>,
    jobs: DashMap<String, Job>,
    tasks: DashMap<String, Task>,
    failing_datasets: RwLock<HashSet<String>>,
    task_read_delay: RwLock<Option<Duration>>,
    task_reads_in_flight: AtomicU64,
    peak_task_reads: AtomicU64,
    next_id: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_dataset(&self, dataset: Dataset, config: DatasetConfig) {
        self.configs
            .write()
            .insert(dataset.dataset_id.clone(), config);
        self.datasets
            .write()
            .insert(dataset.dataset_id.clone(), dataset);
    }

    pub fn update_dataset<F: FnOnce(&mut Dataset)>(&self, dataset_id: &str, update: F) {
        if let Some(dataset) = self.datasets.write().get_mut(dataset_id) {
            update(dataset);
        }
    }

    pub fn insert_user(&self, username: &str, priority: f64) {
        self.users.write().push(User {
            username: username.to_string(),
            priority,
        });
    }

    pub fn insert_group(&self, name: &str, priority: f64) {
        self.groups.write().push(Group {
            name: name.to_string(),
            priority,
        });
    }

    /// Insert a fully-formed task, bypassing creation bookkeeping
    pub fn insert_task(&self, task: Task) {
        self.tasks.insert(task.task_id.clone(), task);
    }

    /// Insert a job row directly, as a crashed earlier run would have left it
    pub fn insert_job(&self, job: Job) {
        self.jobs.insert(job.job_id.clone(), job);
    }

    pub fn set_task_status(&self, task_id: &str, status: TaskStatus) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = status;
        }
    }

    /// Make every read of this dataset fail with a transport error
    pub fn fail_dataset(&self, dataset_id: &str) {
        self.failing_datasets.write().insert(dataset_id.to_string());
    }

    /// Make every `get_task` take `delay`, so overlapping reads can be observed
    pub fn delay_task_reads(&self, delay: Duration) {
        *self.task_read_delay.write() = Some(delay);
    }

    /// Most `get_task` calls seen in flight at once while reads were delayed
    pub fn peak_concurrent_task_reads(&self) -> u64 {
        self.peak_task_reads.load(Ordering::SeqCst)
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Tasks of one dataset ordered by `(job_index, task_index)`
    pub fn tasks_for_dataset(&self, dataset_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.dataset_id == dataset_id)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| (t.job_index, t.task_index));
        tasks
    }

    pub fn jobs_for_dataset(&self, dataset_id: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.dataset_id == dataset_id)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by_key(|j| j.job_index);
        jobs
    }

    /// Number of mutating calls served so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn generate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn check_dataset(&self, dataset_id: &str) -> DatastoreResult<()> {
        if self.failing_datasets.read().contains(dataset_id) {
            return Err(DatastoreError::Transport(format!(
                "simulated failure for dataset {dataset_id}"
            )));
        }
        Ok(())
    }

    fn count_tasks(tasks: impl Iterator<Item = TaskStatus>) -> HashMap<TaskStatus, u64> {
        let mut counts = HashMap::new();
        for status in tasks {
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn dataset_ids_by_status(&self) -> DatastoreResult<HashMap<DatasetStatus, Vec<String>>> {
        let mut by_status: HashMap<DatasetStatus, Vec<String>> = HashMap::new();
        for dataset in self.datasets.read().values() {
            by_status
                .entry(dataset.status)
                .or_default()
                .push(dataset.dataset_id.clone());
        }
        for ids in by_status.values_mut() {
            ids.sort();
        }
        Ok(by_status)
    }

    async fn get_dataset(&self, dataset_id: &str) -> DatastoreResult<Dataset> {
        self.check_dataset(dataset_id)?;
        self.datasets
            .read()
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found(format!("dataset {dataset_id}")))
    }

    async fn get_dataset_config(&self, dataset_id: &str) -> DatastoreResult<DatasetConfig> {
        self.check_dataset(dataset_id)?;
        self.configs
            .read()
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found(format!("config {dataset_id}")))
    }

    async fn list_jobs(&self, dataset_id: &str) -> DatastoreResult<Vec<Job>> {
        self.check_dataset(dataset_id)?;
        Ok(self.jobs_for_dataset(dataset_id))
    }

    async fn create_job(&self, job: &NewJob) -> DatastoreResult<String> {
        self.check_dataset(&job.dataset_id)?;
        let duplicate = self
            .jobs
            .iter()
            .any(|j| j.dataset_id == job.dataset_id && j.job_index == job.job_index);
        if duplicate {
            return Err(DatastoreError::Http {
                status: 409,
                message: format!(
                    "job_index {} already exists in dataset {}",
                    job.job_index, job.dataset_id
                ),
            });
        }

        let job_id = self.generate_id("job");
        self.jobs.insert(
            job_id.clone(),
            Job {
                job_id: job_id.clone(),
                dataset_id: job.dataset_id.clone(),
                job_index: job.job_index,
                status: job.status,
            },
        );
        self.record_write();
        Ok(job_id)
    }

    async fn job_counts_by_status(
        &self,
        dataset_id: &str,
    ) -> DatastoreResult<HashMap<JobStatus, u64>> {
        self.check_dataset(dataset_id)?;
        let mut counts = HashMap::new();
        for job in self.jobs.iter().filter(|j| j.dataset_id == dataset_id) {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn task_counts_by_status(
        &self,
        dataset_id: &str,
    ) -> DatastoreResult<HashMap<TaskStatus, u64>> {
        self.check_dataset(dataset_id)?;
        Ok(Self::count_tasks(
            self.tasks
                .iter()
                .filter(|t| t.dataset_id == dataset_id)
                .map(|t| t.status),
        ))
    }

    async fn list_tasks(
        &self,
        dataset_id: &str,
        filter: &TaskFilter,
    ) -> DatastoreResult<Vec<Task>> {
        self.check_dataset(dataset_id)?;
        Ok(self
            .tasks_for_dataset(dataset_id)
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> DatastoreResult<Task> {
        let delay = *self.task_read_delay.read();
        if let Some(delay) = delay {
            let in_flight = self.task_reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_task_reads.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.task_reads_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.task(task_id)
            .ok_or_else(|| DatastoreError::not_found(format!("task {task_id}")))
    }

    async fn create_task(&self, task: &NewTask) -> DatastoreResult<String> {
        self.check_dataset(&task.dataset_id)?;
        let duplicate = self
            .tasks
            .iter()
            .any(|t| t.job_id == task.job_id && t.task_index == task.task_index);
        if duplicate {
            return Err(DatastoreError::Http {
                status: 409,
                message: format!(
                    "task_index {} already exists in job {}",
                    task.task_index, task.job_id
                ),
            });
        }

        let task_id = self.generate_id("task");
        self.tasks.insert(
            task_id.clone(),
            Task {
                task_id: task_id.clone(),
                dataset_id: task.dataset_id.clone(),
                job_id: task.job_id.clone(),
                job_index: task.job_index,
                task_index: task.task_index,
                name: task.name.clone(),
                depends: task.depends.clone(),
                requirements: task.requirements.clone(),
                status: task.status,
                priority: 0.0,
            },
        );
        self.record_write();
        Ok(task_id)
    }

    async fn update_task_priority(&self, task_id: &str, priority: f64) -> DatastoreResult<()> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| DatastoreError::not_found(format!("task {task_id}")))?;
        task.priority = priority;
        self.record_write();
        Ok(())
    }

    async fn global_task_counts(&self) -> DatastoreResult<HashMap<TaskStatus, u64>> {
        Ok(Self::count_tasks(
            self.tasks
                .iter()
                .map(|t| t.status),
        ))
    }

    async fn idle_tasks_by_priority(&self, limit: usize) -> DatastoreResult<Vec<Task>> {
        let mut idle: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Idle)
            .map(|t| t.clone())
            .collect();
        idle.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        idle.truncate(limit);
        Ok(idle)
    }

    async fn bulk_set_task_status(
        &self,
        task_ids: &[String],
        status: TaskStatus,
    ) -> DatastoreResult<()> {
        for task_id in task_ids {
            self.set_task_status(task_id, status);
        }
        self.record_write();
        Ok(())
    }

    async fn list_users(&self) -> DatastoreResult<Vec<User>> {
        Ok(self.users.read().clone())
    }

    async fn list_groups(&self) -> DatastoreResult<Vec<Group>> {
        Ok(self.groups.read().clone())
    }
}
