use super::RetryPolicy;
use crate::constants::{DatasetStatus, JobStatus, TaskStatus};
use crate::datastore::{Datastore, DatastoreResult, TaskFilter};
use crate::models::{Dataset, DatasetConfig, Group, Job, NewJob, NewTask, Task, User};
use async_trait::async_trait;
use std::collections::HashMap;

/// Wraps any [`Datastore`] so every call goes through one [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryingDatastore<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D: Datastore> RetryingDatastore<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<D: Datastore> Datastore for RetryingDatastore<D> {
    async fn dataset_ids_by_status(&self) -> DatastoreResult<HashMap<DatasetStatus, Vec<String>>> {
        self.policy
            .execute("dataset_ids_by_status", || self.inner.dataset_ids_by_status())
            .await
    }

    async fn get_dataset(&self, dataset_id: &str) -> DatastoreResult<Dataset> {
        self.policy
            .execute("get_dataset", || self.inner.get_dataset(dataset_id))
            .await
    }

    async fn get_dataset_config(&self, dataset_id: &str) -> DatastoreResult<DatasetConfig> {
        self.policy
            .execute("get_dataset_config", || self.inner.get_dataset_config(dataset_id))
            .await
    }

    async fn list_jobs(&self, dataset_id: &str) -> DatastoreResult<Vec<Job>> {
        self.policy
            .execute("list_jobs", || self.inner.list_jobs(dataset_id))
            .await
    }

    async fn create_job(&self, job: &NewJob) -> DatastoreResult<String> {
        self.policy
            .execute("create_job", || self.inner.create_job(job))
            .await
    }

    async fn job_counts_by_status(
        &self,
        dataset_id: &str,
    ) -> DatastoreResult<HashMap<JobStatus, u64>> {
        self.policy
            .execute("job_counts_by_status", || self.inner.job_counts_by_status(dataset_id))
            .await
    }

    async fn task_counts_by_status(
        &self,
        dataset_id: &str,
    ) -> DatastoreResult<HashMap<TaskStatus, u64>> {
        self.policy
            .execute("task_counts_by_status", || self.inner.task_counts_by_status(dataset_id))
            .await
    }

    async fn list_tasks(
        &self,
        dataset_id: &str,
        filter: &TaskFilter,
    ) -> DatastoreResult<Vec<Task>> {
        self.policy
            .execute("list_tasks", || self.inner.list_tasks(dataset_id, filter))
            .await
    }

    async fn get_task(&self, task_id: &str) -> DatastoreResult<Task> {
        self.policy
            .execute("get_task", || self.inner.get_task(task_id))
            .await
    }

    async fn create_task(&self, task: &NewTask) -> DatastoreResult<String> {
        self.policy
            .execute("create_task", || self.inner.create_task(task))
            .await
    }

    async fn update_task_priority(&self, task_id: &str, priority: f64) -> DatastoreResult<()> {
        self.policy
            .execute("update_task_priority", || {
                self.inner.update_task_priority(task_id, priority)
            })
            .await
    }

    async fn global_task_counts(&self) -> DatastoreResult<HashMap<TaskStatus, u64>> {
        self.policy
            .execute("global_task_counts", || self.inner.global_task_counts())
            .await
    }

    async fn idle_tasks_by_priority(&self, limit: usize) -> DatastoreResult<Vec<Task>> {
        self.policy
            .execute("idle_tasks_by_priority", || self.inner.idle_tasks_by_priority(limit))
            .await
    }

    async fn bulk_set_task_status(
        &self,
        task_ids: &[String],
        status: TaskStatus,
    ) -> DatastoreResult<()> {
        self.policy
            .execute("bulk_set_task_status", || {
                self.inner.bulk_set_task_status(task_ids, status)
            })
            .await
    }

    async fn list_users(&self) -> DatastoreResult<Vec<User>> {
        self.policy
            .execute("list_users", || self.inner.list_users())
            .await
    }

    async fn list_groups(&self) -> DatastoreResult<Vec<Group>> {
        self.policy
            .execute("list_groups", || self.inner.list_groups())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDatastore;

    #[tokio::test]
    async fn test_delegates_to_inner_store() {
        let inner = InMemoryDatastore::new();
        inner.insert_user("alice", 0.7);
        let store = RetryingDatastore::new(inner, RetryPolicy::no_retry());

        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
        assert_eq!(store.policy().max_attempts, 1);
    }
}
