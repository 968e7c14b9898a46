//! # Dependency Resolution
//!
//! Template dependency entries are parsed into a closed set of
//! [`DependencyToken`] variants before anything touches the datastore, so
//! resolution is a single match over known shapes:
//!
//! | Written as | Token |
//! |---|---|
//! | `1`, `"1"`, `"generate"` (a name in this template) | [`DependencyToken::Local`] |
//! | `"<dataset_id>:<name or index>"` | [`DependencyToken::Remote`] |
//! | anything else | [`DependencyToken::TaskId`] |
//!
//! Local dependencies must point at a strictly earlier task in the same job.

use crate::datastore::{Datastore, DatastoreError, TaskFilter};
use crate::error::{Result, SchedulerError};
use crate::models::RawDependency;
use tracing::debug;

/// How a remote dependency names its task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReference {
    Index(u32),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyToken {
    /// Task at this template index in the same job
    Local(usize),
    /// Task in another dataset's job with the same job index
    Remote {
        dataset_id: String,
        reference: TaskReference,
    },
    /// An existing task id
    TaskId(String),
}

impl DependencyToken {
    /// Classify a raw template entry. Fails only for malformed entries
    /// (integers outside the template, `:` references with an empty side).
    pub fn parse(raw: &RawDependency, template_names: &[&str]) -> std::result::Result<Self, String> {
        match raw {
            RawDependency::Index(index) => usize::try_from(*index)
                .ok()
                .filter(|i| *i < template_names.len())
                .map(Self::Local)
                .ok_or_else(|| {
                    format!(
                        "index {index} is outside the template ({} tasks)",
                        template_names.len()
                    )
                }),
            RawDependency::Name(name) => {
                if let Some(position) = template_names.iter().position(|n| n == name) {
                    return Ok(Self::Local(position));
                }
                if let Ok(index) = name.parse::<usize>() {
                    if index < template_names.len() {
                        return Ok(Self::Local(index));
                    }
                }
                if let Some((dataset_id, reference)) = name.split_once(':') {
                    if dataset_id.is_empty() || reference.is_empty() {
                        return Err(format!("malformed cross-dataset reference {name:?}"));
                    }
                    let reference = match reference.parse::<u32>() {
                        Ok(index) => TaskReference::Index(index),
                        Err(_) => TaskReference::Name(reference.to_string()),
                    };
                    return Ok(Self::Remote {
                        dataset_id: dataset_id.to_string(),
                        reference,
                    });
                }
                Ok(Self::TaskId(name.clone()))
            }
        }
    }
}

/// Task being wired up, for error reporting and local lookups
#[derive(Debug, Clone, Copy)]
pub struct DependencyContext<'a> {
    pub task_name: &'a str,
    pub task_index: usize,
    pub job_index: u64,
    /// Ids of this job's tasks by template index, where known
    pub local_task_ids: &'a [Option<String>],
}

/// A dependency resolved as far as it can be before its job exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingDependency {
    /// Earlier task of the same job, by template index
    Local(usize),
    /// Task id already known
    Resolved(String),
}

/// Resolve every dependency of one task template to task ids, in order
pub async fn resolve_dependencies(
    datastore: &dyn Datastore,
    raw_dependencies: &[RawDependency],
    template_names: &[&str],
    context: DependencyContext<'_>,
) -> Result<Vec<String>> {
    let pending =
        prepare_dependencies(datastore, raw_dependencies, template_names, context).await?;
    finish_dependencies(&pending, raw_dependencies, context)
}

/// Validate every dependency and look up the ones outside this job.
///
/// Everything that can fail against the datastore fails here, so callers can
/// run this before creating the job row.
pub async fn prepare_dependencies(
    datastore: &dyn Datastore,
    raw_dependencies: &[RawDependency],
    template_names: &[&str],
    context: DependencyContext<'_>,
) -> Result<Vec<PendingDependency>> {
    let mut pending = Vec::with_capacity(raw_dependencies.len());
    for raw in raw_dependencies {
        let token = DependencyToken::parse(raw, template_names).map_err(|reason| {
            SchedulerError::dependency_resolution(context.task_name, raw.to_string(), reason)
        })?;
        pending.push(resolve_token(datastore, &token, raw, context).await?);
    }
    Ok(pending)
}

/// Replace local references with the ids of this job's tasks
pub fn finish_dependencies(
    pending: &[PendingDependency],
    raw_dependencies: &[RawDependency],
    context: DependencyContext<'_>,
) -> Result<Vec<String>> {
    pending
        .iter()
        .zip(raw_dependencies)
        .map(|(dependency, raw)| -> Result<String> {
            let task_id = match dependency {
                PendingDependency::Resolved(task_id) => task_id.clone(),
                PendingDependency::Local(index) => context
                    .local_task_ids
                    .get(*index)
                    .and_then(|id| id.clone())
                    .ok_or_else(|| {
                        SchedulerError::dependency_resolution(
                            context.task_name,
                            raw.to_string(),
                            format!("task index {index} has not been created"),
                        )
                    })?,
            };
            debug!(
                task_name = %context.task_name,
                dependency = %raw,
                resolved = %task_id,
                "Resolved dependency"
            );
            Ok(task_id)
        })
        .collect()
}

async fn resolve_token(
    datastore: &dyn Datastore,
    token: &DependencyToken,
    raw: &RawDependency,
    context: DependencyContext<'_>,
) -> Result<PendingDependency> {
    let fail = |reason: String| {
        SchedulerError::dependency_resolution(context.task_name, raw.to_string(), reason)
    };

    match token {
        DependencyToken::Local(index) => {
            if *index >= context.task_index {
                return Err(fail(format!(
                    "task index {index} is not earlier than {}",
                    context.task_index
                )));
            }
            Ok(PendingDependency::Local(*index))
        }
        DependencyToken::Remote {
            dataset_id,
            reference,
        } => {
            let tasks = datastore
                .list_tasks(dataset_id, &TaskFilter::for_job_index(context.job_index))
                .await
                .map_err(|e| match e {
                    DatastoreError::NotFound { .. } => fail(format!("dataset {dataset_id} not found")),
                    other => SchedulerError::Datastore(other),
                })?;
            tasks
                .into_iter()
                .find(|task| match reference {
                    TaskReference::Index(index) => task.task_index == *index,
                    TaskReference::Name(name) => task.name == *name,
                })
                .map(|task| PendingDependency::Resolved(task.task_id))
                .ok_or_else(|| {
                    fail(format!(
                        "no matching task in dataset {dataset_id} job {}",
                        context.job_index
                    ))
                })
        }
        DependencyToken::TaskId(task_id) => match datastore.get_task(task_id).await {
            Ok(task) => Ok(PendingDependency::Resolved(task.task_id)),
            Err(DatastoreError::NotFound { .. }) => Err(fail(format!("task {task_id} not found"))),
            Err(other) => Err(other.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TaskStatus;
    use crate::datastore::InMemoryDatastore;
    use crate::models::Task;

    const NAMES: &[&str] = &["generate", "filter", "merge"];

    fn name(s: &str) -> RawDependency {
        RawDependency::Name(s.to_string())
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            DependencyToken::parse(&name("filter"), NAMES),
            Ok(DependencyToken::Local(1))
        );
        assert_eq!(
            DependencyToken::parse(&RawDependency::Index(0), NAMES),
            Ok(DependencyToken::Local(0))
        );
        assert_eq!(
            DependencyToken::parse(&name("2"), NAMES),
            Ok(DependencyToken::Local(2))
        );
        assert_eq!(
            DependencyToken::parse(&name("ds9:1"), NAMES),
            Ok(DependencyToken::Remote {
                dataset_id: "ds9".into(),
                reference: TaskReference::Index(1),
            })
        );
        assert_eq!(
            DependencyToken::parse(&name("ds9:generate"), NAMES),
            Ok(DependencyToken::Remote {
                dataset_id: "ds9".into(),
                reference: TaskReference::Name("generate".into()),
            })
        );
        assert_eq!(
            DependencyToken::parse(&name("f00dcafe"), NAMES),
            Ok(DependencyToken::TaskId("f00dcafe".into()))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_entries() {
        assert!(DependencyToken::parse(&RawDependency::Index(3), NAMES).is_err());
        assert!(DependencyToken::parse(&RawDependency::Index(-1), NAMES).is_err());
        assert!(DependencyToken::parse(&name(":1"), NAMES).is_err());
        assert!(DependencyToken::parse(&name("ds9:"), NAMES).is_err());
    }

    fn context<'a>(task_index: usize, local: &'a [Option<String>]) -> DependencyContext<'a> {
        DependencyContext {
            task_name: NAMES[task_index],
            task_index,
            job_index: 0,
            local_task_ids: local,
        }
    }

    #[tokio::test]
    async fn test_local_dependency_must_be_earlier() {
        let store = InMemoryDatastore::new();
        let local = vec![Some("t-a".to_string()), Some("t-b".to_string()), None];

        let ok = resolve_dependencies(&store, &[name("generate")], NAMES, context(1, &local))
            .await
            .unwrap();
        assert_eq!(ok, vec!["t-a".to_string()]);

        let self_ref =
            resolve_dependencies(&store, &[name("filter")], NAMES, context(1, &local)).await;
        assert!(matches!(
            self_ref,
            Err(SchedulerError::DependencyResolution { .. })
        ));

        let forward =
            resolve_dependencies(&store, &[RawDependency::Index(2)], NAMES, context(1, &local)).await;
        assert!(matches!(
            forward,
            Err(SchedulerError::DependencyResolution { .. })
        ));
    }

    #[tokio::test]
    async fn test_remote_and_task_id_lookups() {
        let store = InMemoryDatastore::new();
        store.insert_task(Task {
            task_id: "remote-1".into(),
            dataset_id: "ds9".into(),
            job_id: "job-x".into(),
            job_index: 0,
            task_index: 1,
            name: "reco".into(),
            depends: vec![],
            requirements: Default::default(),
            status: TaskStatus::Complete,
            priority: 0.0,
        });
        let local = vec![None, None, None];

        let resolved = resolve_dependencies(
            &store,
            &[name("ds9:1"), name("ds9:reco"), name("remote-1")],
            NAMES,
            context(0, &local),
        )
        .await
        .unwrap();
        assert_eq!(resolved, vec!["remote-1"; 3]);

        let missing =
            resolve_dependencies(&store, &[name("no-such-task")], NAMES, context(0, &local)).await;
        assert!(matches!(
            missing,
            Err(SchedulerError::DependencyResolution { .. })
        ));

        let wrong_job = resolve_dependencies(
            &store,
            &[name("ds9:reco")],
            NAMES,
            DependencyContext {
                job_index: 5,
                ..context(0, &local)
            },
        )
        .await;
        assert!(wrong_job.is_err());
    }

    #[tokio::test]
    async fn test_prepare_defers_local_ids_until_job_exists() {
        let store = InMemoryDatastore::new();
        let before = vec![None, None, None];

        let pending = prepare_dependencies(
            &store,
            &[name("generate"), RawDependency::Index(1)],
            NAMES,
            context(2, &before),
        )
        .await
        .unwrap();
        assert_eq!(
            pending,
            vec![PendingDependency::Local(0), PendingDependency::Local(1)]
        );

        let missing = finish_dependencies(
            &pending,
            &[name("generate"), RawDependency::Index(1)],
            context(2, &before),
        );
        assert!(missing.is_err());

        let after = vec![Some("t-a".to_string()), Some("t-b".to_string()), None];
        let resolved = finish_dependencies(
            &pending,
            &[name("generate"), RawDependency::Index(1)],
            context(2, &after),
        )
        .unwrap();
        assert_eq!(resolved, vec!["t-a".to_string(), "t-b".to_string()]);
    }
}
