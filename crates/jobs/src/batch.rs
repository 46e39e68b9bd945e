//! Batch activation bounded by job count and record size.

use std::ops::ControlFlow;

use jobflow_core::JobKey;

use crate::collaborators::{VariableStore, WriteBudget};
use crate::index::JobIndex;
use crate::job::{ActivateJobs, ActivatedJob, JobBatchActivated, JobRecord};

/// Bytes added per entry on top of its JSON body (array separator and slack).
pub const JOB_ENTRY_OVERHEAD: usize = 8;

/// The first candidate job alone does not fit into a batch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TooLargeJob {
    pub job_key: JobKey,
    pub job: JobRecord,
    /// Size of the batch record had the job been added.
    pub expected_size: usize,
}

/// Collects activatable jobs of one type into a batch record.
///
/// Read-only with respect to the index: candidates are copied into the batch
/// and only become `ACTIVATED` once the batch event is applied.
pub struct JobBatchCollector<'a> {
    index: &'a JobIndex,
    variables: &'a dyn VariableStore,
    budget: &'a dyn WriteBudget,
}

impl<'a> JobBatchCollector<'a> {
    pub fn new(index: &'a JobIndex, variables: &'a dyn VariableStore, budget: &'a dyn WriteBudget) -> Self {
        Self {
            index,
            variables,
            budget,
        }
    }

    /// Size of the batch record as it would be written.
    pub fn record_size(batch: &JobBatchActivated) -> usize {
        serde_json::to_vec(batch).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }

    /// Size a single entry adds to a batch record.
    pub fn entry_size(entry: &ActivatedJob) -> usize {
        serde_json::to_vec(entry)
            .map(|bytes| bytes.len().saturating_add(JOB_ENTRY_OVERHEAD))
            .unwrap_or(usize::MAX)
    }

    /// Fill `batch` with activatable jobs of the requested type.
    ///
    /// Jobs are taken in ascending key order while fewer than
    /// `max_jobs_to_activate` were collected and the grown record still passes
    /// the write budget. The first job that does not fit sets `truncated`; if
    /// no job was collected before it, that job is returned as
    /// [`TooLargeJob`].
    pub fn collect(&self, request: &ActivateJobs, now: i64, batch: &mut JobBatchActivated) -> Result<usize, TooLargeJob> {
        let max_jobs = usize::try_from(request.max_jobs_to_activate).unwrap_or(0);
        let deadline = now.saturating_add(request.timeout);
        let mut size = Self::record_size(batch);
        let mut too_large = None;

        self.index.for_each_activatable(&request.job_type, |key, job| {
            if batch.jobs.len() >= max_jobs {
                return ControlFlow::Break(());
            }

            let mut activated = job.clone();
            activated.deadline = Some(deadline);
            activated.worker = request.worker.clone();
            activated.variables = self
                .variables
                .resolve_variables(job.element_instance_key, &request.fetch_variables);

            let entry = ActivatedJob { key, job: activated };
            let grown = size.saturating_add(Self::entry_size(&entry));
            if self.budget.can_write_event_of_length(grown) {
                size = grown;
                batch.jobs.push(entry);
                return ControlFlow::Continue(());
            }

            batch.truncated = true;
            if batch.jobs.is_empty() {
                too_large = Some(TooLargeJob {
                    job_key: key,
                    job: entry.job,
                    expected_size: grown,
                });
            }
            ControlFlow::Break(())
        });

        match too_large {
            Some(job) => Err(job),
            None => Ok(batch.jobs.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use jobflow_core::{ElementInstanceKey, EventApplier};

    use super::*;
    use crate::collaborators::{InMemoryVariables, MaxRecordSize};
    use crate::job::{JobEvent, JobState};
    use crate::PartitionEvent;

    fn request(max_jobs: i32) -> ActivateJobs {
        ActivateJobs {
            job_type: "payment".to_string(),
            worker: "w1".to_string(),
            timeout: 1_000,
            max_jobs_to_activate: max_jobs,
            fetch_variables: Vec::new(),
        }
    }

    fn index_with_jobs(payload_sizes: &[usize], variables: &InMemoryVariables) -> JobIndex {
        let mut index = JobIndex::new();
        for (i, payload) in payload_sizes.iter().enumerate() {
            let scope = ElementInstanceKey::new(100 + i as i64);
            variables.set(scope, "payload", "x".repeat(*payload));
            let key = JobKey::new(i as i64 + 1);
            index.apply(&PartitionEvent::Job(JobEvent::created(key, JobRecord::new("payment", 3, scope))));
        }
        index
    }

    #[test]
    fn collects_in_key_order_up_to_max_jobs() {
        let variables = InMemoryVariables::new();
        let index = index_with_jobs(&[1, 1, 1, 1], &variables);
        let collector = JobBatchCollector::new(&index, &variables, &MaxRecordSize(usize::MAX));

        let mut batch = JobBatchActivated::empty(50, &request(3));
        let collected = collector.collect(&request(3), 10, &mut batch).unwrap();

        assert_eq!(collected, 3);
        assert_eq!(batch.job_keys(), vec![JobKey::new(1), JobKey::new(2), JobKey::new(3)]);
        assert!(!batch.truncated);
        let first = &batch.jobs[0].job;
        assert_eq!(first.deadline, Some(1_010));
        assert_eq!(first.worker, "w1");
        assert!(first.variables.contains_key("payload"));
        // collection never touches the index
        assert_eq!(index.state(JobKey::new(1)), JobState::Activatable);
    }

    #[test]
    fn oversized_first_job_is_reported() {
        let variables = InMemoryVariables::new();
        let index = index_with_jobs(&[10_000, 1], &variables);
        let collector = JobBatchCollector::new(&index, &variables, &MaxRecordSize(2_000));

        let mut batch = JobBatchActivated::empty(50, &request(10));
        let too_large = collector.collect(&request(10), 0, &mut batch).unwrap_err();

        assert_eq!(too_large.job_key, JobKey::new(1));
        assert!(too_large.expected_size > 10_000);
        assert!(batch.jobs.is_empty());
        assert!(batch.truncated);
    }

    #[test]
    fn budget_overflow_after_first_job_truncates() {
        let variables = InMemoryVariables::new();
        let index = index_with_jobs(&[10, 10_000, 10], &variables);
        let collector = JobBatchCollector::new(&index, &variables, &MaxRecordSize(2_000));

        let mut batch = JobBatchActivated::empty(50, &request(10));
        let collected = collector.collect(&request(10), 0, &mut batch).unwrap();

        assert_eq!(collected, 1);
        assert!(batch.truncated);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn batch_is_the_longest_prefix_that_fits(
            payloads in prop::collection::vec(0usize..400, 1..12),
            budget_slack in 0usize..3_000,
            max_jobs in 1i32..15,
        ) {
            let variables = InMemoryVariables::new();
            let index = index_with_jobs(&payloads, &variables);

            let mut unbounded = JobBatchActivated::empty(50, &request(max_jobs));
            JobBatchCollector::new(&index, &variables, &MaxRecordSize(usize::MAX))
                .collect(&request(max_jobs), 0, &mut unbounded)
                .unwrap();

            let base = JobBatchCollector::record_size(&JobBatchActivated::empty(50, &request(max_jobs)));
            let budget = base + budget_slack;

            let mut expected = 0;
            let mut size = base;
            for entry in &unbounded.jobs {
                size += JobBatchCollector::entry_size(entry);
                if size > budget {
                    break;
                }
                expected += 1;
            }

            let mut batch = JobBatchActivated::empty(50, &request(max_jobs));
            let result = JobBatchCollector::new(&index, &variables, &MaxRecordSize(budget))
                .collect(&request(max_jobs), 0, &mut batch);

            prop_assert_eq!(batch.jobs.len(), expected);
            prop_assert!(batch.jobs.len() <= max_jobs as usize);
            prop_assert_eq!(result.is_err(), expected == 0);
            prop_assert_eq!(&batch.jobs[..], &unbounded.jobs[..expected]);
        }
    }
}
