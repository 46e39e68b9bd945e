//! Integration tests for the full partition pipeline.
//!
//! Tests: Command → JobLifecycleProcessor → RecordLog → JobIndex → checkers / bus
//!
//! Verifies:
//! - Job lifecycles end to end, including incidents
//! - Timeouts and backoff driven by the due-date checkers
//! - Recovery rebuilds the same state from the log

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use serde_json::Value as JsonValue;

    use jobflow_core::{ControlledClock, ElementInstanceKey, IncidentKey, JobKey, RejectionType};
    use jobflow_events::{EventBus, InMemoryEventBus, RecordEnvelope, RecordType, Subscription};
    use jobflow_jobs::{
        ActivateJobs, CompleteJob, FailJob, IncidentCommand, InMemoryProcessState, InMemoryVariables, JobCommand,
        JobRecord, JobState, PartitionCommand, UpdateJobRetries,
    };

    use crate::actor;
    use crate::config::EngineConfig;
    use crate::engine::{Collaborators, CommandOutcome, JobsAvailable, PartitionEngine};
    use crate::partition::{Partition, PartitionPhase};
    use crate::record_log::{InMemoryRecordLog, PublishingRecordLog};
    use crate::response::NoopResponseWriter;

    type Log = PublishingRecordLog<Arc<InMemoryRecordLog>, Arc<InMemoryEventBus<RecordEnvelope<JsonValue>>>>;
    type Notifier = Arc<InMemoryEventBus<JobsAvailable>>;

    struct Setup {
        clock: Arc<ControlledClock>,
        store: Arc<InMemoryRecordLog>,
        records: Arc<InMemoryEventBus<RecordEnvelope<JsonValue>>>,
        notifier: Notifier,
        variables: Arc<InMemoryVariables>,
        config: EngineConfig,
    }

    impl Setup {
        fn new() -> Self {
            Self::with_config(EngineConfig::default().with_due_date_batch_limit(10))
        }

        fn with_config(config: EngineConfig) -> Self {
            Self {
                clock: ControlledClock::arc(1_000),
                store: Arc::new(InMemoryRecordLog::new(config.max_record_size)),
                records: Arc::new(InMemoryEventBus::new()),
                notifier: Arc::new(InMemoryEventBus::new()),
                variables: Arc::new(InMemoryVariables::new()),
                config,
            }
        }

        /// A partition that has not replayed yet; the actor recovers it.
        fn partition_unrecovered(&self) -> Partition<Log, Notifier> {
            let collaborators = Collaborators {
                clock: self.clock.clone(),
                variables: self.variables.clone(),
                process: Arc::new(InMemoryProcessState::new()),
                responses: Arc::new(NoopResponseWriter),
            };
            let log = PublishingRecordLog::new(self.store.clone(), self.records.clone());
            let engine = PartitionEngine::new(log, self.notifier.clone(), collaborators);
            Partition::new(&self.config, engine)
        }

        /// A fresh partition over the shared log, recovered and processing.
        fn partition(&self) -> Partition<Log, Notifier> {
            let mut partition = self.partition_unrecovered();
            partition.recover().unwrap();
            partition
        }
    }

    fn job(element: i64) -> JobRecord {
        JobRecord::new("payment", 2, ElementInstanceKey::new(element))
    }

    fn key_of(outcome: &CommandOutcome) -> JobKey {
        JobKey::new(outcome.primary().unwrap().key())
    }

    fn activate(max_jobs: i32, timeout: i64) -> PartitionCommand {
        PartitionCommand::Job(JobCommand::Activate(ActivateJobs {
            job_type: "payment".to_string(),
            worker: "worker-1".to_string(),
            timeout,
            max_jobs_to_activate: max_jobs,
            fetch_variables: Vec::new(),
        }))
    }

    fn fail(job_key: JobKey, retries: i32, backoff: i64) -> PartitionCommand {
        PartitionCommand::Job(JobCommand::Fail(FailJob {
            job_key,
            retries,
            error_message: String::new(),
            backoff,
        }))
    }

    fn notified_types(subscription: &Subscription<JobsAvailable>) -> Vec<String> {
        subscription.drain().into_iter().map(|n| n.job_type).collect()
    }

    #[test]
    fn actor_runs_a_job_from_creation_to_completion() {
        let setup = Setup::new();
        let exported = setup.records.subscribe();
        let available = setup.notifier.subscribe();
        let handle = actor::spawn(setup.partition_unrecovered()).unwrap();

        let created = handle.create_job(job(10)).unwrap();
        let job_key = key_of(&created);
        assert_eq!(notified_types(&available), vec!["payment".to_string()]);

        let activated = handle.submit(activate(5, 60_000)).unwrap();
        assert_eq!(activated.intents(), vec!["ACTIVATED"]);

        let completed = handle
            .submit(JobCommand::Complete(CompleteJob {
                job_key,
                variables: Default::default(),
            }))
            .unwrap();
        assert_eq!(completed.intents(), vec!["COMPLETED", "COMPLETE_ELEMENT"]);

        let again = handle
            .submit(JobCommand::Complete(CompleteJob {
                job_key,
                variables: Default::default(),
            }))
            .unwrap();
        assert_eq!(again.rejection().unwrap().rejection_type, RejectionType::NotFound);

        let stats = handle.stats();
        assert_eq!(stats.phase, PartitionPhase::Processing);
        assert_eq!(stats.jobs_created, 1);
        assert_eq!(stats.commands_accepted, 2);
        assert_eq!(stats.commands_rejected, 1);
        handle.shutdown();

        let intents: Vec<(RecordType, String)> = exported
            .drain()
            .into_iter()
            .map(|r| (r.record_type(), r.intent().to_string()))
            .collect();
        assert_eq!(
            intents,
            vec![
                (RecordType::Event, "CREATED".to_string()),
                (RecordType::Command, "ACTIVATE".to_string()),
                (RecordType::Event, "ACTIVATED".to_string()),
                (RecordType::Command, "COMPLETE".to_string()),
                (RecordType::Event, "COMPLETED".to_string()),
                (RecordType::Command, "COMPLETE_ELEMENT".to_string()),
                (RecordType::Command, "COMPLETE".to_string()),
                (RecordType::CommandRejection, "COMPLETE".to_string()),
            ]
        );
    }

    #[test]
    fn actor_refuses_commands_while_paused() {
        let setup = Setup::new();
        let handle = actor::spawn(setup.partition_unrecovered()).unwrap();

        handle.pause().unwrap();
        let err = handle.create_job(job(10)).unwrap_err();
        assert_eq!(
            err,
            crate::error::EngineError::NotAccepting {
                phase: PartitionPhase::Paused
            }
        );

        handle.resume().unwrap();
        assert!(handle.create_job(job(10)).unwrap().is_accepted());
        handle.shutdown();
    }

    #[test]
    fn timed_out_job_is_offered_again_with_a_new_deadline() {
        let setup = Setup::new();
        let available = setup.notifier.subscribe();
        let mut partition = setup.partition();
        let job_key = key_of(&partition.create_job(job(10)).unwrap());
        partition.submit(activate(1, 100)).unwrap();
        available.drain();

        setup.clock.advance(101);
        assert_eq!(partition.run_due_checkers().unwrap(), 1);
        assert_eq!(partition.engine().state().state(job_key), JobState::Activatable);
        assert_eq!(notified_types(&available), vec!["payment".to_string()]);

        let reactivated = partition.submit(activate(1, 100)).unwrap();
        assert!(reactivated.is_accepted());
        let job = partition.engine().state().get(job_key).unwrap();
        assert_eq!(job.deadline, Some(1_201));
    }

    #[test]
    fn backlog_of_expired_jobs_drains_in_batches() {
        let setup = Setup::new();
        let mut partition = setup.partition();
        for element in 0..25 {
            partition.create_job(job(element)).unwrap();
        }
        partition.submit(activate(25, 100)).unwrap();
        setup.clock.advance(500);

        let mut emitted = Vec::new();
        for _ in 0..4 {
            emitted.push(partition.run_due_checkers().unwrap());
        }

        assert_eq!(emitted, vec![10, 10, 5, 0]);
        assert_eq!(partition.engine().state().next_deadline(), None);
    }

    #[test]
    fn backed_off_job_recurs_once_its_backoff_elapsed() {
        let setup = Setup::new();
        let available = setup.notifier.subscribe();
        let mut partition = setup.partition();
        let job_key = key_of(&partition.create_job(job(10)).unwrap());
        partition.submit(activate(1, 60_000)).unwrap();
        partition.run_due_checkers().unwrap();

        let failed = partition.submit(fail(job_key, 1, 5_000)).unwrap();
        assert_eq!(failed.intents(), vec!["FAILED"]);
        available.drain();

        setup.clock.advance(4_999);
        partition.run_due_checkers().unwrap();
        assert_eq!(partition.engine().state().state(job_key), JobState::Failed);

        setup.clock.advance(1);
        partition.run_due_checkers().unwrap();
        assert_eq!(partition.engine().state().state(job_key), JobState::Activatable);
        assert_eq!(notified_types(&available), vec!["payment".to_string()]);
    }

    #[test]
    fn exhausted_job_goes_through_incident_and_resolution() {
        let setup = Setup::new();
        let available = setup.notifier.subscribe();
        let mut partition = setup.partition();
        let job_key = key_of(&partition.create_job(job(10)).unwrap());
        partition.submit(activate(1, 60_000)).unwrap();

        let failed = partition.submit(fail(job_key, 0, 0)).unwrap();
        assert_eq!(failed.intents(), vec!["FAILED", "CREATED"]);
        let incident_key = partition.engine().state().open_incident_for_job(job_key).unwrap();

        let resolve = PartitionCommand::Incident(IncidentCommand::Resolve { incident_key });
        let refused = partition.submit(resolve.clone()).unwrap();
        assert_eq!(refused.rejection().unwrap().rejection_type, RejectionType::InvalidState);

        partition
            .submit(JobCommand::UpdateRetries(UpdateJobRetries { job_key, retries: 3 }).into())
            .unwrap();
        available.drain();

        let resolved = partition.submit(resolve).unwrap();
        assert_eq!(resolved.intents(), vec!["RESOLVED"]);
        assert_eq!(partition.engine().state().state(job_key), JobState::Activatable);
        assert_eq!(notified_types(&available), vec!["payment".to_string()]);
    }

    #[test]
    fn oversized_job_becomes_an_incident_instead_of_a_batch() {
        let setup = Setup::with_config(EngineConfig::default().with_max_record_size(4 * 1024));
        let mut partition = setup.partition();
        let small = key_of(&partition.create_job(job(10)).unwrap());
        let large = key_of(&partition.create_job(job(11)).unwrap());
        setup.variables.set(ElementInstanceKey::new(11), "document", "x".repeat(8 * 1024));

        let first = partition.submit(activate(5, 60_000)).unwrap();
        assert_eq!(first.intents(), vec!["ACTIVATED"]);
        assert_eq!(partition.engine().state().state(small), JobState::Activated);
        assert_eq!(partition.engine().state().state(large), JobState::Activatable);

        let second = partition.submit(activate(5, 60_000)).unwrap();
        assert_eq!(second.intents(), vec!["ACTIVATED", "CREATED"]);
        assert_eq!(partition.engine().state().state(large), JobState::Failed);
        assert!(partition.engine().state().open_incident_for_job(large).is_some());
        assert_eq!(partition.phase(), PartitionPhase::Processing);
    }

    #[test]
    fn recovery_rebuilds_state_and_continues_keys() {
        let setup = Setup::new();
        let mut live = setup.partition();
        let first = key_of(&live.create_job(job(10)).unwrap());
        let second = key_of(&live.create_job(job(11)).unwrap());
        live.submit(activate(1, 100)).unwrap();
        live.submit(fail(first, 0, 0)).unwrap();
        let last_key = live.engine().last_key();

        let mut recovered = setup.partition();

        for key in [first, second] {
            assert_eq!(recovered.engine().state().state(key), live.engine().state().state(key));
            assert_eq!(recovered.engine().state().get(key), live.engine().state().get(key));
        }
        assert_eq!(
            recovered.engine().state().open_incident_for_job(first),
            live.engine().state().open_incident_for_job(first)
        );
        assert_eq!(recovered.engine().last_key(), last_key);

        let third = key_of(&recovered.create_job(job(12)).unwrap());
        assert!(third.value() > last_key);
    }

    #[test]
    fn rejected_client_keys_do_not_move_the_key_generator() {
        let setup = Setup::new();
        let mut live = setup.partition();
        live.create_job(job(10)).unwrap();
        let rejected = live
            .submit(JobCommand::Complete(CompleteJob {
                job_key: JobKey::new(i64::MAX),
                variables: Default::default(),
            })
            .into())
            .unwrap();
        assert_eq!(rejected.rejection().unwrap().rejection_type, RejectionType::NotFound);

        let mut recovered = setup.partition();

        assert_eq!(recovered.engine().last_key(), live.engine().last_key());
        let next = key_of(&recovered.create_job(job(11)).unwrap());
        assert_eq!(next.value(), live.engine().last_key() + 1);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Create,
        Activate(i32),
        Complete(usize),
        Fail(usize, i32, i64),
        UpdateRetries(usize, i32),
        Cancel(usize),
        ResolveAll,
        Advance(i64),
    }

    fn pick(keys: &[JobKey], i: usize) -> JobKey {
        keys.get(i % keys.len().max(1)).copied().unwrap_or(JobKey::new(0))
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Create),
            (1i32..4).prop_map(Step::Activate),
            (0usize..6).prop_map(Step::Complete),
            (0usize..6, 0i32..2, prop_oneof![Just(0i64), 1i64..2_000]).prop_map(|(i, r, b)| Step::Fail(i, r, b)),
            (0usize..6, 1i32..3).prop_map(|(i, r)| Step::UpdateRetries(i, r)),
            (0usize..6).prop_map(Step::Cancel),
            Just(Step::ResolveAll),
            (1i64..3_000).prop_map(Step::Advance),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

        #[test]
        fn replaying_the_log_reproduces_the_live_index(steps in prop::collection::vec(step(), 1..30)) {
            let setup = Setup::new();
            let mut live = setup.partition();
            let mut keys: Vec<JobKey> = Vec::new();

            for step in steps {
                match step {
                    Step::Create => {
                        let element = keys.len() as i64 + 10;
                        keys.push(key_of(&live.create_job(job(element)).unwrap()));
                    }
                    Step::Activate(max) => {
                        live.submit(activate(max, 1_000)).unwrap();
                    }
                    Step::Complete(i) => {
                        let job_key = pick(&keys, i);
                        live.submit(JobCommand::Complete(CompleteJob { job_key, variables: Default::default() }).into()).unwrap();
                    }
                    Step::Fail(i, retries, backoff) => {
                        let job_key = pick(&keys, i);
                        live.submit(fail(job_key, retries, backoff)).unwrap();
                    }
                    Step::UpdateRetries(i, retries) => {
                        let job_key = pick(&keys, i);
                        live.submit(JobCommand::UpdateRetries(UpdateJobRetries { job_key, retries }).into()).unwrap();
                    }
                    Step::Cancel(i) => {
                        let job_key = pick(&keys, i);
                        live.submit(JobCommand::Cancel { job_key }.into()).unwrap();
                    }
                    Step::ResolveAll => {
                        let open: Vec<IncidentKey> = keys
                            .iter()
                            .filter_map(|k| live.engine().state().open_incident_for_job(*k))
                            .collect();
                        for incident_key in open {
                            live.submit(IncidentCommand::Resolve { incident_key }.into()).unwrap();
                        }
                    }
                    Step::Advance(millis) => {
                        setup.clock.advance(millis);
                        live.run_due_checkers().unwrap();
                    }
                }
            }

            let recovered = setup.partition();
            prop_assert_eq!(recovered.engine().state().verify(), Ok(()));
            prop_assert_eq!(recovered.engine().state().job_keys(), live.engine().state().job_keys());
            for key in live.engine().state().job_keys() {
                prop_assert_eq!(recovered.engine().state().state(key), live.engine().state().state(key));
                prop_assert_eq!(recovered.engine().state().get(key), live.engine().state().get(key));
            }
            prop_assert_eq!(recovered.engine().state().open_incident_count(), live.engine().state().open_incident_count());
            prop_assert_eq!(recovered.engine().last_key(), live.engine().last_key());
        }
    }
}
