//! Decision logic for job and incident commands.
//!
//! Every handler validates against the current [`JobIndex`] and either
//! rejects (no state change) or returns the events to append, primary event
//! first. Handlers never mutate the index.

use std::sync::Arc;

use tracing::debug;

use jobflow_core::{Clock, CommandProcessor, Decision, JobKey, KeyGenerator, Rejection};

use crate::PartitionCommand;
use crate::batch::JobBatchCollector;
use crate::collaborators::{CatchEventLookup, ProcessState, VariableStore, WriteBudget};
use crate::incident::{ErrorType, IncidentCommand, IncidentEscalation};
use crate::index::JobIndex;
use crate::job::{
    ActivateJobs, CompleteJob, FailJob, JobBatchActivated, JobCommand, JobEvent, JobIntent, JobRecord, JobState,
    ThrowJobError, ThrownErrorTarget, UpdateJobRetries, UpdateJobTimeout,
};
use crate::{ElementCommand, PartitionEvent};

type JobDecision = Decision<PartitionEvent, ElementCommand>;

/// Lifecycle processor for jobs of one partition.
///
/// Owns the partition key generator; keys for batches and incidents are drawn
/// while deciding, so a rejected command never consumes one.
pub struct JobLifecycleProcessor {
    keys: KeyGenerator,
    clock: Arc<dyn Clock>,
    variables: Arc<dyn VariableStore>,
    process: Arc<dyn ProcessState>,
    budget: Arc<dyn WriteBudget>,
}

impl JobLifecycleProcessor {
    pub fn new(
        clock: Arc<dyn Clock>,
        variables: Arc<dyn VariableStore>,
        process: Arc<dyn ProcessState>,
        budget: Arc<dyn WriteBudget>,
    ) -> Self {
        Self {
            keys: KeyGenerator::new(),
            clock,
            variables,
            process,
            budget,
        }
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut KeyGenerator {
        &mut self.keys
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Decide the creation of a new job (issued by process execution).
    pub fn create(&mut self, job: JobRecord) -> Result<(JobKey, PartitionEvent), Rejection> {
        if job.job_type.trim().is_empty() {
            return Err(Rejection::invalid_argument(
                "Expected to create job with type to be present, but it was blank",
            ));
        }
        let key: JobKey = self.keys.next_key();
        Ok((key, PartitionEvent::Job(JobEvent::created(key, job))))
    }

    fn handle_job(&mut self, state: &JobIndex, command: &JobCommand) -> Result<JobDecision, Rejection> {
        match command {
            JobCommand::Activate(c) => self.activate(state, c),
            JobCommand::Complete(c) => complete(state, c),
            JobCommand::Fail(c) => self.fail(state, c),
            JobCommand::ThrowError(c) => self.throw_error(state, c),
            JobCommand::TimeOut { job_key } => self.time_out(state, *job_key),
            JobCommand::Cancel { job_key } => cancel(state, *job_key),
            JobCommand::UpdateRetries(c) => update_retries(state, c),
            JobCommand::UpdateTimeout(c) => self.update_timeout(state, c),
            JobCommand::RecurAfterBackoff { job_key } | JobCommand::MakeActivatable { job_key } => {
                recur_after_backoff(state, *job_key)
            }
            JobCommand::Yield { job_key } => yield_job(state, *job_key),
        }
    }

    fn activate(&mut self, state: &JobIndex, request: &ActivateJobs) -> Result<JobDecision, Rejection> {
        if request.job_type.trim().is_empty() {
            return Err(Rejection::invalid_argument(
                "Expected to activate job batch with type to be present, but it was blank",
            ));
        }
        if request.timeout <= 0 {
            return Err(Rejection::invalid_argument(format!(
                "Expected to activate job batch with timeout to be greater than zero, but it was '{}'",
                request.timeout
            )));
        }
        if request.max_jobs_to_activate <= 0 {
            return Err(Rejection::invalid_argument(format!(
                "Expected to activate job batch with max jobs to activate to be greater than zero, but it was '{}'",
                request.max_jobs_to_activate
            )));
        }

        let now = self.clock.now_millis();
        let mut batch = JobBatchActivated::empty(0, request);
        let collector = JobBatchCollector::new(state, self.variables.as_ref(), self.budget.as_ref());
        let collected = collector.collect(request, now, &mut batch);
        batch.batch_key = self.keys.next_key();

        match collected {
            Ok(collected) => {
                debug!(job_type = %request.job_type, collected, truncated = batch.truncated, "job batch collected");
                Ok(Decision::new(PartitionEvent::JobBatch(batch)))
            }
            Err(too_large) => {
                debug!(
                    job_key = %too_large.job_key,
                    expected_size = too_large.expected_size,
                    "job exceeds the record size limit"
                );
                let message = IncidentEscalation::message_size_exceeded_message(too_large.job_key, too_large.expected_size);
                let incident = IncidentEscalation::raise(
                    state,
                    &mut self.keys,
                    too_large.job_key,
                    &too_large.job,
                    ErrorType::MessageSizeExceeded,
                    message,
                );
                Ok(Decision::new(PartitionEvent::JobBatch(batch)).with_events(incident))
            }
        }
    }

    fn fail(&mut self, state: &JobIndex, command: &FailJob) -> Result<JobDecision, Rejection> {
        let job = require_job(state, command.job_key, "fail", &[JobState::Activatable, JobState::Activated])?;

        let mut failed = job.clone();
        failed.retries = command.retries;
        failed.error_message = command.error_message.clone();
        failed.backoff = command.backoff.max(0);
        failed.deadline = None;
        failed.recur_at = (command.retries > 0 && command.backoff > 0)
            .then(|| self.clock.now_millis().saturating_add(command.backoff));

        let decision = Decision::new(job_event(JobIntent::Failed, command.job_key, failed.clone()));
        if command.retries > 0 {
            return Ok(decision);
        }

        let message = IncidentEscalation::no_retries_message(&failed);
        let incident = IncidentEscalation::raise(
            state,
            &mut self.keys,
            command.job_key,
            &failed,
            ErrorType::JobNoRetries,
            message,
        );
        Ok(decision.with_events(incident))
    }

    fn throw_error(&mut self, state: &JobIndex, command: &ThrowJobError) -> Result<JobDecision, Rejection> {
        let job = require_job(
            state,
            command.job_key,
            "throw an error for",
            &[JobState::Activatable, JobState::Activated],
        )?;

        let mut thrown = job.clone();
        thrown.error_code = command.error_code.clone();
        thrown.error_message = command.error_message.clone();
        thrown.variables = command.variables.clone();

        match self
            .process
            .find_error_catch_event(job.element_instance_key, &command.error_code)
        {
            CatchEventLookup::NotFound => {
                thrown.thrown_error = Some(ThrownErrorTarget::NoCatchEvent);
                let message = IncidentEscalation::unhandled_error_message(&command.error_code, &command.error_message);
                let incident = IncidentEscalation::raise(
                    state,
                    &mut self.keys,
                    command.job_key,
                    &thrown,
                    ErrorType::UnhandledErrorEvent,
                    message,
                );
                Ok(Decision::new(job_event(JobIntent::ErrorThrown, command.job_key, thrown)).with_events(incident))
            }
            CatchEventLookup::Found(target) => {
                if !target.scope_active || !target.accepting_events {
                    return Err(Rejection::invalid_state(format!(
                        "Expected to throw an error event with the code '{}' for job with key '{}', but the \
                         catching scope '{}' is not active",
                        command.error_code, command.job_key, target.catch_element_id
                    )));
                }

                thrown.thrown_error = Some(ThrownErrorTarget::CatchEvent {
                    catch_element_id: target.catch_element_id.clone(),
                    scope_key: target.scope_key,
                });
                let follow_up = ElementCommand::ThrowError {
                    element_instance_key: job.element_instance_key,
                    catch_element_id: target.catch_element_id,
                    scope_key: target.scope_key,
                    error_code: command.error_code.clone(),
                    error_message: command.error_message.clone(),
                    variables: command.variables.clone(),
                };
                Ok(Decision::new(job_event(JobIntent::ErrorThrown, command.job_key, thrown)).with_follow_up(follow_up))
            }
        }
    }

    fn time_out(&self, state: &JobIndex, job_key: JobKey) -> Result<JobDecision, Rejection> {
        let job = state.get(job_key).ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to time out activated job with key '{job_key}', but no such job was found"
            ))
        })?;

        if state.state(job_key) != JobState::Activated {
            return Err(Rejection::not_found(format!(
                "Expected to time out activated job with key '{job_key}', but it is not activated"
            )));
        }

        let now = self.clock.now_millis();
        if job.deadline.is_none_or(|deadline| deadline >= now) {
            return Err(Rejection::not_found(format!(
                "Expected to time out activated job with key '{job_key}', but it has not timed out"
            )));
        }

        let mut timed_out = job.clone();
        timed_out.deadline = None;
        Ok(Decision::new(job_event(JobIntent::TimedOut, job_key, timed_out)))
    }

    fn update_timeout(&self, state: &JobIndex, command: &UpdateJobTimeout) -> Result<JobDecision, Rejection> {
        let job_key = command.job_key;
        let job = state.get(job_key).ok_or_else(|| {
            Rejection::not_found(format!(
                "Expected to update the timeout of job with key '{job_key}', but no such job was found"
            ))
        })?;

        let indexed = state.state(job_key) == JobState::Activated
            && job
                .deadline
                .is_some_and(|deadline| state.deadline_exists(job_key, deadline));
        if !indexed {
            return Err(Rejection::invalid_state(format!(
                "Expected to update the timeout of job with key '{job_key}', but the job is not active"
            )));
        }
        if command.timeout <= 0 {
            return Err(Rejection::invalid_argument(format!(
                "Expected to update the timeout of job with key '{job_key}' to be greater than zero, but it was '{}'",
                command.timeout
            )));
        }

        let mut updated = job.clone();
        updated.deadline = Some(self.clock.now_millis().saturating_add(command.timeout));
        Ok(Decision::new(job_event(JobIntent::TimeoutUpdated, job_key, updated)))
    }

    fn resolve_incident(&self, state: &JobIndex, command: &IncidentCommand) -> Result<JobDecision, Rejection> {
        match command {
            IncidentCommand::Resolve { incident_key } => {
                IncidentEscalation::handle_resolve(state, *incident_key).map(Decision::new)
            }
        }
    }
}

impl CommandProcessor for JobLifecycleProcessor {
    type State = JobIndex;
    type Command = PartitionCommand;
    type FollowUp = ElementCommand;
    type Error = Rejection;

    fn handle(&mut self, state: &JobIndex, command: &PartitionCommand) -> Result<JobDecision, Rejection> {
        match command {
            PartitionCommand::Job(c) => self.handle_job(state, c),
            PartitionCommand::Incident(c) => self.resolve_incident(state, c),
        }
    }
}

fn job_event(intent: JobIntent, job_key: JobKey, job: JobRecord) -> PartitionEvent {
    PartitionEvent::Job(JobEvent::new(intent, job_key, job))
}

/// Look the job up and check it is in one of the `allowed` states.
fn require_job<'a>(
    state: &'a JobIndex,
    job_key: JobKey,
    action: &str,
    allowed: &[JobState],
) -> Result<&'a JobRecord, Rejection> {
    let job = state.get(job_key).ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to {action} job with key '{job_key}', but no such job was found"
        ))
    })?;

    let current = state.state(job_key);
    if !allowed.contains(&current) {
        return Err(Rejection::invalid_state(format!(
            "Expected to {action} job with key '{job_key}', but it is in state '{current}'"
        )));
    }
    Ok(job)
}

fn complete(state: &JobIndex, command: &CompleteJob) -> Result<JobDecision, Rejection> {
    let job = require_job(
        state,
        command.job_key,
        "complete",
        &[JobState::Activatable, JobState::Activated],
    )?;

    let mut completed = job.clone();
    completed.variables = command.variables.clone();
    let follow_up = ElementCommand::CompleteElement {
        element_instance_key: job.element_instance_key,
        variables: command.variables.clone(),
    };
    Ok(Decision::new(job_event(JobIntent::Completed, command.job_key, completed)).with_follow_up(follow_up))
}

fn cancel(state: &JobIndex, job_key: JobKey) -> Result<JobDecision, Rejection> {
    let job = state.get(job_key).ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to cancel job with key '{job_key}', but no such job was found"
        ))
    })?;

    let decision = Decision::new(job_event(JobIntent::Canceled, job_key, job.clone()));
    Ok(decision.with_events(IncidentEscalation::resolve_open(state, job_key)))
}

fn update_retries(state: &JobIndex, command: &UpdateJobRetries) -> Result<JobDecision, Rejection> {
    let job_key = command.job_key;
    if command.retries < 0 {
        return Err(Rejection::invalid_argument(format!(
            "Expected to update retries of job with key '{job_key}' to a non-negative value, but it was '{}'",
            command.retries
        )));
    }
    let job = state.get(job_key).ok_or_else(|| {
        Rejection::not_found(format!(
            "Expected to update retries for job with key '{job_key}', but no such job was found"
        ))
    })?;

    let mut updated = job.clone();
    updated.retries = command.retries;
    Ok(Decision::new(job_event(JobIntent::RetriesUpdated, job_key, updated)))
}

fn recur_after_backoff(state: &JobIndex, job_key: JobKey) -> Result<JobDecision, Rejection> {
    let prefix = format!("Expected to back off failed job with key '{job_key}', but");
    let job = match state.state(job_key) {
        JobState::NotFound => return Err(Rejection::not_found(format!("{prefix} it does not exist"))),
        JobState::Activated => return Err(Rejection::not_found(format!("{prefix} it is already activated"))),
        JobState::Activatable => return Err(Rejection::not_found(format!("{prefix} it is already activatable"))),
        JobState::ErrorThrown => return Err(Rejection::not_found(format!("{prefix} it is in error state"))),
        JobState::Failed => state
            .get(job_key)
            .ok_or_else(|| Rejection::not_found(format!("{prefix} it does not exist")))?,
    };

    let mut recurred = job.clone();
    recurred.recur_at = None;
    Ok(Decision::new(job_event(JobIntent::RecurredAfterBackoff, job_key, recurred)))
}

fn yield_job(state: &JobIndex, job_key: JobKey) -> Result<JobDecision, Rejection> {
    let job = require_job(state, job_key, "yield activated", &[JobState::Activated])?;

    let mut yielded = job.clone();
    yielded.deadline = None;
    Ok(Decision::new(job_event(JobIntent::Yielded, job_key, yielded)))
}
