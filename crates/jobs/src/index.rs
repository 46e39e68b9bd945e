//! Derived job state with its secondary indices.
//!
//! The index is mutated **only** by applying events. It keeps four views in
//! lock-step with the primary job map:
//! - activatable jobs by `(type, key)`
//! - activated jobs by `(deadline, key)`
//! - backed-off failed jobs by `(recur_at, key)`
//! - open incidents by job

use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;

use jobflow_core::{EventApplier, IncidentKey, JobKey};

use crate::incident::{IncidentEvent, IncidentIntent, IncidentRecord};
use crate::job::{JobBatchActivated, JobEvent, JobIntent, JobRecord, JobState, ThrownErrorTarget};
use crate::PartitionEvent;

/// Resume point of a due-date scan: the first entry that was not consumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DueDateCursor {
    pub due: i64,
    pub job_key: JobKey,
}

impl DueDateCursor {
    fn bound(&self) -> (i64, JobKey) {
        (self.due, self.job_key)
    }
}

const SCAN_START: (i64, JobKey) = (i64::MIN, JobKey::new(i64::MIN));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobIndex {
    jobs: HashMap<JobKey, JobRecord>,
    states: HashMap<JobKey, JobState>,
    activatable: BTreeSet<(String, JobKey)>,
    deadlines: BTreeSet<(i64, JobKey)>,
    backoffs: BTreeSet<(i64, JobKey)>,
    incidents: HashMap<IncidentKey, IncidentRecord>,
    job_incidents: HashMap<JobKey, IncidentKey>,
}

impl JobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: JobKey) -> Option<&JobRecord> {
        self.jobs.get(&key)
    }

    pub fn state(&self, key: JobKey) -> JobState {
        self.states.get(&key).copied().unwrap_or(JobState::NotFound)
    }

    pub fn exists(&self, key: JobKey) -> bool {
        self.jobs.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All job keys in ascending order.
    pub fn job_keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.jobs.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Visit activatable jobs of `job_type` in ascending key order.
    ///
    /// The visitor returns `ControlFlow::Break` to stop early.
    pub fn for_each_activatable<F>(&self, job_type: &str, mut visitor: F)
    where
        F: FnMut(JobKey, &JobRecord) -> ControlFlow<()>,
    {
        let start = (job_type.to_string(), JobKey::new(i64::MIN));
        for (entry_type, key) in self.activatable.range(start..) {
            if entry_type != job_type {
                break;
            }
            let Some(job) = self.jobs.get(key) else {
                continue;
            };
            if visitor(*key, job).is_break() {
                break;
            }
        }
    }

    /// Visit activated jobs whose deadline is strictly before `now`, in
    /// `(deadline, key)` order, starting at `start` (inclusive).
    ///
    /// When the visitor breaks, the entry it was handed is **not** consumed and
    /// is returned as the resume cursor.
    pub fn for_each_timed_out<F>(&self, now: i64, start: Option<DueDateCursor>, visitor: F) -> Option<DueDateCursor>
    where
        F: FnMut(JobKey, &JobRecord) -> ControlFlow<()>,
    {
        self.scan_due(&self.deadlines, |deadline| deadline < now, start, visitor)
    }

    /// Visit backed-off failed jobs whose recurrence time is at or before
    /// `now`. Cursor semantics match [`JobIndex::for_each_timed_out`].
    pub fn for_each_backed_off<F>(&self, now: i64, start: Option<DueDateCursor>, visitor: F) -> Option<DueDateCursor>
    where
        F: FnMut(JobKey, &JobRecord) -> ControlFlow<()>,
    {
        self.scan_due(&self.backoffs, |recur_at| recur_at <= now, start, visitor)
    }

    fn scan_due<F>(
        &self,
        entries: &BTreeSet<(i64, JobKey)>,
        is_due: impl Fn(i64) -> bool,
        start: Option<DueDateCursor>,
        mut visitor: F,
    ) -> Option<DueDateCursor>
    where
        F: FnMut(JobKey, &JobRecord) -> ControlFlow<()>,
    {
        let lower = start.map(|cursor| cursor.bound()).unwrap_or(SCAN_START);
        for &(due, key) in entries.range(lower..) {
            if !is_due(due) {
                break;
            }
            let Some(job) = self.jobs.get(&key) else {
                continue;
            };
            if visitor(key, job).is_break() {
                return Some(DueDateCursor { due, job_key: key });
            }
        }
        None
    }

    /// Earliest deadline of any activated job.
    pub fn next_deadline(&self) -> Option<i64> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Earliest recurrence time of any backed-off job.
    pub fn next_backoff(&self) -> Option<i64> {
        self.backoffs.first().map(|(recur_at, _)| *recur_at)
    }

    /// Whether the deadline index holds exactly this entry.
    pub fn deadline_exists(&self, key: JobKey, deadline: i64) -> bool {
        self.deadlines.contains(&(deadline, key))
    }

    pub fn open_incident_for_job(&self, key: JobKey) -> Option<IncidentKey> {
        self.job_incidents.get(&key).copied()
    }

    pub fn incident(&self, key: IncidentKey) -> Option<&IncidentRecord> {
        self.incidents.get(&key)
    }

    pub fn open_incident_count(&self) -> usize {
        self.incidents.len()
    }

    /// Job type of the job `event` made activatable, if any.
    ///
    /// Must be called after the event was applied.
    pub fn became_activatable(&self, event: &PartitionEvent) -> Option<&str> {
        let relevant = match event {
            PartitionEvent::Job(e) => matches!(
                e.intent,
                JobIntent::Created
                    | JobIntent::Failed
                    | JobIntent::TimedOut
                    | JobIntent::Yielded
                    | JobIntent::RecurredAfterBackoff
            ),
            PartitionEvent::Incident(e) => e.intent == IncidentIntent::Resolved,
            PartitionEvent::JobBatch(_) => false,
        };
        if !relevant {
            return None;
        }

        let key = event.job_key()?;
        match self.state(key) {
            JobState::Activatable => self.jobs.get(&key).map(|job| job.job_type.as_str()),
            _ => None,
        }
    }

    /// Check that every secondary index agrees with the primary job map.
    pub fn verify(&self) -> Result<(), String> {
        if self.jobs.len() != self.states.len() {
            return Err(format!("{} jobs but {} states", self.jobs.len(), self.states.len()));
        }

        let mut activatable = BTreeSet::new();
        let mut deadlines = BTreeSet::new();
        let mut backoffs = BTreeSet::new();
        for (key, job) in &self.jobs {
            match self.states.get(key) {
                Some(JobState::Activatable) => {
                    activatable.insert((job.job_type.clone(), *key));
                }
                Some(JobState::Activated) => {
                    let deadline = job.deadline.ok_or_else(|| format!("activated job {key} has no deadline"))?;
                    deadlines.insert((deadline, *key));
                }
                Some(JobState::Failed) => {
                    if let Some(recur_at) = job.recur_at {
                        backoffs.insert((recur_at, *key));
                    }
                }
                Some(JobState::ErrorThrown) => {}
                Some(JobState::NotFound) | None => return Err(format!("job {key} has no state")),
            }
        }

        if activatable != self.activatable {
            return Err("activatable index out of sync".to_string());
        }
        if deadlines != self.deadlines {
            return Err("deadline index out of sync".to_string());
        }
        if backoffs != self.backoffs {
            return Err("backoff index out of sync".to_string());
        }
        for (job_key, incident_key) in &self.job_incidents {
            let linked = self.incidents.get(incident_key).and_then(|incident| incident.job_key);
            if linked != Some(*job_key) {
                return Err(format!("incident {incident_key} is not linked to job {job_key}"));
            }
        }
        Ok(())
    }

    fn unindex(&mut self, key: JobKey) {
        let (Some(job), Some(state)) = (self.jobs.get(&key), self.states.get(&key)) else {
            return;
        };
        match state {
            JobState::Activatable => {
                self.activatable.remove(&(job.job_type.clone(), key));
            }
            JobState::Activated => {
                if let Some(deadline) = job.deadline {
                    self.deadlines.remove(&(deadline, key));
                }
            }
            JobState::Failed => {
                if let Some(recur_at) = job.recur_at {
                    self.backoffs.remove(&(recur_at, key));
                }
            }
            JobState::ErrorThrown | JobState::NotFound => {}
        }
    }

    /// Store `job` in `state`, replacing every index entry of the previous version.
    fn put(&mut self, key: JobKey, state: JobState, job: &JobRecord) {
        self.unindex(key);

        let mut stored = job.clone();
        stored.variables.clear();
        match state {
            JobState::Activatable => {
                stored.deadline = None;
                stored.recur_at = None;
                self.activatable.insert((stored.job_type.clone(), key));
            }
            JobState::Activated => {
                stored.recur_at = None;
                if let Some(deadline) = stored.deadline {
                    self.deadlines.insert((deadline, key));
                }
            }
            JobState::Failed => {
                stored.deadline = None;
                if let Some(recur_at) = stored.recur_at {
                    self.backoffs.insert((recur_at, key));
                }
            }
            JobState::ErrorThrown | JobState::NotFound => {
                stored.deadline = None;
                stored.recur_at = None;
            }
        }

        self.jobs.insert(key, stored);
        self.states.insert(key, state);
    }

    fn remove(&mut self, key: JobKey) {
        self.unindex(key);
        self.jobs.remove(&key);
        self.states.remove(&key);
    }

    fn apply_job(&mut self, event: &JobEvent) {
        let key = event.job_key;
        let job = &event.job;
        match event.intent {
            JobIntent::Created | JobIntent::TimedOut | JobIntent::Yielded | JobIntent::RecurredAfterBackoff => {
                self.put(key, JobState::Activatable, job);
            }
            JobIntent::Completed | JobIntent::Canceled => self.remove(key),
            JobIntent::Failed => {
                let state = if job.retries > 0 && job.recur_at.is_none() {
                    JobState::Activatable
                } else {
                    JobState::Failed
                };
                self.put(key, state, job);
            }
            JobIntent::ErrorThrown => match job.thrown_error {
                Some(ThrownErrorTarget::CatchEvent { .. }) => self.remove(key),
                _ => self.put(key, JobState::ErrorThrown, job),
            },
            JobIntent::RetriesUpdated | JobIntent::TimeoutUpdated => {
                let state = self.state(key);
                if state != JobState::NotFound {
                    self.put(key, state, job);
                }
            }
        }
    }

    fn apply_batch(&mut self, batch: &JobBatchActivated) {
        for entry in &batch.jobs {
            self.put(entry.key, JobState::Activated, &entry.job);
        }
    }

    fn apply_incident(&mut self, event: &IncidentEvent) {
        let job_key = event.incident.job_key;
        match event.intent {
            IncidentIntent::Created => {
                self.incidents.insert(event.incident_key, event.incident.clone());
                let Some(job_key) = job_key else {
                    return;
                };
                self.job_incidents.insert(job_key, event.incident_key);

                // An incident disables a job that could still be handed out.
                if matches!(self.state(job_key), JobState::Activatable | JobState::Activated) {
                    if let Some(mut job) = self.jobs.get(&job_key).cloned() {
                        job.recur_at = None;
                        self.put(job_key, JobState::Failed, &job);
                    }
                }
            }
            IncidentIntent::Resolved => {
                self.incidents.remove(&event.incident_key);
                let Some(job_key) = job_key else {
                    return;
                };
                if self.job_incidents.get(&job_key) == Some(&event.incident_key) {
                    self.job_incidents.remove(&job_key);
                }

                if matches!(self.state(job_key), JobState::Failed | JobState::ErrorThrown) {
                    if let Some(job) = self.jobs.get(&job_key).cloned() {
                        if job.retries > 0 {
                            self.put(job_key, JobState::Activatable, &job);
                        }
                    }
                }
            }
        }
    }
}

impl EventApplier for JobIndex {
    type Event = PartitionEvent;

    fn apply(&mut self, event: &PartitionEvent) {
        match event {
            PartitionEvent::Job(e) => self.apply_job(e),
            PartitionEvent::JobBatch(e) => self.apply_batch(e),
            PartitionEvent::Incident(e) => self.apply_incident(e),
        }
    }
}
