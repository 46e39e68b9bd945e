//! Single-threaded partition actor.
//!
//! The actor thread owns the [`Partition`]. Requests arrive through a mailbox
//! and are processed one at a time; between requests the loop sleeps until the
//! next checker tick, so timers and commands interleave on one thread.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use jobflow_events::EventBus;
use jobflow_jobs::{JobRecord, PartitionCommand};

use crate::engine::{CommandOutcome, JobsAvailable};
use crate::error::EngineError;
use crate::partition::{Partition, PartitionPhase};
use crate::record_log::RecordLog;

/// Longest the loop sleeps without a planned tick.
const MAX_IDLE: Duration = Duration::from_secs(1);

type Reply<T> = mpsc::Sender<Result<T, EngineError>>;

enum Message {
    Submit {
        command: PartitionCommand,
        reply: Reply<CommandOutcome>,
    },
    CreateJob {
        job: JobRecord,
        reply: Reply<CommandOutcome>,
    },
    RunDueCheckers {
        reply: Reply<usize>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Shutdown,
}

/// Actor runtime statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub phase: PartitionPhase,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub jobs_created: u64,
    pub scheduled_commands: u64,
}

impl Default for PartitionStats {
    fn default() -> Self {
        Self {
            phase: PartitionPhase::Replay,
            commands_accepted: 0,
            commands_rejected: 0,
            jobs_created: 0,
            scheduled_commands: 0,
        }
    }
}

/// Handle to a running partition actor.
#[derive(Debug)]
pub struct PartitionHandle {
    sender: mpsc::Sender<Message>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PartitionStats>>,
}

impl PartitionHandle {
    fn request<T>(&self, message: impl FnOnce(Reply<T>) -> Message) -> Result<T, EngineError> {
        let (tx, rx) = mpsc::channel();
        self.sender.send(message(tx)).map_err(|_| EngineError::ActorGone)?;
        rx.recv().map_err(|_| EngineError::ActorGone)?
    }

    /// Process a client command and wait for its outcome.
    pub fn submit(&self, command: impl Into<PartitionCommand>) -> Result<CommandOutcome, EngineError> {
        let command = command.into();
        self.request(|reply| Message::Submit { command, reply })
    }

    pub fn create_job(&self, job: JobRecord) -> Result<CommandOutcome, EngineError> {
        self.request(|reply| Message::CreateJob { job, reply })
    }

    /// Run due checkers now (they also run on their own schedule).
    pub fn run_due_checkers(&self) -> Result<usize, EngineError> {
        self.request(|reply| Message::RunDueCheckers { reply })
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.request(|reply| Message::Pause { reply })
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.request(|reply| Message::Resume { reply })
    }

    pub fn stats(&self) -> PartitionStats {
        self.stats.lock().map(|stats| stats.clone()).unwrap_or_default()
    }

    /// Request graceful shutdown and wait for the actor to stop.
    pub fn shutdown(mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn the partition on its own thread. Recovery runs first on that thread.
pub fn spawn<L, N>(partition: Partition<L, N>) -> Result<PartitionHandle, EngineError>
where
    L: RecordLog + 'static,
    N: EventBus<JobsAvailable> + 'static,
{
    let (sender, receiver) = mpsc::channel::<Message>();
    let stats = Arc::new(Mutex::new(PartitionStats::default()));
    let stats_clone = stats.clone();

    let join = thread::Builder::new()
        .name(partition.name().to_string())
        .spawn(move || actor_loop(partition, receiver, stats_clone))
        .map_err(|e| EngineError::Spawn(e.to_string()))?;

    Ok(PartitionHandle {
        sender,
        join: Some(join),
        stats,
    })
}

fn actor_loop<L, N>(mut partition: Partition<L, N>, receiver: mpsc::Receiver<Message>, stats: Arc<Mutex<PartitionStats>>)
where
    L: RecordLog,
    N: EventBus<JobsAvailable>,
{
    info!(partition = %partition.name(), "partition actor started");

    if let Err(err) = partition.recover() {
        error!(partition = %partition.name(), error = %err, "recovery failed");
    }
    update_stats(&stats, |s| s.phase = partition.phase());

    loop {
        match receiver.recv_timeout(idle_time(&partition)) {
            Ok(Message::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(message) => handle(&mut partition, message, &stats),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        match partition.run_due_checkers() {
            Ok(0) => {}
            Ok(emitted) => update_stats(&stats, |s| s.scheduled_commands += emitted as u64),
            Err(err) => error!(partition = %partition.name(), error = %err, "due-date check failed"),
        }
        update_stats(&stats, |s| s.phase = partition.phase());
    }

    partition.close();
    update_stats(&stats, |s| s.phase = partition.phase());
    info!(partition = %partition.name(), "partition actor stopped");
}

fn idle_time<L, N>(partition: &Partition<L, N>) -> Duration
where
    L: RecordLog,
    N: EventBus<JobsAvailable>,
{
    let Some(wakeup) = partition.next_wakeup() else {
        return MAX_IDLE;
    };
    let now = partition.engine().clock().now_millis();
    let millis = u64::try_from(wakeup.saturating_sub(now)).unwrap_or(0);
    Duration::from_millis(millis).min(MAX_IDLE)
}

fn handle<L, N>(partition: &mut Partition<L, N>, message: Message, stats: &Mutex<PartitionStats>)
where
    L: RecordLog,
    N: EventBus<JobsAvailable>,
{
    match message {
        Message::Submit { command, reply } => {
            let result = partition.submit(command);
            if let Ok(outcome) = &result {
                update_stats(stats, |s| match outcome {
                    CommandOutcome::Accepted { .. } => s.commands_accepted += 1,
                    CommandOutcome::Rejected { .. } => s.commands_rejected += 1,
                });
            }
            send(reply, result);
        }
        Message::CreateJob { job, reply } => {
            let result = partition.create_job(job);
            if matches!(&result, Ok(outcome) if outcome.is_accepted()) {
                update_stats(stats, |s| s.jobs_created += 1);
            }
            send(reply, result);
        }
        Message::RunDueCheckers { reply } => {
            let result = partition.run_due_checkers();
            if let Ok(emitted) = &result {
                update_stats(stats, |s| s.scheduled_commands += *emitted as u64);
            }
            send(reply, result);
        }
        Message::Pause { reply } => send(reply, partition.pause()),
        Message::Resume { reply } => send(reply, partition.resume()),
        Message::Shutdown => {}
    }
}

fn send<T>(reply: Reply<T>, result: Result<T, EngineError>) {
    if reply.send(result).is_err() {
        debug!("requester went away before the reply");
    }
}

fn update_stats(stats: &Mutex<PartitionStats>, update: impl FnOnce(&mut PartitionStats)) {
    if let Ok(mut stats) = stats.lock() {
        update(&mut stats);
    }
}
