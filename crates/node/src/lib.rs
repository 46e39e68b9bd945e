//! Standalone partition node.
//!
//! Drives one partition actor from newline-delimited JSON requests. Each
//! request yields one reply line, followed by any jobs-available
//! notifications (and exported records, when enabled) raised meanwhile.

pub mod request;

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;

use jobflow_core::SystemClock;
use jobflow_events::{EventBus, InMemoryEventBus, RecordEnvelope, Subscription};
use jobflow_infra::{
    Collaborators, EngineConfig, InMemoryRecordLog, JobsAvailable, NoopResponseWriter, Partition, PartitionEngine,
    PartitionHandle, PublishingRecordLog,
};
use jobflow_jobs::{ErrorCatchTarget, InMemoryProcessState, InMemoryVariables};

pub use request::{Output, Request};

pub const EXPORT_RECORDS_VAR: &str = "JOBFLOW_EXPORT_RECORDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeOptions {
    /// Echo every appended record as an output line.
    pub export_records: bool,
}

impl NodeOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let export_records = lookup(EXPORT_RECORDS_VAR)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self { export_records }
    }
}

/// A running partition plus the in-memory collaborators requests can seed.
pub struct Node {
    handle: PartitionHandle,
    variables: Arc<InMemoryVariables>,
    process: Arc<InMemoryProcessState>,
    notifications: Subscription<JobsAvailable>,
    records: Option<Subscription<RecordEnvelope<JsonValue>>>,
}

impl Node {
    pub fn start(config: &EngineConfig, options: NodeOptions) -> anyhow::Result<Self> {
        let variables = Arc::new(InMemoryVariables::new());
        let process = Arc::new(InMemoryProcessState::new());
        let notifier = Arc::new(InMemoryEventBus::<JobsAvailable>::new());
        let exporter = Arc::new(InMemoryEventBus::<RecordEnvelope<JsonValue>>::new());

        let notifications = notifier.subscribe();
        let records = options.export_records.then(|| exporter.subscribe());

        let collaborators = Collaborators {
            clock: Arc::new(SystemClock),
            variables: variables.clone(),
            process: process.clone(),
            responses: Arc::new(NoopResponseWriter),
        };
        let log = PublishingRecordLog::new(Arc::new(InMemoryRecordLog::new(config.max_record_size)), exporter);
        let engine = PartitionEngine::new(log, notifier, collaborators);
        let handle = jobflow_infra::spawn(Partition::new(config, engine)).context("failed to spawn partition actor")?;

        Ok(Self {
            handle,
            variables,
            process,
            notifications,
            records,
        })
    }

    /// Parse and run one request line.
    pub fn handle_line(&self, line: &str) -> Vec<Output> {
        let reply = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request),
            Err(err) => Output::Error {
                message: format!("invalid request: {err}"),
            },
        };

        let mut outputs = vec![reply];
        if let Some(records) = &self.records {
            outputs.extend(records.drain().into_iter().map(|record| Output::Record { record }));
        }
        outputs.extend(
            self.notifications
                .drain()
                .into_iter()
                .map(|n| Output::JobsAvailable { job_type: n.job_type }),
        );
        outputs
    }

    pub fn handle(&self, request: Request) -> Output {
        let result = match request {
            Request::Create { job } => self.handle.create_job(job.into_record()).map(Output::from),
            Request::Command { command } => self.handle.submit(command).map(Output::from),
            Request::SetVariable { scope, name, value } => {
                self.variables.set(scope, name, value);
                Ok(Output::Done)
            }
            Request::RegisterCatch {
                element_instance_key,
                error_code,
                catch_element_id,
                scope_key,
                scope_active,
                accepting_events,
            } => {
                self.process.register_catch(
                    element_instance_key,
                    error_code,
                    ErrorCatchTarget {
                        catch_element_id,
                        scope_key,
                        scope_active,
                        accepting_events,
                    },
                );
                Ok(Output::Done)
            }
            Request::Tick => self.handle.run_due_checkers().map(|emitted| Output::Checked { emitted }),
            Request::Pause => self.handle.pause().map(|()| Output::Done),
            Request::Resume => self.handle.resume().map(|()| Output::Done),
            Request::Stats => Ok(Output::Stats {
                stats: self.handle.stats(),
            }),
        };

        result.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "request failed");
            Output::Error {
                message: err.to_string(),
            }
        })
    }

    pub fn shutdown(self) {
        self.handle.shutdown();
    }
}
