use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use jobflow_core::{ControlledClock, ElementInstanceKey};
use jobflow_events::InMemoryEventBus;
use jobflow_infra::{
    Collaborators, CommandOrigin, EngineConfig, InMemoryRecordLog, JobsAvailable, NoopResponseWriter, Partition,
    PartitionEngine,
};
use jobflow_jobs::{ActivateJobs, InMemoryProcessState, InMemoryVariables, JobCommand, JobRecord, PartitionCommand};

type Engine = PartitionEngine<Arc<InMemoryRecordLog>, Arc<InMemoryEventBus<JobsAvailable>>>;

fn engine(clock: Arc<ControlledClock>, log: Arc<InMemoryRecordLog>) -> Engine {
    let collaborators = Collaborators {
        clock,
        variables: Arc::new(InMemoryVariables::new()),
        process: Arc::new(InMemoryProcessState::new()),
        responses: Arc::new(NoopResponseWriter),
    };
    PartitionEngine::new(log, Arc::new(InMemoryEventBus::new()), collaborators)
}

/// Engine with `jobs` activatable jobs of type `payment`.
fn seeded(jobs: usize) -> (Engine, Arc<ControlledClock>) {
    let clock = ControlledClock::arc(0);
    let mut engine = engine(clock.clone(), Arc::new(InMemoryRecordLog::new(4 * 1024 * 1024)));
    for element in 0..jobs {
        let job = JobRecord::new("payment", 3, ElementInstanceKey::new(element as i64))
            .with_custom_header("region", "eu-west");
        let _ = engine.create_job(job);
    }
    (engine, clock)
}

fn activate(max_jobs: i32) -> PartitionCommand {
    PartitionCommand::Job(JobCommand::Activate(ActivateJobs {
        job_type: "payment".to_string(),
        worker: "bench".to_string(),
        timeout: 60_000,
        max_jobs_to_activate: max_jobs,
        fetch_variables: Vec::new(),
    }))
}

fn bench_batch_activation(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_activation");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), batch_size, |b, &batch_size| {
            b.iter_batched(
                || seeded(batch_size),
                |(mut engine, _clock)| {
                    let processed = engine.process(activate(batch_size as i32), CommandOrigin::Client);
                    black_box(processed)
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_timeout_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("timeout_sweep");

    for expired in [100, 1000, 5000].iter() {
        group.throughput(Throughput::Elements(*expired as u64));
        group.bench_with_input(BenchmarkId::from_parameter(expired), expired, |b, &expired| {
            b.iter_batched(
                || {
                    let (mut engine, clock) = seeded(expired);
                    let _ = engine.process(activate(expired as i32), CommandOrigin::Client);
                    clock.advance(120_000);
                    let config = EngineConfig::default().with_due_date_batch_limit(expired);
                    let mut partition = Partition::new(&config, engine);
                    let _ = partition.recover();
                    partition
                },
                |mut partition| black_box(partition.run_due_checkers()),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_recovery_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery_replay");

    for jobs in [100, 1000, 10000].iter() {
        let clock = ControlledClock::arc(0);
        let log = Arc::new(InMemoryRecordLog::new(4 * 1024 * 1024));
        {
            let mut writer = engine(clock.clone(), log.clone());
            for element in 0..*jobs {
                let _ = writer.create_job(JobRecord::new("payment", 3, ElementInstanceKey::new(element as i64)));
            }
            let _ = writer.process(activate(*jobs as i32), CommandOrigin::Client);
        }

        group.throughput(Throughput::Elements(*jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), jobs, |b, _| {
            b.iter(|| {
                let mut replica = engine(clock.clone(), log.clone());
                black_box(replica.recover())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_batch_activation, bench_timeout_sweep, bench_recovery_replay);
criterion_main!(benches);
