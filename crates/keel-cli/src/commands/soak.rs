//! `keel soak`: drive a dispatcher with a synthetic workload.

use keel_dispatch::{
    Dispatcher, DispatcherHandle, DispatcherStats, Task, TaskGroup, TaskOutcome, ThreadPool,
    WorkerPool,
};
use std::hint::black_box;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub fn execute(
    config: Option<PathBuf>,
    duration_ms: u64,
    producers: usize,
    cyclic: usize,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(config.as_deref())?;
    let pool = Arc::new(ThreadPool::from_config(&config)?);
    let handle = Dispatcher::new(pool.clone(), &config).start()?;
    tracing::info!(
        producers,
        duration_ms,
        workers = pool.thread_count(),
        "soak started"
    );

    let started = Instant::now();
    let deadline = started + Duration::from_millis(duration_ms);
    let submitted = Arc::new(AtomicU64::new(0));

    let mut threads = Vec::with_capacity(producers);
    for i in 0..producers {
        let handle = handle.clone();
        let submitted = submitted.clone();
        threads.push(
            thread::Builder::new()
                .name(format!("soak-producer-{}", i))
                .spawn(move || produce(&handle, cyclic, deadline, &submitted))?,
        );
    }
    for worker in threads {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }

    // Give the loop a moment to drain the final submissions
    thread::sleep(Duration::from_millis(50));
    let stats = handle.stats();
    handle.shutdown()?;
    pool.shutdown();

    let elapsed = started.elapsed();
    let submitted = submitted.load(Ordering::Relaxed);
    if json {
        let report = serde_json::json!({
            "elapsed_ms": elapsed.as_millis() as u64,
            "submitted": submitted,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(elapsed, submitted, &stats);
    }

    Ok(())
}

fn produce(handle: &DispatcherHandle, cyclic: usize, deadline: Instant, submitted: &AtomicU64) {
    let producer = handle.producer("soak");

    let cycles: Vec<_> = (0..cyclic)
        .map(|_| {
            producer.schedule_event(Task::cyclic(Duration::from_millis(5), "soak-cycle", |_| {
                TaskOutcome::Reschedule
            }))
        })
        .collect();
    submitted.fetch_add(cycles.len() as u64, Ordering::Relaxed);

    let mut round: u64 = 0;
    while Instant::now() < deadline {
        producer.add_event(|_| {}, "soak-serial");
        producer.async_event(|_| {}, TaskGroup::GenericParallel);
        producer.async_event(|_| {}, TaskGroup::Walk);
        producer.add_event_with_expiry(|_| {}, "soak-expiring", Duration::from_millis(1));

        // Every third timer is cancelled, usually before it fires
        let timer = producer.schedule_event(Task::delayed(
            Duration::from_millis(round % 20),
            "soak-timer",
            |_| {},
        ));
        if round % 3 == 0 {
            producer.stop_event(timer);
        }
        submitted.fetch_add(5, Ordering::Relaxed);

        if round % 16 == 0 {
            producer.add_event(
                |ctx| {
                    ctx.parallel_for(64, |i: usize| {
                        black_box(i);
                    })
                },
                "soak-fanout",
            );
            submitted.fetch_add(1, Ordering::Relaxed);
        }

        round += 1;
        thread::sleep(Duration::from_micros(200));
    }

    for id in cycles {
        producer.stop_event(id);
    }
}

fn print_report(elapsed: Duration, submitted: u64, stats: &DispatcherStats) {
    println!("Soak finished in {:.2?}", elapsed);
    println!();
    println!("Submitted:          {}", submitted);
    println!("Loop cycles:        {}", stats.cycles);
    println!("Serial events:      {}", stats.dispatcher_cycle);
    println!("Parallel tasks:     {}", stats.async_run);
    println!("Scheduled runs:     {}", stats.scheduled_run);
    println!("Expired:            {}", stats.expired);
    println!("Failed:             {}", stats.failed);
    println!("Cancelled:          {}", stats.cancelled);
    println!("Still scheduled:    {}", stats.pending_scheduled);
}
