use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;

use interval_gate::{IntervalGate, IntervalGateOptions};

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Mode {
    /// Every producer enqueues its items as fast as it can.
    Burst,
    /// Producers pace their enqueues at `--target-qps` in total.
    TargetQps,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "interval-gate-stress",
    about = "Load test harness for interval-gate release timing"
)]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Burst)]
    mode: Mode,

    #[arg(long, default_value_t = 4)]
    producers: usize,

    #[arg(long, default_value_t = 250)]
    items_per_producer: u64,

    #[arg(long, default_value_t = 50)]
    max_per_interval: u64,

    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    #[arg(long, default_value_t = false)]
    evenly_spaced: bool,

    /// Only used when `--mode target-qps`.
    #[arg(long, default_value_t = 1000)]
    target_qps: u64,

    #[arg(long, default_value_t = 1)]
    sample_every: u64,
}

#[derive(Default)]
struct Counts {
    enqueued: AtomicU64,
    released: AtomicU64,
    errors: AtomicU64,
}

fn should_sample(iter: u64, sample_every: u64) -> bool {
    if sample_every <= 1 {
        return true;
    }

    iter.is_multiple_of(sample_every)
}

/// Largest number of releases observed inside any window of `interval`.
fn max_in_window(releases: &mut [Instant], interval: Duration) -> usize {
    releases.sort_unstable();

    let mut max = 0;
    let mut start = 0;
    for end in 0..releases.len() {
        while releases[end].duration_since(releases[start]) >= interval {
            start += 1;
        }
        max = max.max(end - start + 1);
    }

    max
}

fn print_results(
    args: &Args,
    gate: &IntervalGate,
    elapsed: Duration,
    wait: &Histogram<u64>,
    counts: &Counts,
    max_in_window: usize,
) {
    println!(
        "mode={:?} producers={} items_per_producer={}",
        args.mode, args.producers, args.items_per_producer
    );
    println!(
        "max_per_interval={} interval_ms={} evenly_spaced={} effective_max={} effective_interval={:?}",
        args.max_per_interval,
        args.interval_ms,
        args.evenly_spaced,
        gate.schedule().max_per_interval(),
        gate.schedule().interval()
    );
    println!(
        "elapsed_s={:.3} enqueued={} released={} errors={}",
        elapsed.as_secs_f64(),
        counts.enqueued.load(Ordering::Relaxed),
        counts.released.load(Ordering::Relaxed),
        counts.errors.load(Ordering::Relaxed)
    );
    println!(
        "max_releases_per_interval={} (limit {})",
        max_in_window,
        gate.schedule().max_per_interval()
    );
    if !wait.is_empty() {
        println!(
            "wait_ms p50={} p95={} p99={} max={}",
            wait.value_at_quantile(0.50),
            wait.value_at_quantile(0.95),
            wait.value_at_quantile(0.99),
            wait.max()
        );
        println!("sample_every={} samples={}", args.sample_every, wait.len());
    } else {
        println!("no wait samples collected");
    }
}

fn run(args: &Args) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .unwrap();

    let options =
        IntervalGateOptions::new(args.max_per_interval, args.interval_ms, args.evenly_spaced)
            .unwrap();
    let gate = {
        let _guard = rt.enter();
        Arc::new(IntervalGate::with_options(options).unwrap())
    };

    let counts = Arc::new(Counts::default());
    let wait = Arc::new(Mutex::new(
        Histogram::<u64>::new_with_bounds(1, 3_600_000, 3).unwrap(),
    ));
    let releases = Arc::new(Mutex::new(Vec::with_capacity(
        args.producers * args.items_per_producer as usize,
    )));

    let started = Instant::now();

    let mut handles = Vec::with_capacity(args.producers);
    for _ in 0..args.producers {
        let gate = Arc::clone(&gate);
        let counts = Arc::clone(&counts);
        let wait = Arc::clone(&wait);
        let releases = Arc::clone(&releases);
        let args = args.clone();

        handles.push(std::thread::spawn(move || {
            let per_op = match args.mode {
                Mode::Burst => None,
                Mode::TargetQps => Some(Duration::from_nanos(
                    1_000_000_000u64 * args.producers as u64 / args.target_qps.max(1),
                )),
            };
            let mut next_deadline = Instant::now();

            for i in 0..args.items_per_producer {
                if let Some(per_op) = per_op {
                    let now = Instant::now();
                    if now < next_deadline {
                        std::thread::sleep(next_deadline - now);
                    }
                    next_deadline += per_op;
                }

                let enqueued_at = Instant::now();
                let sample = should_sample(i, args.sample_every);
                let counts_in = Arc::clone(&counts);
                let wait = Arc::clone(&wait);
                let releases = Arc::clone(&releases);

                let res = gate.enqueue(move || {
                    let now = Instant::now();
                    counts_in.released.fetch_add(1, Ordering::Relaxed);
                    releases.lock().unwrap().push(now);
                    if sample {
                        let ms = now.duration_since(enqueued_at).as_millis() as u64;
                        let _ = wait.lock().unwrap().record(ms.max(1));
                    }
                });

                match res {
                    Ok(()) => counts.enqueued.fetch_add(1, Ordering::Relaxed),
                    Err(_) => counts.errors.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    rt.block_on(gate.wait_idle()).unwrap();
    let elapsed = started.elapsed();

    let mut releases = releases.lock().unwrap();
    let max_in_window = max_in_window(&mut releases, gate.schedule().interval());
    let wait = wait.lock().unwrap();
    print_results(args, &gate, elapsed, &wait, &counts, max_in_window);
}

fn main() {
    let args = Args::parse();
    run(&args);
}
