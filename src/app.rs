//! The endurance orchestrator.
//!
//! Workers ramp up at a staggered cadence, each replaying the recording in a
//! loop until the loaded-duration clock expires, then drain. Workers share
//! nothing but the stop flag, the session-id counter, the stats counters and
//! the warmup gate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::args::PlayerArgs;
use crate::auth::Credentials;
use crate::error::AppResult;
use crate::output::{OutputDir, RunInfo, SessionLog};
use crate::recording::{load_recording, Recording};
use crate::session::Session;
use crate::stats::{Stats, Transition};

const STATS_TICK: Duration = Duration::from_secs(5);

struct WorkerContext {
    worker_id: usize,
    warmup_interval_ms: u64,
    app_url: String,
    recording: Arc<Recording>,
    sessions_dir: PathBuf,
    run_info: RunInfo,
    credentials: Option<Credentials>,
    stats: Arc<Stats>,
    keep_working: Arc<AtomicBool>,
    session_num: Arc<AtomicU64>,
}

/// Load the recording and drive the full endurance run.
///
/// # Errors
///
/// Fails on recording problems; session failures are counted, never
/// propagated.
pub async fn run(
    args: &PlayerArgs,
    run_info: &RunInfo,
    credentials: Option<Credentials>,
    output: &OutputDir,
) -> AppResult<Arc<Stats>> {
    let recording = Arc::new(load_recording(&args.recording_path).await?);
    recording.validate()?;

    let workers = args.workers.max(1);
    let warmup_interval_ms = args.start_interval.unwrap_or_else(|| {
        let duration = u64::try_from(recording.duration_ms()).unwrap_or(0);
        duration / workers as u64
    });

    let stats = Arc::new(Stats::new());
    let keep_working = Arc::new(AtomicBool::new(true));
    let session_num = Arc::new(AtomicU64::new(0));

    info!(
        "Starting {} workers at {}ms intervals against {}",
        workers, warmup_interval_ms, args.app_url
    );

    let (ticker_stop, _) = broadcast::channel(1);
    let ticker = spawn_stats_ticker(Arc::clone(&stats), &ticker_stop);

    let (warmup_tx, mut warmup_rx) = mpsc::channel::<()>(workers);
    let mut worker_handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let context = WorkerContext {
            worker_id,
            warmup_interval_ms,
            app_url: args.app_url.clone(),
            recording: Arc::clone(&recording),
            sessions_dir: output.sessions.clone(),
            run_info: run_info.clone(),
            credentials: credentials.clone(),
            stats: Arc::clone(&stats),
            keep_working: Arc::clone(&keep_working),
            session_num: Arc::clone(&session_num),
        };
        worker_handles.push(tokio::spawn(worker_loop(context, warmup_tx.clone())));
    }
    drop(warmup_tx);

    for _ in 0..workers {
        if warmup_rx.recv().await.is_none() {
            break;
        }
    }
    info!("All workers warmed up");

    let loaded_ms = loaded_duration_ms(args.loaded_duration_minutes);
    if loaded_ms > 0 {
        tokio::time::sleep(Duration::from_millis(loaded_ms)).await;
    }
    keep_working.store(false, Ordering::SeqCst);

    for handle in worker_handles {
        drop(handle.await);
    }

    drop(ticker_stop.send(()));
    drop(ticker.await);

    info!("Complete. {}", stats.progress_line());
    Ok(stats)
}

async fn worker_loop(context: WorkerContext, warmup_tx: mpsc::Sender<()>) {
    let stagger = context.warmup_interval_ms.saturating_mul(context.worker_id as u64);
    if stagger > 0 {
        tokio::time::sleep(Duration::from_millis(stagger)).await;
    }
    drop(warmup_tx.send(()).await);

    let mut iteration: u64 = 0;
    loop {
        let session_id = context.session_num.fetch_add(1, Ordering::SeqCst);
        run_one_session(&context, session_id, iteration).await;
        iteration += 1;
        if !context.keep_working.load(Ordering::SeqCst) {
            break;
        }
    }
}

async fn run_one_session(context: &WorkerContext, session_id: u64, iteration: u64) {
    let mut log = match SessionLog::create(
        &context.sessions_dir,
        session_id,
        context.worker_id,
        iteration,
        &context.run_info,
    )
    .await
    {
        Ok(log) => log,
        Err(err) => {
            error!(
                worker_id = context.worker_id,
                "Failed to create session log: {}", err
            );
            context.stats.transition(Transition::Running);
            context.stats.transition(Transition::Failed);
            return;
        }
    };

    match Session::new(
        &context.app_url,
        session_id,
        context.worker_id,
        iteration,
        context.credentials.clone(),
        Arc::clone(&context.stats),
    ) {
        Ok(mut session) => session.run(0, &context.recording, &mut log).await,
        Err(err) => {
            warn!(
                worker_id = context.worker_id,
                "Failed to create session: {}", err
            );
            drop(log.entry("FAIL", 0, &err.to_string()).await);
            context.stats.transition(Transition::Running);
            context.stats.transition(Transition::Failed);
        }
    }
}

fn spawn_stats_ticker(stats: Arc<Stats>, stop: &broadcast::Sender<()>) -> JoinHandle<()> {
    let mut stop_rx = stop.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_TICK);
        // interval fires immediately; skip the zero tick
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = ticker.tick() => info!("{}", stats.progress_line()),
            }
        }
    })
}

fn loaded_duration_ms(minutes: f64) -> u64 {
    if !minutes.is_finite() || minutes <= 0.0 {
        return 0;
    }
    (minutes * 60_000.0).round() as u64
}
