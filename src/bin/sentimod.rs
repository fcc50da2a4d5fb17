//! sentimod - live face emotion daemon
//!
//! This daemon:
//! 1. Loads configuration (`SENTIMO_CONFIG` file plus `SENTIMO_*` overrides)
//! 2. Resolves the face detector backend and starts the pipeline worker
//! 3. Connects the frame source and pumps it into the pipeline on its own thread
//! 4. Shows the latest published state until ctrl-c or `--seconds` runs out

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sentimo_pipeline::config::PipelineConfig;
use sentimo_pipeline::ui::{Console, UiMode};
use sentimo_pipeline::{
    open_source, run_source, BackendRegistry, Clock, DetectorAdapter, MonotonicClock, Pipeline,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const OBSERVE_POLL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stop after this many seconds (runs until ctrl-c when omitted).
    #[arg(long)]
    seconds: Option<u64>,
    /// Terminal output style.
    #[arg(long, value_parser = ["auto", "plain", "pretty"])]
    ui: Option<String>,
    /// Print every observation as a JSON line on stdout.
    #[arg(long)]
    json: bool,
    /// Face detector backend (overrides configuration).
    #[arg(long)]
    detector: Option<String>,
    /// List registered face detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = BackendRegistry::with_builtin();
    if args.list_detectors {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut cfg = PipelineConfig::load()?;
    if let Some(detector) = args.detector.as_deref() {
        cfg.detection.backend = detector.to_string();
    }

    let mut console = Console::new(
        UiMode::from_flag(args.ui.as_deref()),
        std::io::stderr().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    );

    let adapter = {
        let _stage = console.stage("resolve face detector");
        DetectorAdapter::from_registry(&registry, &cfg.detection.backend)?
    };
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let mut pipeline = {
        let _stage = console.stage("start pipeline");
        Pipeline::start(cfg.pipeline_settings(), adapter, clock.clone())?
    };

    let mut source = open_source(cfg.source.clone(), clock)?;
    {
        let _stage = console.stage("connect frame source");
        if let Err(err) = pipeline.connect_source(source.as_mut()) {
            pipeline.shutdown();
            return Err(anyhow!(err).context(format!("cannot start {}", cfg.source.url)));
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("failed to install ctrl-c handler")?;
    }

    let source_thread = {
        let running = running.clone();
        let sink = pipeline.sink();
        let fps = cfg.source.target_fps;
        std::thread::Builder::new()
            .name("sentimo-source".into())
            .spawn(move || {
                let result = run_source(source.as_mut(), &sink, fps, &running, None);
                running.store(false, Ordering::SeqCst);
                (result, source)
            })
            .context("failed to spawn source thread")?
    };

    log::info!(
        "sentimod running: source={} detector={} interval={:?}",
        cfg.source.url,
        pipeline.detector_name(),
        cfg.detection.interval
    );

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let publisher = pipeline.publisher();
    let mut version = 0u64;
    let mut last_health_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        let observation = publisher.wait_for_update(version, OBSERVE_POLL);
        if observation.version != version {
            version = observation.version;
            if args.json {
                println!("{}", serde_json::to_string(&observation)?);
            } else {
                console.show(&observation);
            }
            // The clear itself bumps the version; count it as seen so the
            // same snapshot is not shown twice.
            if observation.error.is_some() {
                if let Some(cleared) = publisher.acknowledge_error_at(version) {
                    version = cleared;
                }
            }
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = pipeline.stats();
            log::info!(
                "pipeline health: submitted={} dropped={} throttled={} detected={} unavailable={} failed={}",
                stats.submitted,
                stats.dropped,
                stats.throttled,
                stats.detected,
                stats.unavailable,
                stats.failed
            );
            last_health_log = Instant::now();
        }
    }

    running.store(false, Ordering::SeqCst);
    let (source_result, source) = source_thread
        .join()
        .map_err(|_| anyhow!("source thread panicked"))?;
    pipeline.shutdown();
    let source_stats = source.stats();

    let stats = pipeline.stats();
    console.finish(&format!(
        "done: {} frame(s) captured, {} released, {} detected, {} dropped, {} throttled",
        source_stats.frames_captured,
        source_stats.frames_released,
        stats.detected,
        stats.dropped,
        stats.throttled
    ));
    if source_stats.outstanding() != 0 {
        log::warn!(
            "{} frame(s) still outstanding at exit",
            source_stats.outstanding()
        );
    }

    source_result.map(|_| ())
}
