//! clipreel - record a rolling screen window, trim it, export a clip
//!
//! Runs the full capture → edit → export hand-off against a synthetic
//! screen source and writes a JSON manifest of the exported frames.

mod manifest;

use anyhow::{bail, Context, Result};
use clap::Parser;
use clipreel_capture::{
    run_export, CaptureController, ControllerEvent, EditSession, ReadySource, StopMode,
    SyntheticSource,
};
use clipreel_core::{CaptureConfig, CaptureRate, CpuFrameHandle, ReleaseLedger};
use manifest::ManifestEncoder;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "clipreel", version, about = "Record a rolling screen window and export a trimmed clip")]
struct Args {
    /// JSON capture configuration; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture rate in frames per second (15, 30 or 60).
    #[arg(long)]
    rate: Option<u32>,

    /// Length of the rolling window in seconds.
    #[arg(long)]
    seconds: Option<u32>,

    /// How long to record before handing off to the editor.
    #[arg(long, default_value_t = 3.0)]
    record_for: f64,

    /// Trim range in seconds relative to the start of the window, as `start:end`.
    #[arg(long, value_parser = parse_trim)]
    trim: Option<(f64, f64)>,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    /// Where to write the export manifest.
    #[arg(long, default_value = "clip.json")]
    out: PathBuf,
}

fn parse_trim(s: &str) -> std::result::Result<(f64, f64), String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected start:end, got {s:?}"))?;
    let start: f64 = start.trim().parse().map_err(|e| format!("bad start: {e}"))?;
    let end: f64 = end.trim().parse().map_err(|e| format!("bad end: {e}"))?;
    if start < 0.0 || end < start {
        return Err(format!("invalid range {start}..{end}"));
    }
    Ok((start, end))
}

fn load_config(args: &Args) -> Result<CaptureConfig> {
    let mut config = match &args.config {
        Some(path) => CaptureConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CaptureConfig::default(),
    };
    if let Some(fps) = args.rate {
        config.rate = CaptureRate::from_fps(fps)?;
    }
    if let Some(seconds) = args.seconds {
        config.buffer_seconds = seconds;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let rate = config.rate;
    info!(%rate, seconds = config.buffer_seconds, "clipreel starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let ledger = ReleaseLedger::new();
    let mut controller = CaptureController::<CpuFrameHandle>::new(config)?;
    let handle = controller.handle();
    let events = controller.events();

    let (_cancel_source, source_cancel) = watch::channel(false);
    let mut provider = ReadySource::new(SyntheticSource::new(args.width, args.height, &ledger));
    runtime.block_on(controller.start_with(&mut provider, source_cancel))?;

    let controller_thread = std::thread::Builder::new()
        .name("clipreel-controller".into())
        .spawn(move || {
            controller.run();
            controller
        })?;

    // ── Record ────────────────────────────────────────────────────
    let deadline = Instant::now() + Duration::from_secs_f64(args.record_for.max(0.0));
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(500).min(deadline.saturating_duration_since(Instant::now())));
        let stats = handle.stats()?;
        info!(
            frames = stats.buffer.frame_count,
            seconds = stats.buffer.duration_seconds,
            memory_mb = %format!("{:.2}", stats.buffer.memory_mb),
            pool = stats.pool.total_entries,
            "recording"
        );
        for event in events.try_iter() {
            match event {
                ControllerEvent::ResourceExhausted { failures } => {
                    warn!(failures, "capture source exhausted");
                }
                ControllerEvent::TrackEnded => warn!("capture track ended"),
                _ => {}
            }
        }
    }

    // ── Edit ──────────────────────────────────────────────────────
    handle.pause()?;
    let mut edit = EditSession::new(handle.hand_off_to_edit()?);
    if let Some((start, end)) = args.trim {
        let fps = rate.fps() as f64;
        edit.trim((start * fps) as usize, (end * fps).ceil() as usize);
    }
    info!(
        leased = edit.frames().len(),
        selected = edit.selection().len(),
        duration = edit.selection_duration(rate),
        "editing"
    );

    // Capture can go away now; edit keeps its frames alive
    handle.stop(StopMode::Discard)?;

    // ── Export ────────────────────────────────────────────────────
    let export_lease = handle.hand_off_to_export(edit.selected_ids())?;
    let mut encoder = ManifestEncoder::new(&args.out, rate);
    let (_cancel_export, export_cancel) = watch::channel(false);
    let result = runtime.block_on(run_export(export_lease, &mut encoder, export_cancel, |p| {
        if p.current_frame == p.total_frames || p.current_frame % 30 == 0 {
            info!(progress = %format!("{:.0}%", p.fraction() * 100.0), "exporting");
        }
    }));
    edit.close();

    handle.shutdown()?;
    let controller = match controller_thread.join() {
        Ok(controller) => controller,
        Err(_) => bail!("controller thread panicked"),
    };

    let artifact = result?;
    info!(
        path = %args.out.display(),
        frames = artifact.frame_count,
        bytes = artifact.bytes,
        "export written"
    );

    let leftover = controller.pool().len();
    info!(released = ledger.count(), leftover, "pipeline torn down");
    if leftover != 0 || ledger.rejected() != 0 {
        bail!("frame lifecycle violated: {leftover} live entries, {} double releases", ledger.rejected());
    }
    Ok(())
}
