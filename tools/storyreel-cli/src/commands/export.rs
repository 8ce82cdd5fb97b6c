//! Export a scene manifest to MP4.

use std::path::PathBuf;
use std::sync::Arc;

use storyreel_common::config::AppConfig;
use storyreel_project_model::{ExportFormat, ExportManifest};
use storyreel_render_engine::backend::synthetic::SyntheticOptions;
use storyreel_render_engine::backend::MediaBackend;
use storyreel_render_engine::fetch::HttpFetcher;
use storyreel_render_engine::store::LocalDirStore;
use storyreel_render_engine::{ExportController, ExportRequest, ExportSettings};

pub struct ExportArgs {
    pub manifest: PathBuf,
    pub output: Option<PathBuf>,
    pub format: Option<String>,
    pub fps: Option<u32>,
    pub store_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub json: bool,
}

pub async fn run(config: &AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    println!("Exporting manifest: {}", args.manifest.display());

    let manifest = ExportManifest::load(&args.manifest)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest: {e}"))?;

    let mut request = ExportRequest::from_manifest(manifest);
    if let Some(format) = &args.format {
        request.format = format
            .parse::<ExportFormat>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(fps) = args.fps {
        request = request.with_fps(fps);
    }

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| config.output_dir.join(request.file_name()));

    let backend = if args.dry_run {
        MediaBackend::synthetic(SyntheticOptions::default())
    } else {
        MediaBackend::system()?
    };
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch, &config.timeouts)?);
    let settings = ExportSettings::from_config(config)?;

    println!("  Format: {}", request.format);
    println!("  Scenes: {}", request.scenes.len());
    println!("  Backend: {}", backend.encoders.name());
    if !args.dry_run {
        println!("  Output: {}", output_path.display());
    }

    let mut controller = ExportController::new(backend, fetcher, settings);
    if let Some(dir) = &args.store_dir {
        controller = controller.with_store(Arc::new(LocalDirStore::new(dir)));
        if request.storage_key.is_none() {
            let key = request.file_name();
            request = request.with_storage_key(key);
        }
    }

    let mut updates = controller.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            print!("\r  {:<10} {:>3}%  ", state.status.as_str(), state.progress);
            if state.status.is_terminal() {
                println!();
                break;
            }
        }
    });

    let cancel = controller.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; cancelling export");
            cancel.cancel();
        }
    });

    let result = controller.run(request).await;
    interrupt.abort();
    if let Err(e) = printer.await {
        tracing::debug!(error = %e, "Progress printer stopped");
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            let state = controller.state();
            let message = state.error.unwrap_or_else(|| e.user_message());
            return Err(anyhow::anyhow!("Export failed: {message}"));
        }
    };

    if !args.dry_run {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&output_path, &report.output.artifact.bytes)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Export complete:");
    if args.dry_run {
        println!("  Dry run: nothing written");
    } else {
        println!("  File: {}", output_path.display());
    }
    println!("  Size: {} bytes", report.output.artifact.size_bytes);
    println!(
        "  Video: {} ({} frames @ {} fps, {})",
        report.resolution, report.video_samples, report.fps, report.codecs.video.codec
    );
    match &report.codecs.audio {
        Some(audio) => println!(
            "  Audio: {} Hz x{} ({} samples)",
            audio.sample_rate, audio.channels, report.audio_frames
        ),
        None => println!("  Audio: none"),
    }
    println!("  Duration: {:.2}s", report.duration_secs);
    if report.attempts > 1 {
        println!("  Attempts: {}", report.attempts);
    }
    if let Some(remote) = &report.output.remote_ref {
        println!("  Stored: {remote}");
    }
    if let Some(warning) = &report.warning {
        println!("  Warning: {warning}");
    }
    println!("  Elapsed: {:.1}s", report.elapsed_secs);

    Ok(())
}
