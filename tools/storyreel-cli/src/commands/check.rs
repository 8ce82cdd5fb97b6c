//! Check runtime encoding capabilities.

use storyreel_common::config::AppConfig;
use storyreel_project_model::{DeviceClass, ExportFormat};
use storyreel_render_engine::backend::MediaBackend;
use storyreel_render_engine::codec::CodecNegotiator;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Storyreel System Check");
    println!("{}", "=".repeat(50));

    let backend = MediaBackend::system()?;
    let mut caps = backend.probe.probe();
    if let Some(class) = &config.export.device_class {
        let class: DeviceClass = class.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        caps = caps.with_device_class(class);
    }

    println!("[OK] Backend: {}", caps.backend);
    println!(
        "[OK] Host: {} CPUs, {}",
        caps.cpu_count,
        caps.memory_bytes
            .map(|b| format!("{:.1} GiB memory", b as f64 / (1u64 << 30) as f64))
            .unwrap_or_else(|| "unknown memory".to_string())
    );
    println!("[OK] Device class: {:?}", caps.device_class);
    report("H.264 encoding", caps.video_encoding, true);
    report("AAC encoding", caps.audio_encoding, false);
    report("Video clip decoding", caps.video_decoding, false);
    report("Compressed audio decoding", caps.compressed_audio_decoding, false);

    println!();
    for format in [ExportFormat::Landscape, ExportFormat::Portrait, ExportFormat::Square] {
        let resolution = format.resolution(caps.device_class);
        match CodecNegotiator::new(backend.encoders.as_ref(), &caps).negotiate(
            resolution,
            config.export.fps,
            true,
        ) {
            Ok(codecs) => {
                let audio = codecs
                    .audio
                    .as_ref()
                    .map(|a| format!("{} {} Hz", a.codec, a.sample_rate))
                    .unwrap_or_else(|| "no audio".to_string());
                println!(
                    "[OK] {format}: {resolution} {} ({audio})",
                    codecs.video.codec
                );
            }
            Err(e) => println!("[FAIL] {format}: {}", e.user_message()),
        }
    }

    println!();
    if let Some(reason) = caps.missing_requirement() {
        println!("This runtime cannot export video: {reason}.");
        println!("Rebuild with `--features gst` and install the GStreamer x264/openh264 plugins.");
    } else {
        println!("All required capabilities are available. Storyreel is ready.");
    }

    Ok(())
}

fn report(name: &str, available: bool, required: bool) {
    let tag = match (available, required) {
        (true, _) => "[OK]  ",
        (false, true) => "[FAIL]",
        (false, false) => "[WARN]",
    };
    println!("{tag} {name}: {}", if available { "available" } else { "unavailable" });
}
