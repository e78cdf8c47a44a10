//! Check encoder and container support.

use std::sync::Arc;

use markfree_common::config::{config_file_path, AppConfig};
use markfree_media_model::format::OutputFormat;
use markfree_pipeline::backend::gstreamer::{self, GstEncoderBackend};
use markfree_pipeline::backend::synthetic::{
    SyntheticAudioDecoder, SyntheticEncoder, SyntheticSource,
};
use markfree_pipeline::{EncoderBackend, ProcessingController, ProcessingOptions, StreamMuxer};

/// Length of the synthetic self-test clip.
const SELF_TEST_SECS: f64 = 3.0;

pub async fn run(config: &AppConfig, synthetic: bool) -> anyhow::Result<()> {
    println!("MarkFree System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());

    if gstreamer::is_available() {
        println!("[OK] GStreamer initialized");
    } else {
        println!("[FAIL] GStreamer could not be initialized");
    }

    let encoder = GstEncoderBackend::new();
    for format in [OutputFormat::Mp4AvcAac, OutputFormat::Mp4, OutputFormat::Webm] {
        let tag = if encoder.is_type_supported(format.mime_type()) {
            "[OK]  "
        } else {
            "[MISS]"
        };
        println!("{tag} {format}");
    }

    let options = ProcessingOptions::from(&config.processing);
    let muxer = StreamMuxer::new(Box::new(encoder))
        .with_preference(options.format_preference.clone());
    println!(
        "Selected format: {} (encoder: {})",
        muxer.negotiate(),
        muxer.backend_name()
    );

    if synthetic {
        println!();
        println!("Running synthetic self-test ({SELF_TEST_SECS:.0}s clip)...");
        let mut controller = ProcessingController::new(
            options,
            Arc::new(SyntheticAudioDecoder::tone(SELF_TEST_SECS)),
            Box::new(SyntheticEncoder::new()),
        );
        let mut source =
            SyntheticSource::new(640, 360, SELF_TEST_SECS, config.processing.capture_fps);
        let regions = config.regions.for_dimensions(640, 360).to_vec();
        match controller.run(&mut source, &regions, None).await {
            Ok(output) => println!(
                "[OK] Self-test produced {} chunks, {} frames, audio: {}",
                output.chunk_count, output.frames_drawn, output.has_audio
            ),
            Err(e) => {
                println!("[FAIL] Self-test failed ({}): {e}", e.kind());
                return Err(e.into());
            }
        }
    }

    Ok(())
}
