//! Blur regions of a video and write the re-encoded result.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use markfree_common::config::AppConfig;
use markfree_media_model::chunk::Degradation;
use markfree_media_model::region::{Orientation, Region};
use markfree_pipeline::backend::gstreamer::{GstAudioDecoder, GstEncoderBackend, GstMediaSource};
use markfree_pipeline::{MediaSource, ProcessingController, ProcessingOptions, ProgressSink};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi", "ogv", "3gp"];

pub async fn run(
    config: &AppConfig,
    input: PathBuf,
    output: Option<PathBuf>,
    regions_file: Option<PathBuf>,
    region_args: Vec<Region>,
    blur_radius: Option<u32>,
    blur_passes: Option<u32>,
) -> anyhow::Result<()> {
    if !is_video_file(&input) {
        anyhow::bail!("Please select a video file: {}", input.display());
    }
    println!("Processing video: {}", input.display());

    let mut options = ProcessingOptions::from(&config.processing);
    if let Some(radius) = blur_radius {
        options.blur_radius = radius;
    }
    if let Some(passes) = blur_passes {
        options.blur_passes = passes;
    }

    let time_update_interval = Duration::from_millis(config.processing.time_update_interval_ms);
    let mut source = GstMediaSource::open(&input, time_update_interval)
        .map_err(|e| anyhow::anyhow!("Failed to load video: {e}"))?;
    let metadata = source.metadata();

    let regions = resolve_regions(
        config,
        regions_file.as_deref(),
        region_args,
        metadata.width,
        metadata.height,
    )?;

    println!(
        "  Source: {}x{} ({:?}), {:.1}s",
        metadata.width,
        metadata.height,
        Orientation::from_dimensions(metadata.width, metadata.height),
        metadata.duration_secs
    );
    println!("  Regions: {}", regions.len());
    println!(
        "  Blur: radius {}px x {} passes",
        options.blur_radius, options.blur_passes
    );

    let mut controller = ProcessingController::new(
        options,
        Arc::new(GstAudioDecoder::new()),
        Box::new(GstEncoderBackend::new()),
    );
    println!("  Format: {}", controller.negotiated_format());

    let progress: ProgressSink = Box::new(|p| {
        print!("\r  Progress: {:.1}%  ", p * 100.0);
        let _ = std::io::stdout().flush();
    });

    let result = controller.run(&mut source, &regions, Some(progress)).await;
    println!();

    let output_data = match result {
        Ok(output_data) => output_data,
        Err(e) => {
            println!("Processing failed ({}): {e}", e.kind());
            return Err(e.into());
        }
    };

    for warning in &output_data.warnings {
        match warning {
            Degradation::AudioDecode { message } => {
                println!("  Warning: output has no audio ({message})");
            }
        }
    }

    let output_path = output
        .unwrap_or_else(|| default_output_path(&input, &output_data.suggested_file_name()));
    std::fs::write(&output_path, &output_data.payload)?;

    println!(
        "Processing complete: {} ({} bytes, {} frames, {})",
        output_path.display(),
        output_data.payload.len(),
        output_data.frames_drawn,
        output_data.mime_type()
    );
    tracing::info!(path = %output_path.display(), "Output written");
    Ok(())
}

/// Explicit regions win over a regions file, which wins over the presets.
fn resolve_regions(
    config: &AppConfig,
    regions_file: Option<&Path>,
    region_args: Vec<Region>,
    width: u32,
    height: u32,
) -> anyhow::Result<Vec<Region>> {
    if !region_args.is_empty() {
        return Ok(region_args);
    }
    if let Some(path) = regions_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read regions file {}: {e}", path.display()))?;
        let regions: Vec<Region> = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid regions file {}: {e}", path.display()))?;
        return Ok(regions);
    }
    Ok(config.regions.for_dimensions(width, height).to_vec())
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn default_output_path(input: &Path, file_name: &str) -> PathBuf {
    input
        .parent()
        .map(|dir| dir.join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}
