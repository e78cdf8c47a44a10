use std::sync::{Arc, Mutex};

use markfree_common::error::FailureKind;
use markfree_media_model::chunk::Degradation;
use markfree_media_model::format::OutputFormat;
use markfree_media_model::region::Region;
use markfree_pipeline::backend::synthetic::{SyntheticAudioDecoder, SyntheticEncoder, SyntheticSource};
use markfree_pipeline::{JobState, ProcessingController, ProcessingOptions, ProgressSink};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

fn landscape_regions() -> Vec<Region> {
    vec![
        Region::new(10, 10, 60, 25),
        Region::new(250, 80, 60, 25),
        Region::new(10, 150, 60, 25),
    ]
}

fn controller(decoder: SyntheticAudioDecoder, encoder: SyntheticEncoder) -> ProcessingController {
    let options = ProcessingOptions {
        blur_radius: 4,
        ..ProcessingOptions::default()
    };
    ProcessingController::new(options, Arc::new(decoder), Box::new(encoder))
}

fn recording_progress() -> (ProgressSink, Arc<Mutex<Vec<f64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let sink: ProgressSink = Box::new(move |p| sink_seen.lock().unwrap().push(p));
    (sink, seen)
}

#[tokio::test(start_paused = true)]
async fn ten_second_landscape_job_completes_with_audio() {
    let encoder = SyntheticEncoder::new();
    let encoder_log = encoder.log();
    let mut controller = controller(SyntheticAudioDecoder::tone(10.0), encoder);
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 10.0, 30);
    let source_log = source.log();

    let output = controller
        .run(&mut source, &landscape_regions(), None)
        .await
        .expect("job should complete");

    assert!(output.chunk_count >= 9, "got {} chunks", output.chunk_count);
    assert!(output.has_audio);
    assert!(output.warnings.is_empty());
    assert!(!output.payload.is_empty());
    assert_eq!(output.format, OutputFormat::Mp4AvcAac);
    assert!(output.frames_drawn > 0);

    let report = controller.last_report().unwrap();
    assert_eq!(
        report.transitions,
        vec![
            JobState::Idle,
            JobState::Preparing,
            JobState::Recording,
            JobState::Finalizing,
            JobState::Completed,
        ]
    );
    assert!(report.audio_context_closed);
    assert_eq!(report.failure, None);

    let encoder_log = encoder_log.lock().unwrap();
    assert_eq!(encoder_log.starts, 1);
    assert_eq!(encoder_log.stops, 1);
    assert_eq!(encoder_log.audio_pushes, 1);
    assert_eq!(encoder_log.video_frames, output.frames_drawn);
    let session = encoder_log.last_session.as_ref().unwrap();
    assert_eq!(session.stream.track_count(), 2);
    assert_eq!(session.stream.video.width, WIDTH);

    let source_log = source_log.lock().unwrap();
    assert!(source_log.muted);
    assert_eq!(source_log.plays, 1);
    assert!(source_log.stops >= 1);
}

#[tokio::test(start_paused = true)]
async fn nan_duration_is_invalid_input_and_encoder_never_starts() {
    let encoder = SyntheticEncoder::new();
    let encoder_log = encoder.log();
    let mut controller = controller(SyntheticAudioDecoder::tone(1.0), encoder);
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, f64::NAN, 30);
    let source_log = source.log();

    let err = controller
        .run(&mut source, &landscape_regions(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::InvalidInput);
    assert_eq!(encoder_log.lock().unwrap().starts, 0);
    assert_eq!(source_log.lock().unwrap().plays, 0);

    let report = controller.last_report().unwrap();
    assert_eq!(
        report.transitions,
        vec![JobState::Idle, JobState::Preparing, JobState::Failed]
    );
    assert!(!report.encoder_started);
}

#[tokio::test(start_paused = true)]
async fn corrupt_audio_completes_video_only() {
    let encoder = SyntheticEncoder::new();
    let encoder_log = encoder.log();
    let mut controller = controller(SyntheticAudioDecoder::corrupt(), encoder);
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 3.0, 30);

    let output = controller
        .run(&mut source, &landscape_regions(), None)
        .await
        .expect("audio failure must not fail the job");

    assert!(!output.has_audio);
    assert!(matches!(
        output.warnings.as_slice(),
        [Degradation::AudioDecode { .. }]
    ));

    let encoder_log = encoder_log.lock().unwrap();
    assert_eq!(encoder_log.audio_pushes, 0);
    let session = encoder_log.last_session.as_ref().unwrap();
    assert!(session.stream.audio.is_none());
    assert_eq!(session.stream.track_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn encoder_error_after_start_fails_and_closes_audio() {
    let encoder = SyntheticEncoder::new().error_after_start();
    let encoder_log = encoder.log();
    let mut controller = controller(SyntheticAudioDecoder::tone(5.0), encoder);
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 5.0, 30);

    let err = controller
        .run(&mut source, &landscape_regions(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::EncoderFailure);
    let report = controller.last_report().unwrap();
    assert!(report.audio_context_closed);
    assert_eq!(report.final_state(), JobState::Failed);
    assert!(report.transitions.contains(&JobState::Finalizing));
    assert_eq!(encoder_log.lock().unwrap().stops, 1);
}

#[tokio::test(start_paused = true)]
async fn encoder_start_failure_skips_playback() {
    let mut controller = controller(
        SyntheticAudioDecoder::tone(2.0),
        SyntheticEncoder::new().fail_on_start(),
    );
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 2.0, 30);
    let source_log = source.log();

    let err = controller.run(&mut source, &[], None).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::EncoderFailure);
    assert_eq!(source_log.lock().unwrap().plays, 0);
    let report = controller.last_report().unwrap();
    assert!(report.audio_context_closed);
    assert_eq!(
        report.transitions,
        vec![JobState::Idle, JobState::Preparing, JobState::Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn encoder_rejecting_frames_fails_the_job() {
    let mut controller = controller(
        SyntheticAudioDecoder::tone(2.0),
        SyntheticEncoder::new().fail_on_push(),
    );
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 2.0, 30);

    let err = controller.run(&mut source, &[], None).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::EncoderFailure);
}

#[tokio::test(start_paused = true)]
async fn zero_frames_is_no_data_captured() {
    let mut controller = controller(SyntheticAudioDecoder::tone(1.0), SyntheticEncoder::new());
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 1.0, 30).without_frames();

    let err = controller
        .run(&mut source, &landscape_regions(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::NoDataCaptured);
    let report = controller.last_report().unwrap();
    assert_eq!(report.chunk_count, 0);
    assert_eq!(report.frames_drawn, 0);
    assert!(report.transitions.ends_with(&[JobState::Finalizing, JobState::Failed]));
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_reaches_one() {
    let mut controller = controller(SyntheticAudioDecoder::tone(4.0), SyntheticEncoder::new());
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 4.0, 30);
    let (sink, seen) = recording_progress();

    controller
        .run(&mut source, &landscape_regions(), Some(sink))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.len() > 2);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn playback_refusal_is_playback_failure() {
    let encoder = SyntheticEncoder::new();
    let encoder_log = encoder.log();
    let mut controller = controller(SyntheticAudioDecoder::tone(2.0), encoder);
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 2.0, 30).failing_playback();

    let err = controller.run(&mut source, &[], None).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::PlaybackFailure);
    assert_eq!(encoder_log.lock().unwrap().stops, 1);
    assert!(controller.last_report().unwrap().audio_context_closed);
}

#[tokio::test(start_paused = true)]
async fn mid_stream_decode_error_is_playback_failure() {
    let mut controller = controller(SyntheticAudioDecoder::tone(5.0), SyntheticEncoder::new());
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 5.0, 30).error_at(2.0);

    let err = controller.run(&mut source, &[], None).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::PlaybackFailure);
    let report = controller.last_report().unwrap();
    assert!(report.frames_drawn > 0);
    assert!(report.transitions.ends_with(&[JobState::Finalizing, JobState::Failed]));
}

#[tokio::test(start_paused = true)]
async fn mismatched_frame_size_is_draw_failure() {
    let mut controller = controller(SyntheticAudioDecoder::tone(2.0), SyntheticEncoder::new());
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 2.0, 30).with_frame_size(160, 90);

    let err = controller
        .run(&mut source, &landscape_regions(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::DrawFailure);
    assert!(controller.last_report().unwrap().audio_context_closed);
}

#[tokio::test(start_paused = true)]
async fn format_negotiation_is_stable_across_jobs() {
    let encoder = SyntheticEncoder::supporting(&["video/mp4", "video/webm"]);
    let encoder_log = encoder.log();
    let mut controller = controller(SyntheticAudioDecoder::tone(2.0), encoder);
    assert_eq!(controller.negotiated_format(), OutputFormat::Mp4);

    for _ in 0..2 {
        let mut source = SyntheticSource::new(WIDTH, HEIGHT, 2.0, 30);
        let output = controller.run(&mut source, &[], None).await.unwrap();
        assert_eq!(output.format, OutputFormat::Mp4);
        assert_eq!(output.file_extension(), "mp4");
    }

    let encoder_log = encoder_log.lock().unwrap();
    assert_eq!(encoder_log.starts, 2);
    assert_eq!(encoder_log.stops, 2);
}

#[tokio::test(start_paused = true)]
async fn portrait_source_uses_webm_when_nothing_else_is_supported() {
    let mut controller = controller(
        SyntheticAudioDecoder::tone(2.0),
        SyntheticEncoder::supporting(&[]),
    );
    let mut source = SyntheticSource::new(90, 160, 2.0, 30);
    let regions = [Region::new(5, 10, 40, 20), Region::new(60, 140, 50, 40)];

    let output = controller.run(&mut source, &regions, None).await.unwrap();

    assert_eq!(output.format, OutputFormat::Webm);
    assert_eq!(output.suggested_file_name(), "markfree_processed_video.webm");
}

#[tokio::test(start_paused = true)]
async fn abandoned_job_still_releases_encoder_and_source() {
    let encoder = SyntheticEncoder::new();
    let encoder_log = encoder.log();
    let mut controller = controller(SyntheticAudioDecoder::tone(10.0), encoder);
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, 10.0, 30);
    let source_log = source.log();

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        controller.run(&mut source, &landscape_regions(), None),
    )
    .await;

    assert!(outcome.is_err(), "job should still be recording at 2s");
    assert_eq!(encoder_log.lock().unwrap().starts, 1);
    assert_eq!(encoder_log.lock().unwrap().stops, 1);
    assert!(source_log.lock().unwrap().stops >= 1);
    assert!(controller.last_report().is_none());
}
