//! End-to-end job lifecycle tests
//!
//! Drive jobs through scripted analyzer and narrative backends and check what
//! the registry holds and what subscribers receive.

mod helpers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use helpers::{
    detection, fast_report_settings, frame, init_test_logging, segment, ScriptedAnalyzer,
    ScriptedBackend, Step,
};
use mv_analysis::models::MediaArtifact;
use mv_analysis::services::{
    EventHub, FindingTranslator, JobDriver, JobRegistry, ReportGenerator, Subscription,
    ThresholdTable,
};
use mv_common::events::{
    AlertPosition, JobEvent, JobStatus, MediaKind, ReportSource, Severity, TemporalPattern,
};
use uuid::Uuid;

struct Harness {
    registry: JobRegistry,
    hub: EventHub,
    driver: Arc<JobDriver>,
}

fn harness_with_capacity(
    analyzer: ScriptedAnalyzer,
    backend: Arc<ScriptedBackend>,
    capacity: usize,
) -> Harness {
    let registry = JobRegistry::new();
    let hub = EventHub::new(capacity);
    let translator = FindingTranslator::new(Arc::new(ThresholdTable::default()), Severity::Warning);
    let reports = ReportGenerator::new(backend, fast_report_settings());
    let driver = JobDriver::new(
        registry.clone(),
        hub.clone(),
        Arc::new(analyzer),
        translator,
        Arc::new(reports),
    );

    Harness {
        registry,
        hub,
        driver: Arc::new(driver),
    }
}

fn harness(analyzer: ScriptedAnalyzer, backend: Arc<ScriptedBackend>) -> Harness {
    harness_with_capacity(analyzer, backend, 64)
}

fn artifact(media_kind: MediaKind) -> MediaArtifact {
    MediaArtifact {
        path: PathBuf::from("/nonexistent/upload.bin"),
        media_kind,
        filename: "upload.bin".to_string(),
        size_bytes: 1024,
    }
}

fn drain(subscription: &mut Subscription) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}

fn progress_values(events: &[JobEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress(p) => Some(p.percentage),
            _ => None,
        })
        .collect()
}

fn surgical_video() -> Vec<mv_analysis::services::RawRecord> {
    vec![
        frame(0, vec![detection("forceps", Some("instrument_detected"), 0.90)]),
        frame(30, vec![detection("bleeding", Some("surgical_bleeding"), 0.92)]),
        frame(60, vec![]),
    ]
}

#[tokio::test]
async fn test_video_job_with_critical_frame() {
    init_test_logging();
    let h = harness(
        ScriptedAnalyzer::new(Some(3), surgical_video()),
        ScriptedBackend::answering("Narrative summary of the procedure."),
    );
    let job_id = h.registry.create(MediaKind::Video);
    let mut subscription = h.hub.subscribe(job_id);

    let status = h.driver.run(job_id, &artifact(MediaKind::Video)).await;
    assert_eq!(status, JobStatus::Completed);

    let events = drain(&mut subscription);
    assert!(subscription.is_finished());

    let progress = progress_values(&events);
    assert_eq!(progress.first().copied(), Some(0.0));
    assert_eq!(progress.last().copied(), Some(100.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);

    let alerts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Alert(a) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(alerts.len(), 1);
    let alert = alerts[0];
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.anomaly_category, "surgical_bleeding");
    assert_eq!(alert.alert_id, format!("alert-{}-30", job_id));
    assert!(matches!(
        alert.position,
        AlertPosition::Frame { frame_number: 30, .. }
    ));

    match events.last() {
        Some(JobEvent::Completed(summary)) => {
            assert_eq!(summary.job_id, job_id);
            assert_eq!(summary.total_findings, 3);
            assert_eq!(summary.alert_count, 1);
            assert_eq!(summary.overall_severity, Severity::Critical);
            assert_eq!(summary.report_source, ReportSource::Generated);
            assert_eq!(summary.severity_counts.get(Severity::Critical), 1);
            assert!(matches!(
                summary.temporal_patterns.as_slice(),
                [TemporalPattern::AbruptEscalation {
                    position: AlertPosition::Frame { frame_number: 30, .. },
                    previous: Severity::Info,
                }]
            ));
        }
        other => panic!("expected completed event last, got {:?}", other),
    }

    let job = h.registry.get(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percentage, 100.0);
    assert_eq!(job.findings.len(), 3);
    let report = job.report.unwrap();
    assert_eq!(report.content, "Narrative summary of the procedure.");
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn test_audio_job_flags_indicator_segments() {
    let records = vec![
        segment(0.0, 10.0, &[("anxiety_indicator", 0.30)]),
        segment(10.0, 20.0, &[("depression_indicator", 0.85), ("anxiety_indicator", 0.55)]),
    ];
    let h = harness(
        ScriptedAnalyzer::new(None, records),
        ScriptedBackend::answering("Clinical summary."),
    );
    let job_id = h.registry.create(MediaKind::Audio);
    let mut subscription = h.hub.subscribe(job_id);

    assert_eq!(
        h.driver.run(job_id, &artifact(MediaKind::Audio)).await,
        JobStatus::Completed
    );

    let events = drain(&mut subscription);
    let alert = events
        .iter()
        .find_map(|e| match e {
            JobEvent::Alert(a) => Some(a.clone()),
            _ => None,
        })
        .expect("segment alert");
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.anomaly_category, "depression_indicator");
    assert_eq!(alert.alert_id, format!("alert-{}-s10000", job_id));

    let job = h.registry.get(job_id).unwrap();
    assert_eq!(job.findings.len(), 2);
    assert_eq!(job.overall_severity(), Severity::Critical);
}

#[tokio::test]
async fn test_stream_error_midway_fails_job() {
    init_test_logging();
    let analyzer = ScriptedAnalyzer::with_steps(
        Some(3),
        vec![
            Step::Record(frame(0, vec![])),
            Step::Fail("connection reset".to_string()),
            Step::Record(frame(60, vec![])),
        ],
    );
    let h = harness(analyzer, ScriptedBackend::answering("unused"));
    let job_id = h.registry.create(MediaKind::Video);
    let mut subscription = h.hub.subscribe(job_id);

    let status = h.driver.run(job_id, &artifact(MediaKind::Video)).await;
    assert_eq!(status, JobStatus::Error);

    let snapshot = h.registry.status(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Error);
    assert!(snapshot
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("connection reset")));

    let events = drain(&mut subscription);
    match events.last() {
        Some(JobEvent::Failed(notice)) => assert!(notice.error_message.contains("connection reset")),
        other => panic!("expected failed event last, got {:?}", other),
    }
    assert!(!events.iter().any(|e| matches!(e, JobEvent::Completed(_))));

    // Findings recorded before the error stay with the job
    assert_eq!(h.registry.get(job_id).unwrap().findings.len(), 1);

    // A late completion cannot overwrite the failure
    let report = ReportGenerator::fallback_only()
        .generate(&mv_analysis::models::ReportInput {
            job_id,
            media_kind: MediaKind::Video,
            findings: &[],
            temporal_patterns: &[],
        })
        .await;
    assert_eq!(h.registry.complete(job_id, report, vec![]), Ok(false));
    assert_eq!(h.registry.status(job_id).unwrap().status, JobStatus::Error);
}

#[tokio::test]
async fn test_unreachable_detector_fails_job() {
    let h = harness(
        ScriptedAnalyzer::unreachable("connection refused"),
        ScriptedBackend::answering("unused"),
    );
    let job_id = h.registry.create(MediaKind::Audio);
    let mut subscription = h.hub.subscribe(job_id);

    assert_eq!(
        h.driver.run(job_id, &artifact(MediaKind::Audio)).await,
        JobStatus::Error
    );

    let events = drain(&mut subscription);
    assert!(matches!(events.last(), Some(JobEvent::Failed(_))));
    assert!(h.registry.get(job_id).unwrap().report.is_none());
}

#[tokio::test]
async fn test_wrong_record_kind_fails_job() {
    let h = harness(
        ScriptedAnalyzer::new(Some(1), vec![segment(0.0, 5.0, &[])]),
        ScriptedBackend::answering("unused"),
    );
    let job_id = h.registry.create(MediaKind::Video);

    assert_eq!(
        h.driver.run(job_id, &artifact(MediaKind::Video)).await,
        JobStatus::Error
    );
    let snapshot = h.registry.status(job_id).unwrap();
    assert!(snapshot
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("audio record in a video job")));
}

#[tokio::test]
async fn test_report_backend_down_uses_fallback() {
    let backend = ScriptedBackend::unavailable();
    let h = harness(
        ScriptedAnalyzer::new(Some(3), surgical_video()),
        Arc::clone(&backend),
    );
    let job_id = h.registry.create(MediaKind::Video);
    let mut subscription = h.hub.subscribe(job_id);

    assert_eq!(
        h.driver.run(job_id, &artifact(MediaKind::Video)).await,
        JobStatus::Completed
    );
    assert_eq!(backend.calls(), 3);

    let events = drain(&mut subscription);
    match events.last() {
        Some(JobEvent::Completed(summary)) => {
            assert_eq!(summary.report_source, ReportSource::Fallback)
        }
        other => panic!("expected completed event last, got {:?}", other),
    }

    let report = h.registry.get(job_id).unwrap().report.unwrap();
    assert!(report.is_fallback());
    assert_eq!(report.attempts, 3);
    assert!(!report.content.is_empty());
}

#[tokio::test]
async fn test_unknown_total_progress_rises_below_completion() {
    let records = (0..5).map(|i| frame(i * 30, vec![])).collect();
    let h = harness(
        ScriptedAnalyzer::new(None, records),
        ScriptedBackend::answering("ok"),
    );
    let job_id = h.registry.create(MediaKind::Video);
    let mut subscription = h.hub.subscribe(job_id);

    h.driver.run(job_id, &artifact(MediaKind::Video)).await;

    let progress = progress_values(&drain(&mut subscription));
    // Starting event, one per frame, then "Generating report"
    assert_eq!(progress.len(), 7);
    let per_frame = &progress[1..6];
    assert!(per_frame.windows(2).all(|w| w[0] < w[1]));
    assert!(progress.iter().all(|p| *p < 99.0));
    assert_eq!(h.registry.status(job_id).unwrap().progress_percentage, 100.0);
}

#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let h = harness(
        ScriptedAnalyzer::new(Some(3), surgical_video()).with_delay(Duration::from_millis(5)),
        ScriptedBackend::answering("ok"),
    );

    let first = h.registry.create(MediaKind::Video);
    let second = h.registry.create(MediaKind::Video);
    let mut first_sub = h.hub.subscribe(first);
    let mut second_sub = h.hub.subscribe(second);

    let a = h.driver.spawn(first, artifact(MediaKind::Video));
    let b = h.driver.spawn(second, artifact(MediaKind::Video));
    assert_eq!(a.await.unwrap(), JobStatus::Completed);
    assert_eq!(b.await.unwrap(), JobStatus::Completed);

    for (job_id, subscription) in [(first, &mut first_sub), (second, &mut second_sub)] {
        let events = drain(subscription);
        for event in &events {
            match event {
                JobEvent::Alert(alert) => assert!(alert.alert_id.contains(&job_id.to_string())),
                JobEvent::Completed(summary) => assert_eq!(summary.job_id, job_id),
                _ => {}
            }
        }
        assert_eq!(
            events.iter().filter(|e| matches!(e, JobEvent::Completed(_))).count(),
            1
        );
        assert_eq!(h.registry.get(job_id).unwrap().findings.len(), 3);
    }
}

#[tokio::test]
async fn test_late_subscriber_receives_terminal_event() {
    let h = harness(
        ScriptedAnalyzer::new(Some(3), surgical_video()),
        ScriptedBackend::answering("ok"),
    );
    let job_id = h.registry.create(MediaKind::Video);
    h.driver.run(job_id, &artifact(MediaKind::Video)).await;

    let mut late = h.hub.subscribe(job_id);
    match late.recv().await {
        Some(JobEvent::Completed(summary)) => assert_eq!(summary.job_id, job_id),
        other => panic!("expected completed event, got {:?}", other),
    }
    assert!(late.recv().await.is_none());
    assert_eq!(h.hub.subscriber_count(job_id), 0);
}

#[tokio::test]
async fn test_slow_subscriber_keeps_terminal_event() {
    let records = (0..10).map(|i| frame(i * 30, vec![])).collect();
    let h = harness_with_capacity(
        ScriptedAnalyzer::new(Some(10), records),
        ScriptedBackend::answering("ok"),
        3,
    );
    let job_id = h.registry.create(MediaKind::Video);
    let mut subscription = h.hub.subscribe(job_id);

    h.driver.run(job_id, &artifact(MediaKind::Video)).await;

    assert!(subscription.dropped() > 0);
    let events = drain(&mut subscription);
    assert_eq!(events.len(), 3);
    assert!(matches!(events.last(), Some(JobEvent::Completed(_))));
}

#[tokio::test]
async fn test_run_on_missing_job_reports_error() {
    let h = harness(
        ScriptedAnalyzer::new(Some(1), vec![frame(0, vec![])]),
        ScriptedBackend::answering("ok"),
    );
    let status = h.driver.run(Uuid::new_v4(), &artifact(MediaKind::Video)).await;
    assert_eq!(status, JobStatus::Error);
}

#[tokio::test]
async fn test_subscribers_to_one_job_see_identical_progress() {
    let records = (0..4).map(|i| frame(i * 30, vec![])).collect();
    let h = harness(
        ScriptedAnalyzer::new(Some(4), records),
        ScriptedBackend::answering("ok"),
    );
    let job_id = h.registry.create(MediaKind::Video);
    let mut first = h.hub.subscribe(job_id);
    let mut second = h.hub.subscribe(job_id);

    h.driver.run(job_id, &artifact(MediaKind::Video)).await;

    let first_events = drain(&mut first);
    let second_events = drain(&mut second);
    let first_progress = progress_values(&first_events);

    assert_eq!(first_progress, vec![0.0, 25.0, 50.0, 75.0, 100.0, 100.0]);
    assert_eq!(first_progress, progress_values(&second_events));
    assert!(matches!(first_events.last(), Some(JobEvent::Completed(_))));
    assert!(matches!(second_events.last(), Some(JobEvent::Completed(_))));
}

#[tokio::test]
async fn test_stalled_detector_fails_job() {
    let registry = JobRegistry::new();
    let hub = EventHub::new(16);
    let analyzer = ScriptedAnalyzer::new(Some(2), vec![frame(0, vec![]), frame(30, vec![])])
        .with_delay(Duration::from_secs(2));
    let driver = JobDriver::new(
        registry.clone(),
        hub.clone(),
        Arc::new(analyzer),
        FindingTranslator::new(Arc::new(ThresholdTable::default()), Severity::Warning),
        Arc::new(ReportGenerator::fallback_only()),
    )
    .with_idle_timeout(Duration::from_millis(50));
    let h = Harness {
        registry,
        hub,
        driver: Arc::new(driver),
    };

    let job_id = h.registry.create(MediaKind::Video);
    let mut subscription = h.hub.subscribe(job_id);

    let started = std::time::Instant::now();
    assert_eq!(h.driver.run(job_id, &artifact(MediaKind::Video)).await, JobStatus::Error);
    assert!(started.elapsed() < Duration::from_secs(1));

    let snapshot = h.registry.status(job_id).unwrap();
    assert!(snapshot
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("no output")));
    assert!(matches!(drain(&mut subscription).last(), Some(JobEvent::Failed(_))));
}

#[tokio::test]
async fn test_rising_bleeding_reaches_summary_and_report() {
    let records = (0..10u64)
        .map(|i| {
            let detections = (0..i / 2)
                .map(|_| detection("blood", Some("surgical_bleeding"), 0.5))
                .collect();
            frame(i * 30, detections)
        })
        .collect();
    let h = harness(
        ScriptedAnalyzer::new(Some(10), records),
        ScriptedBackend::unavailable(),
    );
    let job_id = h.registry.create(MediaKind::Video);
    let mut subscription = h.hub.subscribe(job_id);

    assert_eq!(
        h.driver.run(job_id, &artifact(MediaKind::Video)).await,
        JobStatus::Completed
    );

    match drain(&mut subscription).last() {
        Some(JobEvent::Completed(summary)) => assert!(matches!(
            summary.temporal_patterns.as_slice(),
            [TemporalPattern::ProgressiveBleeding {
                start_frame: 0,
                end_frame: 270,
                ..
            }]
        )),
        other => panic!("expected completed event last, got {:?}", other),
    }

    let job = h.registry.get(job_id).unwrap();
    assert_eq!(job.temporal_patterns.len(), 1);
    let report = job.report.unwrap();
    assert!(report.is_fallback());
    assert!(report
        .content
        .contains("Progressive increase in bleeding between 0.0s and 9.0s"));
}
