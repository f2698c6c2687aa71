//! End-to-end tests of the capture path: byte source, decoder, classifier,
//! session, finalizer and export.

use gg_daq::codec::{to_vec, Value};
use gg_daq::pipeline::{run_capture, ExportOutcome};
use gg_daq::record::Record;
use gg_daq::session::{CaptureSession, SessionState, StopReason};
use gg_daq::source::{ReplaySource, SimulatedDevice, SimulationProfile};
use gg_daq::storage::{exporter_for, CsvExporter, ExportFormat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::watch;
use tracing_test::traced_test;

fn measurement(t: i64, v: f64, i: f64) -> Vec<u8> {
    to_vec(&Value::Map(vec![
        (Value::from("t"), Value::Int(t)),
        (Value::from("v"), Value::Float(v)),
        (Value::from("i"), Value::Float(i)),
    ]))
}

fn debug_note(text: &str) -> Vec<u8> {
    to_vec(&Value::Map(vec![(Value::from("debug"), Value::from(text))]))
}

/// A puff: idle, a pulse, idle, with debug chatter sprinkled in.
fn puff_stream(rows: i64) -> Vec<u8> {
    let mut stream = Vec::new();
    for k in 0..rows {
        if k % 7 == 3 {
            stream.extend(debug_note(&format!("tick {k}")));
        }
        let current = if (rows / 4..rows / 2).contains(&k) { 7.2 } else { 0.01 };
        stream.extend(measurement(5_000_000 + k * 1_000, 3.7, current));
    }
    stream
}

fn capture_chunks(chunks: &[&[u8]]) -> CaptureSession {
    let mut session = CaptureSession::new("gg1");
    session.start().unwrap();
    for chunk in chunks {
        session.ingest(chunk).unwrap();
    }
    session
}

#[test]
fn test_chunk_boundaries_do_not_change_the_log() {
    let stream = puff_stream(60);
    let reference = capture_chunks(&[&stream]);
    assert_eq!(reference.log().len(), 60);

    let mut rng = StdRng::seed_from_u64(0x6761);
    for _ in 0..50 {
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut rest = stream.as_slice();
        while !rest.is_empty() {
            let take = rng.gen_range(0..=rest.len().min(40));
            let (head, tail) = rest.split_at(take);
            chunks.push(head);
            rest = tail;
        }
        let session = capture_chunks(&chunks);
        assert_eq!(session.log(), reference.log());
        assert_eq!(session.stats().diagnostics, reference.stats().diagnostics);
        assert_eq!(session.buffered(), 0);
    }
}

#[test]
fn test_garbage_between_records_is_skipped() {
    let mut stream = measurement(1, 3.0, 1.0);
    // reserved tag, a stray integer, a string with invalid UTF-8, negative fixints
    stream.extend([0xc1, 0x07, 0xc1, 0xa2, 0xff, 0xfe]);
    stream.extend(measurement(2, 3.0, 2.0));

    for split in 0..=stream.len() {
        let (a, b) = stream.split_at(split);
        let session = capture_chunks(&[a, b]);
        let times: Vec<_> = session.log().iter().map(|r| r.get("t").cloned()).collect();
        assert_eq!(times, vec![Some(Value::Int(1)), Some(Value::Int(2))], "split at {split}");
        assert_eq!(session.stats().decode_errors, 3, "split at {split}");
        assert_eq!(session.stats().rejected, 3, "split at {split}");
    }
}

#[test]
fn test_log_is_the_ordered_measurement_subsequence() {
    let mut stream = Vec::new();
    let mut expected = Vec::new();
    for k in 0..20i64 {
        match k % 4 {
            0 => stream.extend(debug_note("boot")),
            1 => stream.extend(to_vec(&Value::Array(vec![Value::Int(k)]))),
            _ => {
                stream.extend(measurement(k, 1.0, 1.0));
                expected.push(Record::new().with("t", k).with("v", 1.0).with("i", 1.0));
            }
        }
    }
    let session = capture_chunks(&[&stream]);
    assert_eq!(session.log(), expected.as_slice());
    assert_eq!(session.stats().diagnostics, 5);
    // each one-element array: its header is dropped, the integer inside is rejected
    assert_eq!(session.stats().decode_errors, 5);
    assert_eq!(session.stats().rejected, 5);
}

#[test]
fn test_container_header_garbage_does_not_hide_records() {
    let garbage: [&[u8]; 4] = [&[0x9f], &[0xdc, 0xff, 0x00], &[0x8f], &[0xde, 0xff, 0x00]];
    for bytes in garbage {
        let mut stream = measurement(0, 3.0, 1.0);
        stream.extend_from_slice(bytes);
        for k in 1..=5_000 {
            stream.extend(measurement(k, 3.0, 1.0));
        }

        let mut rng = StdRng::seed_from_u64(7);
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut rest = stream.as_slice();
        while !rest.is_empty() {
            let (head, tail) = rest.split_at(rng.gen_range(1..=rest.len().min(256)));
            chunks.push(head);
            rest = tail;
        }

        let session = capture_chunks(&chunks);
        assert_eq!(session.log().len(), 5_001, "garbage {bytes:02x?}");
        assert_eq!(session.buffered(), 0, "garbage {bytes:02x?}");
        assert_eq!(
            session.log().last().and_then(|r| r.get("t")),
            Some(&Value::Int(5_000))
        );
        assert!(session.stats().decode_errors >= 1);
    }
}

#[tokio::test]
async fn test_replay_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let stream = puff_stream(40);
    let mut source = ReplaySource::from_bytes("dump", &stream, 256);
    let (_tx, mut rx) = watch::channel(false);
    let mut session = CaptureSession::new("gg1");
    let mut sink = exporter_for(ExportFormat::Csv, dir.path());

    let report = run_capture(&mut session, &mut source, &mut rx, sink.as_mut())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Finalized);

    let path = match report.export {
        ExportOutcome::Written(path) => path,
        other => panic!("unexpected export outcome {other:?}"),
    };
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("gg1_"));
    assert!(name.ends_with(".csv"));

    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(",t,v,i,p"));
    assert_eq!(lines.count(), 40);

    let table = report.table.unwrap();
    let onset = table.onset_index().unwrap();
    assert_eq!(onset, 10);
    assert_eq!(table.get(onset, "t"), Some(&Value::Int(0)));
    assert_eq!(table.get(0, "t"), Some(&Value::Int(-10_000)));
    for row in table.rows() {
        let (v, i, p) = (
            row.get("v").and_then(Value::as_f64).unwrap(),
            row.get("i").and_then(Value::as_f64).unwrap(),
            row.get("p").and_then(Value::as_f64).unwrap(),
        );
        assert_eq!(p, v * i);
    }
}

#[tokio::test]
async fn test_link_failure_still_exports_partial_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = measurement(10, 3.0, 1.0);
    let second = measurement(20, 3.0, 4.0);
    // the failure cuts the second record in half
    first.extend_from_slice(&second[..4]);

    let mut source = ReplaySource::new("flaky").chunk(first).fail("device unplugged");
    let (_tx, mut rx) = watch::channel(false);
    let mut session = CaptureSession::new("gg1");
    let mut sink = CsvExporter::new(dir.path());

    let report = run_capture(&mut session, &mut source, &mut rx, &mut sink)
        .await
        .unwrap();
    assert!(matches!(report.stop, StopReason::LinkFailed(_)));
    assert!(matches!(report.export, ExportOutcome::Written(_)));
    assert_eq!(report.table.map(|t| t.len()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_operator_stop_while_link_is_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = ReplaySource::new("quiet")
        .chunk(measurement(0, 3.0, 1.0))
        .chunk(measurement(1_000, 3.0, 5.0))
        .hold_open(Duration::from_millis(100));
    let (tx, mut rx) = watch::channel(false);
    let mut session = CaptureSession::new("gg1");
    let mut sink = exporter_for(ExportFormat::Json, dir.path());

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
    });
    let report = run_capture(&mut session, &mut source, &mut rx, sink.as_mut())
        .await
        .unwrap();
    stopper.await.unwrap();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert!(report.stats.idle_polls >= 9);
    let table = report.table.unwrap();
    assert_eq!(table.onset_index(), Some(1));
    assert_eq!(table.get(0, "t"), Some(&Value::Int(-1_000)));
}

#[tokio::test]
async fn test_dropped_stop_sender_ends_capture() {
    let mut source = ReplaySource::new("held").hold_open(Duration::from_millis(5));
    let (tx, mut rx) = watch::channel(false);
    drop(tx);

    let mut session = CaptureSession::new("gg1");
    let reason = session.run(&mut source, &mut rx).await.unwrap();
    assert_eq!(reason, StopReason::Cancelled);
    assert_eq!(session.state(), SessionState::Stopping);
}

#[tokio::test]
async fn test_empty_capture_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = ReplaySource::new("chatter")
        .chunk(debug_note("hello"))
        .idle()
        .chunk(debug_note("bye"));
    let (_tx, mut rx) = watch::channel(false);
    let mut session = CaptureSession::new("gg1");
    let mut sink = exporter_for(ExportFormat::Csv, dir.path());

    let report = run_capture(&mut session, &mut source, &mut rx, sink.as_mut())
        .await
        .unwrap();
    assert_eq!(report.export, ExportOutcome::Empty);
    assert_eq!(report.stats.diagnostics, 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_simulated_puff_aligns_to_pulse() {
    let profile = SimulationProfile {
        records: 300,
        pulse_start: 120,
        pulse_len: 100,
        ..SimulationProfile::default()
    };
    let mut source = SimulatedDevice::seeded(profile, 42);
    let (_tx, mut rx) = watch::channel(false);
    let mut session = CaptureSession::new("sim");

    let reason = session.run(&mut source, &mut rx).await.unwrap();
    assert_eq!(reason, StopReason::EndOfStream);
    assert_eq!(session.log().len(), 300);
    assert_eq!(session.stats().diagnostics, 1);

    let table = session.finalize().unwrap();
    assert_eq!(table.onset_index(), Some(120));
    assert_eq!(table.get(120, "t"), Some(&Value::Int(0)));
    assert_eq!(table.get(0, "t"), Some(&Value::Int(-120_000)));
}

#[tokio::test]
#[traced_test]
async fn test_diagnostics_and_rejections_are_logged() {
    let mut stream = debug_note("battery low");
    stream.extend(to_vec(&Value::Int(5)));
    stream.push(0xc1);
    stream.extend(measurement(1, 1.0, 1.0));
    let mut source = ReplaySource::new("mem").chunk(stream);
    let (_tx, mut rx) = watch::channel(false);

    let mut session = CaptureSession::new("gg1");
    session.run(&mut source, &mut rx).await.unwrap();

    assert!(logs_contain("DEBUG: {\"debug\": \"battery low\"}"));
    assert!(logs_contain("Rejecting 5"));
    assert!(logs_contain("Decode error"));
    assert_eq!(session.log().len(), 1);
}
