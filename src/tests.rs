use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::capture::{InterfaceInfo, ReplayBackend, ReplayEvent};
use crate::config::DetectorConfig;
use crate::error::{CaptureError, LoadError, PipelineError};
use crate::model::Label;
use crate::packet::synth::{arp_frame, ipv4_frame, L4};
use crate::packet::LinkType;
use crate::pipeline::{Pipeline, PipelineState, StopReason};
use crate::model;
use crate::sink::{CsvSink, MemorySink, ResultSink};

const SCALER: &str = r#"{
    "feature_names": ["Source Port", "Destination Port", "TTL", "Length", "Flags"],
    "mean": [30000.0, 30000.0, 64.0, 600.0, 0.5],
    "scale": [15000.0, 15000.0, 32.0, 400.0, 0.5]
}"#;

const MODEL: &str = r#"{
    "kind": "logistic_regression",
    "classes": [0, 1],
    "coefficients": [0.0, -1.5, 1.2, -1.0, 2.0],
    "intercept": 0.3
}"#;

struct Fixture {
    dir: TempDir,
    config: DetectorConfig,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("logistic_model.json");
    let scaler_path = dir.path().join("scaler.json");
    fs::write(&model_path, MODEL).unwrap();
    fs::write(&scaler_path, SCALER).unwrap();
    let config = DetectorConfig {
        model_path,
        scaler_path,
        sink_timeout: Duration::from_secs(1),
        max_consecutive_errors: 3,
        ..Default::default()
    };
    Fixture { dir, config }
}

fn tcp_frame() -> Vec<u8> {
    ipv4_frame(L4::Tcp { src: 443, dst: 51000 }, 20, 1500, false)
}

fn udp_frame() -> Vec<u8> {
    ipv4_frame(L4::Udp { src: 5353, dst: 5353 }, 64, 120, true)
}

fn memory() -> (MemorySink, Vec<Box<dyn ResultSink>>) {
    let sink = MemorySink::new();
    let sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(sink.clone())];
    (sink, sinks)
}

#[test]
fn tcp_packet_is_classified_malicious() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(tcp_frame())]);
    let (sink, sinks) = memory();

    let mut pipeline = Pipeline::new(fx.config.clone(), backend);
    let summary = pipeline.run(sinks).unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfInput));
    assert_eq!(summary.interface, "replay0");

    let results = sink.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].feature_vector.to_array(), [443.0, 51000.0, 20.0, 1500.0, 0.0]);
    assert_eq!(results[0].label, Label::Malicious);
    assert_eq!(results[0].class, 0);
    assert!(results[0].score > 0.5);
}

#[test]
fn udp_packet_with_dont_fragment_is_normal() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(udp_frame())]);
    let (sink, sinks) = memory();

    Pipeline::new(fx.config.clone(), backend).run(sinks).unwrap();

    let results = sink.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].feature_vector.to_array(), [5353.0, 5353.0, 64.0, 120.0, 1.0]);
    assert_eq!(results[0].label, Label::Normal);
}

#[test]
fn results_follow_capture_order() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![
        ReplayEvent::ethernet(udp_frame()),
        ReplayEvent::Idle,
        ReplayEvent::ethernet(tcp_frame()),
        ReplayEvent::Frame(LinkType::RawIp, udp_frame()[14..].to_vec()),
    ]);
    let (sink, sinks) = memory();

    let summary = Pipeline::new(fx.config.clone(), backend).run(sinks).unwrap();

    let labels: Vec<Label> = sink.results().iter().map(|r| r.label).collect();
    assert_eq!(labels, [Label::Normal, Label::Malicious, Label::Normal]);
    assert_eq!(summary.emitted, 3);
    assert_eq!((summary.malicious, summary.normal), (1, 2));
}

#[test]
fn non_ip_frames_produce_no_result() {
    let fx = fixture();
    let config = DetectorConfig {
        filter: String::new(),
        ..fx.config.clone()
    };
    let backend = ReplayBackend::scripted(vec![
        ReplayEvent::ethernet(arp_frame()),
        ReplayEvent::ethernet(tcp_frame()),
    ]);
    let (sink, sinks) = memory();

    let summary = Pipeline::new(config, backend).run(sinks).unwrap();

    assert_eq!(summary.received, 2);
    assert_eq!(summary.skipped_no_ip, 1);
    assert_eq!(sink.len(), 1);
}

#[test]
fn default_filter_counts_non_ip_as_filtered() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![
        ReplayEvent::ethernet(arp_frame()),
        ReplayEvent::ethernet(arp_frame()),
        ReplayEvent::ethernet(udp_frame()),
    ]);
    let (sink, sinks) = memory();

    let summary = Pipeline::new(fx.config.clone(), backend).run(sinks).unwrap();

    assert_eq!(summary.filtered, 2);
    assert_eq!(summary.received, 1);
    assert_eq!(sink.len(), 1);
}

#[test]
fn malformed_packet_does_not_stop_the_stream() {
    let fx = fixture();
    let mut broken = tcp_frame();
    broken[14] = 0x43;
    let backend = ReplayBackend::scripted(vec![
        ReplayEvent::ethernet(udp_frame()),
        ReplayEvent::ethernet(broken),
        ReplayEvent::ethernet(tcp_frame()),
    ]);
    let (sink, sinks) = memory();

    let summary = Pipeline::new(fx.config.clone(), backend).run(sinks).unwrap();

    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.emitted, 2);
    let labels: Vec<Label> = sink.results().iter().map(|r| r.label).collect();
    assert_eq!(labels, [Label::Normal, Label::Malicious]);
}

#[test]
fn missing_model_fails_before_capture() {
    let fx = fixture();
    let config = DetectorConfig {
        model_path: PathBuf::from("/nonexistent/logistic_model.json"),
        ..fx.config.clone()
    };
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(tcp_frame())]);
    let (sink, sinks) = memory();

    let mut pipeline = Pipeline::new(config, backend);
    let err = pipeline.run(sinks).unwrap_err();

    assert!(matches!(err, PipelineError::Load(LoadError::ModelFileMissing(_))));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(pipeline.state(), PipelineState::Error);
    assert!(sink.is_empty());
}

#[test]
fn missing_scaler_fails_before_capture() {
    let fx = fixture();
    let config = DetectorConfig {
        scaler_path: PathBuf::from("/nonexistent/scaler.json"),
        ..fx.config.clone()
    };
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(tcp_frame())]);
    let (_sink, sinks) = memory();

    let mut pipeline = Pipeline::new(config, backend);
    let err = pipeline.run(sinks).unwrap_err();

    assert!(matches!(err, PipelineError::Load(LoadError::ScalerFileMissing(_))));
    assert_eq!(pipeline.state(), PipelineState::Error);
}

#[test]
fn bad_feature_columns_are_a_config_error() {
    let fx = fixture();
    let mut config = fx.config.clone();
    config.feature_columns.swap(0, 1);
    let backend = ReplayBackend::scripted(vec![]);
    let (_sink, sinks) = memory();

    let err = Pipeline::new(config, backend).run(sinks).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn packet_limit_stops_the_run() {
    let fx = fixture();
    let config = DetectorConfig {
        packet_limit: Some(2),
        ..fx.config.clone()
    };
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(tcp_frame()); 5]);
    let (sink, sinks) = memory();

    let summary = Pipeline::new(config, backend).run(sinks).unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::PacketLimit));
    assert_eq!(summary.received, 2);
    assert_eq!(sink.len(), 2);
}

#[test]
fn stop_handle_interrupts_before_the_next_packet() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(tcp_frame()); 3]);
    let (sink, sinks) = memory();

    let mut pipeline = Pipeline::new(fx.config.clone(), backend);
    pipeline.stop_handle().stop();
    let summary = pipeline.run(sinks).unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(sink.is_empty());
}

#[test]
fn isolated_transient_errors_are_absorbed() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![
        ReplayEvent::TransientError,
        ReplayEvent::TransientError,
        ReplayEvent::ethernet(tcp_frame()),
        ReplayEvent::TransientError,
        ReplayEvent::ethernet(udp_frame()),
    ]);
    let (sink, sinks) = memory();

    let summary = Pipeline::new(fx.config.clone(), backend).run(sinks).unwrap();

    assert_eq!(summary.transient_errors, 3);
    assert_eq!(sink.len(), 2);
}

#[test]
fn repeated_transient_errors_end_the_run() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![
        ReplayEvent::ethernet(tcp_frame()),
        ReplayEvent::TransientError,
        ReplayEvent::TransientError,
        ReplayEvent::TransientError,
        ReplayEvent::ethernet(udp_frame()),
    ]);
    let (sink, sinks) = memory();

    let mut pipeline = Pipeline::new(fx.config.clone(), backend);
    let err = pipeline.run(sinks).unwrap_err();

    assert!(matches!(err, PipelineError::CaptureLost(CaptureError::Transient { .. })));
    assert_eq!(err.exit_code(), 6);
    assert_eq!(pipeline.state(), PipelineState::Error);
    // results emitted before the failure are still delivered
    assert_eq!(sink.len(), 1);
}

#[test]
fn device_loss_flushes_and_reports() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![
        ReplayEvent::ethernet(tcp_frame()),
        ReplayEvent::ethernet(udp_frame()),
        ReplayEvent::DeviceLost,
        ReplayEvent::ethernet(tcp_frame()),
    ]);
    let (sink, sinks) = memory();

    let err = Pipeline::new(fx.config.clone(), backend)
        .run(sinks)
        .unwrap_err();

    assert!(matches!(err, PipelineError::CaptureLost(CaptureError::DeviceLost { .. })));
    assert_eq!(sink.len(), 2);
}

#[test]
fn no_interfaces_is_fatal() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![]).with_interfaces(vec![]);
    let (_sink, sinks) = memory();

    let mut pipeline = Pipeline::new(fx.config.clone(), backend);
    let err = pipeline.run(sinks).unwrap_err();

    assert!(matches!(err, PipelineError::NoInterfaceFound { .. }));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn ethernet_interface_is_preferred() {
    let fx = fixture();
    let lo = InterfaceInfo {
        is_loopback: true,
        ..InterfaceInfo::named("lo")
    };
    let backend = ReplayBackend::scripted(vec![])
        .with_interfaces(vec![lo, InterfaceInfo::named("wlan0"), InterfaceInfo::named("enp3s0")]);
    let (_sink, sinks) = memory();

    let summary = Pipeline::new(fx.config.clone(), backend).run(sinks).unwrap();
    assert_eq!(summary.interface, "enp3s0");
}

#[test]
fn pipeline_runs_only_once() {
    let fx = fixture();
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(tcp_frame())]);

    let mut pipeline = Pipeline::new(fx.config.clone(), backend);
    let (_sink, sinks) = memory();
    pipeline.run(sinks).unwrap();
    assert!(pipeline.artifact().is_some());

    let (_sink, sinks) = memory();
    let err = pipeline.run(sinks).unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyRan));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn preloaded_artifact_runs_and_appends_to_existing_csv() {
    let fx = fixture();
    let csv_path = fx.dir.path().join("detections.csv");
    let earlier = "Timestamp,Source Port,Destination Port,TTL,Length,Flags,Prediction,Score,Summary\n\
                   earlier,1,2,3,4,0,Normal,0.6,earlier run\n";
    fs::write(&csv_path, earlier).unwrap();

    let artifact = model::load(&fx.config.model_path, &fx.config.scaler_path).unwrap();
    let sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(CsvSink::append(&csv_path).unwrap())];
    let backend = ReplayBackend::scripted(vec![ReplayEvent::ethernet(tcp_frame())]);
    let mut config = fx.config.clone();
    config.model_path = fx.dir.path().join("gone.json");

    let mut pipeline = Pipeline::new(config, backend).with_artifact(artifact);
    let summary = pipeline.run(sinks).unwrap();
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfInput));

    let text = fs::read_to_string(&csv_path).unwrap();
    assert!(text.starts_with(earlier));
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[2].contains(",443,51000,20,1500,0,Malicious,"));
}

#[test]
fn pcap_replay_end_to_end() {
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use pcap_file::DataLink;

    let fx = fixture();
    let path = fx.dir.path().join("capture.pcap");
    {
        let file = fs::File::create(&path).unwrap();
        let header = PcapHeader {
            datalink: DataLink::ETHERNET,
            ..Default::default()
        };
        let mut writer = PcapWriter::with_header(file, header).unwrap();
        for frame in [tcp_frame(), udp_frame()] {
            let packet = PcapPacket::new(Duration::from_secs(1), frame.len() as u32, &frame);
            writer.write_packet(&packet).unwrap();
        }
    }

    let (sink, sinks) = memory();
    let summary = Pipeline::new(fx.config.clone(), ReplayBackend::pcap(&path))
        .run(sinks)
        .unwrap();

    assert_eq!(summary.stop_reason, Some(StopReason::EndOfInput));
    let labels: Vec<Label> = sink.results().iter().map(|r| r.label).collect();
    assert_eq!(labels, [Label::Malicious, Label::Normal]);
}
