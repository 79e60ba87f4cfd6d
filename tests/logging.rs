use std::time::Duration;

use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use pcm_loopback::audio::{Capability, VirtualBackend};
use pcm_loopback::loopback::{loopback_test, LoopbackConfig};

/// Keeps every `info` line emitted by the crate.
struct Recorder;

lazy_static! {
    static ref LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());
}

impl Log for Recorder {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            LINES.lock().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static RECORDER: Recorder = Recorder;

fn take_lines() -> Vec<String> {
    std::mem::take(&mut *LINES.lock())
}

// One test per binary: the logger is process-wide.
#[test]
fn test_dominant_frequency_is_only_reported_when_detected() {
    log::set_logger(&RECORDER).unwrap();
    log::set_max_level(LevelFilter::Info);

    let config = LoopbackConfig::new(0.2, 48000).unwrap().with_attempts(1);

    let deaf = VirtualBackend::builder()
        .device("a", Capability::Both)
        .silence_pacing(Duration::from_millis(1))
        .build();
    take_lines();
    assert!(!loopback_test::<i16, _>(&deaf, &config, "a", "a"));
    let lines = take_lines();
    assert!(
        lines.iter().all(|l| !l.starts_with("Dominant frequency")),
        "{:?}",
        lines
    );
    assert!(lines.iter().all(|l| !l.starts_with("Deviation")), "{:?}", lines);

    let cabled = VirtualBackend::builder()
        .device("hw:spk", Capability::Playback)
        .device("hw:mic", Capability::Capture)
        .cable("hw:spk", "hw:mic")
        .build();
    assert!(loopback_test::<i16, _>(&cabled, &config, "hw:mic", "hw:spk"));
    let lines = take_lines();
    assert_eq!(
        lines
            .iter()
            .filter(|l| l.starts_with("Dominant frequency"))
            .count(),
        1,
        "{:?}",
        lines
    );
    assert!(lines.iter().any(|l| l.starts_with("Deviation")), "{:?}", lines);
}
