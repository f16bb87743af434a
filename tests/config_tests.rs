// Tests for configuration loading.

use callstream::Config;
use std::time::Duration;

#[test]
fn test_default_config_file_loads() {
    let config = Config::load("config/callstream").unwrap();

    assert!(config.stream.url.starts_with("ws://"));
    assert_eq!(config.audio.native_sample_rate, 48_000);
    assert_eq!(config.reconnect.max_attempts, 5);
    assert!(!config.recording.enabled);
}

#[test]
fn test_session_config_assembly() {
    let config = Config::load("config/callstream").unwrap();
    let session = config.session_config();

    assert_eq!(session.transport.url, config.stream.url);
    assert_eq!(session.transport.connect_timeout, Duration::from_secs(10));
    assert_eq!(session.capture.native_rate, 48_000);
    assert_eq!(session.playback.lead_time, Duration::from_millis(100));
    assert_eq!(session.playback.max_queued, 256);
    assert_eq!(session.reconnect.base_delay, Duration::from_millis(1_000));
    assert_eq!(session.reconnect.max_delay, Duration::from_millis(30_000));
    assert_eq!(session.turn.hang_time, Duration::from_millis(1_200));
    assert!(session.recording_dir.is_none());
}
