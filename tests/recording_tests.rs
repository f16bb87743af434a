// Tests for the diagnostic WAV tap.

use callstream::audio::FrameTap;
use callstream::codec::FRAME_SAMPLES;

#[test]
fn test_tap_writes_exactly_the_frames_sent() {
    let dir = tempfile::tempdir().unwrap();

    let frame_a: Vec<i16> = (0..FRAME_SAMPLES as i16).collect();
    let frame_b: Vec<i16> = (0..FRAME_SAMPLES as i16).map(|i| -i).collect();

    let mut tap = FrameTap::create(dir.path(), "CStest").unwrap();
    tap.write_frame(&frame_a).unwrap();
    tap.write_frame(&frame_b).unwrap();
    assert_eq!(tap.frames_written(), 2);
    let path = tap.finish().unwrap();

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 8_000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
    let mut expected = frame_a;
    expected.extend_from_slice(&frame_b);
    assert_eq!(samples, expected);
}

#[test]
fn test_tap_finalizes_on_drop() {
    let dir = tempfile::tempdir().unwrap();

    let path = {
        let mut tap = FrameTap::create(dir.path(), "CSdrop").unwrap();
        tap.write_frame(&vec![100i16; FRAME_SAMPLES]).unwrap();
        tap.path().to_path_buf()
        // tap dropped here without finish()
    };

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.samples::<i16>().count(), FRAME_SAMPLES);
}

#[test]
fn test_tap_filenames_carry_the_stream_sid() {
    let dir = tempfile::tempdir().unwrap();
    let tap = FrameTap::create(dir.path(), "CSabc123").unwrap();
    let name = tap.path().file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("CSabc123-"));
    assert!(name.ends_with(".wav"));
}
