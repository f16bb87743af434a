// Unit tests for the fixed-size PCM frame codec.

use callstream::codec::{decode, encode, from_f32, to_f32, FRAME_BYTES, FRAME_SAMPLES};
use callstream::StreamError;

#[test]
fn test_roundtrip_within_quantization_error() {
    let input: Vec<f32> = (0..FRAME_SAMPLES)
        .map(|i| ((i as f32 / FRAME_SAMPLES as f32) * 2.0 - 1.0) * 0.9)
        .collect();

    let ints = from_f32(&input);
    let payload = encode(&ints);
    let decoded = to_f32(&decode(&payload).unwrap());

    assert_eq!(decoded.len(), input.len());
    for (a, b) in input.iter().zip(decoded.iter()) {
        // One int16 quantization step is 1/32768
        assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
    }
}

#[test]
fn test_out_of_range_input_saturates() {
    let ints = from_f32(&[3.5, -3.5, 1.0001, -1.0001]);
    assert_eq!(ints, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
}

#[test]
fn test_frame_is_exactly_160_bytes() {
    use base64::Engine;
    let payload = encode(&vec![-1i16; FRAME_SAMPLES]);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .unwrap();
    assert_eq!(bytes.len(), FRAME_BYTES);
}

#[test]
fn test_little_endian_sample_order() {
    use base64::Engine;
    let payload = encode(&[0x0102i16]);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .unwrap();
    assert_eq!(bytes, vec![0x02, 0x01]);
}

#[test]
fn test_odd_byte_length_fails_with_malformed_frame() {
    use base64::Engine;
    let payload = base64::engine::general_purpose::STANDARD.encode([0u8; 7]);
    match decode(&payload) {
        Err(StreamError::MalformedFrame(_)) => {}
        other => panic!("expected MalformedFrame, got {:?}", other),
    }
}

#[test]
fn test_invalid_base64_fails_with_malformed_frame() {
    match decode("not&base64!!") {
        Err(StreamError::MalformedFrame(_)) => {}
        other => panic!("expected MalformedFrame, got {:?}", other),
    }
}

#[test]
fn test_decode_accepts_any_even_length() {
    // Inbound frames are not required to be exactly 80 samples
    let payload = encode(&vec![7i16; 123]);
    assert_eq!(decode(&payload).unwrap().len(), 123);
}
