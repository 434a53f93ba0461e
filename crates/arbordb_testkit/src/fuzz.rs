//! Fuzz testing harnesses for ArborDB decoders.
//!
//! Every target feeds untrusted bytes to a decoder. Decoding may fail but
//! must never panic, and whatever decodes must re-encode to the same value.

use arbordb_codec::{decode_candidate, encode_candidate};
use arbordb_core::{Payload, PayloadConfig, ShardSnapshot};

/// Fuzz target for tree candidate decoding.
pub fn fuzz_candidate_decode(data: &[u8]) {
    if let Ok((candidate, version)) = decode_candidate(data) {
        let encoded = encode_candidate(&candidate, version).expect("re-encode candidate");
        let (decoded, _) = decode_candidate(&encoded).expect("decode re-encoded candidate");
        assert_eq!(decoded, candidate, "candidate roundtrip mismatch");
    }
}

/// Fuzz target for framed payload decoding.
///
/// Commit payloads decode their candidate lazily, so the candidate is
/// forced as well.
pub fn fuzz_payload_decode(data: &[u8]) {
    let config = PayloadConfig::default();
    let mut input = data;
    while !input.is_empty() {
        let Ok(payload) = Payload::read_from(&mut input, &config) else {
            return;
        };
        if let Payload::Commit(commit) = &payload {
            let _ = commit.candidate();
        }
        let encoded = payload.to_bytes().expect("re-encode payload");
        assert_eq!(encoded.len(), payload.framed_size());
    }
}

/// Fuzz target for snapshot decoding.
pub fn fuzz_snapshot_decode(data: &[u8]) {
    if let Ok(snapshot) = ShardSnapshot::deserialize(data) {
        let encoded = snapshot.serialize().expect("re-encode snapshot");
        let decoded = ShardSnapshot::deserialize(&encoded).expect("decode re-encoded snapshot");
        assert_eq!(decoded.root(), snapshot.root(), "snapshot roundtrip mismatch");
    }
}

/// Flips one bit of `data` for every position and runs `target` on each
/// variant.
pub fn fuzz_bit_flips(data: &[u8], target: impl Fn(&[u8])) {
    let mut mutated = data.to_vec();
    for index in 0..mutated.len() * 8 {
        let mask = 1u8 << (index % 8);
        mutated[index / 8] ^= mask;
        target(&mutated);
        mutated[index / 8] ^= mask;
    }
}

/// Runs `target` on every prefix of `data`.
pub fn fuzz_truncations(data: &[u8], target: impl Fn(&[u8])) {
    for len in 0..data.len() {
        target(&data[..len]);
    }
}
