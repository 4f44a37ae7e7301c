//! Fuzz target for peer reply decoding.
//!
//! Peer replies are untrusted input. This tests that decoding a batch reply
//! or a single-request instance record never panics, and that anything
//! that decodes survives a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use peer_replication::protocol::ReplicationListResponse;
use peer_replication::InstanceInfo;

fuzz_target!(|data: &[u8]| {
    // Should never panic
    if let Ok(reply) = serde_json::from_slice::<ReplicationListResponse>(data) {
        let encoded = serde_json::to_vec(&reply).expect("decoded reply re-encodes");
        let again: ReplicationListResponse =
            serde_json::from_slice(&encoded).expect("re-encoded reply decodes");
        assert_eq!(reply, again);
    }

    if let Ok(info) = serde_json::from_slice::<InstanceInfo>(data) {
        let _ = info.lease_renewal_secs();
        let _ = serde_json::to_string(&info);
    }
});
