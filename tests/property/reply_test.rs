// tests/property/reply_test.rs

//! Property-based tests for reply decoding
//! Arbitrary bytes must decode or fail cleanly, never panic

use bytes::Bytes;
use fileseal::core::FileSealError;
use fileseal::core::protocol::payload::{
    decode_activity_reply, decode_batch_reply, decode_inventory_reply,
};
use proptest::prelude::*;

fn is_clean(result: Result<(), FileSealError>) -> bool {
    matches!(
        result,
        Ok(()) | Err(FileSealError::MalformedReply(_)) | Err(FileSealError::OutOfMemory)
    )
}

proptest! {
    #[test]
    fn test_garbage_never_panics(raw in prop::collection::vec(any::<u8>(), 0..256)) {
        let raw = Bytes::from(raw);
        prop_assert!(is_clean(decode_batch_reply(raw.clone()).map(|_| ())));
        prop_assert!(is_clean(decode_inventory_reply(raw.clone()).map(|_| ())));
        prop_assert!(is_clean(decode_activity_reply(raw).map(|_| ())));
    }
}
