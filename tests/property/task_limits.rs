//! Property tests for task field limits and the bounded execution log.
//!
//! Uses proptest to verify:
//! 1. The execution log never exceeds its capacity and keeps the newest lines in order.
//! 2. Title validation accepts exactly the titles within the UTF-16 length limit.
//! 3. Random bytes never cause a panic in the RPC decoders.

use missionctl_proto::rpc;
use missionctl_proto::task::{
    EXECUTION_LOG_CAPACITY, ExecutionLogEntry, LogEntryKind, MAX_TITLE_LENGTH, append_bounded,
};
use missionctl_proto::validate::{Field, ValidationError, check_title};
use proptest::prelude::*;

/// Strategy for generating arbitrary `LogEntryKind` values.
fn arb_log_kind() -> impl Strategy<Value = LogEntryKind> {
    prop_oneof![
        Just(LogEntryKind::Command),
        Just(LogEntryKind::Output),
        Just(LogEntryKind::Error),
        Just(LogEntryKind::Info),
    ]
}

proptest! {
    #[test]
    fn log_is_bounded_and_keeps_newest(appends in 0usize..2_500, kind in arb_log_kind()) {
        let mut log = Vec::new();
        for i in 0..appends {
            append_bounded(
                &mut log,
                ExecutionLogEntry::new(i as u64, kind, format!("line {i}")),
                EXECUTION_LOG_CAPACITY,
            );
            prop_assert!(log.len() <= EXECUTION_LOG_CAPACITY);
        }

        let expected_len = appends.min(EXECUTION_LOG_CAPACITY);
        prop_assert_eq!(log.len(), expected_len);
        let first_kept = (appends - expected_len) as u64;
        for (offset, entry) in log.iter().enumerate() {
            prop_assert_eq!(entry.timestamp, first_kept + offset as u64);
        }
    }

    #[test]
    fn small_capacities_keep_suffix(capacity in 1usize..16, appends in 0usize..64) {
        let mut log = Vec::new();
        for i in 0..appends {
            append_bounded(
                &mut log,
                ExecutionLogEntry::new(i as u64, LogEntryKind::Info, ""),
                capacity,
            );
        }
        let stamps: Vec<u64> = log.iter().map(|e| e.timestamp).collect();
        let expected: Vec<u64> = (appends.saturating_sub(capacity)..appends)
            .map(|i| i as u64)
            .collect();
        prop_assert_eq!(stamps, expected);
    }

    #[test]
    fn titles_within_limit_are_accepted(title in "[a-zA-Z0-9éß漢 ]{0,199}[a-z]") {
        prop_assert!(check_title(&title).is_ok());
    }

    #[test]
    fn titles_over_limit_are_rejected(extra in 1usize..300, ch in "[a-zé漢]") {
        let title = ch.repeat(MAX_TITLE_LENGTH + extra);
        prop_assert_eq!(
            check_title(&title),
            Err(ValidationError::TooLong { field: Field::Title, max: MAX_TITLE_LENGTH })
        );
    }

    #[test]
    fn astral_titles_are_measured_in_utf16_units(count in 1usize..200) {
        let title = "\u{1F680}".repeat(count);
        if count * 2 <= MAX_TITLE_LENGTH {
            prop_assert!(check_title(&title).is_ok());
        } else {
            prop_assert!(check_title(&title).is_err());
        }
    }

    #[test]
    fn decode_random_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = rpc::decode_client(&bytes);
        let _ = rpc::decode_server(&bytes);
    }
}
