//! Property tests for timestamp conversion and variant decoding.

use chrono::{TimeZone, Utc};
use evtail::variant::SLOT_SIZE;
use evtail::{Filetime, Variant, VariantArray, VariantBufferBuilder};
use proptest::prelude::*;

#[test]
fn test_filetime_zero_is_epoch() {
    assert_eq!(
        Filetime(0).to_datetime(),
        Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap()
    );
}

proptest! {
    #[test]
    fn prop_filetime_is_monotonic(a in any::<u64>(), b in any::<u64>()) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(Filetime(lo).to_datetime() <= Filetime(hi).to_datetime());
    }

    #[test]
    fn prop_filetime_keeps_tick_precision(ticks in 0u64..=u64::MAX / 2) {
        let back = Filetime::from_datetime(Filetime(ticks).to_datetime());
        prop_assert_eq!(back, Filetime(ticks));
    }

    #[test]
    fn prop_decode_never_panics(
        bytes in proptest::collection::vec(any::<u8>(), 0..512),
        count in 0u32..48,
    ) {
        let _ = VariantArray::decode(&bytes, count);
    }

    #[test]
    fn prop_decode_rejects_short_buffers(count in 1u32..32, short in 1usize..SLOT_SIZE) {
        let len = count as usize * SLOT_SIZE - short;
        let bytes = vec![0u8; len];
        prop_assert!(VariantArray::decode(&bytes, count).is_err());
    }

    #[test]
    fn prop_string_fields_survive_layout(
        fields in proptest::collection::vec("\\PC{0,24}", 1..12),
    ) {
        let values: Vec<Variant> = fields.iter().cloned().map(Variant::String).collect();
        let bytes = VariantBufferBuilder::from_values(values).encode();
        let array = VariantArray::decode(&bytes, fields.len() as u32).unwrap();

        prop_assert_eq!(array.len(), fields.len());
        for (ordinal, expected) in fields.iter().enumerate() {
            prop_assert_eq!(array.string(ordinal).unwrap(), expected.as_str());
        }
    }
}
