//! Property-based testing for the retrace engine
//!
//! Uses proptest to verify storage and aggregation invariants across
//! randomly generated inputs.

use proptest::prelude::*;
use retrace::store::ContentStore;
use retrace::{AggregatorCore, Category};
use tempfile::TempDir;

proptest! {
    /// Storing the same content twice always yields the same hash and
    /// exactly one physical blob, and the bytes round-trip unchanged.
    #[test]
    fn put_is_idempotent_and_round_trips(content in prop::collection::vec(any::<u8>(), 0..4096)) {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path().join("store")).unwrap();

        let first = store.put(&content).unwrap();
        let second = store.put(&content).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(store.iter_hashes().unwrap().len(), 1);
        prop_assert_eq!(store.read(&first).unwrap(), content.clone());
        prop_assert!(store.verify(&first, content.len() as u64));
    }

    /// Distinct contents never collide into one blob path.
    #[test]
    fn distinct_contents_get_distinct_blobs(
        a in prop::collection::vec(any::<u8>(), 0..512),
        b in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        prop_assume!(a != b);
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path().join("store")).unwrap();

        let ha = store.put(&a).unwrap();
        let hb = store.put(&b).unwrap();
        prop_assert_ne!(ha, hb);
        prop_assert_eq!(store.iter_hashes().unwrap().len(), 2);
    }

    /// The scan window formatter shows min(n, cap) names and appends the
    /// "and N more" suffix exactly when the window overflowed the cap.
    #[test]
    fn scan_window_formatting_is_exact(n in 1usize..40, cap in 1usize..10) {
        let mut core = AggregatorCore::new(cap);
        let names: Vec<String> = (1..=n).map(|i| format!("f{}", i)).collect();
        for name in &names {
            core.push(Category::ScanProgress, name.clone());
        }

        let flushed = core.flush(Category::ScanProgress).unwrap();
        prop_assert_eq!(flushed.count, n);

        if n <= cap {
            prop_assert_eq!(flushed.message, names.join(", "));
        } else {
            let expected = format!("{} and {} more", names[..cap].join(", "), n - cap);
            prop_assert_eq!(flushed.message, expected);
        }

        // The window reset with the flush.
        prop_assert!(core.flush(Category::ScanProgress).is_none());
    }
}
