//! Property-based tests for catalog ordering and transform idempotence.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::catalog::Catalog;
    use crate::normalize::strip_crlf;
    use crate::transforms::reductions::rewrite_source;
    use crate::transforms::ReductionOp;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_catalog(names: &BTreeSet<String>) -> (TempDir, Vec<PathBuf>) {
        let temp = TempDir::new().unwrap();
        let paths = names
            .iter()
            .map(|name| {
                let path = temp.path().join(format!("{}.patch", name));
                fs::write(&path, format!("--- a/{0}\n+++ b/{0}\n", name)).unwrap();
                path
            })
            .collect();
        (temp, paths)
    }

    // ============================================================================
    // Catalog ordering
    // ============================================================================

    proptest! {
        /// Property: the application order does not depend on discovery order
        #[test]
        fn catalog_order_is_independent_of_input_order(
            (names, shuffled) in prop::collection::btree_set("[a-zA-Z0-9_-]{1,12}", 1..12)
                .prop_flat_map(|names| {
                    let list: Vec<String> = names.iter().cloned().collect();
                    (Just(names), Just(list).prop_shuffle())
                })
        ) {
            let (_temp, paths) = write_catalog(&names);
            let by_name: Vec<PathBuf> = shuffled
                .iter()
                .map(|n| paths.iter().find(|p| p.ends_with(format!("{}.patch", n))).unwrap().clone())
                .collect();

            let sorted = Catalog::from_paths(paths.clone(), ".patch").unwrap();
            let permuted = Catalog::from_paths(by_name, ".patch").unwrap();

            let ids = |c: &Catalog| c.patches().iter().map(|p| p.id.clone()).collect::<Vec<_>>();
            prop_assert_eq!(ids(&sorted), ids(&permuted));
        }

        /// Property: ordinals are dense and follow byte-wise name order
        #[test]
        fn catalog_ordinals_follow_bytewise_order(
            names in prop::collection::btree_set("[a-zA-Z0-9_-]{1,12}", 1..12)
        ) {
            let (_temp, paths) = write_catalog(&names);
            let catalog = Catalog::from_paths(paths, ".patch").unwrap();

            let mut expected: Vec<String> = names.into_iter().collect();
            expected.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            for (i, patch) in catalog.patches().iter().enumerate() {
                prop_assert_eq!(patch.ordinal, i);
                prop_assert_eq!(&patch.id, &expected[i]);
            }
        }
    }

    // ============================================================================
    // Idempotence
    // ============================================================================

    fn call_site() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("r.Sum(x)".to_string()),
            Just("r.Sum(x, n)".to_string()),
            Just("p->Max(v[i])".to_string()),
            Just("r.Reduce(x, cub::Min())".to_string()),
            Just("r.Reduce(x, cuda::std::plus<>())".to_string()),
            Just("f(a, b)".to_string()),
            Just("// r.Sum(y)\n".to_string()),
            Just("\"r.Max(s)\"".to_string()),
            "[a-z ;\n]{0,6}",
        ]
    }

    proptest! {
        /// Property: the reduction sweep reaches a fixed point in one pass
        #[test]
        fn reduction_sweep_is_idempotent(
            parts in prop::collection::vec(call_site(), 0..8)
        ) {
            let src = parts.join(";\n");
            let ops = ReductionOp::cub_defaults();
            let once = rewrite_source(&src, &ops).unwrap_or(src);
            prop_assert!(rewrite_source(&once, &ops).is_none());
        }

        /// Property: only the CR of each CRLF pair is removed
        #[test]
        fn strip_crlf_removes_only_paired_carriage_returns(input in prop::collection::vec(
            prop_oneof![Just(b'\r'), Just(b'\n'), Just(b'a'), Just(0u8)], 0..64
        )) {
            let stripped = strip_crlf(&input);
            let pairs = input.windows(2).filter(|w| *w == b"\r\n").count();
            prop_assert_eq!(stripped.len(), input.len() - pairs);

            let without_cr = |bytes: &[u8]| bytes.iter().copied().filter(|&b| b != b'\r').collect::<Vec<_>>();
            prop_assert_eq!(without_cr(&stripped), without_cr(&input));
        }
    }
}
