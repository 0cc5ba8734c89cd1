use certbatch::column::{column_index, column_letter, Column};
use certbatch::config::CleanupRules;
use certbatch::normalize::{comparison_key, NameNormalizer};
use certbatch::pipeline::distribute::distribute;
use proptest::prelude::*;
use proptest::test_runner::Config;

/// Names mixing Arabic and Latin letters, titles, initials and punctuation.
fn raw_name() -> impl Strategy<Value = String> {
    let token = prop_oneof![
        Just("د.".to_string()),
        Just("دكتور".to_string()),
        Just("Dr.".to_string()),
        Just("أ".to_string()),
        Just("م/".to_string()),
        Just("-".to_string()),
        "[ا-ي]{1,6}",
        "[A-Za-z]{1,6}",
    ];
    prop::collection::vec(token, 0..6).prop_map(|tokens| tokens.join(" "))
}

proptest! {
    #![proptest_config(Config::with_cases(256))]

    #[test]
    fn normalising_twice_changes_nothing(raw in raw_name()) {
        let normalizer = NameNormalizer::new(&CleanupRules::default());
        let once = normalizer.normalize(&raw);
        prop_assert_eq!(normalizer.normalize(&once), once);
    }

    #[test]
    fn normalised_names_have_no_edge_whitespace(raw in raw_name()) {
        let out = NameNormalizer::new(&CleanupRules::default()).normalize(&raw);
        prop_assert_eq!(out.trim(), out.as_str());
        prop_assert!(!out.contains("  "));
    }

    #[test]
    fn disabled_rules_leave_input_alone(raw in ".{0,40}") {
        let out = NameNormalizer::new(&CleanupRules::disabled()).normalize(&raw);
        prop_assert_eq!(out, raw);
    }

    #[test]
    fn comparison_key_is_stable(raw in raw_name()) {
        let key = comparison_key(&raw);
        prop_assert_eq!(comparison_key(&key), key);
    }

    #[test]
    fn column_letters_round_trip(index in 0_usize..20_000) {
        let letter = column_letter(index);
        prop_assert_eq!(column_index(&letter), Some(index));
        prop_assert_eq!(letter.parse::<Column>().map(|c| c.index()).ok(), Some(index));
    }

    #[test]
    fn distribution_is_fair_and_complete(len in 0_usize..300, workers in 1_usize..12) {
        let items: Vec<usize> = (0..len).collect();
        let buckets = distribute(items, workers);
        prop_assert_eq!(buckets.len(), workers);

        let sizes: Vec<usize> = buckets.iter().map(Vec::len).collect();
        let max = sizes.iter().copied().max().unwrap_or(0);
        let min = sizes.iter().copied().min().unwrap_or(0);
        prop_assert!(max - min <= 1);

        for (w, bucket) in buckets.iter().enumerate() {
            prop_assert!(bucket.windows(2).all(|p| p[0] < p[1]));
            prop_assert!(bucket.iter().all(|i| i % workers == w));
        }

        let mut all: Vec<usize> = buckets.into_iter().flatten().collect();
        all.sort_unstable();
        prop_assert_eq!(all, (0..len).collect::<Vec<_>>());
    }
}
