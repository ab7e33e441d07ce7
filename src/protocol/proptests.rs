//! Property-based tests for the token grammar

use super::*;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_verb() -> impl Strategy<Value = Verb> {
    proptest::sample::select(Verb::ALL.to_vec())
}

fn arb_weekday() -> impl Strategy<Value = Weekday> {
    proptest::sample::select(vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ])
}

fn arb_choice() -> impl Strategy<Value = String> {
    prop_oneof![
        (0i64..100_000).prop_map(|id| id.to_string()),
        (2000i32..2100, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| {
            format_date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
        }),
        Just(CONFIRM_MARK.to_string()),
        (0i64..1000).prop_map(|id| CancelItem::Offer(id).to_string()),
        (0i64..1000).prop_map(|id| CancelItem::Claim(id).to_string()),
    ]
}

fn arb_command() -> impl Strategy<Value = (Verb, Vec<String>)> {
    (arb_verb(), proptest::collection::vec(arb_choice(), 0..5))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_back_then_extend_round_trips((verb, choices) in arb_command(), cut in 0usize..5) {
        let data = choices.iter().fold(verb.to_string(), |data, c| extend(&data, c));
        let cut = cut.min(choices.len());

        let prefix = back(&data, cut).expect("verb always survives");
        let rebuilt = choices[choices.len() - cut..]
            .iter()
            .fold(prefix, |data, c| extend(&data, c));
        prop_assert_eq!(rebuilt, data);
    }

    #[test]
    fn prop_back_never_removes_the_verb((verb, choices) in arb_command()) {
        let data = choices.iter().fold(verb.to_string(), |data, c| extend(&data, c));
        prop_assert_eq!(back(&data, choices.len()), Some(verb.to_string()));
        prop_assert_eq!(back(&data, choices.len() + 1), None);
    }

    #[test]
    fn prop_decode_counts_tokens((verb, choices) in arb_command()) {
        let data = choices.iter().fold(verb.to_string(), |data, c| extend(&data, c));
        let command = decode(&data).unwrap();
        prop_assert_eq!(command.verb, verb);
        prop_assert_eq!(command.arity(), choices.len() + 1);
    }

    #[test]
    fn prop_non_numeric_ids_rejected(token in "[^0-9]*|[0-9]*[^0-9]+[0-9]*") {
        prop_assert_eq!(parse_id(&token), Err(ProtocolError::BadId(token.clone())));
    }

    #[test]
    fn prop_numeric_ids_accepted(id in 0i64..i64::MAX) {
        prop_assert_eq!(parse_id(&id.to_string()), Ok(id));
    }

    #[test]
    fn prop_dates_round_trip(days in 0u64..40_000) {
        let date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap() + Days::new(days);
        prop_assert_eq!(parse_date(&format_date(date)), Ok(date));
    }

    #[test]
    fn prop_upcoming_dates_share_the_weekday(days in 0u64..4000, weekday in arb_weekday()) {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Days::new(days);
        let dates = upcoming_dates(today, weekday, DATE_CHOICES);

        prop_assert_eq!(dates.len(), DATE_CHOICES);
        prop_assert!(dates[0] >= today);
        prop_assert!(dates[0] < today + Days::new(7));
        for pair in dates.windows(2) {
            prop_assert_eq!(pair[1] - pair[0], chrono::Duration::days(7));
        }
        prop_assert!(dates.iter().all(|d| d.weekday() == weekday));
    }
}
