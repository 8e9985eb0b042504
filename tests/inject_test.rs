use ordmnar::{missing_mask, MissingnessInjector, MnarError};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn col_i64(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
    df.column(name)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .collect()
}

/// 1000 rows with a deterministic layout: outcome alternates 0/1 and the
/// severity cycles 1..=5, so every (outcome, level) pool has a known size.
fn deterministic_cohort() -> DataFrame {
    let n = 1000_i64;
    let ids: Vec<i64> = (0..n).collect();
    let outcomes: Vec<i64> = (0..n).map(|i| i % 2).collect();
    let severities: Vec<i64> = (0..n).map(|i| (i % 5) + 1).collect();
    df!(
        "id" => ids,
        "outcome" => outcomes,
        "severity" => severities
    )
    .unwrap()
}

fn expected_round(pool: usize, probability: f64) -> usize {
    let x = pool as f64 * probability;
    let floor = x.floor();
    if (x - floor - 0.5).abs() < 1e-9 {
        let f = floor as i64;
        (if f % 2 == 0 { f } else { f + 1 }) as usize
    } else {
        x.round() as usize
    }
}

#[test]
fn removal_counts_match_the_rounded_pool_fractions() {
    let df = deterministic_cohort();
    let outcomes = col_i64(&df, "outcome");
    let severities = col_i64(&df, "severity");
    let pool_a = (0..df.height())
        .filter(|&i| outcomes[i] == Some(1) && severities[i] == Some(2))
        .count();
    let pool_b = (0..df.height())
        .filter(|&i| outcomes[i] == Some(0) && severities[i] == Some(4))
        .count();
    assert!(pool_a > 0 && pool_b > 0);

    let mut rng = StdRng::seed_from_u64(2024);
    let injected = MissingnessInjector::new(df, "outcome", "severity")
        .group_a(&[2], 0.5)
        .group_b(&[4], 0.8)
        .id_column("id")
        .inject(&mut rng)
        .unwrap();

    let mask = missing_mask(&injected, "severity_mnar").unwrap();
    let total_missing = mask.iter().filter(|&&m| m).count();
    assert_eq!(
        total_missing,
        expected_round(pool_a, 0.5) + expected_round(pool_b, 0.8)
    );

    // no missing cell outside the two eligibility conditions
    let outcomes = col_i64(&injected, "outcome");
    let severities = col_i64(&injected, "severity");
    for i in 0..injected.height() {
        if mask[i] {
            let eligible_a = outcomes[i] == Some(1) && severities[i] == Some(2);
            let eligible_b = outcomes[i] == Some(0) && severities[i] == Some(4);
            assert!(eligible_a || eligible_b, "row {} was not eligible", i);
        }
    }
}

#[test]
fn the_original_column_is_left_untouched() {
    let df = deterministic_cohort();
    let before = col_i64(&df, "severity");
    let mut rng = StdRng::seed_from_u64(5);
    let injected = MissingnessInjector::new(df, "outcome", "severity")
        .group_a(&[1, 2], 0.7)
        .group_b(&[4, 5], 0.7)
        .inject(&mut rng)
        .unwrap();
    assert_eq!(col_i64(&injected, "severity"), before);
    // non-missing derived cells agree with the original column
    let derived = col_i64(&injected, "severity_mnar");
    for (original, copy) in before.iter().zip(derived.iter()) {
        if copy.is_some() {
            assert_eq!(copy, original);
        }
    }
}

#[test]
fn probability_boundaries_remove_nothing_or_everything() {
    let df = deterministic_cohort();
    let mut rng = StdRng::seed_from_u64(7);
    let untouched = MissingnessInjector::new(df.clone(), "outcome", "severity")
        .group_a(&[2], 0.0)
        .group_b(&[4], 0.0)
        .inject(&mut rng)
        .unwrap();
    let mask = missing_mask(&untouched, "severity_mnar").unwrap();
    assert_eq!(mask.iter().filter(|&&m| m).count(), 0);

    let outcomes = col_i64(&df, "outcome");
    let severities = col_i64(&df, "severity");
    let pool_a = (0..df.height())
        .filter(|&i| outcomes[i] == Some(1) && severities[i] == Some(2))
        .count();
    let drained = MissingnessInjector::new(df, "outcome", "severity")
        .group_a(&[2], 1.0)
        .inject(&mut rng)
        .unwrap();
    let mask = missing_mask(&drained, "severity_mnar").unwrap();
    assert_eq!(mask.iter().filter(|&&m| m).count(), pool_a);
}

#[test]
fn half_counts_round_to_even() {
    // pool of exactly 5 rows at probability 0.5: 2.5 rounds to 2
    let df = df!(
        "outcome" => &[1_i64, 1, 1, 1, 1, 0, 0, 0],
        "severity" => &[2_i64, 2, 2, 2, 2, 1, 1, 1]
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let injected = MissingnessInjector::new(df, "outcome", "severity")
        .group_a(&[2], 0.5)
        .inject(&mut rng)
        .unwrap();
    let mask = missing_mask(&injected, "severity_mnar").unwrap();
    assert_eq!(mask.iter().filter(|&&m| m).count(), 2);
}

#[test]
fn group_b_pass_runs_on_the_state_left_by_group_a() {
    // both groups target level 2; the outcome split keeps their pools
    // disjoint, and the sequential passes must still drain both fully
    let df = df!(
        "outcome" => &[1_i64, 1, 1, 1, 0, 0, 0, 0, 0, 0],
        "severity" => &[2_i64, 2, 2, 2, 2, 2, 2, 1, 1, 1]
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    let injected = MissingnessInjector::new(df, "outcome", "severity")
        .group_a(&[2], 1.0)
        .group_b(&[2], 1.0)
        .inject(&mut rng)
        .unwrap();
    let mask = missing_mask(&injected, "severity_mnar").unwrap();
    assert_eq!(mask.iter().filter(|&&m| m).count(), 7);
}

#[test]
fn stratified_injection_uses_per_stratum_probabilities() {
    let n = 400_i64;
    let ids: Vec<i64> = (0..n).collect();
    let outcomes: Vec<i64> = (0..n).map(|i| i % 2).collect();
    let severities: Vec<i64> = (0..n).map(|i| (i % 5) + 1).collect();
    let strata: Vec<&str> = (0..n).map(|i| if i < 200 { "east" } else { "west" }).collect();
    let df = df!(
        "id" => ids,
        "outcome" => outcomes,
        "severity" => severities,
        "site" => strata
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(31);
    let injected = MissingnessInjector::new(df.clone(), "outcome", "severity")
        .group_a(&[2], 0.0)
        .group_b(&[4], 0.0)
        .id_column("id")
        .strata("site", &[("east", 1.0, 0.0), ("west", 0.0, 1.0)])
        .inject(&mut rng)
        .unwrap();

    assert_eq!(injected.height(), df.height());
    // row identity survives the stratified recombine
    let mut ids_after: Vec<i64> = col_i64(&injected, "id").into_iter().flatten().collect();
    ids_after.sort_unstable();
    assert_eq!(ids_after, (0..n).collect::<Vec<i64>>());

    let outcomes = col_i64(&injected, "outcome");
    let severities = col_i64(&injected, "severity");
    let sites = injected.column("site").unwrap().as_materialized_series().clone();
    let sites = sites.str().unwrap();
    let mask = missing_mask(&injected, "severity_mnar").unwrap();

    let mut east_missing = 0;
    let mut west_missing = 0;
    let mut east_pool_a = 0;
    let mut west_pool_b = 0;
    for i in 0..injected.height() {
        let east = sites.get(i) == Some("east");
        if mask[i] {
            if east {
                east_missing += 1;
                // east only removes group A cells
                assert_eq!(outcomes[i], Some(1));
                assert_eq!(severities[i], Some(2));
            } else {
                west_missing += 1;
                assert_eq!(outcomes[i], Some(0));
                assert_eq!(severities[i], Some(4));
            }
        }
        if east && outcomes[i] == Some(1) && severities[i] == Some(2) {
            east_pool_a += 1;
        }
        if !east && outcomes[i] == Some(0) && severities[i] == Some(4) {
            west_pool_b += 1;
        }
    }
    assert_eq!(east_missing, east_pool_a);
    assert_eq!(west_missing, west_pool_b);
}

#[test]
fn preconditions_fail_fast_without_mutation() {
    let df = df!(
        "outcome" => &[1_i64, 0, 1],
        "severity" => &[1_i64, 2, 3]
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    let out_of_range = MissingnessInjector::new(df.clone(), "outcome", "severity")
        .group_a(&[2], 1.5)
        .inject(&mut rng);
    assert!(matches!(out_of_range, Err(MnarError::Validation(_))));

    let unknown_level = MissingnessInjector::new(df.clone(), "outcome", "severity")
        .group_a(&[9], 0.5)
        .inject(&mut rng);
    assert!(matches!(unknown_level, Err(MnarError::Validation(_))));

    let level_outside_declared_set = MissingnessInjector::new(df.clone(), "outcome", "severity")
        .levels(&[1, 2])
        .group_a(&[2], 0.5)
        .inject(&mut rng);
    assert!(matches!(
        level_outside_declared_set,
        Err(MnarError::Validation(_))
    ));

    let bad_outcome = df!(
        "outcome" => &[1_i64, 2, 0],
        "severity" => &[1_i64, 2, 3]
    )
    .unwrap();
    let not_binary = MissingnessInjector::new(bad_outcome, "outcome", "severity")
        .group_a(&[2], 0.5)
        .inject(&mut rng);
    assert!(matches!(not_binary, Err(MnarError::Validation(_))));

    let with_site = df!(
        "outcome" => &[1_i64, 0],
        "severity" => &[1_i64, 2],
        "site" => &["east", "west"]
    )
    .unwrap();
    let missing_stratum_entry = MissingnessInjector::new(with_site, "outcome", "severity")
        .group_a(&[1], 0.5)
        .strata("site", &[("east", 0.5, 0.5)])
        .inject(&mut rng);
    assert!(matches!(
        missing_stratum_entry,
        Err(MnarError::Validation(_))
    ));
}

#[test]
fn an_existing_output_column_is_rejected() {
    let df = df!(
        "outcome" => &[1_i64, 0],
        "severity" => &[1_i64, 2],
        "severity_mnar" => &[1_i64, 2]
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let clash = MissingnessInjector::new(df, "outcome", "severity")
        .group_a(&[1], 0.5)
        .inject(&mut rng);
    assert!(matches!(clash, Err(MnarError::Validation(_))));
}
