use ordmnar::{
    ImputationEnsemble, ImputedMember, MnarError, ShiftTable, ThresholdShiftRelabeler,
};
use polars::prelude::*;

fn col_i64(df: &DataFrame, name: &str) -> Vec<i64> {
    df.column(name)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .map(Option::unwrap)
        .collect()
}

/// Applies the half-open threshold rule, the same convention the relabeler
/// must honor.
fn categorize(score: f64, thresholds: &[f64], level_count: usize) -> i64 {
    for (kdx, &cut) in thresholds.iter().enumerate() {
        if score <= cut {
            return kdx as i64 + 1;
        }
    }
    level_count as i64
}

/// One-member ensemble whose MAR labels were produced from the given latent
/// scores through the given thresholds.
fn ensemble_from_latents(
    latents: &[f64],
    thresholds: &[f64],
    level_count: usize,
) -> ImputationEnsemble {
    let labels: Vec<i64> = latents
        .iter()
        .map(|&score| categorize(score, thresholds, level_count))
        .collect();
    let ids: Vec<i64> = (0..latents.len() as i64).collect();
    let data = df!(
        "id" => ids,
        "sev_done" => labels
    )
    .unwrap();
    let member = ImputedMember::new(data, thresholds.to_vec(), latents.to_vec()).unwrap();
    ImputationEnsemble::from_members(vec![member], "sev_done", level_count).unwrap()
}

#[test]
fn zero_shifts_and_zero_noise_reproduce_the_mar_labels_exactly() {
    let thresholds = [-1.0, 0.0, 1.0];
    let latents = [-2.5, -1.0, -0.4, 0.0, 0.3, 1.0, 1.8, -0.9, 2.4, 0.99];
    let ensemble = ensemble_from_latents(&latents, &thresholds, 4);
    let mask = vec![true; latents.len()];

    let mut shifts = ShiftTable::new(4);
    shifts.scenario("delta1", &[0.0, 0.0, 0.0]).unwrap();
    let mut relabeler = ThresholdShiftRelabeler::new(4);
    relabeler.noise(0.0, 0.0);
    let relabeled = relabeler.relabel(&ensemble, &mask, &shifts, 123).unwrap();

    let member = &relabeled.members()[0];
    assert_eq!(
        col_i64(member, "sev_done_delta1"),
        col_i64(member, "sev_done")
    );
    assert!(relabeled.unresolved().is_empty());
}

#[test]
fn observed_rows_are_never_altered() {
    let thresholds = [-0.5, 0.5];
    let latents: Vec<f64> = (0..60).map(|i| (i as f64 - 30.0) / 10.0).collect();
    let ensemble = ensemble_from_latents(&latents, &thresholds, 3);
    // every third row counts as originally missing
    let mask: Vec<bool> = (0..60).map(|i| i % 3 == 0).collect();

    let mut shifts = ShiftTable::new(3);
    shifts
        .scenario("down", &[-10.0, -10.0])
        .unwrap()
        .scenario("up", &[10.0, 10.0])
        .unwrap();
    let relabeled = ThresholdShiftRelabeler::new(3)
        .relabel(&ensemble, &mask, &shifts, 7)
        .unwrap();

    let member = &relabeled.members()[0];
    let mar = col_i64(member, "sev_done");
    for scenario in ["sev_done_down", "sev_done_up"] {
        let relabeled_values = col_i64(member, scenario);
        for i in 0..mask.len() {
            if !mask[i] {
                assert_eq!(relabeled_values[i], mar[i], "observed row {} changed", i);
            }
            assert!((1..=3).contains(&relabeled_values[i]));
        }
    }
}

#[test]
fn extreme_shifts_saturate_at_the_boundary_categories() {
    let thresholds = [-0.5, 0.5];
    let latents = vec![0.0; 40];
    let ensemble = ensemble_from_latents(&latents, &thresholds, 3);
    let mask = vec![true; 40];

    let mut shifts = ShiftTable::new(3);
    shifts
        .scenario("way_up", &[100.0, 100.0])
        .unwrap()
        .scenario("way_down", &[-100.0, -100.0])
        .unwrap();
    let relabeled = ThresholdShiftRelabeler::new(3)
        .relabel(&ensemble, &mask, &shifts, 5)
        .unwrap();

    let member = &relabeled.members()[0];
    assert!(col_i64(member, "sev_done_way_up").iter().all(|&v| v == 1));
    assert!(col_i64(member, "sev_done_way_down").iter().all(|&v| v == 3));
}

#[test]
fn the_same_seed_reproduces_the_same_labels() {
    let thresholds = [-0.5, 0.5];
    let latents = vec![0.0; 300];
    let ensemble = ensemble_from_latents(&latents, &thresholds, 3);
    let mask = vec![true; 300];
    let mut shifts = ShiftTable::new(3);
    shifts.scenario("delta1", &[0.1, -0.1]).unwrap();

    let first = ThresholdShiftRelabeler::new(3)
        .relabel(&ensemble, &mask, &shifts, 42)
        .unwrap();
    let second = ThresholdShiftRelabeler::new(3)
        .relabel(&ensemble, &mask, &shifts, 42)
        .unwrap();
    let third = ThresholdShiftRelabeler::new(3)
        .relabel(&ensemble, &mask, &shifts, 43)
        .unwrap();

    let a = col_i64(&first.members()[0], "sev_done_delta1");
    let b = col_i64(&second.members()[0], "sev_done_delta1");
    let c = col_i64(&third.members()[0], "sev_done_delta1");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn noise_is_drawn_independently_per_scenario() {
    // two scenarios with identical shifts: equal distributions, but the
    // fresh draws make identical label vectors essentially impossible
    let thresholds = [-0.5, 0.5];
    let latents = vec![0.0; 300];
    let ensemble = ensemble_from_latents(&latents, &thresholds, 3);
    let mask = vec![true; 300];
    let mut shifts = ShiftTable::new(3);
    shifts
        .scenario("first", &[0.0, 0.0])
        .unwrap()
        .scenario("second", &[0.0, 0.0])
        .unwrap();

    let relabeled = ThresholdShiftRelabeler::new(3)
        .relabel(&ensemble, &mask, &shifts, 11)
        .unwrap();
    let member = &relabeled.members()[0];
    assert_ne!(
        col_i64(member, "sev_done_first"),
        col_i64(member, "sev_done_second")
    );
}

#[test]
fn non_finite_scores_are_back_filled_and_counted() {
    let thresholds = [-0.5, 0.5];
    let mut latents = vec![0.0; 30];
    latents[4] = f64::NAN;
    latents[9] = f64::INFINITY;
    let labels: Vec<i64> = vec![2; 30];
    let ids: Vec<i64> = (0..30).collect();
    let data = df!("id" => ids, "sev_done" => labels).unwrap();
    let member = ImputedMember::new(data, thresholds.to_vec(), latents).unwrap();
    let ensemble = ImputationEnsemble::from_members(vec![member], "sev_done", 3).unwrap();
    let mask = vec![true; 30];

    let mut shifts = ShiftTable::new(3);
    shifts.scenario("delta1", &[0.0, 0.0]).unwrap();
    let relabeled = ThresholdShiftRelabeler::new(3)
        .relabel(&ensemble, &mask, &shifts, 77)
        .unwrap();

    assert_eq!(relabeled.unresolved().len(), 1);
    assert_eq!(relabeled.unresolved()[0].rows, 2);
    assert_eq!(relabeled.unresolved()[0].member, 0);
    let values = col_i64(&relabeled.members()[0], "sev_done_delta1");
    assert!(values.iter().all(|&v| (1..=3).contains(&v)));
}

#[test]
fn non_increasing_thresholds_are_rejected_not_sorted() {
    let data = df!("sev_done" => &[1_i64, 2, 3]).unwrap();
    let member = ImputedMember::new(data, vec![0.5, 0.2], vec![0.0, 0.0, 0.0]).unwrap();
    let ensemble = ImputationEnsemble::from_members(vec![member], "sev_done", 3).unwrap();
    let mut shifts = ShiftTable::new(3);
    shifts.scenario("delta1", &[0.0, 0.0]).unwrap();

    let result = ThresholdShiftRelabeler::new(3).relabel(&ensemble, &[true, true, true], &shifts, 1);
    assert!(matches!(result, Err(MnarError::InvalidThresholds(_))));
}

#[test]
fn a_mis_sized_threshold_vector_is_rejected() {
    let data = df!("sev_done" => &[1_i64, 2, 3]).unwrap();
    let member = ImputedMember::new(data, vec![0.0], vec![0.0, 0.0, 0.0]).unwrap();
    let ensemble = ImputationEnsemble::from_members(vec![member], "sev_done", 3).unwrap();
    let mut shifts = ShiftTable::new(3);
    shifts.scenario("delta1", &[0.0, 0.0]).unwrap();

    let result = ThresholdShiftRelabeler::new(3).relabel(&ensemble, &[true, true, true], &shifts, 1);
    assert!(matches!(result, Err(MnarError::InvalidThresholds(_))));
}

#[test]
fn shift_table_rejects_bad_scenarios() {
    let mut shifts = ShiftTable::new(4);
    assert!(matches!(
        shifts.scenario("short", &[0.0, 0.0]),
        Err(MnarError::Validation(_))
    ));
    shifts.scenario("ok", &[0.0, 0.0, 0.0]).unwrap();
    assert!(matches!(
        shifts.scenario("ok", &[0.1, 0.1, 0.1]),
        Err(MnarError::Validation(_))
    ));
    assert!(matches!(
        shifts.scenario("nan", &[f64::NAN, 0.0, 0.0]),
        Err(MnarError::Validation(_))
    ));
}

#[test]
fn a_mask_of_the_wrong_length_is_rejected() {
    let thresholds = [-0.5, 0.5];
    let latents = vec![0.0; 10];
    let ensemble = ensemble_from_latents(&latents, &thresholds, 3);
    let mut shifts = ShiftTable::new(3);
    shifts.scenario("delta1", &[0.0, 0.0]).unwrap();

    let result = ThresholdShiftRelabeler::new(3).relabel(&ensemble, &[true; 7], &shifts, 1);
    assert!(matches!(result, Err(MnarError::Validation(_))));
}
