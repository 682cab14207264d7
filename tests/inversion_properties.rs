use approx::assert_relative_eq;
use qolrs::data::{Observation, Observations};
use qolrs::model::price_index;
use qolrs::simulation::{local_ties_observations, SyntheticBatch, SyntheticDesign};
use qolrs::{
    DomainViolation, InversionOptions, LocalTiesModel, ModelKind, QolProblem,
    RelativeModel, RowState, SolverOptions, StructuralParameters, UpdateRule,
};

fn location(wage: f64, floor_price: f64, tradable_price: f64, services_price: f64, hometown: f64) -> Observation {
    Observation {
        wage,
        floor_price,
        tradable_price,
        services_price,
        residents: f64::NAN,
        hometown,
    }
}

fn tight_newton() -> InversionOptions {
    InversionOptions::default()
        .with_rule(UpdateRule::Newton)
        .with_tolerance(1e-12)
        .with_max_iterations(1_000)
}

/// Two locations simulated forward and inverted with the toolkit's worked-example settings.
#[test]
fn two_location_example_recovers_originating_quality_of_life() {
    let params = StructuralParameters {
        alpha: 0.7,
        beta: 0.5,
        gamma: 3.0,
        xi: 5.0,
    };
    let targets = [1.0, 2.0];
    let rows = vec![
        (location(1.0, 1.0, 1.0, 1.0, 100.0), targets[0]),
        (location(1.2, 2.0, 1.1, 0.9, 250.0), targets[1]),
    ];
    let data = local_ties_observations(&params, &rows).unwrap();
    let options = InversionOptions::default()
        .with_parameters(params)
        .with_damping(0.3)
        .with_tolerance(1e-11)
        .with_max_iterations(50_000);

    let result = QolProblem::new(data).invert(&options).unwrap();
    assert!(result.summary.all_converged());
    assert!(result.summary.iterations < 50_000);
    for (recovered, target) in result.qol().iter().zip(targets) {
        assert_relative_eq!(*recovered, target, epsilon = options.solver.tolerance);
    }
}

#[test]
fn synthetic_batch_round_trips_under_both_update_rules() {
    let params = StructuralParameters::default();
    let batch = SyntheticBatch::local_ties(&SyntheticDesign::default(), &params).unwrap();
    let problem = QolProblem::new(batch.observations.clone());

    let newton_options = tight_newton();
    let newton = problem.invert(&newton_options).unwrap();
    assert!(newton.summary.all_converged());
    assert_relative_eq!(
        *newton.qol(),
        batch.qol,
        epsilon = newton_options.solver.tolerance
    );

    let fixed_point_options = InversionOptions::default().with_max_iterations(50_000);
    let fixed_point = problem.invert(&fixed_point_options).unwrap();
    assert!(fixed_point.summary.all_converged());
    assert_relative_eq!(
        *fixed_point.qol(),
        batch.qol,
        epsilon = fixed_point_options.solver.tolerance
    );
}

#[test]
fn inverting_self_consistent_data_is_idempotent() {
    let params = StructuralParameters::default();
    let design = SyntheticDesign {
        locations: 40,
        seed: 11,
        ..Default::default()
    };
    let batch = SyntheticBatch::local_ties(&design, &params).unwrap();
    let first = QolProblem::new(batch.observations.clone())
        .invert(&tight_newton())
        .unwrap();

    let rows: Vec<(Observation, f64)> = batch
        .observations
        .rows()
        .zip(first.qol().iter().copied())
        .collect();
    let regenerated = local_ties_observations(&params, &rows).unwrap();
    let second = QolProblem::new(regenerated).invert(&tight_newton()).unwrap();

    assert!(second.summary.all_converged());
    assert_relative_eq!(*second.qol(), *first.qol(), epsilon = 1e-12);
}

#[test]
fn rows_are_solved_independently_and_deterministically() {
    let params = StructuralParameters::default();
    let design = SyntheticDesign {
        locations: 8,
        seed: 3,
        ..Default::default()
    };
    let batch = SyntheticBatch::local_ties(&design, &params).unwrap();
    let options = tight_newton();
    let together = QolProblem::new(batch.observations.clone())
        .invert(&options)
        .unwrap();
    let again = QolProblem::new(batch.observations.clone())
        .invert(&options)
        .unwrap();
    assert_eq!(together.qol(), again.qol());

    for (index, row) in batch.observations.rows().enumerate() {
        let alone = QolProblem::new(Observations::from_rows(&[row]).unwrap())
            .invert(&options)
            .unwrap();
        assert_eq!(alone.qol[0], together.qol[index]);
    }
}

/// Holding the allocation fixed, a higher wage is a compensating differential:
/// quality of life scales exactly with `1 / w` and never rises.
#[test]
fn recovered_quality_of_life_never_rises_with_wage_at_fixed_allocation() {
    let base = Observation {
        residents: 130.0,
        ..location(1.1, 1.6, 1.0, 1.2, 100.0)
    };
    let options = tight_newton();
    let invert_one = |row: Observation| {
        QolProblem::new(Observations::from_rows(&[row]).unwrap())
            .invert(&options)
            .unwrap()
            .qol[0]
    };

    let reference = invert_one(base);
    let mut previous = reference;
    for factor in [1.05, 1.1, 1.25, 1.5, 2.0, 3.0] {
        let qol = invert_one(Observation {
            wage: base.wage * factor,
            ..base
        });
        assert!(qol <= previous);
        assert_relative_eq!(qol, reference / factor, epsilon = 1e-9);
        previous = qol;
    }
}

#[test]
fn more_residents_never_lower_recovered_quality_of_life() {
    let base = location(0.9, 1.3, 1.05, 0.95, 100.0);
    let options = tight_newton();
    let mut previous = 0.0;
    for residents in [40.0, 75.0, 100.0, 120.0, 150.0, 190.0, 300.0, 500.0] {
        let data = Observations::from_rows(&[Observation { residents, ..base }]).unwrap();
        let qol = QolProblem::new(data).invert(&options).unwrap().qol[0];
        assert!(qol >= previous);
        previous = qol;
    }
}

/// Under the relative measure, raising the reference location's wage never
/// lowers any location's recovered quality of life.
#[test]
fn relative_measure_never_falls_when_reference_wage_rises() {
    let params = StructuralParameters::default();
    let design = SyntheticDesign {
        locations: 10,
        seed: 5,
        ..Default::default()
    };
    let batch = SyntheticBatch::relative(&design, &params).unwrap();
    let options = InversionOptions::default()
        .with_model(ModelKind::Relative { reference: 0 })
        .with_tolerance(1e-12)
        .with_max_iterations(50_000);

    let baseline = QolProblem::new(batch.observations.clone())
        .invert(&options)
        .unwrap();
    assert!(baseline.summary.all_converged());

    let rows: Vec<Observation> = batch.observations.rows().collect();
    let mut previous = baseline.qol().clone();
    for factor in [1.05, 1.1, 1.25, 1.5, 2.0] {
        let mut perturbed = rows.clone();
        perturbed[0].wage = rows[0].wage * factor;
        let result = QolProblem::new(Observations::from_rows(&perturbed).unwrap())
            .invert(&options)
            .unwrap();
        assert!(result.summary.all_converged());
        for (index, (now, before)) in result.qol().iter().zip(previous.iter()).enumerate() {
            assert!(*now >= *before - 1e-9, "location {index} fell from {before} to {now}");
        }
        previous = result.qol().clone();
    }
}

#[test]
fn relative_measure_round_trips_simulated_equilibrium() {
    let params = StructuralParameters::default();
    let design = SyntheticDesign {
        locations: 20,
        seed: 9,
        ..Default::default()
    };
    let batch = SyntheticBatch::relative(&design, &params).unwrap();
    let model = RelativeModel::new(&batch.observations, &params, 0).unwrap();
    let solver = SolverOptions {
        tolerance: 1e-12,
        max_iterations: 50_000,
        ..Default::default()
    };

    let result = QolProblem::new(batch.observations.clone())
        .invert_with(&model, &solver)
        .unwrap();
    assert!(result.summary.all_converged());
    assert_relative_eq!(result.qol[0], 1.0, epsilon = 1e-12);
    assert_relative_eq!(*result.qol(), batch.qol, epsilon = solver.tolerance);
}

#[test]
fn equal_residents_and_hometown_give_price_wage_ratio_for_any_frictions() {
    let row = Observation {
        residents: 250.0,
        ..location(1.3, 2.4, 1.1, 1.2, 250.0)
    };
    let data = Observations::from_rows(&[row]).unwrap();
    let problem = QolProblem::new(data);

    for (gamma, xi) in [(3.0, 5.5), (1.5, 2.0), (8.0, 0.5), (3.0, 12.0), (0.7, 40.0)] {
        let params = StructuralParameters {
            gamma,
            xi,
            ..Default::default()
        };
        let expected = price_index(&params, &row) / row.wage;
        let options = InversionOptions::default().with_parameters(params);
        let result = problem.invert(&options).unwrap();
        assert_eq!(result.summary.iterations, 1);
        assert_relative_eq!(result.qol[0], expected, epsilon = 1e-12);
    }
}

#[test]
fn lower_damping_never_adds_missing_rows_but_slows_convergence() {
    let params = StructuralParameters::default();
    let design = SyntheticDesign {
        locations: 60,
        seed: 21,
        ..Default::default()
    };
    let batch = SyntheticBatch::local_ties(&design, &params).unwrap();
    let problem = QolProblem::new(batch.observations);

    let mut previous_iterations = 0;
    for damping in [1.0, 0.5, 0.25] {
        let options = InversionOptions::default()
            .with_damping(damping)
            .with_max_iterations(100_000);
        let result = problem.invert(&options).unwrap();
        assert_eq!(result.summary.missing(), 0);
        assert!(result.summary.iterations >= previous_iterations);
        previous_iterations = result.summary.iterations;
    }
}

#[test]
fn non_positive_housing_price_is_missing_while_other_rows_converge() {
    let params = StructuralParameters::default();
    let valid = vec![
        (location(1.0, 1.0, 1.0, 1.0, 100.0), 1.1),
        (location(1.2, 1.7, 1.1, 1.2, 300.0), 0.95),
    ];
    let simulated: Vec<Observation> = local_ties_observations(&params, &valid)
        .unwrap()
        .rows()
        .collect();
    let zero_price = Observation {
        floor_price: 0.0,
        residents: 100.0,
        ..simulated[0]
    };
    let negative_price = Observation {
        floor_price: -2.0,
        ..simulated[1]
    };
    let data = Observations::from_rows(&[
        simulated[0],
        zero_price,
        simulated[1],
        negative_price,
    ])
    .unwrap();

    let result = QolProblem::new(data).invert(&tight_newton()).unwrap();
    assert_relative_eq!(result.qol[0], 1.1, epsilon = 1e-9);
    assert_relative_eq!(result.qol[2], 0.95, epsilon = 1e-9);
    assert!(result.qol[1].is_nan());
    assert!(result.qol[3].is_nan());
    assert_eq!(result.summary.failed, vec![1, 3]);
    assert_eq!(result.summary.converged, 2);
    assert!(matches!(
        result.states[3],
        RowState::Failed {
            reason: DomainViolation::InvalidObservation { .. },
            ..
        }
    ));
}

#[test]
fn populations_well_above_hometown_invert_to_finite_values() {
    let params = StructuralParameters::default();
    let rows: Vec<Observation> = [(100.0, 100.0), (300.0, 100.0), (50.0, 150.0)]
        .into_iter()
        .map(|(residents, hometown)| Observation {
            residents,
            ..location(1.0, 1.0, 1.0, 1.0, hometown)
        })
        .collect();
    let problem = QolProblem::new(Observations::from_rows(&rows).unwrap());

    let fixed_point = problem.invert(&InversionOptions::default()).unwrap();
    let newton = problem.invert(&tight_newton()).unwrap();
    assert!(fixed_point.summary.all_converged());
    assert!(newton.summary.all_converged());
    assert_relative_eq!(fixed_point.qol[0], 1.0, epsilon = 1e-12);
    assert!(newton.qol[1] > newton.qol[0] && newton.qol[0] > newton.qol[2]);
    assert_relative_eq!(*fixed_point.qol(), *newton.qol(), epsilon = 1e-9);

    let tripled = LocalTiesModel::simulate_residents(&params, &rows[1], newton.qol[1]);
    assert_relative_eq!(tripled, 300.0, max_relative = 1e-10);
}

/// Strong ties with residents close to hometown: the allocation is nearly flat
/// and the fixed-point map contracts slowly.
#[test]
fn flat_allocation_is_not_reported_converged_before_reaching_tolerance() {
    let target = 1.002;
    let row = location(1.0, 1.0, 1.0, 1.0, 100.0);
    let tolerance = 1e-10;
    let invert = |xi: f64, options: InversionOptions| {
        let params = StructuralParameters {
            xi,
            ..Default::default()
        };
        let data = local_ties_observations(&params, &[(row, target)]).unwrap();
        QolProblem::new(data)
            .invert(&options.with_parameters(params).with_tolerance(tolerance))
            .unwrap()
    };

    let capped = invert(8.0, InversionOptions::default().with_max_iterations(40_000));
    assert_eq!(capped.states[0], RowState::Exhausted);
    assert!(capped.qol[0].is_nan());
    assert!(capped.residuals[0] > tolerance);

    let newton = invert(10.0, InversionOptions::default().with_rule(UpdateRule::Newton));
    assert!(newton.summary.all_converged());
    assert_relative_eq!(newton.qol[0], target, epsilon = tolerance);

    let fixed_point = invert(6.0, InversionOptions::default().with_max_iterations(50_000));
    assert!(fixed_point.summary.all_converged());
    assert_relative_eq!(fixed_point.qol[0], target, epsilon = tolerance);
}

#[test]
fn overflowing_population_ratio_is_reported_not_fabricated() {
    let row = Observation {
        residents: 1e300,
        ..location(1.0, 1.0, 1.0, 1.0, 1e-300)
    };
    let data = Observations::from_rows(&[row]).unwrap();
    let result = QolProblem::new(data)
        .invert(&InversionOptions::default())
        .unwrap();
    assert!(result.qol[0].is_nan());
    assert!(matches!(
        result.states[0],
        RowState::Failed {
            reason: DomainViolation::UnattainableAllocation { .. },
            ..
        }
    ));
}
