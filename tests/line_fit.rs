mod common;

use approx::assert_relative_eq;
use kinfit::effects::EffectKind;
use kinfit::fit::{FitConfig, FitEnvironment, FitState, KalmanChain};
use kinfit::material::Crossings;
use kinfit::trajectory::{KinematicLine, KinematicTrajectory, MomentumBasis};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::common::{distance_hits, straws, toy_wire, toy_wires, truth_line};

#[test]
fn test_zero_field_exact_hits_converge() {
    common::init_logging();
    let truth = truth_line();
    let wires = vec![
        toy_wire(&truth, -0.5, 0.0, 1.0),
        toy_wire(&truth, 0.5, 1.0, -0.7),
        toy_wire(&truth, 1.5, 2.0, 1.5),
    ];
    let mut rng = StdRng::seed_from_u64(42_u64);
    let hits = distance_hits(&wires, false, &mut rng);

    let mut seed = truth.clone();
    seed.params_mut().values[KinematicLine::D0] += 0.3;
    seed.params_mut().values[KinematicLine::PHI0] += 1e-3;

    let mut chain = KalmanChain::new(
        seed,
        hits,
        Vec::new(),
        FitEnvironment::uniform(Vector3::zeros()),
        FitConfig::default(),
    )
    .unwrap();
    let status = chain.fit().clone();

    assert_eq!(status.state, FitState::Converged);
    assert_eq!(status.meta_iteration, 0);
    assert_eq!(status.ndof, -3);
    assert!(status.chisq < 1e-6, "chisq = {}", status.chisq);

    // every drift circle is touched by the fitted line
    for id in chain.hit_ids() {
        let diag = chain.effect(*id).unwrap();
        assert!(diag.active);
        let residual = diag.residual.unwrap();
        assert!(residual.value.abs() < 1e-3, "{residual}");
        assert!(diag.chi.unwrap().abs() < 1e-2);
    }
}

#[test]
fn test_straw_material_along_line() {
    common::init_logging();
    let truth = truth_line();
    let mut rng = StdRng::seed_from_u64(7_u64);
    let wires = toy_wires(&truth, 8, -0.8, 1.8, &mut rng);
    let hits = distance_hits(&wires, false, &mut rng);

    let mut materials = straws(&wires);
    // a straw passed far away, and an empty fixed crossing
    let far = toy_wire(&truth, 0.1, 0.0, 10.0);
    materials.extend(straws(&[far]));
    materials.push(kinfit::material::CrossingGeometry::fixed(0.2, Crossings::new()));

    let mut chain = KalmanChain::new(
        truth.clone(),
        hits,
        materials,
        FitEnvironment::uniform(Vector3::zeros()),
        FitConfig::default(),
    )
    .unwrap();
    let status = chain.fit().clone();
    assert_ne!(status.state, FitState::Failed);

    let ids = chain.material_ids().to_vec();
    assert_eq!(ids.len(), 10);
    for id in &ids[..8] {
        let diag = chain.effect(*id).unwrap();
        assert_eq!(diag.kind, EffectKind::Material);
        assert!(diag.active);
        assert_eq!(diag.crossings, 2);
        let effects = diag.momentum_effects.unwrap();
        assert!(effects.mean(MomentumBasis::MomDir) < 0.0);
        assert!(effects.variance(MomentumBasis::PerpDir) > 0.0);
    }
    for id in &ids[8..] {
        let diag = chain.effect(*id).unwrap();
        assert!(!diag.active);
        assert_eq!(diag.crossings, 0);
    }

    // one piece per active crossing, momentum falling along the path
    let fit = chain.fit_trajectory();
    assert_eq!(fit.len(), 9);
    let mom = |piece: &KinematicLine| piece.param_value(KinematicLine::MOM);
    let moms: Vec<f64> = fit.pieces().map(mom).collect();
    assert!(moms.windows(2).all(|w| w[1] < w[0]));
    assert!(fit.momentum(1.9).norm() < truth.momentum_mag(1.9));
}

#[test]
fn test_material_can_be_disabled() {
    let truth = truth_line();
    let mut rng = StdRng::seed_from_u64(11_u64);
    let wires = toy_wires(&truth, 5, -0.5, 1.5, &mut rng);
    let hits = distance_hits(&wires, false, &mut rng);
    let config = FitConfig::builder().add_material(false).build().unwrap();

    let mut chain = KalmanChain::new(
        truth.clone(),
        hits,
        straws(&wires),
        FitEnvironment::uniform(Vector3::zeros()),
        config,
    )
    .unwrap();
    let status = chain.fit().clone();
    assert_eq!(status.state, FitState::Converged);
    assert_relative_eq!(status.chisq, 0.0, epsilon = 1e-6);
    assert_eq!(chain.fit_trajectory().len(), 1);
    for id in chain.material_ids() {
        let diag = chain.effect(*id).unwrap();
        assert!(!diag.active);
        assert_eq!(diag.crossings, 2);
    }

    // turning one straw back on adds its piece at the next fit
    let first = chain.material_ids()[0];
    chain.set_effect_active(first, true).unwrap();
    chain.fit();
    assert!(chain.effect(first).unwrap().active);
    assert_eq!(chain.fit_trajectory().len(), 2);
}
