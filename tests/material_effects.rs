mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use kinfit::closest_approach::ClosestApproachSettings;
use kinfit::effects::{MaterialEffect, PassDirection};
use kinfit::fit::MetaIterationConfig;
use kinfit::material::{
    CrossingGeometry, Crossings, HighlandMaterial, Material, MaterialCrossing, MaterialModel,
};
use kinfit::trajectory::{LoopHelix, MomentumBasis, PieceTrajectory};

use crate::common::{straws, toy_wire, truth_helix};

fn model() -> Arc<dyn MaterialModel> {
    Arc::new(HighlandMaterial::default())
}

fn reference() -> PieceTrajectory<LoopHelix> {
    PieceTrajectory::new(truth_helix())
}

#[test]
fn test_empty_crossing_is_inactive() {
    let effect = MaterialEffect::new(
        CrossingGeometry::fixed(1.0, Crossings::new()),
        model(),
        &reference(),
        ClosestApproachSettings::default(),
        true,
    );
    assert!(!effect.is_active());
    assert_eq!(effect.crossing_time(), 1.0);
    assert_eq!(effect.effect().values.norm(), 0.0);
}

#[test]
fn test_backward_effect_reverses_energy_loss() {
    let mut crossings = Crossings::new();
    crossings.push(MaterialCrossing::new(Material::mylar(), 0.5));
    let effect = MaterialEffect::new(
        CrossingGeometry::fixed(-2.0, crossings),
        model(),
        &reference(),
        ClosestApproachSettings::default(),
        true,
    );
    assert!(effect.is_active());
    assert!(effect.momentum_effects().mean(MomentumBasis::MomDir) < 0.0);

    let forward = effect.directional_effect(PassDirection::Forwards);
    let backward = effect.directional_effect(PassDirection::Backwards);
    assert_relative_eq!(forward.values, -backward.values);
    assert_eq!(forward.covariance, backward.covariance);
    assert!(forward.covariance.trace() > 0.0);
}

#[test]
fn test_temperature_scales_scattering() {
    let truth = truth_helix();
    let reference = reference();
    let wire = toy_wire(&truth, 0.5, 0.3, 1.2);
    let geometry = straws(&[wire]).remove(0);
    let mut effect = MaterialEffect::new(
        geometry,
        model(),
        &reference,
        ClosestApproachSettings::default(),
        true,
    );
    assert!(effect.is_active());
    assert_eq!(effect.crossings().len(), 2);
    assert_relative_eq!(effect.crossing_time(), 0.5, epsilon = 1e-6);

    let nominal = effect.effect().covariance;
    effect.update(&reference, Some(&MetaIterationConfig::new(10.0, false, false)));
    assert_relative_eq!(effect.effect().covariance, nominal * 10.0, max_relative = 1e-9);
    assert_relative_eq!(effect.crossing_time(), 0.5, epsilon = 1e-6);
}
