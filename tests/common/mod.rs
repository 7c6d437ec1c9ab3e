#![allow(dead_code)]

use std::sync::Arc;

use trackfit::{
    fit_params::FitParams,
    hit::{Hit, Material},
    track::{Propagation, Track},
};

/// Barrel layers at the given radii, on the straight line `z = r · cot θ`.
pub fn barrel_track(
    params: Arc<FitParams>,
    theta: f64,
    pt: f64,
    radii: &[f64],
    sigma: f64,
    material: f64,
) -> Track {
    let mut track = Track::new(params);
    track
        .set_theta_phi_pt(theta, 0.0, pt, Propagation::InsideOut)
        .unwrap();
    let cot = theta.cos() / theta.sin();
    for &r in radii {
        track.add_hit(
            Hit::measurement(r, r * cot, sigma, sigma)
                .with_material(Material::new(material, 0.1 * material)),
        );
    }
    track
}

/// Small pixel-like tracker with an IP constraint.
pub fn pixel_track(pt: f64, theta: f64, sigma: f64) -> Track {
    let mut track = barrel_track(
        Arc::new(FitParams::default()),
        theta,
        pt,
        &[10.0, 20.0, 30.0, 40.0, 50.0],
        sigma,
        0.0,
    );
    track.add_ip_constraint(0.005, 0.005);
    track
}
