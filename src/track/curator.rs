//! # Hit curator
//!
//! Ingestion, ordering, pruning and selection of the hits held by a
//! [`Track`]. Queries that depend on the hit order curate the track first,
//! which is why most of them take `&mut self`.
use tracing::debug;

use crate::{
    constants::Millimeter,
    hit::{Hit, HitKind, Material, ModuleId},
};

use super::Track;

impl Track {
    /// Hand a hit over to the track.
    ///
    /// Time hits go to the timing sequence, every other kind to the position
    /// sequence. The hit tags are merged into the track tag set.
    pub fn add_hit(&mut self, hit: Hit) {
        self.tags.extend(hit.tags.iter().cloned());
        if hit.is_time() {
            self.time_hits.push(hit);
        } else {
            self.hits.push(hit);
        }
        self.invalidate();
    }

    /// Add the primary-vertex constraint, `dr` in R-Phi and `dz` in s-Z.
    pub fn add_ip_constraint(&mut self, dr: Millimeter, dz: Millimeter) {
        self.add_hit(Hit::ip_constraint(dr, dz));
    }

    /// Stable sort of both hit sequences by radius.
    pub fn sort_hits(&mut self, by_smaller_r: bool) {
        let order = |a: &Hit, b: &Hit| {
            if by_smaller_r {
                a.r.total_cmp(&b.r)
            } else {
                b.r.total_cmp(&a.r)
            }
        };
        self.hits.sort_by(order);
        self.time_hits.sort_by(order);
        self.invalidate();
    }

    /// Drop the position hits the track can not reach before curling back.
    pub(super) fn prune(&mut self) -> bool {
        let Some(kinematics) = self.kinematics else {
            return false;
        };
        let guard = self.params.curling_guard;
        let field = &self.params.field;
        let before = self.hits.len();
        self.hits.retain(|hit| {
            let radius = field.radius_at(hit.z, kinematics.pt);
            !(radius.is_finite() && radius > 0.0 && hit.r >= guard * 2.0 * radius)
        });
        let removed = before - self.hits.len();
        if removed > 0 {
            debug!(removed, pt = kinematics.pt, "hits beyond the curling radius pruned");
        }
        removed > 0
    }

    /// Remove hits beyond `guard · 2R`; returns whether anything was removed.
    pub fn prune_hits(&mut self) -> bool {
        let removed = self.prune();
        if removed {
            self.invalidate();
        }
        removed
    }

    /// Activate the module hits carrying `tag` (all of them for `"all"`) and
    /// deactivate the others. The IP constraint follows `use_ip`.
    pub fn keep_tagged_hits_only(&mut self, tag: &str, use_ip: bool) {
        for hit in &mut self.hits {
            hit.active = match hit.kind {
                HitKind::Module => hit.has_tag(tag),
                HitKind::IpConstraint => use_ip,
                HitKind::Inactive | HitKind::Time => false,
            };
        }
        for hit in &mut self.time_hits {
            hit.active = hit.has_tag(tag);
        }
        self.invalidate();
    }

    /// Keep only the trigger-capable module hits active.
    pub fn keep_trigger_hits_only(&mut self) {
        for hit in &mut self.hits {
            hit.active = hit.kind == HitKind::Module && hit.trigger;
        }
        self.invalidate();
    }

    /// Zero the material of every hit, leaving resolutions untouched.
    pub fn remove_material(&mut self) {
        for hit in self.hits.iter_mut().chain(self.time_hits.iter_mut()) {
            hit.material = Material::ZERO;
        }
        self.invalidate();
    }

    /// Number of position hits after curation.
    pub fn n_hits(&mut self) -> usize {
        self.curate();
        self.hits.len()
    }

    /// True when no position hit is held; time hits do not count.
    pub fn has_no_hits(&self) -> bool {
        self.hits.is_empty()
    }

    /// Curated position hits, in traversal order.
    pub fn hits(&mut self) -> &[Hit] {
        self.curate();
        &self.hits
    }

    pub fn time_hits(&mut self) -> &[Hit] {
        self.curate();
        &self.time_hits
    }

    fn selected(hit: &Hit, tag: &str, use_ip: bool) -> bool {
        match hit.kind {
            HitKind::Module => hit.has_tag(tag),
            HitKind::IpConstraint => use_ip,
            HitKind::Inactive | HitKind::Time => false,
        }
    }

    /// Active position hits carrying `tag`, the IP constraint counted if `use_ip`.
    pub fn n_active_hits(&mut self, tag: &str, use_ip: bool) -> usize {
        self.curate();
        self.hits
            .iter()
            .filter(|hit| hit.active && if hit.is_ip() { use_ip } else { hit.has_tag(tag) })
            .count()
    }

    /// Active hits from measurement planes carrying `tag`, plus the active IP
    /// constraint if `use_ip`.
    pub fn n_measured_hits(&mut self, tag: &str, use_ip: bool) -> usize {
        self.curate();
        self.hits
            .iter()
            .filter(|hit| hit.active && Track::selected(hit, tag, use_ip))
            .count()
    }

    /// `i`-th module or IP hit in traversal order.
    pub fn measurable_or_ip_hit(&mut self, i: usize) -> Option<&Hit> {
        self.curate();
        self.hits
            .iter()
            .filter(|hit| hit.is_measurable() || hit.is_ip())
            .nth(i)
    }

    /// `i`-th module or IP hit counted from the end of the traversal.
    pub fn r_measurable_or_ip_hit(&mut self, i: usize) -> Option<&Hit> {
        self.curate();
        self.hits
            .iter()
            .rev()
            .filter(|hit| hit.is_measurable() || hit.is_ip())
            .nth(i)
    }

    /// Material budget summed over all held hits.
    pub fn material(&self) -> Material {
        self.hits
            .iter()
            .chain(&self.time_hits)
            .fold(Material::ZERO, |acc, hit| acc + hit.material)
    }

    /// Module handle and kind of every hit produced on a module.
    pub fn hit_modules(&mut self) -> Vec<(ModuleId, HitKind)> {
        self.curate();
        self.hits
            .iter()
            .filter_map(|hit| hit.module.map(|module| (module, hit.kind)))
            .collect()
    }

    /// Survival probability of a hadron up to each active module hit carrying `tag`.
    ///
    /// Entry `k` is the probability that the particle reaches the `k`-th such
    /// hit along the traversal without a nuclear interaction in the material
    /// crossed before it, `∏ exp(-λ)`.
    pub fn hadron_active_hits_probability(&mut self, tag: &str) -> Vec<f64> {
        self.curate();
        let mut crossed = 0.0_f64;
        let mut probabilities = Vec::new();
        for hit in &self.hits {
            if hit.active && hit.kind == HitKind::Module && hit.has_tag(tag) {
                probabilities.push((-crossed).exp());
            }
            crossed += hit.material.interaction;
        }
        probabilities
    }

    /// Probability that a hadron leaves at least `n` clean active hits carrying `tag`.
    pub fn hadron_active_hits_probability_for(&mut self, tag: &str, n: usize) -> f64 {
        if n == 0 {
            return 1.0;
        }
        self.hadron_active_hits_probability(tag)
            .get(n - 1)
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod curator_test {
    use super::*;
    use crate::{
        constants::K_FIELD,
        fit_params::FitParams,
        magnetic_field::MagneticField,
        track::Propagation,
    };
    use approx::assert_relative_eq;
    use std::{f64::consts::FRAC_PI_2, sync::Arc};

    fn radii(track: &mut Track) -> Vec<f64> {
        track.hits().iter().map(|hit| hit.r).collect()
    }

    #[test]
    fn test_sort_follows_direction() {
        let mut track = Track::default();
        for r in [5.0, 15.0, 10.0] {
            track.add_hit(Hit::measurement(r, 0.0, 0.01, 0.01));
        }
        track
            .set_theta_phi_pt(FRAC_PI_2, 0.0, 10.0, Propagation::InsideOut)
            .unwrap();
        assert_eq!(radii(&mut track), vec![5.0, 10.0, 15.0]);

        track.reset_pt(10.0, Propagation::OutsideIn).unwrap();
        assert_eq!(radii(&mut track), vec![15.0, 10.0, 5.0]);
    }

    #[test]
    fn test_add_hit_routes_and_merges_tags() {
        let mut track = Track::default();
        assert!(track.has_no_hits());
        track.add_hit(Hit::measurement(10.0, 0.0, 0.01, 0.01).with_tags(["pixel"]));
        track.add_hit(Hit::time(300.0, 0.0, 0.03).with_tags(["timing"]));
        track.add_ip_constraint(0.005, 0.005);
        assert_eq!(track.n_hits(), 2);
        assert_eq!(track.time_hits().len(), 1);
        assert!(track.tags().contains("pixel") && track.tags().contains("timing"));
        assert!(!track.has_no_hits());
    }

    #[test]
    fn test_pruning_at_curling_radius() {
        let pt = 1.0;
        let radius = pt / (K_FIELD * 3.8) * 1000.0;
        let bound = 0.8 * 2.0 * radius;

        let mut track = Track::default();
        track
            .set_theta_phi_pt(FRAC_PI_2, 0.0, pt, Propagation::InsideOut)
            .unwrap();
        track.add_hit(Hit::measurement(bound - 1.0, 0.0, 0.01, 0.01));
        track.add_hit(Hit::measurement(bound + 1.0, 0.0, 0.01, 0.01));
        assert_eq!(radii(&mut track), vec![bound - 1.0]);
        assert!(!track.prune_hits());
    }

    #[test]
    fn test_explicit_prune_reports_removal() {
        let mut track = Track::default();
        track.add_hit(Hit::measurement(2000.0, 0.0, 0.01, 0.01));
        // no momentum yet: nothing to compare against
        assert!(!track.prune_hits());
        track
            .set_theta_phi_pt(FRAC_PI_2, 0.0, 1.0, Propagation::InsideOut)
            .unwrap();
        assert!(track.prune_hits());
        assert_eq!(track.n_hits(), 0);
    }

    #[test]
    fn test_no_pruning_without_field() {
        let params = FitParams::builder()
            .field(MagneticField::uniform(0.0))
            .build()
            .unwrap();
        let mut track = Track::new(Arc::new(params));
        track
            .set_theta_phi_pt(FRAC_PI_2, 0.0, 0.1, Propagation::InsideOut)
            .unwrap();
        track.add_hit(Hit::measurement(5000.0, 0.0, 0.01, 0.01));
        assert_eq!(track.n_hits(), 1);
    }

    #[test]
    fn test_tag_and_trigger_selection() {
        let mut track = Track::default();
        track.add_ip_constraint(0.005, 0.005);
        track.add_hit(Hit::measurement(30.0, 0.0, 0.01, 0.01).with_tags(["pixel"]));
        track.add_hit(
            Hit::measurement(60.0, 0.0, 0.01, 0.01)
                .with_tags(["pixel"])
                .as_trigger(),
        );
        track.add_hit(Hit::measurement(300.0, 0.0, 0.02, 0.5).with_tags(["strip"]));
        track.add_hit(Hit::inactive(20.0, 0.0, Material::new(0.01, 0.005)));

        assert_eq!(track.n_active_hits("all", true), 4);
        track.keep_tagged_hits_only("pixel", false);
        assert_eq!(track.n_active_hits("all", true), 2);
        assert_eq!(track.n_active_hits("pixel", false), 2);
        assert_eq!(track.n_measured_hits("all", true), 2);
        assert!(track.hits().iter().all(|hit| !hit.is_ip() || !hit.active));

        track.keep_trigger_hits_only();
        assert_eq!(track.n_active_hits("all", true), 1);
        assert!(track.hits().iter().filter(|hit| hit.active).all(|hit| hit.trigger));

        track.keep_tagged_hits_only("all", true);
        assert_eq!(track.n_active_hits("all", true), 4);
        assert!(track.hits().iter().all(|hit| hit.kind != HitKind::Inactive || !hit.active));
    }

    #[test]
    fn test_measured_hits_follow_selection() {
        let mut track = Track::default();
        track.add_ip_constraint(0.005, 0.005);
        track.add_hit(Hit::measurement(30.0, 0.0, 0.01, 0.01).with_tags(["pixel"]));
        track.add_hit(Hit::measurement(300.0, 0.0, 0.02, 0.5).with_tags(["strip"]));
        assert_eq!(track.n_measured_hits("all", true), 3);

        track.keep_tagged_hits_only("pixel", true);
        assert_eq!(track.n_measured_hits("all", false), 1);
        assert_eq!(track.n_measured_hits("all", true), 2);
        assert_eq!(track.n_active_hits("all", false), 1);

        // an activated passive layer is active but never measured
        track.add_hit(Hit::inactive(20.0, 0.0, Material::new(0.01, 0.0)).with_active(true));
        assert_eq!(track.n_active_hits("all", false), 2);
        assert_eq!(track.n_measured_hits("all", false), 1);
    }

    #[test]
    fn test_time_hits_alone_leave_track_empty() {
        let mut track = Track::default();
        track.add_hit(Hit::time(1100.0, 0.0, 0.03));
        assert!(track.has_no_hits());
        assert_eq!(track.time_hits().len(), 1);
        track.add_ip_constraint(0.005, 0.005);
        assert!(!track.has_no_hits());
    }

    #[test]
    fn test_material_and_modules() {
        let mut track = Track::default();
        track.add_hit(
            Hit::measurement(30.0, 0.0, 0.01, 0.01)
                .with_material(Material::new(0.01, 0.002))
                .with_module(ModuleId(3)),
        );
        track.add_hit(Hit::inactive(20.0, 0.0, Material::new(0.02, 0.004)));
        let total = track.material();
        assert_relative_eq!(total.radiation, 0.03);
        assert_relative_eq!(total.interaction, 0.006);
        assert_eq!(track.hit_modules(), vec![(ModuleId(3), HitKind::Module)]);

        track.remove_material();
        assert_eq!(track.material(), Material::ZERO);
    }

    #[test]
    fn test_measurable_indexing() {
        let mut track = Track::default();
        track
            .set_theta_phi_pt(FRAC_PI_2, 0.0, 10.0, Propagation::InsideOut)
            .unwrap();
        track.add_hit(Hit::measurement(40.0, 0.0, 0.01, 0.01));
        track.add_hit(Hit::inactive(25.0, 0.0, Material::new(0.01, 0.0)));
        track.add_hit(Hit::measurement(30.0, 0.0, 0.01, 0.01));
        track.add_ip_constraint(0.005, 0.005);

        assert!(track.measurable_or_ip_hit(0).unwrap().is_ip());
        assert_eq!(track.measurable_or_ip_hit(1).unwrap().r, 30.0);
        assert_eq!(track.measurable_or_ip_hit(2).unwrap().r, 40.0);
        assert!(track.measurable_or_ip_hit(3).is_none());
        assert_eq!(track.r_measurable_or_ip_hit(0).unwrap().r, 40.0);
        assert!(track.r_measurable_or_ip_hit(2).unwrap().is_ip());
    }

    #[test]
    fn test_hadron_probabilities() {
        let mut track = Track::default();
        track
            .set_theta_phi_pt(FRAC_PI_2, 0.0, 10.0, Propagation::InsideOut)
            .unwrap();
        track.add_hit(Hit::inactive(20.0, 0.0, Material::new(0.0, 0.1)));
        for r in [30.0, 60.0, 90.0] {
            track.add_hit(
                Hit::measurement(r, 0.0, 0.01, 0.01)
                    .with_tags(["pixel"])
                    .with_material(Material::new(0.0, 0.05)),
            );
        }

        let probabilities = track.hadron_active_hits_probability("pixel");
        assert_eq!(probabilities.len(), 3);
        assert_relative_eq!(probabilities[0], (-0.1_f64).exp());
        assert_relative_eq!(probabilities[1], (-0.15_f64).exp(), max_relative = 1e-14);
        assert_relative_eq!(probabilities[2], (-0.2_f64).exp(), max_relative = 1e-14);

        assert_eq!(track.hadron_active_hits_probability_for("pixel", 0), 1.0);
        assert_relative_eq!(
            track.hadron_active_hits_probability_for("pixel", 2),
            probabilities[1]
        );
        assert_eq!(track.hadron_active_hits_probability_for("pixel", 4), 0.0);
        assert!(track.hadron_active_hits_probability("strip").is_empty());
    }
}
