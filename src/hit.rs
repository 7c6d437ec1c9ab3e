//! # Detector hits
//!
//! A [`Hit`] is the crossing point of a track with a detector layer. It is
//! produced upstream by the geometry and material systems and handed over to
//! a [`Track`](crate::track::Track), which only ever toggles its active flag
//! or strips its material.
//!
//! Four kinds exist:
//!
//! - [`HitKind::Module`] – a measurement plane (possibly deactivated by tag selection),
//! - [`HitKind::Inactive`] – passive material (services, supports, beam pipe),
//! - [`HitKind::IpConstraint`] – the synthetic primary-vertex constraint at the origin,
//! - [`HitKind::Time`] – a timing layer measurement.
//!
//! Material budgets are given as fractions of radiation length and nuclear
//! interaction length **along the track path**; incidence-angle corrections
//! belong to whoever builds the hit.
use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::constants::{
    GeV, Millimeter, Nanosecond, MS_HIGHLAND_LOG, MS_HIGHLAND_SCALE, TAG_ALL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitKind {
    Module,
    Inactive,
    IpConstraint,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleOrientation {
    /// Measures `z` at fixed `r`
    Barrel,
    /// Measures `r` at fixed `z`
    Endcap,
}

/// Opaque handle to the detector module a hit was produced on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// Material budget crossed at a hit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Fraction of radiation length X0
    pub radiation: f64,
    /// Fraction of nuclear interaction length λI
    pub interaction: f64,
}

impl Material {
    pub const ZERO: Material = Material {
        radiation: 0.0,
        interaction: 0.0,
    };

    pub fn new(radiation: f64, interaction: f64) -> Self {
        Material {
            radiation,
            interaction,
        }
    }
}

impl Add for Material {
    type Output = Material;

    fn add(self, rhs: Material) -> Material {
        Material {
            radiation: self.radiation + rhs.radiation,
            interaction: self.interaction + rhs.interaction,
        }
    }
}

impl AddAssign for Material {
    fn add_assign(&mut self, rhs: Material) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub r: Millimeter,
    pub z: Millimeter,
    pub kind: HitKind,
    pub orientation: ModuleOrientation,
    pub resolution_rphi: Millimeter,
    /// Resolution along `z` for barrel modules, along `r` for endcap modules
    pub resolution_z: Millimeter,
    pub resolution_t: Nanosecond,
    pub material: Material,
    pub tags: SmallVec<[String; 2]>,
    pub module: Option<ModuleId>,
    /// Module can deliver trigger primitives
    pub trigger: bool,
    /// Hit takes part in the fit
    pub active: bool,
}

impl Hit {
    fn base(r: Millimeter, z: Millimeter, kind: HitKind) -> Self {
        Hit {
            r,
            z,
            kind,
            orientation: ModuleOrientation::Barrel,
            resolution_rphi: 0.0,
            resolution_z: 0.0,
            resolution_t: 0.0,
            material: Material::ZERO,
            tags: SmallVec::new(),
            module: None,
            trigger: false,
            active: false,
        }
    }

    /// Active barrel measurement with the given plane resolutions.
    pub fn measurement(
        r: Millimeter,
        z: Millimeter,
        resolution_rphi: Millimeter,
        resolution_z: Millimeter,
    ) -> Self {
        Hit {
            resolution_rphi,
            resolution_z,
            active: true,
            ..Hit::base(r, z, HitKind::Module)
        }
    }

    /// Passive material crossing.
    pub fn inactive(r: Millimeter, z: Millimeter, material: Material) -> Self {
        Hit {
            material,
            ..Hit::base(r, z, HitKind::Inactive)
        }
    }

    /// Primary-vertex constraint at the origin, without material.
    pub fn ip_constraint(dr: Millimeter, dz: Millimeter) -> Self {
        Hit {
            resolution_rphi: dr,
            resolution_z: dz,
            active: true,
            ..Hit::base(0.0, 0.0, HitKind::IpConstraint)
        }
    }

    /// Active timing measurement.
    pub fn time(r: Millimeter, z: Millimeter, resolution_t: Nanosecond) -> Self {
        Hit {
            resolution_t,
            active: true,
            ..Hit::base(r, z, HitKind::Time)
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_orientation(mut self, orientation: ModuleOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }

    pub fn as_trigger(mut self) -> Self {
        self.trigger = true;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Hit comes from a measurement plane (active or not).
    pub fn is_measurable(&self) -> bool {
        self.kind == HitKind::Module
    }

    pub fn is_ip(&self) -> bool {
        self.kind == HitKind::IpConstraint
    }

    pub fn is_time(&self) -> bool {
        self.kind == HitKind::Time
    }

    /// `"all"` matches every hit.
    pub fn has_tag(&self, tag: &str) -> bool {
        tag == TAG_ALL || self.tags.iter().any(|t| t == tag)
    }

    /// Resolution projected on `z` for a track with the given `cot θ`.
    ///
    /// Endcap modules measure `r`; a radial error `σr` displaces the fitted
    /// `z` at that radius by `σr · |cot θ|`.
    pub fn effective_resolution_z(&self, cot_theta: f64) -> Millimeter {
        match self.orientation {
            ModuleOrientation::Barrel => self.resolution_z,
            ModuleOrientation::Endcap => self.resolution_z * cot_theta.abs(),
        }
    }

    /// Variance of the multiple-scattering angle (Highland, β = 1) for momentum `p`.
    pub fn ms_variance(&self, p: GeV) -> f64 {
        let x = self.material.radiation;
        if x <= 0.0 || p <= 0.0 {
            return 0.0;
        }
        let theta0 = MS_HIGHLAND_SCALE / p * x.sqrt() * (1.0 + MS_HIGHLAND_LOG * x.ln());
        theta0 * theta0
    }
}

impl fmt::Display for HitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HitKind::Module => "module",
            HitKind::Inactive => "inactive",
            HitKind::IpConstraint => "IP",
            HitKind::Time => "time",
        };
        f.pad(name)
    }
}

impl fmt::Display for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} r={:>10.3} mm z={:>10.3} mm  x/X0={:.5} λ/λI={:.5}",
            self.kind, self.r, self.z, self.material.radiation, self.material.interaction
        )?;
        match self.kind {
            HitKind::Time => write!(f, "  σt={:.4} ns", self.resolution_t)?,
            HitKind::Inactive => {}
            _ => write!(
                f,
                "  σrφ={:.4} mm σz={:.4} mm",
                self.resolution_rphi, self.resolution_z
            )?,
        }
        if !self.active {
            write!(f, "  [off]")?;
        }
        if !self.tags.is_empty() {
            write!(f, "  tags={}", self.tags.join(","))?;
        }
        Ok(())
    }
}
