use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::data::entry::FluxEntry;

/// Tolerance used when comparing flux windows of different files.
pub const WINDOW_TOLERANCE: f64 = 1.0e-6;

/// Spatial 3-vector plus a fourth (time-like or energy) component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FourVector {
    pub xyz: Vector3<f64>,
    pub t: f64,
}

impl Default for FourVector {
    fn default() -> Self {
        FourVector { xyz: Vector3::zeros(), t: 0.0 }
    }
}

impl FourVector {
    pub fn new(x: f64, y: f64, z: f64, t: f64) -> Self {
        FourVector { xyz: Vector3::new(x, y, z), t }
    }

    pub fn x(&self) -> f64 {
        self.xyz.x
    }

    pub fn y(&self) -> f64 {
        self.xyz.y
    }

    pub fn z(&self) -> f64 {
        self.xyz.z
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn vect(&self) -> &Vector3<f64> {
        &self.xyz
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xyz.x, self.xyz.y, self.xyz.z, self.t]
    }
}

/// The plane flux rays are defined on: a base point and two spanning directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxWindow {
    pub base: Vector3<f64>,
    pub dir1: Vector3<f64>,
    pub dir2: Vector3<f64>,
}

impl Default for FluxWindow {
    fn default() -> Self {
        FluxWindow { base: Vector3::zeros(), dir1: Vector3::zeros(), dir2: Vector3::zeros() }
    }
}

impl FluxWindow {
    pub fn from_arrays(base: [f64; 3], dir1: [f64; 3], dir2: [f64; 3]) -> Self {
        FluxWindow {
            base: Vector3::from(base),
            dir1: Vector3::from(dir1),
            dir2: Vector3::from(dir2),
        }
    }

    /// Three points spanning the plane: base, base + dir1, base + dir2.
    pub fn points(&self) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        (self.base, self.base + self.dir1, self.base + self.dir2)
    }

    pub fn normal(&self) -> Vector3<f64> {
        self.dir1.cross(&self.dir2)
    }

    pub fn is_degenerate(&self) -> bool {
        self.normal().norm() == 0.0
    }

    pub fn approx_eq(&self, other: &FluxWindow, tolerance: f64) -> bool {
        (self.base - other.base).amax() <= tolerance
            && (self.dir1 - other.dir1).amax() <= tolerance
            && (self.dir2 - other.dir2).amax() <= tolerance
    }
}

/// Reconstituted kinematics of the current flux ray.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RayKinematics {
    /// (px, py, pz, E)
    pub p4: FourVector,
    /// (vtxx, vtxy, vtxz, dist)
    pub x4: FourVector,
    /// distance from the parent decay to the current position
    pub dist: f64,
}

impl RayKinematics {
    pub fn from_entry(entry: &FluxEntry) -> Self {
        RayKinematics {
            p4: FourVector::new(entry.px, entry.py, entry.pz, entry.e),
            x4: FourVector::new(entry.vtxx, entry.vtxy, entry.vtxz, entry.dist),
            dist: entry.dist,
        }
    }

    /// Slide the ray origin along its momentum until z == z0.
    ///
    /// The decay distance grows (or shrinks) by the path length travelled. Returns
    /// false and leaves the ray untouched when pz is zero.
    pub fn move_to_z0(&mut self, z0: f64) -> bool {
        let pz = self.p4.z();
        if pz == 0.0 {
            return false;
        }
        let scale = (z0 - self.x4.z()) / pz;
        let shift = self.p4.vect() * scale;
        self.x4.xyz += shift;
        self.x4.xyz.z = z0;
        self.dist += scale.signum() * shift.norm();
        self.x4.t = self.dist;
        true
    }
}
