use crate::common::{degree_for_dim, sh_component_count};
use glam::{Quat, Vec3};

/// Scale substituted for missing or unusable scale components.
pub const DEFAULT_SCALE: f32 = 0.01;

/// One uncompressed splat as produced by a loader and consumed by the encoder.
///
/// `sh` holds the view-dependent colour coefficients coefficient-major, three
/// colour channels per coefficient: `[c0.r, c0.g, c0.b, c1.r, ...]`. Its length
/// is 0, 9, 24 or 45.
#[derive(Debug, Clone, PartialEq)]
pub struct SplatRecord {
    pub position: Vec3,
    pub scale: Vec3,
    pub rotation: Quat,
    /// r, g, b, opacity
    pub color: [u8; 4],
    pub sh: Vec<f32>,
}

impl Default for SplatRecord {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::splat(DEFAULT_SCALE),
            rotation: Quat::IDENTITY,
            color: [0, 0, 0, 255],
            sh: Vec::new(),
        }
    }
}

impl SplatRecord {
    pub fn new(position: Vec3, scale: Vec3, rotation: Quat, color: [u8; 4]) -> Self {
        Self {
            position,
            scale,
            rotation,
            color,
            sh: Vec::new(),
        }
    }

    pub fn with_sh(mut self, sh: Vec<f32>) -> Self {
        self.sh = sh;
        self
    }

    #[inline]
    pub fn opacity(&self) -> u8 {
        self.color[3]
    }

    /// Degree implied by the stored coefficients; incomplete bands are ignored.
    pub fn sh_degree(&self) -> u32 {
        degree_for_dim(self.sh.len() / 3)
    }

    /// SH coefficient `component` (already flattened across channels), zero when absent.
    #[inline]
    pub(crate) fn sh_component(&self, component: usize) -> f32 {
        self.sh.get(component).copied().unwrap_or(0.0)
    }

    /// Replaces unusable fields with their documented defaults and normalizes
    /// the rotation.
    pub fn sanitized(&self) -> SplatRecord {
        let position = if self.position.is_finite() {
            self.position
        } else {
            Vec3::ZERO
        };

        let scale = Vec3::from_array(self.scale.to_array().map(|s| {
            if s.is_finite() {
                s.abs()
            } else {
                DEFAULT_SCALE
            }
        }));

        let rotation = if self.rotation.is_finite() && self.rotation.length_squared() > 1e-12 {
            self.rotation.normalize()
        } else {
            Quat::IDENTITY
        };

        let degree = self.sh_degree();
        let sh = self
            .sh
            .iter()
            .take(sh_component_count(degree))
            .map(|&c| if c.is_finite() { c } else { 0.0 })
            .collect();

        SplatRecord {
            position,
            scale,
            rotation,
            color: self.color,
            sh,
        }
    }
}
