//! Scalar volumes with named channels and voxel masks.
//!
//! Voxel `(i, j, k)` covers the half-open box
//! `origin + [i, i+1) * spacing.x` (and likewise on y and z); its midpoint is
//! `origin + (i + 0.5) * spacing`. Channel data is stored x-fastest:
//! `i + j * nx + k * nx * ny`.

use std::ops::{Deref, DerefMut};

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{ProbeError, ProbeResult};

/// A named scalar channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub data: Vec<f64>,
}

/// Inclusive voxel index box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelBox {
    pub lo: [usize; 3],
    pub hi: [usize; 3],
}

impl VoxelBox {
    /// Number of voxels in the box.
    pub fn len(&self) -> usize {
        (0..3).map(|a| self.hi[a] - self.lo[a] + 1).product()
    }

    /// Always false: empty boxes are never constructed.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Voxel coordinates in storage order (x fastest).
    pub fn iter(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        (self.lo[2]..=self.hi[2]).flat_map(move |k| {
            (self.lo[1]..=self.hi[1])
                .flat_map(move |j| (self.lo[0]..=self.hi[0]).map(move |i| [i, j, k]))
        })
    }
}

/// A 3D scalar grid with one or more named channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Grid dimensions [x, y, z].
    pub dims: [usize; 3],
    /// Min corner of voxel (0, 0, 0) in physical coordinates.
    pub origin: Point3<f64>,
    /// Voxel edge lengths per axis.
    pub spacing: Vector3<f64>,
    channels: Vec<Channel>,
    #[serde(skip)]
    masks: HashMap<String, Vec<bool>>,
}

impl Volume {
    /// Create a volume without channels.
    ///
    /// # Errors
    /// Returns [`ProbeError::EmptyVolume`] for a zero dimension and
    /// [`ProbeError::InvalidOptions`] for non-positive spacing.
    pub fn new(dims: [usize; 3], origin: Point3<f64>, spacing: Vector3<f64>) -> ProbeResult<Self> {
        let volume = Self {
            dims,
            origin,
            spacing,
            channels: Vec::new(),
            masks: HashMap::new(),
        };
        volume.validate()?;
        Ok(volume)
    }

    /// Create a volume with isotropic voxels.
    pub fn isotropic(dims: [usize; 3], origin: Point3<f64>, voxel_size: f64) -> ProbeResult<Self> {
        Self::new(dims, origin, Vector3::repeat(voxel_size))
    }

    /// Check geometry and channel lengths, e.g. after deserialising.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.dims.contains(&0) {
            return Err(ProbeError::empty_volume(format!(
                "dimensions {:?} contain a zero",
                self.dims
            )));
        }
        if !self.spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(ProbeError::invalid_param(
                "spacing",
                format!("voxel spacing must be positive, got {:?}", self.spacing),
            ));
        }
        let n = self.voxel_count();
        for channel in &self.channels {
            if channel.data.len() != n {
                return Err(ProbeError::length_mismatch(
                    format!("channel `{}`", channel.name),
                    n,
                    channel.data.len(),
                ));
            }
        }
        Ok(())
    }

    /// Total number of voxels.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Convert 3D grid coordinates to linear index.
    #[inline]
    pub fn linearize(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims[0] + k * self.dims[0] * self.dims[1]
    }

    /// Convert linear index to 3D grid coordinates.
    #[inline]
    pub fn delinearize(&self, idx: usize) -> [usize; 3] {
        let plane = self.dims[0] * self.dims[1];
        let k = idx / plane;
        let rem = idx % plane;
        [rem % self.dims[0], rem / self.dims[0], k]
    }

    /// Physical midpoint of a voxel.
    #[inline]
    pub fn voxel_center(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        Point3::new(
            self.origin.x + (i as f64 + 0.5) * self.spacing.x,
            self.origin.y + (j as f64 + 0.5) * self.spacing.y,
            self.origin.z + (k as f64 + 0.5) * self.spacing.z,
        )
    }

    /// Axis-aligned physical bounds `[min, max)`.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let extent = Vector3::new(
            self.dims[0] as f64 * self.spacing.x,
            self.dims[1] as f64 * self.spacing.y,
            self.dims[2] as f64 * self.spacing.z,
        );
        (self.origin, self.origin + extent)
    }

    /// Half-open containment test.
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        self.enclosing_voxel(p).is_some()
    }

    /// Voxel whose box contains `p`.
    pub fn enclosing_voxel(&self, p: &Point3<f64>) -> Option<[usize; 3]> {
        let mut out = [0usize; 3];
        for axis in 0..3 {
            let u = (p[axis] - self.origin[axis]) / self.spacing[axis];
            if !(u >= 0.0) {
                return None;
            }
            let idx = u.floor() as usize;
            if idx >= self.dims[axis] {
                return None;
            }
            out[axis] = idx;
        }
        Some(out)
    }

    /// Voxels whose midpoints lie inside the physical box `[min, max]`.
    ///
    /// Returns None when no midpoint falls inside.
    pub fn index_range(&self, min: &Point3<f64>, max: &Point3<f64>) -> Option<VoxelBox> {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for axis in 0..3 {
            let first = ((min[axis] - self.origin[axis]) / self.spacing[axis] - 0.5).ceil();
            let last = ((max[axis] - self.origin[axis]) / self.spacing[axis] - 0.5).floor();
            let first = first.max(0.0);
            let last = last.min(self.dims[axis] as f64 - 1.0);
            if !(first <= last) {
                return None;
            }
            lo[axis] = first as usize;
            hi[axis] = last as usize;
        }
        Some(VoxelBox { lo, hi })
    }

    // ---------------------------------------------------------------------
    // Channels
    // ---------------------------------------------------------------------

    /// Add a channel, replacing any channel of the same name.
    pub fn add_channel(&mut self, name: impl Into<String>, data: Vec<f64>) -> ProbeResult<()> {
        let name = name.into();
        if data.len() != self.voxel_count() {
            return Err(ProbeError::length_mismatch(
                format!("channel `{}`", name),
                self.voxel_count(),
                data.len(),
            ));
        }
        match self.channels.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.data = data,
            None => self.channels.push(Channel { name, data }),
        }
        Ok(())
    }

    /// Add a channel computed from each voxel midpoint.
    pub fn add_channel_fn<F>(&mut self, name: impl Into<String>, f: F) -> ProbeResult<()>
    where
        F: Fn(Point3<f64>) -> f64 + Sync,
    {
        let data: Vec<f64> = (0..self.voxel_count())
            .into_par_iter()
            .map(|idx| {
                let [i, j, k] = self.delinearize(idx);
                f(self.voxel_center(i, j, k))
            })
            .collect();
        self.add_channel(name, data)
    }

    /// Remove a channel, returning its data.
    pub fn remove_channel(&mut self, name: &str) -> Option<Vec<f64>> {
        let pos = self.channels.iter().position(|c| c.name == name)?;
        Some(self.channels.remove(pos).data)
    }

    /// True if a channel of this name exists.
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.name == name)
    }

    /// Channel names in insertion order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    /// Name of the first channel, the default for sampling.
    pub fn first_channel(&self) -> Option<&str> {
        self.channels.first().map(|c| c.name.as_str())
    }

    /// Raw channel data.
    pub fn channel(&self, name: &str) -> ProbeResult<&[f64]> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.data.as_slice())
            .ok_or_else(|| ProbeError::missing_channel(name))
    }

    /// Mutable channel data.
    pub fn channel_mut(&mut self, name: &str) -> ProbeResult<&mut [f64]> {
        self.channels
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| c.data.as_mut_slice())
            .ok_or_else(|| ProbeError::missing_channel(name))
    }

    /// Read-only lookups into one channel.
    pub fn view(&self, name: &str) -> ProbeResult<ChannelView<'_>> {
        Ok(ChannelView {
            volume: self,
            data: self.channel(name)?,
        })
    }

    /// Voxel value, or None outside the grid.
    pub fn get(&self, channel: &str, i: usize, j: usize, k: usize) -> ProbeResult<Option<f64>> {
        let data = self.channel(channel)?;
        Ok(self.in_grid(i, j, k).then(|| data[self.linearize(i, j, k)]))
    }

    /// Set a voxel value. Writes outside the grid are ignored.
    pub fn set(&mut self, channel: &str, i: usize, j: usize, k: usize, value: f64) -> ProbeResult<()> {
        if !self.in_grid(i, j, k) {
            trace!(i, j, k, "Ignoring write outside volume");
            return Ok(());
        }
        let idx = self.linearize(i, j, k);
        self.channel_mut(channel)?[idx] = value;
        Ok(())
    }

    /// Finite minimum and maximum of a channel, or None if it has no finite value.
    pub fn data_range(&self, channel: &str) -> ProbeResult<Option<(f64, f64)>> {
        let data = self.channel(channel)?;
        Ok(finite_range(data))
    }

    #[inline]
    fn in_grid(&self, i: usize, j: usize, k: usize) -> bool {
        i < self.dims[0] && j < self.dims[1] && k < self.dims[2]
    }

    // ---------------------------------------------------------------------
    // Masks
    // ---------------------------------------------------------------------

    /// Register a named voxel mask, replacing one of the same name.
    pub fn add_mask(&mut self, name: impl Into<String>, mask: Vec<bool>) -> ProbeResult<()> {
        let name = name.into();
        if mask.len() != self.voxel_count() {
            return Err(ProbeError::length_mismatch(
                format!("mask `{}`", name),
                self.voxel_count(),
                mask.len(),
            ));
        }
        debug!(mask = %name, "Adding volume mask");
        self.masks.insert(name, mask);
        Ok(())
    }

    /// Remove a mask, returning it.
    pub fn remove_mask(&mut self, name: &str) -> Option<Vec<bool>> {
        let removed = self.masks.remove(name);
        if removed.is_some() {
            debug!(mask = name, "Removed volume mask");
        }
        removed
    }

    /// Look up a mask.
    pub fn mask(&self, name: &str) -> Option<&[bool]> {
        self.masks.get(name).map(Vec::as_slice)
    }

    /// True if a mask of this name is registered.
    pub fn has_mask(&self, name: &str) -> bool {
        self.masks.contains_key(name)
    }

    /// Add a mask for the lifetime of the returned guard.
    ///
    /// A mask already registered under `name` is shadowed while the guard
    /// lives and restored when it drops.
    pub fn scoped_mask(
        &mut self,
        name: impl Into<String>,
        mask: Vec<bool>,
    ) -> ProbeResult<ScopedMask<'_>> {
        let name = name.into();
        if mask.len() != self.voxel_count() {
            return Err(ProbeError::length_mismatch(
                format!("mask `{}`", name),
                self.voxel_count(),
                mask.len(),
            ));
        }
        let shadowed = self.masks.insert(name.clone(), mask);
        debug!(mask = %name, shadowed = shadowed.is_some(), "Adding scoped volume mask");
        Ok(ScopedMask {
            volume: self,
            name,
            shadowed,
        })
    }

    /// Mask of voxels whose channel value is finite.
    pub fn finite_mask(&self, channel: &str) -> ProbeResult<Vec<bool>> {
        Ok(self.channel(channel)?.iter().map(|v| v.is_finite()).collect())
    }
}

/// Guard returned by [`Volume::scoped_mask`].
///
/// Dereferences to the volume. On drop the mask is removed, or replaced by
/// the mask it shadowed.
#[derive(Debug)]
pub struct ScopedMask<'a> {
    volume: &'a mut Volume,
    name: String,
    shadowed: Option<Vec<bool>>,
}

impl ScopedMask<'_> {
    /// Name of the guarded mask.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Deref for ScopedMask<'_> {
    type Target = Volume;

    fn deref(&self) -> &Volume {
        self.volume
    }
}

impl DerefMut for ScopedMask<'_> {
    fn deref_mut(&mut self) -> &mut Volume {
        self.volume
    }
}

impl Drop for ScopedMask<'_> {
    fn drop(&mut self) {
        match self.shadowed.take() {
            Some(previous) => {
                debug!(mask = %self.name, "Restoring shadowed volume mask");
                self.volume.masks.insert(std::mem::take(&mut self.name), previous);
            }
            None => {
                self.volume.remove_mask(&self.name);
            }
        }
    }
}

/// Borrowed lookups into a single channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelView<'a> {
    volume: &'a Volume,
    data: &'a [f64],
}

impl<'a> ChannelView<'a> {
    /// The underlying volume.
    #[inline]
    pub fn volume(&self) -> &'a Volume {
        self.volume
    }

    /// Raw data.
    #[inline]
    pub fn data(&self) -> &'a [f64] {
        self.data
    }

    /// Value at a linear index.
    #[inline]
    pub fn at(&self, idx: usize) -> f64 {
        self.data[idx]
    }

    /// Value of the voxel enclosing `p`.
    pub fn nearest(&self, p: &Point3<f64>) -> Option<f64> {
        let [i, j, k] = self.volume.enclosing_voxel(p)?;
        Some(self.data[self.volume.linearize(i, j, k)])
    }

    /// Trilinear value at `p`, clamped to the outermost midpoints.
    pub fn trilinear(&self, p: &Point3<f64>) -> Option<f64> {
        if !self.volume.contains(p) {
            return None;
        }

        let v = self.volume;
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        let mut t = [0.0f64; 3];
        for axis in 0..3 {
            let n = v.dims[axis];
            let u = ((p[axis] - v.origin[axis]) / v.spacing[axis] - 0.5).clamp(0.0, (n - 1) as f64);
            let i0 = (u.floor() as usize).min(n - 1);
            lo[axis] = i0;
            hi[axis] = (i0 + 1).min(n - 1);
            t[axis] = u - i0 as f64;
        }

        let at = |i: usize, j: usize, k: usize| self.data[v.linearize(i, j, k)];
        let [x0, y0, z0] = lo;
        let [x1, y1, z1] = hi;
        let [xd, yd, zd] = t;

        let c00 = at(x0, y0, z0) * (1.0 - xd) + at(x1, y0, z0) * xd;
        let c01 = at(x0, y0, z1) * (1.0 - xd) + at(x1, y0, z1) * xd;
        let c10 = at(x0, y1, z0) * (1.0 - xd) + at(x1, y1, z0) * xd;
        let c11 = at(x0, y1, z1) * (1.0 - xd) + at(x1, y1, z1) * xd;

        let c0 = c00 * (1.0 - yd) + c10 * yd;
        let c1 = c01 * (1.0 - yd) + c11 * yd;

        Some(c0 * (1.0 - zd) + c1 * zd)
    }
}

/// Finite min/max of a slice.
pub(crate) fn finite_range(data: &[f64]) -> Option<(f64, f64)> {
    data.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    fn ramp_volume() -> Volume {
        let mut volume = Volume::isotropic([4, 3, 2], Point3::new(-2.0, 0.0, 0.0), 1.0).unwrap();
        volume.add_channel_fn("x", |p| p.x).unwrap();
        volume
    }

    #[test]
    fn test_linearize_roundtrip() {
        let volume = ramp_volume();
        for idx in 0..volume.voxel_count() {
            let [i, j, k] = volume.delinearize(idx);
            assert_eq!(volume.linearize(i, j, k), idx);
        }
        assert_eq!(volume.linearize(1, 2, 1), 1 + 2 * 4 + 12);
    }

    #[test]
    fn test_voxel_center_and_bounds() {
        let volume = ramp_volume();
        let c = volume.voxel_center(0, 0, 0);
        assert!(approx_eq(c.x, -1.5));
        assert!(approx_eq(c.z, 0.5));

        let (min, max) = volume.bounds();
        assert_eq!(min, Point3::new(-2.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(2.0, 3.0, 2.0));
    }

    #[test]
    fn test_containment_is_half_open() {
        let volume = ramp_volume();
        assert!(volume.contains(&Point3::new(-2.0, 0.0, 0.0)));
        assert!(!volume.contains(&Point3::new(2.0, 1.0, 1.0)));
        assert!(!volume.contains(&Point3::new(0.0, -0.001, 1.0)));
        assert!(!volume.contains(&Point3::new(f64::NAN, 1.0, 1.0)));
        assert_eq!(
            volume.enclosing_voxel(&Point3::new(0.2, 2.9, 1.0)),
            Some([2, 2, 1])
        );
    }

    #[test]
    fn test_nearest_and_trilinear() {
        let volume = ramp_volume();
        let view = volume.view("x").unwrap();

        assert!(approx_eq(view.nearest(&Point3::new(0.9, 1.0, 1.0)).unwrap(), 0.5));

        // Linear field is reproduced exactly between midpoints.
        let p = Point3::new(0.25, 1.2, 0.7);
        assert!(approx_eq(view.trilinear(&p).unwrap(), 0.25));

        // Clamped beyond the outermost midpoint.
        let edge = Point3::new(1.9, 1.0, 1.0);
        assert!(approx_eq(view.trilinear(&edge).unwrap(), 1.5));

        assert!(view.trilinear(&Point3::new(5.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_single_voxel_trilinear() {
        let mut volume = Volume::isotropic([1, 1, 1], Point3::origin(), 2.0).unwrap();
        volume.add_channel("v", vec![7.0]).unwrap();
        let view = volume.view("v").unwrap();
        assert!(approx_eq(view.trilinear(&Point3::new(0.1, 1.9, 1.0)).unwrap(), 7.0));
    }

    #[test]
    fn test_index_range() {
        let volume = ramp_volume();
        let range = volume
            .index_range(&Point3::new(-1.6, 0.0, 0.0), &Point3::new(0.6, 0.6, 5.0))
            .unwrap();
        assert_eq!(range.lo, [0, 0, 0]);
        assert_eq!(range.hi, [2, 0, 1]);
        assert_eq!(range.len(), 6);
        assert_eq!(range.iter().count(), 6);
        assert_eq!(range.iter().next(), Some([0, 0, 0]));

        // Box between midpoints holds none.
        assert!(
            volume
                .index_range(&Point3::new(-1.4, 0.6, 0.6), &Point3::new(-0.6, 1.4, 1.4))
                .is_none()
        );
        // Box outside the grid.
        assert!(
            volume
                .index_range(&Point3::new(10.0, 0.0, 0.0), &Point3::new(11.0, 1.0, 1.0))
                .is_none()
        );
    }

    #[test]
    fn test_get_set_and_range() {
        let mut volume = ramp_volume();
        volume.set("x", 1, 1, 1, 42.0).unwrap();
        assert_eq!(volume.get("x", 1, 1, 1).unwrap(), Some(42.0));
        assert_eq!(volume.get("x", 9, 1, 1).unwrap(), None);
        volume.set("x", 9, 9, 9, 1.0).unwrap();

        volume.set("x", 0, 0, 0, f64::NAN).unwrap();
        assert_eq!(volume.data_range("x").unwrap(), Some((-1.5, 42.0)));
        assert!(matches!(
            volume.data_range("nope"),
            Err(ProbeError::MissingChannel { .. })
        ));
    }

    #[test]
    fn test_channel_replace_and_length() {
        let mut volume = ramp_volume();
        volume.add_channel("x", vec![1.0; 24]).unwrap();
        assert_eq!(volume.channel_names().count(), 1);
        assert!(volume.add_channel("y", vec![1.0; 3]).is_err());
        assert_eq!(volume.remove_channel("x").map(|d| d.len()), Some(24));
        assert!(!volume.has_channel("x"));
    }

    #[test]
    fn test_scoped_mask_removed_on_drop() {
        let mut volume = ramp_volume();
        {
            let guard = volume.scoped_mask("sampling", vec![true; 24]).unwrap();
            assert!(guard.has_mask("sampling"));
            assert_eq!(guard.name(), "sampling");
        }
        assert!(!volume.has_mask("sampling"));
        assert!(volume.scoped_mask("bad", vec![true; 2]).is_err());
        assert!(!volume.has_mask("bad"));
    }

    #[test]
    fn test_scoped_mask_restores_shadowed_mask() {
        let mut volume = ramp_volume();
        let mut own = vec![false; 24];
        own[3] = true;
        volume.add_mask("sampling", own.clone()).unwrap();
        {
            let guard = volume.scoped_mask("sampling", vec![true; 24]).unwrap();
            assert_eq!(guard.mask("sampling"), Some(&[true; 24][..]));
        }
        assert_eq!(volume.mask("sampling"), Some(own.as_slice()));

        // A rejected scoped mask leaves the existing one alone.
        assert!(volume.scoped_mask("sampling", vec![true; 2]).is_err());
        assert_eq!(volume.mask("sampling"), Some(own.as_slice()));
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(Volume::isotropic([0, 1, 1], Point3::origin(), 1.0).is_err());
        assert!(Volume::isotropic([1, 1, 1], Point3::origin(), 0.0).is_err());
    }
}
