//! Grid-Sampled Level Sets
//!
//! A level set stores signed distance samples at the cell centres of a
//! uniform grid. Queries interpolate trilinearly inside the grid and add the
//! distance to the grid for points outside it.
//!
//! # Construction
//!
//! - `band_width == 0`: every cell samples the source shape directly
//! - `band_width > 0`: only cells straddling the zero isocontour are sampled;
//!   the rest of the band is filled with the fast-marching method and
//!   clamped to `band_width` cells

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::SolverError;
use crate::math::Vec3;
use crate::shape::{Aabb, Shape};

/// Upper bound on grid cells for a single level set
pub const MAX_LEVELSET_CELLS: usize = 1 << 24;

// ============================================================================
// Uniform Grid
// ============================================================================

/// Cell-centred uniform grid
#[derive(Clone, Debug, PartialEq)]
pub struct UniformGrid {
    /// Minimum corner
    pub min_corner: Vec3,
    /// Maximum corner
    pub max_corner: Vec3,
    /// Cells per axis
    pub counts: [usize; 3],
}

impl UniformGrid {
    /// Create a grid spanning `min..max` with `counts` cells per axis
    pub fn new(min_corner: Vec3, max_corner: Vec3, counts: [usize; 3]) -> Self {
        Self {
            min_corner,
            max_corner,
            counts,
        }
    }

    /// Grid around `bounds`, padded by `padding_cells` on each side, with
    /// roughly cubic cells and `cells_on_longest_axis` cells on the longest axis
    pub fn covering(bounds: &Aabb, cells_on_longest_axis: usize, padding_cells: usize) -> Self {
        let inner = cells_on_longest_axis.max(1) as f32;
        let cell = (bounds.extents().max_element() / inner).max(f32::EPSILON);
        let pad = Vec3::splat(cell * padding_cells as f32);
        let min = bounds.min - pad;
        let max = bounds.max + pad;
        let e = max - min;
        let count = |len: f32| ((len / cell).ceil() as usize).max(2);
        let counts = [count(e.x), count(e.y), count(e.z)];
        let max = min + Vec3::new(counts[0] as f32, counts[1] as f32, counts[2] as f32) * cell;
        Self::new(min, max, counts)
    }

    /// Cell size per axis
    #[inline]
    pub fn dx(&self) -> Vec3 {
        let e = self.max_corner - self.min_corner;
        Vec3::new(
            e.x / self.counts[0] as f32,
            e.y / self.counts[1] as f32,
            e.z / self.counts[2] as f32,
        )
    }

    /// Total number of cells
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.counts[0] * self.counts[1] * self.counts[2]
    }

    /// Flat index of a cell
    #[inline]
    pub fn flat_index(&self, cell: [usize; 3]) -> usize {
        (cell[0] * self.counts[1] + cell[1]) * self.counts[2] + cell[2]
    }

    /// Cell coordinates of a flat index
    #[inline]
    pub fn cell_of(&self, flat: usize) -> [usize; 3] {
        let k = flat % self.counts[2];
        let rest = flat / self.counts[2];
        [rest / self.counts[1], rest % self.counts[1], k]
    }

    /// Centre of a cell
    #[inline]
    pub fn center(&self, cell: [usize; 3]) -> Vec3 {
        let dx = self.dx();
        self.min_corner
            + Vec3::new(
                (cell[0] as f32 + 0.5) * dx.x,
                (cell[1] as f32 + 0.5) * dx.y,
                (cell[2] as f32 + 0.5) * dx.z,
            )
    }

    /// Clamp a point into the box spanned by the outermost cell centres
    #[inline]
    pub fn clamp_minus_half(&self, p: Vec3) -> Vec3 {
        let half = self.dx() * 0.5;
        p.max(self.min_corner + half).min(self.max_corner - half)
    }

    /// Trilinear interpolation of per-cell values at a clamped location
    fn interpolate<T>(&self, values: &[T], p: Vec3, lerp: impl Fn(T, T, f32) -> T) -> T
    where
        T: Copy,
    {
        let dx = self.dx();
        let mut base = [0usize; 3];
        let mut t = [0.0f32; 3];
        for axis in 0..3 {
            let f = (p[axis] - self.min_corner[axis]) / dx[axis] - 0.5;
            let max_base = self.counts[axis].saturating_sub(2);
            let i = (f.floor().max(0.0) as usize).min(max_base);
            base[axis] = i;
            t[axis] = (f - i as f32).clamp(0.0, 1.0);
        }
        let at = |di: usize, dj: usize, dk: usize| {
            values[self.flat_index([base[0] + di, base[1] + dj, base[2] + dk])]
        };
        let x00 = lerp(at(0, 0, 0), at(1, 0, 0), t[0]);
        let x10 = lerp(at(0, 1, 0), at(1, 1, 0), t[0]);
        let x01 = lerp(at(0, 0, 1), at(1, 0, 1), t[0]);
        let x11 = lerp(at(0, 1, 1), at(1, 1, 1), t[0]);
        let y0 = lerp(x00, x10, t[1]);
        let y1 = lerp(x01, x11, t[1]);
        lerp(y0, y1, t[2])
    }
}

// ============================================================================
// Level Set
// ============================================================================

/// Signed distance field sampled on a uniform grid
#[derive(Clone, Debug, PartialEq)]
pub struct LevelSet {
    grid: UniformGrid,
    phi: Vec<f32>,
    normals: Vec<Vec3>,
    band_width: usize,
}

#[derive(Clone, Copy, Debug)]
struct MarchEntry {
    magnitude: f32,
    cell: usize,
}

impl PartialEq for MarchEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MarchEntry {}

impl PartialOrd for MarchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MarchEntry {
    // Reversed: BinaryHeap pops the smallest magnitude first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .magnitude
            .total_cmp(&self.magnitude)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

impl LevelSet {
    /// Sample `shape` onto `grid`
    pub fn from_shape(shape: &Shape, grid: UniformGrid, band_width: usize) -> Result<Self, SolverError> {
        if grid.counts.iter().any(|&c| c < 2) {
            return Err(SolverError::DegenerateGeometry {
                context: "level set grid needs at least two cells per axis",
            });
        }
        let cells = grid
            .counts
            .iter()
            .try_fold(1usize, |acc, &c| acc.checked_mul(c))
            .filter(|&n| n <= MAX_LEVELSET_CELLS)
            .ok_or(SolverError::CapacityExceeded {
                resource: "level set cells",
                limit: MAX_LEVELSET_CELLS,
            })?;
        if grid.dx().min_element() <= 0.0 {
            return Err(SolverError::DegenerateGeometry {
                context: "level set grid extent",
            });
        }

        let object_phi: Vec<f32> = (0..cells)
            .map(|i| shape.signed_distance(grid.center(grid.cell_of(i))))
            .collect();

        let mut level_set = Self {
            grid,
            phi: object_phi.clone(),
            normals: Vec::new(),
            band_width,
        };

        if band_width > 0 {
            let interface = level_set.seed_interface(&object_phi);
            let stopping = band_width as f32 * level_set.grid.dx().max_element();
            for (phi, obj) in level_set.phi.iter_mut().zip(&object_phi) {
                *phi = phi.min(stopping) * if *obj < 0.0 { -1.0 } else { 1.0 };
            }
            level_set.fast_march(stopping, &interface);
            for phi in &mut level_set.phi {
                *phi = phi.clamp(-stopping, stopping);
            }
        }

        level_set.compute_normals();
        Ok(level_set)
    }

    /// Grid definition
    #[inline]
    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    /// Narrow band width in cells (0 = exact everywhere)
    #[inline]
    pub fn band_width(&self) -> usize {
        self.band_width
    }

    /// Local bounds (the grid box)
    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.grid.min_corner, self.grid.max_corner)
    }

    /// Signed distance at `p`
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        let location = self.grid.clamp_minus_half(p);
        let outside = (location - p).length_squared();
        let phi = self.grid.interpolate(&self.phi, location, |a, b, t| a + (b - a) * t);
        if outside > 0.0 {
            outside.sqrt() + phi
        } else {
            phi
        }
    }

    /// Signed distance and unit normal at `p`
    pub fn phi_with_normal(&self, p: Vec3) -> (f32, Vec3) {
        let location = self.grid.clamp_minus_half(p);
        let outside = (location - p).length_squared();
        let phi = self.grid.interpolate(&self.phi, location, |a, b, t| a + (b - a) * t);
        if outside > 0.0 {
            let (_, normal) = self.bounds().phi_with_normal(p);
            (outside.sqrt() + phi, normal)
        } else {
            let normal = self
                .grid
                .interpolate(&self.normals, location, |a, b, t| a.lerp(b, t))
                .normalize_or(Vec3::UNIT_X);
            (phi, normal)
        }
    }

    /// Points projected onto the zero isocontour from nearby cell centres
    pub fn surface_samples(&self) -> Vec<Vec3> {
        let band = self.grid.dx().max_element();
        (0..self.phi.len())
            .filter(|&i| self.phi[i].abs() < band)
            .map(|i| {
                let c = self.grid.center(self.grid.cell_of(i));
                c - self.normals[i] * self.phi[i]
            })
            .collect()
    }

    // ========================================================================
    // Construction helpers
    // ========================================================================

    fn neighbors(&self, cell: [usize; 3]) -> impl Iterator<Item = (usize, [usize; 3])> + '_ {
        (0..3).flat_map(move |axis| {
            let down = (cell[axis] > 0).then(|| {
                let mut c = cell;
                c[axis] -= 1;
                (axis, c)
            });
            let up = (cell[axis] + 1 < self.grid.counts[axis]).then(|| {
                let mut c = cell;
                c[axis] += 1;
                (axis, c)
            });
            down.into_iter().chain(up)
        })
    }

    /// Cells whose sign differs from a face neighbour get exact distances
    fn seed_interface(&mut self, object_phi: &[f32]) -> Vec<usize> {
        let sign = |v: f32| v < 0.0;
        let mut interface = Vec::new();
        for i in 0..object_phi.len() {
            let cell = self.grid.cell_of(i);
            let boundary = self
                .neighbors(cell)
                .any(|(_, n)| sign(object_phi[self.grid.flat_index(n)]) != sign(object_phi[i]));
            if boundary {
                self.phi[i] = object_phi[i].abs();
                interface.push(i);
            } else {
                self.phi[i] = f32::MAX;
            }
        }
        interface
    }

    fn fast_march(&mut self, stopping: f32, interface: &[usize]) {
        let n = self.phi.len();
        let mut done = vec![false; n];
        let mut popped = vec![false; n];
        let mut heap = BinaryHeap::with_capacity(interface.len());
        for &cell in interface {
            done[cell] = true;
            heap.push(MarchEntry {
                magnitude: self.phi[cell].abs(),
                cell,
            });
        }

        while let Some(entry) = heap.pop() {
            if popped[entry.cell] {
                continue;
            }
            if entry.magnitude > stopping {
                break;
            }
            popped[entry.cell] = true;
            done[entry.cell] = true;
            let cell = self.grid.cell_of(entry.cell);
            let neighbors: Vec<usize> = self
                .neighbors(cell)
                .map(|(_, c)| self.grid.flat_index(c))
                .collect();
            for nb in neighbors {
                if done[nb] {
                    continue;
                }
                let updated = self.eikonal_update(&done, nb);
                if updated.abs() < self.phi[nb].abs() {
                    self.phi[nb] = updated;
                    heap.push(MarchEntry {
                        magnitude: updated.abs(),
                        cell: nb,
                    });
                }
            }
        }
    }

    /// First-order upwind solution of `|grad phi| = 1` from finished neighbours
    fn eikonal_update(&self, done: &[bool], flat: usize) -> f32 {
        let cell = self.grid.cell_of(flat);
        let dx = self.grid.dx();
        let mut samples: Vec<(f32, f32)> = Vec::with_capacity(3);
        for axis in 0..3 {
            let mut best: Option<f32> = None;
            for (a, c) in self.neighbors(cell) {
                if a != axis {
                    continue;
                }
                let idx = self.grid.flat_index(c);
                if done[idx] {
                    let v = self.phi[idx].abs();
                    best = Some(best.map_or(v, |b: f32| b.min(v)));
                }
            }
            if let Some(v) = best {
                samples.push((v, dx[axis]));
            }
        }
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));

        let sign = if self.phi[flat] < 0.0 { -1.0 } else { 1.0 };
        let Some(&(first, h0)) = samples.first() else {
            return self.phi[flat];
        };
        let mut solution = first + h0;
        for used in 2..=samples.len() {
            if solution <= samples[used - 1].0 {
                break;
            }
            let (mut a, mut b, mut c) = (0.0f32, 0.0f32, -1.0f32);
            for &(v, h) in &samples[..used] {
                let inv = 1.0 / (h * h);
                a += inv;
                b -= 2.0 * v * inv;
                c += v * v * inv;
            }
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                break;
            }
            solution = (-b + disc.sqrt()) / (2.0 * a);
        }
        sign * solution
    }

    fn compute_normals(&mut self) {
        let dx = self.grid.dx();
        self.normals = (0..self.phi.len())
            .map(|i| {
                let x = self.grid.center(self.grid.cell_of(i));
                let grad = |axis: usize| {
                    let step = Vec3::axis_vector(axis) * dx[axis];
                    (self.signed_distance(x + step) - self.signed_distance(x - step)) / (2.0 * dx[axis])
                };
                Vec3::new(grad(0), grad(1), grad(2)).normalize_or(Vec3::UNIT_X)
            })
            .collect();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere_grid() -> UniformGrid {
        UniformGrid::new(Vec3::splat(-2.0), Vec3::splat(2.0), [20, 20, 20])
    }

    #[test]
    fn test_grid_indexing_roundtrip() {
        let g = UniformGrid::new(Vec3::ZERO, Vec3::new(3.0, 4.0, 5.0), [3, 4, 5]);
        for i in 0..g.cell_count() {
            assert_eq!(g.flat_index(g.cell_of(i)), i);
        }
        assert_eq!(g.center([0, 0, 0]), Vec3::splat(0.5));
    }

    #[test]
    fn test_exact_levelset_matches_sphere() {
        let sphere = Shape::Sphere(crate::shape::Sphere::new(Vec3::ZERO, 1.0));
        let ls = LevelSet::from_shape(&sphere, sphere_grid(), 0).expect("valid grid");
        for p in [Vec3::new(0.5, 0.0, 0.0), Vec3::new(0.0, 1.3, 0.2), Vec3::new(-0.4, 0.4, 0.1)] {
            let exact = sphere.signed_distance(p);
            let sampled = ls.signed_distance(p);
            assert!((exact - sampled).abs() < 0.05, "at {p:?}: {exact} vs {sampled}");
        }
        // the field has a kink at the centre, cell-centred samples are half a diagonal away
        let centre = ls.signed_distance(Vec3::ZERO);
        assert!((centre + 1.0).abs() <= 0.2, "centre within a cell width: {centre}");
        let (_, n) = ls.phi_with_normal(Vec3::new(0.0, 0.0, 0.95));
        assert!(n.z > 0.95, "normal should point outward, got {n:?}");
    }

    #[test]
    fn test_levelset_accurate_away_from_centre() {
        let sphere = Shape::Sphere(crate::shape::Sphere::new(Vec3::ZERO, 1.0));
        let ls = LevelSet::from_shape(&sphere, sphere_grid(), 0).expect("valid grid");
        let mut worst = 0.0f32;
        for i in 0..40 {
            for j in 0..40 {
                let p = Vec3::new(-1.9 + i as f32 * 0.095, -1.9 + j as f32 * 0.095, 0.03);
                if p.length() < 0.3 {
                    continue;
                }
                worst = worst.max((sphere.signed_distance(p) - ls.signed_distance(p)).abs());
            }
        }
        assert!(worst < 0.05, "trilinear error off the kink: {worst}");
    }

    #[test]
    fn test_outside_grid_adds_distance() {
        let sphere = Shape::Sphere(crate::shape::Sphere::new(Vec3::ZERO, 1.0));
        let ls = LevelSet::from_shape(&sphere, sphere_grid(), 0).expect("valid grid");
        let far = ls.signed_distance(Vec3::new(10.0, 0.0, 0.0));
        assert!(far > 8.0, "far point should be well outside, got {far}");
        let (_, n) = ls.phi_with_normal(Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(n, Vec3::UNIT_X);
    }

    #[test]
    fn test_fast_marching_band() {
        let sphere = Shape::Sphere(crate::shape::Sphere::new(Vec3::ZERO, 1.0));
        let ls = LevelSet::from_shape(&sphere, sphere_grid(), 3).expect("valid grid");
        let dx = ls.grid().dx().x;
        let band = 3.0 * dx;
        for p in [Vec3::new(0.8, 0.0, 0.0), Vec3::new(0.0, 1.25, 0.0)] {
            let exact = sphere.signed_distance(p);
            let sampled = ls.signed_distance(p);
            assert!((exact - sampled).abs() < 0.6 * dx, "at {p:?}: {exact} vs {sampled}");
        }
        // Deep inside is clamped to the band
        assert!((ls.signed_distance(Vec3::ZERO) + band).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_tiny_grid() {
        let sphere = Shape::Sphere(crate::shape::Sphere::new(Vec3::ZERO, 1.0));
        let grid = UniformGrid::new(Vec3::splat(-1.0), Vec3::splat(1.0), [1, 4, 4]);
        assert!(matches!(
            LevelSet::from_shape(&sphere, grid, 0),
            Err(SolverError::DegenerateGeometry { .. })
        ));
    }

    #[test]
    fn test_surface_samples_lie_on_surface() {
        let b = Shape::Box(Aabb::from_center_half(Vec3::ZERO, Vec3::splat(0.75)));
        let grid = UniformGrid::covering(&Aabb::from_center_half(Vec3::ZERO, Vec3::splat(0.75)), 12, 2);
        let ls = LevelSet::from_shape(&b, grid, 0).expect("valid grid");
        let samples = ls.surface_samples();
        assert!(!samples.is_empty());
        for p in samples {
            assert!(b.signed_distance(p).abs() < 0.1, "sample {p:?} off surface");
        }
    }
}
