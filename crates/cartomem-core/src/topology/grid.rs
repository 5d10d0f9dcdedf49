//! 2-D grid topology
//!
//! Rectangular and hexagonal lattices with bounded or toroidal boundaries,
//! index/coordinate conversion, neighbor enumeration within a radius
//! (memoized), and visualization coordinate projection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// SHAPE / BOUNDARY
// ============================================================================

/// Lattice arrangement of the grid nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GridShape {
    /// Square lattice, Euclidean grid distance
    #[default]
    Rectangular,
    /// Offset hexagonal lattice, cube-coordinate distance
    Hexagonal,
}

/// Edge behavior of the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GridBoundary {
    /// Hard edges
    #[default]
    Bounded,
    /// Wrap-around on both axes (rectangular only)
    Toroidal,
}

/// Projection mode for visualization coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordMode {
    /// Raw lattice positions
    #[default]
    Cartesian,
    /// Positions divided by grid extent, in [0, 1]
    Normalized,
    /// Y-flipped for screen-space rendering
    Screen,
}

// ============================================================================
// GRID TOPOLOGY
// ============================================================================

/// A fixed-size 2-D grid with distance, neighborhood, and projection ops.
///
/// Neighbor enumeration is memoized per `(center, radius)`; the memo lives
/// as long as the topology instance, which the trainer scopes to a single
/// run (the engine keeps its own instance for cluster extraction).
#[derive(Debug, Clone)]
pub struct GridTopology {
    width: usize,
    height: usize,
    shape: GridShape,
    boundary: GridBoundary,
    neighbor_memo: Arc<Mutex<HashMap<(usize, u64), Arc<Vec<usize>>>>>,
}

impl GridTopology {
    /// Create a grid. Toroidal hexagonal lattices are unsupported and fall
    /// back to bounded.
    pub fn new(width: usize, height: usize, shape: GridShape, boundary: GridBoundary) -> Self {
        let boundary = if shape == GridShape::Hexagonal && boundary == GridBoundary::Toroidal {
            warn!("toroidal boundary is unsupported on hexagonal grids, using bounded");
            GridBoundary::Bounded
        } else {
            boundary
        };

        Self {
            width,
            height,
            shape,
            boundary,
            neighbor_memo: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Grid width
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height
    pub fn height(&self) -> usize {
        self.height
    }

    /// Total node count (`width * height`)
    pub fn total_nodes(&self) -> usize {
        self.width * self.height
    }

    /// Lattice arrangement
    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Edge behavior
    pub fn boundary(&self) -> GridBoundary {
        self.boundary
    }

    /// Grid distance at or below which two nodes count as adjacent.
    ///
    /// Hex cube distance is halved relative to rectangular Euclidean, so the
    /// diagonal allowance differs per shape.
    pub fn adjacency_threshold(&self) -> f64 {
        match self.shape {
            GridShape::Rectangular => std::f64::consts::SQRT_2 + 0.01,
            GridShape::Hexagonal => 1.0 + 0.01,
        }
    }

    // ------------------------------------------------------------------
    // Index <-> coordinate conversion
    // ------------------------------------------------------------------

    /// Linear index of `(x, y)`
    pub fn coords_to_index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// `(x, y)` of a linear index
    pub fn index_to_coords(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    /// Whether the index addresses a node on this grid
    pub fn contains_index(&self, index: usize) -> bool {
        index < self.total_nodes()
    }

    // ------------------------------------------------------------------
    // Distance
    // ------------------------------------------------------------------

    /// Grid distance between two nodes given by linear index
    pub fn grid_distance(&self, a: usize, b: usize) -> f64 {
        let (ax, ay) = self.index_to_coords(a);
        let (bx, by) = self.index_to_coords(b);
        self.coord_distance(ax as i64, ay as i64, bx as i64, by as i64)
    }

    fn coord_distance(&self, ax: i64, ay: i64, bx: i64, by: i64) -> f64 {
        match self.shape {
            GridShape::Rectangular => {
                let mut dx = (ax - bx).abs() as f64;
                let mut dy = (ay - by).abs() as f64;
                if self.boundary == GridBoundary::Toroidal {
                    dx = dx.min(self.width as f64 - dx);
                    dy = dy.min(self.height as f64 - dy);
                }
                (dx * dx + dy * dy).sqrt()
            }
            GridShape::Hexagonal => {
                // Offset (odd-row) -> cube coordinates
                let (x1, y1, z1) = Self::offset_to_cube(ax, ay);
                let (x2, y2, z2) = Self::offset_to_cube(bx, by);
                ((x1 - x2).abs() + (y1 - y2).abs() + (z1 - z2).abs()) as f64 / 2.0
            }
        }
    }

    fn offset_to_cube(col: i64, row: i64) -> (i64, i64, i64) {
        let x = col - (row - (row & 1)) / 2;
        let z = row;
        let y = -x - z;
        (x, y, z)
    }

    // ------------------------------------------------------------------
    // Neighborhoods
    // ------------------------------------------------------------------

    /// All node indices within grid distance `radius` of `center`,
    /// including the center itself. Memoized per `(center, radius)`.
    pub fn neighbors_within(&self, center: usize, radius: f64) -> Arc<Vec<usize>> {
        let key = (center, radius.to_bits());
        if let Some(cached) = self.neighbor_memo.lock().unwrap().get(&key) {
            return Arc::clone(cached);
        }

        let (cx, cy) = self.index_to_coords(center);
        let reach = radius.ceil() as i64;
        let mut out = Vec::new();

        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let nx = cx as i64 + dx;
                let ny = cy as i64 + dy;
                let (nx, ny) = match self.boundary {
                    GridBoundary::Bounded => {
                        if nx < 0 || ny < 0 || nx >= self.width as i64 || ny >= self.height as i64 {
                            continue;
                        }
                        (nx, ny)
                    }
                    GridBoundary::Toroidal => (
                        nx.rem_euclid(self.width as i64),
                        ny.rem_euclid(self.height as i64),
                    ),
                };
                let idx = self.coords_to_index(nx as usize, ny as usize);
                if self.grid_distance(center, idx) <= radius && !out.contains(&idx) {
                    out.push(idx);
                }
            }
        }
        out.sort_unstable();

        let out = Arc::new(out);
        self.neighbor_memo
            .lock()
            .unwrap()
            .insert(key, Arc::clone(&out));
        out
    }

    /// Directly adjacent nodes of `center` (excludes the center)
    pub fn adjacent(&self, center: usize) -> Vec<usize> {
        self.neighbors_within(center, self.adjacency_threshold())
            .iter()
            .copied()
            .filter(|&i| i != center)
            .collect()
    }

    /// Number of memoized neighborhoods (diagnostics)
    pub fn memo_len(&self) -> usize {
        self.neighbor_memo.lock().unwrap().len()
    }

    // ------------------------------------------------------------------
    // Visualization projection
    // ------------------------------------------------------------------

    /// Project a node to 2-D visualization coordinates
    pub fn viz_coords(&self, index: usize, mode: CoordMode) -> (f64, f64) {
        let (x, y) = self.index_to_coords(index);
        let (px, py) = match self.shape {
            GridShape::Rectangular => (x as f64, y as f64),
            GridShape::Hexagonal => {
                let sqrt3 = 3.0_f64.sqrt();
                (
                    x as f64 * sqrt3 + (y % 2) as f64 * sqrt3 / 2.0,
                    y as f64 * 1.5,
                )
            }
        };

        match mode {
            CoordMode::Cartesian => (px, py),
            CoordMode::Normalized => (
                px / (self.width.max(1) as f64),
                py / (self.height.max(1) as f64),
            ),
            CoordMode::Screen => (px, (self.height.saturating_sub(1)) as f64 - py),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
