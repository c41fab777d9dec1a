// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The warehouse occupancy grid.
//!
//! The grid is immutable after load for the lifetime of the process, which
//! is what lets the planner read it without holding any lock. Cells are
//! row-major, `0` free, `1` obstacle; everything out of bounds counts as an
//! obstacle.

use std::fmt::Write as _;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use fleetd_protocol::messages::Point;

use crate::config::{MapConfig, MapMode};
use crate::error::CoreError;

/// Cells the RANDOM generator always keeps free so the stock simulator
/// vehicles have somewhere to spawn.
const RESERVED_SPAWN_CELLS: [(i32, i32); 3] = [(1, 1), (8, 1), (5, 5)];

#[derive(Debug, Clone)]
pub struct GridMap {
    width: i32,
    height: i32,
    cells: Vec<u8>,
}

impl GridMap {
    /// The built-in fallback map: 10x10, walls around the edge, open inside.
    pub fn default_bordered() -> Self {
        let (width, height) = (10, 10);
        let mut map = Self {
            width,
            height,
            cells: vec![0; (width * height) as usize],
        };
        map.add_border();
        map
    }

    /// Load a map from a file: `w h` on the first line, then `w*h` cells in
    /// row-major order, whitespace-separated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let desc = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::map_load(&desc, e.to_string()))?;

        let mut numbers = text.split_whitespace().map(|tok| tok.parse::<i32>());

        let mut next = |what: &str| -> Result<i32, CoreError> {
            match numbers.next() {
                Some(Ok(n)) => Ok(n),
                Some(Err(_)) => Err(CoreError::map_load(&desc, format!("bad {what} token"))),
                None => Err(CoreError::map_load(&desc, format!("{what} missing"))),
            }
        };

        let width = next("width")?;
        let height = next("height")?;
        if width <= 0 || height <= 0 {
            return Err(CoreError::map_load(&desc, "dimensions must be positive"));
        }

        let mut cells = Vec::with_capacity((width * height) as usize);
        for i in 0..(width * height) {
            let v = next(&format!("cell {i}"))?;
            cells.push(if v != 0 { 1 } else { 0 });
        }

        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Generate a random map: `ratio` of the interior becomes walls, the
    /// reserved spawn cells stay free, and a border wall is forced.
    ///
    /// With `seed` set the map is fully reproducible.
    pub fn random(width: i32, height: i32, ratio: f64, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let mut map = Self {
            width,
            height,
            cells: vec![0; (width * height) as usize],
        };

        for y in 0..height {
            for x in 0..width {
                if rng.gen_range(0.0..1.0) < ratio {
                    map.cells[(y * width + x) as usize] = 1;
                }
            }
        }

        for (x, y) in RESERVED_SPAWN_CELLS {
            if x >= 0 && x < width && y >= 0 && y < height {
                map.cells[(y * width + x) as usize] = 0;
            }
        }

        map.add_border();
        map
    }

    /// Build whichever map the configuration asks for. A FILE-mode load
    /// failure falls back to the default map with a warning, matching the
    /// operational stance that a fleet server with a degraded map beats no
    /// fleet server at all.
    pub fn from_config(config: &MapConfig) -> Self {
        match config.mode {
            MapMode::Default => Self::default_bordered(),
            MapMode::File => match Self::from_file(&config.path) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, path = %config.path, "map load failed, using default map");
                    Self::default_bordered()
                }
            },
            MapMode::Random => Self::random(config.width, config.height, config.ratio, config.seed),
        }
    }

    fn add_border(&mut self) {
        for x in 0..self.width {
            self.cells[x as usize] = 1;
            self.cells[((self.height - 1) * self.width + x) as usize] = 1;
        }
        for y in 0..self.height {
            self.cells[(y * self.width) as usize] = 1;
            self.cells[(y * self.width + self.width - 1) as usize] = 1;
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Whether `(x, y)` is blocked. Out-of-bounds cells are obstacles.
    pub fn is_obstacle(&self, x: i32, y: i32) -> bool {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return true;
        }
        self.cells[(y * self.width + x) as usize] != 0
    }

    pub fn is_obstacle_at(&self, p: Point) -> bool {
        self.is_obstacle(p.x, p.y)
    }

    /// ASCII preview for boot logs. Only worth printing for small maps.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity((self.width as usize + 1) * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(if self.is_obstacle(x, y) { '#' } else { '.' });
                out.push(' ');
            }
            let _ = writeln!(out);
        }
        out
    }
}
