//! Dense row-major grid used for resource units, stand ids and raster values

use serde::{Deserialize, Serialize};

/// Cell position in a grid; `y` grows northwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub x: u32,
    pub y: u32,
}

impl GridPos {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    cells: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            cells: vec![value; (width * height) as usize],
        }
    }
}

impl<T> Grid<T> {
    /// Builds a grid from cells in row-major order (row 0 is the southern row).
    pub fn from_cells(width: u32, height: u32, cells: Vec<T>) -> Option<Self> {
        if cells.len() != (width * height) as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    /// Convert position to linear index
    pub fn index_of(&self, pos: GridPos) -> Option<usize> {
        if self.contains(pos) {
            Some((pos.y * self.width + pos.x) as usize)
        } else {
            None
        }
    }

    /// Convert linear index to position
    pub fn pos_of(&self, index: usize) -> Option<GridPos> {
        if index < self.cells.len() {
            let index = index as u32;
            Some(GridPos {
                x: index % self.width,
                y: index / self.width,
            })
        } else {
            None
        }
    }

    pub fn get(&self, pos: GridPos) -> Option<&T> {
        self.index_of(pos).map(|index| &self.cells[index])
    }

    pub fn get_mut(&mut self, pos: GridPos) -> Option<&mut T> {
        self.index_of(pos).map(move |index| &mut self.cells[index])
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// Positions paired with cell values, in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (GridPos, &T)> + '_ {
        let width = self.width;
        self.cells.iter().enumerate().map(move |(index, value)| {
            let index = index as u32;
            (
                GridPos {
                    x: index % width,
                    y: index / width,
                },
                value,
            )
        })
    }
}
