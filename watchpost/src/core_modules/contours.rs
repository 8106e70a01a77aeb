// THEORY:
// The contour extractor is the spatial grouping step of the motion detector. It
// turns a binary change mask into a list of coherent regions and measures each one.
//
// Algorithm:
// 1.  **Outside map**: background pixels connected (4-neighbourhood) to the image
//     border are "outside". Background pixels not reachable this way are holes.
// 2.  **Region growing**: a raster scan finds the first unvisited foreground pixel of
//     each 8-connected component, which is always its top-left-most pixel, and a
//     breadth-first fill collects the component and its bounding box.
// 3.  **External only**: a component that never touches the outside (it sits inside
//     another component's hole) is not an external contour and is skipped.
// 4.  **Boundary tracing**: Moore-neighbour tracing from the top-left pixel walks the
//     outer border clockwise. The contour area is the polygon area of that walk
//     through pixel centres, so a filled w x h block measures (w - 1) * (h - 1).

use std::collections::VecDeque;

use image::GrayImage;

/// Clockwise neighbour offsets starting at west (image y axis points down).
const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn top_left(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    /// The last pixel covered by the box, inclusive.
    pub fn bottom_right(&self) -> (u32, u32) {
        (self.x + self.width - 1, self.y + self.height - 1)
    }
}

/// The traced outer border of one connected region of a mask.
#[derive(Debug, Clone)]
pub struct Contour {
    /// Boundary pixels in clockwise order, not closed (the first point is not repeated).
    pub boundary: Vec<(i32, i32)>,
    pub bounding_box: BoundingBox,
    /// Number of foreground pixels in the region.
    pub pixel_count: usize,
}

impl Contour {
    /// Area enclosed by the boundary polygon (shoelace formula).
    pub fn area(&self) -> f64 {
        let n = self.boundary.len();
        if n < 3 {
            return 0.0;
        }
        let twice: i64 = (0..n)
            .map(|i| {
                let (x0, y0) = self.boundary[i];
                let (x1, y1) = self.boundary[(i + 1) % n];
                x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
            })
            .sum();
        twice.abs() as f64 / 2.0
    }
}

struct Mask<'a> {
    pixels: &'a [u8],
    width: i32,
    height: i32,
}

impl Mask<'_> {
    fn index(&self, x: i32, y: i32) -> usize {
        (y * self.width + x) as usize
    }

    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn is_foreground(&self, x: i32, y: i32) -> bool {
        self.in_bounds(x, y) && self.pixels[self.index(x, y)] != 0
    }
}

/// Extracts the outer contours of all external 8-connected regions of non-zero pixels.
pub fn find_external_contours(mask: &GrayImage) -> Vec<Contour> {
    let mask = Mask {
        pixels: mask.as_raw(),
        width: mask.width() as i32,
        height: mask.height() as i32,
    };
    if mask.width == 0 || mask.height == 0 {
        return Vec::new();
    }

    let outside = outside_background(&mask);
    let mut visited = vec![false; mask.pixels.len()];
    let mut contours = Vec::new();

    for y in 0..mask.height {
        for x in 0..mask.width {
            let index = mask.index(x, y);
            if visited[index] || !mask.is_foreground(x, y) {
                continue;
            }

            let region = grow_region(&mask, (x, y), &mut visited);
            let touches_outside = region.pixels.iter().any(|&(px, py)| {
                NEIGHBOURS.iter().step_by(2).any(|(dx, dy)| {
                    let (nx, ny) = (px + dx, py + dy);
                    !mask.in_bounds(nx, ny) || outside[mask.index(nx, ny)]
                })
            });
            if !touches_outside {
                continue;
            }

            contours.push(Contour {
                boundary: trace_boundary(&mask, (x, y), region.pixels.len()),
                bounding_box: region.bounding_box,
                pixel_count: region.pixels.len(),
            });
        }
    }

    contours
}

/// Marks background pixels 4-connected to the image border.
fn outside_background(mask: &Mask<'_>) -> Vec<bool> {
    let mut outside = vec![false; mask.pixels.len()];
    let mut queue = VecDeque::new();

    let seed = |x: i32, y: i32, outside: &mut Vec<bool>, queue: &mut VecDeque<(i32, i32)>| {
        let index = mask.index(x, y);
        if !outside[index] && !mask.is_foreground(x, y) {
            outside[index] = true;
            queue.push_back((x, y));
        }
    };
    for x in 0..mask.width {
        seed(x, 0, &mut outside, &mut queue);
        seed(x, mask.height - 1, &mut outside, &mut queue);
    }
    for y in 0..mask.height {
        seed(0, y, &mut outside, &mut queue);
        seed(mask.width - 1, y, &mut outside, &mut queue);
    }

    while let Some((x, y)) = queue.pop_front() {
        // Even entries of NEIGHBOURS are the four direct neighbours.
        for (dx, dy) in NEIGHBOURS.iter().step_by(2) {
            let (nx, ny) = (x + dx, y + dy);
            if mask.in_bounds(nx, ny) {
                seed(nx, ny, &mut outside, &mut queue);
            }
        }
    }
    outside
}

struct Region {
    pixels: Vec<(i32, i32)>,
    bounding_box: BoundingBox,
}

/// Breadth-first fill of the 8-connected component containing `start`.
fn grow_region(mask: &Mask<'_>, start: (i32, i32), visited: &mut [bool]) -> Region {
    let mut pixels = Vec::new();
    let mut queue = VecDeque::from([start]);
    visited[mask.index(start.0, start.1)] = true;

    let (mut min_x, mut min_y) = start;
    let (mut max_x, mut max_y) = start;

    while let Some((x, y)) = queue.pop_front() {
        pixels.push((x, y));
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);

        for (dx, dy) in NEIGHBOURS {
            let (nx, ny) = (x + dx, y + dy);
            if mask.is_foreground(nx, ny) {
                let index = mask.index(nx, ny);
                if !visited[index] {
                    visited[index] = true;
                    queue.push_back((nx, ny));
                }
            }
        }
    }

    Region {
        pixels,
        bounding_box: BoundingBox {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        },
    }
}

fn direction_of(dx: i32, dy: i32) -> usize {
    NEIGHBOURS
        .iter()
        .position(|&offset| offset == (dx, dy))
        .unwrap_or(0)
}

/// Moore-neighbour tracing. `start` must be the top-left-most pixel of its component,
/// which guarantees its west neighbour is background.
fn trace_boundary(mask: &Mask<'_>, start: (i32, i32), region_size: usize) -> Vec<(i32, i32)> {
    let mut boundary = vec![start];
    let mut current = start;
    let mut backtrack = 0usize;
    let mut first_step: Option<(i32, i32)> = None;
    // A border walk visits each pixel at most four times.
    let max_steps = 4 * region_size + 4;

    for _ in 0..max_steps {
        let next = (1..=8).find_map(|i| {
            let dir = (backtrack + i) % 8;
            let (dx, dy) = NEIGHBOURS[dir];
            let candidate = (current.0 + dx, current.1 + dy);
            mask.is_foreground(candidate.0, candidate.1)
                .then_some((dir, candidate))
        });
        let Some((dir, next)) = next else {
            // isolated pixel
            break;
        };

        if current == start {
            match first_step {
                Some(step) if step == next => break,
                None => first_step = Some(next),
                Some(_) => {}
            }
        }

        // The last background neighbour examined becomes the new backtrack point.
        let (bx, by) = NEIGHBOURS[(dir + 7) % 8];
        let back = (current.0 + bx, current.1 + by);
        backtrack = direction_of(back.0 - next.0, back.1 - next.1);

        current = next;
        boundary.push(current);
    }

    if boundary.len() > 1 && boundary.last() == Some(&start) {
        boundary.pop();
    }
    boundary
}
