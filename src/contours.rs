// Pure Rust contour detection on binary images.
// Foreground is any pixel > 127.

use image::{GrayImage, Luma};

use crate::geometry::{arc_length, polygon_area, BBox, PixelPoint};

#[derive(Debug, Clone)]
pub struct Contour {
    /// Component label this border belongs to (1-based).
    pub label: u32,
    pub points: Vec<PixelPoint>,
}

impl Contour {
    pub fn area(&self) -> f32 {
        polygon_area(&self.points)
    }

    pub fn perimeter(&self) -> f32 {
        arc_length(&self.points, true)
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.points)
    }
}

/// Background region fully enclosed by foreground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hole {
    pub area: u32,
    pub bbox: BBox,
}

/// Connected-component labels for a binary image, 0 = background.
#[derive(Debug, Clone)]
pub struct LabelMap {
    pub width: u32,
    pub height: u32,
    pub count: u32,
    labels: Vec<u32>,
}

impl LabelMap {
    pub fn get(&self, x: i32, y: i32) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.labels[y as usize * self.width as usize + x as usize]
    }

    /// Binary crop of a single component; other components inside `bbox` stay background.
    pub fn component_mask(&self, label: u32, bbox: BBox) -> GrayImage {
        GrayImage::from_fn(bbox.w, bbox.h, |x, y| {
            if self.get((bbox.x + x) as i32, (bbox.y + y) as i32) == label {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }
}

// 8-connectivity, clockwise (y grows downwards) starting from West.
const NEIGHBORS: [(i32, i32); 8] = [
    (-1, 0),  // W
    (-1, -1), // NW
    (0, -1),  // N
    (1, -1),  // NE
    (1, 0),   // E
    (1, 1),   // SE
    (0, 1),   // S
    (-1, 1),  // SW
];

fn direction_index(dx: i32, dy: i32) -> usize {
    NEIGHBORS
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(0)
}

fn is_foreground(img: &GrayImage, x: u32, y: u32) -> bool {
    img.get_pixel(x, y)[0] > 127
}

/// Label 8-connected foreground components.
pub fn label_components(binary_img: &GrayImage) -> LabelMap {
    let (width, height) = binary_img.dimensions();
    let mut labels = vec![0u32; width as usize * height as usize];
    let mut label = 0u32;

    for y in 0..height {
        for x in 0..width {
            let idx = y as usize * width as usize + x as usize;
            if is_foreground(binary_img, x, y) && labels[idx] == 0 {
                label += 1;
                flood_fill_label(binary_img, &mut labels, x as i32, y as i32, label);
            }
        }
    }

    LabelMap {
        width,
        height,
        count: label,
        labels,
    }
}

/// Flood fill to label a connected component
fn flood_fill_label(img: &GrayImage, labels: &mut [u32], start_x: i32, start_y: i32, label: u32) {
    let (width, height) = (img.width() as i32, img.height() as i32);
    let mut stack = vec![(start_x, start_y)];

    while let Some((x, y)) = stack.pop() {
        if x < 0 || x >= width || y < 0 || y >= height {
            continue;
        }

        let idx = y as usize * width as usize + x as usize;
        if labels[idx] != 0 || !is_foreground(img, x as u32, y as u32) {
            continue;
        }

        labels[idx] = label;

        for (dx, dy) in NEIGHBORS {
            stack.push((x + dx, y + dy));
        }
    }
}

/// Outer border of every outermost foreground component (like RETR_EXTERNAL).
///
/// Components sitting inside another component's hole are skipped.
/// Contours come back in label order, i.e. by their top-most, left-most pixel.
pub fn find_contours(binary_img: &GrayImage) -> Vec<Contour> {
    let map = label_components(binary_img);
    find_contours_in(&map)
}

pub fn find_contours_in(map: &LabelMap) -> Vec<Contour> {
    let external = external_labels(map);
    let mut starts: Vec<Option<PixelPoint>> = vec![None; map.count as usize + 1];
    for y in 0..map.height as i32 {
        for x in 0..map.width as i32 {
            let l = map.get(x, y) as usize;
            if l != 0 && external[l] && starts[l].is_none() {
                starts[l] = Some((x, y));
            }
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(label, start)| {
            start.map(|s| Contour {
                label: label as u32,
                points: trace_boundary(map, label as u32, s),
            })
        })
        .collect()
}

/// Flags, per label, the components reachable from outside the image.
///
/// Background is flooded (4-connected) from the image border; a component is
/// external when it touches that flood or the border itself.
fn external_labels(map: &LabelMap) -> Vec<bool> {
    let (w, h) = (map.width as i32, map.height as i32);
    let mut external = vec![false; map.count as usize + 1];
    let mut outside = vec![false; map.width as usize * map.height as usize];
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                stack.push((x, y));
            }
        }
    }

    while let Some((x, y)) = stack.pop() {
        if x < 0 || y < 0 || x >= w || y >= h {
            continue;
        }
        let label = map.get(x, y);
        if label != 0 {
            external[label as usize] = true;
            continue;
        }
        let idx = y as usize * map.width as usize + x as usize;
        if outside[idx] {
            continue;
        }
        outside[idx] = true;
        stack.extend([(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)]);
    }

    external
}

/// Moore-neighbour tracing with Jacob's stopping criterion.
///
/// `start` must be the raster-first pixel of its component so that its West
/// neighbour is background.
fn trace_boundary(map: &LabelMap, label: u32, start: PixelPoint) -> Vec<PixelPoint> {
    let mut points = vec![start];
    let mut current = start;
    let mut back_dir = 0usize;
    let mut second: Option<PixelPoint> = None;
    let max_steps = 4 * (map.width as usize * map.height as usize) + 8;

    for _ in 0..max_steps {
        let mut found = None;
        for k in 1..=8 {
            let dir = (back_dir + k) % 8;
            let (dx, dy) = NEIGHBORS[dir];
            let candidate = (current.0 + dx, current.1 + dy);
            if map.get(candidate.0, candidate.1) == label {
                found = Some((dir, candidate));
                break;
            }
        }

        // Isolated pixel.
        let Some((dir, next)) = found else {
            break;
        };

        if current == start {
            match second {
                None => second = Some(next),
                Some(s) if s == next => break,
                Some(_) => {}
            }
        }

        // The last background pixel examined becomes the new backtrack point.
        let (pdx, pdy) = NEIGHBORS[(dir + 7) % 8];
        let prev = (current.0 + pdx, current.1 + pdy);
        back_dir = direction_index(prev.0 - next.0, prev.1 - next.1);

        points.push(next);
        current = next;
    }

    if points.len() > 1 && points.last() == Some(&start) {
        points.pop();
    }
    points
}

/// Background components (4-connected) that do not touch the image border.
pub fn find_holes(binary_img: &GrayImage) -> Vec<Hole> {
    let (width, height) = binary_img.dimensions();
    let mut visited = vec![false; width as usize * height as usize];
    let mut holes = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y as usize * width as usize + x as usize;
            if visited[idx] || is_foreground(binary_img, x, y) {
                continue;
            }

            let mut stack = vec![(x as i32, y as i32)];
            let mut area = 0u32;
            let mut touches_border = false;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);

            while let Some((cx, cy)) = stack.pop() {
                if cx < 0 || cy < 0 || cx >= width as i32 || cy >= height as i32 {
                    continue;
                }
                let (ux, uy) = (cx as u32, cy as u32);
                let cidx = uy as usize * width as usize + ux as usize;
                if visited[cidx] || is_foreground(binary_img, ux, uy) {
                    continue;
                }
                visited[cidx] = true;
                area += 1;
                if ux == 0 || uy == 0 || ux == width - 1 || uy == height - 1 {
                    touches_border = true;
                }
                min_x = min_x.min(ux);
                min_y = min_y.min(uy);
                max_x = max_x.max(ux);
                max_y = max_y.max(uy);

                stack.push((cx + 1, cy));
                stack.push((cx - 1, cy));
                stack.push((cx, cy + 1));
                stack.push((cx, cy - 1));
            }

            if !touches_border {
                holes.push(Hole {
                    area,
                    bbox: BBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1),
                });
            }
        }
    }

    holes
}
