use std::cmp::Ordering;

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Integer pixel coordinate `(x, y)` as produced by contour tracing.
pub type PixelPoint = (i32, i32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2f {
    pub x: f32,
    pub y: f32,
}

impl Default for Point2f {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

impl Point2f {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box `(x, y, w, h)`, serialized as a 4-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl From<[u32; 4]> for BBox {
    fn from(v: [u32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [u32; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

impl BBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Tight box around a set of traced points.
    pub fn from_points(points: &[PixelPoint]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
        for &(x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        if min_x < 0 || min_y < 0 {
            return None;
        }
        Some(Self::new(
            min_x as u32,
            min_y as u32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        ))
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn area(&self) -> u32 {
        self.w * self.h
    }

    pub fn center(&self) -> Point2f {
        Point2f::new(
            self.x as f32 + self.w as f32 / 2.0,
            self.y as f32 + self.h as f32 / 2.0,
        )
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.h == 0 {
            0.0
        } else {
            self.w as f32 / self.h as f32
        }
    }

    /// Half-open containment: the right and bottom edges are outside.
    pub fn contains(&self, p: Point2f) -> bool {
        p.x >= self.x as f32
            && p.y >= self.y as f32
            && p.x < self.right() as f32
            && p.y < self.bottom() as f32
    }

    pub fn intersection_area(&self, other: &BBox) -> u32 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            0
        } else {
            (x1 - x0) * (y1 - y0)
        }
    }

    /// Intersection over the smaller box's area.
    pub fn overlap_ratio(&self, other: &BBox) -> f32 {
        let smaller = self.area().min(other.area());
        if smaller == 0 {
            return 0.0;
        }
        self.intersection_area(other) as f32 / smaller as f32
    }
}

/// Maps a box from a rescaled variant back onto the original image and clips it.
///
/// `scale` is variant size / original size.
pub fn map_bbox_to_original(bbox: BBox, scale: f32, ori_w: u32, ori_h: u32) -> BBox {
    if scale <= 0.0 || (scale - 1.0).abs() < f32::EPSILON {
        return clip_bbox(bbox, ori_w, ori_h);
    }
    let x = (bbox.x as f32 / scale).floor() as u32;
    let y = (bbox.y as f32 / scale).floor() as u32;
    let w = (bbox.w as f32 / scale).round().max(1.0) as u32;
    let h = (bbox.h as f32 / scale).round().max(1.0) as u32;
    clip_bbox(BBox::new(x, y, w, h), ori_w, ori_h)
}

fn clip_bbox(bbox: BBox, width: u32, height: u32) -> BBox {
    let x = bbox.x.min(width.saturating_sub(1));
    let y = bbox.y.min(height.saturating_sub(1));
    let w = bbox.w.min(width - x).max(1);
    let h = bbox.h.min(height - y).max(1);
    BBox::new(x, y, w, h)
}

/// Enlarges the image so its shorter side reaches `min_side_len`.
///
/// Returns the resized image and the applied scale (1.0 when untouched).
pub fn increase_min_side(img: &GrayImage, min_side_len: u32) -> Result<(GrayImage, f32), AnalysisError> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(AnalysisError::Preprocess("cannot resize an empty image".to_string()));
    }
    if w.min(h) >= min_side_len {
        return Ok((img.clone(), 1.0));
    }

    let ratio = if h < w {
        min_side_len as f32 / h as f32
    } else {
        min_side_len as f32 / w as f32
    };
    let resize_w = (w as f32 * ratio) as u32;
    let resize_h = (h as f32 * ratio) as u32;
    if resize_w == 0 || resize_h == 0 {
        return Err(AnalysisError::Preprocess(
            "resize_w or resize_h is equal to 0".to_string(),
        ));
    }

    let resized = imageops::resize(img, resize_w, resize_h, FilterType::Triangle);
    Ok((resized, resize_w as f32 / w as f32))
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[PixelPoint]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut area = 0.0f32;
    let n = points.len();
    for i in 0..n {
        let j = (i + 1) % n;
        let (x1, y1) = points[i];
        let (x2, y2) = points[j];
        area += (x1 as f32 * y2 as f32) - (x2 as f32 * y1 as f32);
    }

    (area * 0.5).abs()
}

/// Polyline length; `closed` adds the segment from the last point back to the first.
pub fn arc_length(points: &[PixelPoint], closed: bool) -> f32 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut length: f32 = points
        .windows(2)
        .map(|w| segment_length(w[0], w[1]))
        .sum();
    if closed {
        length += segment_length(points[points.len() - 1], points[0]);
    }
    length
}

fn segment_length(a: PixelPoint, b: PixelPoint) -> f32 {
    ((b.0 - a.0) as f32).hypot((b.1 - a.1) as f32)
}

/// Douglas-Peucker simplification of a closed contour.
///
/// The contour is split at the point farthest from its first point and each
/// half is simplified independently.
pub fn approx_poly_dp(points: &[PixelPoint], epsilon: f32) -> Vec<PixelPoint> {
    if points.len() <= 3 {
        return points.to_vec();
    }

    let start = points[0];
    let (far_idx, _) = points
        .iter()
        .enumerate()
        .map(|(i, &p)| (i, segment_length(start, p)))
        .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });
    if far_idx == 0 {
        return vec![start];
    }

    let mut first_half = douglas_peucker(&points[..=far_idx], epsilon);
    let mut second: Vec<PixelPoint> = points[far_idx..].to_vec();
    second.push(start);
    let second_half = douglas_peucker(&second, epsilon);

    // Both halves share their end points.
    first_half.pop();
    first_half.extend_from_slice(&second_half[..second_half.len() - 1]);
    first_half
}

fn douglas_peucker(points: &[PixelPoint], epsilon: f32) -> Vec<PixelPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let first = points[0];
    let last = points[points.len() - 1];
    let mut max_dist = 0.0f32;
    let mut index = 0;
    for (i, &p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = perpendicular_distance(p, first, last);
        if d > max_dist {
            max_dist = d;
            index = i;
        }
    }

    if max_dist > epsilon {
        let mut left = douglas_peucker(&points[..=index], epsilon);
        let right = douglas_peucker(&points[index..], epsilon);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

fn perpendicular_distance(p: PixelPoint, a: PixelPoint, b: PixelPoint) -> f32 {
    let dx = (b.0 - a.0) as f32;
    let dy = (b.1 - a.1) as f32;
    let len = dx.hypot(dy);
    if len < f32::EPSILON {
        return segment_length(p, a);
    }
    ((p.0 - a.0) as f32 * dy - (p.1 - a.1) as f32 * dx).abs() / len
}

fn cross(o: PixelPoint, a: PixelPoint, b: PixelPoint) -> i64 {
    (a.0 - o.0) as i64 * (b.1 - o.1) as i64 - (a.1 - o.1) as i64 * (b.0 - o.0) as i64
}

fn dist2(a: PixelPoint, b: PixelPoint) -> i64 {
    let dx = (a.0 - b.0) as i64;
    let dy = (a.1 - b.1) as i64;
    dx * dx + dy * dy
}

/// Compute convex hull using Graham scan.
pub fn convex_hull(points: &[PixelPoint]) -> Vec<PixelPoint> {
    let mut sorted: Vec<PixelPoint> = points.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    // Pivot is the top-most point, leftmost on ties, so every other point
    // lies within a half-turn of it.
    let mut start_idx = 0;
    for (i, pt) in sorted.iter().enumerate().skip(1) {
        let start = sorted[start_idx];
        if pt.1 < start.1 || (pt.1 == start.1 && pt.0 < start.0) {
            start_idx = i;
        }
    }
    sorted.swap(0, start_idx);
    let pivot = sorted[0];

    sorted[1..].sort_by(|a, b| {
        let c = cross(pivot, *a, *b);
        if c == 0 {
            dist2(pivot, *a).cmp(&dist2(pivot, *b))
        } else if c > 0 {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    });

    let mut hull: Vec<PixelPoint> = Vec::with_capacity(sorted.len());
    for &pt in &sorted {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], pt) <= 0 {
            hull.pop();
        }
        hull.push(pt);
    }

    hull
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: i32) -> Vec<PixelPoint> {
        vec![(0, 0), (side, 0), (side, side), (0, side)]
    }

    #[test]
    fn test_polygon_area_square() {
        assert_eq!(polygon_area(&square(10)), 100.0);
        assert_eq!(polygon_area(&[(0, 0), (1, 1)]), 0.0);
    }

    #[test]
    fn test_arc_length_closed() {
        assert_eq!(arc_length(&square(10), true), 40.0);
        assert_eq!(arc_length(&square(10), false), 30.0);
    }

    #[test]
    fn test_convex_hull_drops_interior_points() {
        let mut pts = square(10);
        pts.push((5, 5));
        pts.push((2, 7));
        pts.push((5, 0));
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert_eq!(polygon_area(&hull), 100.0);
    }

    #[test]
    fn test_approx_poly_dp_keeps_corners() {
        let mut pts = Vec::new();
        for x in 0..10 {
            pts.push((x, 0));
        }
        for y in 0..10 {
            pts.push((10, y));
        }
        for x in (1..=10).rev() {
            pts.push((x, 10));
        }
        for y in (1..=10).rev() {
            pts.push((0, y));
        }
        let approx = approx_poly_dp(&pts, 0.5);
        assert_eq!(approx.len(), 4);
    }

    #[test]
    fn test_bbox_contains_and_overlap() {
        let a = BBox::new(0, 0, 10, 10);
        let b = BBox::new(5, 5, 10, 10);
        assert!(a.contains(Point2f::new(9.5, 0.0)));
        assert!(!a.contains(Point2f::new(10.0, 5.0)));
        assert_eq!(a.intersection_area(&b), 25);
        assert!((a.overlap_ratio(&b) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_map_bbox_to_original_rescales_and_clips() {
        let mapped = map_bbox_to_original(BBox::new(100, 40, 60, 20), 2.0, 70, 40);
        assert_eq!(mapped, BBox::new(50, 20, 20, 10));
        let clipped = map_bbox_to_original(BBox::new(60, 30, 40, 40), 1.0, 70, 40);
        assert_eq!(clipped, BBox::new(60, 30, 10, 10));
    }

    #[test]
    fn test_increase_min_side() {
        let img = GrayImage::new(100, 50);
        let (resized, scale) = increase_min_side(&img, 300).unwrap();
        assert_eq!(resized.dimensions(), (600, 300));
        assert!((scale - 6.0).abs() < 1e-6);

        let (same, scale) = increase_min_side(&img, 20).unwrap();
        assert_eq!(same.dimensions(), (100, 50));
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn test_bbox_serializes_as_array() {
        let json = serde_json::to_string(&BBox::new(1, 2, 3, 4)).unwrap();
        assert_eq!(json, "[1,2,3,4]");
    }
}
