use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, open};
use tracing::debug;

use crate::contours::{find_contours_in, label_components, LabelMap};
use crate::geometry::BBox;
use crate::model::CharacterRegion;
use crate::types::SegmentConfig;

/// A candidate character cropped to `bbox` (ink = 255).
///
/// `mask` holds only the character's own component; `crop` is the whole
/// binarized page inside `bbox`, detached fragments included.
#[derive(Clone, Debug)]
pub struct Segment {
    pub bbox: BBox,
    pub area: u32,
    pub mask: GrayImage,
    pub crop: GrayImage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Polarity {
    InkDark,
    InkLight,
}

pub struct Segmenter {
    cfg: SegmentConfig,
}

impl Segmenter {
    pub fn new(cfg: SegmentConfig) -> Self {
        Self { cfg }
    }

    fn area_bounds(&self, width: u32, height: u32) -> (f32, f32) {
        let image_area = width as f32 * height as f32;
        let min_area = self.cfg.min_area_floor.max(image_area * self.cfg.min_area_fraction);
        let max_area = self.cfg.max_area_fraction * image_area;
        (min_area, max_area)
    }

    /// Segment a grayscale page into character candidates, ordered
    /// top-to-bottom then left-to-right.
    pub fn run(&self, gray: &GrayImage) -> Vec<Segment> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let (min_area, max_area) = self.area_bounds(width, height);

        let mask = self.choose_polarity(gray, min_area, max_area);
        let mask = open(&dilate(&mask, Norm::LInf, 1), Norm::LInf, 1);

        let map = label_components(&mask);
        let mut segments = Vec::new();
        for contour in find_contours_in(&map) {
            let Some(bbox) = contour.bbox() else {
                continue;
            };
            if bbox.w < self.cfg.min_box_side || bbox.h < self.cfg.min_box_side {
                continue;
            }
            let area = contour.area();
            if area < min_area || area > max_area {
                continue;
            }

            let component = map.component_mask(contour.label, bbox);
            if bbox.aspect_ratio() > self.cfg.split_aspect {
                let parts = self.split(&component, &mask, bbox, min_area, max_area);
                if !parts.is_empty() {
                    segments.extend(parts);
                    continue;
                }
            }
            segments.push(Segment {
                bbox,
                area: area.round() as u32,
                mask: component,
                crop: crop(&mask, bbox),
            });
        }

        sort_reading_order(&mut segments);
        debug!(count = segments.len(), min_area, max_area, "segmented characters");
        segments
    }

    /// Segment and wrap the result as fresh character regions with sequential ids.
    pub fn regions(&self, gray: &GrayImage) -> (Vec<CharacterRegion>, Vec<Segment>) {
        self.run(gray)
            .into_iter()
            .enumerate()
            .map(|(id, s)| (CharacterRegion::new(id, s.bbox, s.area), s))
            .unzip()
    }

    fn choose_polarity(&self, gray: &GrayImage, min_area: f32, max_area: f32) -> GrayImage {
        let level = otsu_level(gray);
        let candidates: Vec<(Polarity, GrayImage)> = [Polarity::InkDark, Polarity::InkLight]
            .into_iter()
            .map(|p| (p, open(&binarize(gray, level, p), Norm::LInf, 1)))
            .collect();

        let stats: Vec<(usize, usize)> = candidates
            .iter()
            .map(|(_, mask)| {
                let map = label_components(mask);
                (count_in_bounds(&map, min_area, max_area), map.count as usize)
            })
            .collect();

        let plausible = 1..=self.cfg.max_plausible_components;
        let chosen = stats
            .iter()
            .position(|(in_bounds, _)| plausible.contains(in_bounds))
            .or_else(|| {
                stats
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, total))| *total > 0)
                    .min_by_key(|(_, (_, total))| *total)
                    .map(|(i, _)| i)
            })
            .unwrap_or(0);

        debug!(
            level,
            polarity = ?candidates[chosen].0,
            in_bounds = stats[chosen].0,
            "selected binarization polarity"
        );
        let mut candidates = candidates;
        candidates.swap_remove(chosen).1
    }

    /// Cut a wide component at the middle of interior projection valleys.
    fn split(
        &self,
        component: &GrayImage,
        page: &GrayImage,
        bbox: BBox,
        min_area: f32,
        max_area: f32,
    ) -> Vec<Segment> {
        let (w, h) = component.dimensions();
        let columns: Vec<u32> = (0..w)
            .map(|x| (0..h).filter(|&y| component.get_pixel(x, y)[0] > 0).count() as u32)
            .collect();

        let mut sorted = columns.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() - 1) as f32 * self.cfg.valley_percentile).floor() as usize;
        let cutoff = sorted[idx];

        let mut cuts = Vec::new();
        let mut x = 0usize;
        while x < columns.len() {
            if columns[x] >= cutoff {
                x += 1;
                continue;
            }
            let start = x;
            while x < columns.len() && columns[x] < cutoff {
                x += 1;
            }
            let end = x;
            if start > 0 && end < columns.len() {
                cuts.push(((start + end) / 2) as u32);
            }
        }
        if cuts.is_empty() {
            return Vec::new();
        }

        let min_width = (self.cfg.min_slice_width as f32).max(self.cfg.min_slice_height_fraction * h as f32);
        let mut bounds = vec![0u32];
        bounds.extend(cuts);
        bounds.push(w);

        bounds
            .windows(2)
            .filter_map(|pair| {
                let local = tighten(component, pair[0], pair[1])?;
                let area = local_area(component, local);
                if (local.w as f32) < min_width
                    || local.h < self.cfg.min_box_side
                    || (area as f32) < min_area
                    || (area as f32) > max_area
                {
                    return None;
                }
                let slice = BBox::new(bbox.x + local.x, bbox.y + local.y, local.w, local.h);
                Some(Segment {
                    bbox: slice,
                    area,
                    mask: crop(component, local),
                    crop: crop(page, slice),
                })
            })
            .collect()
    }
}

/// Band segments into rows (a segment joins a row when its vertical centre
/// falls inside the row's extent), rows top-down, each row left-to-right.
fn sort_reading_order(segments: &mut Vec<Segment>) {
    segments.sort_by_key(|s| (s.bbox.y, s.bbox.x));
    let mut rows: Vec<(u32, u32, Vec<Segment>)> = Vec::new();
    for seg in segments.drain(..) {
        let cy = seg.bbox.y + seg.bbox.h / 2;
        let joins = rows
            .last()
            .is_some_and(|(top, bottom, _)| cy >= *top && cy < *bottom);
        if !joins {
            rows.push((seg.bbox.y, seg.bbox.bottom(), vec![seg]));
        } else if let Some((_, bottom, row)) = rows.last_mut() {
            *bottom = (*bottom).max(seg.bbox.bottom());
            row.push(seg);
        }
    }
    for (_, _, mut row) in rows {
        row.sort_by_key(|s| (s.bbox.x, s.bbox.y));
        segments.extend(row);
    }
}

fn crop(img: &GrayImage, bbox: BBox) -> GrayImage {
    image::imageops::crop_imm(img, bbox.x, bbox.y, bbox.w, bbox.h).to_image()
}

fn binarize(gray: &GrayImage, level: u8, polarity: Polarity) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        let ink = match polarity {
            Polarity::InkDark => p <= level,
            Polarity::InkLight => p > level,
        };
        if ink {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

fn count_in_bounds(map: &LabelMap, min_area: f32, max_area: f32) -> usize {
    find_contours_in(map)
        .iter()
        .filter(|c| {
            let a = c.area();
            a >= min_area && a <= max_area
        })
        .count()
}

/// Foreground extent of columns `x0..x1`, in mask coordinates.
fn tighten(mask: &GrayImage, x0: u32, x1: u32) -> Option<BBox> {
    let mut extent: Option<(u32, u32, u32, u32)> = None;
    for y in 0..mask.height() {
        for x in x0..x1 {
            if mask.get_pixel(x, y)[0] == 0 {
                continue;
            }
            extent = Some(match extent {
                None => (x, y, x, y),
                Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(x), d.max(y)),
            });
        }
    }
    extent.map(|(a, b, c, d)| BBox::new(a, b, c - a + 1, d - b + 1))
}

fn local_area(mask: &GrayImage, bbox: BBox) -> u32 {
    let mut count = 0;
    for y in bbox.y..bbox.bottom() {
        for x in bbox.x..bbox.right() {
            if mask.get_pixel(x, y)[0] > 0 {
                count += 1;
            }
        }
    }
    count
}
