//! Grayscale template matching.
//!
//! Score of a placement is `1 - mean(|haystack - needle|) / 255`. A sampled
//! pass over every placement keeps the best few candidates, which are then
//! scored with every needle pixel.

use image::GrayImage;

/// Sample grid resolution of the first pass (per axis).
const SAMPLE_GRID: u32 = 16;
const CANDIDATES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f64,
}

impl TemplateMatch {
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Best placement of `needle` inside `haystack` if its score reaches
/// `confidence`.
pub fn find_template(haystack: &GrayImage, needle: &GrayImage, confidence: f64) -> Option<TemplateMatch> {
    let (hw, hh) = haystack.dimensions();
    let (nw, nh) = needle.dimensions();
    if nw == 0 || nh == 0 || nw > hw || nh > hh {
        return None;
    }

    let samples = sample_points(nw, nh);
    let mut best: Vec<(u64, u32, u32)> = Vec::with_capacity(CANDIDATES + 1);

    for y in 0..=(hh - nh) {
        for x in 0..=(hw - nw) {
            let bound = if best.len() == CANDIDATES {
                best[CANDIDATES - 1].0
            } else {
                u64::MAX
            };
            if let Some(sad) = sampled_sad(haystack, needle, x, y, &samples, bound) {
                let pos = best.partition_point(|c| c.0 <= sad);
                best.insert(pos, (sad, x, y));
                best.truncate(CANDIDATES);
            }
        }
    }

    let pixels = u64::from(nw) * u64::from(nh);
    best.into_iter()
        .map(|(_, x, y)| {
            let sad = full_sad(haystack, needle, x, y);
            let score = 1.0 - (sad as f64 / pixels as f64) / 255.0;
            TemplateMatch {
                x,
                y,
                width: nw,
                height: nh,
                score,
            }
        })
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .filter(|m| m.score >= confidence)
}

fn sample_points(nw: u32, nh: u32) -> Vec<(u32, u32)> {
    let sx = (nw / SAMPLE_GRID).max(1);
    let sy = (nh / SAMPLE_GRID).max(1);
    let mut points = Vec::new();
    for y in (0..nh).step_by(sy as usize) {
        for x in (0..nw).step_by(sx as usize) {
            points.push((x, y));
        }
    }
    points
}

/// Sum of absolute differences over the sample points, or `None` once it
/// reaches `bound`.
fn sampled_sad(
    haystack: &GrayImage,
    needle: &GrayImage,
    ox: u32,
    oy: u32,
    samples: &[(u32, u32)],
    bound: u64,
) -> Option<u64> {
    let mut sad = 0u64;
    for &(x, y) in samples {
        let a = haystack.get_pixel(ox + x, oy + y).0[0];
        let b = needle.get_pixel(x, y).0[0];
        sad += u64::from(a.abs_diff(b));
        if sad >= bound {
            return None;
        }
    }
    Some(sad)
}

fn full_sad(haystack: &GrayImage, needle: &GrayImage, ox: u32, oy: u32) -> u64 {
    needle
        .enumerate_pixels()
        .map(|(x, y, p)| u64::from(haystack.get_pixel(ox + x, oy + y).0[0].abs_diff(p.0[0])))
        .sum()
}
