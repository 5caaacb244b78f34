//! Figure rasterizer
//!
//! Draws axes frames and artists onto an RGB canvas. Text (titles, tick labels,
//! legends) is not rendered.

use super::{Artist, Axes, Figure};
use std::collections::HashSet;
use std::time::Instant;

const DPI: f64 = 100.0;
const MIN_PIXELS: u32 = 64;
const MAX_PIXELS: u32 = 1600;

const WHITE: [u8; 3] = [255, 255, 255];
const AXIS: [u8; 3] = [38, 38, 38];

/// tab10
const PALETTE: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: WHITE.repeat((width * height) as usize),
        }
    }

    fn put(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let at = ((y as u32 * self.width + x as u32) * 3) as usize;
        self.pixels[at..at + 3].copy_from_slice(&color);
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: [u8; 3]) {
        let (x0, x1) = (x0.min(x1), x0.max(x1));
        let (y0, y1) = (y0.min(y1), y0.max(y1));
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.put(x, y, color);
            }
        }
    }

    fn line(&mut self, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: [u8; 3]) {
        let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
        let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
        let (mut x, mut y, mut err) = (x0, y0, dx + dy);
        loop {
            self.put(x, y, color);
            self.put(x, y + 1, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// Pixel box of one axes
#[derive(Debug, Clone, Copy)]
struct Frame {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl Frame {
    fn width(&self) -> f64 {
        self.right - self.left
    }

    fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Data range mapped onto a pixel frame
struct Scale {
    x: (f64, f64),
    y: (f64, f64),
    frame: Frame,
}

impl Scale {
    fn new(x: (f64, f64), y: (f64, f64), frame: Frame) -> Self {
        let widen = |(lo, hi): (f64, f64)| {
            if (hi - lo).abs() < f64::EPSILON {
                (lo - 1.0, hi + 1.0)
            } else {
                (lo, hi)
            }
        };
        Self {
            x: widen(x),
            y: widen(y),
            frame,
        }
    }

    fn px(&self, x: f64) -> i64 {
        (self.frame.left + (x - self.x.0) / (self.x.1 - self.x.0) * self.frame.width()).round() as i64
    }

    fn py(&self, y: f64) -> i64 {
        (self.frame.bottom - (y - self.y.0) / (self.y.1 - self.y.0) * self.frame.height()).round() as i64
    }
}

pub fn pixel_size(figure: &Figure) -> (u32, u32) {
    let clamp = |inches: f64| ((inches * DPI).round() as u32).clamp(MIN_PIXELS, MAX_PIXELS);
    (clamp(figure.size.0), clamp(figure.size.1))
}

fn finite(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| v.is_finite())
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn merge(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> Option<(f64, f64)> {
    match (a, b) {
        (Some((a0, a1)), Some((b0, b1))) => Some((a0.min(b0), a1.max(b1))),
        (a, None) => a,
        (None, b) => b,
    }
}

fn histogram_counts(values: &[f64], bins: usize) -> (f64, f64, Vec<usize>) {
    let bins = bins.max(1);
    let (lo, hi) = bounds(finite(values)).unwrap_or((0.0, 1.0));
    let span = if hi > lo { hi - lo } else { 1.0 };
    let mut counts = vec![0usize; bins];
    for v in finite(values) {
        let slot = (((v - lo) / span) * bins as f64).floor() as usize;
        counts[slot.min(bins - 1)] += 1;
    }
    (lo, lo + span, counts)
}

/// Data extents of the cartesian artists of an axes
fn extents(axes: &Axes) -> (Option<(f64, f64)>, Option<(f64, f64)>) {
    let mut x = None;
    let mut y = None;
    for artist in &axes.artists {
        match artist {
            Artist::Bars {
                heights,
                horizontal,
                ..
            } => {
                let span = Some((-0.5, heights.len() as f64 - 0.5));
                let value = merge(bounds(finite(heights)), Some((0.0, 0.0)));
                if *horizontal {
                    x = merge(x, value);
                    y = merge(y, span);
                } else {
                    x = merge(x, span);
                    y = merge(y, value);
                }
            }
            Artist::Line { xs, ys } | Artist::Scatter { xs, ys } => {
                x = merge(x, bounds(finite(xs)));
                y = merge(y, bounds(finite(ys)));
            }
            Artist::Histogram { values, bins } => {
                let (lo, hi, counts) = histogram_counts(values, *bins);
                x = merge(x, Some((lo, hi)));
                y = merge(y, Some((0.0, counts.iter().copied().max().unwrap_or(0) as f64)));
            }
            Artist::Pie { .. } => {}
        }
    }
    (x, y)
}

/// Reduce a polyline to at most `2 * buckets` points, keeping the lowest and
/// highest point of each run of consecutive inputs in their original order
fn envelope(points: Vec<(i64, i64)>, buckets: usize) -> Vec<(i64, i64)> {
    let buckets = buckets.max(1);
    if points.len() <= buckets * 2 {
        return points;
    }
    let chunk = points.len().div_ceil(buckets);
    let mut out = Vec::with_capacity(buckets * 2);
    for run in points.chunks(chunk) {
        let low = (0..run.len()).min_by_key(|&i| run[i].1).unwrap_or(0);
        let high = (0..run.len()).max_by_key(|&i| run[i].1).unwrap_or(0);
        let (a, b) = (low.min(high), low.max(high));
        out.push(run[a]);
        if b != a {
            out.push(run[b]);
        }
    }
    out
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn draw_pie(canvas: &mut Canvas, frame: Frame, values: &[f64]) {
    let total: f64 = finite(values).filter(|v| *v > 0.0).sum();
    if total <= 0.0 {
        return;
    }
    let cx = (frame.left + frame.right) / 2.0;
    let cy = (frame.top + frame.bottom) / 2.0;
    let radius = frame.width().min(frame.height()) / 2.0;
    // cumulative slice boundaries, counter-clockwise from 12 o'clock
    let mut edges = Vec::with_capacity(values.len());
    let mut acc = 0.0;
    for v in values {
        acc += if v.is_finite() && *v > 0.0 { *v } else { 0.0 };
        edges.push(acc / total);
    }
    let r = radius.ceil() as i64;
    for dy in -r..=r {
        for dx in -r..=r {
            let (fx, fy) = (dx as f64, dy as f64);
            if fx * fx + fy * fy > radius * radius {
                continue;
            }
            let angle = (-fx).atan2(-fy);
            let turn = (angle / std::f64::consts::TAU).rem_euclid(1.0);
            let slice = edges.iter().position(|e| turn < *e).unwrap_or(edges.len() - 1);
            canvas.put(cx as i64 + dx, cy as i64 + dy, PALETTE[slice % PALETTE.len()]);
        }
    }
}

/// Returns false when the deadline passed before every artist was drawn
fn draw_axes(canvas: &mut Canvas, frame: Frame, axes: &Axes, deadline: Option<Instant>) -> bool {
    if axes.artists.iter().all(|a| matches!(a, Artist::Pie { .. })) && !axes.artists.is_empty() {
        for artist in &axes.artists {
            if let Artist::Pie { values, .. } = artist {
                draw_pie(canvas, frame, values);
            }
        }
        return true;
    }

    let (x, y) = extents(axes);
    let scale = Scale::new(x.unwrap_or((0.0, 1.0)), y.unwrap_or((0.0, 1.0)), frame);
    let series_count = axes
        .artists
        .iter()
        .filter(|a| matches!(a, Artist::Bars { .. }))
        .count()
        .max(1);
    let mut bar_series = 0;

    for (n, artist) in axes.artists.iter().enumerate() {
        if expired(deadline) {
            return false;
        }
        let color = PALETTE[n % PALETTE.len()];
        match artist {
            Artist::Bars {
                heights,
                horizontal,
                ..
            } => {
                let slot = 0.8 / series_count as f64;
                let offset = -0.4 + slot * bar_series as f64;
                bar_series += 1;
                for (i, h) in heights.iter().enumerate() {
                    if !h.is_finite() {
                        continue;
                    }
                    let (a, b) = (i as f64 + offset, i as f64 + offset + slot);
                    if *horizontal {
                        canvas.fill_rect(scale.px(0.0), scale.py(a), scale.px(*h), scale.py(b), color);
                    } else {
                        canvas.fill_rect(scale.px(a), scale.py(0.0), scale.px(b), scale.py(*h), color);
                    }
                }
            }
            Artist::Line { xs, ys } => {
                let points: Vec<(i64, i64)> = xs
                    .iter()
                    .zip(ys.iter())
                    .filter(|(x, y)| x.is_finite() && y.is_finite())
                    .map(|(x, y)| (scale.px(*x), scale.py(*y)))
                    .collect();
                let points = envelope(points, frame.width().max(1.0) as usize);
                for pair in points.windows(2) {
                    canvas.line(pair[0], pair[1], color);
                }
                if points.len() == 1 {
                    let (px, py) = points[0];
                    canvas.fill_rect(px - 1, py - 1, px + 1, py + 1, color);
                }
            }
            Artist::Scatter { xs, ys } => {
                let mut drawn = HashSet::new();
                for (x, y) in xs.iter().zip(ys.iter()) {
                    if x.is_finite() && y.is_finite() {
                        let (px, py) = (scale.px(*x), scale.py(*y));
                        if drawn.insert((px, py)) {
                            canvas.fill_rect(px - 2, py - 2, px + 2, py + 2, color);
                        }
                    }
                }
            }
            Artist::Histogram { values, bins } => {
                let (lo, hi, counts) = histogram_counts(values, *bins);
                let width = (hi - lo) / counts.len() as f64;
                for (i, count) in counts.iter().enumerate() {
                    if *count == 0 {
                        continue;
                    }
                    let a = lo + width * i as f64;
                    canvas.fill_rect(
                        scale.px(a) + 1,
                        scale.py(0.0),
                        scale.px(a + width) - 1,
                        scale.py(*count as f64),
                        color,
                    );
                }
            }
            Artist::Pie { .. } => {}
        }
    }

    let (l, t, r, b) = (
        frame.left as i64,
        frame.top as i64,
        frame.right as i64,
        frame.bottom as i64,
    );
    canvas.line((l, b), (r, b), AXIS);
    canvas.line((l, t), (l, b), AXIS);
    true
}

/// Rasterize a figure; the grid of axes shares the canvas evenly. Returns
/// `None` once `deadline` passes, leaving the figure undrawn.
pub fn render(figure: &Figure, deadline: Option<Instant>) -> Option<Canvas> {
    let (width, height) = pixel_size(figure);
    let mut canvas = Canvas::new(width, height);
    let cell_w = width as f64 / figure.cols as f64;
    let cell_h = height as f64 / figure.rows as f64;
    for (i, axes) in figure.axes.iter().enumerate() {
        let (row, col) = (i / figure.cols, i % figure.cols);
        let frame = Frame {
            left: col as f64 * cell_w + cell_w * 0.12,
            top: row as f64 * cell_h + cell_h * 0.1,
            right: (col + 1) as f64 * cell_w - cell_w * 0.05,
            bottom: (row + 1) as f64 * cell_h - cell_h * 0.12,
        };
        if !draw_axes(&mut canvas, frame, axes, deadline) {
            return None;
        }
    }
    Some(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figure(artists: Vec<Artist>) -> Figure {
        Figure {
            id: 1,
            size: (2.0, 1.0),
            title: None,
            rows: 1,
            cols: 1,
            axes: vec![Axes {
                artists,
                ..Axes::default()
            }],
            current_axes: 0,
        }
    }

    fn painted(canvas: &Canvas, color: [u8; 3]) -> usize {
        canvas.pixels.chunks(3).filter(|p| *p == color).count()
    }

    #[test]
    fn test_pixel_size_is_clamped() {
        let mut f = figure(vec![]);
        assert_eq!(pixel_size(&f), (200, 100));
        f.size = (100.0, 0.1);
        assert_eq!(pixel_size(&f), (MAX_PIXELS, MIN_PIXELS));
    }

    #[test]
    fn test_bars_are_painted() {
        let canvas = render(&figure(vec![Artist::Bars {
            labels: vec!["a".into(), "b".into()],
            heights: vec![1.0, 3.0],
            horizontal: false,
        }]), None)
        .unwrap();
        assert_eq!(canvas.pixels.len(), 200 * 100 * 3);
        assert!(painted(&canvas, PALETTE[0]) > 100);
    }

    #[test]
    fn test_pie_uses_one_color_per_slice() {
        let canvas = render(&figure(vec![Artist::Pie {
            values: vec![1.0, 1.0],
            labels: vec![],
        }]), None)
        .unwrap();
        assert!(painted(&canvas, PALETTE[0]) > 0);
        assert!(painted(&canvas, PALETTE[1]) > 0);
    }

    #[test]
    fn test_envelope_bounds_long_lines() {
        let zigzag: Vec<(i64, i64)> = (0..100_000).map(|i| (i % 7, (i % 2) * 90)).collect();
        let reduced = envelope(zigzag, 150);
        assert!(reduced.len() <= 300);
        assert!(reduced.iter().any(|p| p.1 == 0));
        assert!(reduced.iter().any(|p| p.1 == 90));

        let short = vec![(0, 0), (5, 5), (9, 1)];
        assert_eq!(envelope(short.clone(), 150), short);
    }

    #[test]
    fn test_render_gives_up_after_deadline() {
        let line = Artist::Line {
            xs: vec![0.0, 1.0],
            ys: vec![0.0, 1.0],
        };
        assert!(render(&figure(vec![line.clone()]), Some(Instant::now())).is_none());
        let later = Instant::now() + std::time::Duration::from_secs(60);
        assert!(render(&figure(vec![line]), Some(later)).is_some());
    }

    #[test]
    fn test_histogram_counts() {
        let (lo, hi, counts) = histogram_counts(&[0.0, 1.0, 2.0, 3.0, f64::NAN], 2);
        assert_eq!((lo, hi), (0.0, 3.0));
        assert_eq!(counts, vec![2, 2]);
    }
}
