//! Snapshot capture
//!
//! A batch is `count` images named `photo1.png` .. `photoN.png`. Rendering sits
//! behind [`SnapshotProducer`]; [`WireframeRenderer`] is the built-in producer
//! and draws the placed model's polygon outlines from N evenly spaced turns
//! around its vertical axis.

use crate::error::CaptureError;
use crate::model::{Model, Vec3};
use image::{ImageFormat, Rgb, RgbImage};
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 28]);
const FOREGROUND: Rgb<u8> = Rgb([230, 230, 230]);
const NEAR_PLANE: f32 = 0.01;

/// Which snapshot of a batch is being taken (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub index: usize,
    pub count: usize,
}

impl View {
    /// Turn around the vertical axis for this view, in radians.
    pub fn angle(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        TAU * (self.index.saturating_sub(1)) as f32 / self.count as f32
    }
}

/// Renders one snapshot of a model to an image file.
pub trait SnapshotProducer: Send + Sync {
    fn snapshot(&self, model: &Model, view: View, path: &Path) -> Result<(), CaptureError>;
}

pub fn snapshot_file_name(index: usize) -> String {
    format!("photo{index}.png")
}

/// Take `count` snapshots into `output_dir`, in order.
///
/// The first failure aborts the remaining captures. Images written before it
/// stay on disk.
pub fn capture(
    producer: &dyn SnapshotProducer,
    model: &Model,
    output_dir: &Path,
    count: usize,
) -> Result<Vec<PathBuf>, CaptureError> {
    std::fs::create_dir_all(output_dir).map_err(|source| CaptureError::OutputDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(count);
    for index in 1..=count {
        let path = output_dir.join(snapshot_file_name(index));
        producer.snapshot(model, View { index, count }, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Perspective wireframe renderer; camera at the origin looking down -Z.
#[derive(Debug, Clone, Copy)]
pub struct WireframeRenderer {
    pub resolution: u32,
}

impl WireframeRenderer {
    pub fn new(resolution: u32) -> Self {
        Self { resolution }
    }

    /// Render a view to an in-memory image.
    pub fn render(&self, model: &Model, view: View) -> Result<RgbImage, CaptureError> {
        if self.resolution == 0 {
            return Err(CaptureError::Render {
                index: view.index,
                message: "resolution must be positive".to_string(),
            });
        }
        let mut img = RgbImage::from_pixel(self.resolution, self.resolution, BACKGROUND);
        let Some(center) = model.center() else {
            return Ok(img);
        };

        let (sin, cos) = view.angle().sin_cos();
        let projected: Vec<Option<(i64, i64)>> = model
            .vertices
            .iter()
            .map(|v| self.project(rotate_y(*v, center, sin, cos)))
            .collect();

        if model.faces.is_empty() {
            for (x, y) in projected.iter().flatten() {
                plot(&mut img, *x, *y);
            }
        } else {
            for (a, b) in model.edges() {
                if let (Some(Some(p0)), Some(Some(p1))) = (projected.get(a), projected.get(b)) {
                    self.draw_line(&mut img, *p0, *p1);
                }
            }
        }
        Ok(img)
    }

    fn project(&self, v: Vec3) -> Option<(i64, i64)> {
        let depth = -v[2];
        if depth <= NEAR_PLANE {
            return None;
        }
        let half = self.resolution as f32 / 2.0;
        let focal = self.resolution as f32;
        let x = half + focal * v[0] / depth;
        let y = half - focal * v[1] / depth;
        Some((x.round() as i64, y.round() as i64))
    }

    fn draw_line(&self, img: &mut RgbImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64)) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        // Edges reaching far outside the frame are skipped rather than walked.
        if dx.max(-dy) > 16 * self.resolution as i64 {
            return;
        }
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y) = (x0, y0);
        let mut err = dx + dy;
        loop {
            plot(img, x, y);
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

impl SnapshotProducer for WireframeRenderer {
    fn snapshot(&self, model: &Model, view: View, path: &Path) -> Result<(), CaptureError> {
        let img = self.render(model, view)?;
        img.save_with_format(path, ImageFormat::Png)
            .map_err(|source| CaptureError::Encode {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn rotate_y(v: Vec3, center: Vec3, sin: f32, cos: f32) -> Vec3 {
    let x = v[0] - center[0];
    let z = v[2] - center[2];
    [
        center[0] + x * cos + z * sin,
        v[1],
        center[2] - x * sin + z * cos,
    ]
}

fn plot(img: &mut RgbImage, x: i64, y: i64) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, FOREGROUND);
    }
}
