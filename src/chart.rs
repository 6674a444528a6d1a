//! Raster chart rendering for the analysis view.

use std::f64::consts::{FRAC_PI_2, TAU};
use std::io::Cursor;

use image::{ImageFormat, RgbImage};
use plotters::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::aggregate::{ChartData, Hsl};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 320;
const DOUGHNUT_CUTOUT: f64 = 0.45;
const ARC_STEPS_PER_TURN: f64 = 180.0;
const BAR_FILL: f64 = 0.7;
const MARGIN: i32 = 16;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("Analyse first.")]
    NotRendered,
    #[error("chart drawing failed: {0}")]
    Draw(String),
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Doughnut,
    Bar,
}

/// Renders both chart kinds from the same data.
pub trait ChartRenderer {
    /// Releases any previous rendering, then draws both charts from scratch.
    fn render(&mut self, data: &ChartData) -> Result<(), ChartError>;

    fn release(&mut self);

    fn is_rendered(&self) -> bool;

    fn export_png(&self, kind: ChartKind) -> Result<Vec<u8>, ChartError>;
}

/// In-memory RGB rasters drawn with plotters.
#[derive(Debug)]
pub struct BitmapCharts {
    width: u32,
    height: u32,
    doughnut: Option<Vec<u8>>,
    bar: Option<Vec<u8>>,
}

impl Default for BitmapCharts {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl BitmapCharts {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            doughnut: None,
            bar: None,
        }
    }

    fn blank(&self) -> Vec<u8> {
        vec![0; self.width as usize * self.height as usize * 3]
    }

    fn draw_doughnut(&self, data: &ChartData) -> Result<Vec<u8>, ChartError> {
        let mut buffer = self.blank();
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (self.width, self.height))
                .into_drawing_area();
            root.fill(&WHITE).map_err(draw_error)?;

            let center = (f64::from(self.width) / 2.0, f64::from(self.height) / 2.0);
            let outer = (f64::from(self.width.min(self.height)) / 2.0 - f64::from(MARGIN)).max(1.0);
            let inner = outer * DOUGHNUT_CUTOUT;
            let total = data.total() as f64;

            if total > 0.0 {
                // Clockwise from twelve o'clock.
                let mut angle = -FRAC_PI_2;
                for (value, color) in data.values.iter().zip(&data.colors) {
                    let sweep = *value as f64 / total * TAU;
                    let points = annular_sector(center, inner, outer, angle, angle + sweep);
                    root.draw(&Polygon::new(points.clone(), rgb(color).filled()))
                        .map_err(draw_error)?;
                    let mut outline = points;
                    if let Some(first) = outline.first().copied() {
                        outline.push(first);
                    }
                    root.draw(&PathElement::new(outline, WHITE.stroke_width(2)))
                        .map_err(draw_error)?;
                    angle += sweep;
                }
            }
            root.present().map_err(draw_error)?;
        }
        Ok(buffer)
    }

    fn draw_bar(&self, data: &ChartData) -> Result<Vec<u8>, ChartError> {
        let mut buffer = self.blank();
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (self.width, self.height))
                .into_drawing_area();
            root.fill(&WHITE).map_err(draw_error)?;

            let left = MARGIN;
            let right = self.width as i32 - MARGIN;
            let top = MARGIN;
            let baseline = self.height as i32 - MARGIN;
            let max = data.values.iter().copied().max().unwrap_or(0);

            if max > 0 && right > left && baseline > top {
                let slot = f64::from(right - left) / data.values.len() as f64;
                let bar_width = (slot * BAR_FILL).max(1.0);
                for (index, (value, color)) in data.values.iter().zip(data.bar_colors()).enumerate() {
                    let x0 = f64::from(left) + slot * index as f64 + (slot - bar_width) / 2.0;
                    let height = *value as f64 / max as f64 * f64::from(baseline - top);
                    root.draw(&Rectangle::new(
                        [
                            (x0.round() as i32, baseline - height.round() as i32),
                            ((x0 + bar_width).round() as i32, baseline),
                        ],
                        rgb(&color).filled(),
                    ))
                    .map_err(draw_error)?;
                }
            }
            root.draw(&PathElement::new(
                vec![(left, baseline), (right, baseline)],
                BLACK.stroke_width(1),
            ))
            .map_err(draw_error)?;
            root.present().map_err(draw_error)?;
        }
        Ok(buffer)
    }
}

impl ChartRenderer for BitmapCharts {
    fn render(&mut self, data: &ChartData) -> Result<(), ChartError> {
        self.release();
        let doughnut = self.draw_doughnut(data)?;
        let bar = self.draw_bar(data)?;
        self.doughnut = Some(doughnut);
        self.bar = Some(bar);
        debug!(categories = data.labels.len(), "charts rendered");
        Ok(())
    }

    fn release(&mut self) {
        if self.doughnut.take().is_some() | self.bar.take().is_some() {
            debug!("previous charts released");
        }
    }

    fn is_rendered(&self) -> bool {
        self.doughnut.is_some()
    }

    fn export_png(&self, kind: ChartKind) -> Result<Vec<u8>, ChartError> {
        let raster = match kind {
            ChartKind::Doughnut => self.doughnut.as_ref(),
            ChartKind::Bar => self.bar.as_ref(),
        }
        .ok_or(ChartError::NotRendered)?;

        let image = RgbImage::from_raw(self.width, self.height, raster.clone())
            .ok_or_else(|| ChartError::Draw("raster size mismatch".to_string()))?;
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png)?;
        Ok(png.into_inner())
    }
}

fn rgb(color: &Hsl) -> RGBColor {
    let (red, green, blue) = color.rgb();
    RGBColor(red, green, blue)
}

fn draw_error(err: impl std::fmt::Display) -> ChartError {
    ChartError::Draw(err.to_string())
}

fn annular_sector(
    center: (f64, f64),
    inner: f64,
    outer: f64,
    start: f64,
    end: f64,
) -> Vec<(i32, i32)> {
    let steps = ((end - start) / TAU * ARC_STEPS_PER_TURN).ceil().max(1.0) as usize;
    let point = |radius: f64, angle: f64| {
        (
            (center.0 + radius * angle.cos()).round() as i32,
            (center.1 + radius * angle.sin()).round() as i32,
        )
    };
    let angles = (0..=steps)
        .map(|step| start + (end - start) * step as f64 / steps as f64)
        .collect::<Vec<_>>();

    let mut points = angles.iter().map(|angle| point(outer, *angle)).collect::<Vec<_>>();
    points.extend(angles.iter().rev().map(|angle| point(inner, *angle)));
    points
}
