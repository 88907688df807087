// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Pixel fill test.
//! Random pixels of a black canvas are painted with random 15-bit colors,
//! structure in the generator shows up as visible patterns.
//! Every lane owns one horizontal band of the canvas.

use crate::rngs::Rng16;

pub type Rgb = [u8; 3];

pub const BLACK: Rgb = [0, 0, 0];

/// Expand the low 15 bits of a sample into an RGB triple, 5 bits per channel.
pub fn color_of(sample: u16) -> Rgb {
    [
        (((sample >> 10) & 0x1f) << 3) as u8,
        (((sample >> 5) & 0x1f) << 3) as u8,
        ((sample & 0x1f) << 3) as u8,
    ]
}

/// Paint `iterations` random pixels of one band.
/// Three samples per pixel: column, row, color.
pub fn fill_band(band: &mut [Rgb], width: usize, test_rng: &mut impl Rng16, iterations: usize) {
    let band_height = band.len() / width;
    for _ in 0..iterations {
        let x = test_rng.next() as usize % width;
        let y = test_rng.next() as usize % band_height;
        band[y * width + x] = color_of(test_rng.next());
    }
}

/// `width * height` canvas split into equally sized bands.
pub struct FillCanvas {
    width: usize,
    height: usize,
    bands: Vec<Vec<Rgb>>,
}

impl FillCanvas {
    /// `height` must be divisible by `band_count`.
    pub fn new(width: usize, height: usize, band_count: usize) -> Self {
        let band_len = width * (height / band_count);
        FillCanvas {
            width,
            height,
            bands: vec![vec![BLACK; band_len]; band_count],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn clear(&mut self) {
        for band in self.bands.iter_mut() {
            band.fill(BLACK);
        }
    }

    /// Hand the bands out to workers, leaving the canvas empty.
    pub fn take_bands(&mut self) -> Vec<Vec<Rgb>> {
        std::mem::take(&mut self.bands)
    }

    /// Put bands back in lane order.
    pub fn restore_bands(&mut self, bands: Vec<Vec<Rgb>>) {
        self.bands = bands;
    }

    /// Reallocate black bands, used when bands were lost with a failed batch.
    pub fn rebuild(&mut self, band_count: usize) {
        *self = FillCanvas::new(self.width, self.height, band_count);
    }

    /// Rows of the whole canvas, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[Rgb]> + '_ {
        self.bands
            .iter()
            .flat_map(move |band| band.chunks_exact(self.width))
    }

    /// The grid as a row major list of rows.
    pub fn grid(&self) -> Vec<Vec<Rgb>> {
        self.rows().map(|row| row.to_vec()).collect()
    }

    /// Packed RGB bytes, row major.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.rows().flatten().flatten().copied().collect()
    }
}
