//! Pixel formats, the frame buffer the bars are painted into, and the
//! lockable surface shared between the tick thread and the window.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, SpectralError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub const NATIVE: Endianness = if cfg!(target_endian = "big") {
        Endianness::Big
    } else {
        Endianness::Little
    };
}

/// Byte depth and byte order of one stored pixel.
///
/// | bytes | layout    |
/// |-------|-----------|
/// | 1     | RGB332    |
/// | 2     | RGB565    |
/// | 3     | RGB888    |
/// | 4     | XRGB8888  |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    bytes_per_pixel: u8,
    endianness: Endianness,
}

impl PixelFormat {
    pub const XRGB8888: PixelFormat = PixelFormat {
        bytes_per_pixel: 4,
        endianness: Endianness::NATIVE,
    };

    pub fn new(bytes_per_pixel: u8, endianness: Endianness) -> Result<Self> {
        match bytes_per_pixel {
            1..=4 => Ok(Self {
                bytes_per_pixel,
                endianness,
            }),
            other => Err(SpectralError::PixelFormat(other)),
        }
    }

    pub fn native(bytes_per_pixel: u8) -> Result<Self> {
        Self::new(bytes_per_pixel, Endianness::NATIVE)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel as usize
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Packs an RGB triple into this format's pixel value.
    pub fn map_rgb(&self, r: u8, g: u8, b: u8) -> u32 {
        let (r, g, b) = (r as u32, g as u32, b as u32);
        match self.bytes_per_pixel {
            1 => (r & 0xe0) | ((g & 0xe0) >> 3) | (b >> 6),
            2 => ((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3),
            _ => (r << 16) | (g << 8) | b,
        }
    }

    /// Inverse of [`PixelFormat::map_rgb`], expanding reduced depths to 0..=255.
    pub fn get_rgb(&self, pixel: u32) -> [u8; 3] {
        let expand = |value: u32, max: u32| (value * 255 / max) as u8;
        match self.bytes_per_pixel {
            1 => [
                expand((pixel >> 5) & 0x7, 7),
                expand((pixel >> 2) & 0x7, 7),
                expand(pixel & 0x3, 3),
            ],
            2 => [
                expand((pixel >> 11) & 0x1f, 31),
                expand((pixel >> 5) & 0x3f, 63),
                expand(pixel & 0x1f, 31),
            ],
            _ => [(pixel >> 16) as u8, (pixel >> 8) as u8, pixel as u8],
        }
    }

    /// Stores `pixel` into the first `bytes_per_pixel` bytes of `dst`.
    pub fn write(&self, dst: &mut [u8], pixel: u32) {
        let n = self.bytes_per_pixel();
        match self.endianness {
            Endianness::Little => dst[..n].copy_from_slice(&pixel.to_le_bytes()[..n]),
            Endianness::Big => dst[..n].copy_from_slice(&pixel.to_be_bytes()[4 - n..]),
        }
    }

    pub fn read(&self, src: &[u8]) -> u32 {
        let n = self.bytes_per_pixel();
        let mut bytes = [0u8; 4];
        match self.endianness {
            Endianness::Little => {
                bytes[..n].copy_from_slice(&src[..n]);
                u32::from_le_bytes(bytes)
            }
            Endianness::Big => {
                bytes[4 - n..].copy_from_slice(&src[..n]);
                u32::from_be_bytes(bytes)
            }
        }
    }
}

pub struct FrameBuffer {
    width: u32,
    height: u32,
    pitch: usize,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Creates a black buffer. Rows are padded to a multiple of four bytes.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let row = width as usize * format.bytes_per_pixel();
        let pitch = (row + 3) & !3;
        Self {
            width,
            height,
            pitch,
            format,
            pixels: vec![0; pitch * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn map_rgb(&self, r: u8, g: u8, b: u8) -> u32 {
        self.format.map_rgb(r, g, b)
    }

    pub fn fill(&mut self, pixel: u32) {
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = self.width as usize * bpp;
        for row in self.pixels.chunks_exact_mut(self.pitch) {
            for dst in row[..row_bytes].chunks_exact_mut(bpp) {
                self.format.write(dst, pixel);
            }
        }
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.pitch + x as usize * self.format.bytes_per_pixel())
    }

    /// Writes one pixel; coordinates outside the buffer are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: u32) {
        if let Some(at) = self.offset(x, y) {
            self.format.write(&mut self.pixels[at..], pixel);
        }
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Option<u32> {
        self.offset(x, y).map(|at| self.format.read(&self.pixels[at..]))
    }

    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.get_pixel(x, y).map(|p| self.format.get_rgb(p))
    }

    /// Row-major RGBA copy of the visible pixels, alpha fully opaque.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                let [r, g, b] = self.rgb_at(x, y).unwrap_or_default();
                rgba.extend_from_slice(&[r, g, b, 255]);
            }
        }
        rgba
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }
}

/// A frame buffer shared between the painter and the presenter.
///
/// Writers go through [`Surface::lock`]; every released lock bumps the
/// generation so the presenter knows a new frame is ready.
pub struct Surface {
    buffer: Mutex<FrameBuffer>,
    generation: AtomicU64,
}

impl Surface {
    pub fn new(buffer: FrameBuffer) -> Self {
        Self {
            buffer: Mutex::new(buffer),
            generation: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) -> Result<SurfaceLock<'_>> {
        let guard = self
            .buffer
            .lock()
            .map_err(|_| SpectralError::Poisoned("surface"))?;
        Ok(SurfaceLock {
            guard,
            generation: &self.generation,
        })
    }

    /// Reads the buffer without marking it updated.
    pub fn read<R>(&self, f: impl FnOnce(&FrameBuffer) -> R) -> Result<R> {
        let guard = self
            .buffer
            .lock()
            .map_err(|_| SpectralError::Poisoned("surface"))?;
        Ok(f(&guard))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

pub struct SurfaceLock<'a> {
    guard: MutexGuard<'a, FrameBuffer>,
    generation: &'a AtomicU64,
}

impl Deref for SurfaceLock<'_> {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.guard
    }
}

impl DerefMut for SurfaceLock<'_> {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        &mut self.guard
    }
}

impl Drop for SurfaceLock<'_> {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}
