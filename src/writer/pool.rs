//! Pixel-buffer pool
//!
//! Fixed-size set of reusable frame buffers that rendered images are drawn
//! into before encoding.

use crate::media::{PixelBuffer, PixelFormat, RenderedImage};

pub struct PixelBufferPool {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    capacity: usize,
    free: Vec<PixelBuffer>,
}

impl PixelBufferPool {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, capacity: usize) -> Self {
        Self {
            width,
            height,
            pixel_format,
            capacity,
            free: Vec::with_capacity(capacity),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Take a buffer from the pool, allocating if none is free
    pub fn acquire(&mut self) -> PixelBuffer {
        self.free
            .pop()
            .unwrap_or_else(|| PixelBuffer::new(self.width, self.height, self.pixel_format))
    }

    /// Return a buffer. Buffers beyond capacity or of another shape are dropped.
    pub fn recycle(&mut self, buffer: PixelBuffer) {
        let fits = buffer.width == self.width
            && buffer.height == self.height
            && buffer.pixel_format == self.pixel_format;
        if fits && self.free.len() < self.capacity {
            self.free.push(buffer);
        }
    }

    /// Draw `image` into a pooled buffer, scaling nearest-neighbour and
    /// swapping red/blue when the pixel layouts differ
    pub fn render(&mut self, image: &RenderedImage) -> PixelBuffer {
        let mut buffer = self.acquire();
        let bpp = self.pixel_format.bytes_per_pixel();
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);
        let (src_w, src_h) = (image.width as usize, image.height as usize);
        let src_stride = src_w * image.pixel_format.bytes_per_pixel();
        let swap = image.pixel_format != self.pixel_format;

        if src_w == 0 || src_h == 0 || image.data.len() < src_stride * src_h {
            tracing::debug!("Rendered image is empty or truncated, encoding a blank frame");
            buffer.data.fill(0);
            return buffer;
        }

        for y in 0..dst_h {
            let sy = y * src_h / dst_h;
            for x in 0..dst_w {
                let sx = x * src_w / dst_w;
                let src = sy * src_stride + sx * bpp;
                let dst = (y * dst_w + x) * bpp;
                let px = &image.data[src..src + bpp];
                let out = &mut buffer.data[dst..dst + bpp];
                if swap {
                    out.copy_from_slice(&[px[2], px[1], px[0], px[3]]);
                } else {
                    out.copy_from_slice(px);
                }
            }
        }

        buffer
    }
}
