use bytes::Bytes;

use crate::io::ByteOrder;
use crate::model::PixelType;

/// Where a returned buffer came from.
///
/// Travels with every [`PixelBuffer`], so callers that need the channel of
/// the last read (for a lookup table, say) get it from the buffer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelContext {
    pub series: usize,
    pub resolution: usize,
    /// Flat plane index within the series
    pub plane: u32,
    pub z: u32,
    pub c: u32,
    pub t: u32,
}

/// Pixels of one window of one plane.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    data: Bytes,
    width: u32,
    height: u32,
    pixel_type: PixelType,
    samples_per_pixel: u32,
    interleaved: bool,
    byte_order: ByteOrder,
    context: ChannelContext,
    truncated: bool,
}

impl PixelBuffer {
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn samples_per_pixel(&self) -> u32 {
        self.samples_per_pixel
    }

    /// Whether samples of one pixel are adjacent. When false and there is
    /// more than one sample, the buffer holds one sub-plane per sample.
    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    /// Byte order of multi-byte samples in `data`.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn context(&self) -> ChannelContext {
        self.context
    }

    /// True when the plane lay beyond the end of storage and the buffer is
    /// all zeros.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

// =============================================================================
// Post-processing
// =============================================================================

/// Raw window bytes plus the layout needed to post-process them.
#[derive(Debug)]
pub(crate) struct RawWindow {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_type: PixelType,
    pub samples_per_pixel: u32,
    pub interleaved: bool,
    pub byte_order: ByteOrder,
}

impl RawWindow {
    fn sample_bytes(&self) -> usize {
        self.pixel_type.bytes_per_sample() as usize
    }

    fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Rewrite multi-byte samples into `target` order.
    pub fn convert_byte_order(&mut self, target: ByteOrder) {
        let sample_bytes = self.sample_bytes();
        self.byte_order.normalize(&mut self.data, sample_bytes, target);
        self.byte_order = target;
    }

    /// Swap the first and third sample of every 3-sample pixel.
    pub fn bgr_to_rgb(&mut self) {
        if self.samples_per_pixel != 3 {
            return;
        }
        let sample_bytes = self.sample_bytes();
        if self.interleaved {
            for pixel in self.data.chunks_exact_mut(3 * sample_bytes) {
                let (blue, rest) = pixel.split_at_mut(sample_bytes);
                blue.swap_with_slice(&mut rest[sample_bytes..2 * sample_bytes]);
            }
        } else {
            let plane = self.pixels() * sample_bytes;
            if self.data.len() >= 3 * plane {
                let (blue, rest) = self.data.split_at_mut(plane);
                blue.swap_with_slice(&mut rest[plane..2 * plane]);
            }
        }
    }

    /// Convert interleaved samples into one sub-plane per sample.
    pub fn deinterleave(&mut self) {
        let spp = self.samples_per_pixel as usize;
        if !self.interleaved || spp < 2 {
            return;
        }
        let sample_bytes = self.sample_bytes();
        let pixels = self.pixels();
        let mut planar = vec![0u8; self.data.len()];
        for (p, pixel) in self.data.chunks_exact(spp * sample_bytes).enumerate() {
            for (s, sample) in pixel.chunks_exact(sample_bytes).enumerate() {
                let at = (s * pixels + p) * sample_bytes;
                planar[at..at + sample_bytes].copy_from_slice(sample);
            }
        }
        self.data = planar;
        self.interleaved = false;
    }

    pub fn into_buffer(self, context: ChannelContext, truncated: bool) -> PixelBuffer {
        PixelBuffer {
            data: Bytes::from(self.data),
            width: self.width,
            height: self.height,
            pixel_type: self.pixel_type,
            samples_per_pixel: self.samples_per_pixel,
            interleaved: self.interleaved,
            byte_order: self.byte_order,
            context,
            truncated,
        }
    }
}
