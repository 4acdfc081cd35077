use bytemuck::Pod;
use serde::{Deserialize, Serialize};

/// The film channels the hardware merge knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Displayable output of one image pipeline (RGB).
    ImagePipeline,
    /// Alpha plus its accumulated weight.
    Alpha,
    /// Object id of the first hit, one `u32` per pixel.
    ObjectId,
    /// Radiance divided by the per-pixel sample weight (RGB + weight).
    RadiancePerPixelNormalized,
    /// Radiance scaled by a single factor for the whole screen (RGB).
    RadiancePerScreenNormalized,
}

impl ChannelKind {
    /// Number of scalar components stored per pixel.
    pub fn components(&self) -> usize {
        match self {
            ChannelKind::ImagePipeline => 3,
            ChannelKind::Alpha => 2,
            ChannelKind::ObjectId => 1,
            ChannelKind::RadiancePerPixelNormalized => 4,
            ChannelKind::RadiancePerScreenNormalized => 3,
        }
    }

    /// Label used for device buffers mirroring this channel.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::ImagePipeline => "IMAGEPIPELINE",
            ChannelKind::Alpha => "ALPHA",
            ChannelKind::ObjectId => "OBJECT_ID",
            ChannelKind::RadiancePerPixelNormalized => "RADIANCE_PER_PIXEL_NORMALIZED",
            ChannelKind::RadiancePerScreenNormalized => "RADIANCE_PER_SCREEN_NORMALIZED",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A host-resident pixel array.
///
/// Values are stored interleaved: pixel `i` occupies
/// `data[i * components .. (i + 1) * components]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel<T: Pod> {
    kind: ChannelKind,
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T: Pod> Channel<T> {
    /// Create a zero-filled channel.
    pub fn new(kind: ChannelKind, width: u32, height: u32) -> Self {
        let len = (width as usize) * (height as usize) * kind.components();
        Self {
            kind,
            width,
            height,
            data: vec![T::zeroed(); len],
        }
    }

    /// Create a channel from existing interleaved pixel data.
    /// Returns None if the length does not match the dimensions.
    pub fn from_pixels(kind: ChannelKind, width: u32, height: u32, data: Vec<T>) -> Option<Self> {
        let expected = (width as usize) * (height as usize) * kind.components();
        if data.len() != expected {
            return None;
        }
        Some(Self {
            kind,
            width,
            height,
            data,
        })
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Total number of scalar elements.
    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    /// Total byte size of the pixel data.
    pub fn byte_size(&self) -> usize {
        std::mem::size_of_val(self.data.as_slice())
    }

    pub fn pixels(&self) -> &[T] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Raw bytes of the pixel data, as uploaded to a device.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Mutable raw bytes, used when a device read lands back on the host.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// Components of a single pixel. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<&[T]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.kind.components();
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * c;
        Some(&self.data[offset..offset + c])
    }

    /// Overwrite a single pixel. No-op if out of bounds or if `values`
    /// does not hold exactly one pixel.
    pub fn set_pixel(&mut self, x: u32, y: u32, values: &[T]) {
        let c = self.kind.components();
        if x >= self.width || y >= self.height || values.len() != c {
            return;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * c;
        self.data[offset..offset + c].copy_from_slice(values);
    }

    /// Reset every element to zero.
    pub fn clear(&mut self) {
        self.data.fill(T::zeroed());
    }
}
