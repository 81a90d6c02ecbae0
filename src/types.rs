//! Common value types shared by definitions, the allocator and the device

use bitflags::bitflags;
use glam::{Vec2, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R11G11B10Float,
    Depth32Float,
    Depth24PlusStencil8,
    R32Float,
    Rg32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rg16Float
            | TextureFormat::R11G11B10Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Physical texture descriptor handed to the device.
///
/// Two logical textures may share one physical allocation only if their
/// descriptors compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            sample_count: 1,
            format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
        }
    }

    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Approximate memory footprint in bytes, including the full mip chain
    /// and every MSAA sample.
    pub fn byte_size(&self) -> u64 {
        let mut total = 0u64;
        let (mut w, mut h) = (self.width.max(1) as u64, self.height.max(1) as u64);
        for _ in 0..self.mip_levels.max(1) {
            total += w * h;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        total * self.format.bytes_per_pixel() as u64 * self.sample_count.max(1) as u64
    }

    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }
}

/// Compare function for depth/stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    #[default]
    Always,
}

/// Stencil operation applied on fail / depth-fail / pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StencilOperation {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    IncrementWrap,
    DecrementWrap,
    Invert,
}

/// Normalized viewport rectangle, `[0, 1]` in both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub offset: Vec2,
    pub size: Vec2,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::FULL
    }
}

impl Viewport {
    pub const FULL: Self = Self {
        offset: Vec2::ZERO,
        size: Vec2::ONE,
    };

    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            offset: Vec2::new(left, top),
            size: Vec2::new(width, height),
        }
    }

    /// Remap this viewport into the sub-rectangle described by `modifier`.
    ///
    /// `modifier` packs `(offset_x, offset_y, scale_x, scale_y)`; this is how
    /// stereo and split-screen execution slots place the same pass into
    /// different regions of the output.
    pub fn modified(&self, modifier: Vec4) -> Self {
        Self {
            offset: Vec2::new(modifier.x, modifier.y) + self.offset * Vec2::new(modifier.z, modifier.w),
            size: self.size * Vec2::new(modifier.z, modifier.w),
        }
    }

    /// Convert to a pixel rectangle `(x, y, width, height)` for a target size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let w = width as f32;
        let h = height as f32;
        (
            (self.offset.x * w).round() as u32,
            (self.offset.y * h).round() as u32,
            (self.size.x * w).round() as u32,
            (self.size.y * h).round() as u32,
        )
    }
}
