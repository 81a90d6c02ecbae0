//! Logical texture declarations and references

use crate::types::{TextureDescriptor, TextureFormat, TextureUsage};

/// Describes texture dimensions, possibly relative to the bound output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizePolicy {
    /// Same size as the workspace output target
    MatchOutput,
    /// Relative to the output size (1.0 = full size)
    RelativeToOutput { width_scale: f32, height_scale: f32 },
    /// Absolute size in pixels
    Explicit { width: u32, height: u32 },
}

impl Default for SizePolicy {
    fn default() -> Self {
        SizePolicy::MatchOutput
    }
}

impl SizePolicy {
    pub fn resolve(&self, output_width: u32, output_height: u32) -> (u32, u32) {
        let (width, height) = match self {
            SizePolicy::MatchOutput => (output_width, output_height),
            SizePolicy::RelativeToOutput {
                width_scale,
                height_scale,
            } => (
                ((output_width as f32) * width_scale) as u32,
                ((output_height as f32) * height_scale) as u32,
            ),
            SizePolicy::Explicit { width, height } => (*width, *height),
        };
        (width.max(1), height.max(1))
    }
}

/// How a multisampled texture is turned into a single-sampled one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MsaaResolve {
    /// The consuming pass resolves as a side effect of sampling
    #[default]
    Implicit,
    /// A dedicated `resolve` pass copies into a second, single-sampled surface
    Explicit,
}

/// A logical (not yet physical) texture declared by a node or a workspace
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDeclaration {
    pub name: String,
    pub format: TextureFormat,
    pub size: SizePolicy,
    /// Contents survive across frames; never aliased
    pub persistent: bool,
    pub sample_count: u32,
    pub resolve: MsaaResolve,
    pub mip_levels: u32,
    /// Writable through an unordered access view
    pub uav: bool,
    /// Only textures in the same group may share memory; `None` aliases freely
    pub aliasing_group: Option<u32>,
}

impl TextureDeclaration {
    pub fn new(name: impl Into<String>, format: TextureFormat) -> Self {
        Self {
            name: name.into(),
            format,
            size: SizePolicy::default(),
            persistent: false,
            sample_count: 1,
            resolve: MsaaResolve::default(),
            mip_levels: 1,
            uav: false,
            aliasing_group: None,
        }
    }

    pub fn with_size(mut self, size: SizePolicy) -> Self {
        self.size = size;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_msaa(mut self, sample_count: u32, resolve: MsaaResolve) -> Self {
        self.sample_count = sample_count;
        self.resolve = resolve;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_uav(mut self) -> Self {
        self.uav = true;
        self
    }

    pub fn with_aliasing_group(mut self, group: u32) -> Self {
        self.aliasing_group = Some(group);
        self
    }

    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }

    pub fn needs_explicit_resolve(&self) -> bool {
        self.is_multisampled() && self.resolve == MsaaResolve::Explicit
    }

    /// Build the physical descriptor for a given output size.
    pub fn descriptor(&self, output_width: u32, output_height: u32) -> TextureDescriptor {
        let (width, height) = self.size.resolve(output_width, output_height);
        let mut usage = TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT;
        if self.uav {
            usage |= TextureUsage::STORAGE_BINDING;
        }
        if self.mip_levels > 1 {
            usage |= TextureUsage::COPY_SRC | TextureUsage::COPY_DST;
        }
        TextureDescriptor {
            width,
            height,
            mip_levels: self.mip_levels.max(1),
            sample_count: self.sample_count.max(1),
            format: self.format,
            usage,
        }
    }

    /// Descriptor of the single-sampled surface an explicit resolve writes into.
    pub fn resolved_descriptor(&self, output_width: u32, output_height: u32) -> TextureDescriptor {
        let mut desc = self.descriptor(output_width, output_height);
        desc.sample_count = 1;
        desc.usage |= TextureUsage::COPY_DST;
        desc
    }
}

/// How a pass names a texture inside its node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TextureRef {
    /// A named input channel of the node
    Input(String),
    /// A texture declared inside the node
    Local(String),
    /// A texture declared at workspace scope
    Global(String),
}

impl TextureRef {
    pub fn input(name: impl Into<String>) -> Self {
        Self::Input(name.into())
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    pub fn global(name: impl Into<String>) -> Self {
        Self::Global(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Input(name) | Self::Local(name) | Self::Global(name) => name,
        }
    }
}

impl std::fmt::Display for TextureRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input(name) => write!(f, "in:{name}"),
            Self::Local(name) => write!(f, "{name}"),
            Self::Global(name) => write!(f, "global:{name}"),
        }
    }
}
