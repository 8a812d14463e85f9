use ash::vk::{self, DescriptorType};

/// Descriptor set index shared by every bindless shader.
pub const BINDLESS_DESCRIPTOR_SET: u32 = 0;

/// Shader-side index meaning "unbound, do not read".
pub const INVALID_INDEX: u32 = u32::MAX;

const KIND_BITS: u32 = 2;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;
const INDEX_BITS: u32 = 30;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Largest slot index a handle can carry. The all-ones index is kept out of
/// reach so no live handle ever collides with [`ResourceHandle::INVALID`].
pub const MAX_SLOT_INDEX: u32 = (INDEX_MASK as u32) - 1;

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, strum_macros::EnumIter, strum_macros::Display,
)]
#[repr(u8)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    Sampler2D,
    SamplerCube,
}

impl ResourceKind {
    pub const COUNT: usize = 4;

    /// Binding number inside [`BINDLESS_DESCRIPTOR_SET`].
    pub fn binding(&self) -> u32 {
        match self {
            ResourceKind::UniformBuffer => 0,
            ResourceKind::StorageBuffer => 1,
            ResourceKind::Sampler2D => 2,
            ResourceKind::SamplerCube => 3,
        }
    }

    pub fn as_vk_type(&self) -> DescriptorType {
        match self {
            ResourceKind::UniformBuffer => DescriptorType::UNIFORM_BUFFER,
            ResourceKind::StorageBuffer => DescriptorType::STORAGE_BUFFER,
            ResourceKind::Sampler2D | ResourceKind::SamplerCube => {
                DescriptorType::COMBINED_IMAGE_SAMPLER
            }
        }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(
            self,
            ResourceKind::UniformBuffer | ResourceKind::StorageBuffer
        )
    }

    pub(crate) fn slot(&self) -> usize {
        *self as usize
    }

    fn from_bits(bits: u64) -> Self {
        match bits & KIND_MASK {
            0 => ResourceKind::UniformBuffer,
            1 => ResourceKind::StorageBuffer,
            2 => ResourceKind::Sampler2D,
            _ => ResourceKind::SamplerCube,
        }
    }
}

/// Identifies one live binding: kind tag, slot index and generation packed
/// into 64 bits. Bits `0..2` hold the kind, `2..32` the index and `32..64`
/// the generation.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    pub const INVALID: ResourceHandle = ResourceHandle(u64::MAX);

    pub(crate) fn new(kind: ResourceKind, index: u32, generation: u32) -> Self {
        debug_assert!(index <= MAX_SLOT_INDEX, "slot index {index} out of range");
        Self(
            (kind as u64)
                | ((index as u64 & INDEX_MASK) << KIND_BITS)
                | ((generation as u64) << 32),
        )
    }

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }

    /// `None` for [`ResourceHandle::INVALID`].
    pub fn kind(&self) -> Option<ResourceKind> {
        (!self.is_invalid()).then(|| ResourceKind::from_bits(self.0))
    }

    /// The value a shader indexes its descriptor array with.
    pub fn index(&self) -> u32 {
        if self.is_invalid() {
            INVALID_INDEX
        } else {
            ((self.0 >> KIND_BITS) & INDEX_MASK) as u32
        }
    }

    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn to_bits(&self) -> u64 {
        self.0
    }
}

impl std::default::Default for ResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            None => write!(f, "ResourceHandle(INVALID)"),
            Some(kind) => write!(
                f,
                "ResourceHandle({kind}#{} gen {})",
                self.index(),
                self.generation()
            ),
        }
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// The already-created GPU object a slot points at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl DescriptorResource {
    pub fn whole_buffer(buffer: vk::Buffer) -> Self {
        DescriptorResource::Buffer {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    pub fn sampled_image(view: vk::ImageView, sampler: vk::Sampler) -> Self {
        DescriptorResource::Image {
            view,
            sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub fn fits(&self, kind: ResourceKind) -> bool {
        match self {
            DescriptorResource::Buffer { .. } => kind.is_buffer(),
            DescriptorResource::Image { .. } => !kind.is_buffer(),
        }
    }
}
