use crate::{
    bindless::{ResourceHandle, ResourceKind},
    push_constants::LayoutVersion,
};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{kind} descriptor array is full ({capacity} slots)")]
    CapacityExceeded { kind: ResourceKind, capacity: u32 },

    #[error("stale or released handle {0}")]
    InvalidHandle(ResourceHandle),

    #[error("expected a {expected} binding, got {found}")]
    KindMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error("resource cannot be bound to the {0} array")]
    IncompatibleResource(ResourceKind),

    #[error("{count} slabs of {slab_size} bytes cannot be addressed")]
    InvalidChunking { slab_size: u64, count: u32 },

    #[error("{given} generic slots passed, layout carries {available}")]
    SlotOverflow { given: usize, available: usize },

    #[error("push constants packed for layout {found}, pipeline expects {expected}")]
    LayoutMismatch {
        expected: LayoutVersion,
        found: LayoutVersion,
    },

    #[error("device lost")]
    DeviceLost,

    #[error("vulkan error: {0}")]
    Vulkan(ash::vk::Result),

    #[error("config error: {0}")]
    Config(String),
}

impl From<ash::vk::Result> for RegistryError {
    fn from(e: ash::vk::Result) -> Self {
        match e {
            ash::vk::Result::ERROR_DEVICE_LOST => RegistryError::DeviceLost,
            other => RegistryError::Vulkan(other),
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        RegistryError::Config(e.to_string())
    }
}

impl From<ron::error::SpannedError> for RegistryError {
    fn from(e: ron::error::SpannedError) -> Self {
        RegistryError::Config(e.to_string())
    }
}
