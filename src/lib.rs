//! Host-side registry for bindless GPU resources.
//!
//! Every uniform buffer, storage buffer, 2D texture and cube texture lives in
//! one descriptor array per kind (set 0, bindings 0..=3). Draws select array
//! elements through integer indices carried in a push-constant block. This
//! crate hands out those indices, keeps them from being reused while a frame
//! in flight may still read them, mirrors changes into the descriptor arrays,
//! and packs the per-draw push-constant record.

pub mod app_config;
pub mod bindless;
pub mod descriptor_binder;
pub mod error;
pub mod push_constants;
pub mod registry;
pub mod retirement;
pub mod slot_table;
pub mod vulkan;

pub use app_config::{CapacityPolicy, KindConfig, RegistryConfig, ValidationMode};
pub use bindless::{DescriptorResource, ResourceHandle, ResourceKind, INVALID_INDEX};
pub use descriptor_binder::{DescriptorArrayBinder, DescriptorUpdate, DescriptorWriter};
pub use error::{RegistryError, RegistryResult};
pub use push_constants::{LayoutVersion, PushConstantPacker, PushConstantRecord};
pub use registry::BindlessRegistry;
pub use retirement::{FrameRetirementQueue, FrameTimeline, RetirementEntry};
pub use slot_table::{DescriptorContents, SlotStats, SlotTable};
