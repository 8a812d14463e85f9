use std::{fs::File, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    bindless::{ResourceKind, MAX_SLOT_INDEX},
    error::{RegistryError, RegistryResult},
    push_constants::LayoutVersion,
};

/// What happens when a kind's descriptor array is full.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CapacityPolicy {
    /// Fail with `CapacityExceeded`.
    Fixed,
    /// Double the array, up to the kind's `max_descriptors`.
    Grow,
}

/// Handle checks performed by the push-constant packer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Validate in debug builds only.
    Auto,
    Always,
    Never,
}

impl ValidationMode {
    pub fn enabled(&self) -> bool {
        match self {
            ValidationMode::Auto => cfg!(debug_assertions),
            ValidationMode::Always => true,
            ValidationMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct KindConfig {
    pub initial_capacity: u32,
    pub policy: CapacityPolicy,
    /// Hard platform ceiling (descriptor count limit of the device).
    pub max_descriptors: u32,
}

impl KindConfig {
    pub fn fixed(capacity: u32) -> Self {
        Self {
            initial_capacity: capacity,
            policy: CapacityPolicy::Fixed,
            max_descriptors: capacity,
        }
    }

    pub fn growable(initial_capacity: u32, max_descriptors: u32) -> Self {
        Self {
            initial_capacity,
            policy: CapacityPolicy::Grow,
            max_descriptors,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub layout: LayoutVersion,
    pub max_inflight_frames: u64,
    pub validation: ValidationMode,
    /// Keep index 0 of every kind bound to the dummy resource.
    pub reserve_dummy_slot: bool,
    pub uniform_buffers: KindConfig,
    pub storage_buffers: KindConfig,
    pub textures_2d: KindConfig,
    pub textures_cube: KindConfig,
}

impl std::default::Default for RegistryConfig {
    fn default() -> Self {
        Self {
            layout: LayoutVersion::V2,
            max_inflight_frames: 2,
            validation: ValidationMode::Auto,
            reserve_dummy_slot: true,
            uniform_buffers: KindConfig::growable(8, 1024),
            storage_buffers: KindConfig::growable(64, 1024),
            textures_2d: KindConfig::growable(64, 1024),
            textures_cube: KindConfig::growable(8, 1024),
        }
    }
}

impl RegistryConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> RegistryResult<RegistryConfig> {
        let cfg: RegistryConfig = ron::de::from_reader(File::open(path.as_ref())?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_ron(text: &str) -> RegistryResult<RegistryConfig> {
        let cfg: RegistryConfig = ron::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn kind(&self, kind: ResourceKind) -> &KindConfig {
        match kind {
            ResourceKind::UniformBuffer => &self.uniform_buffers,
            ResourceKind::StorageBuffer => &self.storage_buffers,
            ResourceKind::Sampler2D => &self.textures_2d,
            ResourceKind::SamplerCube => &self.textures_cube,
        }
    }

    pub fn kind_mut(&mut self, kind: ResourceKind) -> &mut KindConfig {
        match kind {
            ResourceKind::UniformBuffer => &mut self.uniform_buffers,
            ResourceKind::StorageBuffer => &mut self.storage_buffers,
            ResourceKind::Sampler2D => &mut self.textures_2d,
            ResourceKind::SamplerCube => &mut self.textures_cube,
        }
    }

    pub fn validate(&self) -> RegistryResult<()> {
        use strum::IntoEnumIterator;

        if self.max_inflight_frames == 0 {
            return Err(RegistryError::Config(
                "max_inflight_frames must be at least 1".into(),
            ));
        }

        for kind in ResourceKind::iter() {
            let k = self.kind(kind);
            let min = if self.reserve_dummy_slot { 2 } else { 1 };
            if k.initial_capacity < min {
                return Err(RegistryError::Config(format!(
                    "{kind}: initial capacity {} leaves no usable slot",
                    k.initial_capacity
                )));
            }
            if k.initial_capacity > k.max_descriptors {
                return Err(RegistryError::Config(format!(
                    "{kind}: initial capacity {} above descriptor limit {}",
                    k.initial_capacity, k.max_descriptors
                )));
            }
            if k.max_descriptors > MAX_SLOT_INDEX + 1 {
                return Err(RegistryError::Config(format!(
                    "{kind}: descriptor limit {} not addressable by handles",
                    k.max_descriptors
                )));
            }
        }

        Ok(())
    }
}
