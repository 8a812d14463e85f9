//! Push-constant layouts and the per-draw record packer.
//!
//! Every layout is a closed, numbered variant. Field order of a published
//! layout never changes; a new arrangement is a new variant.

use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::{
    bindless::{ResourceHandle, ResourceKind, INVALID_INDEX},
    error::{RegistryError, RegistryResult},
};

/// Platform push-constant budget every layout must fit in.
pub const MAX_PUSH_CONSTANT_BYTES: usize = 128;
const MAX_WORDS: usize = MAX_PUSH_CONSTANT_BYTES / size_of::<u32>();

/// Generic slots carried by [`LayoutVersion::V2`].
pub const V2_SLOT_COUNT: usize = 10;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PushConstantField {
    Camera,
    Model,
    Material,
    Slot(u8),
    Reserved,
    Padding,
}

use PushConstantField::{Camera, Material, Model, Padding, Reserved, Slot};

const V1_FIELDS: [PushConstantField; 5] = [Model, Camera, Material, Padding, Padding];

const V2_FIELDS: [PushConstantField; 17] = [
    Model,
    Camera,
    Material,
    Reserved,
    Reserved,
    Reserved,
    Reserved,
    Slot(0),
    Slot(1),
    Slot(2),
    Slot(3),
    Slot(4),
    Slot(5),
    Slot(6),
    Slot(7),
    Slot(8),
    Slot(9),
];

const V3_FIELDS: [PushConstantField; 4] = [Camera, Model, Material, Padding];

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LayoutVersion {
    /// `model, camera, material, pad, pad`
    V1,
    /// `model, camera, material, reserved[4], slots[10]`
    V2,
    /// `camera, model, material, pad`
    V3,
}

impl LayoutVersion {
    pub fn id(&self) -> u32 {
        match self {
            LayoutVersion::V1 => 1,
            LayoutVersion::V2 => 2,
            LayoutVersion::V3 => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayoutVersion::V1 => "model-first padded",
            LayoutVersion::V2 => "model-first slotted",
            LayoutVersion::V3 => "camera-first",
        }
    }

    pub fn fields(&self) -> &'static [PushConstantField] {
        match self {
            LayoutVersion::V1 => &V1_FIELDS,
            LayoutVersion::V2 => &V2_FIELDS,
            LayoutVersion::V3 => &V3_FIELDS,
        }
    }

    pub fn word_count(&self) -> usize {
        self.fields().len()
    }

    pub fn size_bytes(&self) -> u32 {
        (self.word_count() * size_of::<u32>()) as u32
    }

    pub fn slot_count(&self) -> usize {
        self.fields()
            .iter()
            .filter(|f| matches!(f, PushConstantField::Slot(_)))
            .count()
    }

    /// Byte offset of `field` in the block, `None` if the layout lacks it.
    pub fn offset_of(&self, field: PushConstantField) -> Option<u32> {
        self.fields()
            .iter()
            .position(|f| *f == field)
            .map(|word| (word * size_of::<u32>()) as u32)
    }
}

impl std::fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.id(), self.name())
    }
}

#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PushConstantsV1 {
    pub model: u32,
    pub camera: u32,
    pub material: u32,
    pub pad: [u32; 2],
}

#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PushConstantsV2 {
    pub model: u32,
    pub camera: u32,
    pub material: u32,
    pub reserved: [u32; 4],
    pub slots: [u32; V2_SLOT_COUNT],
}

#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PushConstantsV3 {
    pub camera: u32,
    pub model: u32,
    pub material: u32,
    pub pad: u32,
}

/// One draw's push-constant block, tagged with the layout it was packed for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PushConstantRecord {
    layout: LayoutVersion,
    words: [u32; MAX_WORDS],
}

impl PushConstantRecord {
    pub fn layout(&self) -> LayoutVersion {
        self.layout
    }

    pub fn words(&self) -> &[u32] {
        &self.words[..self.layout.word_count()]
    }

    pub fn get(&self, field: PushConstantField) -> Option<u32> {
        self.layout
            .offset_of(field)
            .map(|offset| self.words[offset as usize / size_of::<u32>()])
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.words())
    }

    /// Bytes to upload into a pipeline built against `expected`.
    pub fn bytes_for(&self, expected: LayoutVersion) -> RegistryResult<&[u8]> {
        if self.layout != expected {
            return Err(RegistryError::LayoutMismatch {
                expected,
                found: self.layout,
            });
        }
        Ok(self.as_bytes())
    }
}

pub struct PushConstantPacker {
    layout: LayoutVersion,
    validate: bool,
}

impl PushConstantPacker {
    pub fn new(layout: LayoutVersion, validate: bool) -> Self {
        Self { layout, validate }
    }

    pub fn layout(&self) -> LayoutVersion {
        self.layout
    }

    pub fn validates(&self) -> bool {
        self.validate
    }

    /// Builds the record for one draw. `is_live` is consulted only when
    /// validation is on; `INVALID` handles are always accepted.
    pub fn pack<F>(
        &self,
        camera: ResourceHandle,
        model: ResourceHandle,
        material: ResourceHandle,
        extra_slots: &[ResourceHandle],
        is_live: F,
    ) -> RegistryResult<PushConstantRecord>
    where
        F: Fn(ResourceHandle) -> bool,
    {
        let available = self.layout.slot_count();
        if extra_slots.len() > available {
            return Err(RegistryError::SlotOverflow {
                given: extra_slots.len(),
                available,
            });
        }

        if self.validate {
            for handle in [camera, model, material] {
                Self::check(handle, Some(ResourceKind::UniformBuffer), &is_live)?;
            }
            for handle in extra_slots {
                Self::check(*handle, None, &is_live)?;
            }
        }

        let mut words = [INVALID_INDEX; MAX_WORDS];
        for (word, field) in words.iter_mut().zip(self.layout.fields()) {
            *word = match field {
                Camera => camera.index(),
                Model => model.index(),
                Material => material.index(),
                Slot(n) => extra_slots
                    .get(*n as usize)
                    .map_or(INVALID_INDEX, |h| h.index()),
                Reserved | Padding => INVALID_INDEX,
            };
        }

        Ok(PushConstantRecord {
            layout: self.layout,
            words,
        })
    }

    fn check<F>(
        handle: ResourceHandle,
        expected: Option<ResourceKind>,
        is_live: &F,
    ) -> RegistryResult<()>
    where
        F: Fn(ResourceHandle) -> bool,
    {
        let Some(found) = handle.kind() else {
            return Ok(());
        };

        if let Some(expected) = expected {
            if found != expected {
                return Err(RegistryError::KindMismatch { expected, found });
            }
        }

        if !is_live(handle) {
            return Err(RegistryError::InvalidHandle(handle));
        }
        Ok(())
    }
}
