//! Vulkan side of the bindless contract: the single descriptor set holding
//! every array, the pipeline layout carrying the push-constant block, and
//! the collaborators the registry drives (descriptor writes, frame timeline).

use ash::{vk, Device};
use smallvec::SmallVec;
use strum::IntoEnumIterator;

use crate::{
    app_config::RegistryConfig,
    bindless::{DescriptorResource, ResourceKind, BINDLESS_DESCRIPTOR_SET},
    descriptor_binder::{DescriptorUpdate, DescriptorWriter},
    error::{RegistryError, RegistryResult},
    push_constants::{LayoutVersion, PushConstantRecord},
    retirement::FrameTimeline,
    slot_table::DescriptorContents,
};

/// Clamps every kind's descriptor ceiling to what the device can bind with
/// update-after-bind.
pub fn apply_device_limits(
    cfg: &mut RegistryConfig,
    props: &vk::PhysicalDeviceDescriptorIndexingProperties,
) {
    // both sampler arrays draw from the same sampled image / sampler budget
    let image_budget = props
        .max_per_stage_descriptor_update_after_bind_sampled_images
        .min(props.max_per_stage_descriptor_update_after_bind_samplers)
        / 2;

    for kind in ResourceKind::iter() {
        let device_max = match kind {
            ResourceKind::UniformBuffer => {
                props.max_per_stage_descriptor_update_after_bind_uniform_buffers
            }
            ResourceKind::StorageBuffer => {
                props.max_per_stage_descriptor_update_after_bind_storage_buffers
            }
            ResourceKind::Sampler2D | ResourceKind::SamplerCube => image_budget,
        };

        let k = cfg.kind_mut(kind);
        if k.max_descriptors > device_max {
            log::warn!(
                "{kind}: descriptor limit {} clamped to device maximum {device_max}",
                k.max_descriptors
            );
            k.max_descriptors = device_max;
            k.initial_capacity = k.initial_capacity.min(device_max);
        }
    }
}

pub fn ensure_push_constant_budget(
    layout: LayoutVersion,
    limits: &vk::PhysicalDeviceLimits,
) -> RegistryResult<()> {
    if layout.size_bytes() > limits.max_push_constants_size {
        return Err(RegistryError::Config(format!(
            "layout {layout} needs {} push-constant bytes, device allows {}",
            layout.size_bytes(),
            limits.max_push_constants_size
        )));
    }
    Ok(())
}

/// Descriptor set 0 with one partially bound array per resource kind.
pub struct BindlessDescriptorSet {
    device: Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl BindlessDescriptorSet {
    pub fn new(device: &Device, cfg: &RegistryConfig) -> RegistryResult<Self> {
        let bindings = ResourceKind::iter()
            .map(|kind| {
                *vk::DescriptorSetLayoutBinding::builder()
                    .binding(kind.binding())
                    .descriptor_type(kind.as_vk_type())
                    .descriptor_count(cfg.kind(kind).max_descriptors)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect::<SmallVec<[_; ResourceKind::COUNT]>>();

        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING;
            ResourceKind::COUNT];

        let mut flag_info =
            *vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&binding_flags);

        let layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder()
                    .push_next(&mut flag_info)
                    .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                    .bindings(&bindings),
                None,
            )
        }?;

        let image_count = cfg.textures_2d.max_descriptors + cfg.textures_cube.max_descriptors;
        let pool_sizes = [
            *vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(cfg.uniform_buffers.max_descriptors),
            *vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(cfg.storage_buffers.max_descriptors),
            *vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(image_count),
        ];

        let pool = match unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
                    .max_sets(1)
                    .pool_sizes(&pool_sizes),
                None,
            )
        } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(e.into());
            }
        };

        let set = unsafe {
            device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(pool)
                    .set_layouts(std::slice::from_ref(&layout)),
            )
        }
        .map(|sets| sets[0]);

        let set = match set {
            Ok(set) => set,
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(e.into());
            }
        };

        log::info!(
            "Bindless descriptor set created: {} uniform, {} storage, {} 2D, {} cube",
            cfg.uniform_buffers.max_descriptors,
            cfg.storage_buffers.max_descriptors,
            cfg.textures_2d.max_descriptors,
            cfg.textures_cube.max_descriptors
        );

        Ok(Self {
            device: device.clone(),
            layout,
            pool,
            set,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn writer(&self, dummies: DummyResources) -> VulkanDescriptorWriter<'_> {
        VulkanDescriptorWriter {
            device: &self.device,
            set: self.set,
            dummies,
        }
    }
}

impl std::ops::Drop for BindlessDescriptorSet {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pipeline layout for shaders compiled against one push-constant layout.
pub struct BindlessPipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
    set: vk::DescriptorSet,
    version: LayoutVersion,
}

impl BindlessPipelineLayout {
    pub fn new(
        device: &Device,
        descriptors: &BindlessDescriptorSet,
        version: LayoutVersion,
    ) -> RegistryResult<Self> {
        let set_layouts = [descriptors.layout()];
        let push_ranges = [*vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(version.size_bytes())];

        let layout = unsafe {
            device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(&push_ranges),
                None,
            )
        }?;

        Ok(Self {
            device: device.clone(),
            layout,
            set: descriptors.set(),
            version,
        })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn version(&self) -> LayoutVersion {
        self.version
    }

    pub fn bind(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                self.layout,
                BINDLESS_DESCRIPTOR_SET,
                std::slice::from_ref(&self.set),
                &[],
            );
        }
    }

    /// Uploads a draw's record. Records packed for another layout are refused.
    pub fn push(&self, cmd: vk::CommandBuffer, record: &PushConstantRecord) -> RegistryResult<()> {
        let bytes = record.bytes_for(self.version)?;
        unsafe {
            self.device.cmd_push_constants(
                cmd,
                self.layout,
                vk::ShaderStageFlags::ALL,
                0,
                bytes,
            );
        }
        Ok(())
    }
}

impl std::ops::Drop for BindlessPipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Harmless resources bound wherever an array element has no occupant.
#[derive(Copy, Clone, Debug)]
pub struct DummyResources {
    uniform_buffer: DescriptorResource,
    storage_buffer: DescriptorResource,
    texture_2d: DescriptorResource,
    texture_cube: DescriptorResource,
}

impl DummyResources {
    pub fn new(
        uniform_buffer: DescriptorResource,
        storage_buffer: DescriptorResource,
        texture_2d: DescriptorResource,
        texture_cube: DescriptorResource,
    ) -> RegistryResult<Self> {
        let dummies = Self {
            uniform_buffer,
            storage_buffer,
            texture_2d,
            texture_cube,
        };

        for kind in ResourceKind::iter() {
            if !dummies.get(kind).fits(kind) {
                return Err(RegistryError::IncompatibleResource(kind));
            }
        }
        Ok(dummies)
    }

    pub fn get(&self, kind: ResourceKind) -> DescriptorResource {
        match kind {
            ResourceKind::UniformBuffer => self.uniform_buffer,
            ResourceKind::StorageBuffer => self.storage_buffer,
            ResourceKind::Sampler2D => self.texture_2d,
            ResourceKind::SamplerCube => self.texture_cube,
        }
    }
}

pub struct VulkanDescriptorWriter<'a> {
    device: &'a Device,
    set: vk::DescriptorSet,
    dummies: DummyResources,
}

impl DescriptorWriter for VulkanDescriptorWriter<'_> {
    fn write_descriptors(&mut self, updates: &[DescriptorUpdate]) -> RegistryResult<()> {
        let resources = updates
            .iter()
            .map(|u| match u.contents {
                DescriptorContents::Resource(res) => res,
                DescriptorContents::Dummy => self.dummies.get(u.kind),
            })
            .collect::<Vec<_>>();

        let mut buffer_infos = vec![vk::DescriptorBufferInfo::default(); updates.len()];
        let mut image_infos = vec![vk::DescriptorImageInfo::default(); updates.len()];

        for (i, res) in resources.iter().enumerate() {
            match *res {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos[i] = *vk::DescriptorBufferInfo::builder()
                        .buffer(buffer)
                        .offset(offset)
                        .range(range);
                }
                DescriptorResource::Image {
                    view,
                    sampler,
                    layout,
                } => {
                    image_infos[i] = *vk::DescriptorImageInfo::builder()
                        .image_view(view)
                        .sampler(sampler)
                        .image_layout(layout);
                }
            }
        }

        let writes = updates
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(u.kind.binding())
                    .dst_array_element(u.array_element)
                    .descriptor_type(u.kind.as_vk_type());

                match resources[i] {
                    DescriptorResource::Buffer { .. } => {
                        *write.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    }
                    DescriptorResource::Image { .. } => {
                        *write.image_info(std::slice::from_ref(&image_infos[i]))
                    }
                }
            })
            .collect::<Vec<_>>();

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
        Ok(())
    }
}

/// Frame completion read from a timeline semaphore whose value is the
/// number of the last frame the GPU finished.
pub struct TimelineFrameCounter<'a> {
    device: &'a Device,
    semaphore: vk::Semaphore,
}

impl<'a> TimelineFrameCounter<'a> {
    pub fn new(device: &'a Device, semaphore: vk::Semaphore) -> Self {
        Self { device, semaphore }
    }
}

impl FrameTimeline for TimelineFrameCounter<'_> {
    fn completed_frame(&self) -> RegistryResult<u64> {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }
            .map_err(RegistryError::from)
    }
}
