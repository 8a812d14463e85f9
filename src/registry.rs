use ash::vk;
use parking_lot::Mutex;
use smallvec::SmallVec;
use strum::IntoEnumIterator;

use crate::{
    app_config::RegistryConfig,
    bindless::{DescriptorResource, ResourceHandle, ResourceKind},
    descriptor_binder::{DescriptorArrayBinder, DescriptorWriter},
    error::{RegistryError, RegistryResult},
    push_constants::{LayoutVersion, PushConstantPacker, PushConstantRecord},
    retirement::{FrameRetirementQueue, FrameTimeline},
    slot_table::{SlotStats, SlotTable},
};

struct KindState {
    table: SlotTable,
    retired: FrameRetirementQueue,
}

/// Owns the index spaces of every resource kind for one device.
///
/// `allocate`, `release`, `update` and `pack` take `&self` and can be called
/// from worker threads; each kind has its own lock. `begin_frame`, `advance`
/// and `sync` take `&mut self`, so they only run once allocation for the
/// frame has quiesced.
pub struct BindlessRegistry {
    kinds: [Mutex<KindState>; ResourceKind::COUNT],
    binder: DescriptorArrayBinder,
    packer: PushConstantPacker,
    current_frame: u64,
    completed_frame: Option<u64>,
    max_inflight_frames: u64,
}

impl BindlessRegistry {
    pub fn new(cfg: &RegistryConfig) -> RegistryResult<Self> {
        cfg.validate()?;

        let kind_state = |kind: ResourceKind| {
            Mutex::new(KindState {
                table: SlotTable::new(kind, cfg.kind(kind), cfg.reserve_dummy_slot),
                retired: FrameRetirementQueue::new(cfg.max_inflight_frames),
            })
        };

        let registry = Self {
            kinds: [
                kind_state(ResourceKind::UniformBuffer),
                kind_state(ResourceKind::StorageBuffer),
                kind_state(ResourceKind::Sampler2D),
                kind_state(ResourceKind::SamplerCube),
            ],
            binder: DescriptorArrayBinder::new(),
            packer: PushConstantPacker::new(cfg.layout, cfg.validation.enabled()),
            current_frame: 0,
            completed_frame: None,
            max_inflight_frames: cfg.max_inflight_frames,
        };

        log::info!(
            "Bindless registry: layout {}, {} frames in flight, handle validation {}",
            cfg.layout,
            cfg.max_inflight_frames,
            if registry.packer.validates() { "on" } else { "off" }
        );

        Ok(registry)
    }

    fn state(&self, kind: ResourceKind) -> &Mutex<KindState> {
        &self.kinds[kind.slot()]
    }

    pub fn layout(&self) -> LayoutVersion {
        self.packer.layout()
    }

    pub fn max_inflight_frames(&self) -> u64 {
        self.max_inflight_frames
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn completed_frame(&self) -> Option<u64> {
        self.completed_frame
    }

    /// Frame number stamped on handles released from now on.
    pub fn begin_frame(&mut self, frame: u64) {
        if frame < self.current_frame {
            log::warn!(
                "frame counter went backwards: {} -> {frame}, keeping {}",
                self.current_frame,
                self.current_frame
            );
        }
        self.current_frame = frame.max(self.current_frame);
    }

    pub fn allocate(
        &self,
        kind: ResourceKind,
        resource: DescriptorResource,
    ) -> RegistryResult<ResourceHandle> {
        self.state(kind).lock().table.allocate(resource)
    }

    /// Allocates `count` handles, each viewing one `slab_size` slice of
    /// `buffer`. Either every handle is allocated or none is.
    pub fn allocate_chunked(
        &self,
        kind: ResourceKind,
        buffer: vk::Buffer,
        slab_size: vk::DeviceSize,
        count: u32,
    ) -> RegistryResult<Vec<ResourceHandle>> {
        if !kind.is_buffer() {
            return Err(RegistryError::IncompatibleResource(kind));
        }
        if slab_size == 0 || slab_size.checked_mul(count as vk::DeviceSize).is_none() {
            return Err(RegistryError::InvalidChunking { slab_size, count });
        }

        let mut state = self.state(kind).lock();
        let table = &mut state.table;
        if table.available() < count {
            return Err(RegistryError::CapacityExceeded {
                kind,
                capacity: table.capacity(),
            });
        }

        (0..count)
            .map(|i| {
                table.allocate(DescriptorResource::Buffer {
                    buffer,
                    offset: i as vk::DeviceSize * slab_size,
                    range: slab_size,
                })
            })
            .collect()
    }

    /// Releases the handle now; its index becomes reusable once the GPU has
    /// finished every frame that could still reference it.
    pub fn release(&self, handle: ResourceHandle) -> RegistryResult<()> {
        let kind = handle.kind().ok_or(RegistryError::InvalidHandle(handle))?;
        let mut state = self.state(kind).lock();
        state.table.release(handle)?;
        state.retired.retire(handle, self.current_frame);
        log::trace!("retired {handle} at frame {}", self.current_frame);
        Ok(())
    }

    pub fn update(
        &self,
        handle: ResourceHandle,
        resource: DescriptorResource,
    ) -> RegistryResult<()> {
        let kind = handle.kind().ok_or(RegistryError::InvalidHandle(handle))?;
        self.state(kind).lock().table.update(handle, resource)
    }

    pub fn is_valid(&self, handle: ResourceHandle) -> bool {
        handle
            .kind()
            .map_or(false, |kind| self.state(kind).lock().table.is_valid(handle))
    }

    pub fn stats(&self, kind: ResourceKind) -> SlotStats {
        self.state(kind).lock().table.stats()
    }

    pub fn capacity(&self, kind: ResourceKind) -> u32 {
        self.state(kind).lock().table.capacity()
    }

    /// Recycles every retired slot whose retirement frame is at least
    /// `max_inflight_frames` behind `completed_frame`. Returns how many
    /// slots became reusable.
    pub fn advance(&mut self, completed_frame: u64) -> usize {
        let mut recycled = 0;

        for state in self.kinds.iter_mut() {
            let state = state.get_mut();
            for handle in state.retired.advance(completed_frame) {
                state.table.recycle(handle.index());
                recycled += 1;
            }
        }

        self.completed_frame = Some(completed_frame);
        if recycled > 0 {
            log::debug!("frame {completed_frame} completed, {recycled} slots recycled");
        }
        recycled
    }

    /// Queries the GPU timeline and advances to its completed frame.
    pub fn retire_completed(&mut self, timeline: &dyn FrameTimeline) -> RegistryResult<usize> {
        let completed = timeline.completed_frame()?;
        Ok(self.advance(completed))
    }

    pub fn pending_retirement(&self) -> usize {
        self.kinds.iter().map(|s| s.lock().retired.len()).sum()
    }

    /// Pushes every descriptor change since the last call to `writer`.
    pub fn sync(&mut self, writer: &mut dyn DescriptorWriter) -> RegistryResult<usize> {
        let tables = self
            .kinds
            .iter_mut()
            .map(|s| &mut s.get_mut().table)
            .collect::<SmallVec<[&mut SlotTable; ResourceKind::COUNT]>>();
        self.binder.sync(tables, writer)
    }

    pub fn pack(
        &self,
        camera: ResourceHandle,
        model: ResourceHandle,
        material: ResourceHandle,
        extra_slots: &[ResourceHandle],
    ) -> RegistryResult<PushConstantRecord> {
        self.packer
            .pack(camera, model, material, extra_slots, |h| self.is_valid(h))
    }

    /// Fails if a pipeline built against `layout` would receive this
    /// registry's records.
    pub fn ensure_layout(&self, layout: LayoutVersion) -> RegistryResult<()> {
        if layout != self.layout() {
            return Err(RegistryError::LayoutMismatch {
                expected: layout,
                found: self.layout(),
            });
        }
        Ok(())
    }

    pub fn log_stats(&self) {
        for kind in ResourceKind::iter() {
            let s = self.stats(kind);
            log::info!(
                "{kind}: capacity {}, occupied {}, free {}, retiring {}",
                s.capacity,
                s.occupied,
                s.free,
                s.retiring
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app_config::{KindConfig, ValidationMode},
        descriptor_binder::DescriptorUpdate,
        slot_table::DescriptorContents,
    };
    use ash::vk::Handle;

    fn config() -> RegistryConfig {
        RegistryConfig {
            layout: LayoutVersion::V2,
            max_inflight_frames: 2,
            validation: ValidationMode::Always,
            reserve_dummy_slot: true,
            uniform_buffers: KindConfig::growable(4, 64),
            storage_buffers: KindConfig::fixed(4),
            textures_2d: KindConfig::growable(4, 64),
            textures_cube: KindConfig::fixed(2),
        }
    }

    fn buffer(raw: u64) -> DescriptorResource {
        DescriptorResource::whole_buffer(vk::Buffer::from_raw(raw))
    }

    struct Counter(usize);

    impl DescriptorWriter for Counter {
        fn write_descriptors(&mut self, updates: &[DescriptorUpdate]) -> RegistryResult<()> {
            self.0 += updates.len();
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<DescriptorUpdate>);

    impl DescriptorWriter for Recorder {
        fn write_descriptors(&mut self, updates: &[DescriptorUpdate]) -> RegistryResult<()> {
            self.0.extend_from_slice(updates);
            Ok(())
        }
    }

    struct Lost;

    impl FrameTimeline for Lost {
        fn completed_frame(&self) -> RegistryResult<u64> {
            Err(RegistryError::DeviceLost)
        }
    }

    #[test]
    fn kinds_have_independent_index_spaces() {
        let reg = BindlessRegistry::new(&config()).unwrap();
        let u = reg.allocate(ResourceKind::UniformBuffer, buffer(1)).unwrap();
        let s = reg.allocate(ResourceKind::StorageBuffer, buffer(2)).unwrap();
        assert_eq!(u.index(), s.index());
        assert_ne!(u, s);
        assert!(reg.is_valid(u) && reg.is_valid(s));
    }

    #[test]
    fn chunked_allocation_is_all_or_nothing() {
        let reg = BindlessRegistry::new(&config()).unwrap();
        let buf = vk::Buffer::from_raw(9);

        assert!(matches!(
            reg.allocate_chunked(ResourceKind::StorageBuffer, buf, 256, 4),
            Err(RegistryError::CapacityExceeded { .. })
        ));
        assert_eq!(reg.stats(ResourceKind::StorageBuffer).occupied, 0);

        let handles = reg
            .allocate_chunked(ResourceKind::StorageBuffer, buf, 256, 3)
            .unwrap();
        assert_eq!(handles.len(), 3);
        assert!(handles.iter().all(|h| reg.is_valid(*h)));
    }

    #[test]
    fn chunked_handles_view_consecutive_slabs() {
        let mut reg = BindlessRegistry::new(&config()).unwrap();
        let buf = vk::Buffer::from_raw(9);
        let handles = reg
            .allocate_chunked(ResourceKind::StorageBuffer, buf, 256, 3)
            .unwrap();

        let mut rec = Recorder::default();
        reg.sync(&mut rec).unwrap();
        let slabs = handles
            .iter()
            .map(|h| {
                rec.0
                    .iter()
                    .find(|u| u.kind == ResourceKind::StorageBuffer && u.array_element == h.index())
                    .map(|u| u.contents)
                    .expect("every chunk is written")
            })
            .collect::<Vec<_>>();

        let expected = [0, 256, 512]
            .into_iter()
            .map(|offset| {
                DescriptorContents::Resource(DescriptorResource::Buffer {
                    buffer: buf,
                    offset,
                    range: 256,
                })
            })
            .collect::<Vec<_>>();
        assert_eq!(slabs, expected);
    }

    #[test]
    fn chunked_allocation_rejects_unaddressable_slabs() {
        let reg = BindlessRegistry::new(&config()).unwrap();
        let buf = vk::Buffer::from_raw(9);

        assert!(matches!(
            reg.allocate_chunked(ResourceKind::StorageBuffer, buf, u64::MAX / 2, 3),
            Err(RegistryError::InvalidChunking { count: 3, .. })
        ));
        assert!(matches!(
            reg.allocate_chunked(ResourceKind::StorageBuffer, buf, 0, 2),
            Err(RegistryError::InvalidChunking { slab_size: 0, .. })
        ));
        assert_eq!(reg.stats(ResourceKind::StorageBuffer).occupied, 0);
        assert_eq!(reg.stats(ResourceKind::StorageBuffer).free, 0);
        assert_eq!(
            reg.allocate_chunked(ResourceKind::StorageBuffer, buf, 64, 3)
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn resource_shape_must_match_kind() {
        let reg = BindlessRegistry::new(&config()).unwrap();
        let img =
            DescriptorResource::sampled_image(vk::ImageView::from_raw(1), vk::Sampler::from_raw(2));

        assert!(matches!(
            reg.allocate(ResourceKind::UniformBuffer, img),
            Err(RegistryError::IncompatibleResource(ResourceKind::UniformBuffer))
        ));
        assert!(matches!(
            reg.allocate(ResourceKind::SamplerCube, buffer(1)),
            Err(RegistryError::IncompatibleResource(ResourceKind::SamplerCube))
        ));
        assert!(matches!(
            reg.allocate_chunked(ResourceKind::Sampler2D, vk::Buffer::from_raw(1), 64, 1),
            Err(RegistryError::IncompatibleResource(ResourceKind::Sampler2D))
        ));

        let h = reg.allocate(ResourceKind::UniformBuffer, buffer(1)).unwrap();
        assert!(matches!(
            reg.update(h, img),
            Err(RegistryError::IncompatibleResource(ResourceKind::UniformBuffer))
        ));
        assert_eq!(reg.stats(ResourceKind::UniformBuffer).occupied, 1);
    }

    #[test]
    fn frame_counter_never_goes_backwards() {
        let mut reg = BindlessRegistry::new(&config()).unwrap();
        reg.begin_frame(7);
        reg.begin_frame(3);
        assert_eq!(reg.current_frame(), 7);

        let h = reg.allocate(ResourceKind::UniformBuffer, buffer(1)).unwrap();
        reg.release(h).unwrap();
        assert_eq!(reg.advance(8), 0);
        assert_eq!(reg.advance(9), 1);
    }

    #[test]
    fn release_of_invalid_sentinel_fails() {
        let reg = BindlessRegistry::new(&config()).unwrap();
        assert!(matches!(
            reg.release(ResourceHandle::INVALID),
            Err(RegistryError::InvalidHandle(_))
        ));
    }

    #[test]
    fn device_lost_propagates_from_timeline() {
        let mut reg = BindlessRegistry::new(&config()).unwrap();
        let img =
            DescriptorResource::sampled_image(vk::ImageView::from_raw(1), vk::Sampler::from_raw(2));
        let h = reg.allocate(ResourceKind::Sampler2D, img).unwrap();
        reg.release(h).unwrap();
        assert!(matches!(
            reg.retire_completed(&Lost),
            Err(RegistryError::DeviceLost)
        ));
        assert_eq!(reg.pending_retirement(), 1);
    }

    #[test]
    fn pack_checks_liveness_through_registry() {
        let reg = BindlessRegistry::new(&config()).unwrap();
        let cam = reg.allocate(ResourceKind::UniformBuffer, buffer(1)).unwrap();
        let model = reg.allocate(ResourceKind::UniformBuffer, buffer(2)).unwrap();
        let mtl = reg.allocate(ResourceKind::UniformBuffer, buffer(3)).unwrap();

        let rec = reg.pack(cam, model, mtl, &[]).unwrap();
        assert_eq!(rec.words()[..3], [model.index(), cam.index(), mtl.index()]);

        reg.release(mtl).unwrap();
        assert!(matches!(
            reg.pack(cam, model, mtl, &[]),
            Err(RegistryError::InvalidHandle(h)) if h == mtl
        ));
    }

    #[test]
    fn sync_counts_writes() {
        let mut reg = BindlessRegistry::new(&config()).unwrap();
        let mut w = Counter(0);
        // 4 + 4 + 4 + 2 elements on the first pass
        assert_eq!(reg.sync(&mut w).unwrap(), 14);
        reg.allocate(ResourceKind::UniformBuffer, buffer(1)).unwrap();
        assert_eq!(reg.sync(&mut w).unwrap(), 1);
        assert_eq!(w.0, 15);
    }

    #[test]
    fn layout_is_fixed_per_registry() {
        let reg = BindlessRegistry::new(&config()).unwrap();
        assert!(reg.ensure_layout(LayoutVersion::V2).is_ok());
        assert!(reg.ensure_layout(LayoutVersion::V1).is_err());
    }

    #[test]
    fn registries_are_independent() {
        let a = BindlessRegistry::new(&config()).unwrap();
        let b = BindlessRegistry::new(&config()).unwrap();
        let h = a.allocate(ResourceKind::UniformBuffer, buffer(1)).unwrap();
        assert!(a.is_valid(h));
        assert!(!b.is_valid(h));
    }
}
