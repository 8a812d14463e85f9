use crate::{
    app_config::{CapacityPolicy, KindConfig},
    bindless::{DescriptorResource, ResourceHandle, ResourceKind},
    error::{RegistryError, RegistryResult},
};

#[derive(Clone, Debug)]
pub struct Slot {
    pub generation: u32,
    pub occupied: bool,
    /// Released, waiting for the retirement horizon.
    retiring: bool,
    /// Last resource bound here. Kept after release, the GPU may still read it.
    resource: Option<DescriptorResource>,
    dirty: bool,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            generation: 0,
            occupied: false,
            retiring: false,
            resource: None,
            dirty: false,
        }
    }
}

/// What the descriptor array element for a slot must hold after the next sync.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DescriptorContents {
    Resource(DescriptorResource),
    Dummy,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SlotStats {
    pub capacity: u32,
    pub occupied: u32,
    pub free: u32,
    pub retiring: u32,
}

/// Index allocator for one resource kind.
pub struct SlotTable {
    kind: ResourceKind,
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    capacity: u32,
    policy: CapacityPolicy,
    max_descriptors: u32,
    first_user_index: u32,
    dirty: Vec<u32>,
    occupied: u32,
    retiring: u32,
}

impl SlotTable {
    pub fn new(kind: ResourceKind, cfg: &KindConfig, reserve_dummy_slot: bool) -> Self {
        let mut slots = Vec::with_capacity(cfg.initial_capacity as usize);
        let mut dirty = Vec::new();

        if reserve_dummy_slot {
            // permanently occupied by the dummy resource
            slots.push(Slot {
                occupied: true,
                dirty: true,
                ..Slot::vacant()
            });
            dirty.push(0);
        }

        Self {
            kind,
            slots,
            free_list: Vec::new(),
            capacity: cfg.initial_capacity,
            policy: cfg.policy,
            max_descriptors: cfg.max_descriptors,
            first_user_index: reserve_dummy_slot as u32,
            dirty,
            occupied: 0,
            retiring: 0,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Size of the descriptor array backing this table. Never shrinks.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn slot(&self, index: u32) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            capacity: self.capacity,
            occupied: self.occupied,
            free: self.free_list.len() as u32,
            retiring: self.retiring,
        }
    }

    pub fn allocate(&mut self, resource: DescriptorResource) -> RegistryResult<ResourceHandle> {
        if !resource.fits(self.kind) {
            return Err(RegistryError::IncompatibleResource(self.kind));
        }

        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() as u32 == self.capacity {
                    self.grow()?;
                }
                self.slots.push(Slot::vacant());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(!slot.occupied && !slot.retiring);
        slot.occupied = true;
        slot.resource = Some(resource);
        let generation = slot.generation;
        self.mark_dirty(index);
        self.occupied += 1;

        let handle = ResourceHandle::new(self.kind, index, generation);
        log::trace!("allocated {handle}");
        Ok(handle)
    }

    /// Number of allocations guaranteed to succeed right now.
    pub fn available(&self) -> u32 {
        let limit = match self.policy {
            CapacityPolicy::Fixed => self.capacity,
            CapacityPolicy::Grow => self.capacity.max(self.max_descriptors),
        };
        self.free_list.len() as u32 + (limit - self.slots.len() as u32)
    }

    fn grow(&mut self) -> RegistryResult<()> {
        let ceiling = match self.policy {
            CapacityPolicy::Fixed => self.capacity,
            CapacityPolicy::Grow => self.max_descriptors,
        };

        let new_capacity = self.capacity.saturating_mul(2).min(ceiling);
        if new_capacity <= self.capacity {
            log::warn!(
                "{} array exhausted at {} slots ({:?})",
                self.kind,
                self.capacity,
                self.policy
            );
            return Err(RegistryError::CapacityExceeded {
                kind: self.kind,
                capacity: self.capacity,
            });
        }

        log::debug!(
            "growing {} array {} -> {}",
            self.kind,
            self.capacity,
            new_capacity
        );
        self.capacity = new_capacity;
        self.slots.reserve((new_capacity as usize) - self.slots.len());
        Ok(())
    }

    fn live_slot(&self, handle: ResourceHandle) -> Option<&Slot> {
        if handle.kind() != Some(self.kind) || handle.index() < self.first_user_index {
            return None;
        }
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.occupied && slot.generation == handle.generation())
    }

    pub fn is_valid(&self, handle: ResourceHandle) -> bool {
        self.live_slot(handle).is_some()
    }

    /// Marks the slot released. The index stays out of the free-list until
    /// [`SlotTable::recycle`] is called for it.
    pub fn release(&mut self, handle: ResourceHandle) -> RegistryResult<()> {
        if self.live_slot(handle).is_none() {
            return Err(RegistryError::InvalidHandle(handle));
        }

        let slot = &mut self.slots[handle.index() as usize];
        slot.occupied = false;
        slot.retiring = true;
        self.occupied -= 1;
        self.retiring += 1;
        Ok(())
    }

    pub fn update(
        &mut self,
        handle: ResourceHandle,
        resource: DescriptorResource,
    ) -> RegistryResult<()> {
        if self.live_slot(handle).is_none() {
            return Err(RegistryError::InvalidHandle(handle));
        }
        if !resource.fits(self.kind) {
            return Err(RegistryError::IncompatibleResource(self.kind));
        }

        self.slots[handle.index() as usize].resource = Some(resource);
        self.mark_dirty(handle.index());
        Ok(())
    }

    /// Returns a retired index to the free-list with a bumped generation.
    /// A slot already at `u32::MAX` is never handed out again.
    pub fn recycle(&mut self, index: u32) {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            debug_assert!(false, "recycling unknown slot {index}");
            return;
        };
        debug_assert!(slot.retiring, "recycling slot {index} that was not released");

        slot.retiring = false;
        match slot.generation.checked_add(1) {
            Some(generation) => {
                slot.generation = generation;
                self.free_list.push(index);
            }
            None => {
                // out of generations, the slot stays bound to the dummy forever
                log::warn!("{} slot {index} exhausted its generations", self.kind);
            }
        }
        self.retiring -= 1;
        self.mark_dirty(index);
    }

    fn mark_dirty(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        if !slot.dirty {
            slot.dirty = true;
            self.dirty.push(index);
        }
    }

    /// Drains the slots whose descriptor must be rewritten, in index order.
    pub fn take_dirty(&mut self) -> Vec<(u32, DescriptorContents)> {
        let mut dirty = std::mem::take(&mut self.dirty);
        dirty.sort_unstable();

        dirty
            .into_iter()
            .map(|index| {
                let slot = &mut self.slots[index as usize];
                slot.dirty = false;
                let contents = match slot.resource {
                    // a released slot keeps its binding until it is recycled
                    Some(res) if slot.occupied || slot.retiring => {
                        DescriptorContents::Resource(res)
                    }
                    _ => DescriptorContents::Dummy,
                };
                (index, contents)
            })
            .collect()
    }
}
