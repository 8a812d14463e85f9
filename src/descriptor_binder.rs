use smallvec::SmallVec;

use crate::{
    bindless::ResourceKind,
    error::RegistryResult,
    slot_table::{DescriptorContents, SlotTable},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DescriptorUpdate {
    pub kind: ResourceKind,
    pub array_element: u32,
    pub contents: DescriptorContents,
}

/// Graphics-layer side of descriptor array maintenance.
pub trait DescriptorWriter {
    fn write_descriptors(&mut self, updates: &[DescriptorUpdate]) -> RegistryResult<()>;

    /// Called before any write into the newly exposed range `old..new`.
    fn capacity_grown(&mut self, _kind: ResourceKind, _old: u32, _new: u32) -> RegistryResult<()> {
        Ok(())
    }
}

/// Keeps the GPU descriptor arrays in step with the slot tables.
pub struct DescriptorArrayBinder {
    synced_capacity: [u32; ResourceKind::COUNT],
    writes_issued: u64,
}

impl DescriptorArrayBinder {
    pub fn new() -> Self {
        Self {
            synced_capacity: [0; ResourceKind::COUNT],
            writes_issued: 0,
        }
    }

    pub fn writes_issued(&self) -> u64 {
        self.writes_issued
    }

    pub fn synced_capacity(&self, kind: ResourceKind) -> u32 {
        self.synced_capacity[kind.slot()]
    }

    /// Writes every dirty slot once and binds the dummy to array elements
    /// exposed by growth. Returns the number of descriptor writes issued.
    pub fn sync<'a, I>(&mut self, tables: I, writer: &mut dyn DescriptorWriter) -> RegistryResult<usize>
    where
        I: IntoIterator<Item = &'a mut SlotTable>,
    {
        let mut updates: SmallVec<[DescriptorUpdate; 16]> = SmallVec::new();
        let mut grown: SmallVec<[(ResourceKind, u32); ResourceKind::COUNT]> = SmallVec::new();

        for table in tables {
            let kind = table.kind();
            let synced = self.synced_capacity[kind.slot()];
            let capacity = table.capacity();
            let dirty = table.take_dirty();

            if capacity > synced {
                writer.capacity_grown(kind, synced, capacity)?;
                grown.push((kind, capacity));
            }

            let first = updates.len();
            updates.extend(
                (synced..capacity)
                    .filter(|idx| dirty.binary_search_by_key(idx, |(i, _)| *i).is_err())
                    .map(|array_element| DescriptorUpdate {
                        kind,
                        array_element,
                        contents: DescriptorContents::Dummy,
                    }),
            );
            updates.extend(dirty.into_iter().map(|(array_element, contents)| DescriptorUpdate {
                kind,
                array_element,
                contents,
            }));
            updates[first..].sort_unstable_by_key(|u| u.array_element);
        }

        if !updates.is_empty() {
            writer.write_descriptors(&updates)?;
        }

        for (kind, capacity) in grown {
            self.synced_capacity[kind.slot()] = capacity;
        }
        self.writes_issued += updates.len() as u64;

        log::debug!("descriptor sync: {} writes", updates.len());
        Ok(updates.len())
    }
}

impl std::default::Default for DescriptorArrayBinder {
    fn default() -> Self {
        Self::new()
    }
}
