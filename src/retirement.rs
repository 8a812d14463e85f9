use std::collections::VecDeque;

use crate::{bindless::ResourceHandle, error::RegistryResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetirementEntry {
    pub handle: ResourceHandle,
    pub frame: u64,
}

/// Source of the last frame the GPU has fully finished. Fails with
/// `DeviceLost` when the device stopped signaling.
pub trait FrameTimeline {
    fn completed_frame(&self) -> RegistryResult<u64>;
}

/// Released handles waiting until no in-flight frame can reference them.
pub struct FrameRetirementQueue {
    entries: VecDeque<RetirementEntry>,
    max_inflight_frames: u64,
}

impl FrameRetirementQueue {
    pub fn new(max_inflight_frames: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            max_inflight_frames,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retire(&mut self, handle: ResourceHandle, current_frame: u64) {
        self.entries.push_back(RetirementEntry {
            handle,
            frame: current_frame,
        });
    }

    /// Last retirement frame whose entries are safe once `completed_frame`
    /// has finished on the GPU.
    pub fn horizon(&self, completed_frame: u64) -> Option<u64> {
        completed_frame.checked_sub(self.max_inflight_frames)
    }

    /// Pops every entry retired at or before the horizon, in retirement order.
    pub fn advance(&mut self, completed_frame: u64) -> Vec<ResourceHandle> {
        let Some(horizon) = self.horizon(completed_frame) else {
            return Vec::new();
        };

        let mut ready = Vec::new();
        self.entries.retain(|e| {
            if e.frame <= horizon {
                ready.push(e.handle);
                false
            } else {
                true
            }
        });
        ready
    }
}
