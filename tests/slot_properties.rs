use std::collections::HashMap;

use ash::vk::{self, Handle};
use bindless_registry::{
    BindlessRegistry, DescriptorResource, KindConfig, LayoutVersion, RegistryConfig,
    RegistryError, ResourceHandle, ResourceKind, ValidationMode,
};
use proptest::prelude::*;

const INFLIGHT: u64 = 2;

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    Release(usize),
    Advance(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Release),
        1 => (0..4u64).prop_map(Op::Advance),
    ]
}

fn registry(reserve_dummy_slot: bool) -> BindlessRegistry {
    BindlessRegistry::new(&RegistryConfig {
        layout: LayoutVersion::V1,
        max_inflight_frames: INFLIGHT,
        validation: ValidationMode::Always,
        reserve_dummy_slot,
        uniform_buffers: KindConfig::growable(4, 16),
        storage_buffers: KindConfig::fixed(4),
        textures_2d: KindConfig::fixed(4),
        textures_cube: KindConfig::fixed(4),
    })
    .unwrap()
}

proptest! {
    #[test]
    fn indices_stay_unique_and_stale_handles_stay_dead(
        ops in prop::collection::vec(op(), 1..200),
        reserve_dummy_slot in any::<bool>(),
    ) {
        let mut reg = registry(reserve_dummy_slot);
        let mut live: Vec<ResourceHandle> = Vec::new();
        let mut stale: Vec<ResourceHandle> = Vec::new();
        // index -> frame of its most recent release
        let mut released_at: HashMap<u32, u64> = HashMap::new();
        let mut completed: Option<u64> = None;

        for (frame, op) in (1u64..).zip(ops) {
            reg.begin_frame(frame);
            match op {
                Op::Allocate => {
                    let res = DescriptorResource::whole_buffer(vk::Buffer::from_raw(frame));
                    match reg.allocate(ResourceKind::UniformBuffer, res) {
                        Ok(h) => {
                            if reserve_dummy_slot {
                                prop_assert_ne!(h.index(), 0);
                            }
                            if let Some(at) = released_at.remove(&h.index()) {
                                let done = completed.unwrap_or(0);
                                prop_assert!(
                                    completed.is_some() && done >= at + INFLIGHT,
                                    "index {} reused before frame {} drained", h.index(), at
                                );
                            }
                            live.push(h);
                        }
                        Err(RegistryError::CapacityExceeded { .. }) => {
                            prop_assert_eq!(reg.stats(ResourceKind::UniformBuffer).free, 0);
                        }
                        Err(e) => prop_assert!(false, "unexpected error {e}"),
                    }
                }
                Op::Release(i) if !live.is_empty() => {
                    let h = live.swap_remove(i % live.len());
                    reg.release(h).unwrap();
                    released_at.insert(h.index(), frame);
                    stale.push(h);
                }
                Op::Release(_) => {}
                Op::Advance(lag) => {
                    let done = frame.saturating_sub(lag);
                    let done = completed.map_or(done, |c| c.max(done));
                    reg.advance(done);
                    completed = Some(done);
                }
            }

            let mut indices = live.iter().map(|h| h.index()).collect::<Vec<_>>();
            indices.sort_unstable();
            indices.dedup();
            prop_assert_eq!(indices.len(), live.len());
            prop_assert!(live.iter().all(|h| reg.is_valid(*h)));
            prop_assert!(stale.iter().all(|h| !reg.is_valid(*h)));
            prop_assert_eq!(
                reg.stats(ResourceKind::UniformBuffer).occupied as usize,
                live.len()
            );
        }
    }
}
