use ash::vk::{self, Handle};
use log::{debug, info};

use bindless_registry::{
    BindlessRegistry, DescriptorContents, DescriptorResource, DescriptorUpdate, DescriptorWriter,
    FrameTimeline, RegistryConfig, RegistryResult, ResourceHandle, ResourceKind,
};

const CONFIG_PATH: &str = "config/registry.config.ron";
const SIMULATED_FRAMES: u64 = 12;

/// Stands in for the graphics layer: logs every descriptor write.
struct LoggingDescriptorWriter {
    writes: usize,
}

impl DescriptorWriter for LoggingDescriptorWriter {
    fn write_descriptors(&mut self, updates: &[DescriptorUpdate]) -> RegistryResult<()> {
        for u in updates {
            match u.contents {
                DescriptorContents::Dummy => {
                    debug!("{}[{}] <- dummy", u.kind, u.array_element)
                }
                DescriptorContents::Resource(res) => {
                    debug!("{}[{}] <- {:?}", u.kind, u.array_element, res)
                }
            }
        }
        self.writes += updates.len();
        Ok(())
    }

    fn capacity_grown(&mut self, kind: ResourceKind, old: u32, new: u32) -> RegistryResult<()> {
        info!("{kind} array grown {old} -> {new}");
        Ok(())
    }
}

/// GPU that finishes each frame `latency` frames after it was submitted.
struct LaggingTimeline {
    submitted: u64,
    latency: u64,
}

impl FrameTimeline for LaggingTimeline {
    fn completed_frame(&self) -> RegistryResult<u64> {
        Ok(self.submitted.saturating_sub(self.latency))
    }
}

fn fake_buffer(id: u64) -> DescriptorResource {
    DescriptorResource::whole_buffer(vk::Buffer::from_raw(0x1000 + id))
}

fn fake_texture(id: u64) -> DescriptorResource {
    DescriptorResource::sampled_image(
        vk::ImageView::from_raw(0x2000 + id),
        vk::Sampler::from_raw(0x3000),
    )
}

fn run(cfg: RegistryConfig) -> RegistryResult<()> {
    let mut registry = BindlessRegistry::new(&cfg)?;
    let mut writer = LoggingDescriptorWriter { writes: 0 };
    let mut timeline = LaggingTimeline {
        submitted: 0,
        latency: cfg.max_inflight_frames,
    };

    let camera = registry.allocate(ResourceKind::UniformBuffer, fake_buffer(0))?;
    let instances = registry.allocate_chunked(
        ResourceKind::StorageBuffer,
        vk::Buffer::from_raw(0x1fff),
        256,
        4,
    )?;
    let mut transient: Vec<(ResourceHandle, ResourceHandle, ResourceHandle)> = Vec::new();

    for frame in 1..=SIMULATED_FRAMES {
        registry.begin_frame(frame);

        // objects spawn every frame and live for three frames
        let model = registry.allocate(ResourceKind::UniformBuffer, fake_buffer(frame * 2))?;
        let material = registry.allocate(ResourceKind::UniformBuffer, fake_buffer(frame * 2 + 1))?;
        let albedo = registry.allocate(ResourceKind::Sampler2D, fake_texture(frame))?;
        transient.push((model, material, albedo));

        if transient.len() > 3 {
            let (model, material, albedo) = transient.remove(0);
            registry.release(model)?;
            registry.release(material)?;
            registry.release(albedo)?;
        }

        let recycled = registry.retire_completed(&timeline)?;
        let writes = registry.sync(&mut writer)?;

        for (model, material, albedo) in transient.iter() {
            let extra = if registry.layout().slot_count() > 0 {
                vec![*albedo, instances[(frame % 4) as usize]]
            } else {
                Vec::new()
            };
            let record = registry.pack(camera, *model, *material, &extra)?;
            debug!("frame {frame}: push {:?}", record.words());
        }

        timeline.submitted = frame;
        info!(
            "frame {frame}: {writes} descriptor writes, {recycled} slots recycled, {} pending",
            registry.pending_retirement()
        );
    }

    registry.log_stats();
    info!("{} descriptor writes in total", writer.writes);
    Ok(())
}

fn main() {
    let _logger = flexi_logger::Logger::with(
        flexi_logger::LogSpecification::builder()
            .default(flexi_logger::LevelFilter::Info)
            .build(),
    )
    .adaptive_format_for_stderr(flexi_logger::AdaptiveFormat::Detailed)
    .start()
    .unwrap_or_else(|e| {
        panic!("Failed to start the logger {}", e);
    });

    let cfg = RegistryConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        log::warn!("{CONFIG_PATH}: {e}, using defaults");
        RegistryConfig::default()
    });

    if let Err(e) = run(cfg) {
        log::error!("simulation failed: {e}");
        std::process::exit(1);
    }
}
