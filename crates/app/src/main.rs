//! Entry point for Svarog3D.
//! Streams the assets named on the command line through the resource
//! pipeline and reports what loaded.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use corelib::GpuContext;
use pipeline::{AssetPipeline, LoadStatus, ModelBuilder, PipelineConfig, ShaderBuilder, TextureBuilder};
use renderer::{HeadlessGpu, WgpuContext};

const FRAME_TIME: Duration = Duration::from_millis(16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GpuChoice {
    Headless,
    Wgpu,
}

fn parse_gpu_arg() -> GpuChoice {
    // Accept: --gpu=headless|wgpu
    for arg in std::env::args() {
        if let Some(val) = arg.strip_prefix("--gpu=") {
            return match val.to_ascii_lowercase().as_str() {
                "headless" | "none" => GpuChoice::Headless,
                "wgpu" => GpuChoice::Wgpu,
                other => {
                    log::warn!("Unknown gpu '{}', falling back to headless.", other);
                    GpuChoice::Headless
                }
            };
        }
    }
    GpuChoice::Headless
}

fn parse_backend_arg() -> wgpu::Backends {
    // Accept: --gpu-backend=auto|vulkan|dx12|metal|gl
    let mut backends = wgpu::Backends::all();
    for arg in std::env::args() {
        if let Some(val) = arg.strip_prefix("--gpu-backend=") {
            backends = match val.to_ascii_lowercase().as_str() {
                "auto" => wgpu::Backends::all(),
                "vulkan" | "vk" => wgpu::Backends::VULKAN,
                "dx12" | "d3d12" => wgpu::Backends::DX12,
                "metal" | "mtl" => wgpu::Backends::METAL,
                "gl" | "opengl" | "gles" => wgpu::Backends::GL,
                other => {
                    log::warn!("Unknown backend '{}', falling back to auto.", other);
                    wgpu::Backends::all()
                }
            };
        }
    }
    backends
}

fn parse_millis_arg(prefix: &str) -> Option<Duration> {
    std::env::args()
        .filter_map(|arg| arg.strip_prefix(prefix).and_then(|v| v.parse::<u64>().ok()))
        .last()
        .map(Duration::from_millis)
}

fn parse_frames_arg() -> Option<u64> {
    std::env::args()
        .filter_map(|arg| arg.strip_prefix("--frames=").and_then(|v| v.parse::<u64>().ok()))
        .last()
}

fn parse_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    if let Some(budget) = parse_millis_arg("--frame-budget-ms=") {
        config = config.with_frame_budget(budget);
    }
    if let Some(timeout) = parse_millis_arg("--timeout-ms=") {
        config = config.with_materialize_timeout(timeout);
    }
    config
}

fn asset_args() -> Vec<PathBuf> {
    std::env::args()
        .skip(1)
        .filter(|arg| !arg.starts_with("--"))
        .map(PathBuf::from)
        .collect()
}

/// Anything the frame loop can poll.
trait Pending {
    fn label(&self) -> String;
    fn status(&self) -> LoadStatus;
}

impl<K: pipeline::ResourceKind> Pending for pipeline::Handle<K> {
    fn label(&self) -> String {
        format!("{} '{}'", K::FACTORY, self.name())
    }

    fn status(&self) -> LoadStatus {
        pipeline::Resource::status(self)
    }
}

fn request_all(pipeline: &AssetPipeline, paths: &[PathBuf]) -> Vec<Box<dyn Pending>> {
    let mut handles: Vec<Box<dyn Pending>> = Vec::new();
    for path in paths {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let requested = match ext.as_str() {
            "png" | "jpg" | "jpeg" => pipeline
                .textures()
                .request(TextureBuilder::file(path))
                .map(|h| Box::new(h) as Box<dyn Pending>),
            "obj" => pipeline
                .models()
                .request(ModelBuilder::file(path))
                .map(|h| Box::new(h) as Box<dyn Pending>),
            "wgsl" => pipeline
                .shaders()
                .request(shader_builder(path))
                .map(|h| Box::new(h) as Box<dyn Pending>),
            _ => {
                log::warn!("Skipping {:?}: unknown asset type", path);
                continue;
            }
        };
        match requested {
            Ok(handle) => handles.push(handle),
            Err(err) => log::warn!("Could not request {:?}: {}", path, err),
        }
    }
    handles
}

/// A `.wgsl` file holds both stages, named after its stem.
fn shader_builder(path: &Path) -> ShaderBuilder {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    ShaderBuilder::new(name).vertex(path).fragment(path)
}

fn run(pipeline: &AssetPipeline, gpu: &mut dyn GpuContext, max_frames: Option<u64>) -> Result<()> {
    let handles = request_all(pipeline, &asset_args());
    if handles.is_empty() {
        log::info!("No assets given; pass .png/.obj/.wgsl paths to stream them.");
    }

    let started = Instant::now();
    let mut frame = 0u64;
    loop {
        let frame_start = Instant::now();
        pipeline
            .update(gpu)
            .context("Resource pipeline hit a fatal error")?;
        frame += 1;

        let settled = handles
            .iter()
            .all(|h| matches!(h.status(), LoadStatus::Ready | LoadStatus::Failed));
        if settled {
            log::info!("All assets settled after {} frame(s), {:?}", frame, started.elapsed());
            break;
        }
        if max_frames.is_some_and(|max| frame >= max) {
            log::warn!("Stopping after {} frame(s) with loads still in flight", frame);
            break;
        }
        if let Some(rest) = FRAME_TIME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    for handle in &handles {
        log::info!("{}: {:?}", handle.label(), handle.status());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let choice = parse_gpu_arg();
    let config = parse_config();
    let max_frames = parse_frames_arg();
    log::info!(
        "Starting Svarog3D asset streamer. GPU: {:?}, budget={:?}, timeout={:?}, frames={:?}",
        choice,
        config.frame_budget,
        config.materialize_timeout,
        max_frames
    );

    let mut gpu: Box<dyn GpuContext> = match choice {
        GpuChoice::Headless => Box::new(HeadlessGpu::new()),
        GpuChoice::Wgpu => Box::new(
            pollster::block_on(WgpuContext::new_offscreen(parse_backend_arg()))
                .context("Failed to create wgpu device")?,
        ),
    };
    log::info!("Using {} GPU context", gpu.backend());

    let pipeline = AssetPipeline::new(config)?;
    let result = run(&pipeline, gpu.as_mut(), max_frames);
    pipeline.dispose(gpu.as_mut());

    result?;
    log::info!("Graceful shutdown. Bye!");
    Ok(())
}
