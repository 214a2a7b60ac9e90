//! Renderer-side implementations of [`corelib::GpuContext`]:
//! a wgpu device/queue backend and a device-less headless backend.

pub mod headless;
pub mod wgpu_context;

pub use headless::HeadlessGpu;
pub use wgpu_context::WgpuContext;
