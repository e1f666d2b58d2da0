//! GPU force accumulation (feature `gpu`)
//!
//! A [`ForceBackend`](crate::kernel::ForceBackend) that runs the O(n²)
//! accumulation pass as a wgpu compute shader. Edges are uploaded as a
//! compressed adjacency so each invocation owns exactly one output slot.
//!
//! Select it with `driver.backend: gpu`; the engine falls back to the CPU
//! backend when no adapter is available.

mod backend;
mod shaders;
mod types;

pub use backend::GpuBackend;
pub use shaders::force_shader;
pub use types::{GpuParams, WORKGROUP_SIZE};
