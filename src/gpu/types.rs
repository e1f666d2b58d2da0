//! GPU buffer types for force accumulation
//!
//! Uploaded directly to GPU buffers, so every type is `repr(C)` and `Pod`.

use bytemuck::{Pod, Zeroable};

use crate::config::{ForceModel, ForceParams};

/// Threads per workgroup; must match `@workgroup_size` in the shader
pub const WORKGROUP_SIZE: u32 = 256;

/// Uniform block for the `accumulate` shader.
///
/// 48 bytes: uniform buffers are sized in 16-byte multiples.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuParams {
    pub node_count: u32,
    /// 0 = simple, 1 = multilevel
    pub model: u32,
    pub repulsion_strength: f32,
    pub min_distance_to_repel: f32,
    pub far_field_scale: f32,
    pub attraction_strength: f32,
    pub ideal_length: f32,
    pub center_strength: f32,
    pub temperature: f32,
    pub epsilon: f32,
    pub _pad0: f32,
    pub _pad1: f32,
}

impl GpuParams {
    pub fn new(params: &ForceParams, node_count: u32, temperature: f32) -> Self {
        Self {
            node_count,
            model: match params.model {
                ForceModel::Simple => 0,
                ForceModel::Multilevel => 1,
            },
            repulsion_strength: params.repulsion_strength,
            min_distance_to_repel: params.min_distance_to_repel,
            far_field_scale: params.far_field_scale,
            attraction_strength: params.attraction_strength,
            ideal_length: params.ideal_length,
            center_strength: params.center_strength,
            temperature,
            epsilon: params.epsilon,
            _pad0: 0.0,
            _pad1: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_fill_whole_uniform_rows() {
        assert_eq!(std::mem::size_of::<GpuParams>(), 48);
        assert_eq!(std::mem::size_of::<GpuParams>() % 16, 0);
    }

    #[test]
    fn model_tags_match_shader() {
        let simple = crate::config::SimpleParams::default().to_force_params();
        assert_eq!(GpuParams::new(&simple, 3, 1.0).model, 0);
        assert_eq!(GpuParams::new(&ForceParams::default(), 3, 1.0).model, 1);
    }
}
