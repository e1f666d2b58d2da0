//! WGSL compute shader for GPU force accumulation
//!
//! One invocation per node. Each invocation sums the repulsion from every
//! other node and the spring pull along its adjacency row, reading only the
//! position buffer, so no atomics are needed.

/// Buffer bindings and the uniform layout (must match [`super::types::GpuParams`])
pub const TYPES: &str = r#"
struct Params {
    node_count: u32,
    model: u32,
    repulsion_strength: f32,
    min_distance_to_repel: f32,
    far_field_scale: f32,
    attraction_strength: f32,
    ideal_length: f32,
    center_strength: f32,
    temperature: f32,
    epsilon: f32,
    _pad0: f32,
    _pad1: f32,
}

@group(0) @binding(0) var<storage, read> positions: array<vec2<f32>>;
@group(0) @binding(1) var<storage, read> offsets: array<u32>;
@group(0) @binding(2) var<storage, read> neighbors: array<u32>;
@group(0) @binding(3) var<storage, read_write> forces: array<vec2<f32>>;
@group(0) @binding(4) var<uniform> params: Params;

const MODEL_SIMPLE: u32 = 0u;
"#;

/// Pair laws, mirroring `kernel::repulsion` and `kernel::attraction`
pub const PAIR_FORCES: &str = r#"
fn repulsion(a: vec2<f32>, b: vec2<f32>) -> vec2<f32> {
    let delta = a - b;
    let d = length(delta);
    if (!(d >= params.epsilon)) {
        return vec2<f32>(0.0);
    }

    var magnitude: f32;
    if (d < params.min_distance_to_repel) {
        magnitude = params.repulsion_strength / (d * d);
    } else {
        magnitude = params.repulsion_strength / (d * d * d * params.far_field_scale);
    }
    if (params.model != MODEL_SIMPLE) {
        magnitude *= params.temperature;
    }
    return delta * (magnitude / d);
}

fn attraction(a: vec2<f32>, b: vec2<f32>) -> vec2<f32> {
    let delta = b - a;
    let d = length(delta);
    if (!(d >= params.epsilon)) {
        return vec2<f32>(0.0);
    }

    var magnitude: f32;
    if (params.model == MODEL_SIMPLE) {
        magnitude = params.attraction_strength * d;
    } else {
        magnitude = params.attraction_strength * log(d / params.ideal_length + 1.0);
    }
    return delta * (magnitude / d);
}
"#;

/// Entry point `accumulate`
pub const ACCUMULATE: &str = r#"
@compute @workgroup_size(256)
fn accumulate(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= params.node_count) {
        return;
    }

    let p = positions[i];
    var total = vec2<f32>(0.0);

    for (var j = 0u; j < params.node_count; j++) {
        if (j != i) {
            total += repulsion(p, positions[j]);
        }
    }

    for (var k = offsets[i]; k < offsets[i + 1u]; k++) {
        total += attraction(p, positions[neighbors[k]]);
    }

    if (params.model == MODEL_SIMPLE) {
        total -= p * params.center_strength;
    }

    forces[i] = total;
}
"#;

/// Complete shader source for pipeline creation
pub fn force_shader() -> String {
    format!("{TYPES}\n{PAIR_FORCES}\n{ACCUMULATE}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_declares_every_binding_once() {
        let source = force_shader();
        for binding in 0..5 {
            let tag = format!("@binding({binding})");
            assert_eq!(source.matches(&tag).count(), 1, "{tag}");
        }
        assert!(source.contains("fn accumulate"));
    }
}
