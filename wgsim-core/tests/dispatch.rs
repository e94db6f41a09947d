use wgsim_core::{BindGroups, BindingResource, ExecConfig, ShaderError, Simulator};

fn storage(values: &[f32]) -> BindingResource {
    BindingResource::Storage(bytemuck::cast_slice(values).to_vec())
}

fn storage_u32(values: &[u32]) -> BindingResource {
    BindingResource::Storage(bytemuck::cast_slice(values).to_vec())
}

const DOUBLE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] * 2.0;
}
"#;

#[test]
fn test_doubling_kernel() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut groups = BindGroups::new();
    groups.insert(0, 0, storage(&[1.0, 2.0, 6.0, 0.0]));
    let executor = Simulator::new()
        .dispatch(DOUBLE, "main", [1, 1, 1], &mut groups, &ExecConfig::new())
        .unwrap();
    assert!(executor.diagnostics().is_empty(), "{:?}", executor.diagnostics());
    assert_eq!(groups.read::<f32>(0, 0).unwrap(), vec![2.0, 4.0, 12.0, 0.0]);
}

#[test]
fn test_doubling_kernel_one_invocation_per_workgroup() {
    let source = r#"
        @group(0) @binding(0) var<storage, read_write> data: array<f32>;

        @compute @workgroup_size(1)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = data[id.x] * 2.0;
        }
    "#;
    let mut groups = BindGroups::new();
    groups.insert(0, 0, storage(&[1.0, 2.0, 6.0, 0.0]));
    let executor = Simulator::new()
        .dispatch(source, "main", [4, 1, 1], &mut groups, &ExecConfig::new())
        .unwrap();
    assert!(executor.diagnostics().is_empty(), "{:?}", executor.diagnostics());
    assert_eq!(groups.read::<f32>(0, 0).unwrap(), vec![2.0, 4.0, 12.0, 0.0]);
}

#[test]
fn test_dispatch_is_deterministic() {
    let source = r#"
        @group(0) @binding(0) var<storage, read_write> out: array<u32>;
        var<private> seed: u32 = 7u;

        fn hash(x: u32) -> u32 {
            var h = x ^ seed;
            for (var i = 0; i < 3; i++) {
                h = h * 747796405u + 2891336453u;
                h = (h >> 13u) ^ h;
            }
            return h;
        }

        @compute @workgroup_size(2, 2)
        fn main(@builtin(global_invocation_id) gid: vec3<u32>,
                @builtin(num_workgroups) groups: vec3<u32>) {
            let index = gid.y * groups.x * 2u + gid.x;
            out[index] = hash(index);
        }
    "#;
    let run = || {
        let mut groups = BindGroups::new();
        groups.insert(0, 0, storage_u32(&[0; 16]));
        let executor = Simulator::new()
            .dispatch(source, "main", [2, 2, 1], &mut groups, &ExecConfig::new())
            .unwrap();
        assert!(executor.diagnostics().is_empty(), "{:?}", executor.diagnostics());
        groups.read::<u32>(0, 0).unwrap()
    };
    let first = run();
    assert_eq!(first, run());
    let distinct: std::collections::HashSet<_> = first.iter().collect();
    assert_eq!(distinct.len(), 16);
}

#[test]
fn test_override_scales_output() {
    let source = r#"
        override scale: f32 = 1.0;
        @id(7) override size: u32 = 2u;
        @group(0) @binding(0) var<storage, read_write> data: array<f32>;

        @compute @workgroup_size(size)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] *= scale;
        }
    "#;
    let config = ExecConfig::new().with_constant("scale", 3.0).with_constant("7", 4.0);
    let mut groups = BindGroups::new();
    groups.insert(0, 0, storage(&[1.0, 2.0, 3.0, 4.0]));
    Simulator::new()
        .dispatch(source, "main", [1, 1, 1], &mut groups, &config)
        .unwrap();
    assert_eq!(groups.read::<f32>(0, 0).unwrap(), vec![3.0, 6.0, 9.0, 12.0]);
}

#[test]
fn test_workgroup_and_private_lifetimes() {
    let source = r#"
        var<workgroup> arrivals: atomic<u32>;
        var<private> visits: u32;
        @group(0) @binding(0) var<storage, read_write> order: array<u32>;
        @group(0) @binding(1) var<storage, read_write> private_visits: array<u32>;

        @compute @workgroup_size(2)
        fn main(@builtin(local_invocation_id) lid: vec3<u32>,
                @builtin(workgroup_id) wid: vec3<u32>) {
            let slot = wid.x * 2u + lid.x;
            visits += 1u;
            order[slot] = atomicAdd(&arrivals, 1u);
            workgroupBarrier();
            private_visits[slot] = visits;
        }
    "#;
    let mut groups = BindGroups::new();
    groups.insert(0, 0, storage_u32(&[9; 4]));
    groups.insert(0, 1, storage_u32(&[9; 4]));
    Simulator::new()
        .dispatch(source, "main", [2, 1, 1], &mut groups, &ExecConfig::new())
        .unwrap();
    assert_eq!(groups.read::<u32>(0, 0).unwrap(), vec![0, 1, 0, 1]);
    assert_eq!(groups.read::<u32>(0, 1).unwrap(), vec![1, 1, 1, 1]);
}

#[test]
fn test_struct_array_layout() {
    let source = r#"
        struct Particle {
            pos: vec3<f32>,
            mass: f32,
        }
        struct Params {
            gravity: f32,
            count: u32,
        }
        @group(0) @binding(0) var<storage, read_write> particles: array<Particle>;
        @group(0) @binding(1) var<uniform> params: Params;

        @compute @workgroup_size(1)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            if (id.x >= params.count || id.x >= arrayLength(&particles)) {
                return;
            }
            let p = particles[id.x];
            particles[id.x].pos = p.pos * p.mass;
            particles[id.x].pos.y -= params.gravity;
        }
    "#;
    let mut groups = BindGroups::new();
    groups.insert(0, 0, storage(&[1.0, 2.0, 3.0, 2.0, 4.0, 5.0, 6.0, 0.5]));
    let mut params = bytemuck::cast_slice(&[1.0f32]).to_vec();
    params.extend_from_slice(bytemuck::cast_slice(&[2u32]));
    groups.insert(0, 1, BindingResource::Uniform(params));
    let executor = Simulator::new()
        .dispatch(source, "main", [3, 1, 1], &mut groups, &ExecConfig::new())
        .unwrap();
    assert!(executor.diagnostics().is_empty(), "{:?}", executor.diagnostics());
    assert_eq!(
        groups.read::<f32>(0, 0).unwrap(),
        vec![2.0, 3.0, 6.0, 2.0, 2.0, 1.5, 3.0, 0.5]
    );
    assert!(matches!(groups.get(0, 1), Some(BindingResource::Uniform(_))));
}

#[test]
fn test_errors_are_reported_and_execution_continues() {
    let source = r#"
        @group(0) @binding(0) var<storage, read_write> data: array<i32>;

        @compute @workgroup_size(1)
        fn main() {
            data[0] = 1;
            data[1] = missing;
            data[2] = 3;
            data[9] = 4;
        }
    "#;
    let mut groups = BindGroups::new();
    groups.insert(0, 0, BindingResource::Storage(bytemuck::cast_slice(&[0i32; 3]).to_vec()));
    let executor = Simulator::new()
        .dispatch(source, "main", [1, 1, 1], &mut groups, &ExecConfig::new())
        .unwrap();
    assert_eq!(groups.read::<i32>(0, 0).unwrap(), vec![1, 0, 3]);
    let lines: Vec<usize> = executor.diagnostics().iter().map(|e| e.line()).collect();
    assert_eq!(lines, vec![7, 9]);
}

#[test]
fn test_missing_entry_point_is_fatal() {
    let mut groups = BindGroups::new();
    let result = Simulator::new().dispatch(DOUBLE, "nope", [1, 1, 1], &mut groups, &ExecConfig::new());
    assert!(result.is_err());
}

#[test]
fn test_oversized_layout_is_rejected() {
    let source = r#"
        struct S { a: array<vec4<f32>, 1073741824>, b: f32 }
        @group(0) @binding(0) var<storage, read_write> s: S;

        @compute @workgroup_size(1)
        fn main() {
            s.b = 1.0;
        }
    "#;
    let result = Simulator::new().reflect(source);
    assert!(matches!(result, Err(ShaderError::Layout(_))), "{:?}", result.map(|_| ()));

    let mut groups = BindGroups::new();
    groups.insert(0, 0, storage(&[0.0; 4]));
    let result = Simulator::new().dispatch(source, "main", [1, 1, 1], &mut groups, &ExecConfig::new());
    assert!(matches!(result, Err(ShaderError::Layout(_))));
}
