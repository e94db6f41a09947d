use wgsim_core::{BindGroups, BindingResource, ExecConfig, Simulator, Value};

const STORE_INDEX: &str = r#"@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = id.x * 10u;
}
"#;

#[test]
fn test_one_assignment_per_invocation() {
    let mut groups = BindGroups::new();
    groups.insert(0, 0, BindingResource::Storage(bytemuck::cast_slice(&[0u32; 4]).to_vec()));
    let mut debugger = Simulator::new()
        .debug(STORE_INDEX, "main", [1, 1, 1], groups, &ExecConfig::new())
        .unwrap();

    for invocation in 0..4u32 {
        let command = debugger.current_command().unwrap();
        assert_eq!(command.line, 5);
        assert_eq!(command.text, "data[id.x] = id.x * 10u");
        assert!(debugger.step_next(false).unwrap());

        let state = debugger.current_state();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].name, "main");
        let id = state[0].variables.iter().find(|(name, _)| name == "id").map(|(_, v)| v.clone());
        assert_eq!(
            id,
            Some(Value::Vector(vec![Value::U32(invocation), Value::U32(0), Value::U32(0)]))
        );
    }
    assert!(!debugger.step_next(false).unwrap());
    assert!(debugger.current_command().is_none());

    let groups = debugger.finish();
    assert_eq!(groups.read::<u32>(0, 0).unwrap(), vec![0, 10, 20, 30]);
}

#[test]
fn test_stepping_over_and_into_calls() {
    let source = r#"@group(0) @binding(0) var<storage, read_write> data: array<f32>;

fn scaled(x: f32, by: f32) -> f32 {
    let result = x * by;
    return result;
}

@compute @workgroup_size(1)
fn main() {
    let a = scaled(2.0, 3.0);
    data[0] = scaled(a, 2.0) + 1.0;
}
"#;
    let count_steps = |enter_calls: bool| {
        let mut groups = BindGroups::new();
        groups.insert(0, 0, BindingResource::Storage(bytemuck::cast_slice(&[0.0f32]).to_vec()));
        let mut debugger = Simulator::new()
            .debug(source, "main", [1, 1, 1], groups, &ExecConfig::new())
            .unwrap();
        let mut lines = Vec::new();
        loop {
            let line = debugger.current_command().map(|c| c.line);
            if !debugger.step_next(enter_calls).unwrap() {
                break;
            }
            lines.push(line.unwrap_or(0));
        }
        assert!(debugger.executor().diagnostics().is_empty());
        (lines, debugger.finish().read::<f32>(0, 0).unwrap())
    };

    let (over, data) = count_steps(false);
    assert_eq!(over, vec![10, 11]);
    assert_eq!(data, vec![13.0]);

    // Entering a call is a step of its own, then each callee statement,
    // then the calling statement again with the result in hand.
    let (into, data) = count_steps(true);
    assert_eq!(into, vec![10, 4, 5, 10, 11, 4, 5, 11]);
    assert_eq!(data, vec![13.0]);
}

#[test]
fn test_stepping_one_invocation_per_workgroup() {
    let source = r#"@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] * 2.0;
}
"#;
    let mut groups = BindGroups::new();
    groups.insert(0, 0, BindingResource::Storage(bytemuck::cast_slice(&[1.0f32, 2.0, 6.0, 0.0]).to_vec()));
    let mut debugger = Simulator::new()
        .debug(source, "main", [4, 1, 1], groups, &ExecConfig::new())
        .unwrap();

    let mut lines = Vec::new();
    while let Some(command) = debugger.current_command() {
        lines.push(command.line);
        assert!(debugger.step_next(false).unwrap());
    }
    assert_eq!(lines, vec![5, 5, 5, 5]);
    assert!(!debugger.step_next(false).unwrap());
    assert!(debugger.executor().diagnostics().is_empty());
    assert_eq!(debugger.finish().read::<f32>(0, 0).unwrap(), vec![2.0, 4.0, 12.0, 0.0]);
}
