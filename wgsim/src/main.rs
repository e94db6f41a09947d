use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use wgsim_core::diags::AstFormatter;
use wgsim_core::layout::{ScalarKind, TypeInfo, TypeInfoKind};
use wgsim_core::reflect::VariableInfo;
use wgsim_core::{BindGroups, BindingResource, Debugger, ExecConfig, Executor, Reflection, ShaderError, Simulator};

#[derive(Parser)]
#[command(name = "wgsim")]
#[command(about = "Reflect, run and single-step WGSL compute shaders on the CPU", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan and parse a shader without running it
    Check {
        /// Input source file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Print the parsed program
        #[arg(long)]
        ast: bool,

        /// Tag printed expressions with their node ids
        #[arg(long, requires = "ast")]
        ids: bool,
    },

    /// Print bindings, struct layouts, overrides and entry points
    Reflect {
        /// Input source file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Dispatch a compute entry point and print the bound buffers
    Run(DispatchArgs),

    /// Dispatch one statement at a time, printing each line and the live variables
    Step {
        #[command(flatten)]
        dispatch: DispatchArgs,

        /// Step into calls to user functions
        #[arg(long)]
        into: bool,
    },
}

#[derive(Args)]
struct DispatchArgs {
    /// Input source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Entry point to dispatch
    #[arg(short, long, default_value = "main")]
    entry: String,

    /// Workgroup counts
    #[arg(long, value_name = "X,Y,Z", default_value = "1,1,1", value_parser = parse_dispatch)]
    dispatch: [u32; 3],

    /// Bind a buffer; values are encoded as the binding's element type
    #[arg(long = "buffer", value_name = "G:B=storage|uniform:V1,V2,...", value_parser = parse_buffer)]
    buffers: Vec<BufferArg>,

    /// Set an override constant by name or @id
    #[arg(long = "override", value_name = "NAME=VALUE", value_parser = parse_override)]
    overrides: Vec<(String, f64)>,
}

#[derive(Debug, Clone)]
struct BufferArg {
    group: u32,
    binding: u32,
    uniform: bool,
    values: Vec<f64>,
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Shader(#[from] ShaderError),

    #[error("no resource is declared at @group({0}) @binding({1})")]
    UnknownBinding(u32, u32),
}

fn main() -> Result<(), DriverError> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { input, ast, ids } => check_file(input, ast, ids)?,
        Commands::Reflect { input } => reflect_file(input)?,
        Commands::Run(args) => run_file(args)?,
        Commands::Step { dispatch, into } => step_file(dispatch, into)?,
    }

    Ok(())
}

fn check_file(input: PathBuf, ast: bool, ids: bool) -> Result<(), DriverError> {
    let source = fs::read_to_string(&input)?;
    let program = Simulator::new().check(&source)?;
    if ast {
        if ids {
            print!("{}", AstFormatter::format_program_with_ids(&program));
        } else {
            print!("{}", AstFormatter::format_program(&program));
        }
    }
    println!("{}: ok ({} declarations)", input.display(), program.declarations.len());
    Ok(())
}

fn reflect_file(input: PathBuf) -> Result<(), DriverError> {
    let source = fs::read_to_string(&input)?;
    let reflection = Simulator::new().reflect(&source)?;

    for ty in &reflection.structs {
        print_struct(ty);
    }
    for (group, vars) in reflection.bind_groups() {
        println!("group {}", group);
        for var in vars {
            let access = var.access.as_deref().map(|a| format!(", {}", a)).unwrap_or_default();
            println!(
                "  binding {}: {} {:?}{} {} (size {}, align {})",
                var.binding, var.name, var.resource, access, var.ty.name, var.ty.size, var.ty.align
            );
        }
    }
    for o in &reflection.overrides {
        let id = o.id.map(|id| format!(" @id({})", id)).unwrap_or_default();
        let ty = o.ty.as_ref().map_or("abstract", |t| t.name.as_str());
        println!("override {}{}: {}{}", o.name, id, ty, if o.has_default { " (default)" } else { "" });
    }
    for f in &reflection.functions {
        let stage = f.stage.map(|s| format!("{:?} ", s).to_lowercase()).unwrap_or_default();
        let used = if f.in_use { "" } else { " (unused)" };
        println!("{}fn {} [lines {}-{}]{}", stage, f.name, f.start_line, f.end_line, used);
        if let Some([x, y, z]) = f.workgroup_size {
            println!("  workgroup_size {}, {}, {}", x, y, z);
        }
        for input in &f.inputs {
            println!("  in {} @{:?}({}) {}", input.name, input.location_type, input.location, input.ty.name);
        }
        for output in &f.outputs {
            println!("  out @{:?}({}) {}", output.location_type, output.location, output.ty.name);
        }
        if !f.resources.is_empty() {
            println!("  uses {}", f.resources.join(", "));
        }
        if !f.calls.is_empty() {
            println!("  calls {}", f.calls.join(", "));
        }
    }
    Ok(())
}

fn print_struct(ty: &TypeInfo) {
    let Some(info) = ty.as_struct() else {
        return;
    };
    let used = if info.in_use.get() { "" } else { " (unused)" };
    println!("struct {} (size {}, align {}){}", ty.name, ty.size, ty.align, used);
    for m in &info.members {
        println!(
            "  {:>4} {}: {} (size {}, align {})",
            m.offset, m.name, m.ty.name, m.size, m.align
        );
    }
}

fn run_file(args: DispatchArgs) -> Result<(), DriverError> {
    let source = fs::read_to_string(&args.input)?;
    let simulator = Simulator::new();
    let reflection = simulator.reflect(&source)?;
    let mut groups = bind_buffers(&args.buffers, &reflection)?;
    let executor = simulator.dispatch(&source, &args.entry, args.dispatch, &mut groups, &config(&args))?;
    report_diagnostics(&executor);
    print_buffers(&args.buffers, &groups, &reflection);
    Ok(())
}

fn step_file(args: DispatchArgs, into: bool) -> Result<(), DriverError> {
    let source = fs::read_to_string(&args.input)?;
    let simulator = Simulator::new();
    let reflection = simulator.reflect(&source)?;
    let groups = bind_buffers(&args.buffers, &reflection)?;
    let mut debugger = simulator.debug(&source, &args.entry, args.dispatch, groups, &config(&args))?;

    let mut steps = 0usize;
    loop {
        let command = debugger.current_command();
        if !debugger.step_next(into)? {
            break;
        }
        steps += 1;
        if let Some(command) = command {
            println!("{:>4}: {}", command.line, command.text);
        }
        print_frames(&debugger);
    }
    info!("{} steps", steps);

    report_diagnostics(debugger.executor());
    let groups = debugger.finish();
    print_buffers(&args.buffers, &groups, &reflection);
    Ok(())
}

fn print_frames(debugger: &Debugger) {
    for frame in debugger.current_state() {
        let vars: Vec<String> = frame
            .variables
            .iter()
            .map(|(name, value)| format!("{} = {}", name, value))
            .collect();
        println!("      {} [{}] {}", frame.name, frame.line, vars.join(", "));
    }
}

fn config(args: &DispatchArgs) -> ExecConfig {
    args.overrides
        .iter()
        .fold(ExecConfig::new(), |config, (name, value)| config.with_constant(name.clone(), *value))
}

fn report_diagnostics(executor: &Executor) {
    for error in executor.diagnostics() {
        warn!("{}", error);
        eprintln!("warning: {}", error);
    }
}

/// Element kind used to encode and print a buffer: the scalar kind of the
/// array element or of the binding itself, `f32` otherwise.
fn element_kind(var: &VariableInfo) -> ScalarKind {
    let element = match &var.ty.kind {
        TypeInfoKind::Array(array) => &array.format,
        _ => &var.ty,
    };
    element.scalar_kind().unwrap_or(ScalarKind::F32)
}

fn bind_buffers(buffers: &[BufferArg], reflection: &Reflection) -> Result<BindGroups, DriverError> {
    let mut groups = BindGroups::new();
    for buffer in buffers {
        let var = reflection
            .find_resource(buffer.group, buffer.binding)
            .ok_or(DriverError::UnknownBinding(buffer.group, buffer.binding))?;
        let bytes = encode(&buffer.values, element_kind(var));
        let resource = if buffer.uniform {
            BindingResource::Uniform(bytes)
        } else {
            BindingResource::Storage(bytes)
        };
        groups.insert(buffer.group, buffer.binding, resource);
    }
    Ok(groups)
}

fn encode(values: &[f64], kind: ScalarKind) -> Vec<u8> {
    match kind {
        ScalarKind::I32 => bytemuck::cast_slice(&values.iter().map(|&v| v as i32).collect::<Vec<_>>()).to_vec(),
        ScalarKind::U32 | ScalarKind::Bool => {
            bytemuck::cast_slice(&values.iter().map(|&v| v as u32).collect::<Vec<_>>()).to_vec()
        }
        ScalarKind::F32 | ScalarKind::F16 => {
            bytemuck::cast_slice(&values.iter().map(|&v| v as f32).collect::<Vec<_>>()).to_vec()
        }
    }
}

fn print_buffers(buffers: &[BufferArg], groups: &BindGroups, reflection: &Reflection) {
    for buffer in buffers {
        let (group, binding) = (buffer.group, buffer.binding);
        let Some(var) = reflection.find_resource(group, binding) else {
            continue;
        };
        let text = match element_kind(var) {
            ScalarKind::I32 => groups.read::<i32>(group, binding).map(|v| format!("{:?}", v)),
            ScalarKind::U32 | ScalarKind::Bool => groups.read::<u32>(group, binding).map(|v| format!("{:?}", v)),
            ScalarKind::F32 | ScalarKind::F16 => groups.read::<f32>(group, binding).map(|v| format!("{:?}", v)),
        };
        println!("{}:{} {} = {}", group, binding, var.name, text.unwrap_or_default());
    }
}

fn parse_dispatch(text: &str) -> Result<[u32; 3], String> {
    let mut counts = [1u32; 3];
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() > 3 {
        return Err(format!("expected at most three counts, got '{}'", text));
    }
    for (count, part) in counts.iter_mut().zip(parts) {
        *count = part
            .trim()
            .parse()
            .map_err(|e| format!("bad workgroup count '{}': {}", part, e))?;
    }
    Ok(counts)
}

fn parse_buffer(text: &str) -> Result<BufferArg, String> {
    let (slot, rest) = text
        .split_once('=')
        .ok_or_else(|| format!("expected G:B=KIND:VALUES, got '{}'", text))?;
    let (group, binding) = slot
        .split_once(':')
        .ok_or_else(|| format!("expected GROUP:BINDING, got '{}'", slot))?;
    let (kind, values) = rest.split_once(':').unwrap_or((rest, ""));
    let uniform = match kind {
        "storage" => false,
        "uniform" => true,
        other => return Err(format!("buffer kind must be storage or uniform, got '{}'", other)),
    };
    let values = values
        .split(',')
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("bad value '{}': {}", v, e)))
        .collect::<Result<_, _>>()?;
    Ok(BufferArg {
        group: group.trim().parse().map_err(|e| format!("bad group '{}': {}", group, e))?,
        binding: binding.trim().parse().map_err(|e| format!("bad binding '{}': {}", binding, e))?,
        uniform,
        values,
    })
}

fn parse_override(text: &str) -> Result<(String, f64), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", text))?;
    let value = match value.trim() {
        "true" => 1.0,
        "false" => 0.0,
        v => v.parse().map_err(|e| format!("bad value '{}': {}", v, e))?,
    };
    Ok((name.trim().to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dispatch() {
        assert_eq!(parse_dispatch("4").unwrap(), [4, 1, 1]);
        assert_eq!(parse_dispatch("2, 3,1").unwrap(), [2, 3, 1]);
        assert!(parse_dispatch("1,2,3,4").is_err());
        assert!(parse_dispatch("x").is_err());
    }

    #[test]
    fn test_parse_buffer() {
        let buffer = parse_buffer("0:1=storage:1,2.5,-3").unwrap();
        assert_eq!((buffer.group, buffer.binding, buffer.uniform), (0, 1, false));
        assert_eq!(buffer.values, vec![1.0, 2.5, -3.0]);
        assert!(parse_buffer("1:0=uniform").unwrap().values.is_empty());
        assert!(parse_buffer("0:0=texture:1").is_err());
        assert!(parse_buffer("0=storage:1").is_err());
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(parse_override("scale=2.5").unwrap(), ("scale".to_string(), 2.5));
        assert_eq!(parse_override("12=true").unwrap(), ("12".to_string(), 1.0));
        assert!(parse_override("scale").is_err());
    }

    #[test]
    fn test_encode_uses_element_kind() {
        assert_eq!(encode(&[1.0, 2.0], ScalarKind::U32), bytemuck::cast_slice(&[1u32, 2]).to_vec());
        assert_eq!(encode(&[-1.0], ScalarKind::I32), bytemuck::cast_slice(&[-1i32]).to_vec());
        assert_eq!(encode(&[0.5], ScalarKind::F32), bytemuck::cast_slice(&[0.5f32]).to_vec());
    }
}
