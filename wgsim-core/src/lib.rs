pub mod ast;
pub mod builtin_registry;
pub mod constant_folding;
pub mod debug;
pub mod diags;
pub mod error;
pub mod exec;
pub mod layout;
pub mod lexer;
pub mod parser;
pub mod reachability;
pub mod reflect;
pub mod scope;
pub mod visitor;

pub use debug::{CommandInfo, Debugger, FrameState};
pub use error::{ExecError, Result, ShaderError};
pub use exec::texture::TexelFormat;
pub use exec::value::Value;
pub use exec::{BindGroups, BindingResource, ExecConfig, Executor};
pub use reflect::Reflection;

use log::debug;

/// Entry point tying the pipeline stages together for whole-source use.
pub struct Simulator;

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Simulator
    }

    /// Scan and parse without executing anything.
    pub fn check(&self, source: &str) -> Result<ast::Program> {
        let program = parser::parse_source(source)?;
        debug!("parsed {} declarations", program.declarations.len());
        Ok(program)
    }

    pub fn reflect(&self, source: &str) -> Result<Reflection> {
        let program = self.check(source)?;
        let reflection = reflect::Reflector::new(&program).reflect();
        if let Some(message) = reflection.layout_errors.first() {
            return Err(ShaderError::Layout(message.clone()));
        }
        Ok(reflection)
    }

    /// Run `entry` over `workgroups` and return the executor, whose
    /// diagnostics hold any errors reported along the way. Buffers in
    /// `bind_groups` are updated in place.
    pub fn dispatch(
        &self,
        source: &str,
        entry: &str,
        workgroups: [u32; 3],
        bind_groups: &mut BindGroups,
        config: &ExecConfig,
    ) -> Result<Executor> {
        let program = self.check(source)?;
        let mut executor = Executor::new(&program);
        executor.dispatch_workgroups(entry, workgroups, bind_groups, config)?;
        Ok(executor)
    }

    /// A debugger positioned before the first statement of invocation 0.
    pub fn debug(
        &self,
        source: &str,
        entry: &str,
        workgroups: [u32; 3],
        bind_groups: BindGroups,
        config: &ExecConfig,
    ) -> Result<Debugger> {
        let program = self.check(source)?;
        let mut debugger = Debugger::new(Executor::new(&program));
        debugger.init_debug(entry, workgroups, bind_groups, config)?;
        Ok(debugger)
    }
}
