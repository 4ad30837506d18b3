//! The execution context: compile modules, instantiate them, run their
//! initializer code on the VM, collect the program result.

use std::collections::HashMap;
use std::sync::Arc;

use shn_core::{Obj, RtStack, RuntimeError, Variant};
use shn_runtime::dis;
use shn_runtime::fifo::{std_serr, std_sio, Fifo, InText, OutText};
use shn_runtime::stateobj::StateObj;
use shn_runtime::types::StateId;
use shn_runtime::vm;
use shn_runtime::world::World;

use crate::config::CompilerOptions;
use crate::error::CompileError;
use crate::parser;

pub struct Context {
    pub world: World,
    pub options: CompilerOptions,
    sio: Option<Arc<dyn Fifo>>,
    serr: Option<Arc<dyn Fifo>>,
    instances: HashMap<StateId, Arc<StateObj>>,
}

impl Context {
    pub fn new(options: CompilerOptions) -> Context {
        Context {
            world: World::new(),
            options,
            sio: None,
            serr: None,
            instances: HashMap::new(),
        }
    }

    /// Route program I/O through the given fifos instead of the standard
    /// descriptors (tests capture output this way).
    pub fn with_io<S, E>(options: CompilerOptions, sio: Arc<S>, serr: Arc<E>) -> Context
    where
        S: Fifo + 'static,
        E: Fifo + 'static,
    {
        let mut ctx = Context::new(options);
        ctx.install_io(sio.clone() as Obj, serr.clone() as Obj, sio, serr);
        ctx
    }

    fn install_io(
        &mut self,
        sio_obj: Obj,
        serr_obj: Obj,
        sio: Arc<dyn Fifo>,
        serr: Arc<dyn Fifo>,
    ) {
        self.world.instantiate_queenbee(sio_obj, serr_obj);
        self.sio = Some(sio);
        self.serr = Some(serr);
    }

    fn ensure_io(&mut self) {
        if self.world.queenbee_obj().is_none() {
            let sio = std_sio();
            let serr = std_serr();
            self.install_io(sio.clone() as Obj, serr.clone() as Obj, sio, serr);
        }
    }

    pub fn compile_source(
        &mut self,
        name: &str,
        src: Arc<dyn Fifo>,
    ) -> Result<StateId, CompileError> {
        tracing::debug!(module = name, "compiling");
        parser::compile_module(&mut self.world, name, src, &self.options)
    }

    pub fn compile_file(&mut self, path: &str) -> Result<StateId, CompileError> {
        let src = InText::open(path)?;
        let name = module_name(path);
        let module = self.compile_source(&name, src)?;
        if self.options.vm_listing {
            self.write_listing(path, module)?;
        }
        Ok(module)
    }

    fn write_listing(&self, source_path: &str, module: StateId) -> Result<(), CompileError> {
        let seg = self.world.state(module).code.clone();
        let text = dis::listing(&self.world, &seg);
        let lst_path = listing_path(source_path);
        tracing::debug!(path = %lst_path, "writing listing");
        let out = OutText::create(&lst_path)?;
        out.enq_str(&text)?;
        out.flush()?;
        Ok(())
    }

    /// Instantiate the module and run its initializer code. `exit`
    /// unwinds here and yields the program result; a plain run to `End`
    /// yields Void.
    pub fn execute(&mut self, module: StateId) -> Result<Variant, RuntimeError> {
        self.ensure_io();
        let instance = self.world.new_instance(module);
        self.instances.insert(module, instance.clone());
        let seg = self.world.state(module).code.clone();
        let mut stack = RtStack::new(self.options.stack_size);
        let result = vm::run(&mut self.world, &instance, &mut stack, &seg);
        stack.truncate(0);
        self.flush_io();
        match result {
            Ok(()) => Ok(Variant::Void),
            Err(RuntimeError::Exit(v)) => Ok(v),
            Err(e) => Err(e),
        }
    }

    /// The live instance of an executed module.
    pub fn instance(&self, module: StateId) -> Option<&Arc<StateObj>> {
        self.instances.get(&module)
    }

    /// Compile and run one source file; runtime failures are reported on
    /// `serr` as a one-line diagnostic.
    pub fn execute_file(&mut self, path: &str) -> Result<Variant, CompileError> {
        let module = self.compile_file(path)?;
        match self.execute(module) {
            Ok(v) => Ok(v),
            Err(e) => {
                let line = vm::current_line();
                let name = self.world.state(module).name.clone();
                let msg = if line > 0 {
                    format!("Runtime error: {}({}): {}\n", name, line, e)
                } else {
                    format!("Runtime error: {}: {}\n", name, e)
                };
                if let Some(serr) = &self.serr {
                    let _ = serr.enq_str(&msg);
                    let _ = serr.flush();
                }
                Err(CompileError::Runtime(e))
            }
        }
    }

    fn flush_io(&self) {
        if let Some(sio) = &self.sio {
            let _ = sio.flush();
        }
        if let Some(serr) = &self.serr {
            let _ = serr.flush();
        }
    }
}

fn module_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn listing_path(source_path: &str) -> String {
    let p = std::path::Path::new(source_path);
    p.with_extension("lst").to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shn_runtime::fifo::StrFifo;

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("dir/prog.shn"), "prog");
        assert_eq!(listing_path("dir/prog.shn"), "dir/prog.lst");
    }

    #[test]
    fn test_compile_and_execute_trivial() {
        let mut opts = CompilerOptions::default();
        opts.line_numbers = false;
        let mut ctx = Context::with_io(opts, StrFifo::new(), StrFifo::new());
        let m = ctx
            .compile_source("t", StrFifo::with_text("def x = 5\n"))
            .unwrap();
        let result = ctx.execute(m).unwrap();
        assert_eq!(result, Variant::Void);
        let inst = ctx.instance(m).unwrap();
        assert_eq!(inst.get(0).unwrap(), Variant::Ord(5));
    }
}
