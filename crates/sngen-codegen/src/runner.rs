//! Runner and definitions generation.
//!
//! Exercises the backend's declare / allocate / free / push / pull
//! capabilities for every buffer the model owns, and emits the three
//! memory-management artifacts: the public definitions header, the
//! internal definitions header and the runner implementation. Every
//! buffer is owned by the generated runner for the lifetime of the
//! program.

use std::fmt;

use sngen_model::{CodeRole, Model, VarImplementation, VarLocation};

use crate::backend::Backend;
use crate::error::Result;
use crate::stream::CodeStream;

/// Working set of streams assembled into the runner artifacts
struct RunnerStreams {
    defs: CodeStream,
    defs_int: CodeStream,
    vars: CodeStream,
    alloc: CodeStream,
    free: CodeStream,
    funcs: CodeStream,
    push_calls: Vec<String>,
    pull_calls: Vec<String>,
}

impl RunnerStreams {
    fn new() -> Self {
        Self {
            defs: CodeStream::new(),
            defs_int: CodeStream::new(),
            vars: CodeStream::new(),
            alloc: CodeStream::new(),
            free: CodeStream::new(),
            funcs: CodeStream::new(),
            push_calls: Vec::new(),
            pull_calls: Vec::new(),
        }
    }

    /// Declare one array variable and all its management plumbing
    fn array(
        &mut self,
        backend: &dyn Backend,
        ty: &str,
        name: &str,
        count: usize,
        location: VarLocation,
    ) -> Result<()> {
        backend.gen_variable_definition(
            &mut self.defs,
            &mut self.defs_int,
            &mut self.vars,
            ty,
            name,
            location,
        )?;
        backend.gen_variable_allocation(&mut self.alloc, ty, name, location, count)?;
        backend.gen_variable_free(&mut self.free, name, location)?;

        self.defs.line(format!("void push{}ToDevice();", name));
        self.defs.line(format!("void pull{}FromDevice();", name));
        self.funcs.open(format!("void push{}ToDevice()", name));
        backend.gen_variable_push(&mut self.funcs, ty, name, location, count)?;
        self.funcs.close();
        self.funcs.open(format!("void pull{}FromDevice()", name));
        backend.gen_variable_pull(&mut self.funcs, ty, name, location, count)?;
        self.funcs.close();
        self.push_calls.push(format!("push{}ToDevice();", name));
        self.pull_calls.push(format!("pull{}FromDevice();", name));
        Ok(())
    }

    /// Declare a queued variable, adding current-slot transfers
    fn queued_array(
        &mut self,
        backend: &dyn Backend,
        ng: &sngen_model::NeuronGroup,
        ty: &str,
        name: &str,
        count: usize,
        location: VarLocation,
    ) -> Result<()> {
        self.array(backend, ty, name, count, location)?;
        self.defs
            .line(format!("void pushCurrent{}ToDevice();", name));
        self.defs
            .line(format!("void pullCurrent{}FromDevice();", name));
        self.funcs
            .open(format!("void pushCurrent{}ToDevice()", name));
        backend.gen_current_variable_push(&mut self.funcs, ng, ty, name, location)?;
        self.funcs.close();
        self.funcs
            .open(format!("void pullCurrent{}FromDevice()", name));
        backend.gen_current_variable_pull(&mut self.funcs, ng, ty, name, location)?;
        self.funcs.close();
        Ok(())
    }

    /// Declare an extra global parameter and, for pointer types, its
    /// runtime allocation and transfer functions
    fn extra_global_param(
        &mut self,
        backend: &dyn Backend,
        egp: &sngen_model::ExtraGlobalParam,
        group: &str,
        location: VarLocation,
    ) -> Result<()> {
        let name = format!("{}{}", egp.name, group);
        backend.gen_extra_global_param_definition(
            &mut self.defs,
            &mut self.defs_int,
            &mut self.vars,
            &egp.ty,
            &name,
            location,
        )?;
        if egp.is_pointer() {
            self.defs
                .line(format!("void allocate{}(unsigned int count);", name));
            self.defs
                .line(format!("void push{}ToDevice(unsigned int count);", name));
            self.defs
                .line(format!("void pull{}FromDevice(unsigned int count);", name));
            self.funcs
                .open(format!("void allocate{}(unsigned int count)", name));
            backend.gen_extra_global_param_allocation(&mut self.funcs, &egp.ty, &name, location)?;
            self.funcs.close();
            self.funcs
                .open(format!("void push{}ToDevice(unsigned int count)", name));
            backend.gen_extra_global_param_push(&mut self.funcs, &egp.ty, &name, location)?;
            self.funcs.close();
            self.funcs
                .open(format!("void pull{}FromDevice(unsigned int count)", name));
            backend.gen_extra_global_param_pull(&mut self.funcs, &egp.ty, &name, location)?;
            self.funcs.close();
        } else {
            // Value-typed parameters are mirrored to the device on push
            self.defs.line(format!("void push{}ToDevice();", name));
            self.funcs.open(format!("void push{}ToDevice()", name));
            backend.gen_extra_global_param_push(&mut self.funcs, &egp.ty, &name, location)?;
            self.funcs.close();
        }
        Ok(())
    }
}

/// Generate the definitions header, internal definitions header and
/// runner implementation
pub fn generate_runner(
    definitions_out: &mut dyn fmt::Write,
    definitions_internal_out: &mut dyn fmt::Write,
    runner_out: &mut dyn fmt::Write,
    model: &Model,
    backend: &dyn Backend,
) -> Result<()> {
    let mut s = RunnerStreams::new();
    let egp_location = model.default_extra_global_param_location();

    // Neuron populations
    for ng in model.neuron_groups() {
        let n = ng.num_neurons();
        let slots = ng.num_delay_slots();

        s.array(
            backend,
            "unsigned int",
            &format!("glbSpkCnt{}", ng.name()),
            slots,
            ng.spike_location(),
        )?;
        s.array(
            backend,
            "unsigned int",
            &format!("glbSpk{}", ng.name()),
            slots * n,
            ng.spike_location(),
        )?;
        if ng.is_spike_event_required() {
            s.array(
                backend,
                "unsigned int",
                &format!("glbSpkCntEvnt{}", ng.name()),
                slots,
                ng.spike_event_location(),
            )?;
            s.array(
                backend,
                "unsigned int",
                &format!("glbSpkEvnt{}", ng.name()),
                slots * n,
                ng.spike_event_location(),
            )?;
        }
        if ng.is_delay_required() {
            backend.gen_device_scalar(
                &mut s.defs,
                &mut s.defs_int,
                &mut s.vars,
                "unsigned int",
                &format!("spkQuePtr{}", ng.name()),
            )?;
        }
        if ng.is_spike_time_required() {
            s.array(
                backend,
                model.time_type(),
                &format!("sT{}", ng.name()),
                slots * n,
                ng.spike_time_location(),
            )?;
        }
        if ng.is_sim_rng_required() {
            backend.gen_population_rng(
                &mut s.defs_int,
                &mut s.vars,
                &mut s.alloc,
                &mut s.free,
                &format!("rng{}", ng.name()),
                n,
            )?;
        }

        for var in ng.snippet().vars() {
            if ng.var_implementation(&var.name) != VarImplementation::Individual {
                continue;
            }
            let name = format!("{}{}", var.name, ng.name());
            let count = if ng.is_var_queue_required(&var.name) {
                slots * n
            } else {
                n
            };
            if ng.is_var_queue_required(&var.name) {
                s.queued_array(backend, ng, &var.ty, &name, count, ng.var_location(&var.name))?;
            } else {
                s.array(backend, &var.ty, &name, count, ng.var_location(&var.name))?;
            }
        }
        for egp in ng.snippet().extra_global_params() {
            s.extra_global_param(backend, egp, ng.name(), egp_location)?;
        }
    }

    // Current sources
    for cs in model.current_sources() {
        let n = model
            .neuron_group(cs.target())
            .expect("validated at add")
            .num_neurons();
        for var in cs.snippet().vars() {
            let name = format!("{}{}", var.name, cs.name());
            s.array(backend, &var.ty, &name, n, cs.var_location(&var.name))?;
        }
        for egp in cs.snippet().extra_global_params() {
            s.extra_global_param(backend, egp, cs.name(), egp_location)?;
        }
    }

    // Synapse populations
    for sg in model.synapse_groups() {
        let src_n = model.src_neuron_group(sg).num_neurons();
        let trg_n = model.trg_neuron_group(sg).num_neurons();

        if sg.ps_target() == sg.name() {
            s.array(
                backend,
                model.scalar_type(),
                &format!("inSyn{}", sg.name()),
                trg_n,
                sg.in_syn_location(),
            )?;
            for var in sg.ps_snippet().vars() {
                let name = format!("{}{}", var.name, sg.name());
                s.array(backend, &var.ty, &name, trg_n, sg.in_syn_location())?;
            }
        }
        if sg.is_dendritic_delay_required() {
            s.array(
                backend,
                model.scalar_type(),
                &format!("denDelay{}", sg.name()),
                sg.max_dendritic_delay_timesteps() as usize * trg_n,
                sg.in_syn_location(),
            )?;
            backend.gen_device_scalar(
                &mut s.defs,
                &mut s.defs_int,
                &mut s.vars,
                "unsigned int",
                &format!("denDelayPtr{}", sg.name()),
            )?;
        }

        match sg.matrix_type().connectivity() {
            sngen_model::MatrixConnectivity::Sparse => {
                s.array(
                    backend,
                    "unsigned int",
                    &format!("rowLength{}", sg.name()),
                    src_n,
                    sg.sparse_connectivity_location(),
                )?;
                s.array(
                    backend,
                    sg.sparse_ind_type(),
                    &format!("ind{}", sg.name()),
                    src_n * sg.max_connections() as usize,
                    sg.sparse_connectivity_location(),
                )?;
            }
            sngen_model::MatrixConnectivity::Bitmask => {
                s.array(
                    backend,
                    "uint32_t",
                    &format!("gp{}", sg.name()),
                    (src_n * trg_n).div_ceil(32),
                    sg.sparse_connectivity_location(),
                )?;
            }
            _ => {}
        }

        if sg.matrix_type().has_individual_weights() {
            let count = if sg.matrix_type().is_sparse() {
                src_n * sg.max_connections() as usize
            } else {
                src_n * trg_n
            };
            for var in sg.wu_snippet().vars() {
                let name = format!("{}{}", var.name, sg.name());
                s.array(backend, &var.ty, &name, count, sg.wu_var_location())?;
            }
        }
        for var in sg.wu_snippet().pre_vars() {
            let name = format!("{}{}", var.name, sg.name());
            s.array(backend, &var.ty, &name, src_n, sg.wu_var_location())?;
        }
        for var in sg.wu_snippet().post_vars() {
            let name = format!("{}{}", var.name, sg.name());
            s.array(backend, &var.ty, &name, trg_n, sg.wu_var_location())?;
        }
        for egp in sg.wu_snippet().extra_global_params() {
            s.extra_global_param(backend, egp, sg.name(), egp_location)?;
        }
    }

    // Kernel timers
    if model.is_timing_enabled() {
        let mut timers = vec!["neuronUpdate", "init"];
        if model.synapse_groups().next().is_some() {
            timers.push("presynapticUpdate");
        }
        if model
            .synapse_groups()
            .any(|sg| sg.wu_snippet().code(CodeRole::LearnPost).is_some())
        {
            timers.push("postsynapticUpdate");
        }
        if model
            .synapse_groups()
            .any(|sg| sg.wu_snippet().code(CodeRole::SynapseDynamics).is_some())
        {
            timers.push("synapseDynamics");
        }
        if model
            .synapse_groups()
            .any(|sg| sg.matrix_type().is_sparse() && sg.connectivity_init().code().is_some())
        {
            timers.push("initSparse");
        }
        for timer in timers {
            backend.gen_timer(
                &mut s.defs,
                &mut s.defs_int,
                &mut s.vars,
                &mut s.alloc,
                &mut s.free,
                timer,
            )?;
        }
    }

    // ---- definitions header ----
    let mut defs_os = CodeStream::new();
    backend.gen_definitions_preamble(&mut defs_os, model)?;
    defs_os.blank();
    defs_os.raw(s.defs.as_str());
    defs_os.blank();
    defs_os.line("// Runner functions");
    defs_os.line("void allocateMem();");
    defs_os.line("void freeMem();");
    defs_os.line("void copyStateToDevice();");
    defs_os.line("void copyStateFromDevice();");
    defs_os.line("void initialize();");
    defs_os.line("void initializeSparse();");
    defs_os.line(format!("void updateNeurons({} t);", model.time_type()));
    defs_os.line(format!("void updateSynapses({} t);", model.time_type()));
    write!(definitions_out, "{}", defs_os)?;

    // ---- internal definitions header ----
    let mut int_os = CodeStream::new();
    int_os.line(format!("// internal definitions for model {}", model.name()));
    int_os.line("#pragma once");
    int_os.line("#include \"definitions.h\"");
    int_os.blank();
    int_os.raw(s.defs_int.as_str());
    write!(definitions_internal_out, "{}", int_os)?;

    // ---- runner implementation ----
    let mut runner_os = CodeStream::new();
    backend.gen_runner_preamble(&mut runner_os, model)?;
    runner_os.blank();
    runner_os.raw(s.vars.as_str());
    runner_os.blank();
    runner_os.open("void allocateMem()");
    runner_os.raw(s.alloc.as_str());
    runner_os.close();
    runner_os.blank();
    runner_os.open("void freeMem()");
    runner_os.raw(s.free.as_str());
    runner_os.close();
    runner_os.blank();
    runner_os.raw(s.funcs.as_str());
    runner_os.blank();
    runner_os.open("void copyStateToDevice()");
    for call in &s.push_calls {
        runner_os.line(call);
    }
    runner_os.close();
    runner_os.blank();
    runner_os.open("void copyStateFromDevice()");
    for call in &s.pull_calls {
        runner_os.line(call);
    }
    runner_os.close();
    write!(runner_out, "{}", runner_os)?;

    Ok(())
}

/// Generate the makefile fragment for the backend's toolchain
pub fn generate_makefile_fragment(out: &mut dyn fmt::Write, backend: &dyn Backend) -> Result<()> {
    let mut os = CodeStream::new();
    backend.gen_makefile_preamble(&mut os)?;
    os.blank();
    backend.gen_makefile_link_rule(&mut os)?;
    os.blank();
    backend.gen_makefile_compile_rule(&mut os)?;
    write!(out, "{}", os)?;
    Ok(())
}
