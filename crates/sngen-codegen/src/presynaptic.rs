//! Presynaptic update strategies.
//!
//! Every synapse-group update is dispatched to exactly one strategy,
//! chosen as the first compatible in a fixed order: procedural
//! presynaptic span, presynaptic span, postsynaptic span. The strategy
//! decides thread geometry and the shape of the spike loop; the
//! substitution frame it builds decides how weight-update code addresses
//! memory.

use sngen_model::{
    CodeRole, MatrixConnectivity, Model, SpanType, SynapseGroup, VarImplementation,
};

use crate::backend::{rng_stream_offset, Backend, Kernel};
use crate::error::{CodegenError, Result};
use crate::stream::CodeStream;
use crate::substitute::write_precise;
use crate::substitutions::Substitutions;

/// How `$(addToInSyn, v)` accumulates into the target input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// Route through the dendritic delay ring buffer
    DendriticDelay,
    /// Atomic add into the block-shared accumulator
    SharedAtomic,
    /// Accumulate in a per-thread register, flushed by the postamble
    Register,
    /// Atomic add straight into the global input buffer
    GlobalAtomic,
}

/// Index expressions addressing the current synapse
pub struct SynapseIndices<'a> {
    /// Presynaptic neuron index
    pub pre: &'a str,
    /// Postsynaptic neuron index
    pub post: &'a str,
    /// Flat synapse index (absent for procedural connectivity)
    pub syn: Option<&'a str>,
}

/// A family member deciding how one synapse group is parallelized
pub trait PresynapticUpdateStrategy: Sync {
    /// Strategy name for diagnostics
    fn name(&self) -> &'static str;

    /// Does this strategy accept the synapse group?
    fn is_compatible(&self, sg: &SynapseGroup) -> bool;

    /// Number of threads the group occupies in the presynaptic kernel
    fn num_threads(&self, model: &Model, sg: &SynapseGroup) -> usize;

    /// Padded length of one presynaptic row
    fn row_stride(&self, model: &Model, sg: &SynapseGroup) -> usize;

    /// Shared-memory words required per thread (1 when the small
    /// population optimization applies, 0 otherwise)
    fn shared_memory_per_thread(
        &self,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
    ) -> usize;

    /// Emit declarations preceding the spike loops
    fn gen_preamble(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        subs: &Substitutions,
    ) -> Result<()>;

    /// Emit the spike loop. Called once for spike-like events
    /// (`true_spike = false`) and once for true spikes.
    fn gen_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        subs: &Substitutions,
        true_spike: bool,
    ) -> Result<()>;

    /// Emit the flush of any register or shared accumulator
    fn gen_postamble(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        subs: &Substitutions,
    ) -> Result<()>;
}

/// Procedural connectivity walked per presynaptic spike
pub struct PreSpanProcedural;
/// Stored sparse rows walked per presynaptic spike
pub struct PreSpan;
/// One thread per postsynaptic target, spikes staged through shared memory
pub struct PostSpan;

static STRATEGIES: [&(dyn PresynapticUpdateStrategy); 3] =
    [&PreSpanProcedural, &PreSpan, &PostSpan];

/// Select the first compatible strategy in fixed order
pub fn select(sg: &SynapseGroup) -> Result<&'static dyn PresynapticUpdateStrategy> {
    STRATEGIES
        .iter()
        .find(|s| s.is_compatible(sg))
        .copied()
        .ok_or_else(|| CodegenError::NoCompatibleStrategy {
            group: sg.name().to_string(),
        })
}

/// Threads required by a synapse group in the presynaptic kernel
pub fn required_threads(model: &Model, sg: &SynapseGroup) -> Result<usize> {
    Ok(select(sg)?.num_threads(model, sg))
}

// ------------------------- Shared emission helpers -------------------------

/// Spike-buffer offset expression for the source population, honoring
/// its delay slot
pub(crate) fn pre_spike_offset(model: &Model, sg: &SynapseGroup) -> String {
    if model.src_neuron_group(sg).is_delay_required() {
        "preReadDelayOffset + ".to_string()
    } else {
        String::new()
    }
}

/// Spike-count slot expression for the source population
pub(crate) fn pre_spike_slot(model: &Model, sg: &SynapseGroup) -> &'static str {
    if model.src_neuron_group(sg).is_delay_required() {
        "preReadDelaySlot"
    } else {
        "0"
    }
}

/// Bind everything weight-update code may reference for the synapse at
/// `idx`, including the `$(addToInSyn)` accumulation dispatch.
#[allow(clippy::too_many_arguments)]
pub(crate) fn add_synapse_substitutions(
    subs: &mut Substitutions,
    model: &Model,
    sg: &SynapseGroup,
    backend: &dyn Backend,
    idx: &SynapseIndices,
    accum: Accumulation,
) {
    let prefix = backend.var_prefix();
    let scalar = model.scalar_type();
    let src = model.src_neuron_group(sg);
    let trg = model.trg_neuron_group(sg);

    subs.add_var("id_pre", idx.pre);
    subs.add_var("id_post", idx.post);
    if let Some(syn) = idx.syn {
        subs.add_var("id_syn", syn);
    }

    // Parameters, derived parameters and extra globals
    subs.add_values(sg.wu_params().iter());
    subs.add_values(sg.wu_derived_params().iter());
    for egp in sg.wu_snippet().extra_global_params() {
        subs.add_var(egp.name.clone(), format!("{}{}{}", prefix, egp.name, sg.name()));
    }

    // Per-synapse weight variables
    for var in sg.wu_snippet().vars() {
        match sg.wu_var_implementation() {
            VarImplementation::Individual => {
                let syn = idx.syn.unwrap_or("0");
                subs.add_var(
                    var.name.clone(),
                    format!("{}{}{}[{}]", prefix, var.name, sg.name(), syn),
                );
            }
            VarImplementation::Global => {
                let value = sg.wu_var_inits()[&var.name]
                    .constant_value()
                    .unwrap_or_default();
                subs.add_var(var.name.clone(), format!("({})", write_precise(value)));
            }
            VarImplementation::Procedural => {
                // PreSpanProcedural declares a register per variable
                subs.add_var(var.name.clone(), format!("l{}", var.name));
            }
        }
    }

    // Per-source and per-target weight-update state
    for var in sg.wu_snippet().pre_vars() {
        subs.add_var(
            var.name.clone(),
            format!("{}{}{}[{}]", prefix, var.name, sg.name(), idx.pre),
        );
    }
    for var in sg.wu_snippet().post_vars() {
        subs.add_var(
            var.name.clone(),
            format!("{}{}{}[{}]", prefix, var.name, sg.name(), idx.post),
        );
    }

    // Pre/postsynaptic neuron state, read through the correct queue slot
    for var in src.snippet().vars() {
        let index = if src.is_var_queue_required(&var.name) && src.is_delay_required() {
            format!("preReadDelayOffset + {}", idx.pre)
        } else {
            idx.pre.to_string()
        };
        subs.add_var(
            format!("{}_pre", var.name),
            format!("{}{}{}[{}]", prefix, var.name, src.name(), index),
        );
    }
    for var in trg.snippet().vars() {
        let index = if trg.is_var_queue_required(&var.name) && trg.is_delay_required() {
            format!("postReadDelayOffset + {}", idx.post)
        } else {
            idx.post.to_string()
        };
        subs.add_var(
            format!("{}_post", var.name),
            format!("{}{}{}[{}]", prefix, var.name, trg.name(), index),
        );
    }
    subs.add_values_suffixed(src.params().iter(), "_pre");
    subs.add_values_suffixed(src.derived_params().iter(), "_pre");
    subs.add_values_suffixed(trg.params().iter(), "_post");
    subs.add_values_suffixed(trg.derived_params().iter(), "_post");

    // Spike times
    if src.is_spike_time_required() {
        let index = if src.is_delay_required() {
            format!("preReadDelayOffset + {}", idx.pre)
        } else {
            idx.pre.to_string()
        };
        subs.add_var("sT_pre", format!("{}sT{}[{}]", prefix, src.name(), index));
    }
    if trg.is_spike_time_required() {
        let index = if trg.is_delay_required() {
            format!("postReadDelayOffset + {}", idx.post)
        } else {
            idx.post.to_string()
        };
        subs.add_var("sT_post", format!("{}sT{}[{}]", prefix, trg.name(), index));
    }

    // Input accumulation dispatch
    let in_syn = format!("{}inSyn{}[{}]", prefix, sg.ps_target(), idx.post);
    match accum {
        Accumulation::DendriticDelay => {
            let den_delay = format!(
                "{p}denDelay{sg}[((( {p}denDelayPtr{sg} + $(1)) % {max}) * {num}) + {post}]",
                p = prefix,
                sg = sg.name(),
                max = sg.max_dendritic_delay_timesteps(),
                num = trg.num_neurons(),
                post = idx.post
            );
            subs.add_func(
                "addToInSynDelay",
                2,
                backend.atomic_add(&den_delay, "$(0)", scalar),
            );
            // Undelayed adds land in slot zero of the ring
            let den_head = format!(
                "{p}denDelay{sg}[(({p}denDelayPtr{sg} % {max}) * {num}) + {post}]",
                p = prefix,
                sg = sg.name(),
                max = sg.max_dendritic_delay_timesteps(),
                num = trg.num_neurons(),
                post = idx.post
            );
            subs.add_func(
                "addToInSyn",
                1,
                backend.atomic_add(&den_head, "$(0)", scalar),
            );
        }
        Accumulation::SharedAtomic => {
            let target = format!("shLg[{}]", idx.post);
            subs.add_func(
                "addToInSyn",
                1,
                backend.atomic_add(&target, "$(0)", scalar),
            );
        }
        Accumulation::Register => {
            subs.add_func("addToInSyn", 1, "linSyn += $(0)");
        }
        Accumulation::GlobalAtomic => {
            subs.add_func("addToInSyn", 1, backend.atomic_add(&in_syn, "$(0)", scalar));
        }
    }
}

/// Resolve and emit one weight-update code role for the synapse at `idx`
#[allow(clippy::too_many_arguments)]
fn emit_weight_update_code(
    os: &mut CodeStream,
    model: &Model,
    sg: &SynapseGroup,
    backend: &dyn Backend,
    parent: &Substitutions,
    idx: &SynapseIndices,
    accum: Accumulation,
    true_spike: bool,
) -> Result<()> {
    let role = if true_spike {
        CodeRole::Sim
    } else {
        CodeRole::Event
    };
    let Some(code) = sg.wu_snippet().code(role) else {
        return Ok(());
    };

    let mut subs = Substitutions::with_parent(parent);
    add_synapse_substitutions(&mut subs, model, sg, backend, idx, accum);

    // Re-test the event condition per synapse when requested and the
    // update is driven by spike-like events
    if !true_spike && sg.is_event_threshold_retest_required() {
        if let Some(threshold) = sg.wu_snippet().code(CodeRole::EventThreshold) {
            let mut cond = threshold.to_string();
            subs.apply_checked(
                &mut cond,
                model.precision(),
                &format!("{}.{}:event_threshold", sg.name(), sg.wu_snippet().name()),
            )?;
            let mut body = code.to_string();
            subs.apply_checked(
                &mut body,
                model.precision(),
                &format!("{}.{}:{}", sg.name(), sg.wu_snippet().name(), role),
            )?;
            os.open(format!("if ({})", cond));
            os.block(&body);
            os.close();
            return Ok(());
        }
    }

    let mut body = code.to_string();
    subs.apply_checked(
        &mut body,
        model.precision(),
        &format!("{}.{}:{}", sg.name(), sg.wu_snippet().name(), role),
    )?;
    os.block(&body);
    Ok(())
}

// ------------------------- PreSpanProcedural -------------------------

impl PresynapticUpdateStrategy for PreSpanProcedural {
    fn name(&self) -> &'static str {
        "PreSpanProcedural"
    }

    fn is_compatible(&self, sg: &SynapseGroup) -> bool {
        sg.matrix_type().is_procedural()
            && matches!(
                sg.wu_var_implementation(),
                VarImplementation::Global | VarImplementation::Procedural
            )
    }

    fn num_threads(&self, model: &Model, sg: &SynapseGroup) -> usize {
        model.src_neuron_group(sg).num_neurons() * sg.threads_per_spike() as usize
    }

    fn row_stride(&self, _model: &Model, sg: &SynapseGroup) -> usize {
        sg.max_connections() as usize
    }

    fn shared_memory_per_thread(
        &self,
        _model: &Model,
        _sg: &SynapseGroup,
        _backend: &dyn Backend,
    ) -> usize {
        0
    }

    fn gen_preamble(
        &self,
        _os: &mut CodeStream,
        _model: &Model,
        _sg: &SynapseGroup,
        _backend: &dyn Backend,
        _subs: &Substitutions,
    ) -> Result<()> {
        Ok(())
    }

    fn gen_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        subs: &Substitutions,
        true_spike: bool,
    ) -> Result<()> {
        let role = if true_spike {
            CodeRole::Sim
        } else {
            CodeRole::Event
        };
        if sg.wu_snippet().code(role).is_none() {
            return Ok(());
        }
        let Some(row_build) = sg.connectivity_init().code() else {
            return Ok(());
        };

        let prefix = backend.var_prefix();
        let src = model.src_neuron_group(sg);
        let tps = sg.threads_per_spike();
        let id = subs.var("id").expect("kernel binds $(id)");
        let (cnt, spk) = if true_spike {
            ("glbSpkCnt", "glbSpk")
        } else {
            ("glbSpkCntEvnt", "glbSpkEvnt")
        };

        os.open("");
        if tps > 1 {
            os.line(format!("const unsigned int spike = {} / {};", id, tps));
            os.line(format!("const unsigned int thread = {} % {};", id, tps));
        } else {
            os.line(format!("const unsigned int spike = {};", id));
        }
        os.open(format!(
            "if (spike < {}{}{}[{}])",
            prefix,
            cnt,
            src.name(),
            pre_spike_slot(model, sg)
        ));
        os.line(format!(
            "const unsigned int preInd = {}{}{}[{}spike];",
            prefix,
            spk,
            src.name(),
            pre_spike_offset(model, sg)
        ));

        // Deterministic per-thread stream for the connectivity rule
        backend.gen_kernel_rng_init(
            os,
            "connRNG",
            &format!("{} + {}", rng_stream_offset(sg.name()), id),
        );

        let mut row_subs = Substitutions::with_parent(subs);
        row_subs.add_var("rng", "&connRNG");
        row_subs.add_values(sg.connectivity_init().params().iter());
        row_subs.add_values(sg.connectivity_init().derived_params().iter());
        row_subs.add_var("num_pre", src.num_neurons().to_string());
        row_subs.add_var(
            "num_post",
            model.trg_neuron_group(sg).num_neurons().to_string(),
        );
        for ft in backend.function_templates() {
            row_subs.add_func(ft.name, ft.arity, ft.template(model.precision()));
        }

        // Procedural weight registers, re-derived per generated synapse
        let mut weight_init = CodeStream::new();
        if sg.wu_var_implementation() == VarImplementation::Procedural {
            for var in sg.wu_snippet().vars() {
                weight_init.line(format!("{} l{};", var.ty, var.name));
                if let Some(init) = sg.wu_var_inits().get(&var.name) {
                    if let Some(code) = init.code() {
                        let mut init_subs = Substitutions::with_parent(&row_subs);
                        init_subs.add_var("value", format!("l{}", var.name));
                        init_subs.add_values(init.params().iter());
                        init_subs.add_values(init.derived_params().iter());
                        let mut body = code.to_string();
                        init_subs.apply_checked(
                            &mut body,
                            model.precision(),
                            &format!("{}.{}:init", sg.name(), init.snippet().name()),
                        )?;
                        weight_init.block(&body);
                    }
                }
            }
        }

        // The weight-update body, fully resolved except for the generated
        // postsynaptic index, becomes the $(addSynapse) template
        let accum = if sg.is_dendritic_delay_required() {
            Accumulation::DendriticDelay
        } else {
            Accumulation::GlobalAtomic
        };
        let mut body_os = CodeStream::new();
        body_os.open("");
        body_os.line("const unsigned int ipost = $(0);");
        body_os.raw(weight_init.as_str());
        {
            let idx = SynapseIndices {
                pre: "preInd",
                post: "ipost",
                syn: None,
            };
            emit_weight_update_code(
                &mut body_os, model, sg, backend, &row_subs, &idx, accum, true_spike,
            )?;
        }
        body_os.close();

        let mut loop_subs = Substitutions::with_parent(&row_subs);
        loop_subs.add_func("addSynapse", 1, body_os.into_string());
        loop_subs.add_func("endRow", 0, "break");
        loop_subs.add_var("id_pre", "preInd");

        for state_var in sg.connectivity_init().snippet().row_build_state_vars() {
            os.line(format!(
                "{} {} = {};",
                state_var.ty, state_var.name, state_var.init
            ));
        }
        if tps > 1 {
            // The row-build rule is sequential; extra row threads idle
            os.open("if (thread == 0)");
        }
        os.open("while (true)");
        let mut row_code = row_build.to_string();
        loop_subs.apply_checked(
            &mut row_code,
            model.precision(),
            &format!(
                "{}.{}:row_build",
                sg.name(),
                sg.connectivity_init().snippet().name()
            ),
        )?;
        os.block(&row_code);
        os.close();
        if tps > 1 {
            os.close();
        }

        os.close();
        os.close();
        Ok(())
    }

    fn gen_postamble(
        &self,
        _os: &mut CodeStream,
        _model: &Model,
        _sg: &SynapseGroup,
        _backend: &dyn Backend,
        _subs: &Substitutions,
    ) -> Result<()> {
        Ok(())
    }
}

// ------------------------- PreSpan -------------------------

impl PresynapticUpdateStrategy for PreSpan {
    fn name(&self) -> &'static str {
        "PreSpan"
    }

    fn is_compatible(&self, sg: &SynapseGroup) -> bool {
        sg.span_type() == SpanType::Presynaptic && sg.matrix_type().is_sparse()
    }

    fn num_threads(&self, model: &Model, sg: &SynapseGroup) -> usize {
        model.src_neuron_group(sg).num_neurons() * sg.threads_per_spike() as usize
    }

    fn row_stride(&self, _model: &Model, sg: &SynapseGroup) -> usize {
        sg.max_connections() as usize
    }

    fn shared_memory_per_thread(
        &self,
        _model: &Model,
        _sg: &SynapseGroup,
        _backend: &dyn Backend,
    ) -> usize {
        0
    }

    fn gen_preamble(
        &self,
        _os: &mut CodeStream,
        _model: &Model,
        _sg: &SynapseGroup,
        _backend: &dyn Backend,
        _subs: &Substitutions,
    ) -> Result<()> {
        Ok(())
    }

    fn gen_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        subs: &Substitutions,
        true_spike: bool,
    ) -> Result<()> {
        let role = if true_spike {
            CodeRole::Sim
        } else {
            CodeRole::Event
        };
        if sg.wu_snippet().code(role).is_none() {
            return Ok(());
        }

        let prefix = backend.var_prefix();
        let src = model.src_neuron_group(sg);
        let tps = sg.threads_per_spike();
        let id = subs.var("id").expect("kernel binds $(id)");
        let (cnt, spk) = if true_spike {
            ("glbSpkCnt", "glbSpk")
        } else {
            ("glbSpkCntEvnt", "glbSpkEvnt")
        };

        os.open("");
        if tps > 1 {
            os.line(format!("const unsigned int spike = {} / {};", id, tps));
            os.line(format!("const unsigned int thread = {} % {};", id, tps));
        } else {
            os.line(format!("const unsigned int spike = {};", id));
        }
        os.open(format!(
            "if (spike < {}{}{}[{}])",
            prefix,
            cnt,
            src.name(),
            pre_spike_slot(model, sg)
        ));
        os.line(format!(
            "const unsigned int preInd = {}{}{}[{}spike];",
            prefix,
            spk,
            src.name(),
            pre_spike_offset(model, sg)
        ));
        os.line(format!(
            "const unsigned int npost = {}rowLength{}[preInd];",
            prefix,
            sg.name()
        ));

        let start = if tps > 1 { "thread" } else { "0" };
        let step = if tps > 1 {
            format!("i += {}", tps)
        } else {
            "i++".to_string()
        };
        os.open(format!(
            "for (unsigned int i = {}; i < npost; {})",
            start, step
        ));
        os.line(format!(
            "const unsigned int synAddress = (preInd * {}) + i;",
            sg.max_connections()
        ));
        os.line(format!(
            "const unsigned int ipost = {}ind{}[synAddress];",
            prefix,
            sg.name()
        ));

        let accum = if sg.is_dendritic_delay_required() {
            Accumulation::DendriticDelay
        } else {
            Accumulation::GlobalAtomic
        };
        let idx = SynapseIndices {
            pre: "preInd",
            post: "ipost",
            syn: Some("synAddress"),
        };
        emit_weight_update_code(os, model, sg, backend, subs, &idx, accum, true_spike)?;

        os.close();
        os.close();
        os.close();
        Ok(())
    }

    fn gen_postamble(
        &self,
        _os: &mut CodeStream,
        _model: &Model,
        _sg: &SynapseGroup,
        _backend: &dyn Backend,
        _subs: &Substitutions,
    ) -> Result<()> {
        Ok(())
    }
}

// ------------------------- PostSpan -------------------------

impl PostSpan {
    /// Decide the accumulation path for the group, in specification
    /// order: dendritic delay, shared accumulator, dense register,
    /// global atomic fallback.
    fn accumulation(
        &self,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
    ) -> Accumulation {
        if sg.is_dendritic_delay_required() {
            Accumulation::DendriticDelay
        } else if self.shared_memory_per_thread(model, sg, backend) > 0 {
            Accumulation::SharedAtomic
        } else if sg.matrix_type().connectivity() == MatrixConnectivity::Dense {
            Accumulation::Register
        } else {
            Accumulation::GlobalAtomic
        }
    }
}

impl PresynapticUpdateStrategy for PostSpan {
    fn name(&self) -> &'static str {
        "PostSpan"
    }

    fn is_compatible(&self, sg: &SynapseGroup) -> bool {
        sg.span_type() == SpanType::Postsynaptic && !sg.matrix_type().is_procedural()
    }

    fn num_threads(&self, model: &Model, sg: &SynapseGroup) -> usize {
        if sg.matrix_type().is_sparse() {
            sg.max_connections() as usize
        } else {
            model.trg_neuron_group(sg).num_neurons()
        }
    }

    fn row_stride(&self, model: &Model, sg: &SynapseGroup) -> usize {
        if sg.matrix_type().is_sparse() {
            sg.max_connections() as usize
        } else {
            model.trg_neuron_group(sg).num_neurons()
        }
    }

    fn shared_memory_per_thread(
        &self,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
    ) -> usize {
        let small = model.trg_neuron_group(sg).num_neurons()
            <= backend.kernel_block_size(Kernel::PresynapticUpdate);
        if backend.supports_shared_memory_atomics()
            && !sg.is_dendritic_delay_required()
            && small
        {
            1
        } else {
            0
        }
    }

    fn gen_preamble(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        _subs: &Substitutions,
    ) -> Result<()> {
        match self.accumulation(model, sg, backend) {
            Accumulation::Register => {
                os.line(format!("{} linSyn = 0;", model.scalar_type()));
            }
            Accumulation::SharedAtomic => {
                let trg = model.trg_neuron_group(sg);
                os.open(format!(
                    "if ({} < {})",
                    backend.local_thread_index(),
                    trg.num_neurons()
                ));
                os.line(format!("shLg[{}] = 0;", backend.local_thread_index()));
                os.close();
                backend.gen_barrier(os);
            }
            _ => {}
        }
        Ok(())
    }

    fn gen_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        subs: &Substitutions,
        true_spike: bool,
    ) -> Result<()> {
        let role = if true_spike {
            CodeRole::Sim
        } else {
            CodeRole::Event
        };
        if sg.wu_snippet().code(role).is_none() {
            return Ok(());
        }

        let prefix = backend.var_prefix();
        let src = model.src_neuron_group(sg);
        let block = backend.kernel_block_size(Kernel::PresynapticUpdate);
        let ti = backend.local_thread_index();
        let id = subs.var("id").expect("kernel binds $(id)").to_string();
        let (cnt, spk, sh) = if true_spike {
            ("glbSpkCnt", "glbSpk", "shSpk")
        } else {
            ("glbSpkCntEvnt", "glbSpkEvnt", "shSpkEvnt")
        };

        os.open("");
        os.line(format!(
            "const unsigned int numSpikes = {}{}{}[{}];",
            prefix,
            cnt,
            src.name(),
            pre_spike_slot(model, sg)
        ));
        os.line(format!(
            "const unsigned int numSpikeBlocks = (numSpikes + {block} - 1) / {block};",
            block = block
        ));
        os.open("for (unsigned int r = 0; r < numSpikeBlocks; r++)");
        backend.gen_barrier(os);
        os.line(format!(
            "const unsigned int numSpikesInBlock = (r == numSpikeBlocks - 1) ? ((numSpikes - 1) % {block}) + 1 : {block};",
            block = block
        ));
        // Coalesce this block of spike indices into shared memory
        os.open(format!("if ({} < numSpikesInBlock)", ti));
        os.line(format!(
            "{sh}[{ti}] = {p}{spk}{src}[{off}(r * {block}) + {ti}];",
            sh = sh,
            ti = ti,
            p = prefix,
            spk = spk,
            src = src.name(),
            off = pre_spike_offset(model, sg),
            block = block
        ));
        os.close();
        backend.gen_barrier(os);

        os.line("// Process spikes staged in shared memory");
        os.open("for (unsigned int j = 0; j < numSpikesInBlock; j++)");
        os.open(format!("if ({} < {})", id, self.row_stride(model, sg)));

        let accum = self.accumulation(model, sg, backend);
        let pre = format!("{}[j]", sh);
        match sg.matrix_type().connectivity() {
            MatrixConnectivity::Sparse => {
                os.line(format!(
                    "const unsigned int npost = {}rowLength{}[{}];",
                    prefix,
                    sg.name(),
                    pre
                ));
                os.open(format!("if ({} < npost)", id));
                os.line(format!(
                    "const unsigned int synAddress = ({} * {}) + {};",
                    pre,
                    sg.max_connections(),
                    id
                ));
                os.line(format!(
                    "const unsigned int ipost = {}ind{}[synAddress];",
                    prefix,
                    sg.name()
                ));
                let idx = SynapseIndices {
                    pre: &pre,
                    post: "ipost",
                    syn: Some("synAddress"),
                };
                emit_weight_update_code(os, model, sg, backend, subs, &idx, accum, true_spike)?;
                os.close();
            }
            MatrixConnectivity::Bitmask => {
                os.line(format!(
                    "const unsigned long long gid = ({} * {}ull) + {};",
                    pre,
                    self.row_stride(model, sg),
                    id
                ));
                os.open(format!(
                    "if ({}gp{}[gid / 32] & (0x80000000 >> (gid & 31)))",
                    prefix,
                    sg.name()
                ));
                let idx = SynapseIndices {
                    pre: &pre,
                    post: &id,
                    syn: None,
                };
                emit_weight_update_code(os, model, sg, backend, subs, &idx, accum, true_spike)?;
                os.close();
            }
            MatrixConnectivity::Dense => {
                os.line(format!(
                    "const unsigned int synAddress = ({} * {}) + {};",
                    pre,
                    self.row_stride(model, sg),
                    id
                ));
                let idx = SynapseIndices {
                    pre: &pre,
                    post: &id,
                    syn: Some("synAddress"),
                };
                emit_weight_update_code(os, model, sg, backend, subs, &idx, accum, true_spike)?;
            }
            MatrixConnectivity::Procedural => unreachable!("gated by is_compatible"),
        }

        os.close();
        os.close();
        os.close();
        os.close();
        Ok(())
    }

    fn gen_postamble(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        backend: &dyn Backend,
        subs: &Substitutions,
    ) -> Result<()> {
        let prefix = backend.var_prefix();
        let scalar = model.scalar_type();
        let id = subs.var("id").expect("kernel binds $(id)");
        match self.accumulation(model, sg, backend) {
            Accumulation::Register => {
                let trg = model.trg_neuron_group(sg);
                os.open(format!("if ({} < {})", id, trg.num_neurons()));
                let target = format!("{}inSyn{}[{}]", prefix, sg.ps_target(), id);
                if sg.is_ps_model_merged() {
                    os.line(format!(
                        "{};",
                        backend.atomic_add(&target, "linSyn", scalar)
                    ));
                } else {
                    os.line(format!("{} += linSyn;", target));
                }
                os.close();
            }
            Accumulation::SharedAtomic => {
                let trg = model.trg_neuron_group(sg);
                let ti = backend.local_thread_index();
                backend.gen_barrier(os);
                os.open(format!("if ({} < {})", ti, trg.num_neurons()));
                let target = format!("{}inSyn{}[{}]", prefix, sg.ps_target(), ti);
                let value = format!("shLg[{}]", ti);
                if sg.is_ps_model_merged() {
                    os.line(format!("{};", backend.atomic_add(&target, &value, scalar)));
                } else {
                    os.line(format!("{} += {};", target, value));
                }
                os.close();
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sngen_model::{
        MatrixType, PostsynapticInit, Snippet, SparseConnectivityInit, VarInit, WeightUpdateInit,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn model_with(matrix: MatrixType, span: SpanType) -> Model {
        let lif = Arc::new(
            Snippet::new("LIF")
                .with_var("V", "scalar")
                .with_code(CodeRole::Sim, "$(V) += $(Isyn) * DT;")
                .with_code(CodeRole::Threshold, "$(V) >= -50.0"),
        );
        let wu = Arc::new(
            Snippet::new("StaticPulse")
                .with_var("g", "scalar")
                .with_code(CodeRole::Sim, "$(addToInSyn, $(g));"),
        );
        let psm = Arc::new(
            Snippet::new("DeltaCurr").with_code(CodeRole::ApplyInput, "$(Isyn) += $(inSyn);"),
        );

        let mut model = Model::new("strategies");
        model
            .add_neuron_population("Pre", 32, Arc::clone(&lif), BTreeMap::new(), BTreeMap::new(), 0)
            .unwrap();
        model
            .add_neuron_population("Post", 16, lif, BTreeMap::new(), BTreeMap::new(), 0)
            .unwrap();
        let mut wu_init = WeightUpdateInit::new(wu, BTreeMap::new());
        if matrix.has_individual_weights() || matrix.weight() == sngen_model::MatrixWeight::Global
        {
            wu_init = wu_init.with_var_init("g", VarInit::constant(0.25));
        }
        model
            .add_synapse_population(
                "Syn",
                matrix,
                0,
                "Pre",
                "Post",
                wu_init,
                PostsynapticInit::new(psm, BTreeMap::new()),
                SparseConnectivityInit::uninitialised(),
            )
            .unwrap();
        model.synapse_group_mut("Syn").unwrap().set_span_type(span);
        model.finalize().unwrap();
        model
    }

    #[test]
    fn test_postspan_selected_for_sparse_postsynaptic() {
        let model = model_with(MatrixType::SPARSE_INDIVIDUAL, SpanType::Postsynaptic);
        let sg = model.synapse_group("Syn").unwrap();
        assert_eq!(select(sg).unwrap().name(), "PostSpan");
    }

    #[test]
    fn test_prespan_selected_for_sparse_presynaptic() {
        let model = model_with(MatrixType::SPARSE_INDIVIDUAL, SpanType::Presynaptic);
        let sg = model.synapse_group("Syn").unwrap();
        assert_eq!(select(sg).unwrap().name(), "PreSpan");
    }

    #[test]
    fn test_prespan_procedural_selected_for_procedural() {
        let model = model_with(MatrixType::PROCEDURAL_GLOBAL, SpanType::Postsynaptic);
        let sg = model.synapse_group("Syn").unwrap();
        assert_eq!(select(sg).unwrap().name(), "PreSpanProcedural");
    }

    #[test]
    fn test_no_strategy_for_dense_presynaptic() {
        let model = model_with(MatrixType::DENSE_INDIVIDUAL, SpanType::Presynaptic);
        let sg = model.synapse_group("Syn").unwrap();
        assert!(matches!(
            select(sg),
            Err(CodegenError::NoCompatibleStrategy { .. })
        ));
    }

    #[test]
    fn test_thread_counts() {
        let model = model_with(MatrixType::SPARSE_INDIVIDUAL, SpanType::Presynaptic);
        let sg = model.synapse_group("Syn").unwrap();
        // One thread per source neuron, times threads-per-spike
        assert_eq!(PreSpan.num_threads(&model, sg), 32);

        let model = model_with(MatrixType::DENSE_INDIVIDUAL, SpanType::Postsynaptic);
        let sg = model.synapse_group("Syn").unwrap();
        // One thread per postsynaptic target
        assert_eq!(PostSpan.num_threads(&model, sg), 16);
    }
}
