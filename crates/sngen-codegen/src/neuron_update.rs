//! Neuron update kernel generation.
//!
//! Emits, through the backend, a pre-reset kernel (delay queue pointer
//! advance, spike count zeroing) and the update kernel: register pull,
//! merged input accumulation, current sources, sim code, auto-refractory
//! threshold, spike / spike-like-event emission, write-back and
//! postsynaptic decay.

use std::fmt;

use sngen_model::{CodeRole, Model, NeuronGroup, VarAccess};

use crate::backend::{Backend, NeuronUpdateHandlers};
use crate::error::Result;
use crate::stream::CodeStream;
use crate::substitutions::Substitutions;

/// Generate the neuron update artifact into `out`
pub fn generate_neuron_update(
    out: &mut dyn fmt::Write,
    model: &Model,
    backend: &dyn Backend,
) -> Result<()> {
    let mut os = CodeStream::new();
    let mut sim = |os: &mut CodeStream, ng: &NeuronGroup, subs: &Substitutions| {
        gen_neuron_body(os, model, backend, ng, subs)
    };
    let mut handlers = NeuronUpdateHandlers { sim: &mut sim };
    backend.gen_neuron_update(&mut os, model, &mut handlers)?;
    write!(out, "{}", os)?;
    Ok(())
}

fn gen_neuron_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    ng: &NeuronGroup,
    parent: &Substitutions,
) -> Result<()> {
    let prefix = backend.var_prefix();
    let scalar = model.scalar_type();
    let precision = model.precision();
    let id = parent.var("id").expect("kernel binds $(id)").to_string();

    let mut subs = Substitutions::with_parent(parent);
    for ft in backend.function_templates() {
        subs.add_func(ft.name, ft.arity, ft.template(precision));
    }
    if ng.is_sim_rng_required() {
        subs.add_var("rng", backend.population_rng_state(ng.name(), &id));
    }

    // Queue offsets for delayed populations
    if ng.is_delay_required() {
        let slots = ng.num_delay_slots();
        os.line(format!(
            "const unsigned int readDelaySlot = ({}spkQuePtr{} + {}) % {};",
            prefix,
            ng.name(),
            slots - 1,
            slots
        ));
        os.line(format!(
            "const unsigned int readDelayOffset = readDelaySlot * {};",
            ng.num_neurons()
        ));
        os.line(format!(
            "const unsigned int writeDelayOffset = {}spkQuePtr{} * {};",
            prefix,
            ng.name(),
            ng.num_neurons()
        ));
        os.blank();
    }

    // Pull neuron state into registers
    for var in ng.snippet().vars() {
        let index = if ng.is_var_queue_required(&var.name) {
            format!("readDelayOffset + {}", id)
        } else {
            id.clone()
        };
        os.line(format!(
            "{} l{} = {}{}{}[{}];",
            var.ty,
            var.name,
            prefix,
            var.name,
            ng.name(),
            index
        ));
        subs.add_var(var.name.clone(), format!("l{}", var.name));
    }
    if ng.is_spike_time_required() {
        let index = if ng.is_delay_required() {
            format!("readDelayOffset + {}", id)
        } else {
            id.clone()
        };
        os.line(format!(
            "const {} lsT = {}sT{}[{}];",
            model.time_type(),
            prefix,
            ng.name(),
            index
        ));
        subs.add_var("sT", "lsT");
    }
    os.blank();

    subs.add_values(ng.params().iter());
    subs.add_values(ng.derived_params().iter());
    for egp in ng.snippet().extra_global_params() {
        subs.add_var(
            egp.name.clone(),
            format!("{}{}{}", prefix, egp.name, ng.name()),
        );
    }

    os.line(format!("{} Isyn = 0;", scalar));
    subs.add_var("Isyn", "Isyn");

    // Accumulate merged synaptic input
    for merged in ng.merged_in_syn() {
        let sg = model
            .synapse_group(&merged.target)
            .expect("merged targets come from the registry");
        let psm = sg.ps_snippet();

        os.line(format!(
            "{} linSyn{} = {}inSyn{}[{}];",
            scalar,
            sg.name(),
            prefix,
            sg.name(),
            id
        ));
        if sg.is_dendritic_delay_required() {
            os.open("");
            os.line(format!(
                "const unsigned int denDelayOffset = ({}denDelayPtr{} % {}) * {};",
                prefix,
                sg.name(),
                sg.max_dendritic_delay_timesteps(),
                ng.num_neurons()
            ));
            os.line(format!(
                "linSyn{} += {}denDelay{}[denDelayOffset + {}];",
                sg.name(),
                prefix,
                sg.name(),
                id
            ));
            os.line(format!(
                "{}denDelay{}[denDelayOffset + {}] = 0;",
                prefix,
                sg.name(),
                id
            ));
            os.close();
        }

        if let Some(code) = psm.code(CodeRole::ApplyInput) {
            let mut psm_subs = psm_frame(&subs, backend, sg, &id);
            let mut body = code.to_string();
            psm_subs.apply_checked(
                &mut body,
                precision,
                &format!("{}.{}:apply_input", sg.name(), psm.name()),
            )?;
            os.block(&body);
        }
    }
    os.blank();

    // Current sources
    for cs_name in ng.current_sources() {
        let cs = model
            .current_source(cs_name)
            .expect("current sources come from the registry");
        os.line(format!("// current source {}", cs_name));
        let mut cs_subs = Substitutions::with_parent(&subs);
        cs_subs.add_func("injectCurrent", 1, "Isyn += $(0)");
        for var in cs.snippet().vars() {
            cs_subs.add_var(
                var.name.clone(),
                format!("{}{}{}[{}]", prefix, var.name, cs.name(), id),
            );
        }
        cs_subs.add_values(cs.params().iter());
        cs_subs.add_values(cs.derived_params().iter());
        for egp in cs.snippet().extra_global_params() {
            cs_subs.add_var(
                egp.name.clone(),
                format!("{}{}{}", prefix, egp.name, cs.name()),
            );
        }
        if let Some(code) = cs.injection_code() {
            let mut body = code.to_string();
            cs_subs.apply_checked(
                &mut body,
                precision,
                &format!("{}.{}:injection", cs.name(), cs.snippet().name()),
            )?;
            os.block(&body);
        }
    }

    // Threshold condition, memoized before sim for auto-refractory
    let threshold = match ng.snippet().code(CodeRole::Threshold) {
        Some(code) => {
            let mut cond = code.to_string();
            subs.apply_checked(
                &mut cond,
                precision,
                &format!("{}.{}:threshold", ng.name(), ng.snippet().name()),
            )?;
            Some(cond)
        }
        None => {
            log::warn!(
                "Neuron group '{}' has no threshold condition; treating it as spike-free",
                ng.name()
            );
            None
        }
    };
    if let Some(cond) = &threshold {
        os.line(format!("const bool oldSpike = ({});", cond));
    }
    os.blank();

    // Neuron dynamics
    if let Some(code) = ng.snippet().code(CodeRole::Sim) {
        let mut body = code.to_string();
        subs.apply_checked(
            &mut body,
            precision,
            &format!("{}.{}:sim", ng.name(), ng.snippet().name()),
        )?;
        os.block(&body);
    }

    // Spike-like events: OR over all outgoing event conditions
    if ng.is_spike_event_required() {
        os.blank();
        os.line("bool spikeLikeEvent = false;");
        for sg_name in ng.out_syn() {
            let sg = model
                .synapse_group(sg_name)
                .expect("outgoing edges come from the registry");
            let Some(code) = sg.wu_snippet().code(CodeRole::EventThreshold) else {
                continue;
            };
            let mut et_subs = Substitutions::with_parent(&subs);
            et_subs.add_var("id_pre", id.clone());
            for var in ng.snippet().vars() {
                et_subs.add_var(format!("{}_pre", var.name), format!("l{}", var.name));
            }
            if ng.is_spike_time_required() {
                et_subs.add_var("sT_pre", "lsT");
            }
            et_subs.add_values(sg.wu_params().iter());
            et_subs.add_values(sg.wu_derived_params().iter());
            for egp in sg.wu_snippet().extra_global_params() {
                et_subs.add_var(
                    egp.name.clone(),
                    format!("{}{}{}", prefix, egp.name, sg.name()),
                );
            }
            let mut cond = code.to_string();
            et_subs.apply_checked(
                &mut cond,
                precision,
                &format!("{}.{}:event_threshold", sg.name(), sg.wu_snippet().name()),
            )?;
            os.line(format!("spikeLikeEvent |= ({});", cond));
        }
        os.open("if (spikeLikeEvent)");
        backend.gen_emit_spike_like_event(os, model, ng, &subs)?;
        os.close();
    }

    // True spike: test, emit, reset
    if let Some(cond) = &threshold {
        os.blank();
        os.open(format!("if (({}) && !(oldSpike))", cond));
        backend.gen_emit_true_spike(os, model, ng, &subs)?;
        if let Some(code) = ng.snippet().code(CodeRole::Reset) {
            let mut body = code.to_string();
            subs.apply_checked(
                &mut body,
                precision,
                &format!("{}.{}:reset", ng.name(), ng.snippet().name()),
            )?;
            os.block(&body);
        }
        os.close();
    }
    os.blank();

    // Write registers back, through the write-delay offset where queued
    for var in ng.snippet().vars() {
        if var.access != VarAccess::ReadWrite {
            continue;
        }
        let index = if ng.is_var_queue_required(&var.name) {
            format!("writeDelayOffset + {}", id)
        } else {
            id.clone()
        };
        os.line(format!(
            "{}{}{}[{}] = l{};",
            prefix,
            var.name,
            ng.name(),
            index,
            var.name
        ));
    }

    // Postsynaptic decay and input write-back
    for merged in ng.merged_in_syn() {
        let sg = model
            .synapse_group(&merged.target)
            .expect("merged targets come from the registry");
        let psm = sg.ps_snippet();
        if let Some(code) = psm.code(CodeRole::Decay) {
            let mut psm_subs = psm_frame(&subs, backend, sg, &id);
            let mut body = code.to_string();
            psm_subs.apply_checked(
                &mut body,
                precision,
                &format!("{}.{}:decay", sg.name(), psm.name()),
            )?;
            os.block(&body);
        }
        os.line(format!(
            "{}inSyn{}[{}] = linSyn{};",
            prefix,
            sg.name(),
            id,
            sg.name()
        ));
    }

    Ok(())
}

/// Bindings shared by the apply-input and decay code of one postsynaptic
/// model instance
fn psm_frame<'p>(
    parent: &'p Substitutions<'p>,
    backend: &dyn Backend,
    sg: &sngen_model::SynapseGroup,
    id: &str,
) -> Substitutions<'p> {
    let prefix = backend.var_prefix();
    let mut subs = Substitutions::with_parent(parent);
    subs.add_var("inSyn", format!("linSyn{}", sg.name()));
    for var in sg.ps_snippet().vars() {
        subs.add_var(
            var.name.clone(),
            format!("{}{}{}[{}]", prefix, var.name, sg.name(), id),
        );
    }
    subs.add_values(sg.ps_params().iter());
    subs.add_values(sg.ps_derived_params().iter());
    for egp in sg.ps_snippet().extra_global_params() {
        subs.add_var(
            egp.name.clone(),
            format!("{}{}{}", prefix, egp.name, sg.name()),
        );
    }
    subs
}
