//! Synapse update kernel generation.
//!
//! For each synapse group: select a presynaptic strategy, emit its
//! preamble, its spike-like-event and true-spike loops, and its
//! postamble. Groups with postsynaptic learning or per-timestep synapse
//! dynamics get bodies in the corresponding kernels.

use std::fmt;

use sngen_model::{CodeRole, MatrixConnectivity, Model, SynapseGroup};

use crate::backend::{Backend, SynapseUpdateHandlers};
use crate::error::Result;
use crate::presynaptic::{
    self, add_synapse_substitutions, Accumulation, SynapseIndices,
};
use crate::stream::CodeStream;
use crate::substitutions::Substitutions;

/// Generate the synapse update artifact into `out`
pub fn generate_synapse_update(
    out: &mut dyn fmt::Write,
    model: &Model,
    backend: &dyn Backend,
) -> Result<()> {
    let mut os = CodeStream::new();
    let mut presyn = |os: &mut CodeStream, sg: &SynapseGroup, subs: &Substitutions| {
        gen_presynaptic_body(os, model, backend, sg, subs)
    };
    let mut learn = |os: &mut CodeStream, sg: &SynapseGroup, subs: &Substitutions| {
        gen_learn_post_body(os, model, backend, sg, subs)
    };
    let mut dynamics = |os: &mut CodeStream, sg: &SynapseGroup, subs: &Substitutions| {
        gen_dynamics_body(os, model, backend, sg, subs)
    };
    let mut handlers = SynapseUpdateHandlers {
        presynaptic: &mut presyn,
        postsynaptic_learning: &mut learn,
        synapse_dynamics: &mut dynamics,
    };
    backend.gen_synapse_update(&mut os, model, &mut handlers)?;
    write!(out, "{}", os)?;
    Ok(())
}

/// Threads the postsynaptic learning kernel assigns to a group
pub fn learn_post_threads(model: &Model, sg: &SynapseGroup) -> usize {
    model.src_neuron_group(sg).num_neurons()
}

/// Threads the synapse dynamics kernel assigns to a group
pub fn dynamics_threads(model: &Model, sg: &SynapseGroup) -> usize {
    let num_pre = model.src_neuron_group(sg).num_neurons();
    if sg.matrix_type().is_sparse() {
        num_pre * sg.max_connections() as usize
    } else {
        num_pre * model.trg_neuron_group(sg).num_neurons()
    }
}

/// Emit the read-slot declarations for delayed source/target populations
fn gen_delay_offsets(os: &mut CodeStream, model: &Model, backend: &dyn Backend, sg: &SynapseGroup) {
    let prefix = backend.var_prefix();
    let src = model.src_neuron_group(sg);
    if src.is_delay_required() {
        let slots = src.num_delay_slots();
        os.line(format!(
            "const unsigned int preReadDelaySlot = ({}spkQuePtr{} + {}) % {};",
            prefix,
            src.name(),
            slots as u32 - sg.delay_steps(),
            slots
        ));
        os.line(format!(
            "const unsigned int preReadDelayOffset = preReadDelaySlot * {};",
            src.num_neurons()
        ));
    }
    let trg = model.trg_neuron_group(sg);
    if trg.is_delay_required() {
        let slots = trg.num_delay_slots();
        os.line(format!(
            "const unsigned int postReadDelaySlot = ({}spkQuePtr{} + {}) % {};",
            prefix,
            trg.name(),
            slots as u32 - sg.back_prop_delay_steps(),
            slots
        ));
        os.line(format!(
            "const unsigned int postReadDelayOffset = postReadDelaySlot * {};",
            trg.num_neurons()
        ));
    }
}

fn gen_presynaptic_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    subs: &Substitutions,
) -> Result<()> {
    let strategy = presynaptic::select(sg)?;
    log::debug!(
        "Synapse group '{}' dispatched to {} strategy",
        sg.name(),
        strategy.name()
    );

    gen_delay_offsets(os, model, backend, sg);
    strategy.gen_preamble(os, model, sg, backend, subs)?;
    if sg.is_spike_event_required() {
        os.line("// process spike-like events");
        strategy.gen_update(os, model, sg, backend, subs, false)?;
    }
    if sg.is_true_spike_required() {
        os.line("// process true spikes");
        strategy.gen_update(os, model, sg, backend, subs, true)?;
    }
    strategy.gen_postamble(os, model, sg, backend, subs)?;
    Ok(())
}

fn gen_learn_post_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    subs: &Substitutions,
) -> Result<()> {
    let Some(code) = sg.wu_snippet().code(CodeRole::LearnPost) else {
        return Ok(());
    };
    let prefix = backend.var_prefix();
    let trg = model.trg_neuron_group(sg);
    let id = subs.var("id").expect("kernel binds $(id)").to_string();

    gen_delay_offsets(os, model, backend, sg);

    let (slot, offset) = if trg.is_delay_required() {
        ("postReadDelaySlot", "postReadDelayOffset + ")
    } else {
        ("0", "")
    };
    os.line(format!(
        "const unsigned int numSpikes = {}glbSpkCnt{}[{}];",
        prefix,
        trg.name(),
        slot
    ));
    os.open("for (unsigned int j = 0; j < numSpikes; j++)");
    os.line(format!(
        "const unsigned int ipost = {}glbSpk{}[{}j];",
        prefix,
        trg.name(),
        offset
    ));
    os.line(format!(
        "const unsigned int synAddress = ({} * {}) + ipost;",
        id,
        trg.num_neurons()
    ));

    let mut frame = Substitutions::with_parent(subs);
    let idx = SynapseIndices {
        pre: &id,
        post: "ipost",
        syn: Some("synAddress"),
    };
    add_synapse_substitutions(
        &mut frame,
        model,
        sg,
        backend,
        &idx,
        Accumulation::GlobalAtomic,
    );
    let mut body = code.to_string();
    frame.apply_checked(
        &mut body,
        model.precision(),
        &format!("{}.{}:learn_post", sg.name(), sg.wu_snippet().name()),
    )?;
    os.block(&body);
    os.close();
    Ok(())
}

fn gen_dynamics_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    subs: &Substitutions,
) -> Result<()> {
    let Some(code) = sg.wu_snippet().code(CodeRole::SynapseDynamics) else {
        return Ok(());
    };
    let prefix = backend.var_prefix();
    let trg = model.trg_neuron_group(sg);
    let id = subs.var("id").expect("kernel binds $(id)").to_string();

    gen_delay_offsets(os, model, backend, sg);

    let accum = if sg.is_dendritic_delay_required() {
        Accumulation::DendriticDelay
    } else {
        Accumulation::GlobalAtomic
    };

    match sg.matrix_type().connectivity() {
        MatrixConnectivity::Sparse => {
            let stride = sg.max_connections();
            os.line(format!("const unsigned int ipre = {} / {};", id, stride));
            os.line(format!("const unsigned int icol = {} % {};", id, stride));
            os.open(format!(
                "if (icol < {}rowLength{}[ipre])",
                prefix,
                sg.name()
            ));
            os.line(format!(
                "const unsigned int ipost = {}ind{}[{}];",
                prefix,
                sg.name(),
                id
            ));
            let mut frame = Substitutions::with_parent(subs);
            let idx = SynapseIndices {
                pre: "ipre",
                post: "ipost",
                syn: Some(&id),
            };
            add_synapse_substitutions(&mut frame, model, sg, backend, &idx, accum);
            let mut body = code.to_string();
            frame.apply_checked(
                &mut body,
                model.precision(),
                &format!("{}.{}:synapse_dynamics", sg.name(), sg.wu_snippet().name()),
            )?;
            os.block(&body);
            os.close();
        }
        _ => {
            let num_trg = trg.num_neurons();
            os.line(format!("const unsigned int ipre = {} / {};", id, num_trg));
            os.line(format!("const unsigned int ipost = {} % {};", id, num_trg));
            let mut frame = Substitutions::with_parent(subs);
            let idx = SynapseIndices {
                pre: "ipre",
                post: "ipost",
                syn: Some(&id),
            };
            add_synapse_substitutions(&mut frame, model, sg, backend, &idx, accum);
            let mut body = code.to_string();
            frame.apply_checked(
                &mut body,
                model.precision(),
                &format!("{}.{}:synapse_dynamics", sg.name(), sg.wu_snippet().name()),
            )?;
            os.block(&body);
        }
    }
    Ok(())
}
