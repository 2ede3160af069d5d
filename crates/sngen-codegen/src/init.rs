//! Initialization kernel generation.
//!
//! Zeroes spike counts and buffers (one slot per delay step), seeds
//! spike times with the `-TIME_MAX` sentinel, runs every individual
//! variable's initializer snippet, seeds RNG state and builds sparse
//! connectivity through the row-build driver loop.

use std::fmt;

use sngen_model::{
    MatrixConnectivity, Model, NeuronGroup, SynapseGroup, VarImplementation, VarInit,
};

use crate::backend::{rng_stream_offset, Backend, InitHandlers};
use crate::error::Result;
use crate::stream::CodeStream;
use crate::substitutions::Substitutions;

/// Generate the initialization artifact into `out`
pub fn generate_init(out: &mut dyn fmt::Write, model: &Model, backend: &dyn Backend) -> Result<()> {
    let mut os = CodeStream::new();
    let mut neuron = |os: &mut CodeStream, ng: &NeuronGroup, subs: &Substitutions| {
        gen_neuron_init_body(os, model, backend, ng, subs)
    };
    let mut dense = |os: &mut CodeStream, sg: &SynapseGroup, subs: &Substitutions| {
        gen_dense_synapse_init_body(os, model, backend, sg, subs)
    };
    let mut connectivity = |os: &mut CodeStream, sg: &SynapseGroup, subs: &Substitutions| {
        gen_sparse_connectivity_body(os, model, backend, sg, subs)
    };
    let mut sparse_vars = |os: &mut CodeStream, sg: &SynapseGroup, subs: &Substitutions| {
        gen_sparse_var_init_body(os, model, backend, sg, subs)
    };
    let mut handlers = InitHandlers {
        neuron_group: &mut neuron,
        dense_synapse_group: &mut dense,
        sparse_connectivity: &mut connectivity,
        sparse_synapse_group: &mut sparse_vars,
    };
    backend.gen_init(&mut os, model, &mut handlers)?;
    write!(out, "{}", os)?;
    Ok(())
}

/// Emit one initializer snippet writing `$(value)` into every target
/// expression. No code means the variable stays uninitialized.
fn emit_var_init(
    os: &mut CodeStream,
    model: &Model,
    parent: &Substitutions,
    init: &VarInit,
    ty: &str,
    targets: &[String],
    context: &str,
) -> Result<()> {
    let Some(code) = init.code() else {
        return Ok(());
    };
    os.open("");
    os.line(format!("{} initVal;", ty));
    let mut subs = Substitutions::with_parent(parent);
    subs.add_var("value", "initVal");
    subs.add_values(init.params().iter());
    subs.add_values(init.derived_params().iter());
    let mut body = code.to_string();
    subs.apply_checked(&mut body, model.precision(), context)?;
    os.block(&body);
    for target in targets {
        os.line(format!("{} = initVal;", target));
    }
    os.close();
    Ok(())
}

/// Frame binding the RNG primitives for init-time randomness
fn init_frame<'p>(
    parent: &'p Substitutions<'p>,
    model: &Model,
    backend: &dyn Backend,
    rng_required: bool,
) -> Substitutions<'p> {
    let mut subs = Substitutions::with_parent(parent);
    for ft in backend.function_templates() {
        subs.add_func(ft.name, ft.arity, ft.template(model.precision()));
    }
    if rng_required {
        subs.add_var("rng", "&initRNG");
    }
    subs
}

fn gen_neuron_init_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    ng: &NeuronGroup,
    parent: &Substitutions,
) -> Result<()> {
    let prefix = backend.var_prefix();
    let id = parent.var("id").expect("kernel binds $(id)").to_string();
    let slots = ng.num_delay_slots();
    let n = ng.num_neurons();

    // Queue pointers and spike counts are population-wide
    backend.gen_pop_variable_init(os, parent, &mut |os, _subs| {
        if ng.is_delay_required() {
            os.line(format!("{}spkQuePtr{} = 0;", prefix, ng.name()));
        }
        os.open(format!("for (unsigned int d = 0; d < {}; d++)", slots));
        os.line(format!("{}glbSpkCnt{}[d] = 0;", prefix, ng.name()));
        if ng.is_spike_event_required() {
            os.line(format!("{}glbSpkCntEvnt{}[d] = 0;", prefix, ng.name()));
        }
        os.close();
        Ok(())
    })?;

    // Initialization randomness can come from the neuron's own
    // initializers, its current sources, or the per-neuron state of
    // adjacent synapse groups initialized alongside it
    let init_rng = ng.is_init_rng_required()
        || ng
            .current_sources()
            .iter()
            .any(|cs| model.current_source(cs).is_some_and(|c| c.is_init_rng_required()))
        || ng.in_syn().iter().any(|name| {
            model.synapse_group(name).is_some_and(|sg| {
                sg.ps_var_inits()
                    .values()
                    .chain(sg.wu_post_var_inits().values())
                    .any(|i| i.requires_rng())
            })
        })
        || ng.out_syn().iter().any(|name| {
            model.synapse_group(name).is_some_and(|sg| {
                sg.wu_pre_var_inits().values().any(|i| i.requires_rng())
            })
        });
    if init_rng {
        backend.gen_kernel_rng_init(
            os,
            "initRNG",
            &format!("{} + {}", rng_stream_offset(ng.name()), id),
        );
    }
    if ng.is_sim_rng_required() {
        // Offset the population stream past the init stream of the group
        let seq = rng_stream_offset(ng.name()).wrapping_add(ng.num_neurons() as u32);
        backend.gen_population_rng_init(os, ng.name(), &id, &format!("{} + {}", seq, id));
    }

    // Spike buffers, one entry per delay slot
    os.open(format!("for (unsigned int d = 0; d < {}; d++)", slots));
    os.line(format!(
        "{}glbSpk{}[(d * {}) + {}] = 0;",
        prefix,
        ng.name(),
        n,
        id
    ));
    if ng.is_spike_event_required() {
        os.line(format!(
            "{}glbSpkEvnt{}[(d * {}) + {}] = 0;",
            prefix,
            ng.name(),
            n,
            id
        ));
    }
    if ng.is_spike_time_required() {
        os.line(format!(
            "{}sT{}[(d * {}) + {}] = -TIME_MAX;",
            prefix,
            ng.name(),
            n,
            id
        ));
    }
    os.close();

    // Neuron state variables
    let frame = init_frame(parent, model, backend, init_rng);
    for var in ng.snippet().vars() {
        if ng.var_implementation(&var.name) != VarImplementation::Individual {
            continue;
        }
        let init = &ng.var_initialisers()[&var.name];
        let targets: Vec<String> = if ng.is_var_queue_required(&var.name) {
            (0..slots)
                .map(|d| format!("{}{}{}[({} * {}) + {}]", prefix, var.name, ng.name(), d, n, id))
                .collect()
        } else {
            vec![format!("{}{}{}[{}]", prefix, var.name, ng.name(), id)]
        };
        emit_var_init(
            os,
            model,
            &frame,
            init,
            &var.ty,
            &targets,
            &format!("{}.{}:init", ng.name(), init.snippet().name()),
        )?;
    }

    // Current source state
    for cs_name in ng.current_sources() {
        let cs = model
            .current_source(cs_name)
            .expect("current sources come from the registry");
        for var in cs.snippet().vars() {
            let init = &cs.var_initialisers()[&var.name];
            emit_var_init(
                os,
                model,
                &frame,
                init,
                &var.ty,
                &[format!("{}{}{}[{}]", prefix, var.name, cs.name(), id)],
                &format!("{}.{}:init", cs.name(), init.snippet().name()),
            )?;
        }
    }

    // Incoming input buffers, dendritic delay rings, postsynaptic state
    // and per-target weight-update state
    for sg_name in ng.in_syn() {
        let sg = model
            .synapse_group(sg_name)
            .expect("incoming edges come from the registry");
        if sg.ps_target() == sg.name() {
            os.line(format!("{}inSyn{}[{}] = 0;", prefix, sg.name(), id));
        }
        if sg.is_dendritic_delay_required() {
            os.open(format!(
                "for (unsigned int d = 0; d < {}; d++)",
                sg.max_dendritic_delay_timesteps()
            ));
            os.line(format!(
                "{}denDelay{}[(d * {}) + {}] = 0;",
                prefix,
                sg.name(),
                n,
                id
            ));
            os.close();
        }
        if sg.ps_target() == sg.name() {
            for var in sg.ps_snippet().vars() {
                let init = &sg.ps_var_inits()[&var.name];
                emit_var_init(
                    os,
                    model,
                    &frame,
                    init,
                    &var.ty,
                    &[format!("{}{}{}[{}]", prefix, var.name, sg.name(), id)],
                    &format!("{}.{}:init", sg.name(), init.snippet().name()),
                )?;
            }
        }
        for var in sg.wu_snippet().post_vars() {
            let init = &sg.wu_post_var_inits()[&var.name];
            emit_var_init(
                os,
                model,
                &frame,
                init,
                &var.ty,
                &[format!("{}{}{}[{}]", prefix, var.name, sg.name(), id)],
                &format!("{}.{}:init", sg.name(), init.snippet().name()),
            )?;
        }
    }

    // Per-source weight-update state of outgoing groups
    for sg_name in ng.out_syn() {
        let sg = model
            .synapse_group(sg_name)
            .expect("outgoing edges come from the registry");
        for var in sg.wu_snippet().pre_vars() {
            let init = &sg.wu_pre_var_inits()[&var.name];
            emit_var_init(
                os,
                model,
                &frame,
                init,
                &var.ty,
                &[format!("{}{}{}[{}]", prefix, var.name, sg.name(), id)],
                &format!("{}.{}:init", sg.name(), init.snippet().name()),
            )?;
        }
    }

    Ok(())
}

fn gen_dense_synapse_init_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    parent: &Substitutions,
) -> Result<()> {
    if !sg.matrix_type().has_individual_weights() {
        return Ok(());
    }
    let prefix = backend.var_prefix();
    if sg.is_init_rng_required() {
        let id = parent.var("id").expect("kernel binds $(id)");
        backend.gen_kernel_rng_init(
            os,
            "initRNG",
            &format!("{} + {}", rng_stream_offset(sg.name()), id),
        );
    }
    let frame = init_frame(parent, model, backend, sg.is_init_rng_required());

    backend.gen_synapse_variable_row_init(os, model, sg, &frame, &mut |os, subs| {
        let syn = subs.var("id_syn").expect("row init binds $(id_syn)").to_string();
        for var in sg.wu_snippet().vars() {
            let init = &sg.wu_var_inits()[&var.name];
            emit_var_init(
                os,
                model,
                subs,
                init,
                &var.ty,
                &[format!("{}{}{}[{}]", prefix, var.name, sg.name(), syn)],
                &format!("{}.{}:init", sg.name(), init.snippet().name()),
            )?;
        }
        Ok(())
    })
}

fn gen_sparse_connectivity_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    parent: &Substitutions,
) -> Result<()> {
    let Some(row_build) = sg.connectivity_init().code() else {
        return Ok(());
    };
    let prefix = backend.var_prefix();
    let id = parent.var("id").expect("kernel binds $(id)").to_string();
    let trg = model.trg_neuron_group(sg);

    if sg.connectivity_init().requires_rng() {
        backend.gen_kernel_rng_init(
            os,
            "initRNG",
            &format!("{} + {}", rng_stream_offset(sg.name()), id),
        );
    }
    let mut subs = init_frame(parent, model, backend, sg.connectivity_init().requires_rng());
    subs.add_var("id_pre", id.clone());
    subs.add_var("num_pre", model.src_neuron_group(sg).num_neurons().to_string());
    subs.add_var("num_post", trg.num_neurons().to_string());
    subs.add_values(sg.connectivity_init().params().iter());
    subs.add_values(sg.connectivity_init().derived_params().iter());

    match sg.matrix_type().connectivity() {
        MatrixConnectivity::Sparse => {
            os.line("unsigned int rowBuildIdx = 0;");
            subs.add_func(
                "addSynapse",
                1,
                format!(
                    "{{ {}ind{}[({} * {}) + rowBuildIdx] = $(0); rowBuildIdx++; }}",
                    prefix,
                    sg.name(),
                    id,
                    sg.max_connections()
                ),
            );
            subs.add_func("endRow", 0, "break");
        }
        MatrixConnectivity::Bitmask => {
            subs.add_func(
                "addSynapse",
                1,
                format!(
                    "{{ const unsigned long long gid = ({} * {}ull) + $(0); {}; }}",
                    id,
                    trg.num_neurons(),
                    backend.atomic_or(
                        &format!("{}gp{}[gid / 32]", prefix, sg.name()),
                        "0x80000000 >> (gid & 31)"
                    )
                ),
            );
            subs.add_func("endRow", 0, "break");
        }
        _ => return Ok(()),
    }

    for state_var in sg.connectivity_init().snippet().row_build_state_vars() {
        os.line(format!(
            "{} {} = {};",
            state_var.ty, state_var.name, state_var.init
        ));
    }
    os.open("while (true)");
    let mut body = row_build.to_string();
    subs.apply_checked(
        &mut body,
        model.precision(),
        &format!(
            "{}.{}:row_build",
            sg.name(),
            sg.connectivity_init().snippet().name()
        ),
    )?;
    os.block(&body);
    os.close();

    if sg.matrix_type().is_sparse() {
        os.line(format!(
            "{}rowLength{}[{}] = rowBuildIdx;",
            prefix,
            sg.name(),
            id
        ));
    }
    Ok(())
}

fn gen_sparse_var_init_body(
    os: &mut CodeStream,
    model: &Model,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    parent: &Substitutions,
) -> Result<()> {
    if !sg.matrix_type().has_individual_weights() {
        return Ok(());
    }
    let prefix = backend.var_prefix();
    if sg.is_init_rng_required() {
        let id = parent.var("id").expect("kernel binds $(id)");
        backend.gen_kernel_rng_init(
            os,
            "initRNG",
            &format!("{} + {}", rng_stream_offset(sg.name()).wrapping_add(1), id),
        );
    }
    let frame = init_frame(parent, model, backend, sg.is_init_rng_required());

    backend.gen_synapse_variable_row_init(os, model, sg, &frame, &mut |os, subs| {
        let syn = subs.var("id_syn").expect("row init binds $(id_syn)").to_string();
        for var in sg.wu_snippet().vars() {
            let init = &sg.wu_var_inits()[&var.name];
            emit_var_init(
                os,
                model,
                subs,
                init,
                &var.ty,
                &[format!("{}{}{}[{}]", prefix, var.name, sg.name(), syn)],
                &format!("{}.{}:init", sg.name(), init.snippet().name()),
            )?;
        }
        Ok(())
    })
}
