//! The hint interface: named records addressing values inside the prover so
//! external witness-generation code can read and write them without knowing
//! the arena layout.

use estark_field::types::{Field, PrimeField64};

use crate::errors::{StarkError, StarkResult};
use crate::expressions::{Dest, ExpressionsPack, StepsParams};
use crate::expressions_bin::HintFieldValue;
use crate::setup::SetupCtx;
use crate::stark_info::{OpType, PolMap, StarkInfo};
use crate::starks::ProverContext;
use crate::{E, F, FIELD_EXTENSION};

#[derive(Clone, Copy, Debug, Default)]
pub struct HintFieldOptions {
    /// The field is about to be written; skip materialising its contents.
    pub dest: bool,
    pub inverse: bool,
    pub initialize_zeros: bool,
}

impl HintFieldOptions {
    pub fn inverse() -> Self {
        Self {
            inverse: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HintFieldType {
    Column,
    ColumnExtended,
    Field,
    FieldExtended,
    String,
}

/// One materialised hint-field value.
#[derive(Clone, Debug)]
pub struct HintFieldInfo {
    pub values: Vec<F>,
    pub field_type: HintFieldType,
    /// Element stride between consecutive rows of a column.
    pub offset: usize,
    pub string_value: String,
    pub pos: Vec<usize>,
}

fn find_field_values<'a>(
    setup: &'a SetupCtx,
    hint_id: usize,
    field_name: &str,
) -> StarkResult<&'a [HintFieldValue]> {
    let hint = setup
        .expressions_bin
        .hints
        .get(hint_id)
        .ok_or_else(|| StarkError::shape(format!("hint {hint_id} not found")))?;
    hint.fields
        .iter()
        .find(|f| f.name == field_name)
        .map(|f| f.values.as_slice())
        .ok_or_else(|| {
            StarkError::shape(format!(
                "hint field {field_name} not found in hint {}",
                hint.name
            ))
        })
}

/// Reads a committed, constant or custom column at its opening offset.
fn read_polynomial(
    setup: &SetupCtx,
    params: &StepsParams,
    pol: &PolMap,
    ty: OpType,
    row_offset_index: usize,
) -> Vec<F> {
    let info = &setup.stark_info;
    let n = info.n_rows();
    let opening = info.opening_points[row_offset_index];

    let (buf, offset, width): (&[F], usize, usize) = match ty {
        OpType::Cm if pol.stage == 1 => (params.trace, 0, info.section_width("cm1")),
        OpType::Cm => {
            let section = StarkInfo::cm_section(pol.stage);
            (
                params.aux_trace,
                info.offset(&section, false),
                info.section_width(&section),
            )
        }
        OpType::Custom => {
            let section = format!("{}0", info.custom_commits[pol.commit_id].name);
            (
                params.custom_commits[pol.commit_id],
                0,
                info.section_width(&section),
            )
        }
        _ => (params.const_pols, 0, info.n_constants),
    };

    let mut out = vec![F::ZERO; n * pol.dim];
    for j in 0..n {
        let row = (j as i64 + opening).rem_euclid(n as i64) as usize;
        for d in 0..pol.dim {
            out[j * pol.dim + d] = buf[offset + row * width + pol.stage_pos + d];
        }
    }
    out
}

/// Writes a full column back into its stage trace.
fn set_polynomial(
    setup: &SetupCtx,
    ctx: &mut ProverContext,
    values: &[F],
    id_pol: usize,
) -> StarkResult<()> {
    let info = &setup.stark_info;
    let n = info.n_rows();
    let pol = &info.cm_pols_map[id_pol];
    if pol.stage == 1 {
        return Err(StarkError::shape(
            "stage-1 witness columns are caller-provided and cannot be hint-written",
        ));
    }
    let section = StarkInfo::cm_section(pol.stage);
    let width = info.section_width(&section);
    let offset = info.offset(&section, false);
    if values.len() < n * pol.dim {
        return Err(StarkError::shape("hint column write is too short"));
    }
    for j in 0..n {
        for d in 0..pol.dim {
            ctx.aux_trace[offset + j * width + pol.stage_pos + d] = values[j * pol.dim + d];
        }
    }
    Ok(())
}

/// Materialises each value of a hint field into a Goldilocks buffer.
pub fn get_hint_field(
    setup: &SetupCtx,
    ctx: &ProverContext,
    hint_id: usize,
    field_name: &str,
    options: HintFieldOptions,
) -> StarkResult<Vec<HintFieldInfo>> {
    let info = &setup.stark_info;
    let n = info.n_rows();
    let params = ctx.steps_params(setup);
    let field_values = find_field_values(setup, hint_id, field_name)?;

    let mut out = Vec::with_capacity(field_values.len());
    for value in field_values {
        let operand = value
            .operand
            .ok_or_else(|| StarkError::shape("hint value without operand"))?;
        if options.dest
            && !matches!(operand, OpType::Cm | OpType::AirgroupValue | OpType::AirValue)
        {
            return Err(StarkError::shape(format!(
                "hint field {field_name} is not a writable destination"
            )));
        }

        let infoed = match operand {
            OpType::Cm | OpType::Custom | OpType::Const => {
                let pol = match operand {
                    OpType::Cm => &info.cm_pols_map[value.id],
                    OpType::Custom => &info.custom_commits_map[value.commit_id][value.id],
                    _ => &info.const_pols_map[value.id],
                };
                if options.inverse {
                    return Err(StarkError::shape(
                        "inverse is not supported for whole polynomials",
                    ));
                }
                let values = if options.dest {
                    vec![F::ZERO; n * pol.dim]
                } else {
                    read_polynomial(setup, &params, pol, operand, value.row_offset_index)
                };
                HintFieldInfo {
                    values,
                    field_type: if pol.dim == 1 {
                        HintFieldType::Column
                    } else {
                        HintFieldType::ColumnExtended
                    },
                    offset: pol.dim,
                    string_value: String::new(),
                    pos: value.pos.clone(),
                }
            }
            OpType::Tmp => {
                let pack = ExpressionsPack::new(setup);
                let values = pack.calculate_expression(&params, value.id as u64, options.inverse)?;
                let dim = values.len() / n;
                HintFieldInfo {
                    values,
                    field_type: if dim == 1 {
                        HintFieldType::Column
                    } else {
                        HintFieldType::ColumnExtended
                    },
                    offset: dim,
                    string_value: String::new(),
                    pos: value.pos.clone(),
                }
            }
            OpType::Public | OpType::Number => {
                let raw = if operand == OpType::Public {
                    ctx.publics[value.id]
                } else {
                    F::from_noncanonical_u64(value.value)
                };
                let v = if options.inverse {
                    raw.try_inverse()
                        .ok_or(StarkError::InverseOfZero { exp_id: 0 })?
                } else {
                    raw
                };
                HintFieldInfo {
                    values: vec![v],
                    field_type: HintFieldType::Field,
                    offset: 1,
                    string_value: String::new(),
                    pos: value.pos.clone(),
                }
            }
            OpType::ProofValue => HintFieldInfo {
                values: ctx.proof_values
                    [value.id * FIELD_EXTENSION..(value.id + 1) * FIELD_EXTENSION]
                    .to_vec(),
                field_type: HintFieldType::FieldExtended,
                offset: FIELD_EXTENSION,
                string_value: String::new(),
                pos: value.pos.clone(),
            },
            OpType::AirgroupValue | OpType::AirValue => {
                let (map, buf) = if operand == OpType::AirgroupValue {
                    (&info.airgroup_values_map, &ctx.airgroup_values)
                } else {
                    (&info.air_values_map, &ctx.air_values)
                };
                let dim = if map[value.id].stage == 1 {
                    1
                } else {
                    FIELD_EXTENSION
                };
                let mut values = vec![F::ZERO; dim];
                if !options.dest {
                    let raw = &buf[value.id * FIELD_EXTENSION..][..FIELD_EXTENSION];
                    if options.inverse {
                        let inv = E::from_basefield_slice(raw)
                            .try_inverse()
                            .ok_or(StarkError::InverseOfZero { exp_id: 0 })?;
                        values.copy_from_slice(&inv.to_basefield_array()[..dim]);
                    } else {
                        values.copy_from_slice(&raw[..dim]);
                    }
                }
                HintFieldInfo {
                    values,
                    field_type: if dim == 1 {
                        HintFieldType::Field
                    } else {
                        HintFieldType::FieldExtended
                    },
                    offset: FIELD_EXTENSION,
                    string_value: String::new(),
                    pos: value.pos.clone(),
                }
            }
            OpType::Challenge => {
                let raw = &ctx.challenges[value.id * FIELD_EXTENSION..][..FIELD_EXTENSION];
                let values = if options.inverse {
                    E::from_basefield_slice(raw)
                        .try_inverse()
                        .ok_or(StarkError::InverseOfZero { exp_id: 0 })?
                        .to_basefield_array()
                        .to_vec()
                } else {
                    raw.to_vec()
                };
                HintFieldInfo {
                    values,
                    field_type: HintFieldType::FieldExtended,
                    offset: FIELD_EXTENSION,
                    string_value: String::new(),
                    pos: value.pos.clone(),
                }
            }
            OpType::String => HintFieldInfo {
                values: Vec::new(),
                field_type: HintFieldType::String,
                offset: 0,
                string_value: value.string_value.clone(),
                pos: value.pos.clone(),
            },
        };
        out.push(infoed);
    }
    Ok(out)
}

/// Writes a buffer back into the value a hint field addresses: a committed
/// column, an airgroup value, an air value or a proof value. Returns the
/// written id.
pub fn set_hint_field(
    setup: &SetupCtx,
    ctx: &mut ProverContext,
    values: &[F],
    hint_id: usize,
    field_name: &str,
) -> StarkResult<usize> {
    let field_values = find_field_values(setup, hint_id, field_name)?;
    if field_values.len() != 1 {
        return Err(StarkError::shape(format!(
            "hint field {field_name} has more than one destination"
        )));
    }
    let value = &field_values[0];

    match value.operand {
        Some(OpType::Cm) => set_polynomial(setup, ctx, values, value.id)?,
        Some(OpType::AirgroupValue) => {
            let dim = if setup.stark_info.airgroup_values_map[value.id].stage > 1 {
                FIELD_EXTENSION
            } else {
                1
            };
            ctx.airgroup_values[value.id * FIELD_EXTENSION..value.id * FIELD_EXTENSION + dim]
                .copy_from_slice(&values[..dim]);
        }
        Some(OpType::AirValue) => {
            let dim = if setup.stark_info.air_values_map[value.id].stage > 1 {
                FIELD_EXTENSION
            } else {
                1
            };
            ctx.air_values[value.id * FIELD_EXTENSION..value.id * FIELD_EXTENSION + dim]
                .copy_from_slice(&values[..dim]);
        }
        _ => {
            return Err(StarkError::shape(
                "only committed columns, airgroup values and air values can be set",
            ))
        }
    }
    Ok(value.id)
}

/// Builds a fused destination from hint-addressed sources.
fn dest_from_fields(
    setup: &SetupCtx,
    hint_id: usize,
    field_names: &[&str],
    options: &[HintFieldOptions],
) -> StarkResult<Dest> {
    let info = &setup.stark_info;
    let mut dest = Dest::new();
    for (name, opts) in field_names.iter().zip(options) {
        let field_values = find_field_values(setup, hint_id, name)?;
        let value = &field_values[0];
        match value.operand {
            Some(OpType::Cm) => {
                dest.add_cm_pol(&info.cm_pols_map[value.id], value.row_offset_index, opts.inverse)
            }
            Some(OpType::Const) => dest.add_const_pol(
                &info.const_pols_map[value.id],
                value.row_offset_index,
                opts.inverse,
            ),
            Some(OpType::Number) => dest.add_number(value.value, opts.inverse),
            Some(OpType::Tmp) => {
                let pp = setup
                    .expressions_bin
                    .expressions_info
                    .get(&(value.id as u64))
                    .ok_or_else(|| StarkError::bytecode(value.id as u64, "unknown expression"))?;
                dest.add_params(pp, opts.inverse);
            }
            _ => {
                return Err(StarkError::shape(format!(
                    "hint field {name} cannot feed a fused operation"
                )))
            }
        }
    }
    Ok(dest)
}

fn evaluate_dest(setup: &SetupCtx, ctx: &ProverContext, dest: Dest) -> StarkResult<Vec<F>> {
    let pack = ExpressionsPack::new(setup);
    let params = ctx.steps_params(setup);
    let mut outs = pack.calculate_expressions(
        &params,
        &setup.expressions_bin.expressions_bin_args_expressions,
        &[dest],
        setup.stark_info.n_rows(),
    )?;
    Ok(outs.pop().unwrap())
}

/// `dest = field1 * field2` over the base domain.
pub fn mul_hint_fields(
    setup: &SetupCtx,
    ctx: &mut ProverContext,
    hint_id: usize,
    dest_name: &str,
    name1: &str,
    name2: &str,
    options1: HintFieldOptions,
    options2: HintFieldOptions,
) -> StarkResult<usize> {
    let dest = dest_from_fields(setup, hint_id, &[name1, name2], &[options1, options2])?;
    let values = evaluate_dest(setup, ctx, dest)?;

    let field_values = find_field_values(setup, hint_id, dest_name)?;
    let id = field_values[0].id;
    set_polynomial(setup, ctx, &values, id)?;
    Ok(id)
}

fn accumulate(values: &mut [F], dim: usize, n: usize, add: bool) {
    for i in 1..n {
        if dim == 1 {
            let prev = values[i - 1];
            if add {
                values[i] += prev;
            } else {
                values[i] *= prev;
            }
        } else {
            let prev = E::from_basefield_slice(&values[(i - 1) * FIELD_EXTENSION..]);
            let cur = E::from_basefield_slice(&values[i * FIELD_EXTENSION..]);
            let next = if add { cur + prev } else { cur * prev };
            values[i * FIELD_EXTENSION..(i + 1) * FIELD_EXTENSION]
                .copy_from_slice(&next.to_basefield_array());
        }
    }
}

/// Running sum or product of one hint field; the full vector lands in the
/// destination column, its last element in the hint-addressed airgroup
/// value. Returns both written ids.
pub fn acc_hint_field(
    setup: &SetupCtx,
    ctx: &mut ProverContext,
    hint_id: usize,
    dest_name: &str,
    airgroup_val_name: &str,
    field_name: &str,
    add: bool,
) -> StarkResult<(usize, usize)> {
    let n = setup.stark_info.n_rows();
    let mut fields = get_hint_field(setup, ctx, hint_id, field_name, HintFieldOptions::default())?;
    let mut values = std::mem::take(&mut fields[0].values);

    let dest_id = find_field_values(setup, hint_id, dest_name)?[0].id;
    let dim = setup.stark_info.cm_pols_map[dest_id].dim;
    accumulate(&mut values, dim, n, add);

    let id0 = set_hint_field(setup, ctx, &values, hint_id, dest_name)?;
    let id1 = set_hint_field(
        setup,
        ctx,
        &values[(n - 1) * dim..],
        hint_id,
        airgroup_val_name,
    )?;
    Ok((id0, id1))
}

/// Accumulated product/sum of `field1 * field2`.
pub fn acc_mul_hint_fields(
    setup: &SetupCtx,
    ctx: &mut ProverContext,
    hint_id: usize,
    dest_name: &str,
    airgroup_val_name: &str,
    name1: &str,
    name2: &str,
    options1: HintFieldOptions,
    options2: HintFieldOptions,
    add: bool,
) -> StarkResult<(usize, usize)> {
    let n = setup.stark_info.n_rows();
    let dest = dest_from_fields(setup, hint_id, &[name1, name2], &[options1, options2])?;
    let mut values = evaluate_dest(setup, ctx, dest)?;

    let dest_id = find_field_values(setup, hint_id, dest_name)?[0].id;
    let dim = setup.stark_info.cm_pols_map[dest_id].dim;
    accumulate(&mut values, dim, n, add);

    let id0 = set_hint_field(setup, ctx, &values, hint_id, dest_name)?;
    let id1 = set_hint_field(
        setup,
        ctx,
        &values[(n - 1) * dim..],
        hint_id,
        airgroup_val_name,
    )?;
    Ok((id0, id1))
}

/// Accumulated `field1 * field2 + field3`.
pub fn acc_mul_add_hint_fields(
    setup: &SetupCtx,
    ctx: &mut ProverContext,
    hint_id: usize,
    dest_name: &str,
    airgroup_val_name: &str,
    name1: &str,
    name2: &str,
    name3: &str,
    options1: HintFieldOptions,
    options2: HintFieldOptions,
    options3: HintFieldOptions,
    add: bool,
) -> StarkResult<(usize, usize)> {
    let n = setup.stark_info.n_rows();
    let dest = dest_from_fields(
        setup,
        hint_id,
        &[name1, name2, name3],
        &[options1, options2, options3],
    )?;
    let mut values = evaluate_dest(setup, ctx, dest)?;

    let dest_id = find_field_values(setup, hint_id, dest_name)?[0].id;
    let dim = setup.stark_info.cm_pols_map[dest_id].dim;
    accumulate(&mut values, dim, n, add);

    let id0 = set_hint_field(setup, ctx, &values, hint_id, dest_name)?;
    let id1 = set_hint_field(
        setup,
        ctx,
        &values[(n - 1) * dim..],
        hint_id,
        airgroup_val_name,
    )?;
    Ok((id0, id1))
}
