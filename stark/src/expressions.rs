//! Bytecode-driven polynomial-expression evaluator.
//!
//! Expressions compiled into [`crate::expressions_bin::ExpressionsBin`] are
//! interpreted over row blocks of width [`NROWS_PACK`]. For every block a
//! row window is loaded holding, per opening-point offset, the value of each
//! used column at `row + offset * blowup (mod domain)`. Several destinations
//! evaluated together share that window, which is the main speed-up over
//! per-expression evaluation.
//!
//! The opcode numbers are a versioned contract with the bytecode producer;
//! they must not be reordered or reused.

use estark_field::types::{try_batch_inverse, Field, PrimeField64};
use estark_field::FIELD_EXTENSION;
use rayon::prelude::*;

use crate::errors::{StarkError, StarkResult};
use crate::expressions_bin::{ParserArgs, ParserParams};
use crate::setup::{ProverHelpers, SetupCtx};
use crate::stark_info::{OpType, PolMap, StarkInfo};
use crate::{E, F};

/// Rows evaluated per block; the portable pack width.
pub const NROWS_PACK: usize = 4;

/// Run-time parameter set handed to every evaluation.
#[derive(Clone, Copy, Default)]
pub struct StepsParams<'a> {
    /// Stage-1 trace, row-major, unextended (or one row per query when
    /// verifying).
    pub trace: &'a [F],
    /// The working arena holding every other section.
    pub aux_trace: &'a [F],
    pub public_inputs: &'a [F],
    pub proof_values: &'a [F],
    pub challenges: &'a [F],
    pub airgroup_values: &'a [F],
    pub air_values: &'a [F],
    pub evals: &'a [F],
    pub x_div_x_sub: &'a [F],
    pub const_pols: &'a [F],
    pub const_pols_extended: &'a [F],
    pub custom_commits: &'a [&'a [F]],
    pub custom_commits_extended: &'a [&'a [F]],
}

/// One source feeding a destination: a compiled expression, a committed or
/// constant column, or a literal.
#[derive(Clone, Debug)]
pub struct Param {
    pub op: OpType,
    pub parser_params: Option<ParserParams>,
    pub stage: usize,
    pub stage_pos: usize,
    pub dim: usize,
    pub value: u64,
    pub row_offset_index: usize,
    pub inverse: bool,
}

/// A destination of one `calculate_expressions` call. With two params the
/// results are multiplied element-wise before the store.
#[derive(Clone, Debug, Default)]
pub struct Dest {
    pub params: Vec<Param>,
}

impl Dest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_params(&mut self, parser_params: &ParserParams, inverse: bool) {
        self.params.push(Param {
            op: OpType::Tmp,
            dim: parser_params.dest_dim,
            parser_params: Some(parser_params.clone()),
            stage: 0,
            stage_pos: 0,
            value: 0,
            row_offset_index: 0,
            inverse,
        });
    }

    pub fn add_cm_pol(&mut self, pol: &PolMap, row_offset_index: usize, inverse: bool) {
        self.params.push(Param {
            op: OpType::Cm,
            parser_params: None,
            stage: pol.stage,
            stage_pos: pol.stage_pos,
            dim: pol.dim,
            value: pol.pols_map_id as u64,
            row_offset_index,
            inverse,
        });
    }

    pub fn add_const_pol(&mut self, pol: &PolMap, row_offset_index: usize, inverse: bool) {
        self.params.push(Param {
            op: OpType::Const,
            parser_params: None,
            stage: 0,
            stage_pos: pol.stage_pos,
            dim: pol.dim,
            value: pol.pols_map_id as u64,
            row_offset_index,
            inverse,
        });
    }

    pub fn add_number(&mut self, value: u64, inverse: bool) {
        self.params.push(Param {
            op: OpType::Number,
            parser_params: None,
            stage: 0,
            stage_pos: 0,
            dim: 1,
            value,
            row_offset_index: 0,
            inverse,
        });
    }

    pub fn dim(&self) -> usize {
        self.params.iter().map(|p| p.dim).max().unwrap_or(1)
    }

    fn exp_id(&self) -> u64 {
        self.params
            .iter()
            .find_map(|p| p.parser_params.as_ref().map(|pp| pp.exp_id))
            .unwrap_or(0)
    }
}

/// Source pools an opcode can draw from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Src {
    Cm1,
    Cm3,
    Tmp1,
    Tmp3,
    Public,
    Number,
    AirValue1,
    AirValue3,
    Challenge,
    AirgroupValue,
    Eval,
}

impl Src {
    fn dim(self) -> usize {
        match self {
            Src::Cm1 | Src::Tmp1 | Src::Public | Src::Number | Src::AirValue1 => 1,
            _ => FIELD_EXTENSION,
        }
    }
}

/// The fixed opcode alphabet: `(dest dim, src0, src1)`; `src1 = None` marks
/// a copy. Indexed by opcode number.
#[rustfmt::skip]
const OPCODES: [(usize, Src, Option<Src>); 71] = [
    /*  0 */ (1, Src::Cm1, None),
    /*  1 */ (1, Src::Cm1, Some(Src::Cm1)),
    /*  2 */ (1, Src::Cm1, Some(Src::Tmp1)),
    /*  3 */ (1, Src::Cm1, Some(Src::Public)),
    /*  4 */ (1, Src::Cm1, Some(Src::Number)),
    /*  5 */ (1, Src::Cm1, Some(Src::AirValue1)),
    /*  6 */ (1, Src::Tmp1, None),
    /*  7 */ (1, Src::Tmp1, Some(Src::Tmp1)),
    /*  8 */ (1, Src::Tmp1, Some(Src::Public)),
    /*  9 */ (1, Src::Tmp1, Some(Src::Number)),
    /* 10 */ (1, Src::Tmp1, Some(Src::AirValue1)),
    /* 11 */ (1, Src::Public, None),
    /* 12 */ (1, Src::Public, Some(Src::Public)),
    /* 13 */ (1, Src::Public, Some(Src::Number)),
    /* 14 */ (1, Src::Public, Some(Src::AirValue1)),
    /* 15 */ (1, Src::Number, None),
    /* 16 */ (1, Src::Number, Some(Src::Number)),
    /* 17 */ (1, Src::Number, Some(Src::AirValue1)),
    /* 18 */ (1, Src::AirValue1, None),
    /* 19 */ (1, Src::AirValue1, Some(Src::AirValue1)),
    /* 20 */ (3, Src::Cm3, Some(Src::Cm1)),
    /* 21 */ (3, Src::Cm3, Some(Src::Tmp1)),
    /* 22 */ (3, Src::Cm3, Some(Src::Public)),
    /* 23 */ (3, Src::Cm3, Some(Src::Number)),
    /* 24 */ (3, Src::Cm3, Some(Src::AirValue1)),
    /* 25 */ (3, Src::Tmp3, Some(Src::Cm1)),
    /* 26 */ (3, Src::Tmp3, Some(Src::Tmp1)),
    /* 27 */ (3, Src::Tmp3, Some(Src::Public)),
    /* 28 */ (3, Src::Tmp3, Some(Src::Number)),
    /* 29 */ (3, Src::Tmp3, Some(Src::AirValue1)),
    /* 30 */ (3, Src::Challenge, Some(Src::Cm1)),
    /* 31 */ (3, Src::Challenge, Some(Src::Tmp1)),
    /* 32 */ (3, Src::Challenge, Some(Src::Public)),
    /* 33 */ (3, Src::Challenge, Some(Src::Number)),
    /* 34 */ (3, Src::Challenge, Some(Src::AirValue1)),
    /* 35 */ (3, Src::AirgroupValue, Some(Src::Cm1)),
    /* 36 */ (3, Src::AirgroupValue, Some(Src::Tmp1)),
    /* 37 */ (3, Src::AirgroupValue, Some(Src::Public)),
    /* 38 */ (3, Src::AirgroupValue, Some(Src::Number)),
    /* 39 */ (3, Src::AirgroupValue, Some(Src::AirValue1)),
    /* 40 */ (3, Src::AirValue3, Some(Src::Cm1)),
    /* 41 */ (3, Src::AirValue3, Some(Src::Tmp1)),
    /* 42 */ (3, Src::AirValue3, Some(Src::Public)),
    /* 43 */ (3, Src::AirValue3, Some(Src::Number)),
    /* 44 */ (3, Src::AirValue3, Some(Src::AirValue1)),
    /* 45 */ (3, Src::Cm3, None),
    /* 46 */ (3, Src::Cm3, Some(Src::Cm3)),
    /* 47 */ (3, Src::Cm3, Some(Src::Tmp3)),
    /* 48 */ (3, Src::Cm3, Some(Src::Challenge)),
    /* 49 */ (3, Src::Cm3, Some(Src::AirgroupValue)),
    /* 50 */ (3, Src::Cm3, Some(Src::AirValue3)),
    /* 51 */ (3, Src::Tmp3, None),
    /* 52 */ (3, Src::Tmp3, Some(Src::Tmp3)),
    /* 53 */ (3, Src::Tmp3, Some(Src::Challenge)),
    /* 54 */ (3, Src::Tmp3, Some(Src::AirgroupValue)),
    /* 55 */ (3, Src::Tmp3, Some(Src::AirValue3)),
    /* 56 */ (3, Src::Challenge, Some(Src::Challenge)),
    /* 57 */ (3, Src::Challenge, Some(Src::AirgroupValue)),
    /* 58 */ (3, Src::Challenge, Some(Src::AirValue3)),
    /* 59 */ (3, Src::AirgroupValue, Some(Src::AirgroupValue)),
    /* 60 */ (3, Src::AirgroupValue, Some(Src::AirValue3)),
    /* 61 */ (3, Src::AirValue3, Some(Src::AirValue3)),
    /* 62 */ (3, Src::Eval, None),
    /* 63 */ (3, Src::Challenge, Some(Src::Eval)),
    /* 64 */ (3, Src::Tmp3, Some(Src::Eval)),
    /* 65 */ (3, Src::Eval, Some(Src::Cm1)),
    /* 66 */ (3, Src::Cm3, Some(Src::Eval)),
    /* 67 */ (3, Src::Eval, Some(Src::Eval)),
    /* 68 */ (3, Src::Eval, Some(Src::Public)),
    /* 69 */ (3, Src::Eval, Some(Src::Number)),
    /* 70 */ (3, Src::AirgroupValue, Some(Src::Eval)),
];

const OP_ADD: u16 = 0;
const OP_SUB: u16 = 1;
const OP_MUL: u16 = 2;

/// Which extra columns the row window carries beyond committed/constant
/// polynomials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Extras {
    /// `x` plus one zerofier multiplier per boundary (quotient expression).
    XAndZi,
    /// `x / (x - xi_o)` per opening (FRI expression).
    XDivXSub,
    /// Just `x` over the base domain.
    Domain,
}

struct Layout {
    n_openings: usize,
    ns: usize,
    n_cols_stages: Vec<usize>,
    offsets_stages: Vec<usize>,
    acc: Vec<usize>,
    extras: Extras,
    extras_col: usize,
    total_cols: usize,
}

impl Layout {
    fn new(stark_info: &StarkInfo, domain_extended: bool, extras: Extras, point_mode: bool) -> Self {
        let n_openings = stark_info.opening_points.len();
        let ns = 2 + stark_info.n_stages + stark_info.custom_commits.len();

        let mut n_cols_stages = Vec::with_capacity(ns);
        let mut offsets_stages = Vec::with_capacity(ns);
        n_cols_stages.push(stark_info.section_width("const"));
        offsets_stages.push(0);
        for stage in 1..=stark_info.n_stages + 1 {
            let section = StarkInfo::cm_section(stage);
            n_cols_stages.push(stark_info.section_width(&section));
            offsets_stages.push(stark_info.offset(&section, domain_extended));
        }
        for cc in &stark_info.custom_commits {
            let section = format!("{}0", cc.name);
            n_cols_stages.push(stark_info.section_width(&section));
            offsets_stages.push(stark_info.offset(&section, domain_extended));
        }

        let mut acc = Vec::with_capacity(ns * n_openings + 1);
        let mut total = 0;
        for _ in 0..n_openings {
            for stage in 0..ns {
                acc.push(total);
                total += n_cols_stages[stage];
            }
        }
        acc.push(total);
        let extras_col = total;

        let extras_width = match extras {
            Extras::XAndZi => {
                let per_value = if point_mode { FIELD_EXTENSION } else { 1 };
                per_value * (1 + stark_info.boundaries.len())
            }
            Extras::XDivXSub => n_openings * FIELD_EXTENSION,
            Extras::Domain => {
                if point_mode {
                    0
                } else {
                    1
                }
            }
        };

        Layout {
            n_openings,
            ns,
            n_cols_stages,
            offsets_stages,
            acc,
            extras,
            extras_col,
            total_cols: total + extras_width,
        }
    }
}

pub struct ExpressionsPack<'a> {
    pub setup: &'a SetupCtx,
}

impl<'a> ExpressionsPack<'a> {
    pub fn new(setup: &'a SetupCtx) -> Self {
        Self { setup }
    }

    /// Evaluates a single expression over its natural domain; the quotient
    /// and FRI expressions run over the extended coset with an extension
    /// result.
    pub fn calculate_expression(
        &self,
        params: &StepsParams,
        exp_id: u64,
        inverse: bool,
    ) -> StarkResult<Vec<F>> {
        let info = &self.setup.stark_info;
        let mut parser_params = self
            .setup
            .expressions_bin
            .expressions_info
            .get(&exp_id)
            .ok_or_else(|| StarkError::bytecode(exp_id, "unknown expression id"))?
            .clone();

        let domain_size = if exp_id == info.c_exp_id {
            parser_params.dest_dim = FIELD_EXTENSION;
            // The verifier re-evaluates the constraint expression once, at
            // the opening challenge.
            if info.verify {
                1
            } else {
                info.n_rows_ext()
            }
        } else if exp_id == info.fri_exp_id {
            parser_params.dest_dim = FIELD_EXTENSION;
            if info.verify {
                info.stark_struct.n_queries
            } else {
                info.n_rows_ext()
            }
        } else if info.verify {
            info.stark_struct.n_queries
        } else {
            info.n_rows()
        };

        let mut dest = Dest::new();
        dest.add_params(&parser_params, inverse);
        let mut outs = self.calculate_expressions(
            params,
            &self.setup.expressions_bin.expressions_bin_args_expressions,
            &[dest],
            domain_size,
        )?;
        Ok(outs.pop().unwrap())
    }

    /// Evaluates all `dests` over `domain_size` rows sharing one row-window
    /// loader. Returns one row-major buffer of `domain_size * dest.dim()`
    /// elements per destination.
    pub fn calculate_expressions(
        &self,
        params: &StepsParams,
        parser_args: &ParserArgs,
        dests: &[Dest],
        domain_size: usize,
    ) -> StarkResult<Vec<Vec<F>>> {
        let info = &self.setup.stark_info;
        let domain_extended = !info.verify && domain_size == info.n_rows_ext();
        let point_mode = self.setup.prover_helpers.is_point();

        let first_exp = dests
            .first()
            .and_then(|d| d.params.first())
            .filter(|p| p.op == OpType::Tmp)
            .map(|p| p.parser_params.as_ref().unwrap().exp_id);
        let extras = match first_exp {
            Some(id) if id == info.c_exp_id => Extras::XAndZi,
            Some(id) if id == info.fri_exp_id => Extras::XDivXSub,
            _ => Extras::Domain,
        };

        let layout = Layout::new(info, domain_extended, extras, point_mode);
        let used = self.used_columns(parser_args, dests);

        let mut outs: Vec<Vec<F>> = dests
            .iter()
            .map(|d| vec![F::ZERO; domain_size * d.dim()])
            .collect();

        let n_blocks = (domain_size + NROWS_PACK - 1) / NROWS_PACK;
        let mut chunk_iters: Vec<_> = outs
            .iter_mut()
            .zip(dests)
            .map(|(out, d)| out.chunks_mut(NROWS_PACK * d.dim()))
            .collect();
        let per_block: Vec<Vec<&mut [F]>> = (0..n_blocks)
            .map(|_| {
                chunk_iters
                    .iter_mut()
                    .map(|it| it.next().expect("chunk count mismatch"))
                    .collect()
            })
            .collect();

        per_block
            .into_par_iter()
            .enumerate()
            .try_for_each(|(block, mut dest_chunks)| -> StarkResult<()> {
                let row = block * NROWS_PACK;
                let len = NROWS_PACK.min(domain_size - row);
                let buffer_t =
                    self.load_block(&layout, &used, params, row, len, domain_size, domain_extended);

                for (d, dest) in dests.iter().enumerate() {
                    let mut dest_vals =
                        vec![F::ZERO; dest.params.len() * FIELD_EXTENSION * NROWS_PACK];
                    for (k, param) in dest.params.iter().enumerate() {
                        let slot = &mut dest_vals
                            [k * FIELD_EXTENSION * NROWS_PACK..(k + 1) * FIELD_EXTENSION * NROWS_PACK];
                        self.eval_param(
                            param,
                            parser_args,
                            &layout,
                            &buffer_t,
                            params,
                            len,
                            dest.exp_id(),
                            slot,
                        )?;
                    }
                    if dest.params.len() >= 2 {
                        combine_params(dest, &mut dest_vals, len);
                    }

                    let dim = dest.dim();
                    let out = &mut dest_chunks[d];
                    for j in 0..len {
                        for c in 0..dim {
                            out[j * dim + c] = dest_vals[c * NROWS_PACK + j];
                        }
                    }
                }
                Ok(())
            })?;

        Ok(outs)
    }

    /// Union of the columns any destination touches; only these are loaded
    /// into the row window.
    fn used_columns(&self, parser_args: &ParserArgs, dests: &[Dest]) -> UsedColumns {
        let info = &self.setup.stark_info;
        let mut used = UsedColumns {
            const_pols: vec![false; info.const_pols_map.len()],
            cm_pols: vec![false; info.cm_pols_map.len()],
            custom: info
                .custom_commits_map
                .iter()
                .map(|m| vec![false; m.len()])
                .collect(),
        };

        for dest in dests {
            for param in &dest.params {
                match param.op {
                    OpType::Cm => used.cm_pols[param.value as usize] = true,
                    OpType::Const => used.const_pols[param.value as usize] = true,
                    OpType::Tmp => {
                        let pp = param.parser_params.as_ref().unwrap();
                        for k in 0..pp.n_const_pols_used {
                            let id = parser_args.const_pols_ids[pp.const_pols_offset + k];
                            used.const_pols[id as usize] = true;
                        }
                        for k in 0..pp.n_cm_pols_used {
                            let id = parser_args.cm_pols_ids[pp.cm_pols_offset + k];
                            used.cm_pols[id as usize] = true;
                        }
                        for (c, &n_used) in pp.n_custom_commits_pols_used.iter().enumerate() {
                            for k in 0..n_used {
                                let id = parser_args.custom_commits_pols_ids
                                    [pp.custom_commits_offset[c] + k];
                                used.custom[c][id as usize] = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        used
    }

    fn load_block(
        &self,
        layout: &Layout,
        used: &UsedColumns,
        params: &StepsParams,
        row: usize,
        len: usize,
        domain_size: usize,
        domain_extended: bool,
    ) -> Vec<F> {
        let info = &self.setup.stark_info;
        let extend = if domain_extended {
            1usize << (info.stark_struct.n_bits_ext - info.stark_struct.n_bits)
        } else {
            1
        };

        let strides: Vec<usize> = info
            .opening_points
            .iter()
            .map(|&p| {
                let opening = if p < 0 {
                    (p + domain_size as i64) as usize
                } else {
                    p as usize
                };
                (opening * extend) % domain_size.max(1)
            })
            .collect();

        let mut buffer = vec![F::ZERO; layout.total_cols * NROWS_PACK];

        let const_src = if domain_extended {
            params.const_pols_extended
        } else {
            params.const_pols
        };
        let const_width = layout.n_cols_stages[0];
        for (k, _) in used.const_pols.iter().enumerate().filter(|(_, &u)| u) {
            let pol = &info.const_pols_map[k];
            for d in 0..pol.dim {
                for (o, &stride) in strides.iter().enumerate() {
                    let col = layout.acc[layout.ns * o] + pol.stage_pos + d;
                    for j in 0..len {
                        let l = (row + j + stride) % domain_size;
                        buffer[col * NROWS_PACK + j] =
                            const_src[l * const_width + pol.stage_pos + d];
                    }
                }
            }
        }

        for (k, _) in used.cm_pols.iter().enumerate().filter(|(_, &u)| u) {
            let pol = &info.cm_pols_map[k];
            let stage = pol.stage;
            let width = layout.n_cols_stages[stage];
            let src = if stage == 1 && !domain_extended {
                params.trace
            } else {
                params.aux_trace
            };
            let base = if stage == 1 && !domain_extended {
                0
            } else {
                layout.offsets_stages[stage]
            };
            for d in 0..pol.dim {
                for (o, &stride) in strides.iter().enumerate() {
                    let col = layout.acc[layout.ns * o + stage] + pol.stage_pos + d;
                    for j in 0..len {
                        let l = (row + j + stride) % domain_size;
                        buffer[col * NROWS_PACK + j] = src[base + l * width + pol.stage_pos + d];
                    }
                }
            }
        }

        for (c, used_c) in used.custom.iter().enumerate() {
            let stage = info.n_stages + 2 + c;
            let width = layout.n_cols_stages[stage];
            let src = if domain_extended {
                params.custom_commits_extended[c]
            } else {
                params.custom_commits[c]
            };
            let base = layout.offsets_stages[stage];
            for (k, _) in used_c.iter().enumerate().filter(|(_, &u)| u) {
                let pol = &info.custom_commits_map[c][k];
                for d in 0..pol.dim {
                    for (o, &stride) in strides.iter().enumerate() {
                        let col = layout.acc[layout.ns * o + stage] + pol.stage_pos + d;
                        for j in 0..len {
                            let l = (row + j + stride) % domain_size;
                            buffer[col * NROWS_PACK + j] =
                                src[base + l * width + pol.stage_pos + d];
                        }
                    }
                }
            }
        }

        let extras_col = layout.extras_col;
        match (layout.extras, &self.setup.prover_helpers) {
            (Extras::XAndZi, ProverHelpers::Domain { zi, x_2ns, .. }) => {
                for j in 0..len {
                    buffer[extras_col * NROWS_PACK + j] = x_2ns[row + j];
                }
                for d in 0..info.boundaries.len() {
                    for j in 0..len {
                        buffer[(extras_col + 1 + d) * NROWS_PACK + j] =
                            zi[d * domain_size + row + j];
                    }
                }
            }
            (Extras::XAndZi, ProverHelpers::Point { zi, xi }) => {
                for c in 0..FIELD_EXTENSION {
                    for j in 0..len {
                        buffer[(extras_col + c) * NROWS_PACK + j] = xi[c];
                    }
                }
                for d in 0..info.boundaries.len() {
                    for c in 0..FIELD_EXTENSION {
                        let col = extras_col + FIELD_EXTENSION + d * FIELD_EXTENSION + c;
                        for j in 0..len {
                            buffer[col * NROWS_PACK + j] = zi[d * FIELD_EXTENSION + c];
                        }
                    }
                }
            }
            (Extras::XDivXSub, _) => {
                for o in 0..layout.n_openings {
                    for c in 0..FIELD_EXTENSION {
                        let col = extras_col + o * FIELD_EXTENSION + c;
                        for j in 0..len {
                            buffer[col * NROWS_PACK + j] = params.x_div_x_sub
                                [(row + j + o * domain_size) * FIELD_EXTENSION + c];
                        }
                    }
                }
            }
            (Extras::Domain, ProverHelpers::Domain { x_n, x_2ns, .. }) => {
                let xs = if domain_extended { x_2ns } else { x_n };
                for j in 0..len {
                    buffer[extras_col * NROWS_PACK + j] = xs[row + j];
                }
            }
            (Extras::Domain, ProverHelpers::Point { .. }) => {}
        }

        buffer
    }

    /// Evaluates one param of a destination into a `3 * NROWS_PACK` slot,
    /// component-major.
    fn eval_param(
        &self,
        param: &Param,
        parser_args: &ParserArgs,
        layout: &Layout,
        buffer_t: &[F],
        params: &StepsParams,
        len: usize,
        exp_id: u64,
        slot: &mut [F],
    ) -> StarkResult<()> {
        match param.op {
            OpType::Cm | OpType::Const => {
                let stage = if param.op == OpType::Cm { param.stage } else { 0 };
                let col = layout.acc[layout.ns * param.row_offset_index + stage] + param.stage_pos;
                for c in 0..param.dim {
                    let src = &buffer_t[(col + c) * NROWS_PACK..(col + c + 1) * NROWS_PACK];
                    slot[c * NROWS_PACK..c * NROWS_PACK + len].copy_from_slice(&src[..len]);
                }
                apply_inverse(slot, param.dim, len, param.inverse, exp_id)
            }
            OpType::Number => {
                let mut value = F::from_noncanonical_u64(param.value);
                if param.inverse {
                    value = value
                        .try_inverse()
                        .ok_or(StarkError::InverseOfZero { exp_id })?;
                }
                slot[..len].iter_mut().for_each(|v| *v = value);
                Ok(())
            }
            OpType::Tmp => {
                let pp = param.parser_params.as_ref().unwrap();
                let (tmp1, tmp3) = self.run_bytecode(pp, parser_args, layout, buffer_t, params, len)?;
                if pp.dest_dim == 1 {
                    slot[..len].copy_from_slice(&tmp1[pp.dest_id * NROWS_PACK..][..len]);
                } else {
                    let base = pp.dest_id * FIELD_EXTENSION * NROWS_PACK;
                    slot[..FIELD_EXTENSION * NROWS_PACK]
                        .copy_from_slice(&tmp3[base..base + FIELD_EXTENSION * NROWS_PACK]);
                }
                apply_inverse(slot, pp.dest_dim, len, param.inverse, pp.exp_id)
            }
            _ => Err(StarkError::bytecode(exp_id, "unsupported destination param")),
        }
    }

    /// The opcode interpreter itself. Returns the scalar and extension
    /// temporary pools after the last instruction.
    fn run_bytecode(
        &self,
        pp: &ParserParams,
        parser_args: &ParserArgs,
        layout: &Layout,
        buffer_t: &[F],
        params: &StepsParams,
        len: usize,
    ) -> StarkResult<(Vec<F>, Vec<F>)> {
        let ops = &parser_args.ops[pp.ops_offset..pp.ops_offset + pp.n_ops];
        let args = &parser_args.args[pp.args_offset..pp.args_offset + pp.n_args];

        let mut tmp1 = vec![F::ZERO; pp.n_temp1.max(1) * NROWS_PACK];
        let mut tmp3 = vec![F::ZERO; pp.n_temp3.max(1) * FIELD_EXTENSION * NROWS_PACK];

        let numbers = &parser_args.numbers;
        let mut i_args = 0usize;
        for &op in ops {
            let (dest_dim, src0, src1) = *OPCODES.get(op as usize).ok_or_else(|| {
                StarkError::bytecode(pp.exp_id, format!("unknown opcode {op}"))
            })?;

            match src1 {
                None => {
                    // Copy.
                    let dst = args[i_args] as usize;
                    i_args += 1;
                    if dest_dim == 1 {
                        let a = base_vals(
                            src0, args, &mut i_args, layout, buffer_t, params, numbers, &tmp1, pp,
                        )?;
                        tmp1[dst * NROWS_PACK..(dst + 1) * NROWS_PACK].copy_from_slice(&a);
                    } else {
                        let a = ext_vals(
                            src0, args, &mut i_args, layout, buffer_t, params, &tmp3, pp,
                        )?;
                        write_ext(&mut tmp3, dst, &a);
                    }
                }
                Some(src1) => {
                    let op_tag = args[i_args];
                    let dst = args[i_args + 1] as usize;
                    i_args += 2;
                    if op_tag > OP_MUL {
                        return Err(StarkError::bytecode(
                            pp.exp_id,
                            format!("invalid operation tag {op_tag}"),
                        ));
                    }
                    if dest_dim == 1 {
                        let a = base_vals(
                            src0, args, &mut i_args, layout, buffer_t, params, numbers, &tmp1, pp,
                        )?;
                        let b = base_vals(
                            src1, args, &mut i_args, layout, buffer_t, params, numbers, &tmp1, pp,
                        )?;
                        let out = op_base(op_tag, &a, &b);
                        tmp1[dst * NROWS_PACK..(dst + 1) * NROWS_PACK].copy_from_slice(&out);
                    } else if src1.dim() == FIELD_EXTENSION {
                        let a = ext_vals(
                            src0, args, &mut i_args, layout, buffer_t, params, &tmp3, pp,
                        )?;
                        let b = ext_vals(
                            src1, args, &mut i_args, layout, buffer_t, params, &tmp3, pp,
                        )?;
                        let out = op_ext(op_tag, &a, &b, len);
                        write_ext(&mut tmp3, dst, &out);
                    } else {
                        let a = ext_vals(
                            src0, args, &mut i_args, layout, buffer_t, params, &tmp3, pp,
                        )?;
                        let b = base_vals(
                            src1, args, &mut i_args, layout, buffer_t, params, numbers, &tmp1, pp,
                        )?;
                        let out = op_ext_base(op_tag, &a, &b);
                        write_ext(&mut tmp3, dst, &out);
                    }
                }
            }
        }

        if i_args != pp.n_args {
            return Err(StarkError::bytecode(
                pp.exp_id,
                format!("argument count mismatch: consumed {i_args}, declared {}", pp.n_args),
            ));
        }

        Ok((tmp1, tmp3))
    }

}

fn base_vals(
    src: Src,
    args: &[u16],
    i_args: &mut usize,
    layout: &Layout,
    buffer_t: &[F],
    params: &StepsParams,
    numbers: &[u64],
    tmp1: &[F],
    pp: &ParserParams,
) -> StarkResult<[F; NROWS_PACK]> {
    let mut out = [F::ZERO; NROWS_PACK];
    match src {
        Src::Cm1 => {
            let bp = args[*i_args] as usize;
            let sp = args[*i_args + 1] as usize;
            *i_args += 2;
            let col = column_index(layout, bp, sp, pp)?;
            out.copy_from_slice(&buffer_t[col * NROWS_PACK..(col + 1) * NROWS_PACK]);
        }
        Src::Tmp1 => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            out.copy_from_slice(&tmp1[idx * NROWS_PACK..(idx + 1) * NROWS_PACK]);
        }
        Src::Public => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            out = [params.public_inputs[idx]; NROWS_PACK];
        }
        Src::Number => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            out = [F::from_noncanonical_u64(numbers[idx]); NROWS_PACK];
        }
        Src::AirValue1 => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            out = [params.air_values[idx * FIELD_EXTENSION]; NROWS_PACK];
        }
        _ => unreachable!("extension source resolved as base"),
    }
    Ok(out)
}

fn ext_vals(
    src: Src,
    args: &[u16],
    i_args: &mut usize,
    layout: &Layout,
    buffer_t: &[F],
    params: &StepsParams,
    tmp3: &[F],
    pp: &ParserParams,
) -> StarkResult<[F; FIELD_EXTENSION * NROWS_PACK]> {
    let mut out = [F::ZERO; FIELD_EXTENSION * NROWS_PACK];
    match src {
        Src::Cm3 => {
            let bp = args[*i_args] as usize;
            let sp = args[*i_args + 1] as usize;
            *i_args += 2;
            let col = column_index(layout, bp, sp, pp)?;
            out.copy_from_slice(&buffer_t[col * NROWS_PACK..(col + FIELD_EXTENSION) * NROWS_PACK]);
        }
        Src::Tmp3 => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            let base = idx * FIELD_EXTENSION * NROWS_PACK;
            out.copy_from_slice(&tmp3[base..base + FIELD_EXTENSION * NROWS_PACK]);
        }
        Src::Challenge => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            splat_ext(&mut out, &params.challenges[idx * FIELD_EXTENSION..]);
        }
        Src::AirgroupValue => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            splat_ext(&mut out, &params.airgroup_values[idx * FIELD_EXTENSION..]);
        }
        Src::AirValue3 => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            splat_ext(&mut out, &params.air_values[idx * FIELD_EXTENSION..]);
        }
        Src::Eval => {
            let idx = args[*i_args] as usize;
            *i_args += 1;
            splat_ext(&mut out, &params.evals[idx * FIELD_EXTENSION..]);
        }
        _ => unreachable!("base source resolved as extension"),
    }
    Ok(out)
}

fn column_index(layout: &Layout, bp: usize, sp: usize, pp: &ParserParams) -> StarkResult<usize> {
    let col = layout
        .acc
        .get(bp)
        .copied()
        .ok_or_else(|| StarkError::bytecode(pp.exp_id, format!("bad column block {bp}")))?
        + sp;
    if col >= layout.total_cols {
        return Err(StarkError::bytecode(
            pp.exp_id,
            format!("column {col} outside the row window"),
        ));
    }
    Ok(col)
}

struct UsedColumns {
    const_pols: Vec<bool>,
    cm_pols: Vec<bool>,
    custom: Vec<Vec<bool>>,
}

fn splat_ext(out: &mut [F; FIELD_EXTENSION * NROWS_PACK], value: &[F]) {
    for c in 0..FIELD_EXTENSION {
        for j in 0..NROWS_PACK {
            out[c * NROWS_PACK + j] = value[c];
        }
    }
}

fn write_ext(tmp3: &mut [F], dst: usize, vals: &[F; FIELD_EXTENSION * NROWS_PACK]) {
    let base = dst * FIELD_EXTENSION * NROWS_PACK;
    tmp3[base..base + FIELD_EXTENSION * NROWS_PACK].copy_from_slice(vals);
}

fn op_base(op: u16, a: &[F; NROWS_PACK], b: &[F; NROWS_PACK]) -> [F; NROWS_PACK] {
    let mut out = [F::ZERO; NROWS_PACK];
    for j in 0..NROWS_PACK {
        out[j] = match op {
            OP_ADD => a[j] + b[j],
            OP_SUB => a[j] - b[j],
            _ => a[j] * b[j],
        };
    }
    out
}

fn op_ext(
    op: u16,
    a: &[F; FIELD_EXTENSION * NROWS_PACK],
    b: &[F; FIELD_EXTENSION * NROWS_PACK],
    len: usize,
) -> [F; FIELD_EXTENSION * NROWS_PACK] {
    let mut out = [F::ZERO; FIELD_EXTENSION * NROWS_PACK];
    match op {
        OP_ADD => {
            for i in 0..FIELD_EXTENSION * NROWS_PACK {
                out[i] = a[i] + b[i];
            }
        }
        OP_SUB => {
            for i in 0..FIELD_EXTENSION * NROWS_PACK {
                out[i] = a[i] - b[i];
            }
        }
        _ => {
            for j in 0..len.min(NROWS_PACK) {
                let av = E::new(a[j], a[NROWS_PACK + j], a[2 * NROWS_PACK + j]);
                let bv = E::new(b[j], b[NROWS_PACK + j], b[2 * NROWS_PACK + j]);
                let prod = av * bv;
                let arr = prod.to_basefield_array();
                out[j] = arr[0];
                out[NROWS_PACK + j] = arr[1];
                out[2 * NROWS_PACK + j] = arr[2];
            }
        }
    }
    out
}

fn op_ext_base(
    op: u16,
    a: &[F; FIELD_EXTENSION * NROWS_PACK],
    b: &[F; NROWS_PACK],
) -> [F; FIELD_EXTENSION * NROWS_PACK] {
    let mut out = *a;
    match op {
        OP_ADD => {
            for j in 0..NROWS_PACK {
                out[j] = a[j] + b[j];
            }
        }
        OP_SUB => {
            for j in 0..NROWS_PACK {
                out[j] = a[j] - b[j];
            }
        }
        _ => {
            for c in 0..FIELD_EXTENSION {
                for j in 0..NROWS_PACK {
                    out[c * NROWS_PACK + j] = a[c * NROWS_PACK + j] * b[j];
                }
            }
        }
    }
    out
}

/// Element-wise inversion of a freshly evaluated slot. A zero here is a
/// prover bug (the constraint system guarantees non-zero) and aborts.
fn apply_inverse(
    slot: &mut [F],
    dim: usize,
    len: usize,
    inverse: bool,
    exp_id: u64,
) -> StarkResult<()> {
    if !inverse {
        return Ok(());
    }
    if dim == 1 {
        let inverses = try_batch_inverse(&slot[..len])
            .ok_or(StarkError::InverseOfZero { exp_id })?;
        slot[..len].copy_from_slice(&inverses);
    } else {
        for j in 0..len {
            let value = E::new(
                slot[j],
                slot[NROWS_PACK + j],
                slot[2 * NROWS_PACK + j],
            );
            let inv = value
                .try_inverse()
                .ok_or(StarkError::InverseOfZero { exp_id })?;
            let arr = inv.to_basefield_array();
            slot[j] = arr[0];
            slot[NROWS_PACK + j] = arr[1];
            slot[2 * NROWS_PACK + j] = arr[2];
        }
    }
    Ok(())
}

/// Fuses a multi-param destination into its first slot: the first two
/// sources are multiplied element-wise, a third one is added on top.
fn combine_params(dest: &Dest, dest_vals: &mut [F], len: usize) {
    let slot = FIELD_EXTENSION * NROWS_PACK;
    let read_ext = |vals: &[F], k: usize, j: usize| {
        E::new(
            vals[k * slot + j],
            vals[k * slot + NROWS_PACK + j],
            vals[k * slot + 2 * NROWS_PACK + j],
        )
    };

    if dest.dim() == 1 {
        for j in 0..len {
            let prod = dest_vals[j] * dest_vals[slot + j];
            dest_vals[j] = if dest.params.len() > 2 {
                prod + dest_vals[2 * slot + j]
            } else {
                prod
            };
        }
        return;
    }

    let dims: Vec<usize> = dest.params.iter().map(|p| p.dim).collect();
    for j in 0..len {
        let a = read_ext(dest_vals, 0, j);
        let b = read_ext(dest_vals, 1, j);
        let mut out = match (dims[0], dims[1]) {
            (3, 3) => a * b,
            (3, 1) => a.mul_by_base(dest_vals[slot + j]),
            _ => b.mul_by_base(dest_vals[j]),
        };
        if dest.params.len() > 2 {
            out += read_ext(dest_vals, 2, j);
        }
        let arr = out.to_basefield_array();
        dest_vals[j] = arr[0];
        dest_vals[NROWS_PACK + j] = arr[1];
        dest_vals[2 * NROWS_PACK + j] = arr[2];
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::expressions_bin::ExpressionsBin;
    use crate::setup::SetupCtx;

    fn tiny_setup(ops: Vec<u8>, args: Vec<u16>, n_temp1: usize, n_temp3: usize) -> SetupCtx {
        let json = r#"{
            "starkStruct": {
                "nBits": 3, "nBitsExt": 4, "nQueries": 2,
                "verificationHashType": "GL", "steps": [{ "nBits": 4 }]
            },
            "nPublics": 1, "nConstants": 0, "nStages": 1,
            "openingPoints": [0],
            "boundaries": [{ "name": "everyRow" }],
            "qDeg": 1, "qDim": 3, "friExpId": 98, "cExpId": 99,
            "cmPolsMap": [
                { "stage": 1, "name": "a", "dim": 1, "stagePos": 0, "stageId": 0, "polsMapId": 0 }
            ],
            "mapSectionsN": { "cm1": 1, "cm2": 3, "const": 0 }
        }"#;
        let stark_info = crate::stark_info::StarkInfo::from_json(json, false).unwrap();

        let n_args = args.len();
        let n_ops = ops.len();
        let mut expressions_info = HashMap::new();
        expressions_info.insert(
            7,
            ParserParams {
                exp_id: 7,
                dest_dim: if n_temp3 > 0 { 3 } else { 1 },
                dest_id: 0,
                n_temp1,
                n_temp3,
                n_ops,
                n_args,
                n_cm_pols_used: 1,
                ..Default::default()
            },
        );
        let expressions_bin = ExpressionsBin {
            expressions_info,
            expressions_bin_args_expressions: ParserArgs {
                ops,
                args,
                numbers: vec![5, 0],
                cm_pols_ids: vec![0],
                ..Default::default()
            },
            ..Default::default()
        };
        SetupCtx::new(stark_info, expressions_bin)
    }

    fn eval(setup: &SetupCtx, trace: &[F], inverse: bool) -> StarkResult<Vec<F>> {
        let aux = vec![F::ZERO; setup.stark_info.map_total_n];
        let publics = [F::from_canonical_u64(9)];
        let params = StepsParams {
            trace,
            aux_trace: &aux,
            public_inputs: &publics,
            ..Default::default()
        };
        ExpressionsPack::new(setup).calculate_expression(&params, 7, inverse)
    }

    #[test]
    fn interpreter_matches_scalar_reference() {
        // t0 = a + public; t1 = t0 * number(5)
        let ops = vec![3, 9];
        let args = vec![0, 0, 1, 0, 0, 2, 1, 0, 0];
        let setup = tiny_setup(ops, args, 2, 0);
        // destId defaults to 0 but the result lives in t1.
        let mut setup = setup;
        setup
            .expressions_bin
            .expressions_info
            .get_mut(&7)
            .unwrap()
            .dest_id = 1;

        let trace: Vec<F> = (0..8).map(F::from_canonical_u64).collect();
        let out = eval(&setup, &trace, false).unwrap();
        for (row, &a) in trace.iter().enumerate() {
            let expected = (a + F::from_canonical_u64(9)) * F::from_canonical_u64(5);
            assert_eq!(out[row], expected, "row {row}");
        }
    }

    #[test]
    fn unknown_opcode_aborts() {
        let setup = tiny_setup(vec![200], vec![0, 0], 1, 0);
        let trace = vec![F::ZERO; 8];
        match eval(&setup, &trace, false) {
            Err(StarkError::Bytecode { exp_id: 7, .. }) => {}
            other => panic!("expected bytecode error, got {other:?}"),
        }
    }

    #[test]
    fn argument_count_mismatch_aborts() {
        // Opcode 15 consumes 2 args but 3 are declared.
        let setup = tiny_setup(vec![15], vec![0, 0, 0], 1, 0);
        let trace = vec![F::ZERO; 8];
        assert!(matches!(
            eval(&setup, &trace, false),
            Err(StarkError::Bytecode { .. })
        ));
    }

    #[test]
    fn inversion_of_zero_aborts() {
        // t0 = copy number(0); inverted destination must abort.
        let setup = tiny_setup(vec![15], vec![0, 1], 1, 0);
        let trace = vec![F::ZERO; 8];
        match eval(&setup, &trace, true) {
            Err(StarkError::InverseOfZero { exp_id: 7 }) => {}
            other => panic!("expected inverse-of-zero, got {other:?}"),
        }
    }

    #[test]
    fn opening_window_wraps_around() {
        // t0 = copy a at the shifted opening; with offset 1 row N-1 reads
        // row 0.
        let json_openings: Vec<i64> = vec![1];
        let ops = vec![0];
        let args = vec![0, 1, 0];
        let mut setup = tiny_setup(ops, args, 1, 0);
        setup.stark_info.opening_points = json_openings;

        let trace: Vec<F> = (0..8).map(F::from_canonical_u64).collect();
        let out = eval(&setup, &trace, false).unwrap();
        for row in 0..8 {
            assert_eq!(out[row], trace[(row + 1) % 8], "row {row}");
        }
    }
}
