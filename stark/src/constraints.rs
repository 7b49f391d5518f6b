//! Debug-mode constraint checking: every compiled constraint expression is
//! evaluated over the base domain and non-zero rows are reported.

use estark_field::types::PrimeField64;

use crate::errors::{ConstraintFailure, StarkError, StarkResult};
use crate::expressions::{Dest, ExpressionsPack, StepsParams};
use crate::setup::SetupCtx;
use crate::{F, FIELD_EXTENSION};

#[derive(Clone, Debug)]
pub struct ConstraintInfo {
    pub id: usize,
    pub stage: u32,
    pub im_pol: bool,
    pub line: String,
    /// Total number of offending rows.
    pub n_rows: usize,
    /// Up to ten samples: the first half from the start, the rest from the
    /// end of the offending set.
    pub rows: Vec<ConstraintFailure>,
}

impl ConstraintInfo {
    pub fn is_valid(&self) -> bool {
        self.n_rows == 0
    }
}

fn constraint_value(dest: &[F], dim: usize, row: usize) -> [u64; FIELD_EXTENSION] {
    let mut value = [0u64; FIELD_EXTENSION];
    for d in 0..dim {
        value[d] = dest[row * dim + d].to_canonical_u64();
    }
    value
}

/// Evaluates every debug constraint in one shared-window pass.
pub fn verify_constraints(
    setup: &SetupCtx,
    params: &StepsParams,
) -> StarkResult<Vec<ConstraintInfo>> {
    let info = &setup.stark_info;
    let n = info.n_rows();
    let constraints = &setup.expressions_bin.constraints_info_debug;

    let mut dests = Vec::with_capacity(constraints.len());
    for constraint in constraints {
        let mut dest = Dest::new();
        dest.add_params(constraint, false);
        dests.push(dest);
    }

    let pack = ExpressionsPack::new(setup);
    let outs = pack.calculate_expressions(
        params,
        &setup.expressions_bin.expressions_bin_args_constraints,
        &dests,
        n,
    )?;

    let mut results = Vec::with_capacity(constraints.len());
    for (id, (constraint, out)) in constraints.iter().zip(&outs).enumerate() {
        let dim = constraint.dest_dim;
        let mut offending = Vec::new();
        for row in constraint.first_row..=constraint.last_row.min(n - 1) {
            let value = constraint_value(out, dim, row);
            if value.iter().any(|&v| v != 0) {
                offending.push(ConstraintFailure { row, value });
            }
        }

        let n_rows = offending.len();
        let keep = n_rows.min(10);
        let head = keep / 2;
        let mut rows = Vec::with_capacity(keep);
        rows.extend_from_slice(&offending[..head]);
        if n_rows > keep {
            rows.extend_from_slice(&offending[n_rows - (keep - head)..]);
        } else {
            rows.extend_from_slice(&offending[head..]);
        }

        results.push(ConstraintInfo {
            id,
            stage: constraint.stage,
            im_pol: constraint.im_pol,
            line: constraint.line.clone(),
            n_rows,
            rows,
        });
    }
    Ok(results)
}

/// Like [`verify_constraints`] but turns the first violated constraint into
/// an error.
pub fn check_constraints(setup: &SetupCtx, params: &StepsParams) -> StarkResult<()> {
    let results = verify_constraints(setup, params)?;
    for result in results {
        if !result.is_valid() {
            return Err(StarkError::ConstraintViolation {
                line: result.line,
                rows: result.rows,
            });
        }
    }
    Ok(())
}
