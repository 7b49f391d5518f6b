//! Per-setup context: the immutable descriptor pair plus precomputed domain
//! helpers (zerofier-inverse tables, coset points, quotient chunk scalars).

use estark_field::types::Field;
use estark_field::FIELD_EXTENSION;

use crate::errors::{StarkError, StarkResult};
use crate::expressions_bin::ExpressionsBin;
use crate::stark_info::StarkInfo;
use crate::{E, F};

/// Precomputed helper tables. The prover carries whole-domain tables; the
/// verifier only needs the same values at the opening challenge.
#[derive(Clone, Debug)]
pub enum ProverHelpers {
    Domain {
        /// `boundaries.len() * N_ext` zerofier multipliers, one row-set each.
        zi: Vec<F>,
        /// `w(nBits)^i` over the base domain.
        x_n: Vec<F>,
        /// `shift * w(nBitsExt)^k` over the extended coset.
        x_2ns: Vec<F>,
        /// `shift^(-p*N)` for each quotient chunk.
        s: Vec<F>,
    },
    Point {
        /// `boundaries.len()` extension values of the same multipliers at xi.
        zi: Vec<F>,
        xi: [F; FIELD_EXTENSION],
    },
}

impl ProverHelpers {
    pub fn for_domain(stark_info: &StarkInfo) -> Self {
        let n = stark_info.n_rows();
        let n_ext = stark_info.n_rows_ext();
        let n_bits = stark_info.stark_struct.n_bits;
        let n_bits_ext = stark_info.stark_struct.n_bits_ext;
        let extend_bits = n_bits_ext - n_bits;
        let extend = 1 << extend_bits;
        let shift = F::coset_shift();

        let x_n: Vec<F> = F::primitive_root_of_unity(n_bits).powers().take(n).collect();
        let x_2ns: Vec<F> = F::primitive_root_of_unity(n_bits_ext)
            .powers()
            .take(n_ext)
            .map(|w| shift * w)
            .collect();

        // Z_H(x) = x^N - 1 on the extended coset has period `extend`.
        let sn = shift.exp_power_of_2(n_bits);
        let w_ext = F::primitive_root_of_unity(extend_bits.max(1));
        let mut zh_inv = Vec::with_capacity(extend);
        let mut w = F::ONE;
        for _ in 0..extend {
            zh_inv.push((sn * w - F::ONE).inverse());
            if extend > 1 {
                w *= w_ext;
            }
        }

        let mut zi = vec![F::ZERO; stark_info.boundaries.len() * n_ext];
        for i in 0..n_ext {
            zi[i] = zh_inv[i % extend];
        }
        for (b, boundary) in stark_info.boundaries.iter().enumerate().skip(1) {
            match boundary.name.as_str() {
                "firstRow" => build_one_row_zerofier_inv(&mut zi, &x_2ns, b, 0, n_bits),
                "lastRow" => build_one_row_zerofier_inv(&mut zi, &x_2ns, b, n - 1, n_bits),
                "everyFrame" => build_frame_zerofier(
                    &mut zi,
                    &x_2ns,
                    b,
                    boundary.offset_min,
                    boundary.offset_max,
                    n_bits,
                ),
                _ => {}
            }
        }

        let shift_inv_n = shift.inverse().exp_u64(n as u64);
        let s: Vec<F> = shift_inv_n.powers().take(stark_info.q_deg.max(1)).collect();

        ProverHelpers::Domain { zi, x_n, x_2ns, s }
    }

    /// Evaluates the same zerofier multipliers at a single extension point,
    /// for the verifier's one-row expression evaluations.
    pub fn for_point(stark_info: &StarkInfo, xi: [F; FIELD_EXTENSION]) -> StarkResult<Self> {
        let n = stark_info.n_rows();
        let n_bits = stark_info.stark_struct.n_bits;
        let z = E::from_basefield_slice(&xi);

        let z_n = z.exp_u64(n as u64);
        let z_h = z_n - E::ONE;
        let z_h_inv = z_h
            .try_inverse()
            .ok_or(StarkError::InverseOfZero { exp_id: 0 })?;

        let mut zi = vec![F::ZERO; stark_info.boundaries.len() * FIELD_EXTENSION];
        zi[..FIELD_EXTENSION].copy_from_slice(&z_h_inv.to_basefield_array());

        let w = F::primitive_root_of_unity(n_bits);
        for (b, boundary) in stark_info.boundaries.iter().enumerate().skip(1) {
            let value = match boundary.name.as_str() {
                "firstRow" => {
                    let denom = z - E::ONE;
                    denom
                        .try_inverse()
                        .ok_or(StarkError::InverseOfZero { exp_id: 0 })?
                        * z_h
                }
                "lastRow" => {
                    let root = w.exp_u64(n as u64 - 1);
                    let denom = z - E::from_basefield(root);
                    denom
                        .try_inverse()
                        .ok_or(StarkError::InverseOfZero { exp_id: 0 })?
                        * z_h
                }
                "everyFrame" => {
                    let mut acc = E::ONE;
                    for i in 0..boundary.offset_min {
                        acc *= z - E::from_basefield(w.exp_u64(i as u64));
                    }
                    for i in 0..boundary.offset_max {
                        acc *= z - E::from_basefield(w.exp_u64((n - 1 - i) as u64));
                    }
                    acc
                }
                _ => continue,
            };
            zi[b * FIELD_EXTENSION..(b + 1) * FIELD_EXTENSION]
                .copy_from_slice(&value.to_basefield_array());
        }

        Ok(ProverHelpers::Point { zi, xi })
    }

    pub fn is_point(&self) -> bool {
        matches!(self, ProverHelpers::Point { .. })
    }
}

/// `zi[b] = Z_H(x) / (x - w^row)` over the extended coset.
fn build_one_row_zerofier_inv(zi: &mut [F], x_2ns: &[F], boundary: usize, row: usize, n_bits: usize) {
    let n_ext = x_2ns.len();
    let root = F::primitive_root_of_unity(n_bits).exp_u64(row as u64);
    for (i, &x) in x_2ns.iter().enumerate() {
        // zi[i] already holds 1 / Z_H(x).
        zi[boundary * n_ext + i] = ((x - root) * zi[i]).inverse();
    }
}

/// `zi[b] = prod (x - w^row)` over the frame rows; left as a plain product,
/// matching the point-mode evaluation.
fn build_frame_zerofier(
    zi: &mut [F],
    x_2ns: &[F],
    boundary: usize,
    offset_min: usize,
    offset_max: usize,
    n_bits: usize,
) {
    let n_ext = x_2ns.len();
    let n = 1usize << n_bits;
    let w = F::primitive_root_of_unity(n_bits);
    let mut roots = Vec::with_capacity(offset_min + offset_max);
    for i in 0..offset_min {
        roots.push(w.exp_u64(i as u64));
    }
    for i in 0..offset_max {
        roots.push(w.exp_u64((n - 1 - i) as u64));
    }
    for (i, &x) in x_2ns.iter().enumerate() {
        let mut acc = F::ONE;
        for &root in &roots {
            acc *= x - root;
        }
        zi[boundary * n_ext + i] = acc;
    }
}

/// Everything a prove or verify task shares read-only.
#[derive(Debug)]
pub struct SetupCtx {
    pub stark_info: StarkInfo,
    pub expressions_bin: ExpressionsBin,
    pub prover_helpers: ProverHelpers,
}

impl SetupCtx {
    pub fn new(stark_info: StarkInfo, expressions_bin: ExpressionsBin) -> Self {
        let prover_helpers = ProverHelpers::for_domain(&stark_info);
        SetupCtx {
            stark_info,
            expressions_bin,
            prover_helpers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stark_info::{Boundary, StarkInfo};

    fn info_with_boundaries() -> StarkInfo {
        let json = r#"{
            "starkStruct": {
                "nBits": 3, "nBitsExt": 4, "nQueries": 2,
                "verificationHashType": "GL", "steps": [{ "nBits": 4 }]
            },
            "nPublics": 0, "nConstants": 0, "nStages": 1,
            "openingPoints": [0],
            "boundaries": [{ "name": "everyRow" }],
            "qDeg": 2, "qDim": 3, "friExpId": 1, "cExpId": 0,
            "mapSectionsN": { "cm1": 1, "cm2": 6, "const": 0 }
        }"#;
        let mut info = StarkInfo::from_json(json, false).unwrap();
        info.boundaries.push(Boundary {
            name: "firstRow".to_string(),
            offset_min: 0,
            offset_max: 0,
        });
        info
    }

    #[test]
    fn zerofier_inverse_really_inverts() {
        let info = info_with_boundaries();
        let helpers = ProverHelpers::for_domain(&info);
        let ProverHelpers::Domain { zi, x_2ns, .. } = &helpers else {
            panic!("domain helpers expected");
        };

        let n = 8u64;
        for (i, &x) in x_2ns.iter().enumerate() {
            let zh = x.exp_u64(n) - F::ONE;
            assert_eq!(zi[i] * zh, F::ONE, "row {i}");
            // firstRow multiplier times everyRow multiplier gives 1/(x-1).
            let first = zi[16 + i];
            assert_eq!(first * zi[i] * (x - F::ONE), F::ONE, "row {i}");
        }
    }

    #[test]
    fn point_helpers_match_domain_form() {
        let info = info_with_boundaries();
        let xi = [F::from_canonical_u64(12345), F::ONE, F::TWO];
        let helpers = ProverHelpers::for_point(&info, xi).unwrap();
        let ProverHelpers::Point { zi, .. } = &helpers else {
            panic!("point helpers expected");
        };
        let z = E::from_basefield_slice(&xi);
        let zh = z.exp_u64(8) - E::ONE;
        let zi0 = E::from_basefield_slice(&zi[0..3]);
        assert_eq!(zi0 * zh, E::ONE);
        let zi1 = E::from_basefield_slice(&zi[3..6]);
        assert_eq!(zi1 * zi0 * (z - E::ONE), E::ONE);
    }

    #[test]
    fn quotient_chunk_scalars() {
        let info = info_with_boundaries();
        let ProverHelpers::Domain { s, .. } = ProverHelpers::for_domain(&info) else {
            panic!();
        };
        assert_eq!(s.len(), 2);
        assert_eq!(s[0], F::ONE);
        assert_eq!(s[1] * F::coset_shift().exp_u64(8), F::ONE);
    }
}
