//! End-to-end prove/verify round trip over a one-column AIR with the
//! constraint `p(x*w) = p(x) + 1` on all rows but the last and `p = 0` on
//! the first row. The expression bytecode is assembled by hand, playing the
//! role of the PIL2 compiler.

use std::collections::HashMap;

use estark_field::fft::extend_pol;
use estark_field::types::Field;

use crate::config::GoldilocksConfig;
use crate::errors::StarkError;
use crate::expressions::ExpressionsPack;
use crate::expressions_bin::{ExpressionsBin, ParserArgs, ParserParams};
use crate::setup::{ProverHelpers, SetupCtx};
use crate::stark_info::{
    Boundary, EvMap, EvMapType, PolMap, StarkInfo, StarkStruct, StepStruct,
};
use crate::starks::{gen_proof, ProverContext};
use crate::verifier::stark_verify;
use crate::{E, F, FIELD_EXTENSION};

const N_BITS: usize = 3;
const N_BITS_EXT: usize = 4;
const N: usize = 1 << N_BITS;
const N_EXT: usize = 1 << N_BITS_EXT;

const C_EXP_ID: u64 = 0;
const FRI_EXP_ID: u64 = 1;

// Challenge indices in challengesMap order.
const ALPHA0: u16 = 0;
const ALPHA1: u16 = 1;
const VF1: u16 = 3;

// Column blocks of the row window: ns = 3 (const, cm1, cm2), two openings;
// the extras block sits at ns * nOpenings.
const BP_CONST_0: u16 = 0;
const BP_CM1_0: u16 = 1;
const BP_CM2_0: u16 = 2;
const BP_CM1_1: u16 = 4;
const BP_EXTRAS: u16 = 6;

fn stark_info(verify: bool) -> StarkInfo {
    let mut map_sections_n = HashMap::new();
    map_sections_n.insert("const".to_string(), 1);
    map_sections_n.insert("cm1".to_string(), 1);
    map_sections_n.insert("cm2".to_string(), 3);

    let mut info = StarkInfo {
        stark_struct: StarkStruct {
            n_bits: N_BITS,
            n_bits_ext: N_BITS_EXT,
            n_queries: 4,
            hash_commits: false,
            verification_hash_type: "GL".to_string(),
            merkle_tree_arity: None,
            merkle_tree_custom: None,
            steps: vec![StepStruct { n_bits: 4 }, StepStruct { n_bits: 2 }],
        },
        airgroup_id: 0,
        air_id: 0,
        n_publics: 0,
        n_constants: 1,
        n_stages: 1,
        custom_commits: vec![],
        cm_pols_map: vec![
            PolMap {
                stage: 1,
                name: "p".to_string(),
                dim: 1,
                ..Default::default()
            },
            PolMap {
                stage: 2,
                name: "Q".to_string(),
                dim: 3,
                pols_map_id: 1,
                ..Default::default()
            },
        ],
        const_pols_map: vec![PolMap {
            name: "L".to_string(),
            dim: 1,
            ..Default::default()
        }],
        challenges_map: vec![
            PolMap {
                stage: 2,
                name: "alpha0".to_string(),
                dim: 3,
                ..Default::default()
            },
            PolMap {
                stage: 2,
                name: "alpha1".to_string(),
                dim: 3,
                stage_id: 1,
                ..Default::default()
            },
            PolMap {
                stage: 3,
                name: "xi".to_string(),
                dim: 3,
                ..Default::default()
            },
            PolMap {
                stage: 4,
                name: "vf1".to_string(),
                dim: 3,
                ..Default::default()
            },
            PolMap {
                stage: 4,
                name: "vf2".to_string(),
                dim: 3,
                stage_id: 1,
                ..Default::default()
            },
        ],
        airgroup_values_map: vec![],
        air_values_map: vec![],
        proof_values_map: vec![],
        publics_map: vec![],
        custom_commits_map: vec![],
        ev_map: vec![
            EvMap {
                ty: EvMapType::Cm,
                id: 0,
                prime: 0,
                commit_id: 0,
                opening_pos: None,
            },
            EvMap {
                ty: EvMapType::Cm,
                id: 0,
                prime: 1,
                commit_id: 0,
                opening_pos: None,
            },
            EvMap {
                ty: EvMapType::Cm,
                id: 1,
                prime: 0,
                commit_id: 0,
                opening_pos: None,
            },
            EvMap {
                ty: EvMapType::Const,
                id: 0,
                prime: 0,
                commit_id: 0,
                opening_pos: None,
            },
        ],
        opening_points: vec![0, 1],
        boundaries: vec![
            Boundary {
                name: "everyRow".to_string(),
                offset_min: 0,
                offset_max: 0,
            },
            Boundary {
                name: "firstRow".to_string(),
                offset_min: 0,
                offset_max: 0,
            },
        ],
        q_deg: 1,
        q_dim: 3,
        fri_exp_id: FRI_EXP_ID,
        c_exp_id: C_EXP_ID,
        map_sections_n,
        map_offsets: HashMap::new(),
        map_total_n: 0,
        verify: false,
    };
    info.finalize(verify).unwrap();
    info
}

/// The FRI combination `acc = acc * vf1 + (ev_i - col_i(x)) * x/(x - xi_o)`
/// over the four opened values. The same bytecode serves prover and
/// verifier: both address columns through the row window.
fn fri_expression(ops: &mut Vec<u8>, args: &mut Vec<u16>) -> ParserParams {
    let ops_offset = ops.len();
    let args_offset = args.len();

    // t0 = (ev0 - p[0]) * xDivXSub_0
    ops.push(65);
    args.extend_from_slice(&[1, 0, 0, BP_CM1_0, 0]);
    ops.push(47);
    args.extend_from_slice(&[2, 0, BP_EXTRAS, 0, 0]);
    // acc = t0
    ops.push(51);
    args.extend_from_slice(&[1, 0]);
    // t2 = (ev1 - p) * xDivXSub_1; the shifted opening only changes the
    // denominator, the column itself is read at the current row.
    ops.push(65);
    args.extend_from_slice(&[1, 2, 1, BP_CM1_0, 0]);
    ops.push(47);
    args.extend_from_slice(&[2, 2, BP_EXTRAS, 3, 2]);
    // acc = acc * vf1 + t2
    ops.push(53);
    args.extend_from_slice(&[2, 1, 1, VF1]);
    ops.push(52);
    args.extend_from_slice(&[0, 1, 1, 2]);
    // t3 = (Q[0] - ev2) * xDivXSub_0
    ops.push(66);
    args.extend_from_slice(&[1, 3, BP_CM2_0, 0, 2]);
    ops.push(47);
    args.extend_from_slice(&[2, 3, BP_EXTRAS, 0, 3]);
    // acc = acc * vf1 + t3
    ops.push(53);
    args.extend_from_slice(&[2, 1, 1, VF1]);
    ops.push(52);
    args.extend_from_slice(&[0, 1, 1, 3]);
    // t4 = (ev3 - L[0]) * xDivXSub_0
    ops.push(65);
    args.extend_from_slice(&[1, 4, 3, BP_CONST_0, 0]);
    ops.push(47);
    args.extend_from_slice(&[2, 4, BP_EXTRAS, 0, 4]);
    // acc = acc * vf1 + t4
    ops.push(53);
    args.extend_from_slice(&[2, 1, 1, VF1]);
    ops.push(52);
    args.extend_from_slice(&[0, 1, 1, 4]);

    ParserParams {
        exp_id: FRI_EXP_ID,
        dest_dim: FIELD_EXTENSION,
        dest_id: 1,
        stage: 4,
        n_temp1: 0,
        n_temp3: 5,
        n_ops: ops.len() - ops_offset,
        ops_offset,
        n_args: args.len() - args_offset,
        args_offset,
        ..Default::default()
    }
}

/// Prover-side expression binary: the quotient expression over whole
/// columns plus the FRI combination.
fn prover_bin() -> ExpressionsBin {
    let mut ops: Vec<u8> = Vec::new();
    let mut args: Vec<u16> = Vec::new();

    // Quotient: alpha0 * (p[1] - p[0] - 1) * L * Z_everyRow
    //         + alpha1 * p[0] * Z_firstRow * Z_everyRow.
    // Extras: x at +0, zi_everyRow at +1, zi_firstRow at +2.
    let ops_offset = ops.len();
    let args_offset = args.len();
    // t0 = p[1] - p[0]
    ops.push(1);
    args.extend_from_slice(&[1, 0, BP_CM1_1, 0, BP_CM1_0, 0]);
    // t1 = t0 - 1
    ops.push(9);
    args.extend_from_slice(&[1, 1, 0, 0]);
    // t2 = L * t1
    ops.push(2);
    args.extend_from_slice(&[2, 2, BP_CONST_0, 0, 1]);
    // t3 = zi_everyRow * t2
    ops.push(2);
    args.extend_from_slice(&[2, 3, BP_EXTRAS, 1, 2]);
    // e0 = alpha0 * t3
    ops.push(31);
    args.extend_from_slice(&[2, 0, ALPHA0, 3]);
    // t4 = p[0] * zi_firstRow
    ops.push(1);
    args.extend_from_slice(&[2, 4, BP_CM1_0, 0, BP_EXTRAS, 2]);
    // t5 = zi_everyRow * t4
    ops.push(2);
    args.extend_from_slice(&[2, 5, BP_EXTRAS, 1, 4]);
    // e1 = alpha1 * t5
    ops.push(31);
    args.extend_from_slice(&[2, 1, ALPHA1, 5]);
    // e2 = e0 + e1
    ops.push(52);
    args.extend_from_slice(&[0, 2, 0, 1]);

    let c_exp = ParserParams {
        exp_id: C_EXP_ID,
        dest_dim: FIELD_EXTENSION,
        dest_id: 2,
        stage: 2,
        n_temp1: 6,
        n_temp3: 3,
        n_ops: ops.len() - ops_offset,
        ops_offset,
        n_args: args.len() - args_offset,
        args_offset,
        n_cm_pols_used: 1,
        cm_pols_offset: 0,
        n_const_pols_used: 1,
        const_pols_offset: 0,
        ..Default::default()
    };

    let mut fri_exp = fri_expression(&mut ops, &mut args);
    fri_exp.n_cm_pols_used = 2;
    fri_exp.cm_pols_offset = 1;
    fri_exp.n_const_pols_used = 1;
    fri_exp.const_pols_offset = 1;

    let mut expressions_info = HashMap::new();
    expressions_info.insert(C_EXP_ID, c_exp);
    expressions_info.insert(FRI_EXP_ID, fri_exp);

    ExpressionsBin {
        expressions_info,
        constraints_info_debug: Vec::new(),
        hints: Vec::new(),
        expressions_bin_args_constraints: ParserArgs::default(),
        expressions_bin_args_expressions: ParserArgs {
            ops,
            args,
            numbers: vec![1],
            cm_pols_ids: vec![0, 0, 1],
            const_pols_ids: vec![0, 0],
            ..Default::default()
        },
    }
}

/// Verifier-side binary: the quotient combination re-expressed over the
/// opened evaluations, plus the same FRI combination.
fn verifier_bin() -> ExpressionsBin {
    let mut ops: Vec<u8> = Vec::new();
    let mut args: Vec<u16> = Vec::new();

    // Point-mode extras: xi at +0..3, zi_everyRow at +3..6, zi_firstRow at
    // +6..9, all extension-valued.
    let ops_offset = ops.len();
    let args_offset = args.len();
    // t0 = ev1 - ev0
    ops.push(67);
    args.extend_from_slice(&[1, 0, 1, 0]);
    // t0 = t0 - 1
    ops.push(28);
    args.extend_from_slice(&[1, 0, 0, 0]);
    // t0 = t0 * ev3 (L at xi)
    ops.push(64);
    args.extend_from_slice(&[2, 0, 0, 3]);
    // t0 = zi_everyRow * t0
    ops.push(47);
    args.extend_from_slice(&[2, 0, BP_EXTRAS, 3, 0]);
    // t0 = t0 * alpha0
    ops.push(53);
    args.extend_from_slice(&[2, 0, 0, ALPHA0]);
    // t1 = ev0
    ops.push(62);
    args.extend_from_slice(&[1, 0]);
    // t1 = zi_firstRow * t1
    ops.push(47);
    args.extend_from_slice(&[2, 1, BP_EXTRAS, 6, 1]);
    // t1 = zi_everyRow * t1
    ops.push(47);
    args.extend_from_slice(&[2, 1, BP_EXTRAS, 3, 1]);
    // t1 = t1 * alpha1
    ops.push(53);
    args.extend_from_slice(&[2, 1, 1, ALPHA1]);
    // t0 = t0 + t1
    ops.push(52);
    args.extend_from_slice(&[0, 0, 0, 1]);

    let c_exp = ParserParams {
        exp_id: C_EXP_ID,
        dest_dim: FIELD_EXTENSION,
        dest_id: 0,
        stage: 2,
        n_temp1: 0,
        n_temp3: 2,
        n_ops: ops.len() - ops_offset,
        ops_offset,
        n_args: args.len() - args_offset,
        args_offset,
        ..Default::default()
    };

    let mut fri_exp = fri_expression(&mut ops, &mut args);
    fri_exp.n_cm_pols_used = 2;
    fri_exp.cm_pols_offset = 0;
    fri_exp.n_const_pols_used = 1;
    fri_exp.const_pols_offset = 0;

    let mut expressions_info = HashMap::new();
    expressions_info.insert(C_EXP_ID, c_exp);
    expressions_info.insert(FRI_EXP_ID, fri_exp);

    ExpressionsBin {
        expressions_info,
        constraints_info_debug: Vec::new(),
        hints: Vec::new(),
        expressions_bin_args_constraints: ParserArgs::default(),
        expressions_bin_args_expressions: ParserArgs {
            ops,
            args,
            numbers: vec![1],
            cm_pols_ids: vec![0, 1],
            const_pols_ids: vec![0],
            ..Default::default()
        },
    }
}

fn witness() -> (Vec<F>, Vec<F>, Vec<F>) {
    let trace: Vec<F> = (0..N as u64).map(F::from_canonical_u64).collect();
    let mut const_pols = vec![F::ONE; N];
    const_pols[N - 1] = F::ZERO;
    let mut const_pols_extended = vec![F::ZERO; N_EXT];
    extend_pol(&mut const_pols_extended, &const_pols, N_EXT, N, 1);
    (trace, const_pols, const_pols_extended)
}

fn prove() -> (SetupCtx, crate::proof::Proof<GoldilocksConfig>, Vec<F>, Vec<F>) {
    let setup = SetupCtx::new(stark_info(false), prover_bin());
    let (trace, const_pols, const_pols_extended) = witness();
    let proof = gen_proof::<GoldilocksConfig>(
        &setup,
        &trace,
        &[],
        &[],
        &const_pols,
        &const_pols_extended,
        vec![],
        vec![],
        None,
    )
    .unwrap();
    (setup, proof, const_pols, const_pols_extended)
}

fn verify(proof: &crate::proof::Proof<GoldilocksConfig>, verkey: &[F; 4]) -> Result<(), StarkError> {
    let info_v = stark_info(true);
    let bin_v = verifier_bin();
    stark_verify::<GoldilocksConfig>(&info_v, &bin_v, verkey, proof, &[], &[])
}

fn verkey_of(const_pols_extended: &[F]) -> [F; 4] {
    use crate::merkle_tree::MerkleTree;
    let mut tree = MerkleTree::<GoldilocksConfig>::new(2, true, N_EXT, 1);
    tree.merkelize(const_pols_extended).unwrap();
    tree.root()
}

#[test]
fn honest_proof_verifies() -> anyhow::Result<()> {
    let (_, proof, _, const_ext) = prove();
    let verkey = verkey_of(&const_ext);
    assert_eq!(proof.roots.len(), 2);
    assert_eq!(proof.evals.len(), 4);
    assert_eq!(proof.final_pol.len(), 4);
    verify(&proof, &verkey)?;
    Ok(())
}

#[test]
fn proving_is_deterministic() {
    let (_, proof_a, _, _) = prove();
    let (_, proof_b, _, _) = prove();
    assert_eq!(proof_a, proof_b);
}

#[test]
fn tampered_eval_is_rejected() {
    let (_, mut proof, _, const_ext) = prove();
    let verkey = verkey_of(&const_ext);
    proof.evals[0][0] += F::ONE;
    match verify(&proof, &verkey) {
        Err(StarkError::TranscriptMismatch(_)) | Err(StarkError::FriFoldMismatch(_)) => {}
        other => panic!("expected transcript/fold mismatch, got {other:?}"),
    }
}

#[test]
fn tampered_root_is_rejected() {
    let (_, mut proof, _, const_ext) = prove();
    let verkey = verkey_of(&const_ext);
    proof.roots[0][0] += F::ONE;
    assert!(verify(&proof, &verkey).is_err());
}

#[test]
fn tampered_merkle_path_is_rejected() {
    let (_, mut proof, _, const_ext) = prove();
    let verkey = verkey_of(&const_ext);
    // A sibling flip leaves the transcript and revealed values untouched,
    // so the Merkle check is the one that must trip.
    proof.queries[0][0].siblings[0][0][0] += F::ONE;
    match verify(&proof, &verkey) {
        Err(StarkError::MerkleProofInvalid(_)) => {}
        other => panic!("expected merkle failure, got {other:?}"),
    }
}

#[test]
fn tampered_fri_step_is_rejected() {
    let (_, mut proof, _, const_ext) = prove();
    let verkey = verkey_of(&const_ext);
    for value in proof.final_pol.iter_mut() {
        value[0] += F::ONE;
    }
    assert!(verify(&proof, &verkey).is_err());
}

#[test]
fn wrong_verkey_is_rejected() {
    let (_, proof, _, const_ext) = prove();
    let mut verkey = verkey_of(&const_ext);
    verkey[0] += F::ONE;
    assert!(verify(&proof, &verkey).is_err());
}

/// Property: the bytecode interpreter agrees with a direct scalar
/// evaluation of the quotient expression at every row of the coset.
#[test]
fn vm_matches_scalar_evaluation() {
    let setup = SetupCtx::new(stark_info(false), prover_bin());
    let info = &setup.stark_info;
    let (trace, _, const_ext) = witness();

    let mut ctx = ProverContext {
        trace: &trace,
        aux_trace: vec![F::ZERO; info.map_total_n],
        publics: &[],
        proof_values: &[],
        challenges: vec![F::ZERO; info.challenges_map.len() * FIELD_EXTENSION],
        airgroup_values: vec![],
        air_values: vec![],
        evals: vec![F::ZERO; info.ev_map.len() * FIELD_EXTENSION],
        const_pols: &[],
        const_pols_extended: &const_ext,
        custom_commits: vec![],
        custom_commits_extended: vec![],
    };
    for (i, v) in ctx.challenges.iter_mut().enumerate() {
        *v = F::from_canonical_u64(1000 + i as u64);
    }

    // The quotient expression reads the extended stage-1 trace.
    let cm1_ext = info.offset("cm1", true);
    let mut p_ext = vec![F::ZERO; N_EXT];
    extend_pol(&mut p_ext, &trace, N_EXT, N, 1);
    ctx.aux_trace[cm1_ext..cm1_ext + N_EXT].copy_from_slice(&p_ext);

    let pack = ExpressionsPack::new(&setup);
    let out = {
        let params = ctx.steps_params(&setup);
        pack.calculate_expression(&params, C_EXP_ID, false).unwrap()
    };

    let ProverHelpers::Domain { zi, .. } = &setup.prover_helpers else {
        panic!("domain helpers expected");
    };
    let alpha0 = E::from_basefield_slice(&ctx.challenges[0..3]);
    let alpha1 = E::from_basefield_slice(&ctx.challenges[3..6]);
    let extend = N_EXT / N;

    for r in 0..N_EXT {
        let p0 = p_ext[r];
        let p1 = p_ext[(r + extend) % N_EXT];
        let l = const_ext[r];
        let zi0 = zi[r];
        let zi1 = zi[N_EXT + r];
        let expected = alpha0.mul_by_base((p1 - p0 - F::ONE) * l * zi0)
            + alpha1.mul_by_base(p0 * zi1 * zi0);
        assert_eq!(
            expected.to_basefield_array(),
            [out[r * 3], out[r * 3 + 1], out[r * 3 + 2]],
            "row {r}"
        );
    }
}
