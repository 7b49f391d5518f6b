//! Proof verification: replays the transcript from the same seed, checks
//! every Merkle opening, re-evaluates the constraint and FRI expressions at
//! the query points and re-folds every FRI step.

use estark_field::types::Field;
use log::trace;

use crate::config::HashConfig;
use crate::errors::{StarkError, StarkResult};
use crate::expressions::{ExpressionsPack, StepsParams};
use crate::expressions_bin::ExpressionsBin;
use crate::fri;
use crate::merkle_tree::verify_group_proof;
use crate::proof::Proof;
use crate::setup::{ProverHelpers, SetupCtx};
use crate::stark_info::{EvMapType, StarkInfo};
use crate::starks::{draw_stage_challenges, hash_values};
use crate::transcript::Transcript;
use crate::{E, F, FIELD_EXTENSION};

/// Verifies a proof against a verify-mode `StarkInfo` and the verifier's
/// compiled expression binary. Any mismatch fails with the first encountered
/// reason; Merkle openings are all evaluated before reporting so failures
/// are stable across runs.
pub fn stark_verify<C: HashConfig>(
    stark_info: &StarkInfo,
    expressions_bin: &ExpressionsBin,
    verkey: &C::Digest,
    proof: &Proof<C>,
    publics: &[F],
    proof_values: &[F],
) -> StarkResult<()> {
    let info = stark_info;
    if !info.verify {
        return Err(StarkError::shape("verifier needs a verify-mode StarkInfo"));
    }
    if C::NAME != info.stark_struct.verification_hash_type {
        return Err(StarkError::shape(format!(
            "hash back-end {} does not match descriptor {}",
            C::NAME,
            info.stark_struct.verification_hash_type
        )));
    }

    let n_queries = info.stark_struct.n_queries;
    let steps = &info.stark_struct.steps;
    let last_bits = steps.last().map(|s| s.n_bits).unwrap_or(0);
    let n_trees = info.n_trees();

    if proof.roots.len() < info.n_stages + 1 + info.custom_commits.len() {
        return Err(StarkError::shape("missing stage roots"));
    }
    if proof.queries.len() != n_queries
        || proof.queries.iter().any(|q| q.len() != n_trees)
        || proof.fri_steps.len() + 1 != steps.len()
        || proof.fri_steps.iter().any(|s| s.queries.len() != n_queries)
    {
        return Err(StarkError::shape("query proofs do not match the layout"));
    }
    if proof.evals.len() != info.ev_map.len() || proof.final_pol.len() != 1 << last_bits {
        return Err(StarkError::shape("evals or final polynomial size mismatch"));
    }

    let arity = info.stark_struct.arity();
    let custom = info.stark_struct.custom();
    let hash_commits = info.stark_struct.hash_commits;

    let evals_flat: Vec<F> = proof.evals.iter().flatten().copied().collect();
    let final_pol_flat: Vec<F> = proof.final_pol.iter().flatten().copied().collect();

    // Replay the transcript exactly as the prover wrote it.
    trace!("verifier: replaying transcript");
    let mut transcript = C::Transcript::new(arity, custom);
    transcript.put_digest(verkey);
    if info.n_publics > 0 {
        if !hash_commits {
            transcript.put(publics);
        } else {
            let hash = hash_values::<C>(arity, custom, publics);
            transcript.put_digest(&hash);
        }
    }

    let mut challenges = vec![F::ZERO; info.challenges_map.len() * FIELD_EXTENSION];
    for stage in 1..=info.n_stages + 1 {
        draw_stage_challenges::<C>(&mut transcript, info, stage, &mut challenges);
        transcript.put_digest(&proof.roots[stage - 1]);
    }

    draw_stage_challenges::<C>(&mut transcript, info, info.n_stages + 2, &mut challenges);
    if !hash_commits {
        transcript.put(&evals_flat);
    } else {
        let hash = hash_values::<C>(arity, custom, &evals_flat);
        transcript.put_digest(&hash);
    }
    draw_stage_challenges::<C>(&mut transcript, info, info.n_stages + 3, &mut challenges);

    let mut fold_challenges: Vec<[F; FIELD_EXTENSION]> = Vec::with_capacity(steps.len());
    for step in 0..steps.len() {
        if step < steps.len() - 1 {
            transcript.put_digest(&proof.fri_steps[step].root);
        } else if !hash_commits {
            transcript.put(&final_pol_flat);
        } else {
            let hash = hash_values::<C>(arity, custom, &final_pol_flat);
            transcript.put_digest(&hash);
        }
        fold_challenges.push(transcript.get_ext_field());
    }
    let query_seed = *fold_challenges.last().unwrap();

    let mut transcript_permutation = C::Transcript::new(arity, custom);
    transcript_permutation.put(&query_seed);
    let fri_queries = transcript_permutation.get_permutations(n_queries, steps[0].n_bits);

    // Opening challenge and the point-evaluated helpers.
    let xi_index = info
        .challenges_map
        .iter()
        .position(|c| c.stage == info.n_stages + 2 && c.stage_id == 0)
        .ok_or_else(|| StarkError::shape("no opening challenge in challengesMap"))?;
    let xi: [F; FIELD_EXTENSION] = [
        challenges[xi_index * FIELD_EXTENSION],
        challenges[xi_index * FIELD_EXTENSION + 1],
        challenges[xi_index * FIELD_EXTENSION + 2],
    ];

    let setup_v = SetupCtx {
        stark_info: info.clone(),
        expressions_bin: expressions_bin.clone(),
        prover_helpers: ProverHelpers::for_point(info, xi)?,
    };

    // Assemble the synthetic per-query traces from the revealed leaves.
    let const_index = Proof::<C>::const_tree_index(info);
    let trace_width = info.section_width("cm1");
    let mut trace = vec![F::ZERO; n_queries * trace_width];
    let mut aux_trace = vec![F::ZERO; info.map_total_n];
    let mut const_vals = vec![F::ZERO; n_queries * info.n_constants];
    let mut custom_vals: Vec<Vec<F>> = info
        .custom_commits_map
        .iter()
        .enumerate()
        .map(|(c, _)| {
            let width = info.section_width(&format!("{}0", info.custom_commits[c].name));
            vec![F::ZERO; n_queries * width]
        })
        .collect();

    for q in 0..n_queries {
        trace[q * trace_width..(q + 1) * trace_width]
            .copy_from_slice(&proof.queries[q][0].values);
        for stage in 2..=info.n_stages + 1 {
            let section = StarkInfo::cm_section(stage);
            let width = info.section_width(&section);
            let offset = info.offset(&section, false);
            aux_trace[offset + q * width..offset + (q + 1) * width]
                .copy_from_slice(&proof.queries[q][stage - 1].values);
        }
        const_vals[q * info.n_constants..(q + 1) * info.n_constants]
            .copy_from_slice(&proof.queries[q][const_index].values);
        for c in 0..info.custom_commits.len() {
            let width = custom_vals[c].len() / n_queries;
            let index = Proof::<C>::custom_tree_index(info, c);
            custom_vals[c][q * width..(q + 1) * width]
                .copy_from_slice(&proof.queries[q][index].values);
        }
    }

    // x / (x - xi_o) at every queried point of the extended coset.
    let xi_e = E::from_basefield_slice(&xi);
    let w_ext = F::primitive_root_of_unity(info.stark_struct.n_bits_ext);
    let w = F::primitive_root_of_unity(info.stark_struct.n_bits);
    let n_openings = info.opening_points.len();
    let mut x_div_x_sub = vec![F::ZERO; n_openings * n_queries * FIELD_EXTENSION];
    for (i, &query) in fri_queries.iter().enumerate() {
        let x = F::coset_shift() * w_ext.exp_u64(query);
        for (o, &p) in info.opening_points.iter().enumerate() {
            let mut w_o = w.exp_u64(p.unsigned_abs());
            if p < 0 {
                w_o = w_o.inverse();
            }
            let denom = E::from_basefield(x) - xi_e.mul_by_base(w_o);
            let value = denom
                .try_inverse()
                .ok_or(StarkError::InverseOfZero { exp_id: 0 })?
                .mul_by_base(x);
            let dst = (i + o * n_queries) * FIELD_EXTENSION;
            x_div_x_sub[dst..dst + FIELD_EXTENSION]
                .copy_from_slice(&value.to_basefield_array());
        }
    }

    let airgroup_values: Vec<F> = proof.airgroup_values.iter().flatten().copied().collect();
    let air_values: Vec<F> = proof.air_values.iter().flatten().copied().collect();

    let custom_refs: Vec<&[F]> = custom_vals.iter().map(|v| v.as_slice()).collect();
    let params = StepsParams {
        trace: &trace,
        aux_trace: &aux_trace,
        public_inputs: publics,
        proof_values,
        challenges: &challenges,
        airgroup_values: &airgroup_values,
        air_values: &air_values,
        evals: &evals_flat,
        x_div_x_sub: &x_div_x_sub,
        const_pols: &const_vals,
        const_pols_extended: &[],
        custom_commits: &custom_refs,
        custom_commits_extended: &[],
    };

    let pack = ExpressionsPack::new(&setup_v);
    let mut first_error: Option<StarkError> = None;
    let record = |err: StarkError, first_error: &mut Option<StarkError>| {
        if first_error.is_none() {
            *first_error = Some(err);
        }
    };

    // Check q(xi) * Z_H(xi) = C(xi): the recombined quotient chunks against
    // the constraint expression evaluated from the openings.
    trace!("verifier: checking evaluations");
    let c_at_xi = pack.calculate_expression(&params, info.c_exp_id, false)?;

    let x_n = xi_e.exp_u64(info.n_rows() as u64);
    let q_index = info
        .cm_pols_map
        .iter()
        .position(|p| p.stage == info.n_stages + 1 && p.stage_id == 0)
        .ok_or_else(|| StarkError::shape("no quotient polynomial in cmPolsMap"))?;
    let mut x_acc = E::ONE;
    let mut q = E::ZERO;
    for i in 0..info.q_deg {
        let id = q_index + i;
        let ev_id = info
            .ev_map
            .iter()
            .position(|e| e.ty == EvMapType::Cm && e.id == id)
            .ok_or_else(|| StarkError::shape("quotient chunk not opened"))?;
        q += x_acc * E::from_basefield_slice(&evals_flat[ev_id * FIELD_EXTENSION..]);
        x_acc *= x_n;
    }
    if q.to_basefield_array() != [c_at_xi[0], c_at_xi[1], c_at_xi[2]] {
        record(
            StarkError::TranscriptMismatch("openings do not satisfy the constraints".into()),
            &mut first_error,
        );
    }

    // The FRI polynomial evaluated from the openings must match the first
    // folded step (or the final polynomial when there is a single step).
    trace!("verifier: checking FRI query consistency");
    let f_at_queries = pack.calculate_expression(&params, info.fri_exp_id, false)?;
    for (q_i, &query) in fri_queries.iter().enumerate() {
        let idx = (query as usize) % (1 << steps[0].n_bits);
        let expected = &f_at_queries[q_i * FIELD_EXTENSION..(q_i + 1) * FIELD_EXTENSION];
        let actual: [F; FIELD_EXTENSION] = if steps.len() > 1 {
            let next_groups = 1usize << steps[1].n_bits;
            let j = idx / next_groups;
            let vals = &proof.fri_steps[0].queries[q_i].values;
            [
                vals[j * FIELD_EXTENSION],
                vals[j * FIELD_EXTENSION + 1],
                vals[j * FIELD_EXTENSION + 2],
            ]
        } else {
            proof.final_pol[idx]
        };
        if expected != &actual[..] {
            record(
                StarkError::FriFoldMismatch(format!(
                    "fri polynomial mismatch at query {q_i}"
                )),
                &mut first_error,
            );
        }
    }

    // Merkle openings: committed stages, constants, custom commits.
    for stage in 1..=info.n_stages + 1 {
        trace!("verifier: checking stage {stage} merkle tree");
        let root = &proof.roots[stage - 1];
        for (q_i, &query) in fri_queries.iter().enumerate() {
            let gp = &proof.queries[q_i][stage - 1];
            if !verify_group_proof::<C>(root, &gp.siblings, query as usize, &gp.values, arity, custom)
            {
                record(
                    StarkError::MerkleProofInvalid(format!(
                        "stage {stage} opening at query {q_i}"
                    )),
                    &mut first_error,
                );
            }
        }
    }

    trace!("verifier: checking constant merkle tree");
    for (q_i, &query) in fri_queries.iter().enumerate() {
        let gp = &proof.queries[q_i][const_index];
        if !verify_group_proof::<C>(verkey, &gp.siblings, query as usize, &gp.values, arity, custom)
        {
            record(
                StarkError::MerkleProofInvalid(format!("constant opening at query {q_i}")),
                &mut first_error,
            );
        }
    }

    for c in 0..info.custom_commits.len() {
        trace!("verifier: checking custom commit {c} merkle tree");
        let root = &proof.roots[info.n_stages + 1 + c];
        let index = Proof::<C>::custom_tree_index(info, c);
        for (q_i, &query) in fri_queries.iter().enumerate() {
            let gp = &proof.queries[q_i][index];
            if !verify_group_proof::<C>(root, &gp.siblings, query as usize, &gp.values, arity, custom)
            {
                record(
                    StarkError::MerkleProofInvalid(format!(
                        "custom commit {c} opening at query {q_i}"
                    )),
                    &mut first_error,
                );
            }
        }
    }

    // FRI step trees and folds.
    for step in 1..steps.len() {
        trace!("verifier: checking FRI step {step}");
        let step_proof = &proof.fri_steps[step - 1];
        let height = 1usize << steps[step].n_bits;
        for (q_i, &query) in fri_queries.iter().enumerate() {
            let idx = (query as usize) % height;
            let gp = &step_proof.queries[q_i];
            if !verify_group_proof::<C>(
                &step_proof.root,
                &gp.siblings,
                idx,
                &gp.values,
                arity,
                custom,
            ) {
                record(
                    StarkError::MerkleProofInvalid(format!(
                        "fri step {step} opening at query {q_i}"
                    )),
                    &mut first_error,
                );
            }

            let value = fri::verify_fold(
                &gp.values,
                info.stark_struct.n_bits_ext,
                steps[step - 1].n_bits,
                steps[step].n_bits,
                &fold_challenges[step - 1],
                idx,
            )?;
            let expected: [F; FIELD_EXTENSION] = if step < steps.len() - 1 {
                let next_groups = 1usize << steps[step + 1].n_bits;
                let j = idx / next_groups;
                let vals = &proof.fri_steps[step].queries[q_i].values;
                [
                    vals[j * FIELD_EXTENSION],
                    vals[j * FIELD_EXTENSION + 1],
                    vals[j * FIELD_EXTENSION + 2],
                ]
            } else {
                proof.final_pol[idx]
            };
            if value.to_basefield_array() != expected {
                record(
                    StarkError::FriFoldMismatch(format!(
                        "fold at step {step} query {q_i} does not match"
                    )),
                    &mut first_error,
                );
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
