//! The prover pipeline: witness commits, intermediate polynomials, the
//! quotient, openings at the challenge point and the FRI argument, driven by
//! a single Fiat-Shamir transcript.

use estark_field::fft::{extend_pol, intt_in_place, ntt_in_place};
use estark_field::types::{try_batch_inverse, Field};
use log::debug;
use rayon::prelude::*;

use crate::config::HashConfig;
use crate::errors::{StarkError, StarkResult};
use crate::expressions::{Dest, ExpressionsPack, StepsParams};
use crate::fri;
use crate::merkle_tree::MerkleTree;
use crate::proof::{FriStepProof, Proof};
use crate::setup::{ProverHelpers, SetupCtx};
use crate::stark_info::{EvMapType, StarkInfo};
use crate::transcript::Transcript;
use crate::{E, F, FIELD_EXTENSION};

/// Fills witness columns of stages after the first, via the hint interface.
/// The core never computes those columns itself.
pub trait StageCalculator {
    fn calculate_witness(
        &mut self,
        stage: usize,
        setup: &SetupCtx,
        ctx: &mut ProverContext,
    ) -> StarkResult<()>;
}

/// Owned prover state for one task: the working arena plus every value
/// buffer. Released as a whole when the task ends.
pub struct ProverContext<'a> {
    pub trace: &'a [F],
    pub aux_trace: Vec<F>,
    pub publics: &'a [F],
    pub proof_values: &'a [F],
    pub challenges: Vec<F>,
    pub airgroup_values: Vec<F>,
    pub air_values: Vec<F>,
    pub evals: Vec<F>,
    pub const_pols: &'a [F],
    pub const_pols_extended: &'a [F],
    pub custom_commits: Vec<&'a [F]>,
    pub custom_commits_extended: Vec<&'a [F]>,
}

impl<'a> ProverContext<'a> {
    pub fn steps_params(&self, setup: &SetupCtx) -> StepsParams<'_> {
        let xdxs = setup.stark_info.offset("xDivXSubXi", true);
        StepsParams {
            trace: self.trace,
            aux_trace: &self.aux_trace,
            public_inputs: self.publics,
            proof_values: self.proof_values,
            challenges: &self.challenges,
            airgroup_values: &self.airgroup_values,
            air_values: &self.air_values,
            evals: &self.evals,
            x_div_x_sub: &self.aux_trace[xdxs..],
            const_pols: self.const_pols,
            const_pols_extended: self.const_pols_extended,
            custom_commits: &self.custom_commits,
            custom_commits_extended: &self.custom_commits_extended,
        }
    }
}

pub struct Starks<'a, C: HashConfig> {
    pub setup: &'a SetupCtx,
    /// Stage trees `1..=nStages+1`, then the constant tree, then one per
    /// custom commit.
    pub trees: Vec<MerkleTree<C>>,
    pub trees_fri: Vec<MerkleTree<C>>,
}

impl<'a, C: HashConfig> Starks<'a, C> {
    pub fn new(setup: &'a SetupCtx) -> Self {
        let info = &setup.stark_info;
        let arity = info.stark_struct.arity();
        let custom = info.stark_struct.custom();
        let n_ext = info.n_rows_ext();

        let mut trees = Vec::with_capacity(info.n_trees());
        for stage in 1..=info.n_stages + 1 {
            let width = info.section_width(&StarkInfo::cm_section(stage));
            trees.push(MerkleTree::new(arity, custom, n_ext, width));
        }
        trees.push(MerkleTree::new(arity, custom, n_ext, info.n_constants));
        for cc in &info.custom_commits {
            let width = info.section_width(&format!("{}0", cc.name));
            trees.push(MerkleTree::new(arity, custom, n_ext, width));
        }

        let steps = &info.stark_struct.steps;
        let mut trees_fri = Vec::new();
        for step in 0..steps.len().saturating_sub(1) {
            let n_groups = 1 << steps[step + 1].n_bits;
            let group_size = (1 << steps[step].n_bits) / n_groups;
            trees_fri.push(MerkleTree::new(
                arity,
                custom,
                n_groups,
                group_size * FIELD_EXTENSION,
            ));
        }

        Starks {
            setup,
            trees,
            trees_fri,
        }
    }

    /// Low-degree extends one committed stage into its extended arena slot
    /// and merkelizes it.
    fn extend_and_merkelize(&mut self, stage: usize, ctx: &mut ProverContext) -> StarkResult<C::Digest> {
        let info = &self.setup.stark_info;
        let n = info.n_rows();
        let n_ext = info.n_rows_ext();
        let section = StarkInfo::cm_section(stage);
        let n_cols = info.section_width(&section);

        let ext_offset = info.offset(&section, true);
        let (lo, hi) = ctx.aux_trace.split_at_mut(ext_offset);
        let src: &[F] = if stage == 1 {
            ctx.trace
        } else {
            let off = info.offset(&section, false);
            &lo[off..off + n * n_cols]
        };
        if src.len() < n * n_cols {
            return Err(StarkError::shape(format!(
                "stage {stage} trace has {} elements, expected {}",
                src.len(),
                n * n_cols
            )));
        }
        extend_pol(&mut hi[..n_ext * n_cols], &src[..n * n_cols], n_ext, n, n_cols);

        let tree = &mut self.trees[stage - 1];
        tree.merkelize(&hi[..n_ext * n_cols])?;
        Ok(tree.root())
    }

    /// Re-expresses the coset-evaluated quotient as `qDeg` chunked
    /// base-dimensional polynomials and commits them as the last stage.
    fn compute_q(&mut self, ctx: &mut ProverContext) -> StarkResult<C::Digest> {
        let info = &self.setup.stark_info;
        let n = info.n_rows();
        let n_ext = info.n_rows_ext();
        let q_deg = info.q_deg;
        let q_dim = info.q_dim;
        let section = StarkInfo::cm_section(info.n_stages + 1);
        let n_cols = info.section_width(&section);

        let ProverHelpers::Domain { s, .. } = &self.setup.prover_helpers else {
            return Err(StarkError::shape("prover helpers are point-mode"));
        };

        let q_offset = info.offset("q", true);
        let cm_offset = info.offset(&section, true);
        let (lo, hi) = ctx.aux_trace.split_at_mut(q_offset);
        let q = &mut hi[..n_ext * q_dim];

        // Coset evaluations -> coefficients.
        intt_in_place(q, n_ext, q_dim);

        // q(x) = sum_p x^(p*N) q_p(x): coefficient row p*N+i of q becomes
        // row i of chunk p, unshifted by shift^(-p*N).
        let cm_q = &mut lo[cm_offset..cm_offset + n_ext * n_cols];
        cm_q.fill(F::ZERO);
        for p in 0..q_deg {
            for i in 0..n {
                for d in 0..q_dim {
                    cm_q[(i * q_deg + p) * q_dim + d] = q[(p * n + i) * q_dim + d] * s[p];
                }
            }
        }

        ntt_in_place(cm_q, n_ext, n_cols);

        let tree = &mut self.trees[info.n_stages];
        tree.merkelize(cm_q)?;
        Ok(tree.root())
    }

    /// Evaluates every intermediate polynomial of this stage in a single
    /// shared-window pass and scatters the columns into the stage trace.
    fn calculate_im_pols_expressions(
        &self,
        stage: usize,
        ctx: &mut ProverContext,
    ) -> StarkResult<()> {
        let info = &self.setup.stark_info;
        let section = StarkInfo::cm_section(stage);
        let n_cols = info.section_width(&section);
        let n = info.n_rows();

        let mut dests = Vec::new();
        let mut targets = Vec::new();
        for pol in &info.cm_pols_map {
            if pol.im_pol && pol.stage == stage {
                let pp = info_expression(self.setup, pol.exp_id)?;
                let mut dest = Dest::new();
                dest.add_params(pp, false);
                dests.push(dest);
                targets.push((pol.stage_pos, pol.dim));
            }
        }
        if dests.is_empty() {
            return Ok(());
        }

        let pack = ExpressionsPack::new(self.setup);
        let outs = {
            let params = ctx.steps_params(self.setup);
            pack.calculate_expressions(
                &params,
                &self.setup.expressions_bin.expressions_bin_args_expressions,
                &dests,
                n,
            )?
        };

        let offset = info.offset(&section, false);
        let section_buf = &mut ctx.aux_trace[offset..offset + n * n_cols];
        for ((stage_pos, dim), out) in targets.into_iter().zip(outs) {
            for row in 0..n {
                section_buf[row * n_cols + stage_pos..row * n_cols + stage_pos + dim]
                    .copy_from_slice(&out[row * dim..(row + 1) * dim]);
            }
        }
        Ok(())
    }

    /// LEv[k, o] is the iNTT of the geometric sequence `(xi_o / shift)^k`;
    /// dotted with a column's base-domain values it yields the opening at
    /// `xi * w^offset_o`.
    fn compute_lev(&self, xi: &[F], ctx: &mut ProverContext) {
        let info = &self.setup.stark_info;
        let n = info.n_rows();
        let n_openings = info.opening_points.len();
        let w = F::primitive_root_of_unity(info.stark_struct.n_bits);
        let shift_inv = F::coset_shift().inverse();
        let xi = E::from_basefield_slice(xi);

        let mut xis_shifted = Vec::with_capacity(n_openings);
        for &p in &info.opening_points {
            let mut w_o = w.exp_u64(p.unsigned_abs());
            if p < 0 {
                w_o = w_o.inverse();
            }
            xis_shifted.push(xi.mul_by_base(w_o).mul_by_base(shift_inv));
        }

        let lev_offset = info.offset("LEv", true);
        let lev = &mut ctx.aux_trace[lev_offset..lev_offset + n * n_openings * FIELD_EXTENSION];
        for (o, xi_s) in xis_shifted.iter().enumerate() {
            let mut acc = E::ONE;
            for k in 0..n {
                let dst = (k * n_openings + o) * FIELD_EXTENSION;
                lev[dst..dst + FIELD_EXTENSION].copy_from_slice(&acc.to_basefield_array());
                acc *= *xi_s;
            }
        }
        intt_in_place(lev, n, FIELD_EXTENSION * n_openings);
    }

    /// Inner product of LEv with every opened column over the base rows of
    /// the extended domain.
    fn compute_evals(&self, ctx: &mut ProverContext, proof: &mut Proof<C>) -> StarkResult<()> {
        let info = &self.setup.stark_info;
        let n = info.n_rows();
        let extend_bits = info.stark_struct.n_bits_ext - info.stark_struct.n_bits;
        let n_openings = info.opening_points.len();
        let size_eval = info.ev_map.len();

        // (buffer, row offset, width, column, dim) per evMap entry.
        let views: Vec<(&[F], usize, usize, usize, usize)> = info
            .ev_map
            .iter()
            .map(|ev| -> StarkResult<_> {
                match ev.ty {
                    EvMapType::Cm => {
                        let pol = &info.cm_pols_map[ev.id];
                        let section = StarkInfo::cm_section(pol.stage);
                        Ok((
                            ctx.aux_trace.as_slice(),
                            info.offset(&section, true),
                            info.section_width(&section),
                            pol.stage_pos,
                            pol.dim,
                        ))
                    }
                    EvMapType::Const => {
                        let pol = &info.const_pols_map[ev.id];
                        Ok((
                            ctx.const_pols_extended,
                            0,
                            info.n_constants,
                            pol.stage_pos,
                            pol.dim,
                        ))
                    }
                    EvMapType::Custom => {
                        let pol = &info.custom_commits_map[ev.commit_id][ev.id];
                        let section = format!("{}0", info.custom_commits[ev.commit_id].name);
                        Ok((
                            ctx.custom_commits_extended[ev.commit_id],
                            0,
                            info.section_width(&section),
                            pol.stage_pos,
                            pol.dim,
                        ))
                    }
                }
            })
            .collect::<StarkResult<_>>()?;

        let lev_offset = info.offset("LEv", true);
        let lev = &ctx.aux_trace[lev_offset..lev_offset + n * n_openings * FIELD_EXTENSION];

        // Field addition is exact, so chunked reduction is deterministic.
        let sums = (0..n)
            .into_par_iter()
            .fold(
                || vec![E::ZERO; size_eval],
                |mut acc, k| {
                    let row = k << extend_bits;
                    for (i, ev) in info.ev_map.iter().enumerate() {
                        let o = ev.opening_pos.unwrap_or(0);
                        let lev_k = E::from_basefield_slice(
                            &lev[(k * n_openings + o) * FIELD_EXTENSION..],
                        );
                        let (buf, off, width, col, dim) = views[i];
                        let base = off + row * width + col;
                        let value = if dim == 1 {
                            lev_k.mul_by_base(buf[base])
                        } else {
                            lev_k * E::from_basefield_slice(&buf[base..base + FIELD_EXTENSION])
                        };
                        acc[i] += value;
                    }
                    acc
                },
            )
            .reduce(
                || vec![E::ZERO; size_eval],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            );

        for (i, sum) in sums.iter().enumerate() {
            let arr = sum.to_basefield_array();
            ctx.evals[i * FIELD_EXTENSION..(i + 1) * FIELD_EXTENSION].copy_from_slice(&arr);
            proof.evals[i] = arr;
        }
        Ok(())
    }

    /// Builds the `x / (x - xi_o)` table over the extended coset, one family
    /// of extension columns per opening.
    fn calculate_x_div_x_sub(&self, xi: &[F], ctx: &mut ProverContext) -> StarkResult<()> {
        let info = &self.setup.stark_info;
        let n_ext = info.n_rows_ext();
        let n_openings = info.opening_points.len();
        let w = F::primitive_root_of_unity(info.stark_struct.n_bits);
        let xi = E::from_basefield_slice(xi);

        let ProverHelpers::Domain { x_2ns, .. } = &self.setup.prover_helpers else {
            return Err(StarkError::shape("prover helpers are point-mode"));
        };

        let mut xis = Vec::with_capacity(n_openings);
        for &p in &info.opening_points {
            let mut w_o = w.exp_u64(p.unsigned_abs());
            if p < 0 {
                w_o = w_o.inverse();
            }
            xis.push(xi.mul_by_base(w_o));
        }

        let mut denoms = vec![E::ZERO; n_openings * n_ext];
        for (o, xi_o) in xis.iter().enumerate() {
            for k in 0..n_ext {
                denoms[o * n_ext + k] = E::from_basefield(x_2ns[k]) - *xi_o;
            }
        }
        let inverses =
            try_batch_inverse(&denoms).ok_or(StarkError::InverseOfZero { exp_id: 0 })?;

        let offset = info.offset("xDivXSubXi", true);
        let table = &mut ctx.aux_trace[offset..offset + n_openings * n_ext * FIELD_EXTENSION];
        for o in 0..n_openings {
            for k in 0..n_ext {
                let value = inverses[o * n_ext + k].mul_by_base(x_2ns[k]);
                let dst = (o * n_ext + k) * FIELD_EXTENSION;
                table[dst..dst + FIELD_EXTENSION].copy_from_slice(&value.to_basefield_array());
            }
        }
        Ok(())
    }
}

fn info_expression(setup: &SetupCtx, exp_id: u64) -> StarkResult<&crate::expressions_bin::ParserParams> {
    setup
        .expressions_bin
        .expressions_info
        .get(&exp_id)
        .ok_or_else(|| StarkError::bytecode(exp_id, "unknown expression id"))
}

/// Produces a FRI proof for one execution trace.
///
/// The caller provides the stage-1 trace, the constant polynomials on both
/// domains and any custom commits; later-stage witness columns are filled by
/// `stage_calculator` through the hint interface.
pub fn gen_proof<C: HashConfig>(
    setup: &SetupCtx,
    trace: &[F],
    publics: &[F],
    proof_values: &[F],
    const_pols: &[F],
    const_pols_extended: &[F],
    custom_commits: Vec<&[F]>,
    custom_commits_extended: Vec<&[F]>,
    mut stage_calculator: Option<&mut dyn StageCalculator>,
) -> StarkResult<Proof<C>> {
    let info = &setup.stark_info;
    let n = info.n_rows();
    let n_ext = info.n_rows_ext();

    if C::NAME != info.stark_struct.verification_hash_type {
        return Err(StarkError::shape(format!(
            "hash back-end {} does not match descriptor {}",
            C::NAME,
            info.stark_struct.verification_hash_type
        )));
    }
    if trace.len() != n * info.section_width("cm1") {
        return Err(StarkError::shape("stage-1 trace size mismatch"));
    }
    if const_pols.len() != n * info.n_constants {
        return Err(StarkError::shape("constant polynomials size mismatch"));
    }
    if const_pols_extended.len() != n_ext * info.n_constants {
        return Err(StarkError::shape("extended constants size mismatch"));
    }
    if publics.len() != info.n_publics {
        return Err(StarkError::shape("publics size mismatch"));
    }

    let arity = info.stark_struct.arity();
    let custom = info.stark_struct.custom();
    let hash_commits = info.stark_struct.hash_commits;

    let mut starks = Starks::<C>::new(setup);
    let mut proof = Proof::new(info);
    proof.publics = publics.to_vec();

    let mut ctx = ProverContext {
        trace,
        aux_trace: vec![F::ZERO; info.map_total_n],
        publics,
        proof_values,
        challenges: vec![F::ZERO; info.challenges_map.len() * FIELD_EXTENSION],
        airgroup_values: vec![F::ZERO; info.airgroup_values_map.len() * FIELD_EXTENSION],
        air_values: vec![F::ZERO; info.air_values_map.len() * FIELD_EXTENSION],
        evals: vec![F::ZERO; info.ev_map.len() * FIELD_EXTENSION],
        const_pols,
        const_pols_extended,
        custom_commits,
        custom_commits_extended,
    };

    // The constant tree's root is the verification key.
    let const_tree_index = Proof::<C>::const_tree_index(info);
    starks.trees[const_tree_index].merkelize(const_pols_extended)?;
    let verkey = starks.trees[const_tree_index].root();

    for c in 0..ctx.custom_commits_extended.len() {
        let commit = ctx.custom_commits_extended[c];
        let index = Proof::<C>::custom_tree_index(info, c);
        starks.trees[index].merkelize(commit)?;
    }

    let mut transcript = C::Transcript::new(arity, custom);
    transcript.put_digest(&verkey);
    if info.n_publics > 0 {
        if !hash_commits {
            transcript.put(publics);
        } else {
            let hash = hash_values::<C>(arity, custom, publics);
            transcript.put_digest(&hash);
        }
    }

    // Witness stages.
    for stage in 1..=info.n_stages {
        debug!("stark: committing stage {stage}");
        draw_stage_challenges::<C>(&mut transcript, info, stage, &mut ctx.challenges);
        if stage > 1 {
            if let Some(calc) = stage_calculator.as_deref_mut() {
                calc.calculate_witness(stage, setup, &mut ctx)?;
            }
            starks.calculate_im_pols_expressions(stage, &mut ctx)?;
        }
        let root = starks.extend_and_merkelize(stage, &mut ctx)?;
        proof.roots.push(root);
        transcript.put_digest(&root);
    }

    // Quotient stage.
    debug!("stark: committing quotient");
    draw_stage_challenges::<C>(&mut transcript, info, info.n_stages + 1, &mut ctx.challenges);
    {
        let pack = ExpressionsPack::new(setup);
        let q_out = {
            let params = ctx.steps_params(setup);
            pack.calculate_expression(&params, info.c_exp_id, false)?
        };
        let q_offset = info.offset("q", true);
        ctx.aux_trace[q_offset..q_offset + q_out.len()].copy_from_slice(&q_out);
    }
    let root_q = starks.compute_q(&mut ctx)?;
    proof.roots.push(root_q);
    transcript.put_digest(&root_q);

    // Openings at xi.
    debug!("stark: computing openings");
    let xi_index = info
        .challenges_map
        .iter()
        .position(|c| c.stage == info.n_stages + 2 && c.stage_id == 0)
        .ok_or_else(|| StarkError::shape("no opening challenge in challengesMap"))?;
    draw_stage_challenges::<C>(&mut transcript, info, info.n_stages + 2, &mut ctx.challenges);
    let xi: Vec<F> =
        ctx.challenges[xi_index * FIELD_EXTENSION..(xi_index + 1) * FIELD_EXTENSION].to_vec();

    starks.compute_lev(&xi, &mut ctx);
    starks.compute_evals(&mut ctx, &mut proof)?;

    if !hash_commits {
        transcript.put(&ctx.evals);
    } else {
        let hash = hash_values::<C>(arity, custom, &ctx.evals);
        transcript.put_digest(&hash);
    }

    // FRI polynomial.
    debug!("stark: building FRI polynomial");
    draw_stage_challenges::<C>(&mut transcript, info, info.n_stages + 3, &mut ctx.challenges);
    starks.calculate_x_div_x_sub(&xi, &mut ctx)?;
    {
        let pack = ExpressionsPack::new(setup);
        let f_out = {
            let params = ctx.steps_params(setup);
            pack.calculate_expression(&params, info.fri_exp_id, false)?
        };
        let f_offset = info.offset("f", true);
        ctx.aux_trace[f_offset..f_offset + f_out.len()].copy_from_slice(&f_out);
    }

    // FRI folding.
    let steps = info.stark_struct.steps.clone();
    let n_bits_first = steps[0].n_bits;
    let f_offset = info.offset("f", true);
    let mut challenge = [F::ZERO; FIELD_EXTENSION];
    for step in 0..steps.len() {
        let current_bits = steps[step].n_bits;
        let prev_bits = if step == 0 {
            current_bits
        } else {
            steps[step - 1].n_bits
        };
        {
            let f = &mut ctx.aux_trace[f_offset..f_offset + n_ext * FIELD_EXTENSION];
            fri::fold(
                step,
                f,
                &challenge,
                info.stark_struct.n_bits_ext,
                prev_bits,
                current_bits,
            );
        }
        if step < steps.len() - 1 {
            let f = &ctx.aux_trace[f_offset..];
            let root = fri::merkelize(
                &mut starks.trees_fri[step],
                f,
                current_bits,
                steps[step + 1].n_bits,
            )?;
            proof.fri_steps.push(FriStepProof {
                root,
                queries: Vec::new(),
            });
            transcript.put_digest(&root);
        } else {
            let final_len = (1 << current_bits) * FIELD_EXTENSION;
            let f = &ctx.aux_trace[f_offset..f_offset + final_len];
            if !hash_commits {
                transcript.put(f);
            } else {
                let hash = hash_values::<C>(arity, custom, f);
                transcript.put_digest(&hash);
            }
        }
        challenge = transcript.get_ext_field();
    }

    // Query phase: derive indices from a fresh transcript forked with the
    // FRI-tail challenge.
    debug!("stark: answering queries");
    let mut transcript_permutation = C::Transcript::new(arity, custom);
    transcript_permutation.put(&challenge);
    let fri_queries =
        transcript_permutation.get_permutations(info.stark_struct.n_queries, n_bits_first);

    let tree_refs: Vec<&MerkleTree<C>> = starks.trees.iter().collect();
    proof.queries = fri::prove_queries(&fri_queries, &tree_refs)?;
    for step in 1..steps.len() {
        let step_queries =
            fri::prove_fri_queries(&fri_queries, steps[step].n_bits, &starks.trees_fri[step - 1])?;
        proof.fri_steps[step - 1].queries = step_queries;
    }

    let last_bits = steps.last().unwrap().n_bits;
    for i in 0..1 << last_bits {
        let src = f_offset + i * FIELD_EXTENSION;
        proof.final_pol[i] = [
            ctx.aux_trace[src],
            ctx.aux_trace[src + 1],
            ctx.aux_trace[src + 2],
        ];
    }

    for (i, chunk) in ctx.airgroup_values.chunks(FIELD_EXTENSION).enumerate() {
        proof.airgroup_values[i] = [chunk[0], chunk[1], chunk[2]];
    }
    for (i, chunk) in ctx.air_values.chunks(FIELD_EXTENSION).enumerate() {
        proof.air_values[i] = [chunk[0], chunk[1], chunk[2]];
    }

    // Custom-commit roots follow the stage roots; the transcript never sees
    // them since they are pinned through the publics.
    for c in 0..info.custom_commits.len() {
        let index = Proof::<C>::custom_tree_index(info, c);
        proof.roots.push(starks.trees[index].root());
    }

    Ok(proof)
}

/// Draws every transcript challenge declared for `stage`, in map order.
pub(crate) fn draw_stage_challenges<C: HashConfig>(
    transcript: &mut C::Transcript,
    info: &StarkInfo,
    stage: usize,
    challenges: &mut [F],
) {
    let indices: Vec<usize> = info.challenges_by_stage(stage).collect();
    for i in indices {
        let value = transcript.get_ext_field();
        challenges[i * FIELD_EXTENSION..(i + 1) * FIELD_EXTENSION].copy_from_slice(&value);
    }
}

/// Pre-hash of a large vector before transcript absorption, used when
/// `hashCommits` is set.
pub(crate) fn hash_values<C: HashConfig>(arity: usize, custom: bool, values: &[F]) -> C::Digest {
    let mut transcript = C::Transcript::new(arity, custom);
    transcript.put(values);
    transcript.get_state()
}
