//! Static description of an AIR instance: polynomials, stages, openings,
//! boundaries and the offsets of every section inside the working arena.
//! Loaded once from the `.starkinfo.json` descriptor and shared read-only by
//! every prove/verify task.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::{StarkError, StarkResult};
use crate::FIELD_EXTENSION;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Const,
    Cm,
    Tmp,
    Public,
    AirgroupValue,
    Challenge,
    Number,
    String,
    AirValue,
    ProofValue,
    Custom,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStruct {
    pub n_bits: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarkStruct {
    pub n_bits: usize,
    pub n_bits_ext: usize,
    pub n_queries: usize,
    #[serde(default)]
    pub hash_commits: bool,
    pub verification_hash_type: String,
    #[serde(default)]
    pub merkle_tree_arity: Option<usize>,
    #[serde(default)]
    pub merkle_tree_custom: Option<bool>,
    pub steps: Vec<StepStruct>,
}

impl StarkStruct {
    /// GL trees are always binary; BN128 defaults to arity 16.
    pub fn arity(&self) -> usize {
        if self.verification_hash_type == "BN128" {
            self.merkle_tree_arity.unwrap_or(16)
        } else {
            2
        }
    }

    pub fn custom(&self) -> bool {
        if self.verification_hash_type == "BN128" {
            self.merkle_tree_custom.unwrap_or(false)
        } else {
            true
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolMap {
    pub stage: usize,
    pub name: String,
    pub lengths: Vec<usize>,
    pub dim: usize,
    pub im_pol: bool,
    pub stage_pos: usize,
    pub stage_id: usize,
    pub commit_id: usize,
    pub exp_id: u64,
    pub pols_map_id: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvMapType {
    Cm,
    Const,
    Custom,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvMap {
    #[serde(rename = "type")]
    pub ty: EvMapType,
    pub id: usize,
    pub prime: i64,
    #[serde(default)]
    pub commit_id: usize,
    #[serde(default)]
    pub opening_pos: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Boundary {
    pub name: String,
    pub offset_min: usize,
    pub offset_max: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PublicValueIdx {
    pub idx: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCommit {
    pub name: String,
    #[serde(default)]
    pub public_values: Vec<PublicValueIdx>,
    #[serde(default)]
    pub stage_widths: Vec<usize>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarkInfo {
    pub stark_struct: StarkStruct,

    #[serde(default)]
    pub airgroup_id: usize,
    #[serde(default)]
    pub air_id: usize,

    pub n_publics: usize,
    pub n_constants: usize,
    pub n_stages: usize,

    #[serde(default)]
    pub custom_commits: Vec<CustomCommit>,

    #[serde(default)]
    pub cm_pols_map: Vec<PolMap>,
    #[serde(default)]
    pub const_pols_map: Vec<PolMap>,
    #[serde(default)]
    pub challenges_map: Vec<PolMap>,
    #[serde(default)]
    pub airgroup_values_map: Vec<PolMap>,
    #[serde(default)]
    pub air_values_map: Vec<PolMap>,
    #[serde(default)]
    pub proof_values_map: Vec<PolMap>,
    #[serde(default)]
    pub publics_map: Vec<PolMap>,
    #[serde(default)]
    pub custom_commits_map: Vec<Vec<PolMap>>,

    #[serde(default)]
    pub ev_map: Vec<EvMap>,

    pub opening_points: Vec<i64>,
    #[serde(default)]
    pub boundaries: Vec<Boundary>,

    pub q_deg: usize,
    pub q_dim: usize,

    pub fri_exp_id: u64,
    pub c_exp_id: u64,

    pub map_sections_n: HashMap<String, usize>,

    #[serde(skip)]
    pub map_offsets: HashMap<(String, bool), usize>,
    #[serde(skip)]
    pub map_total_n: usize,
    #[serde(skip)]
    pub verify: bool,
}

impl StarkInfo {
    pub fn from_json(json: &str, verify: bool) -> StarkResult<Self> {
        let mut info: StarkInfo = serde_json::from_str(json)
            .map_err(|e| StarkError::shape(format!("invalid starkinfo json: {e}")))?;
        info.finalize(verify)?;
        Ok(info)
    }

    /// Resolves defaults and builds the arena layout. Must be called after
    /// constructing a `StarkInfo` by hand.
    pub fn finalize(&mut self, verify: bool) -> StarkResult<()> {
        self.verify = verify;

        for ev in self.ev_map.iter_mut() {
            if ev.opening_pos.is_none() {
                let pos = self
                    .opening_points
                    .iter()
                    .position(|&p| p == ev.prime)
                    .ok_or_else(|| {
                        StarkError::shape(format!("opening point {} not found", ev.prime))
                    })?;
                ev.opening_pos = Some(pos);
            }
        }

        if verify {
            self.set_map_offsets_verifier();
        } else {
            self.set_map_offsets();
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        1 << self.stark_struct.n_bits
    }

    pub fn n_rows_ext(&self) -> usize {
        1 << self.stark_struct.n_bits_ext
    }

    pub fn cm_section(stage: usize) -> String {
        format!("cm{stage}")
    }

    pub fn section_width(&self, section: &str) -> usize {
        self.map_sections_n.get(section).copied().unwrap_or(0)
    }

    pub fn offset(&self, section: &str, extended: bool) -> usize {
        self.map_offsets
            .get(&(section.to_string(), extended))
            .copied()
            .unwrap_or_else(|| panic!("no arena offset for section {section} (ext={extended})"))
    }

    /// Arena layout for the prover. One flat slab holds the unextended
    /// traces of stages 2..=nStages, every extended stage, the shared
    /// quotient/FRI-polynomial slot and the shared LEv/xDivXSub tail.
    fn set_map_offsets(&mut self) {
        let n = self.n_rows();
        let n_ext = self.n_rows_ext();

        self.map_offsets.clear();
        // Constants and the stage-1 trace live in caller-owned buffers.
        self.map_offsets.insert(("const".to_string(), false), 0);
        self.map_offsets.insert(("const".to_string(), true), 0);
        self.map_offsets.insert(("cm1".to_string(), false), 0);
        for cc in &self.custom_commits {
            self.map_offsets.insert((format!("{}0", cc.name), false), 0);
            self.map_offsets.insert((format!("{}0", cc.name), true), 0);
        }

        let mut total = 0;
        for stage in (2..=self.n_stages).rev() {
            let section = Self::cm_section(stage);
            self.map_offsets.insert((section.clone(), false), total);
            total += n * self.section_width(&section);
        }
        for stage in 1..=self.n_stages + 1 {
            let section = Self::cm_section(stage);
            self.map_offsets.insert((section.clone(), true), total);
            total += n_ext * self.section_width(&section);
        }
        // Never addressed; kept so lookups stay total.
        self.map_offsets
            .insert((Self::cm_section(self.n_stages + 1), false), 0);

        // The quotient is folded into chunks before the FRI polynomial is
        // built, so both share one extended slot.
        self.map_offsets.insert(("f".to_string(), true), total);
        self.map_offsets.insert(("q".to_string(), true), total);
        total += n_ext * FIELD_EXTENSION;

        // LEv is consumed before xDivXSub is built.
        self.map_offsets.insert(("LEv".to_string(), true), total);
        self.map_offsets
            .insert(("xDivXSubXi".to_string(), true), total);
        total += self.opening_points.len() * n_ext * FIELD_EXTENSION;

        self.map_total_n = total;
    }

    /// Verifier layout: one row per query for every committed section.
    fn set_map_offsets_verifier(&mut self) {
        let n_queries = self.stark_struct.n_queries;

        self.map_offsets.clear();
        self.map_offsets.insert(("const".to_string(), false), 0);
        for cc in &self.custom_commits {
            self.map_offsets.insert((format!("{}0", cc.name), false), 0);
            self.map_offsets.insert((format!("{}0", cc.name), true), 0);
        }

        let mut total = 0;
        for stage in 1..=self.n_stages + 1 {
            let section = Self::cm_section(stage);
            self.map_offsets.insert((section.clone(), false), total);
            total += n_queries * self.section_width(&section);
        }
        self.map_total_n = total;
    }

    /// Number of committed trees: witness stages, quotient, constants, plus
    /// one per custom commit.
    pub fn n_trees(&self) -> usize {
        self.n_stages + 2 + self.custom_commits.len()
    }

    pub fn challenges_by_stage(&self, stage: usize) -> impl Iterator<Item = usize> + '_ {
        self.challenges_map
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.stage == stage)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_info() -> StarkInfo {
        let json = r#"{
            "starkStruct": {
                "nBits": 3,
                "nBitsExt": 4,
                "nQueries": 4,
                "verificationHashType": "GL",
                "steps": [{ "nBits": 4 }]
            },
            "nPublics": 0,
            "nConstants": 1,
            "nStages": 1,
            "openingPoints": [0, 1],
            "boundaries": [{ "name": "everyRow" }, { "name": "firstRow" }],
            "qDeg": 1,
            "qDim": 3,
            "friExpId": 1,
            "cExpId": 0,
            "cmPolsMap": [
                { "stage": 1, "name": "p", "dim": 1, "stagePos": 0, "stageId": 0, "polsMapId": 0 },
                { "stage": 2, "name": "Q", "dim": 3, "stagePos": 0, "stageId": 0, "polsMapId": 1 }
            ],
            "evMap": [
                { "type": "cm", "id": 0, "prime": 0 },
                { "type": "cm", "id": 0, "prime": 1 },
                { "type": "cm", "id": 1, "prime": 0 }
            ],
            "mapSectionsN": { "cm1": 1, "cm2": 3, "const": 1 }
        }"#;
        StarkInfo::from_json(json, false).unwrap()
    }

    #[test]
    fn loads_and_lays_out_arena() {
        let info = toy_info();
        assert_eq!(info.stark_struct.arity(), 2);
        assert!(info.stark_struct.custom());
        assert!(!info.stark_struct.hash_commits);
        assert_eq!(info.ev_map[1].opening_pos, Some(1));

        // cm1 extended at 0, cm2 extended after it, then f/q, then LEv tail.
        let n_ext = 16;
        assert_eq!(info.offset("cm1", true), 0);
        assert_eq!(info.offset("cm2", true), n_ext);
        assert_eq!(info.offset("f", true), n_ext + 3 * n_ext);
        assert_eq!(info.offset("q", true), info.offset("f", true));
        assert_eq!(
            info.offset("LEv", true),
            info.offset("f", true) + 3 * n_ext
        );
        assert_eq!(info.map_total_n, info.offset("LEv", true) + 2 * n_ext * 3);
    }

    #[test]
    fn unknown_opening_point_is_rejected() {
        let mut info = toy_info();
        info.ev_map.push(EvMap {
            ty: EvMapType::Cm,
            id: 0,
            prime: 7,
            commit_id: 0,
            opening_pos: None,
        });
        assert!(info.finalize(false).is_err());
    }

    #[test]
    fn verifier_layout_is_query_sized() {
        let mut info = toy_info();
        info.finalize(true).unwrap();
        assert_eq!(info.offset("cm1", false), 0);
        assert_eq!(info.offset("cm2", false), 4 * 1);
        assert_eq!(info.map_total_n, 4 * 1 + 4 * 3);
    }
}
