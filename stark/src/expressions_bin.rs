//! The compiled expression binary: opcode/argument pools, per-expression
//! headers, debug constraint headers and hints.
//!
//! The on-disk container is a little-endian sectioned file (`chps` magic):
//! section 2 holds the expressions, section 3 the debug constraints and
//! section 4 the hints.

use std::collections::HashMap;

use crate::errors::{StarkError, StarkResult};
use crate::stark_info::OpType;

pub const BINARY_EXPRESSIONS_SECTION: u32 = 2;
pub const BINARY_CONSTRAINTS_SECTION: u32 = 3;
pub const BINARY_HINTS_SECTION: u32 = 4;

const BIN_MAGIC: &[u8; 4] = b"chps";
const BIN_VERSION: u32 = 1;

/// Header of one compiled expression: destination shape, temporary counts,
/// spans into the shared opcode/argument pools and usage masks.
#[derive(Clone, Debug, Default)]
pub struct ParserParams {
    pub stage: u32,
    pub exp_id: u64,
    pub n_temp1: usize,
    pub n_temp3: usize,
    pub n_ops: usize,
    pub ops_offset: usize,
    pub n_args: usize,
    pub args_offset: usize,
    pub n_const_pols_used: usize,
    pub const_pols_offset: usize,
    pub n_cm_pols_used: usize,
    pub cm_pols_offset: usize,
    pub n_challenges_used: usize,
    pub challenges_offset: usize,
    pub n_publics_used: usize,
    pub publics_offset: usize,
    pub n_airgroup_values_used: usize,
    pub airgroup_values_offset: usize,
    pub n_air_values_used: usize,
    pub air_values_offset: usize,
    pub n_custom_commits_pols_used: Vec<usize>,
    pub custom_commits_offset: Vec<usize>,
    pub first_row: usize,
    pub last_row: usize,
    pub dest_dim: usize,
    pub dest_id: usize,
    pub im_pol: bool,
    pub line: String,
}

/// The shared pools every expression's spans index into.
#[derive(Clone, Debug, Default)]
pub struct ParserArgs {
    pub ops: Vec<u8>,
    pub args: Vec<u16>,
    pub numbers: Vec<u64>,
    pub const_pols_ids: Vec<u16>,
    pub cm_pols_ids: Vec<u16>,
    pub challenges_ids: Vec<u16>,
    pub publics_ids: Vec<u16>,
    pub airgroup_values_ids: Vec<u16>,
    pub air_values_ids: Vec<u16>,
    pub custom_commits_pols_ids: Vec<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct HintFieldValue {
    pub operand: Option<OpType>,
    pub id: usize,
    pub dim: usize,
    pub value: u64,
    pub string_value: String,
    pub row_offset_index: usize,
    pub commit_id: usize,
    pub pos: Vec<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct HintField {
    pub name: String,
    pub values: Vec<HintFieldValue>,
}

#[derive(Clone, Debug, Default)]
pub struct Hint {
    pub name: String,
    pub fields: Vec<HintField>,
}

#[derive(Clone, Debug, Default)]
pub struct ExpressionsBin {
    pub expressions_info: HashMap<u64, ParserParams>,
    pub constraints_info_debug: Vec<ParserParams>,
    pub hints: Vec<Hint>,
    pub expressions_bin_args_constraints: ParserArgs,
    pub expressions_bin_args_expressions: ParserArgs,
}

impl ExpressionsBin {
    pub fn from_bytes(bytes: &[u8]) -> StarkResult<Self> {
        let mut sections = BinFile::parse(bytes)?;
        let mut bin = ExpressionsBin::default();

        let mut expressions = sections.take(BINARY_EXPRESSIONS_SECTION)?;
        bin.load_expressions_section(&mut expressions)?;

        let mut constraints = sections.take(BINARY_CONSTRAINTS_SECTION)?;
        bin.load_constraints_section(&mut constraints)?;

        let mut hints = sections.take(BINARY_HINTS_SECTION)?;
        bin.load_hints_section(&mut hints)?;

        Ok(bin)
    }

    pub fn get_hint_ids_by_name(&self, name: &str) -> Vec<usize> {
        self.hints
            .iter()
            .enumerate()
            .filter(|(_, h)| h.name == name)
            .map(|(i, _)| i)
            .collect()
    }

    fn load_expressions_section(&mut self, r: &mut SectionReader) -> StarkResult<()> {
        let n_ops = r.read_u32()? as usize;
        let n_args = r.read_u32()? as usize;
        let n_numbers = r.read_u32()? as usize;
        let n_const_ids = r.read_u32()? as usize;
        let n_cm_ids = r.read_u32()? as usize;
        let n_challenges_ids = r.read_u32()? as usize;
        let n_publics_ids = r.read_u32()? as usize;
        let n_airgroup_ids = r.read_u32()? as usize;
        let n_air_ids = r.read_u32()? as usize;
        let n_custom_ids = r.read_u32()? as usize;

        let n_custom_commits = r.read_u32()? as usize;
        let n_expressions = r.read_u32()? as usize;

        for _ in 0..n_expressions {
            let mut p = ParserParams {
                exp_id: r.read_u32()? as u64,
                dest_dim: r.read_u32()? as usize,
                dest_id: r.read_u32()? as usize,
                stage: r.read_u32()?,
                n_temp1: r.read_u32()? as usize,
                n_temp3: r.read_u32()? as usize,
                n_ops: r.read_u32()? as usize,
                ops_offset: r.read_u32()? as usize,
                n_args: r.read_u32()? as usize,
                args_offset: r.read_u32()? as usize,
                n_const_pols_used: r.read_u32()? as usize,
                const_pols_offset: r.read_u32()? as usize,
                n_cm_pols_used: r.read_u32()? as usize,
                cm_pols_offset: r.read_u32()? as usize,
                n_challenges_used: r.read_u32()? as usize,
                challenges_offset: r.read_u32()? as usize,
                n_publics_used: r.read_u32()? as usize,
                publics_offset: r.read_u32()? as usize,
                n_airgroup_values_used: r.read_u32()? as usize,
                airgroup_values_offset: r.read_u32()? as usize,
                n_air_values_used: r.read_u32()? as usize,
                air_values_offset: r.read_u32()? as usize,
                ..Default::default()
            };
            for _ in 0..n_custom_commits {
                p.n_custom_commits_pols_used.push(r.read_u32()? as usize);
                p.custom_commits_offset.push(r.read_u32()? as usize);
            }
            p.line = r.read_string()?;
            self.expressions_info.insert(p.exp_id, p);
        }

        let args = &mut self.expressions_bin_args_expressions;
        args.ops = r.read_u8_vec(n_ops)?;
        args.args = r.read_u16_vec(n_args)?;
        args.numbers = r.read_u64_vec(n_numbers)?;
        args.const_pols_ids = r.read_u16_vec(n_const_ids)?;
        args.cm_pols_ids = r.read_u16_vec(n_cm_ids)?;
        args.challenges_ids = r.read_u16_vec(n_challenges_ids)?;
        args.publics_ids = r.read_u16_vec(n_publics_ids)?;
        args.airgroup_values_ids = r.read_u16_vec(n_airgroup_ids)?;
        args.air_values_ids = r.read_u16_vec(n_air_ids)?;
        args.custom_commits_pols_ids = r.read_u16_vec(n_custom_ids)?;
        Ok(())
    }

    fn load_constraints_section(&mut self, r: &mut SectionReader) -> StarkResult<()> {
        let n_ops = r.read_u32()? as usize;
        let n_args = r.read_u32()? as usize;
        let n_numbers = r.read_u32()? as usize;
        let n_const_ids = r.read_u32()? as usize;
        let n_cm_ids = r.read_u32()? as usize;
        let n_challenges_ids = r.read_u32()? as usize;
        let n_publics_ids = r.read_u32()? as usize;
        let n_airgroup_ids = r.read_u32()? as usize;
        let n_air_ids = r.read_u32()? as usize;
        let n_custom_ids = r.read_u32()? as usize;

        let n_custom_commits = r.read_u32()? as usize;
        let n_constraints = r.read_u32()? as usize;

        for _ in 0..n_constraints {
            let mut p = ParserParams {
                stage: r.read_u32()?,
                dest_dim: r.read_u32()? as usize,
                dest_id: r.read_u32()? as usize,
                first_row: r.read_u32()? as usize,
                last_row: r.read_u32()? as usize,
                n_temp1: r.read_u32()? as usize,
                n_temp3: r.read_u32()? as usize,
                n_ops: r.read_u32()? as usize,
                ops_offset: r.read_u32()? as usize,
                n_args: r.read_u32()? as usize,
                args_offset: r.read_u32()? as usize,
                n_const_pols_used: r.read_u32()? as usize,
                const_pols_offset: r.read_u32()? as usize,
                n_cm_pols_used: r.read_u32()? as usize,
                cm_pols_offset: r.read_u32()? as usize,
                n_challenges_used: r.read_u32()? as usize,
                challenges_offset: r.read_u32()? as usize,
                n_publics_used: r.read_u32()? as usize,
                publics_offset: r.read_u32()? as usize,
                n_airgroup_values_used: r.read_u32()? as usize,
                airgroup_values_offset: r.read_u32()? as usize,
                n_air_values_used: r.read_u32()? as usize,
                air_values_offset: r.read_u32()? as usize,
                ..Default::default()
            };
            for _ in 0..n_custom_commits {
                p.n_custom_commits_pols_used.push(r.read_u32()? as usize);
                p.custom_commits_offset.push(r.read_u32()? as usize);
            }
            p.im_pol = r.read_u32()? != 0;
            p.line = r.read_string()?;
            self.constraints_info_debug.push(p);
        }

        let args = &mut self.expressions_bin_args_constraints;
        args.ops = r.read_u8_vec(n_ops)?;
        args.args = r.read_u16_vec(n_args)?;
        args.numbers = r.read_u64_vec(n_numbers)?;
        args.const_pols_ids = r.read_u16_vec(n_const_ids)?;
        args.cm_pols_ids = r.read_u16_vec(n_cm_ids)?;
        args.challenges_ids = r.read_u16_vec(n_challenges_ids)?;
        args.publics_ids = r.read_u16_vec(n_publics_ids)?;
        args.airgroup_values_ids = r.read_u16_vec(n_airgroup_ids)?;
        args.air_values_ids = r.read_u16_vec(n_air_ids)?;
        args.custom_commits_pols_ids = r.read_u16_vec(n_custom_ids)?;
        Ok(())
    }

    fn load_hints_section(&mut self, r: &mut SectionReader) -> StarkResult<()> {
        let n_hints = r.read_u32()? as usize;
        for _ in 0..n_hints {
            let mut hint = Hint {
                name: r.read_string()?,
                fields: Vec::new(),
            };
            let n_fields = r.read_u32()? as usize;
            for _ in 0..n_fields {
                let mut field = HintField {
                    name: r.read_string()?,
                    values: Vec::new(),
                };
                let n_values = r.read_u32()? as usize;
                for _ in 0..n_values {
                    let operand = parse_op_type(&r.read_string()?)?;
                    let mut value = HintFieldValue {
                        operand: Some(operand),
                        ..Default::default()
                    };
                    match operand {
                        OpType::Number => value.value = r.read_u64()?,
                        OpType::String => value.string_value = r.read_string()?,
                        _ => value.id = r.read_u32()? as usize,
                    }
                    if matches!(operand, OpType::Custom | OpType::Const | OpType::Cm) {
                        value.row_offset_index = r.read_u32()? as usize;
                    }
                    if operand == OpType::Tmp {
                        value.dim = r.read_u32()? as usize;
                    }
                    if operand == OpType::Custom {
                        value.commit_id = r.read_u32()? as usize;
                    }
                    let n_pos = r.read_u32()? as usize;
                    for _ in 0..n_pos {
                        value.pos.push(r.read_u32()? as usize);
                    }
                    field.values.push(value);
                }
                hint.fields.push(field);
            }
            self.hints.push(hint);
        }
        Ok(())
    }
}

fn parse_op_type(s: &str) -> StarkResult<OpType> {
    Ok(match s {
        "const" => OpType::Const,
        "cm" => OpType::Cm,
        "tmp" => OpType::Tmp,
        "public" => OpType::Public,
        "airgroupvalue" => OpType::AirgroupValue,
        "challenge" => OpType::Challenge,
        "number" => OpType::Number,
        "string" => OpType::String,
        "airvalue" => OpType::AirValue,
        "proofvalue" => OpType::ProofValue,
        "custom" => OpType::Custom,
        other => {
            return Err(StarkError::shape(format!(
                "invalid operand type `{other}` in hints"
            )))
        }
    })
}

/// The sectioned little-endian container shared by every compiled binary.
struct BinFile {
    sections: HashMap<u32, Vec<u8>>,
}

impl BinFile {
    fn parse(bytes: &[u8]) -> StarkResult<Self> {
        let mut r = SectionReader::new(bytes);
        let magic = r.read_bytes(4)?;
        if magic != BIN_MAGIC {
            return Err(StarkError::shape("bad magic in expressions binary"));
        }
        let version = r.read_u32()?;
        if version != BIN_VERSION {
            return Err(StarkError::shape(format!(
                "unsupported expressions binary version {version}"
            )));
        }
        let n_sections = r.read_u32()? as usize;
        let mut sections = HashMap::new();
        for _ in 0..n_sections {
            let id = r.read_u32()?;
            let len = r.read_u64()? as usize;
            sections.insert(id, r.read_bytes(len)?.to_vec());
        }
        Ok(Self { sections })
    }

    fn take(&mut self, id: u32) -> StarkResult<SectionReader<'static>> {
        let bytes = self
            .sections
            .remove(&id)
            .ok_or_else(|| StarkError::shape(format!("missing binary section {id}")))?;
        Ok(SectionReader::owned(bytes))
    }
}

struct SectionReader<'a> {
    bytes: std::borrow::Cow<'a, [u8]>,
    pos: usize,
}

impl<'a> SectionReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes: std::borrow::Cow::Borrowed(bytes),
            pos: 0,
        }
    }

    fn owned(bytes: Vec<u8>) -> SectionReader<'static> {
        SectionReader {
            bytes: std::borrow::Cow::Owned(bytes),
            pos: 0,
        }
    }

    fn read_bytes(&mut self, n: usize) -> StarkResult<&[u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(StarkError::shape("truncated expressions binary"));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.bytes[start..start + n])
    }

    fn read_u8(&mut self) -> StarkResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> StarkResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> StarkResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> StarkResult<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_string(&mut self) -> StarkResult<String> {
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos == self.bytes.len() {
            return Err(StarkError::shape("unterminated string in binary"));
        }
        let s = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        self.pos += 1; // NUL
        Ok(s)
    }

    fn read_u8_vec(&mut self, n: usize) -> StarkResult<Vec<u8>> {
        (0..n).map(|_| self.read_u8()).collect()
    }

    fn read_u16_vec(&mut self, n: usize) -> StarkResult<Vec<u16>> {
        (0..n).map(|_| self.read_u16()).collect()
    }

    fn read_u64_vec(&mut self, n: usize) -> StarkResult<Vec<u64>> {
        (0..n).map(|_| self.read_u64()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BinWriter {
        out: Vec<u8>,
    }

    impl BinWriter {
        fn new() -> Self {
            Self { out: Vec::new() }
        }
        fn u32(&mut self, v: u32) {
            self.out.extend_from_slice(&v.to_le_bytes());
        }
        fn u64(&mut self, v: u64) {
            self.out.extend_from_slice(&v.to_le_bytes());
        }
        fn string(&mut self, s: &str) {
            self.out.extend_from_slice(s.as_bytes());
            self.out.push(0);
        }
    }

    fn container(sections: Vec<(u32, Vec<u8>)>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BIN_MAGIC);
        out.extend_from_slice(&BIN_VERSION.to_le_bytes());
        out.extend_from_slice(&(sections.len() as u32).to_le_bytes());
        for (id, payload) in sections {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            out.extend_from_slice(&payload);
        }
        out
    }

    #[test]
    fn round_trips_a_minimal_binary() {
        // One expression: tmp1[0] = number[0] + number[0]; dest dim 1.
        let mut exprs = BinWriter::new();
        exprs.u32(1); // nOps
        exprs.u32(4); // nArgs
        exprs.u32(1); // nNumbers
        for _ in 0..7 {
            exprs.u32(0); // no usage-mask ids
        }
        exprs.u32(0); // nCustomCommits
        exprs.u32(1); // nExpressions
        // header
        exprs.u32(42); // expId
        exprs.u32(1); // destDim
        exprs.u32(0); // destId
        exprs.u32(1); // stage
        exprs.u32(1); // nTemp1
        exprs.u32(0); // nTemp3
        exprs.u32(1); // nOps
        exprs.u32(0); // opsOffset
        exprs.u32(4); // nArgs
        exprs.u32(0); // argsOffset
        for _ in 0..12 {
            exprs.u32(0); // six (count, offset) usage-mask pairs
        }
        exprs.string("x + x");
        // pools
        exprs.out.push(16); // opcode 16: tmp1 = number op number
        for a in [0u16, 0, 0, 0] {
            exprs.out.extend_from_slice(&a.to_le_bytes());
        }
        exprs.u64(7); // numbers[0]

        let mut constraints = BinWriter::new();
        for _ in 0..10 {
            constraints.u32(0);
        }
        constraints.u32(0); // nCustomCommits
        constraints.u32(0); // nConstraints

        let mut hints = BinWriter::new();
        hints.u32(1);
        hints.string("gsum");
        hints.u32(1); // one field
        hints.string("reference");
        hints.u32(1); // one value
        hints.string("cm");
        hints.u32(3); // id
        hints.u32(0); // rowOffsetIndex
        hints.u32(0); // nPos

        let bytes = container(vec![
            (BINARY_EXPRESSIONS_SECTION, exprs.out),
            (BINARY_CONSTRAINTS_SECTION, constraints.out),
            (BINARY_HINTS_SECTION, hints.out),
        ]);

        let bin = ExpressionsBin::from_bytes(&bytes).unwrap();
        let p = &bin.expressions_info[&42];
        assert_eq!(p.dest_dim, 1);
        assert_eq!(p.n_temp1, 1);
        assert_eq!(p.line, "x + x");
        assert_eq!(bin.expressions_bin_args_expressions.ops, vec![16]);
        assert_eq!(bin.expressions_bin_args_expressions.numbers, vec![7]);

        assert_eq!(bin.hints.len(), 1);
        assert_eq!(bin.get_hint_ids_by_name("gsum"), vec![0]);
        let value = &bin.hints[0].fields[0].values[0];
        assert_eq!(value.operand, Some(OpType::Cm));
        assert_eq!(value.id, 3);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = container(vec![]);
        bytes[0] = b'x';
        assert!(ExpressionsBin::from_bytes(&bytes).is_err());
    }
}
