//! Symmetric text serializer/deserializer for VM and CPU state.
//!
//! The same line-oriented format backs both the migration wire frame and
//! the on-disk snapshot file, modulo the fields each one carries — a
//! snapshot has no instruction stream or quantum (it restores against the
//! VM's already-known `Config`), a migration frame carries everything a
//! receiver needs to materialize a whole new `Vm` with no config file at
//! all. Unknown keys are skipped and `#`-prefixed lines are comments on
//! both paths, matching the assembly decoder's tolerance for malformed
//! input.

use crate::cpu::REGISTER_COUNT;
use crate::error::CodecError;
use crate::instruction::{Field, Instruction};
use crate::opcode::Opcode;

/// Full state needed to materialize a migrated `Vm` with no local config
/// file — the wire format's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVm {
    /// 0-based cursor at which the receiver should resume.
    pub cursor: usize,
    pub quantum: usize,
    pub instructions: Vec<Instruction>,
    pub vm_id: u32,
    pub pc: u32,
    pub registers: [i32; REGISTER_COUNT],
    pub hi: i32,
    pub lo: i32,
}

/// Render an `EncodedVm` in the deterministic text form the wire protocol
/// and the snapshot writer both share.
///
/// The cursor is serialized as `cursor + 1` deliberately: the sender will
/// not re-execute the `MIGRATE` instruction it just sent itself over, so
/// the receiver must resume one past it.
pub fn encode_vm(vm: &EncodedVm) -> String {
    let mut out = String::new();
    out.push_str(&format!("curr_inst_index={}\n", vm.cursor + 1));
    out.push_str(&format!("slice_instructions={}\n", vm.quantum));
    for inst in &vm.instructions {
        out.push_str(&format!("instruction={}\n", encode_instruction(inst)));
    }
    out.push_str(&format!("VMID={}\n", vm.vm_id));
    out.push_str(&format!("pc={}\n", vm.pc));
    for (i, reg) in vm.registers.iter().enumerate() {
        out.push_str(&format!("R{i}={reg}\n"));
    }
    out.push_str(&format!("lo={}\n", vm.lo));
    out.push_str(&format!("hi={}\n", vm.hi));
    out
}

/// Parse the text form produced by [`encode_vm`] back into an `EncodedVm`.
pub fn decode_vm(text: &str) -> Result<EncodedVm, CodecError> {
    let mut curr_inst_index = None;
    let mut quantum = None;
    let mut instructions = Vec::new();
    let mut vm_id = None;
    let mut pc = None;
    let mut registers = [0i32; REGISTER_COUNT];
    let mut hi = 0i32;
    let mut lo = 0i32;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::warn!(line, "codec line missing '=', skipping");
            continue;
        };

        if let Some(index_text) = key.strip_prefix('R') {
            if let Ok(index) = index_text.parse::<usize>() {
                if let Some(slot) = registers.get_mut(index) {
                    *slot = value.parse().unwrap_or(0);
                    continue;
                }
            }
        }

        match key {
            "curr_inst_index" => curr_inst_index = value.parse::<usize>().ok(),
            "slice_instructions" => quantum = value.parse::<usize>().ok(),
            "instruction" => instructions.push(decode_instruction(value)),
            "VMID" => vm_id = value.parse::<u32>().ok(),
            "pc" => pc = value.parse::<u32>().ok(),
            "hi" => hi = value.parse().unwrap_or(0),
            "lo" => lo = value.parse().unwrap_or(0),
            other => tracing::debug!(key = other, "unknown codec key, ignoring"),
        }
    }

    let curr_inst_index = curr_inst_index.ok_or(CodecError::MissingField("curr_inst_index"))?;
    let quantum = quantum.ok_or(CodecError::MissingField("slice_instructions"))?;
    let vm_id = vm_id.ok_or(CodecError::MissingField("VMID"))?;
    let pc = pc.ok_or(CodecError::MissingField("pc"))?;

    Ok(EncodedVm {
        cursor: curr_inst_index.saturating_sub(1),
        quantum,
        instructions,
        vm_id,
        pc,
        registers,
        hi,
        lo,
    })
}

/// State needed to restore a CPU against an *already-known* `Config`.
/// Unlike a migration frame, a snapshot has no instruction stream,
/// quantum, or VMID of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSnapshot {
    pub registers: [i32; REGISTER_COUNT],
    pub pc: u32,
    pub binary_path: String,
}

pub fn encode_snapshot(snap: &EncodedSnapshot) -> String {
    let mut out = String::new();
    for (i, reg) in snap.registers.iter().enumerate() {
        out.push_str(&format!("R{i}={reg}\n"));
    }
    out.push_str(&format!("pc={}\n", snap.pc));
    out.push_str(&format!("binary={}\n", snap.binary_path));
    out
}

pub fn decode_snapshot(text: &str) -> Result<EncodedSnapshot, CodecError> {
    let mut registers = [0i32; REGISTER_COUNT];
    let mut pc = None;
    let mut binary_path = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        if let Some(index_text) = key.strip_prefix('R') {
            if let Ok(index) = index_text.parse::<usize>() {
                if let Some(slot) = registers.get_mut(index) {
                    *slot = value.parse().unwrap_or(0);
                    continue;
                }
            }
        }

        match key {
            "pc" => pc = value.parse::<u32>().ok(),
            "binary" => binary_path = Some(value.to_string()),
            other => tracing::debug!(key = other, "unknown snapshot key, ignoring"),
        }
    }

    Ok(EncodedSnapshot {
        registers,
        pc: pc.ok_or(CodecError::MissingField("pc"))?,
        binary_path: binary_path.ok_or(CodecError::MissingField("binary"))?,
    })
}

/// Render one instruction as `<mnemonic>[,<operand>]*`. For `Snapshot`/
/// `Migrate` the single field after the mnemonic is the path/target
/// string verbatim, not a parsed integer.
fn encode_instruction(inst: &Instruction) -> String {
    match inst {
        Instruction::Snapshot { path } => format!("{},{path}", Opcode::Snapshot.mnemonic()),
        Instruction::Migrate { target } => format!("{},{target}", Opcode::Migrate.mnemonic()),
        Instruction::DumpProcessorState => Opcode::DumpProcessorState.mnemonic().to_string(),
        Instruction::Invalid => "INVALID".to_string(),
        other => {
            let operands: Vec<String> = other.operands().iter().map(i64::to_string).collect();
            format!("{},{}", other.opcode().mnemonic(), operands.join(","))
        }
    }
}

/// Inverse of [`encode_instruction`].
fn decode_instruction(field: &str) -> Instruction {
    let (mnemonic, rest) = field.split_once(',').unwrap_or((field, ""));
    let opcode = Opcode::from_mnemonic(mnemonic);

    match opcode {
        Opcode::Snapshot => Instruction::Snapshot { path: rest.to_string() },
        Opcode::Migrate => Instruction::Migrate { target: rest.to_string() },
        Opcode::DumpProcessorState => Instruction::DumpProcessorState,
        Opcode::Invalid => Instruction::Invalid,
        _ => {
            let fields: Vec<Option<Field>> = if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(',')
                    .map(|v| v.trim().parse::<i64>().ok().map(|n| Field::Immediate(n as i32)))
                    .collect()
            };
            Instruction::from_fields(opcode, &fields)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vm() -> EncodedVm {
        let mut registers = [0i32; REGISTER_COUNT];
        registers[1] = -7;
        registers[3] = 12;
        EncodedVm {
            cursor: 4,
            quantum: 2,
            instructions: vec![
                Instruction::Li { d: 1, imm: -7 },
                Instruction::Ori { d: 3, s: 1, imm: 5 },
                Instruction::Snapshot { path: "/tmp/vm1.snap".into() },
                Instruction::Migrate { target: "127.0.0.1:6000".into() },
                Instruction::DumpProcessorState,
            ],
            vm_id: 2,
            pc: 5,
            registers,
            hi: -1,
            lo: 0,
        }
    }

    #[test]
    fn vm_round_trips_through_text() {
        let vm = sample_vm();
        let text = encode_vm(&vm);
        let decoded = decode_vm(&text).unwrap();
        assert_eq!(decoded, vm);
    }

    #[test]
    fn cursor_is_serialized_one_past_the_live_value() {
        let vm = sample_vm();
        let text = encode_vm(&vm);
        assert!(text.contains("curr_inst_index=5\n"));
    }

    #[test]
    fn decode_skips_comments_and_unknown_keys() {
        let text = "# a comment\ncurr_inst_index=1\nslice_instructions=3\nVMID=1\npc=0\nbogus=nonsense\n";
        let decoded = decode_vm(text).unwrap();
        assert_eq!(decoded.cursor, 0);
        assert_eq!(decoded.quantum, 3);
        assert_eq!(decoded.vm_id, 1);
    }

    #[test]
    fn missing_required_field_errors() {
        let text = "slice_instructions=3\nVMID=1\npc=0\n";
        assert!(matches!(decode_vm(text), Err(CodecError::MissingField("curr_inst_index"))));
    }

    #[test]
    fn snapshot_round_trips() {
        let mut registers = [0i32; REGISTER_COUNT];
        registers[1] = 9;
        let snap = EncodedSnapshot { registers, pc: 2, binary_path: "/tmp/vm1.asm".into() };
        let text = encode_snapshot(&snap);
        assert_eq!(decode_snapshot(&text).unwrap(), snap);
    }

    #[test]
    fn ori_and_xori_round_trip_through_codec() {
        let inst = Instruction::Ori { d: 3, s: 1, imm: 5 };
        let text = encode_instruction(&inst);
        assert_eq!(text, "ori,3,1,5");
        assert_eq!(decode_instruction(&text), inst);
    }
}
