//! Assembly line decoder.
//!
//! Translates one logical source line into exactly one [`Instruction`]. The
//! decoder is total — an unrecognized mnemonic or a malformed operand never
//! aborts the load, it just degrades the instruction (logged) per the
//! lenient decode policy tests rely on. Comment and blank-line skipping
//! happens one layer up, in `config.rs`'s assembly loader.

use crate::instruction::{Field, Instruction};
use crate::opcode::Opcode;

/// Decode one non-empty, non-comment assembly line.
pub fn decode_line(line: &str) -> Instruction {
    if line.starts_with("DUMP_PROCESSOR_STATE") {
        return Instruction::DumpProcessorState;
    }

    if line.contains("SNAPSHOT") {
        let path = match line.find(' ') {
            Some(pos) => line[pos + 1..].trim_start().to_string(),
            None => String::new(),
        };
        return Instruction::Snapshot { path };
    }

    if line.contains("MIGRATE") {
        let target = line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();
        return Instruction::Migrate { target };
    }

    let mut head = line.splitn(2, char::is_whitespace);
    let mnemonic = head.next().unwrap_or_default();
    let rest = head.next().unwrap_or_default().trim_start();

    let fields: Vec<Option<Field>> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(|raw| parse_field(raw.trim())).collect()
    };

    let mut opcode = Opcode::from_mnemonic(mnemonic);
    if matches!(opcode, Opcode::Or | Opcode::Xor)
        && fields.iter().flatten().any(|f| !f.is_register())
    {
        opcode = if opcode == Opcode::Or {
            Opcode::Ori
        } else {
            Opcode::Xori
        };
    }

    if opcode == Opcode::Invalid {
        tracing::warn!(mnemonic, "unrecognized mnemonic, decoding as INVALID");
    }

    Instruction::from_fields(opcode, &fields)
}

/// Parse one comma-separated operand field: a `$N` register reference, a
/// signed decimal immediate, or a `0x`-prefixed hex immediate. Returns
/// `None` (logged) for anything else — the caller still emits the
/// instruction, short-armed.
fn parse_field(raw: &str) -> Option<Field> {
    if raw.is_empty() {
        return None;
    }

    if let Some(digits) = raw.strip_prefix('$') {
        return match digits.parse::<u32>() {
            Ok(n) => Some(Field::Register(n)),
            Err(_) => {
                tracing::warn!(field = raw, "malformed register operand, skipping");
                None
            }
        };
    }

    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return match u32::from_str_radix(hex, 16) {
            Ok(n) => Some(Field::Immediate(n as i32)),
            Err(_) => {
                tracing::warn!(field = raw, "malformed hex immediate, skipping");
                None
            }
        };
    }

    match raw.parse::<i32>() {
        Ok(n) => Some(Field::Immediate(n)),
        Err(_) => {
            tracing::warn!(field = raw, "malformed immediate operand, skipping");
            None
        }
    }
}
