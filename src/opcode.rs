//! The opcode set and its shared mnemonic table.
//!
//! [`Opcode`] is the closed tag the assembly decoder (`decode.rs`) and the
//! migration/snapshot codec (`codec.rs`) both resolve mnemonics against, so
//! `ori`/`xori` and friends round-trip identically through either path. Per
//! the architecture note this table lives in exactly one place.

use std::fmt;

/// One MIPS-subset opcode.
///
/// `Invalid` is the decode-failure sentinel: an unrecognized
/// mnemonic still produces an instruction, it just carries this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Addi,
    Andi,
    Ori,
    Xori,
    Addu,
    Subu,
    Addiu,
    Mul,
    Mult,
    Div,
    Sll,
    Srl,
    Li,
    DumpProcessorState,
    Snapshot,
    Migrate,
    Invalid,
}

/// `(mnemonic, opcode)` pairs, matched in order against a decoded or
/// codec-serialized mnemonic string. Case-sensitive: guest assembly is
/// lowercase, the two meta mnemonics are uppercase, matching `spec.md`'s
/// grammar exactly.
pub const MNEMONIC_TABLE: &[(&str, Opcode)] = &[
    ("add", Opcode::Add),
    ("sub", Opcode::Sub),
    ("and", Opcode::And),
    ("or", Opcode::Or),
    ("xor", Opcode::Xor),
    ("addi", Opcode::Addi),
    ("andi", Opcode::Andi),
    ("ori", Opcode::Ori),
    ("xori", Opcode::Xori),
    ("addu", Opcode::Addu),
    ("subu", Opcode::Subu),
    ("addiu", Opcode::Addiu),
    ("mul", Opcode::Mul),
    ("mult", Opcode::Mult),
    ("div", Opcode::Div),
    ("sll", Opcode::Sll),
    ("srl", Opcode::Srl),
    ("li", Opcode::Li),
    ("DUMP_PROCESSOR_STATE", Opcode::DumpProcessorState),
    ("SNAPSHOT", Opcode::Snapshot),
    ("MIGRATE", Opcode::Migrate),
];

impl Opcode {
    /// Look up an opcode by its exact mnemonic text. Returns `Invalid` for
    /// anything not in [`MNEMONIC_TABLE`] — the decoder is total.
    pub fn from_mnemonic(mnemonic: &str) -> Opcode {
        MNEMONIC_TABLE
            .iter()
            .find(|(name, _)| *name == mnemonic)
            .map(|(_, op)| *op)
            .unwrap_or(Opcode::Invalid)
    }

    /// Canonical mnemonic text for this opcode, used by the codec encoder
    /// and by `decode.rs`'s `ori`/`xori` promotion.
    pub fn mnemonic(self) -> &'static str {
        MNEMONIC_TABLE
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(name, _)| *name)
            .unwrap_or("INVALID")
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_mnemonic() {
        for (name, op) in MNEMONIC_TABLE {
            assert_eq!(Opcode::from_mnemonic(name), *op);
            assert_eq!(op.mnemonic(), *name);
        }
    }

    #[test]
    fn unknown_mnemonic_is_invalid() {
        assert_eq!(Opcode::from_mnemonic("jmp"), Opcode::Invalid);
    }
}
