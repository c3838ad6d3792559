//! One guest's runtime unit: a `Cpu`, its instruction stream, and the
//! scheduling cursor into that stream.
//!
//! `Vm` is the only thing that ever sees `Snapshot`/`Migrate`
//! instructions — `Cpu::execute` never does. Ownership is
//! exclusive: a `Vm` owns its `Cpu` outright, and migrating a VM is a move
//! across a process boundary, not a copy — the sender gives up scheduling
//! it the moment the send completes.

use std::fs;
use std::net::TcpStream;

use crate::codec::{decode_snapshot, encode_snapshot, encode_vm, EncodedSnapshot, EncodedVm};
use crate::config::{load_assembly, same_binary, Config};
use crate::cpu::Cpu;
use crate::error::{CodecError, ConfigError, WireError};
use crate::instruction::Instruction;
use crate::wire;

/// A guest virtual machine: its config, its own exclusively-owned `Cpu`,
/// its decoded instruction stream, and where it is in that stream.
pub struct Vm {
    config: Config,
    cpu: Cpu,
    instructions: Vec<Instruction>,
    cursor: usize,
    migrated: bool,
}

impl Vm {
    /// Construct a fresh VM: zeroed CPU, cursor at the start of the stream.
    pub fn fresh(config: Config) -> Result<Vm, ConfigError> {
        let instructions = load_assembly(&config.binary_path)?;
        let cpu = Cpu::new(config.vm_id);
        Ok(Vm { config, cpu, instructions, cursor: 0, migrated: false })
    }

    /// Construct a VM restored from a local snapshot file.
    ///
    /// If the snapshot's recorded binary path matches `config.binary_path`,
    /// execution resumes mid-stream at `pc` (the writer already incremented
    /// `pc` past its own `SNAPSHOT` instruction, so this is the instruction
    /// right after it, a known quirk kept as-is). Otherwise the program
    /// restarts from the top against the restored register file.
    pub fn from_snapshot(config: Config, snapshot_path: &str) -> Result<Vm, ConfigError> {
        let instructions = load_assembly(&config.binary_path)?;

        let text = fs::read_to_string(snapshot_path).map_err(|source| ConfigError::SnapshotOpen {
            path: snapshot_path.to_string(),
            source,
        })?;
        let snap: EncodedSnapshot = decode_snapshot(&text).map_err(|e| snapshot_decode_error(snapshot_path, e))?;

        let cursor = if same_binary(&snap.binary_path, &config.binary_path) {
            snap.pc as usize
        } else {
            0
        };

        let cpu = Cpu::restore(config.vm_id, snap.registers, 0, 0, snap.pc);
        Ok(Vm { config, cpu, instructions, cursor, migrated: false })
    }

    /// Construct a VM from a decoded migration frame. There is no
    /// local config file backing a migrated VM — its binary path is
    /// unknown on the receiving side, which is fine: it never needs to be
    /// re-resolved, since the full instruction stream already travelled
    /// with it.
    pub fn from_migration(encoded: EncodedVm) -> Vm {
        let cpu = Cpu::restore(encoded.vm_id, encoded.registers, encoded.hi, encoded.lo, encoded.pc);
        Vm {
            config: Config {
                quantum: encoded.quantum,
                binary_path: String::new(),
                vm_id: encoded.vm_id,
            },
            cpu,
            instructions: encoded.instructions,
            cursor: encoded.cursor,
            migrated: false,
        }
    }

    pub fn vm_id(&self) -> u32 {
        self.cpu.vm_id()
    }

    pub fn quantum(&self) -> usize {
        self.config.quantum
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn migrated(&self) -> bool {
        self.migrated
    }

    /// True once the VM has nothing left to run — exhausted its stream or
    /// already shipped itself off to a peer.
    pub fn is_done(&self) -> bool {
        self.migrated || self.cursor >= self.instructions.len()
    }

    /// Execute up to `quantum` instructions starting at `cursor`.
    ///
    /// Returns `true` iff the hypervisor should keep scheduling this VM —
    /// i.e. it neither migrated away nor ran off the end of its stream.
    pub fn run(&mut self, quantum: usize) -> bool {
        for _ in 0..quantum {
            if self.is_done() {
                break;
            }

            let inst = self.instructions[self.cursor].clone();
            match &inst {
                Instruction::Snapshot { path } => {
                    if let Err(e) = self.snapshot(path) {
                        tracing::error!(vm_id = self.vm_id(), path, error = %e, "failed to write snapshot");
                    }
                }
                Instruction::Migrate { target } => match self.migrate(target) {
                    Ok(()) => {
                        self.migrated = true;
                        tracing::info!(vm_id = self.vm_id(), target, "VM migrated");
                    }
                    Err(e) => {
                        tracing::error!(vm_id = self.vm_id(), target, error = %e, "migration failed, VM remains scheduled");
                    }
                },
                _ => self.cpu.execute(&inst),
            }

            self.cursor += 1;
        }

        !self.migrated && self.cursor < self.instructions.len()
    }

    /// Write the plaintext snapshot file and advance `pc` by one —
    /// the snapshot itself consumes a virtual cycle.
    fn snapshot(&mut self, path: &str) -> std::io::Result<()> {
        self.cpu.set_pc(self.cpu.pc().wrapping_add(1));
        let encoded = EncodedSnapshot {
            registers: *self.cpu.registers(),
            pc: self.cpu.pc(),
            binary_path: self.config.binary_path.clone(),
        };
        fs::write(path, encode_snapshot(&encoded))?;
        Ok(())
    }

    /// Connect to the peer and send this VM's full state in one frame.
    /// `cpu.pc` is NOT advanced here — only the stream cursor moves past
    /// the `MIGRATE` instruction; the serialized `pc` is exactly
    /// what it was when the send happened.
    fn migrate(&self, target: &str) -> Result<(), WireError> {
        let mut stream = TcpStream::connect(target).map_err(|source| WireError::Connect {
            addr: target.to_string(),
            source,
        })?;
        let text = encode_vm(&self.to_encoded());
        wire::send_frame(&mut stream, &text)
    }

    fn to_encoded(&self) -> EncodedVm {
        EncodedVm {
            cursor: self.cursor,
            quantum: self.config.quantum,
            instructions: self.instructions.clone(),
            vm_id: self.cpu.vm_id(),
            pc: self.cpu.pc(),
            registers: *self.cpu.registers(),
            hi: self.cpu.hi(),
            lo: self.cpu.lo(),
        }
    }
}

fn snapshot_decode_error(path: &str, err: CodecError) -> ConfigError {
    let key = match err {
        CodecError::MissingField(key) => key,
        CodecError::InvalidUtf8(_) => "utf8",
    };
    ConfigError::SnapshotMissingKey { path: path.to_string(), key }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::REGISTER_COUNT;
    use std::io::Write;
    use std::net::TcpListener;

    fn config_with_program(program: &str, quantum: usize, vm_id: u32) -> (Config, tempfile::NamedTempFile) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{program}").unwrap();
        let path = f.path().to_str().unwrap().to_string();
        (Config { quantum, binary_path: path, vm_id }, f)
    }

    #[test]
    fn cursor_bounds_stay_within_instruction_count() {
        let (config, _guard) = config_with_program("li $1,5\nli $2,7\n", 10, 1);
        let mut vm = Vm::fresh(config).unwrap();
        assert_eq!(vm.cursor(), 0);
        vm.run(10);
        assert_eq!(vm.cursor(), 2);
        assert!(vm.is_done());
    }

    #[test]
    fn quantum_limits_instructions_per_run_call() {
        let (config, _guard) = config_with_program("li $1,1\nli $1,2\nli $1,3\n", 1, 1);
        let mut vm = Vm::fresh(config).unwrap();
        assert!(vm.run(1));
        assert_eq!(vm.cursor(), 1);
        assert!(vm.run(1));
        assert_eq!(vm.cursor(), 2);
        assert!(!vm.run(1));
        assert_eq!(vm.cursor(), 3);
    }

    #[test]
    fn e6_snapshot_then_restore_resumes_after_it() {
        let dir = tempfile::tempdir().unwrap();
        let asm_path = dir.path().join("prog.asm");
        let snap_path = dir.path().join("vm1.snap");
        fs::write(&asm_path, format!("li $1,9\nSNAPSHOT {}\nli $1,1\n", snap_path.display())).unwrap();

        let config = Config {
            quantum: 10,
            binary_path: asm_path.to_str().unwrap().to_string(),
            vm_id: 1,
        };
        let mut vm = Vm::fresh(config.clone()).unwrap();
        vm.run(2); // li $1,9 ; SNAPSHOT ...
        assert_eq!(vm.cursor(), 2);

        let restored_config = Config {
            quantum: 10,
            binary_path: asm_path.to_str().unwrap().to_string(),
            vm_id: 1,
        };
        let mut restored = Vm::from_snapshot(restored_config, snap_path.to_str().unwrap()).unwrap();
        assert_eq!(restored.cursor(), 2);
        restored.run(10);
        assert!(restored.is_done());
    }

    #[test]
    fn snapshot_restore_from_different_binary_restarts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let asm_path = dir.path().join("a.asm");
        let other_path = dir.path().join("b.asm");
        let snap_path = dir.path().join("a.snap");
        fs::write(&asm_path, format!("li $1,9\nSNAPSHOT {}\n", snap_path.display())).unwrap();
        fs::write(&other_path, "li $1,1\nli $2,2\n").unwrap();

        let config = Config { quantum: 10, binary_path: asm_path.to_str().unwrap().to_string(), vm_id: 1 };
        let mut vm = Vm::fresh(config).unwrap();
        vm.run(2);

        let other_config = Config { quantum: 10, binary_path: other_path.to_str().unwrap().to_string(), vm_id: 1 };
        let restored = Vm::from_snapshot(other_config, snap_path.to_str().unwrap()).unwrap();
        assert_eq!(restored.cursor(), 0);
    }

    #[test]
    fn migrate_over_loopback_reconstructs_equivalent_vm() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let (config, _guard) = config_with_program(&format!("li $1,9\nMIGRATE {addr}\n"), 10, 3);
        let mut vm = Vm::fresh(config).unwrap();

        let acceptor = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let body = wire::recv_frame(&mut stream).unwrap();
            String::from_utf8(body).unwrap()
        });

        assert!(!vm.run(10)); // MIGRATE fires, VM should not be rescheduled.
        assert!(vm.migrated());

        let text = acceptor.join().unwrap();
        let decoded = crate::codec::decode_vm(&text).unwrap();
        let received = Vm::from_migration(decoded);

        assert_eq!(received.vm_id(), 3);
        assert_eq!(received.cursor(), vm.cursor());
        assert_eq!(*received.cpu.registers(), *vm.cpu.registers());
    }

    #[test]
    fn zeroed_cpu_has_all_registers_clear() {
        let cpu = Cpu::new(1);
        assert_eq!(*cpu.registers(), [0i32; REGISTER_COUNT]);
    }
}
