//! Owns the set of VMs, drives the round-robin scheduler, and (in
//! receiver mode) listens for an incoming migration.
//!
//! There is no coroutine machinery here because none is needed: a "context
//! switch" is just a return from one `Vm::run` back to this loop. The
//! scheduler is a plain outer loop, kept that way deliberately.

use std::net::{SocketAddr, TcpListener};

use socket2::{Domain, Socket, Type};

use crate::codec::decode_vm;
use crate::config::Config;
use crate::error::{ConfigError, WireError};
use crate::vm::Vm;
use crate::wire;

/// Owns an ordered list of VMs and, receiver-side, one passive TCP
/// listener's worth of setup logic.
pub struct Hypervisor {
    vms: Vec<Vm>,
}

impl Default for Hypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypervisor {
    pub fn new() -> Self {
        Hypervisor { vms: Vec::new() }
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    /// Load a fresh VM from its config file and add it to the rotation.
    pub fn create_vm(&mut self, config: Config) -> Result<(), ConfigError> {
        let vm = Vm::fresh(config)?;
        tracing::info!(vm_id = vm.vm_id(), "VM created");
        self.vms.push(vm);
        Ok(())
    }

    /// Load a VM restored from a snapshot file and add it to the rotation.
    pub fn create_vm_from_snapshot(&mut self, config: Config, snapshot_path: &str) -> Result<(), ConfigError> {
        let vm = Vm::from_snapshot(config, snapshot_path)?;
        tracing::info!(vm_id = vm.vm_id(), snapshot_path, "VM restored from snapshot");
        self.vms.push(vm);
        Ok(())
    }

    /// The cooperative round-robin driver: repeat until every VM is
    /// done, running each in insertion order for its own quantum.
    pub fn run(&mut self) {
        loop {
            let mut any_running = false;

            for vm in self.vms.iter_mut() {
                if vm.is_done() {
                    continue;
                }
                let quantum = vm.quantum();
                if vm.run(quantum) {
                    any_running = true;
                    tracing::info!(vm_id = vm.vm_id(), "VM {} running", vm.vm_id());
                }
            }

            if !any_running {
                break;
            }
        }
    }

    /// Receiver-mode alternative to driving VMs directly: accept exactly
    /// one migration connection, decode it into a new VM, then fall into
    /// the standard scheduling loop. Any I/O error aborts the accept and
    /// is returned to the caller, logged.
    pub fn listen_migration(&mut self, port: u16) -> Result<(), WireError> {
        let listener = bind_reuseaddr(port)?;
        tracing::info!(port, "listening for migration");

        let (mut stream, peer) = listener.accept().map_err(WireError::Accept)?;
        tracing::info!(%peer, "accepted migration connection");

        let body = wire::recv_frame(&mut stream)?;
        let text = std::str::from_utf8(&body).map_err(crate::error::CodecError::InvalidUtf8)?;
        let encoded = decode_vm(text)?;

        let vm = Vm::from_migration(encoded);
        tracing::info!(vm_id = vm.vm_id(), %peer, "VM received via migration");
        self.vms.push(vm);

        self.run();
        Ok(())
    }
}

/// Bind a passive TCP listener with `SO_REUSEADDR` set, so a hypervisor
/// that just crashed out of a prior listen can rebind the same port
/// immediately instead of waiting out `TIME_WAIT`.
fn bind_reuseaddr(port: u16) -> Result<TcpListener, WireError> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let to_bind_err = |source: std::io::Error| WireError::Bind { port, source };

    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(to_bind_err)?;
    socket.set_reuse_address(true).map_err(to_bind_err)?;
    socket.bind(&addr.into()).map_err(to_bind_err)?;
    socket.listen(1).map_err(to_bind_err)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with_program(program: &str, quantum: usize, vm_id: u32) -> (Config, tempfile::NamedTempFile) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{program}").unwrap();
        let path = f.path().to_str().unwrap().to_string();
        (Config { quantum, binary_path: path, vm_id }, f)
    }

    #[test]
    fn e5_strict_round_robin_two_vms() {
        // Two VMs, quantum 2 each, programs of length 3 and 5: insertion
        // order round-robin finishes A before B starts its last slice.
        let (cfg_a, _ga) = config_with_program("li $1,1\nli $1,2\nli $1,3\n", 2, 1);
        let (cfg_b, _gb) = config_with_program(
            "li $1,1\nli $1,2\nli $1,3\nli $1,4\nli $1,5\n",
            2,
            2,
        );

        let mut hv = Hypervisor::new();
        hv.create_vm(cfg_a).unwrap();
        hv.create_vm(cfg_b).unwrap();
        hv.run();

        assert_eq!(hv.vms[0].cursor(), 3);
        assert_eq!(hv.vms[1].cursor(), 5);
        assert!(hv.vms[0].is_done());
        assert!(hv.vms[1].is_done());
    }

    #[test]
    fn quantum_of_one_interleaves_strictly() {
        let (cfg_a, _ga) = config_with_program("li $1,1\nli $1,2\n", 1, 1);
        let (cfg_b, _gb) = config_with_program("li $1,1\nli $1,2\n", 1, 2);

        let mut hv = Hypervisor::new();
        hv.create_vm(cfg_a).unwrap();
        hv.create_vm(cfg_b).unwrap();
        hv.run();

        assert_eq!(hv.vms[0].cursor(), hv.vms[1].cursor());
    }

    #[test]
    fn quantum_covering_whole_program_is_serial_execution() {
        let (cfg_a, _ga) = config_with_program("li $1,1\nli $1,2\nli $1,3\n", 100, 1);
        let mut hv = Hypervisor::new();
        hv.create_vm(cfg_a).unwrap();
        hv.run();
        assert!(hv.vms[0].is_done());
    }

    #[test]
    fn migration_end_to_end_across_two_hypervisors() {
        // Bind ephemeral, then free it so bind_reuseaddr can rebind the
        // exact same port from inside listen_migration.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut receiver = Hypervisor::new();
        let accept_thread = {
            let port = addr.port();
            std::thread::spawn(move || {
                receiver.listen_migration(port).unwrap();
                receiver
            })
        };

        // Give the receiver a moment to bind before the sender connects.
        std::thread::sleep(std::time::Duration::from_millis(50));

        let (sender_cfg, _sender_guard) =
            config_with_program(&format!("li $1,9\nMIGRATE {addr}\n"), 10, 7);
        let mut sender = Hypervisor::new();
        sender.create_vm(sender_cfg).unwrap();
        sender.run();
        assert!(sender.vms[0].migrated());

        let receiver = accept_thread.join().unwrap();
        assert_eq!(receiver.vm_count(), 1);
        assert!(receiver.vms[0].is_done());
    }
}
