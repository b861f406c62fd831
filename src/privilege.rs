use nix::unistd::Uid;

/// The process cannot bind the pin or power the host off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeError {
    pub euid: u32,
}

impl std::fmt::Display for PrivilegeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "must run as root (effective uid is {}); try sudo or a root systemd unit",
            self.euid
        )
    }
}

impl std::error::Error for PrivilegeError {}

/// Check that `euid` may touch GPIO and call shutdown.
pub fn ensure_root(euid: Uid) -> Result<(), PrivilegeError> {
    if euid.is_root() {
        Ok(())
    } else {
        Err(PrivilegeError {
            euid: euid.as_raw(),
        })
    }
}

/// `ensure_root` for the running process.
pub fn ensure_effective_root() -> Result<(), PrivilegeError> {
    ensure_root(Uid::effective())
}
