use std::path::Path;

use nix::mount::{mount, MsFlags};

use crate::core::error::ChainError;
use crate::util::fs::create_dir_with_mode;

/// Mode of a freshly created proc mount point.
const MOUNT_POINT_MODE: u32 = 0o555;

/// Create `target` and mount the proc filesystem of the caller's PID
/// namespace on it, with no extra flags.
///
/// There is no private mount namespace, so the mount shows up in the host's
/// mount table. The kernel keeps it until someone unmounts it.
pub fn mount_proc_at(target: &Path) -> Result<(), ChainError> {
    create_dir_with_mode(target, MOUNT_POINT_MODE).map_err(|source| ChainError::MountDir {
        path: target.to_path_buf(),
        source,
    })?;

    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|source| ChainError::Mount {
        path: target.to_path_buf(),
        source,
    })?;
    Ok(())
}
