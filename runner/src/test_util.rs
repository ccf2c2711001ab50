use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

// Executing a script while another thread still holds it open for writing fails with ETXTBSY,
// so tests that write and spawn scripts take turns.
static SPAWN_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn serial() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock()
}

/// write an executable `/bin/sh` script
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);

    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    path
}

/// create a fresh working directory below `root`
pub fn workdir(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    fs::create_dir_all(&path).unwrap();

    path
}
