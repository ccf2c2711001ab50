use itertools::Itertools;
use rayon::prelude::*;
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, instrument, trace};

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Number of folders must be at least 1")]
    InvalidCount,
    #[error("Folder {0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error("Failed to create folder {path:?}: {source}")]
    CreateFolder { path: PathBuf, source: io::Error },
    #[error("Failed to copy {from:?} to {to:?}: {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Creates numbered calculation folders populated with copies of the same input files
///
/// `Stager::new("input", "runs/si", ["INCAR", "POSCAR"])` stages `runs/si_0`, `runs/si_1`, ...
/// each holding a copy of `input/INCAR` and `input/POSCAR`.
#[derive(Debug, Clone)]
pub struct Stager {
    source: PathBuf,
    prefix: PathBuf,
    files: Vec<String>,
}

impl Stager {
    pub fn new<I, S>(source: impl Into<PathBuf>, prefix: impl Into<PathBuf>, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: source.into(),
            prefix: prefix.into(),
            files: files.into_iter().map(Into::into).collect(),
        }
    }

    /// path of the folder with the given index
    pub fn folder(&self, index: usize) -> PathBuf {
        let mut name = self
            .prefix
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(OsString::new);
        name.push(format!("_{index}"));

        self.prefix.with_file_name(name)
    }

    /// Stage `count` folders in parallel and return them in index order
    #[instrument(skip(self), level = "debug")]
    pub fn create_folders(&self, count: usize) -> Result<Vec<PathBuf>, StagingError> {
        if count == 0 {
            return Err(StagingError::InvalidCount);
        }

        let folders = (0..count).map(|index| self.folder(index)).collect_vec();
        folders
            .par_iter()
            .try_for_each(|folder| self.stage(folder))?;

        debug!("{count} folders created and files copied");

        Ok(folders)
    }

    fn stage(&self, folder: &Path) -> Result<(), StagingError> {
        if let Some(parent) = folder.parent() {
            fs::create_dir_all(parent).map_err(|source| StagingError::CreateFolder {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::create_dir(folder).map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => StagingError::AlreadyExists(folder.to_path_buf()),
            _ => StagingError::CreateFolder {
                path: folder.to_path_buf(),
                source,
            },
        })?;

        for file in self.files.iter() {
            let from = self.source.join(file);
            let to = folder.join(file);

            fs::copy(&from, &to).map_err(|source| StagingError::CopyFile {
                from: from.clone(),
                to: to.clone(),
                source,
            })?;
            trace!("{file} copied to {}", folder.to_string_lossy());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn input(root: &Path) -> PathBuf {
        let source = root.join("input");
        fs::create_dir(&source).unwrap();
        for name in ["INCAR", "POSCAR", "POTCAR", "KPOINTS"] {
            fs::write(source.join(name), format!("{name} contents\n")).unwrap();
        }

        source
    }

    #[test]
    fn stages_numbered_folders() {
        let root = tempdir().unwrap();
        let stager = Stager::new(
            input(root.path()),
            root.path().join("runs/my_folder"),
            ["INCAR", "POSCAR", "POTCAR", "KPOINTS"],
        );

        let folders = stager.create_folders(3).unwrap();

        assert_eq!(
            folders,
            (0..3)
                .map(|index| root.path().join(format!("runs/my_folder_{index}")))
                .collect_vec()
        );
        for folder in folders {
            assert_eq!(
                fs::read_to_string(folder.join("POTCAR")).unwrap(),
                "POTCAR contents\n"
            );
        }
    }

    #[test]
    fn zero_folders_is_rejected() {
        let stager = Stager::new("input", "my_folder", ["INCAR"]);

        assert!(matches!(
            stager.create_folders(0),
            Err(StagingError::InvalidCount)
        ));
    }

    #[test]
    fn existing_folder_is_not_overwritten() {
        let root = tempdir().unwrap();
        let stager = Stager::new(input(root.path()), root.path().join("calc"), ["INCAR"]);
        fs::create_dir(root.path().join("calc_1")).unwrap();

        match stager.create_folders(2) {
            Err(StagingError::AlreadyExists(path)) => assert_eq!(path, root.path().join("calc_1")),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
        assert!(!root.path().join("calc_1/INCAR").exists());
    }

    #[test]
    fn missing_input_file_is_reported() {
        let root = tempdir().unwrap();
        let stager = Stager::new(input(root.path()), root.path().join("calc"), ["WAVECAR"]);

        assert!(matches!(
            stager.create_folders(1),
            Err(StagingError::CopyFile { .. })
        ));
    }
}
