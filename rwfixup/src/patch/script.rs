/*
 * SPDX-FileCopyrightText: 2026 rwfixup contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, RegionConfig, SubstituteConfig},
    host::{self, Host},
    patch::{
        region::{self, RegionCommenter, RegionSummary},
        substitute,
    },
    util,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Target script not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Line count changed from {expected} to {actual}: {path:?}")]
    LineCountMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("Failed to set security label: {0:?}")]
    Label(PathBuf, #[source] host::Error),
    #[error("File I/O error: {0:?}")]
    File(PathBuf, #[source] io::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backup {
    /// The original contents were saved by this run.
    Created,
    /// A backup from an earlier run was left alone.
    Existing,
    /// The script did not change, so nothing was backed up.
    NotNeeded,
}

#[derive(Clone, Debug)]
pub struct PatchReport {
    pub region: RegionSummary,
    pub substitutions: usize,
    pub lines: usize,
    pub changed: bool,
    pub backup: Backup,
    pub backup_path: PathBuf,
}

pub struct Transformed {
    pub data: Vec<u8>,
    pub region: RegionSummary,
    pub substitutions: usize,
}

/// Apply the region comment-out pass followed by the path substitution. This
/// is a pure function of its inputs.
pub fn transform(data: &[u8], region: &RegionConfig, substitute: &SubstituteConfig) -> Transformed {
    let commenter = RegionCommenter::new(
        region.start.as_bytes(),
        region.end.as_bytes(),
        region.prefix.as_bytes(),
    );
    let (commented, summary) = commenter.comment_document(data);

    let (replaced, substitutions) = substitute::replace_all(
        &commented,
        substitute.from.as_bytes(),
        substitute.to.as_bytes(),
    );
    let data = replaced.into_owned();

    Transformed {
        data,
        region: summary,
        substitutions,
    }
}

pub fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path);
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::{fs::Permissions, os::unix::fs::PermissionsExt};

    file.set_permissions(Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Save `data` to `backup`, unless the file already exists. The backup gets
/// the same permissions as `original`. The data goes to a temporary file that
/// is only moved to `backup` once it is complete.
fn create_backup(original: &Path, backup: &Path, data: &[u8]) -> Result<Backup> {
    if backup.try_exists().map_err(|e| Error::File(backup.to_owned(), e))? {
        warn!("Keeping existing backup: {backup:?}");
        return Ok(Backup::Existing);
    }

    let parent = util::parent_path(backup);
    let mut temp =
        NamedTempFile::new_in(parent).map_err(|e| Error::File(parent.to_owned(), e))?;
    let temp_path = temp.path().to_owned();

    temp.write_all(data)
        .map_err(|e| Error::File(temp_path.clone(), e))?;

    let permissions = fs::metadata(original)
        .map_err(|e| Error::File(original.to_owned(), e))?
        .permissions();

    temp.as_file()
        .set_permissions(permissions)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| Error::File(temp_path.clone(), e))?;

    match temp.persist_noclobber(backup) {
        Ok(_) => {}
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            warn!("Keeping existing backup: {backup:?}");
            return Ok(Backup::Existing);
        }
        Err(e) => return Err(Error::File(backup.to_owned(), e.error)),
    }

    info!("Saved original script to: {backup:?}");

    Ok(Backup::Created)
}

/// Atomically replace `path` with `data`. The temporary file is created in the
/// target's directory and is removed if anything fails before the rename.
fn replace_file(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let parent = util::parent_path(path);
    let mut temp =
        NamedTempFile::new_in(parent).map_err(|e| Error::File(parent.to_owned(), e))?;
    let temp_path = temp.path().to_owned();

    temp.write_all(data)
        .and_then(|_| set_mode(temp.as_file(), mode))
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| Error::File(temp_path.clone(), e))?;

    temp.persist(path).map_err(|e| Error::File(path.to_owned(), e.error))?;

    debug!("Renamed {temp_path:?} -> {path:?}");

    Ok(())
}

/// Patch the script at `path` in place. Nothing on disk is modified unless the
/// new contents have the same number of lines as the old contents.
pub fn patch_script(
    path: &Path,
    config: &Config,
    host: &dyn Host,
    cancel_signal: &AtomicBool,
) -> Result<PatchReport> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_owned()));
        }
        Err(e) => return Err(Error::File(path.to_owned(), e)),
    };

    let transformed = transform(&data, &config.region, &config.substitute);

    let expected = region::line_count(&data);
    let actual = region::line_count(&transformed.data);
    if expected != actual {
        return Err(Error::LineCountMismatch {
            path: path.to_owned(),
            expected,
            actual,
        });
    }

    util::check_cancel(cancel_signal)?;

    let changed = transformed.data != data;
    let backup_path = backup_path(path, &config.target.backup_suffix);

    let backup = if changed {
        let backup = create_backup(path, &backup_path, &data)?;

        util::check_cancel(cancel_signal)?;

        replace_file(path, &transformed.data, config.target.mode)?;
        backup
    } else {
        info!("Script is already patched: {path:?}");

        let file = File::open(path).map_err(|e| Error::File(path.to_owned(), e))?;
        set_mode(&file, config.target.mode).map_err(|e| Error::File(path.to_owned(), e))?;
        Backup::NotNeeded
    };

    host::set_label(host, &config.tools, path, &config.target.label)
        .map_err(|e| Error::Label(path.to_owned(), e))?;

    Ok(PatchReport {
        region: transformed.region,
        substitutions: transformed.substitutions,
        lines: expected,
        changed,
        backup,
        backup_path,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
        sync::atomic::{AtomicBool, Ordering},
    };

    use assert_matches::assert_matches;
    use tempfile::TempDir;

    use super::*;
    use crate::host::tests::RecordingHost;

    const SCRIPT: &str = "\
#!/system/bin/sh
set -o pipefail
if mount -o remount,rw /system; then
    resize2fs $(grep ' /system ' /proc/mounts | cut -d ' ' -f 1) || true
else
    mount -o remount,rw /
fi
mount -o remount,ro / || true
exec /system/system_ext/apex/com.android.runtime/bin/linker64
";

    const PATCHED: &str = "\
#!/system/bin/sh
set -o pipefail
# if mount -o remount,rw /system; then
#     resize2fs $(grep ' /system ' /proc/mounts | cut -d ' ' -f 1) || true
# else
#     mount -o remount,rw /
# fi
# mount -o remount,ro / || true
exec /apex/com.android.runtime/bin/linker64
";

    fn setup(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rw-system.sh");
        fs::write(&path, contents).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        (dir, path)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn transform_script() {
        let config = Config::default();
        let transformed = transform(SCRIPT.as_bytes(), &config.region, &config.substitute);

        assert_eq!(std::str::from_utf8(&transformed.data).unwrap(), PATCHED);
        assert_eq!(transformed.region.commented, 6);
        assert!(transformed.region.closed);
        assert_eq!(transformed.substitutions, 1);
    }

    #[test]
    fn patch_and_backup() {
        let (dir, path) = setup(SCRIPT);
        let config = Config::default();
        let host = RecordingHost::default();
        let cancel_signal = AtomicBool::new(false);

        let report = patch_script(&path, &config, &host, &cancel_signal).unwrap();

        assert!(report.changed);
        assert_eq!(report.backup, Backup::Created);
        assert_eq!(report.lines, 9);
        assert_eq!(fs::read_to_string(&path).unwrap(), PATCHED);
        assert_eq!(fs::read_to_string(&report.backup_path).unwrap(), SCRIPT);
        assert_eq!(
            fs::metadata(&path).unwrap().permissions().mode() & 0o7777,
            0o755,
        );
        assert_eq!(
            fs::metadata(&report.backup_path).unwrap().permissions().mode() & 0o7777,
            0o600,
        );
        assert_eq!(dir_entries(dir.path()), ["rw-system.sh", "rw-system.sh.orig"]);
        assert_eq!(
            host.commands(),
            [vec![
                "chcon".to_owned(),
                config.target.label.clone(),
                path.to_string_lossy().into_owned(),
            ]],
        );
    }

    #[test]
    fn rerun_is_no_op() {
        let (_dir, path) = setup(SCRIPT);
        let config = Config::default();
        let host = RecordingHost::default();
        let cancel_signal = AtomicBool::new(false);

        patch_script(&path, &config, &host, &cancel_signal).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let report = patch_script(&path, &config, &host, &cancel_signal).unwrap();

        assert!(!report.changed);
        assert_eq!(report.backup, Backup::NotNeeded);
        assert_eq!(report.region.commented, 0);
        assert_eq!(report.region.already_commented, 6);
        assert_eq!(fs::read_to_string(&path).unwrap(), PATCHED);
        assert_eq!(fs::read_to_string(&report.backup_path).unwrap(), SCRIPT);
        assert_eq!(
            fs::metadata(&path).unwrap().permissions().mode() & 0o7777,
            0o755,
        );
        assert_eq!(host.commands().len(), 2);
    }

    #[test]
    fn existing_backup_is_kept() {
        let (_dir, path) = setup(SCRIPT);
        let config = Config::default();
        let backup = backup_path(&path, &config.target.backup_suffix);
        fs::write(&backup, "factory\n").unwrap();

        let report = patch_script(
            &path,
            &config,
            &RecordingHost::default(),
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(report.backup, Backup::Existing);
        assert_eq!(fs::read_to_string(&backup).unwrap(), "factory\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), PATCHED);
    }

    #[test]
    fn failed_backup_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("rw-system.sh");
        let backup = backup_path(&original, ".orig");

        // Reading the original's permissions fails after the data is written.
        assert_matches!(
            create_backup(&original, &backup, SCRIPT.as_bytes()),
            Err(Error::File(p, e)) if p == original && e.kind() == io::ErrorKind::NotFound
        );
        assert!(dir_entries(dir.path()).is_empty());

        // A later attempt still writes a complete backup.
        fs::write(&original, SCRIPT).unwrap();
        assert_eq!(
            create_backup(&original, &backup, SCRIPT.as_bytes()).unwrap(),
            Backup::Created,
        );
        assert_eq!(fs::read_to_string(&backup).unwrap(), SCRIPT);
        assert_eq!(dir_entries(dir.path()), ["rw-system.sh", "rw-system.sh.orig"]);
    }

    #[test]
    fn line_count_mismatch_touches_nothing() {
        let (dir, path) = setup(SCRIPT);
        let mut config = Config::default();
        config.substitute.to = "/apex/\n".to_owned();
        let host = RecordingHost::default();

        assert_matches!(
            patch_script(&path, &config, &host, &AtomicBool::new(false)),
            Err(Error::LineCountMismatch { expected: 9, actual: 10, .. })
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), SCRIPT);
        assert_eq!(
            fs::metadata(&path).unwrap().permissions().mode() & 0o7777,
            0o600,
        );
        assert_eq!(dir_entries(dir.path()), ["rw-system.sh"]);
        assert!(host.commands().is_empty());
    }

    #[test]
    fn missing_script() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rw-system.sh");
        let host = RecordingHost::default();

        assert_matches!(
            patch_script(&path, &Config::default(), &host, &AtomicBool::new(false)),
            Err(Error::NotFound(p)) if p == path
        );
        assert!(host.commands().is_empty());
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn cancelled_before_write() {
        let (dir, path) = setup(SCRIPT);
        let cancel_signal = AtomicBool::new(false);
        cancel_signal.store(true, Ordering::SeqCst);

        assert_matches!(
            patch_script(&path, &Config::default(), &RecordingHost::default(), &cancel_signal),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::Interrupted
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), SCRIPT);
        assert_eq!(dir_entries(dir.path()), ["rw-system.sh"]);
    }

    #[test]
    fn label_failure() {
        let (_dir, path) = setup(SCRIPT);
        let config = Config::default();
        let host = RecordingHost {
            failing: vec![config.tools.chcon.clone()],
            ..Default::default()
        };

        assert_matches!(
            patch_script(&path, &config, &host, &AtomicBool::new(false)),
            Err(Error::Label(_, host::Error::CommandFailed(_, _)))
        );
    }

    #[test]
    fn crlf_and_missing_final_newline() {
        let (_dir, path) =
            setup("a\r\nif mount -o remount,rw /system; then\r\nmount -o remount,ro / || true");
        let config = Config::default();

        let report = patch_script(
            &path,
            &config,
            &RecordingHost::default(),
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(report.lines, 3);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "a\r\n# if mount -o remount,rw /system; then\r\n# mount -o remount,ro / || true",
        );
    }
}
