//! Artifact helpers
//!
//! Outputs are written to `<name>.partial` and renamed into place once
//! complete, so a killed pass never leaves a truncated file under its final
//! name. Leftover partials are swept at the start of the next pass.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::constants::PARTIAL_EXT;

/// `<path>.partial`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_EXT);
    PathBuf::from(name)
}

/// Move a finished partial file onto its final name
pub fn commit(partial: &Path, dest: &Path) -> io::Result<()> {
    fs::rename(partial, dest)
}

/// Write bytes atomically (partial + rename)
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let partial = partial_path(dest);
    {
        let mut file = File::create(&partial)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    commit(&partial, dest)
}

/// Remove `*.partial` leftovers from an interrupted pass. Returns removed count.
pub fn sweep_partials(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == PARTIAL_EXT) {
            log::warn!("Removing interrupted artifact {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// SHA-256 of a file's contents, hex encoded
pub fn fingerprint(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Files in `dir` with the given extension, sorted by name
pub fn list_files(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|r| r.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |e| e == ext))
        .collect();

    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_leaves_no_partial() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("table.csv");

        write_atomic(&dest, b"a,b\n1,2\n").unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "a,b\n1,2\n");
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_sweep_partials() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x.csv.partial"), "trunc").unwrap();
        fs::write(dir.path().join("y.csv"), "ok").unwrap();

        assert_eq!(sweep_partials(dir.path()).unwrap(), 1);
        assert!(dir.path().join("y.csv").exists());
        assert_eq!(sweep_partials(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "one").unwrap();
        let a = fingerprint(&path).unwrap();
        fs::write(&path, "two").unwrap();
        let b = fingerprint(&path).unwrap();

        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
