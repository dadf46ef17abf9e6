//! Secure wiping of buffers and on-disk state.

use rand::RngCore;
use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use zeroize::Zeroize;

const SHRED_CHUNK: usize = 8192;

/// Overwrite a byte buffer with random data, then with zeros.
pub fn wipe_bytes(buf: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(buf);
    buf.zeroize();
}

/// Overwrite a character buffer with NULs.
pub fn wipe_chars(buf: &mut [char]) {
    for c in buf.iter_mut() {
        *c = '\0';
    }
}

/// Overwrite a regular file's full length three times (zeros, ones, random),
/// then unlink it.
pub fn shred_file(path: &Path) -> io::Result<()> {
    let len = fs::metadata(path)?.len();
    let mut file = OpenOptions::new().write(true).open(path)?;

    for pattern in [Some(0x00u8), Some(0xFF), None] {
        file.seek(SeekFrom::Start(0))?;
        let mut chunk = [0u8; SHRED_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(SHRED_CHUNK as u64) as usize;
            match pattern {
                Some(b) => chunk[..n].fill(b),
                None => rand::rngs::OsRng.fill_bytes(&mut chunk[..n]),
            }
            file.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }

    drop(file);
    fs::remove_file(path)
}

/// Destroy everything under `root`, bottom-up. Regular files are shredded;
/// anything that resists shredding falls back to a plain unlink. Individual
/// failures never abort the walk.
pub fn shred_dir(root: &Path) {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("skipping unreadable directory {:?}: {}", root, e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            shred_dir(&path);
            if let Err(e) = fs::remove_dir(&path) {
                tracing::warn!("could not remove directory {:?}: {}", path, e);
            }
        } else if file_type.is_file() {
            if let Err(e) = shred_file(&path) {
                tracing::warn!("shred failed for {:?}, unlinking instead: {}", path, e);
                let _ = fs::remove_file(&path);
            }
        } else {
            let _ = fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wipe_bytes() {
        let mut buf = vec![0xAB; 64];
        wipe_bytes(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wipe_chars() {
        let mut buf: Vec<char> = "passphrase".chars().collect();
        wipe_chars(&mut buf);
        assert!(buf.iter().all(|&c| c == '\0'));
    }

    #[test]
    fn test_shred_file_removes_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.bin");
        fs::write(&path, b"very secret bytes").unwrap();

        shred_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_shred_dir_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), b"aaaa").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.dat"), b"bbbb").unwrap();

        shred_dir(dir.path());

        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(remaining.is_empty());
    }
}
