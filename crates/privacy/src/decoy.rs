//! Cover traffic and decoy files.

use rand::RngCore;
use std::io;
use std::path::Path;

pub const COVER_TRAFFIC_LEN: usize = 256;

/// A block of random bytes suitable for a cover-traffic frame. Receivers drop
/// frames that are not `MSG`, so this costs nothing but bandwidth.
pub fn cover_traffic() -> Vec<u8> {
    let mut buf = vec![0u8; COVER_TRAFFIC_LEN];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Write a handful of innocuous-looking files under `path`. Informational
/// only; the contents are fixed and carry no state.
pub fn create_decoy(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)?;
    std::fs::write(
        path.join("shopping-list.txt"),
        "milk\neggs\nbread\ncoffee\napples\n",
    )?;
    std::fs::write(
        path.join("notes.txt"),
        "Call the dentist on Tuesday.\nPick up the dry cleaning.\n",
    )?;
    std::fs::write(
        path.join("recipes.txt"),
        "Pancakes: flour, milk, two eggs, pinch of salt. Rest the batter.\n",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cover_traffic_len() {
        assert_eq!(cover_traffic().len(), COVER_TRAFFIC_LEN);
    }

    #[test]
    fn test_decoys_written() {
        let dir = TempDir::new().unwrap();
        create_decoy(dir.path()).unwrap();
        assert!(dir.path().join("shopping-list.txt").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("recipes.txt").exists());
    }
}
