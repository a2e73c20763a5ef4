use std::fs;
use std::io::Write;

use camino::Utf8Path;

use crate::error::TrackerError;

/// Writes `content` to a temporary file beside `dest`, then renames it into place.
pub fn write_atomic(dest: &Utf8Path, content: &[u8]) -> Result<(), TrackerError> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| TrackerError::Filesystem(format!("create {parent}: {err}")))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".pcawg-tracker")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| TrackerError::Filesystem(format!("write {dest}: {err}")))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| TrackerError::Filesystem(format!("persist {dest}: {}", err.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("out/chart.svg")).unwrap();
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
