//! Download packaging for the per-experiment action-unit captures.

use std::path::Path;

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;

/// Bundle `action_units/<experiment>` into a gzipped tarball. Returns None
/// when no captures exist for the experiment.
pub fn pack_action_units(data_dir: &Path, experiment_id: &str) -> Result<Option<Vec<u8>>> {
    let source = data_dir.join("action_units").join(experiment_id);
    if !source.is_dir() {
        return Ok(None);
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(experiment_id, &source)
        .context("pack action units directory")?;
    let bytes = builder
        .into_inner()
        .context("finish tar stream")?
        .finish()
        .context("finish gzip stream")?;
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::pack_action_units;
    use flate2::read::GzDecoder;

    #[test]
    fn missing_directory_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("action_units")).unwrap();
        assert!(pack_action_units(dir.path(), "exp-1").unwrap().is_none());
    }

    #[test]
    fn archive_contains_capture_files() {
        let dir = tempfile::tempdir().unwrap();
        let captures = dir.path().join("action_units").join("exp-1");
        std::fs::create_dir_all(&captures).unwrap();
        std::fs::write(captures.join("frame1.csv"), "au1,au2\n0.1,0.2\n").unwrap();

        let bytes = pack_action_units(dir.path(), "exp-1").unwrap().unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(&bytes[..]));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("frame1.csv")));
    }
}
