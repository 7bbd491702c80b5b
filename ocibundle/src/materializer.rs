use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::descriptor::Blob;
use crate::error::{Error, Result};

/// Moves blob payloads between the local filesystem and memory.
#[derive(Debug, Clone)]
pub struct LocalMaterializer {
    output: PathBuf,
}

impl LocalMaterializer {
    /// Create a materializer writing into `output`.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Read one file as a blob named after its base name.
    pub fn read(path: &Path) -> Result<Blob> {
        let unreadable = |source| Error::FileUnreadable {
            path: path.to_path_buf(),
            source,
        };

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                unreadable(io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))
            })?;

        let metadata = fs::metadata(path).map_err(unreadable)?;
        if !metadata.is_file() {
            return Err(unreadable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let data = fs::read(path).map_err(unreadable)?;
        debug!("Read {} ({} bytes)", path.display(), data.len());

        Ok(Blob::new(name, Bytes::from(data)))
    }

    /// Read every file, in order, before anything is sent anywhere.
    ///
    /// Two paths with the same base name would end up under the same title,
    /// so they are rejected.
    pub fn read_all(paths: &[PathBuf]) -> Result<Vec<Blob>> {
        if paths.is_empty() {
            return Err(Error::Configuration("no files to bundle".to_string()));
        }

        let mut seen = HashSet::new();
        let mut blobs = Vec::with_capacity(paths.len());
        for path in paths {
            let blob = Self::read(path)?;
            if !seen.insert(blob.name.clone()) {
                return Err(Error::Configuration(format!(
                    "duplicate file name '{}' ({}); bundled files are stored by base name",
                    blob.name,
                    path.display()
                )));
            }
            blobs.push(blob);
        }

        Ok(blobs)
    }

    /// Fail unless the output directory exists.
    pub fn ensure_output(&self) -> Result<()> {
        let metadata = fs::metadata(&self.output).map_err(|source| Error::OutputUnwritable {
            path: self.output.clone(),
            source,
        })?;

        if !metadata.is_dir() {
            return Err(Error::OutputUnwritable {
                path: self.output.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        Ok(())
    }

    /// Write a pulled blob into the output directory.
    ///
    /// `filename` comes from the manifest, so it must be a single plain path
    /// component.
    pub fn write(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        Self::check_filename(filename)?;

        let target = self.output.join(filename);
        fs::write(&target, data).map_err(|source| Error::OutputUnwritable {
            path: target.clone(),
            source,
        })?;
        debug!("Wrote {} ({} bytes)", target.display(), data.len());

        Ok(target)
    }

    /// Check that a layer title can be used as a file name in the output
    /// directory.
    pub fn check_filename(filename: &str) -> Result<()> {
        if filename.is_empty() {
            return Err(Error::MalformedManifest("layer has no title annotation".to_string()));
        }

        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == filename => Ok(()),
            _ => Err(Error::MalformedManifest(format!(
                "layer title '{}' is not a plain file name",
                filename
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_uses_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let blob = LocalMaterializer::read(&path).unwrap();
        assert_eq!(blob.name, "a.txt");
        assert_eq!(blob.data, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalMaterializer::read(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, Error::FileUnreadable { .. }));
    }

    #[test]
    fn test_read_directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalMaterializer::read(dir.path()).unwrap_err();
        assert!(matches!(err, Error::FileUnreadable { .. }));
    }

    #[test]
    fn test_read_all_rejects_duplicate_base_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        let first = dir.path().join("a").join("x.txt");
        let second = dir.path().join("b").join("x.txt");
        fs::write(&first, "one").unwrap();
        fs::write(&second, "two").unwrap();

        let err = LocalMaterializer::read_all(&[first, second]).unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("x.txt")));
    }

    #[test]
    fn test_read_all_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = ["c.txt", "a.txt", "b.txt"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, name).unwrap();
                path
            })
            .collect();

        let names: Vec<_> = LocalMaterializer::read_all(&paths)
            .unwrap()
            .into_iter()
            .map(|blob| blob.name)
            .collect();
        assert_eq!(names, vec!["c.txt", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_ensure_output() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalMaterializer::new(dir.path()).ensure_output().is_ok());

        let missing = LocalMaterializer::new(dir.path().join("nope"));
        assert!(matches!(
            missing.ensure_output(),
            Err(Error::OutputUnwritable { .. })
        ));

        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            LocalMaterializer::new(file).ensure_output(),
            Err(Error::OutputUnwritable { .. })
        ));
    }

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = LocalMaterializer::new(dir.path());

        let path = materializer.write("b.txt", b"world!").unwrap();
        assert_eq!(path, dir.path().join("b.txt"));
        assert_eq!(fs::read(path).unwrap(), b"world!");
    }

    #[test]
    fn test_write_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = LocalMaterializer::new(dir.path().join("missing"));
        let err = materializer.write("a.txt", b"hello").unwrap_err();
        assert!(matches!(err, Error::OutputUnwritable { .. }));
    }

    #[test]
    fn test_write_rejects_unsafe_titles() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = LocalMaterializer::new(dir.path());

        for title in ["", "..", ".", "../escape.txt", "nested/file.txt", "/etc/passwd"] {
            let result = materializer.write(title, b"x");
            assert!(
                matches!(result, Err(Error::MalformedManifest(_))),
                "expected '{}' to be rejected",
                title
            );
        }
    }
}
