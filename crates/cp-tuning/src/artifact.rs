//! Writing confusion matrices as `.npy` and `.txt` artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use cp_types::{ConfigError, ConfusionMatrix, CpResult, EvaluationRun};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// Paths of the two files written for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub npy: PathBuf,
    pub txt: PathBuf,
}

/// Filesystem sink for evaluation artifacts.
///
/// Files are overwritten if they exist. The output directory must exist
/// already; it is never created.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactStore;

impl ArtifactStore {
    pub fn new() -> Self {
        Self
    }

    /// Write the binary array, then its text rendering.
    pub fn persist(
        &self,
        run: &EvaluationRun,
        family_tag: &str,
        matrix: &ConfusionMatrix,
    ) -> CpResult<ArtifactPaths> {
        check_writable(&run.output_dir)?;

        let paths = ArtifactPaths {
            npy: run.artifact_path(family_tag, "npy"),
            txt: run.artifact_path(family_tag, "txt"),
        };
        write(&paths.npy, &encode_npy(matrix))?;
        write(&paths.txt, matrix.to_numpy_text().as_bytes())?;
        debug!("wrote {} and {}", paths.npy.display(), paths.txt.display());
        Ok(paths)
    }
}

fn unwritable(path: &Path, source: io::Error) -> cp_types::CpError {
    ConfigError::UnwritableOutput {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

fn check_writable(dir: &Path) -> CpResult<()> {
    let meta = fs::metadata(dir).map_err(|e| unwritable(dir, e))?;
    if !meta.is_dir() {
        return Err(unwritable(
            dir,
            io::Error::new(io::ErrorKind::Other, "not a directory"),
        ));
    }
    if meta.permissions().readonly() {
        return Err(unwritable(
            dir,
            io::Error::new(io::ErrorKind::PermissionDenied, "directory is read-only"),
        ));
    }
    Ok(())
}

fn write(path: &Path, bytes: &[u8]) -> CpResult<()> {
    fs::write(path, bytes).map_err(|e| unwritable(path, e))
}

/// NumPy format 1.0: little-endian `i64`, C order.
pub fn encode_npy(matrix: &ConfusionMatrix) -> Vec<u8> {
    let n = matrix.size();
    let mut header = format!("{{'descr': '<i8', 'fortran_order': False, 'shape': ({n}, {n}), }}");
    // magic + version + u16 length + header + '\n' is padded to the alignment.
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(NPY_MAGIC.len() + 4 + header.len() + n * n * 8);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in matrix.as_slice() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> ConfusionMatrix {
        ConfusionMatrix::from_predictions(&[0, 0, 1, 2, 2], &[0, 1, 1, 2, 0]).unwrap()
    }

    #[test]
    fn npy_header_is_aligned_and_parsable() {
        let bytes = encode_npy(&matrix());
        assert_eq!(&bytes[..6], NPY_MAGIC);
        assert_eq!(&bytes[6..8], &[1, 0]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);

        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.starts_with("{'descr': '<i8', 'fortran_order': False, 'shape': (3, 3), }"));
        assert!(header.ends_with('\n'));
        assert_eq!(bytes.len(), 10 + header_len + 9 * 8);
    }

    #[test]
    fn npy_payload_is_row_major_little_endian() {
        let bytes = encode_npy(&matrix());
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let values: Vec<i64> = bytes[10 + header_len..]
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1, 1, 0, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn persist_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("dep", "acc", "3", dir.path());
        let paths = ArtifactStore::new().persist(&run, "knn", &matrix()).unwrap();
        assert_eq!(paths.npy, dir.path().join("dep_acc_3_knn.npy"));
        assert_eq!(
            fs::read_to_string(&paths.txt).unwrap(),
            "[[1, 1, 0],\n [0, 1, 0],\n [1, 0, 1]]"
        );
        assert!(paths.npy.exists());
    }

    #[test]
    fn missing_directory_is_config_error_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let run = EvaluationRun::new("dep", "acc", "3", &missing);
        let err = ArtifactStore::new().persist(&run, "nb", &matrix()).unwrap_err();
        assert!(err.is_config());
        assert!(!missing.exists());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn persist_logs_both_paths_in_the_message() {
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new("dep", "acc", "3", dir.path());
        let sink = Captured::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let paths = tracing::subscriber::with_default(subscriber, || {
            ArtifactStore::new().persist(&run, "lr", &matrix()).unwrap()
        });

        let logged = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let expected = format!("wrote {} and {}", paths.npy.display(), paths.txt.display());
        assert!(logged.contains(&expected), "{logged}");
        assert!(!logged.contains("npy="), "{logged}");
    }
}
