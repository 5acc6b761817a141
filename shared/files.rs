use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix of genotype store files.
pub const STORE_SUFFIX: &str = "gbk";
/// Suffix of binary result files.
pub const OUTPUT_SUFFIX: &str = "gbo";

/// The base name and extension of a file a writer is about to create.
///
/// A path that already carries the suffix (in any case) is split into base and suffix;
/// otherwise the suffix is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    pub base_path: PathBuf,
    pub base_name: String,
    pub suffix: String,
}

impl OutputNames {
    pub fn resolve(path: &Path, suffix: &str) -> Self {
        let has_suffix = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(suffix));
        let base_path = if has_suffix {
            path.with_extension("")
        } else {
            path.to_path_buf()
        };
        let base_name = base_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            base_path,
            base_name,
            suffix: suffix.to_string(),
        }
    }

    pub fn target(&self) -> PathBuf {
        let mut name = self.base_path.clone().into_os_string();
        name.push(".");
        name.push(&self.suffix);
        PathBuf::from(name)
    }

    /// Creates (truncating) the target file.
    pub fn create(&self) -> io::Result<File> {
        let target = self.target();
        File::create(&target).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("cannot create '{}': {e}", target.display()),
            )
        })
    }
}
