//! File selection for distributable archives. Archival itself is left to the caller.

use std::path::{Component, Path, PathBuf};

/// Subtrees only useful while developing the runtime.
pub const DEVELOPER_ONLY: [&str; 8] = [
    "tools",
    "test",
    "build",
    "cmake",
    "dockerfiles",
    "examples",
    "third_party",
    "pretrained_models",
];

/// Keep the files of `files` that lie outside every developer-only subtree of `root`.
///
/// Paths outside `root` are dropped. The input order is preserved.
pub fn distributable_files(root: &Path, files: &[PathBuf]) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|path| match path.strip_prefix(root) {
            Ok(rel) => !rel.components().any(|c| match c {
                Component::Normal(name) => name
                    .to_str()
                    .is_some_and(|name| DEVELOPER_ONLY.contains(&name)),
                _ => false,
            }),
            Err(_) => false,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn developer_subtrees_are_dropped() {
        let root = Path::new("/out");
        let files: Vec<PathBuf> = [
            "/out/mnist.bin",
            "/out/mnist/lib.rs",
            "/out/tools/gen.py",
            "/out/mnist/test/fixture.bin",
            "/out/third_party/cmsis/arm.h",
            "/out/testing/keep.rs",
            "/elsewhere/model.bin",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        assert_eq!(
            distributable_files(root, &files),
            vec![
                PathBuf::from("/out/mnist.bin"),
                PathBuf::from("/out/mnist/lib.rs"),
                PathBuf::from("/out/testing/keep.rs"),
            ]
        );
    }
}
