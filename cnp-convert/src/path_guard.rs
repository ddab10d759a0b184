use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Refuse to write the generated policy over the rule file it came from.
pub fn ensure_output_not_input(output: &Path, input: &Path) -> Result<()> {
    let out = comparable(output)
        .with_context(|| format!("failed to resolve output path {}", output.display()))?;
    let src = comparable(input)
        .with_context(|| format!("failed to resolve input path {}", input.display()))?;
    if out == src {
        bail!(
            "refusing to overwrite rule file: output {} is the input {}",
            output.display(),
            input.display()
        );
    }
    Ok(())
}

fn comparable(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return path
            .canonicalize()
            .with_context(|| format!("canonicalize {}", path.display()));
    }
    // Not on disk yet: resolve the parent if it exists, then `.`/`..` lexically.
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().context("current_dir")?.join(path)
    };
    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
        if let Ok(parent) = parent.canonicalize() {
            return Ok(parent.join(name));
        }
    }
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::ensure_output_not_input;

    #[test]
    fn same_file_through_dot_dot_is_refused() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        let input = dir.path().join("rules.json");
        fs::write(&input, "[]").expect("write");
        let sneaky = dir.path().join("sub").join("..").join("rules.json");
        assert!(ensure_output_not_input(&sneaky, &input).is_err());
    }

    #[test]
    fn new_output_is_allowed() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("rules.json");
        fs::write(&input, "[]").expect("write");
        assert!(ensure_output_not_input(&dir.path().join("policy.yaml"), &input).is_ok());
    }
}
