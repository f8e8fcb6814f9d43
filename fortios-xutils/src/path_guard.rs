use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Refuse to write `output` over any of the `inputs`.
pub fn ensure_output_not_input(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let target = comparable(output)
        .with_context(|| format!("failed to resolve output path {}", output.display()))?;

    for input in inputs {
        let source = comparable(input)
            .with_context(|| format!("failed to resolve input path {}", input.display()))?;
        if source == target {
            bail!(
                "refusing to overwrite input {} with output {}",
                input.display(),
                output.display()
            );
        }
    }
    Ok(())
}

// Outputs usually do not exist yet, so only existing paths are canonicalized.
fn comparable(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return path
            .canonicalize()
            .with_context(|| format!("canonicalize {}", path.display()));
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir().context("current_dir")?.join(path))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::ensure_output_not_input;

    #[test]
    fn rejects_same_file_and_accepts_new_one() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("fw.txt");
        fs::write(&input, "").expect("write");

        assert!(ensure_output_not_input(&input, &[input.clone()]).is_err());
        assert!(ensure_output_not_input(&dir.path().join("out.json"), &[input]).is_ok());
    }
}
