//! WGSL shader sources with build-time constants.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Conventional entry point name for the stage.
    pub fn entry_point(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_main",
            ShaderStage::Fragment => "fs_main",
            ShaderStage::Compute => "cs_main",
        }
    }
}

/// One stage's processed source text.
#[derive(Clone, Debug, PartialEq)]
pub struct StageSource {
    pub stage: ShaderStage,
    pub path: PathBuf,
    pub code: String,
}

/// All stages of a named shader program, ready for module creation.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderSource {
    pub name: String,
    pub stages: Vec<StageSource>,
}

impl ShaderSource {
    pub fn stage(&self, stage: ShaderStage) -> Option<&StageSource> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Read a stage file and inject `constants` as WGSL `const` declarations.
pub fn load_stage(stage: ShaderStage, path: &Path, constants: &[(String, String)]) -> Result<StageSource> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read shader {}", path.display()))?;
    let code = inject_constants(&raw, constants)
        .with_context(|| format!("Bad constants for shader {}", path.display()))?;
    Ok(StageSource {
        stage,
        path: path.to_path_buf(),
        code,
    })
}

/// Insert constant declarations after any leading WGSL directives
/// (`enable`, `requires`, `diagnostic`), which must stay first.
pub fn inject_constants(source: &str, constants: &[(String, String)]) -> Result<String> {
    if constants.is_empty() {
        return Ok(source.to_owned());
    }

    let mut block = String::new();
    for (name, value) in constants {
        if !is_identifier(name) {
            bail!("'{}' is not a valid WGSL identifier", name);
        }
        if value.trim().is_empty() {
            bail!("constant '{}' has an empty value", name);
        }
        block.push_str(&format!("const {} = {};\n", name, value.trim()));
    }

    let mut out = String::with_capacity(source.len() + block.len());
    let mut inserted = false;
    for line in source.lines() {
        let t = line.trim_start();
        let directive =
            t.starts_with("enable ") || t.starts_with("requires ") || t.starts_with("diagnostic");
        if !inserted && !directive && !t.is_empty() && !t.starts_with("//") {
            out.push_str(&block);
            inserted = true;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !inserted {
        out.push_str(&block);
    }
    Ok(out)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn constants_follow_directives() {
        let src = "enable f16;\n\n@vertex fn vs_main() {}\n";
        let out = inject_constants(src, &consts(&[("MAX_LIGHTS", "8u")])).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "enable f16;");
        assert_eq!(lines[2], "const MAX_LIGHTS = 8u;");
        assert!(out.contains("@vertex fn vs_main() {}"));
    }

    #[test]
    fn no_constants_is_identity() {
        let src = "@fragment fn fs_main() {}";
        assert_eq!(inject_constants(src, &[]).unwrap(), src);
    }

    #[test]
    fn rejects_bad_identifier() {
        assert!(inject_constants("", &consts(&[("9lives", "1")])).is_err());
        assert!(inject_constants("", &consts(&[("OK", " ")])).is_err());
    }

    #[test]
    fn load_stage_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.wgsl");
        std::fs::write(&path, "@fragment fn fs_main() {}\n").unwrap();

        let stage = load_stage(ShaderStage::Fragment, &path, &consts(&[("GAMMA", "2.2")])).unwrap();
        assert!(stage.code.starts_with("const GAMMA = 2.2;"));
        assert_eq!(stage.stage.entry_point(), "fs_main");
        assert!(load_stage(ShaderStage::Vertex, &dir.path().join("missing.wgsl"), &[]).is_err());
    }
}
