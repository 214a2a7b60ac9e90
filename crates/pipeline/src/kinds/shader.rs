use std::path::PathBuf;

use anyhow::Context;
use asset::shader::{self as source, ShaderSource, ShaderStage};
use corelib::{GpuContext, GpuShader};

use crate::kind::ResourceKind;

/// A named WGSL program: one file per stage plus constants spliced into
/// every stage before compilation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderBuilder {
    name: String,
    stages: Vec<(ShaderStage, PathBuf)>,
    constants: Vec<(String, String)>,
}

impl ShaderBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add or replace a stage.
    pub fn stage(mut self, stage: ShaderStage, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match self.stages.iter_mut().find(|(s, _)| *s == stage) {
            Some(entry) => entry.1 = path,
            None => self.stages.push((stage, path)),
        }
        self
    }

    pub fn vertex(self, path: impl Into<PathBuf>) -> Self {
        self.stage(ShaderStage::Vertex, path)
    }

    pub fn fragment(self, path: impl Into<PathBuf>) -> Self {
        self.stage(ShaderStage::Fragment, path)
    }

    pub fn compute(self, path: impl Into<PathBuf>) -> Self {
        self.stage(ShaderStage::Compute, path)
    }

    /// Declare `const name = value;` in every stage.
    pub fn constant(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.constants.push((name.into(), value.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[(ShaderStage, PathBuf)] {
        &self.stages
    }

    pub fn constants(&self) -> &[(String, String)] {
        &self.constants
    }
}

#[derive(Debug, Default)]
pub struct Shaders;

impl ResourceKind for Shaders {
    const FACTORY: &'static str = "shader";
    const RETAIN_DATA: bool = false;

    type Builder = ShaderBuilder;
    type Data = ShaderSource;
    type Payload = GpuShader;

    fn cache_key(&self, builder: &ShaderBuilder) -> Option<String> {
        if builder.name.is_empty() || builder.stages.is_empty() {
            return None;
        }
        Some(builder.name.clone())
    }

    fn decode(&self, name: &str, builder: &ShaderBuilder) -> anyhow::Result<ShaderSource> {
        let stages = builder
            .stages
            .iter()
            .map(|(stage, path)| source::load_stage(*stage, path, &builder.constants))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("Failed to load shader '{}'", name))?;
        Ok(ShaderSource {
            name: name.to_owned(),
            stages,
        })
    }

    fn materialize(
        &self,
        _name: &str,
        source: &ShaderSource,
        _builder: &ShaderBuilder,
        gpu: &mut dyn GpuContext,
    ) -> anyhow::Result<GpuShader> {
        gpu.create_shader(source)
    }

    fn release(&self, shader: GpuShader, gpu: &mut dyn GpuContext) {
        gpu.destroy_shader(shader);
    }
}
