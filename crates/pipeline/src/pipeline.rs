use corelib::{GpuContext, PipelineResult};

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::factory::Factory;
use crate::kinds::model::Models;
use crate::kinds::shader::Shaders;
use crate::kinds::texture::Textures;

/// One dispatcher plus the stock texture, model and shader factories.
pub struct AssetPipeline {
    config: PipelineConfig,
    dispatcher: Dispatcher,
    textures: Factory<Textures>,
    models: Factory<Models>,
    shaders: Factory<Shaders>,
}

impl AssetPipeline {
    /// Starts the decode worker.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let dispatcher = Dispatcher::new(&config)?;
        log::info!(
            "Resource pipeline up: worker '{}', frame budget {:?}, timeout {:?}",
            config.worker_name,
            config.frame_budget,
            config.materialize_timeout
        );
        Ok(Self {
            textures: Factory::new(Textures, &dispatcher, &config),
            models: Factory::new(Models, &dispatcher, &config),
            shaders: Factory::new(Shaders, &dispatcher, &config),
            dispatcher,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn textures(&self) -> &Factory<Textures> {
        &self.textures
    }

    pub fn models(&self) -> &Factory<Models> {
        &self.models
    }

    pub fn shaders(&self) -> &Factory<Shaders> {
        &self.shaders
    }

    /// Once per frame on the rendering thread. An error here is fatal and
    /// the caller should shut down.
    pub fn update(&self, gpu: &mut dyn GpuContext) -> PipelineResult<()> {
        self.dispatcher.update(gpu);
        match self.dispatcher.take_fatal() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Finish every outstanding load, then stop the worker.
    pub fn dispose(&self, gpu: &mut dyn GpuContext) {
        self.dispatcher.dispose(gpu);
    }
}
