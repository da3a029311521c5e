//! Configuration management for the autotrace engine

use lazy_static::lazy_static;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::Shape;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcedureConfig {
    /// Emit the expression and gradient chains at debug level when a procedure is built
    pub log_expression_chain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomConfig {
    pub seed: u64,
}

impl Default for RandomConfig {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

impl RandomConfig {
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientCheckConfig {
    pub epsilon: f64,
    pub tolerance: f64,
}

impl Default for GradientCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            tolerance: 1e-5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub procedure: ProcedureConfig,
    pub random: RandomConfig,
    pub gradient_check: GradientCheckConfig,
}

/// Receptive-field geometry shared by convolution and pooling.
///
/// Validated when an operator is configured, before any tracing happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub filter_rows: usize,
    pub filter_columns: usize,
    pub stride: usize,
    pub dilation: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            filter_rows: 3,
            filter_columns: 3,
            stride: 1,
            dilation: 1,
        }
    }
}

impl WindowConfig {
    pub fn new(filter_rows: usize, filter_columns: usize, stride: usize, dilation: usize) -> AutotraceResult<Self> {
        let config = Self {
            filter_rows,
            filter_columns,
            stride,
            dilation,
        };
        config.validate()?;
        Ok(config)
    }

    /// Geometry of a filter tensor's rows and columns
    pub fn for_filter(filter: Shape, stride: usize, dilation: usize) -> AutotraceResult<Self> {
        Self::new(filter.rows, filter.columns, stride, dilation)
    }

    pub fn validate(&self) -> AutotraceResult<()> {
        let checks = [
            ("filter rows", self.filter_rows),
            ("filter columns", self.filter_columns),
            ("stride", self.stride),
            ("dilation", self.dilation),
        ];
        for (name, value) in checks.iter() {
            if *value < 1 {
                return Err(AutotraceError::configuration(&format!(
                    "{} must be at least 1, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Rows and columns covered by one dilated window
    pub fn extent(&self) -> (usize, usize) {
        (
            self.dilation * (self.filter_rows - 1) + 1,
            self.dilation * (self.filter_columns - 1) + 1,
        )
    }

    /// Output shape for `input`: `(in − dilation·(filter − 1) − 1) / stride + 1` per axis.
    pub fn output_shape(&self, input: Shape) -> AutotraceResult<Shape> {
        self.validate()?;
        let (extent_rows, extent_columns) = self.extent();
        if extent_rows > input.rows || extent_columns > input.columns {
            return Err(AutotraceError::dimension_mismatch(
                "window",
                &format!("input of at least {}x{}", extent_rows, extent_columns),
                &input.to_string(),
            ));
        }
        Ok(Shape::new(
            (input.rows - extent_rows) / self.stride + 1,
            (input.columns - extent_columns) / self.stride + 1,
            input.depth,
        ))
    }
}

/// Configuration manager guarding the active engine configuration
pub struct ConfigManager {
    config: Arc<RwLock<EngineConfig>>,
    config_file: Option<PathBuf>,
    custom_settings: HashMap<String, serde_json::Value>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(EngineConfig::default())),
            config_file: None,
            custom_settings: HashMap::new(),
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn load_from_file(&mut self, path: &Path) -> AutotraceResult<()> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;

        *self.config.write() = config;
        self.config_file = Some(path.to_path_buf());

        tracing::info!("Configuration loaded from {:?}", path);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> AutotraceResult<()> {
        let content = serde_json::to_string_pretty(&*self.config.read())?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn update_config<F>(&mut self, f: F) -> AutotraceResult<()>
    where
        F: FnOnce(&mut EngineConfig),
    {
        f(&mut *self.config.write());

        if let Some(ref path) = self.config_file {
            self.save_to_file(path)?;
        }
        Ok(())
    }

    pub fn set_custom_setting(&mut self, key: &str, value: serde_json::Value) {
        self.custom_settings.insert(key.to_string(), value);
    }

    pub fn get_custom_setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom_settings.get(key)
    }
}

lazy_static! {
    static ref CONFIG_MANAGER: RwLock<ConfigManager> = RwLock::new(ConfigManager::new());
}

/// Get the global configuration
pub fn get_config() -> EngineConfig {
    CONFIG_MANAGER.read().get_config()
}

/// Update the global configuration
pub fn update_config<F>(f: F) -> AutotraceResult<()>
where
    F: FnOnce(&mut EngineConfig),
{
    CONFIG_MANAGER.write().update_config(f)
}

/// Load the global configuration from a JSON file
pub fn load_config_from_file(path: &Path) -> AutotraceResult<()> {
    CONFIG_MANAGER.write().load_from_file(path)
}

/// Fluent builder for an [`EngineConfig`]
#[derive(Default)]
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn procedure(mut self, f: impl FnOnce(&mut ProcedureConfig)) -> Self {
        f(&mut self.config.procedure);
        self
    }

    pub fn random(mut self, f: impl FnOnce(&mut RandomConfig)) -> Self {
        f(&mut self.config.random);
        self
    }

    pub fn gradient_check(mut self, f: impl FnOnce(&mut GradientCheckConfig)) -> Self {
        f(&mut self.config.gradient_check);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }

    pub fn apply(self) -> AutotraceResult<()> {
        update_config(|config| *config = self.config)
    }
}
