use crate::error::ConfigError;
use crate::propagation::DEFAULT_MAX_PROPAGATION;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// Configuration structure for column name mapping
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub key: String,
    pub downstream: String,
    pub order: String,
    pub area: String,
    pub gauge: String,
    pub cluster: String,
}

impl ColumnConfig {
    /// Column names of the drain, gauge and cluster CSV tables.
    pub fn new() -> Self {
        ColumnConfig {
            key: "model_id".to_string(),
            downstream: "downstream_model_id".to_string(),
            order: "strahler_order".to_string(),
            area: "area_sqkm".to_string(),
            gauge: "gauge_id".to_string(),
            cluster: "clstr_id".to_string(),
        }
    }

    /// Column names of a NextGen hydrofabric GeoPackage.
    pub fn hydrofabric() -> Self {
        ColumnConfig {
            key: "id".to_string(),
            downstream: "toid".to_string(),
            order: "order".to_string(),
            area: "tot_drainage_areasqkm".to_string(),
            gauge: "gage".to_string(),
            cluster: "clstr_id".to_string(),
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        ColumnConfig::new()
    }
}

/// Settings for one assignment / bootstrap run. Passed explicitly to each
/// component; nothing reads ambient state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_propagation: usize,
    pub n_processes: usize,
    pub columns: ColumnConfig,
    pub drain_table: Option<PathBuf>,
    pub gauge_table: Option<PathBuf>,
    pub cluster_table: Option<PathBuf>,
    pub gpkg: Option<PathBuf>,
    pub hindcast: Option<PathBuf>,
    pub gauge_data: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            max_propagation: DEFAULT_MAX_PROPAGATION,
            n_processes: num_cpus::get(),
            columns: ColumnConfig::new(),
            drain_table: None,
            gauge_table: None,
            cluster_table: None,
            gpkg: None,
            hindcast: None,
            gauge_data: None,
        }
    }
}

impl RunConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig = toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_propagation == 0 {
            return Err(ConfigError::InvalidMaxPropagation(self.max_propagation));
        }
        if self.n_processes == 0 {
            return Err(ConfigError::InvalidProcesses);
        }
        Ok(())
    }
}

pub const DIR_TABLES: &str = "tables";
pub const DIR_GAUGE_DATA: &str = "gauge_data";

/// Layout of a project working directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub workdir: PathBuf,
}

impl ProjectPaths {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        ProjectPaths {
            workdir: workdir.into(),
        }
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.workdir.join(DIR_TABLES)
    }

    pub fn table(&self, name: &str) -> PathBuf {
        self.tables_dir().join(name)
    }

    fn resolve(&self, configured: Option<&PathBuf>, default: PathBuf) -> PathBuf {
        match configured {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.workdir.join(p),
            None => default,
        }
    }

    pub fn drain_table(&self, config: &RunConfig) -> PathBuf {
        self.resolve(config.drain_table.as_ref(), self.table("drain_table.csv"))
    }

    pub fn gauge_table(&self, config: &RunConfig) -> PathBuf {
        self.resolve(config.gauge_table.as_ref(), self.table("gauge_table.csv"))
    }

    pub fn cluster_table(&self, config: &RunConfig) -> PathBuf {
        self.resolve(config.cluster_table.as_ref(), self.table("cluster_table.csv"))
    }

    pub fn gpkg(&self, config: &RunConfig) -> Option<PathBuf> {
        config.gpkg.as_ref().map(|p| self.resolve(Some(p), p.clone()))
    }

    pub fn hindcast(&self, config: &RunConfig) -> PathBuf {
        self.resolve(config.hindcast.as_ref(), self.workdir.join("hindcast.nc"))
    }

    pub fn gauge_data(&self, config: &RunConfig) -> PathBuf {
        self.resolve(config.gauge_data.as_ref(), self.workdir.join(DIR_GAUGE_DATA))
    }

    pub fn assign_table(&self) -> PathBuf {
        self.table("assign_table.csv")
    }

    pub fn bootstrap_assign_table(&self) -> PathBuf {
        self.table("assign_table_bootstrap.csv")
    }

    pub fn bootstrap_metrics(&self) -> PathBuf {
        self.table("bootstrap_metrics.csv")
    }

    /// Creates the working directory and its subdirectories.
    pub fn scaffold(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.tables_dir())?;
        std::fs::create_dir_all(self.workdir.join(DIR_GAUGE_DATA))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: RunConfig = toml::from_str(
            r#"
            max_propagation = 3
            hindcast = "sim/hindcast.nc"

            [columns]
            key = "COMID"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_propagation, 3);
        assert_eq!(config.columns.key, "COMID");
        assert_eq!(config.columns.downstream, "downstream_model_id");
        assert!(config.n_processes >= 1);

        let paths = ProjectPaths::new("/work");
        assert_eq!(paths.hindcast(&config), PathBuf::from("/work/sim/hindcast.nc"));
        assert_eq!(paths.gauge_data(&config), PathBuf::from("/work/gauge_data"));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let config = RunConfig {
            max_propagation: 0,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMaxPropagation(0))));

        let config = RunConfig {
            n_processes: 0,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProcesses)));
    }

    #[test]
    fn scaffold_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path().join("project"));
        paths.scaffold().unwrap();
        assert!(paths.tables_dir().is_dir());
        assert!(paths.workdir.join(DIR_GAUGE_DATA).is_dir());
    }
}
