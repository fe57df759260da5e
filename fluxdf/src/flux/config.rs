use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use fluxcore::data::meta::DEFAULT_MAX_FILE_PRINT;
use serde::{Deserialize, Serialize};

use crate::data::branch::BranchRequest;
use crate::error::{ConfigurationError, LoadError};

/// Options of the simple flux driver.
///
/// Every field has a default, so a configuration file only needs to name what it changes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FluxDriverConfig {
    /// requested record groups, e.g. "entry,numi,aux"
    pub branches: String,
    /// accepted neutrino species; empty adopts the species listed in the meta data
    pub flux_particles: Vec<i32>,
    /// declared maximum neutrino energy; None adopts the meta data maximum
    pub max_energy: Option<f64>,
    /// true: serve every entry with its own weight, false: unweight by rejection
    pub gen_weighted: bool,
    /// passes over the file chain, 0 cycles forever
    pub num_cycles: u64,
    /// times each entry is served before moving on
    pub entry_reuse: u64,
    /// z coordinate every ray origin is moved to
    pub upstream_z: Option<f64>,
    /// seed of the rejection sampler
    pub seed: Option<u64>,
    /// read every file into memory at load time
    pub in_memory: bool,
    /// input files listed by the meta data dump
    pub max_file_print: usize,
}

impl Default for FluxDriverConfig {
    fn default() -> Self {
        Self {
            branches: "entry,numi,aux".to_string(),
            flux_particles: Vec::new(),
            max_energy: None,
            gen_weighted: false,
            num_cycles: 1,
            entry_reuse: 1,
            upstream_z: None,
            seed: None,
            in_memory: false,
            max_file_print: DEFAULT_MAX_FILE_PRINT,
        }
    }
}

impl FluxDriverConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigurationError> {
        let f = File::open(path).map_err(|source| ConfigurationError::Io { path: path.to_path_buf(), source })?;
        let config: FluxDriverConfig = serde_json::from_reader(BufReader::new(f))
            .map_err(|source| ConfigurationError::Json { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.entry_reuse < 1 {
            return Err(ConfigurationError::InvalidEntryReuse(self.entry_reuse));
        }
        if let Some(max_energy) = self.max_energy {
            if max_energy.is_nan() || max_energy <= 0.0 {
                return Err(ConfigurationError::InvalidMaxEnergy(max_energy));
            }
        }
        Ok(())
    }

    pub fn branch_request(&self) -> Result<BranchRequest, LoadError> {
        BranchRequest::parse(&self.branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = FluxDriverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_cycles, 1);
        assert_eq!(config.branch_request().unwrap(), BranchRequest::default());
    }

    #[test]
    fn test_invalid_values() {
        let config = FluxDriverConfig { entry_reuse: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidEntryReuse(0))));
        let config = FluxDriverConfig { max_energy: Some(-1.0), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidMaxEnergy(_))));
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"flux_particles": [14, -14], "num_cycles": 0, "seed": 42}}"#).unwrap();
        let config = FluxDriverConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.flux_particles, vec![14, -14]);
        assert_eq!(config.num_cycles, 0);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.entry_reuse, 1);
    }

    #[test]
    fn test_bad_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(FluxDriverConfig::from_json_file(file.path()), Err(ConfigurationError::Json { .. })));
    }
}
