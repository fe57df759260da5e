use fluxdf::error::FluxError;
use fluxdf::flux::config::FluxDriverConfig;
use fluxdf::flux::driver::SimpleFluxDriver;
use numpy::{IntoPyArray, PyArray1};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: FluxError) -> PyErr {
    match e {
        FluxError::Configuration(inner) => PyValueError::new_err(inner.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

#[pyclass]
pub struct PyFluxDriver {
    inner: SimpleFluxDriver,
}

#[pymethods]
impl PyFluxDriver {
    /// `config_json` holds a JSON driver configuration; omitted fields take their defaults.
    #[new]
    #[pyo3(signature = (config_json=None))]
    pub fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(text) => serde_json::from_str::<FluxDriverConfig>(text).map_err(|e| PyValueError::new_err(e.to_string()))?,
            None => FluxDriverConfig::default(),
        };
        let inner = SimpleFluxDriver::new(config).map_err(to_py_err)?;
        Ok(PyFluxDriver { inner })
    }

    pub fn load_beam_sim_data(&mut self, patterns: Vec<String>, det_loc: &str) -> PyResult<()> {
        self.inner.load_beam_sim_data(&patterns, det_loc).map_err(to_py_err)
    }

    pub fn generate_next(&mut self) -> PyResult<bool> {
        self.inner.generate_next().map_err(to_py_err)
    }

    /// Serve up to `n` entries; returns pdg, weight, p4 (n x 4) and x4 (n x 4) as flat arrays.
    pub fn generate_batch(&mut self, py: Python<'_>, n: usize) -> PyResult<(Py<PyArray1<i32>>, Py<PyArray1<f64>>, Py<PyArray1<f64>>, Py<PyArray1<f64>>)> {
        let mut pdg = Vec::with_capacity(n);
        let mut weight = Vec::with_capacity(n);
        let mut p4 = Vec::with_capacity(n * 4);
        let mut x4 = Vec::with_capacity(n * 4);
        while pdg.len() < n && !self.inner.end() {
            if !self.inner.generate_next().map_err(to_py_err)? {
                break;
            }
            pdg.push(self.inner.pdg_code());
            weight.push(self.inner.weight());
            p4.extend(self.inner.momentum().to_array());
            x4.extend(self.inner.position().to_array());
        }
        Ok((
            pdg.into_pyarray(py).to_owned(),
            weight.into_pyarray(py).to_owned(),
            p4.into_pyarray(py).to_owned(),
            x4.into_pyarray(py).to_owned(),
        ))
    }

    pub fn clear(&mut self) {
        self.inner.clear()
    }

    pub fn close(&mut self) {
        self.inner.close()
    }

    pub fn end(&self) -> bool {
        self.inner.end()
    }

    pub fn pdg_code(&self) -> i32 {
        self.inner.pdg_code()
    }

    pub fn weight(&self) -> f64 {
        self.inner.weight()
    }

    pub fn momentum(&self, py: Python<'_>) -> Py<PyArray1<f64>> {
        self.inner.momentum().to_array().to_vec().into_pyarray(py).to_owned()
    }

    pub fn position(&self, py: Python<'_>) -> Py<PyArray1<f64>> {
        self.inner.position().to_array().to_vec().into_pyarray(py).to_owned()
    }

    pub fn index(&self) -> Option<u64> {
        self.inner.index()
    }

    pub fn decay_dist(&self) -> f64 {
        self.inner.decay_dist()
    }

    pub fn move_to_z0(&mut self, z0: f64) -> bool {
        self.inner.move_to_z0(z0)
    }

    pub fn used_pots(&self) -> f64 {
        self.inner.used_pots()
    }

    pub fn pots_per_nu(&self) -> f64 {
        self.inner.pots_per_nu()
    }

    pub fn n_flux_neutrinos(&self) -> u64 {
        self.inner.n_flux_neutrinos()
    }

    pub fn sum_weight(&self) -> f64 {
        self.inner.sum_weight()
    }

    pub fn max_energy(&self) -> f64 {
        self.inner.max_energy()
    }

    pub fn max_weight(&self) -> f64 {
        self.inner.max_weight()
    }

    pub fn flux_particles(&self) -> Vec<i32> {
        self.inner.flux_particles().codes().to_vec()
    }

    pub fn rejected_particles(&self) -> Vec<i32> {
        self.inner.rejected_particles().codes().to_vec()
    }

    pub fn file_list(&self) -> Vec<String> {
        self.inner.file_list()
    }

    pub fn seed(&self) -> u64 {
        self.inner.seed()
    }

    pub fn flux_window(&self) -> Option<([f64; 3], [f64; 3], [f64; 3])> {
        self.inner.flux_window().map(|(a, b, c)| ([a.x, a.y, a.z], [b.x, b.y, b.z], [c.x, c.y, c.z]))
    }

    /// Flux entry of the current ray as JSON, None before the first entry.
    pub fn current_entry_json(&self) -> PyResult<Option<String>> {
        self.inner.current_entry().map(to_json).transpose()
    }

    /// Parent decay record of the current entry as JSON, if loaded.
    pub fn current_parent_json(&self) -> PyResult<Option<String>> {
        self.inner.current_parent().map(to_json).transpose()
    }

    /// Auxiliary ints and doubles of the current entry as JSON, if loaded.
    pub fn current_aux_json(&self) -> PyResult<Option<String>> {
        self.inner.current_aux().map(to_json).transpose()
    }

    pub fn current_meta_json(&self) -> PyResult<Option<String>> {
        self.inner.current_meta().map(to_json).transpose()
    }

    pub fn set_requested_branch_list(&mut self, branches: &str) -> PyResult<()> {
        self.inner.set_requested_branch_list(branches).map_err(to_py_err)
    }

    pub fn set_flux_particles(&mut self, particles: Vec<i32>) {
        self.inner.set_flux_particles(&particles)
    }

    pub fn set_max_energy(&mut self, max_energy: f64) -> PyResult<()> {
        self.inner.set_max_energy(max_energy).map_err(to_py_err)
    }

    pub fn set_gen_weighted(&mut self, gen_weighted: bool) {
        self.inner.set_gen_weighted(gen_weighted)
    }

    pub fn set_num_of_cycles(&mut self, num_cycles: u64) {
        self.inner.set_num_of_cycles(num_cycles)
    }

    pub fn set_entry_reuse(&mut self, entry_reuse: u64) -> PyResult<()> {
        self.inner.set_entry_reuse(entry_reuse).map_err(to_py_err)
    }

    #[pyo3(signature = (z0=None))]
    pub fn set_upstream_z(&mut self, z0: Option<f64>) {
        self.inner.set_upstream_z(z0)
    }

    pub fn describe_config(&self) -> String {
        self.inner.describe_config()
    }

    pub fn describe_current(&self) -> String {
        self.inner.describe_current()
    }

    pub fn __repr__(&self) -> String {
        format!(
            "PyFluxDriver(files={}, entries={}, end={})",
            self.inner.file_list().len(),
            self.inner.num_entries(),
            self.inner.end()
        )
    }
}
