mod py_driver;

use pyo3::prelude::*;

use crate::py_driver::PyFluxDriver;

#[pymodule]
fn fluxpy_connector(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyFluxDriver>()?;
    Ok(())
}
