use std::fmt::Display;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::algorithm::geometry::FluxWindow;
use crate::data::pdg::PdgCodeList;

/// Default number of input file names shown by the meta data dump.
pub const DEFAULT_MAX_FILE_PRINT: usize = 20;

/// Meta data describing one flux file (or one block of it, keyed by `metakey`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FluxMeta {
    /// list of neutrino flavors
    pub pdglist: PdgCodeList,
    pub max_energy: f64,
    pub min_wgt: f64,
    pub max_wgt: f64,
    /// represented number of protons-on-target
    pub protons: f64,
    pub window_base: [f64; 3],
    pub window_dir1: [f64; 3],
    pub window_dir2: [f64; 3],
    /// tag names of aux ints / doubles associated with each entry
    pub auxintname: Vec<String>,
    pub auxdblname: Vec<String>,
    /// list of input files this block was produced from
    pub infiles: Vec<String>,
    /// random seed used in generation
    pub seed: i32,
    /// index key to tie to individual entries
    pub metakey: u32,
}

impl Default for FluxMeta {
    fn default() -> Self {
        FluxMeta {
            pdglist: PdgCodeList::new(),
            max_energy: 0.0,
            min_wgt: 1.0e10,
            max_wgt: -1.0e10,
            protons: 0.0,
            window_base: [0.0; 3],
            window_dir1: [0.0; 3],
            window_dir2: [0.0; 3],
            auxintname: Vec::new(),
            auxdblname: Vec::new(),
            infiles: Vec::new(),
            seed: 0,
            metakey: 0,
        }
    }
}

impl FluxMeta {
    pub fn reset(&mut self) {
        *self = FluxMeta::default();
    }

    pub fn add_flavor(&mut self, pdg: i32) {
        self.pdglist.push(pdg);
    }

    pub fn window(&self) -> FluxWindow {
        FluxWindow::from_arrays(self.window_base, self.window_dir1, self.window_dir2)
    }

    /// A block is usable for aggregation only if it names species and carries a sane weight range.
    pub fn has_species(&self) -> bool {
        !self.pdglist.is_empty()
    }

    pub fn has_weights(&self) -> bool {
        self.max_wgt > 0.0 && self.min_wgt <= self.max_wgt
    }

    pub fn is_unweighted(&self) -> bool {
        self.min_wgt == 1.0 && self.max_wgt == 1.0
    }

    /// Multi-line dump, listing at most `max_file_print` input files.
    pub fn describe(&self, max_file_print: usize) -> String {
        let mut lines = vec![
            format!("FluxMeta (metakey {}, seed {})", self.metakey, self.seed),
            format!("  pdglist:    {}", self.pdglist),
            format!("  max energy: {}", self.max_energy),
            format!("  weights:    [{}, {}]", self.min_wgt, self.max_wgt),
            format!("  protons:    {}", self.protons),
            format!("  window:     base {:?} dir1 {:?} dir2 {:?}", self.window_base, self.window_dir1, self.window_dir2),
        ];
        if !self.auxintname.is_empty() {
            lines.push(format!("  auxint:     {}", self.auxintname.iter().join(", ")));
        }
        if !self.auxdblname.is_empty() {
            lines.push(format!("  auxdbl:     {}", self.auxdblname.iter().join(", ")));
        }
        lines.push(format!("  infiles:    {}", self.infiles.len()));
        for name in self.infiles.iter().take(max_file_print) {
            lines.push(format!("    {}", name));
        }
        if self.infiles.len() > max_file_print {
            lines.push(format!("    ... ({} more)", self.infiles.len() - max_file_print));
        }
        lines.join("\n")
    }
}

impl Display for FluxMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe(DEFAULT_MAX_FILE_PRINT))
    }
}
