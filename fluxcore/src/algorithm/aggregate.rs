//! Folding per-file flux meta data into one chain-wide aggregate.
//!
//! Producers do not always write meta data, so a missing or partial block never
//! aborts the fold. Every irregularity is recorded as a [`MetaIssue`] next to the
//! aggregate value and left for the caller to report.

use std::fmt::Display;

use crate::algorithm::geometry::{FluxWindow, WINDOW_TOLERANCE};
use crate::data::entry::FluxEntry;
use crate::data::meta::FluxMeta;
use crate::data::pdg::PdgCodeList;

/// Non-fatal inconsistency found while aggregating or serving entries.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaIssue {
    /// file carries no meta data at all
    MissingMeta { file: usize },
    EmptySpecies { file: usize, metakey: u32 },
    MissingWeights { file: usize, metakey: u32 },
    /// flux window differs from the one of the first file
    WindowMismatch { file: usize, metakey: u32 },
    /// an entry weight lies above the aggregated maximum
    WeightAboveBound { weight: f64, bound: f64 },
    /// an entry energy lies above the aggregated maximum
    EnergyAboveBound { energy: f64, bound: f64 },
}

impl Display for MetaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaIssue::MissingMeta { file } => write!(f, "file {} has no meta data", file),
            MetaIssue::EmptySpecies { file, metakey } => {
                write!(f, "file {} meta {} lists no neutrino species", file, metakey)
            }
            MetaIssue::MissingWeights { file, metakey } => {
                write!(f, "file {} meta {} has no usable weight range", file, metakey)
            }
            MetaIssue::WindowMismatch { file, metakey } => {
                write!(f, "file {} meta {} flux window differs from the first file", file, metakey)
            }
            MetaIssue::WeightAboveBound { weight, bound } => {
                write!(f, "entry weight {} exceeds max weight {}", weight, bound)
            }
            MetaIssue::EnergyAboveBound { energy, bound } => {
                write!(f, "entry energy {} exceeds max energy {}", energy, bound)
            }
        }
    }
}

/// Chain-wide view of the flux meta data.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaAggregate {
    pub pdglist: PdgCodeList,
    pub max_energy: f64,
    pub min_wgt: f64,
    pub max_wgt: f64,
    /// protons-on-target represented by all files together
    pub total_pot: f64,
    pub file_pots: Vec<f64>,
    pub window: Option<FluxWindow>,
    /// every file delivered complete meta data
    pub all_files_meta: bool,
    /// every entry of every file has weight 1
    pub already_unweighted: bool,
    pub issues: Vec<MetaIssue>,
}

impl MetaAggregate {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Running fold over the meta blocks of a file chain.
#[derive(Debug, Clone)]
pub struct MetaAggregator {
    pdglist: PdgCodeList,
    max_energy: f64,
    min_wgt: f64,
    max_wgt: f64,
    file_pots: Vec<f64>,
    window: Option<FluxWindow>,
    complete: bool,
    meta_unweighted: bool,
    scanned: u64,
    scanned_unweighted: bool,
    issues: Vec<MetaIssue>,
}

impl Default for MetaAggregator {
    fn default() -> Self {
        MetaAggregator {
            pdglist: PdgCodeList::new(),
            max_energy: 0.0,
            min_wgt: 1.0e10,
            max_wgt: -1.0e10,
            file_pots: Vec::new(),
            window: None,
            complete: true,
            meta_unweighted: true,
            scanned: 0,
            scanned_unweighted: true,
            issues: Vec::new(),
        }
    }
}

impl MetaAggregator {
    pub fn new() -> Self {
        MetaAggregator::default()
    }

    /// Fold in all meta blocks of one file; an empty slice marks the file as lacking meta data.
    pub fn add_file(&mut self, file: usize, metas: &[FluxMeta]) {
        if metas.is_empty() {
            self.complete = false;
            self.issues.push(MetaIssue::MissingMeta { file });
            self.file_pots.push(0.0);
            return;
        }

        let mut file_pot = 0.0;
        for meta in metas {
            file_pot += meta.protons;

            if meta.has_species() {
                self.pdglist.extend_from(&meta.pdglist);
            } else {
                self.complete = false;
                self.issues.push(MetaIssue::EmptySpecies { file, metakey: meta.metakey });
            }

            if meta.has_weights() {
                self.min_wgt = self.min_wgt.min(meta.min_wgt);
                self.max_wgt = self.max_wgt.max(meta.max_wgt);
                self.meta_unweighted &= meta.is_unweighted();
            } else {
                self.complete = false;
                self.issues.push(MetaIssue::MissingWeights { file, metakey: meta.metakey });
            }

            self.max_energy = self.max_energy.max(meta.max_energy);

            let window = meta.window();
            match &self.window {
                None => self.window = Some(window),
                Some(first) if !first.approx_eq(&window, WINDOW_TOLERANCE) => {
                    self.issues.push(MetaIssue::WindowMismatch { file, metakey: meta.metakey });
                }
                Some(_) => (),
            }
        }
        self.file_pots.push(file_pot);
    }

    /// Entries must be scanned when the meta data alone cannot be trusted.
    pub fn needs_entry_scan(&self) -> bool {
        !self.complete
    }

    /// Widen the bounds with one entry, used when meta data is incomplete.
    pub fn scan_entry(&mut self, entry: &FluxEntry) {
        self.scanned += 1;
        self.pdglist.push(entry.pdg);
        self.max_energy = self.max_energy.max(entry.e);
        self.min_wgt = self.min_wgt.min(entry.wgt);
        self.max_wgt = self.max_wgt.max(entry.wgt);
        self.scanned_unweighted &= entry.wgt == 1.0;
    }

    pub fn finish(self) -> MetaAggregate {
        let already_unweighted = if self.complete {
            self.meta_unweighted
        } else {
            self.scanned > 0 && self.scanned_unweighted
        };
        MetaAggregate {
            pdglist: self.pdglist,
            max_energy: self.max_energy,
            min_wgt: self.min_wgt,
            max_wgt: self.max_wgt,
            total_pot: self.file_pots.iter().sum(),
            file_pots: self.file_pots,
            window: self.window,
            all_files_meta: self.complete,
            already_unweighted,
            issues: self.issues,
        }
    }
}

/// What one entry is worth in protons-on-target.
///
/// Total represented POT divided over all entries, and over the number of passes
/// when cycling a finite number of times. Without complete meta data every entry
/// counts as one unit. Unbounded cycling only accounts for a single pass.
pub fn effective_pot_per_entry(aggregate: &MetaAggregate, num_entries: u64, num_cycles: u64) -> f64 {
    if num_entries == 0 {
        return 0.0;
    }
    let per_entry = if aggregate.all_files_meta {
        aggregate.total_pot / num_entries as f64
    } else {
        1.0
    };
    match num_cycles {
        0 => per_entry,
        n => per_entry / n as f64,
    }
}
