//! The simple flux driver: serves flux rays one at a time from a chain of flux files.
//!
//! A caller configures species, energy cap, weighting mode, cycles and entry reuse,
//! loads a set of files and then pulls entries with [`SimpleFluxDriver::generate_next`]
//! until [`SimpleFluxDriver::end`] turns true. Entries are served either with their
//! native weight or, by default, unweighted through rejection sampling against the
//! chain's maximum weight. Protons-on-target are tracked for every entry that passes
//! the species filter.

use std::path::PathBuf;

use fluxcore::algorithm::aggregate::{effective_pot_per_entry, MetaAggregate, MetaAggregator, MetaIssue};
use fluxcore::algorithm::geometry::{FourVector, RayKinematics};
use fluxcore::algorithm::traversal::{Traversal, TraversalPhase};
use fluxcore::algorithm::unweight::RejectionSampler;
use fluxcore::data::entry::{FluxAux, FluxEntry, FluxParent};
use fluxcore::data::meta::FluxMeta;
use fluxcore::data::pdg::PdgCodeList;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::data::branch::BranchRequest;
use crate::data::pattern::resolve_file_patterns;
use crate::data::store::{FluxData, FluxDataLoader, InMemoryFluxFile};
use crate::error::{ConfigurationError, FluxError, LoadError, Result};
use crate::flux::config::FluxDriverConfig;

/// Rejection streaks this many passes long are reported once per call.
const REJECTION_WARN_PASSES: u64 = 100;

/// Running totals of the current stream, cleared by [`SimpleFluxDriver::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FluxStatistics {
    /// entries that passed the species filter
    pub n_flux_neutrinos: u64,
    /// sum of native weights of those entries
    pub sum_weight: f64,
    /// protons-on-target represented by those entries
    pub accum_pots: f64,
    /// traversal positions consumed, retries included
    pub entries_read: u64,
    pub species_rejected: u64,
    pub draws_rejected: u64,
    pub weight_bumps: u64,
    pub energy_above_meta: u64,
    pub weight_above_meta: u64,
}

/// Raw groups of the entry under the traversal cursor.
#[derive(Debug, Clone)]
struct LoadedRecord {
    index: u64,
    file: usize,
    entry: FluxEntry,
    parent: Option<FluxParent>,
    aux: Option<FluxAux>,
}

fn load_record(loader: &FluxDataLoader, index: u64) -> Result<LoadedRecord> {
    let file = loader
        .chain_index()
        .locate(index)
        .map(|(file, _)| file)
        .ok_or(FluxError::IndexOutOfRange { index, total: loader.num_entries() })?;
    Ok(LoadedRecord {
        index,
        file,
        entry: loader.get_entry(index)?,
        parent: loader.get_parent(index)?,
        aux: loader.get_aux(index)?,
    })
}

enum Outcome {
    Served,
    SpeciesRejected,
    Exhausted,
}

/// Keeps an unbounded traversal from spinning without ever serving an entry.
struct LivenessGuard {
    pass_length: u64,
    unbounded: bool,
    species_streak: u64,
    draw_streak: u64,
    warned: bool,
}

impl LivenessGuard {
    fn new(traversal: &Traversal) -> Self {
        LivenessGuard {
            pass_length: traversal.pass_length().max(1),
            unbounded: traversal.num_cycles() == 0,
            species_streak: 0,
            draw_streak: 0,
            warned: false,
        }
    }

    fn species_rejected(&mut self, particles: &PdgCodeList, entries: u64) -> Result<()> {
        self.species_streak += 1;
        if self.unbounded && self.species_streak >= self.pass_length {
            return Err(ConfigurationError::NoAcceptableSpecies { entries, particles: particles.to_string() }.into());
        }
        Ok(())
    }

    fn species_accepted(&mut self) {
        self.species_streak = 0;
    }

    fn draw_rejected(&mut self, max_weight: f64) {
        self.draw_streak += 1;
        if self.unbounded && !self.warned && self.draw_streak >= REJECTION_WARN_PASSES * self.pass_length {
            self.warned = true;
            warn!(
                rejected = self.draw_streak,
                max_weight = max_weight,
                "rejection sampling has not accepted an entry for {} passes, max weight may be mis-scaled",
                REJECTION_WARN_PASSES
            );
        }
    }
}

pub struct SimpleFluxDriver {
    config: FluxDriverConfig,
    det_loc: String,
    patterns: Vec<String>,
    loader: Option<FluxDataLoader>,
    aggregate: Option<MetaAggregate>,
    flux_particles: PdgCodeList,
    rejected_particles: PdgCodeList,
    max_energy: f64,
    sampler: RejectionSampler,
    traversal: Traversal,
    eff_pots_per_nu: f64,
    stats: FluxStatistics,
    record: Option<LoadedRecord>,
    kinematics: RayKinematics,
    weight: f64,
    valid: bool,
    end: bool,
    seed: u64,
    rng: StdRng,
}

impl SimpleFluxDriver {
    pub fn new(config: FluxDriverConfig) -> Result<Self> {
        config.validate()?;
        config.branch_request()?;
        let seed = config.seed.unwrap_or_else(rand::random::<u64>);
        Ok(SimpleFluxDriver {
            flux_particles: PdgCodeList::from_codes(&config.flux_particles),
            max_energy: config.max_energy.unwrap_or(0.0),
            traversal: Traversal::new(0, config.num_cycles, config.entry_reuse),
            config,
            det_loc: String::new(),
            patterns: Vec::new(),
            loader: None,
            aggregate: None,
            rejected_particles: PdgCodeList::new(),
            sampler: RejectionSampler::new(0.0),
            eff_pots_per_nu: 0.0,
            stats: FluxStatistics::default(),
            record: None,
            kinematics: RayKinematics::default(),
            weight: 0.0,
            valid: false,
            end: true,
            seed,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Resolve the (possibly wildcarded) file patterns and load the chain.
    pub fn load_beam_sim_data<S: AsRef<str>>(&mut self, patterns: &[S], det_loc: &str) -> Result<()> {
        self.close();
        let patterns: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        let request = self.config.branch_request()?;

        let paths: Vec<PathBuf> = resolve_file_patterns(&patterns)?;
        if paths.is_empty() {
            return Err(LoadError::NoFilesResolved { patterns }.into());
        }
        info!(files = paths.len(), det_loc = det_loc, in_memory = self.config.in_memory, "loading flux files");

        let loader = match self.config.in_memory {
            true => FluxDataLoader::new_in_memory(&paths, request)?,
            false => FluxDataLoader::new_lazy(&paths, request)?,
        };
        self.attach(loader, patterns, det_loc)
    }

    /// Load a chain that is already held in memory.
    pub fn load_files(&mut self, files: Vec<InMemoryFluxFile>, det_loc: &str) -> Result<()> {
        self.close();
        let request = self.config.branch_request()?;
        let patterns = files.iter().map(|f| f.name.clone()).collect();
        let loader = FluxDataLoader::from_files(files, request)?;
        self.attach(loader, patterns, det_loc)
    }

    fn attach(&mut self, loader: FluxDataLoader, patterns: Vec<String>, det_loc: &str) -> Result<()> {
        let aggregate = process_meta(&loader)?;
        let num_entries = loader.num_entries();

        for issue in &aggregate.issues {
            warn!(issue = %issue, "inconsistent flux meta data");
        }
        if aggregate.already_unweighted {
            info!("flux entries are already unweighted, rejection sampling is skipped");
        }

        self.traversal = Traversal::new(num_entries, self.config.num_cycles, self.config.entry_reuse);
        self.eff_pots_per_nu = effective_pot_per_entry(&aggregate, num_entries, self.config.num_cycles);
        self.aggregate = Some(aggregate);
        self.loader = Some(loader);
        self.patterns = patterns;
        self.det_loc = det_loc.to_string();
        self.refresh_flux_particles();
        self.refresh_max_energy();
        self.clear();

        info!(
            entries = num_entries,
            pots_per_nu = self.eff_pots_per_nu,
            max_energy = self.max_energy,
            max_weight = self.sampler.max_weight(),
            particles = %self.flux_particles,
            "flux driver ready"
        );
        Ok(())
    }

    /// Release every file of the chain. The driver must be loaded again before use.
    pub fn close(&mut self) {
        self.loader = None;
        self.aggregate = None;
        self.record = None;
        self.rejected_particles.clear();
        self.reset_current();
        self.traversal = Traversal::new(0, self.config.num_cycles, self.config.entry_reuse);
        self.end = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loader.is_some()
    }

    /// Rewind to the start of the stream and clear the running totals; files stay loaded.
    pub fn clear(&mut self) {
        self.traversal.reset();
        self.stats = FluxStatistics::default();
        self.record = None;
        self.reset_current();
        self.end = self.loader.is_none() || self.traversal.is_exhausted();
        self.sampler = RejectionSampler::new(self.aggregate.as_ref().map(|a| a.max_wgt).unwrap_or(0.0));
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    fn reset_current(&mut self) {
        self.kinematics = RayKinematics::default();
        self.weight = 0.0;
        self.valid = false;
    }

    /// Serve the next flux ray. `Ok(false)` means the stream has ended.
    pub fn generate_next(&mut self) -> Result<bool> {
        if self.loader.is_none() {
            return Err(FluxError::NotLoaded);
        }
        let mut guard = LivenessGuard::new(&self.traversal);
        loop {
            if self.end {
                self.reset_current();
                return Ok(false);
            }

            match self.generate_next_weighted()? {
                Outcome::Exhausted => return Ok(false),
                Outcome::SpeciesRejected => {
                    guard.species_rejected(&self.flux_particles, self.traversal.num_entries())?;
                    continue;
                }
                Outcome::Served => guard.species_accepted(),
            }

            if self.config.gen_weighted {
                return Ok(true);
            }
            if self.already_unweighted() {
                self.weight = 1.0;
                return Ok(true);
            }

            let w = self.weight;
            if let Some(bound) = self.sampler.observe(w) {
                self.stats.weight_bumps += 1;
                warn!(weight = w, new_max_weight = bound, "raising max weight estimate");
            }
            let draw: f64 = self.rng.gen();
            if self.sampler.accept(w, draw) {
                self.weight = 1.0;
                return Ok(true);
            }
            self.stats.draws_rejected += 1;
            guard.draw_rejected(self.sampler.max_weight());
        }
    }

    fn generate_next_weighted(&mut self) -> Result<Outcome> {
        self.reset_current();

        let step = match self.traversal.advance() {
            Some(step) => step,
            None => {
                self.end = true;
                return Ok(Outcome::Exhausted);
            }
        };
        self.stats.entries_read += 1;
        if self.traversal.is_exhausted() {
            self.end = true;
            info!(
                cycle = self.traversal.cycle(),
                cycles = self.traversal.num_cycles(),
                "reached the last flux entry of the last cycle"
            );
        }

        let index = self.traversal.index().unwrap_or(0);
        let reload = step.loads_entry() || self.record.as_ref().map(|r| r.index != index).unwrap_or(true);
        if reload {
            let loader = self.loader.as_ref().ok_or(FluxError::NotLoaded)?;
            self.record = Some(load_record(loader, index)?);
        }
        let entry = match &self.record {
            Some(record) => record.entry.clone(),
            None => return Err(FluxError::NotLoaded),
        };

        if !self.flux_particles.contains(entry.pdg) {
            self.stats.species_rejected += 1;
            if self.rejected_particles.push(entry.pdg) {
                warn!(
                    pdg = entry.pdg,
                    declared = %self.flux_particles,
                    "encountered neutrino species not in the flux particle list, rejecting it"
                );
            }
            return Ok(Outcome::SpeciesRejected);
        }

        if entry.e > self.max_energy {
            return Err(ConfigurationError::EnergyExceedsCap { energy: entry.e, cap: self.max_energy }.into());
        }
        self.check_meta_bounds(&entry);

        self.kinematics = RayKinematics::from_entry(&entry);
        if let Some(z0) = self.config.upstream_z {
            if !self.kinematics.move_to_z0(z0) {
                debug!(index = index, "entry has pz == 0, cannot move it to the upstream z");
            }
        }
        self.weight = entry.wgt;
        self.valid = true;

        self.stats.sum_weight += entry.wgt;
        self.stats.n_flux_neutrinos += 1;
        self.stats.accum_pots += self.eff_pots_per_nu;

        Ok(Outcome::Served)
    }

    /// Flag entries lying above the aggregated energy or weight bounds, once per stream each.
    fn check_meta_bounds(&mut self, entry: &FluxEntry) {
        let aggregate = match self.aggregate.as_mut() {
            Some(aggregate) => aggregate,
            None => return,
        };
        if entry.e > aggregate.max_energy {
            self.stats.energy_above_meta += 1;
            if self.stats.energy_above_meta == 1 {
                let issue = MetaIssue::EnergyAboveBound { energy: entry.e, bound: aggregate.max_energy };
                warn!(issue = %issue, "flux meta data understates the maximum energy");
                aggregate.issues.push(issue);
            }
        }
        if entry.wgt > aggregate.max_wgt {
            self.stats.weight_above_meta += 1;
            if self.stats.weight_above_meta == 1 {
                let issue = MetaIssue::WeightAboveBound { weight: entry.wgt, bound: aggregate.max_wgt };
                warn!(issue = %issue, "flux meta data understates the maximum weight");
                aggregate.issues.push(issue);
            }
        }
    }

    fn already_unweighted(&self) -> bool {
        self.aggregate.as_ref().map(|a| a.already_unweighted).unwrap_or(false)
    }

    fn refresh_flux_particles(&mut self) {
        self.flux_particles = match (&self.aggregate, self.config.flux_particles.is_empty()) {
            (Some(aggregate), true) => aggregate.pdglist.clone(),
            _ => PdgCodeList::from_codes(&self.config.flux_particles),
        };
    }

    fn refresh_max_energy(&mut self) {
        self.max_energy = match (self.config.max_energy, &self.aggregate) {
            (Some(cap), _) => cap,
            (None, Some(aggregate)) => aggregate.max_energy,
            (None, None) => 0.0,
        };
    }

    fn refresh_pots_per_nu(&mut self) {
        if let Some(aggregate) = &self.aggregate {
            self.eff_pots_per_nu = effective_pot_per_entry(aggregate, self.traversal.num_entries(), self.config.num_cycles);
        }
    }

    // configuration

    /// Takes effect with the next load.
    pub fn set_requested_branch_list(&mut self, branches: &str) -> Result<()> {
        BranchRequest::parse(branches)?;
        self.config.branches = branches.to_string();
        Ok(())
    }

    /// An empty list accepts whatever species the meta data declares.
    pub fn set_flux_particles(&mut self, particles: &[i32]) {
        self.config.flux_particles = particles.to_vec();
        self.refresh_flux_particles();
    }

    pub fn set_max_energy(&mut self, max_energy: f64) -> Result<()> {
        let candidate = FluxDriverConfig { max_energy: Some(max_energy), ..self.config.clone() };
        candidate.validate()?;
        self.config = candidate;
        self.refresh_max_energy();
        Ok(())
    }

    pub fn set_gen_weighted(&mut self, gen_weighted: bool) {
        self.config.gen_weighted = gen_weighted;
    }

    /// 0 cycles through the chain forever.
    pub fn set_num_of_cycles(&mut self, num_cycles: u64) {
        self.config.num_cycles = num_cycles;
        self.traversal.set_num_cycles(num_cycles);
        self.refresh_pots_per_nu();
        if self.loader.is_some() {
            self.end = self.traversal.is_exhausted();
        }
    }

    pub fn set_entry_reuse(&mut self, entry_reuse: u64) -> Result<()> {
        if entry_reuse < 1 {
            return Err(ConfigurationError::InvalidEntryReuse(entry_reuse).into());
        }
        self.config.entry_reuse = entry_reuse;
        self.traversal.set_entry_reuse(entry_reuse);
        if self.loader.is_some() {
            self.end = self.traversal.is_exhausted();
        }
        Ok(())
    }

    /// None serves rays at their recorded position.
    pub fn set_upstream_z(&mut self, z0: Option<f64>) {
        self.config.upstream_z = z0;
    }

    // current entry

    pub fn pdg_code(&self) -> i32 {
        match (&self.record, self.valid) {
            (Some(record), true) => record.entry.pdg,
            _ => 0,
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn momentum(&self) -> FourVector {
        self.kinematics.p4
    }

    pub fn position(&self) -> FourVector {
        self.kinematics.x4
    }

    pub fn end(&self) -> bool {
        self.end
    }

    /// Global index of the current entry, None before the first entry was read.
    pub fn index(&self) -> Option<u64> {
        self.traversal.index()
    }

    pub fn cycle(&self) -> u64 {
        self.traversal.cycle()
    }

    pub fn phase(&self) -> TraversalPhase {
        self.traversal.phase()
    }

    pub fn current_entry(&self) -> Option<&FluxEntry> {
        self.current_record().map(|r| &r.entry)
    }

    pub fn current_parent(&self) -> Option<&FluxParent> {
        self.current_record().and_then(|r| r.parent.as_ref())
    }

    pub fn current_aux(&self) -> Option<&FluxAux> {
        self.current_record().and_then(|r| r.aux.as_ref())
    }

    /// Meta block of the current entry's file whose key matches the entry, else the file's first.
    pub fn current_meta(&self) -> Option<&FluxMeta> {
        let record = self.current_record()?;
        let metas = self.loader.as_ref()?.file_metas(record.file);
        metas.iter().find(|m| m.metakey == record.entry.metakey).or(metas.first())
    }

    fn current_record(&self) -> Option<&LoadedRecord> {
        match self.valid {
            true => self.record.as_ref(),
            false => None,
        }
    }

    /// Distance from the parent decay to the current ray origin.
    pub fn decay_dist(&self) -> f64 {
        self.kinematics.dist
    }

    /// Move the current ray origin along its momentum to z == z0.
    pub fn move_to_z0(&mut self, z0: f64) -> bool {
        self.valid && self.kinematics.move_to_z0(z0)
    }

    // chain wide information

    pub fn flux_particles(&self) -> &PdgCodeList {
        &self.flux_particles
    }

    /// Species seen in the files but rejected by the flux particle list.
    pub fn rejected_particles(&self) -> &PdgCodeList {
        &self.rejected_particles
    }

    pub fn max_energy(&self) -> f64 {
        self.max_energy
    }

    pub fn max_weight(&self) -> f64 {
        self.sampler.max_weight()
    }

    pub fn n_flux_neutrinos(&self) -> u64 {
        self.stats.n_flux_neutrinos
    }

    pub fn sum_weight(&self) -> f64 {
        self.stats.sum_weight
    }

    /// Protons-on-target consumed so far.
    ///
    /// Only entries passing the species filter count, so with a restrictive filter a
    /// full pass reports the accepted species' share of the chain's POT. Use
    /// `pots_per_nu` together with `statistics().entries_read` for the exposure of
    /// every entry read.
    pub fn used_pots(&self) -> f64 {
        self.stats.accum_pots
    }

    pub fn pots_per_nu(&self) -> f64 {
        self.eff_pots_per_nu
    }

    pub fn statistics(&self) -> FluxStatistics {
        self.stats
    }

    pub fn aggregate(&self) -> Option<&MetaAggregate> {
        self.aggregate.as_ref()
    }

    pub fn num_entries(&self) -> u64 {
        self.traversal.num_entries()
    }

    pub fn file_list(&self) -> Vec<String> {
        self.loader.as_ref().map(|l| l.file_list()).unwrap_or_default()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &FluxDriverConfig {
        &self.config
    }

    /// Three points of the flux window plane: base, base + dir1, base + dir2.
    pub fn flux_window(&self) -> Option<(Vector3<f64>, Vector3<f64>, Vector3<f64>)> {
        self.aggregate.as_ref().and_then(|a| a.window).map(|w| w.points())
    }

    pub fn describe_current(&self) -> String {
        let record = match self.current_record() {
            Some(record) => record,
            None => return "no current flux entry".to_string(),
        };
        let mut lines = vec![
            format!("entry {} (file {}, cycle {}, use {})", record.index, record.file, self.traversal.cycle(), self.traversal.reuse_count()),
            format!("  {}", record.entry),
            format!("  weight {}  p4 {:?}  x4 {:?}", self.weight, self.kinematics.p4.to_array(), self.kinematics.x4.to_array()),
        ];
        if let Some(parent) = &record.parent {
            lines.push(format!("  {}", parent));
        }
        if let Some(aux) = &record.aux {
            lines.push(format!("  {}", aux));
        }
        lines.join("\n")
    }

    pub fn describe_config(&self) -> String {
        let mut lines = vec![
            "SimpleFluxDriver configuration".to_string(),
            format!("  det_loc:         {}", self.det_loc),
            format!("  patterns:        {}", self.patterns.join(", ")),
            format!("  branches:        {}", self.config.branches),
            format!("  flux particles:  {}", self.flux_particles),
            format!("  max energy:      {}", self.max_energy),
            format!("  gen weighted:    {}", self.config.gen_weighted),
            format!("  cycles:          {} (0 = unbounded)", self.config.num_cycles),
            format!("  entry reuse:     {}", self.config.entry_reuse),
            format!("  upstream z:      {:?}", self.config.upstream_z),
            format!("  seed:            {}", self.seed),
            format!("  entries:         {}", self.traversal.num_entries()),
            format!("  pots per nu:     {}", self.eff_pots_per_nu),
            format!("  max weight:      {}", self.sampler.max_weight()),
        ];
        if let Some(aggregate) = &self.aggregate {
            lines.push(format!("  total pots:      {}", aggregate.total_pot));
            lines.push(format!("  all files meta:  {}", aggregate.all_files_meta));
            lines.push(format!("  unweighted:      {}", aggregate.already_unweighted));
        }
        lines.push(format!("  stream:          {} (end = {})", self.traversal.phase(), self.end));
        lines.push(format!("  rejected:        {}", self.rejected_particles));
        let files = self.file_list();
        lines.push(format!("  files:           {}", files.len()));
        for name in files.iter().take(self.config.max_file_print) {
            lines.push(format!("    {}", name));
        }
        if let Some(meta) = self.current_meta() {
            lines.push(meta.describe(self.config.max_file_print));
        }
        lines.join("\n")
    }
}

/// Fold the meta data of every file, scanning the entries when it is incomplete.
fn process_meta(loader: &FluxDataLoader) -> Result<MetaAggregate> {
    let mut aggregator = MetaAggregator::new();
    for file in 0..loader.num_files() {
        aggregator.add_file(file, loader.file_metas(file));
    }
    if aggregator.needs_entry_scan() {
        warn!(entries = loader.num_entries(), "not all flux files carry meta data, scanning entries");
        for index in 0..loader.num_entries() {
            aggregator.scan_entry(&loader.get_entry(index)?);
        }
    }
    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::writer::FluxFileWriter;
    use proptest::prelude::*;
    use std::path::Path;

    const WINDOW: ([f64; 3], [f64; 3], [f64; 3]) = ([-1.0, -1.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 0.0]);

    fn entry(pdg: i32, wgt: f64, e: f64) -> FluxEntry {
        FluxEntry::new(wgt, 0.1, 0.2, 0.0, 500.0, 0.0, 0.6 * e, 0.8 * e, e, pdg, 0)
    }

    fn mem_file(name: &str, entries: Vec<FluxEntry>, protons: f64) -> InMemoryFluxFile {
        let meta = FluxFileWriter::meta_for(&entries, protons, WINDOW, 0);
        InMemoryFluxFile::new(name, entries, vec![meta])
    }

    fn driver(config: FluxDriverConfig, files: Vec<InMemoryFluxFile>) -> SimpleFluxDriver {
        let mut driver = SimpleFluxDriver::new(FluxDriverConfig { branches: "entry".to_string(), ..config }).unwrap();
        driver.load_files(files, "test").unwrap();
        driver
    }

    fn drain(driver: &mut SimpleFluxDriver, limit: usize) -> Vec<(u64, i32, f64)> {
        let mut served = Vec::new();
        while !driver.end() && served.len() < limit {
            if driver.generate_next().unwrap() {
                served.push((driver.index().unwrap(), driver.pdg_code(), driver.weight()));
            }
        }
        served
    }

    fn write_db(dir: &Path, name: &str, n: usize, protons: f64) -> PathBuf {
        let path = dir.join(name);
        let entries: Vec<FluxEntry> = (0..n).map(|i| entry(14, 1.0, 1.0 + (i % 7) as f64)).collect();
        let mut writer = FluxFileWriter::create(&path).unwrap();
        writer.append_entries(&entries).unwrap();
        writer.write_meta(&FluxFileWriter::meta_for(&entries, protons, WINDOW, 0)).unwrap();
        path
    }

    #[test]
    fn test_two_sqlite_files_single_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), "flux_a.db", 100, 1.0e18);
        write_db(dir.path(), "flux_b.db", 50, 5.0e17);
        let pattern = dir.path().join("flux_*.db").to_string_lossy().to_string();

        for in_memory in [false, true] {
            let config = FluxDriverConfig { branches: "entry".to_string(), in_memory, seed: Some(1), ..Default::default() };
            let mut driver = SimpleFluxDriver::new(config).unwrap();
            driver.load_beam_sim_data(&[pattern.as_str()], "near").unwrap();
            assert_eq!(driver.file_list().len(), 2);
            assert_eq!(driver.aggregate().unwrap().total_pot, 1.5e18);

            let mut advances = 0;
            while !driver.end() {
                assert!(driver.generate_next().unwrap());
                advances += 1;
            }
            assert_eq!(advances, 150);
            assert!(!driver.generate_next().unwrap());
            assert!((driver.used_pots() - 1.5e18).abs() < 1.0e6);
        }
    }

    #[test]
    fn test_species_filter_rejects_and_records() {
        let entries = vec![entry(14, 1.0, 1.0), entry(-14, 1.0, 1.0), entry(12, 1.0, 1.0), entry(14, 1.0, 2.0)];
        let config = FluxDriverConfig { flux_particles: vec![14], gen_weighted: true, ..Default::default() };
        let mut driver = driver(config, vec![mem_file("f", entries, 4.0)]);
        let served = drain(&mut driver, 100);
        assert_eq!(served.len(), 2);
        assert!(served.iter().all(|(_, pdg, _)| *pdg == 14));
        assert_eq!(driver.rejected_particles().sorted(), vec![-14, 12]);
        assert_eq!(driver.statistics().species_rejected, 2);
    }

    #[test]
    fn test_entry_reuse_single_record() {
        let config = FluxDriverConfig { entry_reuse: 3, gen_weighted: true, ..Default::default() };
        let mut driver = driver(config, vec![mem_file("f", vec![entry(14, 0.7, 3.0)], 1.0)]);
        for _ in 0..3 {
            assert!(!driver.end());
            assert!(driver.generate_next().unwrap());
            assert_eq!(driver.index(), Some(0));
            assert_eq!(driver.weight(), 0.7);
        }
        assert!(driver.end());
    }

    #[test]
    fn test_unweighted_at_max_weight_always_accepted() {
        let entries = vec![entry(14, 2.0, 1.0), entry(14, 1.0, 1.0)];
        let mut driver = driver(FluxDriverConfig { num_cycles: 0, seed: Some(9), ..Default::default() }, vec![mem_file("f", entries, 1.0)]);
        assert_eq!(driver.max_weight(), 2.0);
        for _ in 0..200 {
            assert!(driver.generate_next().unwrap());
            assert_eq!(driver.weight(), 1.0);
        }
        // every pass offers the weight 2 entry, which can never be rejected
        let stats = driver.statistics();
        assert!(stats.draws_rejected < stats.entries_read);
    }

    #[test]
    fn test_rejection_sampling_frequency() {
        let entries = vec![entry(14, 2.0, 1.0), entry(12, 0.5, 1.0)];
        let mut driver = driver(FluxDriverConfig { num_cycles: 0, seed: Some(3), ..Default::default() }, vec![mem_file("f", entries, 1.0)]);
        let mut n_mu = 0;
        let mut n_e = 0;
        for _ in 0..5000 {
            assert!(driver.generate_next().unwrap());
            match driver.pdg_code() {
                14 => n_mu += 1,
                _ => n_e += 1,
            }
        }
        // acceptance ratio 1 : 0.25
        let ratio = n_e as f64 / n_mu as f64;
        assert!((ratio - 0.25).abs() < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn test_understated_max_weight_is_raised() {
        let entries = vec![entry(14, 0.5, 1.0), entry(14, 3.0, 1.0)];
        let mut meta = FluxFileWriter::meta_for(&entries, 1.0, WINDOW, 0);
        meta.max_wgt = 1.0;
        let file = InMemoryFluxFile::new("f", entries, vec![meta]);
        let mut driver = driver(FluxDriverConfig { num_cycles: 0, seed: Some(2), ..Default::default() }, vec![file]);
        assert_eq!(driver.max_weight(), 1.0);
        for _ in 0..50 {
            assert!(driver.generate_next().unwrap());
        }
        assert!((driver.max_weight() - 3.03).abs() < 1e-12);
        assert_eq!(driver.statistics().weight_bumps, 1);
        assert_eq!(driver.aggregate().unwrap().issues, vec![MetaIssue::WeightAboveBound { weight: 3.0, bound: 1.0 }]);
        driver.clear();
        assert_eq!(driver.max_weight(), 1.0);
    }

    #[test]
    fn test_weighted_mode_flags_weight_above_meta() {
        let entries = vec![entry(14, 0.5, 1.0), entry(14, 3.0, 1.0)];
        let mut meta = FluxFileWriter::meta_for(&entries, 1.0, WINDOW, 0);
        meta.max_wgt = 1.0;
        let file = InMemoryFluxFile::new("f", entries, vec![meta]);
        let mut driver = driver(FluxDriverConfig { gen_weighted: true, ..Default::default() }, vec![file]);
        let weights: Vec<f64> = drain(&mut driver, 10).into_iter().map(|(_, _, w)| w).collect();
        assert_eq!(weights, vec![0.5, 3.0]);
        assert_eq!(driver.max_weight(), 1.0);
        assert_eq!(driver.statistics().weight_above_meta, 1);
        assert_eq!(driver.statistics().weight_bumps, 0);
        assert_eq!(driver.aggregate().unwrap().issues, vec![MetaIssue::WeightAboveBound { weight: 3.0, bound: 1.0 }]);
    }

    #[test]
    fn test_energy_above_meta_within_cap_is_recorded() {
        let entries = vec![entry(14, 1.0, 1.0), entry(14, 1.0, 5.0), entry(14, 1.0, 6.0)];
        let mut meta = FluxFileWriter::meta_for(&entries, 1.0, WINDOW, 0);
        meta.max_energy = 2.0;
        let file = InMemoryFluxFile::new("f", entries, vec![meta]);
        let config = FluxDriverConfig { max_energy: Some(10.0), gen_weighted: true, ..Default::default() };
        let mut driver = driver(config, vec![file]);
        assert_eq!(drain(&mut driver, 10).len(), 3);
        assert_eq!(driver.statistics().energy_above_meta, 2);
        assert_eq!(driver.aggregate().unwrap().issues, vec![MetaIssue::EnergyAboveBound { energy: 5.0, bound: 2.0 }]);
    }

    #[test]
    fn test_used_pots_counts_accepted_species_only() {
        let entries = vec![entry(14, 1.0, 1.0), entry(12, 1.0, 1.0), entry(14, 1.0, 1.0), entry(-14, 1.0, 1.0)];
        let config = FluxDriverConfig { flux_particles: vec![14], ..Default::default() };
        let mut driver = driver(config, vec![mem_file("f", entries, 8.0)]);
        assert_eq!(drain(&mut driver, 10).len(), 2);
        assert_eq!(driver.pots_per_nu(), 2.0);
        assert_eq!(driver.used_pots(), 4.0);
        assert_eq!(driver.used_pots(), driver.pots_per_nu() * driver.n_flux_neutrinos() as f64);
        assert_eq!(driver.pots_per_nu() * driver.statistics().entries_read as f64, 8.0);
    }

    #[test]
    fn test_already_unweighted_pot_round_trip() {
        let entries: Vec<FluxEntry> = (0..10).map(|i| entry(14, 1.0, 1.0 + i as f64)).collect();
        let mut driver = driver(FluxDriverConfig { seed: Some(5), ..Default::default() }, vec![mem_file("f", entries, 1.0e16)]);
        assert!(driver.aggregate().unwrap().already_unweighted);
        let served = drain(&mut driver, 100);
        assert_eq!(served.len(), 10);
        assert_eq!(driver.statistics().draws_rejected, 0);
        let expected = driver.pots_per_nu() * driver.n_flux_neutrinos() as f64;
        assert!((driver.used_pots() - expected).abs() <= 1.0e-9 * expected);
        assert!((driver.used_pots() - 1.0e16).abs() <= 1.0e4);
    }

    #[test]
    fn test_clear_reproduces_sequence() {
        let entries: Vec<FluxEntry> = (0..20).map(|i| entry(if i % 3 == 0 { 12 } else { 14 }, 0.1 + i as f64 / 10.0, 1.0)).collect();
        let mut driver = driver(FluxDriverConfig { num_cycles: 3, seed: Some(77), ..Default::default() }, vec![mem_file("f", entries, 1.0)]);
        let first = drain(&mut driver, 1000);
        let first_pots = driver.used_pots();
        driver.clear();
        assert!(!driver.end());
        assert_eq!(driver.n_flux_neutrinos(), 0);
        assert_eq!(driver.used_pots(), 0.0);
        let second = drain(&mut driver, 1000);
        assert_eq!(first, second);
        assert_eq!(first_pots, driver.used_pots());
    }

    #[test]
    fn test_energy_cap_is_fatal() {
        let entries = vec![entry(14, 1.0, 5.0), entry(14, 1.0, 50.0)];
        let config = FluxDriverConfig { max_energy: Some(10.0), gen_weighted: true, ..Default::default() };
        let mut driver = driver(config, vec![mem_file("f", entries, 1.0)]);
        assert!(driver.generate_next().unwrap());
        let err = driver.generate_next().unwrap_err();
        assert!(matches!(err, FluxError::Configuration(ConfigurationError::EnergyExceedsCap { .. })));
    }

    #[test]
    fn test_unbounded_without_acceptable_species_fails() {
        let config = FluxDriverConfig { flux_particles: vec![16], num_cycles: 0, ..Default::default() };
        let mut driver = driver(config, vec![mem_file("f", vec![entry(14, 1.0, 1.0), entry(12, 1.0, 1.0)], 1.0)]);
        let err = driver.generate_next().unwrap_err();
        assert!(matches!(err, FluxError::Configuration(ConfigurationError::NoAcceptableSpecies { entries: 2, .. })));
    }

    #[test]
    fn test_unbounded_never_ends() {
        let mut driver = driver(
            FluxDriverConfig { num_cycles: 0, gen_weighted: true, ..Default::default() },
            vec![mem_file("f", vec![entry(14, 1.0, 1.0), entry(14, 1.0, 2.0), entry(14, 1.0, 3.0)], 3.0)],
        );
        for i in 0..31u64 {
            assert!(driver.generate_next().unwrap());
            assert_eq!(driver.index(), Some(i % 3));
            assert!(!driver.end());
        }
        assert_eq!(driver.cycle(), 11);
        // unbounded cycling accounts a single pass worth of POT per entry
        assert_eq!(driver.pots_per_nu(), 1.0);
    }

    #[test]
    fn test_cycles_scale_pots_per_nu() {
        let entries: Vec<FluxEntry> = (0..4).map(|_| entry(14, 1.0, 1.0)).collect();
        let mut driver = driver(FluxDriverConfig { num_cycles: 2, ..Default::default() }, vec![mem_file("f", entries, 8.0)]);
        assert_eq!(driver.pots_per_nu(), 1.0);
        assert_eq!(drain(&mut driver, 100).len(), 8);
        assert_eq!(driver.used_pots(), 8.0);
        driver.set_num_of_cycles(4);
        assert_eq!(driver.pots_per_nu(), 0.5);
    }

    #[test]
    fn test_missing_meta_falls_back_to_scan() {
        let with_meta = mem_file("a", vec![entry(14, 1.0, 2.0)], 10.0);
        let without_meta = InMemoryFluxFile::new("b", vec![entry(-12, 3.0, 40.0)], Vec::new());
        let driver = driver(FluxDriverConfig::default(), vec![with_meta, without_meta]);
        let aggregate = driver.aggregate().unwrap();
        assert!(!aggregate.all_files_meta);
        assert_eq!(aggregate.issues, vec![MetaIssue::MissingMeta { file: 1 }]);
        assert_eq!(driver.max_energy(), 40.0);
        assert_eq!(driver.max_weight(), 3.0);
        assert_eq!(driver.flux_particles().sorted(), vec![-12, 14]);
        assert_eq!(driver.pots_per_nu(), 1.0);
    }

    #[test]
    fn test_upstream_z_moves_ray() {
        let config = FluxDriverConfig { upstream_z: Some(-8.0), gen_weighted: true, ..Default::default() };
        let mut driver = driver(config, vec![mem_file("f", vec![entry(14, 1.0, 10.0)], 1.0)]);
        assert!(driver.generate_next().unwrap());
        // p = (0, 6, 8), scale = -1, path length 10
        let x4 = driver.position();
        assert!((x4.y() - (0.2 - 6.0)).abs() < 1e-12);
        assert_eq!(x4.z(), -8.0);
        assert!((driver.decay_dist() - 490.0).abs() < 1e-9);
        assert!((x4.t() - 490.0).abs() < 1e-9);
        let p4 = driver.momentum();
        assert!((p4.y() - 6.0).abs() < 1e-12 && (p4.z() - 8.0).abs() < 1e-12);
        assert_eq!(p4.t(), 10.0);
    }

    #[test]
    fn test_current_meta_and_window() {
        let mut meta_a = FluxFileWriter::meta_for(&[entry(14, 1.0, 1.0)], 1.0, WINDOW, 0);
        meta_a.seed = 11;
        let mut meta_b = meta_a.clone();
        meta_b.metakey = 5;
        meta_b.seed = 22;
        let mut e = entry(14, 1.0, 1.0);
        e.metakey = 5;
        let file = InMemoryFluxFile::new("f", vec![entry(14, 1.0, 1.0), e], vec![meta_a, meta_b]);
        let mut driver = driver(FluxDriverConfig { gen_weighted: true, ..Default::default() }, vec![file]);
        assert!(driver.current_meta().is_none());
        driver.generate_next().unwrap();
        assert_eq!(driver.current_meta().unwrap().seed, 11);
        driver.generate_next().unwrap();
        assert_eq!(driver.current_meta().unwrap().seed, 22);

        let (p1, p2, p3) = driver.flux_window().unwrap();
        assert_eq!(p1, Vector3::new(-1.0, -1.0, 0.0));
        assert_eq!(p2, Vector3::new(1.0, -1.0, 0.0));
        assert_eq!(p3, Vector3::new(-1.0, 1.0, 0.0));
        assert!(driver.describe_config().contains("entry reuse"));
        assert!(driver.describe_current().starts_with("entry 1"));
    }

    #[test]
    fn test_optional_groups_follow_presence() {
        let mut file = mem_file("f", vec![entry(14, 1.0, 1.0)], 1.0);
        file.parents = Some(vec![FluxParent { ptype: 211, ..Default::default() }]);
        let mut driver = SimpleFluxDriver::new(FluxDriverConfig { branches: "entry,numi".to_string(), gen_weighted: true, ..Default::default() }).unwrap();
        driver.load_files(vec![file], "test").unwrap();
        driver.generate_next().unwrap();
        assert_eq!(driver.current_parent().unwrap().ptype, 211);
        assert!(driver.current_aux().is_none());
    }

    #[test]
    fn test_current_entry_and_aux_serialize() {
        let mut file = mem_file("f", vec![entry(14, 1.0, 1.0)], 1.0);
        file.aux = Some(vec![FluxAux::new(vec![7, 8], vec![0.25])]);
        let config = FluxDriverConfig { branches: "entry,aux".to_string(), gen_weighted: true, ..Default::default() };
        let mut driver = SimpleFluxDriver::new(config).unwrap();
        driver.load_files(vec![file], "test").unwrap();
        assert!(driver.current_entry().is_none());
        assert!(driver.current_aux().is_none());

        driver.generate_next().unwrap();
        let aux: FluxAux = serde_json::from_str(&serde_json::to_string(driver.current_aux().unwrap()).unwrap()).unwrap();
        assert_eq!(aux, FluxAux::new(vec![7, 8], vec![0.25]));
        let entry_json = serde_json::to_string(driver.current_entry().unwrap()).unwrap();
        assert!(entry_json.contains("\"pdg\":14"));
        assert!(driver.current_parent().is_none());
    }

    #[test]
    fn test_load_errors() {
        let mut driver = SimpleFluxDriver::new(FluxDriverConfig { branches: "entry".to_string(), ..Default::default() }).unwrap();
        assert!(matches!(driver.generate_next(), Err(FluxError::NotLoaded)));

        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.db").to_string_lossy().to_string();
        let err = driver.load_beam_sim_data(&[pattern], "far").unwrap_err();
        assert!(matches!(err, FluxError::Load(LoadError::NoFilesResolved { .. })));
        assert!(!driver.is_loaded());

        let err = driver.load_files(vec![InMemoryFluxFile::new("empty", Vec::new(), Vec::new())], "far").unwrap_err();
        assert!(matches!(err, FluxError::Load(LoadError::NoEntries)));
        assert!(driver.end());

        driver.set_num_of_cycles(0);
        assert!(driver.end());
        assert_eq!(driver.phase(), TraversalPhase::Exhausted);
        assert!(matches!(driver.generate_next(), Err(FluxError::NotLoaded)));

        driver.set_requested_branch_list("entry,aux").unwrap();
        let err = driver.load_files(vec![InMemoryFluxFile::new("bare", vec![entry(14, 1.0, 1.0)], Vec::new())], "far").unwrap_err();
        assert!(matches!(err, FluxError::Load(LoadError::MissingBranch { .. })));
    }

    #[test]
    fn test_invalid_settings() {
        let mut driver = SimpleFluxDriver::new(FluxDriverConfig::default()).unwrap();
        assert!(driver.set_entry_reuse(0).is_err());
        assert!(driver.set_max_energy(0.0).is_err());
        assert!(driver.set_requested_branch_list("entry,bogus").is_err());
        assert!(SimpleFluxDriver::new(FluxDriverConfig { entry_reuse: 0, ..Default::default() }).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_served_species_in_filter(
            pdgs in proptest::collection::vec(prop_oneof![Just(12), Just(-12), Just(14), Just(-14)], 1..30),
            accept in proptest::collection::vec(prop_oneof![Just(12), Just(-12), Just(14), Just(-14)], 1..4),
            weighted in any::<bool>(),
        ) {
            let entries: Vec<FluxEntry> = pdgs.iter().enumerate().map(|(i, &p)| entry(p, 0.5 + (i % 3) as f64, 1.0)).collect();
            let config = FluxDriverConfig { flux_particles: accept.clone(), gen_weighted: weighted, seed: Some(1), ..Default::default() };
            let mut driver = driver(config, vec![mem_file("f", entries, 1.0)]);
            for (_, pdg, _) in drain(&mut driver, 1000) {
                prop_assert!(accept.contains(&pdg));
            }
            for rejected in driver.rejected_particles().iter() {
                prop_assert!(!accept.contains(rejected));
            }
        }

        #[test]
        fn prop_bounded_stream_length(n in 1usize..20, cycles in 1u64..4, reuse in 1u64..4) {
            let entries: Vec<FluxEntry> = (0..n).map(|_| entry(14, 1.0, 1.0)).collect();
            let config = FluxDriverConfig { num_cycles: cycles, entry_reuse: reuse, gen_weighted: true, ..Default::default() };
            let mut driver = driver(config, vec![mem_file("f", entries, 1.0)]);
            let served = drain(&mut driver, 10_000);
            prop_assert_eq!(served.len() as u64, cycles * n as u64 * reuse);
            prop_assert_eq!(driver.statistics().entries_read, cycles * n as u64 * reuse);
        }
    }

    #[test]
    fn test_meta_for_helper_bounds() {
        let meta = FluxFileWriter::meta_for(&[entry(14, 0.2, 3.0), entry(12, 4.0, 1.0)], 2.0, WINDOW, 1);
        assert_eq!(meta.max_wgt, 4.0);
        assert_eq!(meta.min_wgt, 0.2);
        assert_eq!(meta.max_energy, 3.0);
    }
}
