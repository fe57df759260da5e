//! Command line front end of the simple flux driver.
//!
//! ```bash
//! # write a small synthetic flux file
//! fluxdf synth flux_000.db --entries 10000 --seed 7
//!
//! # serve unweighted muon neutrinos from every matching file
//! fluxdf run 'flux_*.db' --species 14 -n 1000
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use fluxcore::data::entry::{FluxAux, FluxEntry, FluxParent};
use fluxcore::data::pdg::ALL_NEUTRINOS;
use fluxdf::data::writer::FluxFileWriter;
use fluxdf::error::Result;
use fluxdf::flux::config::FluxDriverConfig;
use fluxdf::flux::driver::SimpleFluxDriver;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

#[derive(Parser)]
#[command(name = "fluxdf")]
#[command(author, version, about = "Serve neutrino flux rays from simple flux files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load flux files and serve entries from them.
    Run {
        /// File names or patterns; wildcards are allowed in the file name only.
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Detector location label.
        #[arg(long, default_value = "detector")]
        det_loc: String,

        /// JSON driver configuration; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Requested branches, e.g. "entry,numi,aux".
        #[arg(long)]
        branches: Option<String>,

        /// Accepted neutrino species, comma separated PDG codes.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        species: Option<Vec<i32>>,

        #[arg(long)]
        max_energy: Option<f64>,

        /// Serve entries with their native weight.
        #[arg(long)]
        weighted: bool,

        /// Passes over the chain, 0 cycles forever.
        #[arg(long)]
        cycles: Option<u64>,

        #[arg(long)]
        reuse: Option<u64>,

        #[arg(long, allow_hyphen_values = true)]
        upstream_z: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,

        /// Read the whole chain into memory.
        #[arg(long)]
        in_memory: bool,

        /// Stop after this many served entries.
        #[arg(short, long)]
        n: Option<u64>,

        /// Print every served entry.
        #[arg(long)]
        print: bool,
    },

    /// Write a synthetic flux file.
    Synth {
        path: PathBuf,

        #[arg(long, default_value = "1000")]
        entries: usize,

        #[arg(long, default_value = "1e17")]
        protons: f64,

        #[arg(long, default_value = "20.0")]
        max_energy: f64,

        /// Write weight 1 for every entry.
        #[arg(long)]
        unweighted: bool,

        /// Stored in the file's meta block, so it must fit a non-negative i32.
        #[arg(long, default_value = "1", value_parser = clap::value_parser!(i32).range(0..))]
        seed: i32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            patterns,
            det_loc,
            config,
            branches,
            species,
            max_energy,
            weighted,
            cycles,
            reuse,
            upstream_z,
            seed,
            in_memory,
            n,
            print,
        } => {
            let mut config = match config {
                Some(path) => FluxDriverConfig::from_json_file(&path)?,
                None => FluxDriverConfig::default(),
            };
            if let Some(branches) = branches {
                config.branches = branches;
            }
            if let Some(species) = species {
                config.flux_particles = species;
            }
            config.max_energy = max_energy.or(config.max_energy);
            config.gen_weighted |= weighted;
            config.num_cycles = cycles.unwrap_or(config.num_cycles);
            config.entry_reuse = reuse.unwrap_or(config.entry_reuse);
            config.upstream_z = upstream_z.or(config.upstream_z);
            config.seed = seed.or(config.seed);
            config.in_memory |= in_memory;
            run(config, &patterns, &det_loc, n, print)
        }
        Commands::Synth { path, entries, protons, max_energy, unweighted, seed } => {
            synth(&path, entries, protons, max_energy, unweighted, seed)
        }
    }
}

fn run(config: FluxDriverConfig, patterns: &[String], det_loc: &str, limit: Option<u64>, print: bool) -> Result<()> {
    if config.num_cycles == 0 && limit.is_none() {
        info!("cycling forever, stop with ctrl-c or pass -n");
    }
    let mut driver = SimpleFluxDriver::new(config)?;
    driver.load_beam_sim_data(patterns, det_loc)?;
    println!("{}", driver.describe_config());

    let mut served = 0u64;
    while !driver.end() && limit.map(|l| served < l).unwrap_or(true) {
        if !driver.generate_next()? {
            break;
        }
        served += 1;
        if print {
            println!("{}", driver.describe_current());
        }
    }

    let stats = driver.statistics();
    println!("served:            {}", served);
    println!("flux neutrinos:    {}", stats.n_flux_neutrinos);
    println!("sum of weights:    {}", stats.sum_weight);
    println!("used POT:          {:e}", driver.used_pots());
    println!("entries read:      {}", stats.entries_read);
    println!("species rejected:  {}", stats.species_rejected);
    println!("draws rejected:    {}", stats.draws_rejected);
    println!("max weight bumps:  {}", stats.weight_bumps);
    if !driver.rejected_particles().is_empty() {
        println!("rejected species:  {}", driver.rejected_particles());
    }
    Ok(())
}

/// Rays aimed from a 2 m x 2 m window at z = 0 along +z, parents decaying 50 to 700 m upstream.
fn synth(path: &Path, n: usize, protons: f64, max_energy: f64, unweighted: bool, seed: i32) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(u64::from(seed.unsigned_abs()));
    let mut entries = Vec::with_capacity(n);
    let mut parents = Vec::with_capacity(n);
    let mut auxes = Vec::with_capacity(n);

    for i in 0..n {
        let pdg = ALL_NEUTRINOS[rng.gen_range(0..4)];
        let e = rng.gen_range(0.1..max_energy);
        let (tx, ty) = (rng.gen_range(-0.01..0.01), rng.gen_range(-0.01..0.01));
        let norm = (1.0f64 + tx * tx + ty * ty).sqrt();
        let wgt = match unweighted {
            true => 1.0,
            false => rng.gen_range(0.05..2.0),
        };
        let dist = rng.gen_range(50.0..700.0);
        entries.push(FluxEntry::new(
            wgt,
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            0.0,
            dist,
            e * tx / norm,
            e * ty / norm,
            e / norm,
            e,
            pdg,
            0,
        ));
        parents.push(FluxParent {
            vz: -dist,
            ptype: if rng.gen_bool(0.8) { 211 } else { 321 },
            ndecay: rng.gen_range(11..15),
            run: 1,
            evtno: i as i32,
            entryno: i as i32,
            ..Default::default()
        });
        auxes.push(FluxAux::new(vec![i as i32], vec![rng.gen::<f64>()]));
    }

    let mut meta = FluxFileWriter::meta_for(&entries, protons, ([-1.0, -1.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 0.0]), 0);
    meta.auxintname = vec!["entry".to_string()];
    meta.auxdblname = vec!["random".to_string()];
    meta.infiles = vec![path.display().to_string()];
    meta.seed = seed;

    let mut writer = FluxFileWriter::create(path)?;
    writer.append_entries(&entries)?;
    writer.append_parents(&parents)?;
    writer.append_aux(&auxes)?;
    writer.write_meta(&meta)?;
    info!(file = %path.display(), entries = n, protons = protons, "wrote synthetic flux file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_seed(args: &[&str]) -> std::result::Result<i32, clap::Error> {
        let mut argv = vec!["fluxdf", "synth", "out.db"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        match cli.command {
            Commands::Synth { seed, .. } => Ok(seed),
            Commands::Run { .. } => unreachable!(),
        }
    }

    #[test]
    fn test_synth_seed_range() {
        assert_eq!(synth_seed(&[]).unwrap(), 1);
        assert_eq!(synth_seed(&["--seed", "2147483647"]).unwrap(), i32::MAX);
        assert!(synth_seed(&["--seed", "2147483648"]).is_err());
        assert!(synth_seed(&["--seed", "-3"]).is_err());
    }

    #[test]
    fn test_synth_file_is_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synth.db");
        synth(&path, 25, 1.0e17, 20.0, false, 7).unwrap();

        let config = FluxDriverConfig { gen_weighted: true, ..Default::default() };
        let mut driver = SimpleFluxDriver::new(config).unwrap();
        driver.load_beam_sim_data(&[path.to_string_lossy().to_string()], "test").unwrap();
        assert_eq!(driver.num_entries(), 25);
        assert_eq!(driver.aggregate().unwrap().issues, Vec::new());
        driver.generate_next().unwrap();
        assert!(driver.current_meta().is_some_and(|m| m.seed == 7));
    }
}
