use std::path::{Path, PathBuf};

use fluxcore::data::entry::{FluxAux, FluxEntry, FluxParent};
use fluxcore::data::meta::FluxMeta;
use rusqlite::{params, Connection};

use crate::data::sql::{CREATE_AUX, CREATE_ENTRY, CREATE_META, CREATE_NUMI};
use crate::error::{FluxError, Result};

/// Writes simple flux files in the layout read by the flux loaders.
///
/// Only the `entry` table is created up front; the optional tables appear with
/// their first row, so a file without parent or aux information simply lacks them.
#[derive(Debug)]
pub struct FluxFileWriter {
    path: PathBuf,
    connection: Connection,
}

impl FluxFileWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let connection = Connection::open(path).map_err(|e| write_error(path, e))?;
        connection.execute(CREATE_ENTRY, []).map_err(|e| write_error(path, e))?;
        Ok(FluxFileWriter { path: path.to_path_buf(), connection })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_entries(&mut self, entries: &[FluxEntry]) -> Result<()> {
        let path = self.path.clone();
        let tx = self.connection.transaction().map_err(|e| write_error(&path, e))?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO entry (wgt, vtxx, vtxy, vtxz, dist, px, py, pz, E, pdg, metakey) \
                          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)")
                .map_err(|e| write_error(&path, e))?;
            for e in entries {
                stmt.execute(params![e.wgt, e.vtxx, e.vtxy, e.vtxz, e.dist, e.px, e.py, e.pz, e.e, e.pdg, e.metakey])
                    .map_err(|err| write_error(&path, err))?;
            }
        }
        tx.commit().map_err(|e| write_error(&path, e))
    }

    pub fn append_parents(&mut self, parents: &[FluxParent]) -> Result<()> {
        let path = self.path.clone();
        self.connection.execute(CREATE_NUMI, []).map_err(|e| write_error(&path, e))?;
        let tx = self.connection.transaction().map_err(|e| write_error(&path, e))?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO numi (tpx, tpy, tpz, vx, vy, vz, pdpx, pdpy, pdpz, pppx, pppy, pppz, \
                          ndecay, ptype, ppmedium, tptype, run, evtno, entryno) \
                          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)")
                .map_err(|e| write_error(&path, e))?;
            for p in parents {
                stmt.execute(params![
                    p.tpx, p.tpy, p.tpz, p.vx, p.vy, p.vz, p.pdpx, p.pdpy, p.pdpz, p.pppx, p.pppy, p.pppz,
                    p.ndecay, p.ptype, p.ppmedium, p.tptype, p.run, p.evtno, p.entryno
                ])
                .map_err(|err| write_error(&path, err))?;
            }
        }
        tx.commit().map_err(|e| write_error(&path, e))
    }

    pub fn append_aux(&mut self, auxes: &[FluxAux]) -> Result<()> {
        let path = self.path.clone();
        self.connection.execute(CREATE_AUX, []).map_err(|e| write_error(&path, e))?;
        let tx = self.connection.transaction().map_err(|e| write_error(&path, e))?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO aux (auxint, auxdbl) VALUES (?1, ?2)")
                .map_err(|e| write_error(&path, e))?;
            for a in auxes {
                let auxint = to_json(&path, "auxint", &a.auxint)?;
                let auxdbl = to_json(&path, "auxdbl", finite(&path, "auxdbl", &a.auxdbl)?)?;
                stmt.execute(params![auxint, auxdbl])
                    .map_err(|err| write_error(&path, err))?;
            }
        }
        tx.commit().map_err(|e| write_error(&path, e))
    }

    pub fn write_meta(&mut self, meta: &FluxMeta) -> Result<()> {
        let path = self.path.clone();
        let pdglist = to_json(&path, "pdglist", meta.pdglist.codes())?;
        let window_base = to_json(&path, "windowBase", finite(&path, "windowBase", &meta.window_base)?)?;
        let window_dir1 = to_json(&path, "windowDir1", finite(&path, "windowDir1", &meta.window_dir1)?)?;
        let window_dir2 = to_json(&path, "windowDir2", finite(&path, "windowDir2", &meta.window_dir2)?)?;
        let auxintname = to_json(&path, "auxintname", &meta.auxintname)?;
        let auxdblname = to_json(&path, "auxdblname", &meta.auxdblname)?;
        let infiles = to_json(&path, "infiles", &meta.infiles)?;
        self.connection.execute(CREATE_META, []).map_err(|e| write_error(&path, e))?;
        self.connection
            .execute(
                "INSERT INTO meta (metakey, pdglist, maxEnergy, minWgt, maxWgt, protons, windowBase, windowDir1, \
                 windowDir2, auxintname, auxdblname, infiles, seed) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    meta.metakey,
                    pdglist,
                    meta.max_energy,
                    meta.min_wgt,
                    meta.max_wgt,
                    meta.protons,
                    window_base,
                    window_dir1,
                    window_dir2,
                    auxintname,
                    auxdblname,
                    infiles,
                    meta.seed,
                ],
            )
            .map_err(|e| write_error(&path, e))?;
        Ok(())
    }

    /// Meta block summarising a set of entries, with window and POT supplied by the caller.
    pub fn meta_for(entries: &[FluxEntry], protons: f64, window: ([f64; 3], [f64; 3], [f64; 3]), metakey: u32) -> FluxMeta {
        let mut meta = FluxMeta {
            protons,
            window_base: window.0,
            window_dir1: window.1,
            window_dir2: window.2,
            metakey,
            ..Default::default()
        };
        for entry in entries {
            meta.add_flavor(entry.pdg);
            meta.max_energy = meta.max_energy.max(entry.e);
            meta.min_wgt = meta.min_wgt.min(entry.wgt);
            meta.max_wgt = meta.max_wgt.max(entry.wgt);
        }
        meta
    }
}

fn to_json<T: serde::Serialize + ?Sized>(path: &Path, column: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| FluxError::Encode {
        path: path.to_path_buf(),
        column,
        reason: e.to_string(),
    })
}

/// JSON has no NaN or infinity; serde_json would write them as null.
fn finite<'a>(path: &Path, column: &'static str, values: &'a [f64]) -> Result<&'a [f64]> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(v) => Err(FluxError::Encode {
            path: path.to_path_buf(),
            column,
            reason: format!("non-finite value {}", v),
        }),
        None => Ok(values),
    }
}

fn write_error(path: &Path, source: rusqlite::Error) -> FluxError {
    FluxError::Write { path: path.to_path_buf(), source }
}
