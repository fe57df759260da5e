//! SQLite layout of a simple flux file and row level readers.
//!
//! One database per flux file. `entry` holds the mandatory flux rays, `numi` and
//! `aux` hold optional per-entry groups aligned with `entry` by row order, and
//! `meta` holds one or more meta blocks. Vector valued columns are JSON text.

use fluxcore::data::entry::{FluxAux, FluxEntry, FluxParent};
use fluxcore::data::meta::FluxMeta;
use fluxcore::data::pdg::PdgCodeList;
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;

pub const CREATE_ENTRY: &str = "CREATE TABLE IF NOT EXISTS entry (
    wgt REAL NOT NULL, vtxx REAL NOT NULL, vtxy REAL NOT NULL, vtxz REAL NOT NULL, dist REAL NOT NULL,
    px REAL NOT NULL, py REAL NOT NULL, pz REAL NOT NULL, E REAL NOT NULL,
    pdg INTEGER NOT NULL, metakey INTEGER NOT NULL)";

pub const CREATE_NUMI: &str = "CREATE TABLE IF NOT EXISTS numi (
    tpx REAL, tpy REAL, tpz REAL, vx REAL, vy REAL, vz REAL,
    pdpx REAL, pdpy REAL, pdpz REAL, pppx REAL, pppy REAL, pppz REAL,
    ndecay INTEGER, ptype INTEGER, ppmedium INTEGER, tptype INTEGER,
    run INTEGER, evtno INTEGER, entryno INTEGER)";

pub const CREATE_AUX: &str = "CREATE TABLE IF NOT EXISTS aux (auxint TEXT NOT NULL, auxdbl TEXT NOT NULL)";

pub const CREATE_META: &str = "CREATE TABLE IF NOT EXISTS meta (
    metakey INTEGER NOT NULL, pdglist TEXT NOT NULL,
    maxEnergy REAL NOT NULL, minWgt REAL NOT NULL, maxWgt REAL NOT NULL, protons REAL NOT NULL,
    windowBase TEXT NOT NULL, windowDir1 TEXT NOT NULL, windowDir2 TEXT NOT NULL,
    auxintname TEXT NOT NULL, auxdblname TEXT NOT NULL, infiles TEXT NOT NULL, seed INTEGER NOT NULL)";

pub const ENTRY_COLUMNS: [&str; 11] = ["wgt", "vtxx", "vtxy", "vtxz", "dist", "px", "py", "pz", "E", "pdg", "metakey"];

pub const NUMI_COLUMNS: [&str; 19] = [
    "tpx", "tpy", "tpz", "vx", "vy", "vz", "pdpx", "pdpy", "pdpz", "pppx", "pppy", "pppz",
    "ndecay", "ptype", "ppmedium", "tptype", "run", "evtno", "entryno",
];

pub const AUX_COLUMNS: [&str; 2] = ["auxint", "auxdbl"];

pub const META_COLUMNS: [&str; 13] = [
    "metakey", "pdglist", "maxEnergy", "minWgt", "maxWgt", "protons",
    "windowBase", "windowDir1", "windowDir2", "auxintname", "auxdblname", "infiles", "seed",
];

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Row ids of a table in storage order; position i of this list is entry i of the file.
pub fn read_rowids(conn: &Connection, table: &str) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(&format!("SELECT rowid FROM {} ORDER BY rowid", table))?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub fn entry_from_row(row: &Row) -> rusqlite::Result<FluxEntry> {
    Ok(FluxEntry {
        wgt: row.get(0)?,
        vtxx: row.get(1)?,
        vtxy: row.get(2)?,
        vtxz: row.get(3)?,
        dist: row.get(4)?,
        px: row.get(5)?,
        py: row.get(6)?,
        pz: row.get(7)?,
        e: row.get(8)?,
        pdg: row.get(9)?,
        metakey: row.get(10)?,
    })
}

pub fn parent_from_row(row: &Row) -> rusqlite::Result<FluxParent> {
    Ok(FluxParent {
        tpx: row.get(0)?,
        tpy: row.get(1)?,
        tpz: row.get(2)?,
        vx: row.get(3)?,
        vy: row.get(4)?,
        vz: row.get(5)?,
        pdpx: row.get(6)?,
        pdpy: row.get(7)?,
        pdpz: row.get(8)?,
        pppx: row.get(9)?,
        pppy: row.get(10)?,
        pppz: row.get(11)?,
        ndecay: row.get(12)?,
        ptype: row.get(13)?,
        ppmedium: row.get(14)?,
        tptype: row.get(15)?,
        run: row.get(16)?,
        evtno: row.get(17)?,
        entryno: row.get(18)?,
    })
}

pub fn aux_from_row(row: &Row) -> rusqlite::Result<FluxAux> {
    Ok(FluxAux {
        auxint: json_column(row, 0)?,
        auxdbl: json_column(row, 1)?,
    })
}

pub fn meta_from_row(row: &Row) -> rusqlite::Result<FluxMeta> {
    let pdglist: Vec<i32> = json_column(row, 1)?;
    Ok(FluxMeta {
        metakey: row.get(0)?,
        pdglist: PdgCodeList::from_codes(&pdglist),
        max_energy: row.get(2)?,
        min_wgt: row.get(3)?,
        max_wgt: row.get(4)?,
        protons: row.get(5)?,
        window_base: json_column(row, 6)?,
        window_dir1: json_column(row, 7)?,
        window_dir2: json_column(row, 8)?,
        auxintname: json_column(row, 9)?,
        auxdblname: json_column(row, 10)?,
        infiles: json_column(row, 11)?,
        seed: row.get(12)?,
    })
}

fn select_one<T>(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    rowid: i64,
    f: impl FnOnce(&Row) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let query = format!("SELECT {} FROM {} WHERE rowid = ?1", columns.join(", "), table);
    let mut stmt = conn.prepare_cached(&query)?;
    stmt.query_row([rowid], f)
}

fn select_all<T>(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    f: impl FnMut(&Row) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let query = format!("SELECT {} FROM {} ORDER BY rowid", columns.join(", "), table);
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map([], f)?;
    rows.collect()
}

pub fn read_entry(conn: &Connection, rowid: i64) -> rusqlite::Result<FluxEntry> {
    select_one(conn, "entry", &ENTRY_COLUMNS, rowid, entry_from_row)
}

pub fn read_parent(conn: &Connection, rowid: i64) -> rusqlite::Result<FluxParent> {
    select_one(conn, "numi", &NUMI_COLUMNS, rowid, parent_from_row)
}

pub fn read_aux(conn: &Connection, rowid: i64) -> rusqlite::Result<FluxAux> {
    select_one(conn, "aux", &AUX_COLUMNS, rowid, aux_from_row)
}

pub fn read_entries(conn: &Connection) -> rusqlite::Result<Vec<FluxEntry>> {
    select_all(conn, "entry", &ENTRY_COLUMNS, entry_from_row)
}

pub fn read_parents(conn: &Connection) -> rusqlite::Result<Vec<FluxParent>> {
    select_all(conn, "numi", &NUMI_COLUMNS, parent_from_row)
}

pub fn read_auxes(conn: &Connection) -> rusqlite::Result<Vec<FluxAux>> {
    select_all(conn, "aux", &AUX_COLUMNS, aux_from_row)
}

pub fn read_metas(conn: &Connection) -> rusqlite::Result<Vec<FluxMeta>> {
    select_all(conn, "meta", &META_COLUMNS, meta_from_row)
}
