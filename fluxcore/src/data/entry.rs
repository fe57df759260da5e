use std::fmt::Display;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// One flux ray, the only mandatory record group ("entry") of a flux file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FluxEntry {
    /// nu weight
    pub wgt: f64,
    /// position in lab frame
    pub vtxx: f64,
    pub vtxy: f64,
    pub vtxz: f64,
    /// distance from hadron decay
    pub dist: f64,
    /// momentum in lab frame
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
    /// nu pdg-code
    pub pdg: i32,
    /// key to meta data
    pub metakey: u32,
}

impl FluxEntry {
    pub fn new(
        wgt: f64,
        vtxx: f64,
        vtxy: f64,
        vtxz: f64,
        dist: f64,
        px: f64,
        py: f64,
        pz: f64,
        e: f64,
        pdg: i32,
        metakey: u32,
    ) -> Self {
        FluxEntry { wgt, vtxx, vtxy, vtxz, dist, px, py, pz, e, pdg, metakey }
    }

    pub fn reset(&mut self) {
        *self = FluxEntry::default();
    }
}

impl Display for FluxEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FluxEntry(pdg: {}, wgt: {}, vtx: [{}, {}, {}], dist: {}, p4: [{}, {}, {}; {}], metakey: {})",
            self.pdg, self.wgt, self.vtxx, self.vtxy, self.vtxz, self.dist,
            self.px, self.py, self.pz, self.e, self.metakey
        )
    }
}

/// Parent hadron information carried by the optional "numi" group.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FluxParent {
    // parent momentum at target exit
    pub tpx: f64,
    pub tpy: f64,
    pub tpz: f64,
    // vertex position of hadron/muon decay
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    // parent momentum at time of decay
    pub pdpx: f64,
    pub pdpy: f64,
    pub pdpz: f64,
    // parent momentum at production point
    pub pppx: f64,
    pub pppy: f64,
    pub pppz: f64,
    pub ndecay: i32,
    pub ptype: i32,
    pub ppmedium: i32,
    pub tptype: i32,
    pub run: i32,
    pub evtno: i32,
    pub entryno: i32,
}

impl FluxParent {
    pub fn reset(&mut self) {
        *self = FluxParent::default();
    }
}

impl Display for FluxParent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FluxParent(tp: [{}, {}, {}], v: [{}, {}, {}], pdp: [{}, {}, {}], ppp: [{}, {}, {}], \
             ndecay: {}, ptype: {}, ppmedium: {}, tptype: {}, run: {}, evtno: {}, entryno: {})",
            self.tpx, self.tpy, self.tpz,
            self.vx, self.vy, self.vz,
            self.pdpx, self.pdpy, self.pdpz,
            self.pppx, self.pppy, self.pppz,
            self.ndecay, self.ptype, self.ppmedium, self.tptype,
            self.run, self.evtno, self.entryno
        )
    }
}

/// Free-form extension values of the optional "aux" group, named by the meta block.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FluxAux {
    pub auxint: Vec<i32>,
    pub auxdbl: Vec<f64>,
}

impl FluxAux {
    pub fn new(auxint: Vec<i32>, auxdbl: Vec<f64>) -> Self {
        FluxAux { auxint, auxdbl }
    }

    pub fn reset(&mut self) {
        self.auxint.clear();
        self.auxdbl.clear();
    }
}

impl Display for FluxAux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FluxAux(auxint: [{}], auxdbl: [{}])",
            self.auxint.iter().join(", "),
            self.auxdbl.iter().join(", ")
        )
    }
}
