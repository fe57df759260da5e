// data module
pub mod data {
    pub mod pdg;
    pub mod entry;
    pub mod meta;
}

// algorithm module
pub mod algorithm {
    pub mod aggregate;
    pub mod chain_index;
    pub mod traversal;
    pub mod geometry;
    pub mod unweight;
}
