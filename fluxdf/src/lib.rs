// src/lib.rs
pub mod error;

pub mod data {
    pub mod branch;
    pub mod pattern;
    pub mod sql;
    pub mod writer;
    pub mod store;
}

pub mod flux {
    pub mod config;
    pub mod driver;
}
