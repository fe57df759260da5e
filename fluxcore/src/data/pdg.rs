use std::fmt::Display;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub const NU_E: i32 = 12;
pub const NU_E_BAR: i32 = -12;
pub const NU_MU: i32 = 14;
pub const NU_MU_BAR: i32 = -14;
pub const NU_TAU: i32 = 16;
pub const NU_TAU_BAR: i32 = -16;

/// All six neutrino species, in the order they are usually listed.
pub const ALL_NEUTRINOS: [i32; 6] = [NU_E, NU_E_BAR, NU_MU, NU_MU_BAR, NU_TAU, NU_TAU_BAR];

pub fn is_neutrino(pdg: i32) -> bool {
    ALL_NEUTRINOS.contains(&pdg)
}

pub fn pdg_name(pdg: i32) -> &'static str {
    match pdg {
        NU_E => "nu_e",
        NU_E_BAR => "nu_e_bar",
        NU_MU => "nu_mu",
        NU_MU_BAR => "nu_mu_bar",
        NU_TAU => "nu_tau",
        NU_TAU_BAR => "nu_tau_bar",
        _ => "unknown",
    }
}

/// Insertion-ordered list of unique PDG codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PdgCodeList {
    codes: Vec<i32>,
}

impl PdgCodeList {
    pub fn new() -> Self {
        PdgCodeList { codes: Vec::new() }
    }

    pub fn from_codes(codes: &[i32]) -> Self {
        let mut list = PdgCodeList::new();
        for &code in codes {
            list.push(code);
        }
        list
    }

    /// Add a code, returns false if it was already present.
    pub fn push(&mut self, pdg: i32) -> bool {
        if self.contains(pdg) {
            return false;
        }
        self.codes.push(pdg);
        true
    }

    pub fn contains(&self, pdg: i32) -> bool {
        self.codes.contains(&pdg)
    }

    pub fn extend_from(&mut self, other: &PdgCodeList) {
        for &code in &other.codes {
            self.push(code);
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn clear(&mut self) {
        self.codes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &i32> {
        self.codes.iter()
    }

    pub fn codes(&self) -> &[i32] {
        &self.codes
    }

    /// Codes in ascending order, handy for comparisons where insertion order is irrelevant.
    pub fn sorted(&self) -> Vec<i32> {
        self.codes.iter().copied().sorted().collect()
    }
}

impl FromIterator<i32> for PdgCodeList {
    fn from_iter<T: IntoIterator<Item = i32>>(iter: T) -> Self {
        let mut list = PdgCodeList::new();
        for code in iter {
            list.push(code);
        }
        list
    }
}

impl Display for PdgCodeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]",
            self.codes.iter().map(|&c| format!("{} ({})", c, pdg_name(c))).join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_codes_unique() {
        let mut list = PdgCodeList::new();
        assert!(list.push(NU_MU));
        assert!(!list.push(NU_MU));
        assert!(list.push(NU_E));
        assert_eq!(list.codes(), &[NU_MU, NU_E]);
    }

    #[test]
    fn test_from_iter_and_sorted() {
        let list: PdgCodeList = vec![14, -14, 12, 14].into_iter().collect();
        assert_eq!(list.len(), 3);
        assert_eq!(list.sorted(), vec![-14, 12, 14]);
    }

    #[test]
    fn test_display_lists_names() {
        let list = PdgCodeList::from_codes(&[NU_MU_BAR]);
        assert_eq!(list.to_string(), "[-14 (nu_mu_bar)]");
    }

    #[test]
    fn test_is_neutrino() {
        assert!(is_neutrino(-16));
        assert!(!is_neutrino(13));
    }
}
