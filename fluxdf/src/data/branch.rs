use std::fmt::Display;

use crate::error::LoadError;

/// Optional record groups that can sit next to the mandatory "entry" group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Entry,
    Numi,
    Aux,
}

impl Branch {
    pub fn table(&self) -> &'static str {
        match self {
            Branch::Entry => "entry",
            Branch::Numi => "numi",
            Branch::Aux => "aux",
        }
    }
}

impl Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table())
    }
}

impl TryFrom<&str> for Branch {
    type Error = LoadError;

    fn try_from(item: &str) -> Result<Self, Self::Error> {
        match item.trim().to_lowercase().as_str() {
            "entry" => Ok(Branch::Entry),
            "numi" => Ok(Branch::Numi),
            "aux" => Ok(Branch::Aux),
            other => Err(LoadError::UnknownBranch(other.to_string())),
        }
    }
}

/// Parsed form of a request string like "entry,numi,aux". The entry group is always on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchRequest {
    pub numi: bool,
    pub aux: bool,
}

impl Default for BranchRequest {
    fn default() -> Self {
        BranchRequest { numi: true, aux: true }
    }
}

impl BranchRequest {
    pub fn entry_only() -> Self {
        BranchRequest { numi: false, aux: false }
    }

    pub fn parse(request: &str) -> Result<Self, LoadError> {
        let mut parsed = BranchRequest::entry_only();
        for token in request.split(',').filter(|t| !t.trim().is_empty()) {
            match Branch::try_from(token)? {
                Branch::Entry => (),
                Branch::Numi => parsed.numi = true,
                Branch::Aux => parsed.aux = true,
            }
        }
        Ok(parsed)
    }

    pub fn optional(&self) -> Vec<Branch> {
        let mut branches = Vec::new();
        if self.numi {
            branches.push(Branch::Numi);
        }
        if self.aux {
            branches.push(Branch::Aux);
        }
        branches
    }
}

impl Display for BranchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = vec!["entry"];
        names.extend(self.optional().iter().map(|b| b.table()));
        write!(f, "{}", names.join(","))
    }
}

/// Which optional groups one file actually delivers, resolved once at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchPresence {
    pub numi: bool,
    pub aux: bool,
    pub meta: bool,
}

impl BranchPresence {
    pub fn has(&self, branch: Branch) -> bool {
        match branch {
            Branch::Entry => true,
            Branch::Numi => self.numi,
            Branch::Aux => self.aux,
        }
    }
}
