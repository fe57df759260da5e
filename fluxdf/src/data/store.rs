use std::path::{Path, PathBuf};

use fluxcore::algorithm::chain_index::ChainIndex;
use fluxcore::data::entry::{FluxAux, FluxEntry, FluxParent};
use fluxcore::data::meta::FluxMeta;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::data::branch::{Branch, BranchPresence, BranchRequest};
use crate::data::sql;
use crate::error::{FluxError, LoadError, Result};

/// Position addressable view over a chain of flux files.
pub trait FluxData {
    fn file_list(&self) -> Vec<String>;
    fn chain_index(&self) -> &ChainIndex;
    fn request(&self) -> BranchRequest;
    fn presence(&self, file: usize) -> BranchPresence;
    /// Meta blocks of one file, empty when the file has none.
    fn file_metas(&self, file: usize) -> &[FluxMeta];
    fn get_entry(&self, index: u64) -> Result<FluxEntry>;
    /// None when the group was not requested or the entry's file lacks it.
    fn get_parent(&self, index: u64) -> Result<Option<FluxParent>>;
    fn get_aux(&self, index: u64) -> Result<Option<FluxAux>>;

    fn num_entries(&self) -> u64 {
        self.chain_index().total()
    }

    fn num_files(&self) -> usize {
        self.chain_index().num_files()
    }
}

/// What every loader knows about the chain once it is opened.
#[derive(Debug, Clone)]
pub struct FluxChainLayout {
    pub names: Vec<String>,
    pub request: BranchRequest,
    pub presence: Vec<BranchPresence>,
    pub metas: Vec<Vec<FluxMeta>>,
    pub index: ChainIndex,
}

impl FluxChainLayout {
    fn locate(&self, index: u64) -> Result<(usize, u64)> {
        self.index.locate(index).ok_or(FluxError::IndexOutOfRange { index, total: self.index.total() })
    }

    /// Every requested group must exist somewhere in the chain; partial coverage is only logged.
    fn check_branches(&self) -> std::result::Result<(), LoadError> {
        for branch in self.request.optional() {
            let present = self.presence.iter().filter(|p| p.has(branch)).count();
            if present == 0 {
                return Err(LoadError::MissingBranch { branch: branch.to_string() });
            }
            if present < self.presence.len() {
                warn!(
                    branch = %branch,
                    files_with_branch = present,
                    files = self.presence.len(),
                    "requested branch missing from some flux files, entries of those files carry no {} block",
                    branch
                );
            }
        }
        if self.index.total() == 0 {
            return Err(LoadError::NoEntries);
        }
        Ok(())
    }
}

/// One open flux file.
#[derive(Debug)]
pub struct FluxFileHandle {
    pub path: PathBuf,
    pub connection: Connection,
    pub entry_rowids: Vec<i64>,
    pub numi_rowids: Option<Vec<i64>>,
    pub aux_rowids: Option<Vec<i64>>,
}

fn store_error(path: &Path) -> impl Fn(rusqlite::Error) -> LoadError + '_ {
    move |source| LoadError::Store { path: path.to_path_buf(), source }
}

fn optional_rowids(
    conn: &Connection,
    path: &Path,
    branch: Branch,
    num_entries: usize,
) -> std::result::Result<Option<Vec<i64>>, LoadError> {
    if !sql::table_exists(conn, branch.table()).map_err(store_error(path))? {
        debug!(file = %path.display(), branch = %branch, "branch not present");
        return Ok(None);
    }
    let rowids = sql::read_rowids(conn, branch.table()).map_err(store_error(path))?;
    if rowids.len() != num_entries {
        warn!(
            file = %path.display(),
            branch = %branch,
            rows = rowids.len(),
            entries = num_entries,
            "branch row count does not match entry count, ignoring branch for this file"
        );
        return Ok(None);
    }
    Ok(Some(rowids))
}

fn open_file(path: &Path, request: BranchRequest) -> std::result::Result<(FluxFileHandle, Vec<FluxMeta>), LoadError> {
    let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .map_err(store_error(path))?;

    if !sql::table_exists(&connection, Branch::Entry.table()).map_err(store_error(path))? {
        return Err(LoadError::MissingEntryTable { path: path.to_path_buf() });
    }
    let entry_rowids = sql::read_rowids(&connection, Branch::Entry.table()).map_err(store_error(path))?;

    let numi_rowids = match request.numi {
        true => optional_rowids(&connection, path, Branch::Numi, entry_rowids.len())?,
        false => None,
    };
    let aux_rowids = match request.aux {
        true => optional_rowids(&connection, path, Branch::Aux, entry_rowids.len())?,
        false => None,
    };

    let metas = match sql::table_exists(&connection, "meta").map_err(store_error(path))? {
        true => match sql::read_metas(&connection) {
            Ok(metas) => metas,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unreadable meta data, treating file as having none");
                Vec::new()
            }
        },
        false => Vec::new(),
    };

    info!(file = %path.display(), entries = entry_rowids.len(), meta_blocks = metas.len(), "added flux file");

    Ok((
        FluxFileHandle { path: path.to_path_buf(), connection, entry_rowids, numi_rowids, aux_rowids },
        metas,
    ))
}

/// Open every file of the chain. Files opened before a failure are closed when the
/// partial handle list is dropped on the error path.
pub fn open_chain(paths: &[PathBuf], request: BranchRequest) -> std::result::Result<(FluxChainLayout, Vec<FluxFileHandle>), LoadError> {
    let mut handles = Vec::with_capacity(paths.len());
    let mut metas = Vec::with_capacity(paths.len());
    for path in paths {
        let (handle, file_metas) = open_file(path, request)?;
        handles.push(handle);
        metas.push(file_metas);
    }

    let counts: Vec<u64> = handles.iter().map(|h| h.entry_rowids.len() as u64).collect();
    let layout = FluxChainLayout {
        names: paths.iter().map(|p| p.display().to_string()).collect(),
        request,
        presence: handles
            .iter()
            .zip(metas.iter())
            .map(|(h, m)| BranchPresence {
                numi: h.numi_rowids.is_some(),
                aux: h.aux_rowids.is_some(),
                meta: !m.is_empty(),
            })
            .collect(),
        metas,
        index: ChainIndex::from_counts(&counts),
    };
    layout.check_branches()?;
    info!(files = layout.names.len(), entries = layout.index.total(), request = %request, "opened flux file chain");
    Ok((layout, handles))
}

/// Reads entries from the open files on demand.
#[derive(Debug)]
pub struct FluxLazyLoader {
    pub layout: FluxChainLayout,
    pub files: Vec<FluxFileHandle>,
}

impl FluxLazyLoader {
    fn read<T>(
        &self,
        index: u64,
        rowids: impl Fn(&FluxFileHandle) -> Option<&Vec<i64>>,
        read: impl Fn(&Connection, i64) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        let (file, local) = self.layout.locate(index)?;
        let handle = &self.files[file];
        match rowids(handle) {
            Some(ids) => read(&handle.connection, ids[local as usize])
                .map(Some)
                .map_err(|source| FluxError::Store { index, path: handle.path.clone(), source }),
            None => Ok(None),
        }
    }
}

impl FluxData for FluxLazyLoader {
    fn file_list(&self) -> Vec<String> {
        self.layout.names.clone()
    }

    fn chain_index(&self) -> &ChainIndex {
        &self.layout.index
    }

    fn request(&self) -> BranchRequest {
        self.layout.request
    }

    fn presence(&self, file: usize) -> BranchPresence {
        self.layout.presence[file]
    }

    fn file_metas(&self, file: usize) -> &[FluxMeta] {
        &self.layout.metas[file]
    }

    fn get_entry(&self, index: u64) -> Result<FluxEntry> {
        self.read(index, |h| Some(&h.entry_rowids), sql::read_entry)?
            .ok_or(FluxError::IndexOutOfRange { index, total: self.layout.index.total() })
    }

    fn get_parent(&self, index: u64) -> Result<Option<FluxParent>> {
        self.read(index, |h| h.numi_rowids.as_ref(), sql::read_parent)
    }

    fn get_aux(&self, index: u64) -> Result<Option<FluxAux>> {
        self.read(index, |h| h.aux_rowids.as_ref(), sql::read_aux)
    }
}

/// Entries of one file held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFluxFile {
    pub name: String,
    pub entries: Vec<FluxEntry>,
    pub parents: Option<Vec<FluxParent>>,
    pub aux: Option<Vec<FluxAux>>,
    pub metas: Vec<FluxMeta>,
}

impl InMemoryFluxFile {
    pub fn new(name: &str, entries: Vec<FluxEntry>, metas: Vec<FluxMeta>) -> Self {
        InMemoryFluxFile { name: name.to_string(), entries, parents: None, aux: None, metas }
    }
}

/// Holds the whole chain in vectors; no file stays open.
#[derive(Debug, Clone)]
pub struct FluxInMemoryLoader {
    pub layout: FluxChainLayout,
    entries: Vec<FluxEntry>,
    parents: Vec<Option<FluxParent>>,
    aux: Vec<Option<FluxAux>>,
}

impl FluxInMemoryLoader {
    pub fn from_files(files: Vec<InMemoryFluxFile>, request: BranchRequest) -> std::result::Result<Self, LoadError> {
        let mut names = Vec::with_capacity(files.len());
        let mut presence = Vec::with_capacity(files.len());
        let mut metas = Vec::with_capacity(files.len());
        let mut counts = Vec::with_capacity(files.len());
        let mut entries = Vec::new();
        let mut parents = Vec::new();
        let mut aux = Vec::new();

        for file in files {
            let n = file.entries.len();
            let file_parents = file.parents.filter(|p| request.numi && p.len() == n);
            let file_aux = file.aux.filter(|a| request.aux && a.len() == n);
            presence.push(BranchPresence {
                numi: file_parents.is_some(),
                aux: file_aux.is_some(),
                meta: !file.metas.is_empty(),
            });
            match file_parents {
                Some(p) => parents.extend(p.into_iter().map(Some)),
                None => parents.extend(std::iter::repeat(None).take(n)),
            }
            match file_aux {
                Some(a) => aux.extend(a.into_iter().map(Some)),
                None => aux.extend(std::iter::repeat(None).take(n)),
            }
            names.push(file.name);
            metas.push(file.metas);
            counts.push(n as u64);
            entries.extend(file.entries);
        }

        let layout = FluxChainLayout { names, request, presence, metas, index: ChainIndex::from_counts(&counts) };
        layout.check_branches()?;
        Ok(FluxInMemoryLoader { layout, entries, parents, aux })
    }

    /// Read a whole chain into memory, closing each file afterwards.
    pub fn load(paths: &[PathBuf], request: BranchRequest) -> std::result::Result<Self, LoadError> {
        let (layout, handles) = open_chain(paths, request)?;
        let mut entries = Vec::with_capacity(layout.index.total() as usize);
        let mut parents = Vec::with_capacity(layout.index.total() as usize);
        let mut aux = Vec::with_capacity(layout.index.total() as usize);

        for handle in handles {
            let n = handle.entry_rowids.len();
            let err = store_error(&handle.path);
            entries.extend(sql::read_entries(&handle.connection).map_err(&err)?);
            match handle.numi_rowids {
                Some(_) => parents.extend(sql::read_parents(&handle.connection).map_err(&err)?.into_iter().map(Some)),
                None => parents.extend(std::iter::repeat(None).take(n)),
            }
            match handle.aux_rowids {
                Some(_) => aux.extend(sql::read_auxes(&handle.connection).map_err(&err)?.into_iter().map(Some)),
                None => aux.extend(std::iter::repeat(None).take(n)),
            }
        }
        Ok(FluxInMemoryLoader { layout, entries, parents, aux })
    }

    fn check(&self, index: u64) -> Result<usize> {
        self.layout.locate(index).map(|_| index as usize)
    }
}

impl FluxData for FluxInMemoryLoader {
    fn file_list(&self) -> Vec<String> {
        self.layout.names.clone()
    }

    fn chain_index(&self) -> &ChainIndex {
        &self.layout.index
    }

    fn request(&self) -> BranchRequest {
        self.layout.request
    }

    fn presence(&self, file: usize) -> BranchPresence {
        self.layout.presence[file]
    }

    fn file_metas(&self, file: usize) -> &[FluxMeta] {
        &self.layout.metas[file]
    }

    fn get_entry(&self, index: u64) -> Result<FluxEntry> {
        let i = self.check(index)?;
        Ok(self.entries[i].clone())
    }

    fn get_parent(&self, index: u64) -> Result<Option<FluxParent>> {
        let i = self.check(index)?;
        Ok(self.parents[i].clone())
    }

    fn get_aux(&self, index: u64) -> Result<Option<FluxAux>> {
        let i = self.check(index)?;
        Ok(self.aux[i].clone())
    }
}

pub enum FluxDataLoader {
    InMemory(FluxInMemoryLoader),
    Lazy(FluxLazyLoader),
}

impl FluxDataLoader {
    pub fn new_lazy(paths: &[PathBuf], request: BranchRequest) -> std::result::Result<Self, LoadError> {
        let (layout, files) = open_chain(paths, request)?;
        Ok(FluxDataLoader::Lazy(FluxLazyLoader { layout, files }))
    }

    pub fn new_in_memory(paths: &[PathBuf], request: BranchRequest) -> std::result::Result<Self, LoadError> {
        Ok(FluxDataLoader::InMemory(FluxInMemoryLoader::load(paths, request)?))
    }

    pub fn from_files(files: Vec<InMemoryFluxFile>, request: BranchRequest) -> std::result::Result<Self, LoadError> {
        Ok(FluxDataLoader::InMemory(FluxInMemoryLoader::from_files(files, request)?))
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, FluxDataLoader::InMemory(_))
    }
}

impl FluxData for FluxDataLoader {
    fn file_list(&self) -> Vec<String> {
        match self {
            FluxDataLoader::InMemory(loader) => loader.file_list(),
            FluxDataLoader::Lazy(loader) => loader.file_list(),
        }
    }

    fn chain_index(&self) -> &ChainIndex {
        match self {
            FluxDataLoader::InMemory(loader) => loader.chain_index(),
            FluxDataLoader::Lazy(loader) => loader.chain_index(),
        }
    }

    fn request(&self) -> BranchRequest {
        match self {
            FluxDataLoader::InMemory(loader) => loader.request(),
            FluxDataLoader::Lazy(loader) => loader.request(),
        }
    }

    fn presence(&self, file: usize) -> BranchPresence {
        match self {
            FluxDataLoader::InMemory(loader) => loader.presence(file),
            FluxDataLoader::Lazy(loader) => loader.presence(file),
        }
    }

    fn file_metas(&self, file: usize) -> &[FluxMeta] {
        match self {
            FluxDataLoader::InMemory(loader) => loader.file_metas(file),
            FluxDataLoader::Lazy(loader) => loader.file_metas(file),
        }
    }

    fn get_entry(&self, index: u64) -> Result<FluxEntry> {
        match self {
            FluxDataLoader::InMemory(loader) => loader.get_entry(index),
            FluxDataLoader::Lazy(loader) => loader.get_entry(index),
        }
    }

    fn get_parent(&self, index: u64) -> Result<Option<FluxParent>> {
        match self {
            FluxDataLoader::InMemory(loader) => loader.get_parent(index),
            FluxDataLoader::Lazy(loader) => loader.get_parent(index),
        }
    }

    fn get_aux(&self, index: u64) -> Result<Option<FluxAux>> {
        match self {
            FluxDataLoader::InMemory(loader) => loader.get_aux(index),
            FluxDataLoader::Lazy(loader) => loader.get_aux(index),
        }
    }
}
