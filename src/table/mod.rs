//! In-memory model of the host's thread state table.
//!
//! The host owns and populates this table from its capture pipeline; the
//! plugin reads it on the extract path and writes exactly one field,
//! [`ThreadEntry::lastevent_fd`], on the parse path. Entries are keyed by
//! thread id and form a tree through `ptid`.

use std::collections::HashMap;

/// One file-descriptor entry in a thread's fd subtable.
#[derive(Debug, Clone, Default)]
pub struct FdEntry {
    pub open_flags: u32,
    pub name: String,
    pub name_raw: String,
    pub old_name: String,
    pub flags: u32,
    pub dev: u32,
    pub mount_id: u32,
    pub ino: u64,
    pub pid: i64,
}

/// One thread's state: scalar identity fields, string process attributes,
/// and the args/env/fd subtables.
#[derive(Debug, Clone)]
pub struct ThreadEntry {
    pub tid: i64,
    pub pid: i64,
    /// Id of the process that started this thread.
    pub ptid: i64,
    pub sid: i64,
    pub vtid: i64,
    pub vpid: i64,
    /// Virtual process group id, as seen from the pid namespace.
    pub vpgid: i64,
    pub tty: u32,
    pub exe_ino: u64,
    pub exe_ino_ctime: u64,
    pub exe_ino_mtime: u64,
    pub exe_writable: bool,
    /// True if the executable belongs to the upper layer in overlayfs.
    pub exe_upper_layer: bool,
    /// True if the executable lives in fileless memory referenced by memfd.
    pub exe_from_memfd: bool,
    /// Command name, e.g. "top".
    pub comm: String,
    /// argv[0], e.g. "sshd: user@pts/4".
    pub exe: String,
    /// Full executable path.
    pub exe_path: String,
    pub cwd: String,
    pub container_id: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub fds: HashMap<i64, FdEntry>,
    /// Fd produced by this thread's most recent fd-producing event.
    /// Plugin-owned; −1 until the first such event.
    pub lastevent_fd: i64,
}

impl Default for ThreadEntry {
    fn default() -> Self {
        Self {
            tid: 0,
            pid: 0,
            ptid: 0,
            sid: 0,
            vtid: 0,
            vpid: 0,
            vpgid: 0,
            tty: 0,
            exe_ino: 0,
            exe_ino_ctime: 0,
            exe_ino_mtime: 0,
            exe_writable: false,
            exe_upper_layer: false,
            exe_from_memfd: false,
            comm: String::new(),
            exe: String::new(),
            exe_path: String::new(),
            cwd: String::new(),
            container_id: String::new(),
            args: Vec::new(),
            env: Vec::new(),
            fds: HashMap::new(),
            lastevent_fd: -1,
        }
    }
}

/// The thread table, keyed by thread id.
#[derive(Debug, Default)]
pub struct ThreadTable {
    entries: HashMap<i64, ThreadEntry>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry under its own tid.
    pub fn insert(&mut self, entry: ThreadEntry) {
        self.entries.insert(entry.tid, entry);
    }

    pub fn remove(&mut self, tid: i64) -> Option<ThreadEntry> {
        self.entries.remove(&tid)
    }

    pub fn get(&self, tid: i64) -> Option<&ThreadEntry> {
        self.entries.get(&tid)
    }

    pub fn get_mut(&mut self, tid: i64) -> Option<&mut ThreadEntry> {
        self.entries.get_mut(&tid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
