//! Behavior-fingerprint extraction.
//!
//! Evaluates a parsed profile against an event and the host thread table,
//! concatenating every selector's value into a single fingerprint string.
//! There is no notion of a null field: any value that cannot be read
//! contributes the empty string, so a fingerprint is always produced.
//!
//! Fd-dependent selectors read the cached fd state first (via the thread's
//! `lastevent_fd`) and fall back to decoding the raw event parameters,
//! resolving relative paths against the working directory or the `dirfd`
//! entry. Applying an fd selector to a non-fd event clears the entire
//! accumulated fingerprint; the resulting empty string marks the event as
//! not applicable, which suppresses both update and extraction results.
//! This matches the upstream semantics even when earlier selectors already
//! contributed output, at the cost of making profiles order-sensitive.

pub mod paths;

use crate::event::{decode, Event, EventCode};
use crate::profile::{FieldKind, Selector};
use crate::table::{ThreadEntry, ThreadTable};

use self::paths::concat_paths;

/// The `openat` dirfd sentinel for "relative to the working directory".
pub const AT_FDCWD: i64 = -100;

/// Session-leader walks give up after this many parent hops.
const SID_LEADER_MAX_HOPS: u32 = 9;
/// Process-group-leader walks give up after this many parent hops.
const VPGID_LEADER_MAX_HOPS: u32 = 5;

/// Computes the fingerprint for `profile` against the event.
///
/// When the originating thread is not in the table, every selector degrades
/// to its raw-event fallback; selectors with no fallback contribute "".
pub fn extract(evt: &Event, table: &ThreadTable, profile: &[Selector]) -> String {
    let mut out = String::new();

    let Some(entry) = table.get(evt.tid) else {
        for sel in profile {
            if sel.kind == FieldKind::Literal {
                out.push_str(sel.arg_name.as_deref().unwrap_or(""));
            } else {
                out.push_str(&fallback_value(evt, sel.kind, ""));
            }
        }
        return out;
    };

    for sel in profile {
        match eval_selector(evt, table, entry, sel) {
            Eval::Value(v) => out.push_str(&v),
            Eval::ClearProfile => out.clear(),
        }
    }

    out
}

enum Eval {
    Value(String),
    /// Fd selector applied to a non-fd event: wipe everything accumulated
    /// so far and keep going.
    ClearProfile,
}

fn eval_selector(evt: &Event, table: &ThreadTable, entry: &ThreadEntry, sel: &Selector) -> Eval {
    use FieldKind::*;

    let steps = sel.arg_id.unwrap_or(0);

    let value = match sel.kind {
        Literal => sel.arg_name.clone().unwrap_or_default(),

        ContainerId => entry.container_id.clone(),
        Name => entry.comm.clone(),
        Pname => parent_attr(table, entry, |e| e.comm.as_str()),
        Aname => ancestor_attr(table, entry, steps, |e| e.comm.as_str()),
        Exe => entry.exe.clone(),
        Pexe => parent_attr(table, entry, |e| e.exe.as_str()),
        Aexe => ancestor_attr(table, entry, steps, |e| e.exe.as_str()),
        Exepath => entry.exe_path.clone(),
        Pexepath => parent_attr(table, entry, |e| e.exe_path.as_str()),
        Aexepath => ancestor_attr(table, entry, steps, |e| e.exe_path.as_str()),
        Cwd => entry.cwd.clone(),

        Args => entry.args.join(" "),
        Cmdnargs => entry.args.len().to_string(),
        Cmdlenargs => entry.args.iter().map(String::len).sum::<usize>().to_string(),
        Cmdline => prefixed_args(&entry.comm, &entry.args),
        Pcmdline => match table.get(entry.ptid) {
            Some(parent) => prefixed_args(&parent.comm, &parent.args),
            None => String::new(),
        },
        Acmdline => {
            if steps < 1 {
                prefixed_args(&entry.comm, &entry.args)
            } else {
                match ancestor(table, entry, steps) {
                    Some(a) => prefixed_args(&a.comm, &a.args),
                    None => String::new(),
                }
            }
        }
        Exeline => prefixed_args(&entry.exe, &entry.args),

        Tty => entry.tty.to_string(),
        Pid => entry.pid.to_string(),
        Ppid => parent_attr_owned(table, entry, |e| e.pid.to_string()),
        Apid => {
            if steps < 1 {
                entry.pid.to_string()
            } else {
                ancestor(table, entry, steps).map(|a| a.pid.to_string()).unwrap_or_default()
            }
        }
        Vpid => entry.vpid.to_string(),
        Pvpid => parent_attr_owned(table, entry, |e| e.vpid.to_string()),
        Sid => entry.sid.to_string(),
        Vpgid => entry.vpgid.to_string(),

        Sname => leader(table, entry, |e| e.sid, SID_LEADER_MAX_HOPS).comm.clone(),
        SidExe => leader(table, entry, |e| e.sid, SID_LEADER_MAX_HOPS).exe.clone(),
        SidExepath => leader(table, entry, |e| e.sid, SID_LEADER_MAX_HOPS).exe_path.clone(),
        VpgidName => leader(table, entry, |e| e.vpgid, VPGID_LEADER_MAX_HOPS).comm.clone(),
        VpgidExe => leader(table, entry, |e| e.vpgid, VPGID_LEADER_MAX_HOPS).exe.clone(),
        VpgidExepath => {
            leader(table, entry, |e| e.vpgid, VPGID_LEADER_MAX_HOPS).exe_path.clone()
        }

        Env => env_value(entry, sel.arg_name.as_deref()),

        IsExeWritable => bool_str(entry.exe_writable),
        IsExeUpperLayer => bool_str(entry.exe_upper_layer),
        IsExeFromMemfd => bool_str(entry.exe_from_memfd),
        IsSidLeader => bool_str(entry.sid == entry.vpid),
        IsVpgidLeader => bool_str(entry.vpgid == entry.vpid),
        ExeIno => entry.exe_ino.to_string(),
        ExeInoCtime => entry.exe_ino_ctime.to_string(),
        ExeInoMtime => entry.exe_ino_mtime.to_string(),

        AnameLineageConcat => lineage_concat(table, entry, steps, |e| e.comm.as_str()),
        AexeLineageConcat => lineage_concat(table, entry, steps, |e| e.exe.as_str()),
        AexepathLineageConcat => lineage_concat(table, entry, steps, |e| e.exe_path.as_str()),

        FdNum => {
            if !evt.code.produces_fd() {
                return Eval::ClearProfile;
            }
            entry.lastevent_fd.to_string()
        }

        FdName => {
            if !evt.code.produces_fd() {
                return Eval::ClearProfile;
            }
            fd_name_or_fallback(evt, entry)
        }

        FdDirectory | FdFilename => {
            if !evt.code.produces_fd() {
                return Eval::ClearProfile;
            }
            if evt.code.is_socket() {
                String::new()
            } else {
                let full = fd_name_or_fallback(evt, entry);
                match full.rfind('/') {
                    Some(pos) if sel.kind == FdDirectory => full[..pos].to_string(),
                    Some(pos) => full[pos + 1..].to_string(),
                    None => full,
                }
            }
        }

        FdIno => {
            if !evt.code.produces_fd() {
                return Eval::ClearProfile;
            }
            if evt.code.is_socket() {
                String::new()
            } else {
                let cached = cached_fd(entry).map(|fd| fd.ino.to_string()).unwrap_or_default();
                if cached.is_empty() {
                    fallback_value(evt, FdIno, "")
                } else {
                    cached
                }
            }
        }

        FdDev => {
            if !evt.code.produces_fd() {
                return Eval::ClearProfile;
            }
            if evt.code.is_socket() {
                String::new()
            } else {
                let cached = cached_fd(entry).map(|fd| fd.dev.to_string()).unwrap_or_default();
                if cached.is_empty() {
                    fallback_value(evt, FdDev, "")
                } else {
                    cached
                }
            }
        }

        FdNameRaw => {
            if !evt.code.produces_fd() {
                return Eval::ClearProfile;
            }
            if evt.code.is_socket() {
                String::new()
            } else {
                let cached = cached_fd(entry).map(|fd| fd.name_raw.clone()).unwrap_or_default();
                if cached.is_empty() {
                    fallback_value(evt, FdNameRaw, "")
                } else {
                    cached
                }
            }
        }

        FdNamePart1 | FdNamePart2 => {
            if !evt.code.produces_fd() {
                return Eval::ClearProfile;
            }
            if !evt.code.is_socket() {
                // Endpoint-pair names only exist on socket fds.
                String::new()
            } else {
                let name = cached_fd(entry).map(|fd| fd.name.clone()).unwrap_or_default();
                match name.split_once("->") {
                    Some((left, _)) if sel.kind == FdNamePart1 => left.to_string(),
                    Some((_, right)) => right.to_string(),
                    None => String::new(),
                }
            }
        }
    };

    Eval::Value(value)
}

/// Decodes a selector's value straight from the event buffer. Only fd
/// selectors have a raw representation; everything else yields "".
/// `base` is the directory to resolve relative path parameters against.
fn fallback_value(evt: &Event, kind: FieldKind, base: &str) -> String {
    use FieldKind::*;

    match kind {
        FdNum => match evt.code.fd_param_slot() {
            Some(slot) => decode::param_i64(evt, slot).map(|fd| fd.to_string()).unwrap_or_default(),
            None => String::new(),
        },

        FdName | FdDirectory | FdFilename => match path_param_slot(evt.code) {
            Some(slot) => decode::param_str(evt, slot)
                .map(|name| concat_paths(base, &name))
                .unwrap_or_default(),
            None => String::new(),
        },

        FdNameRaw => match path_param_slot(evt.code) {
            Some(slot) => decode::param_str(evt, slot).unwrap_or_default(),
            None => String::new(),
        },

        FdIno => match ino_param_slot(evt.code) {
            Some(slot) => decode::param_u64(evt, slot).map(|v| v.to_string()).unwrap_or_default(),
            None => String::new(),
        },

        FdDev => match dev_param_slot(evt.code) {
            Some(slot) => decode::param_u32(evt, slot).map(|v| v.to_string()).unwrap_or_default(),
            None => String::new(),
        },

        _ => String::new(),
    }
}

/// Parameter slot of the path name, per event type. Socket events carry no
/// path parameter.
fn path_param_slot(code: EventCode) -> Option<usize> {
    match code {
        EventCode::Open | EventCode::Creat => Some(1),
        EventCode::Openat | EventCode::Openat2 => Some(2),
        EventCode::OpenByHandleAt => Some(3),
        _ => None,
    }
}

fn ino_param_slot(code: EventCode) -> Option<usize> {
    match code {
        EventCode::Open | EventCode::Creat | EventCode::OpenByHandleAt => Some(5),
        EventCode::Openat | EventCode::Openat2 => Some(7),
        _ => None,
    }
}

fn dev_param_slot(code: EventCode) -> Option<usize> {
    match code {
        EventCode::Open | EventCode::Creat | EventCode::OpenByHandleAt => Some(4),
        EventCode::Openat | EventCode::Openat2 => Some(6),
        _ => None,
    }
}

/// The fd entry cached under the thread's `lastevent_fd`.
fn cached_fd(entry: &ThreadEntry) -> Option<&crate::table::FdEntry> {
    entry.fds.get(&entry.lastevent_fd)
}

/// Cached fd name, or the raw-parameter path resolved against the event
/// type's base directory.
fn fd_name_or_fallback(evt: &Event, entry: &ThreadEntry) -> String {
    let cached = cached_fd(entry).map(|fd| fd.name.clone()).unwrap_or_default();
    if !cached.is_empty() {
        return cached;
    }

    match evt.code {
        EventCode::Open | EventCode::Creat => fallback_value(evt, FieldKind::FdName, &entry.cwd),
        EventCode::Openat | EventCode::Openat2 => {
            fallback_value(evt, FieldKind::FdName, &dirfd_base(evt, entry))
        }
        EventCode::OpenByHandleAt => fallback_value(evt, FieldKind::FdName, ""),
        // Sockets resolve through the fd table only.
        _ => String::new(),
    }
}

/// Base directory for `openat`-style relative paths: the `dirfd` entry's
/// name, with `AT_FDCWD` resolving to the thread's working directory.
fn dirfd_base(evt: &Event, entry: &ThreadEntry) -> String {
    let Some(dirfd) = decode::param_i64(evt, 1) else {
        return String::new();
    };
    if dirfd == AT_FDCWD {
        entry.cwd.clone()
    } else {
        entry.fds.get(&dirfd).map(|fd| fd.name.clone()).unwrap_or_default()
    }
}

fn bool_str(v: bool) -> String {
    u8::from(v).to_string()
}

/// `comm`/`exe` followed by the space-joined argv.
fn prefixed_args(prefix: &str, args: &[String]) -> String {
    let mut out = prefix.to_string();
    for arg in args {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(arg);
    }
    out
}

fn parent_attr(table: &ThreadTable, entry: &ThreadEntry, attr: fn(&ThreadEntry) -> &str) -> String {
    table.get(entry.ptid).map(|p| attr(p).to_string()).unwrap_or_default()
}

fn parent_attr_owned(
    table: &ThreadTable,
    entry: &ThreadEntry,
    attr: fn(&ThreadEntry) -> String,
) -> String {
    table.get(entry.ptid).map(attr).unwrap_or_default()
}

/// Walks up the parent chain exactly `steps` hops, stopping early (with no
/// result) if the init process is reached first.
fn ancestor<'t>(table: &'t ThreadTable, entry: &ThreadEntry, steps: u32) -> Option<&'t ThreadEntry> {
    let mut ptid = entry.ptid;
    for j in 0..steps {
        let lineage = table.get(ptid)?;
        if j == steps - 1 {
            return Some(lineage);
        }
        if ptid == 1 {
            return None;
        }
        ptid = lineage.ptid;
    }
    None
}

/// Ancestor attribute with `k = 0` meaning the current thread.
fn ancestor_attr(
    table: &ThreadTable,
    entry: &ThreadEntry,
    steps: u32,
    attr: fn(&ThreadEntry) -> &str,
) -> String {
    if steps < 1 {
        return attr(entry).to_string();
    }
    ancestor(table, entry, steps).map(|a| attr(a).to_string()).unwrap_or_default()
}

/// Walks ancestors while they share the thread's `key` value (session id or
/// process group id); the last such ancestor is the leader. The walk is
/// hop-capped so an inconsistent table cannot loop.
fn leader<'t>(
    table: &'t ThreadTable,
    entry: &'t ThreadEntry,
    key: fn(&ThreadEntry) -> i64,
    max_hops: u32,
) -> &'t ThreadEntry {
    let want = key(entry);
    let mut current = entry;
    let mut ptid = entry.ptid;

    for _ in 0..max_hops {
        let Some(lineage) = table.get(ptid) else {
            break;
        };
        if key(lineage) != want {
            break;
        }
        ptid = lineage.ptid;
        current = lineage;
    }

    current
}

/// The thread's own attribute concatenated with its ancestors' values, up
/// to `steps` hops inclusive. `steps = 0` yields "".
fn lineage_concat(
    table: &ThreadTable,
    entry: &ThreadEntry,
    steps: u32,
    attr: fn(&ThreadEntry) -> &str,
) -> String {
    if steps < 1 {
        return String::new();
    }

    let mut out = attr(entry).to_string();
    let mut ptid = entry.ptid;
    for j in 0..steps {
        let Some(lineage) = table.get(ptid) else {
            break;
        };
        out.push_str(attr(lineage));
        if j == steps - 1 {
            break;
        }
        if ptid == 1 {
            break;
        }
        ptid = lineage.ptid;
    }

    out
}

/// With a key: the first `KEY=VALUE` entry whose key matches byte-wise
/// (keys are ASCII by convention), value space-trimmed. Without a key: all
/// entries space-joined.
fn env_value(entry: &ThreadEntry, key: Option<&str>) -> String {
    match key {
        Some(key) if !key.is_empty() => {
            for var in &entry.env {
                if var.len() > key.len() + 1
                    && var.as_bytes()[key.len()] == b'='
                    && var.starts_with(key)
                {
                    return var[key.len() + 1..].trim_matches(' ').to_string();
                }
            }
            String::new()
        }
        _ => entry.env.join(" "),
    }
}
