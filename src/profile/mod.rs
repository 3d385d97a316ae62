//! Behavior-profile field model and parser.
//!
//! A profile is a whitespace-separated string such as
//! `"%proc.name %proc.aname[2] %fd.name"`. Tokens beginning with `%` are
//! parsed into [`Selector`]s; anything else is a literal reproduced
//! verbatim in the fingerprint. Unknown `%` tokens are dropped with a
//! warning so a typo never aborts configuration.

use tracing::warn;

/// FieldKind enumerates every recognized profile selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    ContainerId,
    Name,
    Pname,
    Aname,
    Args,
    Cmdnargs,
    Cmdlenargs,
    Cmdline,
    Pcmdline,
    Acmdline,
    Exeline,
    Exe,
    Pexe,
    Aexe,
    Exepath,
    Pexepath,
    Aexepath,
    Cwd,
    Tty,
    Pid,
    Ppid,
    Apid,
    Vpid,
    Pvpid,
    Sid,
    Sname,
    SidExe,
    SidExepath,
    Vpgid,
    VpgidName,
    VpgidExe,
    VpgidExepath,
    Env,
    IsExeWritable,
    IsExeUpperLayer,
    IsExeFromMemfd,
    ExeIno,
    ExeInoCtime,
    ExeInoMtime,
    IsSidLeader,
    IsVpgidLeader,
    FdNum,
    FdName,
    FdDirectory,
    FdFilename,
    FdIno,
    FdDev,
    FdNameRaw,
    AnameLineageConcat,
    AexeLineageConcat,
    AexepathLineageConcat,
    FdNamePart1,
    FdNamePart2,
    /// A non-`%` profile token, reproduced verbatim in the fingerprint.
    Literal,
}

/// Name table. Lookup is exact on the pre-bracket token, so prefix-sharing
/// selectors such as `%proc.exe_ino.ctime` vs `%proc.exe_ino` cannot shadow
/// each other.
const FIELD_NAMES: &[(&str, FieldKind)] = &[
    ("%custom.aexepath_lineage_concat", FieldKind::AexepathLineageConcat),
    ("%custom.aname_lineage_concat", FieldKind::AnameLineageConcat),
    ("%custom.aexe_lineage_concat", FieldKind::AexeLineageConcat),
    ("%proc.is_exe_upper_layer", FieldKind::IsExeUpperLayer),
    ("%proc.is_exe_from_memfd", FieldKind::IsExeFromMemfd),
    ("%proc.is_exe_writable", FieldKind::IsExeWritable),
    ("%proc.is_vpgid_leader", FieldKind::IsVpgidLeader),
    ("%custom.fdname_part1", FieldKind::FdNamePart1),
    ("%custom.fdname_part2", FieldKind::FdNamePart2),
    ("%proc.is_sid_leader", FieldKind::IsSidLeader),
    ("%proc.vpgid.exepath", FieldKind::VpgidExepath),
    ("%proc.exe_ino.ctime", FieldKind::ExeInoCtime),
    ("%proc.exe_ino.mtime", FieldKind::ExeInoMtime),
    ("%proc.sid.exepath", FieldKind::SidExepath),
    ("%proc.vpgid.name", FieldKind::VpgidName),
    ("%proc.vpgid.exe", FieldKind::VpgidExe),
    ("%proc.cmdlenargs", FieldKind::Cmdlenargs),
    ("%proc.aexepath", FieldKind::Aexepath),
    ("%proc.pexepath", FieldKind::Pexepath),
    ("%proc.acmdline", FieldKind::Acmdline),
    ("%proc.pcmdline", FieldKind::Pcmdline),
    ("%proc.cmdnargs", FieldKind::Cmdnargs),
    ("%proc.sid.exe", FieldKind::SidExe),
    ("%proc.exe_ino", FieldKind::ExeIno),
    ("%proc.exepath", FieldKind::Exepath),
    ("%proc.exeline", FieldKind::Exeline),
    ("%proc.cmdline", FieldKind::Cmdline),
    ("%container.id", FieldKind::ContainerId),
    ("%fd.directory", FieldKind::FdDirectory),
    ("%fd.filename", FieldKind::FdFilename),
    ("%fd.nameraw", FieldKind::FdNameRaw),
    ("%proc.vpgid", FieldKind::Vpgid),
    ("%proc.aname", FieldKind::Aname),
    ("%proc.pname", FieldKind::Pname),
    ("%proc.sname", FieldKind::Sname),
    ("%proc.pvpid", FieldKind::Pvpid),
    ("%proc.args", FieldKind::Args),
    ("%proc.aexe", FieldKind::Aexe),
    ("%proc.pexe", FieldKind::Pexe),
    ("%proc.apid", FieldKind::Apid),
    ("%proc.ppid", FieldKind::Ppid),
    ("%proc.vpid", FieldKind::Vpid),
    ("%proc.name", FieldKind::Name),
    ("%proc.cwd", FieldKind::Cwd),
    ("%proc.tty", FieldKind::Tty),
    ("%proc.pid", FieldKind::Pid),
    ("%proc.sid", FieldKind::Sid),
    ("%proc.env", FieldKind::Env),
    ("%proc.exe", FieldKind::Exe),
    ("%fd.name", FieldKind::FdName),
    ("%fd.num", FieldKind::FdNum),
    ("%fd.ino", FieldKind::FdIno),
    ("%fd.dev", FieldKind::FdDev),
];

impl FieldKind {
    /// The profile token for this selector, without any `[arg]` suffix.
    pub fn token(self) -> &'static str {
        FIELD_NAMES
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("")
    }

    /// Selectors that accept a numeric `[k]` ancestor index.
    pub const fn takes_index(self) -> bool {
        matches!(
            self,
            Self::Aname
                | Self::Acmdline
                | Self::Aexe
                | Self::Aexepath
                | Self::Apid
                | Self::AnameLineageConcat
                | Self::AexeLineageConcat
                | Self::AexepathLineageConcat
        )
    }

    /// Selectors that accept a string `[KEY]` argument.
    pub const fn takes_key(self) -> bool {
        matches!(self, Self::Env)
    }

    /// Fd-dependent selectors, subject to fd-profile gating.
    pub const fn is_fd_field(self) -> bool {
        matches!(
            self,
            Self::FdNum
                | Self::FdName
                | Self::FdDirectory
                | Self::FdFilename
                | Self::FdIno
                | Self::FdDev
                | Self::FdNameRaw
                | Self::FdNamePart1
                | Self::FdNamePart2
        )
    }
}

/// A parsed profile selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub kind: FieldKind,
    /// Numeric index for `name[k]` selectors; `0` means the current thread.
    pub arg_id: Option<u32>,
    /// String key for `name[KEY]` selectors, or the raw text of a literal.
    pub arg_name: Option<String>,
}

impl Selector {
    fn plain(kind: FieldKind) -> Self {
        Self {
            kind,
            arg_id: None,
            arg_name: None,
        }
    }

    fn literal(text: &str) -> Self {
        Self {
            kind: FieldKind::Literal,
            arg_id: None,
            arg_name: Some(text.to_string()),
        }
    }
}

/// Parses a behavior-profile string into its selector sequence.
///
/// Unknown or malformed `%` tokens are dropped with a warning; parsing
/// never fails.
pub fn parse_profile(fields: &str) -> Vec<Selector> {
    let mut selectors = Vec::new();

    for token in fields.split_whitespace() {
        if !token.starts_with('%') {
            selectors.push(Selector::literal(token));
            continue;
        }

        match parse_token(token) {
            Some(sel) => selectors.push(sel),
            None => warn!(token, "unknown behavior profile field, dropping"),
        }
    }

    selectors
}

fn parse_token(token: &str) -> Option<Selector> {
    let (name, arg) = match token.find('[') {
        Some(open) => {
            let close = token.rfind(']')?;
            if close <= open + 1 {
                return None;
            }
            (&token[..open], Some(&token[open + 1..close]))
        }
        None => (token, None),
    };

    let (_, kind) = FIELD_NAMES.iter().find(|(n, _)| *n == name)?;
    let kind = *kind;

    match arg {
        None => Some(Selector::plain(kind)),
        Some(arg) if kind.takes_index() => {
            let arg_id = arg.parse::<u32>().ok()?;
            Some(Selector {
                kind,
                arg_id: Some(arg_id),
                arg_name: None,
            })
        }
        Some(arg) if kind.takes_key() => Some(Selector {
            kind,
            arg_id: None,
            arg_name: Some(arg.to_string()),
        }),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_fields() {
        let sels = parse_profile("%proc.name %proc.cmdline %fd.name");
        assert_eq!(sels.len(), 3);
        assert_eq!(sels[0].kind, FieldKind::Name);
        assert_eq!(sels[1].kind, FieldKind::Cmdline);
        assert_eq!(sels[2].kind, FieldKind::FdName);
    }

    #[test]
    fn test_parse_indexed_field() {
        let sels = parse_profile("%proc.aname[3]");
        assert_eq!(sels.len(), 1);
        assert_eq!(sels[0].kind, FieldKind::Aname);
        assert_eq!(sels[0].arg_id, Some(3));
    }

    #[test]
    fn test_parse_keyed_env_field() {
        let sels = parse_profile("%proc.env[PATH]");
        assert_eq!(sels.len(), 1);
        assert_eq!(sels[0].kind, FieldKind::Env);
        assert_eq!(sels[0].arg_name.as_deref(), Some("PATH"));
    }

    #[test]
    fn test_longest_name_wins() {
        let sels = parse_profile("%proc.exe_ino.ctime %proc.exe_ino %proc.exepath %proc.exe");
        let kinds: Vec<_> = sels.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FieldKind::ExeInoCtime,
                FieldKind::ExeIno,
                FieldKind::Exepath,
                FieldKind::Exe,
            ],
        );
    }

    #[test]
    fn test_literal_token_passthrough() {
        let sels = parse_profile("%proc.name -> %proc.pname");
        assert_eq!(sels.len(), 3);
        assert_eq!(sels[1].kind, FieldKind::Literal);
        assert_eq!(sels[1].arg_name.as_deref(), Some("->"));
    }

    #[test]
    fn test_unknown_token_dropped() {
        let sels = parse_profile("%proc.name %proc.nonsense %proc.exe");
        assert_eq!(sels.len(), 2);
        assert_eq!(sels[0].kind, FieldKind::Name);
        assert_eq!(sels[1].kind, FieldKind::Exe);
    }

    #[test]
    fn test_index_on_non_indexed_field_dropped() {
        assert!(parse_profile("%proc.name[2]").is_empty());
        assert!(parse_profile("%proc.aname[x]").is_empty());
        assert!(parse_profile("%proc.aname[]").is_empty());
    }

    #[test]
    fn test_custom_shortcut_fields() {
        let sels = parse_profile("%custom.aname_lineage_concat[4] %custom.fdname_part2");
        assert_eq!(sels[0].kind, FieldKind::AnameLineageConcat);
        assert_eq!(sels[0].arg_id, Some(4));
        assert_eq!(sels[1].kind, FieldKind::FdNamePart2);
        assert!(sels[1].kind.is_fd_field());
    }

    #[test]
    fn test_token_roundtrip() {
        for (name, kind) in FIELD_NAMES {
            assert_eq!(kind.token(), *name);
        }
    }
}
