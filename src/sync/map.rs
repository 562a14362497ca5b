//! The declarative `SyncMap`: a versioned, binary-embedded default plus the
//! per-entry flags that drive [`super::SyncEngine`] (§3 SyncMap entry).

use std::fmt;

/// One flag letter from the `d f j m s x` alphabet (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncFlag {
    Directory,
    File,
    InitJson,
    Mirror,
    Secret,
    ExcludeSystemSubtree,
}

impl SyncFlag {
    fn letter(self) -> char {
        match self {
            SyncFlag::Directory => 'd',
            SyncFlag::File => 'f',
            SyncFlag::InitJson => 'j',
            SyncFlag::Mirror => 'm',
            SyncFlag::Secret => 's',
            SyncFlag::ExcludeSystemSubtree => 'x',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'd' => Some(SyncFlag::Directory),
            'f' => Some(SyncFlag::File),
            'j' => Some(SyncFlag::InitJson),
            'm' => Some(SyncFlag::Mirror),
            's' => Some(SyncFlag::Secret),
            'x' => Some(SyncFlag::ExcludeSystemSubtree),
            _ => None,
        }
    }
}

/// A `(source-path-in-host-mount, target-path-in-volume-mount, flags)`
/// triple. `source` and `target` are relative to `/source` and `/target`
/// respectively inside the helper container.
#[derive(Debug, Clone)]
pub struct SyncMapEntry {
    pub source: &'static str,
    pub target: &'static str,
    pub flags: &'static [SyncFlag],
}

impl SyncMapEntry {
    pub fn has(&self, flag: SyncFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Parse a `flags` string such as `"ds"` into the matching entry flags,
    /// for extension entries loaded from a user manifest.
    pub fn parse_flags(raw: &str) -> Result<Vec<SyncFlag>, String> {
        let mut out = Vec::new();
        for c in raw.chars() {
            match SyncFlag::from_letter(c) {
                Some(f) => out.push(f),
                None => return Err(format!("unrecognized sync flag '{c}'")),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for SyncMapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: String = self.flags.iter().map(|fl| fl.letter()).collect();
        write!(f, "{} -> {} [{flags}]", self.source, self.target)
    }
}

use SyncFlag::{Directory, ExcludeSystemSubtree, File, InitJson, Mirror, Secret};

/// The default sync map embedded in the binary. Includes `~/.tmux.conf`
/// alongside the other default dotfiles/config directories.
pub const DEFAULT_SYNC_MAP: &[SyncMapEntry] = &[
    SyncMapEntry {
        source: ".gitconfig",
        target: ".gitconfig",
        flags: &[File],
    },
    SyncMapEntry {
        source: ".tmux.conf",
        target: ".tmux.conf",
        flags: &[File],
    },
    SyncMapEntry {
        source: ".ssh",
        target: ".ssh",
        flags: &[Directory, Secret, Mirror],
    },
    SyncMapEntry {
        source: ".aws",
        target: ".aws",
        flags: &[Directory, Secret],
    },
    SyncMapEntry {
        source: ".config/containai/plugins.json",
        target: ".config/containai/plugins.json",
        flags: &[File, InitJson],
    },
    SyncMapEntry {
        source: ".config/containai/marketplaces.json",
        target: ".config/containai/marketplaces.json",
        flags: &[File, InitJson],
    },
    SyncMapEntry {
        source: ".config/containai/settings.json",
        target: ".config/containai/settings.json",
        flags: &[File, InitJson],
    },
    SyncMapEntry {
        source: ".cache/containai",
        target: ".cache/containai",
        flags: &[Directory, Mirror, ExcludeSystemSubtree],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_includes_tmux_conf() {
        assert!(DEFAULT_SYNC_MAP.iter().any(|e| e.source == ".tmux.conf"));
    }

    #[test]
    fn parses_flag_letters() {
        let flags = SyncMapEntry::parse_flags("dsm").unwrap();
        assert_eq!(flags, vec![Directory, Secret, Mirror]);
    }

    #[test]
    fn rejects_unknown_flag_letter() {
        assert!(SyncMapEntry::parse_flags("dz").is_err());
    }

    #[test]
    fn display_renders_flag_letters_in_declared_order() {
        let entry = SyncMapEntry {
            source: "a",
            target: "b",
            flags: &[Directory, Secret],
        };
        assert_eq!(entry.to_string(), "a -> b [ds]");
    }
}
