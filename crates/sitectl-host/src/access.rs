use crate::HostError;
use sitectl_schema::AccountName;
use std::fmt;
use std::ops::BitOr;
use std::path::Path;

/// A set of file-system rights granted to a principal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileRights(u8);

impl FileRights {
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(1 << 1);
    pub const MODIFY: Self = Self(1 << 2);
    pub const DELETE: Self = Self(1 << 3);
    pub const CREATE_FILES: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for FileRights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for FileRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::READ, "read"),
            (Self::WRITE, "write"),
            (Self::MODIFY, "modify"),
            (Self::DELETE, "delete"),
            (Self::CREATE_FILES, "create-files"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "FileRights({})", set.join("|"))
    }
}

/// An allow entry on a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub principal: AccountName,
    pub rights: FileRights,
    /// Applies to contained directories and files.
    pub inherit: bool,
}

impl AccessRule {
    pub fn inherited(principal: AccountName, rights: FileRights) -> Self {
        Self {
            principal,
            rights,
            inherit: true,
        }
    }
}

/// Directory access-control entries.
pub trait AccessControl: Send + Sync {
    /// Set the allow rule for `rule.principal` on `dir`, replacing any
    /// existing rule for that principal.
    fn grant(&self, dir: &Path, rule: &AccessRule) -> Result<(), HostError>;

    /// Remove every entry for `principal` on `dir`.
    fn revoke_all(&self, dir: &Path, principal: &AccountName) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rights_union_and_contains() {
        let rw = FileRights::READ | FileRights::WRITE;
        assert!(rw.contains(FileRights::READ));
        assert!(rw.contains(FileRights::WRITE));
        assert!(!rw.contains(FileRights::DELETE));
        assert!(rw.contains(FileRights::empty()));
    }

    #[test]
    fn rights_debug_lists_flags() {
        let rights = FileRights::READ | FileRights::CREATE_FILES;
        assert_eq!(format!("{rights:?}"), "FileRights(read|create-files)");
    }
}
