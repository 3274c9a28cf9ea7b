use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Who a permission bit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Owner,
    Group,
    Others,
}

/// What a permission bit grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

const CLASSES: [Class; 3] = [Class::Owner, Class::Group, Class::Others];
const ACCESSES: [Access; 3] = [Access::Read, Access::Write, Access::Execute];

/// Nine-bit owner/group/others × read/write/execute mask.
///
/// The bit layout matches POSIX mode bits, so `OWNER_READ` is `0o400`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission(u16);

impl Permission {
    pub const EMPTY: Permission = Permission(0);

    pub const OWNER_READ: Permission = Permission(0o400);
    pub const OWNER_WRITE: Permission = Permission(0o200);
    pub const OWNER_EXECUTE: Permission = Permission(0o100);

    pub const GROUP_READ: Permission = Permission(0o040);
    pub const GROUP_WRITE: Permission = Permission(0o020);
    pub const GROUP_EXECUTE: Permission = Permission(0o010);

    pub const OTHERS_READ: Permission = Permission(0o004);
    pub const OTHERS_WRITE: Permission = Permission(0o002);
    pub const OTHERS_EXECUTE: Permission = Permission(0o001);

    /// The single bit for `class` × `access`.
    pub const fn flag(class: Class, access: Access) -> Permission {
        let shift = match class {
            Class::Owner => 6,
            Class::Group => 3,
            Class::Others => 0,
        };
        let bit = match access {
            Access::Read => 0o4,
            Access::Write => 0o2,
            Access::Execute => 0o1,
        };
        Permission(bit << shift)
    }

    /// Build a mask by asking `granted` about each of the nine bits in turn.
    pub fn from_fn(mut granted: impl FnMut(Class, Access) -> bool) -> Permission {
        let mut permission = Permission::EMPTY;
        for class in CLASSES {
            for access in ACCESSES {
                if granted(class, access) {
                    permission |= Permission::flag(class, access);
                }
            }
        }
        permission
    }

    /// Low nine bits of a POSIX `st_mode`.
    pub const fn from_mode(mode: u32) -> Permission {
        Permission((mode & 0o777) as u16)
    }

    pub const fn to_mode(self) -> u32 {
        self.0 as u32
    }

    pub const fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Permission) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in CLASSES {
            for (access, c) in ACCESSES.into_iter().zip(['r', 'w', 'x']) {
                let c = if self.contains(Permission::flag(class, access)) {
                    c
                } else {
                    '-'
                };
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}
