// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identifier types shared across the export pipeline.
//!
//! [`ElementId`] names an element of the host model, [`BodyGroupKey`] names
//! "the Nth member of group type T" for geometry reuse, and [`GlobalId`] is
//! the 22-character IFC GlobalId written onto rooted instances.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an element in the host model.
///
/// `ElementId::INVALID` is the only reserved value and means "no element".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ElementId(pub i64);

impl ElementId {
    /// Sentinel meaning "no element".
    pub const INVALID: ElementId = ElementId(-1);

    /// Creates an element id from its raw value.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns `true` unless this is the [`ElementId::INVALID`] sentinel.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Returns the raw integer value.
    pub fn raw(self) -> i64 {
        self.0
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<i64> for ElementId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<i32> for ElementId {
    fn from(raw: i32) -> Self {
        Self(i64::from(raw))
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the `member_index`-th member of group (or assembly) type
/// `group_type_id`.
///
/// Two elements sharing a key are assumed to be geometrically identical by
/// construction. The key does not verify that; callers only build one for
/// unmodified members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyGroupKey {
    pub group_type_id: ElementId,
    pub member_index: i32,
}

impl BodyGroupKey {
    pub fn new(group_type_id: ElementId, member_index: i32) -> Self {
        Self {
            group_type_id,
            member_index,
        }
    }
}

/// IFC base64 alphabet used by compressed GlobalIds.
const GUID_ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_$";

/// A 22-character IFC GlobalId.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(String);

impl GlobalId {
    /// Generates a fresh random GlobalId.
    pub fn new_v4() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Compresses a UUID into the IFC GlobalId form.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self::from_u128(uuid.as_u128())
    }

    /// Compresses a raw 128-bit value: one leading character carries the top
    /// 2 bits, the remaining 21 carry 6 bits each.
    pub fn from_u128(value: u128) -> Self {
        let mut out = String::with_capacity(22);
        out.push(GUID_ALPHABET[((value >> 126) & 0x3) as usize] as char);
        for i in 1..22 {
            let shift = 6 * (21 - i);
            out.push(GUID_ALPHABET[((value >> shift) & 0x3f) as usize] as char);
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GlobalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
