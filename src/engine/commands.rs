/*
 * This file is a part of dscached, a disk-store object cache core
 * derived in the spirit of Skytable (https://github.com/skytable/skytable).
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! # Command descriptor table (§6)
//!
//! Maps a command name to the argv positions that are keys, so C7's
//! `block_multi` can preload everything a command touches before its
//! handler runs. `last_key` may be negative, meaning "count from the end
//! of argv". Commands with a data-dependent key set (e.g. a variable-
//! arity union) supply a `preload` hook instead of a fixed stride.

use bytes::Bytes;
use std::collections::HashMap;

pub type PreloadFn = fn(&[Bytes]) -> Vec<usize>;

#[derive(Clone, Copy)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub first_key: i32,
    pub last_key: i32,
    pub key_step: i32,
    pub preload: Option<PreloadFn>,
}

impl CommandDescriptor {
    const fn fixed(name: &'static str, first_key: i32, last_key: i32, key_step: i32) -> Self {
        Self {
            name,
            first_key,
            last_key,
            key_step,
            preload: None,
        }
    }

    const fn no_keys(name: &'static str) -> Self {
        Self::fixed(name, 0, 0, 0)
    }
}

/// Resolve which argv indices (including argv[0], the command name) are
/// keys for this descriptor.
pub fn key_indices(desc: &CommandDescriptor, argv: &[Bytes]) -> Vec<usize> {
    if let Some(preload) = desc.preload {
        return preload(argv);
    }
    if desc.first_key == 0 {
        return Vec::new();
    }
    let last = if desc.last_key < 0 {
        (argv.len() as i32 + desc.last_key) as usize
    } else {
        desc.last_key as usize
    };
    let mut idx = desc.first_key as usize;
    let mut out = Vec::new();
    let step = desc.key_step.max(1) as usize;
    while idx <= last && idx < argv.len() {
        out.push(idx);
        idx += step;
    }
    out
}

/// A variable-arity preload hook: every argument after the command name
/// is a key (e.g. `MGET k1 k2 k3`, or a union/intersection command whose
/// key count rides in argv rather than a fixed descriptor shape).
pub fn preload_all_args(argv: &[Bytes]) -> Vec<usize> {
    (1..argv.len()).collect()
}

pub fn default_table() -> HashMap<&'static str, CommandDescriptor> {
    let mut t = HashMap::new();
    for d in [
        CommandDescriptor::fixed("GET", 1, 1, 1),
        CommandDescriptor::fixed("SET", 1, 1, 1),
        CommandDescriptor::fixed("DEL", 1, -1, 1),
        CommandDescriptor {
            name: "MGET",
            first_key: 1,
            last_key: -1,
            key_step: 1,
            preload: Some(preload_all_args),
        },
        CommandDescriptor::no_keys("GRAB"),
        CommandDescriptor::no_keys("RELEASE"),
        CommandDescriptor::no_keys("MULTI"),
        CommandDescriptor::no_keys("EXEC"),
    ] {
        t.insert(d.name, d);
    }
    t
}
