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

//! `dscached`: the disk-store object cache core — a bounded in-memory
//! cache fronting a persistent key-value store, threaded I/O, blocking-
//! client coordination and advisory key locking. See `DESIGN.md` in
//! the repository root for the full design.

pub mod config;
pub mod diskstore;
pub mod engine;
pub mod keyval;
pub mod registry;
pub mod util;

pub use engine::Engine;
