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

use crc::{Crc, Digest, CRC_64_XZ};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// A running checksum over a sequence of byte blocks, grounded on the
/// teacher's `engine::storage::checksum::SCrc`.
pub struct RecordCrc {
    digest: Digest<'static, u64>,
}

impl RecordCrc {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }
    pub fn update(&mut self, b: &[u8]) {
        self.digest.update(b)
    }
    pub fn finish(self) -> u64 {
        self.digest.finalize()
    }
}
