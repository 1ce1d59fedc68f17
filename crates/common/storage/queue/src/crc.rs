// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CRC32 checksums for chunk bodies.
//!
//! The checksum covers the item count as well as the encoded body, so a
//! header that disagrees with its body is caught even when the body itself
//! is intact.

use crc32fast::Hasher;

#[inline]
pub(crate) fn calculate_chunk_crc(count: u32, body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&count.to_le_bytes());
    hasher.update(body);
    hasher.finalize()
}

#[inline]
pub(crate) fn verify_chunk_crc(count: u32, body: &[u8], expected: u32) -> bool {
    calculate_chunk_crc(count, body) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_chunk_crc() {
        let body = b"encoded items";
        let crc = calculate_chunk_crc(3, body);

        assert_eq!(crc, calculate_chunk_crc(3, body));
        assert!(verify_chunk_crc(3, body, crc));
        assert!(!verify_chunk_crc(4, body, crc));
        assert!(!verify_chunk_crc(3, b"other items", crc));
        assert!(!verify_chunk_crc(3, body, crc.wrapping_add(1)));
    }
}
