//! Store key layout.
//!
//! Every record family lives under a one-byte namespace prefix. Integers
//! are big-endian so byte order matches numeric order; strings and
//! addresses carry a one-byte length prefix so composite keys stay
//! unambiguous under prefix iteration.
//!
//! | Prefix | Key                                                      | Value |
//! |--------|----------------------------------------------------------|-------|
//! | `0x00` | meta name                                                | chain metadata |
//! | `0x01` | identifier                                               | `EpochInfo` |
//! | `0x02` | program id                                               | `RewardProgram` |
//! | `0x03` | sequence                                                 | next program id |
//! | `0x04` | epoch id, program id                                     | program id |
//! | `0x05` | epoch id, epoch number, program id                       | `EpochRewardDistribution` |
//! | `0x06` | address, program id, epoch id, epoch number              | `SharesPerEpochPerRewardsProgram` |
//! | `0x07` | expiration height, address, program id, epoch id, number | share key |
//! | `0x08` | epoch id, epoch number, program id, address              | share key |
//! | `0x10` | address, denom                                           | balance |
//! | `0x11` | height, address, action type                             | activity entry |

use tally_types::{Address, EpochNumber, Height, ProgramId};

pub const META_PREFIX: u8 = 0x00;
pub const EPOCH_INFO_PREFIX: u8 = 0x01;
pub const REWARD_PROGRAM_PREFIX: u8 = 0x02;
pub const PROGRAM_SEQUENCE_PREFIX: u8 = 0x03;
pub const PROGRAMS_BY_EPOCH_PREFIX: u8 = 0x04;
pub const DISTRIBUTION_PREFIX: u8 = 0x05;
pub const SHARES_PREFIX: u8 = 0x06;
pub const SHARES_BY_EXPIRATION_PREFIX: u8 = 0x07;
pub const DISTRIBUTION_PARTICIPANTS_PREFIX: u8 = 0x08;
pub const BALANCE_PREFIX: u8 = 0x10;
pub const ACTIVITY_PREFIX: u8 = 0x11;

/// Incremental composite key builder.
#[derive(Clone, Debug)]
pub struct KeyBuilder(Vec<u8>);

impl KeyBuilder {
    pub fn new(prefix: u8) -> Self {
        Self(vec![prefix])
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a length-prefixed byte string. Inputs are validated to at
    /// most 255 bytes upstream; longer input is truncated.
    pub fn bytes(mut self, value: &[u8]) -> Self {
        let len = value.len().min(usize::from(u8::MAX));
        self.0.push(len as u8);
        self.0.extend_from_slice(&value[..len]);
        self
    }

    pub fn str(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    pub fn address(self, value: &Address) -> Self {
        self.bytes(value.as_bytes())
    }

    /// Append raw bytes without a length prefix.
    pub fn raw(mut self, value: &[u8]) -> Self {
        self.0.extend_from_slice(value);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

/// Smallest key greater than every key starting with `prefix`, or `None`
/// if no such key exists (prefix is all `0xff`).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

pub fn meta_key(name: &str) -> Vec<u8> {
    KeyBuilder::new(META_PREFIX).str(name).build()
}

pub fn epoch_info_key(identifier: &str) -> Vec<u8> {
    KeyBuilder::new(EPOCH_INFO_PREFIX).str(identifier).build()
}

pub fn epoch_info_prefix() -> Vec<u8> {
    vec![EPOCH_INFO_PREFIX]
}

pub fn reward_program_key(id: ProgramId) -> Vec<u8> {
    KeyBuilder::new(REWARD_PROGRAM_PREFIX).u64(id).build()
}

pub fn reward_program_prefix() -> Vec<u8> {
    vec![REWARD_PROGRAM_PREFIX]
}

pub fn program_sequence_key() -> Vec<u8> {
    vec![PROGRAM_SEQUENCE_PREFIX]
}

pub fn programs_by_epoch_prefix(epoch_id: &str) -> Vec<u8> {
    KeyBuilder::new(PROGRAMS_BY_EPOCH_PREFIX).str(epoch_id).build()
}

pub fn programs_by_epoch_key(epoch_id: &str, id: ProgramId) -> Vec<u8> {
    KeyBuilder::new(PROGRAMS_BY_EPOCH_PREFIX)
        .str(epoch_id)
        .u64(id)
        .build()
}

pub fn distribution_key(epoch_id: &str, epoch_number: EpochNumber, program_id: ProgramId) -> Vec<u8> {
    KeyBuilder::new(DISTRIBUTION_PREFIX)
        .str(epoch_id)
        .u64(epoch_number)
        .u64(program_id)
        .build()
}

pub fn shares_key(
    address: &Address,
    program_id: ProgramId,
    epoch_id: &str,
    epoch_number: EpochNumber,
) -> Vec<u8> {
    KeyBuilder::new(SHARES_PREFIX)
        .address(address)
        .u64(program_id)
        .str(epoch_id)
        .u64(epoch_number)
        .build()
}

pub fn shares_by_address_prefix(address: &Address) -> Vec<u8> {
    KeyBuilder::new(SHARES_PREFIX).address(address).build()
}

/// Expiration index entry. The share key (minus its namespace byte) is
/// appended raw so entries expiring at the same height stay unique.
pub fn expiration_index_key(expiration_height: Height, share_key: &[u8]) -> Vec<u8> {
    KeyBuilder::new(SHARES_BY_EXPIRATION_PREFIX)
        .u64(expiration_height)
        .raw(share_key.get(1..).unwrap_or_default())
        .build()
}

pub fn expiration_index_prefix() -> Vec<u8> {
    vec![SHARES_BY_EXPIRATION_PREFIX]
}

/// First expiration index key at or after `height`.
pub fn expiration_height_bound(height: Height) -> Vec<u8> {
    KeyBuilder::new(SHARES_BY_EXPIRATION_PREFIX).u64(height).build()
}

/// Read the expiration height back out of an expiration index key.
pub fn expiration_height_of(index_key: &[u8]) -> Option<Height> {
    let bytes: [u8; 8] = index_key.get(1..9)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

pub fn distribution_participants_prefix(
    epoch_id: &str,
    epoch_number: EpochNumber,
    program_id: ProgramId,
) -> Vec<u8> {
    KeyBuilder::new(DISTRIBUTION_PARTICIPANTS_PREFIX)
        .str(epoch_id)
        .u64(epoch_number)
        .u64(program_id)
        .build()
}

pub fn distribution_participant_key(
    epoch_id: &str,
    epoch_number: EpochNumber,
    program_id: ProgramId,
    address: &Address,
) -> Vec<u8> {
    KeyBuilder::new(DISTRIBUTION_PARTICIPANTS_PREFIX)
        .str(epoch_id)
        .u64(epoch_number)
        .u64(program_id)
        .address(address)
        .build()
}

pub fn balance_key(address: &Address, denom: &str) -> Vec<u8> {
    KeyBuilder::new(BALANCE_PREFIX)
        .address(address)
        .str(denom)
        .build()
}

pub fn activity_key(height: Height, address: &Address, action_type: &str) -> Vec<u8> {
    KeyBuilder::new(ACTIVITY_PREFIX)
        .u64(height)
        .address(address)
        .str(action_type)
        .build()
}

/// First activity key at or after `height`.
pub fn activity_height_bound(height: Height) -> Vec<u8> {
    KeyBuilder::new(ACTIVITY_PREFIX).u64(height).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s).expect("address")
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(&[0x01]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
        assert_eq!(prefix_end(&[]), None);
    }

    #[test]
    fn test_length_prefix_disambiguates() {
        // "ab" + "c" must not collide with "a" + "bc"
        let k1 = KeyBuilder::new(0x01).str("ab").str("c").build();
        let k2 = KeyBuilder::new(0x01).str("a").str("bc").build();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_program_keys_ordered_numerically() {
        assert!(reward_program_key(2) < reward_program_key(10));
        assert!(reward_program_key(255) < reward_program_key(256));
    }

    #[test]
    fn test_shares_key_under_address_prefix() {
        let alice = addr("tally1alice");
        let key = shares_key(&alice, 7, "monthly", 3);
        assert!(key.starts_with(&shares_by_address_prefix(&alice)));
        // "tally1al" must not match "tally1alice"
        assert!(!key.starts_with(&shares_by_address_prefix(&addr("tally1al"))));
    }

    #[test]
    fn test_expiration_index_roundtrip_height() {
        let share = shares_key(&addr("tally1alice"), 1, "day", 4);
        let index = expiration_index_key(12_345, &share);
        assert_eq!(expiration_height_of(&index), Some(12_345));
        assert!(expiration_index_key(9, &share) < expiration_index_key(10, &share));
    }

    #[test]
    fn test_distribution_participant_under_prefix() {
        let key = distribution_participant_key("week", 2, 5, &addr("tally1bob"));
        assert!(key.starts_with(&distribution_participants_prefix("week", 2, 5)));
        assert!(!key.starts_with(&distribution_participants_prefix("week", 2, 50)));
    }
}
