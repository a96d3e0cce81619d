pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const SIGNATURE_PART_SIZE: usize = 32;
pub const GENESIS_DATA: &str = "Genesis Block";
/// 2024-01-01T00:00:00Z, shared by every node on the default network.
pub const GENESIS_TIMESTAMP: u64 = 1_704_067_200;
