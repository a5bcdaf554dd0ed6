// # Hash Index
//
// Persistent primary-key -> node-offset lookup, split into 256 shards by
// the top eight bits of the key hash. Key handling is selected at open
// time as an (insert, hash, equals) function triple for the key's logical
// type; string keys keep their payload in a disk overflow file and equality
// fast-rejects on length and a four-byte prefix.

mod hash_index;
mod utils;

pub use hash_index::HashIndex;
pub use utils::{
    index_functions_for, shard_for_hash, IndexFunctions, NUM_HASH_SHARDS, NUM_HASH_SHARDS_LOG2,
};
