//! JSON encoding of the stored lease value.
//!
//! The layout is `{"record": {...}, "epoch": "..."}`. The Redis update script
//! reads `record.holderIdentity` from the same bytes, so field names here and
//! in the script must stay in step.

use crate::{record::StoredState, Result};
use serde::{Deserialize, Deserializer};

pub fn encode(state: &StoredState) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(state)?)
}

pub fn decode(raw: &[u8]) -> Result<StoredState> {
    Ok(serde_json::from_slice(raw)?)
}

/// Reads an explicit JSON `null` as the zero value, the way the Redis update
/// script sees it.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct HolderOnly {
    #[serde(deserialize_with = "null_as_default")]
    record: HolderRecord,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct HolderRecord {
    #[serde(deserialize_with = "null_as_default")]
    holder_identity: String,
}

/// Extracts the holder identity without decoding the rest of the record.
pub fn holder_of(raw: &[u8]) -> Result<String> {
    let partial: HolderOnly = serde_json::from_slice(raw)?;
    Ok(partial.record.holder_identity)
}
