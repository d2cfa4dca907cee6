//! Shared serde helpers for configuration and persisted records

/// Serialize a `Duration` as whole seconds
///
/// Keeps timeouts readable in `config.toml`:
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Timeouts {
///     #[serde(with = "pb_core::config::serde_utils::duration_secs")]
///     http: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Deserialize `null` as the type's default value
///
/// Persisted records written by older builds may carry `null` where a map
/// or list is now expected.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    use serde::Deserialize;
    Option::<T>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}
