//! Shared serde helpers for configuration

/// Serialize `std::time::Duration` as whole milliseconds (u64)
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Timing {
///     #[serde(with = "bf_core::config::serde_utils::duration_millis")]
///     grace_timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as milliseconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserialize a Duration from milliseconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
