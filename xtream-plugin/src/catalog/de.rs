//! Lenient field decoders.
//!
//! Providers disagree on JSON types: ids arrive as numbers or strings, flags
//! as `0`/`1`/`"1"`/`true`, and empty objects as `[]`.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::models::Episode;

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn i32_lenient<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_i64(&value)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or_default())
}

pub fn opt_i32_lenient<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_i64(&value).and_then(|v| i32::try_from(v).ok()))
}

pub fn opt_i64_lenient<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_i64(&value))
}

pub fn bool_lenient<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match &value {
        Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        other => value_to_i64(other).is_some_and(|v| v != 0),
    })
}

pub fn string_lenient<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// An object, or `T::default()` when the provider sends `[]`/`null`.
pub fn object_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(_) => serde_json::from_value(value).map_err(D::Error::custom),
        _ => Ok(T::default()),
    }
}

/// A list, or empty when the provider sends an object or `null`.
pub fn list_or_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(_) => serde_json::from_value(value).map_err(D::Error::custom),
        _ => Ok(Vec::new()),
    }
}

/// Episodes grouped by season number.
///
/// Accepts the usual `{"1": [...], "2": [...]}` map as well as a bare list of
/// per-season lists, in which case each episode's own `season` is used.
pub fn episodes_by_season<'de, D>(deserializer: D) -> Result<BTreeMap<i32, Vec<Episode>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let mut grouped: BTreeMap<i32, Vec<Episode>> = BTreeMap::new();

    match value {
        Value::Object(map) => {
            for (key, episodes) in map {
                let Ok(season) = key.trim().parse::<i32>() else {
                    continue;
                };
                let episodes: Vec<Episode> =
                    serde_json::from_value(episodes).map_err(D::Error::custom)?;
                grouped.entry(season).or_default().extend(episodes);
            }
        }
        Value::Array(lists) => {
            for list in lists {
                let episodes: Vec<Episode> =
                    serde_json::from_value(list).map_err(D::Error::custom)?;
                for episode in episodes {
                    grouped.entry(episode.season).or_default().push(episode);
                }
            }
        }
        _ => {}
    }

    for episodes in grouped.values_mut() {
        episodes.sort_by_key(|e| e.episode_num);
    }
    Ok(grouped)
}
