//! Provider catalog payloads.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::de;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub category_id: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub category_name: String,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub parent_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveStream {
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub num: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub stream_id: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub stream_icon: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub epg_channel_id: String,
    #[serde(default, deserialize_with = "de::opt_i32_lenient")]
    pub category_id: Option<i32>,
    #[serde(default, deserialize_with = "de::bool_lenient")]
    pub tv_archive: bool,
    /// Days of catch-up history the provider retains.
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub tv_archive_duration: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VodStream {
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub num: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub stream_id: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub stream_icon: String,
    #[serde(default, deserialize_with = "de::opt_i32_lenient")]
    pub category_id: Option<i32>,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub container_extension: String,
    #[serde(default, deserialize_with = "de::opt_i64_lenient")]
    pub added: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub num: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub series_id: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub cover: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub plot: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub genre: String,
    #[serde(default, rename = "releaseDate", deserialize_with = "de::string_lenient")]
    pub release_date: String,
    #[serde(default, deserialize_with = "de::opt_i64_lenient")]
    pub last_modified: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_i32_lenient")]
    pub category_id: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub cover: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub plot: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub genre: String,
    #[serde(default, rename = "releaseDate", deserialize_with = "de::string_lenient")]
    pub release_date: String,
    #[serde(default, deserialize_with = "de::opt_i32_lenient")]
    pub tmdb: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Season {
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub id: i32,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub season_number: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub overview: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub cover: String,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub episode_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub plot: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub movie_image: String,
    #[serde(default, deserialize_with = "de::opt_i32_lenient")]
    pub duration_secs: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub id: i32,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub episode_num: i32,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub container_extension: String,
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub season: i32,
    #[serde(default, deserialize_with = "de::object_or_default")]
    pub info: EpisodeInfo,
}

/// `get_series_info` response: everything about one series in a single call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStreamInfo {
    #[serde(default, deserialize_with = "de::list_or_empty")]
    pub seasons: Vec<Season>,
    #[serde(default, deserialize_with = "de::object_or_default")]
    pub info: SeriesInfo,
    #[serde(default, deserialize_with = "de::episodes_by_season")]
    pub episodes: BTreeMap<i32, Vec<Episode>>,
}

impl SeriesStreamInfo {
    /// Seasons to expose. Providers often omit the season list while still
    /// grouping episodes by season, so those are synthesized.
    pub fn effective_seasons(&self) -> Vec<Season> {
        let mut seasons: Vec<Season> = self
            .seasons
            .iter()
            .filter(|s| self.episodes.contains_key(&s.season_number))
            .cloned()
            .collect();

        for (number, episodes) in &self.episodes {
            if !seasons.iter().any(|s| s.season_number == *number) {
                seasons.push(Season {
                    season_number: *number,
                    name: format!("Season {number}"),
                    episode_count: episodes.len() as i32,
                    ..Default::default()
                });
            }
        }

        seasons.sort_by_key(|s| s.season_number);
        seasons
    }

    pub fn episodes_for(&self, season_number: i32) -> &[Episode] {
        self.episodes
            .get(&season_number)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpgListing {
    #[serde(default, deserialize_with = "de::i32_lenient")]
    pub id: i32,
    /// Base64 encoded.
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub title: String,
    /// Base64 encoded.
    #[serde(default, deserialize_with = "de::string_lenient")]
    pub description: String,
    #[serde(default, deserialize_with = "de::opt_i64_lenient")]
    pub start_timestamp: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_i64_lenient")]
    pub stop_timestamp: Option<i64>,
    #[serde(default, deserialize_with = "de::bool_lenient")]
    pub has_archive: bool,
}

fn decode_text(raw: &str) -> String {
    STANDARD
        .decode(raw.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}

impl EpgListing {
    pub fn decoded_title(&self) -> String {
        decode_text(&self.title)
    }

    pub fn decoded_description(&self) -> String {
        decode_text(&self.description)
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.stop_timestamp.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Whole minutes between start and end, if both are known and ordered.
    pub fn duration_minutes(&self) -> Option<i32> {
        let (start, stop) = (self.start_timestamp?, self.stop_timestamp?);
        (stop > start).then(|| ((stop - start) / 60) as i32)
    }
}

/// `get_simple_data_table` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpgListings {
    #[serde(default, deserialize_with = "de::list_or_empty")]
    pub epg_listings: Vec<EpgListing>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerates_stringly_typed_numbers() {
        let stream: LiveStream = serde_json::from_str(
            r#"{"num":1,"name":"News","stream_id":"42","category_id":"7",
                "tv_archive":"1","tv_archive_duration":"3","epg_channel_id":null}"#,
        )
        .unwrap();
        assert_eq!(stream.stream_id, 42);
        assert_eq!(stream.category_id, Some(7));
        assert!(stream.tv_archive);
        assert_eq!(stream.tv_archive_duration, 3);
        assert_eq!(stream.epg_channel_id, "");
    }

    #[test]
    fn groups_episodes_by_season() {
        let info: SeriesStreamInfo = serde_json::from_str(
            r#"{
                "seasons": [],
                "info": {"name": "Show", "tmdb": "1399"},
                "episodes": {
                    "2": [{"id": "21", "episode_num": 1, "title": "S2E1", "season": 2, "container_extension": "mkv"}],
                    "1": [
                        {"id": "12", "episode_num": "2", "title": "S1E2", "season": 1, "info": []},
                        {"id": "11", "episode_num": "1", "title": "S1E1", "season": 1}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(info.info.tmdb, Some(1399));
        assert_eq!(info.episode_count(), 3);
        let season_one: Vec<_> = info.episodes_for(1).iter().map(|e| e.id).collect();
        assert_eq!(season_one, vec![11, 12]);

        let seasons = info.effective_seasons();
        assert_eq!(seasons.len(), 2);
        assert_eq!(seasons[0].season_number, 1);
        assert_eq!(seasons[1].name, "Season 2");
        assert!(info.episodes_for(9).is_empty());
    }

    #[test]
    fn accepts_episode_lists_without_season_keys() {
        let info: SeriesStreamInfo = serde_json::from_str(
            r#"{"info": [], "episodes": [[{"id": 1, "episode_num": 1, "season": 3}]]}"#,
        )
        .unwrap();
        assert_eq!(info.episodes_for(3).len(), 1);
        assert_eq!(info.info, SeriesInfo::default());
    }

    #[test]
    fn decodes_epg_text_and_duration() {
        let listing: EpgListing = serde_json::from_str(
            r#"{"id":"5","title":"TW9ybmluZyBOZXdz","description":"not base64!",
                "start_timestamp":"1700000000","stop_timestamp":"1700003600","has_archive":1}"#,
        )
        .unwrap();
        assert_eq!(listing.decoded_title(), "Morning News");
        assert_eq!(listing.decoded_description(), "not base64!");
        assert_eq!(listing.duration_minutes(), Some(60));
        assert!(listing.has_archive);
        assert_eq!(listing.start().unwrap().timestamp(), 1_700_000_000);
    }
}
