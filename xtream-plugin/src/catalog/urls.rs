//! Provider URL construction.

use chrono::{DateTime, Utc};
use url::form_urlencoded::Serializer;

use crate::config::ConnectionInfo;

/// Format used by `timeshift.php` for the programme start.
const TIMESHIFT_START_FORMAT: &str = "%Y-%m-%d:%H-%M";

/// `player_api.php` URL with credentials and the given query pairs.
pub fn api_url(conn: &ConnectionInfo, params: &[(&str, String)]) -> String {
    let mut query = Serializer::new(String::new());
    query.append_pair("username", &conn.username);
    query.append_pair("password", &conn.password);
    for (key, value) in params {
        query.append_pair(key, value);
    }
    format!("{}/player_api.php?{}", conn.base_url, query.finish())
}

pub fn live_stream_url(conn: &ConnectionInfo, stream_id: i32) -> String {
    format!(
        "{}/live/{}/{}/{}.ts",
        conn.base_url, conn.username, conn.password, stream_id
    )
}

pub fn vod_url(conn: &ConnectionInfo, stream_id: i32, extension: &str) -> String {
    format!(
        "{}/movie/{}/{}/{}.{}",
        conn.base_url,
        conn.username,
        conn.password,
        stream_id,
        extension_or_default(extension)
    )
}

pub fn episode_url(conn: &ConnectionInfo, episode_id: i32, extension: &str) -> String {
    format!(
        "{}/series/{}/{}/{}.{}",
        conn.base_url,
        conn.username,
        conn.password,
        episode_id,
        extension_or_default(extension)
    )
}

/// Catch-up playback of `duration_minutes` starting at `start`.
pub fn timeshift_url(
    conn: &ConnectionInfo,
    stream_id: i32,
    start: DateTime<Utc>,
    duration_minutes: i32,
) -> String {
    let mut query = Serializer::new(String::new());
    query.append_pair("username", &conn.username);
    query.append_pair("password", &conn.password);
    query.append_pair("stream", &stream_id.to_string());
    query.append_pair("start", &start.format(TIMESHIFT_START_FORMAT).to_string());
    query.append_pair("duration", &duration_minutes.to_string());
    format!("{}/streaming/timeshift.php?{}", conn.base_url, query.finish())
}

/// Replace the password for logs and error messages.
pub fn redact(url: &str, conn: &ConnectionInfo) -> String {
    if conn.password.is_empty() {
        return url.to_string();
    }
    let encoded: String = url::form_urlencoded::byte_serialize(conn.password.as_bytes()).collect();
    url.replace(&encoded, "***").replace(&conn.password, "***")
}

fn extension_or_default(extension: &str) -> &str {
    if extension.is_empty() { "mp4" } else { extension }
}
