// Raw scraped items -> canonical Posts.
// Pure: no I/O. Items without an id or URL are dropped, never errored.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::types::{Metrics, Platform, Post};

/// Where each canonical field lives in a platform's raw item. Earlier keys win.
struct FieldMap {
    id: &'static [&'static str],
    url: &'static [&'static str],
    caption: &'static [&'static str],
    published: &'static [&'static str],
    plays: &'static [&'static str],
    likes: &'static [&'static str],
    comments: &'static [&'static str],
    shares: &'static [&'static str],
    saves: &'static [&'static str],
}

const TIKTOK_FIELDS: FieldMap = FieldMap {
    id: &["id"],
    url: &["webVideoUrl", "url"],
    caption: &["text"],
    published: &["createTimeISO", "createTime"],
    plays: &["playCount"],
    likes: &["diggCount"],
    comments: &["commentCount"],
    shares: &["shareCount"],
    saves: &["collectCount"],
};

const INSTAGRAM_FIELDS: FieldMap = FieldMap {
    id: &["id", "shortCode"],
    url: &["url"],
    caption: &["caption"],
    published: &["timestamp"],
    plays: &["videoPlayCount", "videoViewCount"],
    likes: &["likesCount"],
    comments: &["commentsCount"],
    shares: &["sharesCount"],
    saves: &["savesCount"],
};

fn fields_for(platform: Platform) -> &'static FieldMap {
    match platform {
        Platform::TikTok => &TIKTOK_FIELDS,
        Platform::Instagram => &INSTAGRAM_FIELDS,
    }
}

/// Normalize one raw item. Returns `None` when no id or URL can be resolved.
pub fn normalize(platform: Platform, raw: &Value) -> Option<Post> {
    let obj = raw.as_object()?;
    let fields = fields_for(platform);

    let first = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));

    let url = first(fields.url).and_then(non_empty_string);
    let id = first(fields.id)
        .and_then(identifier)
        .or_else(|| url.clone())?;

    Some(Post {
        id,
        url,
        caption: first(fields.caption).and_then(non_empty_string),
        published_at: first(fields.published).and_then(timestamp),
        metrics: Metrics {
            play_count: count(first(fields.plays)),
            like_count: count(first(fields.likes)),
            comment_count: count(first(fields.comments)),
            share_count: count(first(fields.shares)),
            save_count: count(first(fields.saves)),
        },
    })
}

/// Normalize a batch, dropping rejects and keeping the first occurrence of each id.
pub fn normalize_batch(platform: Platform, raw: &[Value]) -> Vec<Post> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|item| normalize(platform, item))
        .filter(|post| seen.insert(post.id.clone()))
        .collect()
}

fn non_empty_string(v: &Value) -> Option<String> {
    let s = v.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Ids arrive as strings or as bare numbers.
fn identifier(v: &Value) -> Option<String> {
    match v {
        Value::String(_) => non_empty_string(v),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Non-negative count from an integer, float or numeric string. Anything else is 0.
fn count(v: Option<&Value>) -> u64 {
    let Some(v) = v else { return 0 };
    let parsed = match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().map(float_count)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(float_count))
        }
        _ => None,
    };
    parsed.unwrap_or(0)
}

fn float_count(f: f64) -> u64 {
    if f.is_finite() && f > 0.0 {
        f.trunc() as u64
    } else {
        0
    }
}

/// RFC 3339 strings, or unix time in seconds (milliseconds when implausibly large).
fn timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.trim().parse::<i64>().ok().and_then(unix_time)),
        Value::Number(n) => n.as_i64().and_then(unix_time),
        _ => None,
    }
}

fn unix_time(t: i64) -> Option<DateTime<Utc>> {
    if t <= 0 {
        return None;
    }
    if t > 100_000_000_000 {
        Utc.timestamp_millis_opt(t).single()
    } else {
        Utc.timestamp_opt(t, 0).single()
    }
}
