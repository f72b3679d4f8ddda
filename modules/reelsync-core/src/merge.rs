//! Merge policies for combining freshly fetched posts with a stored dataset.
//!
//! Both policies are pure, deterministic and idempotent: applying the same
//! fetched set twice (with the same `now`) yields the same dataset as applying
//! it once. Neither ever removes a post.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::types::{Dataset, MergeMode, Post, ProfileKey};

/// Result of a merge: the new dataset plus what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub dataset: Dataset,
    /// Posts that were not in the dataset before.
    pub added: usize,
    /// Existing posts whose metrics changed.
    pub updated: usize,
}

pub fn merge(mode: MergeMode, existing: Dataset, fetched: Vec<Post>, now: DateTime<Utc>) -> MergeOutcome {
    match mode {
        MergeMode::AppendNewPosts => append_new_posts(existing, fetched, now),
        MergeMode::RefreshCounts => refresh_counts(existing, fetched, now),
    }
}

/// Add posts whose id is unseen; never touch metrics of posts already stored.
pub fn append_new_posts(existing: Dataset, fetched: Vec<Post>, now: DateTime<Utc>) -> MergeOutcome {
    let Dataset { key, posts, .. } = existing;
    let known: HashSet<&str> = posts.iter().map(|p| p.id.as_str()).collect();

    let mut seen = HashSet::new();
    let mut fresh: Vec<Post> = fetched
        .into_iter()
        .filter(|p| !known.contains(p.id.as_str()) && seen.insert(p.id.clone()))
        .collect();

    // A new post without a publish time was published no later than this
    // fetch, so it is placed as of `now`. Stored posts keep their position.
    let placed_at = |p: &Post| p.published_at.unwrap_or(now);

    // Newest first. Stable, so fetch order breaks ties.
    fresh.sort_by_key(|p| Reverse(placed_at(p)));
    let added = fresh.len();

    let mut merged = Vec::with_capacity(posts.len() + added);
    let mut fresh = fresh.into_iter().peekable();
    let mut old = posts.into_iter().peekable();
    loop {
        let take_fresh = match (fresh.peek(), old.peek()) {
            (Some(f), Some(o)) => Some(placed_at(f)) >= o.published_at,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_fresh { fresh.next() } else { old.next() };
        merged.extend(next);
    }

    MergeOutcome {
        dataset: finish(key, merged, now),
        added,
        updated: 0,
    }
}

/// Overwrite metrics of posts present in both; keep stored-only posts; append fetched-only posts.
pub fn refresh_counts(existing: Dataset, fetched: Vec<Post>, now: DateTime<Utc>) -> MergeOutcome {
    let Dataset { key, mut posts, .. } = existing;
    let index: HashMap<String, usize> = posts
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();

    let mut seen = HashSet::new();
    let mut appended = Vec::new();
    let mut updated = 0;

    for post in fetched {
        if !seen.insert(post.id.clone()) {
            continue;
        }
        match index.get(&post.id) {
            Some(&i) => {
                if posts[i].metrics != post.metrics {
                    posts[i].metrics = post.metrics;
                    updated += 1;
                }
            }
            None => appended.push(post),
        }
    }

    let added = appended.len();
    posts.extend(appended);

    MergeOutcome {
        dataset: finish(key, posts, now),
        added,
        updated,
    }
}

fn finish(key: ProfileKey, posts: Vec<Post>, now: DateTime<Utc>) -> Dataset {
    Dataset {
        key,
        total_posts: posts.len(),
        posts,
        last_synced_at: Some(now),
    }
}
