//! Compose-field validation rules

use crate::linkify::url_entities;
use crate::types::{Share, ValidationErrors};

pub const TWEET_MIN_LENGTH: usize = 1;
pub const TWEET_MAX_LENGTH: usize = 240;

/// Weighted length every URL counts as, regardless of its real length
const TRANSFORMED_URL_LENGTH: usize = 23;

/// Code point ranges counted with weight 1; everything else weighs 2
const LIGHT_RANGES: [(u32, u32); 4] = [(0, 4351), (8192, 8205), (8208, 8223), (8242, 8247)];

pub fn require_message(share: &Share, errors: &mut ValidationErrors) {
    if share.content.message().map_or(true, |m| m.trim().is_empty()) {
        errors.add("message", "Message cannot be blank.");
    }
}

/// Tweet length as counted by the platform
pub fn weighted_length(text: &str) -> usize {
    let mut length = 0;
    let mut cursor = 0;
    for url in url_entities(text) {
        length += weigh(&text[cursor..url.start]);
        length += TRANSFORMED_URL_LENGTH;
        cursor = url.end;
    }
    length + weigh(&text[cursor..])
}

fn weigh(text: &str) -> usize {
    text.chars()
        .map(|c| {
            let cp = c as u32;
            if LIGHT_RANGES.iter().any(|(lo, hi)| (*lo..=*hi).contains(&cp)) {
                1
            } else {
                2
            }
        })
        .sum()
}

pub fn tweet_length(share: &Share, errors: &mut ValidationErrors) {
    let Some(message) = share.content.message() else {
        return;
    };

    let length = weighted_length(message);
    if length < TWEET_MIN_LENGTH {
        errors.add(
            "message",
            format!("Message should contain at least {} character.", TWEET_MIN_LENGTH),
        );
    }
    if length > TWEET_MAX_LENGTH {
        errors.add(
            "message",
            format!("Message should contain at most {} characters.", TWEET_MAX_LENGTH),
        );
    }
}
