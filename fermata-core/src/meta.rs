// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `meta` module defines basic metadata containers.

/// A `Tag` encapsulates a single piece of metadata as a key-value pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// The key of the tag.
    pub key: String,
    /// The value of the tag.
    pub value: String,
}

impl Tag {
    /// Create a new `Tag`.
    pub fn new(key: &str, value: &str) -> Tag {
        Tag { key: key.to_string(), value: value.to_string() }
    }
}

/// `Tags` is an ordered collection of metadata tags with unique,
/// case-insensitive keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    tags: Vec<Tag>,
}

impl Tags {
    /// Create an empty tag collection.
    pub fn new() -> Tags {
        Tags::default()
    }

    /// Get the value for the given key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.key.eq_ignore_ascii_case(key)).map(|t| t.value.as_str())
    }

    /// Set the value for the given key, replacing any previous value.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.tags.iter_mut().find(|t| t.key.eq_ignore_ascii_case(key)) {
            Some(tag) => tag.value = value.to_string(),
            None => self.tags.push(Tag::new(key, value)),
        }
    }

    /// Merge `other` into `self`. Values in `other` win on key collision.
    pub fn merge(&mut self, other: &Tags) {
        for tag in &other.tags {
            self.set(&tag.key, &tag.value);
        }
    }

    /// Returns true if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate over all tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }
}
