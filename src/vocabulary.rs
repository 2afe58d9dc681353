//! Token2Id: bidirectional token <-> id mapping with term frequencies.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoOccurrenceError, Result};

/// Dense vocabulary. Ids are assigned in first-seen order starting at 0.
///
/// A closed vocabulary rejects new tokens; lookups of unknown tokens return `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredVocabulary", into = "StoredVocabulary")]
pub struct Token2Id {
    token2id: HashMap<String, u32>,
    id2token: Vec<String>,
    tf: Vec<u64>,
    closed: bool,
}

#[derive(Serialize, Deserialize)]
struct StoredVocabulary {
    id2token: Vec<String>,
    tf: Vec<u64>,
    closed: bool,
}

impl From<StoredVocabulary> for Token2Id {
    fn from(stored: StoredVocabulary) -> Self {
        let mut tf = stored.tf;
        tf.resize(stored.id2token.len(), 0);
        let token2id = stored
            .id2token
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as u32))
            .collect();
        Token2Id {
            token2id,
            id2token: stored.id2token,
            tf,
            closed: stored.closed,
        }
    }
}

impl From<Token2Id> for StoredVocabulary {
    fn from(vocabulary: Token2Id) -> Self {
        StoredVocabulary {
            id2token: vocabulary.id2token,
            tf: vocabulary.tf,
            closed: vocabulary.closed,
        }
    }
}

impl Token2Id {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an open vocabulary from `tokens` in order, without counting frequencies.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = Self::new();
        for token in tokens {
            vocabulary.insert(token.as_ref());
        }
        vocabulary
    }

    /// Returns the id of `token`, assigning the next id if it is new.
    pub fn add(&mut self, token: &str) -> Result<u32> {
        if let Some(&id) = self.token2id.get(token) {
            return Ok(id);
        }
        if self.closed {
            return Err(CoOccurrenceError::state(format!(
                "vocabulary is closed, cannot add {token:?}"
            )));
        }
        Ok(self.insert(token))
    }

    /// Adds every token and increments its term frequency.
    pub fn ingest<I, S>(&mut self, tokens: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            let id = self.add(token.as_ref())?;
            self.tf[id as usize] += 1;
        }
        Ok(())
    }

    fn insert(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.token2id.get(token) {
            return id;
        }
        let id = self.id2token.len() as u32;
        self.token2id.insert(token.to_string(), id);
        self.id2token.push(token.to_string());
        self.tf.push(0);
        id
    }

    /// Freezes the vocabulary. Idempotent.
    pub fn close(&mut self) -> &mut Self {
        self.closed = true;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get(&self, token: &str) -> Option<u32> {
        self.token2id.get(token).copied()
    }

    pub fn id2token(&self, id: u32) -> Option<&str> {
        self.id2token.get(id as usize).map(String::as_str)
    }

    /// Maps known tokens to ids, silently dropping unknown tokens.
    pub fn find<I, S>(&self, tokens: I) -> HashSet<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens
            .into_iter()
            .filter_map(|t| self.get(t.as_ref()))
            .collect()
    }

    pub fn frequency(&self, id: u32) -> u64 {
        self.tf.get(id as usize).copied().unwrap_or(0)
    }

    /// Ids whose accumulated frequency is below `min_count`.
    pub fn ids_below_threshold(&self, min_count: u64) -> HashSet<u32> {
        self.tf
            .iter()
            .enumerate()
            .filter(|(_, tf)| **tf < min_count)
            .map(|(id, _)| id as u32)
            .collect()
    }

    /// Returns a closed vocabulary holding tokens with frequency >= `tf_threshold`
    /// plus every token in `keeps`. Ids are re-assigned densely in original order.
    pub fn compress(&self, tf_threshold: u64, keeps: &HashSet<String>) -> Token2Id {
        let mut compressed = Token2Id::new();
        for (id, token) in self.id2token.iter().enumerate() {
            let tf = self.tf[id];
            if tf >= tf_threshold || keeps.contains(token) {
                let new_id = compressed.insert(token);
                compressed.tf[new_id as usize] = tf;
            }
        }
        let mut missing: Vec<&String> = keeps
            .iter()
            .filter(|token| compressed.get(token).is_none())
            .collect();
        missing.sort();
        for token in missing {
            compressed.insert(token);
        }
        compressed.closed = true;
        compressed
    }

    pub fn len(&self) -> usize {
        self.id2token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2token.is_empty()
    }

    /// Tokens in id order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.id2token.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_in_first_seen_order() {
        let mut vocabulary = Token2Id::new();
        assert_eq!(vocabulary.add("b").unwrap(), 0);
        assert_eq!(vocabulary.add("a").unwrap(), 1);
        assert_eq!(vocabulary.add("b").unwrap(), 0);
        assert_eq!(vocabulary.len(), 2);
        assert_eq!(vocabulary.id2token(1), Some("a"));
        assert_eq!(vocabulary.id2token(2), None);
    }

    #[test]
    fn closed_vocabulary_rejects_new_tokens() {
        let mut vocabulary = Token2Id::from_tokens(["a"]);
        vocabulary.close().close();
        assert!(vocabulary.is_closed());
        assert_eq!(vocabulary.add("a").unwrap(), 0);
        let err = vocabulary.add("z").unwrap_err();
        assert!(matches!(err, CoOccurrenceError::State(_)));
        assert!(vocabulary.ingest(["a", "z"]).is_err());
    }

    #[test]
    fn find_drops_unknown_tokens() {
        let vocabulary = Token2Id::from_tokens(["a", "b", "c"]);
        let ids = vocabulary.find(["c", "x", "a"]);
        assert_eq!(ids, HashSet::from([0, 2]));
    }

    #[test]
    fn ingest_counts_and_threshold_filters() {
        let mut vocabulary = Token2Id::new();
        vocabulary.ingest(["a", "b", "a", "c", "a", "b"]).unwrap();
        assert_eq!(vocabulary.frequency(0), 3);
        assert_eq!(vocabulary.ids_below_threshold(2), HashSet::from([2]));
        assert_eq!(vocabulary.ids_below_threshold(1), HashSet::new());
    }

    #[test]
    fn compress_keeps_frequent_and_kept_tokens() {
        let mut vocabulary = Token2Id::new();
        vocabulary.ingest(["x", "a", "a", "b", "b", "concept"]).unwrap();
        let keeps = HashSet::from(["concept".to_string(), "*".to_string()]);
        let compressed = vocabulary.compress(2, &keeps);
        assert!(compressed.is_closed());
        let tokens: Vec<&str> = compressed.tokens().collect();
        assert_eq!(tokens, vec!["a", "b", "concept", "*"]);
        assert_eq!(compressed.frequency(compressed.get("a").unwrap()), 2);
        assert_eq!(compressed.get("x"), None);
    }

    #[test]
    fn json_round_trip_rebuilds_lookup() {
        let mut vocabulary = Token2Id::new();
        vocabulary.ingest(["a", "b", "a"]).unwrap();
        vocabulary.close();
        let json = serde_json::to_string(&vocabulary).unwrap();
        let loaded: Token2Id = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, vocabulary);
        assert_eq!(loaded.get("b"), Some(1));
    }
}
