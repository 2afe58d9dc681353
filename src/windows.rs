//! Sliding context windows over token sequences.
//!
//! A window holds `2 * context_width + 1` tokens centered on one position of the
//! padded sequence. The sequence is chained with `context_width` pad tokens on
//! each side and the ring buffer starts out holding `context_width` pads, so a
//! sequence of length `L` yields `L + context_width` windows when no concept is
//! set: one centered on every token plus `context_width` leading windows
//! centered on padding. The first window starts with pads, the last ends with them.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::hash::Hash;
use std::iter::{Chain, RepeatN};

use serde::{Deserialize, Serialize};

use crate::error::{CoOccurrenceError, Result};

pub const DEFAULT_PAD: &str = "*";

/// Window options. Immutable once built; validated at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOpts {
    context_width: usize,
    concept: BTreeSet<String>,
    ignore_concept: bool,
    pad: String,
    partition_keys: Vec<String>,
}

impl ContextOpts {
    /// Fails with `Config` if `context_width` is zero.
    pub fn new(context_width: usize) -> Result<Self> {
        if context_width < 1 {
            return Err(CoOccurrenceError::config(
                "context_width must be at least 1",
            ));
        }
        Ok(ContextOpts {
            context_width,
            concept: BTreeSet::new(),
            ignore_concept: false,
            pad: DEFAULT_PAD.to_string(),
            partition_keys: Vec::new(),
        })
    }

    /// Fails with `Config` if a concept token equals the pad.
    pub fn with_concept<I, S>(mut self, concept: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let concept: BTreeSet<String> = concept.into_iter().map(Into::into).collect();
        if concept.contains(&self.pad) {
            return Err(CoOccurrenceError::config(format!(
                "pad token {:?} is also a concept token",
                self.pad
            )));
        }
        self.concept = concept;
        Ok(self)
    }

    pub fn with_ignore_concept(mut self, ignore_concept: bool) -> Self {
        self.ignore_concept = ignore_concept;
        self
    }

    /// Fails with `Config` on an empty pad or a pad that is also a concept token.
    pub fn with_pad(mut self, pad: impl Into<String>) -> Result<Self> {
        let pad = pad.into();
        if pad.is_empty() {
            return Err(CoOccurrenceError::config("pad token must not be empty"));
        }
        if self.concept.contains(&pad) {
            return Err(CoOccurrenceError::config(format!(
                "pad token {pad:?} is also a concept token"
            )));
        }
        self.pad = pad;
        Ok(self)
    }

    pub fn with_partition_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn context_width(&self) -> usize {
        self.context_width
    }

    pub fn window_size(&self) -> usize {
        2 * self.context_width + 1
    }

    /// Length of emitted windows (the center is dropped when ignoring a concept).
    pub fn emitted_window_size(&self) -> usize {
        if self.drops_center() {
            self.window_size() - 1
        } else {
            self.window_size()
        }
    }

    pub fn concept(&self) -> &BTreeSet<String> {
        &self.concept
    }

    pub fn ignore_concept(&self) -> bool {
        self.ignore_concept
    }

    pub fn pad(&self) -> &str {
        &self.pad
    }

    pub fn partition_keys(&self) -> &[String] {
        &self.partition_keys
    }

    /// The single partition key, if any. More than one key is rejected.
    pub fn single_partition_key(&self) -> Result<Option<&str>> {
        match self.partition_keys.as_slice() {
            [] => Ok(None),
            [key] => Ok(Some(key.as_str())),
            keys => Err(CoOccurrenceError::PartitionKeyNotUnique(keys.to_vec())),
        }
    }

    pub(crate) fn drops_center(&self) -> bool {
        self.ignore_concept && !self.concept.is_empty()
    }

    /// Original (padded-window) position of each slot in an emitted window.
    pub(crate) fn window_positions(&self) -> Vec<usize> {
        let width = self.context_width;
        (0..self.window_size())
            .filter(|&p| !(self.drops_center() && p == width))
            .collect()
    }

    /// Window generator over borrowed tokens.
    pub fn windows<'a, I>(&'a self, tokens: I) -> Windows<I::IntoIter, &'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let concept: HashSet<&'a str> = self.concept.iter().map(String::as_str).collect();
        Windows::new(
            tokens.into_iter(),
            self.context_width,
            self.pad.as_str(),
            concept,
            self.ignore_concept,
        )
    }
}

type Padded<I, T> = Chain<Chain<RepeatN<T>, I>, RepeatN<T>>;

/// Lazy window iterator. Each step appends one token to a fixed-capacity ring
/// buffer and yields the buffer when it is full (and centered on a concept,
/// if one is set).
pub struct Windows<I, T>
where
    I: Iterator<Item = T>,
    T: Clone + Eq + Hash,
{
    padded: Padded<I, T>,
    window: VecDeque<T>,
    context_width: usize,
    concept: HashSet<T>,
    ignore_concept: bool,
}

impl<I, T> Windows<I, T>
where
    I: Iterator<Item = T>,
    T: Clone + Eq + Hash,
{
    pub fn new(
        tokens: I,
        context_width: usize,
        pad: T,
        concept: HashSet<T>,
        ignore_concept: bool,
    ) -> Self {
        let window_size = 2 * context_width + 1;
        let mut window = VecDeque::with_capacity(window_size);
        window.extend(std::iter::repeat_n(pad.clone(), context_width));
        let padded = std::iter::repeat_n(pad.clone(), context_width)
            .chain(tokens)
            .chain(std::iter::repeat_n(pad, context_width));
        Windows {
            padded,
            window,
            context_width,
            concept,
            ignore_concept,
        }
    }

    fn window_size(&self) -> usize {
        2 * self.context_width + 1
    }
}

impl<I, T> Iterator for Windows<I, T>
where
    I: Iterator<Item = T>,
    T: Clone + Eq + Hash,
{
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        let window_size = self.window_size();
        for token in self.padded.by_ref() {
            if self.window.len() == window_size {
                self.window.pop_front();
            }
            self.window.push_back(token);
            if self.window.len() < window_size {
                continue;
            }
            if self.concept.is_empty() {
                return Some(self.window.iter().cloned().collect());
            }
            if self.concept.contains(&self.window[self.context_width]) {
                let mut window: Vec<T> = self.window.iter().cloned().collect();
                if self.ignore_concept {
                    window.remove(self.context_width);
                }
                return Some(window);
            }
        }
        None
    }
}
