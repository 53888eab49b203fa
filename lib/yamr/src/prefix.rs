//! Longest recurring line-prefix job.
//!
//! The mapper expands each line into all of its prefixes; the reducer tracks
//! the longest prefix seen more than once in its bucket. Taking the maximum
//! over all result files approximates the longest prefix shared by at least
//! two lines of the input.

use crate::api::{Mapper, Reducer};
use anyhow::Result;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Default)]
pub struct PrefixMapper;

impl Mapper for PrefixMapper {
    type Element = String;

    fn do_map<F>(&self, record: &str, emit: &mut F) -> Result<()>
    where
        F: FnMut(String),
    {
        for (offset, c) in record.char_indices() {
            emit(record[..offset + c.len_utf8()].to_string());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct LongestPrefixReducer {
    max_prefix: usize,
    freq: BTreeMap<String, usize>,
}

impl LongestPrefixReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every distinct prefix seen extends the previous one in sorted order.
    pub fn is_prefix_chain(&self) -> bool {
        let mut keys = self.freq.keys();
        let Some(mut prev) = keys.next() else {
            return false;
        };
        for key in keys {
            if !key.starts_with(prev.as_str()) {
                return false;
            }
            prev = key;
        }
        true
    }
}

impl Reducer for LongestPrefixReducer {
    type Element = String;
    type Out = usize;

    fn do_reduce(&mut self, element: &String) -> Result<usize> {
        let count = self.freq.entry(element.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            self.max_prefix = self.max_prefix.max(element.chars().count());
        }
        Ok(self.max_prefix)
    }

    fn finish(self) -> usize {
        self.max_prefix
    }
}
