//! Per-section diff of schema YAML element lists, keyed by `name`. Elements
//! are compared by structural equality of their YAML subtree; returned
//! elements are defensive deep copies so the engine may mutate them freely.

use std::collections::BTreeSet;

use crate::model::YamlElement;

/// `name`s present in both `changed` (differing content) and, separately, the
/// deep-copied elements on each side of the diff.
#[derive(Debug, Clone, Default)]
pub struct SectionDiff {
    pub deleted: Vec<YamlElement>,
    pub added: Vec<YamlElement>,
    /// `(old, new)` pairs for elements whose `name` is in both dicts but
    /// whose bodies differ.
    pub changed: Vec<(YamlElement, YamlElement)>,
    pub changed_or_deleted_names: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct SchemaYamlDiffer;

impl SchemaYamlDiffer {
    pub fn new() -> SchemaYamlDiffer {
        SchemaYamlDiffer
    }

    /// `saved` and `new` map element name -> element, preserving the
    /// insertion order of the underlying YAML list (an `IndexMap` upstream).
    pub fn diff<'a, I>(&self, saved: I, new: I) -> SectionDiff
    where
        I: IntoIterator<Item = (&'a String, &'a YamlElement)>,
    {
        let saved: Vec<(&String, &YamlElement)> = saved.into_iter().collect();
        let new: Vec<(&String, &YamlElement)> = new.into_iter().collect();

        let mut result = SectionDiff::default();

        for (name, elem) in &saved {
            match new.iter().find(|(n, _)| *n == *name) {
                None => {
                    result.deleted.push((*elem).clone());
                    result.changed_or_deleted_names.insert((*name).clone());
                }
                Some((_, new_elem)) => {
                    if !elem.structurally_eq(new_elem) {
                        result.changed.push(((*elem).clone(), (*new_elem).clone()));
                        result.changed_or_deleted_names.insert((*name).clone());
                    }
                }
            }
        }

        for (name, elem) in &new {
            if !saved.iter().any(|(n, _)| *n == *name) {
                result.added.push((*elem).clone());
            }
        }

        result
    }
}
