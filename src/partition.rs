//! Disjoint "package" groups of classes.
//!
//! A partition keeps a forward map (class → group id) and a reverse map
//! (group id → member set) in lockstep: every tracked class belongs to
//! exactly one group, and a group whose last member leaves is removed
//! immediately, so no group ever maps to an empty set. The reverse map is
//! ordered so that [`Partition::compact`] and group enumeration are
//! deterministic for a fixed processing order.

use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    class_to_group: HashMap<String, u32>,
    group_to_classes: BTreeMap<u32, BTreeSet<String>>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name` under a fresh group id (the current distinct-group count)
    /// and returns it.
    pub fn add_class(&mut self, name: &str) -> u32 {
        let group = self.group_to_classes.len() as u32;
        self.add_class_in(name, group);
        group
    }

    /// Adds `name` under an explicit group id, moving it out of its previous
    /// group if it was already tracked.
    pub fn add_class_in(&mut self, name: &str, group: u32) {
        let old = self.class_to_group.insert(name.to_string(), group);
        if old == Some(group) {
            return;
        }
        if let Some(old_group) = old {
            self.detach(name, old_group);
        }
        self.group_to_classes
            .entry(group)
            .or_default()
            .insert(name.to_string());
    }

    pub fn remove_class(&mut self, name: &str) {
        if let Some(group) = self.class_to_group.remove(name) {
            self.detach(name, group);
        }
    }

    fn detach(&mut self, name: &str, group: u32) {
        if let Some(classes) = self.group_to_classes.get_mut(&group) {
            classes.remove(name);
            if classes.is_empty() {
                self.group_to_classes.remove(&group);
            }
        }
    }

    pub fn group_of(&self, name: &str) -> Option<u32> {
        self.class_to_group.get(name).copied()
    }

    pub fn contains_class(&self, name: &str) -> bool {
        self.class_to_group.contains_key(name)
    }

    /// The classes of `group`; empty if the group does not exist.
    pub fn classes_of(&self, group: u32) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.group_to_classes.get(&group).unwrap_or(&EMPTY)
    }

    /// Moves every class of `group2` into `group1` and deletes `group2`.
    /// Merging a group with itself is a no-op; merging through an id that
    /// owns no classes is a logic error.
    pub fn merge_groups(&mut self, group1: u32, group2: u32) -> Result<()> {
        if group1 == group2 {
            return Ok(());
        }
        if !self.group_to_classes.contains_key(&group1) {
            bail!("group {group1} has no classes");
        }
        let Some(moved) = self.group_to_classes.remove(&group2) else {
            bail!("group {group2} has no classes");
        };
        for class in &moved {
            self.class_to_group.insert(class.clone(), group1);
        }
        if let Some(classes) = self.group_to_classes.get_mut(&group1) {
            classes.extend(moved);
        }
        Ok(())
    }

    /// Merges the groups currently containing `class1` and `class2`;
    /// `class1`'s group id survives. Resolving through the class identities
    /// keeps repeated calls correct after earlier merges have moved either
    /// class.
    pub fn merge_classes(&mut self, class1: &str, class2: &str) -> Result<()> {
        let Some(group1) = self.group_of(class1) else {
            bail!("{class1} is not a tracked class");
        };
        let Some(group2) = self.group_of(class2) else {
            bail!("{class2} is not a tracked class");
        };
        self.merge_groups(group1, group2)
    }

    /// Returns a copy with group ids renumbered to a dense range starting at
    /// 0, assigned in ascending order of the existing ids. Group membership
    /// is unchanged.
    pub fn compact(&self) -> Partition {
        let mut result = Partition::new();
        for (next, classes) in self.group_to_classes.values().enumerate() {
            for class in classes {
                result.add_class_in(class, next as u32);
            }
        }
        result
    }

    /// Moves every class whose group has exactly one member into group 0,
    /// creating it if needed. Classes already in group 0 stay put.
    pub fn fold_singletons_into_zero(&mut self) {
        let singletons: Vec<String> = self
            .group_to_classes
            .iter()
            .filter(|(group, classes)| **group != 0 && classes.len() == 1)
            .map(|(_, classes)| classes.first().cloned().unwrap_or_default())
            .collect();
        for class in singletons {
            self.add_class_in(&class, 0);
        }
    }

    pub fn class_count(&self) -> usize {
        self.class_to_group.len()
    }

    pub fn group_count(&self) -> usize {
        self.group_to_classes.len()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.class_to_group.keys().map(String::as_str)
    }

    /// Groups in ascending id order, each with its member set.
    pub fn groups(&self) -> impl Iterator<Item = (u32, &BTreeSet<String>)> {
        self.group_to_classes.iter().map(|(g, classes)| (*g, classes))
    }
}
