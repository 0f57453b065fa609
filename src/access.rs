//! Member-visibility index and per-class access info.
//!
//! Both tables are built once, structurally (declared members only, never
//! method bodies), and frozen before reference resolution starts: resolution
//! needs a complete global view. Construction is read-only per class and
//! runs in parallel.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::model::{ClassModel, Visibility};

/// Identity of a declared field or method. The descriptor is part of the
/// identity: overloads share a name but are distinct members.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MemberKey {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberKey {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self { owner: owner.into(), name: name.into(), descriptor: descriptor.into() }
    }
}

/// What resolution needs to know about a class without reopening its model.
#[derive(Debug, Clone)]
pub struct ClassAccessInfo {
    pub visibility: Visibility,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
}

/// Visibility of every field and method declared by every input class.
#[derive(Debug, Default)]
pub struct AccessIndex {
    members: HashMap<MemberKey, Visibility>,
}

impl AccessIndex {
    pub fn build(models: &BTreeMap<String, ClassModel>) -> Self {
        let members = models
            .par_iter()
            .flat_map_iter(|(name, model)| {
                let mut entries =
                    Vec::with_capacity(model.fields.len() + model.methods.len());
                for field in &model.fields {
                    entries.push((
                        MemberKey::new(name.clone(), field.name.clone(), field.descriptor.clone()),
                        field.visibility,
                    ));
                }
                for method in &model.methods {
                    entries.push((
                        MemberKey::new(name.clone(), method.name.clone(), method.descriptor.clone()),
                        method.visibility,
                    ));
                }
                entries
            })
            .collect();
        Self { members }
    }

    pub fn visibility_of(&self, key: &MemberKey) -> Option<Visibility> {
        self.members.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub fn build_class_infos(models: &BTreeMap<String, ClassModel>) -> BTreeMap<String, ClassAccessInfo> {
    models
        .par_iter()
        .map(|(name, model)| {
            (
                name.clone(),
                ClassAccessInfo {
                    visibility: model.visibility,
                    super_class: model.super_class.clone(),
                    interfaces: model.interfaces.clone(),
                },
            )
        })
        .collect()
}
