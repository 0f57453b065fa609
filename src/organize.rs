//! Package inference: resolve every extracted reference against the
//! visibility tables and merge the partition until all accesses are legal.
//!
//! Reference extraction and table construction run in parallel per class;
//! partition mutation is strictly sequential so the merge order, and with it
//! the compacted group numbering, is deterministic for a given input set.

use anyhow::Result;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

use crate::access::{AccessIndex, ClassAccessInfo, MemberKey, build_class_infos};
use crate::extract::{Reference, class_references};
use crate::model::{ClassModel, Visibility};
use crate::partition::Partition;

/// Infers the coarsest partition of `models` into packages under which every
/// cross-class access in their bodies is legal.
pub fn organize(models: Vec<ClassModel>) -> Result<Partition> {
    organize_with(models, false)
}

/// Like [`organize`], optionally folding every single-class group into group
/// 0 before compaction. The returned partition always has dense group ids.
pub fn organize_with(models: Vec<ClassModel>, fold_singletons: bool) -> Result<Partition> {
    let models: BTreeMap<String, ClassModel> =
        models.into_iter().map(|m| (m.name.clone(), m)).collect();

    let mut partition = Partition::new();
    for name in models.keys() {
        partition.add_class(name);
    }

    let index = AccessIndex::build(&models);
    let infos = build_class_infos(&models);
    let references: Vec<(&str, Vec<Reference>)> = models
        .par_iter()
        .map(|(name, model)| (name.as_str(), class_references(model)))
        .collect();

    let resolver = Resolver { index: &index, infos: &infos };
    for (name, refs) in &references {
        for reference in refs {
            resolver.resolve(&mut partition, name, reference)?;
        }
    }

    if fold_singletons {
        partition.fold_singletons_into_zero();
    }
    Ok(partition.compact())
}

struct Resolver<'a> {
    index: &'a AccessIndex,
    infos: &'a BTreeMap<String, ClassAccessInfo>,
}

impl Resolver<'_> {
    fn resolve(
        &self,
        partition: &mut Partition,
        self_name: &str,
        reference: &Reference,
    ) -> Result<()> {
        match reference {
            Reference::Type(target) => {
                self.check_type(partition, self_name, target)?;
            }
            Reference::Member(key) => self.check_member(partition, self_name, key)?,
        }
        Ok(())
    }

    /// Applies the type-reference rule and reports whether the reference is
    /// settled: a self reference, an untracked target, or a target already in
    /// the same group needs no member-level check. A package-private target
    /// is merged in; a merged or public target still returns `false` so the
    /// caller can apply member visibility on top.
    fn check_type(
        &self,
        partition: &mut Partition,
        self_name: &str,
        target: &str,
    ) -> Result<bool> {
        if target == self_name {
            return Ok(true);
        }
        let Some(info) = self.infos.get(target) else {
            return Ok(true);
        };
        if partition.group_of(self_name) == partition.group_of(target) {
            return Ok(true);
        }
        if info.visibility.is_package_private() {
            partition.merge_classes(self_name, target)?;
        }
        Ok(false)
    }

    fn check_member(
        &self,
        partition: &mut Partition,
        self_name: &str,
        key: &MemberKey,
    ) -> Result<()> {
        if self.check_type(partition, self_name, &key.owner)? {
            return Ok(());
        }
        // A reference to a declared member the index never saw (synthetic
        // bridge on an untracked intermediary, inherited member addressed
        // through the subclass) constrains nothing.
        let Some(visibility) = self.index.visibility_of(key) else {
            return Ok(());
        };
        match visibility {
            Visibility::PackagePrivate => {
                partition.merge_classes(self_name, &key.owner)?;
            }
            Visibility::Protected => {
                if !self.inherits_from(self_name, &key.owner) {
                    partition.merge_classes(self_name, &key.owner)?;
                }
            }
            Visibility::Public | Visibility::Private => {}
        }
        Ok(())
    }

    /// True when `owner` appears on `self_name`'s declared superclass chain.
    /// A chain that leaves the tracked set, ends, or cycles without reaching
    /// `owner` does not prove inheritance, so the protected access must be
    /// satisfied by a package merge instead.
    fn inherits_from(&self, self_name: &str, owner: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = self_name;
        loop {
            if !visited.insert(current) {
                return false;
            }
            let Some(info) = self.infos.get(current) else {
                return false;
            };
            let Some(super_class) = info.super_class.as_deref() else {
                return false;
            };
            if super_class == owner {
                return true;
            }
            current = super_class;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, Insn, Method};
    use std::collections::BTreeSet;

    fn class(name: &str, visibility: Visibility) -> ClassModel {
        ClassModel {
            name: name.to_string(),
            visibility,
            super_class: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            signature: None,
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            record_components: Vec::new(),
            inner_classes: Vec::new(),
        }
    }

    fn field(name: &str, descriptor: &str, visibility: Visibility) -> Field {
        Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            visibility,
            signature: None,
            constant_value: None,
            annotations: Vec::new(),
        }
    }

    fn method(name: &str, descriptor: &str, visibility: Visibility, instructions: Vec<Insn>) -> Method {
        Method {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            visibility,
            signature: None,
            exceptions: Vec::new(),
            annotations: Vec::new(),
            parameter_annotations: Vec::new(),
            local_variables: Vec::new(),
            instructions,
        }
    }

    fn invoke(owner: &str, name: &str, descriptor: &str) -> Insn {
        Insn::Invoke {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    fn groups(partition: &Partition) -> Vec<BTreeSet<String>> {
        partition.groups().map(|(_, classes)| classes.clone()).collect()
    }

    fn group_of_set(partition: &Partition, class: &str) -> BTreeSet<String> {
        let group = partition.group_of(class).expect("tracked");
        partition.classes_of(group).clone()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn unreferenced_classes_stay_in_their_own_groups() {
        let models = vec![
            class("p/A", Visibility::Public),
            class("q/B", Visibility::Public),
            class("r/C", Visibility::PackagePrivate),
        ];
        let partition = organize(models).unwrap();
        assert_eq!(partition.class_count(), 3);
        assert_eq!(partition.group_count(), 3);
        let ids: Vec<u32> = partition.groups().map(|(g, _)| g).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn package_private_field_type_forces_a_merge() {
        let mut user = class("p/User", Visibility::Public);
        user.fields.push(field("dep", "Lp/Hidden;", Visibility::Private));
        let models = vec![user, class("p/Hidden", Visibility::PackagePrivate)];

        let partition = organize(models).unwrap();
        assert_eq!(partition.group_count(), 1);
        assert_eq!(group_of_set(&partition, "p/User"), set(&["p/Hidden", "p/User"]));
    }

    #[test]
    fn public_references_leave_groups_apart() {
        let mut user = class("p/User", Visibility::Public);
        let mut target = class("p/Api", Visibility::Public);
        target.methods.push(method("call", "()V", Visibility::Public, Vec::new()));
        user.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Api", "call", "()V")],
        ));
        let partition = organize(vec![user, target]).unwrap();
        assert_eq!(partition.group_count(), 2);
    }

    #[test]
    fn untracked_references_are_ignored() {
        let mut user = class("p/User", Visibility::Public);
        user.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("java/io/PrintStream", "println", "(Ljava/lang/String;)V")],
        ));
        let partition = organize(vec![user]).unwrap();
        assert_eq!(partition.group_count(), 1);
        assert_eq!(partition.class_count(), 1);
    }

    #[test]
    fn package_private_member_of_a_public_class_forces_a_merge() {
        let mut owner = class("p/Api", Visibility::Public);
        owner.methods.push(method("internal", "()V", Visibility::PackagePrivate, Vec::new()));
        let mut user = class("q/User", Visibility::Public);
        user.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Api", "internal", "()V")],
        ));
        let partition = organize(vec![owner, user]).unwrap();
        assert_eq!(partition.group_count(), 1);
    }

    #[test]
    fn protected_access_from_a_subclass_needs_no_merge() {
        let mut base = class("p/Base", Visibility::Public);
        base.methods.push(method("hook", "()V", Visibility::Protected, Vec::new()));
        let mut sub = class("q/Sub", Visibility::Public);
        sub.super_class = Some("p/Base".to_string());
        sub.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Base", "hook", "()V")],
        ));
        let partition = organize(vec![base, sub]).unwrap();
        assert_eq!(partition.group_count(), 2);
    }

    #[test]
    fn protected_access_without_inheritance_forces_a_merge() {
        let mut base = class("p/Base", Visibility::Public);
        base.methods.push(method("hook", "()V", Visibility::Protected, Vec::new()));
        let mut stranger = class("q/Stranger", Visibility::Public);
        stranger.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Base", "hook", "()V")],
        ));
        let partition = organize(vec![base, stranger]).unwrap();
        assert_eq!(partition.group_count(), 1);
    }

    #[test]
    fn protected_access_through_an_untracked_chain_forces_a_merge() {
        // Sub extends a class that is not part of the input, so the walk
        // cannot prove Base is an ancestor.
        let mut base = class("p/Base", Visibility::Public);
        base.methods.push(method("hook", "()V", Visibility::Protected, Vec::new()));
        let mut sub = class("q/Sub", Visibility::Public);
        sub.super_class = Some("ext/Missing".to_string());
        sub.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Base", "hook", "()V")],
        ));
        let partition = organize(vec![base, sub]).unwrap();
        assert_eq!(partition.group_count(), 1);
    }

    #[test]
    fn protected_access_through_a_deep_tracked_chain_needs_no_merge() {
        let mut base = class("p/Base", Visibility::Public);
        base.methods.push(method("hook", "()V", Visibility::Protected, Vec::new()));
        let mut mid = class("p/Mid", Visibility::Public);
        mid.super_class = Some("p/Base".to_string());
        let mut leaf = class("q/Leaf", Visibility::Public);
        leaf.super_class = Some("p/Mid".to_string());
        leaf.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Base", "hook", "()V")],
        ));
        // Mid extends Base (tracked public supertype): no merge either.
        let partition = organize(vec![base, mid, leaf]).unwrap();
        assert_eq!(partition.group_count(), 3);
    }

    #[test]
    fn member_lookup_miss_is_a_silent_no_op() {
        let owner = class("p/Api", Visibility::Public);
        let mut user = class("q/User", Visibility::Public);
        user.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Api", "neverDeclared", "()V")],
        ));
        let partition = organize(vec![owner, user]).unwrap();
        assert_eq!(partition.group_count(), 2);
    }

    #[test]
    fn transitive_merges_collapse_a_chain_regardless_of_order() {
        fn chain() -> Vec<ClassModel> {
            let a = class("p/A", Visibility::PackagePrivate);
            let mut b = class("p/B", Visibility::PackagePrivate);
            b.fields.push(field("a", "Lp/A;", Visibility::Private));
            let mut c = class("p/C", Visibility::Public);
            c.fields.push(field("b", "Lp/B;", Visibility::Private));
            vec![a, b, c]
        }

        let forward = organize(chain()).unwrap();
        let mut reversed_input = chain();
        reversed_input.reverse();
        let backward = organize(reversed_input).unwrap();

        assert_eq!(forward.group_count(), 1);
        assert_eq!(groups(&forward), groups(&backward));
        assert_eq!(group_of_set(&forward, "p/A"), set(&["p/A", "p/B", "p/C"]));
    }

    #[test]
    fn resolution_is_idempotent_under_repeated_references() {
        let mut user = class("p/User", Visibility::Public);
        user.fields.push(field("one", "Lp/Hidden;", Visibility::Private));
        user.fields.push(field("two", "Lp/Hidden;", Visibility::Private));
        user.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![
                invoke("p/Hidden", "poke", "()V"),
                invoke("p/Hidden", "poke", "()V"),
            ],
        ));
        let mut hidden = class("p/Hidden", Visibility::PackagePrivate);
        hidden.methods.push(method("poke", "()V", Visibility::PackagePrivate, Vec::new()));

        let partition = organize(vec![user, hidden]).unwrap();
        assert_eq!(partition.group_count(), 1);
        assert_eq!(partition.class_count(), 2);
    }

    #[test]
    fn cyclic_superclass_chains_terminate() {
        let mut base = class("p/Base", Visibility::Public);
        base.methods.push(method("hook", "()V", Visibility::Protected, Vec::new()));
        // Malformed input: two classes claiming each other as superclass.
        let mut x = class("q/X", Visibility::Public);
        x.super_class = Some("q/Y".to_string());
        x.methods.push(method(
            "run",
            "()V",
            Visibility::Public,
            vec![invoke("p/Base", "hook", "()V")],
        ));
        let mut y = class("q/Y", Visibility::Public);
        y.super_class = Some("q/X".to_string());

        let partition = organize(vec![base, x, y]).unwrap();
        // The walk gives up on the cycle and the access is satisfied by merge.
        assert_eq!(group_of_set(&partition, "q/X"), set(&["p/Base", "q/X"]));
    }

    #[test]
    fn fold_singletons_groups_loners_into_group_zero() {
        let mut user = class("p/User", Visibility::Public);
        user.fields.push(field("dep", "Lp/Hidden;", Visibility::Private));
        let models = vec![
            user,
            class("p/Hidden", Visibility::PackagePrivate),
            class("x/Lone1", Visibility::Public),
            class("y/Lone2", Visibility::Public),
        ];

        let partition = organize_with(models, true).unwrap();
        assert_eq!(partition.group_count(), 2);
        assert_eq!(group_of_set(&partition, "x/Lone1"), set(&["x/Lone1", "y/Lone2"]));
        assert_eq!(group_of_set(&partition, "p/User"), set(&["p/Hidden", "p/User"]));
    }
}
