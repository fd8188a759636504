//! Alias analysis over nested blocks.
//!
//! An [`AliasMap`] tracks, for every refinement visible at one nesting depth,
//! how it relates to its root allocation: the composed access polynomial in
//! uniquified index names, the rectangular extent of the window, and the
//! resolved location. Two entries can then be compared for overlap without
//! walking the block tree again.

use std::collections::{BTreeMap, HashMap};

use stratum_ir::{Affine, Block, Location, Statement, Tags, TensorShape};

use crate::error::CodegenError;

/// How two refinements may alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasType {
    /// The buffers access unrelated memory.
    None,
    /// The buffers overlap.
    Partial,
    /// The buffers are identical for every index valuation.
    Exact,
}

/// A closed per-dimension interval covered by an access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent {
    pub min: i64,
    pub max: i64,
}

/// Aliasing facts for one refinement at one nesting depth.
#[derive(Clone, Debug, PartialEq)]
pub struct AliasInfo {
    /// Depth-qualified name of the root allocation.
    pub base_name: String,
    /// Composed access in uniquified (`d<depth>:`) index names.
    pub access: Vec<Affine>,
    /// Window bounds in the immediately enclosing coordinate system.
    pub extents: Vec<Extent>,
    /// Resolved location, accumulating borrow units along the path.
    pub location: Location,
    /// Interior shape of the refinement.
    pub shape: TensorShape,
}

/// Returns `true` if the two extent boxes intersect in every dimension.
///
/// The arities must match; comparing windows of different rank is an
/// invariant violation.
pub fn check_overlap(a: &[Extent], b: &[Extent]) -> bool {
    assert_eq!(a.len(), b.len(), "incompatible extents");
    a.iter()
        .zip(b)
        .all(|(ae, be)| be.min <= ae.max && ae.min <= be.max)
}

impl AliasInfo {
    /// Compares two entries for aliasing.
    ///
    /// Identical shapes with structurally equal access polynomials are
    /// `Exact`; different base tensors, different constant banks, or disjoint
    /// extents are `None`; everything else is conservatively `Partial`.
    pub fn compare(a: &AliasInfo, b: &AliasInfo) -> AliasType {
        log::trace!("alias compare: a={}, b={}", a.base_name, b.base_name);
        if a.base_name != b.base_name {
            return AliasType::None;
        }
        if a.shape == b.shape {
            if a.location.unit.is_constant()
                && b.location.unit.is_constant()
                && a.location != b.location
            {
                log::trace!("  different banks: {} vs {}", a.location, b.location);
                return AliasType::None;
            }
            if a.access == b.access {
                return AliasType::Exact;
            }
            if !check_overlap(&a.extents, &b.extents) {
                return AliasType::None;
            }
        }
        // A splitting-plane test could sometimes prove None here; stay
        // conservative instead.
        AliasType::Partial
    }
}

/// Renames every index of `orig` with `prefix`, leaving the constant term.
///
/// Used when lifting a block-local access into an outer coordinate system
/// without capturing equally named ancestor indices.
fn uniqify_affine(orig: &Affine, prefix: &str) -> Affine {
    let mut out = Affine::zero();
    for (name, coeff) in orig.terms() {
        if name.is_empty() {
            out += Affine::constant(coeff);
        } else {
            out += Affine::term(format!("{prefix}{name}"), coeff);
        }
    }
    out
}

/// Per-depth aliasing facts for every refinement of one block.
#[derive(Clone, Debug, Default)]
pub struct AliasMap {
    depth: usize,
    info: BTreeMap<String, AliasInfo>,
}

impl AliasMap {
    /// The root map: depth zero, no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map for a block nested inside the scope this map describes.
    pub fn nested(&self, block: &Block) -> Result<AliasMap, CodegenError> {
        let depth = self.depth + 1;
        let prefix = format!("d{depth}:");

        // Corner values of this block's indices: a constant affine pins the
        // index, anything else iterates its full range.
        let mut min_idxs = BTreeMap::new();
        let mut max_idxs = BTreeMap::new();
        for idx in &block.idxs {
            if idx.affine.is_constant() && !idx.affine.is_zero() {
                min_idxs.insert(idx.name.clone(), idx.affine.constant_value());
                max_idxs.insert(idx.name.clone(), idx.affine.constant_value());
            } else {
                min_idxs.insert(idx.name.clone(), 0);
                max_idxs.insert(idx.name.clone(), idx.range.saturating_sub(1) as i64);
            }
        }

        let mut info = BTreeMap::new();
        for r in &block.refs {
            let mut entry = if r.dir == stratum_ir::RefDir::None {
                AliasInfo {
                    base_name: format!("{prefix}{}", r.into),
                    access: vec![Affine::zero(); r.access.len()],
                    extents: Vec::new(),
                    location: r.location.clone(),
                    shape: r.interior_shape.clone(),
                }
            } else {
                let outer = self.info.get(&r.from).ok_or_else(|| CodegenError::BadRefFrom {
                    block: block.name.clone(),
                    from: r.from.clone(),
                    into: r.into.clone(),
                })?;
                let mut location = outer.location.clone();
                location.unit += &r.location.unit;
                AliasInfo {
                    base_name: outer.base_name.clone(),
                    access: outer.access.clone(),
                    extents: Vec::new(),
                    location,
                    shape: r.interior_shape.clone(),
                }
            };
            if entry.access.len() != r.access.len() {
                return Err(CodegenError::AccessArity {
                    block: block.name.clone(),
                    name: r.into.clone(),
                    found: r.access.len(),
                    expected: entry.access.len(),
                });
            }
            entry.extents.reserve(r.access.len());
            for (i, access) in r.access.iter().enumerate() {
                entry.access[i] += uniqify_affine(access, &prefix);
                let size = r.interior_shape.dims.get(i).map_or(1, |d| d.size);
                let min = access.eval(&min_idxs)?;
                let max = access.eval(&max_idxs)? + size as i64 - 1;
                entry.extents.push(Extent { min, max });
            }
            log::trace!(
                "extents for '{}' in '{}': {:?}",
                r.into,
                block.name,
                entry.extents
            );
            info.insert(r.into.clone(), entry);
        }
        Ok(AliasMap { depth, info })
    }

    /// Nesting depth of the block this map describes.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Looks up a refinement's aliasing facts by its local name.
    pub fn at(&self, name: &str) -> Option<&AliasInfo> {
        self.info.get(name)
    }

    /// Counts, per buffer name, the direct child statements mentioning it.
    ///
    /// A statement touching a buffer in both its reads and writes counts once.
    pub fn ref_use_counts(&self, block: &Block) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for stmt in &block.stmts {
            let mut used: Vec<&str> = stmt.buffer_reads();
            used.extend(stmt.buffer_writes());
            used.sort_unstable();
            used.dedup();
            for name in used {
                *counts.entry(name.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

fn run_on_blocks_recurse<F>(
    map: &AliasMap,
    block: &mut Block,
    reqs: &Tags,
    func: &mut F,
) -> Result<(), CodegenError>
where
    F: FnMut(&AliasMap, &mut Block) -> Result<(), CodegenError>,
{
    if block.has_tags(reqs) {
        func(map, block)
    } else {
        for stmt in &mut block.stmts {
            if let Statement::Block(inner) = stmt {
                let inner_map = map.nested(inner)?;
                run_on_blocks_recurse(&inner_map, inner, reqs, func)?;
            }
        }
        Ok(())
    }
}

/// Visits every nested block whose tags contain `reqs`, passing its alias
/// map; a visited block's own children are not descended into.
pub fn run_on_blocks<F>(root: &mut Block, reqs: &Tags, mut func: F) -> Result<(), CodegenError>
where
    F: FnMut(&AliasMap, &mut Block) -> Result<(), CodegenError>,
{
    let base = AliasMap::new();
    let root_map = base.nested(root)?;
    run_on_blocks_recurse(&root_map, root, reqs, &mut func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_ir::{tags, DataType, Index, Load, RefDir, Refinement, Store};

    fn ref_with(
        dir: RefDir,
        from: &str,
        into: &str,
        access: Vec<Affine>,
        shape: TensorShape,
    ) -> Refinement {
        Refinement {
            dir,
            from: from.into(),
            into: into.into(),
            access,
            interior_shape: shape,
            location: Location::new("RAM"),
            ..Refinement::default()
        }
    }

    /// A root block allocating `buf` of 32 elements, with one child viewing
    /// an 8-element window at `4*i`.
    fn two_level_program() -> Block {
        let mut inner = Block::new("inner");
        inner.idxs.push(Index::new("i", 4));
        inner.refs.push(ref_with(
            RefDir::In,
            "buf",
            "window",
            vec![Affine::from("i") * 4],
            TensorShape::simple(DataType::F32, &[8]),
        ));

        let mut root = Block::new("root");
        root.refs.push(ref_with(
            RefDir::None,
            "",
            "buf",
            vec![Affine::zero()],
            TensorShape::simple(DataType::F32, &[32]),
        ));
        root.stmts.push(Statement::from(inner));
        root
    }

    #[test]
    fn nested_map_composes_access() {
        let root = two_level_program();
        let root_map = AliasMap::new().nested(&root).unwrap();
        let buf = root_map.at("buf").unwrap();
        assert_eq!(buf.base_name, "d1:buf");
        assert_eq!(buf.extents, vec![Extent { min: 0, max: 31 }]);

        let inner_map = root_map.nested(root.sub_block(0).unwrap()).unwrap();
        let window = inner_map.at("window").unwrap();
        assert_eq!(window.base_name, "d1:buf");
        assert_eq!(window.access, vec![Affine::term("d2:i", 4)]);
        // i in 0..4, window of 8 elements: covers 0 ..= 12 + 7.
        assert_eq!(window.extents, vec![Extent { min: 0, max: 19 }]);
        assert_eq!(inner_map.depth(), 2);
    }

    #[test]
    fn constant_affine_index_is_pinned() {
        let mut root = two_level_program();
        {
            let inner = root.sub_block_mut(0).unwrap();
            inner.idxs[0].affine = Affine::constant(2);
        }
        let root_map = AliasMap::new().nested(&root).unwrap();
        let inner_map = root_map.nested(root.sub_block(0).unwrap()).unwrap();
        let window = inner_map.at("window").unwrap();
        assert_eq!(window.extents, vec![Extent { min: 8, max: 15 }]);
    }

    #[test]
    fn bad_from_is_rejected() {
        let mut root = two_level_program();
        root.sub_block_mut(0).unwrap().refs[0].from = "nope".into();
        let root_map = AliasMap::new().nested(&root).unwrap();
        let err = root_map.nested(root.sub_block(0).unwrap()).unwrap_err();
        assert!(matches!(err, CodegenError::BadRefFrom { .. }));
    }

    #[test]
    fn compare_is_reflexive_and_symmetric() {
        let root = two_level_program();
        let root_map = AliasMap::new().nested(&root).unwrap();
        let inner_map = root_map.nested(root.sub_block(0).unwrap()).unwrap();
        let window = inner_map.at("window").unwrap();
        assert_eq!(AliasInfo::compare(window, window), AliasType::Exact);

        let buf = root_map.at("buf").unwrap();
        assert_eq!(
            AliasInfo::compare(buf, window),
            AliasInfo::compare(window, buf)
        );
    }

    #[test]
    fn compare_same_base_identical_access() {
        let mut inner = Block::new("inner");
        inner.idxs.push(Index::new("i", 4));
        let shape = TensorShape::simple(DataType::F32, &[8]);
        inner.refs.push(ref_with(
            RefDir::In,
            "buf",
            "v1",
            vec![Affine::from("i") * 8],
            shape.clone(),
        ));
        inner.refs.push(ref_with(
            RefDir::Out,
            "buf",
            "v2",
            vec![Affine::from("i") * 8],
            shape,
        ));
        let mut root = two_level_program();
        root.stmts[0] = Statement::from(inner);

        let root_map = AliasMap::new().nested(&root).unwrap();
        let inner_map = root_map.nested(root.sub_block(0).unwrap()).unwrap();
        assert_eq!(
            AliasInfo::compare(inner_map.at("v1").unwrap(), inner_map.at("v2").unwrap()),
            AliasType::Exact
        );
    }

    #[test]
    fn compare_same_base_disjoint_extents() {
        let mut inner = Block::new("inner");
        let shape = TensorShape::simple(DataType::F32, &[8]);
        inner.refs.push(ref_with(
            RefDir::In,
            "buf",
            "lo",
            vec![Affine::constant(0)],
            shape.clone(),
        ));
        inner.refs.push(ref_with(
            RefDir::Out,
            "buf",
            "hi",
            vec![Affine::constant(16)],
            shape,
        ));
        let mut root = two_level_program();
        root.stmts[0] = Statement::from(inner);

        let root_map = AliasMap::new().nested(&root).unwrap();
        let inner_map = root_map.nested(root.sub_block(0).unwrap()).unwrap();
        assert_eq!(
            AliasInfo::compare(inner_map.at("lo").unwrap(), inner_map.at("hi").unwrap()),
            AliasType::None
        );
    }

    #[test]
    fn compare_different_bases() {
        let mut root = Block::new("root");
        for name in ["a", "b"] {
            root.refs.push(ref_with(
                RefDir::None,
                "",
                name,
                vec![Affine::zero()],
                TensorShape::simple(DataType::F32, &[8]),
            ));
        }
        let map = AliasMap::new().nested(&root).unwrap();
        assert_eq!(
            AliasInfo::compare(map.at("a").unwrap(), map.at("b").unwrap()),
            AliasType::None
        );
    }

    #[test]
    fn overlapping_windows_are_partial() {
        let mut inner = Block::new("inner");
        let shape = TensorShape::simple(DataType::F32, &[8]);
        inner.refs.push(ref_with(
            RefDir::In,
            "buf",
            "lo",
            vec![Affine::constant(0)],
            shape.clone(),
        ));
        inner.refs.push(ref_with(
            RefDir::Out,
            "buf",
            "mid",
            vec![Affine::constant(4)],
            shape,
        ));
        let mut root = two_level_program();
        root.stmts[0] = Statement::from(inner);

        let root_map = AliasMap::new().nested(&root).unwrap();
        let inner_map = root_map.nested(root.sub_block(0).unwrap()).unwrap();
        assert_eq!(
            AliasInfo::compare(inner_map.at("lo").unwrap(), inner_map.at("mid").unwrap()),
            AliasType::Partial
        );
    }

    #[test]
    fn use_counts_count_statements_once() {
        let mut block = Block::new("b");
        block.stmts.push(Statement::Load(Load::new("a", "$x")));
        block.stmts.push(Statement::Store(Store::new("$x", "a")));
        block.stmts.push(Statement::Load(Load::new("b", "$y")));
        let map = AliasMap::new();
        let counts = map.ref_use_counts(&block);
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
    }

    #[test]
    fn run_on_blocks_stops_at_match() {
        let mut grandchild = Block::new("grandchild");
        grandchild.tags = tags(["kernel"]);
        let mut child = Block::new("child");
        child.tags = tags(["kernel"]);
        child.stmts.push(Statement::from(grandchild));
        let mut root = Block::new("root");
        root.stmts.push(Statement::from(child));

        let mut visited = Vec::new();
        run_on_blocks(&mut root, &tags(["kernel"]), |map, block| {
            visited.push((block.name.clone(), map.depth()));
            Ok(())
        })
        .unwrap();
        // The child matches, so the grandchild is never visited.
        assert_eq!(visited, vec![("child".to_string(), 2)]);
    }

    #[test]
    fn check_overlap_intervals() {
        let a = [Extent { min: 0, max: 7 }];
        let b = [Extent { min: 7, max: 10 }];
        let c = [Extent { min: 8, max: 10 }];
        assert!(check_overlap(&a, &b));
        assert!(!check_overlap(&a, &c));
    }
}
