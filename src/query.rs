// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Archetype-filtered queries.
//!
//! A query is an include/exclude mask pair plus the ordered list of
//! archetypes currently known to satisfy it. Matching archetypes are
//! discovered incrementally — once at [`QueryStore::make_query`] time
//! against every archetype that already exists, and again whenever the
//! world creates a new archetype, via [`QueryStore::notify_new_archetype`].
//! There is never a full rescan at iteration time.

use smallvec::SmallVec;

use crate::archetype::{comp_bit, ArchetypeId, ArchetypeStore, Mask};
use crate::component::ComponentId;
use crate::entity::EntityId;

/// Max archetypes a single query can match.
pub const MAX_QUERY_MATCHES: usize = 32;

/// Max concurrently registered queries.
pub const MAX_QUERIES: usize = 64;

/// Max include/exclude terms per query.
pub const MAX_QUERY_TERMS: usize = 8;

pub type QueryId = usize;

/// Builder for a query's include/exclude component lists.
#[derive(Clone, Default)]
pub struct QueryDesc {
    include: SmallVec<[ComponentId; MAX_QUERY_TERMS]>,
    exclude: SmallVec<[ComponentId; MAX_QUERY_TERMS]>,
}

impl QueryDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `comp` to be present. Include order is preserved and is the
    /// order [`Cursor::next`] returns component pointers in.
    pub fn include(mut self, comp: ComponentId) -> Self {
        self.include.push(comp);
        self
    }

    /// Require `comp` to be absent.
    pub fn exclude(mut self, comp: ComponentId) -> Self {
        self.exclude.push(comp);
        self
    }
}

/// A registered query: its filter masks, its ordered include list (for
/// pointer output order), and every archetype id currently known to match.
pub(crate) struct Query {
    include_mask: Mask,
    exclude_mask: Mask,
    include_list: SmallVec<[ComponentId; MAX_QUERY_TERMS]>,
    matches: SmallVec<[ArchetypeId; MAX_QUERY_MATCHES]>,
}

impl Query {
    fn matches_mask(&self, mask: Mask) -> bool {
        (mask & self.include_mask) == self.include_mask && (mask & self.exclude_mask) == 0
    }

    pub fn matches(&self) -> &[ArchetypeId] {
        &self.matches
    }

    pub fn include_list(&self) -> &[ComponentId] {
        &self.include_list
    }
}

/// Owns every registered query.
pub(crate) struct QueryStore {
    queries: Vec<Query>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self {
            queries: Vec::with_capacity(MAX_QUERIES),
        }
    }

    /// Register a query, matching it against every archetype that already
    /// exists. Panics past `MAX_QUERY_TERMS` terms, `MAX_QUERIES`
    /// registered queries, or `MAX_QUERY_MATCHES` matched archetypes — all
    /// fixed, documented caps.
    pub fn make_query(&mut self, desc: &QueryDesc, archetypes: &ArchetypeStore) -> QueryId {
        if desc.include.len() > MAX_QUERY_TERMS || desc.exclude.len() > MAX_QUERY_TERMS {
            panic!("query has more than {MAX_QUERY_TERMS} include/exclude terms");
        }
        if self.queries.len() >= MAX_QUERIES {
            #[cfg(feature = "profiling")]
            tracing::error!(capacity = MAX_QUERIES, "query store exhausted");
            panic!("query store exhausted (max {MAX_QUERIES} queries)");
        }

        let include_mask = desc.include.iter().fold(0u64, |m, &c| m | comp_bit(c));
        let exclude_mask = desc.exclude.iter().fold(0u64, |m, &c| m | comp_bit(c));

        let mut matches = SmallVec::new();
        for (id, arch) in archetypes.archetypes().iter().enumerate() {
            if (arch.mask() & include_mask) == include_mask && (arch.mask() & exclude_mask) == 0 {
                Self::push_match(&mut matches, id);
            }
        }

        self.queries.push(Query {
            include_mask,
            exclude_mask,
            include_list: desc.include.clone(),
            matches,
        });
        self.queries.len() - 1
    }

    fn push_match(matches: &mut SmallVec<[ArchetypeId; MAX_QUERY_MATCHES]>, id: ArchetypeId) {
        if matches.len() >= MAX_QUERY_MATCHES {
            #[cfg(feature = "profiling")]
            tracing::error!(capacity = MAX_QUERY_MATCHES, "query match list exhausted");
            panic!("query match list exhausted (max {MAX_QUERY_MATCHES} archetypes)");
        }
        matches.push(id);
    }

    /// Offer a freshly created archetype to every registered query. Called
    /// once, right after `ArchetypeStore::find_or_create` reports a new
    /// archetype — never as part of a rescan.
    pub fn notify_new_archetype(&mut self, id: ArchetypeId, mask: Mask) {
        for query in &mut self.queries {
            if query.matches_mask(mask) {
                Self::push_match(&mut query.matches, id);
            }
        }
    }

    pub fn query(&self, id: QueryId) -> &Query {
        &self.queries[id]
    }
}

/// Non-restartable cursor over a query's matched archetypes. Exhausted once
/// `next` returns `None`; there is no reset.
pub struct Cursor<'a> {
    query: &'a Query,
    archetypes: &'a ArchetypeStore,
    match_pos: usize,
    row: usize,
    ptrs: SmallVec<[*mut u8; MAX_QUERY_TERMS]>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(query: &'a Query, archetypes: &'a ArchetypeStore) -> Self {
        Self {
            query,
            archetypes,
            match_pos: 0,
            row: 0,
            ptrs: SmallVec::new(),
        }
    }

    /// Advance to the next matching entity. Returns its handle and a
    /// pointer per include-list component, in include-list order.
    pub fn next(&mut self) -> Option<(EntityId, &[*mut u8])> {
        loop {
            if self.match_pos >= self.query.matches.len() {
                return None;
            }

            let arch = self.archetypes.get(self.query.matches[self.match_pos]);
            if self.row >= arch.row_count() {
                self.match_pos += 1;
                self.row = 0;
                continue;
            }

            let entity = arch.rows()[self.row];
            self.ptrs.clear();
            for &comp in &self.query.include_list {
                let ptr = arch
                    .get_ptr(comp, self.row)
                    .expect("matched archetype is missing an included component");
                self.ptrs.push(ptr);
            }
            self.row += 1;
            return Some((entity, &self.ptrs));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;
    use crate::entity::EntityId;

    fn make_entity(index: u32) -> EntityId {
        EntityId::pack(index, 0)
    }

    #[test]
    fn make_query_matches_existing_archetypes() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register(4, 4);
        let b = registry.register(4, 4);

        let mut store = ArchetypeStore::new(1 << 16);
        let (with_both, _) = store.find_or_create(&[a, b], &registry).unwrap();
        let (with_a_only, _) = store.find_or_create(&[a], &registry).unwrap();

        let mut queries = QueryStore::new();
        let desc = QueryDesc::new().include(a);
        let id = queries.make_query(&desc, &store);

        let matches = queries.query(id).matches();
        assert!(matches.contains(&with_both));
        assert!(matches.contains(&with_a_only));
    }

    #[test]
    fn exclude_filters_out_archetype() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register(4, 4);
        let b = registry.register(4, 4);

        let mut store = ArchetypeStore::new(1 << 16);
        store.find_or_create(&[a, b], &registry).unwrap();
        let (with_a_only, _) = store.find_or_create(&[a], &registry).unwrap();

        let mut queries = QueryStore::new();
        let desc = QueryDesc::new().include(a).exclude(b);
        let id = queries.make_query(&desc, &store);

        assert_eq!(queries.query(id).matches(), &[with_a_only]);
    }

    #[test]
    fn notify_new_archetype_extends_existing_queries() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register(4, 4);

        let mut store = ArchetypeStore::new(1 << 16);
        let mut queries = QueryStore::new();
        let desc = QueryDesc::new().include(a);
        let id = queries.make_query(&desc, &store);
        assert!(queries.query(id).matches().is_empty());

        let (new_arch, created) = store.find_or_create(&[a], &registry).unwrap();
        assert!(created);
        queries.notify_new_archetype(new_arch, store.get(new_arch).mask());

        assert_eq!(queries.query(id).matches(), &[new_arch]);
    }

    #[test]
    fn cursor_walks_rows_across_matched_archetypes() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register(4, 4);

        let mut store = ArchetypeStore::new(1 << 16);
        let (arch_id, _) = store.find_or_create(&[a], &registry).unwrap();
        let e1 = make_entity(1);
        let e2 = make_entity(2);
        {
            let arch = store.get_mut(arch_id);
            let r1 = arch.allocate_row(e1);
            let r2 = arch.allocate_row(e2);
            unsafe {
                *(arch.get_ptr(a, r1).unwrap() as *mut i32) = 10;
                *(arch.get_ptr(a, r2).unwrap() as *mut i32) = 20;
            }
        }

        let mut queries = QueryStore::new();
        let desc = QueryDesc::new().include(a);
        let id = queries.make_query(&desc, &store);

        let mut cursor = Cursor::new(queries.query(id), &store);
        let mut seen = Vec::new();
        while let Some((entity, ptrs)) = cursor.next() {
            let value = unsafe { *(ptrs[0] as *const i32) };
            seen.push((entity, value));
        }
        assert_eq!(seen, vec![(e1, 10), (e2, 20)]);
        assert!(cursor.next().is_none());
    }
}
