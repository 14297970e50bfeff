//! Memoization cache mirroring the schema tree.
//!
//! Each [`CacheEntry`] owns its children. On refresh an entry either rebuilds
//! (schema node swapped), returns its cached props (value unchanged by
//! identity), or reruns its kind's factory and then drops children that the
//! factory did not visit.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use super::channel::{ArrayHandle, Channel};
use super::engine::RecomputeStats;
use super::keys::StableKey;
use super::props::{build_props, FactoryContext, KeyedElement, PropsRef};
use super::schema::{SchemaKind, SchemaRef};
use crate::document::Value;
use crate::error::CollabResult;

/// Key of a child cache entry, and one step of a props path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoKey {
    Field(String),
    Element(StableKey),
    /// Active branch of a conditional.
    Value,
}

impl fmt::Display for MemoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoKey::Field(name) => f.write_str(name),
            MemoKey::Element(key) => write!(f, "#{}", key),
            MemoKey::Value => f.write_str("value"),
        }
    }
}

/// Per-key state of one array element: its channel and last keyed props.
pub(crate) struct CachedElement<E> {
    pub(crate) channel: Channel,
    pub(crate) keyed: Option<Rc<KeyedElement<E>>>,
}

/// Channel state kept by a cache entry.
///
/// Arrays keep their per-key element lookup here; it lives exactly as long as
/// the entry.
pub(crate) enum NodeChannel<E> {
    Plain(Channel),
    Array {
        handle: ArrayHandle,
        elements: HashMap<StableKey, CachedElement<E>>,
        /// Element keys of the last successful pass.
        last_keys: Option<Arc<[StableKey]>>,
    },
}

impl<E> NodeChannel<E> {
    fn new(channel: Channel) -> Self {
        match channel {
            Channel::Array(handle) => NodeChannel::Array {
                handle,
                elements: HashMap::new(),
                last_keys: None,
            },
            other => NodeChannel::Plain(other),
        }
    }

    pub(crate) fn kind(&self) -> SchemaKind {
        match self {
            NodeChannel::Plain(channel) => channel.kind(),
            NodeChannel::Array { .. } => SchemaKind::Array,
        }
    }
}

/// State threaded through one update pass.
pub(crate) struct PassContext<'a, E> {
    pub(crate) factory: FactoryContext<'a, E>,
    pub(crate) stats: &'a Cell<RecomputeStats>,
}

impl<E> PassContext<'_, E> {
    fn record(&self, f: impl FnOnce(&mut RecomputeStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

pub(crate) struct CacheEntry<E> {
    schema: SchemaRef,
    value: Value,
    props: PropsRef<E>,
    channel: NodeChannel<E>,
    children: HashMap<MemoKey, CacheEntry<E>>,
}

impl<E> CacheEntry<E> {
    pub(crate) fn build(
        schema: &SchemaRef,
        value: &Value,
        channel: Channel,
        path: &[MemoKey],
        ctx: &PassContext<'_, E>,
    ) -> CollabResult<Self> {
        let mut channel = NodeChannel::new(channel);
        let mut children = HashMap::new();
        let props = compute(schema, value, &mut channel, &mut children, path, ctx)?;
        Ok(Self {
            schema: schema.clone(),
            value: value.clone(),
            props,
            channel,
            children,
        })
    }

    pub(crate) fn refresh(
        &mut self,
        schema: &SchemaRef,
        value: &Value,
        channel: Channel,
        path: &[MemoKey],
        ctx: &PassContext<'_, E>,
    ) -> CollabResult<PropsRef<E>> {
        if !Arc::ptr_eq(&self.schema, schema) {
            tracing::debug!(
                path = %display_memo_path(path),
                from = %self.schema.kind(),
                to = %schema.kind(),
                "schema node changed, rebuilding subtree"
            );
            ctx.record(|s| s.schema_resets += 1);
            *self = Self::build(schema, value, channel, path, ctx)?;
            return Ok(self.props.clone());
        }
        if self.value.same(value) {
            ctx.record(|s| s.cache_hits += 1);
            return Ok(self.props.clone());
        }
        let props = compute(schema, value, &mut self.channel, &mut self.children, path, ctx)?;
        self.value = value.clone();
        self.props = props.clone();
        Ok(props)
    }

    pub(crate) fn props(&self) -> &PropsRef<E> {
        &self.props
    }

    /// Number of entries in this subtree, including this one.
    pub(crate) fn len(&self) -> usize {
        1 + self.children.values().map(CacheEntry::len).sum::<usize>()
    }
}

fn compute<E>(
    schema: &SchemaRef,
    value: &Value,
    channel: &mut NodeChannel<E>,
    children: &mut HashMap<MemoKey, CacheEntry<E>>,
    path: &[MemoKey],
    ctx: &PassContext<'_, E>,
) -> CollabResult<PropsRef<E>> {
    let kind = schema.kind();
    ctx.record(|s| s.factory_calls[kind.index()] += 1);

    let mut visited = HashSet::new();
    let props = {
        let mut recurse = |child_schema: &SchemaRef,
                           child_value: &Value,
                           child_channel: Channel,
                           key: MemoKey|
         -> CollabResult<PropsRef<E>> {
            let mut child_path = path.to_vec();
            child_path.push(key.clone());
            let props = match children.get_mut(&key) {
                Some(entry) => {
                    entry.refresh(child_schema, child_value, child_channel, &child_path, ctx)?
                }
                None => {
                    let entry = CacheEntry::build(
                        child_schema,
                        child_value,
                        child_channel,
                        &child_path,
                        ctx,
                    )?;
                    let props = entry.props.clone();
                    children.insert(key.clone(), entry);
                    props
                }
            };
            visited.insert(key);
            Ok(props)
        };
        build_props(schema, value, channel, path, &ctx.factory, &mut recurse)?
    };

    let before = children.len();
    children.retain(|key, _| visited.contains(key));
    let released = before - children.len();
    if released > 0 {
        tracing::trace!(path = %display_memo_path(path), released, "released child cache entries");
        ctx.record(|s| s.released_subtrees += released as u64);
    }
    Ok(Rc::new(props))
}

/// Renders a props path as `/field/#key/value`.
pub fn display_memo_path(path: &[MemoKey]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().map(|key| format!("/{}", key)).collect()
}
