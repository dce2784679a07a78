use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info};

use common::{default_partition, Key, KeyValue, MrError, Result, Value};

use crate::channel::RecordReceiver;
use crate::module::JobModule;
use crate::values::{ValueIterator, ValueSource};

/// A key and every value emitted with it, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    key: Key,
    values: VecDeque<Value>,
}

impl Group {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            values: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.values.push_back(value);
    }

    /// Append the values of `other`, keeping this group's key.
    pub fn merge(&mut self, other: Group) {
        self.values.extend(other.values);
    }

    /// Move this group into the only iterator that will ever read it.
    pub fn into_values(self) -> ValueIterator {
        let key = self.key.clone();
        ValueIterator::new(key, self)
    }
}

impl ValueSource for Group {
    fn next_value(&mut self) -> Option<Value> {
        self.values.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.values.len(), Some(self.values.len()))
    }
}

/// In-memory grouping of records by key.
#[derive(Debug, Default)]
pub(crate) struct Grouper {
    index: HashMap<Key, usize>,
    groups: Vec<Group>,
    records: usize,
}

impl Grouper {
    pub(crate) fn insert(&mut self, record: KeyValue) {
        let (key, value) = record.into_parts();
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.groups.push(Group::new(key.clone()));
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[slot].push(value);
        self.records += 1;
    }

    pub(crate) fn key_count(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records
    }

    /// Every group, ordered by the module's key comparator, with groups the
    /// module's grouping comparator calls equal merged into one.
    ///
    /// The sort is stable, so merged values keep arrival order per key.
    pub(crate) fn into_sorted(self, module: &dyn JobModule) -> Vec<Group> {
        self.groups
            .into_iter()
            .sorted_by(|a, b| module.compare_keys(&a.key, &b.key))
            .coalesce(|mut a, b| {
                if module.group_keys(&a.key, &b.key) == Ordering::Equal {
                    a.merge(b);
                    Ok(a)
                } else {
                    Err((a, b))
                }
            })
            .collect()
    }
}

/// Collects map output from the record channel and splits it into reduce
/// partitions.
///
/// Only the task that owns the stage touches its groups, so no locking is
/// involved.
pub struct GroupStage {
    module: Arc<dyn JobModule>,
    grouper: Grouper,
}

impl GroupStage {
    pub fn new(module: Arc<dyn JobModule>) -> Self {
        Self {
            module,
            grouper: Grouper::default(),
        }
    }

    pub fn insert(&mut self, record: KeyValue) {
        self.grouper.insert(record);
    }

    /// Drain the channel until end of input. Returns the number of records
    /// consumed by this call.
    pub async fn consume(&mut self, rx: &mut RecordReceiver) -> usize {
        let before = self.grouper.record_count();
        while let Some(record) = rx.pop().await {
            self.grouper.insert(record);
        }
        let consumed = self.grouper.record_count() - before;
        debug!(
            records = consumed,
            keys = self.grouper.key_count(),
            "group stage reached end of input"
        );
        consumed
    }

    pub fn key_count(&self) -> usize {
        self.grouper.key_count()
    }

    pub fn record_count(&self) -> usize {
        self.grouper.record_count()
    }

    /// Assign every key to exactly one of `partitions` partitions and fix
    /// the key order within each.
    pub fn into_partitions(self, partitions: usize) -> Result<Vec<Partition>> {
        if partitions == 0 {
            return Err(MrError::Config("at least one partition is required".into()));
        }
        let module = self.module;
        // Groups arrive sorted, so every bucket stays sorted too.
        let mut buckets: Vec<Vec<Group>> = (0..partitions).map(|_| Vec::new()).collect();
        for group in self.grouper.into_sorted(module.as_ref()) {
            let partition = module
                .partition(&group.key, partitions)
                .unwrap_or_else(|| default_partition(&group.key, partitions));
            if partition >= partitions {
                return Err(MrError::IllegalPartition {
                    key: group.key,
                    partition,
                    partitions,
                });
            }
            buckets[partition].push(group);
        }

        let partitions: Vec<Partition> = buckets
            .into_iter()
            .enumerate()
            .map(|(index, groups)| Partition::new(index, groups))
            .collect();
        info!(
            partitions = partitions.len(),
            keys = partitions.iter().map(Partition::len).sum::<usize>(),
            "map output grouped"
        );
        Ok(partitions)
    }
}

/// The groups of one reduce partition, yielded lazily in key order.
#[derive(Debug)]
pub struct Partition {
    index: usize,
    keys: Vec<Key>,
    groups: std::vec::IntoIter<Group>,
}

impl Partition {
    pub fn new(index: usize, groups: Vec<Group>) -> Self {
        Self {
            index,
            keys: groups.iter().map(|g| g.key.clone()).collect(),
            groups: groups.into_iter(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Every key of the partition in delivery order.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Iterator for Partition {
    type Item = (Key, ValueIterator);

    fn next(&mut self) -> Option<Self::Item> {
        let group = self.groups.next()?;
        Some((group.key.clone(), group.into_values()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}
