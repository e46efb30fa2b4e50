use crate::key::ShuffleKey;
use crate::region::Region;

/// All entries of one region, in key order.
#[derive(Debug)]
pub struct KeyGroup<K, V> {
    pub region: Region,
    pub entries: Vec<(K, V)>,
}

/// In-process shuffle driven only by the [`ShuffleKey`] hooks: entries are bucketed with
/// `partition`, ordered with `sort_cmp` and split into groups with `group_cmp`.
pub struct LocalShuffle<K, V> {
    partitions: Vec<Vec<(K, V)>>,
}

impl<K: ShuffleKey, V> LocalShuffle<K, V> {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| Vec::new()).collect(),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn emit(&mut self, key: K, value: V) {
        let partition = key.partition(self.partitions.len());
        self.partitions[partition].push((key, value));
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    /// Groups per partition, each partition in sort order.
    pub fn into_partitions(self) -> Vec<Vec<KeyGroup<K, V>>> {
        self.partitions.into_iter().map(group_partition).collect()
    }

    /// Groups of every partition, partition by partition.
    pub fn into_groups(self) -> Vec<KeyGroup<K, V>> {
        self.into_partitions().into_iter().flatten().collect()
    }
}

impl<K: ShuffleKey, V> Extend<(K, V)> for LocalShuffle<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.emit(key, value);
        }
    }
}

fn group_partition<K: ShuffleKey, V>(mut entries: Vec<(K, V)>) -> Vec<KeyGroup<K, V>> {
    entries.sort_by(|a, b| a.0.sort_cmp(&b.0));

    let mut groups: Vec<KeyGroup<K, V>> = Vec::new();
    for (key, value) in entries {
        match groups.last_mut() {
            Some(group) if group.entries[0].0.group_cmp(&key).is_eq() => {
                group.entries.push((key, value))
            }
            _ => groups.push(KeyGroup {
                region: key.natural().clone(),
                entries: vec![(key, value)],
            }),
        }
    }
    groups
}
