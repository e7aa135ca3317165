use crate::{Gc, ObjString, Value};

const MAX_LOAD: f64 = 0.75;

/// An open-addressed hash table keyed by interned strings.
///
/// Keys are compared by object identity, which is enough because all strings
/// are interned. Probing is linear; deleted entries leave a tombstone behind
/// so probe sequences stay unbroken, and tombstones keep counting toward the
/// load factor so a probe can always terminate. Tombstones are dropped when
/// the table grows.
#[derive(Debug, Default)]
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
enum Entry {
    Vacant,
    Tombstone,
    Occupied { key: Gc<ObjString>, value: Value },
}

fn find_entry(entries: &[Entry], key: Gc<ObjString>) -> usize {
    let capacity = entries.len();
    let mut index = key.hash as usize % capacity;
    let mut tombstone = None;
    loop {
        match &entries[index] {
            Entry::Vacant => return tombstone.unwrap_or(index),
            Entry::Tombstone => {
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            }
            Entry::Occupied { key: k, .. } => {
                if Gc::ptr_eq(k, &key) {
                    return index;
                }
            }
        }
        index = (index + 1) % capacity;
    }
}

impl Table {
    /// Look up the value bound to the key.
    pub fn get(&self, key: Gc<ObjString>) -> Option<&Value> {
        if self.count == 0 {
            return None;
        }
        match &self.entries[find_entry(&self.entries, key)] {
            Entry::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Bind the key to the value. Returns true when the key was not present.
    pub fn set(&mut self, key: Gc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            self.grow();
        }
        let index = find_entry(&self.entries, key);
        match &mut self.entries[index] {
            Entry::Occupied { value: slot, .. } => {
                *slot = value;
                false
            }
            slot @ Entry::Tombstone => {
                *slot = Entry::Occupied { key, value };
                true
            }
            slot @ Entry::Vacant => {
                *slot = Entry::Occupied { key, value };
                self.count += 1;
                true
            }
        }
    }

    /// Unbind the key. Returns true when the key was present.
    pub fn delete(&mut self, key: Gc<ObjString>) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = find_entry(&self.entries, key);
        match &mut self.entries[index] {
            slot @ Entry::Occupied { .. } => {
                *slot = Entry::Tombstone;
                true
            }
            _ => false,
        }
    }

    /// Copy every binding into this table, overwriting on collision.
    pub fn add_all(&mut self, other: &Table) {
        for (key, value) in other.iter() {
            self.set(key, value.clone());
        }
    }

    /// Find an interned string by contents. This is the only lookup that
    /// compares bytes instead of identities, and it is what makes interning
    /// possible in the first place.
    pub fn find_string(&self, s: &str, hash: u32) -> Option<Gc<ObjString>> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            match &self.entries[index] {
                Entry::Vacant => return None,
                Entry::Tombstone => {}
                Entry::Occupied { key, .. } => {
                    if key.hash == hash && key.chars == s {
                        return Some(*key);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Iterate over all live bindings.
    pub fn iter(&self) -> impl Iterator<Item = (Gc<ObjString>, &Value)> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Occupied { key, value } => Some((*key, value)),
            _ => None,
        })
    }

    /// Turn every binding whose key was not marked by the running collection
    /// into a tombstone. Called between the mark and sweep phases, this is
    /// what makes the intern table hold its strings weakly.
    pub(crate) fn remove_white(&mut self) {
        for entry in &mut self.entries {
            if let Entry::Occupied { key, .. } = entry {
                if !key.is_marked() {
                    *entry = Entry::Tombstone;
                }
            }
        }
    }

    fn grow(&mut self) {
        let capacity = if self.entries.len() < 8 {
            8
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![Entry::Vacant; capacity]);
        self.count = 0;
        for entry in old {
            if let Entry::Occupied { key, value } = entry {
                let index = find_entry(&self.entries, key);
                self.entries[index] = Entry::Occupied { key, value };
                self.count += 1;
            }
        }
    }
}
