//! Group coordinator (§4.H): policy decisions layered over the process
//! supervisor — exclusivity, swap, persistence, and per-group port
//! allocation.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Group {
    pub members: Vec<String>,
    pub exclusive: bool,
    pub swap: bool,
    pub persistent: bool,
    start_port: u16,
    next_port: u16,
    free_ports: Vec<u16>,
}

impl Group {
    pub fn new(members: Vec<String>, exclusive: bool, swap: bool, persistent: bool, start_port: u16) -> Self {
        Self {
            members,
            exclusive,
            swap,
            persistent,
            start_port,
            next_port: start_port,
            free_ports: Vec::new(),
        }
    }
}

/// Coarse `RwLock` over a sorted map, guaranteeing deterministic iteration
/// (by group id) so eviction order is reproducible under tests.
pub struct GroupTable {
    groups: RwLock<BTreeMap<String, Group>>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, group_id: impl Into<String>, group: Group) {
        self.groups.write().unwrap().insert(group_id.into(), group);
    }

    pub fn has_member(&self, model_id: &str) -> bool {
        self.groups
            .read()
            .unwrap()
            .values()
            .any(|g| g.members.iter().any(|m| m == model_id))
    }

    pub fn group_id_for(&self, model_id: &str) -> Option<String> {
        self.groups
            .read()
            .unwrap()
            .iter()
            .find(|(_, g)| g.members.iter().any(|m| m == model_id))
            .map(|(id, _)| id.clone())
    }

    pub fn is_persistent(&self, model_id: &str) -> bool {
        self.group_id_for(model_id)
            .and_then(|id| self.groups.read().unwrap().get(&id).map(|g| g.persistent))
            .unwrap_or(false)
    }

    /// Other members of the same group that a swap policy requires
    /// stopped before `model_id` may start.
    pub fn swap_victims(&self, model_id: &str, ready: &dyn Fn(&str) -> bool) -> Vec<String> {
        let groups = self.groups.read().unwrap();
        let Some(group) = groups.values().find(|g| g.members.iter().any(|m| m == model_id)) else {
            return Vec::new();
        };
        if !group.swap {
            return Vec::new();
        }
        group
            .members
            .iter()
            .filter(|m| *m != model_id && ready(m))
            .cloned()
            .collect()
    }

    /// Ready members of other non-persistent groups, required stopped
    /// before an exclusive group's member may start.
    pub fn exclusive_victims(&self, model_id: &str, ready: &dyn Fn(&str) -> bool) -> Vec<String> {
        let groups = self.groups.read().unwrap();
        let Some((own_id, own_group)) = groups
            .iter()
            .find(|(_, g)| g.members.iter().any(|m| m == model_id))
        else {
            return Vec::new();
        };
        if !own_group.exclusive {
            return Vec::new();
        }
        let mut victims = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for (id, group) in groups.iter() {
            if id == own_id || group.persistent {
                continue;
            }
            for member in &group.members {
                if ready(member) && seen.insert(member.as_str()) {
                    victims.push(member.clone());
                }
            }
        }
        victims
    }

    /// Allocate the next free port for `group_id`, reusing a released one
    /// if available, otherwise advancing the monotonic cursor.
    pub fn allocate_port(&self, group_id: &str) -> Option<u16> {
        let mut groups = self.groups.write().unwrap();
        let group = groups.get_mut(group_id)?;
        if let Some(port) = group.free_ports.pop() {
            return Some(port);
        }
        let port = group.next_port;
        group.next_port += 1;
        Some(port)
    }

    pub fn release_port(&self, group_id: &str, port: u16) {
        if let Some(group) = self.groups.write().unwrap().get_mut(group_id) {
            group.free_ports.push(port);
        }
    }

    pub fn start_port_of(&self, group_id: &str) -> Option<u16> {
        self.groups.read().unwrap().get(group_id).map(|g| g.start_port)
    }
}

impl Default for GroupTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_group_reports_other_ready_member_as_victim() {
        let table = GroupTable::new();
        table.insert(
            "g1",
            Group::new(vec!["a".into(), "b".into()], false, true, false, 9000),
        );
        let ready = |m: &str| m == "a";
        let victims = table.swap_victims("b", &ready);
        assert_eq!(victims, vec!["a".to_string()]);
    }

    #[test]
    fn exclusive_group_reports_other_non_persistent_groups_ready_members() {
        let table = GroupTable::new();
        table.insert("a", Group::new(vec!["a1".into()], true, false, false, 9000));
        table.insert("b", Group::new(vec!["b1".into()], false, false, false, 9100));
        table.insert("c", Group::new(vec!["c1".into()], false, false, true, 9200));
        let ready = |_: &str| true;
        let victims = table.exclusive_victims("a1", &ready);
        assert_eq!(victims, vec!["b1".to_string()]);
    }

    #[test]
    fn port_allocation_reuses_released_ports() {
        let table = GroupTable::new();
        table.insert("g1", Group::new(vec!["a".into()], false, false, false, 9000));
        let p1 = table.allocate_port("g1").unwrap();
        let p2 = table.allocate_port("g1").unwrap();
        assert_eq!(p1, 9000);
        assert_eq!(p2, 9001);
        table.release_port("g1", p1);
        assert_eq!(table.allocate_port("g1"), Some(p1));
    }
}
