// In-memory node tree shared by every ensemble member.
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};
use zk_wire::path;
use zk_wire::{Acl, EventType, Stat, Status};

pub(crate) type Outcome<T> = std::result::Result<T, Status>;

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) data: Bytes,
    pub(crate) acl: Vec<Acl>,
    pub(crate) stat: Stat,
    pub(crate) children: BTreeSet<String>,
}

/// A change that may trigger watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Change {
    pub(crate) path: String,
    pub(crate) event_type: EventType,
}

#[derive(Debug, Clone)]
pub(crate) struct Tree {
    nodes: HashMap<String, Node>,
    zxid: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

fn child_name(node: &str) -> &str {
    node.rsplit('/').next().unwrap_or(node)
}

impl Default for Tree {
    fn default() -> Self {
        let root = Node {
            data: Bytes::new(),
            acl: Acl::open_unsafe(),
            stat: Stat::default(),
            children: BTreeSet::new(),
        };
        Self {
            nodes: HashMap::from([(path::ROOT.to_string(), root)]),
            zxid: 0,
        }
    }
}

impl Tree {
    pub(crate) fn zxid(&self) -> i64 {
        self.zxid
    }

    pub(crate) fn get(&self, node: &str) -> Option<&Node> {
        self.nodes.get(node)
    }

    pub(crate) fn get_or_missing(&self, node: &str) -> Outcome<&Node> {
        self.nodes.get(node).ok_or(Status::NoNode)
    }

    /// Creates `node`; `sequential` appends the parent's ten-digit counter.
    pub(crate) fn create(
        &mut self,
        node: &str,
        data: Bytes,
        acl: Vec<Acl>,
        owner: i64,
        sequential: bool,
        changes: &mut Vec<Change>,
    ) -> Outcome<(String, Stat)> {
        path::validate(node).map_err(|_| Status::BadArguments)?;
        let parent_path = path::parent(node).ok_or(Status::NodeExists)?;
        let parent = self.nodes.get(parent_path).ok_or(Status::NoNode)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(Status::NoChildrenForEphemerals);
        }
        let actual = if sequential {
            format!("{node}{:010}", parent.stat.cversion)
        } else {
            node.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(Status::NodeExists);
        }

        self.zxid += 1;
        let zxid = self.zxid;
        let now = now_ms();
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            ctime: now,
            mtime: now,
            ephemeral_owner: owner,
            data_length: data.len() as i32,
            pzxid: zxid,
            ..Stat::default()
        };
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.insert(child_name(&actual).to_string());
            parent.stat.cversion += 1;
            parent.stat.num_children = parent.children.len() as i32;
            parent.stat.pzxid = zxid;
        }
        self.nodes.insert(
            actual.clone(),
            Node {
                data,
                acl,
                stat,
                children: BTreeSet::new(),
            },
        );
        changes.push(Change {
            path: actual.clone(),
            event_type: EventType::NodeCreated,
        });
        changes.push(Change {
            path: parent_path.to_string(),
            event_type: EventType::NodeChildrenChanged,
        });
        Ok((actual, stat))
    }

    pub(crate) fn delete(&mut self, node: &str, version: i32, changes: &mut Vec<Change>) -> Outcome<()> {
        if node == path::ROOT {
            return Err(Status::BadArguments);
        }
        let existing = self.nodes.get(node).ok_or(Status::NoNode)?;
        if version != -1 && existing.stat.version != version {
            return Err(Status::BadVersion);
        }
        if !existing.children.is_empty() {
            return Err(Status::NotEmpty);
        }
        self.nodes.remove(node);
        self.zxid += 1;
        let zxid = self.zxid;
        if let Some(parent_path) = path::parent(node) {
            if let Some(parent) = self.nodes.get_mut(parent_path) {
                parent.children.remove(child_name(node));
                parent.stat.cversion += 1;
                parent.stat.num_children = parent.children.len() as i32;
                parent.stat.pzxid = zxid;
            }
            changes.push(Change {
                path: node.to_string(),
                event_type: EventType::NodeDeleted,
            });
            changes.push(Change {
                path: parent_path.to_string(),
                event_type: EventType::NodeChildrenChanged,
            });
        }
        Ok(())
    }

    pub(crate) fn set_data(
        &mut self,
        node: &str,
        data: Bytes,
        version: i32,
        changes: &mut Vec<Change>,
    ) -> Outcome<Stat> {
        let zxid = self.zxid + 1;
        let existing = self.nodes.get_mut(node).ok_or(Status::NoNode)?;
        if version != -1 && existing.stat.version != version {
            return Err(Status::BadVersion);
        }
        existing.stat.version += 1;
        existing.stat.mzxid = zxid;
        existing.stat.mtime = now_ms();
        existing.stat.data_length = data.len() as i32;
        existing.data = data;
        let stat = existing.stat;
        self.zxid = zxid;
        changes.push(Change {
            path: node.to_string(),
            event_type: EventType::NodeDataChanged,
        });
        Ok(stat)
    }

    pub(crate) fn check(&self, node: &str, version: i32) -> Outcome<()> {
        let existing = self.get_or_missing(node)?;
        if version != -1 && existing.stat.version != version {
            return Err(Status::BadVersion);
        }
        Ok(())
    }

    pub(crate) fn children(&self, node: &str) -> Outcome<Vec<String>> {
        Ok(self.get_or_missing(node)?.children.iter().cloned().collect())
    }

    pub(crate) fn ephemerals(&self, owner: i64, prefix: &str) -> Vec<String> {
        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(node, entry)| entry.stat.ephemeral_owner == owner && node.starts_with(prefix))
            .map(|(node, _)| node.clone())
            .collect();
        owned.sort();
        owned
    }

    /// Deletes every ephemeral node owned by `owner`, deepest first.
    pub(crate) fn remove_owner(&mut self, owner: i64, changes: &mut Vec<Change>) {
        let mut owned = self.ephemerals(owner, path::ROOT);
        owned.sort_by_key(|node| std::cmp::Reverse(node.len()));
        for node in owned {
            let _ = self.delete(&node, -1, changes);
        }
    }
}
