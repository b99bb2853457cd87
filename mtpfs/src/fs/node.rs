//! Inode table mapping FUSE inodes onto MTP objects.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use libmtp::codes::ROOT_PARENT;

pub const ROOT_INO: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Storage,
    Folder,
    File,
}

impl NodeKind {
    pub fn is_dir(self) -> bool {
        !matches!(self, NodeKind::File)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub ino: u64,
    pub parent: u64,
    /// Name as exposed through FUSE.
    pub name: String,
    /// Name as stored on the device.
    pub original: String,
    pub kind: NodeKind,
    /// Index into the adapter's storage list; unused for the root.
    pub storage: usize,
    /// MTP object handle; 0 for the root and storage directories.
    pub handle: u32,
    pub size: u64,
    pub mtime: SystemTime,
    /// Children by exposed name, `None` until the directory has been listed.
    pub children: Option<BTreeMap<String, u64>>,
}

impl Node {
    /// Parent handle to use when creating objects inside this directory.
    pub fn object_parent(&self) -> u32 {
        match self.kind {
            NodeKind::Storage => ROOT_PARENT,
            _ => self.handle,
        }
    }
}

/// A child as reported by the device, before it gets an inode.
#[derive(Debug, Clone)]
pub struct Listed {
    pub handle: u32,
    pub name: String,
    pub folder: bool,
    pub size: u64,
    pub mtime: SystemTime,
}

#[derive(Debug)]
pub struct NodeTable {
    nodes: HashMap<u64, Node>,
    by_handle: HashMap<u32, u64>,
    next_ino: u64,
}

impl NodeTable {
    /// Root directory with one subdirectory per storage, in storage order.
    pub fn new(storage_names: &[String]) -> Self {
        let now = SystemTime::now();
        let mut table = Self {
            nodes: HashMap::new(),
            by_handle: HashMap::new(),
            next_ino: ROOT_INO + 1,
        };
        table.nodes.insert(
            ROOT_INO,
            Node {
                ino: ROOT_INO,
                parent: ROOT_INO,
                name: String::new(),
                original: String::new(),
                kind: NodeKind::Root,
                storage: 0,
                handle: 0,
                size: 0,
                mtime: now,
                children: Some(BTreeMap::new()),
            },
        );
        for (index, name) in storage_names.iter().enumerate() {
            table.insert(Node {
                ino: 0,
                parent: ROOT_INO,
                name: name.clone(),
                original: name.clone(),
                kind: NodeKind::Storage,
                storage: index,
                handle: 0,
                size: 0,
                mtime: now,
                children: None,
            });
        }
        table
    }

    pub fn get(&self, ino: u64) -> Option<&Node> {
        self.nodes.get(&ino)
    }

    pub fn get_mut(&mut self, ino: u64) -> Option<&mut Node> {
        self.nodes.get_mut(&ino)
    }

    pub fn by_handle(&self, handle: u32) -> Option<u64> {
        self.by_handle.get(&handle).copied()
    }

    pub fn is_listed(&self, ino: u64) -> bool {
        self.nodes
            .get(&ino)
            .is_some_and(|n| n.children.is_some())
    }

    pub fn child(&self, parent: u64, name: &str) -> Option<u64> {
        self.nodes.get(&parent)?.children.as_ref()?.get(name).copied()
    }

    /// Finds `name` in `parent`, first among the exposed names and then among
    /// the names the device stores.
    pub fn find(&self, parent: u64, name: &str) -> Option<u64> {
        if let Some(ino) = self.child(parent, name) {
            return Some(ino);
        }
        let children = self.nodes.get(&parent)?.children.as_ref()?;
        children
            .values()
            .copied()
            .find(|ino| self.nodes.get(ino).is_some_and(|n| n.original == name))
    }

    /// Children of a listed directory, ordered by name.
    pub fn children(&self, parent: u64) -> Option<Vec<&Node>> {
        let children = self.nodes.get(&parent)?.children.as_ref()?;
        Some(children.values().filter_map(|ino| self.nodes.get(ino)).collect())
    }

    /// Adds `node` under its parent and returns its new inode.
    pub fn insert(&mut self, mut node: Node) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        node.ino = ino;
        if node.handle != 0 {
            self.by_handle.insert(node.handle, ino);
        }
        if let Some(children) = self
            .nodes
            .get_mut(&node.parent)
            .and_then(|p| p.children.as_mut())
        {
            children.insert(node.name.clone(), ino);
        }
        self.nodes.insert(ino, node);
        ino
    }

    /// Records the listing of `parent`. `names` are the exposed names, in the
    /// same order as `entries`.
    pub fn fill(&mut self, parent: u64, entries: Vec<Listed>, names: Vec<String>) {
        let Some(dir) = self.nodes.get(&parent) else {
            return;
        };
        if dir.children.is_some() {
            return;
        }
        let storage = dir.storage;
        if let Some(dir) = self.nodes.get_mut(&parent) {
            dir.children = Some(BTreeMap::new());
        }
        for (entry, name) in entries.into_iter().zip(names) {
            if let Some(existing) = self.by_handle(entry.handle) {
                // already known through another path; keep the inode stable
                if let Some(children) = self
                    .nodes
                    .get_mut(&parent)
                    .and_then(|p| p.children.as_mut())
                {
                    children.insert(name, existing);
                }
                continue;
            }
            self.insert(Node {
                ino: 0,
                parent,
                name,
                original: entry.name,
                kind: if entry.folder {
                    NodeKind::Folder
                } else {
                    NodeKind::File
                },
                storage,
                handle: entry.handle,
                size: entry.size,
                mtime: entry.mtime,
                children: None,
            });
        }
    }

    /// Points `ino` at a different device object.
    pub fn rebind(&mut self, ino: u64, handle: u32) {
        let Some(node) = self.nodes.get_mut(&ino) else {
            return;
        };
        if node.handle != 0 {
            self.by_handle.remove(&node.handle);
        }
        node.handle = handle;
        if handle != 0 {
            self.by_handle.insert(handle, ino);
        }
    }

    /// Drops `ino` and everything below it.
    pub fn remove(&mut self, ino: u64) {
        let Some(node) = self.nodes.remove(&ino) else {
            return;
        };
        if let Some(children) = self
            .nodes
            .get_mut(&node.parent)
            .and_then(|p| p.children.as_mut())
        {
            if children.get(&node.name) == Some(&ino) {
                children.remove(&node.name);
            }
        }
        if node.handle != 0 && self.by_handle.get(&node.handle) == Some(&ino) {
            self.by_handle.remove(&node.handle);
        }
        for child in node.children.into_iter().flat_map(|c| c.into_values()) {
            self.remove_subtree(child);
        }
    }

    fn remove_subtree(&mut self, ino: u64) {
        let Some(node) = self.nodes.remove(&ino) else {
            return;
        };
        if node.handle != 0 {
            self.by_handle.remove(&node.handle);
        }
        for child in node.children.into_iter().flat_map(|c| c.into_values()) {
            self.remove_subtree(child);
        }
    }

    /// Reassigns the storage of `ino` and its known descendants.
    pub fn set_storage(&mut self, ino: u64, storage: usize) {
        let mut pending = vec![ino];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(&current) {
                node.storage = storage;
                pending.extend(node.children.iter().flat_map(|c| c.values().copied()));
            }
        }
    }

    /// Moves `ino` to `new_parent` under `new_name`, which the device stores
    /// unchanged.
    pub fn rename(&mut self, ino: u64, new_parent: u64, new_name: String) {
        let Some(node) = self.nodes.get(&ino) else {
            return;
        };
        let (old_parent, old_name) = (node.parent, node.name.clone());
        if let Some(children) = self
            .nodes
            .get_mut(&old_parent)
            .and_then(|p| p.children.as_mut())
        {
            children.remove(&old_name);
        }
        if let Some(children) = self
            .nodes
            .get_mut(&new_parent)
            .and_then(|p| p.children.as_mut())
        {
            children.insert(new_name.clone(), ino);
        }
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.parent = new_parent;
            node.original = new_name.clone();
            node.name = new_name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NodeTable {
        NodeTable::new(&["Internal Storage".to_string()])
    }

    fn listed(handle: u32, name: &str, folder: bool) -> Listed {
        Listed {
            handle,
            name: name.to_string(),
            folder,
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn storages_hang_off_the_root() {
        let t = table();
        let ino = t.child(ROOT_INO, "Internal Storage").unwrap();
        let node = t.get(ino).unwrap();
        assert_eq!(node.kind, NodeKind::Storage);
        assert_eq!(node.object_parent(), ROOT_PARENT);
        assert!(!t.is_listed(ino));
    }

    #[test]
    fn fill_and_remove_subtree() {
        let mut t = table();
        let storage = t.child(ROOT_INO, "Internal Storage").unwrap();
        t.fill(
            storage,
            vec![listed(5, "DCIM", true), listed(6, "a.txt", false)],
            vec!["DCIM".into(), "a.txt".into()],
        );
        let dcim = t.child(storage, "DCIM").unwrap();
        assert!(!t.is_listed(dcim));
        t.fill(dcim, vec![listed(7, "p.jpg", false)], vec!["p.jpg".into()]);
        assert_eq!(t.by_handle(7).map(|i| t.get(i).unwrap().name.clone()).unwrap(), "p.jpg");

        t.remove(dcim);
        assert!(t.child(storage, "DCIM").is_none());
        assert!(t.by_handle(7).is_none());
        assert_eq!(t.children(storage).unwrap().len(), 1);
    }

    #[test]
    fn rename_moves_between_directories() {
        let mut t = table();
        let storage = t.child(ROOT_INO, "Internal Storage").unwrap();
        t.fill(
            storage,
            vec![listed(5, "Music", true), listed(6, "song.mp3", false)],
            vec!["Music".into(), "song.mp3".into()],
        );
        let music = t.child(storage, "Music").unwrap();
        t.fill(music, vec![], vec![]);
        let song = t.child(storage, "song.mp3").unwrap();
        t.rename(song, music, "track.mp3".into());
        assert_eq!(t.child(music, "track.mp3"), Some(song));
        assert!(t.child(storage, "song.mp3").is_none());
        assert_eq!(t.get(song).unwrap().parent, music);

        t.set_storage(music, 3);
        assert_eq!(t.get(song).unwrap().storage, 3);
    }

    #[test]
    fn device_names_resolve_to_their_own_entry() {
        let mut t = table();
        let storage = t.child(ROOT_INO, "Internal Storage").unwrap();
        t.fill(
            storage,
            vec![listed(1, "a:b.txt", false), listed(2, "a?b.txt", false)],
            vec!["a_b.txt".into(), "a_b~1.txt".into()],
        );
        let first = t.child(storage, "a_b.txt").unwrap();
        let second = t.child(storage, "a_b~1.txt").unwrap();
        assert_eq!(t.find(storage, "a:b.txt"), Some(first));
        assert_eq!(t.find(storage, "a?b.txt"), Some(second));
        assert_eq!(t.find(storage, "a_b~1.txt"), Some(second));
        assert_eq!(t.find(storage, "a*b.txt"), None);

        t.rename(second, storage, "c.txt".into());
        assert_eq!(t.find(storage, "a?b.txt"), None);
        assert_eq!(t.get(second).unwrap().original, "c.txt");
    }

    #[test]
    fn rebind_tracks_new_handles() {
        let mut t = table();
        let storage = t.child(ROOT_INO, "Internal Storage").unwrap();
        t.fill(storage, vec![listed(9, "f", false)], vec!["f".into()]);
        let f = t.child(storage, "f").unwrap();
        t.rebind(f, 12);
        assert_eq!(t.by_handle(12), Some(f));
        assert!(t.by_handle(9).is_none());
    }
}
