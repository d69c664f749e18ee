use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Normalizes an entry name to the archive-internal form: forward slashes,
/// no empty components, no leading or trailing slash.
pub(crate) fn normalize_name(name: &str) -> Result<String> {
    let replaced = name.replace('\\', "/");
    let components: Vec<&str> = replaced.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Err(Error::InvalidEntryName {
            entry_name: name.to_owned(),
        });
    }
    Ok(components.join("/"))
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// What a path resolves to inside the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// A file node, carrying the index of its record in the archive's record list.
    File(usize),
    Directory,
}

#[derive(Debug)]
struct TreeNode {
    name: String,
    /// Index of the parent node. `None` only for the root.
    parent: Option<usize>,
    children: IndexMap<String, usize>,
    /// Record index for file nodes, `None` for directories.
    record: Option<usize>,
}

/// Directory-structured index over the archive's entry records.
///
/// Nodes live in an arena addressed by index; node 0 is the synthesized root
/// with an empty name. Removed nodes are unlinked from their parent but their
/// arena slot is not reclaimed; the arena only lives as long as the open
/// archive.
#[derive(Debug)]
pub(crate) struct EntryTree {
    nodes: Vec<TreeNode>,
}

impl EntryTree {
    pub fn new() -> Self {
        EntryTree {
            nodes: vec![TreeNode {
                name: String::new(),
                parent: None,
                children: IndexMap::new(),
                record: None,
            }],
        }
    }

    /// Inserts a file node at `path`, synthesizing any missing intermediate
    /// directory nodes.
    ///
    /// Fails if the final component already exists, or if an intermediate
    /// component resolves to a file.
    pub fn insert_file(&mut self, path: &str, record: usize) -> Result<()> {
        self.insert(path, Some(record))
    }

    /// Inserts a directory path, synthesizing missing intermediate nodes.
    /// Already existing directories are fine; a file in the way is an error.
    pub fn insert_dir(&mut self, path: &str) -> Result<()> {
        self.insert(path, None)
    }

    fn insert(&mut self, path: &str, record: Option<usize>) -> Result<()> {
        let mut remaining = components(path).peekable();
        if remaining.peek().is_none() {
            return Err(Error::InvalidEntryName {
                entry_name: path.to_owned(),
            });
        }

        let mut current = 0usize;
        while let Some(component) = remaining.next() {
            let is_last = remaining.peek().is_none();

            if let Some(&child) = self.nodes[current].children.get(component) {
                if self.nodes[child].record.is_some() {
                    // A file is in the way, either as the target itself or as
                    // a would-be intermediate directory.
                    return if is_last && record.is_some() {
                        Err(Error::EntryExists {
                            entry_name: path.to_owned(),
                        })
                    } else {
                        Err(Error::InvalidEntryName {
                            entry_name: path.to_owned(),
                        })
                    };
                }
                if is_last && record.is_some() {
                    return Err(Error::EntryExists {
                        entry_name: path.to_owned(),
                    });
                }
                current = child;
            } else {
                let idx = self.nodes.len();
                self.nodes.push(TreeNode {
                    name: component.to_owned(),
                    parent: Some(current),
                    children: IndexMap::new(),
                    record: if is_last { record } else { None },
                });
                self.nodes[current]
                    .children
                    .insert(component.to_owned(), idx);
                current = idx;
            }
        }
        Ok(())
    }

    /// Unlinks the file node at `path`, returning its record index.
    /// Directory nodes are left alone.
    pub fn remove_file(&mut self, path: &str) -> Option<usize> {
        let idx = self.find_node(path)?;
        let record = self.nodes[idx].record?;
        let parent = self.nodes[idx].parent?;
        let name = self.nodes[idx].name.clone();
        self.nodes[parent].children.shift_remove(&name);
        Some(record)
    }

    pub fn lookup(&self, path: &str) -> Option<NodeKind> {
        let idx = self.find_node(path)?;
        Some(match self.nodes[idx].record {
            Some(record) => NodeKind::File(record),
            None => NodeKind::Directory,
        })
    }

    fn find_node(&self, path: &str) -> Option<usize> {
        let mut current = 0usize;
        let mut depth = 0;
        for component in components(path) {
            current = *self.nodes[current].children.get(component)?;
            depth += 1;
        }
        // The root itself is not addressable.
        (depth > 0).then_some(current)
    }

    /// Number of nodes ever created, the root included.
    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;
    use assert_matches::assert_matches;

    #[test]
    fn insert_synthesizes_directories() {
        let mut tree = EntryTree::new();
        tree.insert_file("a/b/c.txt", 7).unwrap();

        // Root plus two synthesized directories plus the file node.
        assert!(tree.node_count() == 4);
        assert!(tree.lookup("a") == Some(NodeKind::Directory));
        assert!(tree.lookup("a/b") == Some(NodeKind::Directory));
        assert!(tree.lookup("a/b/c.txt") == Some(NodeKind::File(7)));
        assert!(tree.lookup("a/b/other.txt") == None);
    }

    #[test]
    fn sibling_files_share_directories() {
        let mut tree = EntryTree::new();
        tree.insert_file("a/b/c.txt", 0).unwrap();
        tree.insert_file("a/b/d.txt", 1).unwrap();
        tree.insert_file("a/e.txt", 2).unwrap();

        assert!(tree.node_count() == 6);
        assert!(tree.lookup("a/b/d.txt") == Some(NodeKind::File(1)));
        assert!(tree.lookup("a/e.txt") == Some(NodeKind::File(2)));
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut tree = EntryTree::new();
        tree.insert_file("x.txt", 0).unwrap();

        assert_matches!(
            tree.insert_file("x.txt", 1),
            Err(Error::EntryExists { entry_name }) if entry_name == "x.txt"
        );
    }

    #[test]
    fn file_in_the_way_of_a_directory_fails() {
        let mut tree = EntryTree::new();
        tree.insert_file("a", 0).unwrap();

        assert_matches!(
            tree.insert_file("a/b.txt", 1),
            Err(Error::InvalidEntryName { .. })
        );
    }

    #[test]
    fn directory_where_a_file_should_go_fails() {
        let mut tree = EntryTree::new();
        tree.insert_file("a/b.txt", 0).unwrap();

        assert_matches!(tree.insert_file("a", 1), Err(Error::EntryExists { .. }));
    }

    #[test]
    fn remove_unlinks_only_the_file() {
        let mut tree = EntryTree::new();
        tree.insert_file("a/b/c.txt", 3).unwrap();

        assert!(tree.remove_file("a/b/c.txt") == Some(3));
        assert!(tree.lookup("a/b/c.txt") == None);
        assert!(tree.lookup("a/b") == Some(NodeKind::Directory));

        // Reinserting the same path works again.
        tree.insert_file("a/b/c.txt", 4).unwrap();
        assert!(tree.lookup("a/b/c.txt") == Some(NodeKind::File(4)));
    }

    #[test]
    fn remove_of_a_directory_is_a_no_op() {
        let mut tree = EntryTree::new();
        tree.insert_file("a/b.txt", 0).unwrap();

        assert!(tree.remove_file("a") == None);
        assert!(tree.lookup("a/b.txt") == Some(NodeKind::File(0)));
    }

    #[test]
    fn explicit_dir_inserts_are_idempotent() {
        let mut tree = EntryTree::new();
        tree.insert_dir("a/b").unwrap();
        tree.insert_dir("a/b").unwrap();
        tree.insert_file("a/b/c.txt", 0).unwrap();

        assert!(tree.node_count() == 4);
    }

    #[test]
    fn normalize_name_cleans_separators() {
        assert!(normalize_name("a\\b\\c.txt").unwrap() == "a/b/c.txt");
        assert!(normalize_name("/a//b/").unwrap() == "a/b");
        assert!(normalize_name("plain.txt").unwrap() == "plain.txt");
        assert_matches!(normalize_name(""), Err(Error::InvalidEntryName { .. }));
        assert_matches!(normalize_name("///"), Err(Error::InvalidEntryName { .. }));
    }
}
