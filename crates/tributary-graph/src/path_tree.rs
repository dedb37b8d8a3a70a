use tributary_types::{Error, FileRecord, Result};

// ---------------------------------------------------------------------------
// PathTreeNode
// ---------------------------------------------------------------------------

/// One node of the directory tree built from an instance's output files.
///
/// Children are unique by name and keep first-insertion order. Leaf nodes
/// carry the file record they wrap; folder nodes carry none.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTreeNode {
    pub name: String,
    pub children: Vec<PathTreeNode>,
    pub file: Option<FileRecord>,
}

impl PathTreeNode {
    fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            file: None,
        }
    }

    fn leaf(name: impl Into<String>, file: FileRecord) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            file: Some(file),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.file.is_some()
    }

    /// Child lookup by name segment.
    pub fn child(&self, name: &str) -> Option<&PathTreeNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Re-derive the prefix-stripped path set this tree was built from,
    /// one root-to-leaf path per file.
    pub fn flatten(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for child in &self.children {
            child.collect_paths(String::new(), &mut paths);
        }
        paths
    }

    fn collect_paths(&self, parent: String, paths: &mut Vec<String>) {
        let here = if parent.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", parent, self.name)
        };
        if self.is_leaf() {
            paths.push(here.clone());
        }
        for child in &self.children {
            child.collect_paths(here.clone(), paths);
        }
    }
}

// ---------------------------------------------------------------------------
// PathTreeBuilder
// ---------------------------------------------------------------------------

/// Builds a directory tree from a flat file listing.
///
/// Each `build` call owns its own root and cursor, so one builder can serve
/// any number of independent fetches. The cursor descends segment by
/// segment from the root for every file; it never re-searches the whole
/// tree for an attachment point.
#[derive(Debug, Clone)]
pub struct PathTreeBuilder {
    prefix: String,
}

impl PathTreeBuilder {
    /// `prefix` is the leading path portion shared by every file in the
    /// listing (typically the instance's output directory).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn build(&self, files: &[FileRecord]) -> Result<PathTreeNode> {
        let mut root = PathTreeNode::folder(self.prefix.clone());

        for file in files {
            let relative = self.relative(&file.path)?;
            let mut segments = relative.split('/').filter(|s| !s.is_empty());
            let mut current = match segments.next() {
                Some(first) => first,
                None => {
                    return Err(Error::PathPrefix {
                        path: file.path.clone(),
                        prefix: self.prefix.clone(),
                    })
                }
            };

            // Cursor walk: find-or-create a folder child per intermediate
            // segment, then attach the leaf on the final one.
            let mut cursor = &mut root;
            for next in segments {
                let idx = match cursor.children.iter().position(|c| c.name == current) {
                    Some(i) => i,
                    None => {
                        cursor.children.push(PathTreeNode::folder(current));
                        cursor.children.len() - 1
                    }
                };
                cursor = &mut cursor.children[idx];
                current = next;
            }

            match cursor.children.iter().position(|c| c.name == current) {
                Some(i) => cursor.children[i].file = Some(file.clone()),
                None => cursor.children.push(PathTreeNode::leaf(current, file.clone())),
            }
        }

        Ok(root)
    }

    /// Strip the prefix on a segment boundary. `"root"` matches
    /// `"root/data/x"` but not `"rootless/x"`.
    fn relative<'a>(&self, path: &'a str) -> Result<&'a str> {
        if self.prefix.is_empty() {
            return Ok(path.trim_start_matches('/'));
        }
        match path.strip_prefix(&self.prefix) {
            Some(rest) if rest.starts_with('/') => Ok(&rest[1..]),
            _ => Err(Error::PathPrefix {
                path: path.to_string(),
                prefix: self.prefix.clone(),
            }),
        }
    }
}
