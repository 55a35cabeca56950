use crate::dataset::Dataset;
use crate::error::{Result, StoreError};
use crate::storage::{join_path, Backend, IntoPayload, NodeKind};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A group and everything below it, discovered once at construction.
#[derive(Debug)]
pub struct Group {
    backend: Arc<dyn Backend>,
    path: String,
    name: String,
    groups: Vec<Arc<Group>>,
    datasets: Vec<Arc<Dataset>>,
}

impl Group {
    /// Walks the backend below `path`, building child groups recursively.
    pub(crate) fn discover(backend: Arc<dyn Backend>, path: String, name: String) -> Result<Self> {
        let mut groups = Vec::new();
        let mut datasets = Vec::new();

        for (child, kind) in backend.list(&path)? {
            let child_path = join_path(&path, &child);
            match kind {
                NodeKind::Group => {
                    groups.push(Arc::new(Group::discover(backend.clone(), child_path, child)?))
                }
                NodeKind::Dataset => {
                    datasets.push(Arc::new(Dataset::open(backend.clone(), child_path, child)?))
                }
            }
        }
        trace!(
            path = %path,
            groups = groups.len(),
            datasets = datasets.len(),
            "discovered group"
        );

        Ok(Self {
            backend,
            path,
            name,
            groups,
            datasets,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    pub fn datasets(&self) -> &[Arc<Dataset>] {
        &self.datasets
    }

    /// Creates a child group, or opens it if one of that name exists.
    ///
    /// Fails when the existing child is already shared with a view.
    pub fn add_group(&mut self, name: &str) -> Result<&mut Group> {
        let path = join_path(&self.path, name);
        let created = self.backend.create_group(&path)?;

        let pos = match self.groups.iter().position(|g| g.name == name) {
            Some(pos) => pos,
            None => {
                let group = if created {
                    Group {
                        backend: self.backend.clone(),
                        path,
                        name: name.to_string(),
                        groups: Vec::new(),
                        datasets: Vec::new(),
                    }
                } else {
                    Group::discover(self.backend.clone(), path, name.to_string())?
                };
                self.groups.push(Arc::new(group));
                self.groups.len() - 1
            }
        };
        Arc::get_mut(&mut self.groups[pos])
            .ok_or(StoreError::Precondition("group is shared and can no longer be modified"))
    }

    /// Writes a new dataset whose element kind is inferred from `data`.
    pub fn add_dataset<P: IntoPayload>(&mut self, name: &str, data: P) -> Result<&Dataset> {
        let path = join_path(&self.path, name);
        let payload = data.into_payload()?;
        let layout = self.backend.create_dataset(&path, &payload)?;
        self.datasets.push(Arc::new(Dataset::from_layout(
            self.backend.clone(),
            path,
            name.to_string(),
            layout,
        )));
        Ok(&self.datasets[self.datasets.len() - 1])
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for g in &self.groups {
            writeln!(f, "{}{}", "  ".repeat(indent), g.name)?;
            g.fmt_tree(f, indent + 1)?;
        }
        for d in &self.datasets {
            writeln!(
                f,
                "{}{} ({}, {})",
                "  ".repeat(indent),
                d.name(),
                d.size(),
                d.layout().kind
            )?;
        }
        Ok(())
    }
}

/// Indented dump of the tree, groups first.
impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.fmt_tree(f, 1)
    }
}
