use crate::dataset::Dataset;
use crate::element::Element;
use crate::error::{Result, StoreError};
use crate::group::Group;
use crate::storage::join_path;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-optimised facade over one discovered group.
///
/// Name lookups are answered from maps built at construction; the group
/// tree is never walked again afterwards.
#[derive(Debug, Clone)]
pub struct View {
    group: Arc<Group>,
    members: Vec<View>,
    dataset_index: HashMap<String, usize>,
    member_index: HashMap<String, usize>,
}

impl View {
    pub fn new(group: Arc<Group>) -> Self {
        let dataset_index = group
            .datasets()
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name().to_string(), i))
            .collect();
        let member_index = group
            .groups()
            .iter()
            .enumerate()
            .map(|(i, g)| (g.name().to_string(), i))
            .collect();
        let members = group.groups().iter().cloned().map(View::new).collect();

        Self {
            group,
            members,
            dataset_index,
            member_index,
        }
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    pub fn group_ref(&self) -> &Group {
        &self.group
    }

    /// Number of child groups.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[View] {
        &self.members
    }

    pub fn find_group(&self, name: &str) -> Option<usize> {
        self.member_index.get(name).copied()
    }

    pub fn find_dataset(&self, name: &str) -> Option<usize> {
        self.dataset_index.get(name).copied()
    }

    pub fn dataset_size(&self, name: &str) -> Option<usize> {
        self.find_dataset(name)
            .map(|i| self.group.datasets()[i].size())
    }

    pub fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.find_dataset(name)
            .map(|i| self.group.datasets()[i].as_ref())
            .ok_or_else(|| StoreError::not_found("dataset", join_path(self.group.path(), name)))
    }

    pub fn read_all<T: Element>(&self, name: &str) -> Result<Vec<T>> {
        self.dataset(name)?.read_all()
    }

    pub fn read_at<T: Element>(&self, name: &str, i: usize) -> Result<T> {
        self.dataset(name)?.read_at(i)
    }

    pub fn read_range<T: Element>(&self, name: &str, i: usize, j: usize) -> Result<Vec<T>> {
        self.dataset(name)?.read_range(i, j)
    }

    /// Child view at position `i`.
    pub fn member(&self, i: usize) -> Result<&View> {
        self.members.get(i).ok_or_else(|| {
            StoreError::not_found("group", format!("{}[{}]", self.group.path(), i))
        })
    }

    /// Child view named `name`.
    pub fn group(&self, name: &str) -> Result<&View> {
        self.find_group(name)
            .map(|i| &self.members[i])
            .ok_or_else(|| StoreError::not_found("group", join_path(self.group.path(), name)))
    }
}
