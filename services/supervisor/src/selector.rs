//! Node selection by name and category.

use std::collections::HashSet;

use crate::node::Node;

/// A list of node names, from a comma-separated string or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameList(Vec<String>);

impl NameList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for NameList {
    fn from(csv: &str) -> Self {
        NameList(
            csv.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<Vec<String>> for NameList {
    fn from(names: Vec<String>) -> Self {
        // Entries may themselves be comma-separated.
        NameList(
            names
                .iter()
                .flat_map(|entry| NameList::from(entry.as_str()).0)
                .collect(),
        )
    }
}

impl From<&[&str]> for NameList {
    fn from(names: &[&str]) -> Self {
        NameList::from(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
    }
}

/// Which nodes a command applies to.
///
/// Names and category are combined as a union. With neither set, every
/// node is selected. Disabled nodes are never selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub names: NameList,
    pub category: Option<String>,
}

impl Selection {
    /// Every enabled node.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn names(names: impl Into<NameList>) -> Self {
        Self {
            names: names.into(),
            category: None,
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            names: NameList::default(),
            category: Some(category.into()),
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category.filter(|c| !c.is_empty());
        self
    }

    fn is_unfiltered(&self) -> bool {
        self.names.is_empty() && self.category.is_none()
    }

    fn matches(&self, node: &Node) -> bool {
        if !node.enabled {
            return false;
        }
        if self.is_unfiltered() {
            return true;
        }
        let by_name = self.names.contains(&node.name);
        let by_category = match (&self.category, &node.category) {
            (Some(wanted), Some(category)) => wanted == category,
            _ => false,
        };
        by_name || by_category
    }
}

/// Names of the enabled nodes matching `selection`.
pub fn select_nodes<'a, I>(nodes: I, selection: &Selection) -> HashSet<String>
where
    I: IntoIterator<Item = &'a Node>,
{
    nodes
        .into_iter()
        .filter(|node| selection.matches(node))
        .map(|node| node.name.clone())
        .collect()
}
