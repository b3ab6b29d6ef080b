//! Resolves the declarative [`ExportNode`](crate::config::ExportNode) tree read from config into
//! a live `Arc<dyn Driver>` tree, grouping nodes with children under [`CompositeDriver`] and
//! leaf nodes against the compiled-in constructor table in `demos`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use jmp_driver::{CompositeDriver, Driver, ResourceTable};

use crate::config::ExportNode;

pub fn build(node: &ExportNode, resources: &Arc<ResourceTable>) -> Result<Arc<dyn Driver>> {
    let labels: BTreeMap<String, String> = node.labels.iter().cloned().collect();

    if node.children.is_empty() {
        return demos::build(&node.driver_type, resources)
            .with_context(|| format!("unknown driver type `{}` for export node `{}`", node.driver_type, node.name));
    }

    if !node.driver_type.is_empty() {
        bail!(
            "export node `{}` has both children and a `driver_type` (`{}`); composite nodes group \
             children only, they don't additionally act as a leaf driver",
            node.name,
            node.driver_type
        );
    }

    let children = node
        .children
        .iter()
        .map(|child| build(child, resources).map(|driver| (child.name.clone(), driver)))
        .collect::<Result<Vec<_>>>()?;

    Ok(CompositeDriver::new(labels, children))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, driver_type: &str) -> ExportNode {
        ExportNode {
            name: name.to_owned(),
            driver_type: driver_type.to_owned(),
            labels: Vec::new(),
            children: Vec::new(),
        }
    }

    #[test]
    fn leaf_node_resolves_against_the_constructor_table() {
        let resources = Arc::new(ResourceTable::new());
        let driver = build(&leaf("power", "mock_power"), &resources).unwrap();
        assert!(driver.children().is_empty());
    }

    #[test]
    fn unknown_driver_type_fails_instead_of_stubbing() {
        let resources = Arc::new(ResourceTable::new());
        assert!(build(&leaf("power", "not_a_real_driver"), &resources).is_err());
    }

    #[test]
    fn composite_node_groups_its_children() {
        let resources = Arc::new(ResourceTable::new());
        let root = ExportNode {
            name: "root".to_owned(),
            driver_type: String::new(),
            labels: Vec::new(),
            children: vec![leaf("power", "mock_power"), leaf("net", "echo_network")],
        };
        let driver = build(&root, &resources).unwrap();
        assert_eq!(driver.children().len(), 2);
    }
}
