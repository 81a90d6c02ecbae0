//! Named definition registry

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::{NodeDefinition, ShadowNodeDefinition, WorkspaceDefinition};
use crate::error::DefinitionError;

/// Immutable templates for nodes, shadow nodes and workspaces.
///
/// The store is filled once at load time and then shared read-only, usually
/// as `Arc<GraphDefinitionStore>`. Nodes and shadow nodes share a namespace;
/// workspaces have their own.
#[derive(Debug, Default)]
pub struct GraphDefinitionStore {
    nodes: HashMap<String, Arc<NodeDefinition>>,
    shadow_nodes: HashMap<String, Arc<ShadowNodeDefinition>>,
    workspaces: HashMap<String, Arc<WorkspaceDefinition>>,
}

impl GraphDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node.
    ///
    /// Registering the same name again with an identical body is a no-op.
    pub fn register_node(&mut self, node: NodeDefinition) -> Result<(), DefinitionError> {
        node.validate()?;
        if self.shadow_nodes.contains_key(&node.name) {
            return Err(DefinitionError::DuplicateName(node.name));
        }
        if let Some(existing) = self.nodes.get(&node.name) {
            return if **existing == node {
                Ok(())
            } else {
                Err(DefinitionError::DuplicateName(node.name))
            };
        }
        log::debug!(
            "Registered node '{}' ({} target(s), {} pass(es))",
            node.name,
            node.targets.len(),
            node.pass_count()
        );
        self.nodes.insert(node.name.clone(), Arc::new(node));
        Ok(())
    }

    pub fn register_shadow_node(
        &mut self,
        shadow_node: ShadowNodeDefinition,
    ) -> Result<(), DefinitionError> {
        shadow_node.validate()?;
        let name = shadow_node.name().to_string();
        if self.nodes.contains_key(&name) {
            return Err(DefinitionError::DuplicateName(name));
        }
        if let Some(existing) = self.shadow_nodes.get(&name) {
            return if **existing == shadow_node {
                Ok(())
            } else {
                Err(DefinitionError::DuplicateName(name))
            };
        }
        log::debug!(
            "Registered shadow node '{}' ({} map(s))",
            name,
            shadow_node.shadow_maps.len()
        );
        self.shadow_nodes.insert(name, Arc::new(shadow_node));
        Ok(())
    }

    /// Register a workspace.
    ///
    /// Node references are checked when the workspace is compiled, so
    /// workspaces may be registered before the nodes they use.
    pub fn register_workspace(
        &mut self,
        workspace: WorkspaceDefinition,
    ) -> Result<(), DefinitionError> {
        workspace.validate()?;
        if let Some(existing) = self.workspaces.get(&workspace.name) {
            return if **existing == workspace {
                Ok(())
            } else {
                Err(DefinitionError::DuplicateName(workspace.name))
            };
        }
        log::debug!(
            "Registered workspace '{}' ({} node(s))",
            workspace.name,
            workspace.nodes.len()
        );
        self.workspaces
            .insert(workspace.name.clone(), Arc::new(workspace));
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<Arc<NodeDefinition>> {
        self.nodes.get(name).cloned()
    }

    pub fn shadow_node(&self, name: &str) -> Option<Arc<ShadowNodeDefinition>> {
        self.shadow_nodes.get(name).cloned()
    }

    pub fn workspace(&self, name: &str) -> Option<Arc<WorkspaceDefinition>> {
        self.workspaces.get(name).cloned()
    }

    /// Whether any definition (node, shadow node or workspace) uses `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
            || self.shadow_nodes.contains_key(name)
            || self.workspaces.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
