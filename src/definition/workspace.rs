//! Workspace definitions

use glam::Vec4;

use crate::definition::{ReusePolicy, TextureDeclaration};
use crate::error::DefinitionError;

/// Number of execution slots (bits of the execution mask)
pub const MAX_EXECUTION_SLOTS: usize = 8;

/// Identity viewport modifier: `(offset_x, offset_y, scale_x, scale_y)`
pub const IDENTITY_VIEWPORT_MODIFIER: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);

/// A node output feeding a node input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub from_node: String,
    pub from_channel: String,
    pub to_node: String,
    pub to_channel: String,
    /// `None` is a fresh, same-frame dependency; annotated edges may close cycles
    pub annotation: Option<ReusePolicy>,
}

/// The workspace's render target, bound to a node input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    pub node: String,
    pub channel: String,
}

/// A texture visible to every node in the workspace
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalTexture {
    pub declaration: TextureDeclaration,
    /// The only node allowed to write it; `None` allows a single, implicit writer
    pub producer: Option<String>,
}

/// A concrete pipeline: which nodes run, how they connect, where they draw.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceDefinition {
    pub name: String,
    pub nodes: Vec<String>,
    pub connections: Vec<Connection>,
    pub output: Option<OutputBinding>,
    pub globals: Vec<GlobalTexture>,
    /// Slots executed by default; can be overridden per instance
    pub execution_mask: u8,
    pub viewport_modifiers: [Vec4; MAX_EXECUTION_SLOTS],
}

impl WorkspaceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            output: None,
            globals: Vec::new(),
            execution_mask: 0x01,
            viewport_modifiers: [IDENTITY_VIEWPORT_MODIFIER; MAX_EXECUTION_SLOTS],
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn connect(
        self,
        from_node: impl Into<String>,
        from_channel: impl Into<String>,
        to_node: impl Into<String>,
        to_channel: impl Into<String>,
    ) -> Self {
        self.push_connection(from_node, from_channel, to_node, to_channel, None)
    }

    pub fn connect_annotated(
        self,
        from_node: impl Into<String>,
        from_channel: impl Into<String>,
        to_node: impl Into<String>,
        to_channel: impl Into<String>,
        annotation: ReusePolicy,
    ) -> Self {
        self.push_connection(from_node, from_channel, to_node, to_channel, Some(annotation))
    }

    fn push_connection(
        mut self,
        from_node: impl Into<String>,
        from_channel: impl Into<String>,
        to_node: impl Into<String>,
        to_channel: impl Into<String>,
        annotation: Option<ReusePolicy>,
    ) -> Self {
        self.connections.push(Connection {
            from_node: from_node.into(),
            from_channel: from_channel.into(),
            to_node: to_node.into(),
            to_channel: to_channel.into(),
            annotation,
        });
        self
    }

    pub fn connect_output(mut self, node: impl Into<String>, channel: impl Into<String>) -> Self {
        self.output = Some(OutputBinding {
            node: node.into(),
            channel: channel.into(),
        });
        self
    }

    pub fn with_global(mut self, declaration: TextureDeclaration) -> Self {
        self.globals.push(GlobalTexture {
            declaration,
            producer: None,
        });
        self
    }

    pub fn with_global_produced_by(
        mut self,
        declaration: TextureDeclaration,
        producer: impl Into<String>,
    ) -> Self {
        self.globals.push(GlobalTexture {
            declaration,
            producer: Some(producer.into()),
        });
        self
    }

    pub fn with_execution_mask(mut self, mask: u8) -> Self {
        self.execution_mask = mask;
        self
    }

    /// Set the viewport modifier applied by execution slot `slot`.
    pub fn with_viewport_modifier(mut self, slot: usize, modifier: Vec4) -> Self {
        if slot < MAX_EXECUTION_SLOTS {
            self.viewport_modifiers[slot] = modifier;
        } else {
            log::warn!(
                "workspace '{}': execution slot {} out of range, modifier ignored",
                self.name,
                slot
            );
        }
        self
    }

    pub fn global(&self, name: &str) -> Option<&GlobalTexture> {
        self.globals.iter().find(|g| g.declaration.name == name)
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }

    /// Structural checks that need no node definitions.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let invalid = |reason: String| DefinitionError::Invalid {
            name: self.name.clone(),
            reason,
        };

        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].contains(node) {
                return Err(invalid(format!("node '{node}' is instantiated twice")));
            }
        }
        for (i, global) in self.globals.iter().enumerate() {
            let name = &global.declaration.name;
            if self.globals[..i].iter().any(|g| &g.declaration.name == name) {
                return Err(invalid(format!("global texture '{name}' is declared twice")));
            }
            if let Some(producer) = &global.producer {
                if self.node_index(producer).is_none() {
                    return Err(DefinitionError::UnknownReference {
                        name: producer.clone(),
                        context: format!("producer of global '{name}'"),
                    });
                }
            }
        }
        let context = format!("workspace '{}'", self.name);
        for connection in &self.connections {
            for node in [&connection.from_node, &connection.to_node] {
                if self.node_index(node).is_none() {
                    return Err(DefinitionError::UnknownReference {
                        name: node.clone(),
                        context: context.clone(),
                    });
                }
            }
        }
        if let Some(output) = &self.output {
            if self.node_index(&output.node).is_none() {
                return Err(DefinitionError::UnknownReference {
                    name: output.node.clone(),
                    context,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureFormat;

    #[test]
    fn test_builder() {
        let ws = WorkspaceDefinition::new("Main")
            .with_node("Gbuffer")
            .with_node("Lighting")
            .connect("Gbuffer", "rt0", "Lighting", "rt0")
            .connect_output("Lighting", "output")
            .with_global(TextureDeclaration::new("lut", TextureFormat::Rgba8Unorm));

        assert!(ws.validate().is_ok());
        assert_eq!(ws.node_index("Lighting"), Some(1));
        assert!(ws.global("lut").is_some());
        assert_eq!(ws.connections[0].annotation, None);
    }

    #[test]
    fn test_connection_to_unknown_node() {
        let ws = WorkspaceDefinition::new("Main")
            .with_node("A")
            .connect("A", "out", "B", "in");
        assert_eq!(
            ws.validate(),
            Err(DefinitionError::UnknownReference {
                name: "B".into(),
                context: "workspace 'Main'".into(),
            })
        );
    }

    #[test]
    fn test_duplicate_node_instance() {
        let ws = WorkspaceDefinition::new("Main").with_node("A").with_node("A");
        assert!(matches!(ws.validate(), Err(DefinitionError::Invalid { .. })));
    }

    #[test]
    fn test_stereo_modifiers() {
        let ws = WorkspaceDefinition::new("Vr")
            .with_execution_mask(0b11)
            .with_viewport_modifier(0, Vec4::new(0.0, 0.0, 0.5, 1.0))
            .with_viewport_modifier(1, Vec4::new(0.5, 0.0, 0.5, 1.0))
            .with_viewport_modifier(9, Vec4::ZERO);
        assert_eq!(ws.viewport_modifiers[1], Vec4::new(0.5, 0.0, 0.5, 1.0));
        assert_eq!(ws.viewport_modifiers[2], IDENTITY_VIEWPORT_MODIFIER);
    }
}
