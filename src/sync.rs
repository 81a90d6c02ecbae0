//! Barrier and fence placement.
//!
//! Render-target writes are ordered by the graphics API itself. UAV writes
//! and writes made on the async-compute queue are not, so a barrier (same
//! queue) or fence (cross queue) is placed immediately before the first later
//! pass that reads the texture.

use std::collections::HashSet;

use crate::definition::Queue;
use crate::error::HazardError;
use crate::plan::{Barrier, BarrierKind, ExecutionPlan, LogicalTextureId};

/// Annotates execution plans with synchronization points.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronizationManager;

impl SynchronizationManager {
    pub fn new() -> Self {
        Self
    }

    /// Check ordering hazards and replace the plan's barrier list.
    ///
    /// Returns the number of barriers placed.
    pub fn annotate(&self, plan: &mut ExecutionPlan) -> Result<usize, HazardError> {
        self.check_hazards(plan)?;

        let mut pending: Vec<Option<Queue>> = vec![None; plan.textures.len()];
        let mut barriers = Vec::new();

        for (index, invocation) in plan.invocations.iter().enumerate() {
            let reader_queue = invocation.queue();
            let mut placed: HashSet<LogicalTextureId> = HashSet::new();
            for texture in invocation.reads() {
                let Some(writer_queue) = pending[texture.0] else {
                    continue;
                };
                if !placed.insert(texture) {
                    continue;
                }
                let kind = if writer_queue != reader_queue {
                    BarrierKind::QueueFence
                } else {
                    BarrierKind::UavWriteToRead
                };
                log::trace!(
                    "{:?} on '{}' before pass #{} ({:?} in '{}')",
                    kind,
                    plan.textures[texture.0].name,
                    index,
                    invocation.kind(),
                    invocation.node
                );
                barriers.push(Barrier {
                    before: index,
                    texture,
                    kind,
                });
                pending[texture.0] = None;
            }

            for texture in invocation.uav_writes() {
                pending[texture.0] = Some(reader_queue);
            }
            if reader_queue == Queue::AsyncCompute {
                for texture in invocation.writes() {
                    pending[texture.0] = Some(Queue::AsyncCompute);
                }
            }
        }

        let count = barriers.len();
        if count > 0 {
            log::debug!("Workspace '{}': {} barrier(s)", plan.workspace, count);
        }
        plan.barriers = barriers;
        Ok(count)
    }

    /// A same-frame read of a transient texture must never precede its
    /// first writer.
    fn check_hazards(&self, plan: &ExecutionPlan) -> Result<(), HazardError> {
        let mut first_writer: Vec<Option<usize>> = vec![None; plan.textures.len()];
        for (index, invocation) in plan.invocations.iter().enumerate() {
            for texture in invocation.writes() {
                first_writer[texture.0].get_or_insert(index);
            }
        }

        for (reader, invocation) in plan.invocations.iter().enumerate() {
            for texture in invocation.resource_reads() {
                if invocation.is_relaxed_read(texture) {
                    continue;
                }
                let logical = &plan.textures[texture.0];
                if logical.persistent || logical.is_external() {
                    continue;
                }
                if let Some(writer) = first_writer[texture.0] {
                    if writer > reader {
                        return Err(HazardError::UnresolvableHazard {
                            texture: logical.name.clone(),
                            reader,
                            first_writer: writer,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
