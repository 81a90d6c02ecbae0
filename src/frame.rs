//! Frame replay
//!
//! [`FrameExecutor`] walks a plan's recording batches in order and records
//! every target group through the [`PassExecutor`]. Groups inside one batch
//! have no data dependency on each other and may record on worker threads;
//! their command lists are always concatenated in plan order.

use std::ops::Range;
use std::sync::Arc;

use crate::definition::{PassOp, StencilState};
use crate::error::PassExecutionError;
use crate::executor::{Command, CommandList, PassContext, PassExecutor};
use crate::plan::{ExecutionPlan, PassInvocation};
use crate::PassErrorPolicy;

/// Observer of pass execution, e.g. a profiler or a debug overlay.
///
/// Listeners see every recorded pass, including shadow node passes. They
/// cannot change the plan.
pub trait PassListener: Send + Sync {
    fn before_pass(&self, _invocation: &PassInvocation) {}

    fn after_pass(&self, _invocation: &PassInvocation) {}
}

/// What happened during one workspace tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub passes_executed: usize,
    /// Masked out, initial-only after the first frame, or skipped after a failure
    pub passes_skipped: usize,
    pub shadow_nodes_rendered: Vec<String>,
    pub shadow_nodes_reused: Vec<String>,
    /// Producer targets recorded ahead of an annotated reader
    pub refreshes: usize,
    /// Failures that only skipped their target
    pub errors: Vec<PassExecutionError>,
}

impl FrameReport {
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Target groups of every recording batch.
pub fn batch_groups(plan: &ExecutionPlan) -> Vec<Vec<Range<usize>>> {
    let groups = plan.target_groups();
    plan.batches
        .iter()
        .map(|batch| {
            groups
                .iter()
                .filter(|group| group.start >= batch.start && group.end <= batch.end)
                .cloned()
                .collect()
        })
        .collect()
}

#[derive(Default)]
struct GroupOutcome {
    commands: CommandList,
    executed: usize,
    skipped: usize,
    error: Option<PassExecutionError>,
}

/// Replays execution plans into command lists.
pub struct FrameExecutor<'a> {
    executor: PassExecutor,
    listeners: &'a [Arc<dyn PassListener>],
    policy: PassErrorPolicy,
    parallel: bool,
}

impl<'a> FrameExecutor<'a> {
    pub fn new(listeners: &'a [Arc<dyn PassListener>], policy: PassErrorPolicy) -> Self {
        Self {
            executor: PassExecutor::new(),
            listeners,
            policy,
            parallel: false,
        }
    }

    /// Record independent targets of a batch concurrently. Ignored while
    /// listeners are registered, since they expect plan order.
    pub fn with_parallel_recording(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Record the plan of `ctx` once for the context's execution slot.
    ///
    /// With [`PassErrorPolicy::AbortFrame`] the first failure is returned and
    /// whatever was appended to `commands` must be discarded by the caller.
    pub fn replay(
        &self,
        ctx: &PassContext<'_>,
        batches: &[Vec<Range<usize>>],
        first_frame: bool,
        report: &mut FrameReport,
        commands: &mut CommandList,
    ) -> Result<(), PassExecutionError> {
        let refreshes = ctx.plan.annotated_refreshes(first_frame);
        for batch in batches {
            let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
                continue;
            };
            let span = first.start..last.end;
            for refresh in refreshes.iter().filter(|r| span.contains(&r.before)) {
                log::trace!(
                    "Refreshing '{}' ahead of {}",
                    ctx.plan.texture(refresh.texture).name,
                    ctx.plan.invocations[refresh.before].label()
                );
                report.refreshes += 1;
                let outcome = self.record_group(ctx, refresh.producer.clone(), first_frame);
                self.absorb(outcome, report, commands)?;
            }
            for outcome in self.record_batch(ctx, batch, first_frame) {
                self.absorb(outcome, report, commands)?;
            }
        }
        Ok(())
    }

    fn absorb(
        &self,
        mut outcome: GroupOutcome,
        report: &mut FrameReport,
        commands: &mut CommandList,
    ) -> Result<(), PassExecutionError> {
        report.passes_executed += outcome.executed;
        report.passes_skipped += outcome.skipped;
        commands.append(&mut outcome.commands);
        if let Some(err) = outcome.error {
            match self.policy {
                PassErrorPolicy::AbortFrame => return Err(err),
                PassErrorPolicy::SkipTarget => {
                    log::warn!("Skipping rest of target: {}", err);
                    report.errors.push(err);
                }
            }
        }
        Ok(())
    }

    fn record_batch(
        &self,
        ctx: &PassContext<'_>,
        batch: &[Range<usize>],
        first_frame: bool,
    ) -> Vec<GroupOutcome> {
        #[cfg(feature = "parallel")]
        if self.parallel && self.listeners.is_empty() && batch.len() > 1 {
            use rayon::prelude::*;
            return batch
                .par_iter()
                .map(|group| self.record_group(ctx, group.clone(), first_frame))
                .collect();
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for group in batch {
            let outcome = self.record_group(ctx, group.clone(), first_frame);
            let failed = outcome.error.is_some();
            outcomes.push(outcome);
            if failed && self.policy == PassErrorPolicy::AbortFrame {
                break;
            }
        }
        outcomes
    }

    fn record_group(
        &self,
        ctx: &PassContext<'_>,
        group: Range<usize>,
        first_frame: bool,
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();
        let end = group.end;
        let mut stencil_changed = false;
        for index in group {
            let invocation = &ctx.plan.invocations[index];
            let masked = invocation.pass.execution_mask & ctx.slot_bit == 0;
            let expired = invocation.pass.only_initial && !first_frame;

            let recorded = if masked || expired {
                self.executor
                    .record_barriers(ctx, index, &mut outcome.commands)
                    .map(|()| false)
            } else {
                self.record_pass(ctx, index, invocation, &mut outcome.commands)
                    .map(|()| true)
            };

            match recorded {
                Ok(true) => {
                    outcome.executed += 1;
                    stencil_changed |= matches!(invocation.pass.op, PassOp::Stencil(_));
                }
                Ok(false) => outcome.skipped += 1,
                Err(err) => {
                    outcome.skipped += end - index;
                    outcome.error = Some(err);
                    break;
                }
            }
        }
        // Stencil state is scoped to its target
        if stencil_changed {
            outcome
                .commands
                .push(Command::SetStencil(StencilState::default()));
        }
        outcome
    }

    fn record_pass(
        &self,
        ctx: &PassContext<'_>,
        index: usize,
        invocation: &PassInvocation,
        commands: &mut CommandList,
    ) -> Result<(), PassExecutionError> {
        for listener in self.listeners {
            listener.before_pass(invocation);
        }
        // A failed pass leaves nothing behind
        let mut scratch = CommandList::new();
        self.executor.record(ctx, index, &mut scratch)?;
        commands.append(&mut scratch);
        for listener in self.listeners {
            listener.after_pass(invocation);
        }
        Ok(())
    }
}
