//! Pass recording
//!
//! The [`PassExecutor`] turns plan invocations into [`Command`]s. Commands
//! are plain data; a [`RenderDevice`](crate::backend::RenderDevice) consumes
//! a whole [`CommandList`] per frame at submission.

mod commands;
mod pass;

pub use commands::{BoundUav, Command, CommandList, PixelRect, SampledTexture};
pub use pass::{PassContext, PassExecutor};
