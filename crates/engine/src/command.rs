use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

use crate::ecs::WorldError;
use crate::identity::{EntityReference, IdentityResolver, StarSystemId};
use crate::locks;
use crate::migration::MigrationError;
use crate::pipeline::TickContext;

pub const DEFAULT_COMMAND_CAPACITY: usize = 128;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("entity referenced by the command lives in {actual}, not {expected}")]
    WrongSystem {
        expected: StarSystemId,
        actual: StarSystemId,
    },
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// An order submitted from outside the simulation thread.
///
/// `is_valid` is called first and must refresh every entity reference the
/// command holds; `apply` only runs when it returned true, inside the owning
/// star system's locked tick.
pub trait Command: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn is_valid(&mut self, resolver: &IdentityResolver) -> bool;

    fn apply(&mut self, ctx: &mut TickContext<'_>) -> Result<(), CommandError>;
}

pub fn revalidate(reference: &mut EntityReference, resolver: &IdentityResolver) -> bool {
    resolver.resolve(reference).is_resolved()
}

/// Drops references that no longer resolve; true if any remain.
pub fn revalidate_all(
    references: &mut Vec<EntityReference>,
    resolver: &IdentityResolver,
) -> bool {
    references.retain_mut(|reference| revalidate(reference, resolver));
    !references.is_empty()
}

/// Checks that a revalidated reference points into the system applying the
/// command.
pub fn ensure_local(
    reference: &EntityReference,
    ctx: &TickContext<'_>,
) -> Result<(), CommandError> {
    if reference.system == ctx.system() {
        Ok(())
    } else {
        Err(CommandError::WrongSystem {
            expected: ctx.system(),
            actual: reference.system,
        })
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("command queue of {system} is full ({capacity} pending)")]
    QueueFull {
        system: StarSystemId,
        capacity: usize,
        command: Box<dyn Command>,
    },
    #[error("unknown star system {system}")]
    UnknownSystem {
        system: StarSystemId,
        command: Box<dyn Command>,
    },
}

impl SubmitError {
    /// Hands the rejected command back to the caller.
    pub fn into_command(self) -> Box<dyn Command> {
        match self {
            SubmitError::QueueFull { command, .. } | SubmitError::UnknownSystem { command, .. } => {
                command
            }
        }
    }
}

/// Bounded FIFO between submitters and one star system's tick.
pub struct CommandQueue {
    system: StarSystemId,
    capacity: usize,
    pending: Mutex<VecDeque<Box<dyn Command>>>,
}

impl CommandQueue {
    pub fn new(system: StarSystemId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            system,
            capacity,
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn submit(&self, command: Box<dyn Command>) -> Result<(), SubmitError> {
        let mut pending = locks::lock(&self.pending, "command_queue");
        if pending.len() >= self.capacity {
            return Err(SubmitError::QueueFull {
                system: self.system,
                capacity: self.capacity,
                command,
            });
        }
        pending.push_back(command);
        Ok(())
    }

    pub fn len(&self) -> usize {
        locks::lock(&self.pending, "command_queue").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn drain_into(&self, out: &mut Vec<Box<dyn Command>>) {
        out.extend(locks::lock(&self.pending, "command_queue").drain(..));
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("system", &self.system)
            .field("capacity", &self.capacity)
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Noop(u32);

    impl Command for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn is_valid(&mut self, _resolver: &IdentityResolver) -> bool {
            true
        }

        fn apply(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[test]
    fn full_queue_returns_the_command() {
        let queue = CommandQueue::new(StarSystemId(1), 2);
        queue.submit(Box::new(Noop(1))).expect("first");
        queue.submit(Box::new(Noop(2))).expect("second");

        let error = queue.submit(Box::new(Noop(3))).expect_err("queue full");
        assert!(matches!(error, SubmitError::QueueFull { capacity: 2, .. }));
        assert_eq!(format!("{:?}", error.into_command()), "Noop(3)");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_preserves_submission_order() {
        let queue = CommandQueue::new(StarSystemId(0), DEFAULT_COMMAND_CAPACITY);
        for value in 0..5 {
            queue.submit(Box::new(Noop(value))).expect("submit");
        }
        let mut drained = Vec::new();
        queue.drain_into(&mut drained);

        let names = drained
            .iter()
            .map(|command| format!("{command:?}"))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Noop(0)", "Noop(1)", "Noop(2)", "Noop(3)", "Noop(4)"]);
        assert!(queue.is_empty());
    }
}
