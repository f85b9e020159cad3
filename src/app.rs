use crate::message::Operation;

/// Deterministic replicated service.
///
/// Every replica executes the same committed operations in the same order, so
/// all honest instances end in the same state.
pub trait App
where
    Self: Send + 'static,
{
    fn execute(&mut self, op: Operation);

    fn state(&self) -> i64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counter(i64);

impl App for Counter {
    fn execute(&mut self, op: Operation) {
        match op {
            Operation::Add => self.0 += 1,
            Operation::Sub => self.0 -= 1,
            // no-op rather than an error, peers may still agree on it
            Operation::Unknown(_) => {}
        }
    }

    fn state(&self) -> i64 {
        self.0
    }
}
