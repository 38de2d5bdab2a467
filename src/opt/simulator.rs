//! Abstract interpretation of a chunk's stack effect.
//!
//! The simulator executes a chunk's commands over [`StackValue`]s instead of
//! runtime cells. On entry the only known value is the chunk's own index (the
//! dispatcher contract). Popping past the entry top materializes symbolic
//! values for the pre-existing cells below it, numbered from 1 downwards.
//! After simulation the final abstract state answers two questions: is the
//! post-chunk top statically known, and can the whole chunk be replaced by a
//! short synthetic recipe with the same observable effect?

use super::stack_value::StackValue;
use crate::ir::Command;

pub struct StackSimulator {
    orig_index: u32,
    max_popped: u32,
    had_io: bool,
    bottom: Vec<StackValue>,
    values: Vec<StackValue>,
}

impl StackSimulator {
    /// Starts simulation of the chunk at `index`.
    pub fn new(index: u32) -> Self {
        StackSimulator {
            orig_index: index,
            max_popped: 0,
            had_io: false,
            bottom: Vec::new(),
            values: vec![StackValue::entry(0, index)],
        }
    }

    pub fn add(&mut self) {
        let mut val1 = self.pop_value();
        let val2 = self.pop_value();
        val1.add(&val2);
        self.push_value(val1);
    }

    pub fn bottom(&mut self) {
        let val = self.pop_value();
        self.bottom.push(val);
    }

    pub fn dec(&mut self) {
        let mut val = self.pop_value();
        val.dec();
        self.push_value(val);
    }

    pub fn dup(&mut self) {
        let val = self.pop_value();
        self.push_value(val);
        self.push_value(val);
    }

    pub fn inc(&mut self) {
        let mut val = self.pop_value();
        val.add(&StackValue::from_value(1));
        self.push_value(val);
    }

    pub fn input(&mut self) {
        self.push_value(StackValue::unknown());
        self.had_io = true;
    }

    pub fn output(&mut self) {
        self.pop_value();
        self.had_io = true;
    }

    pub fn pop(&mut self) {
        self.pop_value();
    }

    pub fn sub(&mut self) {
        let mut val1 = self.pop_value();
        let val2 = self.pop_value();
        val1.sub(&val2);
        self.push_value(val1);
    }

    pub fn swap(&mut self) {
        let val1 = self.pop_value();
        let val2 = self.pop_value();
        self.push_value(val1);
        self.push_value(val2);
    }

    /// The post-chunk stack top, if statically known.
    pub fn stack_top(&mut self) -> Option<u32> {
        let val = self.pop_value();
        self.push_value(val);
        val.known_value()
    }

    /// A synthetic command sequence reproducing the final abstract state, if
    /// the state is representable.
    ///
    /// The sequence is a recipe applied in order against the runtime stack:
    /// bottom writes first, then the top rewrite, then the second-slot
    /// adjustment. The code generator relies on this ordering.
    pub fn commands(&self) -> Option<Vec<Command>> {
        if !self.can_optimize() {
            return None;
        }

        let mut commands = Vec::new();

        for val in &self.bottom {
            commands.push(Command::PushValueToBottom(val.known_value()?));
        }

        let top = self.values.last()?.known_value()?;
        if top != self.orig_index {
            commands.push(Command::SetTop(top));
        }

        if self.values.len() > 1 {
            let second = &self.values[0];
            if let Some(value) = second.known_value() {
                if self.max_popped == 0 {
                    commands.push(Command::PushSecondValue(value));
                } else {
                    commands.push(Command::SetSecondValue(value));
                }
            } else if second.multiple() > 1 {
                commands.push(Command::MultiplySecond(second.multiple()));
            } else if second.change() != 0 {
                commands.push(Command::AddToSecond(second.change()));
            }
        } else if self.max_popped == 1 {
            commands.push(Command::PopSecondValue);
        }

        Some(commands)
    }

    /// Whether the final state fits the synthetic command vocabulary: no
    /// I/O, at most one slot consumed below the entry top, concrete bottom
    /// writes, one or two live values with a concrete top, and a second
    /// value that is either concrete or the untouched-origin second slot.
    fn can_optimize(&self) -> bool {
        !self.had_io
            && self.max_popped < 2
            && self.bottom.iter().all(|v| v.known_value().is_some())
            && (1..=2).contains(&self.values.len())
            && self.values.last().is_some_and(|v| v.known_value().is_some())
            && (self.values.len() == 1 || {
                let second = &self.values[0];
                second.known_value().is_some() || second.origin() == Some(1)
            })
    }

    fn push_value(&mut self, value: StackValue) {
        self.values.push(value);
    }

    fn pop_value(&mut self) -> StackValue {
        if let Some(value) = self.values.pop() {
            return value;
        }
        self.max_popped += 1;
        StackValue::from_index(self.max_popped)
    }
}
