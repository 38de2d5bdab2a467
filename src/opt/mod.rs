//! Chunk-level and program-level optimization.
//!
//! The chunk-level pass abstractly interprets each chunk in isolation: a
//! statically known post-chunk top becomes a direct-branch target, and when
//! the chunk's whole stack effect is representable it is rewritten into a
//! short synthetic command sequence. The program-level pass then fuses runs
//! of purely-synthetic chunks linked by known jumps into single chunks and
//! drops top writes that a later write overwrites.

pub mod simulator;
pub mod stack_value;

use std::collections::HashSet;

use crate::ir::{Chunk, Command};
use self::simulator::StackSimulator;

/// Runs the chunk-level pass over every chunk.
pub fn optimize_chunks(chunks: &[Chunk]) -> Vec<Chunk> {
    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| optimize_chunk(chunk, index, chunks.len()))
        .collect()
}

fn optimize_chunk(chunk: &Chunk, index: usize, chunk_count: usize) -> Chunk {
    let mut sim = StackSimulator::new(index as u32);
    let mut optimized = chunk.clone();
    let mut enabled = true;

    for command in &chunk.commands {
        match command {
            Command::Add => sim.add(),
            Command::Bottom => sim.bottom(),
            Command::Dec => sim.dec(),
            Command::Dup => sim.dup(),
            Command::Inc => sim.inc(),
            Command::Input => sim.input(),
            Command::Output => sim.output(),
            Command::Pop => sim.pop(),
            Command::Sub => sim.sub(),
            Command::Swap => sim.swap(),
            Command::Nop => {}

            // Anything after a jump is unreachable through this chunk's
            // fall-through; the state so far still describes the jump.
            Command::Jump => break,

            // These leave the function, branch non-deterministically, or
            // depend on visit state the stack knows nothing about.
            Command::Exit
            | Command::Randomize
            | Command::IgnoreFirst
            | Command::IgnoreVisited => {
                enabled = false;
                break;
            }

            Command::AddToSecond(_)
            | Command::MultiplySecond(_)
            | Command::PopSecondValue
            | Command::PushSecondValue(_)
            | Command::PushValueToBottom(_)
            | Command::SetSecondValue(_)
            | Command::SetTop(_) => {
                debug_assert!(false, "synthetic command at chunk-optimizer input");
                enabled = false;
                break;
            }
        }
    }

    if enabled {
        if let Some(top) = sim.stack_top() {
            if (top as usize) < chunk_count {
                log::trace!("chunk {index}: successor {top} known statically");
                optimized.next_chunk = Some(top);
            }
        }

        if let Some(commands) = sim.commands() {
            log::trace!(
                "chunk {index}: rewrote {} commands into {}",
                chunk.commands.len(),
                commands.len()
            );
            optimized.commands = commands;
        }
    }

    optimized
}

/// Commands a chunk may contain and still be fused into its predecessor:
/// deterministic, no control flow, no I/O, no consumption of the stack
/// beyond in-place rewrites.
fn is_pure_synthetic(chunk: &Chunk) -> bool {
    chunk.commands.iter().all(|command| {
        matches!(
            command,
            Command::AddToSecond(_)
                | Command::MultiplySecond(_)
                | Command::PushSecondValue(_)
                | Command::SetSecondValue(_)
                | Command::SetTop(_)
        )
    })
}

/// Runs the program-level pass: each chunk is replaced by the fusion of the
/// longest run of pure-synthetic chunks reachable from it through known
/// jumps.
pub fn optimize_program(chunks: &[Chunk]) -> Vec<Chunk> {
    (0..chunks.len())
        .map(|index| fuse_chunk_run(chunks, index))
        .collect()
}

fn fuse_chunk_run(chunks: &[Chunk], start: usize) -> Chunk {
    let original = &chunks[start];

    let mut fused = Chunk {
        line: original.line,
        col: original.col,
        ..Chunk::default()
    };

    let mut index = start;
    let mut current = original;
    let mut seen = HashSet::new();

    while is_pure_synthetic(current) {
        let Some(next) = current.next_chunk else {
            break;
        };

        if !seen.insert(index) {
            // Following the run re-entered it; leave the loop alone.
            return original.clone();
        }

        fused.commands.extend_from_slice(&current.commands);
        fused.next_chunk = Some(next);

        index = next as usize;
        current = &chunks[index];
    }

    if fused.commands.is_empty() {
        return original.clone();
    }

    log::trace!("fused {} chunks starting at {start}", seen.len());
    condense_stack_tops(&mut fused.commands);
    fused
}

/// Keeps only the final top write: any earlier `SetTop` is overwritten by
/// the last one before the fused chunk's successor can observe it.
fn condense_stack_tops(commands: &mut Vec<Command>) {
    let mut found = false;
    let mut i = commands.len();

    while i > 0 {
        i -= 1;
        if matches!(commands[i], Command::SetTop(_)) {
            if found {
                commands.remove(i);
            }
            found = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn synthetic(commands: Vec<Command>, next_chunk: Option<u32>) -> Chunk {
        Chunk {
            commands,
            next_chunk,
            ..Chunk::default()
        }
    }

    #[test]
    fn known_top_becomes_direct_successor() {
        let chunks = parse_source("55A55 FFFFF FFFFF").unwrap();
        let optimized = optimize_chunks(&chunks);

        // Two increments then a jump: successor 2 is known and the jump's
        // trailing commands are dead.
        assert_eq!(optimized[0].next_chunk, Some(2));
        assert_eq!(optimized[0].commands, vec![Command::SetTop(2)]);
    }

    #[test]
    fn successor_outside_the_program_is_not_recorded() {
        let chunks = parse_source("55555 FFFFF").unwrap();
        let optimized = optimize_chunks(&chunks);

        // The rewritten top (5) is not a chunk index in a two-chunk
        // program, so dispatch stays dynamic.
        assert_eq!(optimized[0].next_chunk, None);
        assert_eq!(optimized[0].commands, vec![Command::SetTop(5)]);
    }

    #[test]
    fn exit_disables_the_rewrite() {
        let chunks = parse_source("B5555").unwrap();
        let optimized = optimize_chunks(&chunks);

        assert_eq!(optimized[0], chunks[0]);
    }

    #[test]
    fn visit_aware_commands_disable_the_rewrite() {
        let chunks = parse_source("58555 5C555").unwrap();
        let optimized = optimize_chunks(&chunks);

        assert_eq!(optimized, chunks);
    }

    #[test]
    fn io_keeps_commands_but_may_know_the_successor() {
        let chunks = parse_source("01FFF").unwrap();
        let optimized = optimize_chunks(&chunks);

        // Input then output restores the entry top, so chunk 0 loops to
        // itself even though its body must be kept.
        assert_eq!(optimized[0].commands, chunks[0].commands);
        assert_eq!(optimized[0].next_chunk, Some(0));
    }

    #[test]
    fn stable_when_rerun_on_its_own_output() {
        // A program the chunk pass leaves primitive (or rewrites to nothing)
        // must not change on a second run.
        let chunks = parse_source("FFFFF 0B2F4").unwrap();
        let once = optimize_chunks(&chunks);
        let twice = optimize_chunks(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn fuses_a_run_of_synthetic_chunks() {
        let chunks = vec![
            synthetic(vec![Command::SetTop(1)], Some(1)),
            synthetic(
                vec![Command::SetTop(2), Command::PushSecondValue(9)],
                Some(2),
            ),
            Chunk {
                commands: vec![Command::Exit; 5],
                ..Chunk::default()
            },
        ];

        let optimized = optimize_program(&chunks);

        // The run 0 -> 1 collapses into chunk 0, keeping only the final
        // top write.
        assert_eq!(
            optimized[0].commands,
            vec![Command::SetTop(2), Command::PushSecondValue(9)]
        );
        assert_eq!(optimized[0].next_chunk, Some(2));

        // Chunk 1 still fuses from its own starting point.
        assert_eq!(
            optimized[1].commands,
            vec![Command::SetTop(2), Command::PushSecondValue(9)]
        );
        assert_eq!(optimized[1].next_chunk, Some(2));

        // The non-synthetic chunk is untouched.
        assert_eq!(optimized[2], chunks[2]);
    }

    #[test]
    fn cyclic_runs_are_left_alone() {
        let chunks = vec![
            synthetic(vec![Command::SetTop(1)], Some(1)),
            synthetic(vec![Command::SetTop(0)], Some(0)),
        ];

        let optimized = optimize_program(&chunks);

        assert_eq!(optimized, chunks);
    }

    #[test]
    fn non_synthetic_chunks_do_not_fuse() {
        let chunks = parse_source("01FFF 55555").unwrap();
        let optimized = optimize_program(&optimize_chunks(&chunks));

        assert_eq!(optimized[0].commands, chunks[0].commands);
    }

    #[test]
    fn condense_keeps_only_the_last_top_write() {
        let mut commands = vec![
            Command::SetTop(1),
            Command::PushSecondValue(2),
            Command::SetTop(3),
            Command::AddToSecond(1),
        ];
        condense_stack_tops(&mut commands);

        assert_eq!(
            commands,
            vec![
                Command::PushSecondValue(2),
                Command::SetTop(3),
                Command::AddToSecond(1),
            ]
        );
    }
}
