//! LLVM IR emission.
//!
//! The emitted module holds the whole program in one `main` function:
//!
//! - `@stack`, a private global `[65536 x i32]` circular buffer, with `top`
//!   and `bottom` cursors and the cached top value living in allocas. The
//!   logical top of the stack is always the `top_value` register; the array
//!   only holds the values below it.
//! - one basic block per chunk, named `chunkN`;
//! - a shared `stack-jump` dispatcher that switches on the cached top value
//!   to select the next chunk, realizing XRF's implicit jump. Chunks with a
//!   statically known successor branch there directly instead;
//! - a `stack-error` block holding `unreachable`, the dispatcher's default
//!   (the top value is a valid chunk index by language contract);
//! - one private i1 `visited-N` flag per chunk that uses `IgnoreFirst` or
//!   `IgnoreVisited`, which split the rest of their chunk into conditionally
//!   executed anonymous blocks.
//!
//! Cursor arithmetic is done on i64 and masked with `and 65535` after every
//! wrapping step, so both cursors stay inside the buffer.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::ArrayType;
use inkwell::values::{FunctionValue, GlobalValue, IntValue, PointerValue};
use inkwell::IntPredicate;

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{Chunk, Command};

const STACK_SIZE: u32 = 1 << 16;
const INDEX_MASK: u64 = (STACK_SIZE - 1) as u64;

/// Lowers an optimized chunk list to an LLVM module owned by the caller's
/// context.
pub fn generate<'ctx>(context: &'ctx Context, chunks: &[Chunk]) -> CodegenResult<Module<'ctx>> {
    let mut generator = CodeGenerator::new(context, chunks.len())?;
    generator.emit_chunks(chunks)?;
    log::debug!("generated module with {} chunk blocks", chunks.len());
    Ok(generator.module)
}

struct CodeGenerator<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,

    stack_type: ArrayType<'ctx>,
    stack: GlobalValue<'ctx>,
    getchar: FunctionValue<'ctx>,
    putchar: FunctionValue<'ctx>,
    main_fn: FunctionValue<'ctx>,

    stack_top: PointerValue<'ctx>,
    stack_bottom: PointerValue<'ctx>,
    top_value: PointerValue<'ctx>,

    chunk_blocks: Vec<BasicBlock<'ctx>>,
    dispatch_block: BasicBlock<'ctx>,
    visited_flags: HashMap<usize, GlobalValue<'ctx>>,
}

impl<'ctx> CodeGenerator<'ctx> {
    /// Builds the module skeleton: globals, declarations, `main` with its
    /// start block, the per-chunk blocks, and the dispatcher.
    fn new(context: &'ctx Context, chunk_count: usize) -> CodegenResult<Self> {
        let module = context.create_module("xrf");
        let builder = context.create_builder();

        let i32_type = context.i32_type();
        let i64_type = context.i64_type();

        let stack_type = i32_type.array_type(STACK_SIZE);
        let stack = module.add_global(stack_type, None, "stack");
        stack.set_linkage(Linkage::Private);
        stack.set_initializer(&stack_type.get_undef());

        let getchar = module.add_function("getchar", i32_type.fn_type(&[], false), None);
        let putchar =
            module.add_function("putchar", i32_type.fn_type(&[i32_type.into()], false), None);

        let main_fn = module.add_function("main", i32_type.fn_type(&[], false), None);

        let start_block = context.append_basic_block(main_fn, "start");
        builder.position_at_end(start_block);

        let stack_top = builder.build_alloca(i64_type, "top")?;
        let stack_bottom = builder.build_alloca(i64_type, "bottom")?;
        let top_value = builder.build_alloca(i32_type, "top_value")?;

        builder.build_store(stack_top, i64_type.const_int(0, false))?;
        builder.build_store(stack_bottom, i64_type.const_int(u64::from(STACK_SIZE) - 1, false))?;
        builder.build_store(top_value, i32_type.const_int(0, false))?;

        let chunk_blocks: Vec<_> = (0..chunk_count)
            .map(|i| context.append_basic_block(main_fn, &format!("chunk{i}")))
            .collect();

        let dispatch_block = context.append_basic_block(main_fn, "stack-jump");
        let error_block = context.append_basic_block(main_fn, "stack-error");

        builder.position_at_end(error_block);
        builder.build_unreachable()?;

        builder.position_at_end(dispatch_block);
        let top = builder
            .build_load(top_value, "top_value")?
            .into_int_value();
        let cases: Vec<_> = chunk_blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (i32_type.const_int(i as u64, false), *block))
            .collect();
        builder.build_switch(top, error_block, &cases)?;

        builder.position_at_end(start_block);
        match chunk_blocks.first() {
            Some(first) => {
                builder.build_unconditional_branch(*first)?;
            }
            None => {
                // No chunk 0 to start in; the program is trivially done.
                builder.build_return(Some(&i32_type.const_int(0, false)))?;
            }
        }

        Ok(CodeGenerator {
            context,
            module,
            builder,
            stack_type,
            stack,
            getchar,
            putchar,
            main_fn,
            stack_top,
            stack_bottom,
            top_value,
            chunk_blocks,
            dispatch_block,
            visited_flags: HashMap::new(),
        })
    }

    fn emit_chunks(&mut self, chunks: &[Chunk]) -> CodegenResult<()> {
        for (index, chunk) in chunks.iter().enumerate() {
            self.builder.position_at_end(self.chunk_blocks[index]);
            self.emit_commands(&chunk.commands, index, chunk.next_chunk, None)?;
        }
        Ok(())
    }

    /// Emits a command sequence into the currently positioned block,
    /// finishing it with the chunk terminator.
    ///
    /// `set_visited` carries the obligation to mark the chunk's visited flag
    /// just before the terminating branch; it is installed by visit-aware
    /// splits on the side that runs on the first visit and inherited by any
    /// nested split.
    fn emit_commands(
        &mut self,
        commands: &[Command],
        chunk_index: usize,
        next_chunk: Option<u32>,
        set_visited: Option<GlobalValue<'ctx>>,
    ) -> CodegenResult<()> {
        for (i, command) in commands.iter().enumerate() {
            match *command {
                Command::Input => self.emit_input()?,
                Command::Output => self.emit_output()?,
                Command::Pop => self.emit_pop()?,
                Command::Dup => self.emit_dup()?,
                Command::Swap => self.emit_swap()?,
                Command::Inc => self.emit_add_constant(1)?,
                Command::Dec => self.emit_add_constant(-1)?,
                Command::Add => self.emit_add()?,
                Command::Sub => self.emit_sub()?,
                Command::Bottom => self.emit_bottom()?,

                // Commands past the jump are unreachable here.
                Command::Jump => break,

                Command::Exit => {
                    let zero = self.context.i32_type().const_int(0, false);
                    self.builder.build_return(Some(&zero))?;
                    return Ok(());
                }

                // Randomize has no backend; it compiles like Nop.
                Command::Nop | Command::Randomize => {}

                Command::IgnoreFirst | Command::IgnoreVisited => {
                    if i + 1 < commands.len() {
                        return self.emit_visit_split(
                            *command,
                            &commands[i + 1..],
                            &commands[i + 2..],
                            chunk_index,
                            next_chunk,
                            set_visited,
                        );
                    }
                    // Nothing follows, so there is nothing to skip.
                }

                Command::AddToSecond(value) => self.emit_add_to_second(value)?,
                Command::MultiplySecond(value) => self.emit_multiply_second(value)?,
                Command::PopSecondValue => self.emit_pop_second()?,
                Command::PushSecondValue(value) => self.emit_push_second(value)?,
                Command::PushValueToBottom(value) => self.emit_push_to_bottom(value)?,
                Command::SetSecondValue(value) => self.emit_set_second(value)?,
                Command::SetTop(value) => self.emit_set_top(value)?,
            }
        }

        self.emit_terminator(next_chunk, set_visited)
    }

    /// Closes the current block: marks the visited flag if owed, then
    /// branches to the known successor or to the dispatcher.
    fn emit_terminator(
        &mut self,
        next_chunk: Option<u32>,
        set_visited: Option<GlobalValue<'ctx>>,
    ) -> CodegenResult<()> {
        if let Some(flag) = set_visited {
            let visited = self.context.bool_type().const_int(1, false);
            self.builder.build_store(flag.as_pointer_value(), visited)?;
        }

        match next_chunk {
            Some(target) => {
                let block = self.chunk_blocks.get(target as usize).copied().ok_or(
                    CodegenError::InvalidJumpTarget {
                        target,
                        count: self.chunk_blocks.len(),
                    },
                )?;
                self.builder.build_unconditional_branch(block)?;
            }
            None => {
                self.builder
                    .build_unconditional_branch(self.dispatch_block)?;
            }
        }

        Ok(())
    }

    /// Lowers `IgnoreFirst`/`IgnoreVisited`: branch on the chunk's visited
    /// flag between the remainder (`tail`) and the remainder minus one
    /// command (`skip`), compiled as fresh anonymous blocks sharing the
    /// chunk's successor. The side taken on the first visit sets the flag.
    fn emit_visit_split(
        &mut self,
        command: Command,
        tail: &[Command],
        skip: &[Command],
        chunk_index: usize,
        next_chunk: Option<u32>,
        set_visited: Option<GlobalValue<'ctx>>,
    ) -> CodegenResult<()> {
        let flag = self.visited_flag(chunk_index);

        let visited = self
            .builder
            .build_load(flag.as_pointer_value(), "visited")?
            .into_int_value();

        let tail_block = self.context.append_basic_block(self.main_fn, "");
        let skip_block = self.context.append_basic_block(self.main_fn, "");

        let (tail_visited, skip_visited) = match command {
            Command::IgnoreVisited => {
                self.builder
                    .build_conditional_branch(visited, skip_block, tail_block)?;
                (Some(flag), set_visited)
            }
            Command::IgnoreFirst => {
                self.builder
                    .build_conditional_branch(visited, tail_block, skip_block)?;
                (set_visited, Some(flag))
            }
            _ => unreachable!("not a visit-aware command: {command:?}"),
        };

        self.builder.position_at_end(tail_block);
        self.emit_commands(tail, chunk_index, next_chunk, tail_visited)?;

        self.builder.position_at_end(skip_block);
        self.emit_commands(skip, chunk_index, next_chunk, skip_visited)?;

        Ok(())
    }

    /// The chunk's visited flag, created on first use. Both visit-aware
    /// commands in the same chunk share one flag.
    fn visited_flag(&mut self, chunk_index: usize) -> GlobalValue<'ctx> {
        let bool_type = self.context.bool_type();
        let module = &self.module;

        *self.visited_flags.entry(chunk_index).or_insert_with(|| {
            let flag = module.add_global(bool_type, None, &format!("visited-{chunk_index}"));
            flag.set_linkage(Linkage::Private);
            flag.set_initializer(&bool_type.const_int(0, false));
            flag
        })
    }

    // Stack primitives. The cached top value never lives in the array:
    // pushing spills it into the cell at `top`, popping reloads it from the
    // cell below.

    /// `PUSH v`: spill the cached top into `stack[top]`, cache `v`, advance
    /// `top`.
    fn emit_push(&mut self, value: IntValue<'ctx>) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();
        let i64_type = self.context.i64_type();

        let cached = self
            .builder
            .build_load(self.top_value, "top_value")?;
        let top = self
            .builder
            .build_load(self.stack_top, "top")?
            .into_int_value();

        let slot = self.stack_slot(top)?;
        self.builder.build_store(slot, cached)?;
        self.builder.build_store(self.top_value, value)?;

        let raised = self
            .builder
            .build_int_add(top, i64_type.const_int(1, false), "top_next")?;
        let wrapped = self.wrap_index(raised)?;
        self.builder.build_store(self.stack_top, wrapped)?;

        Ok(())
    }

    /// `POP`: retreat `top` and reload the cached top from the cell there.
    fn emit_pop(&mut self) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();
        let i64_type = self.context.i64_type();

        let top = self
            .builder
            .build_load(self.stack_top, "top")?
            .into_int_value();
        let lowered = self
            .builder
            .build_int_sub(top, i64_type.const_int(1, false), "top_prev")?;
        let wrapped = self.wrap_index(lowered)?;

        let slot = self.stack_slot(wrapped)?;
        let below = self.builder.build_load(slot, "below")?;
        self.builder.build_store(self.top_value, below)?;
        self.builder.build_store(self.stack_top, wrapped)?;

        Ok(())
    }

    fn emit_dup(&mut self) -> CodegenResult<()> {
        let cached = self
            .builder
            .build_load(self.top_value, "top_value")?
            .into_int_value();
        self.emit_push(cached)
    }

    fn emit_swap(&mut self) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();
        let i64_type = self.context.i64_type();

        let top = self
            .builder
            .build_load(self.stack_top, "top")?
            .into_int_value();
        let second = self.second_slot_index(top)?;
        let slot = self.stack_slot(second)?;

        let second_value = self.builder.build_load(slot, "second")?;
        let cached = self
            .builder
            .build_load(self.top_value, "top_value")?;

        self.builder.build_store(slot, cached)?;
        self.builder.build_store(self.top_value, second_value)?;

        Ok(())
    }

    /// `Inc`/`Dec`: adjust the cached top in place, wrapping as 32-bit.
    fn emit_add_constant(&mut self, delta: i64) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();

        let cached = self
            .builder
            .build_load(self.top_value, "top_value")?
            .into_int_value();
        let adjusted = self.builder.build_int_add(
            cached,
            i32_type.const_int(delta as u64, true),
            "adjusted",
        )?;
        self.builder.build_store(self.top_value, adjusted)?;

        Ok(())
    }

    fn emit_add(&mut self) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();

        let first = self
            .builder
            .build_load(self.top_value, "first")?
            .into_int_value();
        self.emit_pop()?;
        let second = self
            .builder
            .build_load(self.top_value, "second")?
            .into_int_value();

        let sum = self.builder.build_int_add(first, second, "sum")?;
        self.builder.build_store(self.top_value, sum)?;

        Ok(())
    }

    /// `Sub`: the top two values' absolute difference, unsigned.
    fn emit_sub(&mut self) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();

        let first = self
            .builder
            .build_load(self.top_value, "first")?
            .into_int_value();
        self.emit_pop()?;
        let second = self
            .builder
            .build_load(self.top_value, "second")?
            .into_int_value();

        let forward = self.builder.build_int_sub(first, second, "forward")?;
        let backward = self.builder.build_int_sub(second, first, "backward")?;
        let first_greater =
            self.builder
                .build_int_compare(IntPredicate::UGT, first, second, "first_greater")?;
        let difference = self
            .builder
            .build_select(first_greater, forward, backward, "difference")?;

        self.builder.build_store(self.top_value, difference)?;

        Ok(())
    }

    /// `Input`: push the next byte of stdin, or 0 at end of input.
    fn emit_input(&mut self) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();

        let read = self.builder.build_call(self.getchar, &[], "read")?;
        let read = read
            .try_as_basic_value()
            .left()
            .expect("getchar returns i32")
            .into_int_value();

        let eof = self.builder.build_int_compare(
            IntPredicate::EQ,
            read,
            i32_type.const_all_ones(),
            "eof",
        )?;
        let value = self
            .builder
            .build_select(eof, i32_type.const_int(0, false), read, "input")?
            .into_int_value();

        self.emit_push(value)
    }

    fn emit_output(&mut self) -> CodegenResult<()> {
        let cached = self
            .builder
            .build_load(self.top_value, "top_value")?
            .into_int_value();
        self.builder
            .build_call(self.putchar, &[cached.into()], "")?;
        self.emit_pop()
    }

    /// `Bottom`: pop the top and append it below the lowest occupied cell.
    fn emit_bottom(&mut self) -> CodegenResult<()> {
        let cached = self
            .builder
            .build_load(self.top_value, "top_value")?
            .into_int_value();
        self.emit_pop()?;
        self.emit_bottom_write(cached)
    }

    // Synthetic commands: straight-line rewrites of the final stack state,
    // applied in the order the optimizer emitted them.

    fn emit_add_to_second(&mut self, value: i32) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();

        let slot = self.load_second_slot()?;
        let second = self
            .builder
            .build_load(slot, "second")?
            .into_int_value();
        let adjusted = self.builder.build_int_add(
            second,
            i32_type.const_int(value as u64, true),
            "adjusted",
        )?;
        self.builder.build_store(slot, adjusted)?;

        Ok(())
    }

    fn emit_multiply_second(&mut self, value: u32) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();

        let slot = self.load_second_slot()?;
        let second = self
            .builder
            .build_load(slot, "second")?
            .into_int_value();
        let scaled = self.builder.build_int_nuw_mul(
            second,
            i32_type.const_int(u64::from(value), false),
            "scaled",
        )?;
        self.builder.build_store(slot, scaled)?;

        Ok(())
    }

    /// Drops the cell below the cached top by retreating the cursor.
    fn emit_pop_second(&mut self) -> CodegenResult<()> {
        let top = self
            .builder
            .build_load(self.stack_top, "top")?
            .into_int_value();
        let lowered = self.second_slot_index(top)?;
        self.builder.build_store(self.stack_top, lowered)?;

        Ok(())
    }

    /// Inserts a known value below the cached top: the cell at `top` is
    /// free, so writing it and advancing the cursor makes it the new second.
    fn emit_push_second(&mut self, value: u32) -> CodegenResult<()> {
        let i32_type = self.context.i32_type();
        let i64_type = self.context.i64_type();

        let top = self
            .builder
            .build_load(self.stack_top, "top")?
            .into_int_value();
        let slot = self.stack_slot(top)?;
        self.builder
            .build_store(slot, i32_type.const_int(u64::from(value), false))?;

        let raised = self
            .builder
            .build_int_add(top, i64_type.const_int(1, false), "top_next")?;
        let wrapped = self.wrap_index(raised)?;
        self.builder.build_store(self.stack_top, wrapped)?;

        Ok(())
    }

    fn emit_push_to_bottom(&mut self, value: u32) -> CodegenResult<()> {
        let value = self.context.i32_type().const_int(u64::from(value), false);
        self.emit_bottom_write(value)
    }

    fn emit_set_second(&mut self, value: u32) -> CodegenResult<()> {
        let slot = self.load_second_slot()?;
        self.builder.build_store(
            slot,
            self.context.i32_type().const_int(u64::from(value), false),
        )?;
        Ok(())
    }

    fn emit_set_top(&mut self, value: u32) -> CodegenResult<()> {
        self.builder.build_store(
            self.top_value,
            self.context.i32_type().const_int(u64::from(value), false),
        )?;
        Ok(())
    }

    // Cursor and slot helpers.

    /// Writes `value` into `stack[bottom]` and retreats the bottom cursor.
    fn emit_bottom_write(&mut self, value: IntValue<'ctx>) -> CodegenResult<()> {
        let i64_type = self.context.i64_type();

        let bottom = self
            .builder
            .build_load(self.stack_bottom, "bottom")?
            .into_int_value();
        let slot = self.stack_slot(bottom)?;
        self.builder.build_store(slot, value)?;

        let lowered =
            self.builder
                .build_int_sub(bottom, i64_type.const_int(1, false), "bottom_prev")?;
        let wrapped = self.wrap_index(lowered)?;
        self.builder.build_store(self.stack_bottom, wrapped)?;

        Ok(())
    }

    /// `(top - 1) mod 2^16`, the index of the cell below the cached top.
    fn second_slot_index(&mut self, top: IntValue<'ctx>) -> CodegenResult<IntValue<'ctx>> {
        let one = self.context.i64_type().const_int(1, false);
        let lowered = self.builder.build_int_sub(top, one, "second_index")?;
        self.wrap_index(lowered)
    }

    fn load_second_slot(&mut self) -> CodegenResult<PointerValue<'ctx>> {
        let top = self
            .builder
            .build_load(self.stack_top, "top")?
            .into_int_value();
        let second = self.second_slot_index(top)?;
        self.stack_slot(second)
    }

    /// Masks a cursor back into the buffer after a wrapping step.
    fn wrap_index(&mut self, index: IntValue<'ctx>) -> CodegenResult<IntValue<'ctx>> {
        let mask = self.context.i64_type().const_int(INDEX_MASK, false);
        Ok(self.builder.build_and(index, mask, "wrapped")?)
    }

    /// A pointer to `stack[index]`.
    fn stack_slot(&mut self, index: IntValue<'ctx>) -> CodegenResult<PointerValue<'ctx>> {
        let zero = self.context.i64_type().const_int(0, false);
        let slot = unsafe {
            self.builder.build_in_bounds_gep(
                self.stack.as_pointer_value(),
                &[zero, index],
                "slot",
            )?
        };
        Ok(slot)
    }
}
