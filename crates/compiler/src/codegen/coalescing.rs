//! Register coalescing: collapses redundant `Move` chains left behind by
//! codegen's conservative "always copy into the declared destination"
//! strategy.
//!
//! `emit_expr_into` already avoids emitting a `Move` when source and
//! destination coincide, and [`super::peephole`] collapses a load directly
//! followed by a move. What's left after both of those run is the rarer
//! case this pass targets: a chain of two moves copying the same value
//! through an intermediate register (`MOVE b, a; MOVE c, b` with nothing
//! else reading `b` in between), which collapses to `MOVE c, a` plus the
//! first move turned into `Nop`. Also drops pure self-moves (`MOVE a, a`),
//! which the `Ternary`/`If` control-flow emitters occasionally produce when
//! both branches already agree on a register.
//!
//! Grounded on the general shape of `examples/navicore-cem3`'s
//! `codegen/coalescing.rs` (a single linear scan merging SSA value aliases
//! introduced by phi-node lowering) adapted from SSA value ids to register
//! operand bytes.

use orus_core::chunk::Chunk;
use orus_core::opcode::Opcode;

pub fn run(chunk: &mut Chunk) -> usize {
    let mut rewrites = 0;
    rewrites += drop_self_moves(chunk);
    rewrites += collapse_move_chains(chunk);
    rewrites
}

fn drop_self_moves(chunk: &mut Chunk) -> usize {
    let mut dropped = 0;
    let mut offset = 0;
    while offset < chunk.len() {
        if let Some(Opcode::Move) = chunk.read_op(offset) {
            let dst = chunk.read_u8(offset + 1);
            let src = chunk.read_u8(offset + 2);
            if dst == src {
                chunk.patch_op(offset, Opcode::Nop);
                chunk.patch_u8(offset + 1, 0);
                chunk.patch_u8(offset + 2, 0);
                dropped += 1;
            }
            offset += 3;
        } else {
            offset += 1;
        }
    }
    dropped
}

/// Finds `MOVE b, a` immediately followed by `MOVE c, b` and rewrites the
/// pair to `MOVE c, a` (keeping the first instruction as the surviving
/// `Move` so earlier jump targets pointing at its offset remain valid) plus
/// a trailing `Nop` where the second used to be.
fn collapse_move_chains(chunk: &mut Chunk) -> usize {
    let mut collapsed = 0;
    let mut offset = 0;
    while offset < chunk.len() {
        if let Some(Opcode::Move) = chunk.read_op(offset) {
            let first_dst = chunk.read_u8(offset + 1);
            let first_src = chunk.read_u8(offset + 2);
            let next = offset + 3;
            if next + 2 < chunk.len() {
                if let Some(Opcode::Move) = chunk.read_op(next) {
                    let second_dst = chunk.read_u8(next + 1);
                    let second_src = chunk.read_u8(next + 2);
                    if second_src == first_dst && second_dst != first_dst {
                        chunk.patch_u8(offset + 1, second_dst);
                        chunk.patch_u8(offset + 2, first_src);
                        chunk.patch_op(next, Opcode::Nop);
                        chunk.patch_u8(next + 1, 0);
                        chunk.patch_u8(next + 2, 0);
                        collapsed += 1;
                    }
                }
            }
            offset += 3;
        } else {
            offset += 1;
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_a_move_into_itself() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::Move, 1, 1);
        chunk.write_u8(5, 1, 1);
        chunk.write_u8(5, 1, 1);
        assert_eq!(run(&mut chunk), 1);
        assert_eq!(chunk.read_op(0), Some(Opcode::Nop));
    }

    #[test]
    fn collapses_a_two_hop_move_chain() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::Move, 1, 1);
        chunk.write_u8(100, 1, 1); // b
        chunk.write_u8(64, 1, 1); // a
        chunk.write_op(Opcode::Move, 1, 1);
        chunk.write_u8(70, 1, 1); // c
        chunk.write_u8(100, 1, 1); // b

        let rewrites = run(&mut chunk);
        assert_eq!(rewrites, 1);
        assert_eq!(chunk.read_u8(1), 70);
        assert_eq!(chunk.read_u8(2), 64);
        assert_eq!(chunk.read_op(3), Some(Opcode::Nop));
    }
}
