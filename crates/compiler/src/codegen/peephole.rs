//! Load+move collapse: the one peephole rewrite `spec.md` §5 names
//! explicitly. `CodeGenerator::emit_expr_into` already emits straight into
//! its destination register for most expression kinds, but an
//! `Identifier` read followed immediately by nothing else still goes
//! through a `Move` when the source and destination registers differ; this
//! pass additionally collapses the still-common `LOAD_* dst, k` followed by
//! `MOVE dst2, dst` pattern produced when an expression is evaluated into a
//! temporary and then copied into its final home.
//!
//! Grounded on `examples/navicore-cem3`'s `codegen/peephole.rs`, which
//! walks the emitted instruction stream once and rewrites adjacent
//! redundant pairs in place; here the unit is a register-operand bytecode
//! stream instead of LLVM IR text lines.

use orus_core::chunk::Chunk;
use orus_core::opcode::Opcode;

/// Instructions whose only operand after the destination register is a
/// 16-bit immediate (a constant pool index), i.e. the `LOAD_*_CONST`/`LOAD_NIL`
/// family this pass knows how to retarget in place.
fn load_operand_width(op: Opcode) -> Option<usize> {
    match op {
        Opcode::LoadConst | Opcode::LoadI32Const | Opcode::LoadI64Const | Opcode::LoadF64Const => Some(2),
        Opcode::LoadNil => Some(0),
        Opcode::LoadBool => Some(1),
        _ => None,
    }
}

/// Scans `chunk`'s code for a `LOAD_* dst` immediately followed by
/// `MOVE dst2, dst` with no intervening use of `dst`, and retargets the
/// load to write `dst2` directly, turning the pair into a single
/// instruction (the `MOVE` is replaced with `Nop`s rather than removed, so
/// every later jump offset recorded against a byte position stays valid).
pub fn run(chunk: &mut Chunk) -> usize {
    let mut collapsed = 0;
    let mut offset = 0;
    while offset < chunk.len() {
        let Some(op) = chunk.read_op(offset) else { break };
        let Some(width) = load_operand_width(op) else {
            offset += 1 + instruction_width(op);
            continue;
        };
        let dst_offset = offset + 1;
        let dst = chunk.read_u8(dst_offset);
        let next = offset + 2 + width;
        if next + 2 < chunk.len() {
            if let Some(Opcode::Move) = chunk.read_op(next) {
                let move_dst = chunk.read_u8(next + 1);
                let move_src = chunk.read_u8(next + 2);
                if move_src == dst {
                    chunk.patch_u8(dst_offset, move_dst);
                    chunk.patch_op(next, Opcode::Nop);
                    chunk.patch_u8(next + 1, 0);
                    chunk.patch_u8(next + 2, 0);
                    collapsed += 1;
                }
            }
        }
        offset += 1 + width + 1;
    }
    collapsed
}

/// Operand byte width (excluding the opcode byte itself) for the fixed-size
/// instructions this pass needs to skip over without retargeting.
fn instruction_width(op: Opcode) -> usize {
    match op {
        Opcode::Move => 2,
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Eq
        | Opcode::NotEq
        | Opcode::Lt
        | Opcode::LtEq
        | Opcode::Gt
        | Opcode::GtEq
        | Opcode::And
        | Opcode::Or => 3,
        Opcode::Neg | Opcode::Not => 2,
        Opcode::Jump | Opcode::Loop => 2,
        Opcode::JumpIfFalse => 3,
        Opcode::Call => 3,
        Opcode::Return => 1,
        Opcode::ReturnNil | Opcode::Nop | Opcode::Halt => 0,
        Opcode::Print => 1,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_a_load_immediately_followed_by_a_move() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::LoadI32Const, 1, 1);
        chunk.write_u8(200, 1, 1); // dst = temp 200
        chunk.write_u16(0, 1, 1); // constant index
        chunk.write_op(Opcode::Move, 1, 1);
        chunk.write_u8(70, 1, 1); // move dst = local 70
        chunk.write_u8(200, 1, 1); // move src = temp 200

        let collapsed = run(&mut chunk);
        assert_eq!(collapsed, 1);
        assert_eq!(chunk.read_u8(1), 70);
        assert_eq!(chunk.read_op(5), Some(Opcode::Nop));
    }

    #[test]
    fn leaves_unrelated_moves_untouched() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::LoadNil, 1, 1);
        chunk.write_u8(200, 1, 1);
        chunk.write_op(Opcode::Move, 1, 1);
        chunk.write_u8(70, 1, 1);
        chunk.write_u8(5, 1, 1); // src is not 200, no collapse

        let collapsed = run(&mut chunk);
        assert_eq!(collapsed, 0);
    }
}
