// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Maxwell Macro Executor (MME) interpreter.
//!
//! Runs one macro program against a [`MacroProcessor`]. Code memory and slot
//! bindings belong to [`crate::macro_engine::MacroEngine`]; the interpreter
//! borrows the code for the duration of a call.
//!
//! ## Instruction word
//!
//! | Bits  | Field                                             |
//! |-------|---------------------------------------------------|
//! | 2:0   | Operation                                         |
//! | 6:4   | Result operation (bit 4 = branch condition, bit 5 = annul) |
//! | 7     | Exit after the next instruction                   |
//! | 10:8  | Destination register                              |
//! | 13:11 | Source register A                                 |
//! | 16:14 | Source register B                                 |
//! | 31:14 | Signed immediate                                  |
//! | 21:17 | ALU operation / bitfield source bit               |
//! | 26:22 | Bitfield size                                     |
//! | 31:27 | Bitfield destination bit                          |
//!
//! Taken branches and exits both have a delay slot: the instruction after
//! them runs before control moves. An annulled branch skips its slot.

/// Register access for a running macro. The command processor adapts the
/// engine that owns the macro call (3D or 2D) to this trait.
pub trait MacroProcessor {
    fn macro_read(&self, method: u32) -> u32;
    fn macro_write(&mut self, method: u32, value: u32);
}

/// Upper bound on executed instructions per call. A macro that never reaches
/// an exit instruction is cut off here.
pub const MAX_MACRO_STEPS: usize = 1 << 20;

// ── Decoding ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    AddWithCarry,
    Subtract,
    SubtractWithBorrow,
    Xor,
    Or,
    And,
    AndNot,
    Nand,
}

impl AluOp {
    fn decode(raw: u32) -> Self {
        match raw {
            0 => Self::Add,
            1 => Self::AddWithCarry,
            2 => Self::Subtract,
            3 => Self::SubtractWithBorrow,
            8 => Self::Xor,
            9 => Self::Or,
            10 => Self::And,
            11 => Self::AndNot,
            12 => Self::Nand,
            _ => {
                log::warn!("Macro: unknown ALU operation {}, using add", raw);
                Self::Add
            }
        }
    }
}

/// What happens to an instruction's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOp {
    IgnoreAndFetch,
    Move,
    MoveAndSetMethod,
    FetchAndSend,
    MoveAndSend,
    FetchAndSetMethod,
    MoveAndSetMethodFetchAndSend,
    MoveAndSetMethodSend,
}

impl ResultOp {
    fn decode(raw: u32) -> Self {
        match raw & 7 {
            0 => Self::IgnoreAndFetch,
            1 => Self::Move,
            2 => Self::MoveAndSetMethod,
            3 => Self::FetchAndSend,
            4 => Self::MoveAndSend,
            5 => Self::FetchAndSetMethod,
            6 => Self::MoveAndSetMethodFetchAndSend,
            _ => Self::MoveAndSetMethodSend,
        }
    }
}

/// Bitfield operand of the extract instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitfield {
    pub src_bit: u32,
    pub size: u32,
    pub dst_bit: u32,
}

impl Bitfield {
    fn mask(&self) -> u32 {
        (1u32 << self.size).wrapping_sub(1)
    }
}

/// Operation-specific part of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Alu(AluOp),
    AddImmediate,
    ExtractInsert(Bitfield),
    /// Shift amount taken from register A, destination bit from the field.
    ExtractShiftLeftImmediate(Bitfield),
    /// Source bit from the field, shift amount taken from register A.
    ExtractShiftLeftRegister(Bitfield),
    Read,
    Branch { if_zero: bool, annul: bool },
    Unused,
}

/// A decoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub operation: Operation,
    pub result: ResultOp,
    pub exit: bool,
    pub dst: usize,
    pub src_a: usize,
    pub src_b: usize,
    pub immediate: i32,
}

impl Instruction {
    pub fn decode(word: u32) -> Self {
        let field = |shift: u32, bits: u32| (word >> shift) & ((1 << bits) - 1);
        let bitfield = Bitfield {
            src_bit: field(17, 5),
            size: field(22, 5),
            dst_bit: field(27, 5),
        };
        let operation = match word & 7 {
            0 => Operation::Alu(AluOp::decode(field(17, 5))),
            1 => Operation::AddImmediate,
            2 => Operation::ExtractInsert(bitfield),
            3 => Operation::ExtractShiftLeftImmediate(bitfield),
            4 => Operation::ExtractShiftLeftRegister(bitfield),
            5 => Operation::Read,
            6 => Operation::Unused,
            _ => Operation::Branch {
                if_zero: field(4, 1) == 0,
                annul: field(5, 1) != 0,
            },
        };
        Self {
            operation,
            result: ResultOp::decode(field(4, 3)),
            exit: field(7, 1) != 0,
            dst: field(8, 3) as usize,
            src_a: field(11, 3) as usize,
            src_b: field(14, 3) as usize,
            // Sign-extend bits 31:14.
            immediate: (word as i32) >> 14,
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────────

/// How control continues after an instruction.
enum Flow {
    Next,
    Jump { target: u32, delay_slot: bool },
    Exit,
}

/// Method register written by sends: bits 11:0 address, bits 17:12
/// increment applied after every send.
#[derive(Debug, Clone, Copy, Default)]
struct MethodCursor(u32);

impl MethodCursor {
    fn address(self) -> u32 {
        self.0 & 0xFFF
    }

    fn advance(&mut self) {
        let increment = (self.0 >> 12) & 0x3F;
        let address = (self.address() + increment) & 0xFFF;
        self.0 = (self.0 & !0xFFF) | address;
    }
}

pub struct MacroInterpreter {
    /// `$r0` reads as zero and ignores writes.
    registers: [u32; 8],
    carry: bool,
    method: MethodCursor,
    params: Vec<u32>,
    next_param: usize,
    steps: usize,
}

impl Default for MacroInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroInterpreter {
    pub fn new() -> Self {
        Self {
            registers: [0; 8],
            carry: false,
            method: MethodCursor::default(),
            params: Vec::new(),
            next_param: 0,
            steps: 0,
        }
    }

    /// Run the program starting at word `start` of `code`.
    ///
    /// `params[0]` is preloaded into `$r1`; the rest are consumed in order by
    /// the fetching result operations. Fetches past the end read zero.
    pub fn execute(
        &mut self,
        code: &[u32],
        start: u32,
        params: &[u32],
        processor: &mut dyn MacroProcessor,
    ) {
        self.registers = [0; 8];
        self.registers[1] = params.first().copied().unwrap_or(0);
        self.carry = false;
        self.method = MethodCursor::default();
        self.params.clear();
        self.params.extend_from_slice(params);
        self.next_param = 1;
        self.steps = 0;

        let mut pc = start;
        loop {
            if self.steps >= MAX_MACRO_STEPS {
                log::warn!(
                    "Macro at 0x{:X}: aborted after {} instructions without exit",
                    start,
                    self.steps
                );
                break;
            }
            let insn = Instruction::decode(fetch(code, pc));
            match self.run(&insn, pc, processor) {
                Flow::Next => pc = pc.wrapping_add(1),
                Flow::Jump {
                    target,
                    delay_slot,
                } => {
                    if delay_slot {
                        self.run_delay_slot(code, pc.wrapping_add(1), processor);
                    }
                    pc = target;
                }
                Flow::Exit => {
                    self.run_delay_slot(code, pc.wrapping_add(1), processor);
                    break;
                }
            }
        }

        if self.next_param < self.params.len() {
            log::trace!(
                "Macro at 0x{:X}: used {} of {} parameters",
                start,
                self.next_param,
                self.params.len()
            );
        }
    }

    /// The instruction after a taken branch or exit. Its own branch and exit
    /// bits are ignored.
    fn run_delay_slot(&mut self, code: &[u32], pc: u32, processor: &mut dyn MacroProcessor) {
        let insn = Instruction::decode(fetch(code, pc));
        if let Operation::Branch { .. } = insn.operation {
            self.steps += 1;
            log::warn!("Macro: branch in delay slot at 0x{:X} ignored", pc);
            return;
        }
        self.run(&insn, pc, processor);
    }

    fn run(&mut self, insn: &Instruction, pc: u32, processor: &mut dyn MacroProcessor) -> Flow {
        self.steps += 1;
        let a = self.reg(insn.src_a);
        let b = self.reg(insn.src_b);

        let result = match insn.operation {
            Operation::Alu(op) => self.alu(op, a, b),
            Operation::AddImmediate => a.wrapping_add_signed(insn.immediate),
            Operation::ExtractInsert(bf) => {
                let mask = bf.mask();
                let bits = (b >> bf.src_bit) & mask;
                (a & !(mask << bf.dst_bit)) | (bits << bf.dst_bit)
            }
            Operation::ExtractShiftLeftImmediate(bf) => {
                (b.wrapping_shr(a) & bf.mask()) << bf.dst_bit
            }
            Operation::ExtractShiftLeftRegister(bf) => {
                ((b >> bf.src_bit) & bf.mask()).wrapping_shl(a)
            }
            Operation::Read => processor.macro_read(a.wrapping_add_signed(insn.immediate)),
            Operation::Branch { if_zero, annul } => {
                if (a == 0) == if_zero {
                    return Flow::Jump {
                        target: pc.wrapping_add_signed(insn.immediate),
                        delay_slot: !annul,
                    };
                }
                return if insn.exit { Flow::Exit } else { Flow::Next };
            }
            Operation::Unused => {
                log::warn!("Macro: unused operation at 0x{:X}", pc);
                return if insn.exit { Flow::Exit } else { Flow::Next };
            }
        };

        self.apply_result(insn.result, insn.dst, result, processor);
        if insn.exit {
            Flow::Exit
        } else {
            Flow::Next
        }
    }

    fn apply_result(
        &mut self,
        op: ResultOp,
        dst: usize,
        result: u32,
        processor: &mut dyn MacroProcessor,
    ) {
        match op {
            ResultOp::IgnoreAndFetch => {
                let param = self.fetch_param();
                self.set_reg(dst, param);
            }
            ResultOp::Move => self.set_reg(dst, result),
            ResultOp::MoveAndSetMethod => {
                self.set_reg(dst, result);
                self.method = MethodCursor(result);
            }
            ResultOp::FetchAndSend => {
                let param = self.fetch_param();
                self.set_reg(dst, param);
                self.send(result, processor);
            }
            ResultOp::MoveAndSend => {
                self.set_reg(dst, result);
                self.send(result, processor);
            }
            ResultOp::FetchAndSetMethod => {
                let param = self.fetch_param();
                self.set_reg(dst, param);
                self.method = MethodCursor(result);
            }
            ResultOp::MoveAndSetMethodFetchAndSend => {
                self.set_reg(dst, result);
                self.method = MethodCursor(result);
                let param = self.fetch_param();
                self.send(param, processor);
            }
            ResultOp::MoveAndSetMethodSend => {
                self.set_reg(dst, result);
                self.method = MethodCursor(result);
                self.send((result >> 12) & 0x3F, processor);
            }
        }
    }

    /// ALU result, updating the carry flag for the arithmetic operations.
    /// Subtraction leaves carry set when no borrow occurred.
    fn alu(&mut self, op: AluOp, a: u32, b: u32) -> u32 {
        match op {
            AluOp::Add => {
                let (sum, carry) = a.overflowing_add(b);
                self.carry = carry;
                sum
            }
            AluOp::AddWithCarry => {
                let (partial, c1) = a.overflowing_add(b);
                let (sum, c2) = partial.overflowing_add(self.carry as u32);
                self.carry = c1 || c2;
                sum
            }
            AluOp::Subtract => {
                let (diff, borrow) = a.overflowing_sub(b);
                self.carry = !borrow;
                diff
            }
            AluOp::SubtractWithBorrow => {
                let (partial, b1) = a.overflowing_sub(b);
                let (diff, b2) = partial.overflowing_sub((!self.carry) as u32);
                self.carry = !(b1 || b2);
                diff
            }
            AluOp::Xor => a ^ b,
            AluOp::Or => a | b,
            AluOp::And => a & b,
            AluOp::AndNot => a & !b,
            AluOp::Nand => !(a & b),
        }
    }

    fn send(&mut self, value: u32, processor: &mut dyn MacroProcessor) {
        processor.macro_write(self.method.address(), value);
        self.method.advance();
    }

    fn reg(&self, index: usize) -> u32 {
        if index == 0 {
            0
        } else {
            self.registers[index & 7]
        }
    }

    fn set_reg(&mut self, index: usize, value: u32) {
        if index != 0 {
            self.registers[index & 7] = value;
        }
    }

    fn fetch_param(&mut self) -> u32 {
        match self.params.get(self.next_param) {
            Some(&value) => {
                self.next_param += 1;
                value
            }
            None => {
                log::warn!("Macro: parameter {} fetched past the end", self.next_param);
                0
            }
        }
    }
}

/// Code memory wraps like the hardware RAM.
fn fetch(code: &[u32], pc: u32) -> u32 {
    if code.is_empty() {
        return 0;
    }
    code[pc as usize % code.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Register file with a log of macro writes.
    #[derive(Default)]
    struct Regs {
        values: std::collections::HashMap<u32, u32>,
        writes: Vec<(u32, u32)>,
    }

    impl MacroProcessor for Regs {
        fn macro_read(&self, method: u32) -> u32 {
            self.values.get(&method).copied().unwrap_or(0)
        }
        fn macro_write(&mut self, method: u32, value: u32) {
            self.values.insert(method, value);
            self.writes.push((method, value));
        }
    }

    // Result operations.
    const FETCH: u32 = 0;
    const MOVE: u32 = 1;
    const SET_METHOD: u32 = 2;
    const FETCH_SEND: u32 = 3;
    const SEND: u32 = 4;
    const FETCH_SET_METHOD: u32 = 5;
    const SET_METHOD_FETCH_SEND: u32 = 6;
    const SET_METHOD_SEND: u32 = 7;

    const NOP: u32 = 0;

    fn word(op: u32, result: u32, exit: bool, dst: u32, a: u32) -> u32 {
        op | (result << 4) | ((exit as u32) << 7) | (dst << 8) | (a << 11)
    }

    fn alu(alu_op: u32, result: u32, exit: bool, dst: u32, a: u32, b: u32) -> u32 {
        word(0, result, exit, dst, a) | (b << 14) | (alu_op << 17)
    }

    fn addi(result: u32, exit: bool, dst: u32, a: u32, imm: i32) -> u32 {
        word(1, result, exit, dst, a) | (((imm as u32) & 0x3FFFF) << 14)
    }

    fn read(dst: u32, a: u32, imm: i32) -> u32 {
        word(5, MOVE, false, dst, a) | (((imm as u32) & 0x3FFFF) << 14)
    }

    fn branch(if_zero: bool, annul: bool, a: u32, offset: i32) -> u32 {
        let bits = (!if_zero as u32) | ((annul as u32) << 1);
        word(7, bits, false, 0, a) | (((offset as u32) & 0x3FFFF) << 14)
    }

    fn bitfield(op: u32, dst: u32, a: u32, b: u32, src_bit: u32, size: u32, dst_bit: u32) -> u32 {
        word(op, MOVE, false, dst, a) | (b << 14) | (src_bit << 17) | (size << 22) | (dst_bit << 27)
    }

    fn run(code: &[u32], params: &[u32]) -> Regs {
        let mut regs = Regs::default();
        MacroInterpreter::new().execute(code, 0, params, &mut regs);
        regs
    }

    /// Program suffix that sends `$r{reg}` to method 0x100 and exits.
    fn report(reg: u32) -> [u32; 3] {
        [
            addi(SET_METHOD, false, 0, 0, 0x100),
            addi(SEND, true, 0, reg, 0),
            NOP,
        ]
    }

    fn program(body: &[u32], reg: u32) -> Vec<u32> {
        let mut code = body.to_vec();
        code.extend_from_slice(&report(reg));
        code
    }

    #[test]
    fn test_decode_fields() {
        let insn = Instruction::decode(alu(9, SEND, true, 3, 5, 6));
        assert_eq!(insn.operation, Operation::Alu(AluOp::Or));
        assert_eq!(insn.result, ResultOp::MoveAndSend);
        assert!(insn.exit);
        assert_eq!((insn.dst, insn.src_a, insn.src_b), (3, 5, 6));

        assert_eq!(Instruction::decode(addi(MOVE, false, 1, 0, -3)).immediate, -3);
        assert_eq!(
            Instruction::decode(branch(false, true, 2, 4)).operation,
            Operation::Branch {
                if_zero: false,
                annul: true
            }
        );
        assert_eq!(Instruction::decode(6).operation, Operation::Unused);
    }

    #[test]
    fn test_first_param_preloaded() {
        assert_eq!(run(&report(1), &[0xBEEF]).writes, vec![(0x100, 0xBEEF)]);
    }

    #[test]
    fn test_add_sets_carry() {
        let code = program(
            &[
                addi(MOVE, false, 2, 0, -1),
                alu(0, MOVE, false, 3, 2, 2),
                // $r4 = 0 + 0 + carry
                alu(1, MOVE, false, 4, 0, 0),
            ],
            4,
        );
        assert_eq!(run(&code, &[]).writes, vec![(0x100, 1)]);
    }

    #[test]
    fn test_subtract_borrow_chain() {
        // 5 - 7 borrows, so the borrowing subtract takes one more: 9 - 2 - 1.
        let code = program(
            &[
                addi(MOVE, false, 2, 0, 5),
                addi(MOVE, false, 3, 0, 7),
                alu(2, MOVE, false, 4, 2, 3),
                addi(MOVE, false, 5, 0, 9),
                addi(MOVE, false, 6, 0, 2),
                alu(3, MOVE, false, 7, 5, 6),
            ],
            7,
        );
        assert_eq!(run(&code, &[]).writes, vec![(0x100, 6)]);
    }

    #[test]
    fn test_logic_ops() {
        let cases = [(8, 0b0110), (9, 0b1110), (10, 0b1000), (11, 0b0100), (12, !0b1000)];
        for (op, expected) in cases {
            let code = program(
                &[
                    addi(MOVE, false, 2, 0, 0b1100),
                    addi(MOVE, false, 3, 0, 0b1010),
                    alu(op, MOVE, false, 4, 2, 3),
                ],
                4,
            );
            assert_eq!(run(&code, &[]).writes, vec![(0x100, expected as u32)], "op {}", op);
        }
    }

    #[test]
    fn test_r0_is_zero() {
        let code = program(&[addi(MOVE, false, 0, 0, 55), alu(0, MOVE, false, 2, 0, 0)], 2);
        assert_eq!(run(&code, &[]).writes, vec![(0x100, 0)]);
    }

    #[test]
    fn test_fetch_params_in_order() {
        let code = program(
            &[
                addi(FETCH, false, 2, 0, 0),
                addi(FETCH, false, 3, 0, 0),
                alu(2, MOVE, false, 4, 2, 3),
            ],
            4,
        );
        assert_eq!(run(&code, &[0, 50, 8]).writes, vec![(0x100, 42)]);
    }

    #[test]
    fn test_fetch_past_end_reads_zero() {
        let code = program(&[addi(FETCH, false, 2, 0, 0), addi(FETCH, false, 2, 0, 0)], 2);
        assert_eq!(run(&code, &[1, 2]).writes, vec![(0x100, 0)]);
    }

    #[test]
    fn test_method_increment() {
        // Method 0x200, increment 2.
        let code = [
            addi(SET_METHOD, false, 0, 0, 0x2200),
            addi(SEND, false, 0, 0, 7),
            addi(SEND, false, 0, 0, 8),
            addi(SEND, true, 0, 0, 9),
            NOP,
        ];
        assert_eq!(
            run(&code, &[]).writes,
            vec![(0x200, 7), (0x202, 8), (0x204, 9)]
        );
    }

    #[test]
    fn test_fetch_and_send_variants() {
        let code = [
            addi(SET_METHOD, false, 0, 0, 0x1300),
            // Sends the immediate, keeps the fetched param.
            addi(FETCH_SEND, false, 2, 0, 0x11),
            addi(SEND, false, 0, 2, 0),
            // Method 0x310 from the result, param from the queue.
            addi(FETCH_SET_METHOD, false, 3, 0, 0x310),
            addi(SEND, false, 0, 3, 0),
            addi(SET_METHOD_FETCH_SEND, false, 0, 0, 0x320),
            // Sends the increment field of the new method.
            addi(SET_METHOD_SEND, true, 0, 0, 0x5330),
            NOP,
        ];
        assert_eq!(
            run(&code, &[0, 0xA, 0xB, 0xC]).writes,
            vec![
                (0x300, 0x11),
                (0x301, 0xA),
                (0x310, 0xB),
                (0x320, 0xC),
                (0x330, 5)
            ]
        );
    }

    #[test]
    fn test_read_register() {
        let mut regs = Regs::default();
        regs.values.insert(0x45, 0x1234);
        let code = program(&[read(2, 1, 5)], 2);
        MacroInterpreter::new().execute(&code, 0, &[0x40], &mut regs);
        assert_eq!(regs.writes, vec![(0x100, 0x1234)]);
    }

    #[test]
    fn test_bitfield_ops() {
        let cases = [
            // Insert bits 7:4 of 0xAB at bit 8 of 0xF00F.
            (bitfield(2, 3, 1, 2, 4, 4, 8), 0xFA0F),
            // (0xAB >> 4) & 0xF, then << 8.
            (bitfield(3, 3, 4, 2, 0, 4, 8), 0xA00),
            // (0xAB >> 4) & 0xF, then << 4.
            (bitfield(4, 3, 4, 2, 4, 4, 0), 0xA0),
        ];
        for (insn, expected) in cases {
            let code = program(
                &[
                    addi(MOVE, false, 2, 0, 0xAB),
                    addi(MOVE, false, 4, 0, 4),
                    insn,
                ],
                3,
            );
            assert_eq!(run(&code, &[0xF00F]).writes, vec![(0x100, expected)]);
        }
    }

    #[test]
    fn test_shift_amount_uses_low_five_bits() {
        // A shift of 36 behaves like a shift of 4.
        let cases = [
            (bitfield(3, 3, 4, 2, 0, 4, 8), 0xA00),
            (bitfield(4, 3, 4, 2, 4, 4, 0), 0xA0),
        ];
        for (insn, expected) in cases {
            let code = program(
                &[
                    addi(MOVE, false, 2, 0, 0xAB),
                    addi(MOVE, false, 4, 0, 36),
                    insn,
                ],
                3,
            );
            assert_eq!(run(&code, &[]).writes, vec![(0x100, expected)]);
        }
    }

    #[test]
    fn test_exit_runs_delay_slot() {
        let code = [
            addi(SET_METHOD, false, 0, 0, 0x100),
            addi(SEND, true, 0, 0, 1),
            addi(SEND, false, 0, 0, 2),
            addi(SEND, false, 0, 0, 3),
        ];
        assert_eq!(run(&code, &[]).writes, vec![(0x100, 1), (0x101, 2)]);
    }

    #[test]
    fn test_branch_delay_slot_and_annul() {
        // Taken branch over one instruction; the delay slot still runs.
        let delayed = [
            addi(SET_METHOD, false, 0, 0, 0x100),
            branch(true, false, 0, 3),
            addi(SEND, false, 0, 0, 1),
            addi(SEND, false, 0, 0, 2),
            addi(SEND, true, 0, 0, 3),
            NOP,
        ];
        assert_eq!(run(&delayed, &[]).writes, vec![(0x100, 1), (0x101, 3)]);

        let mut annulled = delayed;
        annulled[1] = branch(true, true, 0, 3);
        assert_eq!(run(&annulled, &[]).writes, vec![(0x100, 3)]);
    }

    #[test]
    fn test_branch_not_taken() {
        let code = [
            addi(SET_METHOD, false, 0, 0, 0x100),
            branch(false, false, 0, 3),
            addi(SEND, true, 0, 0, 1),
            NOP,
            addi(SEND, true, 0, 0, 9),
            NOP,
        ];
        assert_eq!(run(&code, &[]).writes, vec![(0x100, 1)]);
    }

    #[test]
    fn test_loop_over_params() {
        // Send $r1 params, counting down in $r2.
        let code = [
            addi(MOVE, false, 2, 1, 0),
            addi(SET_METHOD, false, 0, 0, 0x1500),
            // loop:
            addi(FETCH, false, 3, 0, 0),
            addi(SEND, false, 0, 3, 0),
            addi(MOVE, false, 2, 2, -1),
            branch(false, true, 2, -3),
            addi(MOVE, true, 0, 0, 0),
            NOP,
        ];
        assert_eq!(
            run(&code, &[3, 10, 20, 30]).writes,
            vec![(0x500, 10), (0x501, 20), (0x502, 30)]
        );
    }

    #[test]
    fn test_start_offset_and_code_wrap() {
        let mut code = vec![NOP; 8];
        code[6] = addi(SET_METHOD, false, 0, 0, 0x100);
        code[7] = addi(SEND, false, 0, 1, 0);
        code[0] = addi(SEND, true, 0, 1, 1);
        let mut regs = Regs::default();
        MacroInterpreter::new().execute(&code, 6, &[4], &mut regs);
        assert_eq!(regs.writes, vec![(0x100, 4), (0x101, 5)]);
    }

    #[test]
    fn test_missing_exit_is_bounded() {
        let code = [addi(MOVE, false, 2, 2, 1)];
        assert!(run(&code, &[]).writes.is_empty());
    }
}
