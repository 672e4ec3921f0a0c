//! Classic BPF filter programs as carried in a mirror request.

use crate::error::FilterParseError;

/// Encoded size of one [`FilterInstruction`].
pub const INSTRUCTION_LEN: usize = 8;

/// Largest program the kernel accepts (BPF_MAXINSNS).
pub const MAX_INSTRUCTIONS: u32 = 4096;

// Opcode pieces needed to build the drop-all program
const BPF_RET: u16 = 0x06;
const BPF_K: u16 = 0x00;

/// A single classic BPF instruction.
///
/// Same field layout as the kernel's `struct sock_filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterInstruction {
    pub opcode: u16,
    pub jump_true: u8,
    pub jump_false: u8,
    pub immediate: u32,
}

impl FilterInstruction {
    pub const fn new(opcode: u16, jump_true: u8, jump_false: u8, immediate: u32) -> Self {
        Self {
            opcode,
            jump_true,
            jump_false,
            immediate,
        }
    }

    pub fn encode(&self) -> [u8; INSTRUCTION_LEN] {
        let mut buf = [0u8; INSTRUCTION_LEN];
        buf[0..2].copy_from_slice(&self.opcode.to_be_bytes());
        buf[2] = self.jump_true;
        buf[3] = self.jump_false;
        buf[4..8].copy_from_slice(&self.immediate.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; INSTRUCTION_LEN]) -> Self {
        Self {
            opcode: u16::from_be_bytes([buf[0], buf[1]]),
            jump_true: buf[2],
            jump_false: buf[3],
            immediate: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// An ordered filter program.
///
/// Not validated here apart from its length; the kernel rejects programs
/// that do not verify when they are attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterProgram {
    instructions: Vec<FilterInstruction>,
}

impl FilterProgram {
    pub fn new(instructions: Vec<FilterInstruction>) -> Self {
        Self { instructions }
    }

    /// `ret #0`: reject every packet.
    pub fn drop_all() -> Self {
        Self::new(vec![FilterInstruction::new(BPF_RET | BPF_K, 0, 0, 0)])
    }

    pub fn instructions(&self) -> &[FilterInstruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Parse the output of `tcpdump -ddd`.
    ///
    /// The first line holds the instruction count, every following line one
    /// instruction as four decimal numbers: `code jt jf k`.
    pub fn parse_ddd(text: &str) -> Result<Self, FilterParseError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (line, header) = lines.next().ok_or(FilterParseError::Empty)?;
        let declared: usize = header.parse().map_err(|_| FilterParseError::Malformed {
            line,
            detail: format!("expected instruction count, got '{}'", header),
        })?;

        let mut instructions = Vec::with_capacity(declared.min(MAX_INSTRUCTIONS as usize));
        for (line, text) in lines {
            instructions.push(parse_instruction(line, text)?);
        }

        if instructions.len() != declared {
            return Err(FilterParseError::CountMismatch {
                declared,
                actual: instructions.len(),
            });
        }
        if instructions.is_empty() {
            return Err(FilterParseError::Empty);
        }

        Ok(Self::new(instructions))
    }
}

fn parse_instruction(line: usize, text: &str) -> Result<FilterInstruction, FilterParseError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(FilterParseError::Malformed {
            line,
            detail: format!("expected 4 fields, got {}", fields.len()),
        });
    }

    let bad = |what: &str, value: &str| FilterParseError::Malformed {
        line,
        detail: format!("invalid {} '{}'", what, value),
    };

    Ok(FilterInstruction {
        opcode: fields[0].parse().map_err(|_| bad("opcode", fields[0]))?,
        jump_true: fields[1].parse().map_err(|_| bad("jt", fields[1]))?,
        jump_false: fields[2].parse().map_err(|_| bad("jf", fields[2]))?,
        immediate: fields[3].parse().map_err(|_| bad("k", fields[3]))?,
    })
}
