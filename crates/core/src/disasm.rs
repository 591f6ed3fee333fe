//! # 逆アセンブラ
//!
//! CPUのデコードテーブルを使って命令列を読み下す。デバッグ表示用で、
//! 実行には関与しない。

use crate::cpu::{self, Mode};

/// モードごとのオペランド長（バイト数）
fn operand_len(mode: Mode) -> usize {
    match mode {
        Mode::Implied | Mode::Accumulator => 0,
        Mode::Immediate
        | Mode::ZeroPage
        | Mode::ZeroPageX
        | Mode::ZeroPageY
        | Mode::IndirectX
        | Mode::IndirectY
        | Mode::Relative => 1,
        Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect => 2,
    }
}

fn format_operand(mode: Mode, operand: &[u8], addr: u16) -> String {
    let byte = |i: usize| operand.get(i).copied().unwrap_or(0);
    let word = (byte(1) as u16) << 8 | byte(0) as u16;
    match mode {
        Mode::Implied => String::new(),
        Mode::Accumulator => " A".to_string(),
        Mode::Immediate => format!(" #${:02X}", byte(0)),
        Mode::ZeroPage => format!(" ${:02X}", byte(0)),
        Mode::ZeroPageX => format!(" ${:02X},X", byte(0)),
        Mode::ZeroPageY => format!(" ${:02X},Y", byte(0)),
        Mode::Absolute => format!(" ${:04X}", word),
        Mode::AbsoluteX => format!(" ${:04X},X", word),
        Mode::AbsoluteY => format!(" ${:04X},Y", word),
        Mode::Indirect => format!(" (${:04X})", word),
        Mode::IndirectX => format!(" (${:02X},X)", byte(0)),
        Mode::IndirectY => format!(" (${:02X}),Y", byte(0)),
        Mode::Relative => {
            // 分岐先は次命令からの相対
            let target = addr
                .wrapping_add(2)
                .wrapping_add(byte(0) as i8 as u16);
            format!(" ${:04X}", target)
        }
    }
}

/// `memory` を `origin` から `count` 命令ぶん読み下す。
/// 戻り値は (アドレス, ニーモニック) の列。未定義オペコードは
/// `.byte $xx` として1バイト進む。
pub fn disassemble(memory: &[u8], origin: u16, count: usize) -> Vec<(u16, String)> {
    let mut result = Vec::with_capacity(count);
    let mut offset = 0usize;

    for _ in 0..count {
        if offset >= memory.len() {
            break;
        }
        let addr = origin.wrapping_add(offset as u16);
        let opcode = memory[offset];

        match cpu::decode(opcode) {
            Some(entry) => {
                let len = operand_len(entry.mode);
                let operand = &memory[(offset + 1).min(memory.len())
                    ..(offset + 1 + len).min(memory.len())];
                let text = format!(
                    "{}{}",
                    entry.op.mnemonic(),
                    format_operand(entry.mode, operand, addr)
                );
                result.push((addr, text));
                offset += 1 + len;
            }
            None => {
                result.push((addr, format!(".byte ${:02X}", opcode)));
                offset += 1;
            }
        }
    }
    result
}
