//! # FamiCore
//!
//! NESエミュレータのコアライブラリ。iNES形式のROMを読み込み、
//! `run_frame` ごとに256×240のRGBAピクセルバッファを生成する。
//! ウィンドウ表示・ファイルI/O・音声出力はホスト側の責務。

pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod clock;
pub mod controller;
pub mod cpu;
pub mod disasm;
pub mod error;
pub mod ppu;

pub use cartridge::{Cartridge, Mirroring};
pub use clock::Clock;
pub use controller::Button;
pub use error::{NesError, Result};
pub use ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// NESエミュレータのメインインスタンス
pub struct Nes {
    clock: Clock,
}

impl Nes {
    /// 新しいNESインスタンスを作成
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
        }
    }

    /// ROMをロードしてリセットする
    pub fn load_rom(&mut self, rom_data: &[u8]) -> Result<()> {
        let cartridge = Cartridge::new(rom_data)?;
        self.clock.insert_cartridge(cartridge);
        log::info!("ROM loaded, reset vector {:#06X}", self.clock.cpu().pc());
        Ok(())
    }

    /// システムをリセット
    pub fn reset(&mut self) {
        self.clock.reset();
    }

    /// 1フレーム実行してピクセルバッファを返す。
    /// バッファは次の呼び出しまで読み出せる。
    pub fn run_frame(&mut self) -> Result<&[u8]> {
        self.clock.run_frame()
    }

    /// 1命令実行（デバッグ用）。消費サイクル数を返す。
    pub fn step(&mut self) -> Result<u32> {
        self.clock.step()
    }

    /// コントローラーのボタン状態を注入する
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.clock.cpu_mut().bus.controller.set_button(button, pressed);
    }

    /// CPU状態の参照（デバッグ用）
    pub fn cpu(&self) -> &cpu::Cpu {
        self.clock.cpu()
    }

    /// 経過フレーム数
    pub fn frame_count(&self) -> u64 {
        self.clock.cpu().bus.ppu.frame()
    }

    /// 副作用なしのメモリ読み出し（デバッガ用）
    pub fn peek_memory(&self, addr: u16) -> u8 {
        self.clock.cpu().bus.peek(addr)
    }

    /// 現在のPCから `count` 命令を逆アセンブルする
    pub fn disassemble_at_pc(&self, count: usize) -> Vec<(u16, String)> {
        let pc = self.clock.cpu().pc();
        // 1命令は最大3バイト
        let bytes: Vec<u8> = (0..count as u16 * 3)
            .map(|i| self.peek_memory(pc.wrapping_add(i)))
            .collect();
        disasm::disassemble(&bytes, pc, count)
    }
}

impl Default for Nes {
    fn default() -> Self {
        Self::new()
    }
}
