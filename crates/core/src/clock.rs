//! # クロック
//!
//! CPUとPPUを1:3で駆動するフレームシーケンサ。1命令実行するごとに
//! 消費サイクル数の3倍だけPPUを進め、PPUのNMIエッジは次の命令境界で
//! CPUへ渡す。`run_frame` はPPUのフレームカウンタが進むまで回る。

use crate::cartridge::Cartridge;
use crate::cpu::Cpu;
use crate::error::Result;

/// CPU 1サイクルあたりのPPUドット数
const PPU_DOTS_PER_CPU_CYCLE: u32 = 3;

pub struct Clock {
    cpu: Cpu,
}

impl Clock {
    pub fn new() -> Self {
        Clock { cpu: Cpu::new() }
    }

    /// カートリッジを接続してリセットする
    pub fn insert_cartridge(&mut self, cartridge: Cartridge) {
        self.cpu.bus.attach_cartridge(cartridge);
        self.reset();
    }

    /// CPUリセット（リセットベクタの再読込）。PPUのカウンタは保持される。
    pub fn reset(&mut self) {
        self.cpu.reset();
    }

    /// ちょうど1フレーム実行してピクセルバッファを返す
    pub fn run_frame(&mut self) -> Result<&[u8]> {
        let frame = self.cpu.bus.ppu.frame();
        while self.cpu.bus.ppu.frame() == frame {
            self.step()?;
        }
        Ok(self.cpu.bus.ppu.frame_buffer())
    }

    /// 1命令ぶん進める。NMI転送 → CPU step → PPUを3n駆動。
    pub fn step(&mut self) -> Result<u32> {
        if self.cpu.bus.ppu.take_nmi() {
            self.cpu.nmi();
        }
        let cycles = self.cpu.step()?;
        for _ in 0..cycles * PPU_DOTS_PER_CPU_CYCLE {
            self.cpu.bus.ppu.step();
        }
        Ok(cycles)
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
