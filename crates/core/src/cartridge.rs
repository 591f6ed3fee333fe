//! # カートリッジ
//!
//! iNES形式のROMイメージを解析し、PRG/CHRアクセスとネームテーブルの
//! ミラーリングを提供する。マッパーはNROM（マッパー0）のみ対応。

use crate::error::{NesError, Result};

const INES_MAGIC: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];
const HEADER_SIZE: usize = 16;
const TRAINER_SIZE: usize = 512;
const PRG_BANK_SIZE: usize = 16 * 1024;
const CHR_BANK_SIZE: usize = 8 * 1024;
const PRG_RAM_SIZE: usize = 8 * 1024;
const CHR_RAM_SIZE: usize = 8 * 1024;

/// ネームテーブルのミラーリングモード
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    SingleScreenLower,
    SingleScreenUpper,
    FourScreen,
}

/// カートリッジ。PRG/CHRバンクとカートリッジ上のRAMを所有する。
pub struct Cartridge {
    prg_banks: Vec<Vec<u8>>,
    chr_banks: Vec<Vec<u8>>,
    prg_ram: Vec<u8>,
    /// CHRバンクが無いROMのみ使用する
    chr_ram: Vec<u8>,
    mapper: u8,
    mirroring: Mirroring,
    battery: bool,
    trainer: bool,
}

impl Cartridge {
    /// iNESイメージからカートリッジを構築する
    pub fn new(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE || data[0..4] != INES_MAGIC {
            return Err(NesError::InvalidHeader);
        }

        let prg_count = data[4] as usize;
        let chr_count = data[5] as usize;
        let flags6 = data[6];
        let flags7 = data[7];

        let mapper = (flags7 & 0xF0) | (flags6 >> 4);
        let battery = (flags6 & 0x02) != 0;
        let trainer = (flags6 & 0x04) != 0;
        let mirroring = if (flags6 & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        let prg_start = HEADER_SIZE + if trainer { TRAINER_SIZE } else { 0 };
        let chr_start = prg_start + prg_count * PRG_BANK_SIZE;
        let expected = chr_start + chr_count * CHR_BANK_SIZE;
        if data.len() < expected {
            return Err(NesError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        if mapper != 0 {
            return Err(NesError::UnsupportedMapper(mapper));
        }

        let prg_banks = (0..prg_count)
            .map(|i| {
                let base = prg_start + i * PRG_BANK_SIZE;
                data[base..base + PRG_BANK_SIZE].to_vec()
            })
            .collect();
        let chr_banks: Vec<Vec<u8>> = (0..chr_count)
            .map(|i| {
                let base = chr_start + i * CHR_BANK_SIZE;
                data[base..base + CHR_BANK_SIZE].to_vec()
            })
            .collect();

        log::info!(
            "Cartridge: mapper {}, {} PRG bank(s), {} CHR bank(s), {:?} mirroring",
            mapper,
            prg_count,
            chr_count,
            mirroring
        );

        Ok(Cartridge {
            prg_banks,
            chr_banks,
            prg_ram: vec![0; PRG_RAM_SIZE],
            chr_ram: vec![0; CHR_RAM_SIZE],
            mapper,
            mirroring,
            battery,
            trainer,
        })
    }

    /// CPU側アドレス空間（$4020-$FFFF）の読み出し
    pub fn read_prg(&self, addr: u16) -> u8 {
        match self.mapper {
            0 => self.mapper0_read_prg(addr),
            _ => 0,
        }
    }

    /// CPU側アドレス空間への書き込み
    pub fn write_prg(&mut self, addr: u16, value: u8) {
        match self.mapper {
            0 => self.mapper0_write_prg(addr, value),
            _ => {}
        }
    }

    /// CHR（パターンテーブル）の読み出し。$2000以上はエラー。
    pub fn read_chr(&self, addr: u16) -> Result<u8> {
        if addr >= 0x2000 {
            return Err(NesError::InvalidChrAddress(addr));
        }
        match self.mapper {
            0 => Ok(self.mapper0_read_chr(addr)),
            _ => Ok(0),
        }
    }

    /// CHRへの書き込み。CHR-ROMへの書き込みは無視される。
    pub fn write_chr(&mut self, addr: u16, value: u8) -> Result<()> {
        if addr >= 0x2000 {
            return Err(NesError::InvalidChrAddress(addr));
        }
        match self.mapper {
            0 => self.mapper0_write_chr(addr, value),
            _ => {}
        }
        Ok(())
    }

    /// ネームテーブルアドレス（$2000-$2FFF相当）を物理VRAMオフセットへ
    /// 変換する。ミラーリングモードとアドレスのみの純関数。
    pub fn mirror_vram(&self, addr: u16) -> usize {
        let index = (addr as usize - 0x2000) & 0x0FFF;
        let table = index / 0x400;
        let offset = index & 0x03FF;
        let mapped = match self.mirroring {
            // {0,1}→A, {2,3}→B
            Mirroring::Horizontal => table / 2,
            // {0,2}→A, {1,3}→B
            Mirroring::Vertical => table & 1,
            Mirroring::SingleScreenLower => 0,
            Mirroring::SingleScreenUpper => 1,
            // 追加2枚はカートリッジ上のVRAMにある前提で恒等写像
            Mirroring::FourScreen => table,
        };
        mapped * 0x400 + offset
    }

    pub fn mapper(&self) -> u8 {
        self.mapper
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn battery(&self) -> bool {
        self.battery
    }

    pub fn trainer(&self) -> bool {
        self.trainer
    }

    // マッパー0（NROM）
    fn mapper0_read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[(addr - 0x6000) as usize],
            0x8000..=0xFFFF => {
                // 1バンクならミラー、2バンクなら線形
                let offset = (addr - 0x8000) as usize;
                let bank = (offset / PRG_BANK_SIZE) % self.prg_banks.len();
                self.prg_banks[bank][offset % PRG_BANK_SIZE]
            }
            _ => 0,
        }
    }

    fn mapper0_write_prg(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[(addr - 0x6000) as usize] = value,
            0x8000..=0xFFFF => {
                log::warn!("Dropped write to PRG-ROM: {:#06X} <- {:#04X}", addr, value);
            }
            _ => {}
        }
    }

    fn mapper0_read_chr(&self, addr: u16) -> u8 {
        let index = addr as usize;
        if self.chr_banks.is_empty() {
            self.chr_ram[index]
        } else {
            self.chr_banks[0][index]
        }
    }

    fn mapper0_write_chr(&mut self, addr: u16, value: u8) {
        // CHR-RAMのみ書き込み可能
        if self.chr_banks.is_empty() {
            self.chr_ram[addr as usize] = value;
        }
    }
}

/// テスト用のiNESイメージを組み立てる。
/// `sections` は (PRG内の配置先アドレス, バイト列) の組。
#[cfg(test)]
pub(crate) fn build_rom(
    prg_banks: u8,
    chr: &[u8],
    sections: &[(u16, &[u8])],
    vectors: (u16, u16, u16), // (NMI, RESET, IRQ)
) -> Vec<u8> {
    let prg_len = prg_banks as usize * PRG_BANK_SIZE;
    let mut prg = vec![0u8; prg_len];

    // PRGが1バンクの時は $C000-$FFFF が $8000-$BFFF のミラーになるので
    // ベクタはバンク末尾に置く
    let (nmi, reset, irq) = vectors;
    prg[prg_len - 6] = (nmi & 0xFF) as u8;
    prg[prg_len - 5] = (nmi >> 8) as u8;
    prg[prg_len - 4] = (reset & 0xFF) as u8;
    prg[prg_len - 3] = (reset >> 8) as u8;
    prg[prg_len - 2] = (irq & 0xFF) as u8;
    prg[prg_len - 1] = (irq >> 8) as u8;

    for (origin, bytes) in sections {
        let offset = (*origin as usize - 0x8000) % prg_len;
        prg[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    let chr_count = if chr.is_empty() { 0u8 } else { 1u8 };
    let mut rom = vec![
        0x4E, 0x45, 0x53, 0x1A, // "NES\x1A"
        prg_banks,
        chr_count,
        0x00, // flags6: horizontal mirroring
        0x00, // flags7
        0, 0, 0, 0, 0, 0, 0, 0,
    ];
    rom.extend_from_slice(&prg);
    if chr_count > 0 {
        let mut bank = chr.to_vec();
        bank.resize(CHR_BANK_SIZE, 0);
        rom.extend_from_slice(&bank);
    }
    rom
}

/// 1バンク・リセットベクタのみの簡易版
#[cfg(test)]
pub(crate) fn rom_with_program(origin: u16, program: &[u8]) -> Vec<u8> {
    build_rom(1, &[], &[(origin, program)], (origin, origin, origin))
}
