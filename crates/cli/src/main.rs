//! # FamiCore CLI
//!
//! SDL2を使用したデスクトップ版フロントエンド

use anyhow::Result;
use clap::Parser;
use famicore_core::{Button, Nes, SCREEN_HEIGHT, SCREEN_WIDTH};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use std::path::PathBuf;

/// NESエミュレータ CLI
#[derive(Parser, Debug)]
#[command(name = "famicore")]
#[command(about = "NES emulator", long_about = None)]
struct Args {
    /// ROMファイルのパス
    #[arg(value_name = "ROM")]
    rom_path: PathBuf,

    /// スケールファクタ（デフォルト: 3）
    #[arg(short, long, default_value = "3")]
    scale: u32,

    /// デバッグモード
    #[arg(short, long)]
    debug: bool,
}

fn keymap(keycode: Keycode) -> Option<Button> {
    match keycode {
        Keycode::Z => Some(Button::A),
        Keycode::X => Some(Button::B),
        Keycode::Space => Some(Button::Select),
        Keycode::Return => Some(Button::Start),
        Keycode::Up => Some(Button::Up),
        Keycode::Down => Some(Button::Down),
        Keycode::Left => Some(Button::Left),
        Keycode::Right => Some(Button::Right),
        _ => None,
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // ROMの読み込み
    let rom_data = std::fs::read(&args.rom_path)?;
    log::info!("Loaded ROM: {:?}", args.rom_path);

    // NESの初期化
    let mut nes = Nes::new();
    nes.load_rom(&rom_data)?;

    // SDL2の初期化
    let sdl_context = sdl2::init().map_err(|e| anyhow::anyhow!(e))?;
    let video_subsystem = sdl_context.video().map_err(|e| anyhow::anyhow!(e))?;

    let window_width = SCREEN_WIDTH as u32 * args.scale;
    let window_height = SCREEN_HEIGHT as u32 * args.scale;

    let window = video_subsystem
        .window("famicore", window_width, window_height)
        .position_centered()
        .build()?;

    let mut canvas = window.into_canvas().build()?;
    let texture_creator = canvas.texture_creator();

    let mut texture = texture_creator
        .create_texture_streaming(
            PixelFormatEnum::RGBA32,
            SCREEN_WIDTH as u32,
            SCREEN_HEIGHT as u32,
        )
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut event_pump = sdl_context.event_pump().map_err(|e| anyhow::anyhow!(e))?;

    log::info!("Starting emulation...");

    'running: loop {
        // イベント処理
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => break 'running,
                Event::KeyDown {
                    keycode: Some(keycode),
                    ..
                } => {
                    if args.debug {
                        log::debug!("Key pressed: {:?}", keycode);
                    }
                    if let Some(button) = keymap(keycode) {
                        nes.set_button(button, true);
                    }
                }
                Event::KeyUp {
                    keycode: Some(keycode),
                    ..
                } => {
                    if let Some(button) = keymap(keycode) {
                        nes.set_button(button, false);
                    }
                }
                _ => {}
            }
        }

        // 1フレーム実行
        match nes.run_frame() {
            Ok(frame_buffer) => {
                // フレームバッファをテクスチャに転送
                texture
                    .update(None, frame_buffer, SCREEN_WIDTH * 4)
                    .map_err(|e| anyhow::anyhow!(e))?;

                canvas.clear();
                canvas
                    .copy(&texture, None, None)
                    .map_err(|e| anyhow::anyhow!(e))?;
                canvas.present();
            }
            Err(e) => {
                // 未実装オペコードは致命的。ループを止めて通知する。
                log::error!("Emulation error: {}", e);
                break 'running;
            }
        }

        // フレームレート制限（約60 FPS）
        std::thread::sleep(std::time::Duration::from_millis(16));
    }

    log::info!("Emulation stopped");
    Ok(())
}
