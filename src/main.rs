// main.rs — 窗口与事件循环：加载线程、输入分发、逐帧绘制

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // 在 Release 模式下隐藏控制台窗口

use anyhow::Context;
use clap::Parser;
use panoview::config::{Cli, ViewerConfig};
use panoview::error::LoadError;
use panoview::i18n::{self, tr, tr_with};
use panoview::mapping::{Frame, MappingStrategy};
use panoview::renderer::{Renderer, TileSurface};
use panoview::source::{load_panorama, LoadTracker, Panorama, PixelBuffer};
use panoview::tiles::{Installed, TiledImage};
use panoview::viewer::{PanoramaViewer, ViewerAction};

use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use winit::{
    dpi::LogicalSize,
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

/// Decoded image tagged with the generation of the request that produced it.
type LoadMessage = (u64, Result<Panorama, LoadError>);

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "ppm", "pnm", "pgm"];

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = ViewerConfig::resolve(&cli).unwrap_or_else(|e| {
        log::error!("{}, using defaults", e);
        let mut cfg = ViewerConfig::default();
        cfg.apply_cli(&cli);
        cfg
    });
    i18n::init(&cfg.lang);

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(tr("app.title"))
        .with_inner_size(LogicalSize::new(cfg.window_width, cfg.window_height))
        .build(&event_loop)
        .context("cannot create window")?;

    let mut renderer = pollster::block_on(Renderer::new(&window, cfg.sphere_sampling))
        .context("cannot initialize the graphics device")?;

    let size = window.inner_size();
    let mut viewer = PanoramaViewer::new(&cfg, size.width.max(1), size.height.max(1));
    viewer.set_analytic_available(renderer.analytic_available());

    let mut image: TiledImage<TileSurface> = TiledImage::default();
    let max_tile = renderer.max_tile_size();
    if cfg.tile_size > max_tile {
        log::warn!("tile size {} exceeds device limit, using {}", cfg.tile_size, max_tile);
    }
    if let Err(e) = image.set_tile_size(cfg.tile_size.min(max_tile)) {
        log::warn!("{}, keeping tile size {}", e, image.tile_size());
    }
    install_placeholder(&mut image, &mut renderer);

    // 异步加载通道；只安装最后一次请求的结果
    let (tx, rx): (Sender<LoadMessage>, Receiver<LoadMessage>) = channel();
    let mut loads = LoadTracker::default();
    if let Some(path) = cli.image {
        start_load_image(path, &mut loads, tx.clone());
    }

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        // 检查是否有新加载的图片；分块只在主循环里重建
        while let Ok((generation, result)) = rx.try_recv() {
            if loads.finish(generation) {
                install_panorama(result, &mut image, &mut renderer, &window);
            }
        }

        match event {
            Event::WindowEvent { event, .. } => {
                // 先让 egui 处理事件
                let response = renderer.egui_state.on_event(&renderer.egui_ctx, &event);
                if response.consumed {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }

                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                        viewer.resize(new_size.width, new_size.height);
                    }

                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        renderer.resize(*new_inner_size);
                        viewer.resize(new_inner_size.width, new_inner_size.height);
                    }

                    WindowEvent::KeyboardInput { input, .. } => {
                        if input.state != ElementState::Pressed {
                            return;
                        }
                        let Some(key) = input.virtual_keycode else {
                            return;
                        };
                        match viewer.handle_key(key) {
                            ViewerAction::Quit => *control_flow = ControlFlow::Exit,
                            ViewerAction::OpenDialog => {
                                if let Some(path) = rfd::FileDialog::new()
                                    .add_filter(&tr("file.filter.images"), IMAGE_EXTENSIONS)
                                    .pick_file()
                                {
                                    start_load_image(path, &mut loads, tx.clone());
                                }
                            }
                            ViewerAction::None => {}
                        }
                    }

                    WindowEvent::MouseInput { state, button, .. } => {
                        viewer.mouse_button(button, state);
                    }

                    WindowEvent::CursorMoved { position, .. } => {
                        viewer.cursor_moved(position.x, position.y);
                    }

                    WindowEvent::DroppedFile(path) => {
                        start_load_image(path, &mut loads, tx.clone());
                    }

                    _ => {}
                }
            }

            Event::RedrawRequested(_) => {
                viewer.tick();

                let frame = Frame::describe(viewer.strategy(), &viewer.camera, &image);
                let render_result = renderer.render_with_ui(&window, &frame, |ctx| {
                    draw_overlay(ctx, &viewer, &image, loads.is_loading());
                });

                match render_result {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.resize(renderer.size),
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("out of GPU memory");
                        *control_flow = ControlFlow::Exit;
                    }
                    Err(e) => log::warn!("render error: {:?}", e),
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            Event::LoopDestroyed => {
                image.cleanup(&mut renderer);
            }

            _ => {}
        }
    });
}

fn start_load_image(path: PathBuf, loads: &mut LoadTracker, tx: Sender<LoadMessage>) {
    let generation = loads.begin();
    thread::spawn(move || {
        log::info!("loading {} in background", path.display());
        if tx.send((generation, load_panorama(&path))).is_err() {
            log::error!("main loop is gone, dropping {}", path.display());
        }
    });
}

fn install_placeholder(image: &mut TiledImage<TileSurface>, renderer: &mut Renderer) {
    if let Err(e) = image.load(PixelBuffer::placeholder(), renderer) {
        log::error!("cannot tile placeholder: {}", e);
    }
}

fn install_panorama(
    result: Result<Panorama, LoadError>,
    image: &mut TiledImage<TileSurface>,
    renderer: &mut Renderer,
    window: &Window,
) {
    match image.install(result, renderer) {
        Installed::Panorama(path) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            window.set_title(&format!("{} - {}", tr("app.title"), name));
        }
        Installed::Placeholder => window.set_title(&tr("app.title")),
        Installed::Kept => {}
    }
}

fn draw_overlay(
    ctx: &egui::Context,
    viewer: &PanoramaViewer,
    image: &TiledImage<TileSurface>,
    is_loading: bool,
) {
    if !viewer.show_text {
        return;
    }

    let mut lines = Vec::new();
    if let Some(fps) = viewer.fps.fps() {
        lines.push(tr_with("overlay.fps", &[("fps", fps.to_string())]));
    }
    if is_loading {
        lines.push(tr("overlay.loading"));
    }

    if viewer.show_help {
        for key in ["help.pitch", "help.yaw", "help.fov", "help.help"] {
            lines.push(tr(key));
        }
        let compat = if viewer.strategy() == MappingStrategy::Tessellated {
            tr("state.on")
        } else {
            tr("state.off")
        };
        lines.push(tr_with("help.strategy", &[("state", compat)]));
        for key in ["help.text", "help.open", "help.mouse"] {
            lines.push(tr(key));
        }

        lines.push(tr_with(
            "overlay.strategy",
            &[("name", tr(viewer.strategy().label_key()))],
        ));
        lines.push(tr_with(
            "overlay.fov",
            &[("fov", format!("{:.0}", viewer.camera.fov()))],
        ));
        lines.push(tr_with(
            "overlay.image",
            &[
                ("w", image.width().to_string()),
                ("h", image.height().to_string()),
                ("tx", image.num_tiles_x().to_string()),
                ("ty", image.num_tiles_y().to_string()),
                ("size", image.tile_size().to_string()),
            ],
        ));
        lines.push(tr_with(
            "overlay.coverage",
            &[
                ("az", format!("{:.1}", image.azimuth())),
                ("el", format!("{:.1}", image.elevation())),
            ],
        ));
    } else {
        lines.push(tr("overlay.press_h"));
    }

    let painter = ctx.layer_painter(egui::LayerId::new(
        egui::Order::Foreground,
        egui::Id::new("overlay"),
    ));
    let font = egui::FontId::proportional(14.0);
    let mut pos = egui::pos2(10.0, 10.0);
    for line in lines {
        let rect = painter.text(
            pos,
            egui::Align2::LEFT_TOP,
            line,
            font.clone(),
            egui::Color32::WHITE,
        );
        pos.y += rect.height() + 2.0;
    }
}
