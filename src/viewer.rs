// viewer.rs — 视图状态与交互 (相机 + 开关 + 导航模式)

use crate::camera::{Camera, ViewPort};
use crate::config::ViewerConfig;
use crate::mapping::MappingStrategy;
use crate::math::{DVec2, DVec3};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use winit::event::{ElementState, MouseButton, VirtualKeyCode};

pub const MIN_FOV: f64 = 1.0;
pub const MAX_FOV: f64 = 179.0;

/// Keyboard pitch step (radians).
const KEY_PITCH_STEP: f64 = PI / 10.0;
/// Keyboard step around the world up axis (radians).
const KEY_ROTATE_STEP: f64 = 0.1;
/// Drag gain, scaled by the current fov.
const DRAG_GAIN: f64 = 2.6 / 360.0 * PI;
/// Fly-mode divisor applied to the press offset per frame.
const FLY_DAMPING: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationMode {
    #[default]
    None,
    Drag,
    Fly,
}

/// What the window loop has to do after an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerAction {
    None,
    OpenDialog,
    Quit,
}

/// Frames counted over one second, published once per second.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    frames: u32,
    fps: Option<u32>,
    last: Instant,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self {
            frames: 0,
            fps: None,
            last: Instant::now(),
        }
    }
}

impl FpsCounter {
    pub fn frame(&mut self) {
        self.frame_at(Instant::now());
    }

    pub fn frame_at(&mut self, now: Instant) {
        self.frames += 1;
        if now.duration_since(self.last) > Duration::from_secs(1) {
            self.fps = Some(self.frames);
            self.frames = 0;
            self.last = now;
        }
    }

    /// `None` until the first full second has passed.
    pub fn fps(&self) -> Option<u32> {
        self.fps
    }
}

pub struct PanoramaViewer {
    pub camera: Camera,
    strategy: MappingStrategy,
    analytic_available: bool,
    force_tessellated: bool,
    pub show_text: bool,
    pub show_help: bool,
    nav: NavigationMode,
    mouse_pos: DVec2,
    mouse_press: DVec2,
    screen: (u32, u32),
    pub fps: FpsCounter,
}

impl PanoramaViewer {
    /// Camera at the sphere center, looking along world +Y with Z up.
    pub fn new(cfg: &ViewerConfig, width: u32, height: u32) -> Self {
        let mut camera = Camera::new();
        camera.setup_pinhole(
            ViewPort::new(0.0, 0.0, width as f64, height as f64),
            cfg.znear,
            cfg.zfar,
            cfg.fov.clamp(MIN_FOV, MAX_FOV),
        );
        camera.set_position(DVec3::ZERO);
        camera.set_orientation(DVec3::X, DVec3::Z, DVec3::NEG_Y);

        Self {
            camera,
            strategy: MappingStrategy::Tessellated,
            analytic_available: false,
            force_tessellated: cfg.force_tessellated,
            show_text: true,
            show_help: false,
            nav: NavigationMode::None,
            mouse_pos: DVec2::ZERO,
            mouse_press: DVec2::ZERO,
            screen: (width, height),
            fps: FpsCounter::default(),
        }
    }

    pub fn strategy(&self) -> MappingStrategy {
        self.strategy
    }

    pub fn analytic_available(&self) -> bool {
        self.analytic_available
    }

    /// Records the backend capability and picks the strategy from it.
    pub fn set_analytic_available(&mut self, available: bool) -> MappingStrategy {
        self.analytic_available = available;
        self.strategy = MappingStrategy::select(available, self.force_tessellated);
        if !available {
            log::warn!("per-fragment mapping unavailable, using tessellated patches");
        }
        log::info!("render mode: {:?}", self.strategy);
        self.strategy
    }

    pub fn toggle_strategy(&mut self) -> MappingStrategy {
        self.strategy = self.strategy.toggled(self.analytic_available);
        log::info!("render mode: {:?}", self.strategy);
        self.strategy
    }

    pub fn navigation(&self) -> NavigationMode {
        self.nav
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    /// Zero-sized (minimized) windows are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        log::debug!("new window size: {}x{}", width, height);
        self.screen = (width, height);
        self.camera
            .change_viewport(ViewPort::new(0.0, 0.0, width as f64, height as f64));
    }

    pub fn set_fov(&mut self, fov: f64) {
        self.camera.change_fov(fov.clamp(MIN_FOV, MAX_FOV));
    }

    /// Key press or repeat.
    pub fn handle_key(&mut self, key: VirtualKeyCode) -> ViewerAction {
        let up = DVec3::Z;
        match key {
            VirtualKeyCode::W => self.camera.pitch(KEY_PITCH_STEP),
            VirtualKeyCode::S => self.camera.pitch(-KEY_PITCH_STEP),
            VirtualKeyCode::A => self.camera.rotate_axis(up, KEY_ROTATE_STEP),
            VirtualKeyCode::D => self.camera.rotate_axis(up, -KEY_ROTATE_STEP),
            VirtualKeyCode::Q => self.set_fov(self.camera.fov() - 1.0),
            VirtualKeyCode::E => self.set_fov(self.camera.fov() + 1.0),
            VirtualKeyCode::Space => self.show_text = !self.show_text,
            VirtualKeyCode::H => self.show_help = !self.show_help,
            VirtualKeyCode::C => {
                self.toggle_strategy();
            }
            VirtualKeyCode::O => return ViewerAction::OpenDialog,
            VirtualKeyCode::Escape => return ViewerAction::Quit,
            _ => {}
        }
        ViewerAction::None
    }

    pub fn mouse_button(&mut self, button: MouseButton, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.mouse_press = self.mouse_pos;
                match button {
                    MouseButton::Left => self.nav = NavigationMode::Drag,
                    MouseButton::Right => self.nav = NavigationMode::Fly,
                    _ => {}
                }
            }
            ElementState::Released => self.nav = NavigationMode::None,
        }
    }

    pub fn cursor_moved(&mut self, x: f64, y: f64) {
        let pos = DVec2::new(x, y);
        if self.nav == NavigationMode::Drag {
            let (w, h) = self.screen;
            let delta = (pos - self.mouse_pos) / DVec2::new(w as f64, h as f64);
            let gain = DRAG_GAIN * self.camera.fov();
            self.camera.pitch(delta.y * gain);
            self.camera.rotate_axis(DVec3::Z, delta.x * gain);
        }
        self.mouse_pos = pos;
    }

    /// Per-frame update: FPS and fly-mode motion.
    pub fn tick(&mut self) {
        self.fps.frame();
        if self.nav == NavigationMode::Fly {
            let (w, h) = self.screen;
            let delta = (self.mouse_press - self.mouse_pos)
                / DVec2::new(w as f64 * FLY_DAMPING, h as f64 * FLY_DAMPING);
            self.camera.pitch(delta.y);
            self.camera.rotate_axis(DVec3::Z, delta.x);
        }
    }
}
