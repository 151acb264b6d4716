// renderer.rs — wgpu 渲染器：分块纹理、两条管线 (细分面片 / 逐片元映射)、egui 叠加层

use crate::error::RendererError;
use crate::mapping::{tessellate_tile, Frame, PatchVertex, TileDraw, QUAD_INDICES};
use crate::tiles::{TileBackend, TileInfo};
use std::path::PathBuf;
use wgpu::util::DeviceExt;
use winit::window::Window;

fn setup_overlay_fonts(ctx: &egui::Context) {
    // 叠加层字体：egui 自带字体只覆盖拉丁字符，
    // 语言覆盖文件里出现中日韩文字时需要一个系统字体兜底。
    // ab_glyph 对 .ttc 支持不稳定，解析失败的候选直接跳过。

    fn try_load_font(path: &std::path::Path) -> Option<Vec<u8>> {
        let bytes = std::fs::read(path).ok()?;
        ab_glyph::FontRef::try_from_slice(&bytes).ok()?;
        Some(bytes)
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if cfg!(windows) {
        let win_fonts = PathBuf::from(r"C:\Windows\Fonts");
        for f in ["msyh.ttf", "simhei.ttf", "simsun.ttf", "Deng.ttf", "meiryo.ttf"] {
            candidates.push(win_fonts.join(f));
        }
    } else if cfg!(target_os = "macos") {
        for f in [
            "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
            "/Library/Fonts/NotoSansSC-Regular.otf",
            "/System/Library/Fonts/Hiragino Sans GB.ttc",
        ] {
            candidates.push(PathBuf::from(f));
        }
    } else if cfg!(unix) {
        for f in [
            "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
            "/usr/share/fonts/truetype/noto/NotoSansCJK-Regular.ttc",
            "/usr/share/fonts/truetype/noto/NotoSansSC-Regular.ttf",
            "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
            "/usr/share/fonts/truetype/wqy/wqy-zenhei.ttc",
        ] {
            candidates.push(PathBuf::from(f));
        }
    }
    // assets 目录优先级最低，便于打包时自带字体
    for f in ["NotoSansSC-Regular.otf", "NotoSansSC-Regular.ttf", "NotoSansCJK-Regular.ttc"] {
        if let Some(p) = crate::config::find_asset(std::path::Path::new(f)) {
            candidates.push(p);
        }
    }

    let Some((path, bytes)) = candidates
        .into_iter()
        .find_map(|p| try_load_font(&p).map(|b| (p, b)))
    else {
        log::debug!("no CJK font found, overlay uses egui defaults");
        return;
    };
    log::info!("overlay font: {}", path.display());

    let mut fonts = egui::FontDefinitions::default();
    fonts
        .font_data
        .insert("ui".to_owned(), egui::FontData::from_owned(bytes));
    // 作为后备字体追加，拉丁字符仍用 egui 默认字体
    if let Some(family) = fonts.families.get_mut(&egui::FontFamily::Proportional) {
        family.push("ui".to_owned());
    }
    ctx.set_fonts(fonts);
}

/// GPU resources of one tile: texture, its bind group, and the patch mesh.
pub struct TileSurface {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    boundary_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    num_indices: u32,
}

pub struct Renderer {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,

    patch_pipeline: wgpu::RenderPipeline,
    analytic_pipeline: Option<wgpu::RenderPipeline>,
    sphere_sampling: u32,

    // 分块纹理资源
    tile_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    // Uniform 资源
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,

    // 逐片元映射共用的屏幕四边形
    quad_vertex_buffer: wgpu::Buffer,
    quad_index_buffer: wgpu::Buffer,

    // UI
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Renderer {
    pub async fn new(window: &Window, sphere_sampling: u32) -> Result<Self, RendererError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // Safety: the window outlives the renderer; both live for the whole event loop.
        let surface = unsafe { instance.create_surface(window) }?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RendererError::NoAdapter)?;
        log::info!("adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    label: None,
                },
                None,
            )
            .await?;
        log::info!(
            "maximum texture size: {}",
            device.limits().max_texture_dimension_2d
        );

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        // --- 1. Sampler ---
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tile_sampler"),
            address_mode_u: wgpu::AddressMode::MirrorRepeat,
            address_mode_v: wgpu::AddressMode::MirrorRepeat,
            address_mode_w: wgpu::AddressMode::MirrorRepeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // --- 2. Camera uniform (group 0) ---
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[[[0.0f32; 4]; 4]]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("camera_bind_group_layout"),
            });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        // --- 3. Tile texture + boundary (group 1) ---
        let tile_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        // Texture
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        // Sampler
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        // Boundary (xmin, xmax, ymin, ymax)
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
                label: Some("tile_bind_group_layout"),
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tile Pipeline Layout"),
            bind_group_layouts: &[&camera_bind_group_layout, &tile_bind_group_layout],
            push_constant_ranges: &[],
        });

        // --- 4. Pipelines ---
        let patch_shader = device.create_shader_module(wgpu::include_wgsl!("shaders/patch.wgsl"));
        let patch_pipeline = create_pipeline(
            &device,
            &pipeline_layout,
            &patch_shader,
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<PatchVertex>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2],
            },
            config.format,
            "Patch Pipeline",
        );

        // 逐片元映射在部分后端上可能编译失败，失败时退回细分面片
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let analytic_shader =
            device.create_shader_module(wgpu::include_wgsl!("shaders/analytic.wgsl"));
        let analytic = create_pipeline(
            &device,
            &pipeline_layout,
            &analytic_shader,
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![0 => Float32x3],
            },
            config.format,
            "Analytic Pipeline",
        );
        let analytic_pipeline = match device.pop_error_scope().await {
            None => Some(analytic),
            Some(e) => {
                log::warn!("per-fragment mapping pipeline failed: {}", e);
                None
            }
        };

        let quad_vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Screen Quad Vertices"),
            size: std::mem::size_of::<[[f32; 3]; 4]>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        // 6 个 u16 = 12 字节，满足 COPY_BUFFER_ALIGNMENT
        let quad_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Screen Quad Indices"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        // --- 5. Egui Setup ---
        let egui_ctx = egui::Context::default();
        setup_overlay_fonts(&egui_ctx);

        let mut egui_state = egui_winit::State::new(window);
        egui_state.set_pixels_per_point(window.scale_factor() as f32);

        let egui_renderer = egui_wgpu::Renderer::new(&device, config.format, None, 1);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            patch_pipeline,
            analytic_pipeline,
            sphere_sampling: sphere_sampling.max(1),
            tile_bind_group_layout,
            sampler,
            camera_buffer,
            camera_bind_group,
            quad_vertex_buffer,
            quad_index_buffer,
            egui_ctx,
            egui_state,
            egui_renderer,
        })
    }

    /// Whether the per-fragment mapping pipeline compiled on this device.
    pub fn analytic_available(&self) -> bool {
        self.analytic_pipeline.is_some()
    }

    /// Largest tile edge the device accepts.
    pub fn max_tile_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn render_with_ui(
        &mut self,
        window: &Window,
        frame: &Frame<'_, TileSurface>,
        run_ui: impl FnOnce(&egui::Context),
    ) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[frame.camera_uniform()]),
        );
        if let Some(quad) = frame.quad_vertices() {
            self.queue
                .write_buffer(&self.quad_vertex_buffer, 0, bytemuck::cast_slice(&quad));
        }
        // 每帧以 Frame 给出的边界为准
        for (surface, boundary) in frame.analytic_boundaries() {
            self.queue
                .write_buffer(&surface.boundary_buffer, 0, bytemuck::cast_slice(boundary));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        // 1. Render Scene
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);

            for draw in &frame.tiles {
                match draw {
                    TileDraw::Patch { surface } => {
                        render_pass.set_pipeline(&self.patch_pipeline);
                        render_pass.set_bind_group(1, &surface.bind_group, &[]);
                        render_pass.set_vertex_buffer(0, surface.vertex_buffer.slice(..));
                        render_pass.set_index_buffer(
                            surface.index_buffer.slice(..),
                            wgpu::IndexFormat::Uint32,
                        );
                        render_pass.draw_indexed(0..surface.num_indices, 0, 0..1);
                    }
                    TileDraw::Analytic { surface, .. } => {
                        let Some(pipeline) = &self.analytic_pipeline else {
                            continue;
                        };
                        render_pass.set_pipeline(pipeline);
                        render_pass.set_bind_group(1, &surface.bind_group, &[]);
                        render_pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
                        render_pass.set_index_buffer(
                            self.quad_index_buffer.slice(..),
                            wgpu::IndexFormat::Uint16,
                        );
                        render_pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
                    }
                }
            }
        }

        // 2. Render UI
        let raw_input = self.egui_state.take_egui_input(window);
        let full_output = self.egui_ctx.run(raw_input, run_ui);

        self.egui_state
            .handle_platform_output(window, &self.egui_ctx, full_output.platform_output);
        let clipped_primitives = self.egui_ctx.tessellate(full_output.shapes);

        let screen_descriptor = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer
                .render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    vertex_layout: wgpu::VertexBufferLayout<'_>,
    format: wgpu::TextureFormat,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: "vs_main",
            buffers: &[vertex_layout],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None, // 从球心向外看，两种绕序都可能出现
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None, // 分块互不重叠，无需深度缓冲
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    })
}

/// Tightly packed RGB to RGBA with opaque alpha.
fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .flat_map(|p| [p[0], p[1], p[2], 0xFF])
        .collect()
}

impl TileBackend for Renderer {
    type Surface = TileSurface;

    fn create_tile_surface(&mut self, info: &TileInfo, pixels: &[u8]) -> TileSurface {
        let texture_size = wgpu::Extent3d {
            width: info.width,
            height: info.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            label: Some("tile_texture"),
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgb_to_rgba(pixels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * info.width),
                rows_per_image: Some(info.height),
            },
            texture_size,
        );

        let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let boundary_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tile Boundary"),
                contents: bytemuck::cast_slice(&info.rect.to_uniform()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.tile_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: boundary_buffer.as_entire_binding(),
                },
            ],
            label: Some("tile_bind_group"),
        });

        let patch = tessellate_tile(&info.rect, self.sphere_sampling);
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tile Patch Vertices"),
                contents: bytemuck::cast_slice(&patch.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tile Patch Indices"),
                contents: bytemuck::cast_slice(&patch.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        log::debug!(
            "tile ({}, {}) {}x{} -> {:?}",
            info.tx,
            info.ty,
            info.width,
            info.height,
            info.rect
        );

        TileSurface {
            texture,
            bind_group,
            boundary_buffer,
            vertex_buffer,
            index_buffer,
            num_indices: patch.indices.len() as u32,
        }
    }

    fn release_surfaces(&mut self, surfaces: Vec<TileSurface>) {
        for s in surfaces {
            s.texture.destroy();
            s.boundary_buffer.destroy();
            s.vertex_buffer.destroy();
            s.index_buffer.destroy();
        }
    }
}
