//! Occlusion culling demo
//!
//! A field of cubes behind a wall of large blocks. Walking around the wall
//! shows objects being rejected by the depth pyramid and brought back by the
//! late pass.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use glfw::{Key, WindowEvent};

use gpu_engine::config::Config;
use gpu_engine::foundation::logging;
use gpu_engine::foundation::math::{deg_to_rad, look_at};
use gpu_engine::prelude::*;
use gpu_engine::scene::builder::cube_mesh;

/// Vertical field of view in degrees
const FOV_Y: f32 = 70.0;
const Z_NEAR: f32 = 0.1;
const MOVE_SPEED: f32 = 8.0;
const TURN_SPEED: f32 = 1.5;

#[derive(Parser, Debug)]
#[command(name = "scene_app", about = "GPU-driven culling demo")]
struct Args {
    /// TOML or RON application configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cubes along each side of the grid
    #[arg(long, default_value_t = 24)]
    grid: u32,

    /// Read the uploaded buffers back, compare them with the scene and exit
    #[arg(long)]
    verify_upload: bool,
}

/// Free-flying camera driven by WASD, Q/E and the arrow keys
struct FlyCamera {
    position: Vec3,
    yaw: f32,
    pitch: f32,
}

impl FlyCamera {
    fn new(position: Vec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: -0.2,
        }
    }

    fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.cos() * self.pitch.cos(),
        )
    }

    fn update(&mut self, window: &Window, dt: f32) {
        let turn = |negative: Key, positive: Key| {
            (window.is_key_down(positive) as i32 - window.is_key_down(negative) as i32) as f32
        };

        self.yaw += turn(Key::Left, Key::Right) * TURN_SPEED * dt;
        self.pitch = (self.pitch + turn(Key::Down, Key::Up) * TURN_SPEED * dt).clamp(-1.5, 1.5);

        let forward = self.forward();
        let right = Vec3::y().cross(&forward).normalize();
        let movement = forward * turn(Key::S, Key::W) + right * turn(Key::A, Key::D) + Vec3::y() * turn(Key::Q, Key::E);
        self.position += movement * MOVE_SPEED * dt;
    }

    fn view(&self) -> Mat4 {
        look_at(self.position, self.position + self.forward(), Vec3::y())
    }
}

fn build_scene(grid: u32, texture: u32) -> SceneData {
    let (vertices, indices) = cube_mesh();
    let mut builder = SceneBuilder::new();

    let floor_material = builder.add_material(Material {
        diffuse_color: [0.9, 0.9, 0.9, 1.0],
        diffuse_map: texture,
        specular_map: texture,
        ..Material::default()
    });
    let wall_material = builder.add_material(Material {
        diffuse_color: [0.6, 0.3, 0.2, 1.0],
        shininess: 4.0,
        diffuse_map: texture,
        specular_map: texture,
        ..Material::default()
    });

    let cube = builder.add_mesh(&vertices, &indices, floor_material);
    let block = builder.add_mesh(&vertices, &indices, wall_material);

    let half = grid as f32 * 1.5;
    for x in 0..grid {
        for z in 0..grid {
            let position = [x as f32 * 3.0 - half, 0.0, z as f32 * 3.0 + 12.0];
            builder.add_object(cube, MeshTransform::from_position(position));
        }
    }

    // Occluder row between the camera and the grid
    for i in 0..8 {
        let position = [i as f32 * 6.0 - 21.0, 2.0, 6.0];
        builder.add_object(block, MeshTransform::from_position(position).with_scale(6.0));
    }

    builder.build()
}

fn load_config(path: Option<&PathBuf>) -> Result<ApplicationConfig> {
    let config = match path {
        Some(path) => ApplicationConfig::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ApplicationConfig::new("scene_app"),
    };
    config.validate()?;
    Ok(config)
}

fn verify_upload(renderer: &VulkanRenderer, scene: &SceneData) -> Result<()> {
    let resources = renderer
        .scene_resources()
        .context("no scene resources after upload")?;

    let vertices = renderer.read_buffer(resources.buffers.vertices.buffer())?;
    let expected: &[u8] = bytemuck::cast_slice(&scene.vertices);
    if vertices.get(..expected.len()) != Some(expected) {
        bail!("vertex buffer does not match the uploaded scene");
    }

    let visibility = renderer.read_buffer(resources.buffers.visibility.buffer())?;
    if visibility.iter().any(|&byte| byte != 0) {
        bail!("visibility buffer was not cleared");
    }

    log::info!(
        "[APP] Upload verified: {} vertex bytes, {} objects",
        expected.len(),
        scene.object_count()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    logging::init_with_default_filter(&config.engine.log_level);

    let missing = config.renderer.shaders.missing_required();
    if !missing.is_empty() {
        log::warn!("[APP] Missing shader binaries: {:?}", missing);
    }

    let (width, height) = config.engine.window_size;
    let mut window = Window::new("GPU culling", width, height)?;

    let shaders = Box::new(FileShaderSource::new(config.renderer.shaders.directory.clone()));
    let mut renderer = VulkanRenderer::new(&mut window, &config.renderer, shaders)?;

    let checker = DecodedImage::checkerboard(256, 32, [230, 230, 230, 255], [90, 90, 90, 255]);
    let texture = renderer.upload_texture(&checker)?;

    let scene = build_scene(args.grid.max(1), texture.index());
    renderer.upload_scene(&scene)?;
    log::info!(
        "[APP] Scene: {} objects, mesh shading {}",
        scene.object_count(),
        renderer.mesh_shading()
    );

    if args.verify_upload {
        return verify_upload(&renderer, &scene);
    }

    let requests: Vec<DrawRequest> = scene
        .render_objects
        .iter()
        .map(|object| DrawRequest {
            surface_id: object.surface_id,
            transform_id: object.transform_id,
        })
        .collect();

    let mut camera = FlyCamera::new(Vec3::new(0.0, 6.0, -10.0));
    let mut last_time = window.time();

    while !window.should_close() {
        window.poll_events();

        let mut resized = false;
        let mut close = false;
        for (_, event) in window.flush_events() {
            match event {
                WindowEvent::FramebufferSize(..) => resized = true,
                WindowEvent::Key(Key::Escape, _, glfw::Action::Press, _) => close = true,
                _ => {}
            }
        }
        if close {
            window.set_should_close(true);
        }

        let now = window.time();
        let dt = (now - last_time) as f32;
        last_time = now;
        camera.update(&window, dt);

        let (width, height) = window.get_framebuffer_size();
        let ctx = RenderContext::perspective(camera.view(), camera.position, deg_to_rad(FOV_Y), Z_NEAR, width, height)
            .with_draw_requests(&requests)
            .with_resized(resized);

        renderer.draw_frame(&ctx)?;
    }

    renderer.wait_idle()?;
    log::info!("[APP] Shutdown");
    Ok(())
}
